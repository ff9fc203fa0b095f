use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use gridcast_forecasting::{
    ForecastContext, ForecastService, ForecastTelemetry, GridcastConfig, PredictionRequest,
    TabularUpload,
};
use serde::Serialize;
use serde_json::json;
use shared_event_bus::FileEventPublisher;
use shared_logging::LogLevel;

#[derive(Parser, Debug)]
#[command(name = "gridcast", version, about = "Grid demand forecaster")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Overrides `storage.data_dir`.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validates a CSV file, merges it into the dataset and retrains.
    Upload {
        /// CSV with at least a `demand` column.
        file: PathBuf,
    },
    /// Predicts demand for one hour.
    Predict {
        #[arg(long, allow_hyphen_values = true)]
        temperature: f64,
        #[arg(long)]
        hour: u8,
        #[arg(long)]
        day_of_week: u8,
        #[arg(long)]
        month: u8,
        #[arg(long)]
        humidity: Option<f64>,
        #[arg(long)]
        holiday: Option<bool>,
    },
    /// Forecasts the next 24 hours.
    Forecast(DayArgs),
    /// Forecasts seven days.
    Weekly {
        #[arg(long, allow_hyphen_values = true, default_value_t = 25.0)]
        temperature: f64,
        /// First day (YYYY-MM-DD); defaults to today.
        #[arg(long)]
        start: Option<NaiveDate>,
    },
    /// Summary statistics of a 24-hour forecast.
    Analytics(DayArgs),
    /// Dataset statistics.
    Stats,
    /// Restores the dataset to the most recent backup.
    Reset,
    /// Retrains on the current dataset.
    Retrain,
    /// Predictor mode, active model and storage state.
    Status,
}

#[derive(Args, Debug)]
struct DayArgs {
    /// Base temperature the diurnal curve is applied to.
    #[arg(long, allow_hyphen_values = true, default_value_t = 25.0)]
    temperature: f64,
    /// Forecast date (YYYY-MM-DD); defaults to today.
    #[arg(long, conflicts_with_all = ["day_of_week", "month"])]
    date: Option<NaiveDate>,
    #[arg(long, requires = "month")]
    day_of_week: Option<u8>,
    #[arg(long, requires = "day_of_week")]
    month: Option<u8>,
}

impl DayArgs {
    fn context(&self) -> Result<Option<ForecastContext>> {
        Ok(match (self.date, self.day_of_week, self.month) {
            (Some(date), _, _) => Some(ForecastContext::for_date(date)),
            (None, Some(day_of_week), Some(month)) => {
                Some(ForecastContext::new(day_of_week, month)?)
            }
            _ => None,
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let telemetry = build_telemetry(&config)?;
    let service = ForecastService::open(&config, telemetry.clone())
        .with_context(|| format!("opening data dir {}", config.storage.data_dir.display()))?;
    let _ = telemetry.log(
        LogLevel::Info,
        "gridcast.cli.command",
        json!({ "command": format!("{:?}", cli.command) }),
    );
    run(&service, cli.command)
}

fn load_config(cli: &Cli) -> Result<GridcastConfig> {
    let config = match &cli.config {
        Some(path) => GridcastConfig::load(path)?,
        None => GridcastConfig::default(),
    };
    Ok(match &cli.data_dir {
        Some(dir) => config.with_data_dir(dir),
        None => config,
    })
}

fn build_telemetry(config: &GridcastConfig) -> Result<ForecastTelemetry> {
    let publisher = FileEventPublisher::new(config.event_log_path())?;
    ForecastTelemetry::builder("gridcast.cli")
        .log_path(config.log_path())
        .min_level(config.telemetry.level()?)
        .event_publisher(Arc::new(publisher))
        .build()
}

fn run(service: &ForecastService, command: Commands) -> Result<()> {
    match command {
        Commands::Upload { file } => {
            let upload = TabularUpload::from_csv_path(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            emit(&service.upload(&upload)?)
        }
        Commands::Predict {
            temperature,
            hour,
            day_of_week,
            month,
            humidity,
            holiday,
        } => {
            let mut request = PredictionRequest::new(temperature, hour, day_of_week, month)?;
            if let Some(humidity) = humidity {
                request = request.with_humidity(humidity)?;
            }
            if let Some(holiday) = holiday {
                request = request.with_holiday(holiday);
            }
            emit(&service.point_forecast(&request))
        }
        Commands::Forecast(args) => emit(&service.forecast_24h(args.temperature, args.context()?)?),
        Commands::Weekly { temperature, start } => emit(&service.weekly(temperature, start)?),
        Commands::Analytics(args) => emit(&service.analytics(args.temperature, args.context()?)?),
        Commands::Stats => emit(&service.stats()),
        Commands::Reset => emit(&service.reset()?),
        Commands::Retrain => emit(&service.retrain()?),
        Commands::Status => emit(&service.status()),
    }
}

fn emit(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
