use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ForecastError, ForecastResult},
    predictor::PredictorState,
    record::PredictionRequest,
};

/// Hour-of-day temperature offsets (°C) applied to the base temperature.
pub const DIURNAL_CURVE: [f64; 24] = [
    -4.0, -5.0, -6.0, -6.0, -5.0, -4.0, -2.0, 0.0, 2.0, 4.0, 6.0, 8.0, 9.0, 10.0, 10.0, 9.0, 8.0,
    6.0, 4.0, 2.0, 0.0, -1.0, -2.0, -3.0,
];

/// Calendar position a day forecast is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastContext {
    day_of_week: u8,
    month: u8,
}

impl ForecastContext {
    /// Validated context.
    pub fn new(day_of_week: u8, month: u8) -> ForecastResult<Self> {
        if day_of_week > 6 || !(1..=12).contains(&month) {
            return Err(ForecastError::InvalidRequest(format!(
                "invalid forecast context: day_of_week {day_of_week}, month {month}"
            )));
        }
        Ok(Self { day_of_week, month })
    }

    /// Context of a calendar date.
    #[must_use]
    pub fn for_date(date: NaiveDate) -> Self {
        Self {
            day_of_week: u8::try_from(date.weekday().num_days_from_monday()).unwrap_or(0),
            month: u8::try_from(date.month()).unwrap_or(1),
        }
    }

    /// Context of the current UTC date.
    #[must_use]
    pub fn today() -> Self {
        Self::for_date(Utc::now().date_naive())
    }

    /// Day of week (Monday = 0).
    #[must_use]
    pub const fn day_of_week(&self) -> u8 {
        self.day_of_week
    }

    /// Month.
    #[must_use]
    pub const fn month(&self) -> u8 {
        self.month
    }
}

/// One hour of a day forecast.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourlyForecast {
    /// Hour of day.
    pub hour: u8,
    /// Assumed temperature, °C.
    pub temperature: f64,
    /// Predicted demand, MW.
    pub predicted_demand: f64,
}

/// 24-hour forecast computed against one predictor state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyForecast {
    /// Hourly entries, hour 0 first.
    pub forecasts: Vec<HourlyForecast>,
    /// First hour with the highest demand.
    pub peak_hour: u8,
    /// Highest demand, MW.
    pub peak_demand: f64,
    /// First hour with the lowest demand.
    pub low_hour: u8,
    /// Lowest demand, MW.
    pub low_demand: f64,
    /// Sum of the hourly values, MWh.
    pub total_energy_mwh: f64,
    /// Base temperature the curve was applied to.
    pub base_temperature: f64,
    /// Calendar context.
    pub context: ForecastContext,
    /// Hours served by the pattern after a model failure.
    pub degraded_hours: usize,
    /// State version that produced every entry.
    pub state_version: u64,
    /// Generation time.
    pub generated_at: DateTime<Utc>,
}

impl DailyForecast {
    /// Summary analytics derived from this forecast alone.
    #[must_use]
    pub fn analytics(&self) -> Analytics {
        #[allow(clippy::cast_precision_loss)]
        let hours = self.forecasts.len().max(1) as f64;
        Analytics {
            avg_demand: self.total_energy_mwh / hours,
            max_demand: self.peak_demand,
            min_demand: self.low_demand,
            peak_hour: self.peak_hour,
            low_hour: self.low_hour,
            total_energy_24h: self.total_energy_mwh,
            base_temperature: self.base_temperature,
            state_version: self.state_version,
        }
    }
}

/// Summary statistics of a 24-hour forecast.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Analytics {
    /// Mean hourly demand, MW.
    pub avg_demand: f64,
    /// Peak demand, MW.
    pub max_demand: f64,
    /// Lowest demand, MW.
    pub min_demand: f64,
    /// Hour of the peak.
    pub peak_hour: u8,
    /// Hour of the trough.
    pub low_hour: u8,
    /// Energy over the day, MWh.
    pub total_energy_24h: f64,
    /// Base temperature used.
    pub base_temperature: f64,
    /// State version used.
    pub state_version: u64,
}

/// One day of a weekly forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySummary {
    /// Weekday name.
    pub day: String,
    /// Calendar date.
    pub date: NaiveDate,
    /// Day of week (Monday = 0).
    pub day_of_week: u8,
    /// Mean hourly demand, MW.
    pub avg_demand: f64,
    /// Peak demand, MW.
    pub peak_demand: f64,
    /// Hour of the peak.
    pub peak_hour: u8,
    /// Lowest demand, MW.
    pub min_demand: f64,
    /// Energy over the day, MWh.
    pub total_energy_mwh: f64,
}

/// Seven consecutive day summaries plus roll-ups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyForecast {
    /// First forecast date.
    pub start_date: NaiveDate,
    /// Base temperature used for every day.
    pub base_temperature: f64,
    /// Per-day summaries.
    pub days: Vec<DaySummary>,
    /// Energy over the week, MWh.
    pub total_weekly_mwh: f64,
    /// Mean of the daily peaks, MW.
    pub avg_daily_peak: f64,
    /// State version used for all days.
    pub state_version: u64,
    /// Generation time.
    pub generated_at: DateTime<Utc>,
}

/// Runs the 24-hour procedure against `state`.
pub fn forecast_day(
    state: &PredictorState,
    base_temperature: f64,
    context: ForecastContext,
) -> ForecastResult<DailyForecast> {
    if !base_temperature.is_finite() {
        return Err(ForecastError::InvalidRequest(format!(
            "base temperature must be finite, got {base_temperature}"
        )));
    }

    let mut forecasts = Vec::with_capacity(DIURNAL_CURVE.len());
    let mut degraded_hours = 0;
    for (hour, offset) in (0_u8..).zip(DIURNAL_CURVE) {
        let request = PredictionRequest::new(
            base_temperature + offset,
            hour,
            context.day_of_week,
            context.month,
        )?;
        let prediction = state.predict(&request);
        degraded_hours += usize::from(prediction.degraded());
        forecasts.push(HourlyForecast {
            hour,
            temperature: request.temperature(),
            predicted_demand: prediction.demand_mw,
        });
    }

    let mut peak = forecasts[0];
    let mut low = forecasts[0];
    for entry in &forecasts[1..] {
        if entry.predicted_demand > peak.predicted_demand {
            peak = *entry;
        }
        if entry.predicted_demand < low.predicted_demand {
            low = *entry;
        }
    }
    let total_energy_mwh = forecasts.iter().map(|f| f.predicted_demand).sum();

    Ok(DailyForecast {
        forecasts,
        peak_hour: peak.hour,
        peak_demand: peak.predicted_demand,
        low_hour: low.hour,
        low_demand: low.predicted_demand,
        total_energy_mwh,
        base_temperature,
        context,
        degraded_hours,
        state_version: state.version(),
        generated_at: Utc::now(),
    })
}

/// Runs the 24-hour procedure for seven consecutive days from `start_date`.
pub fn forecast_week(
    state: &PredictorState,
    base_temperature: f64,
    start_date: NaiveDate,
) -> ForecastResult<WeeklyForecast> {
    let mut days = Vec::with_capacity(7);
    for offset in 0..7 {
        let date = start_date
            .checked_add_days(Days::new(offset))
            .ok_or_else(|| ForecastError::InvalidRequest(format!("date overflow after {start_date}")))?;
        let context = ForecastContext::for_date(date);
        let daily = forecast_day(state, base_temperature, context)?;
        let analytics = daily.analytics();
        days.push(DaySummary {
            day: date.format("%A").to_string(),
            date,
            day_of_week: context.day_of_week(),
            avg_demand: analytics.avg_demand,
            peak_demand: analytics.max_demand,
            peak_hour: analytics.peak_hour,
            min_demand: analytics.min_demand,
            total_energy_mwh: analytics.total_energy_24h,
        });
    }

    let total_weekly_mwh = days.iter().map(|d| d.total_energy_mwh).sum();
    #[allow(clippy::cast_precision_loss)]
    let avg_daily_peak = days.iter().map(|d| d.peak_demand).sum::<f64>() / days.len() as f64;
    Ok(WeeklyForecast {
        start_date,
        base_temperature,
        days,
        total_weekly_mwh,
        avg_daily_peak,
        state_version: state.version(),
        generated_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pattern::{PatternConfig, PatternProfile},
        record::{Dataset, DemandRecord},
    };

    fn state() -> PredictorState {
        let data = Dataset::new(
            (0..24 * 14_u32)
                .map(|i| {
                    let hour = (i % 24) as u8;
                    let day = ((i / 24) % 7) as u8;
                    let weekend = if day >= 5 { 0.8 } else { 1.0 };
                    let shape = 1000.0 + 40.0 * (12.0 - (f64::from(hour) - 12.0).abs());
                    DemandRecord::new(shape * weekend, hour, day)
                        .with_temperature(20.0 + f64::from(i % 9))
                        .with_month(3)
                })
                .collect(),
        );
        PredictorState::initial(PatternProfile::learn(&data, &PatternConfig::default()))
    }

    #[test]
    fn daily_forecast_has_consistent_aggregates() {
        let daily = forecast_day(&state(), 25.0, ForecastContext::new(2, 3).unwrap()).unwrap();
        assert_eq!(daily.forecasts.len(), 24);
        let max = daily
            .forecasts
            .iter()
            .map(|f| f.predicted_demand)
            .fold(f64::MIN, f64::max);
        assert_eq!(daily.peak_demand, max);
        let first_peak = daily
            .forecasts
            .iter()
            .position(|f| f.predicted_demand == max)
            .unwrap();
        assert_eq!(usize::from(daily.peak_hour), first_peak);
        let total: f64 = daily.forecasts.iter().map(|f| f.predicted_demand).sum();
        assert!((daily.total_energy_mwh - total).abs() < 1e-9);
        assert_eq!(daily.forecasts[13].temperature, 35.0);
        assert_eq!(daily.degraded_hours, 0);
    }

    #[test]
    fn analytics_mirror_the_daily_forecast() {
        let daily = forecast_day(&state(), 18.0, ForecastContext::new(0, 3).unwrap()).unwrap();
        let analytics = daily.analytics();
        assert_eq!(analytics.peak_hour, daily.peak_hour);
        assert_eq!(analytics.low_hour, daily.low_hour);
        assert!((analytics.avg_demand * 24.0 - daily.total_energy_mwh).abs() < 1e-6);
    }

    #[test]
    fn weekly_forecast_reflects_day_effect() {
        // 2025-06-02 is a Monday
        let start = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let week = forecast_week(&state(), 25.0, start).unwrap();
        assert_eq!(week.days.len(), 7);
        assert_eq!(week.days[0].day, "Monday");
        assert_eq!(week.days[6].day_of_week, 6);
        assert!(week.days[5].peak_demand < week.days[0].peak_demand);
        let total: f64 = week.days.iter().map(|d| d.total_energy_mwh).sum();
        assert!((week.total_weekly_mwh - total).abs() < 1e-6);
    }

    #[test]
    fn rejects_non_finite_base_temperature() {
        let err = forecast_day(&state(), f64::INFINITY, ForecastContext::today()).unwrap_err();
        assert_eq!(err.kind(), "InvalidRequestError");
        assert!(ForecastContext::new(7, 1).is_err());
    }

    #[test]
    fn hot_days_report_the_clamped_temperature() {
        let daily = forecast_day(&state(), 50.0, ForecastContext::new(2, 3).unwrap()).unwrap();
        assert!((daily.forecasts[0].temperature - 46.0).abs() < 1e-12);
        assert!((daily.forecasts[13].temperature - 55.0).abs() < 1e-12);
        assert!(daily.forecasts.iter().all(|f| f.temperature <= 55.0));
        assert!((daily.base_temperature - 50.0).abs() < 1e-12);
    }
}
