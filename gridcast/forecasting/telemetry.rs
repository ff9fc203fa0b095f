use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use tokio::runtime::{Builder, Handle, Runtime};
use uuid::Uuid;

/// Builder for forecasting telemetry sinks.
pub struct ForecastTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    min_level: LogLevel,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl ForecastTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            min_level: LogLevel::Info,
            event_publisher: None,
        }
    }

    /// Sets the log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Sets the lowest level written to the log.
    #[must_use]
    pub const fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<ForecastTelemetry> {
        let logger = match self.log_path {
            Some(path) => Some(JsonLogger::with_min_level(path, self.min_level)?),
            None => None,
        };
        let event = match self.event_publisher {
            Some(publisher) => Some(EventHandle::new(publisher)?),
            None => None,
        };
        Ok(ForecastTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
                event,
            }),
        })
    }
}

/// Telemetry handle shared by the dataset store, trainer, registry and service.
///
/// Cheap to clone. Both sinks are optional; a handle without sinks is a no-op.
#[derive(Clone)]
pub struct ForecastTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for ForecastTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForecastTelemetry")
            .field("module", &self.inner.module)
            .field("logs", &self.inner.logger.is_some())
            .field("events", &self.inner.event.is_some())
            .finish()
    }
}

impl Default for ForecastTelemetry {
    fn default() -> Self {
        Self::disabled()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
    event: Option<EventHandle>,
}

// runtime is driven only outside async contexts and shut down without blocking,
// so the handle may be dropped inside another runtime
struct EventHandle {
    runtime: Option<Runtime>,
    publisher: Arc<dyn EventPublisher>,
}

impl EventHandle {
    fn new(publisher: Arc<dyn EventPublisher>) -> Result<Self> {
        Ok(Self {
            runtime: Some(Builder::new_current_thread().enable_all().build()?),
            publisher,
        })
    }

    fn publish(&self, record: EventRecord) -> Result<()> {
        if let Ok(handle) = Handle::try_current() {
            let publisher = Arc::clone(&self.publisher);
            handle.spawn(async move {
                if let Err(err) = publisher.publish(record).await {
                    eprintln!("telemetry event publish failed: {err:?}");
                }
            });
            Ok(())
        } else {
            self.runtime
                .as_ref()
                .map_or(Ok(()), |runtime| runtime.block_on(self.publisher.publish(record)))
        }
    }
}

impl Drop for EventHandle {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl ForecastTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> ForecastTelemetryBuilder {
        ForecastTelemetryBuilder::new(module)
    }

    /// Handle with no sinks.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                module: "gridcast".into(),
                logger: None,
                event: None,
            }),
        }
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            let record = LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Emits an event on the bus.
    pub fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        if let Some(handle) = &self.inner.event {
            handle.publish(EventRecord {
                id: format!("evt-{}", Uuid::new_v4()),
                source: self.inner.module.clone(),
                event_type: event_type.into(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                payload,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_event_bus::MemoryEventBus;
    use tempfile::tempdir;

    #[test]
    fn telemetry_writes_log_and_event() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("gridcast.log");
        let bus = Arc::new(MemoryEventBus::new(16));
        let telemetry = ForecastTelemetry::builder("gridcast.service")
            .log_path(&path)
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, "gridcast.upload.completed", json!({ "rows": 3 }))
            .unwrap();
        telemetry
            .event("gridcast.registry.swapped", json!({ "version": 2 }))
            .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("gridcast.upload.completed"));
        assert_eq!(bus.topic("gridcast.registry").len(), 1);
    }

    #[test]
    fn dropping_inside_an_async_context_does_not_panic() {
        let bus = Arc::new(MemoryEventBus::new(16));
        let telemetry = ForecastTelemetry::builder("gridcast.service")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry
            .event("gridcast.service.opened", json!({ "version": 0 }))
            .unwrap();
        let outer = Builder::new_current_thread().build().unwrap();
        outer.block_on(async move {
            telemetry
                .event("gridcast.registry.swapped", json!({ "version": 1 }))
                .unwrap();
            drop(telemetry);
        });
        assert!(!bus.topic("gridcast.service").is_empty());
    }

    #[test]
    fn min_level_filters_debug_records() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("gridcast.log");
        let telemetry = ForecastTelemetry::builder("gridcast")
            .log_path(&path)
            .min_level(LogLevel::Warn)
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, "gridcast.predict.served", Value::Null)
            .unwrap();
        telemetry
            .log(LogLevel::Warn, "gridcast.predict.degraded", Value::Null)
            .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn disabled_handle_is_a_no_op() {
        let telemetry = ForecastTelemetry::disabled();
        assert!(telemetry.log(LogLevel::Error, "x", Value::Null).is_ok());
        assert!(telemetry.event("x", Value::Null).is_ok());
    }
}
