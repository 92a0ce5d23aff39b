//! An echo datasource that records evaluation order and concurrency.

use crate::datasource::{AttrType, Datasource, DatasourceRegistry, ObjectSpec};
use crate::errors::DatasourceError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared record of echo evaluations.
#[derive(Debug, Clone, Default)]
pub struct EvalLog {
    finished: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    delay_ms: u64,
}

impl EvalLog {
    /// Makes every echo `execute` sleep for `delay_ms`.
    #[must_use]
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// The configured `value` of each finished echo, in completion order.
    #[must_use]
    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().clone()
    }

    /// The most echoes ever executing at once.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Returns `{"value": value}`, or `{"value": "<from>+<value>"}` when `from`
/// is set.
#[derive(Debug)]
pub struct EchoDatasource {
    log: EvalLog,
    value: String,
    from: Option<String>,
}

impl EchoDatasource {
    /// Starts an unconfigured echo.
    ///
    /// # Errors
    ///
    /// Never fails; the signature matches a registry factory.
    pub fn boxed(log: &EvalLog) -> Result<Box<dyn Datasource>, DatasourceError> {
        Ok(Box::new(Self {
            log: log.clone(),
            value: String::new(),
            from: None,
        }))
    }
}

#[async_trait]
impl Datasource for EchoDatasource {
    fn config_spec(&self) -> ObjectSpec {
        ObjectSpec::new()
            .required("value", AttrType::String)
            .optional("from", AttrType::String)
    }

    fn output_spec(&self) -> ObjectSpec {
        ObjectSpec::new().optional("value", AttrType::String)
    }

    async fn configure(&mut self, config: Value) -> Result<(), DatasourceError> {
        self.value = config["value"]
            .as_str()
            .ok_or_else(|| DatasourceError::new("value must be a string"))?
            .to_string();
        self.from = config["from"].as_str().map(str::to_string);
        Ok(())
    }

    async fn execute(&self) -> Result<Value, DatasourceError> {
        let now = self.log.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.peak.fetch_max(now, Ordering::SeqCst);
        if self.log.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.log.delay_ms)).await;
        }
        self.log.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.log.finished.lock().push(self.value.clone());

        let value = match self.from {
            Some(ref from) => format!("{from}+{}", self.value),
            None => self.value.clone(),
        };
        Ok(json!({ "value": value }))
    }
}

/// Registers the echo datasource as type `echo`.
pub fn register_echo(registry: &DatasourceRegistry, log: &EvalLog) {
    let log = log.clone();
    registry.register("echo", move || EchoDatasource::boxed(&log));
}

/// Returns a registry holding only the echo datasource.
#[must_use]
pub fn echo_registry(log: &EvalLog) -> DatasourceRegistry {
    let registry = DatasourceRegistry::new();
    register_echo(&registry, log);
    registry
}
