//! Write-only sink for named numeric samples

use std::sync::{Arc, Mutex, MutexGuard};

pub trait Telemetry: Send {
    fn put(&mut self, name: &str, value: f64);
}

/// Discards every sample.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTelemetry;

impl Telemetry for NullTelemetry {
    fn put(&mut self, _name: &str, _value: f64) {}
}

/// Keeps every sample; clones share the same record.
#[derive(Debug, Default, Clone)]
pub struct RecordingTelemetry {
    samples: Arc<Mutex<Vec<(String, f64)>>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(String, f64)>> {
        self.samples.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn samples(&self) -> Vec<(String, f64)> {
        self.lock().clone()
    }

    /// Most recent value recorded under `name`.
    pub fn last(&self, name: &str) -> Option<f64> {
        self.lock()
            .iter()
            .rev()
            .find(|(sample, _)| sample == name)
            .map(|(_, value)| *value)
    }

    pub fn count(&self, name: &str) -> usize {
        self.lock().iter().filter(|(sample, _)| sample == name).count()
    }
}

impl Telemetry for RecordingTelemetry {
    fn put(&mut self, name: &str, value: f64) {
        self.lock().push((name.to_string(), value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_is_shared_between_clones() {
        let recorder = RecordingTelemetry::new();
        let mut sink: Box<dyn Telemetry> = Box::new(recorder.clone());
        sink.put("dama.logged_terminals", 1.0);
        sink.put("dama.logged_terminals", 2.0);
        sink.put("dama.rbdc_alloc_kbps", 512.0);
        assert_eq!(recorder.last("dama.logged_terminals"), Some(2.0));
        assert_eq!(recorder.count("dama.logged_terminals"), 2);
        assert_eq!(recorder.last("missing"), None);
        NullTelemetry.put("ignored", 0.0);
    }
}
