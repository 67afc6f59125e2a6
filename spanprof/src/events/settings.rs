use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::parse_duration;

/// Per-event settings handed to the native profiler, keyed `<event>#<setting>`
/// (for example `spanprof.ThreadDump#period = 10000 ms`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSettings(BTreeMap<String, String>);

impl EventSettings {
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set_enabled(&mut self, event_name: &str, enabled: bool) {
        self.insert(format!("{event_name}#enabled"), enabled.to_string());
    }

    pub fn set_period(&mut self, event_name: &str, period: Duration) {
        self.insert(format!("{event_name}#period"), format!("{} ms", period.as_millis()));
    }

    /// Events are off unless explicitly enabled.
    #[must_use]
    pub fn is_enabled(&self, event_name: &str) -> bool {
        self.get(&format!("{event_name}#enabled")).is_some_and(|v| v.trim() == "true")
    }

    /// Sampling period of a periodic event.
    ///
    /// `None` for events without a period and for chunk-bound periods such as
    /// `everyChunk`, which have no fixed length.
    #[must_use]
    pub fn period(&self, event_name: &str) -> Option<Duration> {
        self.get(&format!("{event_name}#period")).and_then(|raw| parse_duration(raw).ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
