use std::collections::HashMap;
use std::time::Duration;

use super::EventSettings;

/// Sampling period lookup by event name.
///
/// Periods are resolved once from the event settings, so the per-record lookup
/// done by the exporters is a plain hash map read.
#[derive(Debug, Clone, Default)]
pub struct EventPeriods {
    periods: HashMap<String, Duration>,
}

impl EventPeriods {
    #[must_use]
    pub fn new(settings: &EventSettings) -> Self {
        let periods = settings
            .iter()
            .filter_map(|(key, _)| key.strip_suffix("#period"))
            .filter_map(|event| settings.period(event).map(|p| (event.to_string(), p)))
            .collect();
        Self { periods }
    }

    /// Configured period of `event_name`, or `None` if the event is not periodic.
    #[must_use]
    pub fn duration(&self, event_name: &str) -> Option<Duration> {
        self.periods.get(event_name).copied()
    }
}
