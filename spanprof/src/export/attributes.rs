use super::{PROFILING_SOURCE, SOURCE_EVENT_NAME, SOURCE_EVENT_PERIOD, SOURCE_TYPE};
use crate::context::StackToSpanLinkage;
use crate::events::EventPeriods;
use crate::logs::Attributes;

/// Builds the attributes every profiling record starts with.
#[derive(Debug, Clone)]
pub struct LogDataCommonAttributes {
    periods: EventPeriods,
}

impl LogDataCommonAttributes {
    #[must_use]
    pub fn new(periods: EventPeriods) -> Self {
        Self { periods }
    }

    #[must_use]
    pub fn for_linkage(&self, linkage: &StackToSpanLinkage) -> Attributes {
        self.for_event(linkage.source_event_name)
    }

    /// Source type and event name, plus the event period in milliseconds when
    /// the event is periodic.
    #[must_use]
    pub fn for_event(&self, event_name: &str) -> Attributes {
        let mut attributes = Attributes::new()
            .with(SOURCE_TYPE, PROFILING_SOURCE)
            .with(SOURCE_EVENT_NAME, event_name);
        if let Some(period) = self.periods.duration(event_name) {
            attributes.put(SOURCE_EVENT_PERIOD, u64::try_from(period.as_millis()).unwrap_or(u64::MAX));
        }
        attributes
    }

    #[must_use]
    pub fn periods(&self) -> &EventPeriods {
        &self.periods
    }
}
