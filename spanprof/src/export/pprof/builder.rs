//! Incremental pprof profile construction
//!
//! Strings, functions and locations are deduplicated as samples are added, so
//! a profile built from many similar stacks stays small.

use std::collections::HashMap;

use super::profile::{Function, Label, Line, Location, Profile, Sample, ValueType};
use crate::domain::Timestamp;
use crate::events::StackFrame;

/// Value of one sample label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelValue<'a> {
    Str(&'a str),
    Num(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FunctionKey {
    name: i64,
    file: i64,
}

#[derive(Debug)]
pub struct ProfileBuilder {
    profile: Profile,
    strings: HashMap<String, i64>,
    functions: HashMap<FunctionKey, u64>,
    /// (function id, line) -> location id
    locations: HashMap<(u64, i64), u64>,
    first_sample: Option<Timestamp>,
    last_sample: Option<Timestamp>,
}

impl ProfileBuilder {
    /// Start an empty profile whose samples carry one value of `sample_type`
    /// measured in `unit`.
    #[must_use]
    pub fn new(sample_type: &str, unit: &str) -> Self {
        let mut builder = Self {
            profile: Profile::default(),
            strings: HashMap::new(),
            functions: HashMap::new(),
            locations: HashMap::new(),
            first_sample: None,
            last_sample: None,
        };
        builder.profile.string_table.push(String::new());
        builder.strings.insert(String::new(), 0);

        let value_type = ValueType { r#type: builder.string(sample_type), unit: builder.string(unit) };
        builder.profile.sample_type.push(value_type);
        builder
    }

    /// Record the sampling period carried in the profile header.
    pub fn set_period(&mut self, period_type: &str, unit: &str, period: i64) {
        let value_type = ValueType { r#type: self.string(period_type), unit: self.string(unit) };
        self.profile.period_type = Some(value_type);
        self.profile.period = period;
    }

    /// Add one sample. `frames` are leaf first.
    pub fn add_sample(
        &mut self,
        time: Timestamp,
        frames: &[StackFrame],
        value: i64,
        labels: &[(&str, LabelValue<'_>)],
    ) {
        let location_id = frames.iter().map(|frame| self.location(frame)).collect();
        let label = labels
            .iter()
            .map(|(key, value)| {
                let key = self.string(key);
                match *value {
                    LabelValue::Str(s) => Label { key, str: self.string(s), ..Label::default() },
                    LabelValue::Num(num) => Label { key, num, ..Label::default() },
                }
            })
            .collect();
        self.profile.sample.push(Sample { location_id, value: vec![value], label });

        self.first_sample = Some(self.first_sample.map_or(time, |t| t.min(time)));
        self.last_sample = Some(self.last_sample.map_or(time, |t| t.max(time)));
    }

    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.profile.sample.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profile.sample.is_empty()
    }

    /// Finish the profile; time and duration span the samples added.
    #[must_use]
    pub fn build(mut self) -> Profile {
        if let (Some(first), Some(last)) = (self.first_sample, self.last_sample) {
            self.profile.time_nanos = i64::try_from(first.as_nanos()).unwrap_or(i64::MAX);
            self.profile.duration_nanos =
                i64::try_from(last.as_nanos() - first.as_nanos()).unwrap_or(i64::MAX);
        }
        self.profile
    }

    fn string(&mut self, s: &str) -> i64 {
        if let Some(&index) = self.strings.get(s) {
            return index;
        }
        let index = i64::try_from(self.profile.string_table.len()).unwrap_or(i64::MAX);
        self.profile.string_table.push(s.to_string());
        self.strings.insert(s.to_string(), index);
        index
    }

    fn function(&mut self, frame: &StackFrame) -> u64 {
        let key = FunctionKey {
            name: self.string(&frame.function),
            file: self.string(frame.file.as_deref().unwrap_or("")),
        };
        if let Some(&id) = self.functions.get(&key) {
            return id;
        }
        let id = self.profile.function.len() as u64 + 1;
        self.profile.function.push(Function {
            id,
            name: key.name,
            system_name: key.name,
            filename: key.file,
            start_line: 0,
        });
        self.functions.insert(key, id);
        id
    }

    fn location(&mut self, frame: &StackFrame) -> u64 {
        let function_id = self.function(frame);
        let line = i64::from(frame.line.unwrap_or(0));
        if let Some(&id) = self.locations.get(&(function_id, line)) {
            return id;
        }
        let id = self.profile.location.len() as u64 + 1;
        self.profile.location.push(Location {
            id,
            line: vec![Line { function_id, line }],
            ..Location::default()
        });
        self.locations.insert((function_id, line), id);
        id
    }
}
