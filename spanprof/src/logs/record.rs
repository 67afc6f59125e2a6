use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::{SpanContext, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<u64> for AttributeValue {
    fn from(v: u64) -> Self {
        AttributeValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

/// Ordered attribute set of a log record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, AttributeValue>);

impl Attributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.put(key, value);
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.get(key)
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(AttributeValue::String(s)) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(AttributeValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// A profiling record as handed to the log sink. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: Timestamp,
    pub body: String,
    pub attributes: Attributes,
    /// Trace context association, present when the sample ran inside a span
    pub span_context: Option<SpanContext>,
}
