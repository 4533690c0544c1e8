use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::fmt;

/// A single value carried by an event record.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Time(DateTime<Utc>),
}

impl FieldValue {
    /// Seconds since the Unix epoch with microsecond resolution.
    pub fn posix_seconds(time: &DateTime<Utc>) -> f64 {
        time.timestamp() as f64 + f64::from(time.timestamp_subsec_micros()) / 1e6
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Time(t) => Some(Self::posix_seconds(t)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v:?}"),
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Time(t) => write!(f, "{:.6}", Self::posix_seconds(t)),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(i64::from(v))
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Int(i64::from(v))
    }
}

impl From<usize> for FieldValue {
    fn from(v: usize) -> Self {
        FieldValue::Int(v as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Time(v)
    }
}

/// Insertion-ordered event payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(IndexMap<String, FieldValue>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn extend(&mut self, other: Fields) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (k, v) in iter {
            fields.insert(k, v);
        }
        fields
    }
}

/// A record-shaped mapping produced by a presenter when it completes.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub kind: String,
    pub fields: Fields,
}

impl EventDraft {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Fields::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name, value);
        self
    }
}

/// One entry of the event log. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub time: DateTime<Utc>,
    /// Microseconds since the session anchor.
    pub delta_us: i64,
    pub kind: String,
    pub fields: Fields,
}

impl EventRecord {
    pub fn delta_seconds(&self) -> f64 {
        self.delta_us as f64 / 1e6
    }

    /// Every named cell of the record, fixed columns first.
    pub fn cells(&self) -> Vec<(&str, FieldValue)> {
        let mut cells = Vec::with_capacity(self.fields.len() + 3);
        cells.push(("Time", FieldValue::Time(self.time)));
        cells.push(("DeltaTime", FieldValue::Float(self.delta_seconds())));
        cells.push(("Type", FieldValue::Text(self.kind.clone())));
        cells.extend(self.fields.iter().map(|(k, v)| (k, v.clone())));
        cells
    }
}
