use behx_core::{EventRecord, FieldValue, Fields};
use behx_timing::{round_to_micros, SessionClock};
use behx_trigger::{HardwareTrigger, TriggerOutcome};
use chrono::{DateTime, TimeDelta, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::columnar::ColumnarStore;
use crate::error::LogError;
use crate::flat::write_flat;

pub const FILE_TYPE: &str = "EventLog";
pub const FORMAT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Where a session's record ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    /// Written once, on `persist()`.
    Flat(PathBuf),
    /// Written through on every append.
    Columnar(PathBuf),
}

impl LogOutput {
    pub fn path(&self) -> &Path {
        match self {
            LogOutput::Flat(p) | LogOutput::Columnar(p) => p,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    wallclock: DateTime<Utc>,
    monotonic: Duration,
}

/// Append-only, timestamped record of a session.
///
/// Every record's time is the anchor wallclock plus the monotonic time elapsed
/// since the anchor, rounded to the microsecond, so wallclock adjustments
/// during a session cannot reorder records.
pub struct EventLog<C: SessionClock> {
    clock: C,
    records: Vec<EventRecord>,
    anchor: Option<Anchor>,
    attributes: Fields,
    output: Option<LogOutput>,
    store: Option<ColumnarStore>,
    trigger: HardwareTrigger,
}

impl<C: SessionClock> EventLog<C> {
    pub fn new(clock: C) -> Self {
        Self::with_trigger(clock, HardwareTrigger::disabled())
    }

    pub fn with_trigger(clock: C, trigger: HardwareTrigger) -> Self {
        Self {
            clock,
            records: Vec::new(),
            anchor: None,
            attributes: Fields::new(),
            output: None,
            store: None,
            trigger,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn trigger(&self) -> &HardwareTrigger {
        &self.trigger
    }

    pub fn trigger_mut(&mut self) -> &mut HardwareTrigger {
        &mut self.trigger
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn anchor(&self) -> Option<DateTime<Utc>> {
        self.anchor.map(|a| a.wallclock)
    }

    pub fn output(&self) -> Option<&LogOutput> {
        self.output.as_ref()
    }

    pub fn attributes(&self) -> &Fields {
        &self.attributes
    }

    pub fn count_of(&self, kind: &str) -> usize {
        self.records.iter().filter(|r| r.kind == kind).count()
    }

    /// Sets a file attribute, written through when a columnar store is open.
    pub fn set_attribute(
        &mut self,
        name: &str,
        value: impl Into<FieldValue>,
    ) -> Result<(), LogError> {
        let value = value.into();
        if let Some(store) = self.store.as_mut() {
            store.set_attribute(name, &value)?;
        }
        self.attributes.insert(name, value);
        Ok(())
    }

    /// Attaches the output. A columnar store is created right away and
    /// receives the attributes and any records already in memory.
    pub fn open(&mut self, output: LogOutput) -> Result<(), LogError> {
        self.store = None;
        if let LogOutput::Columnar(path) = &output {
            let mut store = ColumnarStore::open(path)?;
            store.set_attribute("FileType", &FieldValue::from(FILE_TYPE))?;
            store.set_attribute("Version", &FieldValue::from(FORMAT_VERSION))?;
            store.set_attributes(&self.attributes)?;
            if let Some(anchor) = self.anchor {
                for record in &self.records {
                    store.append(record, anchor.wallclock)?;
                }
            }
            self.store = Some(store);
        }
        tracing::debug!(path = %output.path().display(), "event log output attached");
        self.output = Some(output);
        Ok(())
    }

    /// Anchors the session clock and records `TimeSet`.
    pub fn set_time(&mut self) -> Result<(), LogError> {
        if let Some(previous) = self.anchor {
            tracing::warn!(
                previous = %previous.wallclock,
                "set_time() called on an anchored log; re-anchoring"
            );
        }
        let anchor = Anchor {
            wallclock: self.clock.wallclock(),
            monotonic: self.clock.monotonic(),
        };
        self.anchor = Some(anchor);
        self.append_record(EventRecord {
            time: anchor.wallclock,
            delta_us: 0,
            kind: "TimeSet".into(),
            fields: Fields::new().with("StartTime", anchor.wallclock),
        })
    }

    fn create(&self, kind: &str, fields: Fields) -> Result<EventRecord, LogError> {
        let anchor = self.anchor.ok_or(LogError::NotAnchored)?;
        let elapsed = self.clock.monotonic().saturating_sub(anchor.monotonic);
        let delta_us = round_to_micros(elapsed);
        Ok(EventRecord {
            time: anchor.wallclock + TimeDelta::microseconds(delta_us),
            delta_us,
            kind: kind.to_string(),
            fields,
        })
    }

    pub fn append(&mut self, kind: &str, fields: Fields) -> Result<(), LogError> {
        let record = self.create(kind, fields)?;
        self.append_record(record)
    }

    /// Stores a fully formed record as given. The record is kept in memory
    /// even when writing it through to the columnar store fails.
    pub fn append_record(&mut self, record: EventRecord) -> Result<(), LogError> {
        self.records.push(record);
        match self.records.last() {
            Some(record) => write_through(self.store.as_mut(), self.anchor, record),
            None => Ok(()),
        }
    }

    /// Stamps a record now and places it at `position` (clamped to the end).
    pub fn insert(&mut self, position: usize, kind: &str, fields: Fields) -> Result<(), LogError> {
        let record = self.create(kind, fields)?;
        let position = position.min(self.records.len());
        self.records.insert(position, record);
        write_through(self.store.as_mut(), self.anchor, &self.records[position])
    }

    /// Fires the hardware trigger once and records a `Trigger` event. A
    /// failed trigger still produces the record.
    pub fn trigger_event(&mut self, mut fields: Fields) -> Result<TriggerOutcome, LogError> {
        let outcome = self.trigger.trigger();
        if let TriggerOutcome::Degraded(reason) = &outcome {
            fields.insert("Degraded", reason.as_str());
        }
        self.append("Trigger", fields)?;
        Ok(outcome)
    }

    /// Forgets everything: records, anchor, output and attributes.
    pub fn clear(&mut self) {
        if let Some(store) = self.store.take() {
            if let Err(e) = store.close() {
                tracing::warn!(error = %e, "closing columnar store failed");
            }
        }
        self.records.clear();
        self.anchor = None;
        self.output = None;
        self.attributes = Fields::new();
    }

    /// Writes the flat form to `path`.
    pub fn save(&self, path: &Path) -> Result<(), LogError> {
        std::fs::write(path, write_flat(&self.records)).map_err(|source| LogError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes the record to the attached output and returns its path.
    pub fn persist(&self) -> Result<PathBuf, LogError> {
        let output = self.output.clone().ok_or(LogError::NoOutput)?;
        match &output {
            LogOutput::Flat(path) => self.save(path)?,
            // Committed on every append.
            LogOutput::Columnar(_) => {}
        }
        tracing::info!(path = %output.path().display(), records = self.records.len(), "event log persisted");
        Ok(output.path().to_path_buf())
    }
}

fn write_through(
    store: Option<&mut ColumnarStore>,
    anchor: Option<Anchor>,
    record: &EventRecord,
) -> Result<(), LogError> {
    let (Some(store), Some(anchor)) = (store, anchor) else {
        return Ok(());
    };
    store.append(record, anchor.wallclock).inspect_err(|e| {
        tracing::error!(kind = %record.kind, error = %e, "columnar write failed; record kept in memory");
    })
}
