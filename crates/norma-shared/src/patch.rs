//! Typed step result patch.
//!
//! Steps never mutate state directly; they return a `StepPatch` and the
//! adapter applies it. The patch is a closed set of operations: scalar
//! sets routed through an explicit field table, subsystem deep-merges,
//! and decision-log entries.

use crate::state::{AnswerRecord, ProcessingStage, Subsystem};
use serde_json::{Map, Value};

/// One scalar set. The adapter routes the key to its canonical nested
/// slot (with explicit renames); unrouted keys land in the emitting
/// step's own subsystem map.
#[derive(Debug, Clone)]
pub struct FieldSet {
    pub key: String,
    pub value: Value,
}

/// Result patch returned by every step.
#[derive(Debug, Clone, Default)]
pub struct StepPatch {
    pub values: Vec<FieldSet>,
    pub extras: Vec<(Subsystem, Map<String, Value>)>,
    pub decisions: Map<String, Value>,
    pub answer: Option<AnswerRecord>,
    pub stage: Option<ProcessingStage>,
    pub complete: Option<bool>,
}

impl StepPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.values.push(FieldSet {
            key: key.to_string(),
            value: value.into(),
        });
        self
    }

    /// Deep-merge a sub-map into a subsystem map.
    pub fn extra(mut self, sub: Subsystem, map: Map<String, Value>) -> Self {
        self.extras.push((sub, map));
        self
    }

    /// Record a branch outcome in the global decision log.
    pub fn decision(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.decisions.insert(key.to_string(), value.into());
        self
    }

    pub fn answer(mut self, answer: AnswerRecord) -> Self {
        self.answer = Some(answer);
        self
    }

    pub fn stage(mut self, stage: ProcessingStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn complete(mut self, complete: bool) -> Self {
        self.complete = Some(complete);
        self
    }
}
