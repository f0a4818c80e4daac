//! Step contract and the adapter that applies step results to state.
//!
//! A step reads the transcript and a state snapshot and returns a typed
//! patch; it never mutates state directly and never lets an error cross
//! this boundary. The adapter owns entry/exit logging, the timer around
//! the step body, field routing and the deep merge.

use async_trait::async_trait;
use norma_shared::messages::ChatMessage;
use norma_shared::patch::{FieldSet, StepPatch};
use norma_shared::state::{RequestState, Subsystem};
use serde_json::Map;
use std::time::Instant;
use tracing::info;

/// A pluggable orchestrator wrapped into the canonical state-update
/// contract.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &'static str;

    /// Subsystem map unrouted scalar fields land in.
    fn subsystem(&self) -> Subsystem;

    /// Read `ctx`, do the work, return a patch. Internal failures are
    /// encoded in the patch, never returned as `Err`.
    async fn run(&self, messages: &[ChatMessage], ctx: &RequestState) -> StepPatch;
}

/// Legacy orchestrator field names mapped to their canonical nested
/// slots. Reads of the old flat names go through
/// `RequestState::flat()`; writes happen in exactly one place.
const FIELD_ROUTES: &[(&str, Subsystem, &str)] = &[
    ("cache_hit", Subsystem::Cache, "hit"),
    ("response", Subsystem::Llm, "content"),
    ("match_similarity", Subsystem::Golden, "similarity"),
    ("golden_served", Subsystem::Golden, "served"),
    ("tool_results", Subsystem::Tools, "results"),
];

fn route_field<'a>(key: &'a str, default_sub: Subsystem) -> (Subsystem, &'a str) {
    for (legacy, sub, canonical) in FIELD_ROUTES {
        if *legacy == key {
            return (*sub, canonical);
        }
    }
    (default_sub, key)
}

/// Apply a step result: append the visit, route scalar fields,
/// deep-merge extras and decisions, then the top-level updates.
pub fn apply_patch(
    state: &mut RequestState,
    step_name: &str,
    default_sub: Subsystem,
    patch: StepPatch,
) {
    state.record_visit(step_name);

    for FieldSet { key, value } in patch.values {
        let (sub, canonical) = route_field(&key, default_sub);
        let mut single = Map::new();
        single.insert(canonical.to_string(), value);
        state.merge_subsystem(sub, &single);
    }

    for (sub, map) in &patch.extras {
        state.merge_subsystem(*sub, map);
    }

    if !patch.decisions.is_empty() {
        state.merge_decisions(&patch.decisions);
    }

    if let Some(answer) = patch.answer {
        state.answer = Some(answer);
    }
    if let Some(stage) = patch.stage {
        state.stage = stage;
    }
    if let Some(complete) = patch.complete {
        state.complete = complete;
    }
}

/// Drive one step: log entry, time the step body only, apply the patch,
/// record the elapsed metric, log exit. Returns the elapsed ms.
pub async fn run_step(
    step: &dyn Step,
    messages: &[ChatMessage],
    state: &mut RequestState,
) -> u64 {
    info!("[>]  {} enter request={}", step.name(), state.request_id);

    let started = Instant::now();
    let patch = step.run(messages, state).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    apply_patch(state, step.name(), step.subsystem(), patch);
    state.record_metric(&format!("{}_ms", step.name()), elapsed_ms);

    info!("[<]  {} exit elapsed_ms={}", step.name(), elapsed_ms);
    elapsed_ms
}
