//! Response cache steps.
//!
//! The cache is a pure optimization, never a correctness dependency:
//! every failure mode (timeout, corruption, unreachable backend)
//! resolves to a miss plus a diagnostic flag. Same posture on the
//! write-back side.

use crate::providers::CacheClient;
use crate::step::Step;
use async_trait::async_trait;
use norma_shared::config::Config;
use norma_shared::messages::{fingerprint, ChatMessage};
use norma_shared::patch::StepPatch;
use norma_shared::state::{
    AnswerOrigin, AnswerRecord, ProcessingStage, RequestState, Subsystem,
};
use serde_json::{json, Map};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// `check(fingerprint) -> hit | miss`, fail-open.
pub struct CacheCheckStep {
    client: Arc<dyn CacheClient>,
    config: Arc<Config>,
}

impl CacheCheckStep {
    pub fn new(client: Arc<dyn CacheClient>, config: Arc<Config>) -> Self {
        Self { client, config }
    }

    fn miss(fp: &str, error: Option<String>) -> StepPatch {
        let mut extra = Map::new();
        extra.insert("fingerprint".into(), json!(fp));
        if let Some(error) = &error {
            warn!("[C]  cache degraded to miss: {}", error);
            extra.insert("error".into(), json!(error));
        }
        StepPatch::new()
            .set("cache_hit", false)
            .extra(Subsystem::Cache, extra)
            .decision("cache_hit", false)
    }
}

#[async_trait]
impl Step for CacheCheckStep {
    fn name(&self) -> &'static str {
        "cache_check"
    }

    fn subsystem(&self) -> Subsystem {
        Subsystem::Cache
    }

    async fn run(&self, messages: &[ChatMessage], _ctx: &RequestState) -> StepPatch {
        let fp = fingerprint(messages);

        if !self.config.cache.enabled {
            return Self::miss(&fp, None).set("disabled", true);
        }

        let budget = Duration::from_millis(self.config.cache.timeout_ms);
        let raw = match tokio::time::timeout(budget, self.client.get(&fp)).await {
            Ok(Ok(Some(raw))) => raw,
            Ok(Ok(None)) => return Self::miss(&fp, None),
            Ok(Err(e)) => return Self::miss(&fp, Some(e.to_string())),
            Err(_) => {
                return Self::miss(
                    &fp,
                    Some(format!("timed out after {}ms", self.config.cache.timeout_ms)),
                )
            }
        };

        let mut record: AnswerRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            // A corrupt entry is a miss, not an error.
            Err(e) => return Self::miss(&fp, Some(format!("corrupt entry: {e}"))),
        };
        record.origin = AnswerOrigin::Cache;

        info!("[C]  cache hit fingerprint={}", &fp[..12.min(fp.len())]);
        let mut extra = Map::new();
        extra.insert("fingerprint".into(), json!(fp));
        StepPatch::new()
            .set("cache_hit", true)
            .extra(Subsystem::Cache, extra)
            .decision("cache_hit", true)
            .answer(record)
            .stage(ProcessingStage::Delivery)
    }
}

/// Write-back of a fresh LLM answer under the same fingerprint.
pub struct CacheWriteStep {
    client: Arc<dyn CacheClient>,
    config: Arc<Config>,
}

impl CacheWriteStep {
    pub fn new(client: Arc<dyn CacheClient>, config: Arc<Config>) -> Self {
        Self { client, config }
    }

    fn skipped(reason: &str) -> StepPatch {
        let mut extra = Map::new();
        extra.insert("write_skipped".into(), json!(reason));
        StepPatch::new().extra(Subsystem::Cache, extra)
    }
}

#[async_trait]
impl Step for CacheWriteStep {
    fn name(&self) -> &'static str {
        "cache_write"
    }

    fn subsystem(&self) -> Subsystem {
        Subsystem::Cache
    }

    async fn run(&self, messages: &[ChatMessage], ctx: &RequestState) -> StepPatch {
        if !self.config.cache.enabled {
            return Self::skipped("disabled");
        }
        let Some(answer) = &ctx.answer else {
            return Self::skipped("no_answer");
        };
        // Only fresh LLM answers are worth caching; golden and cached
        // answers already have a faster path.
        if answer.origin != AnswerOrigin::Llm {
            return Self::skipped("origin_not_llm");
        }

        let fp = fingerprint(messages);
        let raw = match serde_json::to_string(answer) {
            Ok(raw) => raw,
            Err(e) => return Self::skipped(&format!("serialize failed: {e}")),
        };

        let budget = Duration::from_millis(self.config.cache.timeout_ms);
        let mut extra = Map::new();
        match tokio::time::timeout(budget, self.client.set(&fp, raw)).await {
            Ok(Ok(())) => {
                debug!("[C]  cached answer fingerprint={}", &fp[..12.min(fp.len())]);
                extra.insert("write_ok".into(), json!(true));
            }
            Ok(Err(e)) => {
                warn!("[C]  cache write failed: {}", e);
                extra.insert("write_ok".into(), json!(false));
                extra.insert("write_error".into(), json!(e.to_string()));
            }
            Err(_) => {
                warn!("[C]  cache write timed out");
                extra.insert("write_ok".into(), json!(false));
                extra.insert("write_error".into(), json!("timeout"));
            }
        }
        StepPatch::new().extra(Subsystem::Cache, extra)
    }
}
