//! Scripted provider doubles for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use iw_core::{Embedder, IwError, IwResult, KvStore};

use crate::fallback::hashed_embedding;
use crate::llm::{ChatMessage, CompletionParams, LlmError, LlmProvider, Role};

pub const SCRIPTED_SUMMARY: &str = "The note explains how Rust ownership prevents data races.";
pub const SCRIPTED_GRAPH: &str = r#"{"concepts":[{"id":"ownership","label":"Ownership","theme":"technology","importance":3},{"id":"races","label":"Data races","theme":"technology","importance":2}],"relationships":[{"source":"ownership","target":"races","label":"prevents"}]}"#;

/// What a scripted LLM call does.
#[derive(Debug, Clone)]
pub enum Script {
    Reply(String),
    Fail,
    Malformed,
    Stall(Duration),
}

/// LLM double that answers summary and concept-graph prompts from scripts
/// and counts calls.
pub struct ScriptedLlm {
    summary: Mutex<Script>,
    graph: Mutex<Script>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(summary: Script, graph: Script) -> Self {
        Self {
            summary: Mutex::new(summary),
            graph: Mutex::new(graph),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn healthy() -> Self {
        Self::new(
            Script::Reply(SCRIPTED_SUMMARY.to_string()),
            Script::Reply(SCRIPTED_GRAPH.to_string()),
        )
    }

    pub fn failing() -> Self {
        Self::new(Script::Fail, Script::Fail)
    }

    pub fn stalling(delay: Duration) -> Self {
        Self::new(Script::Stall(delay), Script::Stall(delay))
    }

    /// Total completion calls, summary and graph combined.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_summary(&self, script: Script) {
        *self.summary.lock().unwrap_or_else(|p| p.into_inner()) = script;
    }

    pub fn set_graph(&self, script: Script) {
        *self.graph.lock().unwrap_or_else(|p| p.into_inner()) = script;
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _params: &CompletionParams,
    ) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let wants_graph = messages
            .iter()
            .any(|m| m.role == Role::System && m.content.contains("JSON"));
        let script = if wants_graph {
            self.graph.lock().unwrap_or_else(|p| p.into_inner()).clone()
        } else {
            self.summary.lock().unwrap_or_else(|p| p.into_inner()).clone()
        };
        match script {
            Script::Reply(text) => Ok(text),
            Script::Fail => Err(LlmError::Unreachable("scripted failure".into())),
            Script::Malformed => Ok("Sorry, I can't produce that.".into()),
            Script::Stall(delay) => {
                tokio::time::sleep(delay).await;
                Err(LlmError::Timeout)
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Embedder double backed by the hashing embedder, with call counting and
/// switchable failure.
pub struct CountingEmbedder {
    dimensions: usize,
    output_dimensions: usize,
    failing: AtomicBool,
    stall: Option<Duration>,
    calls: AtomicUsize,
}

impl CountingEmbedder {
    pub fn healthy(dimensions: usize) -> Self {
        Self {
            dimensions,
            output_dimensions: dimensions,
            failing: AtomicBool::new(false),
            stall: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(dimensions: usize) -> Self {
        let embedder = Self::healthy(dimensions);
        embedder.set_failing(true);
        embedder
    }

    pub fn stalling(dimensions: usize, delay: Duration) -> Self {
        Self {
            stall: Some(delay),
            ..Self::healthy(dimensions)
        }
    }

    /// Declares `dimensions` but returns vectors of `output_dimensions`.
    pub fn with_output_dimensions(dimensions: usize, output_dimensions: usize) -> Self {
        Self {
            output_dimensions,
            ..Self::healthy(dimensions)
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    async fn embed(&self, text: &str) -> IwResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.stall {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(IwError::Embedding("scripted failure".into()));
        }
        Ok(hashed_embedding(text, self.output_dimensions))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "counting"
    }
}

/// Key/value store whose every call fails, as an unreachable server would.
pub struct BrokenKvStore;

#[async_trait]
impl KvStore for BrokenKvStore {
    async fn get(&self, _key: &str) -> IwResult<Option<String>> {
        Err(refused())
    }
    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> IwResult<()> {
        Err(refused())
    }
    async fn incr(&self, _key: &str) -> IwResult<i64> {
        Err(refused())
    }
    async fn expire(&self, _key: &str, _ttl: Duration) -> IwResult<bool> {
        Err(refused())
    }
    async fn ttl(&self, _key: &str) -> IwResult<Option<Duration>> {
        Err(refused())
    }
    async fn delete(&self, _key: &str) -> IwResult<bool> {
        Err(refused())
    }
}

fn refused() -> IwError {
    IwError::Cache("connection refused".into())
}
