//! Test doubles for the collaborator traits.
//!
//! Useful in unit and integration tests where a real backend is either
//! unavailable or irrelevant.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::chat::{ChatChunk, ChatRequest, ChatStatus};
use crate::traits::{CallContext, RenderRequest, END_OF_INPUT};
use crate::{ChatClient, InteractiveRenderer, NodeError, ProcessHandler, RequestHandler};

/// Behaviour injected into `MockProcess` for one process name.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Echo the call back as `{ "process": name, "args": args }`.
    Echo,
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Sleep for the given duration, then echo.
    Delay(Duration),
}

/// One recorded collaborator call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub name: String,
    pub args: Value,
    pub sid: String,
    pub global: serde_json::Map<String, Value>,
}

/// A mock process/request backend that records every call it receives and
/// answers with a programmer-specified result per process name.
#[derive(Clone, Default)]
pub struct MockProcess {
    behaviours: Arc<Mutex<HashMap<String, MockBehaviour>>>,
    /// All calls seen by this backend (in call order).
    pub calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockProcess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer calls to `name` with `value`.
    pub fn returning(self, name: impl Into<String>, value: Value) -> Self {
        self.with(name, MockBehaviour::ReturnValue(value))
    }

    /// Fail calls to `name` with a `Fatal` error.
    pub fn failing(self, name: impl Into<String>, msg: impl Into<String>) -> Self {
        self.with(name, MockBehaviour::FailFatal(msg.into()))
    }

    pub fn with(self, name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        self.behaviours.lock().unwrap().insert(name.into(), behaviour);
        self
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Calls made to `name`.
    pub fn calls_to(&self, name: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.name == name)
            .cloned()
            .collect()
    }

    async fn answer(&self, name: &str, args: Value, ctx: &CallContext) -> Result<Value, NodeError> {
        self.calls.lock().unwrap().push(RecordedCall {
            name: name.to_string(),
            args: args.clone(),
            sid: ctx.sid.clone(),
            global: ctx.global.clone(),
        });

        let behaviour = self
            .behaviours
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or(MockBehaviour::Echo);

        match behaviour {
            MockBehaviour::ReturnValue(v) => Ok(v),
            MockBehaviour::Echo => Ok(json!({ "process": name, "args": args })),
            MockBehaviour::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(json!({ "process": name, "args": args }))
            }
            MockBehaviour::FailFatal(msg) => Err(NodeError::Fatal(msg)),
        }
    }
}

#[async_trait]
impl ProcessHandler for MockProcess {
    async fn call(&self, name: &str, args: Value, ctx: &CallContext) -> Result<Value, NodeError> {
        self.answer(name, args, ctx).await
    }
}

#[async_trait]
impl RequestHandler for MockProcess {
    async fn request(&self, payload: Value, ctx: &CallContext) -> Result<Value, NodeError> {
        self.answer("request", payload, ctx).await
    }
}

/// A chat client that streams scripted replies, one reply per call.
#[derive(Clone, Default)]
pub struct MockChat {
    replies: Arc<Mutex<VecDeque<(Vec<String>, String)>>>,
    /// Every request received (in call order).
    pub requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl MockChat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply streamed as the given chunks.
    pub fn reply<I, S>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.replies
            .lock()
            .unwrap()
            .push_back((chunks.into_iter().map(Into::into).collect(), String::new()));
        self
    }

    /// Queue a reply that produces no chunks, only a raw body.
    pub fn raw_only(self, raw: impl Into<String>) -> Self {
        self.replies.lock().unwrap().push_back((Vec::new(), raw.into()));
        self
    }

    pub fn request_log(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for MockChat {
    async fn chat_stream(
        &self,
        request: ChatRequest,
        _ctx: &CallContext,
        chunk_tx: mpsc::Sender<ChatChunk>,
    ) -> Result<ChatStatus, NodeError> {
        self.requests.lock().unwrap().push(request);
        let next = self.replies.lock().unwrap().pop_front();
        let (chunks, raw) = next.ok_or_else(|| NodeError::Fatal("no scripted reply left".into()))?;

        for delta in chunks {
            chunk_tx
                .send(ChatChunk { delta })
                .await
                .map_err(|e| NodeError::Fatal(e.to_string()))?;
        }

        Ok(ChatStatus {
            raw,
            finish_reason: Some("stop".into()),
        })
    }
}

/// Renderer that answers from the node's seed, then from queued answers.
///
/// Reading stops at [`END_OF_INPUT`]; if the seed carries none, the next
/// queued answer (one entry per render call) supplies the remaining lines.
#[derive(Clone, Default)]
pub struct SeedRenderer {
    answers: Arc<Mutex<VecDeque<Vec<String>>>>,
    /// Every render request received (in call order).
    pub requests: Arc<Mutex<Vec<RenderRequest>>>,
}

impl SeedRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.answers
            .lock()
            .unwrap()
            .push_back(lines.into_iter().map(Into::into).collect());
        self
    }
}

#[async_trait]
impl InteractiveRenderer for SeedRenderer {
    async fn render(&self, request: RenderRequest) -> Result<Vec<String>, NodeError> {
        let mut lines = Vec::new();
        let mut terminated = false;
        for line in &request.seed {
            if line == END_OF_INPUT {
                terminated = true;
                break;
            }
            lines.push(line.clone());
        }
        self.requests.lock().unwrap().push(request);

        if !terminated {
            if let Some(more) = self.answers.lock().unwrap().pop_front() {
                lines.extend(more);
            }
        }
        Ok(lines)
    }
}
