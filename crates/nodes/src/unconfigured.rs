//! Placeholder backend used when the host wires no implementation.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::chat::{ChatChunk, ChatRequest, ChatStatus};
use crate::traits::{CallContext, RenderRequest};
use crate::{ChatClient, InteractiveRenderer, NodeError, ProcessHandler, RequestHandler};

/// Rejects every call with [`NodeError::Unsupported`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Unconfigured;

#[async_trait]
impl ProcessHandler for Unconfigured {
    async fn call(&self, name: &str, _args: Value, _ctx: &CallContext) -> Result<Value, NodeError> {
        Err(NodeError::Unsupported(format!("no process backend for '{name}'")))
    }
}

#[async_trait]
impl RequestHandler for Unconfigured {
    async fn request(&self, _payload: Value, _ctx: &CallContext) -> Result<Value, NodeError> {
        Err(NodeError::Unsupported("no request backend".into()))
    }
}

#[async_trait]
impl ChatClient for Unconfigured {
    async fn chat_stream(
        &self,
        request: ChatRequest,
        _ctx: &CallContext,
        _chunk_tx: mpsc::Sender<ChatChunk>,
    ) -> Result<ChatStatus, NodeError> {
        Err(NodeError::Unsupported(format!("no chat backend for model '{}'", request.model)))
    }
}

#[async_trait]
impl InteractiveRenderer for Unconfigured {
    async fn render(&self, request: RenderRequest) -> Result<Vec<String>, NodeError> {
        Err(NodeError::Unsupported(format!("no renderer for node '{}'", request.node)))
    }
}
