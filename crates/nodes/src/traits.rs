//! Collaborator contracts the engine dispatches through.
//!
//! Every external concern a pipe touches (process calls, language models,
//! requests, terminal input, template evaluation) sits behind one of these
//! traits so the engine itself never depends on a concrete backend.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::chat::{ChatChunk, ChatRequest, ChatStatus};
use crate::NodeError;

/// Terminates interactive input once the autofill seed has been consumed.
pub const END_OF_INPUT: &str = "\u{4}";

/// Caller identity attached to every collaborator call.
///
/// Defined here (in the nodes crate) so both the engine and individual
/// backends can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// ID of the pipe that owns the calling node.
    pub pipe_id: String,
    /// ID of the execution context.
    pub context_id: uuid::Uuid,
    /// Name of the calling node.
    pub node: String,
    /// Caller/session identifier.
    pub sid: String,
    /// External key-value data supplied by the caller.
    pub global: Map<String, Value>,
}

/// Backend that executes named processes.
#[async_trait]
pub trait ProcessHandler: Send + Sync {
    /// Invoke `name` with already-resolved `args` and return its raw result.
    async fn call(&self, name: &str, args: Value, ctx: &CallContext) -> Result<Value, NodeError>;
}

/// Backend for `request` nodes.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn request(&self, payload: Value, ctx: &CallContext) -> Result<Value, NodeError>;
}

/// Streaming chat client.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Stream the completion for `request`, sending text increments on
    /// `chunk_tx`. The sender is dropped when the call returns.
    async fn chat_stream(
        &self,
        request: ChatRequest,
        ctx: &CallContext,
        chunk_tx: mpsc::Sender<ChatChunk>,
    ) -> Result<ChatStatus, NodeError>;
}

/// What a synchronous interactive node asks the renderer for.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub node: String,
    pub label: String,
    /// Bound input shape of the node.
    pub input: Value,
    /// Lines to consume before reading from the user; a trailing
    /// [`END_OF_INPUT`] stops reading once the seed is exhausted.
    pub seed: Vec<String>,
}

/// Renders a synchronous (`cli`) input node and collects the answer lines.
#[async_trait]
pub trait InteractiveRenderer: Send + Sync {
    async fn render(&self, request: RenderRequest) -> Result<Vec<String>, NodeError>;
}

/// Expression/template evaluator.
///
/// `render` resolves a template against `data`; a template consisting of a
/// single `{{ expr }}` yields the expression's native value. `test` evaluates
/// a boolean expression.
pub trait Evaluator: Send + Sync {
    fn render(&self, template: &str, data: &Value) -> Result<Value, NodeError>;

    fn test(&self, expression: &str, data: &Value) -> Result<bool, NodeError>;
}
