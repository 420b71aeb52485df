//! Engine-level error types.

use nodes::NodeError;
use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the pipe engine (build + execution + resume store).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Build errors ------

    /// A pipe declares no nodes.
    #[error("pipe '{0}' has no nodes")]
    EmptyPipe(String),

    /// A node has no name.
    #[error("pipe '{pipe_id}': node #{index} has no name")]
    MissingNodeName { pipe_id: String, index: usize },

    /// Two nodes in the same pipe share a name.
    #[error("pipe '{pipe_id}': duplicate node name '{node}'")]
    DuplicateNodeName { pipe_id: String, node: String },

    /// None of the node payload fields is populated.
    #[error("pipe '{pipe_id}': node '{node}' has no recognized type")]
    UnknownNodeType { pipe_id: String, node: String },

    /// A user-input node names a UI kind outside the supported set.
    #[error("pipe '{pipe_id}': node '{node}' has invalid ui kind '{ui}'")]
    InvalidUiKind {
        pipe_id: String,
        node: String,
        ui: String,
    },

    /// A process node names no process.
    #[error("pipe '{pipe_id}': process node '{node}' has no process name")]
    MissingProcessName { pipe_id: String, node: String },

    /// A process node calls a process outside the pipe's whitelist.
    #[error("pipe '{pipe_id}': process '{process}' in node '{node}' is not in whitelist")]
    ProcessNotAllowed {
        pipe_id: String,
        node: String,
        process: String,
    },

    /// The raw definition could not be decoded.
    #[error("invalid pipe definition: {0}")]
    Definition(String),

    // ------ Run errors ------

    /// No pipe with this id is registered.
    #[error("unknown pipe '{0}'")]
    UnknownPipe(String),

    /// A node failed; the run is aborted.
    #[error("pipe '{pipe_id}' node #{index} '{node}' (context {context_id}): {source}")]
    Node {
        pipe_id: String,
        index: usize,
        node: String,
        context_id: Uuid,
        #[source]
        source: NodeError,
    },

    /// A pipe-level input, output or goto template failed.
    #[error("pipe '{pipe_id}' (context {context_id}): {source}")]
    Mapping {
        pipe_id: String,
        context_id: Uuid,
        #[source]
        source: NodeError,
    },

    /// No case expression matched and no `default` case exists.
    #[error("pipe '{pipe_id}' node '{node}' (context {context_id}): switch case not found")]
    SwitchCaseNotFound {
        pipe_id: String,
        node: String,
        context_id: Uuid,
    },

    /// A goto names a node the pipe does not have.
    #[error("pipe '{pipe_id}' (context {context_id}): goto target '{target}' not found")]
    GotoTargetNotFound {
        pipe_id: String,
        target: String,
        context_id: Uuid,
    },

    /// The chat stream delivered no chunks.
    #[error("pipe '{pipe_id}' node #{index} '{node}' (context {context_id}): empty stream: {raw}")]
    EmptyStream {
        pipe_id: String,
        index: usize,
        node: String,
        context_id: Uuid,
        raw: String,
    },

    /// The run dispatched more nodes than the configured limit.
    #[error("context {context_id} exceeded {limit} node dispatches")]
    StepLimitExceeded { context_id: Uuid, limit: usize },

    /// The caller's cancellation signal fired between dispatches.
    #[error("context {0} cancelled")]
    Cancelled(Uuid),

    // ------ Resume store errors ------

    /// No suspended context is stored under this id.
    #[error("resume context '{0}' not found")]
    ResumeNotFound(String),

    /// Another caller is already resuming this context.
    #[error("resume context '{0}' is already being resumed")]
    ResumeInUse(String),

    /// `resume` was called on a context that is not paused.
    #[error("context {0} is not suspended")]
    NotSuspended(Uuid),
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Definition(e.to_string())
    }
}
