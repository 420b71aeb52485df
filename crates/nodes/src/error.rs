//! Collaborator-level error type.

use thiserror::Error;

/// Errors returned by the engine's external collaborators (process backend,
/// chat client, request backend, interactive renderer, template evaluator).
///
/// The engine wraps every variant with pipe, node and context identifiers
/// before handing it to the caller.
#[derive(Debug, Error, Clone)]
pub enum NodeError {
    /// The collaborator ran and failed.
    #[error("fatal node error: {0}")]
    Fatal(String),

    /// A template or expression could not be compiled or evaluated.
    #[error("template error: {0}")]
    Template(String),

    /// No backend is configured for this kind of call.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Reading or writing the interactive terminal failed.
    #[error("io error: {0}")]
    Io(String),
}

impl From<minijinja::Error> for NodeError {
    fn from(e: minijinja::Error) -> Self {
        NodeError::Template(e.to_string())
    }
}

impl From<std::io::Error> for NodeError {
    fn from(e: std::io::Error) -> Self {
        NodeError::Io(e.to_string())
    }
}
