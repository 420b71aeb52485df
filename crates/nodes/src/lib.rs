//! `nodes` crate — collaborator contracts the engine dispatches through, and
//! their built-in implementations.
//!
//! The engine never talks to a process backend, model provider or terminal
//! directly; it goes through the traits in [`traits`].

pub mod chat;
pub mod error;
pub mod mock;
pub mod template;
pub mod traits;
pub mod unconfigured;

pub use chat::{ChatChunk, ChatRequest, ChatStatus, Prompt};
pub use error::NodeError;
pub use template::{resolve_mapping, JinjaEvaluator};
pub use traits::{
    CallContext, ChatClient, Evaluator, InteractiveRenderer, ProcessHandler, RenderRequest,
    RequestHandler, END_OF_INPUT,
};
pub use unconfigured::Unconfigured;
