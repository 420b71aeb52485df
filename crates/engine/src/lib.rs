//! `engine` crate — pipe models, build validation, the execution loop and the
//! resume store.

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod history;
pub mod models;
pub mod pipe;
pub mod registry;
pub mod store;
pub mod whitelist;

pub use config::EngineConfig;
pub use context::{Context, Outcome, ResumeContext, ResumeNode};
pub use error::EngineError;
pub use executor::{Handlers, PipeExecutor};
pub use history::PromptHistory;
pub use models::{NodeDefinition, PipeDefinition};
pub use pipe::{Node, NodeKind, NodeType, Pipe, UiKind};
pub use registry::PipeRegistry;
pub use store::ResumeStore;
pub use whitelist::Whitelist;

#[cfg(test)]
mod executor_tests;
