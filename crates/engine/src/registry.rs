//! Registry of built pipes, keyed by pipe id.
//!
//! Constructed once by the host and shared by reference with everything that
//! loads or runs pipes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::models::PipeDefinition;
use crate::pipe::Pipe;
use crate::EngineError;

#[derive(Debug, Default)]
pub struct PipeRegistry {
    pipes: RwLock<HashMap<String, Arc<Pipe>>>,
}

impl PipeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build `def` and register the result, replacing any pipe with the same id.
    pub fn register(&self, def: PipeDefinition) -> Result<Arc<Pipe>, EngineError> {
        let pipe = Arc::new(Pipe::build(def)?);
        self.insert(Arc::clone(&pipe));
        Ok(pipe)
    }

    /// Decode a JSON definition, build it and register the result.
    pub fn register_json(&self, text: &str) -> Result<Arc<Pipe>, EngineError> {
        self.register(PipeDefinition::from_json(text)?)
    }

    /// Register an already-built pipe.
    pub fn insert(&self, pipe: Arc<Pipe>) {
        info!(pipe = %pipe.id, nodes = pipe.nodes.len(), "pipe registered");
        self.pipes.write().insert(pipe.id.clone(), pipe);
    }

    pub fn get(&self, id: &str) -> Option<Arc<Pipe>> {
        self.pipes.read().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Pipe>> {
        self.pipes.write().remove(id)
    }

    /// Registered pipe ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pipes.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}
