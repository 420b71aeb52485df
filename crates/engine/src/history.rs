//! Per-node memory of prompts already sent to the model.
//!
//! When a jump loop re-enters an AI node, the remembered prompts go first, in
//! their original order, followed by any new prompt whose fingerprint has not
//! been seen for that node. The merged list is both the outgoing request and
//! the new memory.

use std::collections::{HashMap, HashSet};

use nodes::Prompt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable content hash over a prompt's role, name and content.
pub fn fingerprint(prompt: &Prompt) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.role.as_bytes());
    hasher.update([0u8]);
    hasher.update(prompt.name.as_deref().unwrap_or_default().as_bytes());
    hasher.update([0u8]);
    hasher.update(prompt.content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptHistory {
    nodes: HashMap<String, Vec<Prompt>>,
}

impl PromptHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key identifying a node across pipes: `<pipe id>#<node name>`.
    pub fn key(pipe_id: &str, node: &str) -> String {
        format!("{pipe_id}#{node}")
    }

    /// Merge `prompts` into the memory of `key` and return the merged list.
    pub fn merge(&mut self, key: &str, prompts: Vec<Prompt>) -> Vec<Prompt> {
        let remembered = self.nodes.entry(key.to_string()).or_default();
        let mut seen: HashSet<String> = remembered.iter().map(fingerprint).collect();

        for prompt in prompts {
            if seen.insert(fingerprint(&prompt)) {
                remembered.push(prompt);
            }
        }
        remembered.clone()
    }

    pub fn get(&self, key: &str) -> Option<&[Prompt]> {
        self.nodes.get(key).map(Vec::as_slice)
    }

    pub fn clear(&mut self, key: &str) {
        self.nodes.remove(key);
    }
}
