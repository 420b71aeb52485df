//! Tuning knobs for the executor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum node dispatches per `exec`/`resume` call; guards goto loops.
    pub max_steps: usize,
    /// Upper bound for a single progress-hook call.
    #[serde(with = "millis")]
    pub hook_timeout: Duration,
    /// Capacity of the channel between the chat client and the engine.
    pub chunk_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: 1_000,
            hook_timeout: Duration::from_secs(5),
            chunk_buffer: 64,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
