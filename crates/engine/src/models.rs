//! Raw pipe definitions as they appear in a DSL document.
//!
//! These types mirror the JSON/YAML shape one-to-one and carry no
//! validation; [`crate::pipe::Pipe::build`] turns them into a checked,
//! immutable [`crate::pipe::Pipe`].

use std::fmt;

use nodes::Prompt;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::EngineError;

// ---------------------------------------------------------------------------
// PipeDefinition
// ---------------------------------------------------------------------------

/// A complete pipe definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipeDefinition {
    /// Registry key. Defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
    /// Template naming the node to jump to once this pipe completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goto: Option<String>,
    /// Mapping applied to the run input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Mapping producing the pipe's final output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Allowed process-name patterns; absent means unrestricted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<Vec<String>>,
    #[serde(default)]
    pub hooks: Hooks,
}

impl PipeDefinition {
    /// Parse a JSON document.
    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Optional per-pipe hooks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hooks {
    /// Process invoked once per streamed AI chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
}

// ---------------------------------------------------------------------------
// NodeDefinition
// ---------------------------------------------------------------------------

/// A single step. Exactly one payload group should be populated:
/// `process`, `request`, `prompts`, `ui` or `case`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prompts: Vec<Prompt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autofill: Option<String>,

    /// `expression -> child pipe`, kept in document order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case: Option<CaseList>,

    /// Node-specific input shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Mapping applied to the node's raw result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

/// Payload of a process node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

// ---------------------------------------------------------------------------
// CaseList
// ---------------------------------------------------------------------------

/// Switch cases in declaration order.
///
/// Serialized as a JSON object; decoding walks the object's entries in the
/// order they appear in the document, whatever map type backs `serde_json`.
#[derive(Debug, Clone, Default)]
pub struct CaseList(pub Vec<(String, PipeDefinition)>);

impl CaseList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for CaseList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (expr, pipe) in &self.0 {
            map.serialize_entry(expr, pipe)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CaseList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CaseVisitor;

        impl<'de> Visitor<'de> for CaseVisitor {
            type Value = CaseList;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of case expressions to pipe definitions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<CaseList, A::Error> {
                let mut cases = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((expr, pipe)) = access.next_entry::<String, PipeDefinition>()? {
                    cases.push((expr, pipe));
                }
                Ok(CaseList(cases))
            }
        }

        deserializer.deserialize_map(CaseVisitor)
    }
}
