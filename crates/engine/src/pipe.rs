//! Validated pipe model and the build pass that produces it.
//!
//! Build rules enforced:
//! 1. A top-level pipe must declare at least one node.
//! 2. Every node needs a unique name; the label defaults to the upper-cased name.
//! 3. Exactly one payload decides the node type, checked in the order
//!    process, request, ai, user-input, switch.
//! 4. User-input nodes name one of the supported UI kinds.
//! 5. Process nodes name a process allowed by the pipe whitelist.
//! 6. Switch cases are built recursively as child pipes sharing the parent
//!    whitelist.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use nodes::Prompt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::models::{Hooks, NodeDefinition, PipeDefinition};
use crate::whitelist::{self, Whitelist};
use crate::EngineError;

/// Case key used when no other case expression matches.
pub const DEFAULT_CASE: &str = "default";

// ---------------------------------------------------------------------------
// UiKind / NodeType
// ---------------------------------------------------------------------------

/// How a user-input node is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiKind {
    /// Rendered synchronously on the terminal; never suspends.
    Cli,
    /// Rendered by an external web front end.
    Web,
    /// Rendered as an external form.
    Form,
    /// Rendered by an external chat surface.
    Chat,
}

impl UiKind {
    /// Whether the node is answered inside the running call.
    pub fn is_interactive(self) -> bool {
        matches!(self, UiKind::Cli)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UiKind::Cli => "cli",
            UiKind::Web => "web",
            UiKind::Form => "form",
            UiKind::Chat => "chat",
        }
    }
}

impl FromStr for UiKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cli" => Ok(Self::Cli),
            "web" => Ok(Self::Web),
            "form" => Ok(Self::Form),
            "chat" => Ok(Self::Chat),
            other => Err(format!("unknown ui kind: {other}")),
        }
    }
}

impl fmt::Display for UiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node variant tag, as exposed in resume snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    Process,
    Switch,
    Ai,
    Request,
    UserInput,
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// One switch branch.
#[derive(Debug, Clone)]
pub struct Case {
    pub expression: String,
    pub pipe: Arc<Pipe>,
}

/// Type-specific node payload.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Process { name: String, args: Value },
    Switch { cases: Vec<Case> },
    Ai { prompts: Vec<Prompt>, model: String, options: Value },
    Request { payload: Value },
    UserInput { ui: UiKind, autofill: Option<String> },
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Process { .. } => NodeType::Process,
            NodeKind::Switch { .. } => NodeType::Switch,
            NodeKind::Ai { .. } => NodeType::Ai,
            NodeKind::Request { .. } => NodeType::Request,
            NodeKind::UserInput { .. } => NodeType::UserInput,
        }
    }
}

/// A validated step.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub label: String,
    /// Position within the owning pipe.
    pub index: usize,
    pub kind: NodeKind,
    pub input: Option<Value>,
    pub output: Option<Value>,
}

// ---------------------------------------------------------------------------
// Pipe
// ---------------------------------------------------------------------------

/// A validated, immutable pipe.
#[derive(Debug, Clone)]
pub struct Pipe {
    pub id: String,
    pub name: String,
    pub nodes: Vec<Node>,
    pub whitelist: Option<Arc<Whitelist>>,
    pub goto: Option<String>,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub hooks: Hooks,
    mapping: HashMap<String, usize>,
    namespace: Option<String>,
    parent: Option<String>,
}

/// Inherited settings for a switch-case child.
struct ChildOf<'a> {
    id: String,
    namespace: String,
    parent: &'a str,
    whitelist: Option<Arc<Whitelist>>,
    hooks: &'a Hooks,
}

impl Pipe {
    /// Validate a raw definition into a top-level pipe.
    ///
    /// # Errors
    /// Any of the build variants of [`EngineError`].
    pub fn build(def: PipeDefinition) -> Result<Pipe, EngineError> {
        Self::build_inner(def, None)
    }

    fn build_inner(def: PipeDefinition, child: Option<ChildOf<'_>>) -> Result<Pipe, EngineError> {
        let PipeDefinition {
            id,
            name,
            nodes: raw_nodes,
            goto,
            input,
            output,
            whitelist,
            hooks,
        } = def;

        let (id, name, namespace, parent, whitelist, hooks) = match child {
            Some(child) => {
                let whitelist = child
                    .whitelist
                    .or_else(|| whitelist.map(|w| Arc::new(Whitelist::new(w))));
                let hooks = Hooks {
                    progress: hooks.progress.or_else(|| child.hooks.progress.clone()),
                };
                (
                    child.id.clone(),
                    child.id,
                    Some(child.namespace),
                    Some(child.parent.to_string()),
                    whitelist,
                    hooks,
                )
            }
            None => {
                let id = id
                    .or_else(|| name.clone())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                if raw_nodes.is_empty() {
                    return Err(EngineError::EmptyPipe(id));
                }
                let name = name.unwrap_or_else(|| id.clone());
                let whitelist = whitelist.map(|w| Arc::new(Whitelist::new(w)));
                (id, name, None, None, whitelist, hooks)
            }
        };

        let mut nodes = Vec::with_capacity(raw_nodes.len());
        let mut mapping = HashMap::with_capacity(raw_nodes.len());

        for (index, raw) in raw_nodes.into_iter().enumerate() {
            let node_name = match raw.name.as_deref() {
                Some(n) if !n.is_empty() => n.to_string(),
                _ => {
                    return Err(EngineError::MissingNodeName {
                        pipe_id: id.clone(),
                        index,
                    })
                }
            };
            if mapping.insert(node_name.clone(), index).is_some() {
                return Err(EngineError::DuplicateNodeName {
                    pipe_id: id.clone(),
                    node: node_name,
                });
            }

            let label = raw
                .label
                .clone()
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| node_name.to_uppercase());
            let node_input = raw.input.clone();
            let node_output = raw.output.clone();
            let kind = build_kind(raw, &id, &node_name, whitelist.as_ref(), &hooks)?;

            nodes.push(Node {
                name: node_name,
                label,
                index,
                kind,
                input: node_input,
                output: node_output,
            });
        }

        debug!(pipe = %id, nodes = nodes.len(), "pipe built");

        Ok(Pipe {
            id,
            name,
            nodes,
            whitelist,
            goto,
            input,
            output,
            hooks,
            mapping,
            namespace,
            parent,
        })
    }

    /// A pipe with no nodes, used only for input/output/goto routing.
    pub fn is_control(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn index_of(&self, node: &str) -> Option<usize> {
        self.mapping.get(node).copied()
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.index_of(name).map(|i| &self.nodes[i])
    }

    /// Scope prefix (`<parentID>.<nodeName>`) for switch-case children.
    ///
    /// Informational only: node names resolve within the child itself, and
    /// the prefix is carried for logging and introspection.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// ID of the pipe owning the switch node, for switch-case children.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }
}

/// Decide the node type from the populated payload, in priority order.
fn build_kind(
    raw: NodeDefinition,
    pipe_id: &str,
    node: &str,
    whitelist: Option<&Arc<Whitelist>>,
    hooks: &Hooks,
) -> Result<NodeKind, EngineError> {
    if let Some(process) = raw.process {
        if process.name.is_empty() {
            return Err(EngineError::MissingProcessName {
                pipe_id: pipe_id.to_string(),
                node: node.to_string(),
            });
        }
        if !whitelist::allows(whitelist.map(|w| w.as_ref()), &process.name) {
            return Err(EngineError::ProcessNotAllowed {
                pipe_id: pipe_id.to_string(),
                node: node.to_string(),
                process: process.name,
            });
        }
        return Ok(NodeKind::Process {
            name: process.name,
            args: process.args,
        });
    }

    if let Some(payload) = raw.request {
        return Ok(NodeKind::Request { payload });
    }

    if !raw.prompts.is_empty() {
        return Ok(NodeKind::Ai {
            prompts: raw.prompts,
            model: raw.model.unwrap_or_default(),
            options: raw.options.unwrap_or(Value::Null),
        });
    }

    if let Some(ui) = raw.ui {
        let ui = ui.parse::<UiKind>().map_err(|_| EngineError::InvalidUiKind {
            pipe_id: pipe_id.to_string(),
            node: node.to_string(),
            ui,
        })?;
        return Ok(NodeKind::UserInput {
            ui,
            autofill: raw.autofill,
        });
    }

    if let Some(case) = raw.case.filter(|c| !c.is_empty()) {
        let namespace = format!("{pipe_id}.{node}");
        let mut cases = Vec::with_capacity(case.0.len());
        for (expression, def) in case.0 {
            let child = ChildOf {
                id: format!("{namespace}#{expression}"),
                namespace: namespace.clone(),
                parent: pipe_id,
                whitelist: whitelist.cloned(),
                hooks,
            };
            let pipe = Pipe::build_inner(def, Some(child))?;
            cases.push(Case {
                expression,
                pipe: Arc::new(pipe),
            });
        }
        return Ok(NodeKind::Switch { cases });
    }

    Err(EngineError::UnknownNodeType {
        pipe_id: pipe_id.to_string(),
        node: node.to_string(),
    })
}
