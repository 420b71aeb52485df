//! Per-run execution state.
//!
//! A [`Context`] owns one root [`Frame`] plus a stack of child frames, one
//! per switch case currently being executed. A child frame starts with a copy
//! of its parent's data, so templates inside a case see everything the parent
//! saw; its pending goto and final output flow back into the parent when it
//! completes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use nodes::{resolve_mapping, Evaluator, NodeError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::executor::{next_cursor, Instruction, PipeExecutor};
use crate::history::PromptHistory;
use crate::pipe::{Node, NodeType, Pipe, UiKind};
use crate::store::Lease;
use crate::EngineError;

// ---------------------------------------------------------------------------
// ResumeContext / Outcome
// ---------------------------------------------------------------------------

/// Node description carried by a [`ResumeContext`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeNode {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub ui: UiKind,
}

/// Snapshot of a paused run. Keep `id` to resume later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeContext {
    pub id: Uuid,
    /// Input collected so far for the paused node.
    pub input: Vec<Value>,
    pub node: ResumeNode,
    /// Bound input shape the external renderer should display.
    pub data: Value,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub ui: UiKind,
    pub suspended_at: DateTime<Utc>,
}

/// Result of `exec`/`resume`: a final value or a pause. Neither is an error.
#[derive(Debug, Clone)]
pub enum Outcome {
    Completed(Value),
    Suspended(ResumeContext),
}

impl Outcome {
    pub fn is_suspended(&self) -> bool {
        matches!(self, Outcome::Suspended(_))
    }

    pub fn completed(self) -> Option<Value> {
        match self {
            Outcome::Completed(v) => Some(v),
            Outcome::Suspended(_) => None,
        }
    }

    pub fn suspended(self) -> Option<ResumeContext> {
        match self {
            Outcome::Suspended(rc) => Some(rc),
            Outcome::Completed(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One pipe being executed.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub pipe: Arc<Pipe>,
    pub cursor: usize,
    /// Template-visible data: `global`, `sid`, `input`, `output` and one
    /// entry per executed node.
    pub data: Map<String, Value>,
    /// Raw input stack.
    pub input: Vec<Value>,
    pub goto_next: Option<String>,
    /// The parent's visible `input`, for switch-case children.
    inherited_input: Option<Value>,
}

impl Frame {
    fn root(pipe: Arc<Pipe>, global: &Map<String, Value>, sid: &str) -> Self {
        let mut data = Map::new();
        data.insert("global".into(), Value::Object(global.clone()));
        data.insert("sid".into(), Value::String(sid.to_string()));
        data.insert("input".into(), Value::Array(Vec::new()));
        data.insert("output".into(), Value::Null);
        Self {
            pipe,
            cursor: 0,
            data,
            input: Vec::new(),
            goto_next: None,
            inherited_input: None,
        }
    }

    /// Child frame for a switch case, inheriting the parent's data and input.
    pub(crate) fn child(pipe: Arc<Pipe>, parent: &Frame, evaluator: &dyn Evaluator) -> Result<Self, NodeError> {
        let mut frame = Self {
            pipe,
            cursor: 0,
            data: parent.data.clone(),
            input: Vec::new(),
            goto_next: None,
            inherited_input: Some(parent.data.get("input").cloned().unwrap_or(Value::Null)),
        };
        frame.bind_input(parent.input.clone(), evaluator)?;
        Ok(frame)
    }

    pub(crate) fn data_value(&self) -> Value {
        Value::Object(self.data.clone())
    }

    /// Replace the input stack and recompute `data.input` through the pipe's
    /// input mapping. A child frame maps from the parent's visible input
    /// instead of its raw stack.
    pub(crate) fn bind_input(&mut self, input: Vec<Value>, evaluator: &dyn Evaluator) -> Result<(), NodeError> {
        self.input = input;
        let visible = match &self.inherited_input {
            Some(inherited) => inherited.clone(),
            None => Value::Array(self.input.clone()),
        };
        self.data.insert("input".into(), visible);
        if let Some(spec) = &self.pipe.input {
            let mapped = resolve_mapping(evaluator, spec, &self.data_value())?;
            self.data.insert("input".into(), mapped);
        }
        Ok(())
    }

    /// Store a node's output under its name and as the latest `output`.
    pub(crate) fn record(&mut self, node: &str, output: Value) {
        self.data.insert(node.to_string(), output.clone());
        self.data.insert("output".into(), output);
    }

    pub(crate) fn current(&self) -> Option<&Node> {
        self.pipe.nodes.get(self.cursor)
    }

    fn is_finished(&self) -> bool {
        self.cursor >= self.pipe.nodes.len()
    }

    fn set_global(&mut self, global: &Map<String, Value>) {
        self.data.insert("global".into(), Value::Object(global.clone()));
    }

    fn set_sid(&mut self, sid: &str) {
        self.data.insert("sid".into(), Value::String(sid.to_string()));
    }
}

/// Render an optional goto template to a target name; blank means no jump.
pub(crate) fn resolve_goto(
    template: Option<&str>,
    data: &Value,
    evaluator: &dyn Evaluator,
) -> Result<Option<String>, NodeError> {
    let Some(template) = template else {
        return Ok(None);
    };
    let target = match evaluator.render(template, data)? {
        Value::Null => return Ok(None),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    Ok((!target.is_empty()).then_some(target))
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Everything that survives a suspension.
#[derive(Debug, Clone)]
pub(crate) struct RunState {
    pub id: Uuid,
    pub sid: String,
    pub global: Map<String, Value>,
    pub history: PromptHistory,
    pub root: Frame,
    pub children: Vec<Frame>,
    pub paused: Option<ResumeContext>,
}

impl RunState {
    pub(crate) fn new(pipe: Arc<Pipe>) -> Self {
        let global = Map::new();
        let sid = String::new();
        Self {
            id: Uuid::new_v4(),
            root: Frame::root(pipe, &global, &sid),
            sid,
            global,
            history: PromptHistory::new(),
            children: Vec::new(),
            paused: None,
        }
    }

    pub(crate) fn top(&self) -> &Frame {
        self.children.last().unwrap_or(&self.root)
    }

    pub(crate) fn top_mut(&mut self) -> &mut Frame {
        match self.children.last_mut() {
            Some(frame) => frame,
            None => &mut self.root,
        }
    }

    fn frames_mut(&mut self) -> impl Iterator<Item = &mut Frame> + '_ {
        std::iter::once(&mut self.root).chain(self.children.iter_mut())
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// A single run of a pipe.
///
/// `exec` and `resume` take the context by value: a paused run is handed to
/// the executor's resume store, and a finished one is gone.
pub struct Context {
    executor: Arc<PipeExecutor>,
    state: RunState,
    cancel: Option<CancellationToken>,
    _lease: Option<Lease>,
}

impl Context {
    pub(crate) fn new(executor: Arc<PipeExecutor>, pipe: Arc<Pipe>) -> Self {
        Self {
            executor,
            state: RunState::new(pipe),
            cancel: None,
            _lease: None,
        }
    }

    pub(crate) fn from_store(executor: Arc<PipeExecutor>, state: RunState, lease: Lease) -> Self {
        Self {
            executor,
            state,
            cancel: None,
            _lease: Some(lease),
        }
    }

    /// Attach external key-value data, visible to templates as `global` and
    /// passed to every collaborator call.
    pub fn with_global(mut self, global: Map<String, Value>) -> Self {
        self.state.global = global;
        let global = self.state.global.clone();
        self.state.frames_mut().for_each(|f| f.set_global(&global));
        self
    }

    /// Attach the caller/session identifier.
    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.state.sid = sid.into();
        let sid = self.state.sid.clone();
        self.state.frames_mut().for_each(|f| f.set_sid(&sid));
        self
    }

    /// Abort between node dispatches once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn id(&self) -> Uuid {
        self.state.id
    }

    pub fn sid(&self) -> &str {
        &self.state.sid
    }

    pub fn global(&self) -> &Map<String, Value> {
        &self.state.global
    }

    /// The top-level pipe of this run.
    pub fn pipe(&self) -> &Arc<Pipe> {
        &self.state.root.pipe
    }

    /// Node the run is positioned on; `None` once the pipe is exhausted.
    pub fn current(&self) -> Option<&Node> {
        self.state.top().current()
    }

    /// Pause snapshot, for a context opened from the resume store.
    pub fn paused(&self) -> Option<&ResumeContext> {
        self.state.paused.as_ref()
    }

    pub fn history(&self) -> &PromptHistory {
        &self.state.history
    }

    /// Run the pipe from its first node with `input` as the input stack.
    #[instrument(skip(self, input), fields(context_id = %self.state.id, pipe = %self.state.root.pipe.id))]
    pub async fn exec(mut self, input: Vec<Value>) -> Result<Outcome, EngineError> {
        info!("executing pipe with {} input value(s)", input.len());

        let pipe = Arc::clone(&self.state.root.pipe);
        self.state.root = Frame::root(pipe, &self.state.global, &self.state.sid);
        self.state.children.clear();
        self.state.paused = None;

        let bound = self
            .state
            .root
            .bind_input(input, self.executor.evaluator())
            .map_err(|source| self.mapping_error(source));

        let result = match bound {
            Ok(()) => self.drive().await,
            Err(e) => Err(e),
        };
        self.settle(result)
    }

    /// Answer the paused node with `input` and continue from the next node.
    #[instrument(skip(self, input), fields(context_id = %self.state.id, pipe = %self.state.root.pipe.id))]
    pub async fn resume(mut self, input: Vec<Value>) -> Result<Outcome, EngineError> {
        let Some(paused) = self.state.paused.take() else {
            return Err(EngineError::NotSuspended(self.state.id));
        };
        info!(node = %paused.node.name, "resuming with {} input value(s)", input.len());

        let result = match self.finalize_paused(input) {
            Ok(()) => self.drive().await,
            Err(e) => Err(e),
        };
        self.settle(result)
    }

    /// Fold the caller's answer into the paused node and step past it.
    fn finalize_paused(&mut self, answer: Vec<Value>) -> Result<(), EngineError> {
        let id = self.state.id;
        let executor = Arc::clone(&self.executor);
        let evaluator = executor.evaluator();
        let frame = self.state.top_mut();
        let pipe = Arc::clone(&frame.pipe);
        let node = pipe
            .nodes
            .get(frame.cursor)
            .ok_or(EngineError::NotSuspended(id))?;

        let mut stack = frame.input.clone();
        stack.extend(answer.iter().cloned());
        frame
            .bind_input(stack, evaluator)
            .map_err(|source| EngineError::Mapping {
                pipe_id: pipe.id.clone(),
                context_id: id,
                source,
            })?;

        let raw = match answer.len() {
            1 => answer.into_iter().next().unwrap_or(Value::Null),
            _ => Value::Array(answer),
        };
        let output = executor.map_output(node, raw, &frame.data_value(), &pipe, id)?;
        frame.record(&node.name, output);
        self.advance()
    }

    /// The dispatch loop: run nodes until the root pipe completes, a node
    /// suspends, or an error occurs.
    async fn drive(&mut self) -> Result<Outcome, EngineError> {
        let executor = Arc::clone(&self.executor);
        let limit = executor.config().max_steps;
        let mut steps = 0usize;

        loop {
            if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                warn!("run cancelled between dispatches");
                return Err(EngineError::Cancelled(self.state.id));
            }

            if self.state.top().is_finished() {
                if let Some(output) = self.complete_frame()? {
                    return Ok(Outcome::Completed(output));
                }
                continue;
            }

            steps += 1;
            if steps > limit {
                return Err(EngineError::StepLimitExceeded {
                    context_id: self.state.id,
                    limit,
                });
            }

            let frame = self.state.top();
            let pipe = Arc::clone(&frame.pipe);
            let node = &pipe.nodes[frame.cursor];

            match executor.dispatch(&mut self.state, &pipe, node).await? {
                Instruction::Advance(output) => {
                    self.state.top_mut().record(&node.name, output);
                    self.advance()?;
                }
                Instruction::Enter(child) => {
                    self.state.children.push(child);
                }
                Instruction::Suspend(rc) => {
                    info!(node = %node.name, ui = %rc.ui, "run suspended");
                    self.state.paused = Some(rc.clone());
                    return Ok(Outcome::Suspended(rc));
                }
            }
        }
    }

    /// Handle a frame whose node list is exhausted. Returns the final output
    /// when the root frame is done.
    fn complete_frame(&mut self) -> Result<Option<Value>, EngineError> {
        let evaluator = self.executor.evaluator();
        let id = self.state.id;
        let frame = self.state.top();
        let pipe = Arc::clone(&frame.pipe);
        let data = frame.data_value();
        let mapping_err = |source| EngineError::Mapping {
            pipe_id: pipe.id.clone(),
            context_id: id,
            source,
        };

        let goto = resolve_goto(pipe.goto.as_deref(), &data, evaluator).map_err(mapping_err)?;
        let output = match &pipe.output {
            Some(spec) => Some(resolve_mapping(evaluator, spec, &data).map_err(mapping_err)?),
            None => None,
        };

        match self.state.children.pop() {
            // Switch case finished: report to the switch node in the parent.
            Some(child) => {
                let output = output.unwrap_or_else(|| {
                    let key = if child.pipe.is_control() { "input" } else { "output" };
                    child.data.get(key).cloned().unwrap_or(Value::Null)
                });
                let parent = self.state.top_mut();
                if goto.is_some() {
                    parent.goto_next = goto;
                }
                if let Some(node) = parent.current() {
                    let name = node.name.clone();
                    parent.record(&name, output);
                }
                self.advance()?;
                Ok(None)
            }
            // Root pipe: a goto loops back into it, otherwise the run is done.
            None => match goto {
                Some(target) => {
                    let root = &mut self.state.root;
                    root.cursor = pipe.index_of(&target).ok_or(EngineError::GotoTargetNotFound {
                        pipe_id: pipe.id.clone(),
                        target,
                        context_id: id,
                    })?;
                    Ok(None)
                }
                None => Ok(Some(output.unwrap_or(data))),
            },
        }
    }

    /// Move the top frame past its current node, honouring a pending goto.
    fn advance(&mut self) -> Result<(), EngineError> {
        let id = self.state.id;
        let frame = self.state.top_mut();
        let goto = frame.goto_next.take();
        let next = next_cursor(&frame.pipe, frame.cursor, goto).map_err(|target| {
            EngineError::GotoTargetNotFound {
                pipe_id: frame.pipe.id.clone(),
                target,
                context_id: id,
            }
        })?;
        frame.cursor = next;
        Ok(())
    }

    /// Route the outcome: park a pause, drop a finished or failed run.
    fn settle(self, result: Result<Outcome, EngineError>) -> Result<Outcome, EngineError> {
        let id = self.state.id.to_string();
        let store = self.executor.store().clone();
        match &result {
            Ok(Outcome::Suspended(_)) => {
                store.park(self.state, self._lease.as_ref());
            }
            Ok(Outcome::Completed(_)) => {
                info!(context_id = %id, "run completed");
                store.close(&id);
            }
            // Leave any stored entry untouched: the run was not resumed.
            Err(EngineError::Cancelled(_)) => {}
            Err(e) => {
                warn!(context_id = %id, error = %e, "run failed");
                store.close(&id);
            }
        }
        result
    }

    fn mapping_error(&self, source: NodeError) -> EngineError {
        EngineError::Mapping {
            pipe_id: self.state.root.pipe.id.clone(),
            context_id: self.state.id,
            source,
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.state.id)
            .field("pipe", &self.state.root.pipe.id)
            .field("sid", &self.state.sid)
            .field("paused", &self.state.paused.is_some())
            .finish()
    }
}
