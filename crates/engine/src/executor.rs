//! Pipe execution engine.
//!
//! `PipeExecutor` is the central orchestrator:
//! 1. Creates contexts for registered pipes and reopens suspended ones.
//! 2. Dispatches each node to the matching collaborator through [`Handlers`].
//! 3. Turns every dispatch into an [`Instruction`] the context's loop applies:
//!    advance with an output, enter a switch case, or suspend.
//! 4. Wraps collaborator failures with pipe, node and context identifiers.

use std::sync::Arc;

use chrono::Utc;
use nodes::{
    resolve_mapping, CallContext, ChatClient, ChatRequest, Evaluator, InteractiveRenderer, JinjaEvaluator,
    NodeError, ProcessHandler, Prompt, RenderRequest, RequestHandler, Unconfigured, END_OF_INPUT,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::context::{Context, Frame, Outcome, ResumeContext, ResumeNode, RunState};
use crate::history::PromptHistory;
use crate::pipe::{Case, Node, NodeKind, Pipe, DEFAULT_CASE};
use crate::registry::PipeRegistry;
use crate::store::ResumeStore;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// The collaborators a run dispatches to. Unset backends reject calls.
#[derive(Clone)]
pub struct Handlers {
    pub process: Arc<dyn ProcessHandler>,
    pub request: Arc<dyn RequestHandler>,
    pub chat: Arc<dyn ChatClient>,
    pub renderer: Arc<dyn InteractiveRenderer>,
    pub evaluator: Arc<dyn Evaluator>,
}

impl Default for Handlers {
    fn default() -> Self {
        Self {
            process: Arc::new(Unconfigured),
            request: Arc::new(Unconfigured),
            chat: Arc::new(Unconfigured),
            renderer: Arc::new(Unconfigured),
            evaluator: Arc::new(JinjaEvaluator::new()),
        }
    }
}

impl Handlers {
    pub fn with_process(mut self, handler: impl ProcessHandler + 'static) -> Self {
        self.process = Arc::new(handler);
        self
    }

    pub fn with_request(mut self, handler: impl RequestHandler + 'static) -> Self {
        self.request = Arc::new(handler);
        self
    }

    pub fn with_chat(mut self, client: impl ChatClient + 'static) -> Self {
        self.chat = Arc::new(client);
        self
    }

    pub fn with_renderer(mut self, renderer: impl InteractiveRenderer + 'static) -> Self {
        self.renderer = Arc::new(renderer);
        self
    }

    pub fn with_evaluator(mut self, evaluator: impl Evaluator + 'static) -> Self {
        self.evaluator = Arc::new(evaluator);
        self
    }
}

// ---------------------------------------------------------------------------
// Instruction
// ---------------------------------------------------------------------------

/// What the loop should do after dispatching one node.
#[derive(Debug)]
pub(crate) enum Instruction {
    /// Record the node's output and move on (sequentially or to a pending goto).
    Advance(Value),
    /// Run a switch case as a child frame.
    Enter(Frame),
    /// Halt without error, waiting for external input.
    Suspend(ResumeContext),
}

/// Next cursor after `cursor`: the pending goto target if any, otherwise the
/// following node. An unknown target is returned as the error.
pub(crate) fn next_cursor(pipe: &Pipe, cursor: usize, goto: Option<String>) -> Result<usize, String> {
    match goto {
        Some(target) => pipe.index_of(&target).ok_or(target),
        None => Ok(cursor + 1),
    }
}

// ---------------------------------------------------------------------------
// PipeExecutor
// ---------------------------------------------------------------------------

/// Shared engine: pipe registry, collaborators, resume store and config.
///
/// Construct one per process and hand out `Arc` clones.
pub struct PipeExecutor {
    registry: Arc<PipeRegistry>,
    handlers: Handlers,
    store: ResumeStore,
    config: EngineConfig,
}

impl PipeExecutor {
    pub fn new(registry: Arc<PipeRegistry>, handlers: Handlers, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            registry,
            handlers,
            store: ResumeStore::new(),
            config,
        })
    }

    pub fn registry(&self) -> &Arc<PipeRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &ResumeStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn evaluator(&self) -> &dyn Evaluator {
        self.handlers.evaluator.as_ref()
    }

    /// New context for the registered pipe `pipe_id`.
    pub fn create(self: &Arc<Self>, pipe_id: &str) -> Result<Context, EngineError> {
        let pipe = self
            .registry
            .get(pipe_id)
            .ok_or_else(|| EngineError::UnknownPipe(pipe_id.to_string()))?;
        Ok(self.context(pipe))
    }

    /// New context for an already-built pipe.
    pub fn context(self: &Arc<Self>, pipe: Arc<Pipe>) -> Context {
        Context::new(Arc::clone(self), pipe)
    }

    /// Reopen a suspended context. Fails if it is unknown or already open.
    pub fn open(self: &Arc<Self>, id: &str) -> Result<Context, EngineError> {
        let (state, lease) = self.store.checkout(id)?;
        Ok(Context::from_store(Arc::clone(self), state, lease))
    }

    /// Forget a suspended context. Closing an absent id is a no-op.
    pub fn close(&self, id: &str) {
        self.store.close(id);
    }

    /// `open` followed by `resume`.
    pub async fn resume(self: &Arc<Self>, id: &str, input: Vec<Value>) -> Result<Outcome, EngineError> {
        self.open(id)?.resume(input).await
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    #[instrument(skip_all, fields(pipe = %pipe.id, node = %node.name, index = node.index))]
    pub(crate) async fn dispatch(
        &self,
        run: &mut RunState,
        pipe: &Arc<Pipe>,
        node: &Node,
    ) -> Result<Instruction, EngineError> {
        debug!(node_type = ?node.kind.node_type(), "dispatching node");
        let id = run.id;
        let wrap = |source: NodeError| node_error(pipe, node, id, source);

        match &node.kind {
            NodeKind::Process { name, args } => {
                let data = run.top().data_value();
                let args = resolve_mapping(self.evaluator(), args, &data).map_err(wrap)?;
                let raw = self
                    .handlers
                    .process
                    .call(name, args, &call_context(run, pipe, node))
                    .await
                    .map_err(wrap)?;
                Ok(Instruction::Advance(self.map_output(node, raw, &data, pipe, id)?))
            }

            NodeKind::Request { payload } => {
                let data = run.top().data_value();
                let payload = resolve_mapping(self.evaluator(), payload, &data).map_err(wrap)?;
                let raw = self
                    .handlers
                    .request
                    .request(payload, &call_context(run, pipe, node))
                    .await
                    .map_err(wrap)?;
                Ok(Instruction::Advance(self.map_output(node, raw, &data, pipe, id)?))
            }

            NodeKind::Ai { prompts, model, options } => {
                let data = run.top().data_value();
                let raw = self.run_ai(run, pipe, node, prompts, model, options, &data).await?;
                Ok(Instruction::Advance(self.map_output(node, raw, &data, pipe, id)?))
            }

            NodeKind::Switch { cases } => {
                let frame = run.top();
                let case = self.select_case(cases, &frame.data_value(), pipe, node, id)?;
                debug!(
                    case = %case.expression,
                    child = %case.pipe.id,
                    namespace = case.pipe.namespace().unwrap_or_default(),
                    "switch case selected"
                );
                let child = Frame::child(Arc::clone(&case.pipe), frame, self.evaluator()).map_err(wrap)?;
                Ok(Instruction::Enter(child))
            }

            NodeKind::UserInput { ui, autofill } => {
                let frame = run.top();
                let data = frame.data_value();
                let bound = match &node.input {
                    Some(spec) => resolve_mapping(self.evaluator(), spec, &data).map_err(wrap)?,
                    None => data.get("input").cloned().unwrap_or(Value::Null),
                };

                if ui.is_interactive() {
                    let seed = match autofill {
                        Some(template) => {
                            let text = value_to_text(self.evaluator().render(template, &data).map_err(wrap)?);
                            let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
                            lines.push(END_OF_INPUT.to_string());
                            lines
                        }
                        None => Vec::new(),
                    };
                    let lines = self
                        .handlers
                        .renderer
                        .render(RenderRequest {
                            node: node.name.clone(),
                            label: node.label.clone(),
                            input: bound,
                            seed,
                        })
                        .await
                        .map_err(wrap)?;
                    let raw = Value::String(lines.join("\n"));
                    return Ok(Instruction::Advance(self.map_output(node, raw, &data, pipe, id)?));
                }

                Ok(Instruction::Suspend(ResumeContext {
                    id,
                    input: frame.input.clone(),
                    node: ResumeNode {
                        name: node.name.clone(),
                        label: node.label.clone(),
                        node_type: node.kind.node_type(),
                        ui: *ui,
                    },
                    data: bound,
                    node_type: node.kind.node_type(),
                    ui: *ui,
                    suspended_at: Utc::now(),
                }))
            }
        }
    }

    /// First case whose expression holds, in declaration order; `default`
    /// only when none does.
    fn select_case<'c>(
        &self,
        cases: &'c [Case],
        data: &Value,
        pipe: &Pipe,
        node: &Node,
        id: Uuid,
    ) -> Result<&'c Case, EngineError> {
        let mut fallback = None;
        for case in cases {
            if case.expression == DEFAULT_CASE {
                fallback.get_or_insert(case);
                continue;
            }
            let hit = self
                .evaluator()
                .test(&case.expression, data)
                .map_err(|source| node_error(pipe, node, id, source))?;
            if hit {
                return Ok(case);
            }
        }
        fallback.ok_or_else(|| EngineError::SwitchCaseNotFound {
            pipe_id: pipe.id.clone(),
            node: node.name.clone(),
            context_id: id,
        })
    }

    /// Stream one chat completion and return the parsed (or raw) reply.
    #[allow(clippy::too_many_arguments)]
    async fn run_ai(
        &self,
        run: &mut RunState,
        pipe: &Arc<Pipe>,
        node: &Node,
        prompts: &[Prompt],
        model: &str,
        options: &Value,
        data: &Value,
    ) -> Result<Value, EngineError> {
        let id = run.id;
        let wrap = |source: NodeError| node_error(pipe, node, id, source);

        let mut resolved = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            let content = self.evaluator().render(&prompt.content, data).map_err(wrap)?;
            resolved.push(Prompt {
                content: value_to_text(content),
                ..prompt.clone()
            });
        }
        let key = PromptHistory::key(&pipe.id, &node.name);
        let prompts = run.history.merge(&key, resolved);

        let request = ChatRequest {
            model: model.to_string(),
            prompts,
            options: resolve_mapping(self.evaluator(), options, data).map_err(wrap)?,
        };
        let ctx = call_context(run, pipe, node);

        let (chunk_tx, mut chunk_rx) = mpsc::channel(self.config.chunk_buffer.max(1));
        let call = self.handlers.chat.chat_stream(request, &ctx, chunk_tx);
        let collect = async {
            let mut text = String::new();
            while let Some(chunk) = chunk_rx.recv().await {
                if let Some(hook) = &pipe.hooks.progress {
                    self.spawn_progress_hook(hook, &chunk.delta, &ctx);
                }
                text.push_str(&chunk.delta);
            }
            text
        };
        let (status, text) = tokio::join!(call, collect);
        let status = status.map_err(wrap)?;

        if text.is_empty() {
            return Err(EngineError::EmptyStream {
                pipe_id: pipe.id.clone(),
                index: node.index,
                node: node.name.clone(),
                context_id: id,
                raw: status.raw,
            });
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    /// Fire the pipe's progress hook for one chunk without waiting on it.
    fn spawn_progress_hook(&self, hook: &str, delta: &str, ctx: &CallContext) {
        let handler = Arc::clone(&self.handlers.process);
        let timeout = self.config.hook_timeout;
        let hook = hook.to_string();
        let ctx = ctx.clone();
        let args = json!({
            "pipe": ctx.pipe_id,
            "node": ctx.node,
            "context": ctx.context_id.to_string(),
            "chunk": delta,
        });

        tokio::spawn(async move {
            match tokio::time::timeout(timeout, handler.call(&hook, args, &ctx)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(hook = %hook, error = %e, "progress hook failed"),
                Err(_) => warn!(hook = %hook, "progress hook timed out after {:?}", timeout),
            }
        });
    }

    /// Apply the node's output mapping to `raw`; the raw result is visible to
    /// the mapping as `output`.
    pub(crate) fn map_output(
        &self,
        node: &Node,
        raw: Value,
        data: &Value,
        pipe: &Pipe,
        id: Uuid,
    ) -> Result<Value, EngineError> {
        let Some(spec) = &node.output else {
            return Ok(raw);
        };
        let mut scope = data.clone();
        if let Value::Object(map) = &mut scope {
            map.insert("output".into(), raw);
        }
        resolve_mapping(self.evaluator(), spec, &scope).map_err(|source| node_error(pipe, node, id, source))
    }
}

fn node_error(pipe: &Pipe, node: &Node, context_id: Uuid, source: NodeError) -> EngineError {
    EngineError::Node {
        pipe_id: pipe.id.clone(),
        index: node.index,
        node: node.name.clone(),
        context_id,
        source,
    }
}

fn call_context(run: &RunState, pipe: &Pipe, node: &Node) -> CallContext {
    CallContext {
        pipe_id: pipe.id.clone(),
        context_id: run.id,
        node: node.name.clone(),
        sid: run.sid.clone(),
        global: run.global.clone(),
    }
}

/// Text form of a rendered template: strings as-is, null as empty, anything
/// else as JSON.
fn value_to_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
