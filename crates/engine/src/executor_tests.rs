//! End-to-end tests for the pipe execution engine.
//!
//! Every collaborator is a mock from `nodes::mock`, so runs are fully
//! deterministic and need no external process, model or terminal.

use std::sync::Arc;
use std::time::Duration;

use nodes::mock::{MockBehaviour, MockChat, MockProcess, SeedRenderer};
use nodes::{NodeError, Prompt};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::executor::{Handlers, PipeExecutor};
use crate::models::PipeDefinition;
use crate::pipe::{NodeType, UiKind};
use crate::registry::PipeRegistry;
use crate::EngineError;

fn executor_with(defs: Vec<Value>, handlers: Handlers, config: EngineConfig) -> Arc<PipeExecutor> {
    let registry = Arc::new(PipeRegistry::new());
    for def in defs {
        let def: PipeDefinition = serde_json::from_value(def).expect("valid definition json");
        registry.register(def).expect("pipe builds");
    }
    PipeExecutor::new(registry, handlers, config)
}

fn executor(defs: Vec<Value>, handlers: Handlers) -> Arc<PipeExecutor> {
    executor_with(defs, handlers, EngineConfig::default())
}

fn global(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("global must be an object"),
    }
}

/// cli reader → switch → web help node.
fn router_pipe() -> Value {
    json!({
        "name": "router",
        "nodes": [
            { "name": "user", "ui": "cli", "autofill": "{{ input[0].placeholder }}" },
            {
                "name": "switch",
                "case": {
                    "{{ 'translate' in user }}": { "output": "{{ user }}" },
                    "default": { "goto": "help", "input": ["{{ user }}"] }
                }
            },
            { "name": "help", "ui": "web", "input": { "cmd": "{{ switch[0] }}" } }
        ]
    })
}

// ============================================================
// Switch / goto / interactive input
// ============================================================

#[tokio::test]
async fn control_case_jumps_to_help_with_bound_input() {
    let exec = executor(vec![router_pipe()], Handlers::default().with_renderer(SeedRenderer::new()));

    let outcome = exec
        .create("router")
        .unwrap()
        .exec(vec![json!({ "placeholder": "unknown" })])
        .await
        .unwrap();

    let rc = outcome.suspended().expect("help node suspends");
    assert_eq!(rc.node.name, "help");
    assert_eq!(rc.node.label, "HELP");
    assert_eq!(rc.node.node_type, NodeType::UserInput);
    assert_eq!(rc.ui, UiKind::Web);
    assert_eq!(rc.data["cmd"], "unknown");
    assert!(exec.store().contains(&rc.id.to_string()));
}

#[tokio::test]
async fn cli_node_completes_without_suspending() {
    let exec = executor(
        vec![json!({
            "name": "translate",
            "nodes": [
                { "name": "user", "ui": "cli", "autofill": "translate\nhello world" },
                {
                    "name": "switch",
                    "case": {
                        "{{ 'translate' in user }}": { "output": "{{ user }}" },
                        "default": { "output": "help" }
                    }
                }
            ]
        })],
        Handlers::default().with_renderer(SeedRenderer::new()),
    );

    let outcome = exec
        .create("translate")
        .unwrap()
        .with_global(global(json!({ "foo": "bar" })))
        .exec(vec![])
        .await
        .unwrap();

    let result = outcome.completed().expect("cli input never suspends");
    for key in ["global", "input", "output", "sid", "switch"] {
        assert!(result.get(key).is_some(), "missing key {key}");
    }
    assert_eq!(result["global"]["foo"], "bar");
    assert_eq!(result["user"], "translate\nhello world");
    assert_eq!(result["switch"], "translate\nhello world");
    assert!(exec.store().is_empty());
}

#[tokio::test]
async fn first_matching_case_wins_in_declaration_order() {
    let exec = executor(
        vec![json!({
            "name": "ordered",
            "nodes": [{
                "name": "pick",
                "case": {
                    "default": { "output": "fallback" },
                    "{{ true }}": { "output": "first" },
                    "{{ 1 == 1 }}": { "output": "second" }
                }
            }],
            "output": "{{ pick }}"
        })],
        Handlers::default(),
    );

    let result = exec.create("ordered").unwrap().exec(vec![]).await.unwrap();
    assert_eq!(result.completed(), Some(json!("first")));
}

#[tokio::test]
async fn switch_without_match_or_default_fails() {
    let exec = executor(
        vec![json!({
            "name": "strict",
            "nodes": [{ "name": "pick", "case": { "{{ false }}": { "output": "never" } } }]
        })],
        Handlers::default(),
    );

    let err = exec.create("strict").unwrap().exec(vec![]).await.unwrap_err();
    assert!(matches!(err, EngineError::SwitchCaseNotFound { node, .. } if node == "pick"));
}

#[tokio::test]
async fn goto_to_unknown_node_fails() {
    let exec = executor(
        vec![json!({
            "name": "lost",
            "nodes": [{ "name": "pick", "case": { "default": { "goto": "nowhere" } } }]
        })],
        Handlers::default(),
    );

    let err = exec.create("lost").unwrap().exec(vec![]).await.unwrap_err();
    assert!(matches!(err, EngineError::GotoTargetNotFound { target, .. } if target == "nowhere"));
}

#[tokio::test]
async fn endless_goto_loop_hits_step_limit() {
    let exec = executor_with(
        vec![json!({
            "name": "spin",
            "goto": "tick",
            "nodes": [{ "name": "tick", "process": { "name": "utils.tick" } }]
        })],
        Handlers::default().with_process(MockProcess::new()),
        EngineConfig {
            max_steps: 5,
            ..EngineConfig::default()
        },
    );

    let err = exec.create("spin").unwrap().exec(vec![]).await.unwrap_err();
    assert!(matches!(err, EngineError::StepLimitExceeded { limit: 5, .. }));
}

// ============================================================
// Suspend / resume
// ============================================================

fn web_pipe() -> Value {
    json!({
        "name": "web",
        "nodes": [{ "name": "ask", "ui": "web" }]
    })
}

#[tokio::test]
async fn suspend_then_resume_round_trip() {
    let exec = executor(vec![web_pipe()], Handlers::default());

    let rc = exec
        .create("web")
        .unwrap()
        .exec(vec![json!("hello web world")])
        .await
        .unwrap()
        .suspended()
        .expect("web node suspends");
    assert_eq!(rc.input, vec![json!("hello web world")]);
    assert_eq!(rc.node_type, NodeType::UserInput);

    let id = rc.id.to_string();
    let ctx = exec.open(&id).unwrap();
    assert_eq!(ctx.paused().map(|p| p.node.name.as_str()), Some("ask"));

    let result = ctx
        .resume(vec![json!("translate"), json!("hello web world")])
        .await
        .unwrap()
        .completed()
        .expect("nothing left to suspend on");
    assert_eq!(result["input"][0], "hello web world");
    assert_eq!(result["ask"], json!(["translate", "hello web world"]));
    assert!(!exec.store().contains(&id));
}

#[tokio::test]
async fn resume_context_serializes_type_fields() {
    let exec = executor(vec![web_pipe()], Handlers::default());
    let rc = exec.create("web").unwrap().exec(vec![]).await.unwrap().suspended().unwrap();

    let encoded = serde_json::to_value(&rc).unwrap();
    assert_eq!(encoded["type"], "user-input");
    assert_eq!(encoded["ui"], "web");
    assert_eq!(encoded["node"]["type"], "user-input");
    assert_eq!(encoded["node"]["name"], "ask");
}

#[tokio::test]
async fn second_open_of_same_context_is_rejected() {
    let exec = executor(vec![web_pipe()], Handlers::default());
    let rc = exec.create("web").unwrap().exec(vec![]).await.unwrap().suspended().unwrap();
    let id = rc.id.to_string();

    let first = exec.open(&id).unwrap();
    assert!(matches!(exec.open(&id), Err(EngineError::ResumeInUse(_))));

    drop(first);
    assert!(exec.open(&id).is_ok());
}

#[tokio::test]
async fn open_unknown_context_is_not_found() {
    let exec = executor(vec![web_pipe()], Handlers::default());
    assert!(matches!(exec.open("missing"), Err(EngineError::ResumeNotFound(_))));
    exec.close("missing");
}

#[tokio::test]
async fn resume_on_fresh_context_is_rejected() {
    let exec = executor(vec![web_pipe()], Handlers::default());
    let err = exec.create("web").unwrap().resume(vec![]).await.unwrap_err();
    assert!(matches!(err, EngineError::NotSuspended(_)));
}

#[tokio::test]
async fn resuming_into_another_pause_overwrites_the_entry() {
    let exec = executor(
        vec![json!({
            "name": "form",
            "nodes": [
                { "name": "first", "ui": "form" },
                { "name": "second", "ui": "chat", "input": { "previous": "{{ first }}" } }
            ]
        })],
        Handlers::default(),
    );

    let rc = exec.create("form").unwrap().exec(vec![]).await.unwrap().suspended().unwrap();
    let id = rc.id.to_string();

    let rc = exec.resume(&id, vec![json!("one")]).await.unwrap().suspended().unwrap();
    assert_eq!(rc.id.to_string(), id);
    assert_eq!(rc.node.name, "second");
    assert_eq!(rc.ui, UiKind::Chat);
    assert_eq!(rc.data, json!({ "previous": "one" }));
    assert_eq!(rc.input, vec![json!("one")]);
    assert!(exec.store().contains(&id));
    assert!(!exec.store().is_leased(&id));

    let done = exec.resume(&id, vec![json!("two")]).await.unwrap().completed().unwrap();
    assert_eq!(done["second"], "two");
    assert!(exec.store().is_empty());
}

#[tokio::test]
async fn suspension_inside_switch_case_resumes_in_the_child() {
    let exec = executor(
        vec![json!({
            "name": "nested",
            "nodes": [
                {
                    "name": "route",
                    "case": { "default": { "nodes": [{ "name": "confirm", "ui": "web" }] } }
                },
                { "name": "after", "process": { "name": "utils.after", "args": { "route": "{{ route }}" } } }
            ]
        })],
        Handlers::default().with_process(MockProcess::new()),
    );

    let rc = exec.create("nested").unwrap().exec(vec![]).await.unwrap().suspended().unwrap();
    assert_eq!(rc.node.name, "confirm");

    let result = exec
        .resume(&rc.id.to_string(), vec![json!("yes")])
        .await
        .unwrap()
        .completed()
        .unwrap();
    assert_eq!(result["route"], "yes");
    assert_eq!(result["after"]["args"]["route"], "yes");
}

#[tokio::test]
async fn failure_after_resume_closes_the_entry() {
    let exec = executor(
        vec![json!({
            "name": "fragile",
            "nodes": [
                { "name": "ask", "ui": "web" },
                { "name": "save", "process": { "name": "db.save" } }
            ]
        })],
        Handlers::default().with_process(MockProcess::new().failing("db.save", "disk full")),
    );

    let rc = exec.create("fragile").unwrap().exec(vec![]).await.unwrap().suspended().unwrap();
    let id = rc.id.to_string();

    let err = exec.resume(&id, vec![json!("x")]).await.unwrap_err();
    assert!(matches!(err, EngineError::Node { ref node, index: 1, .. } if node == "save"));
    assert!(!exec.store().contains(&id));
}

// ============================================================
// Cancellation
// ============================================================

#[tokio::test]
async fn cancelled_token_stops_before_first_dispatch() {
    let process = MockProcess::new();
    let exec = executor(
        vec![json!({ "name": "p", "nodes": [{ "name": "x", "process": { "name": "a.b" } }] })],
        Handlers::default().with_process(process.clone()),
    );

    let token = CancellationToken::new();
    token.cancel();
    let err = exec
        .create("p")
        .unwrap()
        .with_cancellation(token)
        .exec(vec![])
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Cancelled(_)));
    assert_eq!(process.call_count(), 0);
}

#[tokio::test]
async fn cancelled_resume_leaves_entry_unresumed() {
    let exec = executor(
        vec![json!({
            "name": "two-step",
            "nodes": [{ "name": "ask", "ui": "web" }, { "name": "again", "ui": "web" }]
        })],
        Handlers::default(),
    );
    let rc = exec.create("two-step").unwrap().exec(vec![]).await.unwrap().suspended().unwrap();
    let id = rc.id.to_string();

    let token = CancellationToken::new();
    token.cancel();
    let err = exec
        .open(&id)
        .unwrap()
        .with_cancellation(token)
        .resume(vec![json!("x")])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled(_)));
    assert!(exec.store().contains(&id));
    assert!(!exec.store().is_leased(&id));

    // The stored snapshot is still paused on the first node.
    let ctx = exec.open(&id).unwrap();
    assert_eq!(ctx.paused().unwrap().node.name, "ask");
}

// ============================================================
// Process / request nodes
// ============================================================

#[tokio::test]
async fn process_receives_resolved_args_sid_and_global() {
    let process = MockProcess::new().returning("utils.greet", json!({ "greeting": "hi ada" }));
    let exec = executor(
        vec![json!({
            "name": "greet",
            "whitelist": ["utils.*"],
            "nodes": [{
                "name": "greet",
                "process": { "name": "utils.greet", "args": { "who": "{{ input[0] }}", "team": "{{ global.team }}" } },
                "output": "{{ output.greeting }}"
            }],
            "output": { "message": "{{ greet }}", "sid": "{{ sid }}" }
        })],
        Handlers::default().with_process(process.clone()),
    );

    let result = exec
        .create("greet")
        .unwrap()
        .with_global(global(json!({ "team": "core" })))
        .with_sid("session-7")
        .exec(vec![json!("ada")])
        .await
        .unwrap()
        .completed()
        .unwrap();

    assert_eq!(result, json!({ "message": "hi ada", "sid": "session-7" }));
    let calls = process.calls_to("utils.greet");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args, json!({ "who": "ada", "team": "core" }));
    assert_eq!(calls[0].sid, "session-7");
    assert_eq!(calls[0].global["team"], "core");
}

#[tokio::test]
async fn process_failure_is_wrapped_with_location() {
    let exec = executor(
        vec![json!({
            "name": "broken",
            "nodes": [
                { "name": "ok", "process": { "name": "a.ok" } },
                { "name": "boom", "process": { "name": "a.boom" } }
            ]
        })],
        Handlers::default().with_process(MockProcess::new().failing("a.boom", "exploded")),
    );

    let ctx = exec.create("broken").unwrap();
    let id = ctx.id();
    let err = ctx.exec(vec![]).await.unwrap_err();

    match &err {
        EngineError::Node {
            pipe_id,
            index,
            node,
            context_id,
            source,
        } => {
            assert_eq!(pipe_id, "broken");
            assert_eq!(*index, 1);
            assert_eq!(node, "boom");
            assert_eq!(*context_id, id);
            assert!(matches!(source, NodeError::Fatal(msg) if msg == "exploded"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("boom"));
}

#[tokio::test]
async fn unconfigured_backend_reports_unsupported() {
    let exec = executor(
        vec![json!({ "name": "p", "nodes": [{ "name": "x", "process": { "name": "a.b" } }] })],
        Handlers::default(),
    );
    let err = exec.create("p").unwrap().exec(vec![]).await.unwrap_err();
    assert!(matches!(err, EngineError::Node { source: NodeError::Unsupported(_), .. }));
}

#[tokio::test]
async fn request_node_sends_resolved_payload() {
    let backend = MockProcess::new().returning("request", json!({ "status": 200 }));
    let exec = executor(
        vec![json!({
            "name": "fetch",
            "nodes": [{
                "name": "call",
                "request": { "url": "https://example.test/{{ input[0] }}", "method": "GET" },
                "output": "{{ output.status }}"
            }]
        })],
        Handlers::default().with_request(backend.clone()),
    );

    let result = exec
        .create("fetch")
        .unwrap()
        .exec(vec![json!("items")])
        .await
        .unwrap()
        .completed()
        .unwrap();

    assert_eq!(result["call"], 200);
    assert_eq!(
        backend.calls_to("request")[0].args,
        json!({ "url": "https://example.test/items", "method": "GET" })
    );
}

#[tokio::test]
async fn unknown_pipe_is_reported() {
    let exec = executor(vec![], Handlers::default());
    assert!(matches!(exec.create("ghost"), Err(EngineError::UnknownPipe(id)) if id == "ghost"));
}

// ============================================================
// AI nodes
// ============================================================

#[tokio::test]
async fn ai_reply_is_parsed_as_json_when_possible() {
    let chat = MockChat::new().reply([r#"{"lang":"#, r#" "fr"}"#]);
    let exec = executor(
        vec![json!({
            "name": "detect",
            "nodes": [{
                "name": "ask",
                "model": "small",
                "prompts": [{ "role": "user", "content": "Language of: {{ input[0] }}" }]
            }]
        })],
        Handlers::default().with_chat(chat.clone()),
    );

    let result = exec
        .create("detect")
        .unwrap()
        .exec(vec![json!("bonjour")])
        .await
        .unwrap()
        .completed()
        .unwrap();

    assert_eq!(result["ask"], json!({ "lang": "fr" }));
    let requests = chat.request_log();
    assert_eq!(requests[0].model, "small");
    assert_eq!(requests[0].prompts[0].content, "Language of: bonjour");
}

#[tokio::test]
async fn ai_reply_without_chunks_is_an_empty_stream_error() {
    let exec = executor(
        vec![json!({
            "name": "quiet",
            "nodes": [{ "name": "ask", "prompts": [{ "content": "hi" }] }]
        })],
        Handlers::default().with_chat(MockChat::new().raw_only("rate limited")),
    );

    let err = exec.create("quiet").unwrap().exec(vec![]).await.unwrap_err();
    assert!(matches!(err, EngineError::EmptyStream { ref raw, ref node, .. } if raw == "rate limited" && node == "ask"));
}

#[tokio::test]
async fn reentered_ai_node_sends_deduplicated_history() {
    let chat = MockChat::new().reply(["first"]).reply(["done"]);
    let exec = executor(
        vec![json!({
            "name": "loop",
            "goto": "{% if output != 'done' %}ask{% endif %}",
            "nodes": [{
                "name": "ask",
                "prompts": [
                    { "role": "system", "content": "be brief" },
                    { "role": "user", "content": "{{ 'continue' if ask else 'start' }}" }
                ]
            }]
        })],
        Handlers::default().with_chat(chat.clone()),
    );

    let result = exec.create("loop").unwrap().exec(vec![]).await.unwrap().completed().unwrap();
    assert_eq!(result["ask"], "done");

    let requests = chat.request_log();
    assert_eq!(requests.len(), 2);
    let contents: Vec<&str> = requests[1].prompts.iter().map(|p| p.content.as_str()).collect();
    assert_eq!(contents, vec!["be brief", "start", "continue"]);
}

#[tokio::test]
async fn progress_hook_runs_per_chunk() {
    let process = MockProcess::new();
    let exec = executor(
        vec![json!({
            "name": "stream",
            "hooks": { "progress": "hooks.progress" },
            "nodes": [{ "name": "ask", "prompts": [{ "content": "hi" }] }]
        })],
        Handlers::default()
            .with_process(process.clone())
            .with_chat(MockChat::new().reply(["a", "b", "c"])),
    );

    let result = exec.create("stream").unwrap().exec(vec![]).await.unwrap().completed().unwrap();
    assert_eq!(result["ask"], "abc");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let calls = process.calls_to("hooks.progress");
    assert_eq!(calls.len(), 3);
    let mut chunks: Vec<String> = calls
        .iter()
        .map(|c| c.args["chunk"].as_str().unwrap_or_default().to_string())
        .collect();
    chunks.sort();
    assert_eq!(chunks, vec!["a", "b", "c"]);
    assert_eq!(calls[0].args["node"], "ask");
}

#[tokio::test]
async fn failing_progress_hook_does_not_abort_the_run() {
    let exec = executor(
        vec![json!({
            "name": "stream",
            "hooks": { "progress": "hooks.progress" },
            "nodes": [{ "name": "ask", "prompts": [{ "content": "hi" }] }]
        })],
        Handlers::default()
            .with_process(MockProcess::new().failing("hooks.progress", "hook down"))
            .with_chat(MockChat::new().reply(["ok"])),
    );

    let result = exec.create("stream").unwrap().exec(vec![]).await.unwrap();
    assert_eq!(result.completed().unwrap()["ask"], "ok");
}

#[tokio::test]
async fn switch_children_inherit_the_progress_hook() {
    let process = MockProcess::new();
    let exec = executor(
        vec![json!({
            "name": "outer",
            "hooks": { "progress": "hooks.progress" },
            "nodes": [{
                "name": "route",
                "case": { "default": { "nodes": [{ "name": "ask", "prompts": [{ "content": "hi" }] }] } }
            }]
        })],
        Handlers::default()
            .with_process(process.clone())
            .with_chat(MockChat::new().reply(["x"])),
    );

    let result = exec.create("outer").unwrap().exec(vec![]).await.unwrap().completed().unwrap();
    assert_eq!(result["route"], "x");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(process.calls_to("hooks.progress").len(), 1);
}

#[test]
fn prompt_defaults_to_user_role() {
    let prompt: Prompt = serde_json::from_value(json!({ "content": "hi" })).unwrap();
    assert_eq!(prompt.role, "user");
}

// ============================================================
// Switch-case inheritance and goto forwarding
// ============================================================

#[tokio::test]
async fn switch_case_sees_parent_mapped_input() {
    let process = MockProcess::new();
    let exec = executor(
        vec![json!({
            "name": "mapped",
            "input": { "q": "{{ input[0] }}" },
            "nodes": [
                { "name": "outer", "process": { "name": "a.outer", "args": { "q": "{{ input.q }}" } } },
                {
                    "name": "route",
                    "case": {
                        "default": {
                            "nodes": [{ "name": "inner", "process": { "name": "a.inner", "args": { "q": "{{ input.q }}" } } }]
                        }
                    }
                },
                {
                    "name": "shout",
                    "case": { "default": { "input": { "loud": "{{ input.q | upper }}" } } }
                }
            ]
        })],
        Handlers::default().with_process(process.clone()),
    );

    let result = exec
        .create("mapped")
        .unwrap()
        .exec(vec![json!("x")])
        .await
        .unwrap()
        .completed()
        .unwrap();

    assert_eq!(process.calls_to("a.outer")[0].args, json!({ "q": "x" }));
    assert_eq!(process.calls_to("a.inner")[0].args, json!({ "q": "x" }));
    assert_eq!(result["shout"], json!({ "loud": "X" }));
    assert_eq!(result["input"], json!({ "q": "x" }));
}

#[tokio::test]
async fn goto_from_case_with_nodes_is_forwarded_to_parent() {
    let process = MockProcess::new();
    let exec = executor(
        vec![json!({
            "name": "forward",
            "nodes": [
                {
                    "name": "route",
                    "case": {
                        "default": {
                            "goto": "end",
                            "nodes": [{ "name": "inner", "process": { "name": "a.inner" } }]
                        }
                    }
                },
                { "name": "skipped", "process": { "name": "a.skipped" } },
                { "name": "end", "process": { "name": "a.end" } }
            ]
        })],
        Handlers::default().with_process(process.clone()),
    );

    let result = exec.create("forward").unwrap().exec(vec![]).await.unwrap().completed().unwrap();

    assert!(result.get("skipped").is_none());
    assert!(result.get("end").is_some());
    assert_eq!(result["route"]["process"], "a.inner");
    assert_eq!(process.calls_to("a.skipped").len(), 0);
    assert_eq!(process.calls_to("a.end").len(), 1);
}

// ============================================================
// Store lifecycle and hook timeouts
// ============================================================

#[tokio::test]
async fn context_closed_during_resume_is_not_stored_again() {
    let exec = executor(
        vec![json!({
            "name": "two-step",
            "nodes": [{ "name": "ask", "ui": "web" }, { "name": "again", "ui": "web" }]
        })],
        Handlers::default(),
    );
    let rc = exec.create("two-step").unwrap().exec(vec![]).await.unwrap().suspended().unwrap();
    let id = rc.id.to_string();

    let ctx = exec.open(&id).unwrap();
    exec.close(&id);

    let rc = ctx.resume(vec![json!("x")]).await.unwrap().suspended().unwrap();
    assert_eq!(rc.node.name, "again");
    assert!(!exec.store().contains(&id));
    assert!(matches!(exec.open(&id), Err(EngineError::ResumeNotFound(_))));
}

#[tokio::test]
async fn slow_progress_hook_times_out_without_blocking_the_run() {
    let process = MockProcess::new().with("hooks.progress", MockBehaviour::Delay(Duration::from_secs(30)));
    let exec = executor_with(
        vec![json!({
            "name": "stream",
            "hooks": { "progress": "hooks.progress" },
            "nodes": [{ "name": "ask", "prompts": [{ "content": "hi" }] }]
        })],
        Handlers::default()
            .with_process(process.clone())
            .with_chat(MockChat::new().reply(["a", "b"])),
        EngineConfig {
            hook_timeout: Duration::from_millis(20),
            ..EngineConfig::default()
        },
    );

    let started = std::time::Instant::now();
    let result = exec.create("stream").unwrap().exec(vec![]).await.unwrap().completed().unwrap();
    assert_eq!(result["ask"], "ab");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(process.calls_to("hooks.progress").len(), 2);
    assert!(started.elapsed() < Duration::from_secs(5));
}
