//! End-to-end planner loop scenarios against scripted agents.
//!
//! Each test builds a temp `.conductor/` layout, scripts planner and delegate
//! replies, runs one message through `run_agent` and inspects the result and
//! the trace written to disk.

use std::fs;

use serde_json::json;

use conductor::core::decision::FALLBACK_MESSAGE;
use conductor::core::sandbox::BLOCKED_PATH_NAME;
use conductor::core::types::{ArtifactOperation, StopReason};
use conductor::io::trace::load_trace;
use conductor::run::{OrchestrationRunResult, RunOptions, route_message, run_agent};
use conductor::test_support::{
    ScriptedAgentRunner, ScriptedTurn, TestWorkspace, delegate, finish, planner_reply, read_file,
};

const ORCHESTRATOR: &str = "orchestrator";

fn workspace() -> TestWorkspace {
    let ws = TestWorkspace::new();
    ws.add_agent("writer", true, false);
    ws
}

fn run(ws: &TestWorkspace, runner: &ScriptedAgentRunner, message: &str) -> OrchestrationRunResult {
    run_with(ws, runner, ORCHESTRATOR, message)
}

fn run_with(
    ws: &TestWorkspace,
    runner: &ScriptedAgentRunner,
    entry: &str,
    message: &str,
) -> OrchestrationRunResult {
    run_agent(
        &ws.paths,
        &ws.ports(runner),
        entry,
        &RunOptions {
            message,
            silent: true,
            ..RunOptions::default()
        },
    )
    .expect("run_agent")
}

fn plan(runner: &ScriptedAgentRunner, actions: Vec<serde_json::Value>) {
    runner.script(
        ORCHESTRATOR,
        actions
            .into_iter()
            .map(|action| ScriptedTurn::ok(planner_reply(action))),
    );
}

#[test]
fn delegate_then_finish_end_to_end() {
    let ws = workspace();
    let runner = ScriptedAgentRunner::new();
    plan(
        &runner,
        vec![
            json!({
                "type": "delegate_to_agent",
                "targetAgentId": "writer",
                "message": "draft X",
                "taskKey": "draft",
            }),
            finish("Done: X"),
        ],
    );
    runner.script("writer", [ScriptedTurn::ok("X draft")]);

    let result = run(&ws, &runner, "write X");

    assert_eq!(result.execution.code, 0);
    assert_eq!(result.execution.stdout, "Done: X\n");
    let trace = result.orchestration.as_ref().expect("orchestration trace");
    assert_eq!(trace.stop_reason, StopReason::Finished);
    assert_eq!(trace.final_message, "Done: X");
    assert_eq!(trace.steps.len(), 2);
    assert_eq!(trace.session_graph.edges.len(), 1);
    assert_eq!(trace.session_graph.edges[0].from_agent_id, ORCHESTRATOR);
    assert_eq!(trace.session_graph.edges[0].to_agent_id, "writer");
    assert!(trace.task_threads.contains_key("draft"));

    let call = trace.steps[0].agent_call.as_ref().expect("agent call");
    assert_eq!(call.execution.stdout, "X draft");

    let planner_calls = runner.calls_for(ORCHESTRATOR);
    assert_eq!(planner_calls.len(), 2);
    assert!(planner_calls.iter().all(|call| call.silent));
    assert!(planner_calls[1].prompt.contains("[writer:draft] X draft"));

    let on_disk = load_trace(std::path::Path::new(&result.trace_path)).expect("trace");
    assert_eq!(on_disk.run_id, result.run_id);
    assert_eq!(on_disk.orchestration.as_ref(), result.orchestration.as_ref());
}

#[test]
fn step_limit_bounds_the_loop() {
    let ws = TestWorkspace::with_config(|cfg| cfg.max_orchestration_steps = 3);
    let runner = ScriptedAgentRunner::new();
    plan(&runner, (0..5).map(|_| read_file("notes.md")).collect());

    let result = run(&ws, &runner, "keep reading");

    let trace = result.orchestration.as_ref().expect("orchestration trace");
    assert_eq!(trace.stop_reason, StopReason::StepLimit);
    assert_eq!(trace.steps.len(), 3);
    assert_eq!(runner.remaining(ORCHESTRATOR), 2);
    assert_eq!(result.execution.code, 0);
    assert!(result.execution.stdout.contains("step limit (3)"));
    assert!(
        trace.steps[0]
            .note
            .as_deref()
            .is_some_and(|note| note.starts_with("[MISSING] notes.md"))
    );
}

#[test]
fn delegation_cap_stops_before_the_next_step() {
    let ws = TestWorkspace::with_config(|cfg| cfg.max_delegation_steps = 2);
    ws.add_agent("writer", true, false);
    let runner = ScriptedAgentRunner::new();
    plan(&runner, (0..4).map(|_| delegate("writer", "more")).collect());
    runner.script("writer", (0..4).map(|i| ScriptedTurn::ok(format!("part {i}"))));

    let result = run(&ws, &runner, "write forever");

    let trace = result.orchestration.as_ref().expect("orchestration trace");
    assert_eq!(trace.stop_reason, StopReason::DelegationLimit);
    assert_eq!(trace.steps.len(), 2);
    assert_eq!(runner.calls_for("writer").len(), 2);
    assert_eq!(runner.calls_for(ORCHESTRATOR).len(), 2);
    assert!(result.execution.stdout.contains("delegation limit (2)"));
    assert!(result.execution.stdout.contains("part 1"));
}

#[test]
fn task_thread_is_reused_across_steps() {
    let ws = workspace();
    let runner = ScriptedAgentRunner::new();
    plan(
        &runner,
        vec![
            json!({
                "type": "delegate_to_agent",
                "targetAgentId": "writer",
                "message": "first draft",
                "taskKey": "draft",
                "mode": "direct",
            }),
            read_file("notes.md"),
            json!({
                "type": "delegate_to_agent",
                "targetAgentId": "writer",
                "message": "revise it",
                "taskKey": "draft",
                "mode": "direct",
                "sessionPolicy": "reuse",
            }),
            finish("done"),
        ],
    );
    runner.script(
        "writer",
        [
            ScriptedTurn::ok("draft v1").with_session("prov-writer-1"),
            ScriptedTurn::ok("draft v2"),
        ],
    );

    let result = run(&ws, &runner, "write and revise");

    let writer_calls = runner.calls_for("writer");
    assert_eq!(writer_calls.len(), 2);
    assert!(writer_calls[0].force_new);
    assert_eq!(writer_calls[0].provider_session_id, None);
    assert!(!writer_calls[1].force_new);
    assert_eq!(
        writer_calls[1].provider_session_id.as_deref(),
        Some("prov-writer-1")
    );
    assert!(writer_calls[1].prompt.contains("<conversation>"));
    assert!(writer_calls[1].prompt.contains("draft v1"));

    let trace = result.orchestration.as_ref().expect("orchestration trace");
    let thread = &trace.task_threads["draft"];
    assert_eq!(thread.agent_id, "writer");
    assert_eq!(thread.created_step, 1);
    assert_eq!(thread.updated_step, 3);
    assert_eq!(thread.provider_session_id.as_deref(), Some("prov-writer-1"));
    assert_eq!(thread.session_key.as_deref(), Some("task-draft"));

    let second = trace.steps[2].agent_call.as_ref().expect("agent call");
    assert!(second.reused_session);
    assert!(!second.downgraded);
}

#[test]
fn auto_policy_resumes_an_existing_thread() {
    let ws = workspace();
    let runner = ScriptedAgentRunner::new();
    plan(
        &runner,
        vec![
            json!({
                "type": "delegate_to_agent",
                "targetAgentId": "writer",
                "message": "first draft",
                "taskKey": "draft",
                "sessionPolicy": "auto",
            }),
            read_file("notes.md"),
            json!({
                "type": "delegate_to_agent",
                "targetAgentId": "writer",
                "message": "revise it",
                "taskKey": "draft",
                "sessionPolicy": "auto",
            }),
            finish("done"),
        ],
    );
    runner.script(
        "writer",
        [
            ScriptedTurn::ok("draft v1").with_session("prov-writer-1"),
            ScriptedTurn::ok("draft v2"),
        ],
    );

    let result = run(&ws, &runner, "write and revise");

    let writer_calls = runner.calls_for("writer");
    assert!(writer_calls[0].force_new);
    assert!(!writer_calls[1].force_new);
    assert_eq!(
        writer_calls[1].provider_session_id.as_deref(),
        Some("prov-writer-1")
    );

    let trace = result.orchestration.as_ref().expect("orchestration trace");
    let thread = &trace.task_threads["draft"];
    assert_eq!(thread.created_step, 1);
    assert_eq!(thread.updated_step, 3);
    let first = trace.steps[0].agent_call.as_ref().expect("first call");
    assert!(!first.reused_session);
    let second = trace.steps[2].agent_call.as_ref().expect("second call");
    assert!(second.reused_session);
    assert!(!second.downgraded);
}

#[test]
fn task_keys_differing_in_punctuation_keep_separate_sessions() {
    let ws = workspace();
    let runner = ScriptedAgentRunner::new();
    let delegate_task = |key: &str, message: &str| {
        json!({
            "type": "delegate_to_agent",
            "targetAgentId": "writer",
            "message": message,
            "taskKey": key,
            "mode": "direct",
        })
    };
    plan(
        &runner,
        vec![
            delegate_task("review:v2", "ALPHA task"),
            delegate_task("review-v2", "BETA task"),
            delegate_task("review:v2", "continue alpha"),
            finish("done"),
        ],
    );
    runner.script(
        "writer",
        [
            ScriptedTurn::ok("alpha reply"),
            ScriptedTurn::ok("beta reply"),
            ScriptedTurn::ok("alpha again"),
        ],
    );

    let result = run(&ws, &runner, "two reviews");

    let third_prompt = &runner.calls_for("writer")[2].prompt;
    assert!(third_prompt.contains("User: ALPHA task"));
    assert!(third_prompt.contains("Assistant: alpha reply"));
    assert!(!third_prompt.contains("BETA task"));

    let trace = result.orchestration.as_ref().expect("orchestration trace");
    let colon = &trace.task_threads["review:v2"];
    let dash = &trace.task_threads["review-v2"];
    assert_eq!(colon.session_key.as_deref(), Some("task-review:v2"));
    assert_eq!(dash.session_key.as_deref(), Some("task-review-v2"));
    assert_ne!(colon.session_id, dash.session_id);
}

#[test]
fn binary_workspace_file_is_read_into_notes() {
    let ws = workspace();
    let runner = ScriptedAgentRunner::new();
    let workspace_dir = ws.paths.agent_workspace(ORCHESTRATOR);
    fs::write(workspace_dir.join("logo.png"), [0x89, 0x50, 0xff, 0xfe, 0x00]).expect("logo");
    plan(&runner, vec![read_file("logo.png"), finish("looked")]);

    let result = run(&ws, &runner, "inspect the logo");

    assert_eq!(result.execution.stdout, "looked\n");
    assert!(std::path::Path::new(&result.trace_path).is_file());
    let trace = result.orchestration.as_ref().expect("orchestration trace");
    let io = trace.steps[0].artifact_io.as_ref().expect("read io");
    assert!(!io.missing);
    assert!(!io.blocked);
    assert!(io.bytes.is_some());
    assert!(
        trace.steps[0]
            .note
            .as_deref()
            .is_some_and(|note| note.starts_with("[FILE] logo.png"))
    );
}

#[test]
fn reuse_without_thread_downgrades_to_fresh_session() {
    let ws = workspace();
    let runner = ScriptedAgentRunner::new();
    plan(
        &runner,
        vec![
            json!({
                "type": "delegate_to_agent",
                "targetAgentId": "writer",
                "message": "continue",
                "taskKey": "fresh",
                "sessionPolicy": "reuse",
            }),
            finish("ok"),
        ],
    );
    runner.script("writer", [ScriptedTurn::ok("started over")]);

    let result = run(&ws, &runner, "continue the work");

    let trace = result.orchestration.as_ref().expect("orchestration trace");
    let call = trace.steps[0].agent_call.as_ref().expect("agent call");
    assert!(call.downgraded);
    assert!(!call.reused_session);
    assert!(runner.calls_for("writer")[0].force_new);
    let note = trace.steps[0].note.as_deref().expect("note");
    assert!(note.contains("[SESSION] no existing thread 'fresh' for writer"));
}

#[test]
fn failed_delegation_keeps_thread_but_adds_no_edge() {
    let ws = workspace();
    let runner = ScriptedAgentRunner::new();
    plan(&runner, vec![delegate("writer", "try"), finish("gave up")]);
    runner.script("writer", [ScriptedTurn::failed(1, "rate limited")]);

    let result = run(&ws, &runner, "try it");

    let trace = result.orchestration.as_ref().expect("orchestration trace");
    assert!(trace.session_graph.edges.is_empty());
    assert!(trace.task_threads.contains_key("writer-step-1"));
    let note = trace.steps[0].note.as_deref().expect("note");
    assert!(note.contains("[no output; exit code 1; stderr: rate limited]"));
    assert_eq!(result.execution.stdout, "gave up\n");
}

#[test]
fn invalid_target_is_noted_and_not_counted() {
    let ws = workspace();
    let runner = ScriptedAgentRunner::new();
    plan(
        &runner,
        vec![
            delegate("ghost", "boo"),
            delegate(ORCHESTRATOR, "myself"),
            finish("fine"),
        ],
    );

    let result = run(&ws, &runner, "haunt");

    let trace = result.orchestration.as_ref().expect("orchestration trace");
    assert_eq!(trace.steps.len(), 3);
    assert!(trace.steps.iter().all(|step| step.agent_call.is_none()));
    assert!(
        trace.steps[0]
            .note
            .as_deref()
            .is_some_and(|note| note.contains("[INVALID TARGET] ghost: unknown agent"))
    );
    assert!(
        trace.steps[1]
            .note
            .as_deref()
            .is_some_and(|note| note.contains("cannot delegate to itself"))
    );
    assert!(runner.calls_for(ORCHESTRATOR)[1].prompt.contains("[INVALID TARGET] ghost"));
}

#[test]
fn escaping_paths_are_redirected_to_the_sentinel() {
    let ws = workspace();
    let runner = ScriptedAgentRunner::new();
    plan(
        &runner,
        vec![
            json!({
                "type": "write_workspace_file",
                "path": "../../etc/passwd",
                "content": "owned",
            }),
            read_file("/etc/hostname"),
            finish("done"),
        ],
    );

    let result = run(&ws, &runner, "escape");

    let workspace_dir = ws.paths.agent_workspace(ORCHESTRATOR);
    let sentinel = workspace_dir.join(BLOCKED_PATH_NAME);
    assert_eq!(fs::read_to_string(&sentinel).expect("sentinel"), "owned\n");

    let trace = result.orchestration.as_ref().expect("orchestration trace");
    let write = trace.steps[0].artifact_io.as_ref().expect("write io");
    assert_eq!(write.operation, ArtifactOperation::Write);
    assert!(write.blocked);
    assert_eq!(write.requested_path, "../../etc/passwd");
    assert_eq!(write.resolved_path, sentinel.display().to_string());

    let read = trace.steps[1].artifact_io.as_ref().expect("read io");
    assert!(read.blocked);
    assert!(!read.missing);
    assert_eq!(read.bytes, Some("owned\n".len()));
}

#[test]
fn workspace_files_round_trip_through_notes() {
    let ws = workspace();
    let runner = ScriptedAgentRunner::new();
    plan(
        &runner,
        vec![
            json!({
                "type": "write_workspace_file",
                "path": "plans/outline.md",
                "content": "1. intro",
            }),
            read_file("plans/outline.md"),
            finish("done"),
        ],
    );

    let _result = run(&ws, &runner, "outline");

    let written = ws
        .paths
        .agent_workspace(ORCHESTRATOR)
        .join("plans")
        .join("outline.md");
    assert_eq!(fs::read_to_string(written).expect("outline"), "1. intro\n");
    let third_prompt = &runner.calls_for(ORCHESTRATOR)[2].prompt;
    assert!(third_prompt.contains("[WROTE] plans/outline.md"));
    assert!(third_prompt.contains("[FILE] plans/outline.md\n1. intro"));
}

#[test]
fn artifacts_mode_delivers_a_handoff_pointer() {
    let ws = workspace();
    let runner = ScriptedAgentRunner::new();
    plan(
        &runner,
        vec![
            json!({
                "type": "delegate_to_agent",
                "targetAgentId": "writer",
                "message": "secret plan",
                "expectedOutput": "a summary",
                "mode": "artifacts",
            }),
            finish("ok"),
        ],
    );
    runner.script("writer", [ScriptedTurn::ok("summary")]);

    let result = run(&ws, &runner, "summarize");

    let writer_prompt = &runner.calls_for("writer")[0].prompt;
    assert!(!writer_prompt.contains("secret plan"));
    assert!(writer_prompt.contains("step-01-writer-handoff.md"));

    let coordination = ws.paths.coordination_dir(ORCHESTRATOR, &result.run_id);
    let handoff =
        fs::read_to_string(coordination.join("step-01-writer-handoff.md")).expect("handoff");
    assert!(handoff.contains("secret plan"));
    assert!(handoff.contains("a summary"));
    let response =
        fs::read_to_string(coordination.join("step-01-writer-response.md")).expect("response");
    assert!(response.contains("summary"));

    let trace = result.orchestration.as_ref().expect("orchestration trace");
    let call = trace.steps[0].agent_call.as_ref().expect("agent call");
    assert!(call.handoff_path.is_some());
    assert!(call.response_path.is_some());
}

#[test]
fn direct_mode_writes_no_artifacts() {
    let ws = workspace();
    let runner = ScriptedAgentRunner::new();
    plan(
        &runner,
        vec![
            json!({
                "type": "delegate_to_agent",
                "targetAgentId": "writer",
                "message": "inline only",
                "mode": "direct",
            }),
            finish("ok"),
        ],
    );
    runner.script("writer", [ScriptedTurn::ok("fine")]);

    let result = run(&ws, &runner, "inline");

    assert_eq!(runner.calls_for("writer")[0].prompt, "inline only");
    let coordination = ws.paths.coordination_dir(ORCHESTRATOR, &result.run_id);
    assert!(!coordination.exists());
}

#[test]
fn fenced_decision_after_prose_is_accepted() {
    let ws = workspace();
    let runner = ScriptedAgentRunner::new();
    let reply = format!(
        "Sure, here is my decision:\n```json\n{}\n```\nLet me know.",
        planner_reply(finish("fenced answer"))
    );
    runner.script(ORCHESTRATOR, [ScriptedTurn::ok(reply)]);

    let result = run(&ws, &runner, "hello");

    assert_eq!(result.execution.stdout, "fenced answer\n");
}

#[test]
fn unparseable_planner_output_falls_back() {
    let ws = workspace();
    let runner = ScriptedAgentRunner::new();
    runner.script(ORCHESTRATOR, [ScriptedTurn::ok("not json at all")]);

    let result = run(&ws, &runner, "hello");

    assert_eq!(result.execution.code, 0);
    assert_eq!(result.execution.stdout, format!("{FALLBACK_MESSAGE}\n"));
    let trace = result.orchestration.as_ref().expect("orchestration trace");
    assert_eq!(trace.stop_reason, StopReason::Finished);
    assert_eq!(trace.steps[0].planner_raw_output, "not json at all");
}

#[test]
fn failed_planner_surfaces_its_exit_code() {
    let ws = workspace();
    let runner = ScriptedAgentRunner::new();
    runner.script(ORCHESTRATOR, [ScriptedTurn::failed(2, "auth expired")]);

    let result = run(&ws, &runner, "hello");

    assert_eq!(result.execution.code, 2);
    assert_eq!(result.execution.stdout, format!("{FALLBACK_MESSAGE}\n"));
    let trace = result.orchestration.as_ref().expect("orchestration trace");
    let note = trace.steps[0].note.as_deref().expect("note");
    assert!(note.starts_with("[PLANNER] exit code 2: auth expired"));
}

#[test]
fn planner_session_continues_across_runs() {
    let ws = workspace();
    let runner = ScriptedAgentRunner::new();
    runner.script(
        ORCHESTRATOR,
        [
            ScriptedTurn::ok(planner_reply(finish("first"))).with_session("prov-orch"),
            ScriptedTurn::ok(planner_reply(finish("second"))),
        ],
    );

    run(&ws, &runner, "one");
    run(&ws, &runner, "two");

    let calls = runner.calls_for(ORCHESTRATOR);
    assert!(calls[0].force_new);
    assert_eq!(calls[1].provider_session_id.as_deref(), Some("prov-orch"));
    assert!(!calls[1].force_new);
    assert!(calls[1].prompt.contains("first"));
}

#[test]
fn later_planner_steps_start_fresh_provider_sessions() {
    let ws = workspace();
    let runner = ScriptedAgentRunner::new();
    runner.script(
        ORCHESTRATOR,
        [
            ScriptedTurn::ok(planner_reply(read_file("a.md"))).with_session("prov-orch"),
            ScriptedTurn::ok(planner_reply(finish("done"))),
        ],
    );

    run(&ws, &runner, "one");

    let calls = runner.calls_for(ORCHESTRATOR);
    assert_eq!(calls.len(), 2);
    assert!(calls[1].force_new);
    assert_eq!(calls[1].provider_session_id, None);
}

#[test]
fn each_run_writes_its_own_trace() {
    let ws = workspace();
    let runner = ScriptedAgentRunner::new();
    plan(&runner, vec![finish("a"), finish("b")]);

    let first = run(&ws, &runner, "one");
    let second = run(&ws, &runner, "two");

    assert_ne!(first.run_id, second.run_id);
    assert_ne!(first.trace_path, second.trace_path);
    let first_trace = load_trace(std::path::Path::new(&first.trace_path)).expect("first");
    let second_trace = load_trace(std::path::Path::new(&second.trace_path)).expect("second");
    assert_eq!(first_trace.user_message, "one");
    assert_eq!(second_trace.user_message, "two");
}

#[test]
fn non_delegating_agent_runs_a_single_turn() {
    let ws = workspace();
    let runner = ScriptedAgentRunner::new();
    runner.script(
        "writer",
        [
            ScriptedTurn::ok("hi there").with_session("prov-writer"),
            ScriptedTurn::ok("again"),
        ],
    );

    let first = run_with(&ws, &runner, "writer", "hello");
    let second = run_with(&ws, &runner, "writer", "hello again");

    assert!(first.orchestration.is_none());
    assert_eq!(first.execution.stdout, "hi there");
    assert_eq!(first.routing.target_agent_id, "writer");
    assert_eq!(second.execution.stdout, "again");

    let calls = runner.calls_for("writer");
    assert_eq!(calls[0].prompt, "hello");
    assert_eq!(calls[1].provider_session_id.as_deref(), Some("prov-writer"));
    assert!(calls[1].prompt.contains("hi there"));
    assert!(runner.calls_for(ORCHESTRATOR).is_empty());
}

#[test]
fn mention_routes_straight_to_the_delegate() {
    let ws = workspace();
    let runner = ScriptedAgentRunner::new();
    runner.script("writer", [ScriptedTurn::ok("on it")]);

    let routing = route_message(
        &ws.paths,
        &conductor::io::manifest::FsManifestSource,
        ORCHESTRATOR,
        "@writer draft a poem",
    )
    .expect("route");
    assert_eq!(routing.target_agent_id, "writer");
    assert_eq!(routing.rewritten_message, "draft a poem");

    let result = run(&ws, &runner, "@writer draft a poem");
    assert_eq!(result.entry_agent_id, ORCHESTRATOR);
    assert!(result.orchestration.is_none());
    assert_eq!(runner.calls_for("writer")[0].prompt, "draft a poem");
}

#[test]
fn blank_message_runs_nothing() {
    let ws = workspace();
    let runner = ScriptedAgentRunner::new();

    let result = run(&ws, &runner, "   ");

    assert_eq!(result.execution.code, 0);
    assert!(result.execution.stdout.is_empty());
    assert!(result.orchestration.is_none());
    assert!(runner.calls().is_empty());
    assert!(std::path::Path::new(&result.trace_path).is_file());
}

#[test]
fn install_skill_writes_skill_for_target_agent() {
    let ws = workspace();
    let runner = ScriptedAgentRunner::new();
    plan(
        &runner,
        vec![
            json!({
                "type": "install_skill",
                "skillName": "Release Notes",
                "targetAgentId": "writer",
                "description": "Write release notes",
                "content": "Group changes by area.",
            }),
            json!({ "type": "install_skill", "skillName": "x", "targetAgentId": "nobody" }),
            finish("installed"),
        ],
    );

    let result = run(&ws, &runner, "teach the writer");

    let trace = result.orchestration.as_ref().expect("orchestration trace");
    let io = trace.steps[0].artifact_io.as_ref().expect("skill io");
    assert_eq!(io.operation, ArtifactOperation::InstallSkill);
    let skill = fs::read_to_string(&io.resolved_path).expect("skill file");
    assert!(skill.contains("Group changes by area."));
    assert!(
        trace.steps[1]
            .note
            .as_deref()
            .is_some_and(|note| note.contains("unknown agent 'nobody'"))
    );
}
