//! Whole runs: scripted model, real local tools, real MCP server

mod common;

use std::sync::Arc;

use agent_toolkit::agent::{AbortReason, MAX_ITERATIONS_NOTICE};
use agent_toolkit::{AgentConfig, AgentLoop, LoopStatus, Toolset, Transcript};
use common::{call, mock_server, mock_server_with_args, ScriptedBackend};
use llm_core::{AssistantTurn, ChatMessage, Role};
use serde_json::json;
use tempfile::TempDir;

async fn agent_with_mock(
    backend: Arc<ScriptedBackend>,
    config: AgentConfig,
) -> (AgentLoop, Arc<agent_toolkit::mcp::McpManager>) {
    let toolset = Toolset::start(&[mock_server("srv")]).await.unwrap();
    let Toolset { router, mcp, .. } = toolset;
    (AgentLoop::new(backend, router, config), mcp)
}

fn tool_messages(messages: &[ChatMessage]) -> Vec<&ChatMessage> {
    messages.iter().filter(|m| m.role == Role::Tool).collect()
}

#[tokio::test]
async fn test_mixed_tools_keep_correlation() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("taken"), "not a directory").unwrap();

    let backend = ScriptedBackend::new(vec![
        AssistantTurn::with_tool_calls(vec![
            call("c1", "mkdir", json!({"path": "taken"})),
            call("c2", "srv_echo", json!({"text": "from mcp"})),
            call("c3", "srv_fail", json!({})),
            call("c4", "no_such_tool", json!({})),
            call("c5", "srv_echo", json!({"text": 7})),
        ]),
        AssistantTurn::text("all done"),
    ]);
    let config = AgentConfig::new().with_working_dir(dir.path().to_path_buf());
    let (agent, mcp) = agent_with_mock(backend.clone(), config).await;

    let outcome = agent.run("try everything").await;
    mcp.stop_all().await.unwrap();

    assert!(outcome.is_done());
    assert_eq!(outcome.answer, "all done");
    assert_eq!(backend.call_count(), 2);

    let mut transcript = Transcript::new("scripted");
    transcript.replace_messages(outcome.messages.clone());
    transcript.validate().unwrap();

    let results = tool_messages(&outcome.messages);
    let ids: Vec<&str> = results.iter().filter_map(|m| m.tool_call_id.as_deref()).collect();
    assert_eq!(ids, vec!["c1", "c2", "c3", "c4", "c5"]);

    assert!(results[0].text_content().starts_with("Error: Cannot create directory"));
    assert!(dir.path().join("taken").is_file());
    assert_eq!(results[1].text_content(), "from mcp");
    assert_eq!(results[2].text_content(), "Error: requested failure");
    assert!(results[3].text_content().contains("Unknown tool"));
    assert!(results[4].text_content().contains("Invalid arguments"));

    // MCP tools are offered after the built-in ones
    let offered = &backend.offered_tools()[0];
    assert_eq!(offered[0], "list_files");
    assert!(offered.contains(&"srv_slow".to_string()));
}

#[tokio::test]
async fn test_server_exit_mid_run_becomes_tool_error() {
    let backend = ScriptedBackend::new(vec![
        AssistantTurn::with_tool_calls(vec![call("c1", "srv_echo", json!({"text": "once"}))]),
        AssistantTurn::with_tool_calls(vec![call("c2", "srv_echo", json!({"text": "twice"}))]),
        AssistantTurn::text("carried on"),
    ]);
    let toolset = Toolset::start(&[mock_server_with_args("srv", &["--exit-after", "1"])])
        .await
        .unwrap();
    let Toolset { router, mcp, .. } = toolset;
    let agent = AgentLoop::new(backend.clone(), router, AgentConfig::new());

    let outcome = agent.run("call it twice").await;
    mcp.stop_all().await.unwrap();

    assert!(outcome.is_done());
    assert_eq!(outcome.answer, "carried on");
    assert_eq!(backend.call_count(), 3);

    let mut transcript = Transcript::new("scripted");
    transcript.replace_messages(outcome.messages.clone());
    transcript.validate().unwrap();

    let results = tool_messages(&outcome.messages);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].text_content(), "once");
    assert_eq!(results[1].tool_call_id.as_deref(), Some("c2"));
    assert!(results[1].text_content().starts_with("Error:"));
}

#[tokio::test]
async fn test_results_follow_emitted_order() {
    for parallel in [false, true] {
        let backend = ScriptedBackend::new(vec![
            AssistantTurn::with_tool_calls(vec![
                call("a", "srv_echo", json!({"text": "first"})),
                call("b", "srv_slow", json!({"ms": 400, "text": "second"})),
                call("c", "srv_echo", json!({"text": "third"})),
            ]),
            AssistantTurn::text("ordered"),
        ]);
        let config = AgentConfig::new().with_parallel_tool_calls(parallel);
        let (agent, mcp) = agent_with_mock(backend, config).await;

        let outcome = agent.run("order please").await;
        mcp.stop_all().await.unwrap();

        let results = tool_messages(&outcome.messages);
        let pairs: Vec<(&str, &str)> = results
            .iter()
            .map(|m| (m.tool_call_id.as_deref().unwrap_or(""), m.text_content()))
            .collect();
        assert_eq!(
            pairs,
            vec![("a", "first"), ("b", "second"), ("c", "third")],
            "parallel = {parallel}"
        );
    }
}

#[tokio::test]
async fn test_single_iteration_budget() {
    let backend = ScriptedBackend::new(vec![
        AssistantTurn {
            content: Some("halfway there".to_string()),
            tool_calls: vec![call("a", "srv_echo", json!({"text": "x"}))],
        },
        AssistantTurn::text("never reached"),
    ]);
    let config = AgentConfig::new().with_max_iterations(1).with_stream(false);
    let (agent, mcp) = agent_with_mock(backend.clone(), config).await;

    let outcome = agent.run("one shot").await;
    mcp.stop_all().await.unwrap();

    assert_eq!(backend.call_count(), 1);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.status, LoopStatus::Aborted(AbortReason::MaxIterationsExceeded));
    assert_eq!(outcome.answer, format!("halfway there\n\n{}", MAX_ITERATIONS_NOTICE));

    let mut transcript = Transcript::new("scripted");
    transcript.replace_messages(outcome.messages);
    transcript.validate().unwrap();
}

#[tokio::test]
async fn test_saved_transcript_continues() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("messages.json");

    let backend = ScriptedBackend::new(vec![
        AssistantTurn::with_tool_calls(vec![call("", "srv_echo", json!({"text": "ping"}))]),
        AssistantTurn::text("first answer"),
        AssistantTurn::text("second answer"),
    ]);
    let (agent, mcp) = agent_with_mock(backend.clone(), AgentConfig::new()).await;

    let first = agent.run("first question").await;
    let mut transcript = Transcript::new("scripted");
    transcript.replace_messages(first.messages);
    transcript.save(&path).unwrap();

    let loaded = Transcript::load(&path).unwrap();
    loaded.validate().unwrap();
    assert_eq!(loaded.title, "first question");

    let second = agent
        .continue_conversation(loaded.messages.clone(), "second question")
        .await;
    mcp.stop_all().await.unwrap();

    assert_eq!(second.answer, "second answer");
    assert_eq!(second.messages.len(), loaded.messages.len() + 2);
    assert_eq!(second.messages.iter().filter(|m| m.role == Role::System).count(), 1);

    // The backend-less call got an id, and its result points at it
    let assistant = second.messages.iter().find(|m| m.has_tool_calls()).unwrap();
    let id = &assistant.tool_calls.as_ref().unwrap()[0].id;
    assert!(!id.is_empty());
    assert_eq!(tool_messages(&second.messages)[0].tool_call_id.as_ref(), Some(id));
}
