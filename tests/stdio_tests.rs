use mcp_hub::mcp::transport::StdioConfig;
use mcp_hub::{
    CatalogKind, ClientEvent, ConnectionManager, ConnectionState, McpError, McpResult,
    ServerConfig, ServerManager, TransportConfig,
};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

fn mock_server_config() -> ServerConfig {
    ServerConfig::new(TransportConfig::Stdio(StdioConfig {
        command: env!("CARGO_BIN_EXE_mock_server").to_string(),
        args: Vec::new(),
        env: HashMap::new(),
    }))
    .with_name("Mock")
}

#[tokio::test]
async fn test_stdio_round_trip() -> McpResult<()> {
    let manager = ConnectionManager::default();
    let snapshot = timeout(TEST_TIMEOUT, manager.connect("mock", mock_server_config()))
        .await
        .expect("connect timed out")?;

    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert_eq!(snapshot.name, "Mock");
    assert_eq!(
        snapshot.server_info.as_ref().map(|info| info.name.as_str()),
        Some("mock-server")
    );
    assert!(snapshot.flags.tools && snapshot.flags.resources && snapshot.flags.prompts);
    assert!(snapshot.flags.sampling);

    let tools: Vec<String> = manager
        .get_available_tools()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(tools, vec!["add_tool", "echo", "fail"]);

    let echoed = manager.call_tool("echo", json!({"text": "hello"})).await?;
    assert_eq!(echoed["content"][0]["text"], "hello");

    match manager.call_tool("fail", json!({})).await {
        Err(McpError::RemoteOperationFailed { code, .. }) => assert_eq!(code, -32000),
        other => panic!("unexpected {:?}", other),
    }

    let resource = manager.read_resource("mock://readme").await?;
    assert_eq!(resource["contents"][0]["text"], "hello from mock");

    let prompt = manager
        .get_prompt("greeting", Some(json!({"who": "tests"})))
        .await?;
    assert_eq!(prompt["messages"][0]["content"]["text"], "Hello, tests!");

    let sampled = manager
        .request_sampling("mock", json!({"messages": [], "maxTokens": 5}))
        .await?;
    assert_eq!(sampled["model"], "mock");

    manager.disconnect("mock").await?;
    assert!(manager.get_available_tools().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_stdio_tool_list_change_triggers_refresh() -> McpResult<()> {
    let manager = ConnectionManager::default();
    timeout(TEST_TIMEOUT, manager.connect("mock", mock_server_config()))
        .await
        .expect("connect timed out")?;
    let mut events = manager.subscribe();

    manager
        .call_tool("add_tool", json!({"name": "fresh"}))
        .await?;

    let mut saw_log = false;
    timeout(TEST_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(ClientEvent::CatalogUpdated {
                    server_id,
                    kind: CatalogKind::Tools,
                    count,
                }) => {
                    assert_eq!(server_id, "mock");
                    assert_eq!(count, 4);
                    break;
                }
                Ok(ClientEvent::ServerLog { server_id, .. }) => {
                    assert_eq!(server_id, "mock");
                    saw_log = true;
                }
                Ok(_) => {}
                Err(e) => panic!("event stream failed: {}", e),
            }
        }
    })
    .await
    .expect("no catalog refresh");

    assert!(manager
        .get_available_tools()
        .iter()
        .any(|tool| tool.name == "fresh" && tool.server_id == "mock"));

    // The log notification precedes the refresh response on the wire
    if !saw_log {
        let event = timeout(TEST_TIMEOUT, events.recv()).await.expect("no log event");
        assert!(matches!(event, Ok(ClientEvent::ServerLog { .. })));
    }

    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_missing_command_fails_connect() {
    let manager = ConnectionManager::default();
    let config = ServerConfig::new(TransportConfig::Stdio(StdioConfig {
        command: "definitely-not-a-real-binary-mcp".to_string(),
        args: Vec::new(),
        env: HashMap::new(),
    }));

    let err = manager.connect("ghost", config).await.unwrap_err();
    assert!(matches!(err, McpError::ConnectionFailed(_)));
    let snapshot = manager.server("ghost").unwrap();
    assert_eq!(snapshot.state, ConnectionState::Error);
    assert!(snapshot.last_error.is_some());
}

#[tokio::test]
async fn test_server_manager_starts_configured_mock() -> McpResult<()> {
    let yaml = format!(
        "mcp:\n  servers:\n    mock:\n      command: \"{}\"\n",
        env!("CARGO_BIN_EXE_mock_server")
    );
    let settings = mcp_hub::config::parse_settings(&yaml)?;
    let manager = ServerManager::from_settings(settings).await?;

    let failures = timeout(TEST_TIMEOUT, manager.start_all())
        .await
        .expect("start timed out");
    assert!(failures.is_empty());
    assert!(manager.is_server_connected("mock"));
    assert_eq!(manager.connected_server_count(), 1);

    manager.stop_server("mock").await?;
    assert!(!manager.is_server_connected("mock"));
    Ok(())
}
