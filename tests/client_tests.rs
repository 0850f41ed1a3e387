use mcp_hub::mcp::connection::{ClientConfig, ClientEvent, ConnectionManager};
use mcp_hub::mcp::lifecycle::{ConnectionState, Root};
use mcp_hub::mcp::transport::memory::{MemoryPeer, MemoryTransport};
use mcp_hub::mcp::types::{
    methods, JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, RequestId,
};
use mcp_hub::{CatalogKind, McpError, ServerSnapshot};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// What a scripted server answers; `None` catalogs answer with "method not found"
#[derive(Clone)]
struct Script {
    capabilities: Value,
    tools: Arc<Mutex<Option<Value>>>,
    resources: Option<Value>,
    prompts: Option<Value>,
}

impl Script {
    fn tools(tools: Value) -> Self {
        Self {
            capabilities: json!({"tools": {}}),
            tools: Arc::new(Mutex::new(Some(json!({ "tools": tools })))),
            resources: None,
            prompts: None,
        }
    }

    fn set_tools(&self, tools: Value) {
        *self.tools.lock().unwrap() = Some(json!({ "tools": tools }));
    }
}

/// A scripted server on the far side of an in-memory transport. Catalog and handshake
/// requests are answered automatically; everything else is forwarded to `inbox`.
struct FakeServer {
    peer: Arc<MemoryPeer>,
    inbox: mpsc::UnboundedReceiver<JsonRpcMessage>,
}

impl FakeServer {
    async fn next_request(&mut self) -> JsonRpcRequest {
        match timeout(TEST_TIMEOUT, self.inbox.recv()).await {
            Ok(Some(JsonRpcMessage::Request(request))) => request,
            other => panic!("expected a forwarded request, got {:?}", other),
        }
    }

    fn respond(&self, id: RequestId, result: Value) {
        assert!(self.peer.respond(id, result));
    }
}

fn answer(payload: &Option<Value>, request: &JsonRpcRequest) -> JsonRpcResponse {
    match payload {
        Some(result) => JsonRpcResponse::success(result.clone(), request.id.clone()),
        None => JsonRpcResponse::error(
            JsonRpcError::method_not_found(&request.method),
            request.id.clone(),
        ),
    }
}

fn spawn_server(peer: MemoryPeer, script: Script) -> FakeServer {
    let peer = Arc::new(peer);
    let (forward, inbox) = mpsc::unbounded_channel();
    let server_peer = peer.clone();
    tokio::spawn(async move {
        while let Some(message) = server_peer.recv().await {
            let request = match message {
                JsonRpcMessage::Request(request) => request,
                JsonRpcMessage::Notification(_) => continue,
                other => {
                    let _ = forward.send(other);
                    continue;
                }
            };
            let response = match request.method.as_str() {
                methods::INITIALIZE => JsonRpcResponse::success(
                    json!({
                        "protocolVersion": "2024-11-05",
                        "capabilities": script.capabilities,
                        "serverInfo": {"name": "fake", "version": "1.0"}
                    }),
                    request.id.clone(),
                ),
                methods::TOOLS_LIST => {
                    let tools = script.tools.lock().unwrap().clone();
                    answer(&tools, &request)
                }
                methods::RESOURCES_LIST => answer(&script.resources, &request),
                methods::PROMPTS_LIST => answer(&script.prompts, &request),
                _ => {
                    let _ = forward.send(JsonRpcMessage::Request(request));
                    continue;
                }
            };
            server_peer.push(response);
        }
    });
    FakeServer { peer, inbox }
}

async fn connect_fake(
    manager: &ConnectionManager,
    id: &str,
    script: Script,
) -> (ServerSnapshot, FakeServer) {
    let (channel, peer) = MemoryTransport::pair();
    let server = spawn_server(peer, script);
    let snapshot = timeout(TEST_TIMEOUT, manager.connect_with_transport(id, channel))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    (snapshot, server)
}

fn tool_names(manager: &ConnectionManager) -> Vec<(String, String)> {
    manager
        .get_available_tools()
        .into_iter()
        .map(|tool| (tool.name, tool.server_id))
        .collect()
}

#[tokio::test]
async fn test_connect_list_and_disconnect_demo() {
    let manager = ConnectionManager::default();
    let (snapshot, _server) =
        connect_fake(&manager, "demo", Script::tools(json!([{"name": "echo"}]))).await;

    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert!(snapshot.flags.tools);
    assert_eq!(
        tool_names(&manager),
        vec![("echo".to_string(), "demo".to_string())]
    );

    manager.disconnect("demo").await.unwrap();
    assert!(manager.get_available_tools().is_empty());
    assert!(manager.servers().is_empty());
}

#[tokio::test]
async fn test_missing_tool_is_not_found_without_sending() {
    let manager = ConnectionManager::default();
    let (_, mut server) =
        connect_fake(&manager, "demo", Script::tools(json!([{"name": "echo"}]))).await;

    let err = manager
        .call_tool("missing-tool", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::NotFound(_)));
    assert_eq!(err.code(), McpError::NotFound(String::new()).code());
    assert!(server.inbox.try_recv().is_err());
}

#[tokio::test]
async fn test_call_tool_returns_result_verbatim() {
    let manager = ConnectionManager::default();
    let (_, mut server) =
        connect_fake(&manager, "demo", Script::tools(json!([{"name": "echo"}]))).await;

    let call = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.call_tool("echo", json!({"text": "hi"})).await })
    };
    let request = server.next_request().await;
    assert_eq!(request.method, methods::TOOLS_CALL);
    assert_eq!(
        request.params,
        Some(json!({"name": "echo", "arguments": {"text": "hi"}}))
    );

    let result = json!({"content": [{"type": "text", "text": "hi"}], "isError": false});
    server.respond(request.id, result.clone());
    assert_eq!(call.await.unwrap().unwrap(), result);
}

#[tokio::test]
async fn test_remote_error_is_remote_operation_failed() {
    let manager = ConnectionManager::default();
    let (_, mut server) =
        connect_fake(&manager, "demo", Script::tools(json!([{"name": "echo"}]))).await;

    let call = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.call_tool("echo", json!({})).await })
    };
    let request = server.next_request().await;
    server.peer.push(JsonRpcResponse::error(
        JsonRpcError::new(-32000, "boom", Some(json!({"detail": 1}))),
        request.id,
    ));

    match call.await.unwrap() {
        Err(McpError::RemoteOperationFailed {
            code,
            message,
            data,
        }) => {
            assert_eq!(code, -32000);
            assert_eq!(message, "boom");
            assert_eq!(data, Some(json!({"detail": 1})));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(manager.server("demo").unwrap().is_connected());
}

#[tokio::test]
async fn test_timeout_then_late_response_has_no_effect() {
    let manager = ConnectionManager::default();
    let (_, mut server) =
        connect_fake(&manager, "demo", Script::tools(json!([{"name": "echo"}]))).await;
    let mut events = manager.subscribe();

    tokio::time::pause();
    let call = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.call_tool("echo", json!({})).await })
    };
    let request = server.next_request().await;
    tokio::time::advance(Duration::from_secs(31)).await;

    match call.await.unwrap() {
        Err(McpError::RequestTimeout { id, method }) => {
            assert_eq!(id, request.id.key());
            assert_eq!(method, methods::TOOLS_CALL);
        }
        other => panic!("unexpected {:?}", other),
    }

    server.respond(request.id, json!({"late": true}));
    tokio::task::yield_now().await;
    assert!(events.try_recv().is_err());

    // The connection keeps working after the timeout
    let second = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.call_tool("echo", json!({})).await })
    };
    let request = server.next_request().await;
    server.respond(request.id, json!("second"));
    assert_eq!(second.await.unwrap().unwrap(), json!("second"));
}

#[tokio::test]
async fn test_out_of_order_responses_reach_their_callers() {
    let manager = ConnectionManager::default();
    let (_, mut server) = connect_fake(
        &manager,
        "demo",
        Script::tools(json!([{"name": "a"}, {"name": "b"}])),
    )
    .await;

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.call_tool("a", json!({})).await })
    };
    let request_a = server.next_request().await;
    let second = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.call_tool("b", json!({})).await })
    };
    let request_b = server.next_request().await;

    server.respond(request_b.id, json!("from b"));
    server.respond(request_a.id, json!("from a"));

    assert_eq!(first.await.unwrap().unwrap(), json!("from a"));
    assert_eq!(second.await.unwrap().unwrap(), json!("from b"));
}

#[tokio::test]
async fn test_response_from_wrong_server_is_ignored() {
    let manager = ConnectionManager::default();
    let (_, mut server_a) = connect_fake(&manager, "a", Script::tools(json!([{"name": "ta"}]))).await;
    let (_, mut server_b) = connect_fake(&manager, "b", Script::tools(json!([{"name": "tb"}]))).await;

    let call = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.call_tool("ta", json!({})).await })
    };
    let request = server_a.next_request().await;

    // b answers a's request, then a ping flushes b's event loop
    server_b.respond(request.id.clone(), json!({"from": "b"}));
    server_b
        .peer
        .push(JsonRpcRequest::new(methods::PING, None, RequestId::Number(99)));
    match timeout(TEST_TIMEOUT, server_b.inbox.recv()).await.unwrap() {
        Some(JsonRpcMessage::Response(response)) => assert_eq!(response.id, RequestId::Number(99)),
        other => panic!("unexpected {:?}", other),
    }
    assert!(!call.is_finished());

    server_a.respond(request.id, json!({"from": "a"}));
    let result = timeout(TEST_TIMEOUT, call).await.unwrap().unwrap().unwrap();
    assert_eq!(result, json!({"from": "a"}));
}

#[tokio::test]
async fn test_close_during_handshake_fails_connect_promptly() {
    let manager = ConnectionManager::default();
    let (channel, peer) = MemoryTransport::pair();

    let connect = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect_with_transport("flaky", channel).await })
    };
    let Some(JsonRpcMessage::Request(init)) = peer.recv().await else {
        panic!("expected initialize");
    };
    assert_eq!(init.method, methods::INITIALIZE);
    peer.close();

    let outcome = timeout(Duration::from_secs(1), connect)
        .await
        .expect("connect kept waiting on a closed channel")
        .unwrap();
    assert!(matches!(outcome, Err(McpError::ConnectionClosed(_))));

    let snapshot = manager.server("flaky").unwrap();
    assert_eq!(snapshot.state, ConnectionState::Error);
    assert!(snapshot.last_error.is_some());
    assert!(manager.get_available_tools().is_empty());
}

#[tokio::test]
async fn test_probe_error_clears_flag() {
    let manager = ConnectionManager::default();
    let mut script = Script::tools(json!([]));
    script.prompts = Some(json!({"prompts": []}));
    let (snapshot, _server) = connect_fake(&manager, "demo", script).await;

    assert!(snapshot.flags.tools);
    assert!(!snapshot.flags.resources);
    assert!(snapshot.flags.prompts);
    assert!(snapshot.is_connected());
}

#[tokio::test]
async fn test_not_connected_server_gets_no_messages() {
    let manager = ConnectionManager::default();
    let (channel, peer) = MemoryTransport::pair();

    let connect = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect_with_transport("slow", channel).await })
    };

    // Handshake
    let Some(JsonRpcMessage::Request(init)) = peer.recv().await else {
        panic!("expected initialize");
    };
    peer.respond(
        init.id,
        json!({"protocolVersion": "2024-11-05", "capabilities": {"sampling": {}}}),
    );
    assert!(matches!(peer.recv().await, Some(JsonRpcMessage::Notification(_))));

    // Probes, then the catalog loads; the resource load is held back
    let mut probed_resources = false;
    let mut held = None;
    for _ in 0..5 {
        let Some(JsonRpcMessage::Request(request)) = peer.recv().await else {
            panic!("expected a catalog request");
        };
        match request.method.as_str() {
            methods::TOOLS_LIST => {
                peer.respond(request.id, json!({"tools": [{"name": "echo"}]}));
            }
            methods::RESOURCES_LIST if !probed_resources => {
                probed_resources = true;
                peer.respond(request.id, json!({"resources": []}));
            }
            methods::RESOURCES_LIST => held = Some(request),
            _ => {
                peer.push(JsonRpcResponse::error(
                    JsonRpcError::method_not_found(&request.method),
                    request.id,
                ));
            }
        }
    }
    let held = held.expect("resource load was not sent");

    // Catalog visible, server still connecting
    timeout(TEST_TIMEOUT, async {
        while manager.get_available_tools().is_empty() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(
        manager.server("slow").unwrap().state,
        ConnectionState::Connecting
    );
    assert!(matches!(
        manager.call_tool("echo", json!({})).await,
        Err(McpError::ServerNotConnected(_))
    ));
    assert!(matches!(
        manager.request_sampling("slow", json!({})).await,
        Err(McpError::ServerNotConnected(_))
    ));
    assert!(peer.try_recv().await.is_none());

    peer.respond(held.id, json!({"resources": []}));
    let snapshot = connect.await.unwrap().unwrap();
    assert!(snapshot.flags.sampling);
    assert!(snapshot.flags.resources);
}

#[tokio::test]
async fn test_refresh_only_touches_notifying_server() {
    let manager = ConnectionManager::default();
    let script_a = Script::tools(json!([{"name": "a1"}, {"name": "a2"}]));
    let (_, server_a) = connect_fake(&manager, "a", script_a.clone()).await;
    let (_, _server_b) = connect_fake(&manager, "b", Script::tools(json!([{"name": "b1"}]))).await;
    let mut events = manager.subscribe();

    script_a.set_tools(json!([{"name": "a3"}]));
    assert!(server_a.peer.notify(methods::TOOLS_UPDATED, None));

    let event = timeout(TEST_TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert_eq!(
        event,
        ClientEvent::CatalogUpdated {
            server_id: "a".to_string(),
            kind: CatalogKind::Tools,
            count: 1
        }
    );
    assert_eq!(
        tool_names(&manager),
        vec![
            ("a3".to_string(), "a".to_string()),
            ("b1".to_string(), "b".to_string())
        ]
    );
}

#[tokio::test]
async fn test_disconnect_keeps_other_servers_descriptors() {
    let manager = ConnectionManager::default();
    let mut script_a = Script::tools(json!([{"name": "a1"}]));
    script_a.resources = Some(json!({"resources": [{"uri": "file:///a"}]}));
    let (_, _a) = connect_fake(&manager, "a", script_a).await;
    let mut script_b = Script::tools(json!([{"name": "b1"}]));
    script_b.prompts = Some(json!({"prompts": [{"name": "p"}]}));
    let (_, _b) = connect_fake(&manager, "b", script_b).await;

    manager.disconnect("a").await.unwrap();
    assert_eq!(
        tool_names(&manager),
        vec![("b1".to_string(), "b".to_string())]
    );
    assert!(manager.get_available_resources().is_empty());
    assert_eq!(manager.get_available_prompts()[0].server_id, "b");
    assert!(matches!(
        manager.disconnect("a").await,
        Err(McpError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_sampling_requires_capability() {
    let manager = ConnectionManager::default();
    let (_, _plain) = connect_fake(&manager, "plain", Script::tools(json!([]))).await;
    let mut sampling = Script::tools(json!([]));
    sampling.capabilities = json!({"tools": {}, "sampling": {}});
    let (_, mut sampler) = connect_fake(&manager, "sampler", sampling).await;

    assert!(matches!(
        manager.request_sampling("plain", json!({})).await,
        Err(McpError::CapabilityUnsupported { .. })
    ));
    assert!(matches!(
        manager.request_sampling("nobody", json!({})).await,
        Err(McpError::NotFound(_))
    ));

    let call = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .request_sampling("sampler", json!({"messages": [], "maxTokens": 10}))
                .await
        })
    };
    let request = sampler.next_request().await;
    assert_eq!(request.method, methods::SAMPLING_CREATE_MESSAGE);
    sampler.respond(request.id, json!({"role": "assistant"}));
    assert_eq!(call.await.unwrap().unwrap(), json!({"role": "assistant"}));
}

#[tokio::test]
async fn test_server_close_keeps_entry_and_pending_by_default() {
    let manager = ConnectionManager::default();
    let (_, mut server) =
        connect_fake(&manager, "demo", Script::tools(json!([{"name": "echo"}]))).await;
    let mut events = manager.subscribe();

    let call = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.call_tool("echo", json!({})).await })
    };
    server.next_request().await;
    server.peer.close();

    let event = timeout(TEST_TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert_eq!(
        event,
        ClientEvent::StateChanged {
            server_id: "demo".to_string(),
            state: ConnectionState::Disconnected
        }
    );
    assert_eq!(
        manager.server("demo").unwrap().state,
        ConnectionState::Disconnected
    );
    assert!(manager.get_available_tools().is_empty());
    assert!(!call.is_finished());
    call.abort();
}

#[tokio::test]
async fn test_fail_pending_on_disconnect() {
    let manager = ConnectionManager::new(ClientConfig {
        fail_pending_on_disconnect: true,
        ..ClientConfig::default()
    });
    let (_, mut server) =
        connect_fake(&manager, "demo", Script::tools(json!([{"name": "echo"}]))).await;

    let call = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.call_tool("echo", json!({})).await })
    };
    server.next_request().await;
    server.peer.close();

    let outcome = timeout(TEST_TIMEOUT, call).await.unwrap().unwrap();
    assert!(matches!(outcome, Err(McpError::ConnectionClosed(_))));
}

#[tokio::test]
async fn test_roots_list_is_answered_from_config() {
    let manager = ConnectionManager::new(ClientConfig {
        roots: vec![Root {
            uri: "file:///workspace".to_string(),
            name: Some("workspace".to_string()),
        }],
        ..ClientConfig::default()
    });
    let (_, mut server) = connect_fake(&manager, "demo", Script::tools(json!([]))).await;

    server
        .peer
        .push(JsonRpcRequest::new(methods::ROOTS_LIST, None, RequestId::Number(7)));
    match timeout(TEST_TIMEOUT, server.inbox.recv()).await.unwrap() {
        Some(JsonRpcMessage::Response(response)) => {
            assert_eq!(response.id, RequestId::Number(7));
            assert_eq!(
                response.result,
                Some(json!({"roots": [{"uri": "file:///workspace", "name": "workspace"}]}))
            );
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_shutdown_clears_everything() {
    let manager = ConnectionManager::default();
    let (_, _a) = connect_fake(&manager, "a", Script::tools(json!([{"name": "x"}]))).await;
    let (_, _b) = connect_fake(&manager, "b", Script::tools(json!([{"name": "y"}]))).await;

    manager.shutdown().await;
    assert!(manager.servers().is_empty());
    assert!(manager.get_available_tools().is_empty());
}
