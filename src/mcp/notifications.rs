//! Dispatch of server-pushed notifications.
//!
//! Catalog invalidations trigger a refresh of that one catalog for that one server.
//! Log records are re-emitted through `tracing` and broadcast as
//! [`ClientEvent::ServerLog`]. Anything else is ignored.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::mcp::capabilities::CatalogKind;
use crate::mcp::connection::{ClientEvent, ConnectionManager};
use crate::mcp::types::{methods, JsonRpcNotification};

/// Parameters of `notifications/message`
#[derive(Debug, Clone, Deserialize)]
struct LogMessage {
    #[serde(default = "default_level")]
    level: String,
    #[serde(default)]
    logger: Option<String>,
    #[serde(default)]
    data: Value,
}

fn default_level() -> String {
    "info".to_string()
}

/// Routes one notification received from `server_id`.
///
/// Catalog refreshes run on their own task: the refresh waits for a response that is
/// delivered by the same event loop calling this function.
pub(crate) fn dispatch(
    manager: &ConnectionManager,
    server_id: &str,
    session: Uuid,
    notification: JsonRpcNotification,
) {
    if let Some(kind) = CatalogKind::from_notification(&notification.method) {
        schedule_refresh(manager, server_id, session, kind);
        return;
    }

    match notification.method.as_str() {
        methods::NOTIFICATION_MESSAGE => log_server_message(manager, server_id, notification.params),
        other => debug!("Ignoring notification '{}' from '{}'", other, server_id),
    }
}

fn schedule_refresh(manager: &ConnectionManager, server_id: &str, session: Uuid, kind: CatalogKind) {
    if !manager.is_current_and_connected(server_id, session) {
        debug!("Ignoring {} invalidation from inactive server '{}'", kind, server_id);
        return;
    }

    let manager = manager.clone();
    let server_id = server_id.to_string();
    tokio::spawn(async move {
        match manager.refresh_catalog(&server_id, kind).await {
            Ok(count) => debug!("Refreshed {} of '{}': {} entries", kind, server_id, count),
            Err(e) => warn!("Refreshing {} of '{}' failed: {}", kind, server_id, e),
        }
    });
}

fn log_server_message(manager: &ConnectionManager, server_id: &str, params: Option<Value>) {
    let message = match params.map(serde_json::from_value::<LogMessage>) {
        Some(Ok(message)) => message,
        Some(Err(e)) => {
            warn!("Malformed log notification from '{}': {}", server_id, e);
            return;
        }
        None => return,
    };

    let logger = message.logger.as_deref().unwrap_or("-");
    match message.level.as_str() {
        "debug" => debug!(server = %server_id, logger, "{}", message.data),
        "info" | "notice" => info!(server = %server_id, logger, "{}", message.data),
        "warning" => warn!(server = %server_id, logger, "{}", message.data),
        _ => error!(server = %server_id, logger, level = %message.level, "{}", message.data),
    }

    manager.emit(ClientEvent::ServerLog {
        server_id: server_id.to_string(),
        level: message.level,
        logger: message.logger,
        data: message.data,
    });
}
