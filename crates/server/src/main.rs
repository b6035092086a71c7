use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use server_api::ApiContext;
use shared::{
    domain::{GroupId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{ClientEvent, GroupMessagePayload, GroupSummary, PrivateMessagePayload, ServerEvent},
};
use storage::Storage;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

mod config;
mod presence;
mod realtime;

use config::{load_settings, normalize_database_url};
use presence::{ConnectionId, PresenceRegistry};
use realtime::{error_is_surfaced, MessageRouter};

struct AppState {
    api: ApiContext,
    registry: PresenceRegistry,
    router: MessageRouter,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatHistoryRequest {
    sender_id: UserId,
    recipient_id: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGroupRequest {
    group_name: String,
    member_ids: Vec<UserId>,
}

#[derive(Debug, Deserialize)]
struct GroupsQuery {
    user_id: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let api = ApiContext { storage };
    let registry = PresenceRegistry::new();
    let router = MessageRouter::new(api.clone(), registry.clone());
    let state = AppState {
        api,
        registry,
        router,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/chat/history", post(http_chat_history))
        .route("/groups", get(http_list_groups).post(http_create_group))
        .route("/groups/:group_id", delete(http_delete_group))
        .route("/groups/:group_id/messages", get(http_group_history))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn error_response(error: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match error.code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(error))
}

async fn http_chat_history(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatHistoryRequest>,
) -> Result<Json<Vec<PrivateMessagePayload>>, (StatusCode, Json<ApiError>)> {
    let messages = server_api::chat_history(&state.api, req.sender_id, req.recipient_id)
        .await
        .map_err(error_response)?;
    Ok(Json(messages))
}

async fn http_list_groups(
    State(state): State<Arc<AppState>>,
    Query(q): Query<GroupsQuery>,
) -> Result<Json<Vec<GroupSummary>>, (StatusCode, Json<ApiError>)> {
    let groups = server_api::list_groups(&state.api, UserId(q.user_id))
        .await
        .map_err(error_response)?;
    Ok(Json(groups))
}

async fn http_create_group(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<GroupSummary>), (StatusCode, Json<ApiError>)> {
    let group = server_api::create_group(&state.api, &req.group_name, &req.member_ids)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(group)))
}

async fn http_delete_group(
    State(state): State<Arc<AppState>>,
    Path(group_id): Path<i64>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    server_api::delete_group(&state.api, GroupId(group_id))
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_group_history(
    State(state): State<Arc<AppState>>,
    Path(group_id): Path<i64>,
) -> Result<Json<Vec<GroupMessagePayload>>, (StatusCode, Json<ApiError>)> {
    let messages = server_api::group_history(&state.api, GroupId(group_id))
        .await
        .map_err(error_response)?;
    Ok(Json(messages))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

/// One connection session: `anonymous` until a complete login, `identified`
/// while present in the registry, `closed` on any disconnect. A reconnect is
/// a brand-new session with a fresh connection id.
async fn ws_connection(state: Arc<AppState>, socket: axum::extract::ws::WebSocket) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let connection_id: ConnectionId = Uuid::new_v4();
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<ServerEvent>();
    state
        .registry
        .register_connection(connection_id, outbox_tx.clone())
        .await;

    let (mut sink, mut stream) = socket.split();
    let send_task = tokio::spawn(async move {
        while let Some(event) = outbox_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = stream.next().await {
        let Message::Text(text) = frame else {
            continue;
        };
        let event: ClientEvent = match serde_json::from_str(&text) {
            Ok(event) => event,
            Err(parse_error) => {
                warn!(%connection_id, %parse_error, "dropping malformed frame");
                continue;
            }
        };

        let surfaced = error_is_surfaced(&event);
        if let Err(failure) = state.router.dispatch(connection_id, event).await {
            if surfaced {
                let _ = outbox_tx.send(ServerEvent::Error(ApiError::from(failure)));
            } else {
                error!(%connection_id, %failure, "event handler failed");
            }
        }
    }

    // Network close, explicit logout, and tab close all land here; removal
    // from an anonymous session is a no-op.
    state.registry.record_disconnect(connection_id).await;
    send_task.abort();
}
