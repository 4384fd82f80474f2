use std::str::FromStr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use seisami_core::models::{Board, Card, Column, ExportedData, Transcription};
use seisami_core::sync::PushReceipt;
use seisami_core::{Operation, SyncState, TableName, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, extract_query_token, AuthenticatedUser, JwtVerifier};
use crate::cloud::CloudStore;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::hub::{HubClient, NotificationHub};
use crate::rate_limit::{
    user_fingerprint, EndpointRateLimiter, ProtectedEndpoint, RateLimitMetricsSnapshot,
};
use crate::rooms::{RoomManager, RoomSession};
use crate::ws::{serve_socket, SocketSettings};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    jwt_verifier: Arc<JwtVerifier>,
    cloud: Arc<CloudStore>,
    hub: NotificationHub,
    rooms: Arc<RoomManager>,
    endpoint_rate_limiter: Arc<EndpointRateLimiter>,
}

impl AppState {
    pub fn from_config(config: Arc<AppConfig>, hub: NotificationHub) -> Self {
        Self {
            jwt_verifier: Arc::new(JwtVerifier::new(&config)),
            cloud: Arc::new(CloudStore::new(config.data_dir.clone())),
            hub,
            rooms: Arc::new(RoomManager::default()),
            endpoint_rate_limiter: Arc::new(EndpointRateLimiter::from_config(config.as_ref())),
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/sync/upload", post(upload_operation))
        .route("/sync/pull/{table}", get(pull_operations))
        .route("/sync/pull/{table}/{record_id}", get(pull_record))
        .route("/sync/state", post(update_sync_state))
        .route("/sync/state/{table}", get(get_sync_state))
        .route("/sync/init", post(initialize_sync_state))
        .route("/sync/board", post(upsert_board))
        .route("/sync/column", post(upsert_column))
        .route("/sync/card", post(upsert_card))
        .route("/sync/transcription", post(upsert_transcription))
        .route("/sync/export", get(export_all))
        .route("/sync/ws", get(sync_socket))
        .route("/rooms/ws", get(room_socket))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    connected_clients: usize,
    rooms: usize,
    open_stores: usize,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        connected_clients: state.hub.connected_users().await,
        rooms: state.rooms.room_count(),
        open_stores: state.cloud.open_count().await,
        rate_limit: state.endpoint_rate_limiter.metrics_snapshot(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request_token(&request)?;
    let user = state.jwt_verifier.verify_access_token(&token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

fn request_token(request: &Request) -> Result<String, AppError> {
    match extract_bearer_token(request.headers()) {
        Ok(token) => Ok(token.to_string()),
        Err(error) if is_websocket_upgrade(request.headers()) => {
            extract_query_token(request.uri().query()).ok_or(error)
        }
        Err(error) => Err(error),
    }
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::bad_request(rejection.body_text()))
}

fn parse_table(table: &str) -> Result<TableName, AppError> {
    Ok(TableName::from_str(table)?)
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: String,
}

impl MessageResponse {
    fn created(message: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            StatusCode::CREATED,
            Json(Self {
                message: message.into(),
            }),
        )
    }
}

async fn upload_operation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Result<Json<Operation>, JsonRejection>,
) -> Result<(StatusCode, Json<PushReceipt>), AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncWrite, &user.user_id)
        .await?;

    let operation = json_body(payload)?;
    operation.validate()?;

    let store = state.cloud.store_for(&user.user_id).await?;
    let inserted = store.apply_remote_operation(&operation).await?;
    if inserted {
        let origin = Some(operation.device_id.as_str()).filter(|device| !device.is_empty());
        state
            .hub
            .notify(&user.user_id, operation.table_name, origin);
    }

    tracing::info!(
        endpoint = "sync_upload",
        user = user_fingerprint(&user.user_id),
        session = user.session_id.as_deref().unwrap_or("none"),
        table = %operation.table_name,
        operation = %operation.operation_type,
        inserted,
        "Stored operation"
    );
    Ok((StatusCode::CREATED, Json(PushReceipt::stored(&operation))))
}

#[derive(Debug, Deserialize)]
struct PullQuery {
    since: Option<String>,
}

#[derive(Debug, Serialize)]
struct PullResponse {
    table: TableName,
    count: usize,
    operations: Vec<Operation>,
}

async fn pull_operations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(table): Path<String>,
    Query(query): Query<PullQuery>,
) -> Result<Json<PullResponse>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncRead, &user.user_id)
        .await?;

    let table = parse_table(&table)?;
    let since = query
        .since
        .as_deref()
        .map(str::trim)
        .filter(|since| !since.is_empty())
        .map(Timestamp::parse)
        .transpose()?;

    let store = state.cloud.store_for(&user.user_id).await?;
    let operations = match since {
        Some(since) => store.operations_since(table, since).await?,
        None => store.all_operations(table).await?,
    };

    tracing::debug!(
        endpoint = "sync_pull",
        user = user_fingerprint(&user.user_id),
        table = %table,
        count = operations.len(),
        "Served operations"
    );
    Ok(Json(PullResponse {
        table,
        count: operations.len(),
        operations,
    }))
}

#[derive(Debug, Serialize)]
struct PullRecordResponse {
    operation: Operation,
}

async fn pull_record(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((table, record_id)): Path<(String, String)>,
) -> Result<Json<PullRecordResponse>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncRead, &user.user_id)
        .await?;

    let table = parse_table(&table)?;
    let store = state.cloud.store_for(&user.user_id).await?;
    let operation = store
        .latest_operation(table, &record_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("no operations for {table}/{record_id}")))?;
    Ok(Json(PullRecordResponse { operation }))
}

#[derive(Debug, Serialize)]
struct SyncStateResponse {
    data: SyncState,
}

async fn get_sync_state(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(table): Path<String>,
) -> Result<Json<SyncStateResponse>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncRead, &user.user_id)
        .await?;

    let table = parse_table(&table)?;
    let store = state.cloud.store_for(&user.user_id).await?;
    let data = store
        .sync_state(table)
        .await?
        .ok_or_else(|| AppError::not_found(format!("no sync state for {table}")))?;
    Ok(Json(SyncStateResponse { data }))
}

async fn update_sync_state(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Result<Json<SyncState>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncWrite, &user.user_id)
        .await?;

    let sync_state = json_body(payload)?;
    let store = state.cloud.store_for(&user.user_id).await?;
    store.put_sync_state(&sync_state).await?;
    Ok(Json(MessageResponse {
        message: format!("sync state updated for {}", sync_state.table_name),
    }))
}

async fn initialize_sync_state(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncWrite, &user.user_id)
        .await?;

    let store = state.cloud.store_for(&user.user_id).await?;
    store.initialize_sync_states().await?;
    Ok(MessageResponse::created("sync state initialized"))
}

async fn upsert_board(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Result<Json<Board>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncWrite, &user.user_id)
        .await?;

    let board = json_body(payload)?;
    let store = state.cloud.store_for(&user.user_id).await?;
    store.import_board(&board).await?;
    Ok(MessageResponse::created("board saved"))
}

async fn upsert_column(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Result<Json<Column>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncWrite, &user.user_id)
        .await?;

    let column = json_body(payload)?;
    let store = state.cloud.store_for(&user.user_id).await?;
    store.import_column(&column).await?;
    Ok(MessageResponse::created("column saved"))
}

async fn upsert_card(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Result<Json<Card>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncWrite, &user.user_id)
        .await?;

    let card = json_body(payload)?;
    let store = state.cloud.store_for(&user.user_id).await?;
    store.import_card(&card).await?;
    Ok(MessageResponse::created("card saved"))
}

async fn upsert_transcription(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Result<Json<Transcription>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncWrite, &user.user_id)
        .await?;

    let transcription = json_body(payload)?;
    let store = state.cloud.store_for(&user.user_id).await?;
    store.import_transcription(&transcription).await?;
    Ok(MessageResponse::created("transcription saved"))
}

async fn export_all(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<ExportedData>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncRead, &user.user_id)
        .await?;

    let store = state.cloud.store_for(&user.user_id).await?;
    let data = store.export_all().await?;
    tracing::info!(
        endpoint = "sync_export",
        user = user_fingerprint(&user.user_id),
        entities = data.len(),
        "Exported user data"
    );
    Ok(Json(data))
}

#[derive(Debug, Deserialize)]
struct SyncSocketQuery {
    device_id: Option<String>,
}

async fn sync_socket(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<SyncSocketQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| sync_session(socket, state, user, query.device_id))
}

async fn sync_session(
    socket: WebSocket,
    state: AppState,
    user: AuthenticatedUser,
    device_id: Option<String>,
) {
    let (outbound, receiver) = mpsc::channel(state.config.hub_queue_capacity);
    let client = HubClient::new(user.user_id.as_str(), device_id, outbound);
    let connection = client.connection_id;
    let _registration = state.hub.register(client);
    tracing::info!(
        user = user_fingerprint(&user.user_id),
        connection = %connection,
        "Sync socket connected"
    );

    serve_socket(
        socket,
        receiver,
        SocketSettings::from_config(&state.config),
        |text| tracing::debug!(len = text.len(), "Ignoring frame on wake-up channel"),
    )
    .await;

    tracing::info!(connection = %connection, "Sync socket closed");
}

async fn room_socket(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| room_session(socket, state, user))
}

async fn room_session(socket: WebSocket, state: AppState, user: AuthenticatedUser) {
    let (outbound, receiver) = mpsc::channel(state.config.room_queue_capacity);
    let mut session = RoomSession::new(state.rooms.clone(), outbound);
    let session_id = session.id();
    tracing::info!(
        user = user_fingerprint(&user.user_id),
        session = %session_id,
        "Room socket connected"
    );

    serve_socket(
        socket,
        receiver,
        SocketSettings::from_config(&state.config),
        |text| session.handle_text(text),
    )
    .await;

    tracing::info!(
        session = %session_id,
        room = session.room().unwrap_or("none"),
        "Room socket closed"
    );
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::StreamExt;
    use pretty_assertions::assert_eq;
    use seisami_core::sync::{HttpSyncTransport, Reconciler, SyncTransport};
    use seisami_core::{LocalStore, OperationType};

    use super::*;
    use crate::auth::mint_test_token;
    use crate::config::test_config;

    async fn serve() -> (String, AppState) {
        serve_with(test_config()).await
    }

    async fn serve_with(config: AppConfig) -> (String, AppState) {
        let state = AppState::from_config(Arc::new(config), NotificationHub::spawn());
        let router = app_router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{addr}"), state)
    }

    fn transport(base: &str, state: &AppState, user_id: &str) -> HttpSyncTransport {
        let token = mint_test_token(&state.config.jwt_secret, user_id);
        HttpSyncTransport::new(base, token).unwrap()
    }

    async fn wait_for_connected(state: &AppState, expected: usize) -> bool {
        for _ in 0..60 {
            if state.hub.connected_users().await == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn silent_sync_socket_is_dropped_after_read_deadline() {
        let config = AppConfig {
            ws_heartbeat: Duration::from_millis(100),
            ws_read_timeout: Duration::from_millis(400),
            ..test_config()
        };
        let (base, state) = serve_with(config).await;
        let token = mint_test_token(&state.config.jwt_secret, "user-1");
        let url = format!(
            "{}/v1/sync/ws?token={token}&device_id=d1",
            base.replacen("http://", "ws://", 1)
        );
        let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

        // Reading answers each ping, which keeps the session past the deadline
        let mut pings = 0;
        let reading = tokio::time::Instant::now();
        while reading.elapsed() < Duration::from_millis(800) {
            let frame = tokio::time::timeout(Duration::from_secs(1), socket.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if frame.is_ping() {
                pings += 1;
            }
        }
        assert!(pings >= 3);
        assert!(wait_for_connected(&state, 1).await);

        // Stop reading: no pongs go out and the server gives up
        assert!(wait_for_connected(&state, 0).await);
        drop(socket);
    }

    #[test]
    fn websocket_requests_may_carry_the_token_in_the_query() {
        let request = axum::http::Request::builder()
            .uri("/v1/sync/ws?token=abc&device_id=d1")
            .header(header::UPGRADE, "websocket")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(request_token(&request).unwrap(), "abc");

        let request = axum::http::Request::builder()
            .uri("/v1/sync/pull/cards?token=abc")
            .body(axum::body::Body::empty())
            .unwrap();
        assert!(request_token(&request).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn requests_without_a_token_are_rejected() {
        let (base, state) = serve().await;
        let forged = HttpSyncTransport::new(base.as_str(), "not-a-token").unwrap();

        let err = forged.get_all_operations(TableName::Cards).await.unwrap_err();
        assert!(err.to_string().contains("401"));

        let ok = transport(&base, &state, "user-1");
        assert!(ok.get_all_operations(TableName::Cards).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upload_pull_and_state_round_trip_over_http() {
        let (base, state) = serve().await;
        let cloud = transport(&base, &state, "user-1");

        let operation = Operation::new(
            TableName::Boards,
            "board-1",
            OperationType::Insert,
            "device-a",
            r#"{"id":"board-1","name":"Roadmap"}"#,
        );
        let receipt = cloud.push_record(&operation).await.unwrap();
        assert_eq!(receipt, PushReceipt::stored(&operation));

        let pulled = cloud.get_all_operations(TableName::Boards).await.unwrap();
        assert_eq!(pulled, vec![operation.clone()]);
        let latest = cloud
            .pull_record(TableName::Boards, "board-1")
            .await
            .unwrap();
        assert_eq!(latest, Some(operation.clone()));
        assert_eq!(
            cloud
                .pull_record(TableName::Boards, "board-9")
                .await
                .unwrap(),
            None
        );

        assert_eq!(cloud.get_sync_state(TableName::Boards).await.unwrap(), None);
        let sync_state = SyncState::at_operation(&operation);
        cloud.update_sync_state(&sync_state).await.unwrap();
        assert_eq!(
            cloud.get_sync_state(TableName::Boards).await.unwrap(),
            Some(sync_state)
        );

        let exported = cloud.export_all().await.unwrap();
        assert_eq!(exported.boards.len(), 1);
        assert_eq!(exported.boards[0].name, "Roadmap");

        // Another user sees nothing
        let other = transport(&base, &state, "user-2");
        assert!(other
            .get_all_operations(TableName::Boards)
            .await
            .unwrap()
            .is_empty());
    }

    /// Status code of a bare GET, for paths the transport cannot express.
    async fn raw_get_status(base: &str, path: &str, token: &str) -> u16 {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let host = base.trim_start_matches("http://");
        let mut stream = tokio::net::TcpStream::connect(host).await.unwrap();
        let request = format!(
            "GET {path} HTTP/1.1\r\nHost: {host}\r\nAuthorization: Bearer {token}\r\n\
             Connection: close\r\n\r\n"
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
            .split_whitespace()
            .nth(1)
            .unwrap()
            .parse()
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_requests_are_rejected() {
        let (base, state) = serve().await;
        let token = mint_test_token(&state.config.jwt_secret, "user-1");

        assert_eq!(raw_get_status(&base, "/v1/sync/pull/notes", &token).await, 400);
        assert_eq!(
            raw_get_status(&base, "/v1/sync/pull/cards?since=yesterday", &token).await,
            400
        );
        assert_eq!(
            raw_get_status(&base, "/v1/sync/pull/cards?since=1704103200000", &token).await,
            200
        );
        assert_eq!(raw_get_status(&base, "/healthz", "").await, 200);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn devices_converge_through_the_service() {
        let (base, state) = serve().await;

        let laptop = LocalStore::open_in_memory().await.unwrap();
        let phone = LocalStore::open_in_memory().await.unwrap();
        laptop
            .record_mutation(
                TableName::Boards,
                "board-1",
                OperationType::Insert,
                &Board {
                    id: "board-1".to_string(),
                    name: "Launch".to_string(),
                    created_at: Timestamp::ZERO,
                    updated_at: Timestamp::ZERO,
                },
            )
            .await
            .unwrap();

        let laptop_sync = Reconciler::new(laptop.clone(), transport(&base, &state, "user-1"));
        let phone_sync = Reconciler::new(phone.clone(), transport(&base, &state, "user-1"));

        let pushed = laptop_sync.sync_table(TableName::Boards).await.unwrap();
        assert!(pushed.pushed_any());
        let pulled = phone_sync.sync_table(TableName::Boards).await.unwrap();
        assert!(pulled.pulled_any());

        let exported = phone.export_all().await.unwrap();
        assert_eq!(exported.boards.len(), 1);
        assert_eq!(exported.boards[0].name, "Launch");

        let again = laptop_sync.sync_table(TableName::Boards).await.unwrap();
        assert!(again.is_noop());
    }
}
