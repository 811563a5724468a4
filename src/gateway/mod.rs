//! Axum-based HTTP gateway for the dashboard API.
//!
//! - JSON request/response bodies on every `/api` route
//! - Request body size limit (64KB max)
//! - Request timeout answering 408
//! - Permissive CORS for the browser dashboard
//!
//! Every failure is answered as `{"success": false, "message": "..."}` with
//! a status derived from [`ErrorKind`].

use crate::auth::{AuthStore, ProfileUpdate};
use crate::config::Config;
use crate::devices::DeviceRegistry;
use crate::error::{DashboardError, ErrorKind};
use crate::sharing::SharingWorkflow;
use crate::store::{Permission, Store};
use anyhow::{Context, Result};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB): prevents memory exhaustion
pub const MAX_BODY_SIZE: usize = 65_536;

/// Concrete return type for handlers (avoids `impl IntoResponse` inference issues).
type ApiResponse = (StatusCode, Json<serde_json::Value>);

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub auth: Arc<AuthStore>,
    pub devices: Arc<DeviceRegistry>,
    pub sharing: Arc<SharingWorkflow>,
}

impl AppState {
    /// Wire every service onto one store.
    pub fn new(store: Arc<Store>, root_admin: &str) -> Self {
        Self {
            auth: Arc::new(AuthStore::new(store.clone(), root_admin)),
            devices: Arc::new(DeviceRegistry::new(store.clone())),
            sharing: Arc::new(SharingWorkflow::new(store.clone())),
            store,
        }
    }
}

/// True for addresses that would expose the gateway beyond this machine.
pub fn is_public_bind(host: &str) -> bool {
    !matches!(host, "127.0.0.1" | "localhost" | "::1" | "[::1]")
}

/// Build the router with middleware.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/login", post(handle_login))
        .route("/api/signup", post(handle_signup))
        .route("/api/user", get(handle_get_user))
        .route("/api/profile", put(handle_update_profile))
        .route("/api/users", get(handle_directory))
        .route(
            "/api/devices",
            get(handle_devices_list)
                .post(handle_device_claim)
                .put(handle_device_rename)
                .delete(handle_device_delete),
        )
        .route(
            "/api/devices/share",
            post(handle_share_direct).delete(handle_share_revoke),
        )
        .route("/api/devices/transfer", post(handle_transfer_direct))
        .route(
            "/api/notifications",
            get(handle_notifications_list).post(handle_notification_create),
        )
        .route(
            "/api/notifications/{id}/accept",
            post(handle_notification_accept),
        )
        .route(
            "/api/notifications/{id}/reject",
            post(handle_notification_reject),
        )
        .route("/api/admin/devices", post(handle_admin_register_device))
        .route("/api/admin/data", get(handle_admin_data))
        .route(
            "/api/admin/users/{email}",
            axum::routing::delete(handle_admin_delete_user),
        )
        .route(
            "/api/admin/users/{email}/role",
            put(handle_admin_set_role),
        )
        .with_state(state)
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
}

/// Run the HTTP gateway until Ctrl-C.
pub async fn run_gateway(config: Config) -> Result<()> {
    let host = config.gateway.host.as_str();
    let port = config.gateway.port;
    if is_public_bind(host) && !config.gateway.allow_public_bind {
        anyhow::bail!(
            "Refusing to bind to {host}: the dashboard API has no authentication.\n\
             Fix: use --host 127.0.0.1 (default) or set\n\
             [gateway] allow_public_bind = true in config.toml."
        );
    }

    let store = Arc::new(Store::open(&config.store.path));
    let state = AppState::new(store, &config.admin.root_email);
    let app = build_router(
        state,
        Duration::from_secs(config.gateway.request_timeout_secs),
    );

    let listener = bind_listener(host, port).await?;
    let actual = listener.local_addr()?;

    tracing::info!(
        addr = %actual,
        store = %config.store.path.display(),
        "Dashboard gateway listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Dashboard gateway stopped");
    Ok(())
}

/// Bind `host:port`. Hostnames are resolved and bracketed IPv6 literals
/// (`[::1]`) are accepted alongside bare ones.
pub async fn bind_listener(host: &str, port: u16) -> Result<tokio::net::TcpListener> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    tokio::net::TcpListener::bind((bare, port))
        .await
        .with_context(|| format!("failed to bind {host}:{port}"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// RESPONSE HELPERS
// ══════════════════════════════════════════════════════════════════════════════

fn status_for(err: &DashboardError) -> StatusCode {
    match err.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::Duplicate => match err {
            DashboardError::DuplicateRequest => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        },
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::Stale => StatusCode::CONFLICT,
        ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &DashboardError) -> ApiResponse {
    let message = match err.kind() {
        ErrorKind::Storage => {
            tracing::error!(error = %err, "Store write failed");
            "Internal storage error".to_string()
        }
        _ => err.to_string(),
    };
    (
        status_for(err),
        Json(serde_json::json!({"success": false, "message": message})),
    )
}

fn bad_request(message: impl Into<String>) -> ApiResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"success": false, "message": message.into()})),
    )
}

fn ok_message(message: impl Into<String>) -> ApiResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({"success": true, "message": message.into()})),
    )
}

fn parse_permission(raw: &str) -> Result<Permission, ApiResponse> {
    Permission::parse(raw).ok_or_else(|| {
        bad_request(format!(
            "Invalid permission '{raw}': expected 'view' or 'manage'"
        ))
    })
}

fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiResponse> {
    query
        .map(|Query(q)| q)
        .map_err(|e| bad_request(format!("Invalid query: {e}")))
}

fn required_email(query: Result<Query<EmailQuery>, QueryRejection>) -> Result<String, ApiResponse> {
    query_params(query)?
        .email
        .filter(|e| !e.is_empty())
        .ok_or_else(|| bad_request("Email required"))
}

/// Unwrap a JSON body or answer 400.
macro_rules! json_body {
    ($body:expr) => {
        match $body {
            Ok(Json(b)) => b,
            Err(e) => return bad_request(format!("Invalid request: {e}")),
        }
    };
}

// ══════════════════════════════════════════════════════════════════════════════
// REQUEST BODIES
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct EmailQuery {
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DirectoryQuery {
    pub exclude: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SignupBody {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub organization: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileBody {
    pub email: String,
    pub new_name: Option<String>,
    pub new_password: Option<String>,
    pub new_org: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClaimBody {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub owner: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameBody {
    pub id: String,
    pub requester_email: String,
    pub new_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBody {
    pub id: String,
    pub requester_email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareBody {
    pub device_id: String,
    pub owner_email: String,
    pub share_with_email: String,
    pub permission: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeBody {
    pub device_id: String,
    pub owner_email: String,
    pub share_with_email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferBody {
    pub device_id: String,
    pub current_owner_email: String,
    pub new_owner_email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub device_id: String,
    pub from_email: String,
    pub to_email: String,
    pub permission: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdminDeviceBody {
    pub id: String,
    pub name: String,
    pub owner: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RoleBody {
    pub role: String,
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// GET /health: always public
async fn handle_health(State(state): State<AppState>) -> ApiResponse {
    let (users, devices) = state.store.read(|db| (db.users.len(), db.devices.len()));
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "users": users,
            "devices": devices,
        })),
    )
}

// ── Identity ────────────────────────────────────────────────────────

/// POST /api/login
async fn handle_login(
    State(state): State<AppState>,
    body: Result<Json<LoginBody>, JsonRejection>,
) -> ApiResponse {
    let body = json_body!(body);
    match state.auth.login(&body.email, &body.password) {
        Ok(user) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "name": user.name,
                "role": user.role,
                "email": user.email,
                "organization": user.organization,
                "message": "Login successful!",
            })),
        ),
        Err(e) => error_response(&e),
    }
}

/// POST /api/signup
async fn handle_signup(
    State(state): State<AppState>,
    body: Result<Json<SignupBody>, JsonRejection>,
) -> ApiResponse {
    let body = json_body!(body);
    if body.name.is_empty() || body.email.is_empty() || body.password.is_empty() {
        return bad_request("All fields required.");
    }
    match state.auth.signup(
        &body.name,
        &body.email,
        &body.password,
        body.organization.as_deref(),
    ) {
        Ok(()) => ok_message("Account created successfully!"),
        Err(e) => error_response(&e),
    }
}

/// GET /api/user?email=
async fn handle_get_user(
    State(state): State<AppState>,
    query: Result<Query<EmailQuery>, QueryRejection>,
) -> ApiResponse {
    let email = match required_email(query) {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    match state.auth.get_user(&email) {
        Ok(user) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "name": user.name,
                "role": user.role,
                "email": user.email,
                "organization": user.organization,
            })),
        ),
        Err(e) => error_response(&e),
    }
}

/// PUT /api/profile
async fn handle_update_profile(
    State(state): State<AppState>,
    body: Result<Json<ProfileBody>, JsonRejection>,
) -> ApiResponse {
    let body = json_body!(body);
    let update = ProfileUpdate {
        name: body.new_name,
        password: body.new_password,
        organization: body.new_org,
    };
    match state.auth.update_profile(&body.email, update) {
        Ok(()) => ok_message("Profile updated successfully"),
        Err(e) => error_response(&e),
    }
}

/// GET /api/users[?exclude=email]: picker for share/transfer targets.
async fn handle_directory(
    State(state): State<AppState>,
    query: Result<Query<DirectoryQuery>, QueryRejection>,
) -> ApiResponse {
    let query = match query_params(query) {
        Ok(q) => q,
        Err(resp) => return resp,
    };
    let users = state.auth.directory(query.exclude.as_deref());
    (StatusCode::OK, Json(serde_json::json!(users)))
}

// ── Devices ─────────────────────────────────────────────────────────

/// GET /api/devices?email=: owned and shared-with-me, never widened for admins.
async fn handle_devices_list(
    State(state): State<AppState>,
    query: Result<Query<EmailQuery>, QueryRejection>,
) -> ApiResponse {
    let email = match required_email(query) {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    let devices = state.devices.list_visible(&email);
    (StatusCode::OK, Json(serde_json::json!(devices)))
}

/// POST /api/devices: claim an admin-registered device.
async fn handle_device_claim(
    State(state): State<AppState>,
    body: Result<Json<ClaimBody>, JsonRejection>,
) -> ApiResponse {
    let body = json_body!(body);
    match state.devices.claim(&body.id, &body.name, &body.owner) {
        Ok(_) => ok_message("Device added."),
        Err(e) => error_response(&e),
    }
}

/// PUT /api/devices: rename (owner or manage grant).
async fn handle_device_rename(
    State(state): State<AppState>,
    body: Result<Json<RenameBody>, JsonRejection>,
) -> ApiResponse {
    let body = json_body!(body);
    match state
        .devices
        .rename(&body.id, &body.requester_email, &body.new_name)
    {
        Ok(()) => ok_message("Device renamed."),
        Err(e) => error_response(&e),
    }
}

/// DELETE /api/devices: delete as owner/admin, or drop one's own grant.
async fn handle_device_delete(
    State(state): State<AppState>,
    body: Result<Json<DeleteBody>, JsonRejection>,
) -> ApiResponse {
    let body = json_body!(body);
    match state.devices.delete(&body.id, &body.requester_email) {
        Ok(removed) => (
            StatusCode::OK,
            Json(serde_json::json!({"success": true, "removed": removed})),
        ),
        Err(e) => error_response(&e),
    }
}

/// POST /api/devices/share: immediate grant, kept for older clients.
async fn handle_share_direct(
    State(state): State<AppState>,
    body: Result<Json<ShareBody>, JsonRejection>,
) -> ApiResponse {
    let body = json_body!(body);
    let permission = match parse_permission(&body.permission) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match state.devices.share_direct(
        &body.device_id,
        &body.owner_email,
        &body.share_with_email,
        permission,
    ) {
        Ok(()) => ok_message(format!("Device shared with {}.", body.share_with_email)),
        Err(e) => error_response(&e),
    }
}

/// DELETE /api/devices/share
async fn handle_share_revoke(
    State(state): State<AppState>,
    body: Result<Json<RevokeBody>, JsonRejection>,
) -> ApiResponse {
    let body = json_body!(body);
    match state.devices.revoke_share(
        &body.device_id,
        &body.owner_email,
        &body.share_with_email,
    ) {
        Ok(()) => ok_message("Access revoked."),
        Err(e) => error_response(&e),
    }
}

/// POST /api/devices/transfer: immediate ownership change.
async fn handle_transfer_direct(
    State(state): State<AppState>,
    body: Result<Json<TransferBody>, JsonRejection>,
) -> ApiResponse {
    let body = json_body!(body);
    match state.devices.transfer_direct(
        &body.device_id,
        &body.current_owner_email,
        &body.new_owner_email,
    ) {
        Ok(()) => ok_message(format!("Device transferred to {}.", body.new_owner_email)),
        Err(e) => error_response(&e),
    }
}

// ── Notifications ───────────────────────────────────────────────────

/// GET /api/notifications?email=: pending requests, newest first.
async fn handle_notifications_list(
    State(state): State<AppState>,
    query: Result<Query<EmailQuery>, QueryRejection>,
) -> ApiResponse {
    let email = match required_email(query) {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    let pending = state.sharing.list_pending(&email);
    (StatusCode::OK, Json(serde_json::json!(pending)))
}

/// POST /api/notifications: open a share or transfer request.
async fn handle_notification_create(
    State(state): State<AppState>,
    body: Result<Json<NotificationBody>, JsonRejection>,
) -> ApiResponse {
    let body = json_body!(body);
    let result = match body.kind.as_str() {
        "share" => {
            let Some(raw) = body.permission.as_deref() else {
                return bad_request("Share requests need a permission");
            };
            let permission = match parse_permission(raw) {
                Ok(p) => p,
                Err(resp) => return resp,
            };
            state
                .sharing
                .request_share(&body.device_id, &body.from_email, &body.to_email, permission)
        }
        "transfer" => {
            state
                .sharing
                .request_transfer(&body.device_id, &body.from_email, &body.to_email)
        }
        other => {
            return bad_request(format!(
                "Invalid request type '{other}': expected 'share' or 'transfer'"
            ))
        }
    };
    match result {
        Ok(notification) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "success": true,
                "message": "Request sent.",
                "notification": notification,
            })),
        ),
        Err(e) => error_response(&e),
    }
}

/// POST /api/notifications/{id}/accept?email=
async fn handle_notification_accept(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<EmailQuery>, QueryRejection>,
) -> ApiResponse {
    let email = match required_email(query) {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    match state.sharing.accept(&id, &email) {
        Ok(_) => ok_message("Request accepted."),
        Err(e) => error_response(&e),
    }
}

/// POST /api/notifications/{id}/reject?email=
async fn handle_notification_reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<EmailQuery>, QueryRejection>,
) -> ApiResponse {
    let email = match required_email(query) {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    match state.sharing.reject(&id, &email) {
        Ok(_) => ok_message("Request rejected."),
        Err(e) => error_response(&e),
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// ADMIN HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// POST /api/admin/devices: register or update a device.
async fn handle_admin_register_device(
    State(state): State<AppState>,
    body: Result<Json<AdminDeviceBody>, JsonRejection>,
) -> ApiResponse {
    let body = json_body!(body);
    match state
        .devices
        .register(&body.id, &body.name, body.owner.as_deref())
    {
        Ok(device) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "message": "Device registered.",
                "device": device,
            })),
        ),
        Err(e) => error_response(&e),
    }
}

/// GET /api/admin/data: unfiltered roster.
async fn handle_admin_data(State(state): State<AppState>) -> ApiResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!(state.devices.admin_data())),
    )
}

/// DELETE /api/admin/users/{email}
async fn handle_admin_delete_user(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> ApiResponse {
    match state.auth.admin_delete_user(&email) {
        Ok(_) => ok_message("User deleted."),
        Err(e) => error_response(&e),
    }
}

/// PUT /api/admin/users/{email}/role
async fn handle_admin_set_role(
    State(state): State<AppState>,
    Path(email): Path<String>,
    body: Result<Json<RoleBody>, JsonRejection>,
) -> ApiResponse {
    let body = json_body!(body);
    match state.auth.admin_set_role(&email, &body.role) {
        Ok(role) => ok_message(format!("User role updated to {}.", role.as_str())),
        Err(e) => error_response(&e),
    }
}
