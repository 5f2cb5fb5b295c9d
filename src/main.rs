use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

mod app;
mod config;
mod error;
mod link;
mod logging;
mod merge;
mod notify;
mod rewrite;
mod store;

use config::{Cli, Settings};
use error::AppError;
use merge::Merger;
use notify::Notifier;
use store::{Credentials, JsonDocument, StoreData};

const SESSION_COOKIE: &str = "admin_session";
const SESSION_HOURS: i64 = 24;
const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

// ============================================================================
// App State
// ============================================================================

pub struct AppState {
    pub settings: Settings,
    pub store: JsonDocument<StoreData>,
    pub credentials: JsonDocument<Credentials>,
    pub merger: Merger,
    pub notifier: Notifier,
}

impl AppState {
    /// Open (or create) both documents under `settings.data_dir`.
    pub async fn open(settings: Settings) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        tokio::fs::create_dir_all(&settings.data_dir).await?;

        let store = JsonDocument::open_or_create(settings.data_file(), StoreData::default).await?;
        let credentials =
            JsonDocument::open_or_create(settings.credentials_file(), || Credentials::initial(&settings)).await?;

        // 旧版本或手工编辑的凭据文件补齐缺失字段
        let mut current = credentials.snapshot().await;
        if current.fill_missing(&settings) {
            credentials.replace(current).await?;
            info!(path = %credentials.path().display(), "凭据文件已补齐缺失字段");
        }

        Ok(Self {
            merger: Merger::new(settings.fetch_timeout)?,
            notifier: Notifier::new()?,
            settings,
            store,
            credentials,
        })
    }
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Serialize)]
pub(crate) struct ApiResponse<T: Serialize> {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub(crate) fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub(crate) fn success_no_data(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub(crate) fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

// ============================================================================
// JWT Helper Functions
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
}

// 生成 JWT token
fn generate_token(secret: &str, username: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let expiration = chrono::Utc::now()
        .checked_add_signed(chrono::Duration::hours(SESSION_HOURS))
        .expect("valid timestamp")
        .timestamp() as usize;

    let claims = Claims {
        sub: username.to_string(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

// 验证 JWT token
fn verify_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
}

// ============================================================================
// Static Assets
// ============================================================================

#[derive(RustEmbed)]
#[folder = "public/"]
struct Assets;

pub(crate) fn asset_response(path: &str) -> Option<Response> {
    let file = Assets::get(path)?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    Some(([(header::CONTENT_TYPE, mime.as_ref().to_string())], file.data.into_owned()).into_response())
}

pub(crate) fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

async fn serve_index() -> Response {
    asset_response("index.html").unwrap_or_else(not_found)
}

async fn serve_login() -> Response {
    asset_response("login.html").unwrap_or_else(not_found)
}

// ============================================================================
// Session
// ============================================================================

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
}

fn session_cookie(token: &str, max_age: i64) -> String {
    format!(
        "{}={}; HttpOnly; Path=/; Max-Age={}; SameSite=Lax",
        SESSION_COOKIE, token, max_age
    )
}

/// POST /api/login
async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, AppError> {
    let creds = state.credentials.snapshot().await;
    if req.username != creds.username || req.password != creds.password {
        warn!(username = %req.username, "登录失败");
        return Err(AppError::Unauthorized("认证失败".to_string()));
    }

    let token = generate_token(&creds.session_secret, &creds.username)?;
    info!(username = %creds.username, "登录成功");
    Ok((
        [(header::SET_COOKIE, session_cookie(&token, SESSION_HOURS * 3600))],
        Json(ApiResponse::success("登录成功", LoginResponse { token })),
    )
        .into_response())
}

/// GET /logout
async fn logout() -> Response {
    (
        [(header::SET_COOKIE, session_cookie("", 0))],
        Redirect::to("/login"),
    )
        .into_response()
}

/// Bearer header first, then the session cookie.
fn session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
    {
        return Some(token.trim().to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

fn wants_json(headers: &HeaderMap) -> bool {
    let accept_json = headers
        .get(header::ACCEPT)
        .and_then(|h| h.to_str().ok())
        .is_some_and(|v| v.contains("json"));
    let xhr = headers
        .get("x-requested-with")
        .and_then(|h| h.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"));
    accept_json || xhr
}

// JWT 认证中间件
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let creds = state.credentials.snapshot().await;
    let authorized = session_token(req.headers())
        .and_then(|token| verify_token(&creds.session_secret, &token).ok())
        .is_some_and(|claims| claims.sub == creds.username);

    if authorized {
        let mut response = next.run(req).await;
        response.headers_mut().insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        );
        return response;
    }

    // 认证失败
    if wants_json(req.headers()) {
        (StatusCode::UNAUTHORIZED, Json(ApiResponse::<()>::error("Unauthorized"))).into_response()
    } else {
        Redirect::to("/login").into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

fn build_router(state: Arc<AppState>) -> Router {
    // 需要认证的路由
    let protected_routes = Router::new()
        .route("/", get(serve_index))
        .merge(app::routes())
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // 公开路由；其余路径交给订阅/静态资源处理
    Router::new()
        .route("/login", get(serve_login))
        .route("/api/login", post(login))
        .route("/logout", get(logout))
        .merge(protected_routes)
        .fallback(app::feed::serve_feed_or_asset)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .with_state(state)
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = Settings::resolve(Cli::parse())?;

    let log_dir = settings.log_dir();
    std::fs::create_dir_all(&log_dir)?;
    let _log_guard = logging::init(&log_dir, settings.log_timezone)?;

    tokio::spawn(logging::run_retention_schedule(
        log_dir,
        settings.log_retention,
        settings.log_sweep.clone(),
        settings.log_timezone,
    ));

    let port = settings.port;
    let state = Arc::new(AppState::open(settings).await?);
    {
        let creds = state.credentials.snapshot().await;
        let data = state.store.snapshot().await;
        info!(
            subscriptions = data.subscriptions.len(),
            nodes = data.node_lines().count(),
            relay = ?creds.relay(),
            "数据已加载"
        );
    }

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("✅ merge-sub 面板已启动: http://localhost:{}", port);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
