use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::info;
use url::Url;
use utoipa::OpenApi;
use validator::Validate;

use crate::app::{ApiDoc, AppState};
use crate::error::{AppError, AppResult};
use crate::store::{random_token, StoreData, StoreError, TOKEN_LEN};
use crate::ApiResponse;

use super::models::*;

// ============================================================================
// Token & display settings
// ============================================================================

pub async fn get_sub_token(State(state): State<Arc<AppState>>) -> AppResult<TokenResponse> {
    let token = state.credentials.snapshot().await.subscription_token;
    Ok(Json(ApiResponse::success("ok", TokenResponse { token })))
}

pub async fn get_api_url(State(state): State<Arc<AppState>>) -> AppResult<ApiUrlResponse> {
    Ok(Json(ApiResponse::success(
        "ok",
        ApiUrlResponse {
            api_url: state.settings.api_url.clone(),
        },
    )))
}

/// 重置订阅令牌，旧链接立即失效
pub async fn reset_token(State(state): State<Arc<AppState>>) -> AppResult<TokenResponse> {
    let token = state
        .credentials
        .update(|creds| {
            creds.subscription_token = random_token(TOKEN_LEN);
            Ok::<_, AppError>(creds.subscription_token.clone())
        })
        .await?;
    info!("订阅令牌已重置");
    Ok(Json(ApiResponse::success("重置成功", TokenResponse { token })))
}

// ============================================================================
// Push notification
// ============================================================================

pub async fn get_push_url(State(state): State<Arc<AppState>>) -> AppResult<PushUrlRequest> {
    let url = state.credentials.snapshot().await.push_url;
    Ok(Json(ApiResponse::success("ok", PushUrlRequest { url })))
}

pub async fn update_push_url(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PushUrlRequest>,
) -> AppResult<()> {
    req.validate()?;
    let url = req.url.trim().to_string();
    if !url.is_empty() {
        let parsed = Url::parse(&url).map_err(|_| AppError::bad_request("无效的推送地址"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::bad_request("推送地址必须是 http/https 地址"));
        }
    }

    state
        .credentials
        .update(|creds| {
            creds.push_url = url;
            Ok::<_, AppError>(())
        })
        .await?;
    Ok(Json(ApiResponse::success_no_data("推送设置已更新")))
}

// ============================================================================
// Relay address
// ============================================================================

pub async fn get_relay_config(State(state): State<Arc<AppState>>) -> AppResult<RelayConfig> {
    let creds = state.credentials.snapshot().await;
    Ok(Json(ApiResponse::success(
        "ok",
        RelayConfig {
            ip: creds.relay_host,
            port: creds.relay_port,
        },
    )))
}

/// A bare host name or IP literal; no scheme, path or credentials.
pub fn check_relay_host(host: &str) -> Result<(), AppError> {
    let invalid = host
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '/' | '@' | '?' | '#'));
    if invalid {
        return Err(AppError::bad_request("无效的优选地址"));
    }
    Ok(())
}

pub async fn update_relay_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RelayConfigRequest>,
) -> AppResult<RelayConfig> {
    req.validate()?;
    let host = req
        .ip
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string);
    if let Some(host) = &host {
        check_relay_host(host)?;
    }

    let config = state
        .credentials
        .update(|creds| {
            if let Some(host) = host {
                creds.relay_host = host;
            }
            if let Some(port) = req.port {
                creds.relay_port = Some(port);
            }
            Ok::<_, AppError>(RelayConfig {
                ip: creds.relay_host.clone(),
                port: creds.relay_port,
            })
        })
        .await?;

    info!(host = %config.ip, port = ?config.port, "优选地址已更新");
    Ok(Json(ApiResponse::success("ok", config)))
}

// ============================================================================
// Account
// ============================================================================

pub async fn update_credentials(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateCredentialsRequest>,
) -> AppResult<()> {
    req.validate()?;
    let username = req.username.trim().to_string();

    state
        .credentials
        .update(|creds| {
            if req.current_password != creds.password {
                return Err(AppError::bad_request("当前密码错误"));
            }
            if !username.is_empty() {
                creds.username = username;
            }
            creds.password = req.password;
            Ok(())
        })
        .await?;

    info!("管理员账号已更新");
    Ok(Json(ApiResponse::success_no_data("修改成功")))
}

// ============================================================================
// Backup / restore
// ============================================================================

pub async fn backup(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let data = state.store.snapshot().await;
    let body = serde_json::to_string_pretty(&data).map_err(StoreError::from)?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/json; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"backup.json\""),
        ],
        body,
    )
        .into_response())
}

pub async fn restore(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RestoreRequest>,
) -> AppResult<RestoreResponse> {
    let nodes = req.nodes.map(|n| n.into_joined()).unwrap_or_default();
    let data = StoreData::normalized(req.subscriptions, nodes);
    let summary = RestoreResponse {
        subscriptions: data.subscriptions.len(),
        nodes: data.node_lines().count(),
    };

    state.store.replace(data).await?;
    info!(subscriptions = summary.subscriptions, nodes = summary.nodes, "数据已恢复");
    Ok(Json(ApiResponse::success("数据恢复成功", summary)))
}

/// OpenAPI 组件定义
pub async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
