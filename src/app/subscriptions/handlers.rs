use axum::{extract::State, response::Json};
use std::sync::Arc;
use tracing::info;
use url::Url;
use validator::Validate;

use crate::app::AppState;
use crate::error::{AppError, AppResult};
use crate::ApiResponse;

use super::models::*;

// ============================================================================
// API Handlers
// ============================================================================

/// Trimmed URL; only http(s) upstreams are accepted.
pub fn normalize_subscription(raw: &str) -> Result<String, AppError> {
    let raw = raw.trim();
    let url = Url::parse(raw).map_err(|_| AppError::bad_request("无效的订阅链接"))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(AppError::bad_request("订阅链接必须是 http/https 地址"));
    }
    Ok(raw.to_string())
}

/// 添加订阅；已存在时不重复添加
pub async fn add_subscription(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubscriptionRequest>,
) -> AppResult<()> {
    req.validate()?;
    let url = normalize_subscription(&req.subscription)?;

    let added = state
        .store
        .update(|data| Ok::<_, AppError>(data.add_subscription(&url)))
        .await?;

    if added {
        info!(url = %url, "订阅已添加");
        Ok(Json(ApiResponse::success_no_data("订阅添加成功")))
    } else {
        Ok(Json(ApiResponse::success_no_data("订阅已存在")))
    }
}

/// 删除订阅
pub async fn delete_subscription(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubscriptionRequest>,
) -> AppResult<()> {
    req.validate()?;
    let url = req.subscription.trim().to_string();

    state
        .store
        .update(|data| {
            if data.remove_subscription(&url) {
                Ok(())
            } else {
                Err(AppError::not_found("订阅不存在"))
            }
        })
        .await?;

    info!(url = %url, "订阅已删除");
    Ok(Json(ApiResponse::success_no_data("订阅删除成功")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_http_urls_are_subscriptions() {
        assert_eq!(
            normalize_subscription("  https://a.example/sub?x=1 ").unwrap(),
            "https://a.example/sub?x=1"
        );
        assert!(normalize_subscription("http://10.0.0.1:8080/s").is_ok());
        assert!(matches!(normalize_subscription("ftp://a.example/"), Err(AppError::BadRequest(_))));
        assert!(matches!(normalize_subscription("vmess://abc"), Err(AppError::BadRequest(_))));
        assert!(matches!(normalize_subscription("not a url"), Err(AppError::BadRequest(_))));
    }
}
