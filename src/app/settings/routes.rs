use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use super::handlers::*;
use crate::AppState;

// ============================================================================
// Routes
// ============================================================================

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/get-sub-token", get(get_sub_token))
        .route("/get-apiurl", get(get_api_url))
        .route("/admin/reset-token", post(reset_token))
        // 推送
        .route("/admin/get-bark", get(get_push_url))
        .route("/admin/update-bark", post(update_push_url))
        // 优选地址
        .route("/admin/get-cf-config", get(get_relay_config))
        .route("/admin/update-cf-config", post(update_relay_config))
        // 账号
        .route("/admin/update-credentials", post(update_credentials))
        // 备份与恢复
        .route("/admin/backup", get(backup))
        .route("/admin/restore", post(restore))
        .route("/admin/openapi.json", get(openapi))
}
