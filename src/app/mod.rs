// 应用模块
// App Module

use axum::Router;
use std::sync::Arc;
use utoipa::OpenApi;

pub mod feed;
pub mod nodes;
pub mod settings;
pub mod subscriptions;

// 重新导出 AppState 让子模块可以使用
pub use super::AppState;

// 公共类型别名
pub type SharedAppState = Arc<AppState>;

/// Authenticated admin routes.
pub fn routes() -> Router<SharedAppState> {
    Router::new()
        .merge(subscriptions::routes())
        .merge(nodes::routes())
        .merge(settings::routes())
}

#[derive(OpenApi)]
#[openapi(
    info(title = "merge-sub admin API"),
    components(schemas(
        crate::link::NodeInfo,
        subscriptions::models::SubscriptionRequest,
        nodes::models::AddNodeRequest,
        nodes::models::NodeRequest,
        nodes::models::SaveNodesRequest,
        nodes::models::UpdateRemarkRequest,
        nodes::models::DataResponse,
        nodes::models::AddNodeResponse,
        settings::models::TokenResponse,
        settings::models::ApiUrlResponse,
        settings::models::PushUrlRequest,
        settings::models::RelayConfig,
        settings::models::RelayConfigRequest,
        settings::models::UpdateCredentialsRequest,
        settings::models::RestoreRequest,
        settings::models::RestoreResponse,
    ))
)]
pub struct ApiDoc;
