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
        .route("/admin/data", get(get_data))
        // 节点增删
        .route("/admin/add-node", post(add_node))
        .route("/admin/delete-node", post(delete_node))
        // 排序与备注
        .route("/admin/save-nodes", post(save_nodes))
        .route("/admin/update-node-remark", post(update_node_remark))
}
