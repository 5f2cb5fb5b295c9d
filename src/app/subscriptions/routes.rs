use axum::routing::post;
use axum::Router;
use std::sync::Arc;

use super::handlers::*;
use crate::AppState;

// ============================================================================
// Routes
// ============================================================================

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/add-subscription", post(add_subscription))
        .route("/admin/delete-subscription", post(delete_subscription))
}
