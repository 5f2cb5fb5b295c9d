use axum::{extract::State, response::Json};
use std::sync::Arc;
use tracing::info;
use validator::Validate;

use crate::app::AppState;
use crate::error::{AppError, AppResult};
use crate::link::{self, NodeInfo};
use crate::ApiResponse;

use super::models::*;

// ============================================================================
// API Handlers
// ============================================================================

/// 订阅与节点列表
pub async fn get_data(State(state): State<Arc<AppState>>) -> AppResult<DataResponse> {
    let data = state.store.snapshot().await;
    let nodes = data.node_lines().map(link::describe).collect();
    Ok(Json(ApiResponse::success(
        "ok",
        DataResponse {
            subscriptions: data.subscriptions,
            nodes,
        },
    )))
}

/// Non-blank lines of a batch, each with `remark` applied when one is given.
pub fn prepare_batch(input: &str, remark: Option<&str>) -> Vec<String> {
    let remark = remark.map(str::trim).filter(|r| !r.is_empty());
    input
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| match remark {
            Some(r) => link::with_remark(l, r),
            None => l.to_string(),
        })
        .collect()
}

/// 添加节点（支持多行批量）
pub async fn add_node(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddNodeRequest>,
) -> AppResult<AddNodeResponse> {
    req.validate()?;
    let lines = prepare_batch(&req.node, req.remark.as_deref());
    if lines.is_empty() {
        return Err(AppError::bad_request("节点内容为空"));
    }

    let added = lines.len();
    state
        .store
        .update(|data| {
            data.append_nodes(&lines);
            Ok::<_, AppError>(())
        })
        .await?;

    info!(count = added, "节点已添加");
    Ok(Json(ApiResponse::success("节点添加成功", AddNodeResponse { added })))
}

/// 删除节点
pub async fn delete_node(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NodeRequest>,
) -> AppResult<()> {
    req.validate()?;
    state
        .store
        .update(|data| {
            if data.remove_node(&req.node) {
                Ok(())
            } else {
                Err(AppError::not_found("节点不存在"))
            }
        })
        .await?;

    info!(protocol = %link::Protocol::of(&req.node), "节点已删除");
    Ok(Json(ApiResponse::success_no_data("节点删除成功")))
}

/// 保存节点顺序（整体替换）
pub async fn save_nodes(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SaveNodesRequest>,
) -> AppResult<()> {
    let nodes = req.nodes.into_joined();
    state
        .store
        .update(|data| {
            data.nodes = nodes;
            Ok::<_, AppError>(())
        })
        .await?;
    Ok(Json(ApiResponse::success_no_data("顺序已保存")))
}

/// 修改节点备注
pub async fn update_node_remark(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateRemarkRequest>,
) -> AppResult<NodeInfo> {
    req.validate()?;
    let updated = link::with_remark(req.node.trim(), req.remark.trim());

    state
        .store
        .update(|data| {
            if data.replace_node(&req.node, &updated) {
                Ok(())
            } else {
                Err(AppError::not_found("节点不存在"))
            }
        })
        .await?;

    Ok(Json(ApiResponse::success("备注已更新", link::describe(&updated))))
}
