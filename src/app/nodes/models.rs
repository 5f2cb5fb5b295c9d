// 节点管理模块
// Node Management Module

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::link::NodeInfo;
use crate::store::NodeText;

// ============================================================================
// Request Types
// ============================================================================

/// 添加节点请求；`node` 可以是多行
#[derive(ToSchema, Deserialize, Validate, Clone, Debug)]
pub struct AddNodeRequest {
    #[schema(example = "vless://uuid@example.com:443?type=ws&security=tls#HK")]
    #[validate(length(min = 1))]
    pub node: String,

    /// 为每一行设置的备注
    #[schema(example = "香港 01")]
    #[serde(default)]
    #[validate(length(max = 200))]
    pub remark: Option<String>,
}

/// 删除节点请求
#[derive(ToSchema, Deserialize, Validate, Clone, Debug)]
pub struct NodeRequest {
    #[validate(length(min = 1))]
    pub node: String,
}

/// 保存节点顺序；字符串或字符串数组
#[derive(ToSchema, Deserialize, Clone, Debug)]
pub struct SaveNodesRequest {
    #[schema(value_type = Object)]
    pub nodes: NodeText,
}

/// 修改节点备注；空备注表示清除
#[derive(ToSchema, Deserialize, Validate, Clone, Debug)]
pub struct UpdateRemarkRequest {
    #[validate(length(min = 1))]
    pub node: String,

    #[serde(default)]
    #[validate(length(max = 200))]
    pub remark: String,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(ToSchema, Serialize, Clone, Debug)]
pub struct DataResponse {
    pub subscriptions: Vec<String>,
    pub nodes: Vec<NodeInfo>,
}

#[derive(ToSchema, Serialize, Clone, Debug)]
pub struct AddNodeResponse {
    pub added: usize,
}
