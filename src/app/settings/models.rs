// 面板设置模块
// Panel Settings Module

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::store::{port_from_str_or_int, NodeText};

// ============================================================================
// Request Types
// ============================================================================

/// 推送地址；空字符串表示关闭推送
#[derive(ToSchema, Deserialize, Serialize, Validate, Clone, Debug, Default)]
pub struct PushUrlRequest {
    #[schema(example = "https://api.day.app/your_key")]
    #[serde(default)]
    #[validate(length(max = 2048))]
    pub url: String,
}

/// 优选地址；留空的字段保持原值
#[derive(ToSchema, Deserialize, Validate, Clone, Debug, Default)]
pub struct RelayConfigRequest {
    #[schema(example = "time.is")]
    #[serde(default, alias = "host", alias = "cfip")]
    #[validate(length(max = 253))]
    pub ip: Option<String>,

    #[schema(example = 443)]
    #[serde(default, alias = "cfport", deserialize_with = "port_from_str_or_int")]
    pub port: Option<u16>,
}

#[derive(ToSchema, Deserialize, Validate, Clone, Debug)]
pub struct UpdateCredentialsRequest {
    /// 留空则保持当前用户名
    #[serde(default)]
    #[validate(length(max = 64))]
    pub username: String,

    #[validate(length(min = 1, max = 128))]
    pub password: String,

    #[serde(rename = "currentPassword", alias = "current_password")]
    pub current_password: String,
}

/// 备份恢复；`nodes` 可以是字符串或字符串数组
#[derive(ToSchema, Deserialize, Clone, Debug, Default)]
pub struct RestoreRequest {
    #[serde(default)]
    pub subscriptions: Vec<String>,

    #[schema(value_type = Object)]
    #[serde(default)]
    pub nodes: Option<NodeText>,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(ToSchema, Serialize, Clone, Debug)]
pub struct TokenResponse {
    #[schema(example = "3f9c2a7d1b8e4f6a0c5d9e2b")]
    pub token: String,
}

#[derive(ToSchema, Serialize, Clone, Debug)]
pub struct ApiUrlResponse {
    #[schema(example = "https://sublink.eooce.com")]
    pub api_url: String,
}

#[derive(ToSchema, Serialize, Clone, Debug, PartialEq)]
pub struct RelayConfig {
    pub ip: String,
    pub port: Option<u16>,
}

#[derive(ToSchema, Serialize, Clone, Debug)]
pub struct RestoreResponse {
    pub subscriptions: usize,
    pub nodes: usize,
}
