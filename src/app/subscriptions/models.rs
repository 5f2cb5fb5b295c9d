// 订阅源管理模块
// Subscription Management Module

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// 添加 / 删除订阅请求
#[derive(ToSchema, Deserialize, Serialize, Validate, Clone, Debug)]
pub struct SubscriptionRequest {
    #[schema(example = "https://example.com/api/v1/client/subscribe?token=xxx")]
    #[validate(length(min = 1, max = 4096))]
    pub subscription: String,
}
