// 订阅源管理模块
// Subscription Management Module

pub mod handlers;
pub mod models;
pub mod routes;

pub use routes::routes;
