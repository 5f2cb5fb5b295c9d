// 节点管理模块
// Node Management Module

pub mod handlers;
pub mod models;
pub mod routes;

pub use routes::routes;
