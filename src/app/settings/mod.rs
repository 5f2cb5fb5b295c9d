// 面板设置模块：令牌、优选地址、推送、账号、备份
// Panel Settings Module

pub mod handlers;
pub mod models;
pub mod routes;

pub use routes::routes;
