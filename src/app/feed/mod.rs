// 订阅输出模块
// Merged feed at /<token>, static assets otherwise

pub mod handlers;

pub use handlers::serve_feed_or_asset;
