// 订阅合并
// Concurrent upstream fetch + rewrite + concatenation with local nodes

use futures_util::future::join_all;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use crate::link::decode_base64_lenient;
use crate::rewrite::Rewriter;
use crate::store::StoreData;

pub struct Merger {
    client: Client,
}

impl Merger {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("merge-sub/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Body of one upstream; `None` on timeout, transport error or non-2xx.
    pub async fn fetch(&self, url: &str) -> Option<String> {
        let response = match self.client.get(url).send().await.and_then(|r| r.error_for_status()) {
            Ok(r) => r,
            Err(e) => {
                warn!(url = %url, error = %e, "订阅拉取失败");
                return None;
            }
        };
        match response.text().await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(url = %url, error = %e, "订阅内容读取失败");
                None
            }
        }
    }

    /// Newline-joined nodes of every reachable upstream (in subscription
    /// order) followed by the local nodes, all passed through `rewriter`.
    pub async fn merge(&self, data: &StoreData, rewriter: &Rewriter) -> String {
        let bodies = join_all(data.subscriptions.iter().map(|url| self.fetch(url))).await;

        let mut lines: Vec<String> = Vec::new();
        for (url, body) in data.subscriptions.iter().zip(bodies) {
            let Some(text) = body.as_deref().and_then(decode_payload) else {
                continue;
            };
            let before = lines.len();
            lines.extend(rewriter.rewrite_lines(&text));
            debug!(url = %url, nodes = lines.len() - before, "订阅已合并");
        }
        lines.extend(rewriter.rewrite_lines(&data.nodes));
        lines.join("\n")
    }
}

/// Decode an upstream body. Base64 is expected; a body that already holds
/// plain `scheme://` lines is taken as is.
pub fn decode_payload(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    if let Some(bytes) = decode_base64_lenient(body) {
        let text = String::from_utf8_lossy(&bytes).into_owned();
        if !text.trim().is_empty() {
            return Some(text);
        }
    }
    if body.contains("://") {
        return Some(body.to_string());
    }
    None
}
