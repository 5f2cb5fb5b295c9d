// 订阅请求推送（Bark 风格）
// Push notification on feed requests

use percent_encoding::utf8_percent_encode;
use reqwest::Client;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

use crate::link::COMPONENT;

const MIN_INTERVAL: Duration = Duration::from_secs(3);
const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// What a feed request looked like, for the push body.
#[derive(Clone, Debug)]
pub struct FeedEvent {
    pub client_ip: String,
    pub size: usize,
    pub time: String,
    pub icon_url: String,
}

pub struct Notifier {
    client: Client,
    last_sent: Mutex<Option<Instant>>,
}

impl Notifier {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(PUSH_TIMEOUT).build()?;
        Ok(Self {
            client,
            last_sent: Mutex::new(None),
        })
    }

    /// Claims the send slot; `false` while inside the throttle window.
    async fn try_acquire(&self, now: Instant) -> bool {
        let mut last = self.last_sent.lock().await;
        if last.is_some_and(|t| now.duration_since(t) <= MIN_INTERVAL) {
            return false;
        }
        *last = Some(now);
        true
    }

    /// Fire-and-forget; failures are only logged.
    pub async fn notify(&self, push_url: &str, event: &FeedEvent) {
        if push_url.trim().is_empty() || !self.try_acquire(Instant::now()).await {
            return;
        }
        let url = build_push_url(push_url, event);
        let client = self.client.clone();
        tokio::spawn(async move {
            let result = client.get(&url).send().await.and_then(|r| r.error_for_status());
            if let Err(e) = result {
                warn!(error = %e, "推送失败");
            }
        });
    }
}

fn encode(s: &str) -> String {
    utf8_percent_encode(s, COMPONENT).to_string()
}

pub fn build_push_url(base: &str, event: &FeedEvent) -> String {
    let base = base.trim();
    let sep = if base.ends_with('/') { "" } else { "/" };
    let title = encode("Merge-Sub: 收到订阅请求");
    let body = encode(&format!(
        "来源 IP: {}\n数据大小: {} bytes\n时间: {}",
        event.client_ip, event.size, event.time
    ));
    format!(
        "{}{}{}/{}?icon={}&sound=alarm",
        base,
        sep,
        title,
        body,
        encode(&event.icon_url)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> FeedEvent {
        FeedEvent {
            client_ip: "1.2.3.4".to_string(),
            size: 128,
            time: "12:00:00".to_string(),
            icon_url: "https://panel.example/icon.svg".to_string(),
        }
    }

    #[test]
    fn push_url_layout() {
        let url = build_push_url("https://api.day.app/KEY", &event());
        assert!(url.starts_with("https://api.day.app/KEY/Merge-Sub%3A%20"));
        assert!(url.ends_with("?icon=https%3A%2F%2Fpanel.example%2Ficon.svg&sound=alarm"));
        assert!(url.contains("1.2.3.4"));
        assert!(url.contains("%0A"));

        let with_slash = build_push_url("https://api.day.app/KEY/", &event());
        assert_eq!(with_slash, url);
    }

    #[tokio::test]
    async fn throttle_window() {
        let notifier = Notifier::new().unwrap();
        let t0 = Instant::now();
        assert!(notifier.try_acquire(t0).await);
        assert!(!notifier.try_acquire(t0 + Duration::from_secs(1)).await);
        assert!(notifier.try_acquire(t0 + Duration::from_secs(4)).await);
    }
}
