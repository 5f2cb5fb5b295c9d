use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use base64::Engine;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::settings::handlers::check_relay_host;
use crate::app::AppState;
use crate::notify::FeedEvent;
use crate::rewrite::{Relay, Rewriter};
use crate::store::{Credentials, StoreData};
use crate::{asset_response, not_found};

/// 单次请求的优选地址覆盖参数，不落盘
#[derive(Deserialize, Default, Debug)]
pub struct FeedQuery {
    #[serde(rename = "CFIP")]
    pub cfip: Option<String>,
    #[serde(rename = "CFPORT")]
    pub cfport: Option<String>,
}

/// Stored relay, with any valid query value taking precedence.
pub fn relay_for_request(creds: &Credentials, query: &FeedQuery) -> Option<Relay> {
    let host = query
        .cfip
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty() && check_relay_host(h).is_ok())
        .unwrap_or(&creds.relay_host);
    let port = query
        .cfport
        .as_deref()
        .and_then(|p| p.trim().parse::<u16>().ok())
        .filter(|p| *p != 0)
        .or(creds.relay_port);
    Relay::from_parts(host, port)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Client address as seen through Cloudflare / reverse proxies.
pub fn client_ip(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
    let ip = header_str(headers, "cf-connecting-ip")
        .or_else(|| header_str(headers, "x-real-ip"))
        .or_else(|| header_str(headers, "x-forwarded-for").and_then(|v| v.split(',').next()))
        .map(|v| v.trim().to_string())
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string());
    ip.strip_prefix("::ffff:").map(str::to_string).unwrap_or(ip)
}

fn icon_url(headers: &HeaderMap) -> String {
    let scheme = header_str(headers, "x-forwarded-proto").unwrap_or("http");
    let host = header_str(headers, header::HOST.as_str()).unwrap_or("localhost");
    format!("{}://{}/icon.svg", scheme, host)
}

/// 订阅地址或静态资源
pub async fn serve_feed_or_asset(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let (parts, _body) = req.into_parts();
    let path = parts.uri.path().trim_start_matches('/');
    let creds = state.credentials.snapshot().await;

    if !path.is_empty() && path == creds.subscription_token {
        return serve_feed(&state, &creds, &parts).await;
    }
    // 页面只经由受保护的路由提供
    if path.ends_with(".html") {
        return not_found();
    }
    asset_response(path).unwrap_or_else(not_found)
}

async fn serve_feed(state: &AppState, creds: &Credentials, req: &Parts) -> Response {
    let query = Query::<FeedQuery>::try_from_uri(&req.uri)
        .map(|q| q.0)
        .unwrap_or_default();
    let rewriter = Rewriter::new(relay_for_request(creds, &query));

    let data = match state.store.reload().await {
        Ok(data) => data,
        Err(e) => {
            warn!(error = %e, "数据文件读取失败，仅输出本地节点");
            StoreData {
                subscriptions: Vec::new(),
                nodes: state.store.snapshot().await.nodes,
            }
        }
    };

    let merged = state.merger.merge(&data, &rewriter).await;
    let body = base64::engine::general_purpose::STANDARD.encode(merged);

    let remote = req
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(&req.headers, remote);
    info!(client_ip = %ip, size = body.len(), relay = ?rewriter.relay(), "订阅已生成");

    let event = FeedEvent {
        client_ip: ip,
        size: body.len(),
        time: chrono::Utc::now()
            .with_timezone(&state.settings.log_timezone)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        icon_url: icon_url(&req.headers),
    };
    state.notifier.notify(&creds.push_url, &event).await;

    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8")),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*")),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(host: &str, port: Option<u16>) -> Credentials {
        Credentials {
            relay_host: host.to_string(),
            relay_port: port,
            ..Default::default()
        }
    }

    #[test]
    fn query_overrides_stored_relay() {
        let stored = creds("time.is", Some(443));
        assert_eq!(
            relay_for_request(&stored, &FeedQuery::default()),
            Relay::from_parts("time.is", Some(443))
        );

        let query = FeedQuery {
            cfip: Some("cf.example".to_string()),
            cfport: Some("2053".to_string()),
        };
        assert_eq!(relay_for_request(&stored, &query), Relay::from_parts("cf.example", Some(2053)));

        // 非法端口回退到已保存的端口
        let query = FeedQuery {
            cfip: Some("  ".to_string()),
            cfport: Some("abc".to_string()),
        };
        assert_eq!(relay_for_request(&stored, &query), Relay::from_parts("time.is", Some(443)));

        // 含 @ / ? # 的主机会破坏 authority，回退到已保存的地址
        for bad in ["a@b/c", "x.example/path", "h?x", "h#x", "a b"] {
            let query = FeedQuery {
                cfip: Some(bad.to_string()),
                cfport: Some("2053".to_string()),
            };
            assert_eq!(relay_for_request(&stored, &query), Relay::from_parts("time.is", Some(2053)));
        }

        assert_eq!(relay_for_request(&creds("", Some(443)), &FeedQuery::default()), None);
    }

    #[test]
    fn client_ip_precedence() {
        let remote: SocketAddr = "[::ffff:10.0.0.9]:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(remote)), "10.0.0.9");
        assert_eq!(client_ip(&headers, None), "unknown");

        headers.insert("x-forwarded-for", HeaderValue::from_static("1.1.1.1, 2.2.2.2"));
        assert_eq!(client_ip(&headers, Some(remote)), "1.1.1.1");

        headers.insert("x-real-ip", HeaderValue::from_static("3.3.3.3"));
        assert_eq!(client_ip(&headers, Some(remote)), "3.3.3.3");

        headers.insert("cf-connecting-ip", HeaderValue::from_static("4.4.4.4"));
        assert_eq!(client_ip(&headers, Some(remote)), "4.4.4.4");
    }
}
