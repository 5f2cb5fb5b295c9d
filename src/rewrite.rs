// 优选地址替换
// Relay address rewriting for TLS + websocket-family nodes

use base64::Engine;
use serde_json::{Map, Value};
use std::ops::Range;
use url::Url;

use crate::link::{decode_base64_lenient, Protocol};

const WS_FAMILY: [&str; 2] = ["ws", "xhttp"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relay {
    pub host: String,
    pub port: u16,
}

impl Relay {
    /// `None` unless both a host and a port are configured.
    pub fn from_parts(host: &str, port: Option<u16>) -> Option<Self> {
        let host = host.trim();
        if host.is_empty() {
            return None;
        }
        Some(Relay {
            host: host.to_string(),
            port: port?,
        })
    }

    fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Rewriter {
    relay: Option<Relay>,
}

impl Rewriter {
    pub fn new(relay: Option<Relay>) -> Self {
        Self { relay }
    }

    pub fn relay(&self) -> Option<&Relay> {
        self.relay.as_ref()
    }

    /// Rewrite one node; anything that does not qualify comes back unchanged.
    pub fn rewrite_line(&self, line: &str) -> String {
        let Some(relay) = &self.relay else {
            return line.to_string();
        };
        let rewritten = match Protocol::of(line) {
            Protocol::Vmess => rewrite_vmess(relay, line),
            Protocol::Vless | Protocol::Trojan => rewrite_authority(relay, line),
            _ => None,
        };
        rewritten.unwrap_or_else(|| line.to_string())
    }

    /// Trimmed, non-blank lines of `text`, each passed through [`rewrite_line`].
    ///
    /// [`rewrite_line`]: Rewriter::rewrite_line
    pub fn rewrite_lines<'a>(&'a self, text: &'a str) -> impl Iterator<Item = String> + 'a {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(move |line| self.rewrite_line(line))
    }
}

fn str_field<'a>(node: &'a Map<String, Value>, key: &str) -> &'a str {
    node.get(key).and_then(Value::as_str).unwrap_or("")
}

fn rewrite_vmess(relay: &Relay, line: &str) -> Option<String> {
    let prefix_len = line.find("://")? + 3;
    // 备注片段不参与解码，改写后原样接回
    let (payload, fragment) = match line[prefix_len..].find('#') {
        Some(i) => line[prefix_len..].split_at(i),
        None => (&line[prefix_len..], ""),
    };
    let decoded = decode_base64_lenient(payload)?;
    let mut node: Map<String, Value> = serde_json::from_slice(&decoded).ok()?;

    let net = str_field(&node, "net");
    if !WS_FAMILY.contains(&net) || str_field(&node, "tls") != "tls" {
        return None;
    }
    // host 与 add 相同视为用户刻意固定，不替换
    let host = str_field(&node, "host");
    if !host.is_empty() && host == str_field(&node, "add") {
        return None;
    }

    node.insert("add".to_string(), Value::String(relay.host.clone()));
    node.insert("port".to_string(), Value::from(relay.port));
    let json = serde_json::to_string(&node).ok()?;
    Some(format!(
        "{}{}{}",
        &line[..prefix_len],
        base64::engine::general_purpose::STANDARD.encode(json),
        fragment
    ))
}

fn rewrite_authority(relay: &Relay, line: &str) -> Option<String> {
    let url = Url::parse(line).ok()?;

    let mut transport = None;
    let mut security = None;
    let mut host_param = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "type" if transport.is_none() => transport = Some(value.into_owned()),
            "security" if security.is_none() => security = Some(value.into_owned()),
            "host" if host_param.is_none() => host_param = Some(value.into_owned()),
            _ => {}
        }
    }
    if !transport.as_deref().is_some_and(|t| WS_FAMILY.contains(&t)) {
        return None;
    }
    if security.as_deref() != Some("tls") {
        return None;
    }
    let hostname = url.host_str()?.trim_start_matches('[').trim_end_matches(']');
    if host_param.is_some_and(|h| !h.is_empty() && h == hostname) {
        return None;
    }

    let span = host_port_span(line)?;
    Some(format!(
        "{}{}{}",
        &line[..span.start],
        relay.authority(),
        &line[span.end..]
    ))
}

/// Byte range of `host[:port]` inside the authority, i.e. after the last `@`
/// and before the first `/`, `?` or `#`.
fn host_port_span(line: &str) -> Option<Range<usize>> {
    let start = line.find("://")? + 3;
    let end = line[start..]
        .find(|c| matches!(c, '/' | '?' | '#'))
        .map_or(line.len(), |i| start + i);
    let host_start = line[start..end].rfind('@').map_or(start, |i| start + i + 1);
    if host_start >= end {
        return None;
    }
    Some(host_start..end)
}
