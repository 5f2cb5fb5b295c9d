// 节点链接解析
// Link parsing: protocol detection and remark extraction / editing

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use std::fmt;
use utoipa::ToSchema;

/// Query keys that may carry a node remark, in lookup priority order.
pub const REMARK_KEYS: [&str; 9] = [
    "remarks", "remark", "name", "ps", "tag", "label", "alias", "desc", "title",
];

const VMESS_REMARK_KEYS: [&str; 4] = ["ps", "name", "remark", "tag"];
const SSR_REMARK_KEYS: [&str; 3] = ["remarks", "remark", "tag"];

// encodeURIComponent 字符集
pub(crate) const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

// ============================================================================
// Protocol
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    Vmess,
    Vless,
    Trojan,
    Shadowsocks,
    ShadowsocksR,
    Hysteria,
    Hysteria2,
    Tuic,
    WireGuard,
    Other,
    Unknown,
}

const SCHEMES: [(&str, Protocol); 11] = [
    ("vmess", Protocol::Vmess),
    ("vless", Protocol::Vless),
    ("trojan", Protocol::Trojan),
    ("ss", Protocol::Shadowsocks),
    ("ssr", Protocol::ShadowsocksR),
    ("hysteria", Protocol::Hysteria),
    ("hysteria2", Protocol::Hysteria2),
    ("hy2", Protocol::Hysteria2),
    ("tuic", Protocol::Tuic),
    ("wireguard", Protocol::WireGuard),
    ("wg", Protocol::WireGuard),
];

impl Protocol {
    /// Classify a node purely by its scheme prefix.
    pub fn of(link: &str) -> Self {
        let link = link.trim();
        if link.is_empty() {
            return Protocol::Unknown;
        }
        let Some((scheme, _)) = link.split_once("://") else {
            return Protocol::Other;
        };
        SCHEMES
            .iter()
            .find(|(name, _)| scheme.eq_ignore_ascii_case(name))
            .map(|(_, protocol)| *protocol)
            .unwrap_or(Protocol::Other)
    }

    pub fn label(self) -> &'static str {
        match self {
            Protocol::Vmess => "VMESS",
            Protocol::Vless => "VLESS",
            Protocol::Trojan => "TROJAN",
            Protocol::Shadowsocks => "SS",
            Protocol::ShadowsocksR => "SSR",
            Protocol::Hysteria => "Hysteria",
            Protocol::Hysteria2 => "Hysteria2",
            Protocol::Tuic => "TUIC",
            Protocol::WireGuard => "WireGuard",
            Protocol::Other => "Other",
            Protocol::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 节点展示信息
#[derive(ToSchema, Serialize, Clone, Debug, PartialEq)]
pub struct NodeInfo {
    #[schema(example = "vless://uuid@example.com:443?type=ws&security=tls#HK")]
    pub link: String,
    #[schema(example = "VLESS")]
    pub protocol: String,
    #[schema(example = "HK")]
    pub remark: String,
}

pub fn describe(link: &str) -> NodeInfo {
    NodeInfo {
        link: link.to_string(),
        protocol: Protocol::of(link).label().to_string(),
        remark: remark(link),
    }
}

// ============================================================================
// Decoding helpers
// ============================================================================

/// Base64 decode that accepts the URL-safe alphabet, missing padding and
/// embedded whitespace.
pub fn decode_base64_lenient(input: &str) -> Option<Vec<u8>> {
    let normalized: String = input
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();
    let normalized = normalized.trim_end_matches('=');
    if normalized.is_empty() {
        return None;
    }
    LENIENT_BASE64.decode(normalized).ok()
}

/// Percent-decode like `decodeURIComponent`; undecodable input is kept as is.
fn decode_component(input: &str) -> String {
    percent_decode_str(input)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| input.to_string())
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Everything after `scheme://`, up to the fragment.
fn payload(link: &str) -> Option<&str> {
    let (_, rest) = link.split_once("://")?;
    Some(rest.split('#').next().unwrap_or_default())
}

// ============================================================================
// Remark extraction
// ============================================================================

type RemarkStrategy = fn(&str) -> Option<String>;

// 按优先级依次尝试，首个成功者生效
const REMARK_STRATEGIES: [RemarkStrategy; 4] = [
    remark_from_query,
    remark_from_fragment,
    remark_from_vmess_json,
    remark_from_ssr_params,
];

/// Best-effort human readable label of a node; empty when none is found.
pub fn remark(link: &str) -> String {
    let link = link.trim();
    REMARK_STRATEGIES
        .iter()
        .find_map(|strategy| strategy(link))
        .unwrap_or_default()
}

fn remark_from_query(link: &str) -> Option<String> {
    let (_, rest) = link.split_once('?')?;
    let query = rest.split('#').next().unwrap_or_default();
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    REMARK_KEYS.iter().find_map(|key| {
        pairs
            .iter()
            .find(|(k, v)| k == key && !v.trim().is_empty())
            .map(|(_, v)| v.clone())
    })
}

fn remark_from_fragment(link: &str) -> Option<String> {
    let (_, fragment) = link.split_once('#')?;
    non_empty(decode_component(fragment))
}

fn remark_from_vmess_json(link: &str) -> Option<String> {
    if Protocol::of(link) != Protocol::Vmess {
        return None;
    }
    let decoded = decode_base64_lenient(payload(link)?)?;
    let node: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    VMESS_REMARK_KEYS.iter().find_map(|key| {
        node.get(*key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .and_then(non_empty)
    })
}

fn remark_from_ssr_params(link: &str) -> Option<String> {
    if Protocol::of(link) != Protocol::ShadowsocksR {
        return None;
    }
    let decoded = decode_base64_lenient(payload(link)?)?;
    let decoded = String::from_utf8_lossy(&decoded);
    let (_, query) = decoded.split_once("/?")?;
    // 参数值本身是 base64url，不能按表单规则解码
    let params: Vec<(&str, &str)> = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .collect();
    SSR_REMARK_KEYS.iter().find_map(|key| {
        let (_, value) = params.iter().find(|(k, v)| k == key && !v.is_empty())?;
        let bytes = decode_base64_lenient(value)?;
        non_empty(decode_component(&String::from_utf8_lossy(&bytes)))
    })
}

// ============================================================================
// Remark editing
// ============================================================================

fn is_remark_param(pair: &str) -> bool {
    match pair.split_once('=') {
        Some((key, _)) => REMARK_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key)),
        None => false,
    }
}

/// Remove the fragment and every remark-like query parameter.
pub fn strip_remark(link: &str) -> String {
    let link = link.trim();
    let base = link.split('#').next().unwrap_or_default();
    let Some((head, query)) = base.split_once('?') else {
        return base.to_string();
    };
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| !pair.is_empty() && !is_remark_param(pair))
        .collect();
    if kept.is_empty() {
        head.to_string()
    } else {
        format!("{}?{}", head, kept.join("&"))
    }
}

/// Replace whatever remark the link carries with `remark` (as a fragment).
pub fn with_remark(link: &str, remark: &str) -> String {
    let cleaned = strip_remark(link);
    let remark = remark.trim();
    if remark.is_empty() {
        return cleaned;
    }
    format!("{}#{}", cleaned, utf8_percent_encode(remark, COMPONENT))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(s: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(s)
    }

    #[test]
    fn protocol_from_scheme() {
        assert_eq!(Protocol::of("vmess://abc"), Protocol::Vmess);
        assert_eq!(Protocol::of("VLESS://abc"), Protocol::Vless);
        assert_eq!(Protocol::of("trojan://p@h:1"), Protocol::Trojan);
        assert_eq!(Protocol::of("ss://abc"), Protocol::Shadowsocks);
        assert_eq!(Protocol::of("ssr://abc"), Protocol::ShadowsocksR);
        assert_eq!(Protocol::of("hysteria://h:1"), Protocol::Hysteria);
        assert_eq!(Protocol::of("hysteria2://h:1"), Protocol::Hysteria2);
        assert_eq!(Protocol::of("hy2://h:1"), Protocol::Hysteria2);
        assert_eq!(Protocol::of("tuic://h:1"), Protocol::Tuic);
        assert_eq!(Protocol::of("wg://h:1"), Protocol::WireGuard);
        assert_eq!(Protocol::of("wireguard://h:1"), Protocol::WireGuard);
        assert_eq!(Protocol::of("socks5://h:1"), Protocol::Other);
        assert_eq!(Protocol::of("not a link"), Protocol::Other);
        assert_eq!(Protocol::of("   "), Protocol::Unknown);
        assert_eq!(Protocol::of(""), Protocol::Unknown);
    }

    #[test]
    fn query_remark_wins_over_fragment() {
        let link = "vless://id@h:443?type=ws&remarks=Query%20Name#Fragment";
        assert_eq!(remark(link), "Query Name");
    }

    #[test]
    fn query_remark_follows_key_priority() {
        let link = "trojan://p@h:443?title=t&name=n";
        assert_eq!(remark(link), "n");
    }

    #[test]
    fn fragment_remark_is_percent_decoded() {
        let link = "ss://YWVzOnB3@h:8388#%E9%A6%99%E6%B8%AF%2001";
        assert_eq!(remark(link), "香港 01");
    }

    #[test]
    fn malformed_fragment_is_kept_raw() {
        assert_eq!(remark("ss://x@h:1#100%"), "100%");
    }

    #[test]
    fn vmess_remark_from_embedded_json() {
        let link = format!("vmess://{}", b64(r#"{"v":"2","ps":"JP-1","add":"a.com"}"#));
        assert_eq!(remark(&link), "JP-1");

        let link = format!("vmess://{}", b64(r#"{"ps":"","name":"fallback"}"#));
        assert_eq!(remark(&link), "fallback");
    }

    #[test]
    fn vmess_remark_tolerates_url_safe_base64() {
        let json = r#"{"ps":"x>>?","add":"a"}"#;
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json);
        assert_eq!(remark(&format!("vmess://{}", encoded)), "x>>?");
    }

    #[test]
    fn ssr_remark_from_nested_param() {
        let remark_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode("新加坡");
        let inner = format!("1.2.3.4:443:origin:aes-256-cfb:plain:cHc/?obfsparam=&remarks={}", remark_b64);
        let link = format!("ssr://{}", base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(inner));
        assert_eq!(remark(&link), "新加坡");
    }

    #[test]
    fn undecodable_payloads_yield_empty_remark() {
        assert_eq!(remark("vmess://%%%not-base64"), "");
        assert_eq!(remark(&format!("vmess://{}", b64("not json"))), "");
        assert_eq!(remark("ssr://!!!!"), "");
        assert_eq!(remark(""), "");
    }

    #[test]
    fn strip_removes_fragment_and_remark_params() {
        let link = "vless://id@h:443?name=a&type=ws&security=tls&Remarks=b#frag";
        assert_eq!(strip_remark(link), "vless://id@h:443?type=ws&security=tls");
    }

    #[test]
    fn strip_normalizes_leftover_separators() {
        assert_eq!(strip_remark("trojan://p@h:443?name=x"), "trojan://p@h:443");
        assert_eq!(strip_remark("trojan://p@h:443?a=1&&name=x&"), "trojan://p@h:443?a=1");
        assert_eq!(strip_remark("trojan://p@h:443?"), "trojan://p@h:443");
    }

    #[test]
    fn strip_keeps_params_that_only_contain_a_remark_key() {
        let link = "vless://id@h:443?servername=s&type=ws";
        assert_eq!(strip_remark(link), link);
    }

    #[test]
    fn with_remark_encodes_like_uri_component() {
        let link = "ss://abc@h:1?plugin=x#old";
        assert_eq!(with_remark(link, "香港 A"), "ss://abc@h:1?plugin=x#%E9%A6%99%E6%B8%AF%20A");
        assert_eq!(remark(&with_remark(link, "香港 A")), "香港 A");
    }

    #[test]
    fn empty_remark_gives_clean_link() {
        assert_eq!(with_remark("ss://abc@h:1#old", ""), "ss://abc@h:1");
        assert_eq!(with_remark("ss://abc@h:1#old", "   "), "ss://abc@h:1");
    }

    #[test]
    fn attach_then_strip_round_trips() {
        let links = [
            "vless://id@h:443?type=ws&security=tls",
            "trojan://p@h:443?a=1&&b=2&",
            "ss://abc@h:1",
            "hy2://pw@h:8443/?sni=x",
        ];
        for link in links {
            let clean = strip_remark(link);
            assert_eq!(strip_remark(&with_remark(&clean, "foo")), clean);
        }
    }

    #[test]
    fn describe_reports_protocol_and_remark() {
        let info = describe("trojan://p@h:443#Tokyo");
        assert_eq!(info.protocol, "TROJAN");
        assert_eq!(info.remark, "Tokyo");
    }
}
