// 数据持久化
// Flat JSON documents: subscriptions/nodes and credentials

use rand::Rng;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::config::Settings;
use crate::rewrite::Relay;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),
}

// ============================================================================
// JsonDocument
// ============================================================================

/// One JSON file plus its in-memory mirror.
///
/// The mirror only changes after the file has been written, so a failed write
/// leaves both disk and memory at the previous value.
pub struct JsonDocument<T> {
    path: PathBuf,
    current: Mutex<T>,
}

impl<T> JsonDocument<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Load `path`, or persist `init()` there when the file does not exist.
    pub async fn open_or_create(path: impl Into<PathBuf>, init: impl FnOnce() -> T) -> Result<Self, StoreError> {
        let path = path.into();
        let value = match read_json(&path).await {
            Ok(value) => value,
            Err(StoreError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                let value = init();
                write_atomic(&path, &value).await?;
                value
            }
            Err(e) => return Err(e),
        };
        Ok(Self {
            path,
            current: Mutex::new(value),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> T {
        self.current.lock().await.clone()
    }

    /// Re-read the file and refresh the mirror.
    pub async fn reload(&self) -> Result<T, StoreError> {
        let mut current = self.current.lock().await;
        let value: T = read_json(&self.path).await?;
        *current = value.clone();
        Ok(value)
    }

    /// Apply `f` to a copy, persist it, then publish it.
    ///
    /// Writers are serialized by the document lock; the last one wins.
    pub async fn update<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut T) -> Result<R, E>,
        E: From<StoreError>,
    {
        let mut current = self.current.lock().await;
        let mut next = current.clone();
        let out = f(&mut next)?;
        write_atomic(&self.path, &next).await?;
        *current = next;
        Ok(out)
    }

    pub async fn replace(&self, value: T) -> Result<(), StoreError> {
        self.update(move |current| {
            *current = value;
            Ok::<_, StoreError>(())
        })
        .await
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let text = tokio::fs::read_to_string(path).await.map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

async fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    // 先落盘再 rename，断电后不会留下空文件
    let written = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;
    if let Err(source) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(source));
    }
    Ok(())
}

// ============================================================================
// Subscriptions & nodes
// ============================================================================

/// Node list as it may appear in a document: already joined, or one per item.
#[derive(Deserialize, Clone, Debug)]
#[serde(untagged)]
pub enum NodeText {
    Joined(String),
    Lines(Vec<String>),
}

impl NodeText {
    pub fn into_joined(self) -> String {
        match self {
            NodeText::Joined(text) => text,
            NodeText::Lines(lines) => lines.join("\n"),
        }
    }
}

fn node_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<NodeText>::deserialize(deserializer)?
        .map(NodeText::into_joined)
        .unwrap_or_default())
}

/// Contents of `data.json`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct StoreData {
    #[serde(default)]
    pub subscriptions: Vec<String>,
    #[serde(default, deserialize_with = "node_text")]
    pub nodes: String,
}

impl StoreData {
    pub fn node_lines(&self) -> impl Iterator<Item = &str> {
        self.nodes.lines().map(str::trim).filter(|l| !l.is_empty())
    }

    /// Returns `false` when the URL is already present.
    pub fn add_subscription(&mut self, url: &str) -> bool {
        if self.subscriptions.iter().any(|s| s == url) {
            return false;
        }
        self.subscriptions.push(url.to_string());
        true
    }

    pub fn remove_subscription(&mut self, url: &str) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s != url);
        self.subscriptions.len() != before
    }

    pub fn append_nodes<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut all: Vec<String> = self.node_lines().map(str::to_string).collect();
        all.extend(lines.into_iter().map(|l| l.as_ref().trim().to_string()).filter(|l| !l.is_empty()));
        self.nodes = all.join("\n");
    }

    /// Removes the first line equal to `node`.
    pub fn remove_node(&mut self, node: &str) -> bool {
        let node = node.trim();
        let mut lines: Vec<&str> = self.node_lines().collect();
        let Some(idx) = lines.iter().position(|l| *l == node) else {
            return false;
        };
        lines.remove(idx);
        self.nodes = lines.join("\n");
        true
    }

    /// Replaces the first line equal to `old` with `new`.
    pub fn replace_node(&mut self, old: &str, new: &str) -> bool {
        let old = old.trim();
        let mut lines: Vec<String> = self.node_lines().map(str::to_string).collect();
        let Some(line) = lines.iter_mut().find(|l| l.as_str() == old) else {
            return false;
        };
        *line = new.trim().to_string();
        self.nodes = lines.join("\n");
        true
    }

    /// Backup payload normalisation: trimmed, de-duplicated subscriptions.
    pub fn normalized(subscriptions: Vec<String>, nodes: String) -> Self {
        let mut data = StoreData::default();
        for url in subscriptions {
            let url = url.trim();
            if !url.is_empty() {
                data.add_subscription(url);
            }
        }
        data.nodes = nodes;
        data
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Accepts a port as integer, numeric string, empty string or null.
pub fn port_from_str_or_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u16>, D::Error> {
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u16::try_from(n).ok())
            .filter(|p| *p != 0)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid port {}", n))),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid port {:?}", s))),
        Some(other) => Err(D::Error::custom(format!("invalid port {}", other))),
    }
}

/// Contents of `credentials.json`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, alias = "sub_token")]
    pub subscription_token: String,
    #[serde(default)]
    pub session_secret: String,
    #[serde(default, alias = "cf_ip")]
    pub relay_host: String,
    #[serde(default, alias = "cf_port", deserialize_with = "port_from_str_or_int")]
    pub relay_port: Option<u16>,
    #[serde(default, alias = "bark_url")]
    pub push_url: String,
}

pub const TOKEN_LEN: usize = 24;
pub const SECRET_LEN: usize = 32;

pub fn random_token(len: usize) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..len).map(|_| HEX[rng.gen_range(0..HEX.len())] as char).collect()
}

impl Credentials {
    /// First-run credentials seeded from settings.
    pub fn initial(settings: &Settings) -> Self {
        let mut creds = Credentials {
            username: settings.default_username.clone(),
            password: settings.default_password.clone(),
            subscription_token: settings.initial_sub_token.clone().unwrap_or_default(),
            ..Default::default()
        };
        creds.fill_missing(settings);
        creds
    }

    /// Fills in whatever an older or hand-edited file lacks. Returns whether
    /// anything changed.
    pub fn fill_missing(&mut self, settings: &Settings) -> bool {
        let mut changed = false;
        if self.username.trim().is_empty() {
            self.username = settings.default_username.clone();
            changed = true;
        }
        if self.password.is_empty() {
            self.password = settings.default_password.clone();
            changed = true;
        }
        if self.subscription_token.trim().is_empty() {
            self.subscription_token = random_token(TOKEN_LEN);
            changed = true;
        }
        if self.session_secret.is_empty() {
            self.session_secret = random_token(SECRET_LEN);
            changed = true;
        }
        if self.relay_host.trim().is_empty() && !settings.default_relay_host.is_empty() {
            self.relay_host = settings.default_relay_host.clone();
            changed = true;
        }
        if self.relay_port.is_none() && settings.default_relay_port.is_some() {
            self.relay_port = settings.default_relay_port;
            changed = true;
        }
        changed
    }

    pub fn relay(&self) -> Option<Relay> {
        Relay::from_parts(&self.relay_host, self.relay_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_created_with_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        let doc = JsonDocument::open_or_create(&path, StoreData::default).await.unwrap();
        assert_eq!(doc.snapshot().await, StoreData::default());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error_and_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = JsonDocument::open_or_create(&path, StoreData::default).await.err().unwrap();
        assert!(matches!(err, StoreError::Parse { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{not json");
    }

    #[tokio::test]
    async fn update_persists_then_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        let doc = JsonDocument::open_or_create(&path, StoreData::default).await.unwrap();

        let added = doc
            .update(|d| Ok::<_, StoreError>(d.add_subscription("https://a.example/sub")))
            .await
            .unwrap();
        assert!(added);

        let on_disk: StoreData = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.subscriptions, vec!["https://a.example/sub"]);
        assert_eq!(doc.snapshot().await, on_disk);

        // no temp files left behind
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn repeated_replace_keeps_a_complete_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        let doc = JsonDocument::open_or_create(&path, StoreData::default).await.unwrap();

        for i in 0..5 {
            let data = StoreData {
                subscriptions: vec![format!("https://{}.example/sub", i)],
                nodes: format!("ss://node-{}", i),
            };
            doc.replace(data.clone()).await.unwrap();
            let on_disk: StoreData = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
            assert_eq!(on_disk, data);
        }

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["data.json"]);
    }

    #[tokio::test]
    async fn failed_write_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        let doc = JsonDocument::open_or_create(sub.join("data.json"), StoreData::default)
            .await
            .unwrap();
        doc.update(|d| {
            d.append_nodes(["ss://a"]);
            Ok::<_, StoreError>(())
        })
        .await
        .unwrap();

        std::fs::remove_dir_all(&sub).unwrap();
        let result = doc
            .update(|d| {
                d.append_nodes(["ss://b"]);
                Ok::<_, StoreError>(())
            })
            .await;
        assert!(matches!(result, Err(StoreError::Io { .. })));
        assert_eq!(doc.snapshot().await.nodes, "ss://a");
    }

    #[tokio::test]
    async fn closure_error_skips_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        let doc = JsonDocument::open_or_create(&path, StoreData::default).await.unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        #[derive(Debug)]
        struct Rejected;
        impl From<StoreError> for Rejected {
            fn from(_: StoreError) -> Self {
                Rejected
            }
        }
        let result: Result<(), Rejected> = doc
            .update(|d| {
                d.append_nodes(["ss://never"]);
                Err(Rejected)
            })
            .await;
        assert!(result.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
        assert!(doc.snapshot().await.nodes.is_empty());
    }

    #[tokio::test]
    async fn reload_picks_up_external_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        let doc = JsonDocument::open_or_create(&path, StoreData::default).await.unwrap();
        std::fs::write(&path, r#"{"subscriptions":["https://x"],"nodes":"ss://1"}"#).unwrap();
        let data = doc.reload().await.unwrap();
        assert_eq!(data.subscriptions, vec!["https://x"]);
        assert_eq!(doc.snapshot().await.nodes, "ss://1");
    }

    #[test]
    fn nodes_may_be_an_array() {
        let data: StoreData = serde_json::from_str(r#"{"subscriptions":[],"nodes":["a","b"]}"#).unwrap();
        assert_eq!(data.nodes, "a\nb");
        let data: StoreData = serde_json::from_str(r#"{"nodes":null}"#).unwrap();
        assert_eq!(data, StoreData::default());
    }

    #[test]
    fn subscriptions_stay_unique() {
        let mut data = StoreData::default();
        assert!(data.add_subscription("https://a"));
        assert!(!data.add_subscription("https://a"));
        assert!(data.add_subscription("https://b"));
        assert!(data.remove_subscription("https://a"));
        assert!(!data.remove_subscription("https://a"));
        assert_eq!(data.subscriptions, vec!["https://b"]);

        let data = StoreData::normalized(
            vec![" https://a ".into(), "https://a".into(), "".into()],
            String::new(),
        );
        assert_eq!(data.subscriptions, vec!["https://a"]);
    }

    #[test]
    fn node_line_edits() {
        let mut data = StoreData::default();
        data.append_nodes(["ss://a", "  ", "ss://b "]);
        assert_eq!(data.nodes, "ss://a\nss://b");
        data.append_nodes(vec!["ss://a".to_string()]);
        assert_eq!(data.nodes, "ss://a\nss://b\nss://a");

        assert!(data.remove_node(" ss://a"));
        assert_eq!(data.nodes, "ss://b\nss://a");
        assert!(!data.remove_node("ss://zzz"));

        assert!(data.replace_node("ss://a", "ss://a#x"));
        assert_eq!(data.nodes, "ss://b\nss://a#x");
        assert!(!data.replace_node("ss://a", "ss://c"));
    }

    #[test]
    fn legacy_credential_keys_are_accepted() {
        let creds: Credentials = serde_json::from_str(
            r#"{"username":"u","password":"p","sub_token":"tok","session_secret":"s",
                "bark_url":"https://bark.example/key","cf_ip":"time.is","cf_port":"2053"}"#,
        )
        .unwrap();
        assert_eq!(creds.subscription_token, "tok");
        assert_eq!(creds.push_url, "https://bark.example/key");
        assert_eq!(creds.relay(), Relay::from_parts("time.is", Some(2053)));

        let creds: Credentials = serde_json::from_str(r#"{"relay_host":"h","relay_port":443}"#).unwrap();
        assert_eq!(creds.relay_port, Some(443));
        let creds: Credentials = serde_json::from_str(r#"{"relay_port":""}"#).unwrap();
        assert_eq!(creds.relay_port, None);
        assert!(serde_json::from_str::<Credentials>(r#"{"relay_port":"abc"}"#).is_err());
        assert!(serde_json::from_str::<Credentials>(r#"{"relay_port":70000}"#).is_err());
    }

    #[test]
    fn fill_missing_generates_secrets_once() {
        let settings = Settings::default();
        let mut creds = Credentials::initial(&settings);
        assert_eq!(creds.subscription_token.len(), TOKEN_LEN);
        assert_eq!(creds.session_secret.len(), SECRET_LEN);
        assert_eq!(creds.username, settings.default_username);
        assert!(!creds.fill_missing(&settings));
    }

    #[test]
    fn random_tokens_differ() {
        let a = random_token(TOKEN_LEN);
        let b = random_token(TOKEN_LEN);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
