//! Key-value JSON persistence for glossary and dictionary mappings.
//!
//! Two backends: one JSON file per key in a local directory, or a single
//! JSON-bin style document holding every key. Loads never fail (a missing or
//! unreadable mapping comes back empty) and saves report success as a bool;
//! either way the failure is logged and the caller keeps going.

use crate::config::{Config, StorageKind};
use crate::retry::{with_retry, RetryPolicy};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Remote JSON-bin document store.
#[derive(Debug, Clone)]
pub struct RemoteStorage {
    http: reqwest::Client,
    url: String,
    token: Option<String>,
    bin_id: String,
}

#[derive(Debug, Deserialize)]
struct BinResponse {
    #[serde(default)]
    record: Value,
}

#[derive(Debug, Clone)]
pub enum Storage {
    File { dir: PathBuf },
    Remote(RemoteStorage),
}

impl Storage {
    pub fn file(dir: impl Into<PathBuf>) -> Self {
        Storage::File { dir: dir.into() }
    }

    pub fn remote(
        http: reqwest::Client,
        url: impl Into<String>,
        token: Option<String>,
        bin_id: impl Into<String>,
    ) -> Self {
        Storage::Remote(RemoteStorage {
            http,
            url: url.into().trim_end_matches('/').to_string(),
            token,
            bin_id: bin_id.into(),
        })
    }

    pub fn from_config(config: &Config, http: reqwest::Client) -> Result<Self> {
        match config.storage_kind {
            StorageKind::File => Ok(Storage::file(&config.storage_dir)),
            StorageKind::Url => {
                let (Some(url), Some(bin_id)) = (&config.storage_url, &config.storage_bin_id) else {
                    bail!("STORAGE_TYPE=url requires STORAGE_URL and STORAGE_BIN_ID");
                };
                Ok(Storage::remote(
                    http,
                    url.clone(),
                    config.storage_token.clone(),
                    bin_id.clone(),
                ))
            }
        }
    }

    /// Load the mapping stored under `key`, or an empty mapping.
    pub async fn load(&self, key: &str) -> Map<String, Value> {
        let result = match self {
            Storage::File { dir } => load_file(&key_path(dir, key)).await,
            Storage::Remote(remote) => remote.load_key(key).await,
        };

        match result {
            Ok(Some(map)) => {
                info!("Loaded '{}' ({} entries)", key, map.len());
                map
            }
            Ok(None) => {
                debug!("No stored mapping for '{}', starting empty", key);
                Map::new()
            }
            Err(e) => {
                error!("Failed to load '{}': {:#}", key, e);
                Map::new()
            }
        }
    }

    /// Store `mapping` under `key`. Returns whether the write succeeded.
    pub async fn save(&self, key: &str, mapping: &Map<String, Value>) -> bool {
        let result = match self {
            Storage::File { dir } => save_file(&key_path(dir, key), mapping).await,
            Storage::Remote(remote) => remote.save_key(key, mapping).await,
        };

        match result {
            Ok(()) => {
                debug!("Saved '{}' ({} entries)", key, mapping.len());
                true
            }
            Err(e) => {
                error!("Failed to save '{}': {:#}", key, e);
                false
            }
        }
    }
}

fn key_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.json", key))
}

async fn load_file(path: &Path) -> Result<Option<Map<String, Value>>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    if text.trim().is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    match value {
        Value::Object(map) => Ok(Some(map)),
        other => bail!("{} holds {} instead of an object", path.display(), kind(&other)),
    }
}

/// Write through a temp file and rename so readers never see half a file.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

async fn save_file(path: &Path, mapping: &Map<String, Value>) -> Result<()> {
    let json = serde_json::to_vec_pretty(mapping).context("Failed to serialize mapping")?;
    write_atomic(path, &json).await
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl RemoteStorage {
    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.header("X-Master-Key", token),
            None => builder,
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Map<String, Value>> {
        let response = self
            .request(self.http.get(url))
            .send()
            .await
            .context("Failed to reach storage")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            warn!("Storage bin {} not found, treating as empty", self.bin_id);
            return Ok(Map::new());
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Storage error ({}): {}", status, body);
        }

        let parsed: BinResponse = response
            .json()
            .await
            .context("Failed to parse storage response")?;
        match parsed.record {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Map::new()),
            other => bail!("Storage record is {} instead of an object", kind(&other)),
        }
    }

    async fn put_once(&self, url: &str, document: &Map<String, Value>) -> Result<()> {
        let response = self
            .request(self.http.put(url))
            .json(document)
            .send()
            .await
            .context("Failed to reach storage")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Storage error ({}): {}", status, body);
        }
        Ok(())
    }

    /// The whole bin document.
    async fn fetch_document(&self) -> Result<Map<String, Value>> {
        let url = format!("{}/{}/latest", self.url, self.bin_id);
        with_retry(&RetryPolicy::storage(), "Storage fetch", || self.fetch_once(&url)).await
    }

    async fn load_key(&self, key: &str) -> Result<Option<Map<String, Value>>> {
        let mut document = self.fetch_document().await?;
        match document.remove(key) {
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(Value::Null) | None => Ok(None),
            Some(other) => bail!("Stored '{}' is {} instead of an object", key, kind(&other)),
        }
    }

    async fn save_key(&self, key: &str, mapping: &Map<String, Value>) -> Result<()> {
        // Other keys live in the same document; merge rather than overwrite.
        let mut document = self.fetch_document().await?;
        document.insert(key.to_string(), Value::Object(mapping.clone()));
        let url = format!("{}/{}", self.url, self.bin_id);

        with_retry(&RetryPolicy::storage(), "Storage save", || {
            self.put_once(&url, &document)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::{
        matchers::{body_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn mapping(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test mapping must be an object"),
        }
    }

    // ==================== File Storage Tests ====================

    #[tokio::test]
    async fn test_file_save_then_load() {
        let dir = TempDir::new().expect("Should create temp dir");
        let storage = Storage::file(dir.path().join("nested"));

        let data = mapping(json!({"123": {"你好": "hello"}}));
        assert!(storage.save("dictionary", &data).await);

        let loaded = storage.load("dictionary").await;
        assert_eq!(loaded, data);
        assert!(dir.path().join("nested/dictionary.json").exists());
    }

    #[tokio::test]
    async fn test_file_missing_key_is_empty() {
        let dir = TempDir::new().expect("Should create temp dir");
        let storage = Storage::file(dir.path());
        assert!(storage.load("glossaries").await.is_empty());
    }

    #[tokio::test]
    async fn test_file_corrupt_json_is_empty() {
        let dir = TempDir::new().expect("Should create temp dir");
        std::fs::write(dir.path().join("glossaries.json"), "{not json").expect("write");
        let storage = Storage::file(dir.path());
        assert!(storage.load("glossaries").await.is_empty());
    }

    #[tokio::test]
    async fn test_file_non_object_is_empty() {
        let dir = TempDir::new().expect("Should create temp dir");
        std::fs::write(dir.path().join("glossaries.json"), "[1, 2]").expect("write");
        let storage = Storage::file(dir.path());
        assert!(storage.load("glossaries").await.is_empty());
    }

    // ==================== Remote Storage Tests ====================

    fn remote(server: &MockServer) -> Storage {
        Storage::remote(
            reqwest::Client::new(),
            format!("{}/b", server.uri()),
            Some("master".to_string()),
            "bin42",
        )
    }

    #[tokio::test]
    async fn test_remote_load_key() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/b/bin42/latest"))
            .and(header("X-Master-Key", "master"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "record": {
                    "dictionary": {"1": {"打野": "jungle"}},
                    "glossaries": {}
                },
                "metadata": {"id": "bin42"}
            })))
            .mount(&server)
            .await;

        let loaded = remote(&server).load("dictionary").await;
        assert_eq!(loaded, mapping(json!({"1": {"打野": "jungle"}})));
    }

    #[tokio::test]
    async fn test_remote_save_merges_document() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/b/bin42/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "record": {"glossaries": {"1": {}}}
            })))
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path("/b/bin42"))
            .and(body_json(json!({
                "glossaries": {"1": {}},
                "dictionary": {"1": {"中单": "mid"}}
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let saved = remote(&server)
            .save("dictionary", &mapping(json!({"1": {"中单": "mid"}})))
            .await;
        assert!(saved);
    }

    #[tokio::test]
    async fn test_remote_client_error_falls_back_to_empty() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/b/bin42/latest"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let storage = remote(&server);
        assert!(storage.load("dictionary").await.is_empty());
        assert!(!storage.save("dictionary", &Map::new()).await);
    }
}
