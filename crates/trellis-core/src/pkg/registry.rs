//! npm registry access.
//!
//! Resolvers and fetchers talk to a [`PackumentSource`]: the HTTP
//! [`RegistryClient`] in production, or a [`MemoryRegistry`] for offline
//! mirrors and tests.

use super::error::PkgError;
use super::tarball::{download_tarball, MAX_TARBALL_SIZE};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Where package metadata and tarballs come from.
#[async_trait]
pub trait PackumentSource: Send + Sync + fmt::Debug {
    /// Fetch the packument (all published versions) for a package name.
    async fn fetch_packument(&self, name: &str) -> Result<Arc<Value>, PkgError>;

    /// Download a tarball by URL.
    async fn fetch_tarball(&self, url: &str) -> Result<Bytes, PkgError>;
}

/// Registry client for fetching package metadata over HTTP.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: Url,
    http: Client,
    packuments: Arc<Mutex<HashMap<String, Arc<Value>>>>,
}

impl RegistryClient {
    /// Create a new registry client with the given base URL.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be created.
    pub fn new(base_url: &str) -> Result<Self, PkgError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| PkgError::registry(format!("Invalid registry URL '{base_url}': {e}")))?;

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .user_agent(format!("trellis/{}", crate::VERSION))
            .build()
            .map_err(|e| PkgError::registry(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            http,
            packuments: Arc::default(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl PackumentSource for RegistryClient {
    async fn fetch_packument(&self, name: &str) -> Result<Arc<Value>, PkgError> {
        if let Some(cached) = self.packuments.lock().ok().and_then(|p| p.get(name).cloned()) {
            return Ok(cached);
        }

        // Scoped names travel as `@scope%2Fname`
        let encoded_name = name.replace('/', "%2F");
        let url = self
            .base_url
            .join(&encoded_name)
            .map_err(|e| PkgError::registry(format!("Failed to build URL for '{name}': {e}")))?;

        debug!(%url, "Fetching packument");
        let response = self
            .http
            .get(url.as_str())
            .header("Accept", "application/vnd.npm.install-v1+json")
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PkgError::registry(format!("Package not found: {name}")));
        }

        if !response.status().is_success() {
            return Err(PkgError::registry(format!(
                "Registry returned status {} for '{name}'",
                response.status()
            )));
        }

        let packument = Arc::new(response.json::<Value>().await?);
        if let Ok(mut packuments) = self.packuments.lock() {
            packuments.insert(name.to_string(), Arc::clone(&packument));
        }
        Ok(packument)
    }

    async fn fetch_tarball(&self, url: &str) -> Result<Bytes, PkgError> {
        download_tarball(&self.http, url, MAX_TARBALL_SIZE).await
    }
}

/// In-memory registry: packuments by name, tarballs by URL.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    packuments: HashMap<String, Arc<Value>>,
    tarballs: HashMap<String, Bytes>,
    packument_requests: AtomicUsize,
    tarball_requests: AtomicUsize,
}

impl MemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a published version. The tarball URL is derived from the name and version.
    pub fn publish(&mut self, manifest: Value, tarball: impl Into<Bytes>) -> &mut Self {
        let name = manifest
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let version = manifest
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let url = format!("memory://{name}/-/{version}.tgz");

        let mut entry = manifest;
        if let Some(object) = entry.as_object_mut() {
            object.insert("dist".to_string(), serde_json::json!({ "tarball": url }));
        }

        let packument = self
            .packuments
            .entry(name.clone())
            .or_insert_with(|| Arc::new(serde_json::json!({ "name": name, "dist-tags": {}, "versions": {} })));
        let packument = Arc::make_mut(packument);
        packument["versions"][&version] = entry;
        packument["dist-tags"]["latest"] = Value::String(version);

        self.tarballs.insert(url, tarball.into());
        self
    }

    /// Point a dist-tag at a version.
    pub fn tag(&mut self, name: &str, tag: &str, version: &str) -> &mut Self {
        if let Some(packument) = self.packuments.get_mut(name) {
            Arc::make_mut(packument)["dist-tags"][tag] = Value::String(version.to_string());
        }
        self
    }

    /// How many packument lookups were served.
    #[must_use]
    pub fn packument_requests(&self) -> usize {
        self.packument_requests.load(Ordering::SeqCst)
    }

    /// How many tarball downloads were served.
    #[must_use]
    pub fn tarball_requests(&self) -> usize {
        self.tarball_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackumentSource for MemoryRegistry {
    async fn fetch_packument(&self, name: &str) -> Result<Arc<Value>, PkgError> {
        self.packument_requests.fetch_add(1, Ordering::SeqCst);
        self.packuments
            .get(name)
            .cloned()
            .ok_or_else(|| PkgError::registry(format!("Package not found: {name}")))
    }

    async fn fetch_tarball(&self, url: &str) -> Result<Bytes, PkgError> {
        self.tarball_requests.fetch_add(1, Ordering::SeqCst);
        self.tarballs
            .get(url)
            .cloned()
            .ok_or_else(|| PkgError::fetch_failed(format!("Download failed for '{url}'")))
    }
}

/// Version string a dist-tag points at.
#[must_use]
pub fn get_dist_tag<'a>(packument: &'a Value, tag: &str) -> Option<&'a str> {
    packument.get("dist-tags")?.get(tag)?.as_str()
}

/// The manifest of a specific published version.
#[must_use]
pub fn get_version_manifest<'a>(packument: &'a Value, version: &str) -> Option<&'a Value> {
    packument.get("versions")?.get(version)
}

/// Extract the tarball URL for a specific version.
#[must_use]
pub fn get_tarball_url<'a>(packument: &'a Value, version: &str) -> Option<&'a str> {
    get_version_manifest(packument, version)?
        .get("dist")?
        .get("tarball")?
        .as_str()
}

/// Get all available version strings from a packument.
#[must_use]
pub fn get_versions(packument: &Value) -> Vec<&str> {
    packument
        .get("versions")
        .and_then(Value::as_object)
        .map(|obj| obj.keys().map(String::as_str).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_dist_tag() {
        let packument = serde_json::json!({
            "name": "react",
            "dist-tags": { "latest": "18.2.0", "next": "19.0.0-rc.0" }
        });

        assert_eq!(get_dist_tag(&packument, "latest"), Some("18.2.0"));
        assert_eq!(get_dist_tag(&packument, "beta"), None);
    }

    #[test]
    fn test_get_tarball_url() {
        let packument = serde_json::json!({
            "name": "react",
            "versions": {
                "18.2.0": {
                    "dist": { "tarball": "https://registry.npmjs.org/react/-/react-18.2.0.tgz" }
                }
            }
        });

        assert_eq!(
            get_tarball_url(&packument, "18.2.0"),
            Some("https://registry.npmjs.org/react/-/react-18.2.0.tgz")
        );
        assert_eq!(get_tarball_url(&packument, "17.0.0"), None);
    }

    #[test]
    fn test_client_invalid_url() {
        assert!(RegistryClient::new("not-a-url").is_err());
        assert!(RegistryClient::new("https://registry.npmjs.org/").is_ok());
    }

    #[tokio::test]
    async fn test_memory_registry_publish() {
        let mut registry = MemoryRegistry::new();
        registry
            .publish(serde_json::json!({"name": "a", "version": "1.0.0"}), vec![1, 2, 3])
            .publish(serde_json::json!({"name": "a", "version": "1.1.0"}), vec![4]);

        let packument = registry.fetch_packument("a").await.unwrap();
        let mut versions = get_versions(&packument);
        versions.sort_unstable();
        assert_eq!(versions, vec!["1.0.0", "1.1.0"]);
        assert_eq!(get_dist_tag(&packument, "latest"), Some("1.1.0"));

        let url = get_tarball_url(&packument, "1.0.0").unwrap();
        assert_eq!(registry.fetch_tarball(url).await.unwrap().as_ref(), &[1, 2, 3]);
        assert!(registry.fetch_packument("missing").await.is_err());
        assert_eq!(registry.packument_requests(), 2);
    }
}
