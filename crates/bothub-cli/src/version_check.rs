//! Notice about newer releases, with the lookup cached for an hour.

use std::{collections::BTreeMap, fs, sync::Arc};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Duration, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::api::{ApiRequest, Method, Transport};
use crate::error::{CliError, Result};

pub const CACHE_FILE: &str = "caches.yml";
pub const DEFAULT_TTL_SECS: i64 = 3600;
const LATEST_VERSION_KEY: &str = "latest_version";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CacheEntry {
    value: Value,
    expires: DateTime<Utc>,
}

/// Key/value file whose entries stop being visible once they expire.
#[derive(Debug, Clone)]
pub struct TtlCache {
    path: Utf8PathBuf,
}

impl TtlCache {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(config_dir: &Utf8Path) -> Self {
        Self::new(config_dir.join(CACHE_FILE))
    }

    fn read(&self) -> Result<BTreeMap<String, CacheEntry>> {
        if !self.path.is_file() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&self.path).map_err(|err| CliError::io(&self.path, err))?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let entries: Option<BTreeMap<String, CacheEntry>> =
            serde_yaml_bw::from_str(&raw).map_err(|err| CliError::parse(&self.path, err))?;
        Ok(entries.unwrap_or_default())
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        self.get_at(key, Utc::now())
    }

    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Result<Option<Value>> {
        Ok(self
            .read()?
            .remove(key)
            .filter(|entry| entry.expires > now)
            .map(|entry| entry.value))
    }

    pub fn set(&self, key: &str, value: impl Into<Value>, ttl: Duration) -> Result<()> {
        self.set_at(key, value, ttl, Utc::now())
    }

    pub fn set_at(
        &self,
        key: &str,
        value: impl Into<Value>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut entries = self.read()?;
        entries.insert(
            key.to_owned(),
            CacheEntry {
                value: value.into(),
                expires: now + ttl,
            },
        );
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| CliError::io(parent, err))?;
        }
        let yaml =
            serde_yaml_bw::to_string(&entries).map_err(|err| CliError::parse(&self.path, err))?;
        fs::write(&self.path, yaml).map_err(|err| CliError::io(&self.path, err))
    }
}

pub struct VersionChecker {
    transport: Arc<dyn Transport>,
    index_url: String,
    cache: TtlCache,
    current: Version,
}

impl VersionChecker {
    pub fn new(
        transport: Arc<dyn Transport>,
        index_url: impl Into<String>,
        cache: TtlCache,
        current: Version,
    ) -> Self {
        Self {
            transport,
            index_url: index_url.into(),
            cache,
            current,
        }
    }

    /// Latest published version, from the cache while it is fresh.
    pub fn latest_version(&self) -> Result<Version> {
        if let Some(cached) = self.cache.get(LATEST_VERSION_KEY)?
            && let Some(version) = cached.as_str().and_then(|raw| Version::parse(raw).ok())
        {
            return Ok(version);
        }

        let request = ApiRequest::new(Method::Get, &self.index_url)
            .header("User-Agent", concat!("bothub-cli/", env!("CARGO_PKG_VERSION")))
            .header("Accept", "application/json");
        let response = self.transport.send(&request)?;
        if !response.is_success() {
            return Err(CliError::Client(format!(
                "version index responded with {}",
                response.status
            )));
        }
        let body = response
            .json_body()
            .ok_or_else(|| CliError::Client("version index returned a non-JSON body".into()))?;
        let krate = &body["crate"];
        let raw = krate["max_stable_version"]
            .as_str()
            .or_else(|| krate["max_version"].as_str())
            .ok_or_else(|| CliError::Client("version index has no version".into()))?;
        let version = Version::parse(raw)
            .map_err(|err| CliError::Client(format!("invalid version {raw}: {err}")))?;

        self.cache.set(
            LATEST_VERSION_KEY,
            version.to_string(),
            Duration::seconds(DEFAULT_TTL_SECS),
        )?;
        Ok(version)
    }

    /// `Some(latest)` when a newer release than the running one exists.
    pub fn check(&self) -> Result<Option<Version>> {
        let latest = self.latest_version()?;
        Ok((latest > self.current).then_some(latest))
    }

    /// Never fails: timeouts are dropped silently and anything else is only
    /// logged.
    pub fn notice(&self) -> Option<String> {
        match self.check() {
            Ok(Some(latest)) => Some(format!(
                "You are using bothub-cli {}, however version {latest} is available.\n\
                 You should consider upgrading via 'cargo install bothub-cli'.",
                self.current
            )),
            Ok(None) | Err(CliError::Timeout) => None,
            Err(err) => {
                debug!(%err, "version check failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiResponse;
    use crate::testing::MockTransport;
    use serde_json::json;
    use tempfile::tempdir;

    fn cache_dir() -> (tempfile::TempDir, Utf8PathBuf) {
        let temp = tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, dir)
    }

    #[test]
    fn entries_expire_after_ttl() {
        let (_temp, dir) = cache_dir();
        let cache = TtlCache::in_dir(&dir);
        let now = Utc::now();
        cache
            .set_at("latest_version", "0.5.0", Duration::seconds(60), now)
            .unwrap();
        cache
            .set_at("other", 3, Duration::seconds(600), now)
            .unwrap();

        assert_eq!(
            cache.get_at("latest_version", now + Duration::seconds(59)).unwrap(),
            Some(json!("0.5.0"))
        );
        assert_eq!(
            cache.get_at("latest_version", now + Duration::seconds(61)).unwrap(),
            None
        );
        assert_eq!(
            cache.get_at("other", now + Duration::seconds(61)).unwrap(),
            Some(json!(3))
        );
        assert_eq!(cache.get_at("missing", now).unwrap(), None);
    }

    fn checker(transport: &Arc<MockTransport>, dir: &Utf8Path, current: &str) -> VersionChecker {
        VersionChecker::new(
            transport.clone(),
            "https://index.test/crates/bothub-cli",
            TtlCache::in_dir(dir),
            Version::parse(current).unwrap(),
        )
    }

    #[test]
    fn newer_release_is_reported_and_cached() {
        let (_temp, dir) = cache_dir();
        let transport = MockTransport::new();
        transport.record_json(
            200,
            json!({"crate": {"max_stable_version": "0.5.1", "max_version": "0.6.0-beta.1"}}),
        );
        let checker = checker(&transport, &dir, "0.4.8");

        assert_eq!(checker.check().unwrap(), Some(Version::new(0, 5, 1)));
        assert_eq!(checker.check().unwrap(), Some(Version::new(0, 5, 1)));
        assert_eq!(transport.requests().len(), 1);
        assert!(checker.notice().unwrap().contains("0.5.1"));
    }

    #[test]
    fn up_to_date_gives_no_notice() {
        let (_temp, dir) = cache_dir();
        let transport = MockTransport::new();
        transport.record_json(200, json!({"crate": {"max_version": "0.4.8"}}));
        let checker = checker(&transport, &dir, "0.4.8");
        assert_eq!(checker.check().unwrap(), None);
    }

    #[test]
    fn failures_never_surface() {
        let (_temp, dir) = cache_dir();
        let transport = MockTransport::new();
        transport.record(ApiResponse::new(503, ""));
        let checker = checker(&transport, &dir, "0.4.8");
        assert_eq!(checker.notice(), None);
        assert_eq!(checker.notice(), None);
    }
}
