//! YAML-backed key/value files: user credentials and per-project metadata.
//!
//! Every file is read whole on `load` and rewritten whole on `save`; there is
//! no locking, so the last writer wins.

use std::{collections::BTreeMap, fs};

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{CliError, Result};

pub const USER_CONFIG_FILE: &str = "config.yml";
pub const META_DIR: &str = ".bothub-meta";
pub const PROJECT_META_FILE: &str = "project.yml";
pub const LEGACY_PROJECT_FILE: &str = "bothub.yml";

#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: Utf8PathBuf,
    values: BTreeMap<String, Value>,
}

impl ConfigFile {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn is_exists(&self) -> bool {
        self.path.is_file()
    }

    /// Replace the in-memory mapping with the file contents. A missing file
    /// loads as an empty mapping.
    pub fn load(&mut self) -> Result<()> {
        if !self.path.exists() {
            self.values.clear();
            return Ok(());
        }
        let raw = fs::read_to_string(&self.path).map_err(|err| CliError::io(&self.path, err))?;
        self.values = parse_mapping(&self.path, &raw)?;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| CliError::io(parent, err))?;
        }
        let yaml = serde_yaml_bw::to_string(&self.values)
            .map_err(|err| CliError::parse(&self.path, err))?;
        fs::write(&self.path, yaml).map_err(|err| CliError::io(&self.path, err))?;
        debug!(path = %self.path, keys = self.values.len(), "config saved");
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.values.get(key)? {
            Value::Number(num) => num.as_i64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

fn parse_mapping(path: &Utf8Path, raw: &str) -> Result<BTreeMap<String, Value>> {
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let parsed: Option<BTreeMap<String, Value>> =
        serde_yaml_bw::from_str(raw).map_err(|err| CliError::parse(path, err))?;
    Ok(parsed.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: Option<String>,
    pub auth_token: String,
}

/// `~/.bothub/config.yml`.
#[derive(Debug, Clone)]
pub struct UserConfig {
    file: ConfigFile,
}

impl UserConfig {
    pub fn open(config_dir: &Utf8Path) -> Result<Self> {
        Self::open_file(config_dir.join(USER_CONFIG_FILE))
    }

    pub fn open_file(path: impl Into<Utf8PathBuf>) -> Result<Self> {
        let mut file = ConfigFile::new(path);
        file.load()?;
        Ok(Self { file })
    }

    pub fn credential(&self) -> Option<Credential> {
        let token = self.file.get_str("auth_token")?.trim();
        if token.is_empty() {
            return None;
        }
        Some(Credential {
            username: self.file.get_str("username").map(str::to_owned),
            auth_token: token.to_owned(),
        })
    }

    pub fn set_credential(&mut self, username: &str, auth_token: &str) {
        self.file.set("username", username);
        self.file.set("auth_token", auth_token);
    }

    pub fn save(&self) -> Result<()> {
        self.file.save()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectMetadata {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub programming_language: Option<String>,
    pub entry_point: Option<String>,
}

/// `<project>/.bothub-meta/project.yml`, plus the legacy `bothub.yml`
/// that older clients wrote `id`/`name` into.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    root: Utf8PathBuf,
    meta: ConfigFile,
}

impl ProjectConfig {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        let root = root.into();
        let meta = ConfigFile::new(root.join(META_DIR).join(PROJECT_META_FILE));
        Self { root, meta }
    }

    pub fn is_exists(&self) -> bool {
        self.meta.is_exists() || self.root.join(LEGACY_PROJECT_FILE).is_file()
    }

    /// Load an existing project. Fails when neither the metadata file nor a
    /// legacy project file is present.
    pub fn load(root: impl Into<Utf8PathBuf>) -> Result<Self> {
        let mut config = Self::new(root);
        if !config.is_exists() {
            return Err(CliError::ImproperlyConfigured(format!(
                "{} is not a bothub project. Run 'bothub init' or 'bothub clone' first",
                config.root
            )));
        }
        config.migrate_legacy()?;
        config.meta.load()?;
        Ok(config)
    }

    /// Load when present, otherwise start empty for first-time initialization.
    pub fn load_or_init(root: impl Into<Utf8PathBuf>) -> Result<Self> {
        let mut config = Self::new(root);
        if config.is_exists() {
            config.migrate_legacy()?;
            config.meta.load()?;
        }
        Ok(config)
    }

    fn migrate_legacy(&mut self) -> Result<()> {
        let mut legacy = ConfigFile::new(self.root.join(LEGACY_PROJECT_FILE));
        if !legacy.is_exists() {
            return Ok(());
        }
        legacy.load()?;
        if !legacy.contains("id") && !legacy.contains("name") {
            return Ok(());
        }
        self.meta.load()?;
        for key in ["id", "name"] {
            if let Some(value) = legacy.remove(key)
                && !self.meta.contains(key)
            {
                self.meta.set(key, value);
            }
        }
        self.meta.save()?;
        legacy.save()?;
        info!(project = %self.root, "migrated legacy project config");
        Ok(())
    }

    pub fn metadata(&self) -> ProjectMetadata {
        ProjectMetadata {
            id: self.meta.get_i64("id"),
            name: self.meta.get_str("name").map(str::to_owned),
            programming_language: self
                .meta
                .get_str("programming_language")
                .map(str::to_owned),
            entry_point: self.meta.get_str("entry_point").map(str::to_owned),
        }
    }

    pub fn project_id(&self) -> Result<i64> {
        self.meta.get_i64("id").ok_or_else(|| {
            CliError::ImproperlyConfigured(format!(
                "project id is missing in {}",
                self.meta.path()
            ))
        })
    }

    pub fn set_metadata(&mut self, metadata: &ProjectMetadata) {
        if let Some(id) = metadata.id {
            self.meta.set("id", id);
        }
        if let Some(name) = &metadata.name {
            self.meta.set("name", name.as_str());
        }
        if let Some(language) = &metadata.programming_language {
            self.meta.set("programming_language", language.as_str());
        }
        if let Some(entry) = &metadata.entry_point {
            self.meta.set("entry_point", entry.as_str());
        }
    }

    pub fn save(&self) -> Result<()> {
        self.meta.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn utf8_dir(temp: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8 path")
    }

    #[test]
    fn save_creates_parent_dirs_and_round_trips() {
        let temp = tempdir().unwrap();
        let path = utf8_dir(&temp).join("nested").join("test.yml");
        let mut config = ConfigFile::new(&path);
        config.set("auth_token", "testtoken");
        config.set("id", 3);
        config.set("nested", json!({"a": [1, 2, {"b": null}], "flag": true}));
        config.save().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("testtoken"));

        let mut reloaded = ConfigFile::new(&path);
        reloaded.load().unwrap();
        assert_eq!(reloaded.get_str("auth_token"), Some("testtoken"));
        assert_eq!(reloaded.get_i64("id"), Some(3));
        assert_eq!(
            reloaded.get("nested"),
            Some(&json!({"a": [1, 2, {"b": null}], "flag": true}))
        );
    }

    #[test]
    fn missing_file_loads_empty() {
        let temp = tempdir().unwrap();
        let mut config = ConfigFile::new(utf8_dir(&temp).join("absent.yml"));
        config.load().unwrap();
        assert!(!config.is_exists());
        assert!(config.get("anything").is_none());
    }

    #[test]
    fn hand_written_yaml_is_read() {
        let temp = tempdir().unwrap();
        let path = utf8_dir(&temp).join("test2.yml");
        fs::write(&path, "auth_token: testtoken").unwrap();
        let mut config = ConfigFile::new(&path);
        config.load().unwrap();
        assert_eq!(config.get_str("auth_token"), Some("testtoken"));
        assert!(config.contains("auth_token"));
        config.remove("auth_token");
        assert!(!config.contains("auth_token"));
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let temp = tempdir().unwrap();
        let path = utf8_dir(&temp).join("broken.yml");
        fs::write(&path, "key: [unclosed").unwrap();
        let mut config = ConfigFile::new(&path);
        let err = config.load().unwrap_err();
        assert_eq!(err.kind(), "ParseError");
    }

    #[test]
    fn missing_project_is_improperly_configured() {
        let temp = tempdir().unwrap();
        let err = ProjectConfig::load(utf8_dir(&temp)).unwrap_err();
        assert!(matches!(err, CliError::ImproperlyConfigured(_)));
    }

    #[test]
    fn project_without_id_is_improperly_configured() {
        let temp = tempdir().unwrap();
        let mut config = ProjectConfig::load_or_init(utf8_dir(&temp)).unwrap();
        config.set_metadata(&ProjectMetadata {
            name: Some("nameless".into()),
            ..Default::default()
        });
        config.save().unwrap();

        let loaded = ProjectConfig::load(utf8_dir(&temp)).unwrap();
        assert!(matches!(
            loaded.project_id(),
            Err(CliError::ImproperlyConfigured(_))
        ));
    }

    #[test]
    fn legacy_project_file_is_migrated() {
        let temp = tempdir().unwrap();
        let root = utf8_dir(&temp);
        fs::write(
            root.join(LEGACY_PROJECT_FILE),
            "id: 10\nname: myfirstbot\nprogramming_language: python3\n",
        )
        .unwrap();

        let config = ProjectConfig::load(&root).unwrap();
        assert_eq!(config.project_id().unwrap(), 10);
        assert_eq!(config.metadata().name.as_deref(), Some("myfirstbot"));
        assert!(root.join(META_DIR).join(PROJECT_META_FILE).is_file());

        let mut legacy = ConfigFile::new(root.join(LEGACY_PROJECT_FILE));
        legacy.load().unwrap();
        assert!(!legacy.contains("id"));
        assert!(!legacy.contains("name"));
        assert_eq!(legacy.get_str("programming_language"), Some("python3"));
    }

    #[test]
    fn user_config_credential_round_trip() {
        let temp = tempdir().unwrap();
        let dir = utf8_dir(&temp);
        let mut config = UserConfig::open(&dir).unwrap();
        assert!(config.credential().is_none());
        config.set_credential("testuser", "testtoken");
        config.save().unwrap();

        let reopened = UserConfig::open(&dir).unwrap();
        assert_eq!(
            reopened.credential(),
            Some(Credential {
                username: Some("testuser".into()),
                auth_token: "testtoken".into(),
            })
        );
    }
}
