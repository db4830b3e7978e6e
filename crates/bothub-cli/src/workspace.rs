//! Local operations behind each command. A `Workspace` owns the API client,
//! the user config and the project directory it works in; nothing here is
//! global, so tests build one over a `MockTransport` and a temp dir.

use std::fs;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::api::{ApiClient, LogEntry, Project, Properties, PropertyValue};
use crate::config::{ProjectConfig, ProjectMetadata, UserConfig};
use crate::error::{CliError, Result};
use crate::package::extract_dist_bytes;
use crate::template;

/// One credential a channel provider needs, with the pattern a valid value
/// starts with.
#[derive(Debug)]
pub struct CredentialField {
    pub name: &'static str,
    pub label: &'static str,
    rule: Regex,
}

impl CredentialField {
    fn new(name: &'static str, label: &'static str, pattern: &str) -> Self {
        let rule = Regex::new(&format!("^{pattern}")).expect("valid credential pattern");
        Self { name, label, rule }
    }

    /// The matching prefix of `value`, or `None` when it does not fit.
    pub fn validate<'a>(&self, value: &'a str) -> Option<&'a str> {
        self.rule.find(value.trim()).map(|found| found.as_str())
    }

    pub fn prompt(&self, retry: bool) -> String {
        if retry {
            format!("Please enter a valid {}", self.label)
        } else {
            format!("Please enter {}", self.label)
        }
    }
}

pub const CHANNELS: [&str; 2] = ["facebook", "telegram"];

static TELEGRAM_FIELDS: Lazy<Vec<CredentialField>> = Lazy::new(|| {
    vec![CredentialField::new(
        "api_key",
        "Telegram Api Key",
        r"[0-9]{9}:[\w.-]{35}",
    )]
});

static FACEBOOK_FIELDS: Lazy<Vec<CredentialField>> = Lazy::new(|| {
    vec![
        CredentialField::new("app_id", "Facebook App Id", r"[0-9]{6,20}"),
        CredentialField::new("app_secret", "Facebook App Secret", r"[a-zA-Z0-9]{12,}"),
        CredentialField::new(
            "page_access_token",
            "Facebook Page Access Token",
            r"[a-zA-Z0-9]{100,}",
        ),
    ]
});

pub fn channel_fields(channel: &str) -> Result<&'static [CredentialField]> {
    match channel {
        "telegram" => Ok(TELEGRAM_FIELDS.as_slice()),
        "facebook" => Ok(FACEBOOK_FIELDS.as_slice()),
        other => Err(CliError::InvalidValue(format!(
            "unsupported channel {other}. Choose one of: {}",
            CHANNELS.join(", ")
        ))),
    }
}

/// `<regdate> <error>\n<trace>` for structured logs, `<regdate> <log>`
/// otherwise.
pub fn format_log_entry(entry: &LogEntry) -> String {
    let structured = serde_json::from_str::<Value>(&entry.log)
        .ok()
        .and_then(|value| {
            let error = value.get("error")?.as_str()?.to_owned();
            let trace = value.get("trace")?.as_str()?.to_owned();
            Some(format!("{error}\n{trace}"))
        });
    format!(
        "{} {}",
        entry.regdate,
        structured.as_deref().unwrap_or(&entry.log)
    )
}

pub struct Workspace {
    api: ApiClient,
    user_config: UserConfig,
    project_dir: Utf8PathBuf,
}

impl Workspace {
    pub fn new(
        mut api: ApiClient,
        user_config: UserConfig,
        project_dir: impl Into<Utf8PathBuf>,
    ) -> Self {
        api.load_auth(user_config.credential().as_ref());
        Self {
            api,
            user_config,
            project_dir: project_dir.into(),
        }
    }

    /// Same client and credentials, another project directory.
    pub fn in_dir(&self, project_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            api: self.api.clone(),
            user_config: self.user_config.clone(),
            project_dir: project_dir.into(),
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn project_dir(&self) -> &Utf8Path {
        &self.project_dir
    }

    pub fn project_config_exists(&self) -> bool {
        ProjectConfig::new(&self.project_dir).is_exists()
    }

    pub fn load_project(&self) -> Result<ProjectConfig> {
        ProjectConfig::load(&self.project_dir)
    }

    pub fn project_id(&self) -> Result<i64> {
        self.load_project()?.project_id()
    }

    pub fn authenticate(&mut self, username: &str, password: &str) -> Result<()> {
        let token = self.api.authenticate(username, password)?;
        self.user_config.set_credential(username, &token);
        self.user_config.save()?;
        self.api.load_auth(self.user_config.credential().as_ref());
        info!(username, "credential stored");
        Ok(())
    }

    /// Create the remote project and record it in the project metadata.
    /// A directory already linked to a project is left alone.
    pub fn init(&self, name: &str, description: &str) -> Result<Project> {
        let mut config = ProjectConfig::load_or_init(&self.project_dir)?;
        if let Some(id) = config.metadata().id {
            return Err(CliError::ImproperlyConfigured(format!(
                "{} is already linked to project {id}",
                self.project_dir
            )));
        }
        let project = self.api.create_project(name, description)?;
        config.set_metadata(&ProjectMetadata {
            id: Some(project.id),
            name: Some(project.name.clone()),
            programming_language: Some(template::LANGUAGE.into()),
            entry_point: Some(template::ENTRY_POINT.into()),
        });
        config.save()?;
        info!(id = project.id, name = %project.name, "project initialized");
        Ok(project)
    }

    /// Upload the starter bot to the project recorded in this directory.
    pub fn init_code(&self) -> Result<()> {
        let config = self.load_project()?;
        let project_id = config.project_id()?;
        let language = config
            .metadata()
            .programming_language
            .unwrap_or_else(|| template::LANGUAGE.into());
        let archive = template::archive()?;
        self.api
            .upload_code(project_id, &language, Some(archive), Some(template::REQUIREMENTS))?;
        Ok(())
    }

    pub fn find_project(&self, name: &str) -> Result<Project> {
        self.api
            .list_projects()?
            .into_iter()
            .find(|project| project.name == name)
            .ok_or_else(|| CliError::ProjectNameNotFound(name.to_owned()))
    }

    /// Download a project's code into `target_dir` (default
    /// `<project_dir>/<name>`) and write its metadata there.
    pub fn clone(&self, name: &str, target_dir: Option<&Utf8Path>) -> Result<Utf8PathBuf> {
        let project = self.find_project(name)?;
        let target = match target_dir {
            Some(dir) if dir.is_absolute() => dir.to_path_buf(),
            Some(dir) => self.project_dir.join(dir),
            None => self.project_dir.join(name),
        };
        let bundle = self.api.get_code(project.id)?;

        fs::create_dir_all(&target).map_err(|err| CliError::io(&target, err))?;
        if let Some(code) = bundle.code.as_deref().filter(|code| !code.is_empty()) {
            let bytes = STANDARD.decode(code.trim()).map_err(|err| {
                CliError::Client(format!("downloaded code is not valid base64: {err}"))
            })?;
            extract_dist_bytes(&bytes, target.as_std_path())?;
        }
        let manifest = target.join(template::DEPENDENCY_FILE);
        fs::write(&manifest, bundle.dependency.as_deref().unwrap_or_default())
            .map_err(|err| CliError::io(&manifest, err))?;

        let mut config = ProjectConfig::load_or_init(&target)?;
        let existing = config.metadata();
        config.set_metadata(&ProjectMetadata {
            id: Some(project.id),
            name: Some(project.name.clone()),
            programming_language: Some(
                bundle
                    .language
                    .unwrap_or_else(|| template::LANGUAGE.into()),
            ),
            entry_point: Some(
                existing
                    .entry_point
                    .unwrap_or_else(|| template::ENTRY_POINT.into()),
            ),
        });
        config.save()?;
        info!(name, target = %target, "project cloned");
        Ok(target)
    }

    pub fn ls(&self, long: bool) -> Result<Vec<Vec<String>>> {
        let rows = self
            .api
            .list_projects()?
            .into_iter()
            .map(|project| {
                if long {
                    vec![
                        project.name,
                        project.status.map(|s| s.to_string()).unwrap_or_default(),
                        project.regdate.unwrap_or_default(),
                    ]
                } else {
                    vec![project.name]
                }
            })
            .collect();
        Ok(rows)
    }

    pub fn rm(&self, name: &str) -> Result<()> {
        let project = self.find_project(name)?;
        debug!(id = project.id, name, "deleting project");
        self.api.delete_project(project.id)
    }

    pub fn add_channel(&self, channel: &str, credentials: &Map<String, Value>) -> Result<()> {
        let project_id = self.project_id()?;
        self.api
            .add_project_channel(project_id, channel, credentials)?;
        Ok(())
    }

    pub fn ls_channel(&self, long: bool) -> Result<Vec<Vec<String>>> {
        let project_id = self.project_id()?;
        let rows = self
            .api
            .get_project_channels(project_id)?
            .into_iter()
            .map(|binding| {
                if long {
                    vec![binding.channel, binding.credentials.to_string()]
                } else {
                    vec![binding.channel]
                }
            })
            .collect();
        Ok(rows)
    }

    pub fn rm_channel(&self, channel: &str) -> Result<()> {
        let project_id = self.project_id()?;
        self.api.delete_project_channel(project_id, channel)
    }

    pub fn ls_properties(&self) -> Result<Properties> {
        let project_id = self.project_id()?;
        self.api.get_project_properties(project_id)
    }

    pub fn reload_properties(&self) -> Result<Properties> {
        self.ls_properties()
    }

    pub fn get_property(&self, key: &str) -> Result<PropertyValue> {
        self.ls_properties()?
            .remove(key)
            .ok_or_else(|| CliError::NotFound(format!("No such property: {key}")))
    }

    /// `raw` is parsed as JSON. Non-JSON input is stored as a plain string
    /// unless `strict` is set.
    pub fn set_property(&self, key: &str, raw: &str, strict: bool) -> Result<PropertyValue> {
        let value = PropertyValue::parse(raw, strict)?;
        let project_id = self.project_id()?;
        self.api
            .set_project_property(project_id, key, value.clone())?;
        Ok(value)
    }

    pub fn rm_property(&self, key: &str) -> Result<()> {
        let project_id = self.project_id()?;
        self.api.delete_project_property(project_id, key)
    }

    pub fn add_nlu(&self, nlu: &str, credentials: &Map<String, Value>) -> Result<()> {
        let project_id = self.project_id()?;
        self.api.add_project_nlu(project_id, nlu, credentials)?;
        Ok(())
    }

    pub fn ls_nlus(&self, long: bool) -> Result<Vec<Vec<String>>> {
        let project_id = self.project_id()?;
        let rows = self
            .api
            .get_project_nlus(project_id)?
            .into_iter()
            .map(|integration| {
                if long {
                    vec![integration.nlu, integration.credentials.to_string()]
                } else {
                    vec![integration.nlu]
                }
            })
            .collect();
        Ok(rows)
    }

    pub fn get_nlu(&self, nlu: &str) -> Result<Value> {
        let project_id = self.project_id()?;
        Ok(self.api.get_project_nlu(project_id, nlu)?.credentials)
    }

    pub fn rm_nlu(&self, nlu: &str) -> Result<()> {
        let project_id = self.project_id()?;
        self.api.delete_project_nlu(project_id, nlu)
    }

    pub fn logs(&self) -> Result<Vec<LogEntry>> {
        let project_id = self.project_id()?;
        self.api.get_project_execution_logs(project_id)
    }
}
