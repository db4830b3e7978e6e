//! Package, upload, then poll the project until it reports `online`.

use std::{fmt, fs, thread, time::Duration};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use crate::api::{ApiClient, Project, ProjectStatus};
use crate::config::ProjectConfig;
use crate::error::{CliError, Result};
use crate::package::{DIST_DIR, DIST_FILE, IGNORE_FILE, make_dist_package};
use crate::template;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployState {
    Init,
    Packaging,
    Uploading,
    Polling,
    Succeeded,
    Failed,
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DeployState::Init => "init",
            DeployState::Packaging => "packaging",
            DeployState::Uploading => "uploading",
            DeployState::Polling => "polling",
            DeployState::Succeeded => "succeeded",
            DeployState::Failed => "failed",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeployProgress {
    State(DeployState),
    /// One status check finished without seeing `online`.
    Poll {
        attempt: u32,
        status: Option<ProjectStatus>,
    },
    /// Emitted once, the first time the project reports `restarting`.
    Restarting,
}

#[derive(Debug, Clone, Copy)]
pub struct DeployOptions {
    pub interval: Duration,
    pub max_retries: u32,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_retries: 30,
        }
    }
}

pub struct Deployer<'a> {
    api: &'a ApiClient,
    project_dir: Utf8PathBuf,
    options: DeployOptions,
    state: DeployState,
}

impl<'a> Deployer<'a> {
    pub fn new(api: &'a ApiClient, project_dir: &Utf8Path, options: DeployOptions) -> Self {
        Self {
            api,
            project_dir: project_dir.to_path_buf(),
            options,
            state: DeployState::Init,
        }
    }

    pub fn state(&self) -> DeployState {
        self.state
    }

    fn enter(&mut self, state: DeployState, on_progress: &mut impl FnMut(DeployProgress)) {
        debug!(from = %self.state, to = %state, "deploy state");
        self.state = state;
        on_progress(DeployProgress::State(state));
    }

    /// Run the whole deploy. Errors before polling abort immediately; only
    /// an exhausted poll budget ends in `DeployFailed`.
    pub fn run(&mut self, mut on_progress: impl FnMut(DeployProgress)) -> Result<Project> {
        self.api.check_auth_token()?;
        let config = ProjectConfig::load(&self.project_dir)?;
        let project_id = config.project_id()?;
        let language = config
            .metadata()
            .programming_language
            .unwrap_or_else(|| template::LANGUAGE.into());

        self.enter(DeployState::Packaging, &mut on_progress);
        let dist_path = self.project_dir.join(DIST_DIR).join(DIST_FILE);
        let ignore_path = self.project_dir.join(IGNORE_FILE);
        make_dist_package(
            dist_path.as_std_path(),
            self.project_dir.as_std_path(),
            Some(ignore_path.as_std_path()),
        )?;
        let archive = fs::read(&dist_path).map_err(|err| CliError::io(&dist_path, err))?;
        let dependency = read_dependency(&self.project_dir.join(template::DEPENDENCY_FILE))?;

        self.enter(DeployState::Uploading, &mut on_progress);
        let uploaded = self
            .api
            .upload_code(project_id, &language, Some(archive), Some(&dependency));
        if let Err(err) = fs::remove_file(&dist_path) {
            debug!(path = %dist_path, %err, "could not discard dist package");
        }
        uploaded?;

        self.enter(DeployState::Polling, &mut on_progress);
        match self.poll(project_id, &mut on_progress) {
            Ok(project) => {
                self.enter(DeployState::Succeeded, &mut on_progress);
                info!(project_id, "project is online");
                Ok(project)
            }
            Err(err) => {
                self.enter(DeployState::Failed, &mut on_progress);
                Err(err)
            }
        }
    }

    fn poll(
        &self,
        project_id: i64,
        on_progress: &mut impl FnMut(DeployProgress),
    ) -> Result<Project> {
        let mut restarting_seen = false;
        for attempt in 1..=self.options.max_retries {
            if !self.options.interval.is_zero() {
                thread::sleep(self.options.interval);
            }
            let status = match self.api.get_project(project_id) {
                Ok(project) if project.status == Some(ProjectStatus::Online) => {
                    return Ok(project);
                }
                Ok(project) => project.status,
                Err(err) => {
                    warn!(attempt, %err, "status check failed");
                    None
                }
            };
            if status == Some(ProjectStatus::Restarting) && !restarting_seen {
                restarting_seen = true;
                on_progress(DeployProgress::Restarting);
            }
            on_progress(DeployProgress::Poll { attempt, status });
        }
        Err(CliError::DeployFailed {
            retries: self.options.max_retries,
        })
    }
}

fn read_dependency(path: &Utf8Path) -> Result<String> {
    if !path.is_file() {
        return Ok(String::new());
    }
    fs::read_to_string(path).map_err(|err| CliError::io(path, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiResponse, Method, RequestBody};
    use crate::config::ProjectMetadata;
    use crate::testing::MockTransport;
    use serde_json::json;
    use std::sync::Arc;

    fn project_dir() -> (tempfile::TempDir, Utf8PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        fs::create_dir_all(dir.join("bothub")).unwrap();
        fs::write(dir.join("bothub/bot.py"), "print('hi')\n").unwrap();
        fs::write(dir.join("requirements.txt"), "requests\n").unwrap();
        let mut config = ProjectConfig::load_or_init(&dir).unwrap();
        config.set_metadata(&ProjectMetadata {
            id: Some(3),
            name: Some("testproject".into()),
            programming_language: Some("python3".into()),
            entry_point: None,
        });
        config.save().unwrap();
        (temp, dir)
    }

    fn api(transport: &Arc<MockTransport>) -> ApiClient {
        ApiClient::new("https://a.com", transport.clone())
            .with_token_expiry_check(false)
            .with_auth_token("testtoken")
    }

    fn status(transport: &MockTransport, status: &str) {
        transport.record_json(
            200,
            json!({"data": {"id": 3, "name": "testproject", "status": status}}),
        );
    }

    fn options(max_retries: u32) -> DeployOptions {
        DeployOptions {
            interval: Duration::ZERO,
            max_retries,
        }
    }

    #[test]
    fn stops_polling_at_first_online() {
        let (_temp, dir) = project_dir();
        let transport = MockTransport::new();
        transport.record_json(200, json!({"data": {}}));
        status(&transport, "deploying");
        status(&transport, "restarting");
        status(&transport, "restarting");
        status(&transport, "online");
        status(&transport, "online");

        let api = api(&transport);
        let mut deployer = Deployer::new(&api, &dir, options(30));
        let mut events = Vec::new();
        let project = deployer.run(|event| events.push(event)).unwrap();

        assert_eq!(project.status, Some(ProjectStatus::Online));
        assert_eq!(deployer.state(), DeployState::Succeeded);
        assert_eq!(transport.pending(), 1);
        let polls = events
            .iter()
            .filter(|e| matches!(e, DeployProgress::Poll { .. }))
            .count();
        assert_eq!(polls, 3);
        let restarts = events
            .iter()
            .filter(|e| matches!(e, DeployProgress::Restarting))
            .count();
        assert_eq!(restarts, 1);
        assert!(!dir.join(DIST_DIR).join(DIST_FILE).exists());
    }

    #[test]
    fn upload_carries_language_archive_and_dependency() {
        let (_temp, dir) = project_dir();
        let transport = MockTransport::new();
        transport.record_json(200, json!({"data": {}}));
        status(&transport, "online");

        let api = api(&transport);
        Deployer::new(&api, &dir, options(1)).run(|_| {}).unwrap();

        let upload = &transport.requests()[0];
        assert_eq!(upload.method, Method::Post);
        assert_eq!(upload.url, "https://a.com/projects/3/bot");
        let RequestBody::Multipart(form) = &upload.body else {
            panic!("expected multipart upload");
        };
        assert_eq!(form.field_value("language"), Some("python3"));
        assert_eq!(form.field_value("dependency"), Some("requests\n"));
        assert!(!form.files[0].data.is_empty());
        assert_eq!(transport.requests()[1].url, "https://a.com/projects/3");
    }

    #[test]
    fn exhausted_budget_fails_after_exact_poll_count() {
        let (_temp, dir) = project_dir();
        let transport = MockTransport::new();
        transport.record_json(200, json!({"data": {}}));
        for _ in 0..5 {
            status(&transport, "deploying");
        }
        status(&transport, "online");

        let api = api(&transport);
        let mut deployer = Deployer::new(&api, &dir, options(5));
        let err = deployer.run(|_| {}).unwrap_err();

        assert!(matches!(err, CliError::DeployFailed { retries: 5 }));
        assert_eq!(deployer.state(), DeployState::Failed);
        assert_eq!(transport.requests().len(), 6);
        assert_eq!(transport.pending(), 1);
    }

    #[test]
    fn failed_status_checks_still_count_as_attempts() {
        let (_temp, dir) = project_dir();
        let transport = MockTransport::new();
        transport.record_json(200, json!({"data": {}}));
        transport.record(ApiResponse::new(502, ""));
        status(&transport, "online");

        let api = api(&transport);
        let mut events = Vec::new();
        Deployer::new(&api, &dir, options(3))
            .run(|event| events.push(event))
            .unwrap();
        assert!(events.contains(&DeployProgress::Poll {
            attempt: 1,
            status: None
        }));
    }

    #[test]
    fn upload_failure_skips_polling() {
        let (_temp, dir) = project_dir();
        let transport = MockTransport::new();
        transport.record_json(500, json!({"cause": "disk full"}));

        let api = api(&transport);
        let mut deployer = Deployer::new(&api, &dir, options(3));
        let err = deployer.run(|_| {}).unwrap_err();
        assert_eq!(err.kind(), "ClientError");
        assert_eq!(deployer.state(), DeployState::Uploading);
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn missing_project_metadata_aborts_before_packaging() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let transport = MockTransport::new();
        let api = api(&transport);
        let err = Deployer::new(&api, &dir, options(3)).run(|_| {}).unwrap_err();
        assert!(matches!(err, CliError::ImproperlyConfigured(_)));
        assert!(transport.requests().is_empty());
        assert!(!dir.join(DIST_DIR).exists());
    }
}
