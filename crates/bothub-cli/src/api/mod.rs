//! Client for the BotHub REST API.
//!
//! Each remote action is one method. Responses carry a `{"data": ...}`
//! envelope on success and `{"cause": ...}` on failure; failures are turned
//! into [`CliError`] variants by [`status_error`].

pub mod token;
pub mod transport;
pub mod types;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::config::Credential;
use crate::error::{CliError, Result};
pub use transport::{
    ApiRequest, ApiResponse, FilePart, Method, MultipartForm, RequestBody, Transport,
    UreqTransport,
};
pub use types::{
    ChannelBinding, CodeBundle, LogEntry, NluIntegration, Project, ProjectStatus, Properties,
    PropertyValue,
};

/// Operations whose failures get a dedicated message.
#[derive(Debug, Clone, Copy)]
pub enum Operation<'a> {
    Authenticate { username: &'a str },
    CreateProject { name: &'a str },
    GetProject { id: i64 },
    Other,
}

/// Translate a failed HTTP status into an error. Operation-specific entries
/// take precedence over the generic mapping.
pub fn status_error(operation: Operation<'_>, status: u16, cause: Option<String>) -> CliError {
    match (operation, status) {
        (Operation::Authenticate { username }, 404) => CliError::UserNotFound(username.to_owned()),
        (Operation::Authenticate { .. }, 401) => {
            CliError::InvalidCredential("Invalid username/password".into())
        }
        (Operation::CreateProject { name }, 409) => {
            CliError::ProjectNameDuplicated(name.to_owned())
        }
        (Operation::GetProject { id }, 404) => CliError::ProjectIdNotFound(id),
        (_, 401) => CliError::InvalidCredential(format!(
            "Authentication is failed. Try 'bothub configure' to login again: {}",
            describe_cause(cause.as_deref())
        )),
        (_, 404) => CliError::NotFound(format!(
            "Resource not found: {}",
            describe_cause(cause.as_deref())
        )),
        (_, 409) => CliError::Duplicated(describe_cause(cause.as_deref()).to_owned()),
        (_, status) => CliError::Client(format!(
            "server responded with {status}: {}",
            describe_cause(cause.as_deref())
        )),
    }
}

fn describe_cause(cause: Option<&str>) -> &str {
    cause.unwrap_or("no cause given")
}

/// `cause` field of an error body. Empty or non-object bodies have none.
pub fn response_cause(response: &ApiResponse) -> Option<String> {
    match response.json_body()? {
        Value::Object(map) => match map.get("cause")? {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        },
        _ => None,
    }
}

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    transport: Arc<dyn Transport>,
    auth_token: Option<String>,
    verify_token_expiry: bool,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            transport,
            auth_token: None,
            verify_token_expiry: true,
        }
    }

    pub fn with_token_expiry_check(mut self, enabled: bool) -> Self {
        self.verify_token_expiry = enabled;
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn load_auth(&mut self, credential: Option<&Credential>) {
        self.auth_token = credential.map(|c| c.auth_token.clone());
    }

    pub fn gen_url<S: ToString>(&self, segments: &[S]) -> String {
        let path = segments
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}", self.base_url, path)
    }

    /// Fails before any network traffic when no usable token is loaded.
    pub fn check_auth_token(&self) -> Result<&str> {
        let token = self
            .auth_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .ok_or(CliError::NoCredential)?;
        if self.verify_token_expiry {
            token::ensure_not_expired(token)?;
        }
        Ok(token)
    }

    pub fn auth_headers(&self) -> Result<Vec<(String, String)>> {
        let token = self.check_auth_token()?;
        Ok(vec![("Authorization".into(), format!("Bearer {token}"))])
    }

    pub fn check_response(&self, response: &ApiResponse, operation: Operation<'_>) -> Result<()> {
        if response.is_success() {
            return Ok(());
        }
        Err(status_error(
            operation,
            response.status,
            response_cause(response),
        ))
    }

    fn send(&self, request: ApiRequest, operation: Operation<'_>) -> Result<ApiResponse> {
        let response = self.transport.send(&request)?;
        self.check_response(&response, operation)?;
        Ok(response)
    }

    fn authed(&self, method: Method, url: String) -> Result<ApiRequest> {
        Ok(ApiRequest::new(method, url).headers(self.auth_headers()?))
    }

    fn data<T: DeserializeOwned>(&self, response: &ApiResponse) -> Result<T> {
        let body = response.json_body().ok_or_else(|| {
            CliError::Client(format!("server returned a non-JSON body: {}", response.body))
        })?;
        let data = match body {
            Value::Object(mut map) => map.remove("data").unwrap_or(Value::Null),
            _ => Value::Null,
        };
        serde_json::from_value(data)
            .map_err(|err| CliError::Client(format!("unexpected response payload: {err}")))
    }

    pub fn authenticate(&self, username: &str, password: &str) -> Result<String> {
        let url = self.gen_url(&["users", "access-token"]);
        let request = ApiRequest::new(Method::Post, url).body(RequestBody::Form(vec![
            ("username".into(), username.into()),
            ("password".into(), password.into()),
        ]));
        let response = self.send(request, Operation::Authenticate { username })?;
        let data: Value = self.data(&response)?;
        data.get("access_token")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| CliError::Client("authentication response has no access_token".into()))
    }

    pub fn create_project(&self, name: &str, description: &str) -> Result<Project> {
        let url = self.gen_url(&["projects"]);
        let request = self.authed(Method::Post, url)?.body(RequestBody::Json(json!({
            "name": name,
            "short_name": name,
            "description": description,
        })));
        let response = self.send(request, Operation::CreateProject { name })?;
        self.data(&response)
    }

    pub fn get_project(&self, project_id: i64) -> Result<Project> {
        let url = self.gen_url(&["projects".to_string(), project_id.to_string()]);
        let request = self.authed(Method::Get, url)?;
        let response = self.send(request, Operation::GetProject { id: project_id })?;
        self.data(&response)
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let url = self.gen_url(&["users", "self", "projects"]);
        let response = self.send(self.authed(Method::Get, url)?, Operation::Other)?;
        self.data(&response)
    }

    pub fn delete_project(&self, project_id: i64) -> Result<()> {
        let url = self.gen_url(&["projects".to_string(), project_id.to_string()]);
        self.send(self.authed(Method::Delete, url)?, Operation::Other)?;
        Ok(())
    }

    pub fn upload_code(
        &self,
        project_id: i64,
        language: &str,
        code: Option<Vec<u8>>,
        dependency: Option<&str>,
    ) -> Result<Value> {
        let url = self.gen_url(&[
            "projects".to_string(),
            project_id.to_string(),
            "bot".to_string(),
        ]);
        let mut form = MultipartForm::default().field("language", language);
        if let Some(dependency) = dependency.filter(|d| !d.is_empty()) {
            form = form.field("dependency", dependency);
        }
        if let Some(data) = code {
            form = form.file(FilePart {
                name: "code".into(),
                filename: "bot.tgz".into(),
                content_type: "application/gzip".into(),
                data,
            });
        }
        debug!(project_id, language, "uploading bot code");
        let request = self
            .authed(Method::Post, url)?
            .body(RequestBody::Multipart(form));
        let response = self.send(request, Operation::Other)?;
        self.data(&response)
    }

    pub fn get_code(&self, project_id: i64) -> Result<CodeBundle> {
        let url = self.gen_url(&[
            "projects".to_string(),
            project_id.to_string(),
            "bot".to_string(),
        ]);
        let response = self.send(self.authed(Method::Get, url)?, Operation::Other)?;
        self.data(&response)
    }

    pub fn add_project_channel(
        &self,
        project_id: i64,
        channel: &str,
        credentials: &Map<String, Value>,
    ) -> Result<Value> {
        let url = self.gen_url(&[
            "projects".to_string(),
            project_id.to_string(),
            "channels".to_string(),
            channel.to_string(),
        ]);
        let request = self
            .authed(Method::Post, url)?
            .body(RequestBody::Json(json!({ "credentials": credentials })));
        let response = self.send(request, Operation::Other)?;
        self.data(&response)
    }

    pub fn get_project_channels(&self, project_id: i64) -> Result<Vec<ChannelBinding>> {
        let url = self.gen_url(&[
            "projects".to_string(),
            project_id.to_string(),
            "channels".to_string(),
        ]);
        let response = self.send(self.authed(Method::Get, url)?, Operation::Other)?;
        self.data(&response)
    }

    pub fn delete_project_channel(&self, project_id: i64, channel: &str) -> Result<()> {
        let url = self.gen_url(&[
            "projects".to_string(),
            project_id.to_string(),
            "channels".to_string(),
            channel.to_string(),
        ]);
        self.send(self.authed(Method::Delete, url)?, Operation::Other)?;
        Ok(())
    }

    pub fn set_project_properties(&self, project_id: i64, data: &Properties) -> Result<Value> {
        let url = self.gen_url(&[
            "projects".to_string(),
            project_id.to_string(),
            "properties".to_string(),
        ]);
        let request = self
            .authed(Method::Post, url)?
            .body(RequestBody::Json(json!({ "data": data })));
        let response = self.send(request, Operation::Other)?;
        self.data(&response)
    }

    pub fn set_project_property(
        &self,
        project_id: i64,
        key: &str,
        value: PropertyValue,
    ) -> Result<Value> {
        let mut data = Properties::new();
        data.insert(key.to_owned(), value);
        self.set_project_properties(project_id, &data)
    }

    pub fn get_project_properties(&self, project_id: i64) -> Result<Properties> {
        let url = self.gen_url(&[
            "projects".to_string(),
            project_id.to_string(),
            "properties".to_string(),
        ]);
        let response = self.send(self.authed(Method::Get, url)?, Operation::Other)?;
        let data: Option<Properties> = self.data(&response)?;
        Ok(data.unwrap_or_default())
    }

    pub fn delete_project_property(&self, project_id: i64, key: &str) -> Result<()> {
        let url = self.gen_url(&[
            "projects".to_string(),
            project_id.to_string(),
            "properties".to_string(),
            key.to_string(),
        ]);
        self.send(self.authed(Method::Delete, url)?, Operation::Other)?;
        Ok(())
    }

    pub fn add_project_nlu(
        &self,
        project_id: i64,
        nlu: &str,
        credentials: &Map<String, Value>,
    ) -> Result<Value> {
        let url = self.gen_url(&[
            "projects".to_string(),
            project_id.to_string(),
            "nlus".to_string(),
        ]);
        let request = self
            .authed(Method::Post, url)?
            .body(RequestBody::Json(json!({
                "nlu": nlu,
                "credentials": credentials,
            })));
        let response = self.send(request, Operation::Other)?;
        self.data(&response)
    }

    pub fn get_project_nlus(&self, project_id: i64) -> Result<Vec<NluIntegration>> {
        let url = self.gen_url(&[
            "projects".to_string(),
            project_id.to_string(),
            "nlus".to_string(),
        ]);
        let response = self.send(self.authed(Method::Get, url)?, Operation::Other)?;
        self.data(&response)
    }

    pub fn get_project_nlu(&self, project_id: i64, nlu: &str) -> Result<NluIntegration> {
        let url = self.gen_url(&[
            "projects".to_string(),
            project_id.to_string(),
            "nlus".to_string(),
            nlu.to_string(),
        ]);
        let response = self.send(self.authed(Method::Get, url)?, Operation::Other)?;
        self.data(&response)
    }

    pub fn delete_project_nlu(&self, project_id: i64, nlu: &str) -> Result<()> {
        let url = self.gen_url(&[
            "projects".to_string(),
            project_id.to_string(),
            "nlus".to_string(),
            nlu.to_string(),
        ]);
        self.send(self.authed(Method::Delete, url)?, Operation::Other)?;
        Ok(())
    }

    pub fn get_project_execution_logs(&self, project_id: i64) -> Result<Vec<LogEntry>> {
        let url = self.gen_url(&[
            "projects".to_string(),
            project_id.to_string(),
            "logs".to_string(),
        ]);
        let response = self.send(self.authed(Method::Get, url)?, Operation::Other)?;
        self.data(&response)
    }

    pub fn get_user_properties(
        &self,
        project_id: i64,
        channel: &str,
        user_id: &str,
        key: Option<&str>,
    ) -> Result<Value> {
        let mut segments = vec![
            "projects".to_string(),
            project_id.to_string(),
            "user-properties".to_string(),
            "channels".to_string(),
            channel.to_string(),
            "users".to_string(),
            user_id.to_string(),
        ];
        if let Some(key) = key {
            segments.push(key.to_string());
        }
        let url = self.gen_url(&segments);
        let response = self.send(self.authed(Method::Get, url)?, Operation::Other)?;
        self.data(&response)
    }

    pub fn set_user_properties(
        &self,
        project_id: i64,
        channel: &str,
        user_id: &str,
        data: &Map<String, Value>,
    ) -> Result<Value> {
        let url = self.gen_url(&[
            "projects".to_string(),
            project_id.to_string(),
            "user-properties".to_string(),
            "channels".to_string(),
            channel.to_string(),
            "users".to_string(),
            user_id.to_string(),
        ]);
        let request = self
            .authed(Method::Post, url)?
            .body(RequestBody::Json(json!({ "data": data })));
        let response = self.send(request, Operation::Other)?;
        self.data(&response)
    }
}
