//! In-process stand-ins used by the unit and integration tests.

use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;
use serde_json::Value;

use crate::api::{ApiRequest, ApiResponse, Transport};
use crate::error::{CliError, Result};

/// Replays queued responses in order and records every request it sees.
/// Running out of responses is reported as a transport error.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<ApiResponse>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, response: ApiResponse) {
        self.responses.lock().push_back(response);
    }

    pub fn record_json(&self, status: u16, body: Value) {
        self.record(ApiResponse::json(status, &body));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<ApiRequest> {
        self.requests.lock().last().cloned()
    }

    pub fn pending(&self) -> usize {
        self.responses.lock().len()
    }
}

impl Transport for MockTransport {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        self.requests.lock().push(request.clone());
        self.responses.lock().pop_front().ok_or_else(|| {
            CliError::Transport(format!(
                "no recorded response for {} {}",
                request.method.as_str(),
                request.url
            ))
        })
    }
}
