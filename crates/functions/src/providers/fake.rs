//! Scripted [`ApiClient`] for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use super::traits::{ApiClient, ApiResponse, Query};
use crate::error::{Error, Result};

/// A request the fake received.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub query: Vec<(String, String)>,
}

impl Call {
    /// Value of query parameter `key`.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

enum Reply {
    Ok(Value),
    Err { status: u16, provider_status: Option<String> },
}

struct Expectation {
    method: Method,
    path: String,
    reply: Reply,
}

/// Replies to requests in the order they were scripted.
///
/// Panics when a request does not match the next expectation.
#[derive(Default)]
pub struct FakeClient {
    expectations: Mutex<VecDeque<Expectation>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect `method path` and reply 200 with `body`.
    pub fn ok(self, method: Method, path: &str, body: Value) -> Self {
        self.push(method, path, Reply::Ok(body))
    }

    /// Expect `method path` and fail with `status`.
    pub fn err(self, method: Method, path: &str, status: u16, provider_status: Option<&str>) -> Self {
        self.push(
            method,
            path,
            Reply::Err {
                status,
                provider_status: provider_status.map(str::to_string),
            },
        )
    }

    fn push(self, method: Method, path: &str, reply: Reply) -> Self {
        self.expectations.lock().unwrap().push_back(Expectation {
            method,
            path: path.to_string(),
            reply,
        });
        self
    }

    /// Requests received so far.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Whether every scripted reply was consumed.
    pub fn is_drained(&self) -> bool {
        self.expectations.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl ApiClient for FakeClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        query: Query<'_>,
    ) -> Result<ApiResponse> {
        self.calls.lock().unwrap().push(Call {
            method: method.clone(),
            path: path.to_string(),
            body,
            query: query
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        });

        let expectation = self
            .expectations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected request {method} {path}"));
        assert_eq!(
            (&expectation.method, expectation.path.as_str()),
            (&method, path),
            "request did not match the next expectation"
        );

        match expectation.reply {
            Reply::Ok(body) => Ok(ApiResponse::ok(body)),
            Reply::Err { status: 404, .. } => Err(Error::NotFound(path.to_string())),
            Reply::Err {
                status,
                provider_status,
            } => Err(Error::Api {
                status,
                provider_status,
                message: format!("scripted {status}"),
            }),
        }
    }
}
