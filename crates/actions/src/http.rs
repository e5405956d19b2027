//! HTTP actions: fetch a URL or post data to it.
//!
//! The response body is returned as text. Error statuses fail the action
//! with the status and a body excerpt so the model can see what went wrong.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use taskloop_core::action::{Action, ActionOutput};
use taskloop_core::context::Context;
use taskloop_core::error::ActionError;
use tracing::debug;

use crate::required_str;

const BODY_EXCERPT: usize = 500;

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn validate_url<'a>(action: &str, url: &'a str) -> Result<&'a str, ActionError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url)
    } else {
        Err(ActionError::InvalidArguments(format!(
            "{action}: URL must start with http:// or https://"
        )))
    }
}

async fn into_output(action: &str, response: reqwest::Response) -> Result<ActionOutput, ActionError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ActionError::failed(action, e))?;

    debug!(action, status = status.as_u16(), bytes = body.len(), "HTTP response");

    if status.is_client_error() || status.is_server_error() {
        let excerpt: String = body.chars().take(BODY_EXCERPT).collect();
        return Err(ActionError::failed(action, format!("HTTP {status}: {excerpt}")));
    }

    Ok(ActionOutput::Text(body))
}

pub struct HttpGetAction {
    client: reqwest::Client,
}

impl HttpGetAction {
    pub fn new() -> Self {
        Self { client: client() }
    }
}

impl Default for HttpGetAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for HttpGetAction {
    fn name(&self) -> &str {
        "http_get"
    }

    fn description(&self) -> &str {
        "Send a GET request to a URL and return the response body as text."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "The URL to fetch" }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, arguments: Value, _context: &Context) -> Result<ActionOutput, ActionError> {
        let url = validate_url(self.name(), required_str(&arguments, &["url"])?)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ActionError::failed(self.name(), e))?;

        into_output(self.name(), response).await
    }
}

pub struct HttpPostAction {
    client: reqwest::Client,
}

impl HttpPostAction {
    pub fn new() -> Self {
        Self { client: client() }
    }
}

impl Default for HttpPostAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for HttpPostAction {
    fn name(&self) -> &str {
        "http_post"
    }

    fn description(&self) -> &str {
        "Send a POST request to a URL. String data is sent as the raw body; objects are sent as JSON. Returns the response body."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "The URL to post to" },
                "data": { "description": "Request body: a string, or an object sent as JSON" }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, arguments: Value, _context: &Context) -> Result<ActionOutput, ActionError> {
        let url = validate_url(self.name(), required_str(&arguments, &["url"])?)?;

        let request = self.client.post(url);
        let request = match arguments.get("data") {
            None | Some(Value::Null) => request,
            Some(Value::String(s)) => request.body(s.clone()),
            Some(other) => request.json(other),
        };

        let response = request
            .send()
            .await
            .map_err(|e| ActionError::failed(self.name(), e))?;

        into_output(self.name(), response).await
    }
}
