use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::backend::check_status;
use crate::error::AgentError;
pub use judgecraft_types::CallMetrics;

/// What one `process` call produced, with the metrics of that same call.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
	pub output: Value,
	pub metrics: Option<CallMetrics>,
}

impl AgentResponse {
	pub fn new(output: Value) -> Self {
		Self { output, metrics: None }
	}

	pub fn with_metrics(output: Value, metrics: CallMetrics) -> Self {
		Self { output, metrics: Some(metrics) }
	}
}

/// The system under test. One instance serves every case of a run, possibly
/// from several cases at once.
#[async_trait]
pub trait Agent: Send + Sync {
	async fn process(&self, input: &Value) -> Result<AgentResponse, AgentError>;

	/// Model identifier reported in run metadata.
	fn model(&self) -> Option<&str> {
		None
	}
}

/// Wrap an async closure as an `Agent`.
///
/// Errors are classified by downcasting: a [`BackendError`](crate::BackendError)
/// or [`AgentError`] inside the `anyhow::Error` keeps its kind, anything else
/// is a plain failure.
pub fn from_async_fn<F, Fut>(f: F) -> Arc<dyn Agent>
where
	F: Send + Sync + 'static + Fn(&Value) -> Fut,
	Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
	struct ClosureAgent<F> {
		f: F,
	}

	#[async_trait]
	impl<F, Fut> Agent for ClosureAgent<F>
	where
		F: Send + Sync + 'static + Fn(&Value) -> Fut,
		Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
	{
		async fn process(&self, input: &Value) -> Result<AgentResponse, AgentError> {
			let output = (self.f)(input).await?;
			Ok(AgentResponse::new(output))
		}
	}

	Arc::new(ClosureAgent { f })
}

/// Agent behind an HTTP endpoint. Sends `{ "input": <value> }` and expects JSON back.
pub struct HttpAgent {
	client: reqwest::Client,
	url: String,
	method: reqwest::Method,
	model: Option<String>,
}

impl HttpAgent {
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			client: reqwest::Client::new(),
			url: url.into(),
			method: reqwest::Method::POST,
			model: None,
		}
	}

	pub fn method(mut self, method: &str) -> Self {
		self.method = match method.to_uppercase().as_str() {
			"GET" => reqwest::Method::GET,
			_ => reqwest::Method::POST,
		};
		self
	}

	pub fn model(mut self, model: impl Into<String>) -> Self {
		self.model = Some(model.into());
		self
	}
}

#[async_trait]
impl Agent for HttpAgent {
	async fn process(&self, input: &Value) -> Result<AgentResponse, AgentError> {
		let req = if self.method == reqwest::Method::GET {
			// Encode input as query ?input=<json>
			self.client.get(&self.url).query(&[("input", input.to_string())])
		} else {
			self.client.post(&self.url).json(&json!({ "input": input }))
		};
		let resp = req
			.send()
			.await
			.map_err(|e| AgentError::failed(format!("request failed: {e}")))?;
		let status = resp.status();
		let retry_after = resp.headers().get(RETRY_AFTER).cloned();
		let body = resp
			.text()
			.await
			.map_err(|e| AgentError::failed(format!("failed to read response: {e}")))?;
		parse_body(status, retry_after.as_ref(), &body)
	}

	fn model(&self) -> Option<&str> {
		self.model.as_deref()
	}
}

fn parse_body(status: StatusCode, retry_after: Option<&HeaderValue>, body: &str) -> Result<AgentResponse, AgentError> {
	check_status(status, retry_after, body)?;
	let v: Value = serde_json::from_str(body)
		.map_err(|e| AgentError::failed(format!("invalid JSON response: {e}")))?;
	Ok(split_metrics(v))
}

/// Endpoints may return `{ "output": ..., "metrics": {...} }`; anything else is the output itself.
fn split_metrics(v: Value) -> AgentResponse {
	match v {
		Value::Object(mut map) if map.contains_key("output") && map.contains_key("metrics") => {
			let metrics = map
				.remove("metrics")
				.and_then(|m| serde_json::from_value::<CallMetrics>(m).ok());
			let output = map.remove("output").unwrap_or(Value::Null);
			AgentResponse { output, metrics }
		}
		other => AgentResponse::new(other),
	}
}
