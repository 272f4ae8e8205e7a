use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::{Agent, AgentResponse};
use crate::case::EvaluationCase;
use crate::error::AgentError;
use crate::judge::SemanticJudge;
use crate::retry::RetryPolicy;
use crate::sink::ResultSink;
use crate::source::CaseSource;
use crate::validation::ValidationEngine;
use judgecraft_types::{EvaluationResult, RunMetadata, RunMode, RunReport, RunSummary};

/// How a batch of cases is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
	/// One case at a time.
	Sequential,
	/// Consecutive chunks of `batch_size` cases run concurrently.
	Parallel { batch_size: usize },
}

impl Schedule {
	pub fn parallel(batch_size: usize) -> Self {
		Schedule::Parallel { batch_size: batch_size.max(1) }
	}

	pub fn mode(&self) -> RunMode {
		match self {
			Schedule::Sequential => RunMode::Sequential,
			Schedule::Parallel { .. } => RunMode::Parallel,
		}
	}

	pub fn batch_size(&self) -> usize {
		match self {
			Schedule::Sequential => 1,
			Schedule::Parallel { batch_size } => (*batch_size).max(1),
		}
	}
}

impl Default for Schedule {
	fn default() -> Self {
		Schedule::Sequential
	}
}

/// Pauses between cases and between parallel chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pacing {
	#[serde(with = "humantime_serde")]
	pub inter_case_delay: Duration,
	#[serde(with = "humantime_serde")]
	pub inter_batch_delay: Duration,
}

impl Default for Pacing {
	fn default() -> Self {
		Self {
			inter_case_delay: Duration::from_secs(2),
			inter_batch_delay: Duration::from_secs(5),
		}
	}
}

impl Pacing {
	pub fn none() -> Self {
		Self {
			inter_case_delay: Duration::ZERO,
			inter_batch_delay: Duration::ZERO,
		}
	}
}

pub struct RunnerBuilder {
	agent: Option<Arc<dyn Agent>>,
	judge: Option<Arc<SemanticJudge>>,
	sink: Option<Arc<dyn ResultSink>>,
	retry: RetryPolicy,
	pacing: Pacing,
}

impl RunnerBuilder {
	pub fn new() -> Self {
		Self {
			agent: None,
			judge: None,
			sink: None,
			retry: RetryPolicy::default(),
			pacing: Pacing::default(),
		}
	}

	pub fn agent(mut self, agent: Arc<dyn Agent>) -> Self {
		self.agent = Some(agent);
		self
	}

	pub fn judge(mut self, judge: Arc<SemanticJudge>) -> Self {
		self.judge = Some(judge);
		self
	}

	pub fn sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
		self.sink = Some(sink);
		self
	}

	pub fn retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;
		self
	}

	pub fn pacing(mut self, pacing: Pacing) -> Self {
		self.pacing = pacing;
		self
	}

	pub fn build(self) -> Result<Runner> {
		let validator = match self.judge {
			Some(judge) => ValidationEngine::with_judge(judge),
			None => ValidationEngine::new(),
		};
		Ok(Runner {
			agent: self.agent.ok_or_else(|| anyhow::anyhow!("agent must be set"))?,
			validator,
			sink: self.sink,
			retry: self.retry,
			pacing: self.pacing,
		})
	}
}

impl Default for RunnerBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Drives cases against one shared agent instance.
pub struct Runner {
	agent: Arc<dyn Agent>,
	validator: ValidationEngine,
	sink: Option<Arc<dyn ResultSink>>,
	retry: RetryPolicy,
	pacing: Pacing,
}

impl Runner {
	pub fn builder() -> RunnerBuilder {
		RunnerBuilder::new()
	}

	/// Load cases from `source`, run them, and return results with the summary.
	pub async fn run(&self, source: &dyn CaseSource, schedule: Schedule) -> Result<RunReport> {
		let cases = source.load().await?;
		let started_at = Utc::now();
		let results = self.run_batch_inner(&cases, schedule).await;
		let summary = RunSummary::summarize(&results, self.metadata(schedule, started_at));
		self.emit_summary(&results, &summary).await;
		Ok(RunReport { results, summary })
	}

	/// Run every case; results come back in the order of `cases`.
	pub async fn run_batch(&self, cases: &[EvaluationCase], schedule: Schedule) -> Vec<EvaluationResult> {
		let started_at = Utc::now();
		let results = self.run_batch_inner(cases, schedule).await;
		if self.sink.is_some() {
			let summary = RunSummary::summarize(&results, self.metadata(schedule, started_at));
			self.emit_summary(&results, &summary).await;
		}
		results
	}

	async fn run_batch_inner(&self, cases: &[EvaluationCase], schedule: Schedule) -> Vec<EvaluationResult> {
		tracing::info!(cases = cases.len(), mode = %schedule.mode(), batch_size = schedule.batch_size(), "starting run");
		let mut results = Vec::with_capacity(cases.len());
		match schedule {
			Schedule::Sequential => {
				for (i, case) in cases.iter().enumerate() {
					if i > 0 && !self.pacing.inter_case_delay.is_zero() {
						tokio::time::sleep(self.pacing.inter_case_delay).await;
					}
					results.push(self.run_single(case).await);
				}
			}
			Schedule::Parallel { .. } => {
				let chunks: Vec<&[EvaluationCase]> = cases.chunks(schedule.batch_size()).collect();
				let last = chunks.len().saturating_sub(1);
				for (i, chunk) in chunks.into_iter().enumerate() {
					tracing::debug!(batch = i + 1, size = chunk.len(), "running batch");
					// join_all yields in input order regardless of completion order.
					let batch = join_all(chunk.iter().map(|case| self.run_single(case))).await;
					results.extend(batch);
					if i < last && !self.pacing.inter_batch_delay.is_zero() {
						tokio::time::sleep(self.pacing.inter_batch_delay).await;
					}
				}
			}
		}
		results
	}

	/// Execute one case. Failures of any kind end up in the returned result.
	pub async fn run_single(&self, case: &EvaluationCase) -> EvaluationResult {
		tracing::debug!(case = case.name(), "running case");
		let started = Instant::now();
		let (outcome, attempts) = self.call_with_retry(case).await;
		let duration_ms = started.elapsed().as_millis() as u64;

		let mut result = EvaluationResult {
			case_name: case.name().to_string(),
			passed: false,
			actual_output: Value::Null,
			expected_output: case.expected_output().map(|e| e.to_value()),
			criteria: case.criteria().map(<[String]>::to_vec),
			validation_method: Some(case.validation_method()),
			error: None,
			failure_reason: None,
			duration_ms,
			attempts,
			metrics: None,
		};

		match outcome {
			Ok(AgentResponse { output, metrics }) => {
				let verdict = self.validator.validate_case(case, &output).await;
				result.passed = verdict.passed;
				result.failure_reason = verdict.reason;
				result.actual_output = output;
				result.metrics = metrics;
			}
			Err(err) => {
				result.error = Some(err.message().to_string());
			}
		}

		if result.passed {
			tracing::info!(case = case.name(), duration_ms, "case passed");
		} else {
			tracing::info!(case = case.name(), duration_ms, reason = result.reason().unwrap_or_default(), "case failed");
		}

		if let Some(sink) = &self.sink {
			if let Err(err) = sink.append_result(&result).await {
				tracing::error!(case = case.name(), error = %err, "failed to record result");
			}
		}
		result
	}

	/// Returns the final outcome and the number of calls made.
	async fn call_with_retry(&self, case: &EvaluationCase) -> (Result<AgentResponse, AgentError>, u32) {
		let mut backoff = self.retry.backoff();
		let mut calls = 0u32;
		loop {
			calls += 1;
			let err = match self.agent.process(case.input()).await {
				Ok(resp) => return (Ok(resp), calls),
				Err(err) => err,
			};
			if !err.is_rate_limited() {
				tracing::warn!(case = case.name(), error = %err, "agent call failed");
				return (Err(err), calls);
			}
			let Some(delay) = backoff.next_delay() else {
				tracing::warn!(case = case.name(), retries = backoff.attempt(), error = %err, "retry budget exhausted");
				return (Err(err), calls);
			};
			let delay = err.retry_after().map_or(delay, |hint| hint.max(delay));
			tracing::warn!(
				case = case.name(),
				attempt = backoff.attempt(),
				delay_ms = delay.as_millis() as u64,
				"rate limited, backing off"
			);
			tokio::time::sleep(delay).await;
		}
	}

	fn metadata(&self, schedule: Schedule, started_at: chrono::DateTime<Utc>) -> RunMetadata {
		RunMetadata {
			model: self.agent.model().map(str::to_string),
			mode: schedule.mode(),
			batch_size: schedule.batch_size(),
			max_retries: self.retry.max_retries,
			started_at,
		}
	}

	async fn emit_summary(&self, results: &[EvaluationResult], summary: &RunSummary) {
		tracing::info!(
			total = summary.total,
			passed = summary.passed,
			failed = summary.failed,
			pass_rate = summary.pass_rate,
			"run finished"
		);
		if let Some(sink) = &self.sink {
			if let Err(err) = sink.write_summary(results, summary).await {
				tracing::error!(error = %err, "failed to write run summary");
			}
		}
	}
}
