use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabled::Tabled;

/// Diagnostic keys that never take part in comparisons and are never persisted.
pub const DEBUG_FIELDS: &[&str] = &["rawResponse", "raw_response", "_raw"];

/// Remove [`DEBUG_FIELDS`] from every object nested in `value`.
pub fn strip_debug_fields(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !DEBUG_FIELDS.contains(&key.as_str()))
                .map(|(key, v)| (key.clone(), strip_debug_fields(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_debug_fields).collect()),
        other => other.clone(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// Usage and cost reported by an agent for one `process` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallMetrics {
    /// Model name (e.g., "gpt-4o-mini")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,

    /// Cost of the call in USD
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

/// How a case's expected outcome is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationMethod {
    String,
    MultiChoice,
    Boolean,
    Criteria,
}

impl std::fmt::Display for ValidationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ValidationMethod::String => "STRING",
            ValidationMethod::MultiChoice => "MULTI_CHOICE",
            ValidationMethod::Boolean => "BOOLEAN",
            ValidationMethod::Criteria => "CRITERIA",
        };
        f.write_str(s)
    }
}

/// Outcome of executing one case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
	pub case_name: String,
	pub passed: bool,
	pub actual_output: Value,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub expected_output: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub criteria: Option<Vec<String>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub validation_method: Option<ValidationMethod>,
	/// Raw text of the execution error, if the agent call failed.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	/// Narrative of why validation failed.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub failure_reason: Option<String>,
	pub duration_ms: u64,
	/// Number of agent calls made, retries included.
	pub attempts: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub metrics: Option<CallMetrics>,
}

impl EvaluationResult {
	/// JSON record for persistence, with debug fields removed from the output.
	pub fn to_record(&self) -> Value {
		let mut record = self.clone();
		record.actual_output = strip_debug_fields(&self.actual_output);
		serde_json::to_value(record).unwrap_or(Value::Null)
	}

	/// Error text if the call failed, else the validation narrative.
	pub fn reason(&self) -> Option<&str> {
		self.error.as_deref().or(self.failure_reason.as_deref())
	}

	pub fn total_tokens(&self) -> Option<u32> {
		self.metrics.as_ref()?.usage.map(|u| u.total_tokens)
	}

	pub fn cost_usd(&self) -> Option<f64> {
		self.metrics.as_ref()?.cost_usd
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunMode {
    Sequential,
    Parallel,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Sequential => f.write_str("sequential"),
            RunMode::Parallel => f.write_str("parallel"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub mode: RunMode,
    pub batch_size: usize,
    pub max_retries: u32,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedCase {
    pub case_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
	pub total: usize,
	pub passed: usize,
	pub failed: usize,
	pub pass_rate: f64,
	pub total_duration_ms: u64,
	pub avg_duration_ms: f64,
	pub total_tokens: u64,
	pub avg_tokens: f64,
	pub total_cost_usd: f64,
	pub avg_cost_usd: f64,
	pub failures: Vec<FailedCase>,
	pub metadata: RunMetadata,
}

impl RunSummary {
	pub fn summarize(results: &[EvaluationResult], metadata: RunMetadata) -> Self {
		let total = results.len();
		let passed = results.iter().filter(|r| r.passed).count();
		let total_duration_ms: u64 = results.iter().map(|r| r.duration_ms).sum();
		let total_tokens: u64 = results.iter().filter_map(|r| r.total_tokens()).map(u64::from).sum();
		let total_cost_usd: f64 = results.iter().filter_map(|r| r.cost_usd()).sum();

		let failures = results
			.iter()
			.filter(|r| !r.passed)
			.map(|r| FailedCase {
				case_name: r.case_name.clone(),
				reason: r.reason().unwrap_or("unknown").to_string(),
			})
			.collect();

		let per_case = |sum: f64| if total == 0 { 0.0 } else { sum / total as f64 };

		RunSummary {
			total,
			passed,
			failed: total - passed,
			pass_rate: per_case(passed as f64),
			total_duration_ms,
			avg_duration_ms: per_case(total_duration_ms as f64),
			total_tokens,
			avg_tokens: per_case(total_tokens as f64),
			total_cost_usd,
			avg_cost_usd: per_case(total_cost_usd),
			failures,
			metadata,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
	pub results: Vec<EvaluationResult>,
	pub summary: RunSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct SummaryRow {
	case: String,
	passed: String,
	duration_ms: u64,
	output: String,
	reason: String,
}

impl RunReport {
	pub fn summary_table(&self) -> String {
        use tabled::Table;
		let rows: Vec<SummaryRow> = self.results.iter().map(|r| SummaryRow {
			case: r.case_name.clone(),
			passed: if r.passed { "✓" } else { "✗" }.to_string(),
			duration_ms: r.duration_ms,
			output: truncate(value_preview(&strip_debug_fields(&r.actual_output)), 64),
			reason: truncate(r.reason().unwrap_or_default().to_string(), 64),
		}).collect();

		let table = Table::new(rows);
		let table_str = table.to_string();

		let s = &self.summary;
		let summary_text = format!(
			"Total: {}  Passed: {}  Failed: {}  Pass rate: {:.1}%  Avg duration: {:.0}ms  Tokens: {}  Cost: ${:.4}",
			s.total,
			s.passed,
			s.failed,
			s.pass_rate * 100.0,
			s.avg_duration_ms,
			s.total_tokens,
			s.total_cost_usd
		);

		let mut out = format!("{}\n\n{}\n", table_str, summary_text);
		for failure in &s.failures {
			out.push_str(&format!("  ✗ {}: {}\n", failure.case_name, failure.reason));
		}
		out
	}
}

fn value_preview(v: &Value) -> String {
	match v {
		Value::String(s) => s.clone(),
		_ => v.to_string(),
	}
}

fn truncate(s: String, max_len: usize) -> String {
	if s.chars().count() <= max_len {
		return s;
	}
	let mut truncated = s.chars().take(max_len.saturating_sub(1)).collect::<String>();
	truncated.push('…');
	truncated
}
