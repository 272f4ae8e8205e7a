use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::agent::HttpAgent;
use crate::backend::OpenAiBackend;
use crate::judge::{JudgeConfig, SemanticJudge};
use crate::retry::RetryPolicy;
use crate::runner::{Pacing, Schedule};

/// A run described in YAML.
///
/// ```yaml
/// agent:
///   type: http
///   url: http://localhost:8080/agent
/// data:
///   path: cases.yaml
/// judge:
///   model: gpt-4o-mini
/// schedule:
///   parallel: true
///   batch_size: 5
///   inter_batch_delay: 5s
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub agent: AgentConfig,
    pub data: DataConfig,
    #[serde(default)]
    pub judge: Option<JudgeSettings>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl RunConfig {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config {:?}", path))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid config {:?}", path))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum AgentConfig {
    Http {
        url: String,
        #[serde(default = "default_http_method")]
        method: String,
        #[serde(default)]
        model: Option<String>,
    },
}

fn default_http_method() -> String {
    "POST".to_string()
}

impl AgentConfig {
    pub fn build(&self) -> HttpAgent {
        match self {
            AgentConfig::Http { url, method, model } => {
                let agent = HttpAgent::new(url.clone()).method(method);
                match model {
                    Some(model) => agent.model(model.clone()),
                    None => agent,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub path: PathBuf,
}

/// OpenAI-compatible endpoint used by the semantic judge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeSettings {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_rationale_lines: Option<usize>,
}

impl Default for JudgeSettings {
    fn default() -> Self {
        let defaults = JudgeConfig::default();
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
            max_rationale_lines: defaults.max_rationale_lines,
        }
    }
}

impl JudgeSettings {
    /// A missing key env var is not an error; local endpoints often need none.
    pub fn build(&self) -> SemanticJudge {
        let mut backend = OpenAiBackend::new(self.base_url.clone(), self.model.clone());
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.is_empty() => backend = backend.with_api_key(key),
            _ => tracing::warn!(var = %self.api_key_env, "judge API key not set"),
        }
        SemanticJudge::with_config(
            Arc::new(backend),
            JudgeConfig {
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                max_rationale_lines: self.max_rationale_lines,
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub parallel: bool,
    pub batch_size: usize,
    #[serde(with = "humantime_serde")]
    pub inter_case_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub inter_batch_delay: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        let pacing = Pacing::default();
        Self {
            parallel: false,
            batch_size: 5,
            inter_case_delay: pacing.inter_case_delay,
            inter_batch_delay: pacing.inter_batch_delay,
        }
    }
}

impl ScheduleConfig {
    pub fn schedule(&self) -> Schedule {
        if self.parallel {
            Schedule::parallel(self.batch_size)
        } else {
            Schedule::Sequential
        }
    }

    pub fn pacing(&self) -> Pacing {
        Pacing {
            inter_case_delay: self.inter_case_delay,
            inter_batch_delay: self.inter_batch_delay,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for `results.jsonl` and `summary.json`.
    pub dir: Option<PathBuf>,
    /// SQLite database file.
    pub db: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = RunConfig::from_yaml(
            "agent:\n  type: http\n  url: http://localhost:8080\ndata:\n  path: cases.jsonl\n",
        )
        .unwrap();
        assert!(config.judge.is_none());
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.schedule.schedule(), Schedule::Sequential);
        assert_eq!(config.schedule.pacing(), Pacing::default());
        assert_eq!(config.output, OutputConfig::default());
        assert!(matches!(
            config.agent,
            AgentConfig::Http { ref method, .. } if method == "POST"
        ));
    }

    #[test]
    fn full_config() {
        let config = RunConfig::from_yaml(
            r#"
agent:
  type: http
  url: http://localhost:8080/agent
  method: GET
  model: agent-v2
data:
  path: suites/smoke.yaml
judge:
  base_url: http://localhost:11434/v1
  model: llama3
  max_rationale_lines: 4
retry:
  max_retries: 2
  initial_delay: 250ms
schedule:
  parallel: true
  batch_size: 3
  inter_case_delay: 0s
  inter_batch_delay: 1m
output:
  dir: out
  db: runs.db
"#,
        )
        .unwrap();

        let judge = config.judge.unwrap();
        assert_eq!(judge.model, "llama3");
        assert_eq!(judge.temperature, 0.0);
        assert_eq!(judge.max_tokens, 512);
        assert_eq!(judge.max_rationale_lines, Some(4));
        assert_eq!(judge.api_key_env, "OPENAI_API_KEY");

        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.schedule.schedule(), Schedule::Parallel { batch_size: 3 });
        assert_eq!(config.schedule.pacing().inter_batch_delay, Duration::from_secs(60));
        assert_eq!(config.output.db, Some(PathBuf::from("runs.db")));
        let agent = config.agent.build();
        assert_eq!(Agent::model(&agent), Some("agent-v2"));
    }

    #[test]
    fn rejects_unknown_agent_type() {
        let err = RunConfig::from_yaml("agent:\n  type: grpc\n  url: x\ndata:\n  path: c\n");
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn load_reports_path() {
        let err = RunConfig::load("/no/such/judgecraft.yaml").await.unwrap_err();
        assert!(err.to_string().contains("judgecraft.yaml"));
    }
}
