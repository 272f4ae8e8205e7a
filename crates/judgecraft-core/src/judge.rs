//! LLM-as-judge: decide whether free text meets natural-language criteria.
//!
//! The backend is asked for a two-line answer:
//!
//! ```text
//! EVALUATION: PASS|FAIL
//! RATIONALE: <reason, only on FAIL>
//! ```
//!
//! and the reply is parsed line by line. Anything the backend says outside
//! those markers is ignored.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::backend::{Backend, GenerateRequest};

const SYSTEM_PROMPT: &str = "You are a strict evaluator. Decide whether the OUTPUT satisfies every one of the CRITERIA.\n\
Answer in exactly this format and nothing else:\n\
EVALUATION: PASS or FAIL\n\
RATIONALE: <one or two sentences naming the unmet criteria>\n\
Include the RATIONALE line only when the evaluation is FAIL.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgeResult {
    pub passed: bool,
    pub rationale: Option<String>,
}

impl JudgeResult {
    fn unavailable(cause: impl std::fmt::Display) -> Self {
        Self {
            passed: false,
            rationale: Some(format!("evaluation failed: {cause}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JudgeConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Stop capturing the rationale after this many lines.
    pub max_rationale_lines: Option<usize>,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 512,
            max_rationale_lines: None,
        }
    }
}

pub struct SemanticJudge {
    backend: Arc<dyn Backend>,
    config: JudgeConfig,
}

impl SemanticJudge {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_config(backend, JudgeConfig::default())
    }

    pub fn with_config(backend: Arc<dyn Backend>, config: JudgeConfig) -> Self {
        Self { backend, config }
    }

    pub fn model(&self) -> Option<&str> {
        self.backend.model()
    }

    /// Judge `output` against `criteria`. A backend failure is a FAIL, never a PASS.
    pub async fn evaluate(
        &self,
        output: &str,
        criteria: &[String],
        context: Option<&BTreeMap<String, String>>,
    ) -> JudgeResult {
        let request = GenerateRequest {
            system_prompt: SYSTEM_PROMPT.to_string(),
            user_prompt: build_prompt(output, criteria, context),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        match self.backend.generate(&request).await {
            Ok(generation) => {
                let result = parse_response_with_limit(&generation.text, self.config.max_rationale_lines);
                tracing::debug!(passed = result.passed, rationale = ?result.rationale, "judge verdict");
                result
            }
            Err(err) => {
                tracing::warn!(error = %err, "semantic judge call failed");
                JudgeResult::unavailable(err)
            }
        }
    }
}

pub(crate) fn build_prompt(
    output: &str,
    criteria: &[String],
    context: Option<&BTreeMap<String, String>>,
) -> String {
    let mut prompt = String::from("CRITERIA:\n");
    for (i, criterion) in criteria.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, criterion));
    }
    prompt.push_str("\nOUTPUT:\n");
    prompt.push_str(output);
    prompt.push('\n');
    for (key, value) in context.into_iter().flatten() {
        prompt.push_str(&format!("\n{}:\n{}\n", key.to_uppercase(), value));
    }
    prompt
}

fn evaluation_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)EVALUATION:").expect("valid regex"))
}

fn rationale_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)RATIONALE:").expect("valid regex"))
}

fn capture_sentinel() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)EVALUATION:|CRITERIA:|OUTPUT:").expect("valid regex"))
}

enum Capture {
    NotStarted,
    Capturing { lines: usize },
    Done,
}

pub fn parse_response(text: &str) -> JudgeResult {
    parse_response_with_limit(text, None)
}

pub fn parse_response_with_limit(text: &str, max_lines: Option<usize>) -> JudgeResult {
    let mut passed: Option<bool> = None;
    let mut rationale = String::new();
    let mut capture = Capture::NotStarted;

    for line in text.lines() {
        if let Capture::Capturing { lines } = capture {
            if capture_sentinel().is_match(line) || max_lines.is_some_and(|max| lines >= max) {
                capture = Capture::Done;
            } else {
                rationale.push(' ');
                rationale.push_str(line);
                capture = Capture::Capturing { lines: lines + 1 };
                continue;
            }
        }

        if passed.is_none() && evaluation_marker().is_match(line) {
            passed = Some(line.to_uppercase().contains("PASS"));
        }

        if matches!(capture, Capture::NotStarted) {
            if let Some(m) = rationale_marker().find(line) {
                rationale.push_str(&line[m.end()..]);
                capture = Capture::Capturing { lines: 1 };
            }
        }
    }

    let rationale = rationale.trim();
    JudgeResult {
        passed: passed.unwrap_or(false),
        rationale: (!rationale.is_empty()).then(|| rationale.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Generation;
    use crate::error::BackendError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedBackend {
        reply: Result<String, BackendError>,
        seen: Mutex<Vec<GenerateRequest>>,
    }

    impl ScriptedBackend {
        fn new(reply: Result<&str, BackendError>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.map(str::to_string),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        async fn generate(&self, request: &GenerateRequest) -> Result<Generation, BackendError> {
            self.seen.lock().unwrap().push(request.clone());
            self.reply.clone().map(|text| Generation { text, usage: None })
        }
    }

    #[test]
    fn pass_without_rationale() {
        assert_eq!(
            parse_response("EVALUATION: PASS"),
            JudgeResult { passed: true, rationale: None }
        );
    }

    #[test]
    fn fail_with_rationale() {
        assert_eq!(
            parse_response("EVALUATION: FAIL\nRATIONALE: missing analogy"),
            JudgeResult {
                passed: false,
                rationale: Some("missing analogy".into())
            }
        );
    }

    #[test]
    fn markers_are_case_insensitive() {
        let result = parse_response("evaluation: pass\n");
        assert!(result.passed);
        let result = parse_response("Evaluation: fail\nRationale: too short");
        assert!(!result.passed);
        assert_eq!(result.rationale.as_deref(), Some("too short"));
    }

    #[test]
    fn missing_verdict_defaults_to_fail() {
        let result = parse_response("I think this looks fine.");
        assert!(!result.passed);
        assert_eq!(result.rationale, None);
    }

    #[test]
    fn rationale_spans_lines_until_sentinel() {
        let text = "EVALUATION: FAIL\nRATIONALE: the answer\nnever mentions\n  an analogy\nOUTPUT: echoed text";
        let result = parse_response(text);
        assert_eq!(
            result.rationale.as_deref(),
            Some("the answer never mentions   an analogy")
        );
    }

    #[test]
    fn verdict_after_rationale_still_counts() {
        let result = parse_response("RATIONALE: too vague\nEVALUATION: FAIL");
        assert!(!result.passed);
        assert_eq!(result.rationale.as_deref(), Some("too vague"));
    }

    #[test]
    fn blank_rationale_is_none() {
        let result = parse_response("EVALUATION: FAIL\nRATIONALE:   \n");
        assert!(!result.passed);
        assert_eq!(result.rationale, None);
    }

    #[test]
    fn only_first_verdict_line_counts() {
        let result = parse_response("EVALUATION: FAIL\nEVALUATION: PASS");
        assert!(!result.passed);
    }

    #[test]
    fn rationale_line_cap() {
        let text = "EVALUATION: FAIL\nRATIONALE: one\ntwo\nthree\nfour";
        let result = parse_response_with_limit(text, Some(2));
        assert_eq!(result.rationale.as_deref(), Some("one two"));
    }

    #[test]
    fn prompt_numbers_criteria_and_appends_context() {
        let criteria = vec!["uses an analogy".to_string(), "under 100 words".to_string()];
        let mut context = BTreeMap::new();
        context.insert("question".to_string(), "what is recursion?".to_string());
        let prompt = build_prompt("Recursion is like...", &criteria, Some(&context));
        assert!(prompt.starts_with("CRITERIA:\n1. uses an analogy\n2. under 100 words\n"));
        assert!(prompt.contains("\nOUTPUT:\nRecursion is like...\n"));
        assert!(prompt.ends_with("\nQUESTION:\nwhat is recursion?\n"));
    }

    #[tokio::test]
    async fn evaluate_uses_fixed_low_temperature() {
        let backend = ScriptedBackend::new(Ok("EVALUATION: PASS"));
        let judge = SemanticJudge::new(backend.clone());
        let result = judge.evaluate("text", &["c".to_string()], None).await;
        assert!(result.passed);
        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].temperature, 0.0);
        assert_eq!(seen[0].max_tokens, 512);
        assert!(seen[0].system_prompt.contains("EVALUATION: PASS or FAIL"));
    }

    #[tokio::test]
    async fn backend_failure_is_never_a_pass() {
        let backend = ScriptedBackend::new(Err(BackendError::Other("connection refused".into())));
        let judge = SemanticJudge::new(backend);
        let result = judge.evaluate("text", &["c".to_string()], None).await;
        assert_eq!(
            result,
            JudgeResult {
                passed: false,
                rationale: Some("evaluation failed: connection refused".into())
            }
        );
    }
}
