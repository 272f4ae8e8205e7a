use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::case::{EvaluationCase, ExpectedOutput, FieldValidations};
use crate::judge::SemanticJudge;
use crate::validator::FieldValidator;
use judgecraft_types::strip_debug_fields;

/// Pass/fail decision for one executed case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub passed: bool,
    pub reason: Option<String>,
}

impl Verdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
        }
    }

    fn from_failures(failures: Vec<String>) -> Self {
        if failures.is_empty() {
            Self::pass()
        } else {
            Self::fail(failures.join("; "))
        }
    }
}

/// Decides pass/fail from field rules, structural equality, or the judge.
#[derive(Clone, Default)]
pub struct ValidationEngine {
    judge: Option<Arc<SemanticJudge>>,
}

impl ValidationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_judge(judge: Arc<SemanticJudge>) -> Self {
        Self { judge: Some(judge) }
    }

    pub fn judge(&self) -> Option<&Arc<SemanticJudge>> {
        self.judge.as_ref()
    }

    /// Field rules win over `expected`; with neither the case cannot pass.
    pub async fn validate(
        &self,
        actual: &Value,
        expected: Option<&ExpectedOutput>,
        fields: &FieldValidations,
    ) -> Verdict {
        if !fields.is_empty() {
            return self.validate_fields(actual, fields).await;
        }
        match expected {
            Some(expected) => validate_equality(actual, &expected.to_value()),
            None => Verdict::fail("no validation rules specified"),
        }
    }

    /// Like [`validate`](Self::validate), but a criteria-only case sends the
    /// whole output to the judge.
    pub async fn validate_case(&self, case: &EvaluationCase, actual: &Value) -> Verdict {
        match case.criteria() {
            Some(criteria) if case.field_validations().is_empty() => {
                let mut context = BTreeMap::new();
                if let Some(description) = case.description() {
                    context.insert("description".to_string(), description.to_string());
                }
                let text = render_for_judge(&strip_debug_fields(actual));
                self.judge_text(&text, criteria, Some(&context)).await
            }
            _ => {
                self.validate(actual, case.expected_output(), case.field_validations())
                    .await
            }
        }
    }

    async fn validate_fields(&self, actual: &Value, fields: &FieldValidations) -> Verdict {
        let mut failures = Vec::new();
        for (field, rule) in fields {
            let Some(value) = actual.get(field.as_str()) else {
                failures.push(format!("field '{field}' not found in output"));
                continue;
            };

            let outcome = match rule {
                FieldValidator::Criteria { criteria } => {
                    let text = serde_json::to_string_pretty(&json!({ field.as_str(): value }))
                        .unwrap_or_else(|_| value.to_string());
                    let verdict = self.judge_text(&text, criteria, None).await;
                    if verdict.passed {
                        Ok(())
                    } else {
                        Err(format!("field '{field}': {}", verdict.reason.unwrap_or_default()))
                    }
                }
                rule => rule.check(field, value),
            };

            if let Err(failure) = outcome {
                tracing::debug!(field = %field, %failure, "field validation failed");
                failures.push(failure);
            }
        }
        Verdict::from_failures(failures)
    }

    async fn judge_text(
        &self,
        text: &str,
        criteria: &[String],
        context: Option<&BTreeMap<String, String>>,
    ) -> Verdict {
        let Some(judge) = &self.judge else {
            return Verdict::fail("no semantic judge configured");
        };
        let result = judge.evaluate(text, criteria, context).await;
        if result.passed {
            Verdict::pass()
        } else {
            Verdict::fail(result.rationale.unwrap_or_else(|| "criteria not met".to_string()))
        }
    }
}

/// Deep equality after removing debug fields from both sides.
pub fn validate_equality(actual: &Value, expected: &Value) -> Verdict {
    let actual = strip_debug_fields(actual);
    let expected = strip_debug_fields(expected);
    if actual == expected {
        Verdict::pass()
    } else {
        Verdict::fail(format!("output mismatch: expected {expected}, got {actual}"))
    }
}

fn render_for_judge(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, GenerateRequest, Generation};
    use crate::error::BackendError;
    use crate::validator::ItemRule;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedBackend {
        reply: &'static str,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Backend for FixedBackend {
        async fn generate(&self, request: &GenerateRequest) -> Result<Generation, BackendError> {
            self.prompts.lock().unwrap().push(request.user_prompt.clone());
            Ok(Generation {
                text: self.reply.to_string(),
                usage: None,
            })
        }
    }

    fn engine_replying(reply: &'static str) -> (ValidationEngine, Arc<FixedBackend>) {
        let backend = Arc::new(FixedBackend {
            reply,
            prompts: Mutex::new(Vec::new()),
        });
        let judge = Arc::new(SemanticJudge::new(backend.clone()));
        (ValidationEngine::with_judge(judge), backend)
    }

    fn fields(pairs: Vec<(&str, FieldValidator)>) -> FieldValidations {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[tokio::test]
    async fn exact_field_passes() {
        let verdict = ValidationEngine::new()
            .validate(
                &json!({"sentiment": "positive"}),
                None,
                &fields(vec![("sentiment", FieldValidator::exact("positive"))]),
            )
            .await;
        assert_eq!(verdict, Verdict::pass());
    }

    #[tokio::test]
    async fn one_of_failure_mentions_allowed_and_actual() {
        let verdict = ValidationEngine::new()
            .validate(
                &json!({"classification": "NAVIGATION"}),
                None,
                &fields(vec![(
                    "classification",
                    FieldValidator::one_of(["PROCEDURAL", "CAPABILITY"]),
                )]),
            )
            .await;
        assert!(!verdict.passed);
        let reason = verdict.reason.unwrap();
        assert!(reason.contains("[\"PROCEDURAL\",\"CAPABILITY\"]"));
        assert!(reason.contains("NAVIGATION"));
    }

    #[tokio::test]
    async fn list_matches_field() {
        let spec = [
            ("type".to_string(), ItemRule::from(FieldValidator::exact("merchant"))),
            ("value".to_string(), ItemRule::from(FieldValidator::substring("Tes"))),
        ]
        .into_iter()
        .collect();
        let verdict = ValidationEngine::new()
            .validate(
                &json!({"entities": [
                    {"type": "merchant", "value": "Tesco"},
                    {"type": "temporal", "value": "last month"}
                ]}),
                None,
                &fields(vec![("entities", FieldValidator::list_matches(vec![spec]))]),
            )
            .await;
        assert!(verdict.passed);
    }

    #[tokio::test]
    async fn collects_every_field_failure() {
        let verdict = ValidationEngine::new()
            .validate(
                &json!({"a": "x", "b": 3}),
                None,
                &fields(vec![
                    ("a", FieldValidator::exact("y")),
                    ("b", FieldValidator::substring("3")),
                    ("c", FieldValidator::exact(true)),
                ]),
            )
            .await;
        assert_eq!(
            verdict.reason.as_deref(),
            Some(
                "field 'a': expected \"y\", got \"x\"; \
                 field 'b': expected a string, got number; \
                 field 'c' not found in output"
            )
        );
    }

    #[tokio::test]
    async fn non_object_output_has_no_fields() {
        let verdict = ValidationEngine::new()
            .validate(
                &json!(["a"]),
                None,
                &fields(vec![("0", FieldValidator::exact("a"))]),
            )
            .await;
        assert_eq!(verdict, Verdict::fail("field '0' not found in output"));
    }

    #[tokio::test]
    async fn field_rules_take_priority_over_expected() {
        let expected = ExpectedOutput::Text("never compared".into());
        let verdict = ValidationEngine::new()
            .validate(
                &json!({"ok": true}),
                Some(&expected),
                &fields(vec![("ok", FieldValidator::exact(true))]),
            )
            .await;
        assert!(verdict.passed);
    }

    #[tokio::test]
    async fn equality_fallback_strips_raw_response() {
        let expected: ExpectedOutput = serde_json::from_value(json!({"valid": true, "justification": "ok"})).unwrap();
        let verdict = ValidationEngine::new()
            .validate(
                &json!({"valid": true, "justification": "ok", "rawResponse": "<xml/>"}),
                Some(&expected),
                &FieldValidations::new(),
            )
            .await;
        assert_eq!(verdict, Verdict::pass());
    }

    #[tokio::test]
    async fn equality_mismatch_shows_both_sides() {
        let verdict = ValidationEngine::new()
            .validate(&json!(false), Some(&ExpectedOutput::Boolean(true)), &FieldValidations::new())
            .await;
        assert_eq!(verdict, Verdict::fail("output mismatch: expected true, got false"));
    }

    #[test]
    fn equality_is_reflexive() {
        for value in [
            json!("text"),
            json!(["a", "b"]),
            json!({"valid": true, "rawResponse": "<x/>", "nested": {"_raw": 1, "k": [1, 2]}}),
            json!(null),
        ] {
            assert!(validate_equality(&value, &value).passed);
        }
    }

    #[tokio::test]
    async fn no_rules_fails() {
        let verdict = ValidationEngine::new()
            .validate(&json!("x"), None, &FieldValidations::new())
            .await;
        assert_eq!(verdict, Verdict::fail("no validation rules specified"));
    }

    #[tokio::test]
    async fn criteria_field_surfaces_rationale() {
        let (engine, backend) = engine_replying("EVALUATION: FAIL\nRATIONALE: missing analogy");
        let verdict = engine
            .validate(
                &json!({"explanation": "Recursion calls itself."}),
                None,
                &fields(vec![("explanation", FieldValidator::criteria(["uses an analogy"]))]),
            )
            .await;
        assert_eq!(verdict, Verdict::fail("field 'explanation': missing analogy"));
        let prompts = backend.prompts.lock().unwrap();
        assert!(prompts[0].contains("\"explanation\": \"Recursion calls itself.\""));
        assert!(prompts[0].contains("1. uses an analogy"));
    }

    #[tokio::test]
    async fn criteria_field_without_judge_fails() {
        let verdict = ValidationEngine::new()
            .validate(
                &json!({"explanation": "x"}),
                None,
                &fields(vec![("explanation", FieldValidator::criteria(["c"]))]),
            )
            .await;
        assert!(!verdict.passed);
    }

    #[tokio::test]
    async fn criteria_case_judges_whole_output() {
        let (engine, backend) = engine_replying("EVALUATION: PASS");
        let case = EvaluationCase::builder("recursion", json!("explain recursion"))
            .criteria(["uses an analogy"])
            .description("teaching tone")
            .build()
            .unwrap();
        let verdict = engine
            .validate_case(&case, &json!("It is like Russian dolls."))
            .await;
        assert!(verdict.passed);
        let prompts = backend.prompts.lock().unwrap();
        assert!(prompts[0].contains("OUTPUT:\nIt is like Russian dolls.\n"));
        assert!(prompts[0].contains("DESCRIPTION:\nteaching tone"));
    }

    #[tokio::test]
    async fn judge_fail_without_rationale_has_generic_reason() {
        let (engine, _) = engine_replying("EVALUATION: FAIL");
        let case = EvaluationCase::builder("c", json!(null))
            .criteria(["c"])
            .build()
            .unwrap();
        let verdict = engine.validate_case(&case, &json!("x")).await;
        assert_eq!(verdict, Verdict::fail("criteria not met"));
    }
}
