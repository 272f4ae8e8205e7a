use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::case::{CaseDefinition, EvaluationCase};
use crate::registry::{filter_cases, CaseRegistry};

/// Where a run gets its cases from. A malformed case fails the whole load.
#[async_trait]
pub trait CaseSource: Send + Sync {
    async fn load(&self) -> Result<Vec<EvaluationCase>>;
}

pub struct VecCaseSource {
    cases: Vec<EvaluationCase>,
}

impl VecCaseSource {
    pub fn new(cases: Vec<EvaluationCase>) -> Self {
        Self { cases }
    }
}

#[async_trait]
impl CaseSource for VecCaseSource {
    async fn load(&self) -> Result<Vec<EvaluationCase>> {
        Ok(self.cases.clone())
    }
}

#[async_trait]
impl CaseSource for CaseRegistry {
    async fn load(&self) -> Result<Vec<EvaluationCase>> {
        Ok(self.cases().to_vec())
    }
}

/// One case definition per line:
/// `{"name": "...", "input": ..., "expected_output": ... | "criteria": [...], "field_validations": {...}}`
pub struct JsonlCaseSource {
    path: PathBuf,
}

impl JsonlCaseSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CaseSource for JsonlCaseSource {
    async fn load(&self) -> Result<Vec<EvaluationCase>> {
        let content = read_to_string(&self.path).await?;
        let mut cases = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let def: CaseDefinition = serde_json::from_str(line)
                .with_context(|| format!("Invalid case on line {}", idx + 1))?;
            let case = EvaluationCase::try_from(def)
                .map_err(|e| anyhow!("Line {}: {}", idx + 1, e))?;
            cases.push(case);
        }
        ensure_unique(&cases)?;
        Ok(cases)
    }
}

#[derive(Debug, Deserialize)]
struct SuiteFile {
    #[serde(default)]
    cases: Vec<CaseDefinition>,
}

/// A YAML suite file with a top-level `cases:` list.
pub struct YamlSuiteSource {
    path: PathBuf,
}

impl YamlSuiteSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CaseSource for YamlSuiteSource {
    async fn load(&self) -> Result<Vec<EvaluationCase>> {
        let content = read_to_string(&self.path).await?;
        let suite: SuiteFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid suite file {:?}", self.path))?;
        let cases = suite
            .cases
            .into_iter()
            .enumerate()
            .map(|(idx, def)| {
                EvaluationCase::try_from(def).map_err(|e| anyhow!("Case #{}: {}", idx + 1, e))
            })
            .collect::<Result<Vec<_>>>()?;
        ensure_unique(&cases)?;
        Ok(cases)
    }
}

/// Picks `.yaml`/`.yml` suites or JSONL by extension.
pub fn from_path(path: impl AsRef<Path>) -> Box<dyn CaseSource> {
    let path = path.as_ref();
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => Box::new(YamlSuiteSource::new(path)),
        _ => Box::new(JsonlCaseSource::new(path)),
    }
}

/// Narrows another source to the given names and/or tags.
pub struct FilteredSource<S> {
    inner: S,
    names: Vec<String>,
    tags: Vec<String>,
}

impl<S: CaseSource> FilteredSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            names: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn names(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl<S: CaseSource> CaseSource for FilteredSource<S> {
    async fn load(&self) -> Result<Vec<EvaluationCase>> {
        let cases = self.inner.load().await?;
        let selected = filter_cases(&cases, &self.names, &self.tags);
        tracing::debug!(loaded = cases.len(), selected = selected.len(), "filtered cases");
        Ok(selected)
    }
}

#[async_trait]
impl CaseSource for Box<dyn CaseSource> {
    async fn load(&self) -> Result<Vec<EvaluationCase>> {
        self.as_ref().load().await
    }
}

fn ensure_unique(cases: &[EvaluationCase]) -> Result<()> {
    let mut registry = CaseRegistry::new();
    registry.register_all(cases.iter().cloned())?;
    Ok(())
}

async fn read_to_string(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::Directive;
    use crate::validator::FieldValidator;
    use serde_json::json;
    use std::io::Write;

    fn write_temp(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn loads_jsonl_cases() {
        let file = write_temp(
            ".jsonl",
            r#"{"name": "sum", "input": "2+2", "expected_output": "4"}

{"name": "tone", "input": "hi", "criteria": ["is friendly"], "tags": ["smoke"]}
{"name": "intent", "input": "book", "expectedOutput": {"intent": "BOOK"}, "fieldValidations": {"intent": {"type": "one_of", "values": ["BOOK", "RESERVE"]}}}
"#,
        );
        let cases = JsonlCaseSource::new(file.path()).load().await.unwrap();
        assert_eq!(cases.len(), 3);
        assert_eq!(cases[0].expected_output().unwrap().to_value(), json!("4"));
        assert!(matches!(cases[1].directive(), Directive::Criteria(_)));
        assert_eq!(
            cases[2].field_validations()["intent"],
            FieldValidator::one_of(["BOOK", "RESERVE"])
        );
    }

    #[tokio::test]
    async fn malformed_case_reports_line() {
        let file = write_temp(
            ".jsonl",
            "{\"name\": \"ok\", \"input\": 1, \"expected_output\": true}\n{\"name\": \"bad\", \"input\": 1}\n",
        );
        let err = JsonlCaseSource::new(file.path()).load().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Line 2: case 'bad' sets neither expected_output nor criteria"
        );
    }

    #[tokio::test]
    async fn duplicate_names_are_fatal() {
        let file = write_temp(
            ".jsonl",
            "{\"name\": \"a\", \"input\": 1, \"expected_output\": true}\n{\"name\": \"a\", \"input\": 2, \"expected_output\": true}\n",
        );
        let err = JsonlCaseSource::new(file.path()).load().await.unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[tokio::test]
    async fn loads_yaml_suite_and_filters() {
        let file = write_temp(
            ".yaml",
            r#"
cases:
  - name: capital
    input: "capital of France?"
    expected_output: Paris
    tags: [geo]
  - name: entities
    input: "spent at Tesco last month"
    expected_output:
      entities: []
    field_validations:
      entities:
        type: list_matches
        items:
          - type: merchant
            value: { type: substring, value: Tes }
    tags: [nlp]
"#,
        );
        let all = from_path(file.path()).load().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(matches!(
            all[1].field_validations()["entities"],
            FieldValidator::ListMatches { .. }
        ));

        let nlp = FilteredSource::new(from_path(file.path()))
            .tags(["nlp"])
            .load()
            .await
            .unwrap();
        assert_eq!(nlp.len(), 1);
        assert_eq!(nlp[0].name(), "entities");
    }

    #[tokio::test]
    async fn missing_file_has_context() {
        let err = JsonlCaseSource::new("/definitely/not/here.jsonl")
            .load()
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Failed to read"));
    }
}
