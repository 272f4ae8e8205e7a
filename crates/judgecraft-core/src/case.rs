use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CaseDefinitionError;
use crate::validator::FieldValidator;
pub use judgecraft_types::ValidationMethod;

/// Field name -> rule, checked in name order.
pub type FieldValidations = BTreeMap<String, FieldValidator>;

/// The literal outcome a case expects from the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpectedOutput {
    Boolean(bool),
    Text(String),
    Choices(Vec<String>),
    Structured(Map<String, Value>),
}

impl ExpectedOutput {
    pub fn to_value(&self) -> Value {
        match self {
            ExpectedOutput::Boolean(b) => Value::Bool(*b),
            ExpectedOutput::Text(s) => Value::String(s.clone()),
            ExpectedOutput::Choices(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
            ExpectedOutput::Structured(map) => Value::Object(map.clone()),
        }
    }
}

impl From<bool> for ExpectedOutput {
    fn from(b: bool) -> Self {
        ExpectedOutput::Boolean(b)
    }
}

impl From<&str> for ExpectedOutput {
    fn from(s: &str) -> Self {
        ExpectedOutput::Text(s.to_string())
    }
}

impl From<String> for ExpectedOutput {
    fn from(s: String) -> Self {
        ExpectedOutput::Text(s)
    }
}

impl From<Vec<String>> for ExpectedOutput {
    fn from(items: Vec<String>) -> Self {
        ExpectedOutput::Choices(items)
    }
}

impl From<Map<String, Value>> for ExpectedOutput {
    fn from(map: Map<String, Value>) -> Self {
        ExpectedOutput::Structured(map)
    }
}

/// Exactly one of these decides what "correct" means for a case.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Expected(ExpectedOutput),
    Criteria(Vec<String>),
}

/// A declarative test unit. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationCase {
    name: String,
    input: Value,
    directive: Directive,
    field_validations: FieldValidations,
    description: Option<String>,
    tags: Vec<String>,
}

impl EvaluationCase {
    pub fn builder(name: impl Into<String>, input: Value) -> CaseBuilder {
        CaseBuilder {
            name: name.into(),
            input,
            expected_output: None,
            criteria: None,
            field_validations: FieldValidations::new(),
            description: None,
            tags: Vec::new(),
        }
    }

    /// Shorthand for a case judged by structural equality.
    pub fn expecting(
        name: impl Into<String>,
        input: Value,
        expected: impl Into<ExpectedOutput>,
    ) -> Result<Self, CaseDefinitionError> {
        Self::builder(name, input).expected(expected).build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn directive(&self) -> &Directive {
        &self.directive
    }

    pub fn expected_output(&self) -> Option<&ExpectedOutput> {
        match &self.directive {
            Directive::Expected(expected) => Some(expected),
            Directive::Criteria(_) => None,
        }
    }

    pub fn criteria(&self) -> Option<&[String]> {
        match &self.directive {
            Directive::Criteria(criteria) => Some(criteria),
            Directive::Expected(_) => None,
        }
    }

    pub fn field_validations(&self) -> &FieldValidations {
        &self.field_validations
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn validation_method(&self) -> ValidationMethod {
        match &self.directive {
            Directive::Criteria(_) => ValidationMethod::Criteria,
            Directive::Expected(ExpectedOutput::Boolean(_)) => ValidationMethod::Boolean,
            Directive::Expected(ExpectedOutput::Choices(_)) => ValidationMethod::MultiChoice,
            Directive::Expected(_) => ValidationMethod::String,
        }
    }
}

pub struct CaseBuilder {
    name: String,
    input: Value,
    expected_output: Option<ExpectedOutput>,
    criteria: Option<Vec<String>>,
    field_validations: FieldValidations,
    description: Option<String>,
    tags: Vec<String>,
}

impl CaseBuilder {
    pub fn expected(mut self, expected: impl Into<ExpectedOutput>) -> Self {
        self.expected_output = Some(expected.into());
        self
    }

    pub fn criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.criteria = Some(criteria.into_iter().map(Into::into).collect());
        self
    }

    pub fn field(mut self, name: impl Into<String>, validator: FieldValidator) -> Self {
        self.field_validations.insert(name.into(), validator);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn build(self) -> Result<EvaluationCase, CaseDefinitionError> {
        if self.name.trim().is_empty() {
            return Err(CaseDefinitionError::EmptyName);
        }
        let directive = match (self.expected_output, self.criteria) {
            (Some(_), Some(_)) => return Err(CaseDefinitionError::ConflictingDirective(self.name)),
            (None, None) => return Err(CaseDefinitionError::MissingDirective(self.name)),
            (None, Some(criteria)) if criteria.is_empty() => {
                return Err(CaseDefinitionError::EmptyCriteria(self.name))
            }
            (None, Some(criteria)) => Directive::Criteria(criteria),
            (Some(expected), None) => Directive::Expected(expected),
        };
        Ok(EvaluationCase {
            name: self.name,
            input: self.input,
            directive,
            field_validations: self.field_validations,
            description: self.description,
            tags: self.tags,
        })
    }
}

/// Serialized form of a case, as found in JSONL and YAML suite files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseDefinition {
    pub name: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default, alias = "expectedOutput", skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<ExpectedOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<Vec<String>>,
    #[serde(default, alias = "fieldValidations", skip_serializing_if = "BTreeMap::is_empty")]
    pub field_validations: FieldValidations,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl TryFrom<CaseDefinition> for EvaluationCase {
    type Error = CaseDefinitionError;

    fn try_from(def: CaseDefinition) -> Result<Self, Self::Error> {
        CaseBuilder {
            name: def.name,
            input: def.input,
            expected_output: def.expected_output,
            criteria: def.criteria,
            field_validations: def.field_validations,
            description: def.description,
            tags: def.tags,
        }
        .build()
    }
}

impl From<&EvaluationCase> for CaseDefinition {
    fn from(case: &EvaluationCase) -> Self {
        CaseDefinition {
            name: case.name.clone(),
            input: case.input.clone(),
            expected_output: case.expected_output().cloned(),
            criteria: case.criteria().map(<[String]>::to_vec),
            field_validations: case.field_validations.clone(),
            description: case.description.clone(),
            tags: case.tags.clone(),
        }
    }
}
