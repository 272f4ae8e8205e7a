use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A rule describing the acceptable value of one output field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum FieldValidator {
    Exact {
        value: Value,
        #[serde(default = "default_case_sensitive")]
        case_sensitive: bool,
    },
    OneOf {
        values: Vec<Value>,
        #[serde(default = "default_case_sensitive")]
        case_sensitive: bool,
    },
    /// The actual list holds exactly this set of values.
    AllOf { values: Vec<Value> },
    /// The actual list holds at least these values.
    Contains { values: Vec<Value> },
    Substring {
        value: String,
        #[serde(default = "default_case_sensitive")]
        case_sensitive: bool,
    },
    /// Judged by the semantic judge.
    Criteria { criteria: Vec<String> },
    /// Every item spec must be satisfied by at least one list element.
    ListMatches { items: Vec<ItemSpec> },
}

fn default_case_sensitive() -> bool {
    true
}

/// Sub-field rules an element of a list must satisfy together.
pub type ItemSpec = BTreeMap<String, ItemRule>;

/// A nested rule inside an [`ItemSpec`]; a bare literal means `Exact`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemRule {
    Rule(FieldValidator),
    Literal(Value),
}

impl ItemRule {
    pub fn to_validator(&self) -> FieldValidator {
        match self {
            ItemRule::Rule(rule) => rule.clone(),
            ItemRule::Literal(value) => FieldValidator::exact(value.clone()),
        }
    }
}

impl From<FieldValidator> for ItemRule {
    fn from(rule: FieldValidator) -> Self {
        ItemRule::Rule(rule)
    }
}

impl FieldValidator {
    pub fn exact(value: impl Into<Value>) -> Self {
        FieldValidator::Exact {
            value: value.into(),
            case_sensitive: true,
        }
    }

    pub fn exact_ignore_case(value: impl Into<Value>) -> Self {
        FieldValidator::Exact {
            value: value.into(),
            case_sensitive: false,
        }
    }

    pub fn one_of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        FieldValidator::OneOf {
            values: values.into_iter().map(Into::into).collect(),
            case_sensitive: true,
        }
    }

    pub fn all_of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        FieldValidator::AllOf {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        FieldValidator::Contains {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn substring(value: impl Into<String>) -> Self {
        FieldValidator::Substring {
            value: value.into(),
            case_sensitive: true,
        }
    }

    pub fn substring_ignore_case(value: impl Into<String>) -> Self {
        FieldValidator::Substring {
            value: value.into(),
            case_sensitive: false,
        }
    }

    pub fn criteria<I, S>(criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldValidator::Criteria {
            criteria: criteria.into_iter().map(Into::into).collect(),
        }
    }

    pub fn list_matches(items: Vec<ItemSpec>) -> Self {
        FieldValidator::ListMatches { items }
    }

    /// Whether checking this rule needs the semantic judge.
    pub fn needs_judge(&self) -> bool {
        match self {
            FieldValidator::Criteria { .. } => true,
            FieldValidator::ListMatches { items } => items
                .iter()
                .flat_map(|spec| spec.values())
                .any(|rule| rule.to_validator().needs_judge()),
            _ => false,
        }
    }

    /// Check `actual` against every rule that does not need the judge.
    ///
    /// Returns `Err` with a failure message naming `field`. `Criteria` is not
    /// decidable here and always fails.
    pub fn check(&self, field: &str, actual: &Value) -> Result<(), String> {
        match self {
            FieldValidator::Exact {
                value,
                case_sensitive,
            } => {
                if values_equal(value, actual, *case_sensitive) {
                    Ok(())
                } else {
                    Err(format!("field '{field}': expected {value}, got {actual}"))
                }
            }
            FieldValidator::OneOf {
                values,
                case_sensitive,
            } => {
                if values.iter().any(|v| values_equal(v, actual, *case_sensitive)) {
                    Ok(())
                } else {
                    Err(format!(
                        "field '{field}': expected one of {}, got {actual}",
                        Value::Array(values.clone())
                    ))
                }
            }
            FieldValidator::AllOf { values } => {
                let items = expect_list(field, actual)?;
                let missing = missing_from(values, items);
                let unexpected = missing_from(items, values);
                if missing.is_empty() && unexpected.is_empty() {
                    Ok(())
                } else {
                    Err(format!(
                        "field '{field}': expected exactly {}, got {actual}",
                        Value::Array(values.clone())
                    ))
                }
            }
            FieldValidator::Contains { values } => {
                let items = expect_list(field, actual)?;
                let missing = missing_from(values, items);
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(format!(
                        "field '{field}': missing {} in {actual}",
                        Value::Array(missing)
                    ))
                }
            }
            FieldValidator::Substring {
                value,
                case_sensitive,
            } => {
                let Value::String(text) = actual else {
                    return Err(format!(
                        "field '{field}': expected a string, got {}",
                        type_name(actual)
                    ));
                };
                let found = if *case_sensitive {
                    text.contains(value.as_str())
                } else {
                    text.to_lowercase().contains(&value.to_lowercase())
                };
                if found {
                    Ok(())
                } else {
                    Err(format!(
                        "field '{field}': {actual} does not contain {}",
                        Value::String(value.clone())
                    ))
                }
            }
            FieldValidator::Criteria { .. } => Err(format!(
                "field '{field}': criteria cannot be checked inside a list item"
            )),
            FieldValidator::ListMatches { items } => {
                let elements = expect_list(field, actual)?;
                let failures: Vec<String> = items
                    .iter()
                    .filter(|spec| !elements.iter().any(|element| item_matches(spec, element)))
                    .map(|spec| format!("field '{field}': no item matching spec {}", spec_preview(spec)))
                    .collect();
                if failures.is_empty() {
                    Ok(())
                } else {
                    Err(failures.join("; "))
                }
            }
        }
    }
}

/// An element matches a spec when it carries every sub-field and each
/// sub-field passes its rule.
pub fn item_matches(spec: &ItemSpec, element: &Value) -> bool {
    spec.iter().all(|(sub_field, rule)| {
        element
            .get(sub_field)
            .is_some_and(|value| rule.to_validator().check(sub_field, value).is_ok())
    })
}

fn spec_preview(spec: &ItemSpec) -> String {
    serde_json::to_string(spec).unwrap_or_else(|_| format!("{spec:?}"))
}

fn values_equal(expected: &Value, actual: &Value, case_sensitive: bool) -> bool {
    match (expected, actual) {
        (Value::String(e), Value::String(a)) if !case_sensitive => e.to_lowercase() == a.to_lowercase(),
        _ => expected == actual,
    }
}

fn expect_list<'a>(field: &str, actual: &'a Value) -> Result<&'a [Value], String> {
    match actual {
        Value::Array(items) => Ok(items),
        other => Err(format!(
            "field '{field}': expected a list, got {}",
            type_name(other)
        )),
    }
}

/// Values in `wanted` that do not occur in `have`.
fn missing_from(wanted: &[Value], have: &[Value]) -> Vec<Value> {
    wanted.iter().filter(|v| !have.contains(v)).cloned().collect()
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
