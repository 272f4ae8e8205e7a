//! Named collection of cases, plus the process-wide instance populated at startup.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::case::EvaluationCase;
use crate::error::CaseDefinitionError;

#[derive(Debug, Clone, Default)]
pub struct CaseRegistry {
    cases: Vec<EvaluationCase>,
    index: HashMap<String, usize>,
}

impl CaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, case: EvaluationCase) -> Result<(), CaseDefinitionError> {
        if self.index.contains_key(case.name()) {
            return Err(CaseDefinitionError::DuplicateName(case.name().to_string()));
        }
        self.index.insert(case.name().to_string(), self.cases.len());
        self.cases.push(case);
        Ok(())
    }

    pub fn register_all(
        &mut self,
        cases: impl IntoIterator<Item = EvaluationCase>,
    ) -> Result<(), CaseDefinitionError> {
        cases.into_iter().try_for_each(|case| self.register(case))
    }

    pub fn get(&self, name: &str) -> Option<&EvaluationCase> {
        self.index.get(name).map(|&i| &self.cases[i])
    }

    /// All cases in registration order.
    pub fn cases(&self) -> &[EvaluationCase] {
        &self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Cases whose name is in `names` (if non-empty) and that carry at least
    /// one of `tags` (if non-empty). Registration order is kept.
    pub fn filter(&self, names: &[String], tags: &[String]) -> Vec<EvaluationCase> {
        filter_cases(&self.cases, names, tags)
    }
}

pub(crate) fn filter_cases(
    cases: &[EvaluationCase],
    names: &[String],
    tags: &[String],
) -> Vec<EvaluationCase> {
    cases
        .iter()
        .filter(|c| names.is_empty() || names.iter().any(|n| n == c.name()))
        .filter(|c| tags.is_empty() || tags.iter().any(|t| c.has_tag(t)))
        .cloned()
        .collect()
}

static GLOBAL: OnceLock<CaseRegistry> = OnceLock::new();

/// Build the process-wide registry once, before any run starts.
///
/// Later calls return the registry built by the first successful call
/// without running `f`.
pub fn bootstrap<F>(f: F) -> Result<&'static CaseRegistry, CaseDefinitionError>
where
    F: FnOnce(&mut CaseRegistry) -> Result<(), CaseDefinitionError>,
{
    if let Some(registry) = GLOBAL.get() {
        return Ok(registry);
    }
    let mut registry = CaseRegistry::new();
    f(&mut registry)?;
    tracing::debug!(cases = registry.len(), "case registry bootstrapped");
    Ok(GLOBAL.get_or_init(|| registry))
}

/// The process-wide registry, if [`bootstrap`] has run.
pub fn global() -> Option<&'static CaseRegistry> {
    GLOBAL.get()
}
