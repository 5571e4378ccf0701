use crate::app::context::Instance;
use crate::app::signal::Outcome;
use crate::app::unit::{TestContext, TestDefinition, TestUnit};
use derivative::*;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DefinitionError {
    #[error("Sequence '{sequence}' declares test id '{test_id}' more than once")]
    DuplicateTest { sequence: String, test_id: String },
    #[error("Sequence '{0}' is registered more than once")]
    DuplicateSequence(String),
    #[error("Sequence '{0}' needs an id prefix")]
    MissingPrefix(String),
    #[error("Incomplete test definition: {0}")]
    Incomplete(String),
}

impl From<String> for DefinitionError {
    fn from(message: String) -> Self {
        DefinitionError::Incomplete(message)
    }
}

pub type PreconditionCheck = Arc<dyn Fn(&Instance) -> bool + Send + Sync>;

#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct Precondition {
    pub message: String,
    #[derivative(Debug = "ignore")]
    check: PreconditionCheck,
}

/// An ordered batch of tests sharing preconditions and metadata.
#[derive(Debug, Clone)]
pub struct SequenceDefinition {
    pub name: String,
    pub title: String,
    pub description: String,
    pub details: String,
    pub id_prefix: String,
    pub requires: Vec<String>,
    pub defines: Vec<String>,
    pub optional: bool,
    pub requires_confirmation: bool,
    pub suspendable: bool,
    precondition: Option<Precondition>,
    tests: Vec<TestUnit>,
}

pub struct SequenceBuilder {
    sequence: SequenceDefinition,
}

impl SequenceDefinition {
    pub fn builder(name: impl Into<String>) -> SequenceBuilder {
        SequenceBuilder::new(name)
    }

    pub fn tests(&self) -> &[TestUnit] {
        &self.tests
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Returns why the sequence cannot run against `instance`, if it cannot.
    pub fn unmet_precondition(&self, instance: &Instance) -> Option<String> {
        let missing = instance.missing(&self.requires);
        if !missing.is_empty() {
            return Some(format!(
                "Sequence requires values that have not been provided: {}",
                missing.join(", ")
            ));
        }
        match &self.precondition {
            Some(precondition) if !(precondition.check)(instance) => {
                Some(precondition.message.clone())
            }
            _ => None,
        }
    }
}

impl SequenceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            sequence: SequenceDefinition {
                title: name.clone(),
                name,
                description: String::new(),
                details: String::new(),
                id_prefix: String::new(),
                requires: Vec::new(),
                defines: Vec::new(),
                optional: false,
                requires_confirmation: false,
                suspendable: false,
                precondition: None,
                tests: Vec::new(),
            },
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.sequence.title = title.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.sequence.description = description.into();
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.sequence.details = details.into();
        self
    }

    pub fn id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sequence.id_prefix = prefix.into();
        self
    }

    pub fn requires(mut self, fields: &[&str]) -> Self {
        self.sequence
            .requires
            .extend(fields.iter().map(|field| (*field).to_owned()));
        self
    }

    pub fn defines(mut self, fields: &[&str]) -> Self {
        self.sequence
            .defines
            .extend(fields.iter().map(|field| (*field).to_owned()));
        self
    }

    pub fn optional(mut self) -> Self {
        self.sequence.optional = true;
        self
    }

    pub fn requires_confirmation(mut self) -> Self {
        self.sequence.requires_confirmation = true;
        self
    }

    pub fn suspendable(mut self) -> Self {
        self.sequence.suspendable = true;
        self
    }

    pub fn precondition<F>(mut self, message: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Instance) -> bool + Send + Sync + 'static,
    {
        self.sequence.precondition = Some(Precondition {
            message: message.into(),
            check: Arc::new(check),
        });
        self
    }

    /// Appends a test. Its position in the sequence is the order of calls.
    pub fn test<F>(mut self, mut definition: TestDefinition, body: F) -> Self
    where
        F: Fn(&mut TestContext<'_>) -> Outcome + Send + Sync + 'static,
    {
        definition.index = self.sequence.tests.len();
        let test_id = format!("{}-{}", self.sequence.id_prefix, definition.id);
        self.sequence
            .tests
            .push(TestUnit::new(definition, test_id, Arc::new(body)));
        self
    }

    pub fn build(mut self) -> Result<SequenceDefinition, DefinitionError> {
        if self.sequence.id_prefix.is_empty() {
            return Err(DefinitionError::MissingPrefix(self.sequence.name));
        }
        let prefix = self.sequence.id_prefix.clone();
        let mut seen = HashSet::new();
        for unit in &mut self.sequence.tests {
            unit.test_id = format!("{}-{}", prefix, unit.definition.id);
            if !seen.insert(unit.test_id.clone()) {
                return Err(DefinitionError::DuplicateTest {
                    sequence: self.sequence.name.clone(),
                    test_id: unit.test_id.clone(),
                });
            }
        }
        Ok(self.sequence)
    }
}

/// All known sequences, in registration order.
#[derive(Debug, Default)]
pub struct Registry {
    sequences: Vec<Arc<SequenceDefinition>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sequence: SequenceDefinition) -> Result<(), DefinitionError> {
        if self.get(&sequence.name).is_some() {
            return Err(DefinitionError::DuplicateSequence(sequence.name));
        }
        debug!(
            "Registered sequence '{}' with {} tests",
            sequence.name,
            sequence.len()
        );
        self.sequences.push(Arc::new(sequence));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<SequenceDefinition>> {
        self.sequences
            .iter()
            .find(|sequence| sequence.name == name)
            .cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SequenceDefinition>> {
        self.sequences.iter()
    }

    #[inline]
    pub fn amount(&self) -> usize {
        self.sequences.len()
    }
}
