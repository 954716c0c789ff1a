pub mod loader;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::handlers::StepHandler;

pub use loader::{load_catalog, load_catalog_from_str};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Backend,
    Frontend,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::Backend => write!(f, "backend"),
            StepKind::Frontend => write!(f, "frontend"),
        }
    }
}

/// A field a backend step reads from the accumulated values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInput {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl FieldInput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// The record list a backend step operates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordInput {
    pub table: String,
    #[serde(default)]
    pub required: bool,
}

/// A step executed by registered handler code.
#[derive(Clone)]
pub struct BackendStep {
    pub name: String,
    pub label: Option<String>,
    pub handler: Arc<dyn StepHandler>,
    pub config: serde_json::Value,
    pub record_input: Option<RecordInput>,
    pub field_inputs: Vec<FieldInput>,
}

impl BackendStep {
    pub fn new(name: impl Into<String>, handler: Arc<dyn StepHandler>) -> Self {
        Self {
            name: name.into(),
            label: None,
            handler,
            config: serde_json::Value::Null,
            record_input: None,
            field_inputs: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_records(mut self, table: impl Into<String>, required: bool) -> Self {
        self.record_input = Some(RecordInput {
            table: table.into(),
            required,
        });
        self
    }

    pub fn with_field(mut self, field: FieldInput) -> Self {
        self.field_inputs.push(field);
        self
    }
}

impl std::fmt::Debug for BackendStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendStep")
            .field("name", &self.name)
            .field("handler", &self.handler.handler_type())
            .field("config", &self.config)
            .field("record_input", &self.record_input)
            .field("field_inputs", &self.field_inputs)
            .finish()
    }
}

/// A point where a UI interacts with a user. Never executed by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontendStep {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Fields the UI is expected to collect.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
}

impl FrontendStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            fields: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum StepDefinition {
    Backend(BackendStep),
    Frontend(FrontendStep),
}

impl StepDefinition {
    pub fn name(&self) -> &str {
        match self {
            StepDefinition::Backend(s) => &s.name,
            StepDefinition::Frontend(s) => &s.name,
        }
    }

    pub fn kind(&self) -> StepKind {
        match self {
            StepDefinition::Backend(_) => StepKind::Backend,
            StepDefinition::Frontend(_) => StepKind::Frontend,
        }
    }
}

/// A named, ordered sequence of steps plus an optional cancel step.
#[derive(Debug, Clone)]
pub struct ProcessDefinition {
    pub name: String,
    pub label: Option<String>,
    steps: Vec<StepDefinition>,
    cancel_step: Option<BackendStep>,
}

impl ProcessDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            steps: Vec::new(),
            cancel_step: None,
        }
    }

    pub fn backend(mut self, step: BackendStep) -> Self {
        self.steps.push(StepDefinition::Backend(step));
        self
    }

    pub fn frontend(mut self, step: FrontendStep) -> Self {
        self.steps.push(StepDefinition::Frontend(step));
        self
    }

    pub fn cancel(mut self, step: BackendStep) -> Self {
        self.cancel_step = Some(step);
        self
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    /// Declared step order, used to prime new runs.
    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name() == name)
    }

    pub fn cancel_step(&self) -> Option<&BackendStep> {
        self.cancel_step.as_ref()
    }

    /// Structural problems with the definition. Empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("Process name must not be empty".to_string());
        }
        if self.steps.is_empty() {
            errors.push(format!("Process '{}' has no steps", self.name));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name()) {
                errors.push(format!(
                    "Process '{}' declares step '{}' more than once",
                    self.name,
                    step.name()
                ));
            }
        }

        if let Some(cancel) = &self.cancel_step
            && seen.contains(cancel.name.as_str())
        {
            errors.push(format!(
                "Process '{}' cancel step '{}' clashes with a regular step",
                self.name, cancel.name
            ));
        }

        errors
    }
}

/// Registry of process definitions.
#[derive(Debug, Default)]
pub struct ProcessCatalog {
    processes: HashMap<String, Arc<ProcessDefinition>>,
}

impl ProcessCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a process, rejecting definitions that fail [`ProcessDefinition::validate`].
    pub fn register(&mut self, process: ProcessDefinition) -> Result<()> {
        let errors = process.validate();
        if !errors.is_empty() {
            bail!("{}", errors.join("; "));
        }
        self.processes
            .insert(process.name.clone(), Arc::new(process));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<ProcessDefinition>> {
        self.processes.get(name).cloned()
    }

    /// Process names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.processes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}
