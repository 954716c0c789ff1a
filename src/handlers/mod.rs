pub mod builtin;
pub mod interpolate;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::data::Record;
use crate::engine::types::Values;

/// Snapshot handed to a backend step's handler.
#[derive(Debug, Clone)]
pub struct StepInput {
    pub process_name: String,
    pub run_id: String,
    pub step_name: String,
    /// Per-step configuration from the process definition.
    pub config: serde_json::Value,
    pub values: Values,
    pub records: Vec<Record>,
    pub step_list: Vec<String>,
}

impl StepInput {
    pub fn value(&self, name: &str) -> Option<&serde_json::Value> {
        self.values.get(name)
    }
}

/// What a handler leaves behind. Seeded from the input before the handler runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    pub values: Values,
    pub records: Vec<Record>,
    /// Replacing this rewrites the plan for subsequent steps.
    pub step_list: Vec<String>,
}

impl StepOutput {
    pub fn seeded(input: &StepInput) -> Self {
        Self {
            values: input.values.clone(),
            records: input.records.clone(),
            step_list: input.step_list.clone(),
        }
    }

    pub fn set_value(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.values.insert(name.into(), value);
    }
}

/// Code behind a backend step.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Name the catalog refers to (e.g. "log", "set_values").
    fn handler_type(&self) -> &str;

    fn description(&self) -> &str;

    async fn run(&self, input: StepInput, output: &mut StepOutput) -> Result<()>;
}

type HandlerFn = dyn Fn(&StepInput, &mut StepOutput) -> Result<()> + Send + Sync;

/// Handler wrapping a plain closure.
pub struct FnHandler {
    name: String,
    func: Box<HandlerFn>,
}

#[async_trait]
impl StepHandler for FnHandler {
    fn handler_type(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Closure handler"
    }

    async fn run(&self, input: StepInput, output: &mut StepOutput) -> Result<()> {
        (self.func)(&input, output)
    }
}

/// Build a handler from a closure.
pub fn from_fn<F>(name: impl Into<String>, func: F) -> Arc<dyn StepHandler>
where
    F: Fn(&StepInput, &mut StepOutput) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        func: Box::new(func),
    })
}

/// Registry of handlers available to process definitions.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Create a registry with all built-in handlers registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn StepHandler>) {
        self.handlers
            .insert(handler.handler_type().to_string(), handler);
    }

    pub fn get(&self, handler_type: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(handler_type).cloned()
    }

    /// List all registered handlers with descriptions.
    pub fn list(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<(&str, &str)> = self
            .handlers
            .values()
            .map(|h| (h.handler_type(), h.description()))
            .collect();
        entries.sort_by_key(|(name, _)| *name);
        entries
    }
}
