use std::path::Path;

use anyhow::{Context as _, Result, bail};
use serde::Deserialize;

use crate::catalog::{
    BackendStep, FieldInput, FrontendStep, ProcessCatalog, ProcessDefinition, RecordInput,
};
use crate::handlers::HandlerRegistry;

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    processes: Vec<ProcessSpec>,
}

#[derive(Debug, Deserialize)]
struct ProcessSpec {
    name: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    steps: Vec<StepSpec>,
    #[serde(default)]
    cancel: Option<BackendSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum StepSpec {
    Backend(BackendSpec),
    Frontend(FrontendStep),
}

#[derive(Debug, Deserialize)]
struct BackendSpec {
    name: String,
    #[serde(default)]
    label: Option<String>,
    handler: String,
    #[serde(default)]
    config: serde_json::Value,
    #[serde(default)]
    records: Option<RecordInput>,
    #[serde(default)]
    fields: Vec<FieldInput>,
}

impl BackendSpec {
    fn resolve(self, process: &str, registry: &HandlerRegistry) -> Result<BackendStep> {
        let handler = registry.get(&self.handler).ok_or_else(|| {
            anyhow::anyhow!(
                "Step '{}' of process '{}' uses unknown handler '{}'",
                self.name,
                process,
                self.handler
            )
        })?;

        Ok(BackendStep {
            name: self.name,
            label: self.label,
            handler,
            config: self.config,
            record_input: self.records,
            field_inputs: self.fields,
        })
    }
}

/// Load a process catalog from a YAML file, resolving handlers against `registry`.
pub fn load_catalog(path: impl AsRef<Path>, registry: &HandlerRegistry) -> Result<ProcessCatalog> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
    load_catalog_from_str(&contents, registry)
        .with_context(|| format!("Failed to load catalog: {}", path.display()))
}

/// Load a process catalog from YAML source.
pub fn load_catalog_from_str(source: &str, registry: &HandlerRegistry) -> Result<ProcessCatalog> {
    let file: CatalogFile = serde_yml::from_str(source).context("Invalid catalog YAML")?;

    let mut catalog = ProcessCatalog::new();
    for spec in file.processes {
        if catalog.get(&spec.name).is_some() {
            bail!("Process '{}' is defined more than once", spec.name);
        }

        let mut process = ProcessDefinition::new(&spec.name);
        process.label = spec.label;

        for step in spec.steps {
            process = match step {
                StepSpec::Backend(b) => process.backend(b.resolve(&spec.name, registry)?),
                StepSpec::Frontend(f) => process.frontend(f),
            };
        }

        if let Some(cancel) = spec.cancel {
            process = process.cancel(cancel.resolve(&spec.name, registry)?);
        }

        catalog.register(process)?;
    }

    Ok(catalog)
}
