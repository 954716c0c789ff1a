use anyhow::Result;
use async_trait::async_trait;

use crate::handlers::interpolate::interpolate_values;
use crate::handlers::{StepHandler, StepInput, StepOutput};

/// Merge the static `values` object from config into the run's values.
/// String values are interpolated against the incoming values.
pub struct SetValuesHandler;

#[async_trait]
impl StepHandler for SetValuesHandler {
    fn handler_type(&self) -> &str {
        "set_values"
    }

    fn description(&self) -> &str {
        "Set static (interpolated) values"
    }

    async fn run(&self, input: StepInput, output: &mut StepOutput) -> Result<()> {
        let values = input
            .config
            .get("values")
            .and_then(|v| v.as_object())
            .ok_or_else(|| anyhow::anyhow!("set_values requires a 'values' object"))?;

        for (name, value) in values {
            let value = match value {
                serde_json::Value::String(s) => {
                    serde_json::Value::String(interpolate_values(s, &input.values))
                }
                other => other.clone(),
            };
            output.set_value(name.clone(), value);
        }
        Ok(())
    }
}
