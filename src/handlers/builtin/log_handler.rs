use anyhow::Result;
use async_trait::async_trait;

use crate::handlers::interpolate::interpolate_values;
use crate::handlers::{StepHandler, StepInput, StepOutput};

pub struct LogHandler;

#[async_trait]
impl StepHandler for LogHandler {
    fn handler_type(&self) -> &str {
        "log"
    }

    fn description(&self) -> &str {
        "Write a message to the process log"
    }

    async fn run(&self, input: StepInput, output: &mut StepOutput) -> Result<()> {
        let message = input
            .config
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        let level = input
            .config
            .get("level")
            .and_then(|v| v.as_str())
            .unwrap_or("info");

        let rendered = interpolate_values(message, &input.values);

        match level {
            "debug" => tracing::debug!(process = %input.process_name, step = %input.step_name, "{}", rendered),
            "warn" => tracing::warn!(process = %input.process_name, step = %input.step_name, "{}", rendered),
            "error" => tracing::error!(process = %input.process_name, step = %input.step_name, "{}", rendered),
            _ => tracing::info!(process = %input.process_name, step = %input.step_name, "{}", rendered),
        }

        output.set_value("log_message", serde_json::Value::String(rendered));
        Ok(())
    }
}
