use anyhow::Result;
use async_trait::async_trait;

use crate::handlers::{StepHandler, StepInput, StepOutput};

pub struct CountRecordsHandler;

#[async_trait]
impl StepHandler for CountRecordsHandler {
    fn handler_type(&self) -> &str {
        "count_records"
    }

    fn description(&self) -> &str {
        "Store the number of records in a value"
    }

    async fn run(&self, input: StepInput, output: &mut StepOutput) -> Result<()> {
        let key = input
            .config
            .get("output_key")
            .and_then(|v| v.as_str())
            .unwrap_or("record_count");

        output.set_value(key, serde_json::json!(input.records.len()));
        Ok(())
    }
}

/// Set the fields in config `set` on every record.
pub struct UpdateRecordsHandler;

#[async_trait]
impl StepHandler for UpdateRecordsHandler {
    fn handler_type(&self) -> &str {
        "update_records"
    }

    fn description(&self) -> &str {
        "Set fields on every record"
    }

    async fn run(&self, input: StepInput, output: &mut StepOutput) -> Result<()> {
        let set = input
            .config
            .get("set")
            .and_then(|v| v.as_object())
            .ok_or_else(|| anyhow::anyhow!("update_records requires a 'set' object"))?;

        for record in output.records.iter_mut() {
            for (field, value) in set {
                record.insert(field.clone(), value.clone());
            }
        }

        output.set_value("records_updated", serde_json::json!(output.records.len()));
        Ok(())
    }
}
