use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::handlers::{StepHandler, StepInput, StepOutput};

/// Replace the steps after this one with config `steps`.
///
/// Steps up to and including the current one are kept so the run can
/// continue from here.
pub struct SetPlanHandler;

#[async_trait]
impl StepHandler for SetPlanHandler {
    fn handler_type(&self) -> &str {
        "set_plan"
    }

    fn description(&self) -> &str {
        "Rewrite the remaining step plan"
    }

    async fn run(&self, input: StepInput, output: &mut StepOutput) -> Result<()> {
        let steps = input
            .config
            .get("steps")
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow::anyhow!("set_plan requires a 'steps' array"))?;

        let mut next: Vec<String> = Vec::with_capacity(steps.len());
        for step in steps {
            match step.as_str() {
                Some(s) => next.push(s.to_string()),
                None => bail!("set_plan 'steps' must contain step names"),
            }
        }

        let Some(pos) = input.step_list.iter().position(|s| s == &input.step_name) else {
            bail!("step '{}' is not in the current plan", input.step_name);
        };

        let mut plan = input.step_list[..=pos].to_vec();
        for step in next {
            if plan.contains(&step) {
                bail!("set_plan step '{}' is already in the plan", step);
            }
            plan.push(step);
        }
        output.step_list = plan;
        Ok(())
    }
}
