//! Assessment of a backend step's declared inputs against accumulated state.
//!
//! Expected "need more input" conditions are returned as [`InputOutcome`]
//! values rather than errors so the executor can branch on them.

use crate::catalog::{BackendStep, FieldInput, RecordInput};
use crate::engine::types::{ProcessState, Values};

#[derive(Debug, Clone, PartialEq)]
pub enum InputOutcome<T> {
    /// Nothing (more) is needed.
    Ready,
    /// A callback is present and must be asked for `T`.
    NeedsCallback(T),
    /// The input cannot be satisfied; the reason is safe to show a user.
    Unrecoverable(String),
}

/// Decide whether the step's record input must be fetched.
pub fn assess_records(
    state: &ProcessState,
    step: &BackendStep,
    has_callback: bool,
) -> InputOutcome<RecordInput> {
    let Some(input) = &step.record_input else {
        return InputOutcome::Ready;
    };
    if !state.records.is_empty() {
        return InputOutcome::Ready;
    }

    if has_callback {
        InputOutcome::NeedsCallback(input.clone())
    } else if input.required {
        InputOutcome::Unrecoverable(format!(
            "Step '{}' needs records from '{}' and no way to select them was given",
            step.name, input.table
        ))
    } else {
        InputOutcome::Ready
    }
}

/// Apply defaults to missing declared fields and decide what is still missing.
///
/// A value is missing when it is absent or null. Defaults are written into
/// `values` as a side effect.
pub fn assess_fields(
    values: &mut Values,
    inputs: &[FieldInput],
    has_callback: bool,
) -> InputOutcome<Vec<FieldInput>> {
    let mut missing = Vec::new();
    let mut missing_required = Vec::new();

    for field in inputs {
        if values.get(&field.name).is_some_and(|v| !v.is_null()) {
            continue;
        }
        if let Some(default) = &field.default {
            values.insert(field.name.clone(), default.clone());
            continue;
        }
        if field.required {
            missing_required.push(field.name.as_str());
        }
        missing.push(field.clone());
    }

    if missing.is_empty() {
        return InputOutcome::Ready;
    }
    if has_callback {
        return InputOutcome::NeedsCallback(missing);
    }
    if missing_required.is_empty() {
        InputOutcome::Ready
    } else {
        InputOutcome::Unrecoverable(format!(
            "Missing required input: {}",
            missing_required.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::from_fn;
    use serde_json::json;

    fn step_with_records(required: bool) -> BackendStep {
        BackendStep::new("s", from_fn("noop", |_, _| Ok(()))).with_records("orders", required)
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let mut values = Values::new();
        let inputs = vec![FieldInput::new("a").required().with_default(json!(5))];
        assert_eq!(assess_fields(&mut values, &inputs, false), InputOutcome::Ready);
        assert_eq!(values["a"], json!(5));
    }

    #[test]
    fn supplied_values_win_over_defaults() {
        let mut values = Values::from([("a".to_string(), json!(1))]);
        let inputs = vec![FieldInput::new("a").with_default(json!(5))];
        assert_eq!(assess_fields(&mut values, &inputs, false), InputOutcome::Ready);
        assert_eq!(values["a"], json!(1));
    }

    #[test]
    fn optional_missing_without_callback_is_ready() {
        let mut values = Values::new();
        let inputs = vec![FieldInput::new("opt")];
        assert_eq!(assess_fields(&mut values, &inputs, false), InputOutcome::Ready);
        assert!(!values.contains_key("opt"));
    }

    #[test]
    fn required_missing_without_callback_is_unrecoverable() {
        let mut values = Values::from([("b".to_string(), serde_json::Value::Null)]);
        let inputs = vec![FieldInput::new("a"), FieldInput::new("b").required()];
        match assess_fields(&mut values, &inputs, false) {
            InputOutcome::Unrecoverable(reason) => assert!(reason.contains('b')),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_with_callback_lists_all_missing() {
        let mut values = Values::new();
        let inputs = vec![FieldInput::new("a"), FieldInput::new("b").required()];
        match assess_fields(&mut values, &inputs, true) {
            InputOutcome::NeedsCallback(missing) => assert_eq!(missing.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn records_assessment() {
        let state = ProcessState::new(vec!["s".into()]);
        assert!(matches!(
            assess_records(&state, &step_with_records(true), false),
            InputOutcome::Unrecoverable(_)
        ));
        assert_eq!(
            assess_records(&state, &step_with_records(false), false),
            InputOutcome::Ready
        );
        assert!(matches!(
            assess_records(&state, &step_with_records(false), true),
            InputOutcome::NeedsCallback(_)
        ));

        let mut with_records = state.clone();
        with_records
            .records
            .push(json!({"id": 1}).as_object().unwrap().clone());
        assert_eq!(
            assess_records(&with_records, &step_with_records(true), false),
            InputOutcome::Ready
        );
    }
}
