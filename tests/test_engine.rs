//! Integration tests for the process runner.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use procflow::catalog::{BackendStep, FieldInput, FrontendStep, ProcessCatalog, ProcessDefinition};
use procflow::data::Record;
use procflow::data::memory_source::MemoryRecordSource;
use procflow::engine::callback::{self, CallbackDescriptor};
use procflow::engine::types::*;
use procflow::engine::{Engine, EngineError};
use procflow::handlers::{HandlerRegistry, StepHandler, StepInput, StepOutput, from_fn};
use procflow::storage::StateStore;
use procflow::storage::memory_store::MemoryStateStore;

type Trace = Arc<Mutex<Vec<String>>>;

struct Fixture {
    engine: Engine,
    store: Arc<MemoryStateStore>,
    trace: Trace,
}

fn record(v: serde_json::Value) -> Record {
    v.as_object().unwrap().clone()
}

fn orders() -> MemoryRecordSource {
    let rows: Vec<Record> = (1..=10)
        .map(|id| record(json!({"id": id, "status": "open"})))
        .collect();
    MemoryRecordSource::with_tables([("orders".to_string(), rows)].into())
}

/// Backend step that appends its name to the trace and sets `ran_<name>`.
fn traced(name: &str, trace: &Trace) -> BackendStep {
    let trace = trace.clone();
    let step = name.to_string();
    BackendStep::new(
        name,
        from_fn("trace", move |_input, output| {
            trace.lock().unwrap().push(step.clone());
            output.set_value(format!("ran_{}", step), json!(true));
            Ok(())
        }),
    )
}

fn fixture(build: impl FnOnce(&Trace) -> Vec<ProcessDefinition>) -> Fixture {
    let trace: Trace = Arc::new(Mutex::new(Vec::new()));
    let mut catalog = ProcessCatalog::new();
    for process in build(&trace) {
        catalog.register(process).unwrap();
    }
    let store = Arc::new(MemoryStateStore::new());
    let engine = Engine::new(Arc::new(catalog), store.clone(), Arc::new(orders()));
    Fixture {
        engine,
        store,
        trace,
    }
}

fn abc(trace: &Trace) -> Vec<ProcessDefinition> {
    vec![
        ProcessDefinition::new("abc")
            .backend(traced("A", trace))
            .backend(traced("B", trace))
            .backend(traced("C", trace)),
    ]
}

fn with_frontend(trace: &Trace) -> Vec<ProcessDefinition> {
    vec![
        ProcessDefinition::new("review")
            .backend(traced("A", trace))
            .frontend(FrontendStep::new("F"))
            .backend(traced("C", trace)),
    ]
}

fn ran(fx: &Fixture) -> Vec<String> {
    fx.trace.lock().unwrap().clone()
}

async fn stored(fx: &Fixture, run_id: &str) -> ProcessState {
    fx.store
        .get(&RunKey::process_status(run_id))
        .await
        .unwrap()
        .unwrap()
}

// --- Basic execution ---

#[tokio::test]
async fn backend_only_process_runs_every_step_once_in_order() {
    let fx = fixture(abc);

    let out = fx.engine.runner.run(RunInput::new("abc")).await;

    assert!(out.is_success(), "{:?}", out.failure);
    assert_eq!(out.status, RunStatus::Completed);
    assert_eq!(ran(&fx), vec!["A", "B", "C"]);
    assert_eq!(out.last_step.as_deref(), Some("C"));

    let state = out.process_state.unwrap();
    assert!(state.remaining_steps(Some("C")).is_empty());
    assert!(state.failure.is_none());
    assert!(state.next_step_name.is_none());
    assert_eq!(out.values["ran_B"], json!(true));
}

#[tokio::test]
async fn generated_run_id_is_primed_with_declared_step_order() {
    struct PeekStore {
        store: Arc<MemoryStateStore>,
        seen: Arc<Mutex<Option<ProcessState>>>,
    }

    #[async_trait]
    impl StepHandler for PeekStore {
        fn handler_type(&self) -> &str {
            "peek"
        }

        fn description(&self) -> &str {
            "Read the primed state back from the store"
        }

        async fn run(&self, input: StepInput, _output: &mut StepOutput) -> Result<()> {
            let state = self
                .store
                .get(&RunKey::process_status(&input.run_id))
                .await?;
            *self.seen.lock().unwrap() = state;
            Ok(())
        }
    }

    let store = Arc::new(MemoryStateStore::new());
    let seen = Arc::new(Mutex::new(None));
    let peek = Arc::new(PeekStore {
        store: store.clone(),
        seen: seen.clone(),
    });

    let mut catalog = ProcessCatalog::new();
    catalog.register(
        ProcessDefinition::new("peek")
            .backend(BackendStep::new("first", peek))
            .frontend(FrontendStep::new("second"))
            .backend(BackendStep::new("third", from_fn("noop", |_, _| Ok(())))),
    )
    .unwrap();
    let engine = Engine::new(
        Arc::new(catalog),
        store.clone(),
        Arc::new(MemoryRecordSource::new()),
    );

    let out = engine.runner.run(RunInput::new("peek")).await;

    assert!(!out.run_id.is_empty());
    let primed = seen.lock().unwrap().clone().expect("state stored before first step");
    assert_eq!(primed.step_list, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn supplied_run_id_is_echoed() {
    let fx = fixture(abc);
    let out = fx
        .engine
        .runner
        .run(RunInput::new("abc").with_run_id("run-42"))
        .await;
    assert_eq!(out.run_id, "run-42");
    assert_eq!(stored(&fx, "run-42").await.step_list, vec!["A", "B", "C"]);
}

// --- Resume ---

#[tokio::test]
async fn resume_after_b_executes_only_c() {
    let fx = fixture(abc);
    fx.engine
        .runner
        .run(RunInput::new("abc").with_run_id("r1"))
        .await
        .into_result()
        .unwrap();
    fx.trace.lock().unwrap().clear();

    let out = fx
        .engine
        .runner
        .run(RunInput::new("abc").with_run_id("r1").resume_after("B"))
        .await;

    assert!(out.is_success());
    assert_eq!(ran(&fx), vec!["C"]);
}

#[tokio::test]
async fn resuming_unknown_run_is_not_found() {
    let fx = fixture(abc);
    let out = fx
        .engine
        .runner
        .run(RunInput::new("abc").with_run_id("ghost").resume_after("A"))
        .await;

    assert!(matches!(out.failure, Some(EngineError::NotFound(_))));
    assert!(out.process_state.is_none());
    assert!(ran(&fx).is_empty());
}

#[tokio::test]
async fn resume_point_outside_plan_is_not_found() {
    let fx = fixture(abc);
    fx.engine
        .runner
        .run(RunInput::new("abc").with_run_id("r1"))
        .await;

    let out = fx
        .engine
        .runner
        .run(RunInput::new("abc").with_run_id("r1").resume_after("Z"))
        .await;
    assert!(matches!(out.failure, Some(EngineError::NotFound(_))));
}

#[tokio::test]
async fn caller_values_override_restored_values() {
    let fx = fixture(with_frontend);
    fx.engine
        .runner
        .run(
            RunInput::new("review")
                .with_run_id("r1")
                .with_value("note", json!("first")),
        )
        .await;

    let out = fx
        .engine
        .runner
        .run(
            RunInput::new("review")
                .with_run_id("r1")
                .resume_after("F")
                .with_value("note", json!("second")),
        )
        .await;

    assert!(out.is_success());
    assert_eq!(out.values["note"], json!("second"));
    assert_eq!(out.values["ran_A"], json!(true));
}

// --- Frontend step policy ---

#[tokio::test]
async fn break_pauses_before_frontend_step() {
    let fx = fixture(with_frontend);

    let out = fx
        .engine
        .runner
        .run(RunInput::new("review").with_run_id("r1"))
        .await;

    assert!(out.failure.is_none());
    assert_eq!(out.status, RunStatus::Paused);
    assert_eq!(ran(&fx), vec!["A"]);
    assert_eq!(out.last_step.as_deref(), Some("F"));
    assert_eq!(
        out.process_state.unwrap().next_step_name.as_deref(),
        Some("F")
    );
    assert_eq!(
        stored(&fx, "r1").await.next_step_name.as_deref(),
        Some("F")
    );

    let resumed = fx
        .engine
        .runner
        .run(RunInput::new("review").with_run_id("r1").resume_after("F"))
        .await;

    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(ran(&fx), vec!["A", "C"]);
    assert!(stored(&fx, "r1").await.next_step_name.is_none());
}

#[tokio::test]
async fn fail_policy_names_step_and_process() {
    let fx = fixture(with_frontend);

    let out = fx
        .engine
        .runner
        .run(RunInput::new("review").with_frontend_behavior(FrontendStepBehavior::Fail))
        .await;

    match &out.failure {
        Some(EngineError::FrontendStep { process, step }) => {
            assert_eq!(process, "review");
            assert_eq!(step, "F");
        }
        other => panic!("unexpected failure {:?}", other),
    }
    let message = out.failure.as_ref().unwrap().to_string();
    assert!(message.contains("'F'") && message.contains("'review'"));
    assert_eq!(ran(&fx), vec!["A"]);
    assert!(out.process_state.is_some());
}

#[tokio::test]
async fn skip_policy_never_executes_or_pauses_at_frontend_step() {
    let fx = fixture(with_frontend);

    let out = fx
        .engine
        .runner
        .run(RunInput::new("review").with_frontend_behavior(FrontendStepBehavior::Skip))
        .await;

    assert!(out.is_success());
    assert_eq!(out.status, RunStatus::Completed);
    assert_eq!(ran(&fx), vec!["A", "C"]);
    assert!(out.process_state.unwrap().next_step_name.is_none());
}

// --- Input completion ---

fn needs_reason(trace: &Trace) -> Vec<ProcessDefinition> {
    let trace = trace.clone();
    vec![
        ProcessDefinition::new("reasoned").backend(
            BackendStep::new(
                "close",
                from_fn("close", move |input, _output| {
                    let reason = input.value("reason").cloned().unwrap_or_default();
                    trace.lock().unwrap().push(reason.to_string());
                    Ok(())
                }),
            )
            .with_field(FieldInput::new("reason").required())
            .with_field(FieldInput::new("notify").with_default(json!(false)))
            .with_field(FieldInput::new("comment")),
        ),
    ]
}

#[tokio::test]
async fn required_field_without_callback_is_user_facing() {
    let fx = fixture(needs_reason);

    let out = fx.engine.runner.run(RunInput::new("reasoned")).await;

    let err = out.failure.expect("missing field should fail");
    assert!(err.is_user_facing());
    assert!(err.to_string().contains("reason"));
    assert!(ran(&fx).is_empty());

    let state = out.process_state.unwrap();
    assert_eq!(
        state.failure.map(|f| f.kind),
        Some(FailureKind::UserFacing)
    );
}

#[tokio::test]
async fn callback_supplies_missing_required_field() {
    let fx = fixture(needs_reason);
    let cb = CallbackDescriptor::builder().value("reason", "late").build();

    let out = fx
        .engine
        .runner
        .run(RunInput::new("reasoned").with_callback(Arc::new(cb)))
        .await;

    assert!(out.is_success(), "{:?}", out.failure);
    assert_eq!(ran(&fx), vec!["\"late\""]);
    assert_eq!(out.values["notify"], json!(false));
    assert!(!out.values.contains_key("comment"));
}

#[tokio::test]
async fn supplied_field_needs_no_callback() {
    let fx = fixture(needs_reason);
    let out = fx
        .engine
        .runner
        .run(RunInput::new("reasoned").with_value("reason", json!("done")))
        .await;
    assert!(out.is_success());
}

fn needs_orders(trace: &Trace) -> Vec<ProcessDefinition> {
    let trace = trace.clone();
    vec![
        ProcessDefinition::new("close_orders").backend(
            BackendStep::new(
                "close",
                from_fn("close", move |input, output| {
                    for r in &input.records {
                        trace.lock().unwrap().push(r["id"].to_string());
                    }
                    for r in output.records.iter_mut() {
                        r.insert("status".into(), json!("closed"));
                    }
                    Ok(())
                }),
            )
            .with_records("orders", true),
        ),
    ]
}

#[tokio::test]
async fn required_records_without_callback_is_user_facing() {
    let fx = fixture(needs_orders);
    let out = fx.engine.runner.run(RunInput::new("close_orders")).await;

    assert!(matches!(out.failure, Some(EngineError::UserFacing { .. })));
    assert!(ran(&fx).is_empty());
}

#[tokio::test]
async fn primary_key_callback_fetches_exactly_that_record() {
    let fx = fixture(needs_orders);
    let cb = callback::for_primary_key("id", 7);

    let out = fx
        .engine
        .runner
        .run(RunInput::new("close_orders").with_callback(Arc::new(cb)))
        .await;

    assert!(out.is_success(), "{:?}", out.failure);
    assert_eq!(ran(&fx), vec!["7"]);
    assert_eq!(out.records.len(), 1);
    assert_eq!(out.records[0]["status"], json!("closed"));
}

#[tokio::test]
async fn supplied_records_skip_the_query() {
    let fx = fixture(needs_orders);
    let out = fx
        .engine
        .runner
        .run(RunInput::new("close_orders").with_records(vec![record(json!({"id": 99}))]))
        .await;
    assert!(out.is_success());
    assert_eq!(ran(&fx), vec!["99"]);
}

#[tokio::test]
async fn callback_can_adjust_query_before_it_runs() {
    struct FirstThree;

    impl procflow::engine::DataCompletionCallback for FirstThree {
        fn query_filter(&self) -> Option<procflow::data::QueryFilter> {
            Some(procflow::data::QueryFilter::new())
        }

        fn before_query(&self, _step: &str, request: &mut procflow::data::QueryRequest) {
            request.limit = Some(3);
        }
    }

    let fx = fixture(needs_orders);
    let out = fx
        .engine
        .runner
        .run(RunInput::new("close_orders").with_callback(Arc::new(FirstThree)))
        .await;

    assert!(out.is_success());
    assert_eq!(ran(&fx), vec!["1", "2", "3"]);
}

// --- Failures ---

fn fails_midway(trace: &Trace) -> Vec<ProcessDefinition> {
    vec![
        ProcessDefinition::new("fragile")
            .backend(traced("A", trace))
            .backend(BackendStep::new(
                "B",
                from_fn("boom", |_input, output| {
                    output.set_value("partial", json!(1));
                    anyhow::bail!("disk on fire")
                }),
            ))
            .backend(traced("C", trace)),
    ]
}

#[tokio::test]
async fn handler_failure_stops_run_and_keeps_progress() {
    let fx = fixture(fails_midway);

    let out = fx
        .engine
        .runner
        .run(RunInput::new("fragile").with_run_id("r1"))
        .await;

    match &out.failure {
        Some(EngineError::Step {
            process,
            step,
            message,
        }) => {
            assert_eq!(process, "fragile");
            assert_eq!(step, "B");
            assert!(message.contains("disk on fire"));
        }
        other => panic!("unexpected failure {:?}", other),
    }
    assert_eq!(out.status, RunStatus::Failed);
    assert_eq!(ran(&fx), vec!["A"]);

    let saved = stored(&fx, "r1").await;
    assert_eq!(saved.values["ran_A"], json!(true));
    assert_eq!(saved.values["partial"], json!(1));
    assert_eq!(saved.failure.unwrap().step, "B");
}

#[tokio::test]
async fn handler_panic_is_captured() {
    let fx = fixture(|_| {
        vec![ProcessDefinition::new("panicky").backend(BackendStep::new(
            "P",
            from_fn("panic", |_, _| panic!("unexpected state")),
        ))]
    });

    let out = fx.engine.runner.run(RunInput::new("panicky")).await;
    match out.failure {
        Some(EngineError::Step { message, .. }) => assert!(message.contains("unexpected state")),
        other => panic!("unexpected failure {:?}", other),
    }
}

#[tokio::test]
async fn unknown_process_is_not_found() {
    let fx = fixture(abc);
    let out = fx.engine.runner.run(RunInput::new("nope")).await;

    assert!(matches!(out.failure, Some(EngineError::NotFound(_))));
    assert!(out.process_state.is_none());
    assert!(fx.store.is_empty().await);
}

// --- Dynamic plans ---

#[tokio::test]
async fn step_output_can_rewrite_remaining_plan() {
    let registry = HandlerRegistry::with_builtins();
    let set_plan = registry.get("set_plan").unwrap();

    let fx = fixture(|trace| {
        vec![
            ProcessDefinition::new("dynamic")
                .backend(
                    BackendStep::new("A", set_plan)
                        .with_config(json!({ "steps": ["C"] })),
                )
                .backend(traced("B", trace))
                .backend(traced("C", trace)),
        ]
    });

    let out = fx
        .engine
        .runner
        .run(RunInput::new("dynamic").with_run_id("r1"))
        .await;

    assert!(out.is_success(), "{:?}", out.failure);
    assert_eq!(ran(&fx), vec!["C"]);
    assert_eq!(stored(&fx, "r1").await.step_list, vec!["A", "C"]);
}

#[tokio::test]
async fn plan_entry_without_definition_is_not_found() {
    let registry = HandlerRegistry::with_builtins();
    let set_plan = registry.get("set_plan").unwrap();

    let fx = fixture(|_| {
        vec![ProcessDefinition::new("dynamic").backend(
            BackendStep::new("A", set_plan).with_config(json!({ "steps": ["missing"] })),
        )]
    });

    let out = fx.engine.runner.run(RunInput::new("dynamic")).await;
    assert!(matches!(out.failure, Some(EngineError::NotFound(_))));
    assert_eq!(out.last_step.as_deref(), Some("missing"));
}

async fn run_bounded(fx: &Fixture, input: RunInput) -> RunOutput {
    tokio::time::timeout(std::time::Duration::from_secs(5), fx.engine.runner.run(input))
        .await
        .expect("run should finish")
}

#[tokio::test]
async fn set_plan_cannot_re_add_an_earlier_step() {
    let registry = HandlerRegistry::with_builtins();
    let set_plan = registry.get("set_plan").unwrap();

    let fx = fixture(|trace| {
        vec![
            ProcessDefinition::new("looping")
                .backend(traced("a", trace))
                .backend(BackendStep::new("b", set_plan).with_config(json!({ "steps": ["a"] }))),
        ]
    });

    let out = run_bounded(&fx, RunInput::new("looping").with_run_id("r1")).await;

    match &out.failure {
        Some(EngineError::Step { step, message, .. }) => {
            assert_eq!(step, "b");
            assert!(message.contains("'a' is already in the plan"), "{message}");
        }
        other => panic!("unexpected failure {:?}", other),
    }
    assert_eq!(ran(&fx), vec!["a"]);
    assert_eq!(stored(&fx, "r1").await.step_list, vec!["a", "b"]);
}

#[tokio::test]
async fn set_plan_rejects_repeated_names() {
    let registry = HandlerRegistry::with_builtins();
    let set_plan = registry.get("set_plan").unwrap();

    let fx = fixture(|trace| {
        vec![
            ProcessDefinition::new("twice")
                .backend(BackendStep::new("route", set_plan).with_config(json!({ "steps": ["c", "c"] })))
                .backend(traced("c", trace)),
        ]
    });

    let out = run_bounded(&fx, RunInput::new("twice")).await;
    assert!(matches!(out.failure, Some(EngineError::Step { .. })));
    assert!(ran(&fx).is_empty());
}

#[tokio::test]
async fn handler_rewriting_plan_with_duplicates_fails_run() {
    let fx = fixture(|trace| {
        vec![
            ProcessDefinition::new("rewrite")
                .backend(traced("a", trace))
                .backend(BackendStep::new(
                    "b",
                    from_fn("rewind", |_input, output| {
                        output.step_list = vec!["a".into(), "b".into(), "a".into()];
                        Ok(())
                    }),
                )),
        ]
    });

    let out = run_bounded(&fx, RunInput::new("rewrite")).await;

    match &out.failure {
        Some(err @ EngineError::Internal { .. }) => {
            let message = err.to_string();
            assert!(message.contains("after step 'b'"), "{message}");
            assert!(message.contains("'a' appears more than once"), "{message}");
        }
        other => panic!("unexpected failure {:?}", other),
    }
    assert_eq!(out.status, RunStatus::Failed);
    assert_eq!(ran(&fx), vec!["a"]);
    assert!(out.process_state.is_some());
}

#[test]
fn register_rejects_duplicate_step_names() {
    let trace: Trace = Arc::new(Mutex::new(Vec::new()));
    let mut catalog = ProcessCatalog::new();

    let err = catalog
        .register(
            ProcessDefinition::new("dup")
                .backend(traced("a", &trace))
                .backend(traced("b", &trace))
                .backend(traced("a", &trace)),
        )
        .unwrap_err();

    assert!(err.to_string().contains("'a' more than once"), "{err}");
    assert!(catalog.get("dup").is_none());
    assert!(catalog.is_empty());
}
