//! End-to-end scenarios for the record-and-replay engine.
//!
//! Each test drives the public API the way an embedder would: build bundles
//! from a document, resolve them through the finder, and run data-driven
//! tests through the orchestrator against fake tab/storage collaborators.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::float_cmp)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use repetir::{
    ActionDispatcher, BoundingBox, BundleBuilder, CommandOutcome, ContextId, DataRow,
    DispatchOutcome, DomDocument, ElementFinder, ElementId, FieldMapping, FindOptions,
    LocatorBundle, MemoryDocument, MemoryElement, Orchestrator, RecorderOptions,
    RecordingController, RepetirResult, RunControl, RunStatus, RunStorage, SessionMetadata, Step,
    StepEvent, StepExecutor, Strategy, TabOperations, TestConfig, TestRun, BUFFER_FLUSH_THRESHOLD,
};

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// Shared fakes
// ============================================================================

/// Tab collaborator that records every command and answers success, with an
/// optional per-command delay to make runs interruptible.
#[derive(Debug, Default)]
struct FakeTabs {
    commands: Mutex<Vec<(usize, Option<String>)>>,
    closed: AtomicUsize,
    command_delay: Duration,
}

#[async_trait]
impl TabOperations for FakeTabs {
    async fn open_context(&self, _url: &str) -> RepetirResult<ContextId> {
        Ok(ContextId("ctx-1".to_string()))
    }

    async fn close_context(&self, _context: &ContextId) -> RepetirResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn inject_automation_surface(&self, _context: &ContextId) -> RepetirResult<()> {
        Ok(())
    }

    async fn send_step_command(
        &self,
        _context: &ContextId,
        step: &Step,
        value: Option<&str>,
    ) -> CommandOutcome {
        if !self.command_delay.is_zero() {
            tokio::time::sleep(self.command_delay).await;
        }
        self.commands
            .lock()
            .unwrap()
            .push((step.index, value.map(str::to_string)));
        CommandOutcome::Completed(true)
    }
}

#[derive(Debug, Default)]
struct FakeStorage {
    saved: Mutex<Vec<TestRun>>,
}

#[async_trait]
impl RunStorage for FakeStorage {
    async fn save_test_run(&self, run: &TestRun) -> RepetirResult<()> {
        self.saved.lock().unwrap().push(run.clone());
        Ok(())
    }
}

fn login_page() -> MemoryDocument {
    let mut doc = MemoryDocument::new("https://shop.example.test/login");
    let root = doc.root();
    let body = doc.append_child(root, MemoryElement::new("body"));
    let form = doc.append_child(body, MemoryElement::new("form").with_attr("id", "login-form"));
    doc.append_child(
        form,
        MemoryElement::new("input")
            .with_attr("id", "email")
            .with_attr("name", "email")
            .with_bounding(BoundingBox::new(20.0, 40.0, 240.0, 32.0)),
    );
    doc.append_child(
        form,
        MemoryElement::new("button")
            .with_attr("id", "sign-in")
            .with_text("Sign in")
            .with_bounding(BoundingBox::new(20.0, 90.0, 120.0, 36.0)),
    );
    doc
}

fn element_by_id(doc: &MemoryDocument, id: &str) -> ElementId {
    doc.query_css(&format!("#{id}"))[0]
}

// ============================================================================
// Scenario: recorded id survives replay at full confidence
// ============================================================================

#[tokio::test]
async fn recorded_id_bundle_resolves_at_full_confidence() {
    init_tracing();
    let doc = login_page();
    let email = element_by_id(&doc, "email");

    let outcome = BundleBuilder::new().build(&doc, email).expect("element exists");
    assert!(outcome.quality_score >= 40, "id alone carries the top weight");

    let finder = ElementFinder::new();
    let found = finder.locate(&doc, &outcome.bundle).await.unwrap();
    assert_eq!(found.element, email);
    assert_eq!(found.strategy, Strategy::Id);
    assert_eq!(found.confidence, 1.0);
    assert_eq!(found.attempts, 1);
}

// ============================================================================
// Scenario: fuzzy text threshold separates near and far matches
// ============================================================================

#[tokio::test]
async fn fuzzy_text_accepts_above_threshold_and_rejects_below() {
    init_tracing();
    // The button lost its id and changed caption slightly.
    let mut doc = MemoryDocument::new("https://shop.example.test/login");
    let root = doc.root();
    let body = doc.append_child(root, MemoryElement::new("body"));
    let button = doc.append_child(
        body,
        MemoryElement::new("button").with_text("Sign in now"),
    );

    let close_bundle = LocatorBundle {
        tag: "button".to_string(),
        text: "Sign in".to_string(),
        bounding: Some(BoundingBox::new(20.0, 90.0, 120.0, 36.0)),
        ..LocatorBundle::default()
    };
    let finder = ElementFinder::with_options(FindOptions::new().with_max_retries(0));
    let found = finder.locate(&doc, &close_bundle).await.unwrap();
    assert_eq!(found.element, button);
    assert_eq!(found.strategy, Strategy::FuzzyText);

    // A caption sharing no tokens stays below the 0.4 threshold.
    let far_bundle = LocatorBundle {
        tag: "button".to_string(),
        text: "Delete account".to_string(),
        bounding: Some(BoundingBox::new(20.0, 90.0, 120.0, 36.0)),
        ..LocatorBundle::default()
    };
    assert!(finder.locate(&doc, &far_bundle).await.is_err());
}

// ============================================================================
// Scenario: three data rows replay three times with injected values
// ============================================================================

#[tokio::test]
async fn three_csv_rows_send_three_commands_per_step_with_row_values() {
    init_tracing();
    let bundle = LocatorBundle {
        tag: "input".to_string(),
        id: Some("name".to_string()),
        ..LocatorBundle::default()
    };
    let steps = vec![Step::new(0, StepEvent::Input, "Name", bundle)];
    let rows: Vec<DataRow> = ["Alice", "Bob", "Carol"]
        .iter()
        .map(|n| [("Name".to_string(), (*n).to_string())].into())
        .collect();
    let mappings = vec![FieldMapping {
        field_name: "Name".to_string(),
        input_var_fields: vec!["Name".to_string()],
        mapped: true,
    }];

    let config = TestConfig::new("proj-7", "https://shop.example.test/signup", steps)
        .with_data_rows(rows)
        .with_field_mappings(mappings);
    let tabs = FakeTabs::default();
    let storage = FakeStorage::default();
    let orchestrator = Orchestrator::new();

    let result = orchestrator
        .run(&config, &tabs, &storage, &RunControl::new())
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.stats.rows_total, 3);
    assert_eq!(result.stats.rows_passed, 3);

    let commands = tabs.commands.lock().unwrap();
    assert_eq!(commands.len(), 3);
    let values: Vec<_> = commands.iter().map(|(_, v)| v.clone().unwrap()).collect();
    assert_eq!(values, ["Alice", "Bob", "Carol"]);

    // The finished run was persisted with one result per row.
    let saved = storage.saved.lock().unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].rows.len(), 3);
    assert_eq!(saved[0].status, RunStatus::Passed);
}

// ============================================================================
// Scenario: stop request ends a long run early
// ============================================================================

#[tokio::test]
async fn stop_mid_run_ends_early_with_stopped_status() {
    init_tracing();
    let bundle = LocatorBundle {
        tag: "button".to_string(),
        id: Some("next".to_string()),
        ..LocatorBundle::default()
    };
    let steps: Vec<Step> = (0..10)
        .map(|i| Step::new(i, StepEvent::Click, format!("Next {i}"), bundle.clone()))
        .collect();
    let config = TestConfig::new("proj-7", "https://shop.example.test/wizard", steps)
        .with_step_delay(Duration::from_millis(100));
    let tabs = FakeTabs::default();
    let orchestrator = Orchestrator::new();
    let control = RunControl::new();

    // Request the stop once the second step command has completed.
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let stopper = control.clone();
    orchestrator.events().on(move |event| {
        if matches!(event, repetir::OrchestratorEvent::StepCompleted { .. })
            && counter.fetch_add(1, Ordering::SeqCst) + 1 == 2
        {
            stopper.stop();
        }
    });

    let result = orchestrator
        .run(&config, &tabs, &FakeStorage::default(), &control)
        .await
        .unwrap();
    assert!(result.was_stopped);
    assert!(!result.success);
    assert_eq!(result.test_run.status, RunStatus::Stopped);

    let sent = tabs.commands.lock().unwrap().len();
    assert!(sent < 10, "stop must prevent the remaining steps, sent {sent}");
    assert_eq!(tabs.closed.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Scenario: recording buffer flushes at the threshold
// ============================================================================

#[test]
fn recording_buffer_flushes_at_threshold() {
    init_tracing();
    let doc = login_page();
    let email = element_by_id(&doc, "email");
    let bundle = BundleBuilder::new().build(&doc, email).unwrap().bundle;

    let mut controller = RecordingController::new(RecorderOptions::new());
    controller
        .start(SessionMetadata {
            user_agent: "scenario/1.0".to_string(),
            viewport_width: 1440,
            viewport_height: 900,
        })
        .unwrap();

    for i in 0..BUFFER_FLUSH_THRESHOLD - 1 {
        controller
            .record_step(StepEvent::Input, format!("Field {i}"), None, bundle.clone())
            .unwrap();
    }
    let before = controller.get_stats();
    assert_eq!(before.flushed_steps, 0);
    assert_eq!(before.buffered_steps, BUFFER_FLUSH_THRESHOLD - 1);

    controller
        .record_step(StepEvent::Click, "Submit", None, bundle)
        .unwrap();
    let after = controller.get_stats();
    assert_eq!(after.flushed_steps, BUFFER_FLUSH_THRESHOLD);
    assert_eq!(after.buffered_steps, 0);

    let session = controller.stop().unwrap();
    assert_eq!(session.steps.len(), BUFFER_FLUSH_THRESHOLD);
}

// ============================================================================
// Scenario: record on one page, replay locally after the id churns
// ============================================================================

#[tokio::test]
async fn recorded_session_replays_after_page_drift() {
    init_tracing();
    // Record against the original page.
    let recording_doc = {
        let mut doc = MemoryDocument::new("https://shop.example.test/login");
        let root = doc.root();
        let body = doc.append_child(root, MemoryElement::new("body"));
        doc.append_child(
            body,
            MemoryElement::new("input")
                .with_attr("id", "email-a1b2") // framework-generated id
                .with_attr("name", "email"),
        );
        doc
    };
    let email = element_by_id(&recording_doc, "email-a1b2");
    let bundle = BundleBuilder::new().build(&recording_doc, email).unwrap().bundle;

    let mut controller = RecordingController::default();
    controller.start(SessionMetadata::default()).unwrap();
    controller
        .record_step(StepEvent::Input, "Email", Some("user@example.test".to_string()), bundle)
        .unwrap();
    let session = controller.stop().unwrap();

    // Replay against a rebuilt page where the generated id changed but the
    // name attribute survived.
    let replay_doc = {
        let mut doc = MemoryDocument::new("https://shop.example.test/login");
        let root = doc.root();
        let body = doc.append_child(root, MemoryElement::new("body"));
        doc.append_child(
            body,
            MemoryElement::new("input")
                .with_attr("id", "email-z9y8")
                .with_attr("name", "email"),
        );
        doc
    };

    #[derive(Debug, Default)]
    struct CapturingDispatcher {
        values: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl ActionDispatcher for CapturingDispatcher {
        async fn dispatch(
            &self,
            _step: &Step,
            _element: ElementId,
            value: Option<&str>,
        ) -> DispatchOutcome {
            self.values.lock().unwrap().push(value.map(str::to_string));
            DispatchOutcome::Success { captured: None }
        }
    }

    let dispatcher = CapturingDispatcher::default();
    let executor = StepExecutor::new(ElementFinder::with_options(
        FindOptions::new().with_max_retries(1).with_retry_interval(Duration::from_millis(10)),
    ));
    let summary = executor
        .run_steps(&replay_doc, &dispatcher, &session.steps, &RunControl::new())
        .await
        .unwrap();
    assert_eq!(summary.passed(), 1);
    assert_eq!(
        dispatcher.values.lock().unwrap().as_slice(),
        [Some("user@example.test".to_string())]
    );
}
