//! Step replay: resolve, dispatch, record.
//!
//! The executor walks a recorded step list against a document, resolving each
//! step's bundle through the [`ElementFinder`] and handing the resolved
//! element to an [`ActionDispatcher`]. A step that fails to resolve is
//! recorded as failed and never dispatched. Row-driven replay substitutes
//! mapped data values into input steps before execution.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::bundle::LocatorBundle;
use crate::control::RunControl;
use crate::dom::{DomDocument, ElementId};
use crate::events::EventBus;
use crate::finder::ElementFinder;
use crate::result::{RepetirError, RepetirResult};

/// Sleep granularity while paused
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// The kind of interaction a recorded step replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepEvent {
    /// Mouse click on the resolved element
    Click,
    /// Text entry into the resolved element
    Input,
    /// Option selection on the resolved element
    Select,
    /// Key press targeted at the resolved element
    Keypress,
    /// Page navigation (bundle identifies the triggering element)
    Navigate,
    /// Assertion against the resolved element's state
    Assert,
}

impl StepEvent {
    /// Whether this event consumes a data value (and is therefore skipped,
    /// not failed, when a data row provides none).
    #[must_use]
    pub const fn is_input_class(&self) -> bool {
        matches!(self, Self::Input | Self::Select | Self::Keypress)
    }
}

impl std::fmt::Display for StepEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Click => "click",
            Self::Input => "input",
            Self::Select => "select",
            Self::Keypress => "keypress",
            Self::Navigate => "navigate",
            Self::Assert => "assert",
        };
        write!(f, "{name}")
    }
}

/// One recorded interaction. Each step exclusively owns its locator bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Stable identifier assigned at record time
    pub id: Uuid,
    /// Interaction kind
    pub event: StepEvent,
    /// Human-readable label (field name, button caption)
    pub label: String,
    /// Recorded value for input-class events
    pub value: Option<String>,
    /// Locator bundle captured at record time
    pub bundle: LocatorBundle,
    /// Position within the recorded sequence
    pub index: usize,
}

impl Step {
    /// Create a step with a fresh id
    #[must_use]
    pub fn new(index: usize, event: StepEvent, label: impl Into<String>, bundle: LocatorBundle) -> Self {
        Self {
            id: Uuid::new_v4(),
            event,
            label: label.into(),
            value: None,
            bundle,
            index,
        }
    }

    /// Attach a recorded value
    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// Maps one data column onto the steps that consume it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Data column name
    pub field_name: String,
    /// Labels of the input steps fed by this column
    pub input_var_fields: Vec<String>,
    /// Whether the mapping is active
    pub mapped: bool,
}

/// One row of replay data, keyed by column name.
pub type DataRow = BTreeMap<String, String>;

/// Result of dispatching one resolved interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Interaction performed; optionally carries a captured value
    Success {
        /// Value read back from the page, if the action produces one
        captured: Option<String>,
    },
    /// Interaction attempted and failed
    Failure {
        /// What went wrong
        message: String,
    },
}

/// Performs the concrete interaction once a step's element is resolved.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    /// Execute the step against the resolved element. `value` is the
    /// post-substitution value for input-class events.
    async fn dispatch(
        &self,
        step: &Step,
        element: ElementId,
        value: Option<&str>,
    ) -> DispatchOutcome;
}

/// Executor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// No run in progress
    Idle,
    /// Steps are being executed
    Running,
    /// Run suspended at a step boundary
    Paused,
    /// Run finished with every step passed or skipped
    Completed,
    /// Run finished with at least one failed step (or aborted on error)
    Failed,
    /// Run ended early by a cooperative stop
    Stopped,
}

/// Terminal status of one executed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Resolved and dispatched successfully
    Passed,
    /// Failed to resolve, or the dispatch reported failure
    Failed,
    /// Input-class step with no mapped row data
    Skipped,
}

/// Record of one step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step position
    pub index: usize,
    /// Step label
    pub label: String,
    /// Terminal status
    pub status: StepStatus,
    /// Wall time spent on the step
    pub duration: Duration,
    /// Failure detail when `status` is `Failed`
    pub error: Option<String>,
}

/// Record of one data row's replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowRecord {
    /// Row position in the data set
    pub row_index: usize,
    /// Whether every non-skipped step passed
    pub passed: bool,
    /// Per-step outcomes
    pub steps: Vec<StepRecord>,
}

/// Aggregate outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Terminal state (`Completed`, `Failed` or `Stopped`)
    pub state: RunState,
    /// Per-step outcomes, in execution order
    pub steps: Vec<StepRecord>,
    /// Total wall time
    pub duration: Duration,
}

impl RunSummary {
    /// Count of passed steps
    #[must_use]
    pub fn passed(&self) -> usize {
        self.steps.iter().filter(|s| s.status == StepStatus::Passed).count()
    }

    /// Count of failed steps
    #[must_use]
    pub fn failed(&self) -> usize {
        self.steps.iter().filter(|s| s.status == StepStatus::Failed).count()
    }

    /// Count of skipped steps
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.steps.iter().filter(|s| s.status == StepStatus::Skipped).count()
    }
}

/// Lifecycle notifications emitted during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorEvent {
    /// A step is about to execute
    StepStarted {
        /// Step position
        index: usize,
        /// Step label
        label: String,
    },
    /// A step finished successfully
    StepCompleted {
        /// Step position
        index: usize,
        /// Wall time spent on the step
        duration: Duration,
    },
    /// A step failed to resolve or dispatch
    StepFailed {
        /// Step position
        index: usize,
        /// Failure detail
        error: String,
    },
    /// A data row is about to replay
    RowStarted {
        /// Row position
        row_index: usize,
    },
    /// A data row finished replaying
    RowCompleted {
        /// Row position
        row_index: usize,
        /// Whether every non-skipped step passed
        passed: bool,
    },
}

/// What a data row contributes to one step.
pub(crate) enum Substitution {
    /// Use this value instead of the recorded one
    Value(String),
    /// Use the step's recorded value unchanged
    Keep,
    /// Input-class step with no mapped data: skip it
    Skip,
}

/// Replays recorded steps against a document.
pub struct StepExecutor {
    finder: ElementFinder,
    continue_on_error: bool,
    step_delay: Duration,
    events: EventBus<ExecutorEvent>,
    state: Mutex<RunState>,
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("continue_on_error", &self.continue_on_error)
            .field("step_delay", &self.step_delay)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Default for StepExecutor {
    fn default() -> Self {
        Self::new(ElementFinder::new())
    }
}

impl StepExecutor {
    /// Create an executor with the given finder and default policy
    #[must_use]
    pub fn new(finder: ElementFinder) -> Self {
        Self {
            finder,
            continue_on_error: true,
            step_delay: Duration::ZERO,
            events: EventBus::new(),
            state: Mutex::new(RunState::Idle),
        }
    }

    /// Set whether a failed step aborts the run (default: continue)
    #[must_use]
    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Set a fixed delay inserted after each step
    #[must_use]
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Event bus for run lifecycle notifications
    #[must_use]
    pub fn events(&self) -> &EventBus<ExecutorEvent> {
        &self.events
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> RunState {
        *self.state.lock().expect("state lock poisoned")
    }

    fn set_state(&self, state: RunState) {
        *self.state.lock().expect("state lock poisoned") = state;
    }

    fn begin_run(&self) -> RepetirResult<()> {
        let mut state = self.state.lock().expect("state lock poisoned");
        if matches!(*state, RunState::Running | RunState::Paused) {
            return Err(RepetirError::AlreadyActive {
                message: "a replay is already in progress".to_string(),
            });
        }
        *state = RunState::Running;
        Ok(())
    }

    /// Replay a step list once, with recorded values.
    ///
    /// # Errors
    ///
    /// Returns [`RepetirError::AlreadyActive`] if a run is already in
    /// progress on this executor.
    pub async fn run_steps(
        &self,
        doc: &dyn DomDocument,
        dispatcher: &dyn ActionDispatcher,
        steps: &[Step],
        control: &RunControl,
    ) -> RepetirResult<RunSummary> {
        self.begin_run()?;
        let start = Instant::now();
        let mut records = Vec::with_capacity(steps.len());
        let state = self
            .execute_sequence(doc, dispatcher, steps, None, control, &mut records)
            .await;
        self.set_state(state);
        Ok(RunSummary {
            state,
            steps: records,
            duration: start.elapsed(),
        })
    }

    /// Replay the step list once per data row, substituting mapped values.
    ///
    /// Cancellation is observed between rows as well as between steps; a
    /// stop request ends the run after the in-flight step finishes.
    ///
    /// # Errors
    ///
    /// Returns [`RepetirError::AlreadyActive`] if a run is already in
    /// progress on this executor.
    pub async fn run_rows(
        &self,
        doc: &dyn DomDocument,
        dispatcher: &dyn ActionDispatcher,
        steps: &[Step],
        rows: &[DataRow],
        mappings: &[FieldMapping],
        control: &RunControl,
    ) -> RepetirResult<(RunState, Vec<RowRecord>)> {
        self.begin_run()?;
        let mut row_records = Vec::with_capacity(rows.len());
        let mut terminal = RunState::Completed;

        for (row_index, row) in rows.iter().enumerate() {
            if control.cancel_token().is_cancelled() {
                terminal = RunState::Stopped;
                break;
            }
            tracing::info!(target: "repetir::executor", row_index, "row started");
            self.events.emit(&ExecutorEvent::RowStarted { row_index });

            let mut records = Vec::with_capacity(steps.len());
            let state = self
                .execute_sequence(
                    doc,
                    dispatcher,
                    steps,
                    Some((row, mappings)),
                    control,
                    &mut records,
                )
                .await;
            let passed = state == RunState::Completed;
            self.events.emit(&ExecutorEvent::RowCompleted { row_index, passed });
            row_records.push(RowRecord {
                row_index,
                passed,
                steps: records,
            });

            match state {
                RunState::Stopped => {
                    terminal = RunState::Stopped;
                    break;
                }
                RunState::Failed if !self.continue_on_error => {
                    terminal = RunState::Failed;
                    break;
                }
                RunState::Failed => terminal = RunState::Failed,
                _ => {}
            }
        }

        self.set_state(terminal);
        Ok((terminal, row_records))
    }

    async fn execute_sequence(
        &self,
        doc: &dyn DomDocument,
        dispatcher: &dyn ActionDispatcher,
        steps: &[Step],
        row: Option<(&DataRow, &[FieldMapping])>,
        control: &RunControl,
        records: &mut Vec<StepRecord>,
    ) -> RunState {
        let mut any_failed = false;

        for step in steps {
            if control.cancel_token().is_cancelled() {
                return RunState::Stopped;
            }
            if self.wait_while_paused(control).await {
                return RunState::Stopped;
            }

            let substitution = row.map_or(Substitution::Keep, |(data, mappings)| {
                substituted_value(step, data, mappings)
            });
            let value = match substitution {
                Substitution::Value(v) => Some(v),
                Substitution::Keep => step.value.clone(),
                Substitution::Skip => {
                    tracing::debug!(
                        target: "repetir::executor",
                        index = step.index,
                        label = %step.label,
                        "no mapped data, step skipped"
                    );
                    records.push(StepRecord {
                        index: step.index,
                        label: step.label.clone(),
                        status: StepStatus::Skipped,
                        duration: Duration::ZERO,
                        error: None,
                    });
                    continue;
                }
            };

            let record = self.execute_step(doc, dispatcher, step, value.as_deref()).await;
            let failed = record.status == StepStatus::Failed;
            records.push(record);
            if failed {
                any_failed = true;
                if !self.continue_on_error {
                    return RunState::Failed;
                }
            }

            if !self.step_delay.is_zero() {
                tokio::time::sleep(self.step_delay).await;
            }
        }

        if any_failed {
            RunState::Failed
        } else {
            RunState::Completed
        }
    }

    async fn execute_step(
        &self,
        doc: &dyn DomDocument,
        dispatcher: &dyn ActionDispatcher,
        step: &Step,
        value: Option<&str>,
    ) -> StepRecord {
        let start = Instant::now();
        self.events.emit(&ExecutorEvent::StepStarted {
            index: step.index,
            label: step.label.clone(),
        });

        // A step whose bundle does not resolve is never dispatched.
        let element = match self.finder.locate(doc, &step.bundle).await {
            Ok(outcome) => outcome.element,
            Err(failure) => {
                let error = format!(
                    "element not resolved for '{}' ({:?} after {} attempts)",
                    step.label, failure.reason, failure.attempts
                );
                tracing::warn!(target: "repetir::executor", index = step.index, %error);
                self.events.emit(&ExecutorEvent::StepFailed {
                    index: step.index,
                    error: error.clone(),
                });
                return StepRecord {
                    index: step.index,
                    label: step.label.clone(),
                    status: StepStatus::Failed,
                    duration: start.elapsed(),
                    error: Some(error),
                };
            }
        };

        match dispatcher.dispatch(step, element, value).await {
            DispatchOutcome::Success { .. } => {
                let duration = start.elapsed();
                self.events.emit(&ExecutorEvent::StepCompleted {
                    index: step.index,
                    duration,
                });
                StepRecord {
                    index: step.index,
                    label: step.label.clone(),
                    status: StepStatus::Passed,
                    duration,
                    error: None,
                }
            }
            DispatchOutcome::Failure { message } => {
                tracing::warn!(
                    target: "repetir::executor",
                    index = step.index,
                    error = %message,
                    "dispatch failed"
                );
                self.events.emit(&ExecutorEvent::StepFailed {
                    index: step.index,
                    error: message.clone(),
                });
                StepRecord {
                    index: step.index,
                    label: step.label.clone(),
                    status: StepStatus::Failed,
                    duration: start.elapsed(),
                    error: Some(message),
                }
            }
        }
    }

    /// Block at a step boundary while paused. Returns `true` if cancellation
    /// arrived while waiting.
    async fn wait_while_paused(&self, control: &RunControl) -> bool {
        if !control.pause_token().is_paused() {
            return false;
        }
        self.set_state(RunState::Paused);
        tracing::info!(target: "repetir::executor", "run paused");
        while control.pause_token().is_paused() {
            if control.cancel_token().is_cancelled() {
                return true;
            }
            tokio::time::sleep(PAUSE_POLL_INTERVAL).await;
        }
        self.set_state(RunState::Running);
        tracing::info!(target: "repetir::executor", "run resumed");
        control.cancel_token().is_cancelled()
    }
}

/// Work out what a data row contributes to one step.
///
/// Input-class steps with no active mapping or no row value are skipped, not
/// failed. Other steps keep their recorded value.
pub(crate) fn substituted_value(
    step: &Step,
    row: &DataRow,
    mappings: &[FieldMapping],
) -> Substitution {
    if !step.event.is_input_class() {
        return Substitution::Keep;
    }
    let mapping = mappings
        .iter()
        .filter(|m| m.mapped)
        .find(|m| m.input_var_fields.iter().any(|f| f == &step.label));
    match mapping.and_then(|m| row.get(&m.field_name)) {
        Some(value) => Substitution::Value(value.clone()),
        None => Substitution::Skip,
    }
}
