//! Data-driven test runs over a browser tab collaborator.
//!
//! The orchestrator validates a [`TestConfig`], opens a browser context
//! through [`TabOperations`], injects the automation surface, replays every
//! data row by sending step commands over the command channel, aggregates
//! per-row results into a [`TestRun`], and persists the run best-effort
//! through [`RunStorage`]. Only one run may be active per orchestrator
//! instance; pause and stop are cooperative and observed at step and row
//! boundaries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::control::RunControl;
use crate::events::EventBus;
use crate::executor::{
    substituted_value, DataRow, FieldMapping, Step, StepRecord, StepStatus, Substitution,
};
use crate::result::{RepetirError, RepetirResult};

/// Sleep granularity while paused
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Everything needed to run one data-driven test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    /// Owning project reference
    pub project_id: String,
    /// Page the browser context opens on
    pub target_url: String,
    /// Recorded steps to replay per row
    pub steps: Vec<Step>,
    /// Data rows; an empty list replays the steps once with recorded values
    pub data_rows: Vec<DataRow>,
    /// Column-to-step mappings
    pub field_mappings: Vec<FieldMapping>,
    /// Fixed delay after each step
    #[serde(default)]
    pub step_delay: Duration,
    /// Whether a failed step aborts the remaining steps of its row
    pub continue_on_error: bool,
}

impl TestConfig {
    /// Create a config for a step list with no data rows
    #[must_use]
    pub fn new(project_id: impl Into<String>, target_url: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            project_id: project_id.into(),
            target_url: target_url.into(),
            steps,
            data_rows: Vec::new(),
            field_mappings: Vec::new(),
            step_delay: Duration::ZERO,
            continue_on_error: true,
        }
    }

    /// Attach data rows
    #[must_use]
    pub fn with_data_rows(mut self, rows: Vec<DataRow>) -> Self {
        self.data_rows = rows;
        self
    }

    /// Attach field mappings
    #[must_use]
    pub fn with_field_mappings(mut self, mappings: Vec<FieldMapping>) -> Self {
        self.field_mappings = mappings;
        self
    }

    /// Set the per-step delay
    #[must_use]
    pub const fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Set the error policy
    #[must_use]
    pub const fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Check the config before any side effect takes place.
    ///
    /// # Errors
    ///
    /// Returns [`RepetirError::ConfigError`] when the project id is empty,
    /// the target url is empty, or the step list is empty.
    pub fn validate(&self) -> RepetirResult<()> {
        if self.project_id.trim().is_empty() {
            return Err(RepetirError::ConfigError {
                message: "project id is required".to_string(),
            });
        }
        if self.target_url.trim().is_empty() {
            return Err(RepetirError::ConfigError {
                message: "target url is required".to_string(),
            });
        }
        if self.steps.is_empty() {
            return Err(RepetirError::ConfigError {
                message: "at least one step is required".to_string(),
            });
        }
        Ok(())
    }
}

/// Opaque handle to an open browser context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub String);

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of one step command sent over the tab channel.
///
/// A result value, not an error: command failures are recorded per step and
/// the run continues per policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandOutcome {
    /// The command was delivered and executed; the flag is the step verdict
    Completed(bool),
    /// The command was delivered but no response arrived in time
    TimedOut,
    /// The command could not be delivered
    TransportError(String),
}

/// Browser tab collaborator: context lifecycle and the step command channel.
#[async_trait]
pub trait TabOperations: Send + Sync {
    /// Open a browser context on the given url
    async fn open_context(&self, url: &str) -> RepetirResult<ContextId>;

    /// Close a previously opened context
    async fn close_context(&self, context: &ContextId) -> RepetirResult<()>;

    /// Install the in-page automation surface the step commands talk to
    async fn inject_automation_surface(&self, context: &ContextId) -> RepetirResult<()>;

    /// Send one step command and await its verdict
    async fn send_step_command(
        &self,
        context: &ContextId,
        step: &Step,
        value: Option<&str>,
    ) -> CommandOutcome;
}

/// Persistence collaborator for finished runs. Saving is best-effort: the
/// orchestrator logs and swallows storage failures.
#[async_trait]
pub trait RunStorage: Send + Sync {
    /// Persist a finalized test run
    async fn save_test_run(&self, run: &TestRun) -> RepetirResult<()>;
}

/// Lifecycle status of a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Created, not started
    Pending,
    /// In progress
    Running,
    /// Every row passed
    Passed,
    /// At least one row failed
    Failed,
    /// Ended early by a cooperative stop
    Stopped,
}

/// Record of one data row inside a [`TestRun`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowResult {
    /// Row position in the data set
    pub row_index: usize,
    /// Whether every non-skipped step passed
    pub passed: bool,
    /// Per-step outcomes
    pub steps: Vec<StepRecord>,
}

/// Immutable record of one finished (or stopped) test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRun {
    /// Run identifier
    pub id: Uuid,
    /// Owning project reference
    pub project_id: String,
    /// Terminal status
    pub status: RunStatus,
    /// Per-row results in execution order
    pub rows: Vec<RowResult>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run reached its terminal state
    pub finished_at: Option<DateTime<Utc>>,
}

/// Aggregate counters for a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Rows attempted
    pub rows_total: usize,
    /// Rows where every non-skipped step passed
    pub rows_passed: usize,
    /// Steps that completed successfully
    pub steps_passed: usize,
    /// Steps that failed to complete
    pub steps_failed: usize,
    /// Input steps skipped for lack of mapped data
    pub steps_skipped: usize,
}

/// Final verdict of [`Orchestrator::run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Whether the run finished with every row passed
    pub success: bool,
    /// Whether the run ended early by a cooperative stop
    pub was_stopped: bool,
    /// Total wall time
    pub duration: Duration,
    /// Aggregate counters
    pub stats: RunStats,
    /// Full per-row record, already persisted best-effort
    pub test_run: TestRun,
}

/// Point-in-time view of a run, queryable at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    /// Current status
    pub status: RunStatus,
    /// Rows finished so far
    pub completed_rows: usize,
    /// Total rows planned
    pub total_rows: usize,
    /// Steps finished so far (across rows)
    pub completed_steps: usize,
    /// Total steps planned (rows × steps)
    pub total_steps: usize,
    /// Completion percentage, 0–100
    pub percent: u8,
    /// When the current run started
    pub started_at: Option<DateTime<Utc>>,
}

impl Default for RunProgress {
    fn default() -> Self {
        Self {
            status: RunStatus::Pending,
            completed_rows: 0,
            total_rows: 0,
            completed_steps: 0,
            total_steps: 0,
            percent: 0,
            started_at: None,
        }
    }
}

/// Lifecycle notifications emitted during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    /// The run passed validation and opened its context
    RunStarted {
        /// Run identifier
        run_id: Uuid,
    },
    /// A data row is about to replay
    RowStarted {
        /// Row position
        row_index: usize,
    },
    /// A step command is about to be sent
    StepStarted {
        /// Row position
        row_index: usize,
        /// Step position within the row
        step_index: usize,
    },
    /// A step command finished (either verdict)
    StepCompleted {
        /// Row position
        row_index: usize,
        /// Step position within the row
        step_index: usize,
        /// Step verdict
        passed: bool,
    },
    /// A data row finished replaying
    RowCompleted {
        /// Row position
        row_index: usize,
        /// Whether every non-skipped step passed
        passed: bool,
    },
    /// The completion counters advanced
    Progress {
        /// Point-in-time view of the run
        snapshot: RunProgress,
    },
    /// The run reached a terminal status
    RunFinished {
        /// Terminal status
        status: RunStatus,
    },
}

/// Clears the active flag when a run ends, on every exit path.
struct ActiveGuard<'a>(&'a AtomicBool);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives data-driven test runs against the tab and storage collaborators.
pub struct Orchestrator {
    active: AtomicBool,
    events: EventBus<OrchestratorEvent>,
    progress: Mutex<RunProgress>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("active", &self.active.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    /// Create an idle orchestrator
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            events: EventBus::new(),
            progress: Mutex::new(RunProgress::default()),
        }
    }

    /// Event bus for run lifecycle notifications
    #[must_use]
    pub fn events(&self) -> &EventBus<OrchestratorEvent> {
        &self.events
    }

    /// Snapshot of the current run's progress
    #[must_use]
    pub fn progress(&self) -> RunProgress {
        self.progress.lock().expect("progress lock poisoned").clone()
    }

    fn update_progress(&self, update: impl FnOnce(&mut RunProgress)) -> RunProgress {
        let mut progress = self.progress.lock().expect("progress lock poisoned");
        update(&mut progress);
        progress.percent = if progress.total_steps == 0 {
            0
        } else {
            let pct = progress.completed_steps * 100 / progress.total_steps;
            u8::try_from(pct.min(100)).unwrap_or(100)
        };
        progress.clone()
    }

    /// Advance the completion counters and push the new snapshot to
    /// subscribers.
    fn advance_progress(&self, update: impl FnOnce(&mut RunProgress)) {
        let snapshot = self.update_progress(update);
        self.events.emit(&OrchestratorEvent::Progress { snapshot });
    }

    /// Run a data-driven test to completion.
    ///
    /// Validation happens before any side effect. Opening the context or
    /// injecting the automation surface may fail; either aborts the run with
    /// `success: false` after closing whatever was opened. Only one run may
    /// be active at a time; the loser of a concurrent start gets
    /// [`RepetirError::AlreadyActive`].
    ///
    /// # Errors
    ///
    /// Returns [`RepetirError::ConfigError`] for an invalid config and
    /// [`RepetirError::AlreadyActive`] when a run is already in progress.
    pub async fn run(
        &self,
        config: &TestConfig,
        tabs: &dyn TabOperations,
        storage: &dyn RunStorage,
        control: &RunControl,
    ) -> RepetirResult<RunResult> {
        config.validate()?;
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RepetirError::AlreadyActive {
                message: "a test run is already in progress".to_string(),
            });
        }
        let _guard = ActiveGuard(&self.active);

        let start = Instant::now();
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        // An empty data set still replays the steps once.
        let row_count = config.data_rows.len().max(1);

        self.update_progress(|p| {
            *p = RunProgress {
                status: RunStatus::Running,
                total_rows: row_count,
                total_steps: row_count * config.steps.len(),
                started_at: Some(started_at),
                ..RunProgress::default()
            };
        });

        let mut test_run = TestRun {
            id: run_id,
            project_id: config.project_id.clone(),
            status: RunStatus::Running,
            rows: Vec::with_capacity(row_count),
            started_at,
            finished_at: None,
        };

        tracing::info!(
            target: "repetir::orchestrator",
            %run_id,
            project_id = %config.project_id,
            rows = row_count,
            steps = config.steps.len(),
            "run starting"
        );

        let context = match self.open_session(config, tabs).await {
            Ok(context) => context,
            Err(error) => {
                tracing::error!(target: "repetir::orchestrator", %error, "session setup failed");
                return Ok(self.finalize(test_run, RunStatus::Failed, start, storage).await);
            }
        };
        self.events.emit(&OrchestratorEvent::RunStarted { run_id });

        let (status, rows) = self.replay_rows(config, tabs, &context, control).await;

        if let Err(error) = tabs.close_context(&context).await {
            tracing::warn!(target: "repetir::orchestrator", %error, "context close failed");
        }

        test_run.rows = rows;
        Ok(self.finalize(test_run, status, start, storage).await)
    }

    async fn open_session(
        &self,
        config: &TestConfig,
        tabs: &dyn TabOperations,
    ) -> RepetirResult<ContextId> {
        let context = tabs.open_context(&config.target_url).await?;
        if let Err(error) = tabs.inject_automation_surface(&context).await {
            // The context is open but unusable; close it before aborting.
            if let Err(close_error) = tabs.close_context(&context).await {
                tracing::warn!(
                    target: "repetir::orchestrator",
                    %close_error,
                    "context close failed after injection failure"
                );
            }
            return Err(error);
        }
        Ok(context)
    }

    async fn replay_rows(
        &self,
        config: &TestConfig,
        tabs: &dyn TabOperations,
        context: &ContextId,
        control: &RunControl,
    ) -> (RunStatus, Vec<RowResult>) {
        let empty_row = DataRow::new();
        let rows: Vec<&DataRow> = if config.data_rows.is_empty() {
            vec![&empty_row]
        } else {
            config.data_rows.iter().collect()
        };
        let substitute = !config.data_rows.is_empty();

        let mut results = Vec::with_capacity(rows.len());
        let mut any_failed = false;
        let mut stopped = false;

        for (row_index, row) in rows.into_iter().enumerate() {
            if control.cancel_token().is_cancelled() {
                stopped = true;
                break;
            }
            self.events.emit(&OrchestratorEvent::RowStarted { row_index });
            tracing::info!(target: "repetir::orchestrator", row_index, "row started");

            let (row_stopped, records) = self
                .replay_one_row(config, tabs, context, row, row_index, substitute, control)
                .await;
            let passed = records
                .iter()
                .all(|r| r.status != StepStatus::Failed);
            if !passed {
                any_failed = true;
            }
            self.events.emit(&OrchestratorEvent::RowCompleted { row_index, passed });
            self.advance_progress(|p| p.completed_rows += 1);
            results.push(RowResult {
                row_index,
                passed,
                steps: records,
            });

            if row_stopped {
                stopped = true;
                break;
            }
            if !passed && !config.continue_on_error {
                break;
            }
        }

        let status = if stopped {
            RunStatus::Stopped
        } else if any_failed {
            RunStatus::Failed
        } else {
            RunStatus::Passed
        };
        (status, results)
    }

    #[allow(clippy::too_many_arguments)]
    async fn replay_one_row(
        &self,
        config: &TestConfig,
        tabs: &dyn TabOperations,
        context: &ContextId,
        row: &DataRow,
        row_index: usize,
        substitute: bool,
        control: &RunControl,
    ) -> (bool, Vec<StepRecord>) {
        let mut records = Vec::with_capacity(config.steps.len());

        for step in &config.steps {
            if control.cancel_token().is_cancelled() {
                return (true, records);
            }
            if self.wait_while_paused(control).await {
                return (true, records);
            }

            let substitution = if substitute {
                substituted_value(step, row, &config.field_mappings)
            } else {
                Substitution::Keep
            };
            let value = match substitution {
                Substitution::Value(v) => Some(v),
                Substitution::Keep => step.value.clone(),
                Substitution::Skip => {
                    records.push(StepRecord {
                        index: step.index,
                        label: step.label.clone(),
                        status: StepStatus::Skipped,
                        duration: Duration::ZERO,
                        error: None,
                    });
                    self.advance_progress(|p| p.completed_steps += 1);
                    continue;
                }
            };

            self.events.emit(&OrchestratorEvent::StepStarted {
                row_index,
                step_index: step.index,
            });
            let step_start = Instant::now();
            let outcome = tabs.send_step_command(context, step, value.as_deref()).await;
            let (status, error) = match outcome {
                CommandOutcome::Completed(true) => (StepStatus::Passed, None),
                CommandOutcome::Completed(false) => {
                    (StepStatus::Failed, Some("step reported failure".to_string()))
                }
                CommandOutcome::TimedOut => {
                    (StepStatus::Failed, Some("step command timed out".to_string()))
                }
                CommandOutcome::TransportError(message) => (StepStatus::Failed, Some(message)),
            };
            let passed = status == StepStatus::Passed;
            if let Some(error) = &error {
                tracing::warn!(
                    target: "repetir::orchestrator",
                    row_index,
                    step_index = step.index,
                    %error,
                    "step failed"
                );
            }
            self.events.emit(&OrchestratorEvent::StepCompleted {
                row_index,
                step_index: step.index,
                passed,
            });
            self.advance_progress(|p| p.completed_steps += 1);
            records.push(StepRecord {
                index: step.index,
                label: step.label.clone(),
                status,
                duration: step_start.elapsed(),
                error,
            });

            if !passed && !config.continue_on_error {
                return (false, records);
            }
            if !config.step_delay.is_zero() {
                tokio::time::sleep(config.step_delay).await;
            }
        }

        (false, records)
    }

    /// Block at a step boundary while paused. Returns `true` if cancellation
    /// arrived while waiting.
    async fn wait_while_paused(&self, control: &RunControl) -> bool {
        while control.pause_token().is_paused() {
            if control.cancel_token().is_cancelled() {
                return true;
            }
            tokio::time::sleep(PAUSE_POLL_INTERVAL).await;
        }
        control.cancel_token().is_cancelled()
    }

    async fn finalize(
        &self,
        mut test_run: TestRun,
        status: RunStatus,
        start: Instant,
        storage: &dyn RunStorage,
    ) -> RunResult {
        test_run.status = status;
        test_run.finished_at = Some(Utc::now());

        let stats = aggregate_stats(&test_run.rows);
        self.update_progress(|p| p.status = status);
        self.events.emit(&OrchestratorEvent::RunFinished { status });
        tracing::info!(
            target: "repetir::orchestrator",
            run_id = %test_run.id,
            ?status,
            rows_passed = stats.rows_passed,
            rows_total = stats.rows_total,
            "run finished"
        );

        // Persistence is best-effort: a storage failure never fails the run.
        if let Err(error) = storage.save_test_run(&test_run).await {
            tracing::warn!(target: "repetir::orchestrator", %error, "run save failed");
        }

        RunResult {
            success: status == RunStatus::Passed,
            was_stopped: status == RunStatus::Stopped,
            duration: start.elapsed(),
            stats,
            test_run,
        }
    }
}

fn aggregate_stats(rows: &[RowResult]) -> RunStats {
    let mut stats = RunStats {
        rows_total: rows.len(),
        ..RunStats::default()
    };
    for row in rows {
        if row.passed {
            stats.rows_passed += 1;
        }
        for step in &row.steps {
            match step.status {
                StepStatus::Passed => stats.steps_passed += 1,
                StepStatus::Failed => stats.steps_failed += 1,
                StepStatus::Skipped => stats.steps_skipped += 1,
            }
        }
    }
    stats
}
