//! Recording sessions: buffered capture, undo/redo, auto-save.
//!
//! The controller owns at most one active session. Incoming steps land in a
//! small buffer that is flushed into the session at a threshold and on stop,
//! so a burst of rapid interactions does not touch the session (or the
//! auto-save callback) per step. Undo and redo operate over flushed steps
//! only, each side bounded to a fixed depth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bundle::LocatorBundle;
use crate::events::EventBus;
use crate::executor::{Step, StepEvent};
use crate::result::{RepetirError, RepetirResult};

/// Buffered steps are flushed into the session at this count
pub const BUFFER_FLUSH_THRESHOLD: usize = 5;

/// Maximum number of flushed steps that can be undone
const UNDO_DEPTH: usize = 50;

/// Maximum redo depth retained after undos
const REDO_DEPTH: usize = 50;

/// Lifecycle state of the recording controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No session active
    Idle,
    /// Steps are being captured
    Recording,
    /// Session open but capture suspended
    Paused,
}

/// Browser environment captured when a session starts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Recording browser's user agent string
    pub user_agent: String,
    /// Viewport width in pixels
    pub viewport_width: u32,
    /// Viewport height in pixels
    pub viewport_height: u32,
}

/// One recording session and everything captured in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSession {
    /// Session identifier
    pub id: Uuid,
    /// Flushed steps, in capture order
    pub steps: Vec<Step>,
    /// Environment captured at start
    pub metadata: SessionMetadata,
    /// Current lifecycle state
    pub state: RecordingState,
    /// When the session started
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

/// Idempotent snapshot of the controller's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingStats {
    /// Active session id, if any
    pub session_id: Option<Uuid>,
    /// Controller state
    pub state: RecordingState,
    /// Flushed steps in the session
    pub flushed_steps: usize,
    /// Steps waiting in the buffer
    pub buffered_steps: usize,
    /// Steps available to undo
    pub undoable_steps: usize,
    /// Steps available to redo
    pub redoable_steps: usize,
}

/// Controller lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    /// A session opened
    SessionStarted {
        /// Session identifier
        session_id: Uuid,
    },
    /// A step was accepted into the buffer
    StepRecorded {
        /// Step identifier
        step_id: Uuid,
    },
    /// The buffer was flushed into the session
    BufferFlushed {
        /// Steps moved out of the buffer
        count: usize,
    },
    /// A session finished and was finalized
    SessionStopped {
        /// Session identifier
        session_id: Uuid,
        /// Total steps captured
        step_count: usize,
    },
    /// A session was discarded without finalizing
    SessionCancelled {
        /// Session identifier
        session_id: Uuid,
    },
}

/// Tuning knobs for the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecorderOptions {
    /// Buffer size at which steps are flushed into the session
    pub buffer_flush_threshold: usize,
    /// Hard cap on steps per session; `None` means unlimited
    pub max_steps_per_session: Option<usize>,
    /// Invoke the auto-save callback every N recorded steps; `None` disables
    pub auto_save_every: Option<u32>,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            buffer_flush_threshold: BUFFER_FLUSH_THRESHOLD,
            max_steps_per_session: None,
            auto_save_every: None,
        }
    }
}

impl RecorderOptions {
    /// Create options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the buffer flush threshold
    #[must_use]
    pub const fn with_buffer_flush_threshold(mut self, threshold: usize) -> Self {
        self.buffer_flush_threshold = threshold;
        self
    }

    /// Cap the number of steps per session
    #[must_use]
    pub const fn with_max_steps_per_session(mut self, max: usize) -> Self {
        self.max_steps_per_session = Some(max);
        self
    }

    /// Fire the auto-save callback every `every` recorded steps
    #[must_use]
    pub const fn with_auto_save_every(mut self, every: u32) -> Self {
        self.auto_save_every = Some(every);
        self
    }
}

type SaveCallback = Box<dyn Fn(&RecordingSession) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&RepetirError) + Send + Sync>;

/// Captures interaction steps into at most one active session.
pub struct RecordingController {
    options: RecorderOptions,
    session: Option<RecordingSession>,
    buffer: Vec<Step>,
    redo_stack: Vec<Step>,
    events: EventBus<RecorderEvent>,
    on_auto_save: Option<SaveCallback>,
    on_error: Option<ErrorCallback>,
    steps_since_save: u32,
    limit_reached: bool,
    // Flushed steps still undoable, never above UNDO_DEPTH
    undo_budget: usize,
}

impl std::fmt::Debug for RecordingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingController")
            .field("options", &self.options)
            .field("state", &self.state())
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

impl Default for RecordingController {
    fn default() -> Self {
        Self::new(RecorderOptions::default())
    }
}

impl RecordingController {
    /// Create an idle controller
    #[must_use]
    pub fn new(options: RecorderOptions) -> Self {
        Self {
            options,
            session: None,
            buffer: Vec::new(),
            redo_stack: Vec::new(),
            events: EventBus::new(),
            on_auto_save: None,
            on_error: None,
            steps_since_save: 0,
            limit_reached: false,
            undo_budget: 0,
        }
    }

    /// Event bus for controller lifecycle notifications
    #[must_use]
    pub fn events(&self) -> &EventBus<RecorderEvent> {
        &self.events
    }

    /// Install the periodic auto-save callback
    pub fn on_auto_save<F>(&mut self, callback: F)
    where
        F: Fn(&RecordingSession) + Send + Sync + 'static,
    {
        self.on_auto_save = Some(Box::new(callback));
    }

    /// Install the error callback (session limit, etc.)
    pub fn on_error<F>(&mut self, callback: F)
    where
        F: Fn(&RepetirError) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(callback));
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> RecordingState {
        self.session
            .as_ref()
            .map_or(RecordingState::Idle, |s| s.state)
    }

    /// Borrow the active session, if any
    #[must_use]
    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    /// Open a new session and begin capturing.
    ///
    /// # Errors
    ///
    /// Returns [`RepetirError::AlreadyActive`] if a session is already open.
    pub fn start(&mut self, metadata: SessionMetadata) -> RepetirResult<Uuid> {
        if self.session.is_some() {
            return Err(RepetirError::AlreadyActive {
                message: "a recording session is already active".to_string(),
            });
        }
        let now = Utc::now();
        let id = Uuid::new_v4();
        self.session = Some(RecordingSession {
            id,
            steps: Vec::new(),
            metadata,
            state: RecordingState::Recording,
            created_at: now,
            updated_at: now,
        });
        self.buffer.clear();
        self.redo_stack.clear();
        self.steps_since_save = 0;
        self.limit_reached = false;
        self.undo_budget = 0;
        tracing::info!(target: "repetir::recorder", session_id = %id, "recording started");
        self.events.emit(&RecorderEvent::SessionStarted { session_id: id });
        Ok(id)
    }

    /// Capture one step. Valid only while recording.
    ///
    /// The step lands in the buffer and is flushed into the session when the
    /// buffer reaches its threshold. Recording clears the redo history.
    ///
    /// # Errors
    ///
    /// Returns [`RepetirError::InvalidState`] when no session is recording
    /// and [`RepetirError::SessionLimit`] once the session cap is reached
    /// (the error callback fires on the first rejection).
    pub fn record_step(
        &mut self,
        event: StepEvent,
        label: impl Into<String>,
        value: Option<String>,
        bundle: LocatorBundle,
    ) -> RepetirResult<Uuid> {
        if self.state() != RecordingState::Recording {
            return Err(RepetirError::InvalidState {
                message: format!("cannot record a step while {:?}", self.state()),
            });
        }
        if let Some(max) = self.options.max_steps_per_session {
            let total = self.total_steps();
            if total >= max {
                let error = RepetirError::SessionLimit { max };
                if !self.limit_reached {
                    self.limit_reached = true;
                    tracing::warn!(target: "repetir::recorder", max, "session step limit reached");
                    if let Some(on_error) = &self.on_error {
                        on_error(&error);
                    }
                }
                return Err(error);
            }
        }

        let index = self.total_steps();
        let mut step = Step::new(index, event, label, bundle);
        step.value = value;
        let step_id = step.id;
        self.buffer.push(step);
        self.redo_stack.clear();
        self.touch();
        self.events.emit(&RecorderEvent::StepRecorded { step_id });

        if self.buffer.len() >= self.options.buffer_flush_threshold {
            self.flush_buffer();
        }
        self.tick_auto_save();
        Ok(step_id)
    }

    /// Suspend capture without closing the session.
    ///
    /// # Errors
    ///
    /// Returns [`RepetirError::InvalidState`] unless currently recording.
    pub fn pause(&mut self) -> RepetirResult<()> {
        match self.session.as_mut() {
            Some(session) if session.state == RecordingState::Recording => {
                session.state = RecordingState::Paused;
                session.updated_at = Utc::now();
                tracing::info!(target: "repetir::recorder", "recording paused");
                Ok(())
            }
            _ => Err(RepetirError::InvalidState {
                message: "no recording in progress to pause".to_string(),
            }),
        }
    }

    /// Resume capture after a pause.
    ///
    /// # Errors
    ///
    /// Returns [`RepetirError::InvalidState`] unless currently paused.
    pub fn resume(&mut self) -> RepetirResult<()> {
        match self.session.as_mut() {
            Some(session) if session.state == RecordingState::Paused => {
                session.state = RecordingState::Recording;
                session.updated_at = Utc::now();
                tracing::info!(target: "repetir::recorder", "recording resumed");
                Ok(())
            }
            _ => Err(RepetirError::InvalidState {
                message: "no paused recording to resume".to_string(),
            }),
        }
    }

    /// Close the session, flushing the buffer, and return the finalized
    /// session with every step indexed in capture order.
    ///
    /// # Errors
    ///
    /// Returns [`RepetirError::InvalidState`] when no session is open.
    pub fn stop(&mut self) -> RepetirResult<RecordingSession> {
        if self.session.is_none() {
            return Err(RepetirError::InvalidState {
                message: "no recording session to stop".to_string(),
            });
        }
        self.flush_buffer();
        let mut session = self.session.take().expect("session checked above");
        session.state = RecordingState::Idle;
        session.updated_at = Utc::now();
        reindex(&mut session.steps);
        self.redo_stack.clear();
        tracing::info!(
            target: "repetir::recorder",
            session_id = %session.id,
            steps = session.steps.len(),
            "recording stopped"
        );
        self.events.emit(&RecorderEvent::SessionStopped {
            session_id: session.id,
            step_count: session.steps.len(),
        });
        Ok(session)
    }

    /// Discard the session and everything captured in it.
    ///
    /// # Errors
    ///
    /// Returns [`RepetirError::InvalidState`] when no session is open.
    pub fn cancel(&mut self) -> RepetirResult<()> {
        let Some(session) = self.session.take() else {
            return Err(RepetirError::InvalidState {
                message: "no recording session to cancel".to_string(),
            });
        };
        self.buffer.clear();
        self.redo_stack.clear();
        tracing::info!(target: "repetir::recorder", session_id = %session.id, "recording cancelled");
        self.events.emit(&RecorderEvent::SessionCancelled { session_id: session.id });
        Ok(())
    }

    /// Remove the most recently flushed step, making it available for redo.
    /// Returns `None` when there is nothing to undo; at most the last
    /// `UNDO_DEPTH` flushed steps are undoable.
    pub fn undo(&mut self) -> Option<Step> {
        if self.undo_budget == 0 {
            return None;
        }
        let session = self.session.as_mut()?;
        let step = session.steps.pop()?;
        self.undo_budget -= 1;
        if self.redo_stack.len() == REDO_DEPTH {
            self.redo_stack.remove(0);
        }
        self.redo_stack.push(step.clone());
        reindex(&mut session.steps);
        session.updated_at = Utc::now();
        Some(step)
    }

    /// Re-append the most recently undone step. Returns `None` when the redo
    /// history is empty.
    pub fn redo(&mut self) -> Option<Step> {
        let session = self.session.as_mut()?;
        let mut step = self.redo_stack.pop()?;
        step.index = session.steps.len();
        session.steps.push(step.clone());
        session.updated_at = Utc::now();
        self.undo_budget = (self.undo_budget + 1).min(UNDO_DEPTH);
        Some(step)
    }

    /// Remove a step by id from the session or buffer. Returns the removed
    /// step, or `None` for an unknown id.
    pub fn delete_step(&mut self, id: Uuid) -> Option<Step> {
        if let Some(pos) = self.buffer.iter().position(|s| s.id == id) {
            let step = self.buffer.remove(pos);
            self.touch();
            return Some(step);
        }
        let session = self.session.as_mut()?;
        let pos = session.steps.iter().position(|s| s.id == id)?;
        let step = session.steps.remove(pos);
        reindex(&mut session.steps);
        session.updated_at = Utc::now();
        let remaining = session.steps.len();
        self.undo_budget = self.undo_budget.min(remaining);
        Some(step)
    }

    /// Modify a step in place by id. Returns `false` for an unknown id.
    pub fn update_step(&mut self, id: Uuid, update: impl FnOnce(&mut Step)) -> bool {
        if let Some(step) = self.buffer.iter_mut().find(|s| s.id == id) {
            update(step);
            self.touch();
            return true;
        }
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        let Some(step) = session.steps.iter_mut().find(|s| s.id == id) else {
            return false;
        };
        update(step);
        session.updated_at = Utc::now();
        true
    }

    /// Snapshot the controller's counters. Calling this never mutates state;
    /// repeated calls return equal values.
    #[must_use]
    pub fn get_stats(&self) -> RecordingStats {
        RecordingStats {
            session_id: self.session.as_ref().map(|s| s.id),
            state: self.state(),
            flushed_steps: self.session.as_ref().map_or(0, |s| s.steps.len()),
            buffered_steps: self.buffer.len(),
            undoable_steps: self.undo_budget,
            redoable_steps: self.redo_stack.len(),
        }
    }

    fn total_steps(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.steps.len()) + self.buffer.len()
    }

    fn flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let count = self.buffer.len();
        session.steps.append(&mut self.buffer);
        reindex(&mut session.steps);
        session.updated_at = Utc::now();
        self.undo_budget = (self.undo_budget + count).min(UNDO_DEPTH);
        tracing::debug!(target: "repetir::recorder", count, "buffer flushed");
        self.events.emit(&RecorderEvent::BufferFlushed { count });
    }

    /// Count recorded steps toward the auto-save interval; when it elapses,
    /// flush and hand a snapshot to the callback.
    fn tick_auto_save(&mut self) {
        let Some(every) = self.options.auto_save_every else {
            return;
        };
        self.steps_since_save += 1;
        if self.steps_since_save < every {
            return;
        }
        self.steps_since_save = 0;
        self.flush_buffer();
        if let (Some(callback), Some(session)) = (&self.on_auto_save, &self.session) {
            tracing::debug!(target: "repetir::recorder", session_id = %session.id, "auto-save");
            callback(session);
        }
    }

    fn touch(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.updated_at = Utc::now();
        }
    }
}

fn reindex(steps: &mut [Step]) {
    for (index, step) in steps.iter_mut().enumerate() {
        step.index = index;
    }
}
