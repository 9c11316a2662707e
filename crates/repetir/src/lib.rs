//! Repetir: Record-and-Replay Engine for Web Interactions
//!
//! Repetir (Spanish: "to repeat") captures user interactions as resilient
//! locator bundles and replays them later against a changed page, driving a
//! browser tab through pluggable collaborator traits instead of a bundled
//! browser.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     REPETIR Architecture                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌───────────┐   ┌───────────┐   ┌────────────┐  │
//! │  │ Recording │   │  Locator  │   │  Element  │   │   Step     │  │
//! │  │ Controller│──►│  Bundles  │──►│  Finder   │──►│  Executor  │  │
//! │  └───────────┘   └───────────┘   └───────────┘   └────────────┘  │
//! │        │                                               │         │
//! │        ▼                                               ▼         │
//! │  ┌───────────┐                                  ┌────────────┐   │
//! │  │ RunStorage│◄─────────────────────────────────│Orchestrator│   │
//! │  └───────────┘                                  └────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

/// Locator bundle capture and quality scoring
pub mod bundle;
/// Cooperative cancellation and pause tokens
pub mod control;
/// Document abstraction the builder and finder operate against
pub mod dom;
/// Ordered publish/subscribe for lifecycle events
pub mod events;
/// Step replay against a document
pub mod executor;
/// Bundle-to-element resolution with fallback strategies
pub mod finder;
/// Data-driven test runs over a browser tab collaborator
pub mod orchestrator;
/// Recording sessions with buffering, undo/redo and auto-save
pub mod recorder;
/// Error and result types
pub mod result;

// ============================================================================
// Public API Re-exports
// ============================================================================

pub use bundle::{
    quality_score, BuildOptions, BuildOutcome, BundleBuilder, LocatorBundle,
    DEFAULT_MAX_TEXT_LENGTH,
};
pub use control::{CancelToken, PauseToken, RunControl};
pub use dom::{
    classes_of, BoundingBox, DomDocument, ElementId, FrameAccess, MemoryDocument, MemoryElement,
    Point, ShadowAccess,
};
pub use events::{EventBus, Subscription};
pub use executor::{
    ActionDispatcher, DataRow, DispatchOutcome, ExecutorEvent, FieldMapping, RowRecord, RunState,
    RunSummary, Step, StepEvent, StepExecutor, StepRecord, StepStatus,
};
pub use finder::{
    normalized_similarity, ElementFinder, FailureReason, FindFailure, FindOptions, FindOutcome,
    Strategy, DEFAULT_BOUNDING_BOX_THRESHOLD, DEFAULT_FIND_TIMEOUT_MS, DEFAULT_FUZZY_THRESHOLD,
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_INTERVAL_MS,
};
pub use orchestrator::{
    CommandOutcome, ContextId, Orchestrator, OrchestratorEvent, RowResult, RunProgress, RunResult,
    RunStats, RunStatus, RunStorage, TabOperations, TestConfig, TestRun,
};
pub use recorder::{
    RecorderEvent, RecorderOptions, RecordingController, RecordingSession, RecordingState,
    RecordingStats, SessionMetadata, BUFFER_FLUSH_THRESHOLD,
};
pub use result::{RepetirError, RepetirResult};
