mod content;
mod engine;
mod history;
mod progress;
mod workflow;

// Public API of the exam subsystem.
pub use crate::error::ExamServiceError;
pub use content::ExamContentService;
pub use engine::{
    AttemptStatus, DEFAULT_TICK_PERIOD, ExamAttempt, ExamSessionEngine, MIN_TICK_PERIOD,
};
pub use history::{ExamHistory, ExamHistoryService};
pub use progress::AttemptProgress;
pub use workflow::{ExamLoopService, Persistence, SubmissionOutcome};
