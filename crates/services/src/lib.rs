#![forbid(unsafe_code)]

pub mod error;
pub mod exams;

pub use exam_core::Clock;

pub use error::ExamServiceError;

pub use exams::{
    AttemptProgress, AttemptStatus, ExamAttempt, ExamContentService, ExamHistory,
    ExamHistoryService, ExamLoopService, ExamSessionEngine, Persistence, SubmissionOutcome,
};
