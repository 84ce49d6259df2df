mod exam;
mod ids;
mod result;
mod score;
mod session;

pub use exam::{
    AnswerOption, DEFAULT_DURATION_MINUTES, DEFAULT_PASSING_SCORE, Exam, ExamError, Question,
    TeacherContext,
};
pub use ids::{ExamId, OptionId, ParseIdError, QuestionId, StudentId};

pub use result::{ExamResult, LearnerStats, average_score, highest_score, latest_result, passed};
pub use score::{ScoreBreakdown, percent_half_up};
pub use session::{ExamSession, Lifecycle, SessionError, SubmittedAttempt, TickOutcome};
