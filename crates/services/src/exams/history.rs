use std::sync::Arc;

use exam_core::model::{
    ExamId, ExamResult, LearnerStats, StudentId, average_score, highest_score, latest_result,
};
use storage::repository::{ExamResultRepository, ExamResultRow};

use crate::error::ExamServiceError;

/// One learner's record on one exam.
///
/// Presentation-agnostic: no pre-formatted strings, timestamps stay UTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamHistory {
    /// Every attempt, most recent first.
    pub attempts: Vec<ExamResultRow>,
    pub highest_score: u8,
    pub average_score: u8,
    pub latest: Option<ExamResult>,
    /// Whether the latest attempt met the passing score; `None` without attempts.
    pub latest_passed: Option<bool>,
}

/// Read-side aggregates over stored exam results.
#[derive(Clone)]
pub struct ExamHistoryService {
    results: Arc<dyn ExamResultRepository>,
}

impl ExamHistoryService {
    #[must_use]
    pub fn new(results: Arc<dyn ExamResultRepository>) -> Self {
        Self { results }
    }

    /// Attempts and aggregates for `student` on `exam`.
    ///
    /// `passing_score` falls back to the default threshold of 60 when `None`.
    ///
    /// # Errors
    ///
    /// Returns `ExamServiceError::Storage` if history cannot be read.
    pub async fn exam_history(
        &self,
        student: StudentId,
        exam: ExamId,
        passing_score: Option<u8>,
    ) -> Result<ExamHistory, ExamServiceError> {
        let attempts = self.results.results_for_exam(student, exam).await?;
        let results: Vec<ExamResult> = attempts.iter().map(|row| row.result.clone()).collect();
        let latest = latest_result(&results).cloned();

        Ok(ExamHistory {
            highest_score: highest_score(&results),
            average_score: average_score(&results),
            latest_passed: latest.as_ref().map(|r| r.passed(passing_score)),
            latest,
            attempts,
        })
    }

    /// Cross-exam statistics for `student`; zeroes when nothing is recorded.
    ///
    /// # Errors
    ///
    /// Returns `ExamServiceError::Storage` if history cannot be read.
    pub async fn learner_stats(&self, student: StudentId) -> Result<LearnerStats, ExamServiceError> {
        let rows = self.results.results_for_student(student).await?;
        let results: Vec<ExamResult> = rows.into_iter().map(|row| row.result).collect();
        Ok(LearnerStats::from_results(&results))
    }
}
