use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::model::exam::DEFAULT_PASSING_SCORE;
use crate::model::ids::{ExamId, OptionId, QuestionId, StudentId};
use crate::model::score::percent_half_up;

/// Historical record of one finalized exam attempt.
///
/// Created once per submission and never mutated afterwards; each retake
/// produces a separate record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamResult {
    pub exam_id: ExamId,
    pub student_id: StudentId,
    pub score: u8,
    pub submitted_at: DateTime<Utc>,
    pub time_taken_secs: u32,
    pub answers: BTreeMap<QuestionId, OptionId>,
}

impl ExamResult {
    /// Whether this attempt meets `passing_score`, or the default of 60 when unset.
    #[must_use]
    pub fn passed(&self, passing_score: Option<u8>) -> bool {
        passed(self, passing_score)
    }
}

/// Highest score among `results`; 0 when there are none.
#[must_use]
pub fn highest_score(results: &[ExamResult]) -> u8 {
    results.iter().map(|r| r.score).max().unwrap_or(0)
}

/// The most recently submitted result.
///
/// Does not rely on input order. Ties keep the earliest entry in the slice.
#[must_use]
pub fn latest_result(results: &[ExamResult]) -> Option<&ExamResult> {
    results.iter().reduce(|best, r| {
        if r.submitted_at > best.submitted_at {
            r
        } else {
            best
        }
    })
}

/// Mean score rounded half up; 0 when there are none.
#[must_use]
pub fn average_score(results: &[ExamResult]) -> u8 {
    let sum: u64 = results.iter().map(|r| u64::from(r.score)).sum();
    let count = u64::try_from(results.len()).unwrap_or(u64::MAX);
    if count == 0 {
        return 0;
    }
    let doubled = sum * 2 + count;
    u8::try_from(doubled / (count * 2)).unwrap_or(100)
}

/// `result.score >= passing_score`, defaulting the threshold to 60.
#[must_use]
pub fn passed(result: &ExamResult, passing_score: Option<u8>) -> bool {
    result.score >= passing_score.unwrap_or(DEFAULT_PASSING_SCORE)
}

/// Cross-exam statistics for a single learner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LearnerStats {
    /// Number of recorded attempts, retakes included.
    pub total_exams_taken: u32,
    /// Number of distinct exams attempted at least once.
    pub distinct_exams: u32,
    pub average_score: u8,
    /// Percent of attempts that pass at the default threshold.
    pub pass_rate: u8,
}

impl LearnerStats {
    #[must_use]
    pub fn from_results(results: &[ExamResult]) -> Self {
        let distinct: HashSet<ExamId> = results.iter().map(|r| r.exam_id).collect();
        Self {
            total_exams_taken: u32::try_from(results.len()).unwrap_or(u32::MAX),
            distinct_exams: u32::try_from(distinct.len()).unwrap_or(u32::MAX),
            average_score: average_score(results),
            pass_rate: pass_rate(results, None),
        }
    }
}

fn pass_rate(results: &[ExamResult], passing_score: Option<u8>) -> u8 {
    let passed_count = results.iter().filter(|r| r.passed(passing_score)).count();
    percent_half_up(
        u64::try_from(passed_count).unwrap_or(u64::MAX),
        u64::try_from(results.len()).unwrap_or(u64::MAX),
    )
}
