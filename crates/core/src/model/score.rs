use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::exam::Question;
use crate::model::ids::{OptionId, QuestionId};

/// Per-attempt tally produced at submission time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub correct_count: u32,
    pub incorrect_count: u32,
    pub unanswered_count: u32,
    pub total_points: u64,
    pub earned_points: u64,
}

impl ScoreBreakdown {
    /// Tally `answers` against the question list.
    ///
    /// An answer only counts as correct when the chosen id names an option of
    /// that same question whose `is_correct` flag is set. Unknown option ids
    /// are still "answered" but never correct.
    #[must_use]
    pub fn tally(questions: &[Question], answers: &BTreeMap<QuestionId, OptionId>) -> Self {
        let mut out = Self::default();
        let mut answered = 0_u32;

        for question in questions {
            let points = u64::from(question.effective_points());
            out.total_points += points;

            let Some(chosen) = answers.get(&question.id) else {
                continue;
            };
            answered = answered.saturating_add(1);

            if question.option(*chosen).is_some_and(|o| o.is_correct) {
                out.earned_points += points;
                out.correct_count = out.correct_count.saturating_add(1);
            }
        }

        let question_count = u32::try_from(questions.len()).unwrap_or(u32::MAX);
        out.incorrect_count = answered - out.correct_count;
        out.unanswered_count = question_count.saturating_sub(answered);
        out
    }

    /// Number of questions that had an answer recorded.
    #[must_use]
    pub fn answered_count(&self) -> u32 {
        self.correct_count + self.incorrect_count
    }

    /// Percentage score in `0..=100`, rounded half up. Zero when no points exist.
    #[must_use]
    pub fn score(&self) -> u8 {
        percent_half_up(self.earned_points, self.total_points)
    }
}

/// `round(100 * numer / denom)` with halves rounded up, using integer math.
///
/// Returns 0 when `denom` is 0.
#[must_use]
pub fn percent_half_up(numer: u64, denom: u64) -> u8 {
    if denom == 0 {
        return 0;
    }
    let scaled = u128::from(numer) * 200 + u128::from(denom);
    let pct = scaled / (u128::from(denom) * 2);
    u8::try_from(pct.min(100)).unwrap_or(100)
}
