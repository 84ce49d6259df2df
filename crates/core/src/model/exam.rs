use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::model::ids::{ExamId, OptionId, QuestionId};

/// Duration applied when an exam has no positive `duration_minutes`.
pub const DEFAULT_DURATION_MINUTES: u32 = 30;

/// Passing threshold (percent) applied when an exam defines none.
pub const DEFAULT_PASSING_SCORE: u8 = 60;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// Content-authoring violations detected by [`Exam::validate`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExamError {
    #[error("exam title cannot be empty")]
    EmptyTitle,

    #[error("question {0} has empty text")]
    EmptyQuestionText(QuestionId),

    #[error("question {0} has no options")]
    NoOptions(QuestionId),

    #[error("question {0} has no correct option")]
    NoCorrectOption(QuestionId),

    #[error("question {question} has {count} correct options, expected exactly one")]
    MultipleCorrectOptions { question: QuestionId, count: usize },

    #[error("duplicate question id {0}")]
    DuplicateQuestion(QuestionId),

    #[error("duplicate option id {0}")]
    DuplicateOption(OptionId),

    #[error("passing score must be between 0 and 100, got {0}")]
    InvalidPassingScore(u8),
}

//
// ─── OPTION ────────────────────────────────────────────────────────────────────
//

/// One selectable answer of a [`Question`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub id: OptionId,
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl AnswerOption {
    #[must_use]
    pub fn new(id: OptionId, text: impl Into<String>, is_correct: bool) -> Self {
        Self {
            id,
            text: text.into(),
            is_correct,
            explanation: None,
        }
    }

    #[must_use]
    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

/// A single multiple-choice question.
///
/// `points` left unset counts as one point. An explicit `Some(0)` is kept as
/// zero so that all-zero exams score 0 instead of dividing by zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default)]
    pub options: Vec<AnswerOption>,
}

impl Question {
    #[must_use]
    pub fn new(id: QuestionId, text: impl Into<String>, options: Vec<AnswerOption>) -> Self {
        Self {
            id,
            text: text.into(),
            points: None,
            hint: None,
            options,
        }
    }

    #[must_use]
    pub fn with_points(mut self, points: u32) -> Self {
        self.points = Some(points);
        self
    }

    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Point value used for scoring.
    #[must_use]
    pub fn effective_points(&self) -> u32 {
        self.points.unwrap_or(1)
    }

    #[must_use]
    pub fn option(&self, id: OptionId) -> Option<&AnswerOption> {
        self.options.iter().find(|o| o.id == id)
    }
}

//
// ─── EXAM ──────────────────────────────────────────────────────────────────────
//

/// A named assessment with an ordered question list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exam {
    id: ExamId,
    title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    duration_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    passing_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    total_marks: Option<u32>,
    #[serde(default)]
    questions: Vec<Question>,
}

impl Exam {
    #[must_use]
    pub fn new(id: ExamId, title: impl Into<String>, questions: Vec<Question>) -> Self {
        Self {
            id,
            title: title.into(),
            subject: None,
            duration_minutes: None,
            passing_score: None,
            total_marks: None,
            questions,
        }
    }

    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    #[must_use]
    pub fn with_duration_minutes(mut self, minutes: u32) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }

    #[must_use]
    pub fn with_passing_score(mut self, percent: u8) -> Self {
        self.passing_score = Some(percent);
        self
    }

    #[must_use]
    pub fn with_total_marks(mut self, marks: u32) -> Self {
        self.total_marks = Some(marks);
        self
    }

    #[must_use]
    pub fn id(&self) -> ExamId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    #[must_use]
    pub fn duration_minutes(&self) -> Option<u32> {
        self.duration_minutes
    }

    #[must_use]
    pub fn passing_score(&self) -> Option<u8> {
        self.passing_score
    }

    #[must_use]
    pub fn total_marks(&self) -> Option<u32> {
        self.total_marks
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    /// Time budget for one attempt, in seconds.
    ///
    /// Falls back to [`DEFAULT_DURATION_MINUTES`] when the duration is unset or zero.
    #[must_use]
    pub fn time_budget_secs(&self) -> u32 {
        let minutes = match self.duration_minutes {
            Some(m) if m > 0 => m,
            _ => DEFAULT_DURATION_MINUTES,
        };
        minutes.saturating_mul(60)
    }

    /// Check authoring invariants before an exam is published.
    ///
    /// Every question must carry at least one option and exactly one correct option.
    ///
    /// # Errors
    ///
    /// Returns the first `ExamError` found.
    pub fn validate(&self) -> Result<(), ExamError> {
        if self.title.trim().is_empty() {
            return Err(ExamError::EmptyTitle);
        }
        if let Some(score) = self.passing_score {
            if score > 100 {
                return Err(ExamError::InvalidPassingScore(score));
            }
        }

        let mut question_ids = HashSet::new();
        let mut option_ids = HashSet::new();
        for question in &self.questions {
            if !question_ids.insert(question.id) {
                return Err(ExamError::DuplicateQuestion(question.id));
            }
            if question.text.trim().is_empty() {
                return Err(ExamError::EmptyQuestionText(question.id));
            }
            if question.options.is_empty() {
                return Err(ExamError::NoOptions(question.id));
            }
            for option in &question.options {
                if !option_ids.insert(option.id) {
                    return Err(ExamError::DuplicateOption(option.id));
                }
            }
            match question.options.iter().filter(|o| o.is_correct).count() {
                0 => return Err(ExamError::NoCorrectOption(question.id)),
                1 => {}
                count => {
                    return Err(ExamError::MultipleCorrectOptions {
                        question: question.id,
                        count,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Display-only labels carried into a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeacherContext {
    pub teacher_name: Option<String>,
    pub subject: Option<String>,
}

impl TeacherContext {
    #[must_use]
    pub fn new(teacher_name: Option<String>, subject: Option<String>) -> Self {
        Self {
            teacher_name,
            subject,
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    fn question(correct: &[bool]) -> Question {
        let options = correct
            .iter()
            .enumerate()
            .map(|(i, c)| AnswerOption::new(OptionId::generate(), format!("opt {i}"), *c))
            .collect();
        Question::new(QuestionId::generate(), "What?", options)
    }

    #[test]
    fn duration_defaults_to_thirty_minutes() {
        let exam = Exam::new(ExamId::generate(), "Algebra", Vec::new());
        assert_eq!(exam.time_budget_secs(), 30 * 60);

        let zero = exam.clone().with_duration_minutes(0);
        assert_eq!(zero.time_budget_secs(), 30 * 60);

        let one = exam.with_duration_minutes(1);
        assert_eq!(one.time_budget_secs(), 60);
    }

    #[test]
    fn unset_points_count_as_one() {
        let q = question(&[true, false]);
        assert_eq!(q.effective_points(), 1);
        assert_eq!(q.clone().with_points(0).effective_points(), 0);
        assert_eq!(q.with_points(3).effective_points(), 3);
    }

    #[test]
    fn validate_accepts_single_correct_option() {
        let exam = Exam::new(ExamId::generate(), "Quiz", vec![question(&[false, true])]);
        assert!(exam.validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_or_multiple_correct_options() {
        let none = question(&[false, false]);
        let none_id = none.id;
        let exam = Exam::new(ExamId::generate(), "Quiz", vec![none]);
        assert_eq!(exam.validate(), Err(ExamError::NoCorrectOption(none_id)));

        let many = question(&[true, true, false]);
        let many_id = many.id;
        let exam = Exam::new(ExamId::generate(), "Quiz", vec![many]);
        assert_eq!(
            exam.validate(),
            Err(ExamError::MultipleCorrectOptions {
                question: many_id,
                count: 2
            })
        );
    }

    #[test]
    fn validate_rejects_duplicate_questions_and_bad_threshold() {
        let q = question(&[true]);
        let exam = Exam::new(ExamId::generate(), "Quiz", vec![q.clone(), q.clone()]);
        assert_eq!(exam.validate(), Err(ExamError::DuplicateQuestion(q.id)));

        let exam = Exam::new(ExamId::generate(), "Quiz", vec![q]).with_passing_score(120);
        assert_eq!(exam.validate(), Err(ExamError::InvalidPassingScore(120)));
    }

    #[test]
    fn validate_rejects_blank_title() {
        let exam = Exam::new(ExamId::generate(), "   ", Vec::new());
        assert_eq!(exam.validate(), Err(ExamError::EmptyTitle));
    }

    #[test]
    fn exam_deserializes_with_optional_fields_missing() {
        let json = r#"{
            "id": "6f9619ff-8b86-d011-b42d-00c04fc964ff",
            "title": "Biology",
            "questions": [{
                "id": "1b4e28ba-2fa1-11d2-883f-0016d3cca427",
                "text": "Cell powerhouse?",
                "options": [
                    {"id": "a3bb189e-8bf9-3888-9912-ace4e6543002", "text": "Mitochondria", "is_correct": true},
                    {"id": "c9bf9e57-1685-4c89-bafb-ff5af830be8a", "text": "Nucleus"}
                ]
            }]
        }"#;
        let exam: Exam = serde_json::from_str(json).unwrap();
        assert_eq!(exam.title(), "Biology");
        assert_eq!(exam.duration_minutes(), None);
        assert_eq!(exam.questions()[0].effective_points(), 1);
        assert!(!exam.questions()[0].options[1].is_correct);
        assert!(exam.validate().is_ok());
    }
}
