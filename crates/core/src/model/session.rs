use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::model::exam::{Exam, Question, TeacherContext};
use crate::model::ids::{ExamId, OptionId, QuestionId, StudentId};
use crate::model::result::ExamResult;
use crate::model::score::ScoreBreakdown;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// Contract violations raised by [`ExamSession`] operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    #[error("cannot {operation} a {state} session")]
    InvalidState {
        operation: &'static str,
        state: Lifecycle,
    },

    #[error("question {0} is not part of this session")]
    UnknownQuestion(QuestionId),
}

//
// ─── LIFECYCLE ─────────────────────────────────────────────────────────────────
//

/// Coarse lifecycle flag of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Running,
    Submitted,
    Cancelled,
}

impl Lifecycle {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Lifecycle::Running => "running",
            Lifecycle::Submitted => "submitted",
            Lifecycle::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frozen outcome of a submitted session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedAttempt {
    pub score: u8,
    pub breakdown: ScoreBreakdown,
    pub submitted_at: DateTime<Utc>,
    pub time_taken_secs: u32,
    /// True when the countdown reached zero rather than the learner submitting.
    pub auto_submitted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionState {
    Running,
    Submitted(SubmittedAttempt),
    Cancelled,
}

/// Result of a single countdown step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Running { remaining_secs: u32 },
    /// The budget ran out and the session was submitted.
    Expired,
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// State of one in-progress timed exam attempt.
///
/// The question list is captured at start and never changes. All mutation
/// goes through methods that check the lifecycle first; once submitted or
/// cancelled, answers and outcome are frozen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamSession {
    exam_id: ExamId,
    exam_title: String,
    passing_score: Option<u8>,
    context: TeacherContext,
    student_id: StudentId,
    questions: Vec<Question>,
    current: usize,
    answers: BTreeMap<QuestionId, OptionId>,
    total_secs: u32,
    remaining_secs: u32,
    started_at: DateTime<Utc>,
    state: SessionState,
}

impl ExamSession {
    /// Start a running session over `questions`, using `exam` for metadata and the time budget.
    ///
    /// `started_at` should come from the services layer clock.
    #[must_use]
    pub fn start(
        exam: &Exam,
        questions: Vec<Question>,
        student_id: StudentId,
        context: TeacherContext,
        started_at: DateTime<Utc>,
    ) -> Self {
        let total_secs = exam.time_budget_secs();
        Self {
            exam_id: exam.id(),
            exam_title: exam.title().to_owned(),
            passing_score: exam.passing_score(),
            context,
            student_id,
            questions,
            current: 0,
            answers: BTreeMap::new(),
            total_secs,
            remaining_secs: total_secs,
            started_at,
            state: SessionState::Running,
        }
    }

    #[must_use]
    pub fn exam_id(&self) -> ExamId {
        self.exam_id
    }

    #[must_use]
    pub fn exam_title(&self) -> &str {
        &self.exam_title
    }

    #[must_use]
    pub fn passing_score(&self) -> Option<u8> {
        self.passing_score
    }

    #[must_use]
    pub fn context(&self) -> &TeacherContext {
        &self.context
    }

    #[must_use]
    pub fn student_id(&self) -> StudentId {
        self.student_id
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current)
    }

    #[must_use]
    pub fn is_last_question(&self) -> bool {
        self.current + 1 >= self.questions.len()
    }

    #[must_use]
    pub fn answers(&self) -> &BTreeMap<QuestionId, OptionId> {
        &self.answers
    }

    #[must_use]
    pub fn answer_for(&self, question: QuestionId) -> Option<OptionId> {
        self.answers.get(&question).copied()
    }

    #[must_use]
    pub fn total_secs(&self) -> u32 {
        self.total_secs
    }

    #[must_use]
    pub fn remaining_secs(&self) -> u32 {
        self.remaining_secs
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        match self.state {
            SessionState::Running => Lifecycle::Running,
            SessionState::Submitted(_) => Lifecycle::Submitted,
            SessionState::Cancelled => Lifecycle::Cancelled,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.state, SessionState::Running)
    }

    #[must_use]
    pub fn submitted(&self) -> Option<&SubmittedAttempt> {
        match &self.state {
            SessionState::Submitted(s) => Some(s),
            _ => None,
        }
    }

    fn ensure_running(&self, operation: &'static str) -> Result<(), SessionError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                state: self.lifecycle(),
            })
        }
    }

    /// Record `option` as the answer to `question`, replacing any earlier choice.
    ///
    /// The option id is not checked against the question's options; an unknown
    /// id simply never scores.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless running, and
    /// `SessionError::UnknownQuestion` if the question is not in this session.
    pub fn select_answer(
        &mut self,
        question: QuestionId,
        option: OptionId,
    ) -> Result<(), SessionError> {
        self.ensure_running("answer")?;
        if !self.questions.iter().any(|q| q.id == question) {
            return Err(SessionError::UnknownQuestion(question));
        }
        self.answers.insert(question, option);
        Ok(())
    }

    /// Move to `index`, clamped into the valid range. Returns the new index.
    pub fn goto_question(&mut self, index: usize) -> usize {
        let last = self.questions.len().saturating_sub(1);
        self.current = index.min(last);
        self.current
    }

    /// Move forward one question; a no-op on the last one.
    pub fn next_question(&mut self) -> usize {
        self.goto_question(self.current.saturating_add(1))
    }

    /// Move back one question; a no-op on the first one.
    pub fn previous_question(&mut self) -> usize {
        self.goto_question(self.current.saturating_sub(1))
    }

    /// Advance the countdown by one second.
    ///
    /// Reaching zero submits the session with whatever answers exist.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless running.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<TickOutcome, SessionError> {
        self.ensure_running("tick")?;
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs == 0 {
            self.finish(now, true);
            return Ok(TickOutcome::Expired);
        }
        Ok(TickOutcome::Running {
            remaining_secs: self.remaining_secs,
        })
    }

    /// Submit the session and score it.
    ///
    /// Calling this on an already submitted session returns the stored outcome
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` if the session was cancelled.
    pub fn submit(&mut self, now: DateTime<Utc>) -> Result<&SubmittedAttempt, SessionError> {
        if matches!(self.state, SessionState::Cancelled) {
            return Err(SessionError::InvalidState {
                operation: "submit",
                state: Lifecycle::Cancelled,
            });
        }
        if self.is_running() {
            self.finish(now, false);
        }
        self.submitted().ok_or(SessionError::InvalidState {
            operation: "submit",
            state: self.lifecycle(),
        })
    }

    /// Discard a running session without producing a result.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless running.
    pub fn cancel(&mut self) -> Result<(), SessionError> {
        self.ensure_running("cancel")?;
        self.state = SessionState::Cancelled;
        Ok(())
    }

    /// Build the history record for a submitted session.
    ///
    /// Returns `None` while running or after cancellation.
    #[must_use]
    pub fn result(&self) -> Option<ExamResult> {
        let submitted = self.submitted()?;
        Some(ExamResult {
            exam_id: self.exam_id,
            student_id: self.student_id,
            score: submitted.score,
            submitted_at: submitted.submitted_at,
            time_taken_secs: submitted.time_taken_secs,
            answers: self.answers.clone(),
        })
    }

    fn finish(&mut self, now: DateTime<Utc>, auto_submitted: bool) {
        let breakdown = ScoreBreakdown::tally(&self.questions, &self.answers);
        self.state = SessionState::Submitted(SubmittedAttempt {
            score: breakdown.score(),
            breakdown,
            submitted_at: now,
            time_taken_secs: self.total_secs - self.remaining_secs,
            auto_submitted,
        });
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::exam::AnswerOption;
    use crate::time::fixed_now;
    use chrono::Duration;

    struct Fixture {
        exam: Exam,
        right: Vec<OptionId>,
        wrong: Vec<OptionId>,
    }

    fn fixture(points: &[Option<u32>], minutes: u32) -> Fixture {
        let mut right = Vec::new();
        let mut wrong = Vec::new();
        let questions = points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let r = OptionId::generate();
                let w = OptionId::generate();
                right.push(r);
                wrong.push(w);
                let mut q = Question::new(
                    QuestionId::generate(),
                    format!("Q{i}"),
                    vec![AnswerOption::new(r, "yes", true), AnswerOption::new(w, "no", false)],
                );
                q.points = *p;
                q
            })
            .collect();
        let exam = Exam::new(ExamId::generate(), "Fixture", questions)
            .with_duration_minutes(minutes);
        Fixture { exam, right, wrong }
    }

    fn start(f: &Fixture) -> ExamSession {
        ExamSession::start(
            &f.exam,
            f.exam.questions().to_vec(),
            StudentId::generate(),
            TeacherContext::default(),
            fixed_now(),
        )
    }

    fn qid(f: &Fixture, i: usize) -> QuestionId {
        f.exam.questions()[i].id
    }

    #[test]
    fn new_session_starts_running_at_first_question() {
        let f = fixture(&[None, None], 2);
        let s = start(&f);
        assert!(s.is_running());
        assert_eq!(s.current_index(), 0);
        assert!(s.answers().is_empty());
        assert_eq!(s.total_secs(), 120);
        assert_eq!(s.remaining_secs(), 120);
        assert!(s.result().is_none());
    }

    #[test]
    fn later_answer_overwrites_earlier_one() {
        let f = fixture(&[None], 5);
        let mut s = start(&f);
        s.select_answer(qid(&f, 0), f.right[0]).unwrap();
        s.select_answer(qid(&f, 0), f.wrong[0]).unwrap();
        assert_eq!(s.answers().len(), 1);

        let out = s.submit(fixed_now()).unwrap();
        assert_eq!(out.breakdown.correct_count, 0);
        assert_eq!(out.breakdown.incorrect_count, 1);
    }

    #[test]
    fn answering_unknown_question_is_rejected() {
        let f = fixture(&[None], 5);
        let mut s = start(&f);
        let stray = QuestionId::generate();
        let err = s.select_answer(stray, f.right[0]).unwrap_err();
        assert_eq!(err, SessionError::UnknownQuestion(stray));
        assert!(s.answers().is_empty());
    }

    #[test]
    fn navigation_is_clamped() {
        let f = fixture(&[None, None, None], 5);
        let mut s = start(&f);
        assert_eq!(s.previous_question(), 0);
        assert_eq!(s.goto_question(99), 2);
        assert_eq!(s.next_question(), 2);
        assert_eq!(s.goto_question(1), 1);
        assert_eq!(s.previous_question(), 0);
    }

    #[test]
    fn navigation_on_empty_exam_stays_at_zero() {
        let f = fixture(&[], 5);
        let mut s = start(&f);
        assert_eq!(s.goto_question(3), 0);
        assert_eq!(s.next_question(), 0);
        assert!(s.current_question().is_none());
    }

    #[test]
    fn submit_is_idempotent() {
        let f = fixture(&[Some(1), Some(2), Some(1)], 5);
        let mut s = start(&f);
        s.select_answer(qid(&f, 0), f.right[0]).unwrap();
        s.select_answer(qid(&f, 1), f.wrong[1]).unwrap();
        s.tick(fixed_now()).unwrap();

        let first = s.submit(fixed_now()).unwrap().clone();
        let later = fixed_now() + Duration::seconds(30);
        let second = s.submit(later).unwrap().clone();
        assert_eq!(first, second);
        assert_eq!(first.score, 25);
        assert_eq!(first.time_taken_secs, 1);
        assert_eq!(s.result(), s.result());
    }

    #[test]
    fn score_ignores_elapsed_time() {
        let f = fixture(&[None, None], 5);
        let run = |ticks: u32| {
            let mut s = start(&f);
            s.select_answer(qid(&f, 0), f.right[0]).unwrap();
            for _ in 0..ticks {
                s.tick(fixed_now()).unwrap();
            }
            let score = s.submit(fixed_now()).unwrap().score;
            score
        };
        assert_eq!(run(0), run(200));
        assert_eq!(run(0), 50);
    }

    #[test]
    fn countdown_exhaustion_auto_submits() {
        let f = fixture(&[None, None], 1);
        let mut s = start(&f);
        for i in 1..60 {
            assert_eq!(
                s.tick(fixed_now()).unwrap(),
                TickOutcome::Running {
                    remaining_secs: 60 - i
                }
            );
        }
        assert_eq!(s.tick(fixed_now()).unwrap(), TickOutcome::Expired);
        assert_eq!(s.lifecycle(), Lifecycle::Submitted);

        let out = s.submitted().unwrap();
        assert!(out.auto_submitted);
        assert_eq!(out.score, 0);
        assert_eq!(out.breakdown.unanswered_count, 2);
        assert_eq!(out.time_taken_secs, 60);
        assert_eq!(s.remaining_secs(), 0);

        let err = s.tick(fixed_now()).unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { .. }));
    }

    #[test]
    fn submitted_session_is_frozen() {
        let f = fixture(&[None], 5);
        let mut s = start(&f);
        s.submit(fixed_now()).unwrap();

        let err = s.select_answer(qid(&f, 0), f.right[0]).unwrap_err();
        assert_eq!(
            err,
            SessionError::InvalidState {
                operation: "answer",
                state: Lifecycle::Submitted
            }
        );
        assert!(s.answers().is_empty());
        assert!(s.cancel().is_err());
    }

    #[test]
    fn cancelled_session_cannot_submit() {
        let f = fixture(&[None], 5);
        let mut s = start(&f);
        s.cancel().unwrap();
        assert_eq!(s.lifecycle(), Lifecycle::Cancelled);
        let err = s.submit(fixed_now()).unwrap_err();
        assert_eq!(err.to_string(), "cannot submit a cancelled session");
        assert!(s.result().is_none());
    }

    #[test]
    fn empty_exam_submits_as_zero_of_zero() {
        let f = fixture(&[], 5);
        let mut s = start(&f);
        let out = s.submit(fixed_now()).unwrap();
        assert_eq!(out.score, 0);
        assert_eq!(out.breakdown.total_points, 0);
        assert_eq!(out.breakdown.unanswered_count, 0);
    }

    #[test]
    fn result_snapshots_answers() {
        let f = fixture(&[None, None], 5);
        let mut s = start(&f);
        s.select_answer(qid(&f, 1), f.right[1]).unwrap();
        s.submit(fixed_now()).unwrap();

        let result = s.result().unwrap();
        assert_eq!(result.exam_id, f.exam.id());
        assert_eq!(result.student_id, s.student_id());
        assert_eq!(result.score, 50);
        assert_eq!(result.answers.get(&qid(&f, 1)), Some(&f.right[1]));
        assert_eq!(result.submitted_at, fixed_now());
    }

    #[test]
    fn breakdown_counts_add_up() {
        let f = fixture(&[None, Some(3), None, Some(2)], 5);
        let mut s = start(&f);
        s.select_answer(qid(&f, 0), f.right[0]).unwrap();
        s.select_answer(qid(&f, 1), f.wrong[1]).unwrap();
        s.select_answer(qid(&f, 3), f.right[3]).unwrap();
        let b = s.submit(fixed_now()).unwrap().breakdown;

        assert_eq!(b.correct_count + b.incorrect_count, 3);
        assert_eq!(
            b.correct_count + b.incorrect_count + b.unanswered_count,
            4
        );
    }
}
