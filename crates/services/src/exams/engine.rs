use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use exam_core::Clock;
use exam_core::model::{
    Exam, ExamId, ExamResult, ExamSession, OptionId, Question, QuestionId, SessionError,
    StudentId, SubmittedAttempt, TeacherContext, TickOutcome,
};
use rand::rng;
use rand::seq::SliceRandom;
use storage::repository::ResultId;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::{Instant, interval_at};

use super::progress::AttemptProgress;

/// Countdown step used unless overridden with [`ExamSessionEngine::with_tick_period`].
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);

/// Shortest accepted countdown step; shorter periods are raised to this.
pub const MIN_TICK_PERIOD: Duration = Duration::from_millis(1);

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

/// Lifecycle snapshot broadcast to observers of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Running { remaining_secs: u32 },
    Submitted { score: u8, auto_submitted: bool },
    Cancelled,
}

impl AttemptStatus {
    fn of(session: &ExamSession) -> Self {
        match session.submitted() {
            Some(s) => Self::Submitted {
                score: s.score,
                auto_submitted: s.auto_submitted,
            },
            None if session.is_running() => Self::Running {
                remaining_secs: session.remaining_secs(),
            },
            None => Self::Cancelled,
        }
    }

    #[must_use]
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

/// Where the result write of an attempt stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PersistState {
    NotStarted,
    Pending,
    Saved(ResultId),
    Failed(String),
}

/// Answer to a request for the right to write an attempt's result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PersistClaim {
    Proceed,
    InFlight,
    Saved(ResultId),
    Failed(String),
}

//
// ─── SHARED STATE ──────────────────────────────────────────────────────────────
//

struct AttemptShared {
    session: Mutex<ExamSession>,
    status: watch::Sender<AttemptStatus>,
    countdown: Mutex<Option<AbortHandle>>,
    persist: Mutex<PersistState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AttemptShared {
    // Callers hold the session lock so status updates keep lifecycle order.
    fn publish(&self, session: &ExamSession) {
        self.status.send_replace(AttemptStatus::of(session));
    }

    fn stop_countdown(&self) {
        if let Some(handle) = lock(&self.countdown).take() {
            handle.abort();
        }
    }

    fn supersede(&self) {
        self.stop_countdown();
        let mut session = lock(&self.session);
        if session.cancel().is_ok() {
            self.publish(&session);
            tracing::info!(
                exam_id = %session.exam_id(),
                student_id = %session.student_id(),
                "running exam attempt superseded by a new session"
            );
        }
    }
}

fn spawn_countdown(weak: Weak<AttemptShared>, clock: Clock, period: Duration) -> AbortHandle {
    tokio::spawn(async move {
        let mut ticks = interval_at(Instant::now() + period, period);
        loop {
            ticks.tick().await;
            let Some(shared) = weak.upgrade() else {
                break;
            };
            let mut session = lock(&shared.session);
            match session.tick(clock.now()) {
                Ok(TickOutcome::Running { .. }) => shared.publish(&session),
                Ok(TickOutcome::Expired) => {
                    shared.publish(&session);
                    tracing::info!(
                        exam_id = %session.exam_id(),
                        score = session.submitted().map_or(0, |s| s.score),
                        "exam time expired; attempt submitted automatically"
                    );
                    break;
                }
                Err(_) => break,
            }
        }
    })
    .abort_handle()
}

//
// ─── ENGINE ────────────────────────────────────────────────────────────────────
//

/// Starts timed exam sessions and owns their countdowns.
///
/// At most one attempt is live per learner: starting a new session for a
/// student cancels that student's still running attempt and stops its
/// countdown. Attempts of different students run side by side.
pub struct ExamSessionEngine {
    clock: Clock,
    tick_period: Duration,
    auto_advance: bool,
    shuffle_questions: bool,
    active: Mutex<HashMap<StudentId, Weak<AttemptShared>>>,
}

impl ExamSessionEngine {
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            tick_period: DEFAULT_TICK_PERIOD,
            auto_advance: true,
            shuffle_questions: false,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Countdown step; periods below [`MIN_TICK_PERIOD`] are clamped up.
    #[must_use]
    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period.max(MIN_TICK_PERIOD);
        self
    }

    /// Move to the next question after each recorded answer (default on).
    #[must_use]
    pub fn with_auto_advance(mut self, auto_advance: bool) -> Self {
        self.auto_advance = auto_advance;
        self
    }

    #[must_use]
    pub fn with_shuffle_questions(mut self, shuffle_questions: bool) -> Self {
        self.shuffle_questions = shuffle_questions;
        self
    }

    /// Start an attempt over all of `exam`'s questions, shuffled when enabled.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime, since the countdown is spawned
    /// as a task.
    #[must_use]
    pub fn start_session(
        &self,
        exam: &Exam,
        student_id: StudentId,
        context: TeacherContext,
    ) -> ExamAttempt {
        let mut questions = exam.questions().to_vec();
        if self.shuffle_questions {
            questions.shuffle(&mut rng());
        }
        self.start_session_with_questions(exam, questions, student_id, context)
    }

    /// Start an attempt over an explicit question list.
    ///
    /// The list is captured as given and never changes for the attempt. An
    /// empty list is accepted and scores 0 on submit.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn start_session_with_questions(
        &self,
        exam: &Exam,
        questions: Vec<Question>,
        student_id: StudentId,
        context: TeacherContext,
    ) -> ExamAttempt {
        let session = ExamSession::start(exam, questions, student_id, context, self.clock.now());
        let total_secs = session.total_secs();
        let question_count = session.question_count();
        let (status, _) = watch::channel(AttemptStatus::of(&session));
        let shared = Arc::new(AttemptShared {
            session: Mutex::new(session),
            status,
            countdown: Mutex::new(None),
            persist: Mutex::new(PersistState::NotStarted),
        });

        {
            let mut active = lock(&self.active);
            active.retain(|_, attempt| attempt.strong_count() > 0);
            if let Some(previous) = active
                .insert(student_id, Arc::downgrade(&shared))
                .and_then(|previous| previous.upgrade())
            {
                previous.supersede();
            }
        }

        let handle = spawn_countdown(Arc::downgrade(&shared), self.clock, self.tick_period);
        *lock(&shared.countdown) = Some(handle);

        tracing::info!(
            exam_id = %exam.id(),
            student_id = %student_id,
            questions = question_count,
            total_secs,
            "exam session started"
        );

        ExamAttempt {
            shared,
            clock: self.clock,
            auto_advance: self.auto_advance,
        }
    }
}

impl Default for ExamSessionEngine {
    fn default() -> Self {
        Self::new(Clock::default())
    }
}

//
// ─── ATTEMPT HANDLE ────────────────────────────────────────────────────────────
//

/// Owned handle to one running exam attempt.
///
/// All operations lock the underlying [`ExamSession`], so explicit calls and
/// the countdown never interleave within a step. Dropping the handle stops
/// the countdown.
pub struct ExamAttempt {
    shared: Arc<AttemptShared>,
    clock: Clock,
    auto_advance: bool,
}

impl ExamAttempt {
    fn session(&self) -> MutexGuard<'_, ExamSession> {
        lock(&self.shared.session)
    }

    #[must_use]
    pub fn exam_id(&self) -> ExamId {
        self.session().exam_id()
    }

    #[must_use]
    pub fn student_id(&self) -> StudentId {
        self.session().student_id()
    }

    #[must_use]
    pub fn status(&self) -> AttemptStatus {
        *self.shared.status.borrow()
    }

    /// Receiver that observes every countdown step and lifecycle change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AttemptStatus> {
        self.shared.status.subscribe()
    }

    /// Wait until the attempt is no longer running.
    ///
    /// Resolves on manual submit, countdown expiry, cancellation, or
    /// supersession by a newer session.
    pub async fn finished(&self) -> AttemptStatus {
        let mut rx = self.shared.status.subscribe();
        let status = rx.wait_for(|s| !s.is_running()).await.map(|s| *s);
        status.unwrap_or_else(|_| self.status())
    }

    /// Copy of the session as it is right now.
    #[must_use]
    pub fn snapshot(&self) -> ExamSession {
        self.session().clone()
    }

    #[must_use]
    pub fn progress(&self) -> AttemptProgress {
        let session = self.session();
        AttemptProgress {
            current_index: session.current_index(),
            question_count: session.question_count(),
            answered: session.answers().len(),
            remaining_secs: session.remaining_secs(),
            lifecycle: session.lifecycle(),
        }
    }

    #[must_use]
    pub fn current_question(&self) -> Option<Question> {
        self.session().current_question().cloned()
    }

    #[must_use]
    pub fn remaining_secs(&self) -> u32 {
        self.session().remaining_secs()
    }

    /// Record an answer and, with auto-advance on, move past the question.
    ///
    /// Returns the current index after the move.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the attempt is not running or the question is
    /// not part of it.
    pub fn select_answer(
        &self,
        question: QuestionId,
        option: OptionId,
    ) -> Result<usize, SessionError> {
        let mut session = self.session();
        session.select_answer(question, option)?;
        if self.auto_advance && !session.is_last_question() {
            session.next_question();
        }
        Ok(session.current_index())
    }

    pub fn goto_question(&self, index: usize) -> usize {
        self.session().goto_question(index)
    }

    pub fn next_question(&self) -> usize {
        self.session().next_question()
    }

    pub fn previous_question(&self) -> usize {
        self.session().previous_question()
    }

    /// Submit the attempt and stop its countdown.
    ///
    /// Repeated calls, including after an automatic submit, return the stored
    /// outcome.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` if the attempt was cancelled.
    pub fn submit(&self) -> Result<SubmittedAttempt, SessionError> {
        let submitted = {
            let mut session = self.session();
            let was_running = session.is_running();
            let submitted = session.submit(self.clock.now())?.clone();
            if was_running {
                self.shared.publish(&session);
                tracing::info!(
                    exam_id = %session.exam_id(),
                    score = submitted.score,
                    time_taken_secs = submitted.time_taken_secs,
                    "exam submitted"
                );
            }
            submitted
        };
        self.shared.stop_countdown();
        Ok(submitted)
    }

    /// Discard the attempt without a result.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless running.
    pub fn cancel(&self) -> Result<(), SessionError> {
        {
            let mut session = self.session();
            session.cancel()?;
            self.shared.publish(&session);
            tracing::info!(exam_id = %session.exam_id(), "exam attempt cancelled");
        }
        self.shared.stop_countdown();
        Ok(())
    }

    /// History record for a submitted attempt; `None` otherwise.
    #[must_use]
    pub fn result(&self) -> Option<ExamResult> {
        self.session().result()
    }

    /// Store id of the persisted result, once written.
    #[must_use]
    pub fn persisted_id(&self) -> Option<ResultId> {
        match &*lock(&self.shared.persist) {
            PersistState::Saved(id) => Some(*id),
            _ => None,
        }
    }

    pub(crate) fn begin_persist(&self, retry_failed: bool) -> PersistClaim {
        let mut state = lock(&self.shared.persist);
        match &*state {
            PersistState::Saved(id) => PersistClaim::Saved(*id),
            PersistState::Pending => PersistClaim::InFlight,
            PersistState::Failed(reason) if !retry_failed => PersistClaim::Failed(reason.clone()),
            PersistState::NotStarted | PersistState::Failed(_) => {
                *state = PersistState::Pending;
                PersistClaim::Proceed
            }
        }
    }

    pub(crate) fn finish_persist(&self, outcome: PersistState) {
        *lock(&self.shared.persist) = outcome;
    }
}

impl Drop for ExamAttempt {
    fn drop(&mut self) {
        self.shared.stop_countdown();
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
