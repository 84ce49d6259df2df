use std::sync::Arc;

use exam_core::Clock;
use exam_core::model::{
    ExamId, ExamResult, SessionError, StudentId, SubmittedAttempt, TeacherContext,
};
use storage::repository::{ExamContentRepository, ExamResultRepository, ResultId};

use super::engine::{ExamAttempt, ExamSessionEngine, PersistClaim, PersistState};
use crate::error::ExamServiceError;

/// How the result write of a submission went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persistence {
    Saved(ResultId),
    /// Another call is writing this attempt's result right now.
    InFlight,
    /// The write failed; the score is still valid and can be retried with
    /// [`ExamLoopService::finalize_result`].
    Failed(String),
}

/// Outcome of submitting an attempt through [`ExamLoopService::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub submitted: SubmittedAttempt,
    pub result: ExamResult,
    pub persistence: Persistence,
}

/// Orchestrates exam start from stored content and persisted submission.
#[derive(Clone)]
pub struct ExamLoopService {
    engine: Arc<ExamSessionEngine>,
    exams: Arc<dyn ExamContentRepository>,
    results: Arc<dyn ExamResultRepository>,
}

impl ExamLoopService {
    #[must_use]
    pub fn new(
        clock: Clock,
        exams: Arc<dyn ExamContentRepository>,
        results: Arc<dyn ExamResultRepository>,
    ) -> Self {
        Self {
            engine: Arc::new(ExamSessionEngine::new(clock)),
            exams,
            results,
        }
    }

    /// Replace the default engine, e.g. to change its tick period or policies.
    #[must_use]
    pub fn with_engine(mut self, engine: ExamSessionEngine) -> Self {
        self.engine = Arc::new(engine);
        self
    }

    #[must_use]
    pub fn engine(&self) -> &ExamSessionEngine {
        &self.engine
    }

    /// Fetch the exam once and start a timed attempt over it.
    ///
    /// A context without a subject takes the exam's subject.
    ///
    /// # Errors
    ///
    /// Returns `ExamServiceError::ContentUnavailable` if the content provider
    /// fails for any reason; no attempt is started in that case.
    pub async fn start_exam(
        &self,
        exam_id: ExamId,
        student_id: StudentId,
        context: TeacherContext,
    ) -> Result<ExamAttempt, ExamServiceError> {
        let exam = self.exams.get_exam(exam_id).await.map_err(|err| {
            tracing::warn!(%exam_id, error = %err, "exam content unavailable");
            ExamServiceError::ContentUnavailable {
                exam_id,
                reason: err.to_string(),
            }
        })?;
        let context = match context.subject {
            Some(_) => context,
            None => TeacherContext {
                subject: exam.subject().map(str::to_owned),
                ..context
            },
        };
        Ok(self.engine.start_session(&exam, student_id, context))
    }

    /// Submit the attempt (if still running) and persist its result once.
    ///
    /// A failed write is reported in [`SubmissionOutcome::persistence`] rather
    /// than as an error, so the score is never lost.
    ///
    /// # Errors
    ///
    /// Returns `ExamServiceError::Session` if the attempt was cancelled.
    pub async fn submit(&self, attempt: &ExamAttempt) -> Result<SubmissionOutcome, ExamServiceError> {
        let submitted = attempt.submit()?;
        let result = submitted_result(attempt, "submit")?;

        let persistence = match attempt.begin_persist(false) {
            PersistClaim::Saved(id) => Persistence::Saved(id),
            PersistClaim::InFlight => Persistence::InFlight,
            PersistClaim::Failed(reason) => Persistence::Failed(reason),
            PersistClaim::Proceed => match self.write(attempt, &result).await {
                Ok(id) => Persistence::Saved(id),
                Err(reason) => Persistence::Failed(reason),
            },
        };

        Ok(SubmissionOutcome {
            submitted,
            result,
            persistence,
        })
    }

    /// Retry persistence after a failed write.
    ///
    /// Returns the existing id when the result is already stored.
    ///
    /// # Errors
    ///
    /// Returns `ExamServiceError::Session` if the attempt has not been submitted.
    /// Returns `ExamServiceError::Persistence` if the write fails again or is
    /// already in flight.
    pub async fn finalize_result(&self, attempt: &ExamAttempt) -> Result<ResultId, ExamServiceError> {
        if let Some(id) = attempt.persisted_id() {
            return Ok(id);
        }
        let result = submitted_result(attempt, "finalize")?;

        match attempt.begin_persist(true) {
            PersistClaim::Saved(id) => Ok(id),
            PersistClaim::InFlight => Err(ExamServiceError::Persistence(
                "result write already in progress".into(),
            )),
            PersistClaim::Failed(reason) => Err(ExamServiceError::Persistence(reason)),
            PersistClaim::Proceed => self
                .write(attempt, &result)
                .await
                .map_err(ExamServiceError::Persistence),
        }
    }

    async fn write(&self, attempt: &ExamAttempt, result: &ExamResult) -> Result<ResultId, String> {
        match self.results.append_result(result).await {
            Ok(id) => {
                attempt.finish_persist(PersistState::Saved(id));
                tracing::info!(
                    result_id = id,
                    exam_id = %result.exam_id,
                    score = result.score,
                    "exam result saved"
                );
                Ok(id)
            }
            Err(err) => {
                let reason = err.to_string();
                attempt.finish_persist(PersistState::Failed(reason.clone()));
                tracing::warn!(exam_id = %result.exam_id, error = %reason, "failed to save exam result");
                Err(reason)
            }
        }
    }
}

fn submitted_result(
    attempt: &ExamAttempt,
    operation: &'static str,
) -> Result<ExamResult, ExamServiceError> {
    attempt.result().ok_or_else(|| {
        let state = attempt.progress().lifecycle;
        ExamServiceError::Session(SessionError::InvalidState { operation, state })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::model::{AnswerOption, Exam, Lifecycle, OptionId, Question, QuestionId};
    use exam_core::time::fixed_clock;
    use storage::repository::InMemoryRepository;

    fn service(repo: &InMemoryRepository) -> ExamLoopService {
        ExamLoopService::new(
            fixed_clock(),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        )
    }

    #[tokio::test]
    async fn missing_exam_is_content_unavailable() {
        let repo = InMemoryRepository::new();
        let exam_id = ExamId::generate();
        let err = service(&repo)
            .start_exam(exam_id, StudentId::generate(), TeacherContext::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ExamServiceError::ContentUnavailable { exam_id: id, .. } if id == exam_id
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn running_attempt_cannot_be_finalized() {
        let repo = InMemoryRepository::new();
        let question = Question::new(
            QuestionId::generate(),
            "1 + 1?",
            vec![AnswerOption::new(OptionId::generate(), "2", true)],
        );
        let exam = Exam::new(ExamId::generate(), "Sums", vec![question]);
        repo.upsert_exam(&exam).await.unwrap();

        let svc = service(&repo);
        let attempt = svc
            .start_exam(exam.id(), StudentId::generate(), TeacherContext::default())
            .await
            .unwrap();
        let err = svc.finalize_result(&attempt).await.unwrap_err();
        assert!(matches!(
            err,
            ExamServiceError::Session(SessionError::InvalidState {
                operation: "finalize",
                state: Lifecycle::Running
            })
        ));
        assert!(attempt.persisted_id().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn context_subject_defaults_to_the_exam_subject() {
        let repo = InMemoryRepository::new();
        let question = Question::new(
            QuestionId::generate(),
            "Largest planet?",
            vec![AnswerOption::new(OptionId::generate(), "Jupiter", true)],
        );
        let exam = Exam::new(ExamId::generate(), "Planets", vec![question]).with_subject("Astronomy");
        repo.upsert_exam(&exam).await.unwrap();
        let svc = service(&repo);

        let attempt = svc
            .start_exam(
                exam.id(),
                StudentId::generate(),
                TeacherContext::new(Some("Ms. Vega".into()), None),
            )
            .await
            .unwrap();
        let context = attempt.snapshot().context().clone();
        assert_eq!(context.teacher_name.as_deref(), Some("Ms. Vega"));
        assert_eq!(context.subject.as_deref(), Some("Astronomy"));

        let explicit = svc
            .start_exam(
                exam.id(),
                StudentId::generate(),
                TeacherContext::new(None, Some("Space".into())),
            )
            .await
            .unwrap();
        assert_eq!(explicit.snapshot().context().subject.as_deref(), Some("Space"));
    }
}
