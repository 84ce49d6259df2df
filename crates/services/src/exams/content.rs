use std::sync::Arc;

use exam_core::model::{Exam, ExamId};
use storage::repository::{ExamContentRepository, ExamListing};

use crate::error::ExamServiceError;

/// Authoring-side access to exam content.
#[derive(Clone)]
pub struct ExamContentService {
    exams: Arc<dyn ExamContentRepository>,
}

impl ExamContentService {
    #[must_use]
    pub fn new(exams: Arc<dyn ExamContentRepository>) -> Self {
        Self { exams }
    }

    /// Validate and store an exam, replacing any earlier version with the same id.
    ///
    /// # Errors
    ///
    /// Returns `ExamServiceError::Content` if the exam is malformed, or
    /// `ExamServiceError::Storage` if it cannot be stored.
    pub async fn publish_exam(&self, exam: &Exam) -> Result<(), ExamServiceError> {
        exam.validate()?;
        self.exams.upsert_exam(exam).await?;
        tracing::info!(
            exam_id = %exam.id(),
            title = exam.title(),
            questions = exam.questions().len(),
            "exam published"
        );
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `ExamServiceError::Storage` if the exam is missing or unreadable.
    pub async fn get_exam(&self, id: ExamId) -> Result<Exam, ExamServiceError> {
        Ok(self.exams.get_exam(id).await?)
    }

    /// # Errors
    ///
    /// Returns `ExamServiceError::Storage` if the catalog cannot be read.
    pub async fn list_exams(&self, limit: u32) -> Result<Vec<ExamListing>, ExamServiceError> {
        Ok(self.exams.list_exams(limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::model::{AnswerOption, ExamError, OptionId, Question, QuestionId};
    use storage::repository::InMemoryRepository;

    fn question(correct: &[bool]) -> Question {
        let options = correct
            .iter()
            .enumerate()
            .map(|(i, c)| AnswerOption::new(OptionId::generate(), format!("option {i}"), *c))
            .collect();
        Question::new(QuestionId::generate(), "Pick one", options)
    }

    #[tokio::test]
    async fn publish_stores_valid_exam() {
        let svc = ExamContentService::new(Arc::new(InMemoryRepository::new()));
        let exam = Exam::new(ExamId::generate(), "Valid", vec![question(&[false, true])]);

        svc.publish_exam(&exam).await.unwrap();
        assert_eq!(svc.get_exam(exam.id()).await.unwrap(), exam);
        assert_eq!(svc.list_exams(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn publish_rejects_ambiguous_answer_keys() {
        let svc = ExamContentService::new(Arc::new(InMemoryRepository::new()));

        let none = Exam::new(ExamId::generate(), "None", vec![question(&[false, false])]);
        assert!(matches!(
            svc.publish_exam(&none).await,
            Err(ExamServiceError::Content(ExamError::NoCorrectOption(_)))
        ));

        let many = Exam::new(ExamId::generate(), "Many", vec![question(&[true, true])]);
        assert!(matches!(
            svc.publish_exam(&many).await,
            Err(ExamServiceError::Content(ExamError::MultipleCorrectOptions { count: 2, .. }))
        ));

        assert!(svc.list_exams(10).await.unwrap().is_empty());
    }
}
