use async_trait::async_trait;
use exam_core::model::{Exam, ExamId, ExamResult, StudentId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Store-assigned identifier for a persisted exam result.
///
/// NOTE: This is `i64` to match `SQLite` row IDs.
pub type ResultId = i64;

/// A persisted result together with its store identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamResultRow {
    pub id: ResultId,
    pub result: ExamResult,
}

impl ExamResultRow {
    #[must_use]
    pub fn new(id: ResultId, result: ExamResult) -> Self {
        Self { id, result }
    }
}

/// Lightweight catalog entry, without the question graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamListing {
    pub id: ExamId,
    pub title: String,
    pub subject: Option<String>,
    pub duration_minutes: Option<u32>,
    pub question_count: u32,
}

impl ExamListing {
    #[must_use]
    pub fn from_exam(exam: &Exam) -> Self {
        Self {
            id: exam.id(),
            title: exam.title().to_owned(),
            subject: exam.subject().map(str::to_owned),
            duration_minutes: exam.duration_minutes(),
            question_count: u32::try_from(exam.questions().len()).unwrap_or(u32::MAX),
        }
    }
}

/// Content provider contract: read-mostly exam graphs (questions with nested options).
#[async_trait]
pub trait ExamContentRepository: Send + Sync {
    /// Persist or replace an exam and its full question graph.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the exam cannot be stored.
    async fn upsert_exam(&self, exam: &Exam) -> Result<(), StorageError>;

    /// Fetch an exam with questions and options in authored order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_exam(&self, id: ExamId) -> Result<Exam, StorageError>;

    /// List exams ordered by title.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the catalog cannot be read.
    async fn list_exams(&self, limit: u32) -> Result<Vec<ExamListing>, StorageError>;
}

/// Results store contract: insert-only history of finalized attempts.
#[async_trait]
pub trait ExamResultRepository: Send + Sync {
    /// Append a finalized result and return its new identifier.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the result cannot be stored.
    async fn append_result(&self, result: &ExamResult) -> Result<ResultId, StorageError>;

    /// Fetch a single result by identifier.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_result(&self, id: ResultId) -> Result<ExamResult, StorageError>;

    /// All attempts of one learner at one exam, most recent first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if history cannot be read.
    async fn results_for_exam(
        &self,
        student: StudentId,
        exam: ExamId,
    ) -> Result<Vec<ExamResultRow>, StorageError>;

    /// All attempts of one learner across exams, most recent first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if history cannot be read.
    async fn results_for_student(
        &self,
        student: StudentId,
    ) -> Result<Vec<ExamResultRow>, StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    exams: Arc<Mutex<HashMap<ExamId, Exam>>>,
    results: Arc<Mutex<Vec<ExamResultRow>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn filtered_results(
        &self,
        keep: impl Fn(&ExamResult) -> bool,
    ) -> Result<Vec<ExamResultRow>, StorageError> {
        let guard = self
            .results
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut rows: Vec<ExamResultRow> =
            guard.iter().filter(|r| keep(&r.result)).cloned().collect();
        rows.sort_by(|a, b| {
            b.result
                .submitted_at
                .cmp(&a.result.submitted_at)
                .then(b.id.cmp(&a.id))
        });
        Ok(rows)
    }
}

#[async_trait]
impl ExamContentRepository for InMemoryRepository {
    async fn upsert_exam(&self, exam: &Exam) -> Result<(), StorageError> {
        let mut guard = self
            .exams
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(exam.id(), exam.clone());
        Ok(())
    }

    async fn get_exam(&self, id: ExamId) -> Result<Exam, StorageError> {
        let guard = self
            .exams
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn list_exams(&self, limit: u32) -> Result<Vec<ExamListing>, StorageError> {
        let guard = self
            .exams
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut out: Vec<ExamListing> = guard.values().map(ExamListing::from_exam).collect();
        out.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        out.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(out)
    }
}

#[async_trait]
impl ExamResultRepository for InMemoryRepository {
    async fn append_result(&self, result: &ExamResult) -> Result<ResultId, StorageError> {
        let mut guard = self
            .results
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let id = guard.last().map_or(1, |row| row.id + 1);
        guard.push(ExamResultRow::new(id, result.clone()));
        Ok(id)
    }

    async fn get_result(&self, id: ResultId) -> Result<ExamResult, StorageError> {
        let guard = self
            .results
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard
            .iter()
            .find(|row| row.id == id)
            .map(|row| row.result.clone())
            .ok_or(StorageError::NotFound)
    }

    async fn results_for_exam(
        &self,
        student: StudentId,
        exam: ExamId,
    ) -> Result<Vec<ExamResultRow>, StorageError> {
        self.filtered_results(|r| r.student_id == student && r.exam_id == exam)
    }

    async fn results_for_student(
        &self,
        student: StudentId,
    ) -> Result<Vec<ExamResultRow>, StorageError> {
        self.filtered_results(|r| r.student_id == student)
    }
}

/// Aggregates the content provider and results store behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub exams: Arc<dyn ExamContentRepository>,
    pub results: Arc<dyn ExamResultRepository>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use exam_core::model::{AnswerOption, OptionId, Question, QuestionId};
    use exam_core::time::fixed_now;
    use std::collections::BTreeMap;

    fn build_exam(title: &str) -> Exam {
        let question = Question::new(
            QuestionId::generate(),
            "2 + 2?",
            vec![
                AnswerOption::new(OptionId::generate(), "4", true),
                AnswerOption::new(OptionId::generate(), "5", false),
            ],
        );
        Exam::new(ExamId::generate(), title, vec![question]).with_duration_minutes(10)
    }

    fn build_result(exam: ExamId, student: StudentId, score: u8, offset: i64) -> ExamResult {
        ExamResult {
            exam_id: exam,
            student_id: student,
            score,
            submitted_at: fixed_now() + Duration::minutes(offset),
            time_taken_secs: 42,
            answers: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn round_trips_exam_graph() {
        let repo = InMemoryRepository::new();
        let exam = build_exam("Arithmetic");
        repo.upsert_exam(&exam).await.unwrap();

        let fetched = repo.get_exam(exam.id()).await.unwrap();
        assert_eq!(fetched, exam);

        let missing = repo.get_exam(ExamId::generate()).await.unwrap_err();
        assert!(matches!(missing, StorageError::NotFound));
    }

    #[tokio::test]
    async fn lists_exams_by_title_with_limit() {
        let repo = InMemoryRepository::new();
        for title in ["Zoology", "Algebra", "Geometry"] {
            repo.upsert_exam(&build_exam(title)).await.unwrap();
        }
        let listed = repo.list_exams(2).await.unwrap();
        let titles: Vec<_> = listed.iter().map(|l| l.title.as_str()).collect();
        assert_eq!(titles, ["Algebra", "Geometry"]);
        assert_eq!(listed[0].question_count, 1);
    }

    #[tokio::test]
    async fn history_is_most_recent_first_and_scoped() {
        let repo = InMemoryRepository::new();
        let exam = ExamId::generate();
        let student = StudentId::generate();
        let other = StudentId::generate();

        let first = repo
            .append_result(&build_result(exam, student, 40, 0))
            .await
            .unwrap();
        let second = repo
            .append_result(&build_result(exam, student, 80, 5))
            .await
            .unwrap();
        repo.append_result(&build_result(exam, other, 99, 9))
            .await
            .unwrap();
        repo.append_result(&build_result(ExamId::generate(), student, 10, 7))
            .await
            .unwrap();

        let rows = repo.results_for_exam(student, exam).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, [second, first]);

        let all = repo.results_for_student(student).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].result.score, 10);

        assert_eq!(repo.get_result(first).await.unwrap().score, 40);
    }
}
