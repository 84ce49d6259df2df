use exam_core::model::{ExamId, ExamResult, StudentId};

use super::SqliteRepository;
use super::mapping::{answers_to_json, conn, map_result_row, map_result_row_with_id};
use crate::repository::{ExamResultRepository, ExamResultRow, ResultId, StorageError};

impl SqliteRepository {
    async fn fetch_result_rows(
        &self,
        student: StudentId,
        exam: Option<ExamId>,
    ) -> Result<Vec<ExamResultRow>, StorageError> {
        let mut sql = String::from(
            r"
                SELECT id, exam_id, student_id, score, submitted_at, time_taken_secs, answers
                FROM exam_results
                WHERE student_id = ?1
            ",
        );
        if exam.is_some() {
            sql.push_str(" AND exam_id = ?2");
        }
        sql.push_str(" ORDER BY submitted_at DESC, id DESC");

        let mut query = sqlx::query(&sql).bind(student.to_string());
        if let Some(exam) = exam {
            query = query.bind(exam.to_string());
        }

        let rows = query.fetch_all(&self.pool).await.map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_result_row_with_id(&row)?);
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl ExamResultRepository for SqliteRepository {
    async fn append_result(&self, result: &ExamResult) -> Result<ResultId, StorageError> {
        let res = sqlx::query(
            r"
                INSERT INTO exam_results (
                    exam_id, student_id, score, submitted_at, time_taken_secs, answers
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(result.exam_id.to_string())
        .bind(result.student_id.to_string())
        .bind(i64::from(result.score))
        .bind(result.submitted_at)
        .bind(i64::from(result.time_taken_secs))
        .bind(answers_to_json(&result.answers)?)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(res.last_insert_rowid())
    }

    async fn get_result(&self, id: ResultId) -> Result<ExamResult, StorageError> {
        let row = sqlx::query(
            r"
                SELECT exam_id, student_id, score, submitted_at, time_taken_secs, answers
                FROM exam_results
                WHERE id = ?1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?
        .ok_or(StorageError::NotFound)?;

        map_result_row(&row)
    }

    async fn results_for_exam(
        &self,
        student: StudentId,
        exam: ExamId,
    ) -> Result<Vec<ExamResultRow>, StorageError> {
        self.fetch_result_rows(student, Some(exam)).await
    }

    async fn results_for_student(
        &self,
        student: StudentId,
    ) -> Result<Vec<ExamResultRow>, StorageError> {
        self.fetch_result_rows(student, None).await
    }
}
