use std::collections::HashMap;

use chrono::Utc;
use exam_core::model::{Exam, ExamId, QuestionId};

use super::SqliteRepository;
use super::mapping::{
    conn, map_exam_row, map_listing_row, map_option_row, map_question_row, position_to_i64,
};
use crate::repository::{ExamContentRepository, ExamListing, StorageError};

#[async_trait::async_trait]
impl ExamContentRepository for SqliteRepository {
    async fn upsert_exam(&self, exam: &Exam) -> Result<(), StorageError> {
        let exam_id = exam.id().to_string();
        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO exams (
                id, title, subject, duration_minutes, passing_score, total_marks, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                subject = excluded.subject,
                duration_minutes = excluded.duration_minutes,
                passing_score = excluded.passing_score,
                total_marks = excluded.total_marks,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&exam_id)
        .bind(exam.title())
        .bind(exam.subject())
        .bind(exam.duration_minutes().map(i64::from))
        .bind(exam.passing_score().map(i64::from))
        .bind(exam.total_marks().map(i64::from))
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        // Replace the whole graph; options cascade with their questions.
        sqlx::query("DELETE FROM questions WHERE exam_id = ?1")
            .bind(&exam_id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        for (q_pos, question) in exam.questions().iter().enumerate() {
            let question_id = question.id.to_string();
            sqlx::query(
                r"
                    INSERT INTO questions (id, exam_id, position, text, points, hint)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ",
            )
            .bind(&question_id)
            .bind(&exam_id)
            .bind(position_to_i64(q_pos)?)
            .bind(&question.text)
            .bind(question.points.map(i64::from))
            .bind(question.hint.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

            for (o_pos, option) in question.options.iter().enumerate() {
                sqlx::query(
                    r"
                        INSERT INTO answer_options (
                            id, question_id, position, text, is_correct, explanation
                        )
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ",
                )
                .bind(option.id.to_string())
                .bind(&question_id)
                .bind(position_to_i64(o_pos)?)
                .bind(&option.text)
                .bind(option.is_correct)
                .bind(option.explanation.as_deref())
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
            }
        }

        tx.commit().await.map_err(conn)?;
        tracing::debug!(exam_id = %exam.id(), questions = exam.questions().len(), "exam upserted");
        Ok(())
    }

    async fn get_exam(&self, id: ExamId) -> Result<Exam, StorageError> {
        let exam_id = id.to_string();

        let exam_row = sqlx::query(
            r"
                SELECT id, title, subject, duration_minutes, passing_score, total_marks
                FROM exams
                WHERE id = ?1
            ",
        )
        .bind(&exam_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?
        .ok_or(StorageError::NotFound)?;

        let question_rows = sqlx::query(
            r"
                SELECT id, text, points, hint
                FROM questions
                WHERE exam_id = ?1
                ORDER BY position ASC
            ",
        )
        .bind(&exam_id)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let option_rows = sqlx::query(
            r"
                SELECT o.id, o.question_id, o.text, o.is_correct, o.explanation
                FROM answer_options o
                JOIN questions q ON q.id = o.question_id
                WHERE q.exam_id = ?1
                ORDER BY q.position ASC, o.position ASC
            ",
        )
        .bind(&exam_id)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut questions = Vec::with_capacity(question_rows.len());
        let mut index: HashMap<QuestionId, usize> = HashMap::new();
        for row in &question_rows {
            let question = map_question_row(row)?;
            index.insert(question.id, questions.len());
            questions.push(question);
        }
        for row in &option_rows {
            let (question_id, option) = map_option_row(row)?;
            let slot = index
                .get(&question_id)
                .copied()
                .ok_or_else(|| StorageError::Serialization(format!("orphan option {}", option.id)))?;
            questions[slot].options.push(option);
        }

        map_exam_row(&exam_row, questions)
    }

    async fn list_exams(&self, limit: u32) -> Result<Vec<ExamListing>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT
                    e.id, e.title, e.subject, e.duration_minutes,
                    (SELECT COUNT(*) FROM questions q WHERE q.exam_id = e.id) AS question_count
                FROM exams e
                ORDER BY e.title ASC, e.id ASC
                LIMIT ?1
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_listing_row(&row)?);
        }
        Ok(out)
    }
}
