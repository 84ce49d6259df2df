use std::collections::BTreeMap;
use std::str::FromStr;

use exam_core::model::{
    AnswerOption, Exam, ExamId, ExamResult, OptionId, Question, QuestionId, StudentId,
};
use sqlx::Row;

use crate::repository::{ExamListing, ExamResultRow, StorageError};

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn parse_id<T>(field: &'static str, raw: &str) -> Result<T, StorageError>
where
    T: FromStr,
{
    raw.parse::<T>()
        .map_err(|_| StorageError::Serialization(format!("invalid {field}: {raw}")))
}

pub(crate) fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

fn opt_u32(field: &'static str, v: Option<i64>) -> Result<Option<u32>, StorageError> {
    v.map(|v| u32_from_i64(field, v)).transpose()
}

pub(crate) fn position_to_i64(position: usize) -> Result<i64, StorageError> {
    i64::try_from(position).map_err(|_| StorageError::Serialization("position overflow".into()))
}

pub(crate) fn answers_to_json(
    answers: &BTreeMap<QuestionId, OptionId>,
) -> Result<String, StorageError> {
    serde_json::to_string(answers).map_err(ser)
}

fn answers_from_json(raw: &str) -> Result<BTreeMap<QuestionId, OptionId>, StorageError> {
    serde_json::from_str(raw).map_err(ser)
}

pub(crate) fn map_option_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<(QuestionId, AnswerOption), StorageError> {
    let question_id = parse_id(
        "question_id",
        &row.try_get::<String, _>("question_id").map_err(ser)?,
    )?;
    let option = AnswerOption {
        id: parse_id::<OptionId>("option_id", &row.try_get::<String, _>("id").map_err(ser)?)?,
        text: row.try_get("text").map_err(ser)?,
        is_correct: row.try_get("is_correct").map_err(ser)?,
        explanation: row.try_get("explanation").map_err(ser)?,
    };
    Ok((question_id, option))
}

pub(crate) fn map_question_row(row: &sqlx::sqlite::SqliteRow) -> Result<Question, StorageError> {
    Ok(Question {
        id: parse_id::<QuestionId>("question_id", &row.try_get::<String, _>("id").map_err(ser)?)?,
        text: row.try_get("text").map_err(ser)?,
        points: opt_u32("points", row.try_get("points").map_err(ser)?)?,
        hint: row.try_get("hint").map_err(ser)?,
        options: Vec::new(),
    })
}

pub(crate) fn map_exam_row(
    row: &sqlx::sqlite::SqliteRow,
    questions: Vec<Question>,
) -> Result<Exam, StorageError> {
    let id = parse_id::<ExamId>("exam_id", &row.try_get::<String, _>("id").map_err(ser)?)?;
    let title: String = row.try_get("title").map_err(ser)?;
    let mut exam = Exam::new(id, title, questions);

    if let Some(subject) = row.try_get::<Option<String>, _>("subject").map_err(ser)? {
        exam = exam.with_subject(subject);
    }
    if let Some(minutes) = opt_u32("duration_minutes", row.try_get("duration_minutes").map_err(ser)?)? {
        exam = exam.with_duration_minutes(minutes);
    }
    if let Some(score) = row.try_get::<Option<i64>, _>("passing_score").map_err(ser)? {
        let score = u8::try_from(score)
            .map_err(|_| StorageError::Serialization(format!("invalid passing_score: {score}")))?;
        exam = exam.with_passing_score(score);
    }
    if let Some(marks) = opt_u32("total_marks", row.try_get("total_marks").map_err(ser)?)? {
        exam = exam.with_total_marks(marks);
    }
    Ok(exam)
}

pub(crate) fn map_listing_row(row: &sqlx::sqlite::SqliteRow) -> Result<ExamListing, StorageError> {
    Ok(ExamListing {
        id: parse_id("exam_id", &row.try_get::<String, _>("id").map_err(ser)?)?,
        title: row.try_get("title").map_err(ser)?,
        subject: row.try_get("subject").map_err(ser)?,
        duration_minutes: opt_u32("duration_minutes", row.try_get("duration_minutes").map_err(ser)?)?,
        question_count: u32_from_i64(
            "question_count",
            row.try_get::<i64, _>("question_count").map_err(ser)?,
        )?,
    })
}

pub(crate) fn map_result_row(row: &sqlx::sqlite::SqliteRow) -> Result<ExamResult, StorageError> {
    let score: i64 = row.try_get("score").map_err(ser)?;
    Ok(ExamResult {
        exam_id: parse_id::<ExamId>("exam_id", &row.try_get::<String, _>("exam_id").map_err(ser)?)?,
        student_id: parse_id::<StudentId>(
            "student_id",
            &row.try_get::<String, _>("student_id").map_err(ser)?,
        )?,
        score: u8::try_from(score)
            .map_err(|_| StorageError::Serialization(format!("invalid score: {score}")))?,
        submitted_at: row.try_get("submitted_at").map_err(ser)?,
        time_taken_secs: u32_from_i64(
            "time_taken_secs",
            row.try_get::<i64, _>("time_taken_secs").map_err(ser)?,
        )?,
        answers: answers_from_json(&row.try_get::<String, _>("answers").map_err(ser)?)?,
    })
}

pub(crate) fn map_result_row_with_id(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<ExamResultRow, StorageError> {
    let id: i64 = row.try_get("id").map_err(ser)?;
    Ok(ExamResultRow::new(id, map_result_row(row)?))
}
