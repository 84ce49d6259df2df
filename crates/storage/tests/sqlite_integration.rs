use std::collections::BTreeMap;

use chrono::Duration;
use exam_core::model::{
    AnswerOption, Exam, ExamId, ExamResult, OptionId, Question, QuestionId, StudentId,
};
use exam_core::time::fixed_now;
use storage::repository::{ExamContentRepository, ExamResultRepository, StorageError};
use storage::sqlite::SqliteRepository;

fn build_exam(title: &str) -> Exam {
    let q1 = Question::new(
        QuestionId::generate(),
        "Largest planet?",
        vec![
            AnswerOption::new(OptionId::generate(), "Jupiter", true)
                .with_explanation("By mass and radius."),
            AnswerOption::new(OptionId::generate(), "Mars", false),
            AnswerOption::new(OptionId::generate(), "Venus", false),
        ],
    )
    .with_points(2)
    .with_hint("Gas giant");
    let q2 = Question::new(
        QuestionId::generate(),
        "Closest star?",
        vec![
            AnswerOption::new(OptionId::generate(), "Proxima Centauri", false),
            AnswerOption::new(OptionId::generate(), "The Sun", true),
        ],
    );
    Exam::new(ExamId::generate(), title, vec![q1, q2])
        .with_subject("Astronomy")
        .with_duration_minutes(15)
        .with_passing_score(70)
        .with_total_marks(3)
}

async fn connect(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

#[tokio::test]
async fn sqlite_round_trips_exam_graph_in_order() {
    let repo = connect("memdb_exam_graph").await;
    let exam = build_exam("Space");
    repo.upsert_exam(&exam).await.unwrap();

    let fetched = repo.get_exam(exam.id()).await.unwrap();
    assert_eq!(fetched, exam);
    assert_eq!(fetched.questions()[0].options[0].text, "Jupiter");
    assert_eq!(fetched.questions()[0].points, Some(2));
    assert_eq!(fetched.questions()[1].points, None);
}

#[tokio::test]
async fn sqlite_upsert_replaces_questions() {
    let repo = connect("memdb_exam_replace").await;
    let exam = build_exam("Space");
    repo.upsert_exam(&exam).await.unwrap();

    let trimmed = Exam::new(exam.id(), "Space v2", vec![exam.questions()[1].clone()])
        .with_duration_minutes(5);
    repo.upsert_exam(&trimmed).await.unwrap();

    let fetched = repo.get_exam(exam.id()).await.unwrap();
    assert_eq!(fetched.title(), "Space v2");
    assert_eq!(fetched.questions().len(), 1);
    assert_eq!(fetched.subject(), None);

    let listed = repo.list_exams(10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].question_count, 1);
}

#[tokio::test]
async fn sqlite_missing_exam_is_not_found() {
    let repo = connect("memdb_exam_missing").await;
    let err = repo.get_exam(ExamId::generate()).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound));
}

#[tokio::test]
async fn sqlite_results_are_insert_only_history() {
    let repo = connect("memdb_results").await;
    let exam = build_exam("Space");
    let student = StudentId::generate();

    let q = &exam.questions()[0];
    let answers = BTreeMap::from([(q.id, q.options[0].id)]);
    let older = ExamResult {
        exam_id: exam.id(),
        student_id: student,
        score: 67,
        submitted_at: fixed_now(),
        time_taken_secs: 300,
        answers: answers.clone(),
    };
    let newer = ExamResult {
        score: 100,
        submitted_at: fixed_now() + Duration::hours(1),
        time_taken_secs: 120,
        ..older.clone()
    };

    let older_id = repo.append_result(&older).await.unwrap();
    let newer_id = repo.append_result(&newer).await.unwrap();
    assert_ne!(older_id, newer_id);

    let history = repo.results_for_exam(student, exam.id()).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, newer_id);
    assert_eq!(history[0].result, newer);
    assert_eq!(history[1].result.answers, answers);

    let fetched = repo.get_result(older_id).await.unwrap();
    assert_eq!(fetched, older);

    let other = repo
        .results_for_student(StudentId::generate())
        .await
        .unwrap();
    assert!(other.is_empty());
}

#[tokio::test]
async fn sqlite_migrations_are_idempotent() {
    let repo = connect("memdb_migrate_twice").await;
    repo.migrate().await.expect("second migrate");
    assert!(repo.list_exams(5).await.unwrap().is_empty());
}
