use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use exam_core::model::{
    AnswerOption, Exam, ExamId, ExamResult, OptionId, Question, QuestionId, StudentId,
};
use storage::repository::Storage;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    exam_file: Option<String>,
    student_id: Option<StudentId>,
    results: u32,
    now: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidStudentId { raw: String },
    InvalidResults { raw: String },
    InvalidDbUrl { raw: String },
    InvalidNow { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidStudentId { raw } => write!(f, "invalid --student value: {raw}"),
            ArgsError::InvalidResults { raw } => write!(f, "invalid --results value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidNow { raw } => {
                write!(f, "invalid --now value (expected RFC3339): {raw}")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url =
            std::env::var("EXAM_DB_URL").unwrap_or_else(|_| "sqlite://exam.sqlite3?mode=rwc".into());
        let mut student_id = std::env::var("EXAM_STUDENT_ID")
            .ok()
            .and_then(|value| value.parse::<StudentId>().ok());
        let mut exam_file = None;
        let mut results = 0;
        let mut now: Option<DateTime<Utc>> = None;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--exam-file" => {
                    exam_file = Some(require_value(&mut args, "--exam-file")?);
                }
                "--student" => {
                    let value = require_value(&mut args, "--student")?;
                    let parsed = value
                        .parse::<StudentId>()
                        .map_err(|_| ArgsError::InvalidStudentId { raw: value.clone() })?;
                    student_id = Some(parsed);
                }
                "--results" => {
                    let value = require_value(&mut args, "--results")?;
                    results = value
                        .parse::<u32>()
                        .map_err(|_| ArgsError::InvalidResults { raw: value.clone() })?;
                }
                "--now" => {
                    let value = require_value(&mut args, "--now")?;
                    let parsed = DateTime::parse_from_rfc3339(&value)
                        .map_err(|_| ArgsError::InvalidNow { raw: value.clone() })?
                        .with_timezone(&Utc);
                    now = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            exam_file,
            student_id,
            results,
            now,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite://exam.sqlite3?mode=rwc)");
    eprintln!("  --exam-file <path>        JSON exam to load instead of the built-in demo");
    eprintln!("  --student <uuid>          Learner that owns synthetic results");
    eprintln!("  --results <n>             Number of synthetic results to append (default: 0)");
    eprintln!("  --now <rfc3339>           Fixed current time for deterministic seeding");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  EXAM_DB_URL, EXAM_STUDENT_ID, RUST_LOG");
}

fn demo_exam() -> Exam {
    let samples = [
        ("Which keyword declares an immutable binding?", "let", "mut"),
        ("Which type owns a growable UTF-8 string?", "String", "&str"),
        ("Which trait enables the ? operator on errors?", "From", "Copy"),
        ("Which macro prints to stdout?", "println!", "eprintln!"),
        ("Which collection keeps keys sorted?", "BTreeMap", "HashMap"),
    ];
    let questions = samples
        .iter()
        .enumerate()
        .map(|(i, (prompt, right, wrong))| {
            let question = Question::new(
                QuestionId::generate(),
                *prompt,
                vec![
                    AnswerOption::new(OptionId::generate(), *right, true),
                    AnswerOption::new(OptionId::generate(), *wrong, false),
                ],
            );
            if i == 4 { question.with_points(2) } else { question }
        })
        .collect();

    Exam::new(ExamId::generate(), "Rust Basics", questions)
        .with_subject("Programming")
        .with_duration_minutes(10)
        .with_passing_score(60)
}

fn load_exam(path: Option<&str>) -> Result<Exam, Box<dyn std::error::Error>> {
    let exam = match path {
        Some(path) => serde_json::from_str::<Exam>(&std::fs::read_to_string(path)?)?,
        None => demo_exam(),
    };
    exam.validate()?;
    Ok(exam)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let storage = Storage::sqlite(&args.db_url).await?;
    let now = args.now.unwrap_or_else(Utc::now);

    let exam = load_exam(args.exam_file.as_deref())?;
    storage.exams.upsert_exam(&exam).await?;

    let student_id = args.student_id.unwrap_or_else(StudentId::generate);
    for i in 0..args.results {
        let submitted_at = now - Duration::days(i64::from(i));
        let score = u8::try_from((40 + i * 15) % 101).unwrap_or(100);
        let result = ExamResult {
            exam_id: exam.id(),
            student_id,
            score,
            submitted_at,
            time_taken_secs: 240 + i * 30,
            answers: BTreeMap::new(),
        };
        storage.results.append_result(&result).await?;
    }

    println!(
        "Seeded exam {} ({} questions) and {} results for student {} into {}",
        exam.id(),
        exam.questions().len(),
        args.results,
        student_id,
        args.db_url
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
