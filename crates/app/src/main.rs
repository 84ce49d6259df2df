use std::fmt;
use std::sync::Arc;

use exam_core::model::{Exam, ExamId, SessionError, StudentId, TeacherContext};
use services::{
    AttemptStatus, Clock, ExamAttempt, ExamContentService, ExamHistoryService, ExamLoopService,
    Persistence,
};
use storage::repository::Storage;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod prompt;

use prompt::{Input, TAKE_HELP, format_clock, render_breakdown, render_question};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingArgument { what: &'static str },
    UnknownArg(String),
    InvalidExamId { raw: String },
    InvalidStudentId { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingArgument { what } => write!(f, "missing {what}"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidExamId { raw } => write!(f, "invalid --exam value: {raw}"),
            ArgsError::InvalidStudentId { raw } => write!(f, "invalid --student value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
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

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  exam import <file.json>         [--db <sqlite_url>]");
    eprintln!("  exam list                       [--db <sqlite_url>]");
    eprintln!("  exam take    --exam <id> [--student <id>] [--teacher <name>] [--db <sqlite_url>]");
    eprintln!("  exam history --exam <id> [--student <id>] [--db <sqlite_url>]");
    eprintln!("  exam stats   [--student <id>]   [--db <sqlite_url>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite://exam.sqlite3");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  EXAM_DB_URL, EXAM_STUDENT_ID, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Import,
    List,
    Take,
    History,
    Stats,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "import" => Some(Self::Import),
            "list" => Some(Self::List),
            "take" => Some(Self::Take),
            "history" => Some(Self::History),
            "stats" => Some(Self::Stats),
            _ => None,
        }
    }
}

struct Args {
    db_url: String,
    exam_id: Option<ExamId>,
    student_id: Option<StudentId>,
    teacher: Option<String>,
    file: Option<String>,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("EXAM_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://exam.sqlite3".into(), normalize_sqlite_url);
        let mut student_id = std::env::var("EXAM_STUDENT_ID")
            .ok()
            .and_then(|value| value.parse::<StudentId>().ok());
        let mut exam_id = None;
        let mut teacher = None;
        let mut file = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--exam" => {
                    let value = require_value(args, "--exam")?;
                    let parsed = value
                        .parse::<ExamId>()
                        .map_err(|_| ArgsError::InvalidExamId { raw: value.clone() })?;
                    exam_id = Some(parsed);
                }
                "--student" => {
                    let value = require_value(args, "--student")?;
                    let parsed = value
                        .parse::<StudentId>()
                        .map_err(|_| ArgsError::InvalidStudentId { raw: value.clone() })?;
                    student_id = Some(parsed);
                }
                "--teacher" => {
                    teacher = Some(require_value(args, "--teacher")?);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ if !arg.starts_with("--") && file.is_none() => file = Some(arg),
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            exam_id,
            student_id,
            teacher,
            file,
        })
    }

    fn exam(&self) -> Result<ExamId, ArgsError> {
        self.exam_id
            .ok_or(ArgsError::MissingArgument { what: "--exam <id>" })
    }

    fn student(&self) -> Result<StudentId, ArgsError> {
        self.student_id.ok_or(ArgsError::MissingArgument {
            what: "--student <id> (or EXAM_STUDENT_ID)",
        })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);

    let cmd = match argv.next() {
        None => {
            print_usage();
            return Err(ArgsError::MissingArgument { what: "command" }.into());
        }
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown command: {first}");
            print_usage();
            ArgsError::UnknownArg(first.clone())
        })?,
    };

    let args = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    // Open + migrate SQLite at startup. Keep this in the binary glue so core/services stay pure.
    prepare_sqlite_file(&args.db_url)?;
    let storage = Storage::sqlite(&args.db_url).await?;
    tracing::debug!(db_url = %args.db_url, ?cmd, "storage ready");
    let clock = Clock::default();

    match cmd {
        Command::Import => {
            let file = args.file.as_deref().ok_or(ArgsError::MissingArgument {
                what: "exam file",
            })?;
            let exam: Exam = serde_json::from_str(&std::fs::read_to_string(file)?)?;
            ExamContentService::new(Arc::clone(&storage.exams))
                .publish_exam(&exam)
                .await?;
            println!(
                "Imported \"{}\" ({} questions) as {}",
                exam.title(),
                exam.questions().len(),
                exam.id()
            );
        }
        Command::List => {
            let listings = ExamContentService::new(Arc::clone(&storage.exams))
                .list_exams(200)
                .await?;
            if listings.is_empty() {
                println!("No exams yet. Import one with `exam import <file.json>`.");
            }
            for listing in listings {
                println!(
                    "{}  {}  [{}]  {} questions, {} min",
                    listing.id,
                    listing.title,
                    listing.subject.as_deref().unwrap_or("-"),
                    listing.question_count,
                    listing.duration_minutes.filter(|m| *m > 0).map_or_else(
                        || exam_core::model::DEFAULT_DURATION_MINUTES.to_string(),
                        |m| m.to_string()
                    )
                );
            }
        }
        Command::Take => {
            let exam_id = args.exam()?;
            let student_id = match args.student_id {
                Some(id) => id,
                None => {
                    let id = StudentId::generate();
                    println!("No student id given; using {id}");
                    id
                }
            };
            let context = TeacherContext::new(args.teacher.clone(), None);
            let loop_svc = ExamLoopService::new(
                clock,
                Arc::clone(&storage.exams),
                Arc::clone(&storage.results),
            );
            let attempt = loop_svc.start_exam(exam_id, student_id, context).await?;
            take_exam(&loop_svc, &attempt).await?;
        }
        Command::History => {
            let exam_id = args.exam()?;
            let student_id = args.student()?;
            let passing_score = storage
                .exams
                .get_exam(exam_id)
                .await
                .ok()
                .and_then(|exam| exam.passing_score());
            let history = ExamHistoryService::new(Arc::clone(&storage.results))
                .exam_history(student_id, exam_id, passing_score)
                .await?;

            if history.attempts.is_empty() {
                println!("No attempts recorded.");
                return Ok(());
            }
            for row in &history.attempts {
                let result = &row.result;
                println!(
                    "#{}  {}  {:>3}%  {}  {}",
                    row.id,
                    result.submitted_at.format("%Y-%m-%d %H:%M"),
                    result.score,
                    format_clock(result.time_taken_secs),
                    if result.passed(passing_score) { "passed" } else { "failed" }
                );
            }
            println!(
                "Highest: {}%  Average: {}%  Latest: {}",
                history.highest_score,
                history.average_score,
                match history.latest_passed {
                    Some(true) => "passed",
                    Some(false) => "failed",
                    None => "-",
                }
            );
        }
        Command::Stats => {
            let student_id = args.student()?;
            let stats = ExamHistoryService::new(Arc::clone(&storage.results))
                .learner_stats(student_id)
                .await?;
            println!(
                "Exams taken: {}  Distinct exams: {}  Average score: {}%  Pass rate: {}%",
                stats.total_exams_taken, stats.distinct_exams, stats.average_score, stats.pass_rate
            );
        }
    }

    Ok(())
}

/// What the console loop does after one line of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Show,
    Stay,
    Submit,
    Cancelled,
    /// The attempt left `Running` underneath the input (expiry or supersession).
    Ended,
}

fn apply_input(attempt: &ExamAttempt, input: Input) -> Result<Step, SessionError> {
    match input {
        Input::Choose(n) => {
            let Some(question) = attempt.current_question() else {
                println!("This exam has no questions. Type s to submit.");
                return Ok(Step::Stay);
            };
            let Some(option) = question.options.get(n - 1) else {
                println!("No option {n} on this question.");
                return Ok(Step::Stay);
            };
            match attempt.select_answer(question.id, option.id) {
                Ok(_) => Ok(Step::Show),
                Err(SessionError::InvalidState { .. }) => Ok(Step::Ended),
                Err(err) => Err(err),
            }
        }
        Input::Next => {
            attempt.next_question();
            Ok(Step::Show)
        }
        Input::Previous => {
            attempt.previous_question();
            Ok(Step::Show)
        }
        Input::Goto(n) => {
            attempt.goto_question(n - 1);
            Ok(Step::Show)
        }
        Input::Time => {
            println!("{} left", format_clock(attempt.remaining_secs()));
            Ok(Step::Stay)
        }
        Input::Help | Input::Unknown => {
            println!("{TAKE_HELP}");
            Ok(Step::Stay)
        }
        Input::Submit => Ok(Step::Submit),
        Input::Quit => match attempt.cancel() {
            Ok(()) => Ok(Step::Cancelled),
            Err(SessionError::InvalidState { .. }) => Ok(Step::Ended),
            Err(err) => Err(err),
        },
    }
}

async fn take_exam(
    loop_svc: &ExamLoopService,
    attempt: &ExamAttempt,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{TAKE_HELP}");
    show_current(attempt);

    loop {
        tokio::select! {
            biased;
            status = attempt.finished() => {
                if let AttemptStatus::Submitted { auto_submitted: true, .. } = status {
                    println!("\nTime is up. Your answers were submitted automatically.");
                }
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match apply_input(attempt, Input::parse(&line))? {
                    Step::Show => show_current(attempt),
                    Step::Stay => {}
                    Step::Submit => break,
                    Step::Cancelled => {
                        println!("Attempt cancelled; nothing was recorded.");
                        return Ok(());
                    }
                    Step::Ended => {
                        if let AttemptStatus::Submitted { auto_submitted: true, .. } = attempt.status() {
                            println!("\nTime is up. Your answers were submitted automatically.");
                        }
                        break;
                    }
                }
            }
        }
    }

    if attempt.status() == AttemptStatus::Cancelled {
        println!("Attempt was cancelled; nothing was recorded.");
        return Ok(());
    }

    let outcome = loop_svc.submit(attempt).await?;
    println!(
        "\n{}",
        render_breakdown(
            outcome.submitted.score,
            &outcome.submitted.breakdown,
            outcome.submitted.time_taken_secs
        )
    );
    match outcome.persistence {
        Persistence::Saved(id) => println!("Result saved (#{id})."),
        Persistence::InFlight => println!("Result is being saved."),
        Persistence::Failed(reason) => {
            eprintln!("Saving the result failed ({reason}); retrying once.");
            let id = loop_svc.finalize_result(attempt).await?;
            println!("Result saved (#{id}).");
        }
    }
    Ok(())
}

fn show_current(attempt: &ExamAttempt) {
    let snapshot = attempt.snapshot();
    let Some(question) = snapshot.current_question() else {
        println!("\nThis exam has no questions. Type s to submit.");
        return;
    };
    let chosen = snapshot
        .answer_for(question.id)
        .and_then(|id| question.options.iter().position(|o| o.id == id));
    print!("{}", render_question(question, &attempt.progress(), chosen));
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }

    // Stdin is read on a blocking thread that cannot be interrupted; skip waiting for it.
    std::process::exit(0);
}
