//! Console input parsing and text rendering for `exam take`.

use exam_core::model::{Question, ScoreBreakdown};
use services::AttemptProgress;

/// One line typed by the learner during an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// 1-based option number on the current question.
    Choose(usize),
    Next,
    Previous,
    /// 1-based question number.
    Goto(usize),
    Time,
    Help,
    Submit,
    Quit,
    Unknown,
}

impl Input {
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let mut parts = line.split_whitespace();
        let Some(head) = parts.next() else {
            return Self::Unknown;
        };
        if let Ok(n) = head.parse::<usize>() {
            return if n == 0 { Self::Unknown } else { Self::Choose(n) };
        }
        match head.to_ascii_lowercase().as_str() {
            "n" | "next" => Self::Next,
            "p" | "prev" | "previous" => Self::Previous,
            "g" | "goto" => match parts.next().and_then(|v| v.parse::<usize>().ok()) {
                Some(n) if n > 0 => Self::Goto(n),
                _ => Self::Unknown,
            },
            "t" | "time" => Self::Time,
            "h" | "help" | "?" => Self::Help,
            "s" | "submit" => Self::Submit,
            "q" | "quit" => Self::Quit,
            _ => Self::Unknown,
        }
    }
}

/// `mm:ss` rendering of a countdown.
#[must_use]
pub fn format_clock(secs: u32) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[must_use]
pub fn render_question(question: &Question, progress: &AttemptProgress, chosen: Option<usize>) -> String {
    let mut out = format!(
        "\n[{}/{}] {}  ({} left)\n",
        progress.current_index + 1,
        progress.question_count,
        question.text,
        format_clock(progress.remaining_secs)
    );
    for (i, option) in question.options.iter().enumerate() {
        let marker = if chosen == Some(i) { '*' } else { ' ' };
        out.push_str(&format!(" {marker}{}) {}\n", i + 1, option.text));
    }
    if let Some(hint) = &question.hint {
        out.push_str(&format!("  hint: {hint}\n"));
    }
    out
}

#[must_use]
pub fn render_breakdown(score: u8, breakdown: &ScoreBreakdown, time_taken_secs: u32) -> String {
    format!(
        "Score: {score}%  ({} of {} points)\nAnswered: {}  Correct: {}  Incorrect: {}  Unanswered: {}\nTime taken: {}",
        breakdown.earned_points,
        breakdown.total_points,
        breakdown.answered_count(),
        breakdown.correct_count,
        breakdown.incorrect_count,
        breakdown.unanswered_count,
        format_clock(time_taken_secs)
    )
}

pub const TAKE_HELP: &str =
    "Commands: <n> choose option, n/p next/previous, g <k> go to question, t time, s submit, q quit";

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::model::{AnswerOption, Lifecycle, OptionId, QuestionId};

    #[test]
    fn parses_console_commands() {
        assert_eq!(Input::parse("2"), Input::Choose(2));
        assert_eq!(Input::parse("0"), Input::Unknown);
        assert_eq!(Input::parse("  NEXT "), Input::Next);
        assert_eq!(Input::parse("g 3"), Input::Goto(3));
        assert_eq!(Input::parse("g"), Input::Unknown);
        assert_eq!(Input::parse("submit"), Input::Submit);
        assert_eq!(Input::parse(""), Input::Unknown);
    }

    #[test]
    fn clock_pads_minutes_and_seconds() {
        assert_eq!(format_clock(0), "00:00");
        assert_eq!(format_clock(65), "01:05");
        assert_eq!(format_clock(1_800), "30:00");
    }

    #[test]
    fn question_marks_chosen_option() {
        let question = Question::new(
            QuestionId::generate(),
            "Capital of France?",
            vec![
                AnswerOption::new(OptionId::generate(), "Paris", true),
                AnswerOption::new(OptionId::generate(), "Lyon", false),
            ],
        )
        .with_hint("On the Seine");
        let progress = AttemptProgress {
            current_index: 0,
            question_count: 4,
            answered: 1,
            remaining_secs: 125,
            lifecycle: Lifecycle::Running,
        };

        let text = render_question(&question, &progress, Some(1));
        assert!(text.contains("[1/4] Capital of France?  (02:05 left)"));
        assert!(text.contains("  1) Paris"));
        assert!(text.contains(" *2) Lyon"));
        assert!(text.contains("hint: On the Seine"));
    }

    #[test]
    fn breakdown_reports_answered_questions() {
        let breakdown = ScoreBreakdown {
            earned_points: 2,
            total_points: 4,
            correct_count: 2,
            incorrect_count: 1,
            unanswered_count: 1,
        };
        let text = render_breakdown(50, &breakdown, 95);
        assert!(text.starts_with("Score: 50%  (2 of 4 points)"));
        assert!(text.contains("Answered: 3  Correct: 2  Incorrect: 1  Unanswered: 1"));
        assert!(text.ends_with("Time taken: 01:35"));
    }
}
