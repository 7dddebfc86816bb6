//! Stdout protocol checker
//!
//! Classifies a run from its captured stdout alone. The last non-blank line
//! must be one of:
//!
//! ```text
//! RESULT: OK
//! RESULT: WA <n>
//! RESULT: WA TIMEOUT
//! ```
//!
//! Matching is case-insensitive. The checker also runs after abnormal
//! terminations, classifying whatever partial output exists.

use crate::core::{CaseVerdict, Verdict};
use crate::runner::ExecutionResult;

/// Stderr bytes quoted when the program printed nothing
const STDERR_PREVIEW_BYTES: usize = 200;
/// Characters of an unrecognized line kept for diagnosis
const FORMAT_ERROR_PREVIEW_CHARS: usize = 120;

/// Parsed form of the protocol line
#[derive(Debug, PartialEq)]
enum ResultLine {
    Ok,
    Mismatches(String),
    Timeout,
    Unrecognized,
}

/// Grade one run worth `points`
pub fn check(result: &ExecutionResult, points: f64) -> CaseVerdict {
    let text = String::from_utf8_lossy(&result.stdout);

    let Some(last) = text.lines().map(str::trim).filter(|l| !l.is_empty()).last() else {
        let preview = &result.stderr[..result.stderr.len().min(STDERR_PREVIEW_BYTES)];
        return CaseVerdict::fail(
            Verdict::WrongAnswer,
            format!("no output on stdout (status={})", result.status),
        )
        .with_extended(format!(
            "stderr_first200={:?}",
            String::from_utf8_lossy(preview)
        ));
    };

    match parse_result_line(last) {
        ResultLine::Ok => CaseVerdict::pass(points),
        ResultLine::Mismatches(count) => {
            CaseVerdict::fail(Verdict::WrongAnswer, format!("{} mismatch(es)", count))
        }
        ResultLine::Timeout => CaseVerdict::fail(Verdict::WrongAnswer, "timeout"),
        ResultLine::Unrecognized => CaseVerdict::fail(Verdict::WrongAnswer, "format error")
            .with_extended(last.chars().take(FORMAT_ERROR_PREVIEW_CHARS).collect::<String>()),
    }
}

fn parse_result_line(line: &str) -> ResultLine {
    let Some(rest) = strip_prefix_ignore_case(line, "RESULT:") else {
        return ResultLine::Unrecognized;
    };
    let rest = rest.trim_start();

    if rest.eq_ignore_ascii_case("OK") {
        return ResultLine::Ok;
    }

    let Some(after_wa) = strip_prefix_ignore_case(rest, "WA") else {
        return ResultLine::Unrecognized;
    };
    if !after_wa.starts_with(char::is_whitespace) {
        return ResultLine::Unrecognized;
    }
    let argument = after_wa.trim_start();

    let digits: String = argument.chars().take_while(char::is_ascii_digit).collect();
    if !digits.is_empty() {
        let count = digits
            .parse::<u64>()
            .map(|n| n.to_string())
            .unwrap_or(digits);
        return ResultLine::Mismatches(count);
    }

    if strip_prefix_ignore_case(argument, "TIMEOUT").is_some() {
        return ResultLine::Timeout;
    }

    ResultLine::Unrecognized
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}
