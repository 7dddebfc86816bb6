use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length (in characters) of the short feedback line
pub const MAX_FEEDBACK_CHARS: usize = 64;

/// Verdict from judging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    OutputLimitExceeded,
    RuntimeError,
    CompileError,
    InternalError,
    PerformanceLimitExceeded,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Accepted => "accepted",
            Verdict::WrongAnswer => "wrong_answer",
            Verdict::TimeLimitExceeded => "time_limit_exceeded",
            Verdict::MemoryLimitExceeded => "memory_limit_exceeded",
            Verdict::OutputLimitExceeded => "output_limit_exceeded",
            Verdict::RuntimeError => "runtime_error",
            Verdict::CompileError => "compile_error",
            Verdict::InternalError => "internal_error",
            Verdict::PerformanceLimitExceeded => "performance_limit_exceeded",
        };
        write!(f, "{}", s)
    }
}

/// Graded outcome of one test case
///
/// Created by the checker. Later stages never touch it directly; they emit
/// [`Adjustment`]s which are folded in with [`CaseVerdict::adjust`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseVerdict {
    pub verdict: Verdict,
    pub points: f64,
    pub feedback: String,
    pub extended_feedback: String,
}

impl CaseVerdict {
    /// Passing verdict worth `points`
    pub fn pass(points: f64) -> Self {
        Self {
            verdict: Verdict::Accepted,
            points: points.max(0.0),
            feedback: String::new(),
            extended_feedback: String::new(),
        }
    }

    /// Failing verdict with zero points
    pub fn fail(verdict: Verdict, feedback: impl Into<String>) -> Self {
        Self {
            verdict,
            points: 0.0,
            feedback: bound_feedback(&feedback.into()),
            extended_feedback: String::new(),
        }
    }

    pub fn with_extended(mut self, extended: impl Into<String>) -> Self {
        self.extended_feedback = extended.into();
        self
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Accepted
    }

    /// Apply one adjustment. Points never increase and a failing verdict is
    /// never turned back into a pass.
    pub fn adjust(self, adjustment: Adjustment) -> Self {
        let mut next = self;
        match adjustment {
            Adjustment::Annotate(segment) => {
                append_segment(&mut next.extended_feedback, &segment);
            }
            Adjustment::Demote { verdict, feedback } => {
                debug_assert!(verdict != Verdict::Accepted);
                // Internal errors are triaged separately, so they replace any
                // earlier failure; other demotions only replace a pass.
                if next.passed() || verdict == Verdict::InternalError {
                    next.verdict = verdict;
                    next.feedback = bound_feedback(&feedback);
                }
                next.points = 0.0;
            }
        }
        next
    }

    /// Fold a sequence of adjustments in order
    pub fn adjust_all(self, adjustments: impl IntoIterator<Item = Adjustment>) -> Self {
        adjustments
            .into_iter()
            .fold(self, |verdict, adjustment| verdict.adjust(adjustment))
    }
}

/// A change requested by a post-check stage
#[derive(Debug, Clone, PartialEq)]
pub enum Adjustment {
    /// Append a tagged segment (e.g. `[WAVEFORM]...`) to the extended feedback
    Annotate(String),
    /// Force a failing verdict with zero points
    Demote { verdict: Verdict, feedback: String },
}

impl Adjustment {
    pub fn demote(verdict: Verdict, feedback: impl Into<String>) -> Self {
        Adjustment::Demote {
            verdict,
            feedback: feedback.into(),
        }
    }
}

fn append_segment(extended: &mut String, segment: &str) {
    if !extended.is_empty() && !extended.ends_with('\n') {
        extended.push('\n');
    }
    extended.push_str(segment);
}

fn bound_feedback(feedback: &str) -> String {
    feedback.chars().take(MAX_FEEDBACK_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_display() {
        assert_eq!(Verdict::Accepted.to_string(), "accepted");
        assert_eq!(Verdict::WrongAnswer.to_string(), "wrong_answer");
        assert_eq!(
            Verdict::PerformanceLimitExceeded.to_string(),
            "performance_limit_exceeded"
        );
        assert_eq!(
            serde_json::to_string(&Verdict::InternalError).unwrap(),
            "\"internal_error\""
        );
    }

    #[test]
    fn test_annotate_appends_newline_separated_segments() {
        let verdict = CaseVerdict::pass(10.0)
            .adjust(Adjustment::Annotate("[WAVEFORM]VCD:/waves/1.vcd".into()))
            .adjust(Adjustment::Annotate("[PPA] all targets met".into()));

        assert!(verdict.passed());
        assert_eq!(verdict.points, 10.0);
        assert_eq!(
            verdict.extended_feedback,
            "[WAVEFORM]VCD:/waves/1.vcd\n[PPA] all targets met"
        );
    }

    #[test]
    fn test_demote_pass_forces_zero_points() {
        let verdict = CaseVerdict::pass(25.0).adjust(Adjustment::demote(
            Verdict::PerformanceLimitExceeded,
            "PPA: 1 item(s) failed",
        ));

        assert_eq!(verdict.verdict, Verdict::PerformanceLimitExceeded);
        assert_eq!(verdict.points, 0.0);
        assert_eq!(verdict.feedback, "PPA: 1 item(s) failed");
    }

    #[test]
    fn test_demote_keeps_earlier_failure() {
        let verdict = CaseVerdict::fail(Verdict::WrongAnswer, "3 mismatch(es)").adjust(
            Adjustment::demote(Verdict::PerformanceLimitExceeded, "PPA: 2 item(s) failed"),
        );

        assert_eq!(verdict.verdict, Verdict::WrongAnswer);
        assert_eq!(verdict.feedback, "3 mismatch(es)");
        assert_eq!(verdict.points, 0.0);
    }

    #[test]
    fn test_internal_error_replaces_any_failure() {
        let verdict = CaseVerdict::fail(Verdict::WrongAnswer, "timeout")
            .adjust(Adjustment::demote(Verdict::InternalError, "missing constraints"));

        assert_eq!(verdict.verdict, Verdict::InternalError);
        assert_eq!(verdict.feedback, "missing constraints");
    }

    #[test]
    fn test_adjustments_never_promote() {
        let adjustments = vec![
            Adjustment::demote(Verdict::TimeLimitExceeded, "time limit"),
            Adjustment::Annotate("[PPA] all targets met".into()),
        ];
        let verdict = CaseVerdict::pass(5.0).adjust_all(adjustments);

        assert!(!verdict.passed());
        assert_eq!(verdict.points, 0.0);
        assert_eq!(verdict.extended_feedback, "[PPA] all targets met");
    }

    #[test]
    fn test_feedback_is_bounded() {
        let long = "x".repeat(500);
        let verdict = CaseVerdict::fail(Verdict::WrongAnswer, long);
        assert_eq!(verdict.feedback.chars().count(), MAX_FEEDBACK_CHARS);
    }
}
