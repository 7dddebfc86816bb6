//! Synthesis providers and the metrics they report

use std::fmt;
use std::path::{Path, PathBuf};

use super::report::MetricMap;
use crate::config::SynthesisConfig;
use crate::core::submission::meta_keys;

/// External synthesis service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// FPGA flow, reports achievable clock frequency
    F4pga,
    /// ASIC flow, reports timing, area, power and a composite score
    OpenLane,
}

/// Which side of the threshold passes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Measured value must be at least the threshold
    AtLeast,
    /// Measured value must be at most the threshold
    AtMost,
}

/// One metric a provider reports and how it is graded
#[derive(Debug, PartialEq)]
pub struct MetricSpec {
    pub name: &'static str,
    /// Response keys that carry this metric, in preference order
    pub keys: &'static [&'static str],
    /// Metadata key holding the per-problem threshold
    pub threshold_key: &'static str,
    pub direction: Direction,
    pub unit: &'static str,
}

const F4PGA_METRICS: &[MetricSpec] = &[MetricSpec {
    name: "fmax",
    keys: &["fmax_mhz", "max_freq_mhz", "fmax"],
    threshold_key: "target_fmax_mhz",
    direction: Direction::AtLeast,
    unit: "MHz",
}];

const OPENLANE_METRICS: &[MetricSpec] = &[
    MetricSpec {
        name: "delay",
        keys: &["critical_path_ns", "critical_path_delay_ns"],
        threshold_key: "target_delay_ns",
        direction: Direction::AtMost,
        unit: "ns",
    },
    MetricSpec {
        name: "area",
        keys: &["core_area_um2", "core_area"],
        threshold_key: "target_area_um2",
        direction: Direction::AtMost,
        unit: "um^2",
    },
    MetricSpec {
        name: "power",
        keys: &["total_power_mw", "power_total_mw", "total_power"],
        threshold_key: "target_power_mw",
        direction: Direction::AtMost,
        unit: "mW",
    },
    MetricSpec {
        name: "score",
        keys: &["score", "ppa_score"],
        threshold_key: "target_score",
        direction: Direction::AtLeast,
        unit: "",
    },
];

impl Provider {
    /// Evaluation order; providers are called one after another
    pub const ALL: [Provider; 2] = [Provider::F4pga, Provider::OpenLane];

    /// Feedback segment tag
    pub fn tag(&self) -> &'static str {
        match self {
            Provider::F4pga => "[F4PGA]",
            Provider::OpenLane => "[OpenLane]",
        }
    }

    /// Metadata key naming the target (board or PDK); absent means disabled
    pub fn target_key(&self) -> &'static str {
        match self {
            Provider::F4pga => meta_keys::F4PGA_BOARD,
            Provider::OpenLane => meta_keys::OPENLANE_PDK,
        }
    }

    pub fn metrics(&self) -> &'static [MetricSpec] {
        match self {
            Provider::F4pga => F4PGA_METRICS,
            Provider::OpenLane => OPENLANE_METRICS,
        }
    }

    pub fn endpoint<'a>(&self, config: &'a SynthesisConfig) -> &'a str {
        match self {
            Provider::F4pga => &config.f4pga_endpoint,
            Provider::OpenLane => &config.openlane_endpoint,
        }
    }

    /// Constraint/config file for `target`, inside the problem's storage area
    pub fn constraint_path(&self, problems_root: &Path, problem_id: &str, target: &str) -> PathBuf {
        let problem_dir = problems_root.join(problem_id);
        match self {
            Provider::F4pga => problem_dir.join("f4pga").join(format!("{}.xdc", target)),
            Provider::OpenLane => problem_dir.join("openlane").join(target).join("config.json"),
        }
    }

    /// Multipart field carrying the constraint/config file
    pub fn constraint_field(&self) -> &'static str {
        match self {
            Provider::F4pga => "constraints",
            Provider::OpenLane => "config",
        }
    }

    /// Fixed text fields sent along with the files
    pub fn extra_fields(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Provider::F4pga => &[("top", "top")],
            Provider::OpenLane => &[],
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::F4pga => write!(f, "F4PGA"),
            Provider::OpenLane => write!(f, "OpenLane"),
        }
    }
}

impl MetricSpec {
    /// First response key that carries a value
    pub fn lookup(&self, metrics: &MetricMap) -> Option<f64> {
        self.keys.iter().find_map(|key| metrics.get(*key).copied())
    }
}

/// Measured value of one metric against its (optional) threshold
#[derive(Debug, Clone, PartialEq)]
pub struct MetricCheck {
    pub provider: Provider,
    pub metric: &'static MetricSpec,
    pub measured: Option<f64>,
    pub threshold: Option<f64>,
}

impl MetricCheck {
    /// Only a reported value on the wrong side of a configured threshold fails
    pub fn failed(&self) -> bool {
        match (self.measured, self.threshold) {
            (Some(measured), Some(threshold)) => match self.metric.direction {
                Direction::AtLeast => measured < threshold,
                Direction::AtMost => measured > threshold,
            },
            _ => false,
        }
    }

    /// Human-readable actual vs. target line
    pub fn describe(&self) -> String {
        let measured = match self.measured {
            Some(value) => with_unit(value, self.metric.unit),
            None => "not reported".to_string(),
        };
        let target = match self.threshold {
            Some(threshold) => {
                let op = match self.metric.direction {
                    Direction::AtLeast => ">=",
                    Direction::AtMost => "<=",
                };
                format!("target {} {}", op, with_unit(threshold, self.metric.unit))
            }
            None => "no target".to_string(),
        };
        let outcome = match (self.threshold, self.failed()) {
            (None, _) => "",
            (Some(_), true) => " FAIL",
            (Some(_), false) => " OK",
        };
        format!(
            "{} {}: {} ({}){}",
            self.provider.tag(),
            self.metric.name,
            measured,
            target,
            outcome
        )
    }
}

fn with_unit(value: f64, unit: &str) -> String {
    if unit.is_empty() {
        format!("{}", value)
    } else {
        format!("{} {}", value, unit)
    }
}
