//! Compiler flag strategies
//!
//! Each strategy contributes an independent slice of the compiler flags.
//! They are applied in a fixed order: baseline, error limit, language
//! standard, architecture.

use crate::config::ToolchainConfig;
use crate::core::submission::meta_keys;
use crate::core::Submission;

/// Contributes compiler flags for one concern
pub trait FlagContributor: Send + Sync {
    fn contribute(&self, submission: &Submission, flags: &mut Vec<String>);
}

/// Warnings plus the baseline and per-submission preprocessor defines
pub struct BaselineFlags {
    defines: Vec<String>,
}

impl FlagContributor for BaselineFlags {
    fn contribute(&self, submission: &Submission, flags: &mut Vec<String>) {
        flags.push("-Wall".to_string());
        let extra = submission.meta.strings(meta_keys::DEFINES);
        for define in self.defines.iter().chain(extra.iter()) {
            let define = define.trim();
            if !define.is_empty() {
                flags.push(format!("-D{}", define));
            }
        }
    }
}

/// Caps the number of reported errors, when the compiler has a switch for it
pub struct ErrorLimitFlag {
    template: Option<String>,
    max_errors: u32,
}

impl FlagContributor for ErrorLimitFlag {
    fn contribute(&self, _submission: &Submission, flags: &mut Vec<String>) {
        if let Some(template) = &self.template {
            flags.push(template.replace("{}", &self.max_errors.to_string()));
        }
    }
}

/// Language standard (`-g2012`)
pub struct StandardFlag {
    standard: Option<String>,
}

impl FlagContributor for StandardFlag {
    fn contribute(&self, _submission: &Submission, flags: &mut Vec<String>) {
        if let Some(standard) = &self.standard {
            flags.push(format!("-g{}", standard));
        }
    }
}

/// Code generation target (`-t<target>`)
pub struct ArchitectureFlag {
    target: Option<String>,
}

impl FlagContributor for ArchitectureFlag {
    fn contribute(&self, _submission: &Submission, flags: &mut Vec<String>) {
        if let Some(target) = &self.target {
            flags.push(format!("-t{}", target));
        }
    }
}

/// The strategies for a toolchain, in application order
pub fn strategies(toolchain: &ToolchainConfig) -> Vec<Box<dyn FlagContributor>> {
    vec![
        Box::new(BaselineFlags {
            defines: toolchain.defines.clone(),
        }),
        Box::new(ErrorLimitFlag {
            template: toolchain.error_limit_flag.clone(),
            max_errors: toolchain.max_errors,
        }),
        Box::new(StandardFlag {
            standard: toolchain.standard.clone(),
        }),
        Box::new(ArchitectureFlag {
            target: toolchain.arch_target.clone(),
        }),
    ]
}

/// Resolve the full flag list for a submission
pub fn resolve_flags(toolchain: &ToolchainConfig, submission: &Submission) -> Vec<String> {
    let mut flags = Vec::new();
    for strategy in strategies(toolchain) {
        strategy.contribute(submission, &mut flags);
    }
    flags
}
