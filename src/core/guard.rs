//! KN-007: Guard predicates.
//!
//! A guard is a shell snippet run with `sh -c`. `only_if` skips the resource
//! when the predicate fails; `not_if` skips it when the predicate succeeds.
//! A predicate that cannot be run at all also skips the resource.

use crate::error::Error;
use crate::transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    OnlyIf,
    NotIf,
}

impl Guard {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::OnlyIf => "only_if",
            Self::NotIf => "not_if",
        }
    }

    /// Whether an exit code means "skip".
    fn skips_on(self, exit_code: i32) -> bool {
        match self {
            Self::OnlyIf => exit_code != 0,
            Self::NotIf => exit_code == 0,
        }
    }
}

/// Evaluate `predicate` for `resource`. `None` never skips.
pub fn should_skip(guard: Guard, resource: &str, predicate: Option<&str>) -> bool {
    let Some(predicate) = predicate else {
        return false;
    };

    match transport::run_predicate(predicate) {
        Ok(result) => {
            let skip = guard.skips_on(result.exit_code);
            if skip {
                log::info!(
                    "skipping '{}': {} `{}` exited {}",
                    resource,
                    guard.keyword(),
                    predicate,
                    result.exit_code
                );
                if !result.raw.is_empty() {
                    log::debug!("{}", result.formatted());
                }
            }
            skip
        }
        Err(e) => {
            let err = Error::GuardEvaluation {
                resource: resource.to_string(),
                guard: guard.keyword(),
                message: e.to_string(),
            };
            log::error!("{}", err);
            true
        }
    }
}
