//! Failure escalation: bounded automatic retry, then a human decision.
//!
//! Per attempt the outcome is success, or a failure of class `transient`,
//! `environment` or `logic`. Environment failures escalate at once. Other
//! failures are retried while fewer than `max_retries` retries have been
//! spent, so with the default bound of 2 a unit that always fails runs three
//! times before a `debug-escalation` checkpoint is raised.

use std::time::Duration;

use tracing::warn;

use crate::checkpoint::Checkpoint;
use crate::errors::{FailureClass, TaskFailure};
use crate::executor::WorkUnit;

pub const DEFAULT_MAX_RETRIES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationPolicy {
    pub max_retries: u32,
    /// Delay before retrying a transient failure.
    pub backoff: Duration,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Duration::ZERO,
        }
    }
}

/// Retry bookkeeping for the unit currently being worked on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Automatic retries spent on this unit.
    pub retries: u32,
    pub last_class: Option<FailureClass>,
}

impl RetryState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Total executions so far, counting the first.
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EscalationOutcome {
    Retry { retry: u32, delay: Duration },
    Escalate(Checkpoint),
}

impl EscalationPolicy {
    /// Decide what happens after `unit` failed with `failure`.
    pub fn on_failure(
        &self,
        unit: &WorkUnit,
        state: &mut RetryState,
        failure: &TaskFailure,
    ) -> EscalationOutcome {
        state.last_class = Some(failure.class);

        let retryable = failure.class != FailureClass::Environment;
        if retryable && state.retries < self.max_retries {
            state.retries += 1;
            let delay = match failure.class {
                FailureClass::Transient => self.backoff,
                _ => Duration::ZERO,
            };
            warn!(
                unit = %unit.label(),
                class = %failure.class,
                retry = state.retries,
                max_retries = self.max_retries,
                "retrying after failure: {}",
                failure.message
            );
            return EscalationOutcome::Retry {
                retry: state.retries,
                delay,
            };
        }

        warn!(
            unit = %unit.label(),
            class = %failure.class,
            attempts = state.attempts(),
            "escalating failure: {}",
            failure.message
        );
        EscalationOutcome::Escalate(Checkpoint::DebugEscalation {
            unit: unit.clone(),
            failure: failure.clone(),
            attempts: state.attempts(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;
    use crate::plan::Task;

    fn unit() -> WorkUnit {
        WorkUnit::task(Task::new("T-2", "second", ""))
    }

    #[test]
    fn test_logic_failures_retry_exactly_max_retries_times() {
        let policy = EscalationPolicy::default();
        let mut state = RetryState::default();
        let failure = TaskFailure::logic("tests failed");

        let mut retries = 0;
        let checkpoint = loop {
            match policy.on_failure(&unit(), &mut state, &failure) {
                EscalationOutcome::Retry { delay, .. } => {
                    retries += 1;
                    assert_eq!(delay, Duration::ZERO);
                }
                EscalationOutcome::Escalate(cp) => break cp,
            }
        };
        assert_eq!(retries, 2);
        match checkpoint {
            Checkpoint::DebugEscalation { attempts, failure, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(failure.message, "tests failed");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_environment_failures_never_retry() {
        let policy = EscalationPolicy::default();
        let mut state = RetryState::default();
        let outcome = policy.on_failure(
            &unit(),
            &mut state,
            &TaskFailure::environment("no toolchain"),
        );
        assert!(matches!(
            outcome,
            EscalationOutcome::Escalate(Checkpoint::DebugEscalation { attempts: 1, .. })
        ));
        assert_eq!(state.retries, 0);
        assert_eq!(state.last_class, Some(FailureClass::Environment));
    }

    #[test]
    fn test_transient_retries_use_backoff() {
        let policy = EscalationPolicy {
            max_retries: 1,
            backoff: Duration::from_millis(250),
        };
        let mut state = RetryState::default();
        let failure = TaskFailure::transient("rate limited");
        assert_eq!(
            policy.on_failure(&unit(), &mut state, &failure),
            EscalationOutcome::Retry {
                retry: 1,
                delay: Duration::from_millis(250)
            }
        );
        assert!(matches!(
            policy.on_failure(&unit(), &mut state, &failure),
            EscalationOutcome::Escalate(_)
        ));
    }

    #[test]
    fn test_zero_retries_escalates_immediately() {
        let policy = EscalationPolicy {
            max_retries: 0,
            backoff: Duration::ZERO,
        };
        let mut state = RetryState::default();
        let outcome = policy.on_failure(
            &WorkUnit::phase(Phase::Planning),
            &mut state,
            &TaskFailure::logic("bad plan"),
        );
        assert!(matches!(outcome, EscalationOutcome::Escalate(_)));
    }

    #[test]
    fn test_reset_clears_state() {
        let mut state = RetryState {
            retries: 2,
            last_class: Some(FailureClass::Logic),
        };
        state.reset();
        assert_eq!(state, RetryState::default());
        assert_eq!(state.attempts(), 1);
    }
}
