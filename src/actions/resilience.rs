//! Retry and fallback wrappers around other actions.

use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::core::action::Action;
use crate::core::cancel::CancelToken;
use crate::core::error::{EngineError, Result};
use crate::core::state::WorldState;

/// Wraps another action with bounded retries and linear backoff.
///
/// Planning metadata (preconditions, effects) mirrors the wrapped action;
/// the cost carries a small retry overhead so the planner prefers plain
/// actions when both reach the goal.
pub struct RetryAction {
    name: String,
    description: String,
    inner: Box<dyn Action>,
    max_retries: usize,
    backoff: Duration,
    cost: f64,
}

impl RetryAction {
    pub fn new(inner: Box<dyn Action>, max_retries: usize, backoff: Duration) -> Self {
        Self {
            name: format!("retry[{}]", inner.name()),
            description: format!(
                "execute {} with up to {} retries",
                inner.name(),
                max_retries
            ),
            cost: inner.cost() + 2.0,
            inner,
            max_retries,
            backoff,
        }
    }
}

impl Action for RetryAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn preconditions(&self) -> &WorldState {
        self.inner.preconditions()
    }

    fn effects(&self) -> &WorldState {
        self.inner.effects()
    }

    fn cost(&self) -> f64 {
        self.cost
    }

    fn execute(&self, cancel: &CancelToken, current: &mut WorldState) -> Result<()> {
        if !self.can_execute(current) {
            return Err(EngineError::PreconditionViolated {
                action: self.name.clone(),
            });
        }

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            cancel.check()?;
            if attempt > 0 {
                info!(action = self.inner.name(), attempt, "retrying action");
                thread::sleep(self.backoff * attempt as u32);
            }

            match self.inner.execute(cancel, current) {
                Ok(()) => {
                    if attempt > 0 {
                        info!(action = self.inner.name(), attempts = attempt + 1, "action succeeded after retry");
                    }
                    return Ok(());
                }
                Err(err) => {
                    warn!(action = self.inner.name(), attempt = attempt + 1, error = %err, "action failed, will retry");
                    last_err = Some(err);
                }
            }
        }

        let cause = match last_err {
            Some(err) => anyhow::anyhow!("failed after {} retries: {}", self.max_retries, err),
            None => anyhow::anyhow!("failed with no attempts recorded"),
        };
        Err(EngineError::ActionFailed {
            action: self.name.clone(),
            cause,
        })
    }

    fn boxed_clone(&self) -> Box<dyn Action> {
        Box::new(RetryAction::new(
            self.inner.boxed_clone(),
            self.max_retries,
            self.backoff,
        ))
    }

    fn simulate(&self, target: &mut WorldState) {
        self.inner.simulate(target);
    }
}

/// Tries a primary action, falling back to an alternative on failure.
///
/// Preconditions and effects are the union of both actions' fragments, with
/// the fallback winning on shared keys. A fallback run records
/// `used_fallback` and `primary_failure_reason` in the world state so later
/// nodes can observe the degraded path.
pub struct FallbackAction {
    name: String,
    description: String,
    preconditions: WorldState,
    effects: WorldState,
    cost: f64,
    primary: Box<dyn Action>,
    fallback: Box<dyn Action>,
}

impl FallbackAction {
    pub fn new(primary: Box<dyn Action>, fallback: Box<dyn Action>) -> Self {
        let mut preconditions = primary.preconditions().clone();
        preconditions.apply(fallback.preconditions());
        let mut effects = primary.effects().clone();
        effects.apply(fallback.effects());

        Self {
            name: format!("fallback[{}->{}]", primary.name(), fallback.name()),
            description: format!("try {}, fall back to {}", primary.name(), fallback.name()),
            preconditions,
            effects,
            cost: primary.cost() + 1.0,
            primary,
            fallback,
        }
    }
}

impl Action for FallbackAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn preconditions(&self) -> &WorldState {
        &self.preconditions
    }

    fn effects(&self) -> &WorldState {
        &self.effects
    }

    fn cost(&self) -> f64 {
        self.cost
    }

    fn execute(&self, cancel: &CancelToken, current: &mut WorldState) -> Result<()> {
        if !self.can_execute(current) {
            return Err(EngineError::PreconditionViolated {
                action: self.name.clone(),
            });
        }

        info!(action = self.primary.name(), "attempting primary action");
        let primary_err = match self.primary.execute(cancel, current) {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        warn!(
            primary = self.primary.name(),
            fallback = self.fallback.name(),
            error = %primary_err,
            "primary action failed, using fallback"
        );
        current.set("used_fallback", true);
        current.set("primary_failure_reason", primary_err.to_string());

        self.fallback.execute(cancel, current).map_err(|err| {
            EngineError::ActionFailed {
                action: self.name.clone(),
                cause: anyhow::anyhow!(
                    "both primary and fallback failed: primary={}, fallback={}",
                    primary_err,
                    err
                ),
            }
        })
    }

    fn boxed_clone(&self) -> Box<dyn Action> {
        Box::new(FallbackAction::new(
            self.primary.boxed_clone(),
            self.fallback.boxed_clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::action::SimpleAction;
    use crate::test_support::{failing_action, fragment, noop_action};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Fails until `succeed_on_attempt`, then succeeds.
    fn flaky_action(succeed_on_attempt: usize, calls: Arc<AtomicUsize>) -> SimpleAction {
        SimpleAction::new(
            "flaky",
            "fails a few times",
            WorldState::new(),
            fragment(&[("done", true)]),
            1.0,
            Arc::new(move |_, _| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                anyhow::ensure!(attempt >= succeed_on_attempt, "attempt {} too early", attempt);
                Ok(())
            }),
        )
    }

    #[test]
    fn retry_succeeds_once_the_inner_action_does() {
        let calls = Arc::new(AtomicUsize::new(0));
        let retry = RetryAction::new(
            Box::new(flaky_action(3, Arc::clone(&calls))),
            3,
            Duration::ZERO,
        );

        let mut state = WorldState::new();
        retry.execute(&CancelToken::new(), &mut state).expect("execute");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(state.matches(&fragment(&[("done", true)])));
    }

    #[test]
    fn retry_gives_up_after_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let retry = RetryAction::new(
            Box::new(flaky_action(10, Arc::clone(&calls))),
            2,
            Duration::ZERO,
        );

        let mut state = WorldState::new();
        let err = retry.execute(&CancelToken::new(), &mut state).unwrap_err();
        assert!(err.to_string().contains("failed after 2 retries"));
        assert_eq!(calls.load(Ordering::SeqCst), 3, "initial try plus two retries");
    }

    #[test]
    fn retry_mirrors_planning_metadata_with_overhead() {
        let inner = noop_action("inner", 3.0, fragment(&[("p", true)]), fragment(&[("e", true)]));
        let retry = RetryAction::new(Box::new(inner), 1, Duration::ZERO);

        assert_eq!(retry.name(), "retry[inner]");
        assert_eq!(retry.cost(), 5.0);
        assert!(retry.preconditions().matches(&fragment(&[("p", true)])));
        assert!(retry.effects().matches(&fragment(&[("e", true)])));
    }

    #[test]
    fn fallback_skips_secondary_when_primary_succeeds() {
        let fallback_calls = Arc::new(AtomicUsize::new(0));
        let action = FallbackAction::new(
            Box::new(noop_action("primary", 1.0, WorldState::new(), fragment(&[("done", true)]))),
            Box::new(SimpleAction::new(
                "secondary",
                "should not run",
                WorldState::new(),
                WorldState::new(),
                1.0,
                {
                    let calls = Arc::clone(&fallback_calls);
                    Arc::new(move |_, _| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                },
            )),
        );

        let mut state = WorldState::new();
        action.execute(&CancelToken::new(), &mut state).expect("execute");
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
        assert!(!state.has("used_fallback"));
    }

    #[test]
    fn fallback_records_degraded_path() {
        let action = FallbackAction::new(
            Box::new(failing_action("primary", WorldState::new(), WorldState::new(), "boom")),
            Box::new(noop_action("secondary", 1.0, WorldState::new(), fragment(&[("done", true)]))),
        );

        let mut state = WorldState::new();
        action.execute(&CancelToken::new(), &mut state).expect("execute");
        assert!(state.matches(&fragment(&[("used_fallback", true), ("done", true)])));
        assert!(state
            .get("primary_failure_reason")
            .map(|v| v.to_string().contains("boom"))
            .unwrap_or(false));
    }

    #[test]
    fn fallback_surfaces_double_failure() {
        let action = FallbackAction::new(
            Box::new(failing_action("primary", WorldState::new(), WorldState::new(), "first")),
            Box::new(failing_action("secondary", WorldState::new(), WorldState::new(), "second")),
        );

        let mut state = WorldState::new();
        let err = action.execute(&CancelToken::new(), &mut state).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("both primary and fallback failed"));
        assert!(message.contains("first"));
        assert!(message.contains("second"));
    }

    #[test]
    fn cancelled_token_stops_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let retry = RetryAction::new(
            Box::new(flaky_action(10, Arc::clone(&calls))),
            5,
            Duration::ZERO,
        );

        let cancel = CancelToken::new();
        cancel.cancel();
        let mut state = WorldState::new();
        let err = retry.execute(&cancel, &mut state).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
