use std::time::Duration;

use kube::runtime::controller::Action;

/// Requeue directive produced by one reconcile pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Steady state; wait for the next change notification.
    NoOp,
    RequeueAfter(Duration),
    RequeueImmediate,
}

impl Outcome {
    pub fn is_noop(&self) -> bool {
        matches!(self, Outcome::NoOp)
    }
}

impl From<Outcome> for Action {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::NoOp => Action::await_change(),
            Outcome::RequeueAfter(d) => Action::requeue(d),
            Outcome::RequeueImmediate => Action::requeue(Duration::ZERO),
        }
    }
}
