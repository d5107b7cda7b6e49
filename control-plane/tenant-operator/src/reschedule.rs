use kube::runtime::controller::Action;
use rand::Rng;
use tokio::time::Duration;

/// Jittered periodic recheck bounded by `[min, max]`.
///
/// A zero bound counts as unset. With both bounds unset no recheck is forced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rescheduler {
    pub min: Duration,
    pub max: Duration,
}

impl Rescheduler {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn requeue_after(&self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        match (min > 0, max > 0) {
            (true, true) if max > min => {
                Duration::from_millis(min + rand::rng().random_range(0..max - min))
            }
            (true, _) => self.min,
            (false, true) => {
                Duration::from_millis(rand::rng().random_range(0..max))
            }
            (false, false) => Duration::ZERO,
        }
    }

    /// Requeue directive for a successful pass.
    pub fn action(&self) -> Action {
        let after = self.requeue_after();
        if after.is_zero() {
            Action::await_change()
        } else {
            Action::requeue(after)
        }
    }
}
