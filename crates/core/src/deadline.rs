use std::cell::Cell;
use std::time::{Duration, Instant};

pub trait Clock {
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Duration {
        (**self).now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineState {
    Unbounded,
    Running,
    Expired,
}

#[derive(Debug)]
pub struct DeadlineGuard<C: Clock = SystemClock> {
    clock: C,
    started: Duration,
    budget: Option<Duration>,
    state: Cell<DeadlineState>,
}

impl DeadlineGuard<SystemClock> {
    pub fn new(budget: Option<Duration>) -> Self {
        Self::with_clock(budget, SystemClock::new())
    }
}

impl<C: Clock> DeadlineGuard<C> {
    /// A zero budget is treated the same as no budget.
    pub fn with_clock(budget: Option<Duration>, clock: C) -> Self {
        let budget = budget.filter(|value| !value.is_zero());
        let state = if budget.is_some() {
            DeadlineState::Running
        } else {
            DeadlineState::Unbounded
        };
        Self {
            started: clock.now(),
            clock,
            budget,
            state: Cell::new(state),
        }
    }

    pub fn state(&self) -> DeadlineState {
        self.state.get()
    }

    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }

    pub fn expired(&self) -> bool {
        match self.state.get() {
            DeadlineState::Unbounded => false,
            DeadlineState::Expired => true,
            DeadlineState::Running => {
                let Some(budget) = self.budget else {
                    return false;
                };
                if self.elapsed() >= budget {
                    self.state.set(DeadlineState::Expired);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn should_continue(&self) -> bool {
        !self.expired()
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_sub(self.started)
    }

    /// `Duration::MAX` when unbounded; saturates at zero otherwise.
    pub fn remaining(&self) -> Duration {
        match self.budget {
            None => Duration::MAX,
            Some(budget) => budget.saturating_sub(self.elapsed()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::Cell;
    use std::time::Duration;

    use super::{Clock, DeadlineGuard, DeadlineState};

    /// Clock that only moves when told to.
    #[derive(Debug, Default)]
    pub(crate) struct ManualClock {
        now: Cell<Duration>,
    }

    impl ManualClock {
        pub(crate) fn advance(&self, by: Duration) {
            self.now.set(self.now.get() + by);
        }

        pub(crate) fn rewind(&self, to: Duration) {
            self.now.set(to);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Duration {
            self.now.get()
        }
    }

    #[test]
    fn unbounded_never_expires() {
        let clock = ManualClock::default();
        let guard = DeadlineGuard::with_clock(None, &clock);
        clock.advance(Duration::from_secs(86_400));

        assert_eq!(guard.state(), DeadlineState::Unbounded);
        assert!(!guard.expired());
        assert!(guard.should_continue());
        assert_eq!(guard.remaining(), Duration::MAX);
        assert_eq!(guard.elapsed(), Duration::from_secs(86_400));
    }

    #[test]
    fn zero_budget_means_unbounded() {
        let guard = DeadlineGuard::new(Some(Duration::ZERO));
        assert_eq!(guard.state(), DeadlineState::Unbounded);
        assert!(!guard.expired());
    }

    #[test]
    fn expires_once_budget_is_spent() {
        let clock = ManualClock::default();
        let guard = DeadlineGuard::with_clock(Some(Duration::from_secs(10)), &clock);

        clock.advance(Duration::from_secs(4));
        assert!(!guard.expired());
        assert_eq!(guard.remaining(), Duration::from_secs(6));

        clock.advance(Duration::from_secs(6));
        assert!(guard.expired());
        assert_eq!(guard.state(), DeadlineState::Expired);
        assert_eq!(guard.remaining(), Duration::ZERO);

        clock.advance(Duration::from_secs(5));
        assert_eq!(guard.remaining(), Duration::ZERO);
    }

    #[test]
    fn expiry_is_sticky() {
        let clock = ManualClock::default();
        let guard = DeadlineGuard::with_clock(Some(Duration::from_secs(1)), &clock);
        clock.advance(Duration::from_secs(2));
        assert!(guard.expired());

        clock.rewind(Duration::ZERO);
        assert!(guard.expired());
        assert!(!guard.should_continue());
    }
}
