use std::time::Duration;

/// What to do after a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the delay.
    RetryAfter(Duration),
    /// Budget spent. Surface a terminal error.
    Exhausted { attempts: u32 },
}

/// Bounded, fixed-delay retry state for one link operation.
#[derive(Clone, Debug)]
pub struct RetryBudget {
    pub operation: &'static str,
    pub attempts: u32,
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryBudget {
    pub fn new(operation: &'static str, max_attempts: u32, delay: Duration) -> Self {
        RetryBudget {
            operation,
            attempts: 0,
            max_attempts,
            delay,
        }
    }

    /// Count a consecutive failure. The failure that reaches `max_attempts`
    /// exhausts the budget.
    pub fn record_failure(&mut self) -> RetryDecision {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts >= self.max_attempts {
            log::error!(
                "[RETRY] {} failed {} time(s), giving up",
                self.operation,
                self.attempts
            );
            return RetryDecision::Exhausted {
                attempts: self.attempts,
            };
        }
        log::warn!(
            "[RETRY] {} attempt {} failed, next retry in {:.1}s",
            self.operation,
            self.attempts,
            self.delay.as_secs_f64()
        );
        RetryDecision::RetryAfter(self.delay)
    }

    pub fn record_success(&mut self) {
        if self.attempts > 0 {
            log::info!(
                "[RETRY] {} succeeded after {} failed attempt(s)",
                self.operation,
                self.attempts
            );
        }
        self.attempts = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn status(&self) -> String {
        if self.attempts == 0 {
            return format!("{}: OK", self.operation);
        }
        if self.is_exhausted() {
            return format!("{}: MAX_ATTEMPTS_EXCEEDED", self.operation);
        }
        format!(
            "{}: RETRY_PENDING (attempt {}/{})",
            self.operation, self.attempts, self.max_attempts
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_failures_exhaust() {
        let mut b = RetryBudget::new("advertising", 3, Duration::from_secs(2));
        assert_eq!(b.record_failure(), RetryDecision::RetryAfter(Duration::from_secs(2)));
        assert_eq!(b.record_failure(), RetryDecision::RetryAfter(Duration::from_secs(2)));
        assert_eq!(b.record_failure(), RetryDecision::Exhausted { attempts: 3 });
        assert!(b.is_exhausted());
        assert_eq!(b.status(), "advertising: MAX_ATTEMPTS_EXCEEDED");
    }

    #[test]
    fn test_success_resets() {
        let mut b = RetryBudget::new("reconnect", 2, Duration::from_secs(5));
        b.record_failure();
        assert_eq!(b.status(), "reconnect: RETRY_PENDING (attempt 1/2)");
        b.record_success();
        assert_eq!(b.attempts, 0);
        assert_eq!(b.status(), "reconnect: OK");
        assert!(matches!(b.record_failure(), RetryDecision::RetryAfter(_)));
    }
}
