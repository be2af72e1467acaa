use failsafe::backoff::{self, Exponential};
use failsafe::failure_policy::{self, ConsecutiveFailures};
use failsafe::{Config, StateMachine};
use std::time::Duration;

/// Breaker type guarding the outbound email provider.
pub type EmailCircuitBreaker = StateMachine<ConsecutiveFailures<Exponential>, ()>;

/// Breaker shared by every clone of the email client.
///
/// Opens after 5 consecutive provider failures; while open, sends are
/// rejected locally and come back as failed outcomes. A trial send is let
/// through after an exponential backoff between 10s and 60s.
pub fn create_email_circuit_breaker() -> EmailCircuitBreaker {
    let retry_after = backoff::exponential(Duration::from_secs(10), Duration::from_secs(60));
    let policy = failure_policy::consecutive_failures(5, retry_after);

    Config::new().failure_policy(policy).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use failsafe::{CircuitBreaker, Error};

    #[test]
    fn opens_after_five_failures() {
        let cb = create_email_circuit_breaker();

        for _ in 0..5 {
            let result: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("provider down"));
            assert!(result.is_err());
        }

        let result: Result<(), Error<&str>> = cb.call(|| Ok::<(), &str>(()));
        assert!(matches!(result, Err(Error::Rejected)));
    }

    #[test]
    fn passes_successes_through() {
        let cb = create_email_circuit_breaker();

        let result: Result<&str, Error<&str>> = cb.call(|| Ok::<&str, &str>("queued"));

        assert_eq!(result.unwrap(), "queued");
    }
}
