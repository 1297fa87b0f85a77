use crate::RetryPolicy;
use std::time::Duration;

/// Coordination settings for one application identity
///
/// Defaults follow long-standing behaviour: a one second signal poll, five
/// seconds for the primary to connect, three bind attempts two seconds
/// apart and five seconds for the window to come up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub app_id: String,
    /// Bounded wait of the watcher between cancellation checks
    pub signal_poll: Duration,
    /// How long the primary waits for a secondary's server to appear
    pub connect_timeout: Duration,
    /// How long the primary waits for the line once connected
    pub read_timeout: Duration,
    /// Server role bind retries and accept timeout
    pub retry: RetryPolicy,
    /// How long the watcher waits for the GUI bridge to be installed
    pub bridge_ready_timeout: Duration,
    /// How long a secondary waits for its handshake server before exiting
    pub forward_timeout: Duration,
}

impl Config {
    pub fn new(app_id: impl Into<String>) -> Self {
        let retry = RetryPolicy::default();
        Config {
            app_id: app_id.into(),
            signal_poll: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            forward_timeout: worst_case_serve(&retry),
            retry,
            bridge_ready_timeout: Duration::from_secs(5),
        }
    }

    /// Name of the system-wide signal primitive
    pub fn signal_name(&self) -> String {
        format!("{}.signal", self.app_id)
    }

    /// Name of the handshake endpoint, distinct from the signal name
    pub fn endpoint_name(&self) -> String {
        format!("{}.handshake", self.app_id)
    }

    pub fn with_signal_poll(mut self, poll: Duration) -> Self {
        self.signal_poll = poll;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Also widens `forward_timeout` if the new policy could outlast it
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self.forward_timeout = self.forward_timeout.max(worst_case_serve(&retry));
        self
    }

    pub fn with_bridge_ready_timeout(mut self, timeout: Duration) -> Self {
        self.bridge_ready_timeout = timeout;
        self
    }

    pub fn with_forward_timeout(mut self, timeout: Duration) -> Self {
        self.forward_timeout = timeout;
        self
    }
}

/// Saturates at `Duration::MAX` for absurd policies
fn worst_case_serve(retry: &RetryPolicy) -> Duration {
    retry
        .delay
        .checked_add(retry.accept_timeout)
        .and_then(|attempt| attempt.checked_mul(retry.attempts))
        .unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_derived_and_distinct() {
        let config = Config::new("com.example.App");
        assert_eq!(config.signal_name(), "com.example.App.signal");
        assert_eq!(config.endpoint_name(), "com.example.App.handshake");
    }

    #[test]
    fn forward_timeout_covers_retry_policy() {
        let config = Config::new("app").with_retry(RetryPolicy {
            attempts: 5,
            delay: Duration::from_secs(3),
            accept_timeout: Duration::from_secs(20),
        });
        assert!(config.forward_timeout >= Duration::from_secs(5 * 23));
    }

    #[test]
    fn huge_retry_policy_saturates_forward_timeout() {
        let config = Config::new("app").with_retry(RetryPolicy {
            attempts: u32::MAX,
            delay: Duration::from_millis(u64::MAX),
            accept_timeout: Duration::from_secs(10),
        });
        assert_eq!(config.forward_timeout, Duration::MAX);
    }
}
