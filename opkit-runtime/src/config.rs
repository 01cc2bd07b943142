use std::time::Duration;

/// Settings shared by every reconcile of one operator
///
/// Built once at startup and handed to [`Context`](crate::Context).
///
/// ```
/// use opkit_runtime::Config;
/// use std::time::Duration;
///
/// let config = Config::default()
///     .field_manager("webstore-operator")
///     .requeue_after(Duration::from_secs(10));
/// assert_eq!(config.field_manager, "webstore-operator");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Field manager recorded on every create and patch of a child resource
    pub field_manager: String,

    /// Delay before a pending phase is retried, unless the phase carries its own requeue
    pub requeue_after: Duration,

    /// How often [`poll_until_ready`](crate::wait::poll_until_ready) re-checks readiness
    pub poll_interval: Duration,

    /// How long [`poll_until_ready`](crate::wait::poll_until_ready) waits before giving up
    pub poll_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            field_manager: "opkit".into(),
            requeue_after: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Set the field manager used for writes
    #[must_use]
    pub fn field_manager(mut self, manager: impl Into<String>) -> Self {
        self.field_manager = manager.into();
        self
    }

    /// Set the default requeue delay for pending phases
    #[must_use]
    pub fn requeue_after(mut self, delay: Duration) -> Self {
        self.requeue_after = delay;
        self
    }

    /// Set the interval and timeout used when polling for readiness
    #[must_use]
    pub fn poll(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.poll_timeout = timeout;
        self
    }
}
