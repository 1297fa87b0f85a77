use crate::compose_line;
use crate::serve_with_retry;
use crate::BridgeSlot;
use crate::Config;
use crate::DBusSignalNamespace;
use crate::HandshakeTransport;
use crate::InstanceIdentity;
use crate::LocalSocketTransport;
use crate::OwnedSignal;
use crate::Result;
use crate::ServeOutcome;
use crate::SignalClaim;
use crate::SignalNamespace;
use crate::SignalWatcher;
use crate::WatcherHandle;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unclaimed,
    Primary,
    Secondary,
}

/// Process-wide coordination context
///
/// Owns the instance identity and, while primary, the named signal and its
/// watcher. Everything is released by [`InstanceRegistry::release_primary`]
/// or on drop, whichever comes first.
pub struct InstanceRegistry {
    config: Config,
    identity: InstanceIdentity,
    args: Vec<String>,
    namespace: Arc<dyn SignalNamespace>,
    transport: Arc<dyn HandshakeTransport>,
    state: RegistrationState,
    signal: Option<Arc<dyn OwnedSignal>>,
    watcher: Option<WatcherHandle>,
    handshake: Option<Receiver<ServeOutcome>>,
}

impl InstanceRegistry {
    /// `args` is the full invocation, executable path first
    pub fn new<I, S>(
        config: Config,
        args: I,
        namespace: Arc<dyn SignalNamespace>,
        transport: Arc<dyn HandshakeTransport>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        InstanceRegistry {
            config,
            identity: InstanceIdentity::generate(),
            args: args.into_iter().map(Into::into).collect(),
            namespace,
            transport,
            state: RegistrationState::Unclaimed,
            signal: None,
            watcher: None,
            handshake: None,
        }
    }

    /// Registry on the D-Bus session bus with a local socket handshake
    pub fn session<I, S>(config: Config, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let transport = LocalSocketTransport::new(config.endpoint_name())?;
        Ok(Self::new(
            config,
            args,
            Arc::new(DBusSignalNamespace),
            Arc::new(transport),
        ))
    }

    pub fn identity(&self) -> InstanceIdentity {
        self.identity
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Claims primary status, or signals the existing primary.
    ///
    /// On the secondary path the handshake server is started on a background
    /// thread before returning. Unexpected errors are logged and reported as
    /// [`RegistrationState::Secondary`] without a handshake. Calling again
    /// after a decision returns the same state.
    pub fn try_become_primary(&mut self) -> RegistrationState {
        if self.state != RegistrationState::Unclaimed {
            return self.state;
        }

        self.state = match self.namespace.create_or_open(&self.config.signal_name()) {
            Ok(SignalClaim::Created(signal)) => {
                log::info!("Registered as the primary instance ({})", self.identity);
                self.signal = Some(signal);
                RegistrationState::Primary
            }
            Ok(SignalClaim::Opened(remote)) => {
                log::info!("Another instance is already running, signaling it");
                match remote.set() {
                    Ok(()) => self.start_handshake_server(),
                    Err(e) => log::warn!("Signaling the primary instance failed: {}", e),
                }
                RegistrationState::Secondary
            }
            Err(e) => {
                log::warn!(
                    "Could not open or create signal '{}', assuming another instance runs: {}",
                    self.config.signal_name(),
                    e
                );
                RegistrationState::Secondary
            }
        };
        self.state
    }

    fn start_handshake_server(&mut self) {
        let line = compose_line(&self.identity, &self.args);
        let transport = self.transport.clone();
        let retry = self.config.retry;
        let (tx, rx) = std::sync::mpsc::channel();

        let spawned = std::thread::Builder::new()
            .name("instance-relay-handshake".to_string())
            .spawn(move || {
                let outcome = serve_with_retry(transport.as_ref(), &line, &retry);
                let _ = tx.send(outcome);
            });

        match spawned {
            Ok(_) => self.handshake = Some(rx),
            Err(e) => log::warn!("Could not start handshake server: {}", e),
        }
    }

    /// Result channel of the background handshake server, if one was started
    pub(crate) fn take_handshake(&mut self) -> Option<Receiver<ServeOutcome>> {
        self.handshake.take()
    }

    /// Starts the signal watcher. Does nothing unless this instance is the
    /// primary and no watcher runs yet.
    pub fn start_watcher(&mut self, bridge: BridgeSlot) -> Result<()> {
        if self.watcher.is_some() {
            return Ok(());
        }
        let Some(signal) = self.signal.clone() else {
            log::debug!("Not the primary instance, no watcher started");
            return Ok(());
        };

        let watcher = SignalWatcher::spawn(signal, self.transport.clone(), bridge, &self.config)?;
        self.watcher = Some(watcher);
        Ok(())
    }

    /// Stops the watcher and frees the signal name for future launches.
    ///
    /// Safe to call any number of times, and on registries that never became
    /// primary.
    pub fn release_primary(&mut self) {
        let watcher = self.watcher.take();
        if let Some(watcher) = &watcher {
            watcher.request_stop();
        }
        if let Some(signal) = self.signal.take() {
            log::trace!("Releasing primary instance ({})", self.identity);
            signal.close();
        }
        if let Some(mut watcher) = watcher {
            watcher.stop();
        }
        if self.state == RegistrationState::Primary {
            self.state = RegistrationState::Unclaimed;
        }
    }
}

impl Drop for InstanceRegistry {
    fn drop(&mut self) {
        self.release_primary();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::MemorySignalNamespace;
    use crate::RemoteSignal;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    struct NoTransport;

    impl HandshakeTransport for NoTransport {
        fn serve_once(&self, _line: &str, accept_timeout: Duration) -> Result<()> {
            Err(Error::Timeout(accept_timeout))
        }

        fn fetch_line(
            &self,
            connect_timeout: Duration,
            _: Duration,
            _: &AtomicBool,
        ) -> Result<String> {
            Err(Error::Timeout(connect_timeout))
        }
    }

    struct BrokenNamespace;

    impl SignalNamespace for BrokenNamespace {
        fn create_or_open(&self, _name: &str) -> Result<SignalClaim> {
            Err(Error::DBus("permission denied".to_string()))
        }
    }

    /// Primary exists but cannot be reached
    struct UnreachablePrimary;

    struct DeadRemote;

    impl RemoteSignal for DeadRemote {
        fn set(&self) -> Result<()> {
            Err(Error::DBus("no reply".to_string()))
        }
    }

    impl SignalNamespace for UnreachablePrimary {
        fn create_or_open(&self, _name: &str) -> Result<SignalClaim> {
            Ok(SignalClaim::Opened(Box::new(DeadRemote)))
        }
    }

    fn registry(namespace: Arc<dyn SignalNamespace>) -> InstanceRegistry {
        InstanceRegistry::new(
            Config::new("registry-test").with_signal_poll(Duration::from_millis(20)),
            ["app"],
            namespace,
            Arc::new(NoTransport),
        )
    }

    #[test]
    fn exactly_one_primary_among_many_launches() {
        let namespace = Arc::new(MemorySignalNamespace::new());
        let mut registries: Vec<_> = (0..5).map(|_| registry(namespace.clone())).collect();

        let states: Vec<_> = registries
            .iter_mut()
            .map(|r| r.try_become_primary())
            .collect();
        assert_eq!(
            states
                .iter()
                .filter(|s| **s == RegistrationState::Primary)
                .count(),
            1
        );
        assert_eq!(
            states
                .iter()
                .filter(|s| **s == RegistrationState::Secondary)
                .count(),
            4
        );
    }

    #[test]
    fn released_primary_can_be_reclaimed() {
        let namespace = Arc::new(MemorySignalNamespace::new());
        let mut first = registry(namespace.clone());
        assert_eq!(first.try_become_primary(), RegistrationState::Primary);
        first.start_watcher(BridgeSlot::new()).unwrap();
        first.release_primary();
        assert_eq!(first.state(), RegistrationState::Unclaimed);

        let mut second = registry(namespace.clone());
        assert_eq!(second.try_become_primary(), RegistrationState::Primary);
    }

    #[test]
    fn dropping_the_registry_releases_primary() {
        let namespace = Arc::new(MemorySignalNamespace::new());
        {
            let mut first = registry(namespace.clone());
            assert_eq!(first.try_become_primary(), RegistrationState::Primary);
        }
        assert!(!namespace.is_claimed("registry-test.signal"));
    }

    #[test]
    fn release_is_idempotent_and_safe_when_never_primary() {
        let namespace = Arc::new(MemorySignalNamespace::new());
        let mut unclaimed = registry(namespace.clone());
        unclaimed.release_primary();
        unclaimed.release_primary();
        assert_eq!(unclaimed.state(), RegistrationState::Unclaimed);

        let mut primary = registry(namespace.clone());
        primary.try_become_primary();
        let mut secondary = registry(namespace.clone());
        assert_eq!(secondary.try_become_primary(), RegistrationState::Secondary);
        secondary.release_primary();
        assert_eq!(secondary.state(), RegistrationState::Secondary);

        primary.release_primary();
        primary.release_primary();
        assert!(!namespace.is_claimed("registry-test.signal"));
    }

    #[test]
    fn namespace_failure_is_treated_as_secondary_without_handshake() {
        let mut registry = registry(Arc::new(BrokenNamespace));
        assert_eq!(registry.try_become_primary(), RegistrationState::Secondary);
        assert!(registry.take_handshake().is_none());
    }

    #[test]
    fn failed_signal_is_secondary_without_handshake() {
        let mut registry = registry(Arc::new(UnreachablePrimary));
        assert_eq!(registry.try_become_primary(), RegistrationState::Secondary);
        assert!(registry.take_handshake().is_none());
    }

    #[test]
    fn secondary_starts_handshake_server() {
        let namespace = Arc::new(MemorySignalNamespace::new());
        let mut primary = registry(namespace.clone());
        primary.try_become_primary();

        let mut secondary = registry(namespace.clone());
        secondary.try_become_primary();
        let outcome = secondary
            .take_handshake()
            .expect("handshake server started")
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(outcome, ServeOutcome::TimedOut);
    }

    #[test]
    fn watcher_only_starts_on_primary() {
        let namespace = Arc::new(MemorySignalNamespace::new());
        let mut primary = registry(namespace.clone());
        primary.try_become_primary();
        let mut secondary = registry(namespace.clone());
        secondary.try_become_primary();

        secondary.start_watcher(BridgeSlot::new()).unwrap();
        assert!(secondary.watcher.is_none());
        primary.start_watcher(BridgeSlot::new()).unwrap();
        assert!(primary.watcher.as_ref().is_some_and(|w| w.is_running()));
    }
}
