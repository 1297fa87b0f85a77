use crate::BridgeSlot;
use crate::Config;
use crate::ForwardOutcome;
use crate::GuiBridge;
use crate::InstanceIdentity;
use crate::InstanceRegistry;
use crate::RegistrationState;
use crate::Result;
use crate::SecondaryForwarder;

/// What this process turned out to be
#[derive(Debug)]
pub enum Launch {
    /// Keep running; the guard releases the primary role when dropped
    Primary(PrimaryInstance),
    /// Exit; the arguments were forwarded (or dropped) already
    Secondary(ForwardOutcome),
}

/// Scoped ownership of the primary role
///
/// Holds the registry and the watcher's bridge slot. Dropping it (or calling
/// [`PrimaryInstance::release`]) stops the watcher and frees the signal name.
pub struct PrimaryInstance {
    registry: InstanceRegistry,
    bridge: BridgeSlot,
}

impl PrimaryInstance {
    pub fn identity(&self) -> InstanceIdentity {
        self.registry.identity()
    }

    pub fn bridge_slot(&self) -> &BridgeSlot {
        &self.bridge
    }

    /// Call once the window is initialized
    pub fn install_bridge(&self, bridge: impl GuiBridge + 'static) {
        self.bridge.install(bridge);
    }

    pub fn release(mut self) {
        self.registry.release_primary();
    }
}

impl std::fmt::Debug for PrimaryInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimaryInstance")
            .field("identity", &self.registry.identity())
            .field("bridge", &self.bridge)
            .finish()
    }
}

/// Runs the single instance check on the session bus
///
/// - `config`: application identity and timeouts
/// - `args`: the full invocation, executable path first (e.g.
///   `std::env::args()`)
///
/// Only fails when the configuration cannot name a handshake endpoint;
/// coordination failures degrade to [`Launch::Primary`] or
/// [`Launch::Secondary`] and are logged.
pub fn only_single_instance<I, S>(config: Config, args: I) -> Result<Launch>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Ok(launch_with(InstanceRegistry::session(config, args)?))
}

/// Same as [`only_single_instance`] on an already constructed registry
pub fn launch_with(mut registry: InstanceRegistry) -> Launch {
    match SecondaryForwarder::new(&mut registry).forward() {
        Some(outcome) => Launch::Secondary(outcome),
        None => {
            debug_assert_eq!(registry.state(), RegistrationState::Primary);
            let bridge = BridgeSlot::new();
            if let Err(e) = registry.start_watcher(bridge.clone()) {
                log::error!("Could not start the signal watcher: {}", e);
            }
            Launch::Primary(PrimaryInstance { registry, bridge })
        }
    }
}
