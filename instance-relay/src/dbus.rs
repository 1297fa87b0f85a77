use crate::signal::AutoResetEvent;
use crate::signal::OwnedSignal;
use crate::signal::RemoteSignal;
use crate::signal::SignalClaim;
use crate::signal::SignalNamespace;
use crate::Error;
use crate::Result;
use futures::executor::block_on;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;
use zbus::interface;
use zbus::names::WellKnownName;
use zbus::Connection;

const SIGNAL_PATH: &str = "/org/instance_relay/Signal";
const SIGNAL_INTERFACE: &str = "org.instance_relay.Signal";

/// Make unique D-Bus compatible bus name from arbitrary string
fn sanitize_bus_name(input: &str) -> String {
    let mut hasher = DefaultHasher::new();
    input.hash(&mut hasher);
    let hash = hasher.finish();

    format!("org.instance_relay.Signal{:x}", hash)
}

/// Signal namespace on the D-Bus session bus
///
/// Owning a signal means owning a well-known bus name. The bus daemon
/// arbitrates concurrent claims and drops the name when the owning process
/// exits, so a crashed primary never blocks future launches.
#[derive(Debug, Clone, Copy, Default)]
pub struct DBusSignalNamespace;

impl SignalNamespace for DBusSignalNamespace {
    fn create_or_open(&self, name: &str) -> Result<SignalClaim> {
        if name.is_empty() {
            return Err(Error::InvalidName(name.to_string()));
        }
        let bus_name = sanitize_bus_name(name);

        block_on(async {
            let connection = Connection::session().await?;

            // Object must exist before the name is visible to secondaries
            let event = Arc::new(AutoResetEvent::new());
            connection
                .object_server()
                .at(
                    SIGNAL_PATH,
                    SignalService {
                        event: event.clone(),
                    },
                )
                .await?;

            let reply = zbus::fdo::DBusProxy::new(&connection)
                .await?
                .request_name(
                    WellKnownName::from_string_unchecked(bus_name.clone()),
                    zbus::fdo::RequestNameFlags::DoNotQueue.into(),
                )
                .await?;

            match reply {
                zbus::fdo::RequestNameReply::PrimaryOwner => {
                    log::trace!("Acquired bus name {}", bus_name);
                    Ok(SignalClaim::Created(Arc::new(DBusOwnedSignal {
                        connection: Mutex::new(Some(connection)),
                        bus_name,
                        event,
                    })))
                }
                zbus::fdo::RequestNameReply::Exists => {
                    connection
                        .object_server()
                        .remove::<SignalService, _>(SIGNAL_PATH)
                        .await?;
                    Ok(SignalClaim::Opened(Box::new(DBusRemoteSignal {
                        connection,
                        bus_name,
                    })))
                }
                _ => Err(Error::DBus(
                    "Unexpected reply when requesting name".to_string(),
                )),
            }
        })
    }
}

struct DBusOwnedSignal {
    connection: Mutex<Option<Connection>>,
    bus_name: String,
    event: Arc<AutoResetEvent>,
}

impl OwnedSignal for DBusOwnedSignal {
    fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        self.event.wait_timeout(timeout)
    }

    fn close(&self) {
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(connection) = connection else {
            return;
        };
        self.event.close();

        let released = block_on(async {
            zbus::fdo::DBusProxy::new(&connection)
                .await?
                .release_name(WellKnownName::from_string_unchecked(
                    self.bus_name.clone(),
                ))
                .await
                .map_err(Error::from)
        });
        match released {
            Ok(_) => log::trace!("Released bus name {}", self.bus_name),
            // Dropping the connection below frees the name anyway
            Err(e) => log::warn!("Failed to release bus name {}: {}", self.bus_name, e),
        }
    }
}

impl Drop for DBusOwnedSignal {
    fn drop(&mut self) {
        self.close();
    }
}

struct DBusRemoteSignal {
    connection: Connection,
    bus_name: String,
}

impl RemoteSignal for DBusRemoteSignal {
    fn set(&self) -> Result<()> {
        block_on(async {
            let proxy = zbus::Proxy::new(
                &self.connection,
                self.bus_name.clone(),
                SIGNAL_PATH,
                SIGNAL_INTERFACE,
            )
            .await?;

            proxy.call_method("Wake", &()).await?;

            Ok(())
        })
    }
}

struct SignalService {
    event: Arc<AutoResetEvent>,
}

#[interface(name = "org.instance_relay.Signal")]
impl SignalService {
    /// Called by a secondary instance to wake the primary
    fn wake(&self) {
        if let Err(e) = self.event.set() {
            log::warn!("Signal arrived after close: {}", e);
        }
    }
}
