//! Named, system-wide, auto-resetting signal primitive.
//!
//! Whoever creates a name owns it and waits on it; everyone else can only
//! open the name and set it. Open-or-create must be atomic across processes,
//! which is left to the backing namespace (D-Bus name ownership in
//! production, a shared map in [`MemorySignalNamespace`]).

use crate::Error;
use crate::Result;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

/// The owning side of a named signal, held by the primary instance
pub trait OwnedSignal: Send + Sync {
    /// Waits until the signal is set or `timeout` elapses.
    ///
    /// Returns `Ok(true)` when woken by a signal, consuming it.
    fn wait_timeout(&self, timeout: Duration) -> Result<bool>;

    /// Frees the name so a future launch can claim it. Idempotent.
    fn close(&self);
}

/// An opened (not owned) named signal, held briefly by a secondary instance
pub trait RemoteSignal: Send {
    fn set(&self) -> Result<()>;
}

pub enum SignalClaim {
    /// No signal of that name existed, the caller now owns it
    Created(Arc<dyn OwnedSignal>),
    /// Somebody else owns the name
    Opened(Box<dyn RemoteSignal>),
}

impl std::fmt::Debug for SignalClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalClaim::Created(_) => write!(f, "SignalClaim::Created"),
            SignalClaim::Opened(_) => write!(f, "SignalClaim::Opened"),
        }
    }
}

pub trait SignalNamespace: Send + Sync {
    /// Atomically creates the named signal, or opens it if it already exists.
    fn create_or_open(&self, name: &str) -> Result<SignalClaim>;
}

#[derive(Debug, Default)]
struct EventState {
    signaled: bool,
    closed: bool,
}

/// In-process auto-reset event, the waiting half of every signal backend
#[derive(Debug, Default)]
pub struct AutoResetEvent {
    state: Mutex<EventState>,
    cond: Condvar,
}

impl AutoResetEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the event, waking at most one waiter. Sets coalesce until a wait
    /// consumes them.
    pub fn set(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Err(Error::Closed);
        }
        state.signaled = true;
        self.cond.notify_one();
        Ok(())
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if state.closed {
                return Err(Error::Closed);
            }
            if state.signaled {
                state.signaled = false;
                return Ok(true);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            state = self
                .cond
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Wakes every waiter with [`Error::Closed`]; later sets fail.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        self.cond.notify_all();
    }
}

type EventMap = Arc<Mutex<HashMap<String, Arc<AutoResetEvent>>>>;

/// Process-local namespace with the same open-or-create semantics as the
/// system-wide one. Clones share the namespace.
#[derive(Debug, Clone, Default)]
pub struct MemorySignalNamespace {
    events: EventMap,
}

impl MemorySignalNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_claimed(&self, name: &str) -> bool {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

impl SignalNamespace for MemorySignalNamespace {
    fn create_or_open(&self, name: &str) -> Result<SignalClaim> {
        if name.is_empty() {
            return Err(Error::InvalidName(name.to_string()));
        }

        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(event) = events.get(name) {
            return Ok(SignalClaim::Opened(Box::new(MemoryRemoteSignal {
                event: event.clone(),
            })));
        }

        let event = Arc::new(AutoResetEvent::new());
        events.insert(name.to_string(), event.clone());
        Ok(SignalClaim::Created(Arc::new(MemoryOwnedSignal {
            name: name.to_string(),
            event,
            events: self.events.clone(),
            closed: AtomicBool::new(false),
        })))
    }
}

struct MemoryOwnedSignal {
    name: String,
    event: Arc<AutoResetEvent>,
    events: EventMap,
    closed: AtomicBool,
}

impl OwnedSignal for MemoryOwnedSignal {
    fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        self.event.wait_timeout(timeout)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.event.close();
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events
            .get(&self.name)
            .is_some_and(|e| Arc::ptr_eq(e, &self.event))
        {
            events.remove(&self.name);
        }
    }
}

impl Drop for MemoryOwnedSignal {
    fn drop(&mut self) {
        self.close();
    }
}

struct MemoryRemoteSignal {
    event: Arc<AutoResetEvent>,
}

impl RemoteSignal for MemoryRemoteSignal {
    fn set(&self) -> Result<()> {
        self.event.set()
    }
}
