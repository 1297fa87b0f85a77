//! Entry points the coordination core calls on the primary's window.
//!
//! The window lives on its own single-threaded UI context. The watcher never
//! touches it directly: requests are handed off through [`ChannelBridge`] to
//! whatever message loop the host runs.

use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

pub trait GuiBridge: Send + Sync {
    /// Make the primary window visible, restored and focused.
    fn bring_to_front(&self);

    /// Hand a forwarded command line to the window's argument handler
    /// without raising the window.
    fn deliver_arguments(&self, line: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeRequest {
    BringToFront,
    DeliverArguments(String),
}

/// Bridge that turns each call into a [`BridgeRequest`] and passes it to a
/// sender, typically one feeding the UI thread's message loop
pub struct ChannelBridge {
    sender: Box<dyn Fn(BridgeRequest) + Send + Sync + 'static>,
}

impl ChannelBridge {
    pub fn new(sender: impl Fn(BridgeRequest) + Send + Sync + 'static) -> Self {
        ChannelBridge {
            sender: Box::new(sender),
        }
    }
}

impl GuiBridge for ChannelBridge {
    fn bring_to_front(&self) {
        (self.sender)(BridgeRequest::BringToFront);
    }

    fn deliver_arguments(&self, line: &str) {
        (self.sender)(BridgeRequest::DeliverArguments(line.to_string()));
    }
}

/// One-shot readiness cell for the GUI bridge
///
/// The GUI layer installs its bridge once the window exists; the watcher
/// blocks on [`BridgeSlot::wait_ready`] for a bounded time if a signal
/// arrives earlier.
#[derive(Clone, Default)]
pub struct BridgeSlot {
    inner: Arc<(Mutex<Option<Arc<dyn GuiBridge>>>, Condvar)>,
}

impl BridgeSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the bridge and wakes any waiter. A second install replaces
    /// the first.
    pub fn install(&self, bridge: impl GuiBridge + 'static) {
        self.install_arc(Arc::new(bridge));
    }

    pub fn install_arc(&self, bridge: Arc<dyn GuiBridge>) {
        let (lock, cond) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = Some(bridge);
        cond.notify_all();
    }

    pub fn is_ready(&self) -> bool {
        let (lock, _) = &*self.inner;
        lock.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub fn wait_ready(&self, timeout: Duration) -> Option<Arc<dyn GuiBridge>> {
        let deadline = Instant::now() + timeout;
        let (lock, cond) = &*self.inner;
        let mut bridge = lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(bridge) = bridge.as_ref() {
                return Some(bridge.clone());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            bridge = cond
                .wait_timeout(bridge, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl std::fmt::Debug for BridgeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeSlot")
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn channel_bridge_forwards_requests() {
        let (tx, rx) = channel();
        let tx = Mutex::new(tx);
        let bridge = ChannelBridge::new(move |req| {
            let _ = tx.lock().unwrap().send(req);
        });

        bridge.bring_to_front();
        bridge.deliver_arguments("token --open file.txt");

        assert_eq!(rx.recv().unwrap(), BridgeRequest::BringToFront);
        assert_eq!(
            rx.recv().unwrap(),
            BridgeRequest::DeliverArguments("token --open file.txt".to_string())
        );
    }

    #[test]
    fn wait_ready_times_out_when_nothing_installed() {
        let slot = BridgeSlot::new();
        let started = Instant::now();
        assert!(slot.wait_ready(Duration::from_millis(50)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn wait_ready_wakes_on_install() {
        let slot = BridgeSlot::new();
        let installer = slot.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            installer.install(ChannelBridge::new(|_| {}));
        });

        assert!(slot.wait_ready(Duration::from_secs(5)).is_some());
        assert!(slot.is_ready());
        handle.join().unwrap();
    }
}
