use crate::classify;
use crate::BridgeSlot;
use crate::Config;
use crate::Error;
use crate::Forwarded;
use crate::GuiBridge;
use crate::HandshakeTransport;
use crate::OwnedSignal;
use crate::Result;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

/// Where the watcher loop currently is, reported in trace logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Fetching,
    Surface,
    Deliver,
    Cancelled,
}

/// Primary-side loop that waits for secondaries and fetches their arguments
pub struct SignalWatcher {
    signal: Arc<dyn OwnedSignal>,
    transport: Arc<dyn HandshakeTransport>,
    bridge: BridgeSlot,
    cancel: Arc<AtomicBool>,
    poll: Duration,
    connect_timeout: Duration,
    read_timeout: Duration,
    bridge_ready_timeout: Duration,
}

impl SignalWatcher {
    /// Starts the watcher on its own thread
    pub fn spawn(
        signal: Arc<dyn OwnedSignal>,
        transport: Arc<dyn HandshakeTransport>,
        bridge: BridgeSlot,
        config: &Config,
    ) -> Result<WatcherHandle> {
        let cancel = Arc::new(AtomicBool::new(false));
        let watcher = SignalWatcher {
            signal,
            transport,
            bridge,
            cancel: cancel.clone(),
            poll: config.signal_poll,
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            bridge_ready_timeout: config.bridge_ready_timeout,
        };

        let thread = std::thread::Builder::new()
            .name("instance-relay-watcher".to_string())
            .spawn(move || watcher.run())?;

        Ok(WatcherHandle {
            cancel,
            thread: Some(thread),
        })
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn run(self) {
        log::trace!("Watcher state: {:?}", WatcherState::Idle);
        while !self.cancelled() {
            match self.signal.wait_timeout(self.poll) {
                Ok(true) => self.handle_signal(),
                Ok(false) => {}
                Err(Error::Closed) => break,
                Err(e) => {
                    // Keep the primary alive, back off one poll period
                    log::warn!("Waiting for signal failed: {}", e);
                    std::thread::sleep(self.poll);
                }
            }
        }
        log::trace!("Watcher state: {:?}", WatcherState::Cancelled);
    }

    /// One pass: fetch the line, classify it, hand it to the GUI bridge.
    /// Cancellation at any point abandons the pass without dispatching.
    fn handle_signal(&self) {
        if self.cancelled() {
            return;
        }

        log::trace!("Watcher state: {:?}", WatcherState::Fetching);
        let line = match self
            .transport
            .fetch_line(self.connect_timeout, self.read_timeout, &self.cancel)
        {
            Ok(line) => line,
            Err(Error::Cancelled) => {
                log::debug!("Handshake abandoned at teardown");
                return;
            }
            Err(Error::Timeout(after)) => {
                log::warn!(
                    "Secondary instance did not publish its arguments within {:?}",
                    after
                );
                log::trace!("Watcher state: {:?}", WatcherState::Idle);
                return;
            }
            Err(e) => {
                log::warn!("Fetching arguments from secondary instance failed: {}", e);
                log::trace!("Watcher state: {:?}", WatcherState::Idle);
                return;
            }
        };
        if self.cancelled() {
            log::debug!("Dropping forwarded line fetched during teardown");
            return;
        }

        let forwarded = classify(&line);
        let Some(bridge) = self.wait_for_bridge() else {
            if !self.cancelled() {
                log::error!(
                    "GUI bridge not ready after {:?}, dropping forwarded line '{}'",
                    self.bridge_ready_timeout,
                    line
                );
            }
            return;
        };
        if self.cancelled() {
            return;
        }

        match forwarded {
            Forwarded::Surface => {
                log::trace!("Watcher state: {:?}", WatcherState::Surface);
                bridge.bring_to_front();
            }
            Forwarded::Deliver(line) => {
                log::trace!("Watcher state: {:?}", WatcherState::Deliver);
                bridge.deliver_arguments(&line);
            }
        }
        log::trace!("Watcher state: {:?}", WatcherState::Idle);
    }

    /// Waits for the bridge in poll-sized slices so teardown is noticed
    fn wait_for_bridge(&self) -> Option<Arc<dyn GuiBridge>> {
        let deadline = Instant::now() + self.bridge_ready_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Some(bridge) = self.bridge.wait_ready(remaining.min(self.poll)) {
                return Some(bridge);
            }
            if self.cancelled() || remaining <= self.poll {
                return None;
            }
        }
    }
}

/// Handle to a running [`SignalWatcher`]; stops it when dropped
pub struct WatcherHandle {
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    /// Asks the loop to stop without waiting for it
    pub fn request_stop(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Stops the loop and joins the thread. An in-flight handshake is
    /// abandoned, so this returns within about one poll period. Idempotent.
    pub fn stop(&mut self) {
        self.request_stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Watcher thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
