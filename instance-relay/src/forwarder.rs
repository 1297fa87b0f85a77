use crate::InstanceRegistry;
use crate::RegistrationState;
use crate::ServeOutcome;
use std::sync::mpsc::RecvTimeoutError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// The primary fetched this instance's arguments
    Delivered,
    /// Endpoint contention, no primary connection or a transport error
    Dropped,
    /// The handshake server was still running when the wait ran out
    TimedOut,
    /// No handshake server was started (primary could not be signaled)
    NotStarted,
}

/// Secondary-side orchestration: signal the primary, then wait for the
/// handshake server so the published arguments are not orphaned by an
/// early exit
pub struct SecondaryForwarder<'a> {
    registry: &'a mut InstanceRegistry,
}

impl<'a> SecondaryForwarder<'a> {
    pub fn new(registry: &'a mut InstanceRegistry) -> Self {
        SecondaryForwarder { registry }
    }

    /// Runs the claim and, on the secondary path, waits for the handshake.
    ///
    /// Returns `None` when this process became the primary instead.
    pub fn forward(self) -> Option<ForwardOutcome> {
        match self.registry.try_become_primary() {
            RegistrationState::Secondary => Some(self.finish()),
            _ => None,
        }
    }

    /// Waits up to the configured forward timeout for the handshake server
    pub fn finish(self) -> ForwardOutcome {
        let timeout = self.registry.config().forward_timeout;
        let Some(outcome) = self.registry.take_handshake() else {
            return ForwardOutcome::NotStarted;
        };

        let outcome = match outcome.recv_timeout(timeout) {
            Ok(ServeOutcome::Delivered) => ForwardOutcome::Delivered,
            Ok(ServeOutcome::GaveUp | ServeOutcome::TimedOut | ServeOutcome::Failed) => {
                ForwardOutcome::Dropped
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("Handshake still pending after {:?}, exiting anyway", timeout);
                ForwardOutcome::TimedOut
            }
            Err(RecvTimeoutError::Disconnected) => {
                log::error!("Handshake server thread ended without a result");
                ForwardOutcome::Dropped
            }
        };
        log::info!("Forwarding arguments to the primary instance: {:?}", outcome);
        outcome
    }
}
