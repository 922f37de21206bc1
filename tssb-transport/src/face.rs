use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::FaceError;

/// Maximum payload one datagram may carry, per the wire budget a LoRa/KISS
/// link actually has room for.
pub const MAX_DATAGRAM: usize = 250;

/// A carrier the node can send packets over and receive packets from.
///
/// `send` only queues; delivery and its timing are the face's business.
/// Inbound bytes arrive out-of-band, pushed to the channel handed to
/// [`Face::spawn_recv`] — the node never blocks waiting on a face.
pub trait Face: Send + Sync {
    fn send(&self, buf: &[u8]) -> Result<(), FaceError>;

    /// Minimum spacing this face enforces between transmissions.
    fn duty_cycle(&self) -> Duration {
        Duration::ZERO
    }

    /// Start forwarding inbound datagrams to `tx`. Call once per face.
    fn spawn_recv(self: Arc<Self>, tx: mpsc::UnboundedSender<Vec<u8>>) -> JoinHandle<()>;
}

pub(crate) fn check_len(buf: &[u8]) -> Result<(), FaceError> {
    if buf.len() > MAX_DATAGRAM {
        return Err(FaceError::TooLarge { len: buf.len() });
    }
    Ok(())
}

/// Tracks the next moment a face is allowed to transmit.
pub(crate) struct DutyGate {
    duty_cycle: Duration,
    next_send: std::sync::Mutex<std::time::Instant>,
}

impl DutyGate {
    pub(crate) fn new(duty_cycle: Duration) -> Self {
        Self {
            duty_cycle,
            next_send: std::sync::Mutex::new(std::time::Instant::now()),
        }
    }

    pub(crate) fn duty_cycle_value(&self) -> Duration {
        self.duty_cycle
    }

    /// Check whether a send is allowed right now, and if so, arm the next
    /// gate. Faces with a zero duty cycle always pass.
    pub(crate) fn try_pass(&self) -> Result<(), FaceError> {
        if self.duty_cycle.is_zero() {
            return Ok(());
        }
        let mut next = self.next_send.lock().expect("duty gate lock poisoned");
        let now = std::time::Instant::now();
        if now < *next {
            return Err(FaceError::RateLimited {
                remaining_ms: (*next - now).as_millis() as u64,
            });
        }
        *next = now + self.duty_cycle;
        Ok(())
    }
}
