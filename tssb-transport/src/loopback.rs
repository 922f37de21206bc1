use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::FaceError;
use crate::face::{check_len, DutyGate, Face};

/// An in-process face, useful for tests and the CLI's single-process demo
/// mode. `LoopbackFace::pair` wires two faces directly together — nothing
/// ever touches a real socket.
pub struct LoopbackFace {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    gate: DutyGate,
}

impl LoopbackFace {
    pub fn pair() -> (Self, Self) {
        Self::pair_with_duty_cycle(Duration::ZERO)
    }

    pub fn pair_with_duty_cycle(duty_cycle: Duration) -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let a = Self {
            outbound: tx_b,
            inbound: std::sync::Mutex::new(Some(rx_a)),
            gate: DutyGate::new(duty_cycle),
        };
        let b = Self {
            outbound: tx_a,
            inbound: std::sync::Mutex::new(Some(rx_b)),
            gate: DutyGate::new(duty_cycle),
        };
        (a, b)
    }
}

impl Face for LoopbackFace {
    fn send(&self, buf: &[u8]) -> Result<(), FaceError> {
        check_len(buf)?;
        self.gate.try_pass()?;
        self.outbound.send(buf.to_vec()).map_err(|_| FaceError::Closed)
    }

    fn duty_cycle(&self) -> Duration {
        self.gate.duty_cycle_value()
    }

    fn spawn_recv(self: Arc<Self>, tx: mpsc::UnboundedSender<Vec<u8>>) -> JoinHandle<()> {
        let mut rx = self
            .inbound
            .lock()
            .expect("loopback inbound lock poisoned")
            .take()
            .expect("spawn_recv called twice on the same LoopbackFace");

        tokio::spawn(async move {
            while let Some(buf) = rx.recv().await {
                if tx.send(buf).is_err() {
                    return;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn paired_faces_deliver_to_each_other() {
        let (a, b) = LoopbackFace::pair();
        let a = Arc::new(a);
        let b = Arc::new(b);
        let (tx, mut rx) = mpsc::unbounded_channel();
        b.clone().spawn_recv(tx);

        a.send(b"hello").unwrap();
        let got = rx.recv().await.unwrap();
        assert_eq!(got, b"hello");
    }

    #[test]
    fn oversized_datagram_is_rejected() {
        let (a, _b) = LoopbackFace::pair();
        let buf = vec![0u8; 251];
        assert!(matches!(a.send(&buf), Err(FaceError::TooLarge { len: 251 })));
    }
}
