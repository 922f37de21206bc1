use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::FaceError;
use crate::face::{check_len, DutyGate, Face};

const FEND: u8 = 0xC0;
const FESC: u8 = 0xDB;
const TFEND: u8 = 0xDC;
const TFESC: u8 = 0xDD;

fn encode(buf: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(buf.len() + 2);
    out.push(FEND);
    for &b in buf {
        match b {
            FEND => {
                out.push(FESC);
                out.push(TFEND);
            }
            FESC => {
                out.push(FESC);
                out.push(TFESC);
            }
            _ => out.push(b),
        }
    }
    out.push(FEND);
    out
}

/// A byte-stuffed KISS framing face over any async duplex stream — a
/// serial port, or a pty in tests.
pub struct KissFace<RW> {
    reader: std::sync::Mutex<Option<ReadHalf<RW>>>,
    writer: Arc<AsyncMutex<WriteHalf<RW>>>,
    gate: DutyGate,
}

impl<RW> KissFace<RW>
where
    RW: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(io: RW, duty_cycle: Duration) -> Self {
        let (r, w) = tokio::io::split(io);
        Self {
            reader: std::sync::Mutex::new(Some(r)),
            writer: Arc::new(AsyncMutex::new(w)),
            gate: DutyGate::new(duty_cycle),
        }
    }
}

impl<RW> Face for KissFace<RW>
where
    RW: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn send(&self, buf: &[u8]) -> Result<(), FaceError> {
        check_len(buf)?;
        self.gate.try_pass()?;
        let frame = encode(buf);
        let writer = self.writer.clone();
        tokio::spawn(async move {
            let mut w = writer.lock().await;
            if let Err(e) = w.write_all(&frame).await {
                warn!(error = %e, "kiss face write failed");
            }
        });
        Ok(())
    }

    fn duty_cycle(&self) -> Duration {
        self.gate.duty_cycle_value()
    }

    /// Panics if called a second time — a face has exactly one reader half.
    fn spawn_recv(self: Arc<Self>, tx: mpsc::UnboundedSender<Vec<u8>>) -> JoinHandle<()> {
        let mut reader = self
            .reader
            .lock()
            .expect("kiss reader lock poisoned")
            .take()
            .expect("spawn_recv called twice on the same KissFace");

        tokio::spawn(async move {
            let mut frame = Vec::new();
            let mut escaped = false;
            let mut in_frame = false;
            let mut byte = [0u8; 1];
            loop {
                match reader.read_exact(&mut byte).await {
                    Ok(()) => {}
                    Err(_) => return,
                }
                let b = byte[0];
                match b {
                    FEND if !in_frame => {
                        in_frame = true;
                        frame.clear();
                    }
                    FEND => {
                        in_frame = false;
                        if !frame.is_empty() && tx.send(std::mem::take(&mut frame)).is_err() {
                            return;
                        }
                    }
                    FESC if in_frame => escaped = true,
                    TFEND if in_frame && escaped => {
                        frame.push(FEND);
                        escaped = false;
                    }
                    TFESC if in_frame && escaped => {
                        frame.push(FESC);
                        escaped = false;
                    }
                    _ if in_frame => frame.push(b),
                    _ => {}
                }
            }
        })
    }
}
