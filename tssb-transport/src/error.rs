use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaceError {
    #[error("datagram of {len} bytes exceeds the 250-byte transport cap")]
    TooLarge { len: usize },
    #[error("duty cycle not yet elapsed, retry in {remaining_ms}ms")]
    RateLimited { remaining_ms: u64 },
    #[error("face is closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
