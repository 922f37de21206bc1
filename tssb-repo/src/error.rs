use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("log file is corrupt: expected {expected} bytes, found {found}")]
    Corrupt { expected: u64, found: u64 },
    #[error("sequence {requested} is out of range (anchor {anchor}, front {front})")]
    OutOfRange { requested: i64, anchor: u32, front: u32 },
    #[error("entry does not extend the log in sequence")]
    OutOfSequence,
    #[error("packet failed DMX or signature verification")]
    BadPacket,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Log(#[from] LogError),
    #[error("a log already exists for this feed id")]
    DuplicateLog,
    #[error("no log is open for this feed id")]
    NoSuchLog,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
