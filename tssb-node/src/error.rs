use thiserror::Error;

use tssb_repo::RepoError;
use tssb_transport::FaceError;

/// Transient network errors never bubble past the node — a face that's
/// temporarily rate-limited or disconnected just gets retried by the ARQ
/// loop. What's left here is what the node can't route around.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("no feed is open locally for fid {0}")]
    UnknownFeed(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error("sliding window has not been started")]
    NotStarted,
    #[error("continuation feed sequence does not match its proof")]
    ProofMismatch,
}

pub(crate) fn log_face_error(face_idx: usize, err: FaceError) {
    tracing::debug!(face = face_idx, error = %err, "face send failed, will retry via ARQ");
}
