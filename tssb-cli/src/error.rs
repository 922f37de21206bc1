use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("malformed hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("{0} is not 32 bytes")]
    BadFidLength(&'static str),
    #[error(transparent)]
    Repo(#[from] tssb_repo::RepoError),
    #[error(transparent)]
    Node(#[from] tssb_node::NodeError),
    #[error("unknown feed name {0:?}")]
    UnknownFeedName(String),
}
