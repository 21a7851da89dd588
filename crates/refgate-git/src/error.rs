use refgate_core::AuthzError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("not a git repository: {0}")]
    NotARepository(String),

    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("unexpected git output: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<GitError> for AuthzError {
    fn from(err: GitError) -> Self {
        AuthzError::RefStore(err.to_string())
    }
}
