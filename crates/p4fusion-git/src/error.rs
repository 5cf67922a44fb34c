use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error(transparent)]
    Git(#[from] git2::Error),
    #[error("repository has no index loaded; call prepare_index first")]
    IndexNotPrepared,
    #[error("HEAD commit carries no conversion marker; repository is not resumable")]
    NotResumable,
    #[error("repository was cloned from {found:?}, not {expected:?}")]
    DepotMismatch { expected: String, found: String },
}
