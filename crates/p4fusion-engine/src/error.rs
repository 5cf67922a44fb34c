use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    P4(#[from] p4fusion_p4::P4Error),
    #[error(transparent)]
    Git(#[from] p4fusion_git::GitError),
    #[error(transparent)]
    Core(#[from] p4fusion_core::CoreError),
    #[error("changelist {cl} failed: {message}")]
    ChangelistFailed { cl: u64, message: String },
    #[error("print stream delivered {got} of {expected} requested files")]
    ShortPrintStream { expected: usize, got: usize },
}
