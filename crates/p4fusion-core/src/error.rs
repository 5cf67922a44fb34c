use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid depot path {0:?}: must start with \"//\" and end with \"/...\"")]
    InvalidDepotPath(String),
    #[error("invalid branch spec {spec:?}: {reason}")]
    InvalidBranchSpec { spec: String, reason: String },
    #[error("invalid client view line {line:?}: {reason}")]
    InvalidViewLine { line: String, reason: String },
}
