use thiserror::Error;

#[derive(Debug, Error)]
pub enum P4Error {
    #[error("failed to run {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("io error talking to the p4 client: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed p4 -G output: {0}")]
    Protocol(String),
    #[error("p4 {command} failed: {message}")]
    Command { command: String, message: String },
    #[error("p4 {command} failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        command: String,
        attempts: u32,
        message: String,
    },
    #[error("missing field {field:?} in p4 {command} output")]
    MissingField { command: String, field: String },
    #[error("malformed field {field:?} in p4 {command} output: {value:?}")]
    MalformedField {
        command: String,
        field: String,
        value: String,
    },
    #[error("print sink failed: {0}")]
    Sink(crate::depot::SinkError),
}
