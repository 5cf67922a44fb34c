pub mod cache;
pub mod client;
pub mod depot;
pub mod error;
pub mod marshal;
pub mod parse;

pub use client::{P4Client, P4Config};
pub use depot::{ClientSpec, Depot, LabelSpec, LabelSummary, PrintSink, ServerInfo, SinkError, User};
pub use error::P4Error;
