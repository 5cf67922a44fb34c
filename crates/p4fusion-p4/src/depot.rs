use std::collections::HashMap;

use p4fusion_core::{Changelist, FileEntry};

use crate::error::P4Error;

/// A depot user, for commit author attribution.
#[derive(Debug, Clone)]
pub struct User {
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct ServerInfo {
    /// Offset of the server clock from UTC, in minutes.
    pub timezone_minutes: i32,
}

/// The client workspace spec, reduced to what the conversion needs.
#[derive(Debug, Clone)]
pub struct ClientSpec {
    pub client: String,
    pub view: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LabelSummary {
    pub name: String,
    pub update: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSpec {
    pub label: String,
    /// The label's revision specifier, e.g. `@1042`.
    pub revision: String,
    pub description: String,
    pub update: String,
    pub views: Vec<String>,
}

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Receiver for the interleaved stat/output stream of a `print` call.
///
/// The transport delivers exactly one `on_stat` per requested revision spec,
/// in request order, each followed by that file's content chunks.
pub trait PrintSink {
    fn on_stat(&mut self) -> Result<(), SinkError>;
    fn on_output(&mut self, data: &[u8]) -> Result<(), SinkError>;
}

/// The engine's view of the depot. One instance per worker thread; instances
/// are never shared across threads.
pub trait Depot: Send {
    /// Submitted changelists under `path`, oldest first. `from_cl` restricts
    /// to strictly newer changelists (resume); `max` caps the count.
    fn changes(
        &mut self,
        path: &str,
        from_cl: Option<u64>,
        max: Option<usize>,
    ) -> Result<Vec<Changelist>, P4Error>;

    /// The files of a changelist, without integration sources. Faster than
    /// [`Depot::filelog`].
    fn describe(&mut self, cl: u64) -> Result<Vec<FileEntry>, P4Error>;

    /// The files of a changelist with `from_depot_file`/`from_revision`
    /// populated for integration-style actions.
    fn filelog(&mut self, cl: u64) -> Result<Vec<FileEntry>, P4Error>;

    /// Stream the contents of the given `depotFile#rev` specs into `sink`,
    /// in input order.
    fn print(&mut self, specs: &[String], sink: &mut dyn PrintSink) -> Result<(), P4Error>;

    fn users(&mut self) -> Result<HashMap<String, User>, P4Error>;

    fn info(&mut self) -> Result<ServerInfo, P4Error>;

    fn client_view(&mut self) -> Result<ClientSpec, P4Error>;

    fn labels(&mut self) -> Result<Vec<LabelSummary>, P4Error>;

    fn label(&mut self, name: &str) -> Result<LabelSpec, P4Error>;
}
