/// Immutable identity of one submitted changelist, from the `changes`
/// listing. The changed-file groups are attached later by the prepare phase.
#[derive(Debug, Clone)]
pub struct Changelist {
    pub number: u64,
    pub user: String,
    pub description: String,
    /// Seconds since the epoch, as reported by the server.
    pub timestamp: i64,
}
