//! The conversion marker embedded in every commit message, and its parsers.
//!
//! The marker is what makes a converted repository resumable: the last
//! committed changelist is recovered from HEAD's message instead of any
//! side-channel state.

/// Build a commit message carrying the marker trailer. `depot_path` is the
/// base path including the `/...` suffix, which the trailer drops.
pub fn commit_message(cl: u64, description: &str, depot_path: &str) -> String {
    let base = depot_path.strip_suffix("...").unwrap_or(depot_path);
    format!("{cl} - {description}\n[p4-fusion: depot-paths = \"{base}\": change = {cl}]")
}

/// Note appended to the message for every merge parent.
pub fn merge_note(refname: &str) -> String {
    format!("; merged from {refname}")
}

/// Recover the changelist number from the *last* marker in a message.
/// Branch notes may follow the marker, so the scan is from the right.
pub fn latest_changelist(message: &str) -> Option<u64> {
    const NEEDLE: &str = ": change = ";
    let start = message.rfind(NEEDLE)? + NEEDLE.len();
    let rest = &message[start..];
    let end = rest.find(']')?;
    rest[..end].trim().parse().ok()
}

/// Recover the depot base path recorded in the marker, with the `...`
/// suffix restored.
pub fn depot_paths(message: &str) -> Option<String> {
    const NEEDLE: &str = "depot-paths = \"";
    let start = message.find(NEEDLE)? + NEEDLE.len();
    let rest = &message[start..];
    let end = rest.find("\": change")?;
    Some(format!("{}...", &rest[..end]))
}
