//! Label-to-tag conversion: lightweight tags named after depot labels,
//! attached to the commits whose marker changelist the label points at.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{info, warn};

use crate::error::GitError;
use crate::marker;
use crate::repo::GitRepo;

/// Tags to apply, keyed by changelist number; each changelist maps tag
/// names to the tag's annotation text.
pub type LabelsByChange = BTreeMap<u64, BTreeMap<String, String>>;

/// Normalize a label into a valid ref component. Leading slashes and
/// trailing slashes/dots are trimmed, characters git refuses in refnames
/// are replaced with `_`, and slash runs collapse.
pub fn sanitize_label(label: &str) -> String {
    static BAD_CHARS: OnceLock<Regex> = OnceLock::new();
    static SLASH_RUNS: OnceLock<Regex> = OnceLock::new();
    let bad_chars = BAD_CHARS.get_or_init(|| Regex::new(r"[ ~^:?*\[@{]").unwrap());
    let slash_runs = SLASH_RUNS.get_or_init(|| Regex::new(r"/{2,}").unwrap());

    let trimmed = label
        .trim_start_matches('/')
        .trim_end_matches(['/', '.']);
    if trimmed == "@" {
        return String::new();
    }
    let replaced = bad_chars.replace_all(trimmed, "_");
    slash_runs.replace_all(&replaced, "/").into_owned()
}

/// Reconcile `refs/tags/*` with the labels: tags that moved or disappeared
/// are deleted, missing tags are created along HEAD's first-parent chain.
/// Returns the number of tags created.
pub fn update_tags(repo: &GitRepo, labels: &LabelsByChange) -> Result<usize, GitError> {
    let mut pending: LabelsByChange = labels.clone();
    let inner = repo.raw();

    // Pass 1: existing tags. A tag that still matches its label is kept
    // (and dropped from the pending set); anything else is stale.
    let mut stale = Vec::new();
    for reference in inner.references_glob("refs/tags/*")? {
        let reference = reference?;
        let Some(name) = reference.name().map(str::to_string) else {
            continue;
        };
        let tag_name = name.trim_start_matches("refs/tags/").to_string();
        let commit = match reference.peel_to_commit() {
            Ok(commit) => commit,
            Err(err) => {
                warn!(tag = %tag_name, error = %err, "could not resolve tag, skipping");
                continue;
            }
        };
        let cl = marker::latest_changelist(commit.message().unwrap_or(""));
        let keep = cl
            .and_then(|cl| pending.get_mut(&cl).map(|tags| tags.remove(&tag_name).is_some()))
            .unwrap_or(false);
        if keep {
            if let Some(cl) = cl {
                if pending.get(&cl).is_some_and(BTreeMap::is_empty) {
                    pending.remove(&cl);
                }
            }
        } else {
            stale.push(name);
        }
    }
    for name in stale {
        info!(tag = %name, "tag has moved or no longer exists, deleting");
        inner.find_reference(&name)?.delete()?;
    }

    // Pass 2: walk HEAD's first-parent chain creating what remains.
    let mut created = 0;
    let mut commit = match inner.head() {
        Ok(head) => head.peel_to_commit()?,
        Err(_) => return Ok(0),
    };
    loop {
        if let Some(cl) = marker::latest_changelist(commit.message().unwrap_or("")) {
            if let Some(tags) = pending.remove(&cl) {
                for (tag_name, annotation) in tags {
                    info!(tag = %tag_name, cl, "creating tag");
                    inner.reference(
                        &format!("refs/tags/{tag_name}"),
                        commit.id(),
                        false,
                        &annotation,
                    )?;
                    created += 1;
                }
            }
        }
        match commit.parent(0) {
            Ok(parent) => commit = parent,
            Err(_) => break,
        }
    }
    Ok(created)
}
