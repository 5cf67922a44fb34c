use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

use p4fusion_core::paths::{decode_depot_path, strip_base_path};
use p4fusion_core::{
    Branch, BranchedFileGroup, ChangedFileGroups, CoreError, FileEntry, FileId, ViewMap,
};
use tracing::warn;

/// The user-declared branch model plus the client view filter. Immutable
/// once built; shared read-only by every worker.
#[derive(Debug)]
pub struct BranchSet {
    view: ViewMap,
    base_path: String,
    branches: Vec<Branch>,
    include_binaries: bool,
}

impl BranchSet {
    /// Any malformed view line or branch spec is fatal here, before the
    /// conversion touches the target repository.
    pub fn new(
        view_lines: &[String],
        base_path: &str,
        branch_specs: &[String],
        include_binaries: bool,
    ) -> Result<BranchSet, CoreError> {
        if !p4fusion_core::paths::is_valid_depot_path(base_path) {
            return Err(CoreError::InvalidDepotPath(base_path.to_string()));
        }
        let branches = branch_specs
            .iter()
            .map(|spec| Branch::parse(spec))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BranchSet {
            view: ViewMap::parse(view_lines)?,
            base_path: base_path.to_string(),
            branches,
            include_binaries,
        })
    }

    /// A declared branch model needs `filelog` (integration sources) where
    /// the plain conversion can use the cheaper `describe`.
    pub fn has_mergeable_branch(&self) -> bool {
        !self.branches.is_empty()
    }

    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Split a base-relative path into its branch alias and in-branch path.
    fn split_branch_path<'a>(&self, relative: &'a str) -> Option<(&str, &'a str)> {
        self.branches.iter().find_map(|branch| {
            branch
                .split_branch_path(relative)
                .map(|rest| (branch.git_alias.as_str(), rest))
        })
    }

    /// Map a record's integration source to its branch alias, if the source
    /// lies on a *different* branch than `target`.
    fn merge_source(&self, entry: &FileEntry, target: &str) -> Option<String> {
        if !entry.is_integrated() {
            return None;
        }
        let from = entry.from_depot_file.as_deref()?;
        let relative = strip_base_path(&self.base_path, from)?;
        let (alias, _) = self.split_branch_path(relative)?;
        (alias != target).then(|| alias.to_string())
    }

    /// Classify a changelist's flat file list into per-target-branch groups,
    /// splitting out one merge group per `(source, target)` pair.
    ///
    /// Filtering drops files outside the client view, binaries when those
    /// are excluded, files outside the base path, and — once branches are
    /// declared — files on no declared branch. Each kept record gets its
    /// in-branch relative path. Never fails: unknown actions were already
    /// classified by the fallback table.
    pub fn parse_affected_files(&self, files: Vec<FileEntry>) -> ChangedFileGroups {
        let files = dedup_by_depot_path(files);

        let mut kept: Vec<FileEntry> = Vec::with_capacity(files.len());
        let mut grouped: BTreeMap<(String, Option<String>), Vec<FileId>> = BTreeMap::new();

        for mut entry in files {
            if !self.view.contains(&entry.depot_file) {
                continue;
            }
            if entry.is_binary && !self.include_binaries {
                continue;
            }
            let Some(relative) = strip_base_path(&self.base_path, &entry.depot_file) else {
                continue;
            };

            let (target, in_branch_path) = if self.branches.is_empty() {
                (String::new(), relative)
            } else {
                match self.split_branch_path(relative) {
                    Some((alias, rest)) => (alias.to_string(), rest),
                    // A declared branch model drops files on no branch.
                    None => continue,
                }
            };
            // Tree paths are the decoded form; the depot path itself stays
            // encoded for the wire.
            let in_branch_path = decode_depot_path(in_branch_path);
            let source = self.merge_source(&entry, &target);

            entry.set_relative_path(in_branch_path);
            let id = FileId(kept.len() as u32);
            kept.push(entry);
            grouped.entry((target, source)).or_default().push(id);
        }

        // BTreeMap iteration fixes the commit order: by target alias, then
        // merge-less groups, then by source alias.
        let groups = grouped
            .into_iter()
            .map(|((target_branch, source_branch), files)| BranchedFileGroup {
                source_branch,
                target_branch,
                files,
            })
            .collect();
        ChangedFileGroups::new(kept, groups)
    }
}

/// A changelist listing the same depot path twice is unspecified server
/// behavior; keep the record with the higher revision.
fn dedup_by_depot_path(files: Vec<FileEntry>) -> Vec<FileEntry> {
    let mut keep = vec![true; files.len()];
    let mut by_path: HashMap<String, usize> = HashMap::new();
    for (index, entry) in files.iter().enumerate() {
        match by_path.entry(entry.depot_file.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(index);
            }
            Entry::Occupied(mut slot) => {
                let previous = *slot.get();
                warn!(
                    depot_file = %entry.depot_file,
                    "changelist lists the same depot path twice; keeping the higher revision"
                );
                if entry.revision > files[previous].revision {
                    keep[previous] = false;
                    slot.insert(index);
                } else {
                    keep[index] = false;
                }
            }
        }
    }
    files
        .into_iter()
        .zip(keep)
        .filter_map(|(entry, keep)| keep.then_some(entry))
        .collect()
}
