use crate::file::FileEntry;

/// Index of a [`FileEntry`] in its changelist's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub u32);

/// Files of one changelist that land on the same target branch, optionally
/// merged from a single source branch.
///
/// When `source_branch` is set, every file in the group is an integration
/// from that branch, and the committer attaches the source head as a second
/// commit parent (unless merging is disabled).
#[derive(Debug)]
pub struct BranchedFileGroup {
    pub source_branch: Option<String>,
    pub target_branch: String,
    pub files: Vec<FileId>,
}

impl BranchedFileGroup {
    pub fn has_source(&self) -> bool {
        self.source_branch.is_some()
    }
}

/// The classified output of one changelist: an arena of file entries plus
/// the per-target-branch groups referring into it.
#[derive(Debug)]
pub struct ChangedFileGroups {
    files: Vec<FileEntry>,
    pub groups: Vec<BranchedFileGroup>,
    pub total_file_count: usize,
}

impl ChangedFileGroups {
    pub fn new(files: Vec<FileEntry>, groups: Vec<BranchedFileGroup>) -> Self {
        let total_file_count = groups.iter().map(|g| g.files.len()).sum();
        Self {
            files,
            groups,
            total_file_count,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    pub fn file(&self, id: FileId) -> &FileEntry {
        &self.files[id.0 as usize]
    }

    /// The entries of one group, in group order.
    pub fn files_of<'a>(
        &'a self,
        group: &'a BranchedFileGroup,
    ) -> impl Iterator<Item = &'a FileEntry> + 'a {
        group.files.iter().map(move |id| self.file(*id))
    }
}
