use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

use crate::action::FileAction;

/// Identity of a blob in the target object database (a raw SHA-1).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobId([u8; 20]);

impl BlobId {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({self})")
    }
}

const STATE_EMPTY: u8 = 0;
const STATE_PENDING: u8 = 1;
const STATE_SET: u8 = 2;

/// The per-file blob state machine: `Empty -> Pending -> Set`.
///
/// `Pending` never transitions back to `Empty`; a download that fails after
/// claiming the slot fails its whole changelist task instead, and a retry of
/// the batch skips records that already reached `Set`.
#[derive(Debug)]
pub struct BlobSlot {
    state: AtomicU8,
    oid: OnceLock<BlobId>,
}

impl BlobSlot {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_EMPTY),
            oid: OnceLock::new(),
        }
    }

    /// True while nobody has claimed or written this slot.
    pub fn needs_download(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_EMPTY
    }

    /// Attempt the `Empty -> Pending` transition. Returns true for exactly
    /// one caller; the winner must follow up with [`BlobSlot::fulfil`].
    pub fn claim(&self) -> bool {
        self.state
            .compare_exchange(
                STATE_EMPTY,
                STATE_PENDING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Publish the written blob id, completing `Pending -> Set`.
    pub fn fulfil(&self, id: BlobId) {
        // The slot is claimed by a single worker, so the cell is empty here.
        let _ = self.oid.set(id);
        self.state.store(STATE_SET, Ordering::Release);
    }

    /// The blob id, once the slot reached `Set`.
    pub fn get(&self) -> Option<BlobId> {
        if self.state.load(Ordering::Acquire) == STATE_SET {
            self.oid.get().copied()
        } else {
            None
        }
    }
}

impl Default for BlobSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// One changed file within a changelist, as reported by `describe` or
/// `filelog` and enriched during classification and download.
///
/// Entries live in the arena owned by
/// [`crate::group::ChangedFileGroups`]; groups refer to them by
/// [`crate::group::FileId`], so a record that lands in several groups of the
/// same changelist shares one blob slot and is downloaded at most once.
#[derive(Debug)]
pub struct FileEntry {
    pub depot_file: String,
    pub revision: u64,
    pub from_depot_file: Option<String>,
    pub from_revision: Option<u64>,
    pub action: FileAction,
    pub is_binary: bool,
    pub is_executable: bool,
    relative_path: String,
    blob: BlobSlot,
}

impl FileEntry {
    /// Build an entry from raw server fields. `file_type` is the p4 type
    /// string ("text", "binary+x", "ktext", ...).
    pub fn new(depot_file: String, revision: u64, action: &str, file_type: &str) -> Self {
        Self {
            depot_file,
            revision,
            from_depot_file: None,
            from_revision: None,
            action: FileAction::parse(action),
            is_binary: file_type.contains("binary"),
            is_executable: file_type.contains("+x"),
            relative_path: String::new(),
            blob: BlobSlot::new(),
        }
    }

    pub fn set_from(&mut self, depot_file: String, revision: u64) {
        self.from_depot_file = Some(depot_file);
        self.from_revision = Some(revision);
    }

    /// Rewrite the action to the synthetic merge delete (see
    /// [`FileAction::IntegrateDelete`]).
    pub fn mark_merge_delete(&mut self) {
        self.action = FileAction::IntegrateDelete;
    }

    pub fn is_deleted(&self) -> bool {
        self.action.is_deleted()
    }

    pub fn is_integrated(&self) -> bool {
        self.action.is_integrated()
    }

    /// Path of this file inside its target branch's tree. Set once by the
    /// branch classifier.
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn set_relative_path(&mut self, path: String) {
        self.relative_path = path;
    }

    pub fn blob(&self) -> &BlobSlot {
        &self.blob
    }

    /// Deleted records carry no content; everything else needs a download
    /// while its blob slot is still empty.
    pub fn needs_download(&self) -> bool {
        !self.is_deleted() && self.blob.needs_download()
    }

    /// The `depotFile#rev` spec handed to `print`.
    pub fn revision_spec(&self) -> String {
        format!("{}#{}", self.depot_file, self.revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_slot_lifecycle() {
        let slot = BlobSlot::new();
        assert!(slot.needs_download());
        assert!(slot.get().is_none());

        assert!(slot.claim());
        assert!(!slot.needs_download());
        // A second claimant loses.
        assert!(!slot.claim());

        let id = BlobId::from_bytes([7; 20]);
        slot.fulfil(id);
        assert_eq!(slot.get(), Some(id));
        assert!(!slot.needs_download());
        assert!(!slot.claim());
    }

    #[test]
    fn type_string_flags() {
        let entry = FileEntry::new("//d/a".into(), 1, "add", "binary+x");
        assert!(entry.is_binary);
        assert!(entry.is_executable);
        let entry = FileEntry::new("//d/a".into(), 1, "add", "ktext");
        assert!(!entry.is_binary);
        assert!(!entry.is_executable);
    }

    #[test]
    fn deleted_records_never_need_content() {
        let entry = FileEntry::new("//d/a".into(), 2, "delete", "text");
        assert!(!entry.needs_download());
        let entry = FileEntry::new("//d/a".into(), 2, "edit", "text");
        assert!(entry.needs_download());
    }

    #[test]
    fn revision_spec_format() {
        let entry = FileEntry::new("//depot/main/a.txt".into(), 4, "edit", "text");
        assert_eq!(entry.revision_spec(), "//depot/main/a.txt#4");
    }

    #[test]
    fn blob_id_hex_display() {
        let id = BlobId::from_bytes([0xab; 20]);
        assert_eq!(id.to_string(), "ab".repeat(20));
    }
}
