use tracing::warn;

/// A changed file's server-side action, folded into the categories the
/// conversion cares about.
///
/// See <https://www.perforce.com/manuals/cmdref/Content/CmdRef/p4_fstat.html>
/// for the full list of action tokens a server may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    Add,
    Edit,
    Delete,
    Branch,
    MoveAdd,
    MoveDelete,
    Integrate,
    Import,
    Purge,
    Archive,
    /// Synthesized for a record whose filelog reports a `delete from`
    /// origin: an integration elsewhere caused this path to be deleted.
    /// The record is a deletion, but not a merge source for the commit.
    IntegrateDelete,
}

impl FileAction {
    /// Classify a raw action token. Unknown tokens fall back by shape:
    /// anything containing "delete" deletes, anything containing "move/"
    /// behaves like a move/add, everything else is treated as an edit.
    pub fn parse(token: &str) -> FileAction {
        match token {
            "add" => FileAction::Add,
            "edit" => FileAction::Edit,
            "delete" => FileAction::Delete,
            "branch" => FileAction::Branch,
            "move/add" => FileAction::MoveAdd,
            "move/delete" => FileAction::MoveDelete,
            "integrate" => FileAction::Integrate,
            "import" => FileAction::Import,
            "purge" => FileAction::Purge,
            "archive" => FileAction::Archive,
            unknown if unknown.contains("delete") => {
                warn!(action = unknown, "unsupported file action, assuming delete");
                FileAction::Delete
            }
            unknown if unknown.contains("move/") => {
                warn!(action = unknown, "unsupported file action, assuming move/add");
                FileAction::MoveAdd
            }
            unknown => {
                warn!(action = unknown, "unsupported file action, assuming edit");
                FileAction::Edit
            }
        }
    }

    /// True when the record removes the path from the tree.
    pub fn is_deleted(self) -> bool {
        matches!(
            self,
            FileAction::Delete
                | FileAction::MoveDelete
                | FileAction::Purge
                | FileAction::IntegrateDelete
        )
    }

    /// True when the record carries content from another depot path and can
    /// therefore represent a cross-branch merge.
    pub fn is_integrated(self) -> bool {
        matches!(
            self,
            FileAction::Branch | FileAction::MoveAdd | FileAction::Integrate | FileAction::Import
        )
    }
}
