pub mod action;
pub mod branch;
pub mod change;
pub mod error;
pub mod file;
pub mod group;
pub mod paths;
pub mod view;

pub use action::FileAction;
pub use branch::Branch;
pub use change::Changelist;
pub use error::CoreError;
pub use file::{BlobId, BlobSlot, FileEntry};
pub use group::{BranchedFileGroup, ChangedFileGroups, FileId};
pub use view::ViewMap;
