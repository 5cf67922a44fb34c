use std::sync::OnceLock;

use p4fusion_core::{ChangedFileGroups, Changelist, FileId};
use p4fusion_git::GitRepo;
use p4fusion_p4::Depot;

use crate::branch_set::BranchSet;
use crate::error::EngineError;
use crate::latch::Latch;
use crate::printer::BatchedPrinter;

/// Per-changelist pipeline state: metadata from the `changes` listing, the
/// classified file groups once Prepare ran, and the two one-shot barriers
/// the committer and scheduler coordinate on.
pub struct ChangelistTask {
    change: Changelist,
    groups: OnceLock<ChangedFileGroups>,
    prepared: Latch,
    ready: Latch,
}

impl ChangelistTask {
    pub fn new(change: Changelist) -> Self {
        Self {
            change,
            groups: OnceLock::new(),
            prepared: Latch::new(),
            ready: Latch::new(),
        }
    }

    pub fn change(&self) -> &Changelist {
        &self.change
    }

    /// The classified groups, once Prepare has run.
    pub fn groups(&self) -> Option<&ChangedFileGroups> {
        self.groups.get()
    }

    /// Run both phases on a worker. Any failure fails both latches so the
    /// committer (and anything else waiting) unblocks with the error.
    pub fn process<D: Depot + ?Sized>(
        &self,
        depot: &mut D,
        odb: &GitRepo,
        branch_set: &BranchSet,
        print_batch: usize,
    ) -> Result<(), EngineError> {
        let result = self
            .prepare(depot, branch_set)
            .and_then(|()| self.download(depot, odb, print_batch));
        match result {
            Ok(()) => {
                self.ready.release();
                Ok(())
            }
            Err(err) => {
                let message = err.to_string();
                self.prepared.fail(message.clone());
                self.ready.fail(message);
                Err(err)
            }
        }
    }

    /// Phase one: fetch the file list (`filelog` when the branch model needs
    /// integration sources, the cheaper `describe` otherwise) and classify
    /// it.
    fn prepare<D: Depot + ?Sized>(
        &self,
        depot: &mut D,
        branch_set: &BranchSet,
    ) -> Result<(), EngineError> {
        let files = if branch_set.has_mergeable_branch() {
            depot.filelog(self.change.number)?
        } else {
            depot.describe(self.change.number)?
        };
        let _ = self.groups.set(branch_set.parse_affected_files(files));
        self.prepared.release();
        Ok(())
    }

    /// Phase two: claim every file still needing content and stream batches
    /// of `print_batch` revisions into the object database.
    fn download<D: Depot + ?Sized>(
        &self,
        depot: &mut D,
        odb: &GitRepo,
        print_batch: usize,
    ) -> Result<(), EngineError> {
        self.prepared.wait().map_err(|message| self.failed(message))?;
        let groups = self
            .groups
            .get()
            .ok_or_else(|| self.failed("prepare did not publish file groups".to_string()))?;

        let print_batch = print_batch.max(1);
        let mut batch: Vec<FileId> = Vec::with_capacity(print_batch);
        for group in &groups.groups {
            for &id in &group.files {
                let entry = groups.file(id);
                if entry.needs_download() && entry.blob().claim() {
                    batch.push(id);
                    if batch.len() >= print_batch {
                        self.flush(depot, odb, groups, &mut batch)?;
                    }
                }
            }
        }
        self.flush(depot, odb, groups, &mut batch)
    }

    fn flush<D: Depot + ?Sized>(
        &self,
        depot: &mut D,
        odb: &GitRepo,
        groups: &ChangedFileGroups,
        batch: &mut Vec<FileId>,
    ) -> Result<(), EngineError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut printer = BatchedPrinter::new(odb, groups, batch.as_slice());
        let specs = printer.revision_specs();
        depot.print(&specs, &mut printer)?;
        printer.finish()?;
        batch.clear();
        Ok(())
    }

    /// Block until this changelist is fully downloaded (or its task died).
    pub fn wait_ready(&self) -> Result<(), EngineError> {
        self.ready.wait().map_err(|message| self.failed(message))
    }

    fn failed(&self, message: String) -> EngineError {
        EngineError::ChangelistFailed {
            cl: self.change.number,
            message,
        }
    }
}
