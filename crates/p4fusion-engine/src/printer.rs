use p4fusion_core::{ChangedFileGroups, FileId};
use p4fusion_p4::{PrintSink, SinkError};
use p4fusion_git::{BlobStream, GitRepo};

use crate::error::EngineError;

/// Streams one `print` batch into the object database.
///
/// The depot delivers stat/output pairs in the order of the requested
/// revision specs, so a cursor over the batch is enough: each stat finalizes
/// the record before it and opens a writer for the next. Records whose blob
/// slot already reached `Set` are skipped (their output is discarded), which
/// makes re-printing a batch idempotent.
pub struct BatchedPrinter<'a> {
    odb: &'a GitRepo,
    groups: &'a ChangedFileGroups,
    batch: &'a [FileId],
    cursor: Option<usize>,
    writer: Option<BlobStream<'a>>,
}

impl<'a> BatchedPrinter<'a> {
    pub fn new(odb: &'a GitRepo, groups: &'a ChangedFileGroups, batch: &'a [FileId]) -> Self {
        Self {
            odb,
            groups,
            batch,
            cursor: None,
            writer: None,
        }
    }

    /// The revision specs for this batch, in the only order the stream may
    /// use.
    pub fn revision_specs(&self) -> Vec<String> {
        self.batch
            .iter()
            .map(|id| self.groups.file(*id).revision_spec())
            .collect()
    }

    fn finalize_current(&mut self) -> Result<(), SinkError> {
        if let Some(writer) = self.writer.take() {
            let id = writer.finalize()?;
            let index = self.cursor.unwrap_or(0);
            self.groups.file(self.batch[index]).blob().fulfil(id);
        }
        Ok(())
    }

    /// Finalize the last open record once the stream has ended. Failing to
    /// see a stat for every requested spec is a protocol violation.
    pub fn finish(mut self) -> Result<(), EngineError> {
        self.finalize_current()
            .map_err(p4fusion_p4::P4Error::Sink)?;
        let seen = self.cursor.map(|c| c + 1).unwrap_or(0);
        if seen != self.batch.len() {
            return Err(EngineError::ShortPrintStream {
                expected: self.batch.len(),
                got: seen,
            });
        }
        Ok(())
    }
}

impl PrintSink for BatchedPrinter<'_> {
    fn on_stat(&mut self) -> Result<(), SinkError> {
        self.finalize_current()?;
        let next = self.cursor.map(|c| c + 1).unwrap_or(0);
        if next >= self.batch.len() {
            return Err("print delivered more files than requested".into());
        }
        let entry = self.groups.file(self.batch[next]);
        if entry.blob().get().is_none() {
            self.writer = Some(self.odb.write_blob()?);
        }
        self.cursor = Some(next);
        Ok(())
    }

    fn on_output(&mut self, data: &[u8]) -> Result<(), SinkError> {
        if self.cursor.is_none() {
            return Err("print output before any stat".into());
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.write(data)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p4fusion_core::{BranchedFileGroup, FileEntry};

    fn groups_of(names: &[&str]) -> ChangedFileGroups {
        let files: Vec<FileEntry> = names
            .iter()
            .map(|name| FileEntry::new(format!("//d/{name}"), 1, "add", "text"))
            .collect();
        let ids: Vec<FileId> = (0..files.len() as u32).map(FileId).collect();
        ChangedFileGroups::new(
            files,
            vec![BranchedFileGroup {
                source_branch: None,
                target_branch: String::new(),
                files: ids,
            }],
        )
    }

    fn scratch_repo() -> (tempfile::TempDir, GitRepo) {
        let tmp = tempfile::tempdir().unwrap();
        let repo = GitRepo::create(tmp.path(), false).unwrap();
        (tmp, repo)
    }

    #[test]
    fn streams_each_record_into_its_own_blob() {
        let (_tmp, repo) = scratch_repo();
        let groups = groups_of(&["a", "b"]);
        let batch = [FileId(0), FileId(1)];
        for id in &batch {
            assert!(groups.file(*id).blob().claim());
        }

        let mut printer = BatchedPrinter::new(&repo, &groups, &batch);
        assert_eq!(printer.revision_specs(), vec!["//d/a#1", "//d/b#1"]);
        printer.on_stat().unwrap();
        printer.on_output(b"alpha ").unwrap();
        printer.on_output(b"one").unwrap();
        printer.on_stat().unwrap();
        printer.on_output(b"beta").unwrap();
        printer.finish().unwrap();

        let a = groups.file(FileId(0)).blob().get().unwrap();
        let b = groups.file(FileId(1)).blob().get().unwrap();
        assert_ne!(a, b);
        assert!(!groups.file(FileId(0)).blob().needs_download());
    }

    #[test]
    fn already_set_records_are_skipped() {
        let (_tmp, repo) = scratch_repo();
        let groups = groups_of(&["a"]);
        let batch = [FileId(0)];
        assert!(groups.file(FileId(0)).blob().claim());
        {
            let mut printer = BatchedPrinter::new(&repo, &groups, &batch);
            printer.on_stat().unwrap();
            printer.on_output(b"payload").unwrap();
            printer.finish().unwrap();
        }
        let first = groups.file(FileId(0)).blob().get().unwrap();

        // A replayed batch discards output instead of re-writing the blob.
        let mut printer = BatchedPrinter::new(&repo, &groups, &batch);
        printer.on_stat().unwrap();
        printer.on_output(b"different").unwrap();
        printer.finish().unwrap();
        assert_eq!(groups.file(FileId(0)).blob().get().unwrap(), first);
    }

    #[test]
    fn short_streams_are_rejected() {
        let (_tmp, repo) = scratch_repo();
        let groups = groups_of(&["a", "b"]);
        let batch = [FileId(0), FileId(1)];
        let mut printer = BatchedPrinter::new(&repo, &groups, &batch);
        printer.on_stat().unwrap();
        printer.on_output(b"only one").unwrap();
        assert!(matches!(
            printer.finish(),
            Err(EngineError::ShortPrintStream {
                expected: 2,
                got: 1
            })
        ));
    }

    #[test]
    fn output_before_stat_is_a_protocol_error() {
        let (_tmp, repo) = scratch_repo();
        let groups = groups_of(&["a"]);
        let batch = [FileId(0)];
        let mut printer = BatchedPrinter::new(&repo, &groups, &batch);
        assert!(printer.on_output(b"junk").is_err());
    }
}
