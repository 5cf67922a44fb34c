use std::io::Write;
use std::path::Path;

use git2::{ErrorCode, IndexEntry, IndexTime, Repository, RepositoryInitOptions, Signature, Time};
use p4fusion_core::BlobId;
use tracing::{info, warn};

use crate::error::GitError;
use crate::marker;

/// The target repository. The committer owns one instance with a live
/// index; each worker opens its own blob-only instance (libgit2's object
/// database accepts concurrent writers, the index and refs do not).
pub struct GitRepo {
    repo: Repository,
    index: Option<git2::Index>,
    base_commit: Option<git2::Oid>,
    current_branch: String,
}

/// A blob being streamed into the object database.
pub struct BlobStream<'repo> {
    writer: git2::BlobWriter<'repo>,
}

impl BlobStream<'_> {
    pub fn write(&mut self, data: &[u8]) -> Result<(), GitError> {
        self.writer.write_all(data).map_err(|err| {
            GitError::Git(git2::Error::from_str(&format!("blob write failed: {err}")))
        })
    }

    /// Close the stream and publish the blob.
    pub fn finalize(self) -> Result<BlobId, GitError> {
        Ok(to_blob_id(self.writer.commit()?))
    }
}

fn to_blob_id(oid: git2::Oid) -> BlobId {
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(oid.as_bytes());
    BlobId::from_bytes(bytes)
}

fn to_oid(id: BlobId) -> Result<git2::Oid, GitError> {
    Ok(git2::Oid::from_bytes(id.as_bytes())?)
}

impl GitRepo {
    /// Open the bare repository at `path`, initializing it (initial head
    /// `main`) when absent.
    pub fn create(path: &Path, fsync: bool) -> Result<GitRepo, GitError> {
        let repo = match Repository::open_bare(path) {
            Ok(repo) => {
                info!(path = %path.display(), "opened existing git repository");
                repo
            }
            Err(_) => {
                let mut opts = RepositoryInitOptions::new();
                opts.bare(true).mkpath(true).initial_head("main");
                let repo = Repository::init_opts(path, &opts)?;
                info!(path = %path.display(), "initialized git repository");
                repo
            }
        };
        if fsync {
            // Honored by libgit2 when writing loose objects and refs.
            repo.config()?.set_bool("core.fsyncObjectFiles", true)?;
        }
        Ok(GitRepo {
            repo,
            index: None,
            base_commit: None,
            current_branch: String::new(),
        })
    }

    /// Open an existing repository for blob writing only (worker handles).
    pub fn open(path: &Path) -> Result<GitRepo, GitError> {
        Ok(GitRepo {
            repo: Repository::open_bare(path)?,
            index: None,
            base_commit: None,
            current_branch: String::new(),
        })
    }

    pub fn head_exists(&self) -> bool {
        self.repo.refname_to_id("HEAD").is_ok()
    }

    fn head_message(&self) -> Result<String, GitError> {
        let commit = self.repo.head()?.peel_to_commit()?;
        Ok(commit.message().unwrap_or("").to_string())
    }

    /// Check that HEAD's marker names the depot path this run converts.
    pub fn verify_cloned_from(&self, depot_path: &str) -> Result<(), GitError> {
        let message = self.head_message()?;
        let found = marker::depot_paths(&message).ok_or(GitError::NotResumable)?;
        if found != depot_path {
            return Err(GitError::DepotMismatch {
                expected: depot_path.to_string(),
                found,
            });
        }
        Ok(())
    }

    /// The last converted changelist, recovered from HEAD's marker.
    pub fn latest_changelist(&self) -> Result<u64, GitError> {
        let message = self.head_message()?;
        marker::latest_changelist(&message).ok_or(GitError::NotResumable)
    }

    /// True when HEAD is only the synthetic base commit: a previous run was
    /// interrupted before converting anything, which is still resumable.
    pub fn has_only_base_commit(&self) -> Result<bool, GitError> {
        let commit = self.repo.head()?.peel_to_commit()?;
        Ok(commit.parent_count() == 0 && commit.message() == Some("Initial repository."))
    }

    /// Load the index and locate the base commit for branch creation.
    ///
    /// On a fresh repository with `create_base_commit` set (branching mode),
    /// an empty commit stamped at the beginning of time becomes the common
    /// root, keeping otherwise unrelated branches mergeable.
    pub fn prepare_index(&mut self, create_base_commit: bool) -> Result<(), GitError> {
        let mut index = self.repo.index()?;

        if self.head_exists() {
            let head = self.repo.head()?.peel_to_commit()?;
            index.read_tree(&head.tree()?)?;

            let mut walk = self.repo.revwalk()?;
            walk.set_sorting(git2::Sort::TOPOLOGICAL)?;
            walk.push_head()?;
            let mut root = None;
            for oid in walk {
                root = Some(oid?);
            }
            self.base_commit = root;
            warn!("index refreshed to match the tree of the current HEAD commit");
        } else if create_base_commit {
            let tree_oid = index.write_tree_to(&self.repo)?;
            let tree = self.repo.find_tree(tree_oid)?;
            let sig = Signature::new("No User", "no@user", &Time::new(0, 0))?;
            let oid = self
                .repo
                .commit(Some("HEAD"), &sig, &sig, "Initial repository.", &tree, &[])?;
            self.base_commit = Some(oid);
            warn!(commit = %oid, "created base commit for branch roots");
        }

        self.index = Some(index);
        Ok(())
    }

    fn index_mut(&mut self) -> Result<&mut git2::Index, GitError> {
        self.index.as_mut().ok_or(GitError::IndexNotPrepared)
    }

    /// Open a streaming blob writer into the object database.
    pub fn write_blob(&self) -> Result<BlobStream<'_>, GitError> {
        Ok(BlobStream {
            writer: self.repo.blob_writer(None)?,
        })
    }

    /// Point HEAD at `branch`, creating it at the base commit when new, and
    /// reset the index to the branch head's tree. A brand-new branch with no
    /// base commit starts as an orphan line of history.
    pub fn set_active_branch(&mut self, branch: &str) -> Result<(), GitError> {
        if branch == self.current_branch {
            return Ok(());
        }
        let refname = format!("refs/heads/{branch}");

        let branch_exists = match self.repo.find_reference(&refname) {
            Ok(_) => true,
            Err(err) if err.code() == ErrorCode::NotFound => false,
            Err(err) => return Err(err.into()),
        };

        if !branch_exists {
            if let Some(base) = self.base_commit {
                let base_commit = self.repo.find_commit(base)?;
                self.repo.branch(branch, &base_commit, false)?;
            }
            // With no base commit the symbolic HEAD below leaves the branch
            // unborn; the next commit roots it.
        }

        self.repo
            .reference_symbolic("HEAD", &refname, true, branch)?;

        let index = self.index.as_mut().ok_or(GitError::IndexNotPrepared)?;
        match self.repo.refname_to_id("HEAD") {
            Ok(oid) => {
                let tree = self.repo.find_commit(oid)?.tree()?;
                index.read_tree(&tree)?;
            }
            Err(err) if err.code() == ErrorCode::NotFound => index.clear()?,
            Err(err) => return Err(err.into()),
        }

        self.current_branch = branch.to_string();
        Ok(())
    }

    /// Stage a blob at `rel_path`, carrying the executable bit.
    pub fn add_to_index(
        &mut self,
        rel_path: &str,
        blob: BlobId,
        executable: bool,
    ) -> Result<(), GitError> {
        let oid = to_oid(blob)?;
        let entry = IndexEntry {
            ctime: IndexTime::new(0, 0),
            mtime: IndexTime::new(0, 0),
            dev: 0,
            ino: 0,
            mode: if executable { 0o100755 } else { 0o100644 },
            uid: 0,
            gid: 0,
            file_size: 0,
            id: oid,
            flags: 0,
            flags_extended: 0,
            path: rel_path.as_bytes().to_vec(),
        };
        self.index_mut()?.add(&entry)?;
        Ok(())
    }

    pub fn remove_from_index(&mut self, rel_path: &str) -> Result<(), GitError> {
        self.index_mut()?.remove_path(Path::new(rel_path))?;
        Ok(())
    }

    /// Write the staged tree and commit it onto HEAD's branch. `merge_from`
    /// names a source branch whose head becomes a second parent.
    #[allow(clippy::too_many_arguments)]
    pub fn commit(
        &mut self,
        depot_path: &str,
        cl: u64,
        author: &str,
        email: &str,
        timezone_minutes: i32,
        description: &str,
        timestamp: i64,
        merge_from: Option<&str>,
    ) -> Result<String, GitError> {
        let index = self.index.as_mut().ok_or(GitError::IndexNotPrepared)?;
        let tree_oid = index.write_tree_to(&self.repo)?;
        let tree = self.repo.find_tree(tree_oid)?;
        let sig = Signature::new(author, email, &Time::new(timestamp, timezone_minutes))?;

        let mut message = marker::commit_message(cl, description, depot_path);

        // Parent order matters: the target branch's head first, then the
        // merge source. A missing ref just means no commit exists there yet.
        let mut parent_refs = vec!["HEAD".to_string()];
        if let Some(source) = merge_from {
            parent_refs.push(format!("refs/heads/{source}"));
        }
        let mut parents = Vec::new();
        for refname in &parent_refs {
            match self.repo.refname_to_id(refname) {
                Ok(oid) => {
                    if !parents.is_empty() {
                        message.push_str(&marker::merge_note(refname));
                    }
                    parents.push(self.repo.find_commit(oid)?);
                }
                Err(err) if err.code() == ErrorCode::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        let parents: Vec<&git2::Commit<'_>> = parents.iter().collect();

        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, &message, &tree, &parents)?;
        Ok(oid.to_string())
    }

    /// Flush the index file at the end of a run.
    pub fn finish_index(&mut self) -> Result<(), GitError> {
        self.index_mut()?.write()?;
        Ok(())
    }

    /// Head commit of a branch, if the branch exists.
    pub fn head_of(&self, branch: &str) -> Result<Option<String>, GitError> {
        match self.repo.refname_to_id(&format!("refs/heads/{branch}")) {
            Ok(oid) => Ok(Some(oid.to_string())),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Parents of a commit, for inspection and tests.
    pub fn parents_of(&self, commit: &str) -> Result<Vec<String>, GitError> {
        let oid = git2::Oid::from_str(commit)?;
        let commit = self.repo.find_commit(oid)?;
        Ok(commit.parent_ids().map(|p| p.to_string()).collect())
    }

    pub(crate) fn raw(&self) -> &Repository {
        &self.repo
    }
}
