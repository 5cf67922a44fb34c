use std::sync::Arc;

use p4fusion_git::GitRepo;
use p4fusion_p4::{Depot, User};
use tracing::{info, warn};

use crate::branch_set::BranchSet;
use crate::error::EngineError;
use crate::pool::ThreadPool;
use crate::shutdown::ShutdownFlag;
use crate::task::ChangelistTask;

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Base depot path, `//depot/dir/...`.
    pub depot_path: String,
    /// Upper bound on changelists in flight ahead of the committer.
    pub look_ahead: usize,
    /// Revisions per `print` call.
    pub print_batch: usize,
    /// Cap on changelists converted in one run.
    pub max_changes: Option<usize>,
    /// Suppress merge parents on integration groups.
    pub no_merge: bool,
    /// Server timezone, minutes from UTC; stamped into commit signatures.
    pub timezone_minutes: i32,
}

#[derive(Debug, Default)]
pub struct MigrationSummary {
    pub converted_changelists: usize,
    pub commits: usize,
    pub resumed_from: Option<u64>,
}

/// The single-threaded committer plus its look-ahead scheduler.
///
/// Workers prepare and download changelists out of order; the committer
/// drains them strictly in changelist order, mutating the index and refs
/// that only it may touch.
pub struct Migrator {
    config: MigrationConfig,
    branch_set: Arc<BranchSet>,
    shutdown: ShutdownFlag,
}

impl Migrator {
    pub fn new(config: MigrationConfig, branch_set: Arc<BranchSet>, shutdown: ShutdownFlag) -> Self {
        Self {
            config,
            branch_set,
            shutdown,
        }
    }

    pub fn run<D: Depot>(
        &self,
        depot: &mut D,
        git: &mut GitRepo,
        pool: &ThreadPool<D>,
    ) -> Result<MigrationSummary, EngineError> {
        let mut summary = MigrationSummary::default();

        // Resume from the marker in HEAD, if the repository has history.
        if git.head_exists() {
            match git.latest_changelist() {
                Ok(last) => {
                    git.verify_cloned_from(&self.config.depot_path)?;
                    warn!(
                        changelist = last,
                        "resuming conversion after last committed changelist"
                    );
                    summary.resumed_from = Some(last);
                }
                // A repository holding only the synthetic base commit has no
                // converted changelists yet.
                Err(p4fusion_git::GitError::NotResumable) => {
                    if !git.has_only_base_commit()? {
                        return Err(p4fusion_git::GitError::NotResumable.into());
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        info!("requesting changelists to convert");
        let changes = depot.changes(
            &self.config.depot_path,
            summary.resumed_from,
            self.config.max_changes,
        )?;
        if changes.is_empty() {
            info!("repository is up to date");
            return Ok(summary);
        }
        info!(
            count = changes.len(),
            first = changes[0].number,
            last = changes[changes.len() - 1].number,
            "found unconverted changelists"
        );

        let users = depot.users()?;
        info!(users = users.len(), "received user base details");

        git.prepare_index(self.branch_set.has_mergeable_branch())?;

        let mut slots: Vec<Option<Arc<ChangelistTask>>> = changes
            .into_iter()
            .map(|change| Some(Arc::new(ChangelistTask::new(change))))
            .collect();
        let total = slots.len();

        // Seed the first window; one more is queued per committed CL, so at
        // most `look_ahead` downloads are ever in flight.
        let look_ahead = self.config.look_ahead.max(1);
        let mut next_to_queue = 0;
        while next_to_queue < total.min(look_ahead) {
            self.enqueue(pool, &slots, next_to_queue);
            next_to_queue += 1;
        }
        info!(queued = next_to_queue, "seeded look-ahead window");

        for index in 0..total {
            if self.shutdown.is_set() {
                warn!("shutdown requested; abandoning remaining changelists");
                break;
            }
            let Some(task) = slots[index].take() else {
                continue;
            };
            task.wait_ready()?;

            let change = task.change();
            let (full_name, email) = resolve_author(&users, &change.user);

            if let Some(groups) = task.groups() {
                for group in &groups.groups {
                    if !group.target_branch.is_empty() {
                        git.set_active_branch(&group.target_branch)?;
                    }
                    for file in groups.files_of(group) {
                        if file.is_deleted() {
                            git.remove_from_index(file.relative_path())?;
                        } else {
                            let blob = file.blob().get().ok_or_else(|| {
                                EngineError::ChangelistFailed {
                                    cl: change.number,
                                    message: format!(
                                        "no blob downloaded for {}",
                                        file.depot_file
                                    ),
                                }
                            })?;
                            git.add_to_index(file.relative_path(), blob, file.is_executable)?;
                        }
                    }

                    let merge_from = if self.config.no_merge {
                        None
                    } else {
                        group.source_branch.as_deref()
                    };
                    let sha = git.commit(
                        &self.config.depot_path,
                        change.number,
                        &full_name,
                        &email,
                        self.config.timezone_minutes,
                        &change.description,
                        change.timestamp,
                        merge_from,
                    )?;
                    summary.commits += 1;

                    // Stable line for scripts scraping the output.
                    info!("COMMIT:{}:{}:{}:", sha, change.number, group.target_branch);
                    info!(
                        cl = change.number,
                        commit = %sha,
                        files = group.files.len(),
                        target = %group.target_branch,
                        source = group.source_branch.as_deref().unwrap_or(""),
                        "committed"
                    );
                }
                info!(
                    cl = change.number,
                    files = groups.total_file_count,
                    converted = index + 1,
                    total,
                    "changelist converted"
                );
            }
            summary.converted_changelists += 1;
            drop(task);

            // Keep the download window full.
            if next_to_queue < total && !self.shutdown.is_set() {
                self.enqueue(pool, &slots, next_to_queue);
                next_to_queue += 1;
            }
        }

        git.finish_index()?;
        info!(
            changelists = summary.converted_changelists,
            commits = summary.commits,
            "conversion finished"
        );
        Ok(summary)
    }

    fn enqueue<D: Depot>(
        &self,
        pool: &ThreadPool<D>,
        slots: &[Option<Arc<ChangelistTask>>],
        index: usize,
    ) {
        let Some(task) = slots[index].as_ref().map(Arc::clone) else {
            return;
        };
        let branch_set = Arc::clone(&self.branch_set);
        let print_batch = self.config.print_batch;
        pool.add_job(Box::new(move |depot, odb| {
            task.process(depot, odb, &branch_set, print_batch)
        }));
    }
}

fn resolve_author(
    users: &std::collections::HashMap<String, User>,
    user: &str,
) -> (String, String) {
    match users.get(user) {
        Some(found) => (found.full_name.clone(), found.email.clone()),
        None => {
            warn!(user, "user missing from the server user base, synthesizing author");
            (user.to_string(), "deleted@user".to_string())
        }
    }
}
