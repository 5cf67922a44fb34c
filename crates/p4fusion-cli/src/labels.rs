//! Label-to-tag post-processing: fetch label details (through the on-disk
//! cache), map them onto converted changelists, and reconcile `refs/tags`.

use std::path::Path;

use p4fusion_git::tags::{sanitize_label, update_tags, LabelsByChange};
use p4fusion_git::GitRepo;
use p4fusion_p4::cache::{read_label_cache, write_label_cache};
use p4fusion_p4::Depot;
use tracing::{info, warn};

pub fn run<D: Depot>(
    depot: &mut D,
    depot_path: &str,
    git: &GitRepo,
    cache_path: &Path,
) -> anyhow::Result<usize> {
    info!("requesting labels from the server");
    let summaries = depot.labels()?;
    info!(count = summaries.len(), "received labels");

    // Refresh only labels whose Update stamp moved since the cached fetch.
    let mut cache = read_label_cache(cache_path);
    let mut fetched = 0usize;
    for summary in &summaries {
        let fresh = cache
            .get(&summary.name)
            .map(|cached| cached.update == summary.update)
            .unwrap_or(false);
        if fresh {
            continue;
        }
        match depot.label(&summary.name) {
            Ok(spec) => {
                cache.insert(summary.name.clone(), spec);
                fetched += 1;
            }
            Err(err) => {
                warn!(label = %summary.name, error = %err, "could not fetch label details");
            }
        }
    }
    if fetched > 0 {
        if let Err(err) = write_label_cache(cache_path, &cache) {
            warn!(path = %cache_path.display(), error = %err, "could not write label cache");
        }
    }

    // Labels pinned to a changelist that fall under the converted depot
    // path become candidate tags.
    let mut by_change = LabelsByChange::new();
    for spec in cache.values() {
        let Some(revision) = spec.revision.strip_prefix('@') else {
            continue;
        };
        let Ok(cl) = revision.parse::<u64>() else {
            continue;
        };
        let applies = spec.views.is_empty()
            || spec
                .views
                .iter()
                .any(|view| depot_path.starts_with(view.trim_end_matches("...")));
        if !applies {
            continue;
        }
        let tag_name = sanitize_label(&spec.label);
        if tag_name.is_empty() {
            continue;
        }
        by_change
            .entry(cl)
            .or_default()
            .insert(tag_name, spec.description.clone());
    }

    let created = update_tags(git, &by_change)?;
    info!(created, "tags reconciled");
    Ok(created)
}
