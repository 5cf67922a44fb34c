use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use p4fusion_core::paths::is_valid_depot_path;
use p4fusion_core::ViewMap;
use p4fusion_engine::{BranchSet, MigrationConfig, Migrator, ShutdownFlag, ThreadPool};
use p4fusion_git::GitRepo;
use p4fusion_p4::{Depot, P4Client, P4Config};

mod labels;
mod signal;

/// Convert a Perforce depot path into a Git repository, changelist by
/// changelist, preserving authors, branch integrations, and labels.
#[derive(Parser)]
#[command(name = "p4-fusion", version)]
struct Cli {
    /// P4 depot path to convert. With --branch, the base path under which
    /// the branches live.
    #[arg(long = "path")]
    depot_path: String,
    /// Directory of the Git repository to create or resume.
    #[arg(long = "src")]
    src_path: PathBuf,
    /// P4PORT of the server.
    #[arg(long)]
    port: String,
    /// P4USER to run commands as; must be logged in.
    #[arg(long)]
    user: String,
    /// Name of the client workspace specification.
    #[arg(long)]
    client: String,
    /// How many changelists to keep downloaded ahead of the committer.
    #[arg(long = "lookAhead", default_value_t = 1)]
    look_ahead: usize,
    /// A branch under the depot path to migrate; repeatable. Use
    /// "depot/path:git-alias" to name the Git branch explicitly.
    #[arg(long = "branch")]
    branches: Vec<String>,
    /// Do not create Git merges when one branch integrates into another.
    #[arg(long = "noMerge", default_value_t = false)]
    no_merge: bool,
    /// Worker threads for network calls; defaults to the logical CPU count.
    #[arg(long = "networkThreads")]
    network_threads: Option<usize>,
    /// Revisions per p4 print batch.
    #[arg(long = "printBatch", default_value_t = 1)]
    print_batch: usize,
    /// Cap on changelists converted in this run.
    #[arg(long = "maxChanges")]
    max_changes: Option<usize>,
    /// Retries per p4 command before the run fails.
    #[arg(long = "retries", default_value_t = 10)]
    retries: u32,
    /// Commands to reuse a connection for before refreshing it.
    #[arg(long = "refresh", default_value_t = 100)]
    refresh: u32,
    /// fsync object files while writing, trading speed for durability.
    #[arg(long = "fsyncEnable", default_value_t = false)]
    fsync_enable: bool,
    /// Keep binary files instead of discarding them.
    #[arg(long = "includeBinaries", default_value_t = false)]
    include_binaries: bool,
    /// Rate at which profiling data is flushed to disk.
    #[arg(long = "flushRate", default_value_t = 1000)]
    flush_rate: u32,
    /// Disable colored output.
    #[arg(long = "noColor", default_value_t = false)]
    no_color: bool,
    /// Skip the label-to-tag pass after conversion.
    #[arg(long = "noLabels", default_value_t = false)]
    no_labels: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_ansi(!cli.no_color)
        .init();

    info!("p4-fusion {}", env!("CARGO_PKG_VERSION"));
    run(cli)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if !is_valid_depot_path(&cli.depot_path) {
        anyhow::bail!(
            "depot path should begin with \"//\" and end with \"/...\"; got {:?}",
            cli.depot_path
        );
    }

    let shutdown = ShutdownFlag::new();
    signal::install(shutdown.clone());

    let mut p4_config = P4Config::new(&cli.port, &cli.user, &cli.client);
    p4_config.retries = cli.retries;
    // The connection refresh threshold only matters for long-lived server
    // connections; each command here runs on a fresh one.
    debug!(refresh = cli.refresh, flush_rate = cli.flush_rate, "compat options accepted");

    let mut depot = P4Client::connect(p4_config.clone());

    // Probe the server before doing anything expensive.
    let mut probe_config = p4_config.clone();
    probe_config.retries = 5;
    P4Client::connect(probe_config)
        .changes("//...", None, Some(1))
        .context("could not reach the Perforce server")?;
    info!(port = %cli.port, "Perforce server is available");

    let client_spec = depot.client_view()?;
    info!(
        client = %client_spec.client,
        mappings = client_spec.view.len(),
        "loaded client workspace view"
    );
    let view = ViewMap::parse(&client_spec.view)?;
    let probe_path = format!("{}probe", cli.depot_path.trim_end_matches("..."));
    if !view.contains(&probe_path) {
        anyhow::bail!(
            "the depot path {:?} is not under the {} client spec view",
            cli.depot_path,
            client_spec.client
        );
    }

    let timezone_minutes = depot.info()?.timezone_minutes;
    info!(timezone_minutes, "server timezone");

    let branch_set = Arc::new(BranchSet::new(
        &client_spec.view,
        &cli.depot_path,
        &cli.branches,
        cli.include_binaries,
    )?);
    info!(branches = branch_set.branch_count(), "inspecting branches");

    let mut git = GitRepo::create(&cli.src_path, cli.fsync_enable)
        .context("could not initialize the Git repository")?;

    let workers = cli
        .network_threads
        .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
        .unwrap_or(1);
    let pool = Arc::new({
        let worker_config = p4_config.clone();
        let repo_path = cli.src_path.clone();
        ThreadPool::new(
            workers,
            move || Ok(P4Client::connect(worker_config.clone())),
            move || GitRepo::open(&repo_path),
            shutdown.clone(),
        )
    });

    // The watchdog turns the first worker error into a shutdown request;
    // the committer then stops at the next changelist boundary.
    let watchdog = {
        let pool = Arc::clone(&pool);
        let shutdown = shutdown.clone();
        std::thread::spawn(move || {
            if let Some(err) = pool.wait_error() {
                error!(error = %err, "worker failed; shutting down");
                shutdown.request();
            }
        })
    };

    let config = MigrationConfig {
        depot_path: cli.depot_path.clone(),
        look_ahead: cli.look_ahead,
        print_batch: cli.print_batch,
        max_changes: cli.max_changes,
        no_merge: cli.no_merge,
        timezone_minutes,
    };
    info!(
        look_ahead = config.look_ahead,
        print_batch = config.print_batch,
        workers,
        no_merge = config.no_merge,
        include_binaries = cli.include_binaries,
        "starting conversion"
    );

    let migrator = Migrator::new(config, branch_set, shutdown.clone());
    let result = migrator.run(&mut depot, &mut git, &pool);

    pool.shut_down();
    let _ = watchdog.join();

    let summary = result?;
    if shutdown.is_set() {
        warn!("conversion interrupted; rerun to resume from the last commit");
        return Ok(());
    }
    info!(
        changelists = summary.converted_changelists,
        commits = summary.commits,
        "conversion complete"
    );

    if !cli.no_labels {
        let cache_path = cli.src_path.join("labels.cache");
        labels::run(&mut depot, &cli.depot_path, &git, &cache_path)
            .context("label-to-tag update failed")?;
    }

    Ok(())
}
