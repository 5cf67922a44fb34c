use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use p4fusion_git::{GitError, GitRepo};
use p4fusion_p4::{Depot, P4Error};
use tracing::{debug, error, info};

use crate::error::EngineError;
use crate::shutdown::ShutdownFlag;

/// A unit of work run on a worker with that worker's own depot connection
/// and object-database handle.
pub type Job<D> = Box<dyn FnOnce(&mut D, &GitRepo) -> Result<(), EngineError> + Send>;

/// Errors kept for the watchdog; anything past this many is only logged.
const ERROR_QUEUE_LIMIT: usize = 64;

struct JobQueue<D> {
    jobs: VecDeque<Job<D>>,
    stop: bool,
}

struct PoolShared<D> {
    queue: Mutex<JobQueue<D>>,
    queue_cv: Condvar,
    errors: Mutex<VecDeque<EngineError>>,
    errors_cv: Condvar,
    stopping: AtomicBool,
    shutdown: ShutdownFlag,
}

/// Fixed-size pool of network workers over a mutex-guarded FIFO.
///
/// Workers never share handles: each builds its own depot connection and
/// repository handle from the factories at start-up. Job failures land on
/// the error queue for [`ThreadPool::wait_error`]; any worker error is
/// fatal to the run.
pub struct ThreadPool<D: Depot + 'static> {
    shared: Arc<PoolShared<D>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_called: AtomicBool,
}

impl<D: Depot + 'static> ThreadPool<D> {
    pub fn new(
        size: usize,
        depot_factory: impl Fn() -> Result<D, P4Error> + Send + Sync + 'static,
        odb_factory: impl Fn() -> Result<GitRepo, GitError> + Send + Sync + 'static,
        shutdown: ShutdownFlag,
    ) -> Self {
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(JobQueue {
                jobs: VecDeque::new(),
                stop: false,
            }),
            queue_cv: Condvar::new(),
            errors: Mutex::new(VecDeque::new()),
            errors_cv: Condvar::new(),
            stopping: AtomicBool::new(false),
            shutdown,
        });

        let depot_factory = Arc::new(depot_factory);
        let odb_factory = Arc::new(odb_factory);
        let size = size.max(1);
        let mut workers = Vec::with_capacity(size);
        for worker_id in 0..size {
            let shared = Arc::clone(&shared);
            let depot_factory = Arc::clone(&depot_factory);
            let odb_factory = Arc::clone(&odb_factory);
            workers.push(std::thread::spawn(move || {
                worker_main(worker_id, shared, depot_factory, odb_factory)
            }));
        }
        info!(workers = size, "created worker pool");
        Self {
            shared,
            workers: Mutex::new(workers),
            shutdown_called: AtomicBool::new(false),
        }
    }

    /// Queue a job. A no-op once shutdown was requested.
    pub fn add_job(&self, job: Job<D>) {
        if self.shared.shutdown.is_set() {
            return;
        }
        {
            let mut queue = self.shared.queue.lock().unwrap();
            if queue.stop {
                return;
            }
            queue.jobs.push_back(job);
        }
        self.shared.queue_cv.notify_one();
    }

    /// Block until a worker reports an error or the pool shuts down.
    /// This is the watchdog's read; the first error is fatal to the run.
    pub fn wait_error(&self) -> Option<EngineError> {
        let mut errors = self.shared.errors.lock().unwrap();
        loop {
            if let Some(err) = errors.pop_front() {
                return Some(err);
            }
            if self.shared.stopping.load(Ordering::Acquire) {
                return None;
            }
            errors = self.shared.errors_cv.wait(errors).unwrap();
        }
    }

    /// A non-blocking probe of the error queue.
    pub fn take_error(&self) -> Option<EngineError> {
        self.shared.errors.lock().unwrap().pop_front()
    }

    /// Stop accepting work and join all workers. Idempotent.
    pub fn shut_down(&self) {
        if self.shutdown_called.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shared.queue.lock().unwrap().stop = true;
        self.shared.stopping.store(true, Ordering::Release);
        self.shared.queue_cv.notify_all();
        self.shared.errors_cv.notify_all();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            let _ = worker.join();
        }
        info!("worker pool shut down");
    }
}

impl<D: Depot + 'static> Drop for ThreadPool<D> {
    fn drop(&mut self) {
        self.shut_down();
    }
}

fn worker_main<D: Depot>(
    worker_id: usize,
    shared: Arc<PoolShared<D>>,
    depot_factory: Arc<dyn Fn() -> Result<D, P4Error> + Send + Sync>,
    odb_factory: Arc<dyn Fn() -> Result<GitRepo, GitError> + Send + Sync>,
) {
    let (mut depot, odb) = match (depot_factory(), odb_factory()) {
        (Ok(depot), Ok(odb)) => (depot, odb),
        (Err(err), _) => {
            report_error(&shared, worker_id, err.into());
            return;
        }
        (_, Err(err)) => {
            report_error(&shared, worker_id, err.into());
            return;
        }
    };
    debug!(worker_id, "worker connected");

    loop {
        let job = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if queue.stop || shared.shutdown.is_set() {
                    return;
                }
                if let Some(job) = queue.jobs.pop_front() {
                    break job;
                }
                queue = shared.queue_cv.wait(queue).unwrap();
            }
        };

        if let Err(err) = job(&mut depot, &odb) {
            report_error(&shared, worker_id, err);
        }
    }
}

fn report_error<D>(shared: &PoolShared<D>, worker_id: usize, err: EngineError) {
    error!(worker_id, error = %err, "worker failed");
    {
        let mut errors = shared.errors.lock().unwrap();
        if errors.len() < ERROR_QUEUE_LIMIT {
            errors.push_back(err);
        }
    }
    shared.errors_cv.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    use p4fusion_core::{Changelist, FileEntry};
    use p4fusion_p4::{ClientSpec, LabelSpec, LabelSummary, PrintSink, ServerInfo, User};

    /// A depot that answers nothing; pool tests only need connections.
    struct NullDepot;

    impl Depot for NullDepot {
        fn changes(
            &mut self,
            _: &str,
            _: Option<u64>,
            _: Option<usize>,
        ) -> Result<Vec<Changelist>, P4Error> {
            Ok(Vec::new())
        }
        fn describe(&mut self, _: u64) -> Result<Vec<FileEntry>, P4Error> {
            Ok(Vec::new())
        }
        fn filelog(&mut self, _: u64) -> Result<Vec<FileEntry>, P4Error> {
            Ok(Vec::new())
        }
        fn print(&mut self, _: &[String], _: &mut dyn PrintSink) -> Result<(), P4Error> {
            Ok(())
        }
        fn users(&mut self) -> Result<HashMap<String, User>, P4Error> {
            Ok(HashMap::new())
        }
        fn info(&mut self) -> Result<ServerInfo, P4Error> {
            Ok(ServerInfo {
                timezone_minutes: 0,
            })
        }
        fn client_view(&mut self) -> Result<ClientSpec, P4Error> {
            Ok(ClientSpec {
                client: "test".to_string(),
                view: Vec::new(),
            })
        }
        fn labels(&mut self) -> Result<Vec<LabelSummary>, P4Error> {
            Ok(Vec::new())
        }
        fn label(&mut self, _: &str) -> Result<LabelSpec, P4Error> {
            Err(P4Error::Protocol("no labels here".to_string()))
        }
    }

    fn test_pool(shutdown: ShutdownFlag) -> (tempfile::TempDir, ThreadPool<NullDepot>) {
        let tmp = tempfile::tempdir().unwrap();
        // Workers need a repository to open.
        GitRepo::create(tmp.path(), false).unwrap();
        let path = tmp.path().to_path_buf();
        let pool = ThreadPool::new(
            2,
            || Ok(NullDepot),
            move || GitRepo::open(&path),
            shutdown,
        );
        (tmp, pool)
    }

    #[test]
    fn runs_jobs_on_workers() {
        let (_tmp, pool) = test_pool(ShutdownFlag::new());
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            pool.add_job(Box::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }
        // Joining drains the queue before workers observe the stop flag only
        // if the jobs were picked up; give them a moment.
        while counter.load(Ordering::SeqCst) < 8 {
            std::thread::yield_now();
        }
        pool.shut_down();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn job_errors_reach_the_watchdog() {
        let (_tmp, pool) = test_pool(ShutdownFlag::new());
        pool.add_job(Box::new(|_, _| {
            Err(EngineError::ChangelistFailed {
                cl: 42,
                message: "boom".to_string(),
            })
        }));
        let err = pool.wait_error().expect("an error should arrive");
        assert!(matches!(err, EngineError::ChangelistFailed { cl: 42, .. }));
        pool.shut_down();
    }

    #[test]
    fn add_job_after_shutdown_request_is_a_noop() {
        let shutdown = ShutdownFlag::new();
        let (_tmp, pool) = test_pool(shutdown.clone());
        shutdown.request();
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let counter = Arc::clone(&counter);
            pool.add_job(Box::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }
        pool.shut_down();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn wait_error_returns_none_after_shutdown() {
        let (_tmp, pool) = test_pool(ShutdownFlag::new());
        pool.shut_down();
        assert!(pool.wait_error().is_none());
    }
}
