//! Job Scheduler
//!
//! Effects that carry a scheduler do not re-run inline when notified; they
//! queue a job instead, and the queue is drained later in one flush.
//!
//! # Algorithm
//!
//! 1. `queue_job` inserts a job into the main queue, which is kept sorted
//!    by job id. Ids grow with creation order, so a parent's job always
//!    runs before its children's.
//! 2. The first job queued while idle asks the host to flush once. Further
//!    jobs queued before (or during) that flush ride along with it.
//! 3. The flush walks the main queue by index, re-reading its length after
//!    every job so that jobs queued mid-flush run in the same pass.
//! 4. Once the main queue drains, the post-flush jobs run, sorted by id.
//! 5. If either queue refilled meanwhile, the flush repeats.
//!
//! Jobs carry a disposed bit that the flush checks before running them, so
//! stopping an effect never has to search the queue.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use tokio::sync::Notify;

use crate::error::{panic_message, FlushError, ReactiveError};

/// Job state bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JobFlags(u8);

impl JobFlags {
    /// The job sits in a queue.
    pub const QUEUED: JobFlags = JobFlags(1 << 0);
    /// The job runs ahead of normal jobs with the same id.
    pub const PRE: JobFlags = JobFlags(1 << 1);
    /// The job may re-queue itself while running.
    pub const ALLOW_RECURSE: JobFlags = JobFlags(1 << 2);
    /// The job's owner has been disposed; skip it.
    pub const DISPOSED: JobFlags = JobFlags(1 << 3);

    pub const fn contains(self, other: JobFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for JobFlags {
    type Output = JobFlags;

    fn bitor(self, rhs: JobFlags) -> JobFlags {
        JobFlags(self.0 | rhs.0)
    }
}

/// A unit of deferred work.
pub struct Job {
    id: Option<u32>,
    flags: Cell<JobFlags>,
    callback: Box<dyn Fn()>,
}

impl Job {
    /// Create a job without an id. It runs after every job that has one.
    pub fn new<F>(callback: F) -> Rc<Self>
    where
        F: Fn() + 'static,
    {
        Self::build(None, JobFlags::default(), callback)
    }

    /// Create a job ordered by `id`.
    pub fn with_id<F>(id: u32, callback: F) -> Rc<Self>
    where
        F: Fn() + 'static,
    {
        Self::build(Some(id), JobFlags::default(), callback)
    }

    /// Create a job with explicit id and flags.
    pub fn build<F>(id: Option<u32>, flags: JobFlags, callback: F) -> Rc<Self>
    where
        F: Fn() + 'static,
    {
        Rc::new(Self {
            id,
            flags: Cell::new(JobFlags(flags.0 & !JobFlags::QUEUED.0)),
            callback: Box::new(callback),
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.id
    }

    pub fn flags(&self) -> JobFlags {
        self.flags.get()
    }

    fn has(&self, flag: JobFlags) -> bool {
        self.flags.get().contains(flag)
    }

    fn set(&self, flag: JobFlags) {
        self.flags.set(JobFlags(self.flags.get().0 | flag.0));
    }

    fn clear(&self, flag: JobFlags) {
        self.flags.set(JobFlags(self.flags.get().0 & !flag.0));
    }

    /// Whether the job is waiting in a queue.
    pub fn is_queued(&self) -> bool {
        self.has(JobFlags::QUEUED)
    }

    /// Turn the job into a no-op wherever it is queued.
    pub fn dispose(&self) {
        self.set(JobFlags::DISPOSED);
    }

    pub fn is_disposed(&self) -> bool {
        self.has(JobFlags::DISPOSED)
    }

    fn is_pre(&self) -> bool {
        self.has(JobFlags::PRE)
    }

    /// Ordering key: id-less pre jobs first, id-less normal jobs last.
    fn sort_key(&self) -> i64 {
        match self.id {
            Some(id) => i64::from(id),
            None if self.is_pre() => -1,
            None => i64::MAX,
        }
    }

    fn describe(&self) -> String {
        match self.id {
            Some(id) => format!("#{id}"),
            None => "<anonymous>".to_string(),
        }
    }

    fn run(&self) {
        (self.callback)();
    }

    /// Run the job right now, bypassing the queues. Disposed jobs do
    /// nothing.
    pub fn run_now(&self) {
        if !self.is_disposed() {
            self.run();
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("flags", &self.flags.get())
            .finish()
    }
}

/// Counts of what a flush executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub jobs_run: usize,
    pub post_jobs_run: usize,
}

/// Queue storage. Never borrowed while a job runs.
#[derive(Default)]
pub struct JobQueue {
    jobs: Vec<Rc<Job>>,
    flush_index: Option<usize>,
    pending_post: Vec<Rc<Job>>,
    active_post: Option<Vec<Rc<Job>>>,
    post_index: usize,
    flush_pending: bool,
    flushing: bool,
}

impl JobQueue {
    /// Binary search for the slot of a job with `key`, starting after the
    /// flush cursor so that a running flush never revisits earlier slots.
    fn insertion_index(&self, key: i64) -> usize {
        let mut start = self.flush_index.map_or(0, |i| i + 1);
        let mut end = self.jobs.len();
        while start < end {
            let middle = (start + end) / 2;
            let job = &self.jobs[middle];
            let middle_key = job.sort_key();
            if middle_key < key || (middle_key == key && job.is_pre()) {
                start = middle + 1;
            } else {
                end = middle;
            }
        }
        start
    }

    /// Insert a job unless it is already queued. Returns whether it was
    /// inserted.
    pub fn insert(&mut self, job: Rc<Job>) -> bool {
        if job.is_queued() {
            return false;
        }
        let key = job.sort_key();
        let append = match self.jobs.last() {
            None => true,
            Some(last) => !job.is_pre() && key >= last.sort_key(),
        };
        job.set(JobFlags::QUEUED);
        if append {
            self.jobs.push(job);
        } else {
            let index = self.insertion_index(key);
            self.jobs.insert(index, job);
        }
        true
    }

    /// Add a post-flush job unless it is already queued.
    pub fn insert_post(&mut self, job: Rc<Job>) -> bool {
        if job.is_queued() {
            return false;
        }
        job.set(JobFlags::QUEUED);
        self.pending_post.push(job);
        true
    }

    /// Ids of the queued main jobs, in run order.
    pub fn queued_ids(&self) -> Vec<Option<u32>> {
        self.jobs.iter().map(|job| job.id).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len() + self.pending_post.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The flush driver around a [`JobQueue`].
pub struct Scheduler {
    queue: RefCell<JobQueue>,
    tick: Rc<Notify>,
    recursion_limit: usize,
    host: RefCell<Option<Rc<dyn Fn()>>>,
}

impl Scheduler {
    /// Create a scheduler that stops a job after `recursion_limit` runs in
    /// a single flush.
    pub fn new(recursion_limit: usize) -> Self {
        Self {
            queue: RefCell::new(JobQueue::default()),
            tick: Rc::new(Notify::new()),
            recursion_limit,
            host: RefCell::new(None),
        }
    }

    /// Install the callback used to ask the host for a flush. Without one,
    /// flushing is left to explicit `flush` calls.
    pub fn set_host<F>(&self, request_flush: F)
    where
        F: Fn() + 'static,
    {
        *self.host.borrow_mut() = Some(Rc::new(request_flush));
    }

    /// Queue a main job.
    pub fn queue_job(&self, job: Rc<Job>) {
        let inserted = self.queue.borrow_mut().insert(job);
        if inserted {
            self.request_flush();
        }
    }

    /// Queue a job to run after the main queue drains.
    pub fn queue_post_job(&self, job: Rc<Job>) {
        let inserted = self.queue.borrow_mut().insert_post(job);
        if inserted {
            self.request_flush();
        }
    }

    fn request_flush(&self) {
        {
            let mut queue = self.queue.borrow_mut();
            if queue.flush_pending {
                return;
            }
            queue.flush_pending = true;
        }
        let host = self.host.borrow().clone();
        if let Some(host) = host {
            tracing::trace!("requesting flush from host");
            host();
        }
    }

    /// Whether a flush has been requested and not yet completed.
    pub fn has_pending(&self) -> bool {
        self.queue.borrow().flush_pending
    }

    /// Number of queued main and post jobs.
    pub fn queued(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Ids of the queued main jobs, in run order.
    pub fn queued_ids(&self) -> Vec<Option<u32>> {
        self.queue.borrow().queued_ids()
    }

    /// Resolve once the pending flush (if any) has completed.
    pub async fn next_tick(&self) {
        let tick = Rc::clone(&self.tick);
        let notified = tick.notified();
        if !self.has_pending() {
            return;
        }
        notified.await;
    }

    /// Drain both queues until they stay empty.
    ///
    /// Every job runs even if an earlier one panicked; the failures are
    /// returned together. Calling `flush` from inside a job is a no-op.
    pub fn flush(&self) -> Result<FlushReport, FlushError> {
        {
            let mut queue = self.queue.borrow_mut();
            if queue.flushing {
                return Ok(FlushReport::default());
            }
            queue.flushing = true;
        }
        let span = tracing::trace_span!("flush");
        let _enter = span.enter();

        let mut report = FlushReport::default();
        let mut failures = Vec::new();
        let mut seen = HashMap::new();

        loop {
            let mut index = 0;
            loop {
                let job = {
                    let mut queue = self.queue.borrow_mut();
                    let Some(job) = queue.jobs.get(index).cloned() else { break };
                    queue.flush_index = Some(index);
                    job
                };
                index += 1;
                if self.run_job(&job, &mut seen, &mut failures) {
                    report.jobs_run += 1;
                }
            }
            {
                let mut queue = self.queue.borrow_mut();
                for job in queue.jobs.drain(..) {
                    job.clear(JobFlags::QUEUED);
                }
                queue.flush_index = None;
            }

            report.post_jobs_run += self.drain_post(&mut seen, &mut failures);

            let queue = self.queue.borrow();
            if queue.jobs.is_empty() && queue.pending_post.is_empty() {
                break;
            }
        }

        {
            let mut queue = self.queue.borrow_mut();
            queue.flushing = false;
            queue.flush_pending = false;
        }
        self.tick.notify_waiters();
        tracing::debug!(
            jobs = report.jobs_run,
            post_jobs = report.post_jobs_run,
            failures = failures.len(),
            "flush complete"
        );

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(FlushError { failures })
        }
    }

    /// Run the queued post-flush jobs now. A call made while post jobs
    /// are already draining appends to the running list instead.
    pub fn flush_post_jobs(&self) -> Result<usize, FlushError> {
        let mut seen = HashMap::new();
        let mut failures = Vec::new();
        let ran = self.drain_post(&mut seen, &mut failures);
        if failures.is_empty() {
            Ok(ran)
        } else {
            Err(FlushError { failures })
        }
    }

    fn drain_post(
        &self,
        seen: &mut HashMap<*const Job, usize>,
        failures: &mut Vec<ReactiveError>,
    ) -> usize {
        {
            let mut queue = self.queue.borrow_mut();
            if queue.pending_post.is_empty() {
                return 0;
            }
            let mut batch: Vec<Rc<Job>> = Vec::new();
            for job in std::mem::take(&mut queue.pending_post) {
                if !batch.iter().any(|queued| Rc::ptr_eq(queued, &job)) {
                    batch.push(job);
                }
            }
            batch.sort_by_key(|job| job.sort_key());
            if let Some(active) = queue.active_post.as_mut() {
                active.extend(batch);
                return 0;
            }
            queue.active_post = Some(batch);
            queue.post_index = 0;
        }

        let mut ran = 0;
        loop {
            let job = {
                let mut queue = self.queue.borrow_mut();
                let index = queue.post_index;
                let Some(job) = queue.active_post.as_ref().and_then(|jobs| jobs.get(index).cloned())
                else {
                    break;
                };
                queue.post_index += 1;
                job
            };
            if self.run_job(&job, seen, failures) {
                ran += 1;
            }
        }

        let mut queue = self.queue.borrow_mut();
        queue.active_post = None;
        queue.post_index = 0;
        ran
    }

    /// Synchronously run queued pre jobs that sit after the flush cursor,
    /// optionally only those with the given owner id. Jobs queued by these
    /// runs are picked up as long as they land inside the same window.
    ///
    /// Panics and recursion overruns are isolated and reported the same way
    /// [`Scheduler::flush`] reports them. Returns how many jobs ran.
    pub fn flush_pre_jobs(&self, owner: Option<u32>) -> Result<usize, FlushError> {
        let mut seen = HashMap::new();
        let mut failures = Vec::new();
        let mut ran = 0;
        let mut index = self.queue.borrow().flush_index.map_or(0, |i| i + 1);
        loop {
            let job = {
                let mut queue = self.queue.borrow_mut();
                let mut found = None;
                while let Some(job) = queue.jobs.get(index) {
                    let owned = owner.map_or(true, |owner| job.id == Some(owner));
                    if job.is_pre() && owned {
                        found = Some(queue.jobs.remove(index));
                        break;
                    }
                    index += 1;
                }
                found
            };
            let Some(job) = job else { break };
            if self.run_job(&job, &mut seen, &mut failures) {
                ran += 1;
            }
        }
        if failures.is_empty() {
            Ok(ran)
        } else {
            Err(FlushError { failures })
        }
    }

    /// Run one job with panic isolation. Returns whether it ran.
    fn run_job(
        &self,
        job: &Rc<Job>,
        seen: &mut HashMap<*const Job, usize>,
        failures: &mut Vec<ReactiveError>,
    ) -> bool {
        if job.is_disposed() {
            job.clear(JobFlags::QUEUED);
            return false;
        }
        let count = seen.entry(Rc::as_ptr(job)).or_insert(0);
        *count += 1;
        if *count > self.recursion_limit {
            tracing::warn!(job = %job.describe(), limit = self.recursion_limit, "maximum recursive updates exceeded");
            failures.push(ReactiveError::RecursionLimit {
                job: job.describe(),
                limit: self.recursion_limit,
            });
            job.clear(JobFlags::QUEUED);
            return false;
        }

        let recurse = job.has(JobFlags::ALLOW_RECURSE);
        if recurse {
            job.clear(JobFlags::QUEUED);
        }
        let outcome = catch_unwind(AssertUnwindSafe(|| job.run()));
        if !recurse {
            job.clear(JobFlags::QUEUED);
        }
        match outcome {
            Ok(()) => true,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(job = %job.describe(), %message, "job panicked during flush");
                failures.push(ReactiveError::JobPanicked {
                    job: job.describe(),
                    message,
                });
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn recorder() -> Rc<RefCell<Vec<u32>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn logging_job(log: &Rc<RefCell<Vec<u32>>>, id: u32) -> Rc<Job> {
        let log = Rc::clone(log);
        Job::with_id(id, move || log.borrow_mut().push(id))
    }

    #[test]
    fn jobs_run_in_id_order() {
        let scheduler = Scheduler::new(100);
        let log = recorder();

        for id in [3, 1, 2] {
            scheduler.queue_job(logging_job(&log, id));
        }
        assert_eq!(scheduler.queued_ids(), vec![Some(1), Some(2), Some(3)]);

        let report = scheduler.flush().unwrap();
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
        assert_eq!(report.jobs_run, 3);
        assert!(!scheduler.has_pending());
    }

    #[test]
    fn queueing_twice_is_deduplicated() {
        let scheduler = Scheduler::new(100);
        let log = recorder();
        let job = logging_job(&log, 1);

        scheduler.queue_job(Rc::clone(&job));
        scheduler.queue_job(Rc::clone(&job));
        scheduler.flush().unwrap();

        assert_eq!(*log.borrow(), vec![1]);
        assert!(!job.is_queued());
    }

    #[test]
    fn pre_jobs_sort_ahead_of_equal_ids() {
        let mut queue = JobQueue::default();
        queue.insert(Job::with_id(2, || {}));
        queue.insert(Job::build(Some(2), JobFlags::PRE, || {}));
        queue.insert(Job::new(|| {}));
        queue.insert(Job::build(None, JobFlags::PRE, || {}));

        let flags: Vec<_> = queue
            .jobs
            .iter()
            .map(|job| (job.id, job.is_pre()))
            .collect();
        assert_eq!(
            flags,
            vec![(None, true), (Some(2), true), (Some(2), false), (None, false)]
        );
    }

    #[test]
    fn disposed_job_is_skipped() {
        let scheduler = Scheduler::new(100);
        let log = recorder();
        let job = logging_job(&log, 1);

        scheduler.queue_job(Rc::clone(&job));
        job.dispose();
        let report = scheduler.flush().unwrap();

        assert!(log.borrow().is_empty());
        assert_eq!(report.jobs_run, 0);
    }

    #[test]
    fn post_jobs_run_after_main_queue() {
        let scheduler = Rc::new(Scheduler::new(100));
        let log = recorder();

        // A main job that queues another main job mid-flush.
        let late = logging_job(&log, 5);
        let early = {
            let log = Rc::clone(&log);
            let scheduler = Rc::clone(&scheduler);
            Job::with_id(1, move || {
                log.borrow_mut().push(1);
                scheduler.queue_job(Rc::clone(&late));
            })
        };
        scheduler.queue_post_job(logging_job(&log, 100));
        scheduler.queue_job(early);

        scheduler.flush().unwrap();
        assert_eq!(*log.borrow(), vec![1, 5, 100]);
    }

    #[test]
    fn panicking_job_does_not_stop_the_flush() {
        let scheduler = Scheduler::new(100);
        let log = recorder();

        scheduler.queue_job(Job::with_id(1, || panic!("boom")));
        scheduler.queue_job(logging_job(&log, 2));

        let err = scheduler.flush().unwrap_err();
        assert_eq!(*log.borrow(), vec![2]);
        assert_eq!(
            err.failures,
            vec![ReactiveError::JobPanicked {
                job: "#1".into(),
                message: "boom".into()
            }]
        );
    }

    #[test]
    fn self_requeueing_job_hits_recursion_limit() {
        let scheduler = Rc::new(Scheduler::new(5));
        let runs = Rc::new(Cell::new(0));

        let job = {
            let scheduler = Rc::clone(&scheduler);
            let runs = Rc::clone(&runs);
            Rc::new_cyclic(|weak: &std::rc::Weak<Job>| {
                let weak = weak.clone();
                Job {
                    id: Some(1),
                    flags: Cell::new(JobFlags::ALLOW_RECURSE),
                    callback: Box::new(move || {
                        runs.set(runs.get() + 1);
                        if let Some(job) = weak.upgrade() {
                            scheduler.queue_job(job);
                        }
                    }),
                }
            })
        };
        scheduler.queue_job(job);

        let err = scheduler.flush().unwrap_err();
        assert_eq!(runs.get(), 5);
        assert!(matches!(
            err.failures.as_slice(),
            [ReactiveError::RecursionLimit { limit: 5, .. }]
        ));
    }

    #[test]
    fn flush_pre_jobs_runs_matching_owner_only() {
        let scheduler = Scheduler::new(100);
        let log = recorder();

        for id in [1, 2] {
            let log = Rc::clone(&log);
            scheduler.queue_job(Job::build(Some(id), JobFlags::PRE, move || {
                log.borrow_mut().push(id)
            }));
        }
        scheduler.queue_job(logging_job(&log, 3));

        assert_eq!(scheduler.flush_pre_jobs(Some(2)), Ok(1));
        assert_eq!(*log.borrow(), vec![2]);
        assert_eq!(scheduler.queued_ids(), vec![Some(1), Some(3)]);

        scheduler.flush().unwrap();
        assert_eq!(*log.borrow(), vec![2, 1, 3]);
    }

    #[test]
    fn panicking_pre_job_can_be_queued_again() {
        let scheduler = Scheduler::new(100);
        let runs = Rc::new(Cell::new(0));
        let job = {
            let runs = Rc::clone(&runs);
            Job::build(Some(1), JobFlags::PRE, move || {
                runs.set(runs.get() + 1);
                if runs.get() == 1 {
                    panic!("first run fails");
                }
            })
        };

        scheduler.queue_job(Rc::clone(&job));
        let err = scheduler.flush_pre_jobs(None).unwrap_err();
        assert!(matches!(
            err.failures.as_slice(),
            [ReactiveError::JobPanicked { message, .. }] if message == "first run fails"
        ));
        assert!(!job.is_queued());

        scheduler.queue_job(Rc::clone(&job));
        assert_eq!(scheduler.queued_ids(), vec![Some(1)]);
        scheduler.flush().unwrap();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn recursive_pre_job_is_bounded() {
        let scheduler = Rc::new(Scheduler::new(4));
        let runs = Rc::new(Cell::new(0));

        let job = {
            let scheduler = Rc::clone(&scheduler);
            let runs = Rc::clone(&runs);
            Rc::new_cyclic(|weak: &std::rc::Weak<Job>| {
                let weak = weak.clone();
                Job {
                    id: Some(1),
                    flags: Cell::new(JobFlags::PRE | JobFlags::ALLOW_RECURSE),
                    callback: Box::new(move || {
                        runs.set(runs.get() + 1);
                        if let Some(job) = weak.upgrade() {
                            scheduler.queue_job(job);
                        }
                    }),
                }
            })
        };
        scheduler.queue_job(Rc::clone(&job));

        let err = scheduler.flush_pre_jobs(None).unwrap_err();
        assert_eq!(runs.get(), 4);
        assert!(matches!(
            err.failures.as_slice(),
            [ReactiveError::RecursionLimit { limit: 4, .. }]
        ));
        assert!(!job.is_queued());
        assert!(scheduler.queued_ids().is_empty());
    }

    #[test]
    fn host_is_asked_once_per_flush() {
        let scheduler = Scheduler::new(100);
        let requests = Rc::new(Cell::new(0));
        {
            let requests = Rc::clone(&requests);
            scheduler.set_host(move || requests.set(requests.get() + 1));
        }

        scheduler.queue_job(Job::with_id(1, || {}));
        scheduler.queue_job(Job::with_id(2, || {}));
        assert_eq!(requests.get(), 1);

        scheduler.flush().unwrap();
        scheduler.queue_job(Job::with_id(3, || {}));
        assert_eq!(requests.get(), 2);
    }
}
