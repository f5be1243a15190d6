//! Sequential execution lanes.
//!
//! A lane is one dedicated OS thread driving a current-thread tokio runtime.
//! Jobs run strictly FIFO; delayed and repeating jobs are timers living on the
//! lane's own runtime that push the job back into the queue when they fire, so
//! a lane never runs two jobs at once.
//!
//! Every job receives an [`OnLane`] proof. The proof is `!Send` and can only be
//! obtained on the lane's thread, so functions that must run on a particular
//! lane simply take `&OnLane<K>` and the compiler enforces the rest.
//!
//! Lanes in use:
//! * [`Tick`]: synchronous with the host simulation; the only lane allowed to
//!   touch world and entity state.
//! * [`Background`]: general asynchronous housekeeping.
//! * [`Components`]: the single writer for component/trait side effects.
//! * [`Prompts`]: interactive prompt bookkeeping.
//! * [`Render`]: editor overlay refresh tasks.

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use log::{debug, error};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::errors::{DungeonError, Result};

pub trait LaneKind: Send + Sync + 'static {
    const NAME: &'static str;
}

#[derive(Debug)]
pub enum Tick {}
#[derive(Debug)]
pub enum Background {}
#[derive(Debug)]
pub enum Components {}
#[derive(Debug)]
pub enum Prompts {}
#[derive(Debug)]
pub enum Render {}

impl LaneKind for Tick {
    const NAME: &'static str = "sync";
}
impl LaneKind for Background {
    const NAME: &'static str = "async";
}
impl LaneKind for Components {
    const NAME: &'static str = "component-processing";
}
impl LaneKind for Prompts {
    const NAME: &'static str = "prompt";
}
impl LaneKind for Render {
    const NAME: &'static str = "render";
}

/// Proof that the current code runs on lane `K`.
pub struct OnLane<K: LaneKind> {
    _marker: PhantomData<(fn() -> K, *const ())>,
}

impl<K: LaneKind> OnLane<K> {
    fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    pub fn lane_name(&self) -> &'static str {
        K::NAME
    }
}

impl<K: LaneKind> std::fmt::Debug for OnLane<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OnLane({})", K::NAME)
    }
}

type Job<K> = Box<dyn FnOnce(&OnLane<K>) + Send + 'static>;

enum LaneCommand<K: LaneKind> {
    Run(Job<K>),
    Shutdown,
}

/// Cancellable handle for any scheduled unit.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
    timer: Option<tokio::task::AbortHandle>,
}

impl TaskHandle {
    fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            timer: None,
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(timer) = &self.timer {
            timer.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

pub struct Lane<K: LaneKind> {
    tx: mpsc::UnboundedSender<LaneCommand<K>>,
    runtime: tokio::runtime::Handle,
    thread: ThreadId,
    open: AtomicBool,
    tracked: Mutex<Vec<TaskHandle>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl<K: LaneKind> Lane<K> {
    /// Spawns the lane thread. Fails if the thread or its runtime cannot be created.
    pub fn start() -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<LaneCommand<K>>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let join = thread::Builder::new()
            .name(format!("lane-{}", K::NAME))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok((thread::current().id(), runtime.handle().clone())));
                runtime.block_on(async move {
                    let proof = OnLane::<K>::new();
                    while let Some(cmd) = rx.recv().await {
                        match cmd {
                            LaneCommand::Run(job) => run_guarded(job, &proof),
                            LaneCommand::Shutdown => break,
                        }
                    }
                });
                debug!("{} lane terminated", K::NAME);
            })
            .map_err(|e| DungeonError::Internal(format!("spawn {} lane: {}", K::NAME, e)))?;
        let (thread, runtime) = ready_rx
            .recv()
            .map_err(|_| DungeonError::LaneClosed(K::NAME))?
            .map_err(|e| DungeonError::Internal(format!("{} lane runtime: {}", K::NAME, e)))?;
        debug!("{} lane started", K::NAME);
        Ok(Self {
            tx,
            runtime,
            thread,
            open: AtomicBool::new(true),
            tracked: Mutex::new(Vec::new()),
            join: Mutex::new(Some(join)),
        })
    }

    pub fn name(&self) -> &'static str {
        K::NAME
    }

    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread
    }

    /// Returns a proof when called from this lane's thread.
    pub fn proof(&self) -> Result<OnLane<K>> {
        if self.is_current() {
            Ok(OnLane::new())
        } else {
            Err(DungeonError::LaneAffinity { expected: K::NAME })
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DungeonError::LaneClosed(K::NAME))
        }
    }

    fn send(&self, job: Job<K>) -> Result<()> {
        self.tx
            .send(LaneCommand::Run(job))
            .map_err(|_| DungeonError::LaneClosed(K::NAME))
    }

    pub fn submit<F>(&self, f: F) -> Result<TaskHandle>
    where
        F: FnOnce(&OnLane<K>) + Send + 'static,
    {
        self.ensure_open()?;
        let handle = TaskHandle::new();
        let flag = handle.cancelled.clone();
        self.send(Box::new(move |proof| {
            if !flag.load(Ordering::Acquire) {
                f(proof)
            }
        }))?;
        Ok(handle)
    }

    pub fn submit_after<F>(&self, delay: Duration, f: F) -> Result<TaskHandle>
    where
        F: FnOnce(&OnLane<K>) + Send + 'static,
    {
        if delay.is_zero() {
            return self.submit(f);
        }
        self.ensure_open()?;
        let mut handle = TaskHandle::new();
        let flag = handle.cancelled.clone();
        let tx = self.tx.clone();
        let timer = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let job: Job<K> = Box::new(move |proof| {
                if !flag.load(Ordering::Acquire) {
                    f(proof)
                }
            });
            let _ = tx.send(LaneCommand::Run(job));
        });
        handle.timer = Some(timer.abort_handle());
        Ok(handle)
    }

    /// Runs `f` every `interval`, first after one interval has elapsed.
    /// The job receives its own handle so it can stop itself.
    pub fn repeat<F>(&self, interval: Duration, f: F) -> Result<TaskHandle>
    where
        F: FnMut(&OnLane<K>, &TaskHandle) + Send + 'static,
    {
        self.ensure_open()?;
        let inner = TaskHandle::new();
        let job = Arc::new(Mutex::new(f));
        let tx = self.tx.clone();
        let loop_handle = inner.clone();
        let period = interval.max(Duration::from_millis(1));
        let timer = self.runtime.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if loop_handle.is_cancelled() {
                    break;
                }
                let job = job.clone();
                let own = loop_handle.clone();
                let run: Job<K> = Box::new(move |proof| {
                    if own.is_cancelled() {
                        return;
                    }
                    let mut f = job.lock().unwrap_or_else(PoisonError::into_inner);
                    (*f)(proof, &own)
                });
                if tx.send(LaneCommand::Run(run)).is_err() {
                    break;
                }
            }
        });
        let handle = TaskHandle {
            cancelled: inner.cancelled.clone(),
            timer: Some(timer.abort_handle()),
        };
        self.tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle.clone());
        Ok(handle)
    }

    /// Runs `f` on the lane and resolves with its result: the lane-hop primitive.
    pub fn call<R, F>(&self, f: F) -> impl Future<Output = Result<R>> + Send + 'static
    where
        F: FnOnce(&OnLane<K>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let submitted = self.submit(move |proof| {
            let _ = tx.send(f(proof));
        });
        async move {
            submitted?;
            rx.await
                .map_err(|_| DungeonError::Internal(format!("{} lane dropped a job", K::NAME)))
        }
    }

    /// Resolves once every job queued before it has run.
    pub async fn flush(&self) -> Result<()> {
        self.call(|_| ()).await
    }

    /// Cancels every repeating task started on this lane.
    pub fn cancel_tracked(&self) -> usize {
        let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        let count = tracked.iter().filter(|h| !h.is_cancelled()).count();
        for handle in tracked.drain(..) {
            handle.cancel();
        }
        count
    }

    /// Refuses further submissions; already queued jobs still run.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn shutdown(&self) {
        self.close();
        self.cancel_tracked();
        let _ = self.tx.send(LaneCommand::Shutdown);
        if self.is_current() {
            return;
        }
        let join = self.join.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(join) = join {
            if join.join().is_err() {
                error!("{} lane thread panicked during shutdown", K::NAME);
            }
        }
    }
}

impl<K: LaneKind> Drop for Lane<K> {
    fn drop(&mut self) {
        let _ = self.tx.send(LaneCommand::Shutdown);
    }
}

fn run_guarded<K: LaneKind>(job: Job<K>, proof: &OnLane<K>) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| job(proof))) {
        error!("Uncaught panic on {} lane: {}", K::NAME, panic_message(&panic));
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// All lanes of one running service.
pub struct Lanes {
    pub tick: Lane<Tick>,
    pub background: Lane<Background>,
    pub components: Lane<Components>,
    pub prompts: Lane<Prompts>,
    pub render: Lane<Render>,
}

impl Lanes {
    pub fn start() -> Result<Self> {
        Ok(Self {
            tick: Lane::start()?,
            background: Lane::start()?,
            components: Lane::start()?,
            prompts: Lane::start()?,
            render: Lane::start()?,
        })
    }

    /// Mass-cancel for the state-changed signal.
    pub fn cancel_listener_tasks(&self) -> usize {
        self.prompts.cancel_tracked() + self.render.cancel_tracked()
    }

    pub fn close_all(&self) {
        self.tick.close();
        self.background.close();
        self.components.close();
        self.prompts.close();
        self.render.close();
    }

    pub fn shutdown(&self) {
        self.render.shutdown();
        self.prompts.shutdown();
        self.background.shutdown();
        self.components.shutdown();
        self.tick.shutdown();
    }
}
