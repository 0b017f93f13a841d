//! Every engine's work as independent tasks on one shared pool.

use super::{Config, Dispatcher, Handler, Outgoing, Transport};
use crate::{medium::Medium, Engine, Error};
use bacnet_npdu::Envelope;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};
use tokio::{
    runtime::{Builder, Handle, Runtime},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::debug;

/// Configuration for a [Pool].
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of threads driving the executor.
    pub worker_threads: usize,

    /// Maximum number of threads running sends and dispatches at once.
    pub max_blocking_threads: usize,

    /// Number of threads driving request timeout sweeps.
    pub scheduler_threads: usize,

    /// Longest the last transport waits for running tasks when shutting the pool down.
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            max_blocking_threads: 512,
            scheduler_threads: 5,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

// Task executor and timeout scheduler.
type Runtimes = (Runtime, Runtime);

#[derive(Default)]
struct State {
    active: usize,
    runtimes: Option<Runtimes>,
}

/// Executors shared by every [Shared] transport holding a clone of the pool.
///
/// Executors are built when the first transport starts and shut down when the last
/// one terminates.
#[derive(Clone)]
pub struct Pool {
    cfg: PoolConfig,
    state: Arc<Mutex<State>>,
}

impl Default for Pool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl Pool {
    pub fn new(cfg: PoolConfig) -> Self {
        Self {
            cfg,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Number of started transports that have not terminated.
    pub fn active(&self) -> usize {
        self.state.lock().unwrap().active
    }

    /// Returns `true` while the executors exist.
    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().runtimes.is_some()
    }

    fn build(&self) -> Result<Runtimes, Error> {
        let executor = Builder::new_multi_thread()
            .worker_threads(self.cfg.worker_threads)
            .max_blocking_threads(self.cfg.max_blocking_threads)
            .thread_name("transport-executor")
            .enable_all()
            .build()?;
        let scheduler = Builder::new_multi_thread()
            .worker_threads(self.cfg.scheduler_threads)
            .thread_name("transport-scheduler")
            .enable_all()
            .build()?;
        debug!(
            worker_threads = self.cfg.worker_threads,
            scheduler_threads = self.cfg.scheduler_threads,
            "pool started"
        );
        Ok((executor, scheduler))
    }

    fn acquire(&self) -> Result<(Handle, Handle), Error> {
        let mut state = self.state.lock().unwrap();
        let runtimes = match state.runtimes.take() {
            Some(runtimes) => runtimes,
            None => self.build()?,
        };
        let handles = (runtimes.0.handle().clone(), runtimes.1.handle().clone());
        state.runtimes = Some(runtimes);
        state.active += 1;
        Ok(handles)
    }

    fn release(&self) {
        let runtimes = {
            let mut state = self.state.lock().unwrap();
            state.active = state.active.saturating_sub(1);
            if state.active > 0 {
                return;
            }
            state.runtimes.take()
        };

        // Blocking on shutdown is not allowed from inside another runtime
        let nested = Handle::try_current().is_ok();
        let Some((executor, scheduler)) = runtimes else {
            return;
        };
        for runtime in [executor, scheduler] {
            if nested {
                runtime.shutdown_background();
            } else {
                runtime.shutdown_timeout(self.cfg.shutdown_timeout);
            }
        }
        debug!("pool stopped");
    }
}

struct Inner<M: Medium> {
    dispatcher: Arc<Dispatcher<M>>,
    executor: Mutex<Option<Handle>>,
    closed: Arc<AtomicBool>,
}

impl<M: Medium> Transport for Inner<M> {
    fn deliver(&self, envelope: Envelope) {
        let executor = self.executor.lock().unwrap().clone();
        let Some(executor) = executor else {
            debug!(from = %envelope.from, reason = "not running", "dropping envelope");
            return;
        };
        let dispatcher = self.dispatcher.clone();
        let closed = self.closed.clone();
        executor.spawn_blocking(move || {
            if !closed.load(Ordering::Acquire) {
                dispatcher.dispatch(envelope);
            }
        });
    }

    fn send(&self, outgoing: Outgoing) {
        let executor = self.executor.lock().unwrap().clone();
        let Some(executor) = executor else {
            if let Outgoing::Request { response, .. } = outgoing {
                let _ = response.send(Err(Error::Closed));
            }
            return;
        };
        let dispatcher = self.dispatcher.clone();
        let closed = self.closed.clone();
        executor.spawn_blocking(move || {
            if !closed.load(Ordering::Acquire) {
                dispatcher.send(outgoing);
            } else if let Outgoing::Request { response, .. } = outgoing {
                let _ = response.send(Err(Error::Closed));
            }
        });
    }
}

/// Transport whose sends and dispatches run as unordered tasks on a [Pool].
///
/// Nothing is processed before [Shared::start]: deliveries are dropped and requests fail
/// with [Error::Closed].
pub struct Shared<M: Medium> {
    inner: Arc<Inner<M>>,
    pool: Pool,
    sweep_interval: Duration,
    sweep: Mutex<Option<JoinHandle<()>>>,
}

impl<M: Medium> Shared<M> {
    /// Create a transport for `engine` and register it as the engine's consumer.
    pub fn new(
        cfg: &Config,
        pool: Pool,
        engine: Arc<Engine<M>>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        let inner = Arc::new(Inner {
            dispatcher: Arc::new(Dispatcher::new(engine.clone(), handler)),
            executor: Mutex::new(None),
            closed: Arc::new(AtomicBool::new(false)),
        });
        engine.set_transport(&inner);
        Self {
            inner,
            pool,
            sweep_interval: cfg.sweep_interval,
            sweep: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<Engine<M>> {
        self.inner.dispatcher.engine()
    }

    /// Join the pool, building its executors if this is the first active transport.
    pub fn start(&self) -> Result<(), Error> {
        let mut executor = self.inner.executor.lock().unwrap();
        if executor.is_some() || self.inner.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let (handle, scheduler) = self.pool.acquire()?;
        *executor = Some(handle);
        drop(executor);

        // Fixed-delay timeout sweep
        let dispatcher = self.inner.dispatcher.clone();
        let period = self.sweep_interval;
        let sweep = scheduler.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                dispatcher.sweep(Instant::now());
            }
        });
        *self.sweep.lock().unwrap() = Some(sweep);
        debug!(segment = self.engine().segment(), "transport started");
        Ok(())
    }

    /// Leave the pool. The last transport to leave shuts the executors down.
    ///
    /// Tasks that have not started are skipped and pending requests fail with [Error::Closed].
    pub fn terminate(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(sweep) = self.sweep.lock().unwrap().take() {
            sweep.abort();
        }
        self.inner.dispatcher.close();
        let joined = self.inner.executor.lock().unwrap().take().is_some();
        if joined {
            self.pool.release();
        }
        debug!(segment = self.engine().segment(), "transport terminated");
    }
}

impl<M: Medium> Transport for Shared<M> {
    fn deliver(&self, envelope: Envelope) {
        self.inner.deliver(envelope);
    }

    fn send(&self, outgoing: Outgoing) {
        self.inner.send(outgoing);
    }
}

impl<M: Medium> Drop for Shared<M> {
    fn drop(&mut self) {
        self.terminate();
    }
}
