use crate::config::Settings;
use crate::data::{GpuInfo, TelemetrySnapshot};
use crate::monitor::{MonitorError, SimulatedGpu};
use crate::profile::GpuProfile;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TrySendError};
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

pub type SubscriberId = u64;

type Callback = Arc<dyn Fn(&TelemetrySnapshot) + Send + Sync>;

thread_local! {
    static DELIVERING: Cell<bool> = const { Cell::new(false) };
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    period: Duration,
    seed: Option<u64>,
    // Lock order: model, then latest.
    model: Mutex<Option<(u64, SimulatedGpu)>>,
    generation: AtomicU64,
    load_bits: AtomicU64,
    latest: Mutex<Option<TelemetrySnapshot>>,
    delivery: Mutex<()>,
    callbacks: Mutex<Vec<(SubscriberId, Callback)>>,
    channels: Mutex<Vec<Sender<TelemetrySnapshot>>>,
    next_id: AtomicU64,
}

impl Shared {
    fn load(&self) -> f64 {
        f64::from_bits(self.load_bits.load(Ordering::Relaxed))
    }

    fn tick(&self) -> Option<TelemetrySnapshot> {
        let load = self.load();
        let snapshot = {
            let mut model = lock(&self.model);
            let (generation, gpu) = model.as_mut()?;
            let mut snapshot = gpu.sample(load);
            snapshot.generation = *generation;
            *lock(&self.latest) = Some(snapshot.clone());
            snapshot
        };
        self.publish(&snapshot);
        Some(snapshot)
    }

    // Replaces the model and returns once no snapshot of the old one can
    // still reach a subscriber.
    fn swap_model(&self, model: Option<SimulatedGpu>) {
        {
            let mut slot = lock(&self.model);
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *slot = model.map(|gpu| (generation, gpu));
            *lock(&self.latest) = slot.as_ref().map(|(generation, gpu)| TelemetrySnapshot {
                generation: *generation,
                ..gpu.current().clone()
            });
        }
        // A subscriber switching profiles already holds the delivery lock.
        if !DELIVERING.with(Cell::get) {
            drop(lock(&self.delivery));
        }
    }

    fn publish(&self, snapshot: &TelemetrySnapshot) {
        let _delivery = lock(&self.delivery);
        if snapshot.generation != self.generation.load(Ordering::SeqCst) {
            tracing::trace!("dropping snapshot {} from a replaced profile", snapshot.sequence);
            return;
        }

        // Clone the list so callbacks may (un)subscribe without deadlocking.
        let callbacks = lock(&self.callbacks).clone();
        DELIVERING.with(|flag| flag.set(true));
        for (id, callback) in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(snapshot))).is_err() {
                tracing::warn!("telemetry subscriber {id} panicked; continuing");
            }
        }
        DELIVERING.with(|flag| flag.set(false));

        // A callback may have switched profiles.
        if snapshot.generation != self.generation.load(Ordering::SeqCst) {
            return;
        }
        lock(&self.channels).retain(|tx| match tx.try_send(snapshot.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::trace!("telemetry channel full, dropping snapshot {}", snapshot.sequence);
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("telemetry channel closed, removing subscriber");
                false
            }
        });
    }
}

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
    thread: ThreadId,
}

pub struct TelemetrySimulator {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl TelemetrySimulator {
    pub fn new(period: Duration) -> Self {
        Self::build(period, None)
    }

    pub fn seeded(period: Duration, seed: u64) -> Self {
        Self::build(period, Some(seed))
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.tick_interval())
    }

    fn build(period: Duration, seed: Option<u64>) -> Self {
        Self {
            shared: Arc::new(Shared {
                period,
                seed,
                model: Mutex::new(None),
                generation: AtomicU64::new(0),
                load_bits: AtomicU64::new(0f64.to_bits()),
                latest: Mutex::new(None),
                delivery: Mutex::new(()),
                callbacks: Mutex::new(Vec::new()),
                channels: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.shared.period
    }

    // No-op while running.
    pub fn start(&self) -> Result<(), MonitorError> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("gpu-sim-telemetry".into())
            .spawn(move || {
                let ticker = tick(shared.period);
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            shared.tick();
                        }
                    }
                }
                tracing::debug!("telemetry worker exited");
            })?;

        tracing::info!("telemetry started ({} ms tick)", self.shared.period.as_millis());
        *worker = Some(Worker {
            stop: stop_tx,
            thread: handle.thread().id(),
            handle,
        });
        Ok(())
    }

    // Stops the worker and waits for it, so no subscriber is notified once
    // this returns. From inside a subscriber it only signals the worker.
    pub fn stop(&self) {
        let Some(worker) = lock(&self.worker).take() else {
            return;
        };
        let _ = worker.stop.try_send(());
        drop(worker.stop);

        if thread::current().id() == worker.thread {
            return;
        }
        if worker.handle.join().is_err() {
            tracing::error!("{}", MonitorError::WorkerPanicked);
        }
        tracing::info!("telemetry stopped");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.worker).is_some()
    }

    // Switches to `profile`, resetting the model to the idle baseline.
    // Once this returns no subscriber sees a snapshot of the old profile.
    pub fn set_profile(&self, profile: Arc<GpuProfile>) {
        let period = self.shared.period;
        let model = match self.shared.seed {
            Some(seed) => SimulatedGpu::with_seed(profile, period, seed),
            None => SimulatedGpu::new(profile, period),
        };
        tracing::info!("telemetry profile set to {}", model.profile().name);
        self.shared.swap_model(Some(model));
    }

    // Without a profile the worker keeps ticking but publishes nothing.
    pub fn clear_profile(&self) {
        self.shared.swap_model(None);
    }

    pub fn profile(&self) -> Option<Arc<GpuProfile>> {
        lock(&self.shared.model)
            .as_ref()
            .map(|(_, gpu)| Arc::clone(gpu.profile()))
    }

    // Stamped on every snapshot; changes with each profile switch.
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    // Clamped to 0..=1; non-finite means idle.
    pub fn set_load(&self, load: f64) {
        let load = if load.is_finite() { load.clamp(0.0, 1.0) } else { 0.0 };
        self.shared.load_bits.store(load.to_bits(), Ordering::Relaxed);
    }

    pub fn set_load_percent(&self, percent: f64) {
        self.set_load(percent / 100.0);
    }

    pub fn load(&self) -> f64 {
        self.shared.load()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&TelemetrySnapshot) + Send + Sync + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.callbacks).push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut callbacks = lock(&self.shared.callbacks);
        let before = callbacks.len();
        callbacks.retain(|(existing, _)| *existing != id);
        callbacks.len() != before
    }

    // Snapshots delivered over a bounded channel. When it is full new
    // snapshots are dropped; dropping the receiver unsubscribes.
    pub fn subscribe_channel(&self, capacity: usize) -> Receiver<TelemetrySnapshot> {
        let (tx, rx) = bounded(capacity.max(1));
        lock(&self.shared.channels).push(tx);
        rx
    }

    // Latest snapshot: the idle baseline right after `set_profile`.
    pub fn current(&self) -> Option<TelemetrySnapshot> {
        lock(&self.shared.latest).clone()
    }

    pub fn static_info(&self) -> Option<GpuInfo> {
        lock(&self.shared.model)
            .as_ref()
            .map(|(_, gpu)| gpu.static_info())
    }

    pub fn tick(&self) -> Option<TelemetrySnapshot> {
        self.shared.tick()
    }
}

impl Drop for TelemetrySimulator {
    fn drop(&mut self) {
        self.stop();
    }
}
