//! The engine actor: one task that owns the scheduler and every timer.
//!
//! All monitoring state is mutated on this task only. Fetches run on
//! spawned tasks (raced against the fetch timeout) and report back over a
//! channel tagged with a generation number, so completions that belong to
//! a cancelled fetch are dropped.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::engine::alarm::{AlarmEvent, AlarmKind, LogNotifier, Notifier};
use crate::engine::clock::{Clock, SystemClock};
use crate::engine::config::EngineConfig;
use crate::engine::scheduler::{
    EngineSnapshot, PollingScheduler, RestartReason, TickOutcome, TickPayload,
};
use crate::engine::snooze::SnoozeEntry;
use crate::engine::state::{MemoryStore, StateStore};
use crate::engine::watchdog::{HealthWatchdog, WatchdogProbe, WatchdogVerdict};
use crate::error::{FetchError, MonitorError, Result};
use crate::source::{race_with_timeout, DataSource, FetchTicket, FETCH_TIMEOUT};

const ALARM_CHANNEL_CAPACITY: usize = 64;

/// Host lifecycle transitions fed into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleEvent {
    EnteredForeground,
    EnteredBackground,
    Terminating,
}

enum Command {
    Snooze {
        kind: AlarmKind,
        minutes: i64,
        reply: oneshot::Sender<Result<SnoozeEntry>>,
    },
    ClearSnooze {
        kind: AlarmKind,
        reply: oneshot::Sender<bool>,
    },
    Refresh,
    Lifecycle(LifecycleEvent),
}

struct FetchCompletion {
    generation: u64,
    result: std::result::Result<TickPayload, FetchError>,
}

/// Cloneable access to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<EngineSnapshot>,
    alarms: broadcast::Sender<AlarmEvent>,
}

impl EngineHandle {
    /// Latest published snapshot.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that wakes on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshots.clone()
    }

    /// Stream of alarms raised from now on.
    pub fn alarms(&self) -> broadcast::Receiver<AlarmEvent> {
        self.alarms.subscribe()
    }

    pub async fn snooze(&self, kind: AlarmKind, minutes: i64) -> Result<SnoozeEntry> {
        if minutes <= 0 {
            return Err(MonitorError::config_error("snooze duration must be positive"));
        }
        let (reply, response) = oneshot::channel();
        self.send(Command::Snooze {
            kind,
            minutes,
            reply,
        })?;
        response.await.map_err(|_| stopped())?
    }

    pub async fn clear_snooze(&self, kind: AlarmKind) -> Result<bool> {
        let (reply, response) = oneshot::channel();
        self.send(Command::ClearSnooze { kind, reply })?;
        response.await.map_err(|_| stopped())
    }

    /// Fetch now instead of waiting for the next tick.
    pub fn refresh(&self) -> Result<()> {
        self.send(Command::Refresh)
    }

    pub fn lifecycle(&self, event: LifecycleEvent) -> Result<()> {
        self.send(Command::Lifecycle(event))
    }

    /// Persist, cancel every timer and stop the engine task.
    pub fn shutdown(&self) -> Result<()> {
        self.lifecycle(LifecycleEvent::Terminating)
    }

    /// False once the engine task has stopped, whether by shutdown or by
    /// an unexpected exit.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| stopped())
    }
}

fn stopped() -> MonitorError {
    MonitorError::engine_error("engine is not running")
}

/// Assembles an engine from its collaborators.
pub struct EngineBuilder {
    config: EngineConfig,
    source: Arc<dyn DataSource>,
    store: Arc<dyn StateStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    fetch_timeout: Duration,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig, source: Arc<dyn DataSource>) -> Self {
        Self {
            config,
            source,
            store: Arc::new(MemoryStore::new()),
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
            fetch_timeout: FETCH_TIMEOUT,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Validate, load the persisted seed and start the engine task.
    /// Must be called from within a tokio runtime.
    pub fn spawn(self) -> Result<(EngineHandle, JoinHandle<()>)> {
        self.config.validate()?;

        let seed = match self.store.load() {
            Ok(seed) => seed,
            Err(e) => {
                warn!("Ignoring unreadable persisted state: {}", e);
                None
            }
        };
        if let Some(seed) = &seed {
            info!("Seeded with last known reading {}", seed.reading);
        }

        let now = self.clock.now();
        let watchdog = HealthWatchdog::new(
            self.config.watchdog_interval(),
            self.config.watchdog_restart_minutes,
            now,
        );
        let scheduler = PollingScheduler::new(self.config, seed);

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(scheduler.snapshot(now));
        let (alarm_tx, _) = broadcast::channel(ALARM_CHANNEL_CAPACITY);

        let handle = EngineHandle {
            commands: commands_tx,
            snapshots: snapshot_rx,
            alarms: alarm_tx.clone(),
        };

        let engine = Engine {
            scheduler,
            watchdog,
            source: self.source,
            store: self.store,
            notifier: self.notifier,
            clock: self.clock,
            fetch_timeout: self.fetch_timeout,
            poll_timer: None,
            watchdog_timer: None,
            last_poll_tick_at: None,
            restart_at: None,
            recheck_at: None,
            in_flight: None,
            generation: 0,
            fetch_tx,
            fetch_rx,
            commands_rx,
            snapshot_tx,
            alarm_tx,
        };

        Ok((handle, tokio::spawn(engine.run())))
    }
}

struct Engine {
    scheduler: PollingScheduler,
    watchdog: HealthWatchdog,
    source: Arc<dyn DataSource>,
    store: Arc<dyn StateStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    fetch_timeout: Duration,

    poll_timer: Option<Interval>,
    watchdog_timer: Option<Interval>,
    last_poll_tick_at: Option<DateTime<Utc>>,
    restart_at: Option<Instant>,
    recheck_at: Option<Instant>,
    in_flight: Option<(u64, FetchTicket)>,
    generation: u64,

    fetch_tx: mpsc::UnboundedSender<FetchCompletion>,
    fetch_rx: mpsc::UnboundedReceiver<FetchCompletion>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    snapshot_tx: watch::Sender<EngineSnapshot>,
    alarm_tx: broadcast::Sender<AlarmEvent>,
}

impl Engine {
    async fn run(mut self) {
        info!(
            "Engine started (normal {:?}, critical {:?})",
            self.scheduler.config().normal_interval(),
            self.scheduler.config().critical_interval()
        );
        self.start_monitoring();
        self.settle();

        loop {
            tokio::select! {
                _ = next_tick(&mut self.poll_timer) => self.on_poll_tick(),
                _ = next_tick(&mut self.watchdog_timer) => self.on_watchdog_tick(),
                Some(done) = self.fetch_rx.recv() => self.on_fetch_complete(done),
                _ = sleep_until_some(self.restart_at) => self.finish_restart(),
                _ = sleep_until_some(self.recheck_at) => self.on_recheck(),
                command = self.commands_rx.recv() => match command {
                    Some(Command::Lifecycle(LifecycleEvent::Terminating)) | None => {
                        self.teardown();
                        break;
                    }
                    Some(command) => self.on_command(command),
                },
            }
            self.settle();
        }

        info!("Engine stopped");
    }

    /// Startup sequence: arm the watchdog and poll timer, fetch immediately.
    fn start_monitoring(&mut self) {
        let now = self.clock.now();
        self.watchdog.rearm(now);
        self.watchdog_timer = Some(fixed_interval(self.watchdog.interval()));
        self.rearm_poll_timer();
        self.start_fetch();
    }

    fn rearm_poll_timer(&mut self) {
        let interval = self.scheduler.poll_interval();
        debug!("Poll timer armed at {:?}", interval);
        self.poll_timer = Some(fixed_interval(interval));
        self.last_poll_tick_at = Some(self.clock.now());
    }

    fn cancel_timers(&mut self) {
        self.poll_timer = None;
        self.watchdog_timer = None;
        self.recheck_at = None;
        if let Some((generation, ticket)) = self.in_flight.take() {
            debug!("Cancelling in-flight fetch #{}", generation);
            ticket.cancel();
        }
    }

    fn start_fetch(&mut self) {
        if let Some((generation, _)) = &self.in_flight {
            debug!("Fetch #{} still in flight, coalescing tick", generation);
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        let source = Arc::clone(&self.source);
        let monitor_loop = self.scheduler.config().monitor_loop;

        let operation = async move {
            let reading = source.fetch_latest().await?;
            let device_status = if monitor_loop {
                match source.fetch_device_status().await {
                    Ok(status) => Some(status),
                    Err(e) => {
                        warn!("Device status unavailable: {}", e);
                        None
                    }
                }
            } else {
                None
            };
            Ok(TickPayload {
                reading,
                device_status,
            })
        };

        let tx = self.fetch_tx.clone();
        let ticket = race_with_timeout(operation, self.fetch_timeout, move |result| {
            let _ = tx.send(FetchCompletion { generation, result });
        });
        self.in_flight = Some((generation, ticket));
    }

    fn on_poll_tick(&mut self) {
        let now = self.clock.now();
        self.last_poll_tick_at = Some(now);
        let outcome = self.scheduler.check_staleness(now);
        self.apply(outcome);
        if self.restart_at.is_none() {
            self.start_fetch();
        }
    }

    fn on_watchdog_tick(&mut self) {
        let now = self.clock.now();
        let outcome = self.scheduler.check_staleness(now);
        self.apply(outcome);

        let probe = WatchdogProbe {
            poll_timer_armed: self.poll_timer.is_some(),
            last_poll_tick_at: self.last_poll_tick_at,
            poll_interval: self.scheduler.poll_interval(),
            last_fresh_reading_at: self.scheduler.last_fresh_reading_at(),
            restart_pending: self.restart_at.is_some(),
        };

        match self.watchdog.inspect(&probe, now) {
            WatchdogVerdict::Healthy => {}
            WatchdogVerdict::RearmPollTimer => {
                self.rearm_poll_timer();
                self.start_fetch();
            }
            WatchdogVerdict::EmergencyRestart(reason) => self.begin_restart(reason),
        }
    }

    fn on_fetch_complete(&mut self, done: FetchCompletion) {
        match &self.in_flight {
            Some((generation, _)) if *generation == done.generation => {
                self.in_flight = None;
            }
            _ => {
                debug!("Dropping completion of stale fetch #{}", done.generation);
                return;
            }
        }

        let now = self.clock.now();
        let outcome = match done.result {
            Ok(payload) => {
                debug!("Fetched {}", payload.reading);
                self.scheduler.on_fetch_success(payload, now)
            }
            Err(e) => self.scheduler.on_fetch_failure(&e, now),
        };
        self.apply(outcome);
    }

    fn on_recheck(&mut self) {
        self.recheck_at = None;
        let outcome = self.scheduler.reevaluate_lifted(self.clock.now());
        self.apply(outcome);
    }

    fn on_command(&mut self, command: Command) {
        let now = self.clock.now();
        match command {
            Command::Snooze {
                kind,
                minutes,
                reply,
            } => {
                let entry = self.scheduler.snooze(kind, minutes, now);
                if let Err(e) = &entry {
                    warn!("Rejected snooze of {}: {}", kind, e);
                }
                let _ = reply.send(entry);
            }
            Command::ClearSnooze { kind, reply } => {
                let _ = reply.send(self.scheduler.clear_snooze(kind));
            }
            Command::Refresh => {
                if self.restart_at.is_none() {
                    self.start_fetch();
                }
            }
            Command::Lifecycle(LifecycleEvent::EnteredForeground) => {
                if self.restart_at.is_none() {
                    info!("Entered foreground, refreshing");
                    self.rearm_poll_timer();
                    self.start_fetch();
                }
            }
            Command::Lifecycle(LifecycleEvent::EnteredBackground) => {
                info!("Entered background, persisting state");
                self.persist();
            }
            Command::Lifecycle(LifecycleEvent::Terminating) => self.teardown(),
        }
    }

    fn apply(&mut self, outcome: TickOutcome) {
        if outcome.persist {
            self.persist();
        }
        if outcome.transition.is_some() && self.restart_at.is_none() {
            self.rearm_poll_timer();
        }
        if let Some(reason) = outcome.restart {
            self.begin_restart(reason);
        }
    }

    fn begin_restart(&mut self, reason: RestartReason) {
        if self.restart_at.is_some() {
            return;
        }
        self.cancel_timers();
        self.scheduler.emergency_restart(reason, self.clock.now());
        let delay = self.scheduler.config().restart_delay();
        info!("Re-entering startup in {:?}", delay);
        self.restart_at = Some(Instant::now() + delay);
    }

    fn finish_restart(&mut self) {
        self.restart_at = None;
        self.start_monitoring();
    }

    fn teardown(&mut self) {
        self.persist();
        self.cancel_timers();
        self.restart_at = None;
    }

    fn persist(&self) {
        let Some(persisted) = self.scheduler.state().persisted() else {
            return;
        };
        if let Err(e) = self.store.save(&persisted) {
            error!("Failed to persist last reading: {}", e);
        }
    }

    /// Deliver queued alarms, re-plan the snooze re-check and publish.
    fn settle(&mut self) {
        for alarm in self.scheduler.take_alarms() {
            self.notifier.notify(&alarm);
            let _ = self.alarm_tx.send(alarm);
        }

        let now = self.clock.now();
        self.recheck_at = match (self.restart_at, self.scheduler.next_recheck()) {
            (None, Some(at)) => {
                let wait = (at - now).to_std().unwrap_or(Duration::ZERO);
                Some(Instant::now() + wait)
            }
            _ => None,
        };

        self.snapshot_tx.send_replace(self.scheduler.snapshot(now));
    }
}

/// Recurring timer whose first tick is one full period away.
fn fixed_interval(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => pending().await,
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
