// ── Fleet coordinator ──
//
// Orchestrates the whole control loop: scheduled polling, policy-driven
// push-channel lifecycle, push event dispatch, capability-gated
// registration, and the published fleet snapshot.
//
// Lock discipline:
//   * `evaluate_lock` serializes channel start/stop decisions.
//   * `refresh_lock` marks a manual refresh in flight; periodic
//     evaluations probe it and voluntarily skip while it is held. The
//     refresh itself holds BOTH locks across its stop+settle+restart so
//     an evaluation can never interleave with the bounce.
//   * `file_check_lock` collapses concurrent file-listing rechecks.
//   * `timing`, `budget`, `registration` are short-lived sync locks,
//     never held across an await.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::join_all;
use printfleet_api::{
    DeviceCommand, DeviceId, DeviceStatus, FileEntry, PollClient, PushClient, PushEvent,
    StationSlot,
};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::error::CoreError;
use crate::idle::IdleTracker;
use crate::lifecycle::{ChannelState, PushChannel};
use crate::policy::{self, ActionTimer, PolicyInputs};
use crate::registration::{
    CapabilitySnapshot, EntityAddition, EntityDescriptor, Platform, RegistrationEngine,
};
use crate::scheduler::{self, FailureBudget, UpdateHealth};
use crate::snapshot::FleetView;
use crate::store::DeviceStore;

const ADDITION_CHANNEL_SIZE: usize = 64;

/// Clonable handle to the coordinator. All clones share one state.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    config: CoordinatorConfig,
    poll: Arc<dyn PollClient>,
    push: Arc<dyn PushClient>,
    channel: PushChannel,
    store: DeviceStore,
    /// The managed fleet, fixed at construction.
    device_ids: Vec<DeviceId>,

    fleet_view: watch::Sender<Arc<FleetView>>,
    health: watch::Sender<UpdateHealth>,
    additions: broadcast::Sender<EntityAddition>,

    registration: StdMutex<RegistrationEngine>,
    timing: StdMutex<TimingState>,
    budget: StdMutex<FailureBudget>,

    evaluate_lock: Mutex<()>,
    refresh_lock: Mutex<()>,
    file_check_lock: Mutex<()>,

    manual_override: AtomicBool,
    host_ready: AtomicBool,
    shutting_down: AtomicBool,
    started: AtomicBool,
    stale: AtomicBool,

    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Debug, Default)]
struct TimingState {
    action: ActionTimer,
    idle: IdleTracker,
    /// Earliest instant the next full fleet poll may run.
    next_poll_at: Option<Instant>,
    last_refresh: Option<Instant>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        poll: Arc<dyn PollClient>,
        push: Arc<dyn PushClient>,
        device_ids: Vec<DeviceId>,
    ) -> Self {
        let channel = PushChannel::new(Arc::clone(&push), config.connect_timeout);
        let (fleet_view, _) = watch::channel(Arc::new(FleetView::default()));
        let (health, _) = watch::channel(UpdateHealth::Ok);
        let (additions, _) = broadcast::channel(ADDITION_CHANNEL_SIZE);
        let budget = FailureBudget::new(config.max_failed_polls, config.failure_cooldown);
        let manual_override = AtomicBool::new(config.manual_override);

        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                poll,
                push,
                channel,
                store: DeviceStore::new(),
                device_ids,
                fleet_view,
                health,
                additions,
                registration: StdMutex::new(RegistrationEngine::default()),
                timing: StdMutex::new(TimingState::default()),
                budget: StdMutex::new(budget),
                evaluate_lock: Mutex::new(()),
                refresh_lock: Mutex::new(()),
                file_check_lock: Mutex::new(()),
                manual_override,
                host_ready: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                started: AtomicBool::new(false),
                stale: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn device(&self, id: DeviceId) -> Option<Arc<DeviceStatus>> {
        self.inner.store.get(id)
    }

    pub fn devices(&self) -> Arc<Vec<Arc<DeviceStatus>>> {
        self.inner.store.snapshot()
    }

    /// Observe the published fleet snapshot.
    pub fn fleet_view(&self) -> watch::Receiver<Arc<FleetView>> {
        self.inner.fleet_view.subscribe()
    }

    /// Observe polling health.
    pub fn update_health(&self) -> watch::Receiver<UpdateHealth> {
        self.inner.health.subscribe()
    }

    /// Observe push-channel state transitions.
    pub fn channel_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.channel.subscribe()
    }

    /// Subscribe to descriptor promotions.
    pub fn entity_additions(&self) -> broadcast::Receiver<EntityAddition> {
        self.inner.additions.subscribe()
    }

    pub fn manual_override(&self) -> bool {
        self.inner.manual_override.load(Ordering::SeqCst)
    }

    /// Run the initial fleet poll and spawn the background tasks.
    /// Idempotent; a failed initial poll leaves the coordinator stopped so
    /// the host can retry.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(
            devices = self.inner.device_ids.len(),
            mode = %self.inner.config.connect_mode,
            "starting coordinator"
        );

        if let Err(e) = self.run_update(true).await {
            self.inner.started.store(false, Ordering::SeqCst);
            return Err(e);
        }
        self.inner.host_ready.store(true, Ordering::SeqCst);

        let mut tasks = self.inner.tasks.lock().await;
        tasks.push(tokio::spawn(scheduler::poll_task(
            self.clone(),
            self.inner.cancel.child_token(),
        )));
        tasks.push(tokio::spawn(dispatch_task(
            self.clone(),
            self.inner.cancel.child_token(),
        )));
        Ok(())
    }

    /// Stop the background tasks and close the push channel. The channel
    /// stop is unconditional and bounded; shutdown never hangs on a wedged
    /// session.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        self.inner.cancel.cancel();

        let mut tasks = self.inner.tasks.lock().await;
        for task in tasks.drain(..) {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "background task ended abnormally");
                }
            }
        }
        drop(tasks);

        self.inner
            .channel
            .stop(
                &self.inner.store.snapshot(),
                self.inner.config.disconnect_timeout,
            )
            .await;
        info!("coordinator stopped");
    }

    /// One scheduler tick: poll if due, then republish.
    pub(crate) async fn scheduled_update(&self) -> Result<(), CoreError> {
        self.run_update(false).await
    }

    /// Poll immediately regardless of the minimum spacing, then land the
    /// next natural poll shortly after instead of a full interval away.
    pub async fn force_state_update(&self) -> Result<(), CoreError> {
        self.run_update(true).await?;
        let next = Instant::now() + self.inner.config.post_action_poll_delay;
        self.lock_timing().next_poll_at = Some(next);
        Ok(())
    }

    /// Touch the action grace window, trigger an evaluation, and wait
    /// (bounded) for the channel to be open. Commands must not be sent
    /// until this returns `Ok`.
    pub async fn ensure_connected_for_action(&self) -> Result<(), CoreError> {
        self.lock_timing().action.touch(Instant::now());
        self.evaluate_channel().await;

        if self
            .inner
            .channel
            .wait_open(self.inner.config.connect_timeout)
            .await
        {
            Ok(())
        } else {
            Err(CoreError::ChannelUnavailable {
                timeout_secs: self.inner.config.connect_timeout.as_secs(),
            })
        }
    }

    /// Bounce the push channel: stop, settle, re-evaluate. Rate-limited,
    /// and a no-op while the channel is not started. Holds both the
    /// refresh and evaluate locks for the whole bounce; an in-flight
    /// evaluation finishes first, later ones skip until the bounce ends.
    pub async fn refresh_channel(&self) {
        let now = Instant::now();
        {
            let timing = self.lock_timing();
            let cooling = timing.last_refresh.is_some_and(|last| {
                now.duration_since(last) < self.inner.config.refresh_cooldown
            });
            if cooling {
                debug!("refresh requested inside cooldown; ignoring");
                return;
            }
        }

        let _refresh_guard = self.inner.refresh_lock.lock().await;
        let _evaluate_guard = self.inner.evaluate_lock.lock().await;
        if !self.inner.channel.is_started() {
            return;
        }
        self.lock_timing().last_refresh = Some(now);
        info!("refreshing push channel");

        self.inner
            .channel
            .stop(
                &self.inner.store.snapshot(),
                self.inner.config.disconnect_timeout,
            )
            .await;
        sleep(self.inner.config.refresh_settle).await;
        self.evaluate_locked().await;
    }

    /// Route a command through the connect-for-action path, then force a
    /// poll so the published snapshot reflects the outcome promptly.
    pub async fn device_command(
        &self,
        id: DeviceId,
        command: DeviceCommand,
    ) -> Result<(), CoreError> {
        if !self.inner.device_ids.contains(&id) {
            return Err(CoreError::DeviceNotFound { id });
        }
        self.ensure_connected_for_action().await?;

        debug!(device = %id, command = command.name(), "sending device command");
        self.inner
            .poll
            .send_command(id, command)
            .await
            .map_err(|e| CoreError::CommandFailed {
                message: e.to_string(),
            })?;

        self.force_state_update().await
    }

    /// Handle a button press by entity key. Unknown keys are ignored.
    pub async fn button_event(&self, id: DeviceId, key: &str) -> Result<(), CoreError> {
        match key {
            "pause_print" => self.device_command(id, DeviceCommand::PausePrint).await,
            "resume_print" => self.device_command(id, DeviceCommand::ResumePrint).await,
            "cancel_print" => self.device_command(id, DeviceCommand::CancelPrint).await,
            "drying_stop" => {
                self.device_command(
                    id,
                    DeviceCommand::StopDrying {
                        slot: StationSlot::Primary,
                    },
                )
                .await
            }
            "secondary_drying_stop" => {
                self.device_command(
                    id,
                    DeviceCommand::StopDrying {
                        slot: StationSlot::Secondary,
                    },
                )
                .await
            }
            "request_file_list_usb" => {
                self.device_command(id, DeviceCommand::RequestUsbFiles).await
            }
            "request_file_list_cloud" => {
                self.device_command(id, DeviceCommand::RequestCloudFiles)
                    .await
            }
            "request_file_list_local" => self.request_local_files(id).await,
            "refresh_push_connection" => {
                self.refresh_channel().await;
                self.force_state_update().await
            }
            _ => {
                debug!(device = %id, key, "ignoring unknown button key");
                Ok(())
            }
        }
    }

    /// Handle a switch turning on by entity key. Unknown keys are ignored.
    pub async fn switch_on_event(&self, id: DeviceId, key: &str) -> Result<(), CoreError> {
        match key {
            "manual_connection" => {
                info!("manual connection override engaged");
                self.inner.manual_override.store(true, Ordering::SeqCst);
                self.force_state_update().await
            }
            "auto_feed" => {
                self.device_command(
                    id,
                    DeviceCommand::SetAutoFeed {
                        slot: StationSlot::Primary,
                        enabled: true,
                    },
                )
                .await
            }
            "secondary_auto_feed" => {
                self.device_command(
                    id,
                    DeviceCommand::SetAutoFeed {
                        slot: StationSlot::Secondary,
                        enabled: true,
                    },
                )
                .await
            }
            _ => {
                debug!(device = %id, key, "ignoring unknown switch key");
                Ok(())
            }
        }
    }

    /// Handle a switch turning off by entity key. Unknown keys are ignored.
    pub async fn switch_off_event(&self, id: DeviceId, key: &str) -> Result<(), CoreError> {
        match key {
            "manual_connection" => {
                info!("manual connection override released");
                self.inner.manual_override.store(false, Ordering::SeqCst);
                self.force_state_update().await
            }
            "auto_feed" => {
                self.device_command(
                    id,
                    DeviceCommand::SetAutoFeed {
                        slot: StationSlot::Primary,
                        enabled: false,
                    },
                )
                .await
            }
            "secondary_auto_feed" => {
                self.device_command(
                    id,
                    DeviceCommand::SetAutoFeed {
                        slot: StationSlot::Secondary,
                        enabled: false,
                    },
                )
                .await
            }
            _ => {
                debug!(device = %id, key, "ignoring unknown switch key");
                Ok(())
            }
        }
    }

    /// Request a device's on-board file listing, then schedule a recheck
    /// that bounces the push channel if the listing never arrives.
    pub async fn request_local_files(&self, id: DeviceId) -> Result<(), CoreError> {
        let previous = self.inner.store.get(id).and_then(|s| s.local_files.clone());
        self.device_command(id, DeviceCommand::RequestLocalFiles)
            .await?;

        let coordinator = self.clone();
        let cancel = self.inner.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = coordinator.recheck_local_files(id, previous) => {}
            }
        });
        Ok(())
    }

    /// Queue a platform's capability-gated descriptors for every managed
    /// device and evaluate them against current capabilities right away.
    pub fn add_entities_for_seen(&self, platform: Platform, descriptors: &[EntityDescriptor]) {
        self.lock_registration()
            .register(&self.inner.device_ids, platform, descriptors);
        self.run_registration();
    }

    // ── internals ──

    async fn run_update(&self, force: bool) -> Result<(), CoreError> {
        let now = Instant::now();

        let cooling = self.lock_budget().in_cooldown(now);
        if cooling {
            debug!("failure cooldown active; skipping poll");
            self.set_health(UpdateHealth::CoolingDown);
            self.publish_view();
            return Ok(());
        }

        let due = force
            || self
                .lock_timing()
                .next_poll_at
                .is_none_or(|at| now >= at);
        if due {
            self.lock_timing().next_poll_at = Some(now + self.inner.config.min_poll_interval);

            match self.poll_fleet().await {
                Ok(()) => {
                    self.lock_budget().record_success();
                    self.inner.stale.store(false, Ordering::SeqCst);
                    self.set_health(UpdateHealth::Ok);
                    self.evaluate_channel().await;
                }
                Err(e @ CoreError::AuthenticationFailed { .. }) => {
                    self.inner.stale.store(true, Ordering::SeqCst);
                    self.set_health(UpdateHealth::AuthExpired);
                    self.publish_view();
                    return Err(e);
                }
                Err(e) => {
                    self.inner.stale.store(true, Ordering::SeqCst);
                    let (exhausted, failures) = {
                        let mut budget = self.lock_budget();
                        let exhausted = budget.record_failure(now);
                        (exhausted, budget.failures())
                    };
                    if exhausted {
                        warn!(
                            cooldown_secs = self.inner.config.failure_cooldown.as_secs(),
                            "failure budget exhausted; pausing polls"
                        );
                        self.set_health(UpdateHealth::CoolingDown);
                    } else {
                        self.set_health(UpdateHealth::Degraded {
                            consecutive_failures: failures,
                        });
                    }
                    self.publish_view();
                    return Err(e);
                }
            }
        }

        self.publish_view();
        self.run_registration();
        Ok(())
    }

    /// Validate credentials, then poll every managed device concurrently.
    /// Successful statuses are applied even when a sibling poll fails; the
    /// first failure is reported after the sweep.
    async fn poll_fleet(&self) -> Result<(), CoreError> {
        if !self.inner.poll.validate_credentials().await? {
            return Err(CoreError::AuthenticationFailed {
                message: "credentials rejected".to_owned(),
            });
        }

        let polls = self.inner.device_ids.iter().map(|&id| {
            let poll = Arc::clone(&self.inner.poll);
            async move { (id, poll.poll_device(id).await) }
        });

        let mut first_error = None;
        for (id, result) in join_all(polls).await {
            match result {
                Ok(status) => {
                    if self.inner.store.apply(status) {
                        debug!(device = %id, "device seen for the first time");
                    }
                }
                Err(e) => {
                    warn!(device = %id, error = %e, "device poll failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// One policy evaluation: gather inputs, feed the idle tracker, act on
    /// the start/stop verdict. Serialized by the evaluate lock; callers
    /// voluntarily skip while a refresh holds the channel.
    async fn evaluate_channel(&self) {
        if self.inner.refresh_lock.try_lock().is_err() {
            debug!("refresh in progress; skipping channel evaluation");
            return;
        }
        let _guard = self.inner.evaluate_lock.lock().await;
        self.evaluate_locked().await;
    }

    /// Evaluation body. Callers must hold `evaluate_lock` (or, for the
    /// refresh path, both locks).
    async fn evaluate_locked(&self) {
        let now = Instant::now();
        let (inputs, idle_fired) = {
            let mut timing = self.lock_timing();
            let inputs = PolicyInputs {
                activity: self.inner.store.activity(),
                mode: self.inner.config.connect_mode,
                action_pending: timing
                    .action
                    .within_grace(self.inner.config.action_grace, now),
                manual_override: self.inner.manual_override.load(Ordering::SeqCst),
                host_ready: self.inner.host_ready.load(Ordering::SeqCst),
                shutting_down: self.inner.shutting_down.load(Ordering::SeqCst),
                channel_started: self.inner.channel.is_started(),
            };
            let eligible = policy::is_idle_eligible(&inputs);
            let idle_fired =
                timing
                    .idle
                    .observe(eligible, self.inner.config.idle_threshold, now);
            (inputs, idle_fired)
        };

        if policy::should_start(&inputs) {
            debug!("policy requests channel start");
            // Fresh session starts with a clean idle clock.
            self.lock_timing().idle.reset();
            self.inner.channel.start(&self.inner.store.snapshot()).await;
        } else if policy::should_stop(&inputs, idle_fired) {
            debug!("policy requests channel stop");
            self.inner
                .channel
                .stop(
                    &self.inner.store.snapshot(),
                    self.inner.config.disconnect_timeout,
                )
                .await;
        }
    }

    /// If a requested local file listing still has not arrived after the
    /// recheck delay, the push session is likely wedged: bounce the channel
    /// and re-request once it is open again.
    async fn recheck_local_files(&self, id: DeviceId, previous: Option<Vec<FileEntry>>) {
        let Ok(_guard) = self.inner.file_check_lock.try_lock() else {
            debug!(device = %id, "file recheck already running");
            return;
        };
        sleep(self.inner.config.file_recheck_delay).await;

        let Some(status) = self.inner.store.get(id) else {
            return;
        };
        if !status.online {
            return;
        }
        if previous.is_some() || status.local_files.is_some() {
            return;
        }

        info!(device = %id, "local file listing still missing; refreshing push channel");
        self.refresh_channel().await;
        if !self
            .inner
            .channel
            .wait_open(self.inner.config.connect_timeout)
            .await
        {
            warn!(device = %id, "channel did not reopen; abandoning file recheck");
            return;
        }
        sleep(self.inner.config.refresh_settle).await;

        if let Err(e) = self
            .inner
            .poll
            .send_command(id, DeviceCommand::RequestLocalFiles)
            .await
        {
            warn!(device = %id, error = %e, "file listing re-request failed");
        }
    }

    fn spawn_job_started_poll(&self) {
        let coordinator = self.clone();
        let cancel = self.inner.cancel.clone();
        let delay = self.inner.config.job_started_poll_delay;
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = sleep(delay) => {
                    if let Err(e) = coordinator.force_state_update().await {
                        warn!(error = %e, "post-job-start poll failed");
                    }
                }
            }
        });
    }

    fn spawn_options_query(&self) {
        let coordinator = self.clone();
        let cancel = self.inner.cancel.clone();
        let delay = self.inner.config.subscribe_settle;
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = sleep(delay) => coordinator.query_device_options().await,
            }
        });
    }

    /// Ask every reachable device to publish its option/peripheral state.
    async fn query_device_options(&self) {
        let snapshot = self.inner.store.snapshot();
        for status in snapshot.as_ref() {
            if !status.online {
                continue;
            }
            if let Err(e) = self
                .inner
                .poll
                .send_command(status.id, DeviceCommand::QueryOptions)
                .await
            {
                warn!(device = %status.id, error = %e, "options query failed");
            }
        }
    }

    fn publish_view(&self) {
        let snapshot = self.inner.store.snapshot();
        let view = FleetView::build(
            snapshot.iter(),
            self.inner.manual_override.load(Ordering::SeqCst),
            self.inner.channel.is_started(),
            self.inner.stale.load(Ordering::SeqCst),
        );
        let _ = self.inner.fleet_view.send(Arc::new(view));
    }

    fn run_registration(&self) {
        let promoted = self.lock_registration().evaluate(|id| {
            self.inner
                .store
                .get(id)
                .map(|status| CapabilitySnapshot::from(status.as_ref()))
        });
        for addition in promoted {
            let _ = self.inner.additions.send(addition);
        }
    }

    fn set_health(&self, health: UpdateHealth) {
        self.inner.health.send_if_modified(|current| {
            if *current == health {
                false
            } else {
                *current = health;
                true
            }
        });
    }

    fn lock_timing(&self) -> std::sync::MutexGuard<'_, TimingState> {
        self.inner.timing.lock().expect("timing lock poisoned")
    }

    fn lock_budget(&self) -> std::sync::MutexGuard<'_, FailureBudget> {
        self.inner.budget.lock().expect("budget lock poisoned")
    }

    fn lock_registration(&self) -> std::sync::MutexGuard<'_, RegistrationEngine> {
        self.inner
            .registration
            .lock()
            .expect("registration lock poisoned")
    }
}

/// Single dispatch point for inbound push events. Events never mutate
/// coordinator state reentrantly; follow-up work is spawned.
async fn dispatch_task(coordinator: Coordinator, cancel: CancellationToken) {
    let mut events = coordinator.inner.push.events();
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(PushEvent::DataChanged { id, status }) => {
                    debug!(device = %id, "push data update");
                    coordinator.inner.store.apply(status);
                    coordinator.publish_view();
                    coordinator.run_registration();
                }
                Ok(PushEvent::JobStarted { id }) => {
                    info!(device = %id, "print job started");
                    coordinator.spawn_job_started_poll();
                }
                Ok(PushEvent::Subscribed) => {
                    debug!("push subscriptions confirmed");
                    coordinator.spawn_options_query();
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "push event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    debug!("push dispatch task stopped");
}
