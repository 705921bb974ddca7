pub mod broadcaster;
pub mod staleness;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::db::LastSuccessStore;
use crate::models::{AgentSettings, AlertState, StatusEvent};
use crate::platform::alerts::{AlertKind, AlertPresenter};
use crate::utils::{format_last_sync, Clock};

pub use broadcaster::StatusBroadcaster;

enum MonitorCommand {
    ReEvaluate,
    UpdateLastSuccess(DateTime<Utc>),
    Stop,
}

/// Periodic check-in staleness evaluation with alert bookkeeping.
pub struct StalenessMonitor {
    store: Arc<dyn LastSuccessStore>,
    presenter: Arc<dyn AlertPresenter>,
    broadcaster: StatusBroadcaster,
    clock: Arc<dyn Clock>,
    check_interval: Duration,
    threshold: Duration,
    alert_repeat: Duration,
    service_start: DateTime<Utc>,
    /// State of the previous evaluation; `None` before the first one.
    previous: Option<AlertState>,
    /// When the stale alert was last raised; cleared once the state is OK.
    last_alert_at: Option<DateTime<Utc>>,
    sequence: u64,
}

impl StalenessMonitor {
    pub fn new(
        settings: &AgentSettings,
        store: Arc<dyn LastSuccessStore>,
        presenter: Arc<dyn AlertPresenter>,
        broadcaster: StatusBroadcaster,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let service_start = clock.now();
        log::debug!(
            "Monitor created. Last successful send: {}",
            format_last_sync(store.get())
        );
        Self {
            store,
            presenter,
            broadcaster,
            clock,
            check_interval: settings.check_interval(),
            threshold: settings.condition_duration(),
            alert_repeat: settings.alert_repeat(),
            service_start,
            previous: None,
            last_alert_at: None,
            sequence: 0,
        }
    }

    /// Run one evaluation: recompute the state, drive alert transitions,
    /// refresh the status indicator and publish exactly one event.
    ///
    /// The stale alert is raised on entering a stale state and again every
    /// `alert_repeat` while the device stays stale.
    pub fn evaluate_now(&mut self) -> StatusEvent {
        let now = self.clock.now();
        let last_success = self.store.get();
        let state = staleness::evaluate(last_success, self.service_start, now, self.threshold);
        let rendered =
            staleness::render(state, last_success, self.clock.last_reboot(), self.threshold);

        log::debug!(
            "Periodic check. Current: {}, Last send: {}, State: {}",
            crate::utils::format_timestamp(&now),
            format_last_sync(last_success),
            state.as_str()
        );

        let repeat_due = state.is_stale()
            && self.last_alert_at.map_or(true, |at| {
                (now - at).to_std().map_or(false, |since| since >= self.alert_repeat)
            });
        if self.previous != Some(state) || repeat_due {
            match rendered.alert_title {
                Some(title) => {
                    log::warn!("{}", rendered.message);
                    self.presenter.raise(AlertKind::StaleCheckin, title, &rendered.message);
                    self.last_alert_at = Some(now);
                }
                None => {
                    if self.previous.is_some() {
                        log::info!("Device check-in is OK again");
                    }
                    self.presenter.clear(AlertKind::StaleCheckin);
                    self.last_alert_at = None;
                }
            }
        }
        self.presenter
            .raise(AlertKind::Status, staleness::STATUS_TITLE, &rendered.status_text);
        self.previous = Some(state);

        self.sequence += 1;
        let event = StatusEvent {
            sequence: self.sequence,
            state,
            is_stale: state.is_stale(),
            last_sync_time: last_success,
            message: rendered.message,
        };
        self.broadcaster.publish(event.clone());
        event
    }

    /// Spawn the timer task. The first evaluation runs immediately.
    pub fn start(self) -> RunningMonitor {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run_loop(rx));
        RunningMonitor {
            handle: MonitorHandle { tx },
            task,
        }
    }

    async fn run_loop(mut self, mut rx: mpsc::UnboundedReceiver<MonitorCommand>) {
        log::info!(
            "Staleness monitor started (interval {:?}, threshold {:?})",
            self.check_interval,
            self.threshold
        );
        let mut next_tick = Instant::now();

        loop {
            tokio::select! {
                // Commands first so a pending stop wins over a due tick.
                biased;

                command = rx.recv() => match command {
                    Some(MonitorCommand::ReEvaluate) => {
                        self.evaluate_now();
                        next_tick = Instant::now() + self.check_interval;
                    }
                    Some(MonitorCommand::UpdateLastSuccess(ts)) => {
                        log::debug!("Updating last successful send to {}", format_last_sync(Some(ts)));
                        if let Err(e) = self.store.set(ts) {
                            log::warn!("Failed to persist last successful send: {}", e);
                        }
                        self.evaluate_now();
                        next_tick = Instant::now() + self.check_interval;
                    }
                    Some(MonitorCommand::Stop) | None => break,
                },
                _ = tokio::time::sleep_until(next_tick) => {
                    self.evaluate_now();
                    next_tick = Instant::now() + self.check_interval;
                }
            }
        }

        log::info!("Staleness monitor stopped");
    }
}

/// Cloneable control surface for a running monitor. Requests sent after the
/// monitor stopped are dropped.
#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::UnboundedSender<MonitorCommand>,
}

impl MonitorHandle {
    /// Evaluate immediately and restart the periodic interval from now.
    pub fn re_evaluate(&self) {
        self.send(MonitorCommand::ReEvaluate);
    }

    /// Override the persisted last-success timestamp, then re-evaluate.
    pub fn update_last_success(&self, ts: DateTime<Utc>) {
        self.send(MonitorCommand::UpdateLastSuccess(ts));
    }

    pub fn stop(&self) {
        self.send(MonitorCommand::Stop);
    }

    fn send(&self, command: MonitorCommand) {
        if self.tx.send(command).is_err() {
            log::debug!("Monitor already stopped; request dropped");
        }
    }
}

pub struct RunningMonitor {
    handle: MonitorHandle,
    task: JoinHandle<()>,
}

impl RunningMonitor {
    pub fn handle(&self) -> MonitorHandle {
        self.handle.clone()
    }

    /// Stop the timer and wait until the task has exited.
    pub async fn shutdown(self) {
        self.handle.stop();
        if let Err(e) = self.task.await {
            log::warn!("Monitor task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{settle, MemoryStore, PausedClock, PresenterCall, RecordingPresenter};

    const MINUTE: Duration = Duration::from_secs(60);

    struct Harness {
        store: Arc<MemoryStore>,
        presenter: Arc<RecordingPresenter>,
        broadcaster: StatusBroadcaster,
        clock: Arc<PausedClock>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryStore::default()),
                presenter: Arc::new(RecordingPresenter::default()),
                broadcaster: StatusBroadcaster::new(),
                clock: Arc::new(PausedClock::at("2024-06-01T08:00:00Z")),
            }
        }

        fn monitor(&self) -> StalenessMonitor {
            self.monitor_with(&AgentSettings::default())
        }

        fn monitor_with(&self, settings: &AgentSettings) -> StalenessMonitor {
            StalenessMonitor::new(
                settings,
                self.store.clone(),
                self.presenter.clone(),
                self.broadcaster.clone(),
                self.clock.clone(),
            )
        }

        fn latest(&self) -> StatusEvent {
            self.broadcaster.latest().expect("no status published")
        }
    }

    async fn advance_minutes(minutes: u64) {
        for _ in 0..minutes {
            tokio::time::advance(MINUTE).await;
            settle().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_evaluation_is_immediate_and_clears_leftover_alert() {
        let h = Harness::new();
        let running = h.monitor().start();
        settle().await;

        let event = h.latest();
        assert_eq!(event.sequence, 1);
        assert_eq!(event.state, AlertState::Ok);
        assert!(!event.is_stale);
        assert_eq!(h.presenter.clears(AlertKind::StaleCheckin), 1);
        assert_eq!(h.presenter.raises(AlertKind::StaleCheckin), 0);
        running.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn never_reported_raises_overdue_alert_after_threshold() {
        let h = Harness::new();
        let running = h.monitor().start();
        settle().await;

        advance_minutes(300).await;
        assert_eq!(h.latest().state, AlertState::Ok);

        tokio::time::advance(Duration::from_secs(1)).await;
        running.handle().re_evaluate();
        settle().await;

        let event = h.latest();
        assert_eq!(event.state, AlertState::InitialSyncOverdue);
        assert!(event.is_stale);
        assert_eq!(event.last_sync_time, None);
        assert_eq!(
            h.presenter.last_raise(AlertKind::StaleCheckin).map(|(title, _)| title),
            Some(staleness::OVERDUE_ALERT_TITLE.to_string())
        );
        running.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn report_then_silence_goes_stale() {
        let h = Harness::new();
        let running = h.monitor().start();
        settle().await;

        advance_minutes(10).await;
        running.handle().update_last_success(h.clock.now());
        settle().await;
        assert_eq!(h.latest().state, AlertState::Ok);

        advance_minutes(300).await;
        assert_eq!(h.latest().state, AlertState::Ok);

        advance_minutes(1).await;
        let event = h.latest();
        assert_eq!(event.state, AlertState::CheckinStale);
        assert_eq!(
            h.presenter.last_raise(AlertKind::StaleCheckin).map(|(title, _)| title),
            Some(staleness::STALE_ALERT_TITLE.to_string())
        );
        // Staying stale re-raises only once the repeat interval has passed.
        advance_minutes(29).await;
        assert_eq!(h.presenter.raises(AlertKind::StaleCheckin), 1);
        advance_minutes(1).await;
        assert_eq!(h.presenter.raises(AlertKind::StaleCheckin), 2);
        advance_minutes(29).await;
        assert_eq!(h.presenter.raises(AlertKind::StaleCheckin), 2);
        assert_eq!(h.latest().state, AlertState::CheckinStale);
        running.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_alone_reach_overdue_just_past_threshold() {
        let h = Harness::new();
        let settings = AgentSettings {
            check_interval_millis: 1000,
            ..AgentSettings::default()
        };
        let running = h.monitor_with(&settings).start();
        settle().await;

        tokio::time::advance(Duration::from_secs(5 * 3600 - 1)).await;
        settle().await;
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(h.latest().state, AlertState::Ok);
        assert_eq!(h.presenter.raises(AlertKind::StaleCheckin), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        let event = h.latest();
        assert_eq!(event.state, AlertState::InitialSyncOverdue);
        assert!(event.is_stale);
        assert_eq!(
            h.presenter.last_raise(AlertKind::StaleCheckin).map(|(title, _)| title),
            Some(staleness::OVERDUE_ALERT_TITLE.to_string())
        );
        running.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn returning_to_ok_resets_the_repeat_clock() {
        let h = Harness::new();
        h.store.set(h.clock.now() - chrono::Duration::hours(6)).unwrap();
        let running = h.monitor().start();
        settle().await;
        assert_eq!(h.presenter.raises(AlertKind::StaleCheckin), 1);

        advance_minutes(10).await;
        running.handle().update_last_success(h.clock.now() - chrono::Duration::hours(4));
        settle().await;
        assert_eq!(h.latest().state, AlertState::Ok);

        // Stale again one hour later: raised right away, not at the old cadence.
        advance_minutes(61).await;
        assert_eq!(h.latest().state, AlertState::CheckinStale);
        assert_eq!(h.presenter.raises(AlertKind::StaleCheckin), 2);
        running.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_report_clears_stale_alert() {
        let h = Harness::new();
        h.store.set(h.clock.now() - chrono::Duration::hours(6)).unwrap();
        let running = h.monitor().start();
        settle().await;
        assert_eq!(h.latest().state, AlertState::CheckinStale);

        running.handle().update_last_success(h.clock.now());
        settle().await;
        assert_eq!(h.latest().state, AlertState::Ok);
        assert_eq!(h.store.get(), Some(h.clock.now()));
        assert_eq!(
            h.presenter.calls().last(),
            Some(&PresenterCall::Raise(
                AlertKind::Status,
                staleness::STATUS_TITLE.to_string(),
                h.latest().message
            ))
        );
        assert_eq!(h.presenter.clears(AlertKind::StaleCheckin), 1);
        running.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn re_evaluation_reschedules_instead_of_stacking() {
        let h = Harness::new();
        let running = h.monitor().start();
        settle().await;
        assert_eq!(h.latest().sequence, 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        running.handle().re_evaluate();
        settle().await;
        assert_eq!(h.latest().sequence, 2);

        // The tick originally due at 60s was replaced by one at 90s.
        tokio::time::advance(Duration::from_secs(59)).await;
        settle().await;
        assert_eq!(h.latest().sequence, 2);

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(h.latest().sequence, 3);
        running.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_monitor_has_no_side_effects() {
        let h = Harness::new();
        let running = h.monitor().start();
        settle().await;
        let handle = running.handle();
        running.shutdown().await;

        let calls_before = h.presenter.calls().len();
        handle.re_evaluate();
        handle.update_last_success(h.clock.now());
        advance_minutes(400).await;

        assert_eq!(h.presenter.calls().len(), calls_before);
        assert_eq!(h.latest().sequence, 1);
        assert_eq!(h.store.get(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_recomputes_from_persisted_state() {
        let h = Harness::new();
        h.store.set(h.clock.now() - chrono::Duration::hours(5) - chrono::Duration::minutes(1)).unwrap();

        let mut monitor = h.monitor();
        let event = monitor.evaluate_now();
        assert_eq!(event.state, AlertState::CheckinStale);
        assert_eq!(h.presenter.raises(AlertKind::StaleCheckin), 1);

        // Same inputs, same answer: no drift, no second alert.
        let again = monitor.evaluate_now();
        assert_eq!(again.state, AlertState::CheckinStale);
        assert_eq!(again.sequence, 2);
        assert_eq!(h.presenter.raises(AlertKind::StaleCheckin), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn storage_failure_degrades_to_never_reported() {
        let h = Harness::new();
        h.store.set(h.clock.now()).unwrap();
        h.store.fail_reads(true);

        let mut monitor = h.monitor();
        let event = monitor.evaluate_now();
        assert_eq!(event.state, AlertState::Ok);
        assert_eq!(event.last_sync_time, None);
    }
}
