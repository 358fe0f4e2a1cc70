use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::acquisition::{SharedSource, SourceFactory};
use crate::types::PipelineEvent;

/// Counter of freshly arrived samples, bumped by the same source calls that
/// feed the recording worker and consumed by the health probes.
#[derive(Clone, Default)]
pub struct ArrivalCounter(Arc<AtomicUsize>);

impl ArrivalCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: usize) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Consumes and returns the current count.
    pub fn take(&self) -> usize {
        self.0.swap(0, Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

const PROBE_ATTEMPTS: usize = 3;

/// Watchdog over the data source: assumes the source is bad until samples
/// prove otherwise, and reports each state flip exactly once.
pub struct HealthMonitor {
    state: HealthState,
    arrivals: ArrivalCounter,
    probe_pause: Duration,
    offline: bool,
}

impl HealthMonitor {
    pub fn new(arrivals: ArrivalCounter, probe_pause: Duration, offline: bool) -> Self {
        Self {
            state: HealthState::Unhealthy,
            arrivals,
            probe_pause,
            offline,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    /// One probing pass: up to three arrival checks with a short pause in
    /// between. Fresh data flips the state to Healthy. No data across all
    /// attempts flips it to Unhealthy, but only while idle and not in
    /// offline mode; an active recording will detect truncation itself, so
    /// flagging it here would be a false positive.
    ///
    /// Returns the new state only when it changed, so callers can emit each
    /// transition exactly once.
    pub fn probe(&mut self, recording: bool) -> Option<HealthState> {
        for attempt in 0..PROBE_ATTEMPTS {
            if self.arrivals.take() > 0 {
                return self.transition(HealthState::Healthy);
            }
            if attempt + 1 < PROBE_ATTEMPTS {
                thread::sleep(self.probe_pause);
            }
        }
        if recording || self.offline {
            return None;
        }
        self.transition(HealthState::Unhealthy)
    }

    fn transition(&mut self, next: HealthState) -> Option<HealthState> {
        if self.state == next {
            return None;
        }
        self.state = next;
        Some(next)
    }
}

/// Handle to the periodic scheduler thread driving the monitor's two tasks.
pub struct MonitorHandle {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawns the single periodic scheduler: every `tick` it runs one health
/// probe, and on a slower `cleaner_period` cadence it clears the arrival
/// counter while idle so idle polling cannot grow it without bound.
///
/// While the monitor is Unhealthy and nothing is recording, every tick also
/// attempts to refill an empty source slot, best-effort: a failed open is
/// logged, swallowed and retried on the next tick.
pub fn spawn_monitor(
    mut monitor: HealthMonitor,
    recording: Arc<AtomicBool>,
    source: SharedSource,
    factory: SourceFactory,
    events: Sender<PipelineEvent>,
    tick: Duration,
    cleaner_period: Duration,
) -> MonitorHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let handle = thread::spawn(move || {
        let arrivals = monitor.arrivals.clone();
        let ticks_per_clean = (cleaner_period.as_millis() / tick.as_millis().max(1)).max(1);
        let mut tick_count: u128 = 0;
        while !stop_flag.load(Ordering::Relaxed) {
            let is_recording = recording.load(Ordering::Relaxed);
            match monitor.probe(is_recording) {
                Some(HealthState::Healthy) => {
                    info!("data source healthy");
                    let _ = events.send(PipelineEvent::HealthChanged(true));
                }
                Some(HealthState::Unhealthy) => {
                    warn!("no samples arriving, data source flagged unhealthy");
                    let _ = events.send(PipelineEvent::HealthChanged(false));
                }
                None => {}
            }
            if monitor.state() == HealthState::Unhealthy
                && !recording.load(Ordering::Relaxed)
            {
                reopen_source(&source, &factory);
            }
            tick_count += 1;
            if tick_count % ticks_per_clean == 0 && !recording.load(Ordering::Relaxed) {
                arrivals.clear();
            }
            sleep_until_stopped(&stop_flag, tick);
        }
    });
    MonitorHandle {
        stop,
        handle: Some(handle),
    }
}

/// Sleeps one tick in short slices so a stop request never waits out a long
/// tick period.
fn sleep_until_stopped(stop: &AtomicBool, tick: Duration) {
    const SLICE: Duration = Duration::from_millis(10);
    let mut remaining = tick;
    while !remaining.is_zero() && !stop.load(Ordering::Relaxed) {
        let chunk = remaining.min(SLICE);
        thread::sleep(chunk);
        remaining -= chunk;
    }
}

fn reopen_source(source: &SharedSource, factory: &SourceFactory) {
    let mut slot = source.lock().unwrap_or_else(|e| e.into_inner());
    if slot.is_some() {
        return;
    }
    match factory() {
        Ok(fresh) => {
            info!("data source reopened");
            *slot = Some(fresh);
        }
        Err(err) => warn!("source reopen failed: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{AcquireError, ManualSource, Sample, SampleSource};
    use std::sync::mpsc;
    use std::sync::Mutex;

    fn monitor(offline: bool) -> (HealthMonitor, ArrivalCounter) {
        let arrivals = ArrivalCounter::new();
        (
            HealthMonitor::new(arrivals.clone(), Duration::ZERO, offline),
            arrivals,
        )
    }

    #[test]
    fn starts_unhealthy_without_duplicate_notification() {
        let (mut m, _arrivals) = monitor(false);
        assert_eq!(m.state(), HealthState::Unhealthy);
        // already unhealthy: empty probes change nothing and report nothing
        assert_eq!(m.probe(false), None);
        assert_eq!(m.probe(false), None);
        assert_eq!(m.state(), HealthState::Unhealthy);
    }

    #[test]
    fn arrivals_flip_to_healthy_once() {
        let (mut m, arrivals) = monitor(false);
        arrivals.add(3);
        assert_eq!(m.probe(false), Some(HealthState::Healthy));
        arrivals.add(1);
        // still healthy, no re-fire
        assert_eq!(m.probe(false), None);
    }

    #[test]
    fn empty_probes_while_idle_flip_to_unhealthy_once() {
        let (mut m, arrivals) = monitor(false);
        arrivals.add(1);
        assert_eq!(m.probe(false), Some(HealthState::Healthy));
        assert_eq!(m.probe(false), Some(HealthState::Unhealthy));
        // probed again while still empty: no duplicate
        assert_eq!(m.probe(false), None);
    }

    #[test]
    fn no_unhealthy_flip_while_recording_or_offline() {
        let (mut m, arrivals) = monitor(false);
        arrivals.add(1);
        assert_eq!(m.probe(false), Some(HealthState::Healthy));
        assert_eq!(m.probe(true), None);
        assert_eq!(m.state(), HealthState::Healthy);

        let (mut m, arrivals) = monitor(true);
        arrivals.add(1);
        assert_eq!(m.probe(false), Some(HealthState::Healthy));
        assert_eq!(m.probe(false), None);
        assert_eq!(m.state(), HealthState::Healthy);
    }

    #[test]
    fn probe_consumes_the_counter() {
        let (mut m, arrivals) = monitor(false);
        arrivals.add(5);
        m.probe(false);
        assert_eq!(arrivals.take(), 0);
    }

    #[test]
    fn scheduler_emits_health_events_and_reopens() {
        let arrivals = ArrivalCounter::new();
        let monitor = HealthMonitor::new(arrivals.clone(), Duration::ZERO, false);
        let recording = Arc::new(AtomicBool::new(false));
        let source: SharedSource = Arc::new(Mutex::new(None));
        let opens = Arc::new(AtomicUsize::new(0));
        let opens_in_factory = opens.clone();
        let factory: SourceFactory = Arc::new(move || {
            opens_in_factory.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ManualSource::new(Vec::<Sample>::new())) as Box<dyn SampleSource>)
        });
        let (tx, rx) = mpsc::channel();

        arrivals.add(1);
        let handle = spawn_monitor(
            monitor,
            recording,
            source.clone(),
            factory,
            tx,
            Duration::from_millis(5),
            Duration::from_millis(50),
        );
        // first tick sees the arrival, second sees nothing
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            PipelineEvent::HealthChanged(true)
        );
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            PipelineEvent::HealthChanged(false)
        );
        handle.stop();
        assert!(opens.load(Ordering::SeqCst) >= 1);
        assert!(source.lock().unwrap().is_some());
    }

    #[test]
    fn scheduler_retries_reopen_until_a_source_opens() {
        let arrivals = ArrivalCounter::new();
        let monitor = HealthMonitor::new(arrivals, Duration::ZERO, false);
        let recording = Arc::new(AtomicBool::new(false));
        let source: SharedSource = Arc::new(Mutex::new(None));
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_in_factory = attempts.clone();
        // device stays gone for the first few opens, then comes back
        let factory: SourceFactory = Arc::new(move || {
            if attempts_in_factory.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(AcquireError::SourceUnavailable("no device".into()))
            } else {
                Ok(Box::new(ManualSource::new(Vec::<Sample>::new())) as Box<dyn SampleSource>)
            }
        });
        let (tx, _rx) = mpsc::channel();

        let handle = spawn_monitor(
            monitor,
            recording,
            source.clone(),
            factory,
            tx,
            Duration::from_millis(5),
            Duration::from_millis(50),
        );
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while source.lock().unwrap().is_none() {
            assert!(std::time::Instant::now() < deadline, "slot never refilled");
            thread::sleep(Duration::from_millis(2));
        }
        handle.stop();
        assert!(attempts.load(Ordering::SeqCst) >= 4);
    }

    #[test]
    fn reopen_failure_is_swallowed() {
        let source: SharedSource = Arc::new(Mutex::new(None));
        let factory: SourceFactory =
            Arc::new(|| Err(AcquireError::SourceUnavailable("no device".into())));
        reopen_source(&source, &factory);
        assert!(source.lock().unwrap().is_none());
    }
}
