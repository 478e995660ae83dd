use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Out-of-band observer for progress events.
///
/// Delivery is best-effort: implementations must never block and never
/// fail; anything they cannot deliver they drop.
pub trait ProgressObserver: Send + Sync {
    /// One progress event: `(phase-key, percentage in [0,1], message)`
    fn report(&self, phase_key: &str, percentage: f64, message: &str);
}

/// Default observer that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn report(&self, _phase_key: &str, _percentage: f64, _message: &str) {}
}

/// Observer that logs events through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn report(&self, phase_key: &str, percentage: f64, message: &str) {
        tracing::info!(
            phase = phase_key,
            percentage = format!("{:.0}%", percentage * 100.0),
            message,
            "progress"
        );
    }
}

/// Throttling, monotonicity-enforcing wrapper around a [`ProgressObserver`].
///
/// Guarantees:
/// - within one attempt the reported percentage never decreases;
/// - across a fallback reset the percentage never drops more than 20%
///   below the highest value already reported;
/// - events closer together than the heartbeat interval are coalesced,
///   except the terminal 100% event which always goes out.
pub struct ProgressReporter<'a> {
    observer: &'a dyn ProgressObserver,
    heartbeat_interval: Duration,
    state: Mutex<ReporterState>,
}

#[derive(Debug)]
struct ReporterState {
    /// Highest percentage ever reported in this routing call
    high_water: f64,
    /// Floor for the current attempt (set on fallback reset)
    attempt_floor: f64,
    /// Last percentage emitted in the current attempt
    attempt_last: f64,
    last_emit: Option<Instant>,
}

/// Maximum regression permitted when a fallback attempt resets progress
const MAX_REGRESSION: f64 = 0.2;

impl<'a> ProgressReporter<'a> {
    pub fn new(observer: &'a dyn ProgressObserver, heartbeat_interval: Duration) -> Self {
        Self {
            observer,
            heartbeat_interval,
            state: Mutex::new(ReporterState {
                high_water: 0.0,
                attempt_floor: 0.0,
                attempt_last: 0.0,
                last_emit: None,
            }),
        }
    }

    /// Start a new attempt; progress may reset but never below
    /// `high_water - 20%`.
    pub fn begin_attempt(&self) {
        let mut state = self.state.lock().expect("reporter state poisoned");
        state.attempt_floor = (state.high_water - MAX_REGRESSION).max(0.0);
        state.attempt_last = state.attempt_floor;
        state.last_emit = None;
    }

    /// Report progress for the active attempt
    pub fn report(&self, phase_key: &str, percentage: f64, message: &str) {
        let emit = {
            let mut state = self.state.lock().expect("reporter state poisoned");
            let clamped = percentage
                .clamp(0.0, 1.0)
                .max(state.attempt_floor)
                .max(state.attempt_last);
            let terminal = clamped >= 1.0;
            let due = state
                .last_emit
                .map(|t| t.elapsed() >= self.heartbeat_interval)
                .unwrap_or(true);
            if !terminal && !due {
                // Still record the high water mark so later events honour it
                state.attempt_last = clamped;
                state.high_water = state.high_water.max(clamped);
                None
            } else {
                state.attempt_last = clamped;
                state.high_water = state.high_water.max(clamped);
                state.last_emit = Some(Instant::now());
                Some(clamped)
            }
        };
        if let Some(percentage) = emit {
            self.observer.report(phase_key, percentage, message);
        }
    }

    /// Re-emit the current percentage as a liveness heartbeat
    pub fn heartbeat(&self, phase_key: &str, message: &str) {
        let current = {
            let state = self.state.lock().expect("reporter state poisoned");
            state.attempt_last
        };
        self.report(phase_key, current, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        events: StdMutex<Vec<(String, f64, String)>>,
    }

    impl ProgressObserver for Recorder {
        fn report(&self, phase_key: &str, percentage: f64, message: &str) {
            self.events.lock().unwrap().push((
                phase_key.to_string(),
                percentage,
                message.to_string(),
            ));
        }
    }

    impl Recorder {
        fn percentages(&self) -> Vec<f64> {
            self.events.lock().unwrap().iter().map(|e| e.1).collect()
        }
    }

    #[test]
    fn test_monotone_within_attempt() {
        let recorder = Recorder::default();
        let reporter = ProgressReporter::new(&recorder, Duration::ZERO);
        reporter.begin_attempt();
        reporter.report("implement", 0.1, "start");
        reporter.report("implement", 0.5, "middle");
        reporter.report("implement", 0.3, "stale event");
        reporter.report("implement", 1.0, "done");

        let percentages = recorder.percentages();
        assert_eq!(percentages.len(), 4);
        assert!(percentages.windows(2).all(|w| w[0] <= w[1]));
        // The stale 0.3 was clamped up to 0.5
        assert_eq!(percentages[2], 0.5);
    }

    #[test]
    fn test_fallback_regression_bounded() {
        let recorder = Recorder::default();
        let reporter = ProgressReporter::new(&recorder, Duration::ZERO);
        reporter.begin_attempt();
        reporter.report("implement", 0.9, "almost");

        reporter.begin_attempt(); // fallback
        reporter.report("implement", 0.0, "restarting");

        let percentages = recorder.percentages();
        // Reset lands at the floor: 0.9 - 0.2 = 0.7
        assert!((percentages[1] - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_heartbeat_throttling() {
        let recorder = Recorder::default();
        let reporter = ProgressReporter::new(&recorder, Duration::from_secs(3600));
        reporter.begin_attempt();
        reporter.report("implement", 0.1, "first always emits");
        reporter.report("implement", 0.2, "throttled");
        reporter.report("implement", 0.3, "throttled");
        reporter.report("implement", 1.0, "terminal always emits");

        let percentages = recorder.percentages();
        assert_eq!(percentages, vec![0.1, 1.0]);
    }
}
