//! Bounded retry campaigns.
//!
//! A campaign is one bounded sequence of attempts toward a single goal,
//! such as provisioning an identity token or confirming a login. The
//! scheduler drives each campaign on a background thread, waits between
//! attempts according to the campaign's interval sequence, and calls an
//! exhaustion handler exactly once when the attempts run out.
//!
//! At most one campaign may be live per [`CampaignPurpose`]; starting
//! another while one is pending is a no-op. This guards against timer
//! pile-up when a user mashes a login button.
//!
//! Time is abstracted behind the [`Clock`] trait so tests can step
//! through intervals without waiting on wall-clock delays.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Fallback wait when a campaign is configured with no intervals.
const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Time source for campaign scheduling.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> Instant;

    /// Blocks the calling thread for the given duration.
    fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation of [`Clock`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// The goal a campaign is driving toward.
///
/// Doubles as the key for the one-live-campaign-per-purpose guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CampaignPurpose {
    /// Anonymous identity bootstrap at startup.
    Onboarding,
    /// Login-state recheck after the user opens the external auth flow.
    LoginConfirmation,
}

/// Result of a single campaign attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignStatus {
    /// The goal was reached; the campaign stops.
    Complete,
    /// Not there yet; retry after the next interval.
    Pending,
}

/// Bounds and cadence for one campaign.
#[derive(Debug, Clone)]
pub struct CampaignSpec {
    /// Which guard slot this campaign occupies.
    pub purpose: CampaignPurpose,
    /// Maximum number of attempts before exhaustion.
    pub max_attempts: u32,
    /// Waits between attempts; the last entry repeats when attempts
    /// outnumber entries.
    pub intervals: Vec<Duration>,
}

impl CampaignSpec {
    /// Creates a spec with an explicit interval sequence.
    pub fn new(purpose: CampaignPurpose, max_attempts: u32, intervals: Vec<Duration>) -> Self {
        Self {
            purpose,
            max_attempts,
            intervals,
        }
    }

    /// Creates a spec with a single fixed interval between attempts.
    pub fn fixed(purpose: CampaignPurpose, max_attempts: u32, interval: Duration) -> Self {
        Self::new(purpose, max_attempts, vec![interval])
    }
}

/// Drives bounded retry campaigns on background threads.
///
/// The scheduler itself holds no campaign state beyond the live-purpose
/// guard; each campaign's attempt counter lives and dies with its
/// worker thread, so abandoning a campaign at process exit needs no
/// cleanup.
pub struct RetryScheduler {
    clock: Arc<dyn Clock>,
    live: Arc<Mutex<HashMap<CampaignPurpose, Arc<AtomicBool>>>>,
}

impl RetryScheduler {
    /// Creates a scheduler over the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts a campaign on a background thread.
    ///
    /// Returns false without doing anything when a campaign with the
    /// same purpose is still live. The action is invoked up to
    /// `max_attempts` times; once the attempts are exhausted,
    /// `on_exhausted` runs exactly once and the campaign stops.
    pub fn run_campaign<A, E>(&self, spec: CampaignSpec, mut action: A, on_exhausted: E) -> bool
    where
        A: FnMut() -> CampaignStatus + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));

        {
            let mut live = self.live.lock().unwrap();
            if let Some(existing) = live.get(&spec.purpose) {
                if existing.load(Ordering::SeqCst) {
                    tracing::debug!("Campaign {:?} already live, ignoring", spec.purpose);
                    return false;
                }
            }
            live.insert(spec.purpose, running.clone());
        }

        let clock = self.clock.clone();
        let live = self.live.clone();
        let mut on_exhausted = Some(on_exhausted);

        std::thread::spawn(move || {
            let mut attempts: u32 = 0;

            loop {
                if !running.load(Ordering::SeqCst) {
                    tracing::debug!("Campaign {:?} cancelled", spec.purpose);
                    break;
                }

                attempts += 1;
                if action() == CampaignStatus::Complete {
                    tracing::debug!(
                        "Campaign {:?} complete after {} attempt(s)",
                        spec.purpose,
                        attempts
                    );
                    break;
                }

                if attempts >= spec.max_attempts {
                    tracing::debug!(
                        "Campaign {:?} exhausted after {} attempt(s)",
                        spec.purpose,
                        attempts
                    );
                    if let Some(exhausted) = on_exhausted.take() {
                        exhausted();
                    }
                    break;
                }

                let index = (attempts as usize - 1).min(spec.intervals.len().saturating_sub(1));
                let delay = spec.intervals.get(index).copied().unwrap_or(DEFAULT_INTERVAL);
                clock.sleep(delay);
            }

            running.store(false, Ordering::SeqCst);

            // Free the guard slot, unless a newer campaign already took it.
            let mut live = live.lock().unwrap();
            if let Some(current) = live.get(&spec.purpose) {
                if Arc::ptr_eq(current, &running) {
                    live.remove(&spec.purpose);
                }
            }
        });

        true
    }

    /// True while a campaign with the given purpose is live.
    pub fn is_active(&self, purpose: CampaignPurpose) -> bool {
        self.live
            .lock()
            .unwrap()
            .get(&purpose)
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Asks a live campaign to stop.
    ///
    /// Takes effect before the campaign's next attempt; an attempt
    /// already running is allowed to finish.
    pub fn cancel(&self, purpose: CampaignPurpose) {
        if let Some(flag) = self.live.lock().unwrap().get(&purpose) {
            flag.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::mpsc;

    /// Clock whose sleeps return instantly while recording what was
    /// requested, so campaigns run to completion without real waits.
    struct FakeClock {
        base: Instant,
        offset: Mutex<Duration>,
        sleeps: Mutex<Vec<Duration>>,
    }

    impl FakeClock {
        fn new() -> Self {
            Self {
                base: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
                sleeps: Mutex::new(Vec::new()),
            }
        }

        fn recorded_sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().unwrap().clone()
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock().unwrap()
        }

        fn sleep(&self, duration: Duration) {
            *self.offset.lock().unwrap() += duration;
            self.sleeps.lock().unwrap().push(duration);
        }
    }

    /// Waits for the campaign with the given purpose to finish.
    fn wait_until_idle(scheduler: &RetryScheduler, purpose: CampaignPurpose) {
        for _ in 0..200 {
            if !scheduler.is_active(purpose) {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("Campaign {purpose:?} did not finish in time");
    }

    #[test]
    fn test_exhaustion_invokes_handler_exactly_once() {
        let clock = Arc::new(FakeClock::new());
        let scheduler = RetryScheduler::new(clock);

        let attempts = Arc::new(AtomicU32::new(0));
        let exhausted = Arc::new(AtomicU32::new(0));

        let attempts_clone = attempts.clone();
        let exhausted_clone = exhausted.clone();
        let started = scheduler.run_campaign(
            CampaignSpec::fixed(CampaignPurpose::Onboarding, 3, Duration::from_secs(1)),
            move || {
                attempts_clone.fetch_add(1, Ordering::SeqCst);
                CampaignStatus::Pending
            },
            move || {
                exhausted_clone.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert!(started);

        wait_until_idle(&scheduler, CampaignPurpose::Onboarding);

        assert_eq!(attempts.load(Ordering::SeqCst), 3, "Action should run max_attempts times");
        assert_eq!(exhausted.load(Ordering::SeqCst), 1, "Exhaustion handler should run exactly once");
    }

    #[test]
    fn test_success_stops_campaign_early() {
        let clock = Arc::new(FakeClock::new());
        let scheduler = RetryScheduler::new(clock);

        let attempts = Arc::new(AtomicU32::new(0));
        let exhausted = Arc::new(AtomicU32::new(0));

        let attempts_clone = attempts.clone();
        let exhausted_clone = exhausted.clone();
        scheduler.run_campaign(
            CampaignSpec::fixed(CampaignPurpose::Onboarding, 5, Duration::from_secs(1)),
            move || {
                if attempts_clone.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
                    CampaignStatus::Complete
                } else {
                    CampaignStatus::Pending
                }
            },
            move || {
                exhausted_clone.fetch_add(1, Ordering::SeqCst);
            },
        );

        wait_until_idle(&scheduler, CampaignPurpose::Onboarding);

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(exhausted.load(Ordering::SeqCst), 0, "Success should not exhaust");
    }

    #[test]
    fn test_duplicate_purpose_is_noop_while_live() {
        let clock = Arc::new(FakeClock::new());
        let scheduler = RetryScheduler::new(clock);

        let (release_tx, release_rx) = mpsc::channel::<()>();
        let entered = Arc::new(AtomicU32::new(0));

        let entered_clone = entered.clone();
        let started = scheduler.run_campaign(
            CampaignSpec::fixed(CampaignPurpose::LoginConfirmation, 3, Duration::from_secs(1)),
            move || {
                entered_clone.fetch_add(1, Ordering::SeqCst);
                release_rx.recv().ok();
                CampaignStatus::Complete
            },
            || {},
        );
        assert!(started);

        // Wait for the first attempt to begin, then try to start another.
        for _ in 0..200 {
            if entered.load(Ordering::SeqCst) > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(scheduler.is_active(CampaignPurpose::LoginConfirmation));

        let second = scheduler.run_campaign(
            CampaignSpec::fixed(CampaignPurpose::LoginConfirmation, 3, Duration::from_secs(1)),
            || CampaignStatus::Complete,
            || {},
        );
        assert!(!second, "A live purpose should reject a second campaign");

        release_tx.send(()).expect("Failed to release campaign");
        wait_until_idle(&scheduler, CampaignPurpose::LoginConfirmation);

        assert_eq!(entered.load(Ordering::SeqCst), 1, "Second campaign should never have run");

        // Once idle, the purpose is free again.
        let third = scheduler.run_campaign(
            CampaignSpec::fixed(CampaignPurpose::LoginConfirmation, 1, Duration::from_secs(1)),
            || CampaignStatus::Complete,
            || {},
        );
        assert!(third);
        wait_until_idle(&scheduler, CampaignPurpose::LoginConfirmation);
    }

    #[test]
    fn test_interval_sequence_repeats_last_entry() {
        let clock = Arc::new(FakeClock::new());
        let scheduler = RetryScheduler::new(clock.clone());

        scheduler.run_campaign(
            CampaignSpec::new(
                CampaignPurpose::Onboarding,
                4,
                vec![Duration::from_secs(1), Duration::from_secs(5)],
            ),
            || CampaignStatus::Pending,
            || {},
        );

        wait_until_idle(&scheduler, CampaignPurpose::Onboarding);

        // Three waits between four attempts: 1s, then 5s repeating.
        assert_eq!(
            clock.recorded_sleeps(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(5)
            ]
        );
    }

    #[test]
    fn test_no_sleep_after_final_attempt() {
        let clock = Arc::new(FakeClock::new());
        let scheduler = RetryScheduler::new(clock.clone());

        scheduler.run_campaign(
            CampaignSpec::fixed(CampaignPurpose::Onboarding, 1, Duration::from_secs(60)),
            || CampaignStatus::Pending,
            || {},
        );

        wait_until_idle(&scheduler, CampaignPurpose::Onboarding);
        assert!(clock.recorded_sleeps().is_empty(), "A single attempt needs no waits");
    }

    #[test]
    fn test_cancel_stops_before_next_attempt() {
        let clock = Arc::new(FakeClock::new());
        let scheduler = RetryScheduler::new(clock);

        let (release_tx, release_rx) = mpsc::channel::<()>();
        let attempts = Arc::new(AtomicU32::new(0));
        let exhausted = Arc::new(AtomicU32::new(0));

        let attempts_clone = attempts.clone();
        let exhausted_clone = exhausted.clone();
        scheduler.run_campaign(
            CampaignSpec::fixed(CampaignPurpose::Onboarding, 10, Duration::from_secs(1)),
            move || {
                attempts_clone.fetch_add(1, Ordering::SeqCst);
                release_rx.recv().ok();
                CampaignStatus::Pending
            },
            move || {
                exhausted_clone.fetch_add(1, Ordering::SeqCst);
            },
        );

        // Cancel while the first attempt is blocked, then release it.
        for _ in 0..200 {
            if attempts.load(Ordering::SeqCst) > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        scheduler.cancel(CampaignPurpose::Onboarding);
        release_tx.send(()).expect("Failed to release campaign");

        wait_until_idle(&scheduler, CampaignPurpose::Onboarding);

        assert_eq!(attempts.load(Ordering::SeqCst), 1, "No attempt should follow a cancel");
        assert_eq!(exhausted.load(Ordering::SeqCst), 0, "Cancel is not exhaustion");
    }
}
