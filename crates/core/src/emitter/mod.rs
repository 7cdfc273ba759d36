//! Real-time playback of a timeline over a transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::transport::Transport;
use crate::{Event, Payload, Timeline, ABORT_USER_INTERRUPT};

/// Longest single sleep; bounds how late a cancellation is noticed.
pub const MAX_SLEEP_SLICE: Duration = Duration::from_millis(100);

/// One-way cancellation flag shared with whoever may interrupt a run.
/// Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterState {
    Idle,
    Preparing,
    Playing,
    Completed,
    Aborted,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EmitOutcome {
    /// Every event up to and including track.end was handed to the transport.
    Completed { sent: usize },
    /// Cancelled; `at` is the timestamp carried by the track.abort event.
    Aborted { at: f64, sent: usize },
}

impl EmitOutcome {
    pub fn is_aborted(&self) -> bool {
        matches!(self, EmitOutcome::Aborted { .. })
    }
}

/// Optional pre-roll announced before playback starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Preroll {
    /// Canonical path of the source, carried by track.prepare.
    pub filename: String,
    pub seconds: f64,
}

pub struct Emitter<'a> {
    transport: &'a mut dyn Transport,
    token: CancellationToken,
    preroll: Option<Preroll>,
    state: EmitterState,
    sent: usize,
    failed: usize,
}

impl<'a> Emitter<'a> {
    pub fn new(transport: &'a mut dyn Transport, token: CancellationToken) -> Self {
        Self {
            transport,
            token,
            preroll: None,
            state: EmitterState::Idle,
            sent: 0,
            failed: 0,
        }
    }

    /// Announces the track `seconds` ahead of playback. Zero (or a
    /// non-finite value) disables it.
    pub fn with_preroll(mut self, filename: impl Into<String>, seconds: f64) -> Self {
        self.preroll = (seconds > 0.0 && seconds.is_finite()).then(|| Preroll {
            filename: filename.into(),
            seconds,
        });
        self
    }

    pub fn state(&self) -> EmitterState {
        self.state
    }

    /// Plays `timeline` in real time. Blocks until track.end went out or the
    /// token was cancelled.
    pub fn run(&mut self, timeline: &Timeline) -> EmitOutcome {
        if let Some(preroll) = self.preroll.clone() {
            self.state = EmitterState::Preparing;
            let at = -preroll.seconds;
            info!(countdown = preroll.seconds, "announcing track");
            self.deliver(&Event::new(
                at,
                Payload::TrackPrepare {
                    filename: preroll.filename,
                    countdown: preroll.seconds,
                },
            ));

            let deadline = Instant::now() + Duration::from_secs_f64(preroll.seconds);
            if !self.wait_until(deadline) {
                return self.abort(at);
            }
        }

        self.state = EmitterState::Playing;
        let reference = Instant::now();
        info!(events = timeline.len(), "playback started");

        for event in timeline {
            let target = reference + Duration::from_secs_f64(event.timestamp.max(0.0));
            if !self.wait_until(target) {
                return self.abort(event.timestamp);
            }
            self.deliver(event);
        }

        self.state = EmitterState::Completed;
        info!(sent = self.sent, failed = self.failed, "playback complete");
        EmitOutcome::Completed { sent: self.sent }
    }

    /// Sleeps in bounded slices until `target`. Returns false as soon as
    /// cancellation is observed, including before the first slice.
    fn wait_until(&self, target: Instant) -> bool {
        loop {
            if self.token.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= target {
                return true;
            }
            thread::sleep((target - now).min(MAX_SLEEP_SLICE));
        }
    }

    fn abort(&mut self, at: f64) -> EmitOutcome {
        info!(at, "interrupted, sending track.abort");
        self.deliver(&Event::new(
            at,
            Payload::TrackAbort {
                reason: ABORT_USER_INTERRUPT.to_string(),
            },
        ));
        self.state = EmitterState::Aborted;
        EmitOutcome::Aborted {
            at,
            sent: self.sent,
        }
    }

    fn deliver(&mut self, event: &Event) {
        let bytes = match event.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, category = event.category().name(), "cannot encode event");
                self.failed += 1;
                return;
            }
        };

        match self.transport.send(&bytes) {
            Ok(()) => {
                trace!(timestamp = event.timestamp, category = event.category().name(), "sent");
                self.sent += 1;
            }
            Err(err) => {
                warn!(error = %err, category = event.category().name(), "send failed");
                self.failed += 1;
            }
        }
        if event.is_terminal() {
            debug!(sent = self.sent, failed = self.failed, "terminal event delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use crate::EventCategory;

    fn timeline(times: &[f64]) -> Timeline {
        let mut events = vec![Event::new(
            0.0,
            Payload::TrackStart {
                filename: "song.wav".into(),
                duration: *times.last().unwrap_or(&0.0),
                sample_rate: 44_100,
                channels: 1,
            },
        )];
        events.extend(
            times[..times.len() - 1]
                .iter()
                .map(|t| Event::new(*t, Payload::Beat { confidence: None })),
        );
        events.push(Event::new(*times.last().unwrap(), Payload::TrackEnd));
        Timeline::from_events(events)
    }

    #[test]
    fn completes_and_sends_everything_in_order() {
        let transport = MemoryTransport::new();
        let mut sink = transport.clone();
        let timeline = timeline(&[0.01, 0.02, 0.05]);

        let outcome = Emitter::new(&mut sink, CancellationToken::new()).run(&timeline);

        assert_eq!(outcome, EmitOutcome::Completed { sent: 4 });
        assert_eq!(transport.events(), timeline.events());
    }

    #[test]
    fn cancellation_between_events_sends_one_abort() {
        let transport = MemoryTransport::new();
        let mut sink = transport.clone();
        let timeline = timeline(&[0.05, 0.6, 1.0]);
        let token = CancellationToken::new();

        let trigger = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(250));
            trigger.cancel();
        });
        let mut emitter = Emitter::new(&mut sink, token);
        let outcome = emitter.run(&timeline);
        canceller.join().unwrap();

        assert_eq!(emitter.state(), EmitterState::Aborted);
        assert_eq!(outcome, EmitOutcome::Aborted { at: 0.6, sent: 3 });

        let sent = transport.events();
        let categories: Vec<_> = sent.iter().map(Event::category).collect();
        assert_eq!(
            categories,
            vec![
                EventCategory::TrackStart,
                EventCategory::Beat,
                EventCategory::TrackAbort
            ]
        );
        assert_eq!(
            sent[2].payload,
            Payload::TrackAbort {
                reason: ABORT_USER_INTERRUPT.into()
            }
        );
    }

    #[test]
    fn cancellation_is_noticed_within_one_sleep_slice() {
        let mut sink = MemoryTransport::new();
        let timeline = timeline(&[0.01, 5.0]);
        let token = CancellationToken::new();

        let trigger = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });
        let started = Instant::now();
        let outcome = Emitter::new(&mut sink, token).run(&timeline);
        let elapsed = started.elapsed();
        canceller.join().unwrap();

        assert_eq!(outcome, EmitOutcome::Aborted { at: 5.0, sent: 3 });
        assert!(
            elapsed < Duration::from_millis(200) + MAX_SLEEP_SLICE + Duration::from_millis(150),
            "run took {elapsed:?}"
        );
    }

    #[test]
    fn cancellation_during_preroll_never_starts_playback() {
        let transport = MemoryTransport::new();
        let mut sink = transport.clone();
        let token = CancellationToken::new();
        token.cancel();

        let outcome = Emitter::new(&mut sink, token)
            .with_preroll("/music/song.wav", 2.0)
            .run(&timeline(&[0.5, 1.0]));

        assert_eq!(outcome, EmitOutcome::Aborted { at: -2.0, sent: 2 });
        let sent = transport.events();
        assert_eq!(
            sent[0],
            Event::new(
                -2.0,
                Payload::TrackPrepare {
                    filename: "/music/song.wav".into(),
                    countdown: 2.0
                }
            )
        );
        assert_eq!(sent[1].timestamp, -2.0);
        assert_eq!(sent[1].category(), EventCategory::TrackAbort);
    }

    #[test]
    fn preroll_precedes_playback() {
        let transport = MemoryTransport::new();
        let mut sink = transport.clone();

        let started = Instant::now();
        let outcome = Emitter::new(&mut sink, CancellationToken::new())
            .with_preroll("song.wav", 0.15)
            .run(&timeline(&[0.01, 0.02]));

        assert!(started.elapsed() >= Duration::from_millis(150));
        assert!(!outcome.is_aborted());
        let categories: Vec<_> = transport.events().iter().map(Event::category).collect();
        assert_eq!(categories[0], EventCategory::TrackPrepare);
        assert_eq!(categories.last(), Some(&EventCategory::TrackEnd));
    }

    #[test]
    fn transport_failures_do_not_stop_playback() {
        let mut sink = MemoryTransport::failing();
        let mut emitter = Emitter::new(&mut sink, CancellationToken::new());
        let outcome = emitter.run(&timeline(&[0.01, 0.02]));

        assert_eq!(outcome, EmitOutcome::Completed { sent: 0 });
        assert_eq!(emitter.state(), EmitterState::Completed);
    }
}
