//! Bounded polling waits over the observation log.
//!
//! A wait repeatedly snapshots the log and stops at the first entry its
//! predicate accepts. The log only grows and predicates are pure, so each
//! poll examines just the entries that arrived since the previous one; the
//! entry reported is still the first match in arrival order.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::HarnessConfig;
use crate::predicate::Predicate;
use crate::recorder::{LogEntry, LogReader, LogSnapshot};
use crate::{Error, Result};

pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl WaitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// A successful wait.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    /// Arrival index of the entry in the log.
    pub index: usize,
    pub entry: Arc<LogEntry>,
    pub elapsed: Duration,
    pub polls: u32,
}

#[derive(Debug, Clone)]
pub struct WaitEngine<C = SystemClock> {
    reader: LogReader,
    clock: C,
    options: WaitOptions,
    diagnostic_tail: usize,
}

impl WaitEngine<SystemClock> {
    pub fn new(reader: LogReader) -> Self {
        Self::with_clock(reader, SystemClock::new())
    }

    pub fn from_config(reader: LogReader, config: &HarnessConfig) -> Self {
        Self::new(reader)
            .with_options(config.wait_options())
            .with_diagnostic_tail(config.diagnostic_tail())
    }
}

impl<C: Clock> WaitEngine<C> {
    pub fn with_clock(reader: LogReader, clock: C) -> Self {
        Self {
            reader,
            clock,
            options: WaitOptions::default(),
            diagnostic_tail: 10,
        }
    }

    pub fn with_options(mut self, options: WaitOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_diagnostic_tail(mut self, count: usize) -> Self {
        self.diagnostic_tail = count;
        self
    }

    pub fn options(&self) -> WaitOptions {
        self.options
    }

    pub fn reader(&self) -> &LogReader {
        &self.reader
    }

    /// Waits with the engine's default options.
    pub fn wait_for<P: Predicate>(&self, predicate: &P) -> Result<Match> {
        self.wait_for_with(predicate, &self.options)
    }

    pub fn wait_for_with<P: Predicate>(
        &self,
        predicate: &P,
        options: &WaitOptions,
    ) -> Result<Match> {
        let started = self.clock.now();
        // A zero interval would spin; one microsecond is below any real tick.
        let tick = options.poll_interval.max(Duration::from_micros(1));
        let mut scanned = 0;
        let mut polls = 0u32;
        debug!(
            predicate = %predicate.describe(),
            timeout_ms = options.timeout.as_millis() as u64,
            "waiting for message"
        );

        loop {
            polls = polls.saturating_add(1);
            let fresh = self.reader.snapshot_from(scanned);
            if let Some((offset, entry)) = fresh.find_shared(|entry| predicate.matches(entry)) {
                let index = scanned + offset;
                let elapsed = self.clock.now().saturating_sub(started);
                debug!(index, polls, elapsed_ms = elapsed.as_millis() as u64, "message matched");
                return Ok(Match {
                    index,
                    entry,
                    elapsed,
                    polls,
                });
            }
            scanned += fresh.len();

            if fresh.dropped() > 0 {
                return Err(Error::LogOverflow {
                    capacity: fresh.capacity().unwrap_or(scanned),
                    dropped: fresh.dropped(),
                });
            }

            let elapsed = self.clock.now().saturating_sub(started);
            if elapsed >= options.timeout {
                let snapshot = self.reader.snapshot();
                warn!(
                    predicate = %predicate.describe(),
                    polls,
                    recorded = snapshot.len(),
                    "wait timed out"
                );
                return Err(self.timeout_error(predicate, options, polls, &snapshot));
            }
            self.clock.sleep(tick.min(options.timeout - elapsed));
        }
    }

    /// Entry count right now; never blocks on pending deliveries.
    pub fn recorded(&self) -> usize {
        self.reader.len()
    }

    fn timeout_error<P: Predicate>(
        &self,
        predicate: &P,
        options: &WaitOptions,
        polls: u32,
        snapshot: &LogSnapshot,
    ) -> Error {
        let first = snapshot.len().saturating_sub(self.diagnostic_tail);
        let recent_entries = snapshot
            .tail(self.diagnostic_tail)
            .iter()
            .enumerate()
            .map(|(offset, entry)| format!("#{} {entry}", first + offset))
            .collect();
        Error::WaitTimeout {
            description: predicate.describe(),
            timeout_ms: options.timeout.as_millis(),
            polls,
            recent_entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::predicate::{EntryFilter, describe};
    use crate::recorder::{MessageEvent, MessageRecorder};
    use serde_json::json;

    const WIDGET: &str = "http://localhost:8001";

    fn metrics(query: &str, total: u64) -> MessageEvent {
        MessageEvent::new(
            WIDGET,
            json!({ "type": "search-metrics", "query": query, "totalResults": total }),
        )
    }

    fn options(timeout_ms: u64, poll_ms: u64) -> WaitOptions {
        WaitOptions::new()
            .with_timeout(Duration::from_millis(timeout_ms))
            .with_poll_interval(Duration::from_millis(poll_ms))
    }

    #[test]
    fn already_satisfied_predicate_returns_on_first_poll() -> Result<()> {
        let recorder = MessageRecorder::new();
        recorder.record(&metrics("playwright", 1));
        let engine = WaitEngine::with_clock(recorder.reader(), ManualClock::new());

        let found = engine.wait_for(&EntryFilter::new().of_type("search-metrics"))?;
        assert_eq!(found.index, 0);
        assert_eq!(found.polls, 1);
        assert_eq!(found.elapsed, Duration::ZERO);
        Ok(())
    }

    #[test]
    fn first_match_in_arrival_order_wins() -> Result<()> {
        let recorder = MessageRecorder::new();
        recorder.record(&MessageEvent::new(WIDGET, json!({ "type": "widget-ready" })));
        recorder.record(&metrics("a", 3));
        recorder.record(&metrics("b", 5));
        let engine = WaitEngine::with_clock(recorder.reader(), ManualClock::new());

        let found = engine.wait_for(&EntryFilter::new().of_type("search-metrics"))?;
        assert_eq!(found.index, 1);
        assert_eq!(found.entry.data["query"], json!("a"));
        Ok(())
    }

    #[test]
    fn repeated_waits_do_not_consume_entries() -> Result<()> {
        let recorder = MessageRecorder::new();
        recorder.record(&metrics("playwright", 2));
        let engine = WaitEngine::with_clock(recorder.reader(), ManualClock::new());
        let filter = EntryFilter::new().of_type("search-metrics");

        let first = engine.wait_for(&filter)?;
        let second = engine.wait_for(&filter)?;
        assert_eq!(first.index, second.index);
        assert_eq!(first.entry, second.entry);
        assert_eq!(engine.recorded(), 1);
        Ok(())
    }

    #[test]
    fn observes_message_delivered_mid_wait_within_one_tick() -> Result<()> {
        let recorder = MessageRecorder::new();
        let sink = recorder.clone();
        let clock = ManualClock::new().on_advance(move |now| {
            if now == Duration::from_millis(35) {
                sink.record(&metrics("late", 1));
            }
        });
        let engine = WaitEngine::with_clock(recorder.reader(), clock.clone());

        // wait starts at 5ms, so polls run at 5, 15, 25 and 35
        clock.advance(Duration::from_millis(5));
        let found = engine.wait_for_with(
            &EntryFilter::new().field_eq("query", "late"),
            &options(1_000, 10),
        )?;
        assert_eq!(found.polls, 4);
        assert_eq!(found.elapsed, Duration::from_millis(30));
        Ok(())
    }

    #[test]
    fn timeout_fires_at_deadline_not_before() {
        let recorder = MessageRecorder::new();
        recorder.record(&MessageEvent::new(WIDGET, json!({ "type": "widget-ready" })));
        let clock = ManualClock::new();
        let engine = WaitEngine::with_clock(recorder.reader(), clock.clone());

        let err = engine
            .wait_for_with(&EntryFilter::new().of_type("result-selected"), &options(95, 10))
            .expect_err("nothing matches");
        assert_eq!(clock.now(), Duration::from_millis(95));
        match err {
            Error::WaitTimeout {
                description,
                timeout_ms,
                polls,
                recent_entries,
            } => {
                assert_eq!(description, "result-selected message");
                assert_eq!(timeout_ms, 95);
                // polls at 0, 10, ..., 90 and a final one at 95
                assert_eq!(polls, 11);
                assert_eq!(recent_entries.len(), 1);
                assert!(recent_entries[0].starts_with("#0 http://localhost:8001"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn zero_timeout_polls_exactly_once() {
        let engine = WaitEngine::with_clock(MessageRecorder::new().reader(), ManualClock::new());
        let err = engine
            .wait_for_with(&describe("never", |_: &LogEntry| false), &options(0, 10))
            .expect_err("timeout");
        assert!(matches!(err, Error::WaitTimeout { polls: 1, .. }));
    }

    #[test]
    fn diagnostic_tail_limits_reported_entries() {
        let recorder = MessageRecorder::new();
        for n in 0..20 {
            recorder.record(&metrics(&format!("q{n}"), n));
        }
        let engine = WaitEngine::with_clock(recorder.reader(), ManualClock::new())
            .with_diagnostic_tail(3);
        let err = engine
            .wait_for_with(&EntryFilter::new().of_type("result-selected"), &options(20, 10))
            .expect_err("timeout");
        let Error::WaitTimeout { recent_entries, .. } = err else {
            panic!("expected timeout");
        };
        assert_eq!(recent_entries.len(), 3);
        assert!(recent_entries[0].starts_with("#17 "));
        assert!(recent_entries[2].contains("\"q19\""));
    }

    #[test]
    fn overflow_fails_loudly_instead_of_timing_out() {
        let recorder = MessageRecorder::with_capacity(Some(1));
        recorder.record(&metrics("kept", 1));
        recorder.record(&metrics("dropped", 1));
        let engine = WaitEngine::with_clock(recorder.reader(), ManualClock::new());

        let err = engine
            .wait_for_with(&EntryFilter::new().field_eq("query", "dropped"), &options(1_000, 10))
            .expect_err("overflow");
        assert_eq!(
            err,
            Error::LogOverflow {
                capacity: 1,
                dropped: 1
            }
        );
        // retained entries still match
        assert!(
            engine
                .wait_for(&EntryFilter::new().field_eq("query", "kept"))
                .is_ok()
        );
    }

    #[test]
    fn real_clock_sees_message_from_another_thread() -> Result<()> {
        let recorder = MessageRecorder::new();
        let listener = recorder.listener();
        let engine = WaitEngine::new(recorder.reader()).with_options(options(5_000, 2));

        let sender = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            listener(&metrics("threaded", 4));
        });
        let found = engine.wait_for(&EntryFilter::new().field_eq("query", "threaded"))?;
        sender.join().expect("sender thread");
        assert!(found.elapsed >= Duration::from_millis(30));
        assert_eq!(found.entry.data["totalResults"], json!(4));
        Ok(())
    }
}
