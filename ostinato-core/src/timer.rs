//! Tempo registry and the tempo-elastic wait primitive.
//!
//! The `TempoMap` is the append-only history of `(time, tempo, cycle length)`
//! entries shared between the engine thread and scene timers. A `Timer` polls
//! the shared clock at the tick period, so every wait resolves within one
//! period of its target — never exactly on it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

use crate::clock::SharedClock;

const NS_PER_SEC: f64 = 1_000_000_000.0;

/// Unit for wait durations and animation lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeMode {
    Beats,
    Seconds,
    Nanoseconds,
}

/// A scene wait was interrupted by a restart or stop signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scene wait cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// One immutable point in the tempo history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoMapEntry {
    pub time_ns: u64,
    pub tempo: f64,
    pub cycle_length: f64,
}

/// Append-only tempo history plus lock-free snapshots of the current tempo
/// and cycle length (f64 bits in atomics, so timers can poll without taking
/// the entry lock).
#[derive(Debug)]
pub struct TempoMap {
    tempo_bits: AtomicU64,
    cycle_bits: AtomicU64,
    entries: RwLock<Vec<TempoMapEntry>>,
}

impl TempoMap {
    pub fn new(tempo: f64, cycle_length: f64, start_ns: u64) -> Arc<TempoMap> {
        let tempo = tempo.max(0.001);
        Arc::new(TempoMap {
            tempo_bits: AtomicU64::new(tempo.to_bits()),
            cycle_bits: AtomicU64::new(cycle_length.to_bits()),
            entries: RwLock::new(vec![TempoMapEntry {
                time_ns: start_ns,
                tempo,
                cycle_length,
            }]),
        })
    }

    /// Current tempo in beats per minute.
    pub fn tempo(&self) -> f64 {
        f64::from_bits(self.tempo_bits.load(Ordering::Acquire))
    }

    /// Current cycle (measure) length in beats.
    pub fn cycle_length(&self) -> f64 {
        f64::from_bits(self.cycle_bits.load(Ordering::Acquire))
    }

    /// Append a tempo change. Equal tempo is a no-op.
    pub fn set_tempo(&self, now_ns: u64, bpm: f64) {
        let bpm = bpm.max(0.001);
        if bpm == self.tempo() {
            return;
        }
        let mut entries = self.entries.write().expect("tempo map poisoned");
        entries.push(TempoMapEntry {
            time_ns: now_ns,
            tempo: bpm,
            cycle_length: self.cycle_length(),
        });
        self.tempo_bits.store(bpm.to_bits(), Ordering::Release);
    }

    /// Append a cycle-length change. Equal length is a no-op.
    pub fn set_cycle_length(&self, now_ns: u64, beats: f64) {
        let beats = beats.max(0.001);
        if beats == self.cycle_length() {
            return;
        }
        let mut entries = self.entries.write().expect("tempo map poisoned");
        entries.push(TempoMapEntry {
            time_ns: now_ns,
            tempo: self.tempo(),
            cycle_length: beats,
        });
        self.cycle_bits.store(beats.to_bits(), Ordering::Release);
    }

    pub fn entries(&self) -> Vec<TempoMapEntry> {
        self.entries.read().expect("tempo map poisoned").clone()
    }

    /// Beats elapsed since engine start, integrated segment by segment across
    /// every tempo change. The open final segment runs to `now_ns`.
    pub fn beats_at(&self, now_ns: u64) -> f64 {
        self.integrate(now_ns, |e| e.tempo)
    }

    /// Whole-cycle count since engine start: each segment contributes its
    /// beats divided by that segment's cycle length.
    pub fn cycles_at(&self, now_ns: u64) -> f64 {
        self.integrate(now_ns, |e| e.tempo / e.cycle_length)
    }

    fn integrate(&self, now_ns: u64, rate: impl Fn(&TempoMapEntry) -> f64) -> f64 {
        let entries = self.entries.read().expect("tempo map poisoned");
        let mut total = 0.0;
        for (i, entry) in entries.iter().enumerate() {
            let segment_end = match entries.get(i + 1) {
                Some(next) => next.time_ns,
                None => now_ns,
            };
            let elapsed = segment_end.saturating_sub(entry.time_ns) as f64 / NS_PER_SEC;
            total += elapsed / 60.0 * rate(entry);
        }
        total
    }
}

/// Tempo-elastic wait primitive. One per running scene.
///
/// All waits poll the shared clock at the tick period and therefore resolve
/// with tick-period granularity. A beat-relative wait observes tempo changes
/// at every poll and rescales its remaining duration so the remaining beat
/// count stays fixed.
pub struct Timer {
    clock: SharedClock,
    tempo_map: Arc<TempoMap>,
    cancel: Arc<AtomicBool>,
    period: Duration,
    period_ns: u64,
    start_time: u64,
    end_time: u64,
    tempo: f64,
    is_beat_waiting: bool,
}

impl Timer {
    pub fn new(
        clock: SharedClock,
        tempo_map: Arc<TempoMap>,
        cancel: Arc<AtomicBool>,
        period: Duration,
    ) -> Timer {
        let start_time = clock.now();
        let tempo = tempo_map.tempo();
        Timer {
            clock,
            tempo_map,
            cancel,
            period,
            period_ns: period.as_nanos() as u64,
            start_time,
            end_time: start_time,
            tempo,
            is_beat_waiting: false,
        }
    }

    /// Re-baseline the timer; called when its scene restarts.
    pub fn reset(&mut self) {
        self.start_time = self.clock.now();
        self.end_time = self.start_time;
        self.tempo = self.tempo_map.tempo();
        self.is_beat_waiting = false;
    }

    /// Wait for `duration` in the given mode. Consecutive waits rebase on the
    /// previous target time, so they do not accumulate drift.
    pub fn wait(&mut self, duration: f64, mode: TimeMode) -> Result<(), Cancelled> {
        let duration_ns = match mode {
            TimeMode::Beats => duration * 60.0 / self.tempo * NS_PER_SEC,
            TimeMode::Seconds => duration * NS_PER_SEC,
            TimeMode::Nanoseconds => duration,
        };
        self.end_time = self.start_time + duration_ns.max(0.0) as u64;
        self.is_beat_waiting = mode == TimeMode::Beats;

        loop {
            if self.cancel.load(Ordering::Relaxed) {
                self.is_beat_waiting = false;
                return Err(Cancelled);
            }
            self.observe_tempo();
            if self.clock.now() + self.period_ns >= self.end_time {
                break;
            }
            thread::sleep(self.period);
        }

        self.is_beat_waiting = false;
        self.start_time = self.end_time;
        Ok(())
    }

    /// Wait until the integer beat count changes, then rebase on now.
    pub fn wait_next_beat(&mut self) -> Result<(), Cancelled> {
        let start_beat = self.current_beat();
        while self.current_beat() == start_beat {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(Cancelled);
            }
            thread::sleep(self.period);
        }
        self.start_time = self.clock.now();
        Ok(())
    }

    /// Wait until the integer cycle count changes, then rebase on now.
    pub fn wait_next_cycle(&mut self) -> Result<(), Cancelled> {
        let start_cycle = self.current_cycle();
        while self.current_cycle() == start_cycle {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(Cancelled);
            }
            thread::sleep(self.period);
        }
        self.start_time = self.clock.now();
        Ok(())
    }

    /// Integer beat count since engine start.
    pub fn current_beat(&self) -> i64 {
        self.tempo_map.beats_at(self.clock.now()).floor() as i64
    }

    /// Integer cycle count since engine start.
    pub fn current_cycle(&self) -> i64 {
        self.tempo_map.cycles_at(self.clock.now()).floor() as i64
    }

    fn observe_tempo(&mut self) {
        let tempo = self.tempo_map.tempo();
        if tempo != self.tempo {
            self.update_tempo(tempo);
        }
    }

    /// Rescale the remaining wait so the remaining beat count survives a
    /// tempo change; remaining wall-time stretches by `old/new`.
    fn update_tempo(&mut self, new_tempo: f64) {
        if self.is_beat_waiting {
            let now = self.clock.now();
            let remaining = self.end_time.saturating_sub(now) as f64;
            self.end_time = now + (remaining * self.tempo / new_tempo) as u64;
        }
        self.tempo = new_tempo;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;

    const SEC: u64 = 1_000_000_000;

    #[test]
    fn beats_integrate_across_tempo_changes() {
        // 10s at 120bpm = 20 beats, plus 10s at 60bpm = 10 beats: 30 total.
        let map = TempoMap::new(120.0, 8.0, 0);
        map.set_tempo(10 * SEC, 60.0);
        assert!((map.beats_at(20 * SEC) - 30.0).abs() < 1e-9);
    }

    #[test]
    fn cycles_integrate_with_cycle_length() {
        let map = TempoMap::new(120.0, 8.0, 0);
        map.set_tempo(10 * SEC, 60.0);
        // 20 beats / 8 + 10 beats / 8 = 3.75 cycles.
        assert!((map.cycles_at(20 * SEC) - 3.75).abs() < 1e-9);
    }

    #[test]
    fn cycle_length_change_splits_segments() {
        let map = TempoMap::new(120.0, 4.0, 0);
        map.set_cycle_length(10 * SEC, 8.0);
        // 10s at 120bpm/4 = 5 cycles, then 10s at 120bpm/8 = 2.5 cycles.
        assert!((map.cycles_at(20 * SEC) - 7.5).abs() < 1e-9);
    }

    #[test]
    fn equal_tempo_appends_nothing() {
        let map = TempoMap::new(120.0, 8.0, 0);
        map.set_tempo(SEC, 120.0);
        assert_eq!(map.entries().len(), 1);
    }

    #[test]
    fn beat_wait_rescales_on_tempo_change() {
        let clock = Clock::new();
        let map = TempoMap::new(120.0, 8.0, 0);
        let cancel = Arc::new(AtomicBool::new(false));
        let mut timer = Timer::new(clock.clone(), map.clone(), cancel, Duration::from_millis(1));

        // Simulate a 4-beat wait at 120bpm (2s) half elapsed: 2 beats remain.
        timer.start_time = 0;
        timer.end_time = 2 * SEC;
        timer.is_beat_waiting = true;
        clock.advance_to(SEC);

        // Tempo drops to 60: remaining wall-time doubles (1s -> 2s), the
        // remaining beat count stays 2.
        timer.update_tempo(60.0);
        assert_eq!(timer.end_time, 3 * SEC);
        let remaining_beats = (timer.end_time - SEC) as f64 / 1e9 / 60.0 * 60.0;
        assert!((remaining_beats - 2.0).abs() < 1e-9);
    }

    #[test]
    fn seconds_wait_ignores_tempo() {
        let clock = Clock::new();
        let map = TempoMap::new(120.0, 8.0, 0);
        let cancel = Arc::new(AtomicBool::new(false));
        let mut timer = Timer::new(clock.clone(), map.clone(), cancel, Duration::from_millis(1));
        timer.start_time = 0;
        timer.end_time = 2 * SEC;
        timer.is_beat_waiting = false;
        timer.update_tempo(60.0);
        assert_eq!(timer.end_time, 2 * SEC);
    }

    #[test]
    fn current_beat_floors() {
        let clock = Clock::new();
        let map = TempoMap::new(60.0, 4.0, 0);
        let cancel = Arc::new(AtomicBool::new(false));
        let timer = Timer::new(clock.clone(), map, cancel, Duration::from_millis(1));
        clock.advance_to(SEC + SEC / 2);
        assert_eq!(timer.current_beat(), 1);
    }
}
