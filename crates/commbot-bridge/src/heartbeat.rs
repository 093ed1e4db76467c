//! Heartbeats and crash counters. The health supervisor reads nothing else.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};

/// Worker execution style. Each style has its own crash counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrashKind {
    /// Blocking feed workers on dedicated OS threads.
    Thread,
    /// Tasks on the shared async runtime.
    Cooperative,
}

impl std::fmt::Display for CrashKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CrashKind::Thread => write!(f, "thread"),
            CrashKind::Cooperative => write!(f, "cooperative"),
        }
    }
}

/// Worker name → last time it completed a pass.
#[derive(Debug, Default)]
pub struct HeartbeatRegistry {
    beats: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl HeartbeatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `worker` is alive right now.
    pub fn beat(&self, worker: &str) {
        self.beat_at(worker, Utc::now());
    }

    pub fn beat_at(&self, worker: &str, at: DateTime<Utc>) {
        let mut beats = self.beats.write().unwrap_or_else(|p| p.into_inner());
        beats.insert(worker.to_string(), at);
    }

    pub fn last_seen(&self, worker: &str) -> Option<DateTime<Utc>> {
        let beats = self.beats.read().unwrap_or_else(|p| p.into_inner());
        beats.get(worker).copied()
    }

    pub fn snapshot(&self) -> HashMap<String, DateTime<Utc>> {
        self.beats.read().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct CounterState {
    count: u32,
    last_crash: Option<DateTime<Utc>>,
}

/// Running count of unclassified failures per worker style.
#[derive(Debug, Default)]
pub struct CrashCounters {
    thread: Mutex<CounterState>,
    cooperative: Mutex<CounterState>,
}

impl CrashCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, kind: CrashKind) -> &Mutex<CounterState> {
        match kind {
            CrashKind::Thread => &self.thread,
            CrashKind::Cooperative => &self.cooperative,
        }
    }

    /// Count one crash and return the new total.
    pub fn record(&self, kind: CrashKind) -> u32 {
        let mut state = self.slot(kind).lock().unwrap_or_else(|p| p.into_inner());
        state.count += 1;
        state.last_crash = Some(Utc::now());
        state.count
    }

    pub fn count(&self, kind: CrashKind) -> u32 {
        self.slot(kind).lock().unwrap_or_else(|p| p.into_inner()).count
    }

    pub fn last_crash(&self, kind: CrashKind) -> Option<DateTime<Utc>> {
        self.slot(kind)
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .last_crash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_overwrites() {
        let hb = HeartbeatRegistry::new();
        assert!(hb.last_seen("sink:alerts").is_none());
        let t0 = Utc::now() - chrono::Duration::seconds(100);
        hb.beat_at("sink:alerts", t0);
        assert_eq!(hb.last_seen("sink:alerts"), Some(t0));
        hb.beat("sink:alerts");
        assert!(hb.last_seen("sink:alerts").unwrap() > t0);
        assert_eq!(hb.snapshot().len(), 1);
    }

    #[test]
    fn test_crash_counters_independent() {
        let crashes = CrashCounters::new();
        assert_eq!(crashes.record(CrashKind::Thread), 1);
        assert_eq!(crashes.record(CrashKind::Thread), 2);
        assert_eq!(crashes.count(CrashKind::Cooperative), 0);
        assert!(crashes.last_crash(CrashKind::Thread).is_some());
        assert!(crashes.last_crash(CrashKind::Cooperative).is_none());
    }
}
