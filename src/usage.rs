//! Per-credential token accounting over sliding time windows.
//!
//! Every successful upstream exchange records one entry per window (minute,
//! hour, day). Entries expire by falling off the front of a per-credential
//! deque: writes and reads prune anything older than the window's horizon,
//! and a background sweeper prunes idle credentials so their memory is
//! reclaimed even when no traffic arrives.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// How often the background sweeper prunes idle credentials.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Flat token totals pulled out of an upstream response or stream event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Request/token counts inside one sliding window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub requests: u64,
    pub tokens: u64,
}

/// Everything the usage report shows for one credential.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeySnapshot {
    pub total_tokens: u64,
    pub total_requests: u64,
    pub minute: WindowSnapshot,
    pub hour: WindowSnapshot,
    pub day: WindowSnapshot,
}

#[derive(Default)]
struct Totals {
    tokens: u64,
    requests: u64,
}

/// One sliding window over all credentials. Deques hold `(tokens, at)` in
/// arrival order, so pruning only ever pops from the front.
struct Window {
    horizon: Duration,
    entries: HashMap<String, VecDeque<(u64, Instant)>>,
}

impl Window {
    fn new(horizon: Duration) -> Self {
        Window {
            horizon,
            entries: HashMap::new(),
        }
    }

    fn record(&mut self, key: &str, tokens: u64, now: Instant) {
        let log = self.entries.entry(key.to_string()).or_default();
        Self::prune(log, self.horizon, now);
        log.push_back((tokens, now));
    }

    fn snapshot(&mut self, key: &str, now: Instant) -> WindowSnapshot {
        let Some(log) = self.entries.get_mut(key) else {
            return WindowSnapshot::default();
        };
        Self::prune(log, self.horizon, now);
        if log.is_empty() {
            self.entries.remove(key);
            return WindowSnapshot::default();
        }
        WindowSnapshot {
            requests: log.len() as u64,
            tokens: log.iter().map(|(tokens, _)| tokens).sum(),
        }
    }

    fn sweep(&mut self, now: Instant) {
        let horizon = self.horizon;
        self.entries.retain(|_, log| {
            Self::prune(log, horizon, now);
            !log.is_empty()
        });
    }

    fn prune(log: &mut VecDeque<(u64, Instant)>, horizon: Duration, now: Instant) {
        while let Some((_, at)) = log.front() {
            if now.duration_since(*at) >= horizon {
                log.pop_front();
            } else {
                break;
            }
        }
    }
}

struct Inner {
    /// Cumulative per-credential totals, kept for the process lifetime.
    totals: HashMap<String, Totals>,
    minute: Window,
    hour: Window,
    day: Window,
}

pub struct UsageTracker {
    inner: Mutex<Inner>,
}

impl UsageTracker {
    pub fn new() -> Self {
        UsageTracker {
            inner: Mutex::new(Inner {
                totals: HashMap::new(),
                minute: Window::new(MINUTE),
                hour: Window::new(HOUR),
                day: Window::new(DAY),
            }),
        }
    }

    /// Records one completed exchange for a credential.
    pub async fn record(&self, key: &str, tokens: u64) {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let totals = inner.totals.entry(key.to_string()).or_default();
        totals.tokens += tokens;
        totals.requests += 1;
        inner.minute.record(key, tokens, now);
        inner.hour.record(key, tokens, now);
        inner.day.record(key, tokens, now);
    }

    /// Current view of one credential, pruning expired entries on the way.
    pub async fn snapshot(&self, key: &str) -> KeySnapshot {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let (total_tokens, total_requests) = inner
            .totals
            .get(key)
            .map(|t| (t.tokens, t.requests))
            .unwrap_or((0, 0));
        KeySnapshot {
            total_tokens,
            total_requests,
            minute: inner.minute.snapshot(key, now),
            hour: inner.hour.snapshot(key, now),
            day: inner.day.snapshot(key, now),
        }
    }

    /// Drops expired entries for every credential, including idle ones.
    pub async fn sweep(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        inner.minute.sweep(now);
        inner.hour.sweep(now);
        inner.day.sweep(now);
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodically sweeps the tracker so idle credentials do not pin expired
/// entries in memory.
pub fn spawn_sweeper(tracker: Arc<UsageTracker>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            tracker.sweep().await;
            debug!("usage windows swept");
        }
    })
}

/// Pulls token usage out of a buffered response body. Understands both
/// schemas: a `usage.total_tokens` field wins, otherwise
/// `input_tokens`/`output_tokens` are summed.
pub fn usage_from_response(body: &Value) -> Option<TokenUsage> {
    let usage = body.get("usage")?;
    if let Some(total) = usage.get("total_tokens").and_then(Value::as_u64) {
        return Some(TokenUsage {
            total_tokens: total,
            prompt_tokens: field(usage, "prompt_tokens"),
            completion_tokens: field(usage, "completion_tokens"),
        });
    }
    if usage.get("input_tokens").is_some() || usage.get("output_tokens").is_some() {
        let input = field(usage, "input_tokens");
        let output = field(usage, "output_tokens");
        return Some(TokenUsage {
            total_tokens: input + output,
            prompt_tokens: input,
            completion_tokens: output,
        });
    }
    None
}

/// Scans a raw SSE chunk (one or more `data:` lines) for token usage. The
/// flat format reports it on the final chunk, the blocks format on
/// `message_delta` events. Returns the first hit.
pub fn usage_from_chunk(chunk: &str) -> Option<TokenUsage> {
    for line in chunk.lines() {
        let Some(payload) = line.strip_prefix("data: ") else {
            continue;
        };
        if payload.trim() == "[DONE]" {
            continue;
        }
        let Ok(event) = serde_json::from_str::<Value>(payload) else {
            continue;
        };
        if let Some(usage) = event.get("usage")
            && usage.get("total_tokens").is_some()
        {
            return usage_from_response(&event);
        }
        if event.get("type").and_then(Value::as_str) == Some("message_delta")
            && event.get("usage").is_some()
        {
            return usage_from_response(&event);
        }
    }
    None
}

fn field(usage: &Value, name: &str) -> u64 {
    usage.get(name).and_then(Value::as_u64).unwrap_or(0)
}
