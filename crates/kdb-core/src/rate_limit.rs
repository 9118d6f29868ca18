//! Client-side request gate: a cooldown between requests plus a daily cap.
//!
//! All state lives in a [`KeyValueStore`]; the gate itself only carries its
//! configuration and the timezone used to decide what "today" is. Callers
//! pass the current time in epoch milliseconds so every operation is
//! deterministic.
//!
//! `check_allowed` and `record_usage` are separate steps. Nothing stops a
//! caller from recording without checking first; [`RateLimitGate::try_acquire`]
//! fuses the two for callers that want that guarantee.

use std::fmt::Display;
use std::time::Duration;

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};

use crate::store::KeyValueStore;

/// Store key holding the last request time (epoch millis, decimal).
pub const LAST_REQUEST_KEY: &str = "kdb_last_request_time";

/// Store key holding the JSON-encoded [`DailyUsage`].
pub const DAILY_USAGE_KEY: &str = "kdb_daily_usage";

/// Countdown text shown once the cooldown has elapsed.
pub const READY_MARKER: &str = "利用可能";

/// Calendar-day identifier format, e.g. `Sat Oct 17 2026`.
const DAY_FORMAT: &str = "%a %b %d %Y";

/// Gate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Minimum time between two recorded requests.
    pub cooldown: Duration,
    /// Requests allowed per calendar day.
    pub daily_limit: u32,
}

impl RateLimitConfig {
    pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(120);
    pub const DEFAULT_DAILY_LIMIT: u32 = 5;

    fn cooldown_millis(&self) -> i64 {
        i64::try_from(self.cooldown.as_millis()).unwrap_or(i64::MAX)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            cooldown: Self::DEFAULT_COOLDOWN,
            daily_limit: Self::DEFAULT_DAILY_LIMIT,
        }
    }
}

/// Requests made on one calendar day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub date: String,
    pub count: u32,
}

/// Everything the gate persists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageRecord {
    /// Epoch millis of the last recorded request; 0 means never.
    pub last_used_at_millis: i64,
    pub daily_usage: DailyUsage,
}

/// Result of [`RateLimitGate::check_allowed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Present whenever `allowed` is false; shown to the user verbatim.
    pub reason: Option<String>,
    /// Seconds until the cooldown ends, when that is what blocked the request.
    pub wait_seconds: Option<u64>,
}

impl RateLimitDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            wait_seconds: None,
        }
    }

    fn daily_limit_reached(limit: u32) -> Self {
        Self {
            allowed: false,
            reason: Some(format!(
                "本日の利用上限（{limit}回）に達しました。明日また利用してください。"
            )),
            wait_seconds: None,
        }
    }

    fn cooling_down(remaining_secs: u64) -> Self {
        let (minutes, seconds) = split_minutes(remaining_secs);
        Self {
            allowed: false,
            reason: Some(format!(
                "連続リクエスト防止のため、あと{minutes}分{seconds}秒お待ちください。"
            )),
            wait_seconds: Some(remaining_secs),
        }
    }
}

/// Snapshot returned by [`RateLimitGate::describe_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageStatus {
    /// Requests counted for today.
    pub count: u32,
    /// Whether the cooldown has elapsed.
    pub ready: bool,
    /// [`READY_MARKER`] or a `<m>分<SS>秒` countdown.
    pub countdown_text: String,
}

/// Cooldown and daily-cap policy over a key-value store.
#[derive(Debug)]
pub struct RateLimitGate<S, Tz: TimeZone = Local> {
    store: S,
    config: RateLimitConfig,
    tz: Tz,
}

impl<S: KeyValueStore> RateLimitGate<S, Local> {
    /// Creates a gate that rolls the daily count over at local midnight.
    pub fn new(store: S, config: RateLimitConfig) -> Self {
        Self::with_timezone(store, config, Local)
    }
}

impl<S, Tz> RateLimitGate<S, Tz>
where
    S: KeyValueStore,
    Tz: TimeZone,
    Tz::Offset: Display,
{
    /// Creates a gate whose calendar days follow `tz`.
    pub fn with_timezone(store: S, config: RateLimitConfig, tz: Tz) -> Self {
        Self { store, config, tz }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Decides whether a request may start now.
    ///
    /// A stored daily count from an earlier day is reset in the store as a
    /// side effect, before the limits are evaluated.
    pub fn check_allowed(&mut self, now_millis: i64) -> RateLimitDecision {
        let today = self.day_id(now_millis);
        let mut record = self.load();

        if record.daily_usage.date != today {
            record.daily_usage = DailyUsage {
                date: today,
                count: 0,
            };
            self.save_daily_usage(&record.daily_usage);
        }

        if record.daily_usage.count >= self.config.daily_limit {
            tracing::debug!(
                count = record.daily_usage.count,
                limit = self.config.daily_limit,
                "daily limit reached"
            );
            return RateLimitDecision::daily_limit_reached(self.config.daily_limit);
        }

        if let Some(remaining_secs) = self.cooldown_remaining_secs(&record, now_millis) {
            tracing::debug!(remaining_secs, "cooldown active");
            return RateLimitDecision::cooling_down(remaining_secs);
        }

        RateLimitDecision::allowed()
    }

    /// Records one request at `now_millis`.
    ///
    /// Does not consult [`Self::check_allowed`].
    pub fn record_usage(&mut self, now_millis: i64) {
        let today = self.day_id(now_millis);
        let mut record = self.load();

        if record.daily_usage.date != today {
            record.daily_usage = DailyUsage {
                date: today,
                count: 0,
            };
        }
        record.daily_usage.count = record.daily_usage.count.saturating_add(1);
        record.last_used_at_millis = now_millis;

        self.store
            .set(LAST_REQUEST_KEY, &record.last_used_at_millis.to_string());
        self.save_daily_usage(&record.daily_usage);

        tracing::debug!(
            count = record.daily_usage.count,
            date = %record.daily_usage.date,
            "recorded usage"
        );
    }

    /// Checks and, when allowed, records the request in the same call.
    pub fn try_acquire(&mut self, now_millis: i64) -> RateLimitDecision {
        let decision = self.check_allowed(now_millis);
        if decision.allowed {
            self.record_usage(now_millis);
        }
        decision
    }

    /// Reports today's count and the cooldown countdown without touching the store.
    pub fn describe_status(&self, now_millis: i64) -> UsageStatus {
        let today = self.day_id(now_millis);
        let record = self.load();

        let count = if record.daily_usage.date == today {
            record.daily_usage.count
        } else {
            0
        };

        match self.cooldown_remaining_secs(&record, now_millis) {
            None => UsageStatus {
                count,
                ready: true,
                countdown_text: READY_MARKER.to_string(),
            },
            Some(remaining_secs) => {
                let (minutes, seconds) = split_minutes(remaining_secs);
                UsageStatus {
                    count,
                    ready: false,
                    countdown_text: format!("{minutes}分{seconds:02}秒"),
                }
            }
        }
    }

    /// Clears all gate state from the store.
    pub fn reset(&mut self) {
        self.store.remove(LAST_REQUEST_KEY);
        self.store.remove(DAILY_USAGE_KEY);
        tracing::debug!("cleared rate limit state");
    }

    /// Reads the persisted record, treating absent or corrupt values as zero.
    pub fn load(&self) -> UsageRecord {
        let last_used_at_millis = match self.store.get(LAST_REQUEST_KEY) {
            None => 0,
            Some(raw) => raw.trim().parse::<i64>().unwrap_or_else(|err| {
                tracing::debug!(value = %raw, "ignoring corrupt last request time: {err}");
                0
            }),
        };

        let daily_usage = match self.store.get(DAILY_USAGE_KEY) {
            None => DailyUsage::default(),
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                tracing::debug!(value = %raw, "ignoring corrupt daily usage: {err}");
                DailyUsage::default()
            }),
        };

        UsageRecord {
            last_used_at_millis,
            daily_usage,
        }
    }

    /// Calendar-day identifier for `now_millis` in the gate's timezone.
    pub fn day_id(&self, now_millis: i64) -> String {
        self.tz
            .timestamp_millis_opt(now_millis)
            .single()
            .map(|dt| dt.format(DAY_FORMAT).to_string())
            .unwrap_or_default()
    }

    /// Whole seconds (rounded up) left in the cooldown, or `None` once it has elapsed.
    fn cooldown_remaining_secs(&self, record: &UsageRecord, now_millis: i64) -> Option<u64> {
        let elapsed = now_millis.saturating_sub(record.last_used_at_millis);
        let cooldown = self.config.cooldown_millis();
        if elapsed >= cooldown {
            return None;
        }
        let remaining_millis = u64::try_from(cooldown.saturating_sub(elapsed)).unwrap_or(u64::MAX);
        Some(remaining_millis.div_ceil(1000))
    }

    fn save_daily_usage(&mut self, usage: &DailyUsage) {
        match serde_json::to_string(usage) {
            Ok(json) => self.store.set(DAILY_USAGE_KEY, &json),
            Err(err) => tracing::warn!("failed to encode daily usage: {err}"),
        }
    }
}

fn split_minutes(total_secs: u64) -> (u64, u64) {
    (total_secs / 60, total_secs % 60)
}
