use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use futures::future::BoxFuture;

use weft_core::error::Result;
use weft_core::traits::ExecutionLimiter;

/// In-memory per-user run counter that resets at UTC midnight.
///
/// A negative `max_per_day` disables the limit.
pub struct DailyLimiter {
    max_per_day: i64,
    counts: Mutex<HashMap<String, (NaiveDate, i64)>>,
}

impl DailyLimiter {
    pub fn new(max_per_day: i64) -> Self {
        Self {
            max_per_day,
            counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(-1)
    }

    fn used_on(&self, user_id: &str, day: NaiveDate) -> i64 {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        match counts.get(user_id) {
            Some((d, n)) if *d == day => *n,
            _ => 0,
        }
    }

    fn remaining_on(&self, user_id: &str, day: NaiveDate) -> i64 {
        if self.max_per_day < 0 {
            return -1;
        }
        (self.max_per_day - self.used_on(user_id, day)).max(0)
    }

    fn increment_on(&self, user_id: &str, day: NaiveDate) {
        if self.max_per_day < 0 {
            return;
        }
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let entry = counts.entry(user_id.to_string()).or_insert((day, 0));
        if entry.0 != day {
            *entry = (day, 0);
        }
        entry.1 += 1;
    }
}

impl ExecutionLimiter for DailyLimiter {
    fn remaining<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<i64>> {
        let remaining = self.remaining_on(user_id, Utc::now().date_naive());
        Box::pin(async move { Ok(remaining) })
    }

    fn increment<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<()>> {
        self.increment_on(user_id, Utc::now().date_naive());
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn counts_down_per_user() {
        let limiter = DailyLimiter::new(2);
        assert_eq!(limiter.remaining_on("u1", day(1)), 2);
        limiter.increment_on("u1", day(1));
        limiter.increment_on("u1", day(1));
        limiter.increment_on("u1", day(1));
        assert_eq!(limiter.remaining_on("u1", day(1)), 0);
        assert_eq!(limiter.remaining_on("u2", day(1)), 2);
    }

    #[test]
    fn resets_on_a_new_day() {
        let limiter = DailyLimiter::new(1);
        limiter.increment_on("u1", day(1));
        assert_eq!(limiter.remaining_on("u1", day(1)), 0);
        assert_eq!(limiter.remaining_on("u1", day(2)), 1);
        limiter.increment_on("u1", day(2));
        assert_eq!(limiter.remaining_on("u1", day(2)), 0);
    }

    #[tokio::test]
    async fn negative_limit_is_unlimited() {
        let limiter = DailyLimiter::unlimited();
        limiter.increment("u1").await.unwrap();
        assert_eq!(limiter.remaining("u1").await.unwrap(), -1);
    }
}
