//! Daily wall-clock trigger in a fixed timezone.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use civitas_core::ConfigError;

/// Longest DST gap searched when the trigger time does not exist on a day.
const MAX_GAP_MINUTES: i64 = 180;

/// Fires once per day at `at` local time in `tz`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyTrigger {
    at: NaiveTime,
    tz: Tz,
}

impl DailyTrigger {
    pub fn new(at: NaiveTime, tz: Tz) -> Self {
        Self { at, tz }
    }

    /// Parse `HH:MM` (or `HH:MM:SS`) and an IANA timezone name.
    pub fn parse(time: &str, timezone: &str) -> Result<Self, ConfigError> {
        let at = NaiveTime::parse_from_str(time, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M:%S"))
            .map_err(|e| ConfigError::InvalidValue {
                field: "sync_time".to_string(),
                value: time.to_string(),
                reason: e.to_string(),
            })?;
        let tz: Tz = timezone.parse().map_err(|e| ConfigError::InvalidValue {
            field: "sync_timezone".to_string(),
            value: timezone.to_string(),
            reason: format!("{}", e),
        })?;
        Ok(Self { at, tz })
    }

    pub fn at(&self) -> NaiveTime {
        self.at
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// First trigger instant strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.with_timezone(&self.tz).date_naive();
        let mut day = today;
        loop {
            if let Some(instant) = self.instant_on(day) {
                if instant > now {
                    return instant;
                }
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => return now,
            }
        }
    }

    /// Most recent trigger instant at or before `now`.
    pub fn latest_at_or_before(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut day = now.with_timezone(&self.tz).date_naive();
        for _ in 0..3 {
            if let Some(instant) = self.instant_on(day) {
                if instant <= now {
                    return Some(instant);
                }
            }
            day = day.pred_opt()?;
        }
        None
    }

    /// Whether the cache built at `last_update` is due for a rebuild at `now`.
    ///
    /// True when nothing was ever built, when today's trigger has passed and
    /// the last build predates it, or when the last build is a day old.
    pub fn should_refresh(&self, last_update: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(last) = last_update else {
            return true;
        };
        if now - last >= Duration::hours(24) {
            return true;
        }
        match self.latest_at_or_before(now) {
            Some(trigger) => last < trigger,
            None => false,
        }
    }

    /// e.g. `daily at 07:00 America/Sao_Paulo (next: 2024-06-16T10:00:00Z)`
    pub fn describe(&self, next: Option<DateTime<Utc>>) -> String {
        let base = format!("daily at {} {}", self.at.format("%H:%M"), self.tz.name());
        match next {
            Some(next) => format!("{} (next: {})", base, next.to_rfc3339()),
            None => base,
        }
    }

    /// The trigger instant on local calendar day `day`. Ambiguous times take
    /// the earlier instant; times inside a DST gap move to the first valid
    /// minute after it.
    fn instant_on(&self, day: NaiveDate) -> Option<DateTime<Utc>> {
        let local = NaiveDateTime::new(day, self.at);
        for offset in 0..=MAX_GAP_MINUTES {
            let candidate = local + Duration::minutes(offset);
            match self.tz.from_local_datetime(&candidate) {
                LocalResult::Single(t) => return Some(t.with_timezone(&Utc)),
                LocalResult::Ambiguous(earliest, _) => return Some(earliest.with_timezone(&Utc)),
                LocalResult::None => continue,
            }
        }
        None
    }
}
