use chrono::{DateTime, Days, NaiveDate, Utc};

/// Source of "now" so freshness and window checks are deterministic in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// UTC midnight at the start of yesterday: the most recent completed
    /// daily boundary a stored candle can reach.
    fn last_completed_day(&self) -> DateTime<Utc> {
        let yesterday = self
            .today()
            .checked_sub_days(Days::new(1))
            .unwrap_or(NaiveDate::MIN);
        yesterday.and_time(chrono::NaiveTime::MIN).and_utc()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
pub struct FixedClock {
    now: DateTime<Utc>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}
