//! Core data model: status and frequency enumerations, Tests and Results.

pub mod result;

pub use self::result::{SourceRecord, TestResult};
pub use self::test::{Recurring, Test};

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Status of a Result, or of a single data source within a Result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Submitted,
    Retrieved,
    Error,
    Duplicate,
}

impl Status {
    /// Fold per-data-source statuses into the overall Result status.
    ///
    /// Any `Error` wins, then all-`Retrieved`, otherwise the Result is still
    /// pending (`Submitted`).
    pub fn aggregate<I>(statuses: I) -> Status
    where
        I: IntoIterator<Item = Status>,
    {
        let mut all_retrieved = true;
        for status in statuses {
            match status {
                Status::Error => return Status::Error,
                Status::Retrieved => {}
                Status::Submitted | Status::Duplicate => all_retrieved = false,
            }
        }
        if all_retrieved {
            Status::Retrieved
        } else {
            Status::Submitted
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Submitted => write!(f, "Submitted"),
            Status::Retrieved => write!(f, "Retrieved"),
            Status::Error => write!(f, "Error"),
            Status::Duplicate => write!(f, "Duplicate"),
        }
    }
}

/// Whether a Result came from a one-off `run` or a `recurring` pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultType {
    Single,
    Recurring,
}

/// Recurring schedule frequencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Frequency {
    None,
    Daily,
    Weekly,
    Biweekly,
    Monthly,
}

const MINUTE_MS: i64 = 60 * 1000;
const DAY_MS: i64 = 24 * 60 * MINUTE_MS;

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::None => "none",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Biweekly => "biweekly",
            Frequency::Monthly => "monthly",
        }
    }

    /// Fixed offset between two triggers, or `None` for [`Frequency::None`].
    pub fn offset_millis(&self) -> Option<i64> {
        match self {
            Frequency::None => None,
            Frequency::Daily => Some(DAY_MS),
            Frequency::Weekly => Some(7 * DAY_MS),
            Frequency::Biweekly => Some(14 * DAY_MS),
            Frequency::Monthly => Some(30 * DAY_MS),
        }
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Frequency::None),
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "biweekly" => Ok(Frequency::Biweekly),
            "monthly" => Ok(Frequency::Monthly),
            other => Err(format!("unknown frequency '{}'", other)),
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Status; 3] = [Status::Submitted, Status::Retrieved, Status::Error];

    fn expected(statuses: &[Status]) -> Status {
        if statuses.contains(&Status::Error) {
            Status::Error
        } else if statuses.iter().all(|s| *s == Status::Retrieved) {
            Status::Retrieved
        } else {
            Status::Submitted
        }
    }

    #[test]
    fn test_aggregate_over_every_combination() {
        for n in 1..=3u32 {
            for mut code in 0..3usize.pow(n) {
                let mut statuses = Vec::new();
                for _ in 0..n {
                    statuses.push(ALL[code % 3]);
                    code /= 3;
                }
                assert_eq!(
                    Status::aggregate(statuses.iter().copied()),
                    expected(&statuses),
                    "statuses: {:?}",
                    statuses
                );
            }
        }
    }

    #[test]
    fn test_error_outranks_pending() {
        let statuses = [Status::Submitted, Status::Error, Status::Retrieved];
        assert_eq!(Status::aggregate(statuses), Status::Error);
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(serde_json::to_string(&Status::Retrieved).unwrap(), "\"Retrieved\"");
        let s: Status = serde_json::from_str("\"Duplicate\"").unwrap();
        assert_eq!(s, Status::Duplicate);
    }

    #[test]
    fn test_frequency_parse_is_case_insensitive() {
        assert_eq!("Daily".parse::<Frequency>().unwrap(), Frequency::Daily);
        assert_eq!(" BIWEEKLY ".parse::<Frequency>().unwrap(), Frequency::Biweekly);
        assert!("hourly".parse::<Frequency>().is_err());
    }

    #[test]
    fn test_frequency_offsets() {
        assert_eq!(Frequency::Daily.offset_millis(), Some(86_400_000));
        assert_eq!(Frequency::Weekly.offset_millis(), Some(7 * 86_400_000));
        assert_eq!(Frequency::None.offset_millis(), None);
    }
}
