//! Dosing frequency and the per-day inclusion policy.
//!
//! How many doses fall on a day is expressed by the prescription's reminder
//! times; the frequency only decides which calendar days carry doses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How often a prescription is taken
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Frequency {
    OnceDaily,
    TwiceDaily,
    ThreeTimesDaily,
    FourTimesDaily,
    EveryOtherDay,
    Weekly,
    AsNeeded,
    /// A value this system does not know. Kept verbatim and scheduled every day.
    Unrecognized(String),
}

impl Frequency {
    /// Canonical wire name
    pub fn as_str(&self) -> &str {
        match self {
            Frequency::OnceDaily => "onceDaily",
            Frequency::TwiceDaily => "twiceDaily",
            Frequency::ThreeTimesDaily => "threeTimesDaily",
            Frequency::FourTimesDaily => "fourTimesDaily",
            Frequency::EveryOtherDay => "everyOtherDay",
            Frequency::Weekly => "weekly",
            Frequency::AsNeeded => "asNeeded",
            Frequency::Unrecognized(raw) => raw,
        }
    }

    /// Parse a frequency name. Accepts camelCase and snake_case spellings.
    pub fn parse(s: &str) -> Self {
        match s {
            "onceDaily" | "once_daily" => Frequency::OnceDaily,
            "twiceDaily" | "twice_daily" => Frequency::TwiceDaily,
            "threeTimesDaily" | "three_times_daily" => Frequency::ThreeTimesDaily,
            "fourTimesDaily" | "four_times_daily" => Frequency::FourTimesDaily,
            "everyOtherDay" | "every_other_day" => Frequency::EveryOtherDay,
            "weekly" => Frequency::Weekly,
            "asNeeded" | "as_needed" => Frequency::AsNeeded,
            other => Frequency::Unrecognized(other.to_string()),
        }
    }
}

impl From<String> for Frequency {
    fn from(s: String) -> Self {
        Frequency::parse(&s)
    }
}

impl From<Frequency> for String {
    fn from(f: Frequency) -> Self {
        f.as_str().to_string()
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a dose falls on the day `day_offset` days after the start date.
///
/// `day_offset` is the floor of whole days between the candidate date and the
/// prescription's start date.
pub fn includes_day(frequency: &Frequency, day_offset: i64) -> bool {
    match frequency {
        Frequency::OnceDaily
        | Frequency::TwiceDaily
        | Frequency::ThreeTimesDaily
        | Frequency::FourTimesDaily
        | Frequency::AsNeeded => true,
        Frequency::EveryOtherDay => day_offset.rem_euclid(2) == 0,
        Frequency::Weekly => day_offset.rem_euclid(7) == 0,
        Frequency::Unrecognized(raw) => {
            tracing::debug!("Unrecognized frequency {:?}, scheduling every day", raw);
            true
        }
    }
}
