// 📅 Reporting Periods - calendar year or calendar quarter

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Year,
    Quarter,
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "year" | "yearly" | "annual" | "y" => Ok(Granularity::Year),
            "quarter" | "quarterly" | "q" => Ok(Granularity::Quarter),
            other => Err(format!("unknown granularity '{}' (expected year|quarter)", other)),
        }
    }
}

/// A calendar year, or one quarter of it.
///
/// Ordering is chronological; within a year the whole-year period sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    /// 1-4, `None` for a whole year
    pub quarter: Option<u8>,
}

impl Period {
    pub fn year(year: i32) -> Self {
        Period { year, quarter: None }
    }

    /// Quarter period; `quarter` must be 1-4
    pub fn quarter(year: i32, quarter: u8) -> Option<Self> {
        (1..=4).contains(&quarter).then_some(Period {
            year,
            quarter: Some(quarter),
        })
    }

    /// Period containing `date`
    pub fn of(date: NaiveDate, granularity: Granularity) -> Self {
        match granularity {
            Granularity::Year => Period::year(date.year()),
            Granularity::Quarter => Period {
                year: date.year(),
                quarter: Some(((date.month0() / 3) + 1) as u8),
            },
        }
    }

    pub fn granularity(&self) -> Granularity {
        if self.quarter.is_some() {
            Granularity::Quarter
        } else {
            Granularity::Year
        }
    }

    pub fn start(&self) -> NaiveDate {
        let month = match self.quarter {
            Some(q) => (u32::from(q) - 1) * 3 + 1,
            None => 1,
        };
        NaiveDate::from_ymd_opt(self.year, month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn end(&self) -> NaiveDate {
        let (year, month) = match self.quarter {
            Some(4) | None => (self.year + 1, 1),
            Some(q) => (self.year, u32::from(q) * 3 + 1),
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|first_of_next| first_of_next.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start() <= date && date <= self.end()
    }

    /// Same period one year earlier (year-over-year comparisons)
    pub fn year_earlier(&self) -> Self {
        Period {
            year: self.year - 1,
            quarter: self.quarter,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.quarter {
            Some(q) => write!(f, "{}-Q{}", self.year, q),
            None => write!(f, "{}", self.year),
        }
    }
}
