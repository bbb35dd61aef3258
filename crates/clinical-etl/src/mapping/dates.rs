//! Free-form date parsing and month/day interval arithmetic.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Order in which day, month and year appear in ambiguous numeric dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DateOrder {
    Dmy,
    Mdy,
    Ymd,
    Ydm,
    Dym,
    Myd,
}

impl DateOrder {
    fn fields(self) -> [char; 3] {
        match self {
            DateOrder::Dmy => ['D', 'M', 'Y'],
            DateOrder::Mdy => ['M', 'D', 'Y'],
            DateOrder::Ymd => ['Y', 'M', 'D'],
            DateOrder::Ydm => ['Y', 'D', 'M'],
            DateOrder::Dym => ['D', 'Y', 'M'],
            DateOrder::Myd => ['M', 'Y', 'D'],
        }
    }
}

impl Default for DateOrder {
    fn default() -> Self {
        DateOrder::Dmy
    }
}

impl FromStr for DateOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DMY" => Ok(DateOrder::Dmy),
            "MDY" => Ok(DateOrder::Mdy),
            "YMD" => Ok(DateOrder::Ymd),
            "YDM" => Ok(DateOrder::Ydm),
            "DYM" => Ok(DateOrder::Dym),
            "MYD" => Ok(DateOrder::Myd),
            other => Err(format!(
                "date format '{other}' must be an ordering of the letters D, M and Y"
            )),
        }
    }
}

impl fmt::Display for DateOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s: String = self.fields().iter().collect();
        write!(f, "{s}")
    }
}

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

fn month_from_name(token: &str) -> Option<u32> {
    let lower = token.to_ascii_lowercase();
    if lower.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| m.starts_with(&lower))
        .map(|i| i as u32 + 1)
}

fn expand_year(token: &str, value: i32) -> i32 {
    if token.len() <= 2 {
        if value < 70 { 2000 + value } else { 1900 + value }
    } else {
        value
    }
}

/// Parse a date-like string. Partial dates resolve to the first day of
/// their month (or year).
pub fn parse_date(text: &str, order: DateOrder) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    // ISO timestamps: keep the date part
    if text.len() > 10 && text.is_char_boundary(10) {
        if let Ok(d) = NaiveDate::parse_from_str(&text[..10], "%Y-%m-%d") {
            return Some(d);
        }
    }

    let tokens: Vec<&str> = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.iter().all(|t| t.chars().all(|c| c.is_ascii_digit())) {
        parse_numeric(&tokens, order)
    } else {
        parse_named_month(&tokens)
    }
}

fn parse_numeric(tokens: &[&str], order: DateOrder) -> Option<NaiveDate> {
    let nums: Vec<i32> = tokens.iter().map(|t| t.parse().ok()).collect::<Option<_>>()?;
    match tokens.len() {
        1 if tokens[0].len() == 4 => NaiveDate::from_ymd_opt(nums[0], 1, 1),
        1 if tokens[0].len() == 8 => NaiveDate::parse_from_str(tokens[0], "%Y%m%d").ok(),
        2 => {
            let (year, month) = if tokens[0].len() == 4 {
                (nums[0], nums[1])
            } else {
                (expand_year(tokens[1], nums[1]), nums[0])
            };
            NaiveDate::from_ymd_opt(year, u32::try_from(month).ok()?, 1)
        }
        3 => {
            let (mut y, mut m, mut d) = (0, 0, 0);
            if tokens[0].len() == 4 {
                (y, m, d) = (nums[0], nums[1], nums[2]);
            } else {
                for (field, (token, value)) in order.fields().iter().zip(tokens.iter().zip(&nums)) {
                    match field {
                        'Y' => y = expand_year(token, *value),
                        'M' => m = *value,
                        _ => d = *value,
                    }
                }
            }
            let month = u32::try_from(m).ok()?;
            let day = u32::try_from(d).ok()?;
            NaiveDate::from_ymd_opt(y, month, day).or_else(|| NaiveDate::from_ymd_opt(y, day, month))
        }
        _ => None,
    }
}

fn parse_named_month(tokens: &[&str]) -> Option<NaiveDate> {
    let mut month = None;
    let mut numbers = Vec::new();
    for token in tokens {
        if let Some(m) = month_from_name(token) {
            month.get_or_insert(m);
        } else if token.chars().all(|c| c.is_ascii_digit()) {
            numbers.push(*token);
        } else if let Some(stripped) = strip_ordinal(token) {
            numbers.push(stripped);
        } else {
            return None;
        }
    }
    let month = month?;

    let (year_token, day_token) = match numbers.as_slice() {
        [y] => (*y, None),
        [a, b] if a.len() == 4 || a.parse::<u32>().ok()? > 31 => (*a, Some(*b)),
        [a, b] => (*b, Some(*a)),
        _ => return None,
    };
    let year = expand_year(year_token, year_token.parse().ok()?);
    let day = match day_token {
        Some(t) => t.parse().ok()?,
        None => 1,
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

fn strip_ordinal(token: &str) -> Option<&str> {
    let lower = token.to_ascii_lowercase();
    ["st", "nd", "rd", "th"]
        .iter()
        .find(|suffix| lower.ends_with(*suffix))
        .map(|suffix| &token[..token.len() - suffix.len()])
        .filter(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
}

/// Whole months between two dates, counting a month only once its day has
/// been reached.
pub fn months_between(start: NaiveDate, end: NaiveDate) -> i64 {
    let mut months = (end.year() - start.year()) as i64 * 12 + end.month() as i64 - start.month() as i64;
    if end.day() < start.day() {
        months -= 1;
    }
    months
}

/// Signed month and day distance of `date` from `reference`.
pub fn interval(reference: NaiveDate, date: NaiveDate) -> (i64, i64) {
    if reference <= date {
        (months_between(reference, date), (date - reference).num_days())
    } else {
        (
            -months_between(date, reference),
            -(reference - date).num_days(),
        )
    }
}
