//! Timezone-aware 5-field cron evaluation (min hour dom month dow).
//!
//! Expressions are parsed once into a [`CronExpr`]; invalid expressions
//! are rejected at registration time rather than silently never firing.
//!
//! DST handling when projecting the next fire:
//! - spring-forward gaps: local times that don't exist are skipped;
//! - fall-back overlaps: the earliest (pre-transition) mapping wins.

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// One component of a cron field's comma list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldSpec {
    Any,
    /// `*/n`
    Step(u32),
    Exact(u32),
    /// inclusive `a-b`
    Range(u32, u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field(Vec<FieldSpec>);

impl Field {
    fn parse(text: &str, min: u32, max: u32) -> Option<Self> {
        let mut specs = Vec::new();
        for part in text.split(',') {
            let spec = if part == "*" {
                FieldSpec::Any
            } else if let Some(step) = part.strip_prefix("*/") {
                let n: u32 = step.parse().ok()?;
                if n == 0 {
                    return None;
                }
                FieldSpec::Step(n)
            } else if let Some((a, b)) = part.split_once('-') {
                let a: u32 = a.parse().ok()?;
                let b: u32 = b.parse().ok()?;
                if a > b || a < min || b > max {
                    return None;
                }
                FieldSpec::Range(a, b)
            } else {
                let n: u32 = part.parse().ok()?;
                if n < min || n > max {
                    return None;
                }
                FieldSpec::Exact(n)
            };
            specs.push(spec);
        }
        (!specs.is_empty()).then_some(Self(specs))
    }

    fn matches(&self, value: u32) -> bool {
        self.0.iter().any(|spec| match *spec {
            FieldSpec::Any => true,
            FieldSpec::Step(n) => value % n == 0,
            FieldSpec::Exact(n) => n == value,
            FieldSpec::Range(a, b) => value >= a && value <= b,
        })
    }
}

/// A parsed 5-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Option<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return None;
        }
        Some(Self {
            minute: Field::parse(fields[0], 0, 59)?,
            hour: Field::parse(fields[1], 0, 23)?,
            day_of_month: Field::parse(fields[2], 1, 31)?,
            month: Field::parse(fields[3], 1, 12)?,
            // 7 is accepted as an alias for Sunday below.
            day_of_week: Field::parse(fields[4], 0, 7)?,
        })
    }

    fn matches_local(&self, dt: &NaiveDateTime) -> bool {
        let dow = dt.weekday().num_days_from_sunday();
        self.minute.matches(dt.minute())
            && self.hour.matches(dt.hour())
            && self.day_of_month.matches(dt.day())
            && self.month.matches(dt.month())
            && (self.day_of_week.matches(dow) || (dow == 0 && self.day_of_week.matches(7)))
    }

    /// Next occurrence strictly after `after`, evaluated in `tz`,
    /// returned in UTC. Scans minute-by-minute, bounded to one year.
    pub fn next_after(&self, after: &DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let local_after = after.with_timezone(&tz).naive_local();
        let to_next_minute = 60 - i64::from(local_after.second());
        let mut candidate = local_after + chrono::Duration::seconds(to_next_minute);
        candidate = candidate.with_second(0).unwrap_or(candidate);

        let max_checks = 366 * 24 * 60;
        for _ in 0..max_checks {
            if self.matches_local(&candidate) {
                match tz.from_local_datetime(&candidate) {
                    chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                    chrono::LocalResult::Ambiguous(earliest, _) => {
                        return Some(earliest.with_timezone(&Utc));
                    }
                    chrono::LocalResult::None => {
                        // DST gap: this local minute does not exist.
                    }
                }
            }
            candidate += chrono::Duration::minutes(1);
        }
        None
    }
}

/// Parse an IANA timezone name. Registration rejects failures.
pub fn parse_tz(name: &str) -> Option<Tz> {
    name.parse::<Tz>().ok()
}
