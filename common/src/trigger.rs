// Trigger parsing and next-fire calculation
//
// Supports three trigger kinds: fixed interval (Go-style duration strings),
// cron expressions (5 or 6 fields) and daily "HH:MM" times. All calculations
// are pure: the caller passes the reference time and timezone.

use crate::errors::ConfigError;
use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

lazy_static::lazy_static! {
    static ref DURATION_COMPONENT: Regex =
        Regex::new(r"(\d+(?:\.\d*)?|\.\d+)(ns|us|µs|ms|s|m|h)").expect("Invalid regex pattern");
}

const WEEKDAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
const WEEKDAY_FULL_NAMES: [&str; 7] = [
    "sunday",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
];

/// Kind of trigger a job spec declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    #[serde(rename = "duration", alias = "interval")]
    Interval,
    Cron,
    Daily,
}

impl TriggerKind {
    /// Configuration tag for this kind, also used as a job tag
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Interval => "duration",
            TriggerKind::Cron => "cron",
            TriggerKind::Daily => "daily",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "duration" | "interval" => Ok(TriggerKind::Interval),
            "cron" => Ok(TriggerKind::Cron),
            "daily" => Ok(TriggerKind::Daily),
            other => Err(ConfigError::UnknownTriggerKind(other.to_string())),
        }
    }
}

/// A validated trigger, ready to compute fire times
#[derive(Debug, Clone)]
pub enum Trigger {
    Interval(Duration),
    Cron(Box<CronSchedule>),
    Daily(NaiveTime),
}

impl Trigger {
    /// Parse and validate a schedule string for the given trigger kind
    pub fn parse(kind: TriggerKind, schedule: &str) -> Result<Self, ConfigError> {
        match kind {
            TriggerKind::Interval => parse_duration(schedule).map(Trigger::Interval),
            TriggerKind::Cron => parse_cron_expression(schedule).map(|s| Trigger::Cron(Box::new(s))),
            TriggerKind::Daily => parse_daily_time(schedule).map(Trigger::Daily),
        }
    }

    pub fn kind(&self) -> TriggerKind {
        match self {
            Trigger::Interval(_) => TriggerKind::Interval,
            Trigger::Cron(_) => TriggerKind::Cron,
            Trigger::Daily(_) => TriggerKind::Daily,
        }
    }

    /// Smallest fire time strictly after `from`.
    ///
    /// Cron and daily triggers are evaluated in `timezone`; interval triggers
    /// are timezone independent.
    pub fn next_after(&self, from: DateTime<Utc>, timezone: Tz) -> Result<DateTime<Utc>, ConfigError> {
        match self {
            Trigger::Interval(every) => Ok(from + *every),
            Trigger::Cron(schedule) => schedule
                .after(&from.with_timezone(&timezone))
                .next()
                .map(|next| next.with_timezone(&Utc))
                .ok_or_else(|| ConfigError::NoNextOccurrence {
                    schedule: schedule.to_string(),
                }),
            Trigger::Daily(at) => Ok(next_daily_occurrence(*at, from, timezone)),
        }
    }
}

/// Next fire time for a trigger, evaluated in UTC
pub fn compute_next(
    kind: TriggerKind,
    schedule: &str,
    from: DateTime<Utc>,
) -> Result<DateTime<Utc>, ConfigError> {
    compute_next_in(kind, schedule, from, default_timezone())
}

/// Next fire time for a trigger, evaluated in `timezone`
pub fn compute_next_in(
    kind: TriggerKind,
    schedule: &str,
    from: DateTime<Utc>,
    timezone: Tz,
) -> Result<DateTime<Utc>, ConfigError> {
    Trigger::parse(kind, schedule)?.next_after(from, timezone)
}

/// Timezone used for cron and daily triggers unless configured otherwise
pub fn default_timezone() -> Tz {
    chrono_tz::UTC
}

/// Parse an IANA timezone name such as "Asia/Shanghai"
pub fn parse_timezone(name: &str) -> Result<Tz, ConfigError> {
    name.parse::<Tz>()
        .map_err(|_| ConfigError::InvalidTimezone(name.to_string()))
}

/// Parse a duration such as "30s", "1h30m", "1.5h" or "250ms".
///
/// The string is a sequence of `<number><unit>` groups with units
/// ns, us (or µs), ms, s, m and h. The total must be positive.
pub fn parse_duration(schedule: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidDuration {
        schedule: schedule.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = schedule.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty duration"));
    }

    let mut consumed = 0;
    let mut total_nanos = 0f64;
    for caps in DURATION_COMPONENT.captures_iter(trimmed) {
        let whole = caps.get(0).ok_or_else(|| invalid("malformed component"))?;
        if whole.start() != consumed {
            return Err(invalid("unexpected characters"));
        }
        consumed = whole.end();

        let value: f64 = caps[1]
            .parse()
            .map_err(|_| invalid("malformed number"))?;
        let unit_nanos = match &caps[2] {
            "ns" => 1.0,
            "us" | "µs" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60_000_000_000.0,
            "h" => 3_600_000_000_000.0,
            _ => return Err(invalid("unknown unit")),
        };
        total_nanos += value * unit_nanos;
    }

    if consumed != trimmed.len() {
        return Err(invalid("missing or unknown unit"));
    }
    if total_nanos < 1.0 {
        return Err(invalid("duration must be positive"));
    }
    if total_nanos > i64::MAX as f64 {
        return Err(invalid("duration out of range"));
    }

    Ok(Duration::nanoseconds(total_nanos.round() as i64))
}

/// Parse and validate a cron expression.
///
/// Five-field expressions (`min hour dom month dow`) fire at second 0;
/// six-field expressions carry a leading seconds field. Numeric weekdays
/// follow the classic convention (0 and 7 are Sunday).
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidCronExpression {
        expression: expression.to_string(),
        reason,
    };

    let mut fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => fields.insert(0, "0"),
        6 => {}
        n => return Err(invalid(format!("expected 5 or 6 fields, found {}", n))),
    }

    let weekday = normalize_weekday_field(fields[5]).map_err(invalid)?;
    let normalized = format!(
        "{} {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], fields[4], weekday
    );

    let schedule = CronSchedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))?;

    // Reject expressions that can never fire, e.g. "0 0 30 2 *"
    if schedule.upcoming(Utc).next().is_none() {
        return Err(ConfigError::NoNextOccurrence {
            schedule: expression.to_string(),
        });
    }

    Ok(schedule)
}

/// Rewrite the weekday field into day names, which the cron parser
/// understands unambiguously. Entries may be numbers (0-7, Sunday = 0 or 7)
/// or day names, and a range may mix the two.
fn normalize_weekday_field(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days = BTreeSet::new();

    for token in field.split(',') {
        if token.is_empty() {
            return Err(format!("empty weekday entry in '{}'", field));
        }

        let (range, step) = match token.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid weekday step '{}'", step))?;
                if step == 0 {
                    return Err("weekday step must be positive".to_string());
                }
                (range, Some(step))
            }
            None => (token, None),
        };

        let (start, end) = if range == "*" {
            (0, 6)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_weekday(a)?, parse_weekday(b)?)
        } else {
            let day = parse_weekday(range)?;
            (day, if step.is_some() { 6 } else { day })
        };

        if start > end {
            return Err(format!("weekday range {}-{} is reversed", start, end));
        }

        let mut day = start;
        while day <= end {
            days.insert(day % 7);
            day += step.unwrap_or(1);
        }
    }

    let parts: Vec<&str> = days
        .into_iter()
        .map(|d| WEEKDAY_NAMES[d as usize])
        .collect();
    Ok(parts.join(","))
}

/// A weekday number (0-7) or name ("Mon", "monday"), as 0-7 with Sunday = 0
fn parse_weekday(raw: &str) -> Result<u32, String> {
    if let Ok(day) = raw.parse::<u32>() {
        return if day <= 7 {
            Ok(day)
        } else {
            Err(format!("invalid weekday '{}'", raw))
        };
    }

    let lower = raw.to_ascii_lowercase();
    WEEKDAY_NAMES
        .iter()
        .zip(WEEKDAY_FULL_NAMES)
        .position(|(short, full)| lower == short.to_ascii_lowercase() || lower == full)
        .map(|day| day as u32)
        .ok_or_else(|| format!("invalid weekday '{}'", raw))
}

/// Parse a daily "HH:MM" literal
pub fn parse_daily_time(schedule: &str) -> Result<NaiveTime, ConfigError> {
    let trimmed = schedule.trim();
    let invalid = |reason: String| ConfigError::InvalidDailyTime {
        schedule: schedule.to_string(),
        reason,
    };

    let (hour, minute) = trimmed
        .split_once(':')
        .ok_or_else(|| invalid("missing ':' separator".to_string()))?;
    if hour.len() != 2 || minute.len() != 2 {
        return Err(invalid("hours and minutes must have two digits".to_string()));
    }
    let hour: u32 = hour.parse().map_err(|_| invalid(format!("invalid hour '{}'", hour)))?;
    let minute: u32 = minute
        .parse()
        .map_err(|_| invalid(format!("invalid minute '{}'", minute)))?;

    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| invalid("time out of range".to_string()))
}

fn next_daily_occurrence(at: NaiveTime, from: DateTime<Utc>, timezone: Tz) -> DateTime<Utc> {
    let mut date = from.with_timezone(&timezone).date_naive();
    loop {
        let candidate = resolve_local(timezone, date.and_time(at));
        if candidate > from {
            return candidate;
        }
        date = date.succ_opt().unwrap_or(date);
    }
}

/// Map a local wall time to UTC. Times inside a DST gap move forward one hour.
fn resolve_local(timezone: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    timezone
        .from_local_datetime(&local)
        .earliest()
        .or_else(|| {
            timezone
                .from_local_datetime(&(local + Duration::hours(1)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&local))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike, Weekday};

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_interval_adds_duration() {
        let from = utc("2024-01-01T10:00:00Z");
        let next = compute_next(TriggerKind::Interval, "30s", from).unwrap();
        assert_eq!(next, utc("2024-01-01T10:00:30Z"));
    }

    #[test]
    fn test_parse_compound_durations() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::minutes(90));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::minutes(90));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::milliseconds(250));
        assert_eq!(parse_duration("2m10s").unwrap(), Duration::seconds(130));
    }

    #[test]
    fn test_parse_invalid_durations() {
        for bad in ["", "30", "abc", "30x", "s30", "0s", "1h 30m", "-5s"] {
            assert!(
                matches!(parse_duration(bad), Err(ConfigError::InvalidDuration { .. })),
                "expected '{}' to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_daily_later_today() {
        let next = compute_next(TriggerKind::Daily, "14:30", utc("2024-01-01T10:00:00Z")).unwrap();
        assert_eq!(next, utc("2024-01-01T14:30:00Z"));
    }

    #[test]
    fn test_daily_rolls_to_tomorrow() {
        let next = compute_next(TriggerKind::Daily, "14:30", utc("2024-01-01T15:00:00Z")).unwrap();
        assert_eq!(next, utc("2024-01-02T14:30:00Z"));
    }

    #[test]
    fn test_daily_exact_time_is_not_future() {
        let next = compute_next(TriggerKind::Daily, "14:30", utc("2024-01-01T14:30:00Z")).unwrap();
        assert_eq!(next, utc("2024-01-02T14:30:00Z"));
    }

    #[test]
    fn test_daily_in_configured_timezone() {
        let tz: Tz = "Asia/Shanghai".parse().unwrap();
        // 10:00 UTC is 18:00 in Shanghai, so 14:30 local has passed
        let next =
            compute_next_in(TriggerKind::Daily, "14:30", utc("2024-01-01T10:00:00Z"), tz).unwrap();
        assert_eq!(next, utc("2024-01-02T06:30:00Z"));
    }

    #[test]
    fn test_daily_invalid_literals() {
        for bad in ["1430", "24:00", "12:60", "9:30", "ab:cd", ""] {
            assert!(
                matches!(parse_daily_time(bad), Err(ConfigError::InvalidDailyTime { .. })),
                "expected '{}' to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_cron_five_fields() {
        let next =
            compute_next(TriggerKind::Cron, "*/15 * * * *", utc("2024-01-01T10:07:12Z")).unwrap();
        assert_eq!(next, utc("2024-01-01T10:15:00Z"));
    }

    #[test]
    fn test_cron_six_fields_with_seconds() {
        let next =
            compute_next(TriggerKind::Cron, "30 0 12 * * *", utc("2024-01-01T12:00:30Z")).unwrap();
        assert_eq!(next, utc("2024-01-02T12:00:30Z"));
    }

    #[test]
    fn test_cron_is_strictly_after() {
        let from = utc("2024-01-01T10:15:00Z");
        let next = compute_next(TriggerKind::Cron, "*/15 * * * *", from).unwrap();
        assert_eq!(next, utc("2024-01-01T10:30:00Z"));
    }

    #[test]
    fn test_cron_numeric_weekdays_use_sunday_zero() {
        // 2024-01-06 is a Saturday
        let from = utc("2024-01-06T12:00:00Z");
        let next = compute_next(TriggerKind::Cron, "0 9 * * 1-5", from).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!(next.hour(), 9);

        let sunday = compute_next(TriggerKind::Cron, "0 9 * * 0", from).unwrap();
        assert_eq!(sunday.weekday(), Weekday::Sun);
        let sunday_seven = compute_next(TriggerKind::Cron, "0 9 * * 7", from).unwrap();
        assert_eq!(sunday, sunday_seven);
    }

    #[test]
    fn test_cron_named_weekdays() {
        let from = utc("2024-01-06T12:00:00Z");
        let next = compute_next(TriggerKind::Cron, "0 9 * * Wed", from).unwrap();
        assert_eq!(next.weekday(), Weekday::Wed);
    }

    #[test]
    fn test_cron_mixed_weekday_range_ends_on_friday() {
        // 2024-01-04 is a Thursday
        let from = utc("2024-01-04T12:00:00Z");
        let next = compute_next(TriggerKind::Cron, "0 9 * * Mon-5", from).unwrap();
        assert_eq!(next, utc("2024-01-05T09:00:00Z"));

        let after = compute_next(TriggerKind::Cron, "0 9 * * Mon-5", next).unwrap();
        assert_eq!(after, utc("2024-01-08T09:00:00Z"));
    }

    #[test]
    fn test_weekday_normalization() {
        assert_eq!(normalize_weekday_field("*").unwrap(), "*");
        assert_eq!(normalize_weekday_field("1-5").unwrap(), "Mon,Tue,Wed,Thu,Fri");
        assert_eq!(normalize_weekday_field("5-7").unwrap(), "Sun,Fri,Sat");
        assert_eq!(normalize_weekday_field("*/2").unwrap(), "Sun,Tue,Thu,Sat");
        assert_eq!(normalize_weekday_field("0,Mon").unwrap(), "Sun,Mon");
        assert_eq!(normalize_weekday_field("Mon-5").unwrap(), "Mon,Tue,Wed,Thu,Fri");
        assert_eq!(normalize_weekday_field("fri-SAT").unwrap(), "Fri,Sat");
        assert_eq!(normalize_weekday_field("Sat-7").unwrap(), "Sun,Sat");
        assert_eq!(normalize_weekday_field("Monday,3").unwrap(), "Mon,Wed");
        assert!(normalize_weekday_field("Funday").is_err());
        assert!(normalize_weekday_field("Fri-Mon").is_err());
        assert!(normalize_weekday_field("8").is_err());
        assert!(normalize_weekday_field("5-2").is_err());
        assert!(normalize_weekday_field("*/0").is_err());
    }

    #[test]
    fn test_cron_invalid_expressions() {
        for bad in ["invalid", "* * * *", "* * * * * * *", "61 * * * *", "0 0 30 2 *"] {
            assert!(
                Trigger::parse(TriggerKind::Cron, bad).is_err(),
                "expected '{}' to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_trigger_kind_from_str() {
        assert_eq!("duration".parse::<TriggerKind>().unwrap(), TriggerKind::Interval);
        assert_eq!("interval".parse::<TriggerKind>().unwrap(), TriggerKind::Interval);
        assert_eq!("cron".parse::<TriggerKind>().unwrap(), TriggerKind::Cron);
        assert_eq!("daily".parse::<TriggerKind>().unwrap(), TriggerKind::Daily);
        assert!(matches!(
            "weekly".parse::<TriggerKind>(),
            Err(ConfigError::UnknownTriggerKind(_))
        ));
    }

    #[test]
    fn test_trigger_kind_serde_tag() {
        let kind: TriggerKind = serde_json::from_str("\"duration\"").unwrap();
        assert_eq!(kind, TriggerKind::Interval);
        assert_eq!(serde_json::to_string(&TriggerKind::Daily).unwrap(), "\"daily\"");
    }

    #[test]
    fn test_parse_timezone() {
        assert!(parse_timezone("Europe/Berlin").is_ok());
        assert!(matches!(
            parse_timezone("Mars/Olympus"),
            Err(ConfigError::InvalidTimezone(_))
        ));
    }
}
