// Time range domain model - resolves relative, rounded and absolute specs
use crate::domain::error::{ReportError, Result};
use chrono::{
    DateTime, Datelike, Days, Duration, FixedOffset, Months, NaiveDate, NaiveDateTime, NaiveTime,
    Offset, TimeZone, Utc,
};

/// Literal accepted for absolute date-times, interpreted in the report's zone
pub const ABSOLUTE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Which side of the range a spec is resolved for; rounding depends on it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    From,
    To,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeRange {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTimeRange {
    pub from: DateTime<FixedOffset>,
    pub to: DateTime<FixedOffset>,
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::new("now-6h", "now")
    }
}

impl TimeRange {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Resolve both ends against the wall clock, sampled once
    pub fn resolve(&self, zone: FixedOffset) -> Result<ResolvedTimeRange> {
        self.resolve_at(Utc::now().with_timezone(&zone))
    }

    /// Resolve both ends against a fixed instant
    pub fn resolve_at(&self, now: DateTime<FixedOffset>) -> Result<ResolvedTimeRange> {
        Ok(ResolvedTimeRange {
            from: resolve_spec(&self.from, now, Boundary::From)?,
            to: resolve_spec(&self.to, now, Boundary::To)?,
        })
    }
}

impl ResolvedTimeRange {
    pub fn from_millis(&self) -> i64 {
        self.from.timestamp_millis()
    }

    pub fn to_millis(&self) -> i64 {
        self.to.timestamp_millis()
    }

    pub fn format(&self, format: &str) -> (String, String) {
        (
            self.from.format(format).to_string(),
            self.to.format(format).to_string(),
        )
    }
}

pub fn resolve_spec(
    spec: &str,
    now: DateTime<FixedOffset>,
    role: Boundary,
) -> Result<DateTime<FixedOffset>> {
    let spec = spec.trim();
    if spec == "now" {
        return Ok(now);
    }

    if let Some(rest) = spec.strip_prefix("now") {
        if let Some(shifted) = parse_relative(spec, rest, now)? {
            return Ok(shifted);
        }
    }

    if let Some((inner, unit)) = spec.rsplit_once('/') {
        let unit = parse_unit(unit)
            .filter(|u| u.is_calendar())
            .ok_or_else(|| ReportError::time_parse(spec, "unsupported rounding unit"))?;
        let base = resolve_spec(inner, now, role)?;
        return round(spec, base, unit, role);
    }

    parse_absolute(spec, *now.offset())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl Unit {
    fn is_calendar(self) -> bool {
        !matches!(self, Unit::Minute | Unit::Hour)
    }
}

fn parse_unit(s: &str) -> Option<Unit> {
    match s {
        "m" => Some(Unit::Minute),
        "h" => Some(Unit::Hour),
        "d" => Some(Unit::Day),
        "w" => Some(Unit::Week),
        "M" => Some(Unit::Month),
        "y" => Some(Unit::Year),
        _ => None,
    }
}

/// `now[+-]<N><unit>`. Returns `Ok(None)` when the text is not a relative
/// spec, so boundary rounding gets a chance.
fn parse_relative(
    spec: &str,
    rest: &str,
    now: DateTime<FixedOffset>,
) -> Result<Option<DateTime<FixedOffset>>> {
    let mut chars = rest.chars();
    let negative = match chars.next() {
        Some('-') => true,
        Some('+') => false,
        _ => return Ok(None),
    };
    let body = chars.as_str();
    let digits_end = body
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(body.len());
    let (digits, unit) = body.split_at(digits_end);
    let Some(unit) = parse_unit(unit) else {
        return Ok(None);
    };
    let amount: u32 = digits
        .parse()
        .map_err(|_| ReportError::time_parse(spec, "missing or invalid amount"))?;

    shift(now, amount, unit, negative)
        .map(Some)
        .ok_or_else(|| ReportError::time_parse(spec, "shift out of range"))
}

fn shift(
    now: DateTime<FixedOffset>,
    amount: u32,
    unit: Unit,
    negative: bool,
) -> Option<DateTime<FixedOffset>> {
    let amount64 = i64::from(amount);
    match unit {
        Unit::Minute | Unit::Hour => {
            let delta = if unit == Unit::Minute {
                Duration::try_minutes(amount64)?
            } else {
                Duration::try_hours(amount64)?
            };
            if negative {
                now.checked_sub_signed(delta)
            } else {
                now.checked_add_signed(delta)
            }
        }
        Unit::Day | Unit::Week => {
            let days = Days::new(if unit == Unit::Week {
                u64::from(amount) * 7
            } else {
                u64::from(amount)
            });
            if negative {
                now.checked_sub_days(days)
            } else {
                now.checked_add_days(days)
            }
        }
        Unit::Month | Unit::Year => {
            let months = Months::new(if unit == Unit::Year {
                amount.checked_mul(12)?
            } else {
                amount
            });
            if negative {
                now.checked_sub_months(months)
            } else {
                now.checked_add_months(months)
            }
        }
    }
}

fn round(
    spec: &str,
    at: DateTime<FixedOffset>,
    unit: Unit,
    role: Boundary,
) -> Result<DateTime<FixedOffset>> {
    let date = at.date_naive();
    let out_of_range = || ReportError::time_parse(spec, "rounded time out of range");

    let (start, next): (NaiveDate, NaiveDate) = match unit {
        Unit::Day => (date, date.succ_opt().ok_or_else(out_of_range)?),
        Unit::Week => {
            // Weeks run Sunday through Saturday
            let back = Days::new(u64::from(date.weekday().num_days_from_sunday()));
            let start = date.checked_sub_days(back).ok_or_else(out_of_range)?;
            (start, start.checked_add_days(Days::new(7)).ok_or_else(out_of_range)?)
        }
        Unit::Month => {
            let start = NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
                .ok_or_else(out_of_range)?;
            (start, start.checked_add_months(Months::new(1)).ok_or_else(out_of_range)?)
        }
        Unit::Year => {
            let start = NaiveDate::from_ymd_opt(date.year(), 1, 1).ok_or_else(out_of_range)?;
            (start, start.checked_add_months(Months::new(12)).ok_or_else(out_of_range)?)
        }
        Unit::Minute | Unit::Hour => {
            return Err(ReportError::time_parse(spec, "unsupported rounding unit"));
        }
    };

    let zone = *at.offset();
    match role {
        Boundary::From => local(zone, start).ok_or_else(out_of_range),
        Boundary::To => local(zone, next)
            .and_then(|t| t.checked_sub_signed(Duration::milliseconds(1)))
            .ok_or_else(out_of_range),
    }
}

fn local(zone: FixedOffset, date: NaiveDate) -> Option<DateTime<FixedOffset>> {
    zone.from_local_datetime(&date.and_time(NaiveTime::MIN)).single()
}

fn parse_absolute(spec: &str, zone: FixedOffset) -> Result<DateTime<FixedOffset>> {
    if !spec.is_empty() && spec.bytes().all(|b| b.is_ascii_digit()) {
        let millis: i64 = spec
            .parse()
            .map_err(|_| ReportError::time_parse(spec, "epoch millis out of range"))?;
        return DateTime::from_timestamp_millis(millis)
            .map(|t| t.with_timezone(&zone))
            .ok_or_else(|| ReportError::time_parse(spec, "epoch millis out of range"));
    }

    let naive = NaiveDateTime::parse_from_str(spec, ABSOLUTE_FORMAT)
        .map_err(|_| ReportError::time_parse(spec, "unrecognised time spec"))?;
    zone.from_local_datetime(&naive)
        .single()
        .ok_or_else(|| ReportError::time_parse(spec, "ambiguous local time"))
}

/// Parse a configured zone: `UTC`, `browser` (treated as UTC on the server) or
/// a fixed offset such as `+05:30`.
pub fn parse_time_zone(name: &str) -> Result<FixedOffset> {
    let name = name.trim();
    if name.is_empty() || name.eq_ignore_ascii_case("utc") || name.eq_ignore_ascii_case("browser")
    {
        return Ok(Utc.fix());
    }
    let probe = format!("2000-01-01T00:00:00{}", name);
    DateTime::parse_from_rfc3339(&probe)
        .map(|t| *t.offset())
        .map_err(|_| ReportError::time_parse(name, "unknown time zone"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    #[test]
    fn test_now_and_relative() {
        let now = at("2024-03-13T10:30:00Z");
        assert_eq!(resolve_spec("now", now, Boundary::From).unwrap(), now);
        assert_eq!(
            resolve_spec("now-1h", now, Boundary::From).unwrap(),
            at("2024-03-13T09:30:00Z")
        );
        assert_eq!(
            resolve_spec("now+15m", now, Boundary::To).unwrap(),
            at("2024-03-13T10:45:00Z")
        );
        assert_eq!(
            resolve_spec("now-2w", now, Boundary::From).unwrap(),
            at("2024-02-28T10:30:00Z")
        );
        assert_eq!(
            resolve_spec("now-1M", now, Boundary::From).unwrap(),
            at("2024-02-13T10:30:00Z")
        );
        assert_eq!(
            resolve_spec("now-1y", now, Boundary::From).unwrap(),
            at("2023-03-13T10:30:00Z")
        );
    }

    #[test]
    fn test_relative_is_pure_for_fixed_now() {
        let now = at("2024-06-01T00:00:00+02:00");
        for spec in ["now-5m", "now-3h", "now-7d", "now+1w", "now-6M", "now-2y"] {
            let a = resolve_spec(spec, now, Boundary::From).unwrap();
            let b = resolve_spec(spec, now, Boundary::From).unwrap();
            assert_eq!(a, b, "{}", spec);
        }
    }

    #[test]
    fn test_last_hour_is_ordered() {
        let range = TimeRange::new("now-1h", "now");
        let resolved = range.resolve(FixedOffset::east_opt(0).unwrap()).unwrap();
        assert!(resolved.from < resolved.to);
    }

    #[test]
    fn test_day_boundary_depends_on_role() {
        let now = at("2024-03-13T10:30:00Z");
        let from = resolve_spec("now/d", now, Boundary::From).unwrap();
        let to = resolve_spec("now/d", now, Boundary::To).unwrap();
        assert_eq!(from, at("2024-03-13T00:00:00Z"));
        assert_eq!(to, at("2024-03-13T23:59:59.999Z"));
        assert!(from < to);
    }

    #[test]
    fn test_week_ends_on_saturday() {
        // 2024-03-13 is a Wednesday
        let now = at("2024-03-13T10:30:00Z");
        let from = resolve_spec("now/w", now, Boundary::From).unwrap();
        let to = resolve_spec("now/w", now, Boundary::To).unwrap();
        assert_eq!(from, at("2024-03-10T00:00:00Z"));
        assert_eq!(to, at("2024-03-16T23:59:59.999Z"));
    }

    #[test]
    fn test_month_and_year_boundaries() {
        let now = at("2024-02-10T08:00:00Z");
        assert_eq!(
            resolve_spec("now/M", now, Boundary::To).unwrap(),
            at("2024-02-29T23:59:59.999Z")
        );
        assert_eq!(
            resolve_spec("now-1y/y", now, Boundary::From).unwrap(),
            at("2023-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_boundary_respects_zone() {
        let now = at("2024-03-13T01:00:00+05:30");
        let from = resolve_spec("now/d", now, Boundary::From).unwrap();
        assert_eq!(from, at("2024-03-13T00:00:00+05:30"));
    }

    #[test]
    fn test_absolute_specs() {
        let now = at("2024-03-13T10:30:00Z");
        assert_eq!(
            resolve_spec("1700000000000", now, Boundary::From).unwrap(),
            at("2023-11-14T22:13:20Z")
        );
        assert_eq!(
            resolve_spec("2024-01-02 03:04:05", now, Boundary::To).unwrap(),
            at("2024-01-02T03:04:05Z")
        );
    }

    #[test]
    fn test_malformed_specs_fail() {
        let now = at("2024-03-13T10:30:00Z");
        for spec in ["", "yesterday", "now-", "now-5x", "now/h", "now-1d/q", "2024-13-01"] {
            let err = resolve_spec(spec, now, Boundary::From).unwrap_err();
            assert!(matches!(err, ReportError::TimeParse { .. }), "{}", spec);
        }
    }

    #[test]
    fn test_parse_time_zone() {
        assert_eq!(parse_time_zone("UTC").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_time_zone("browser").unwrap().local_minus_utc(), 0);
        assert_eq!(
            parse_time_zone("+05:30").unwrap().local_minus_utc(),
            5 * 3600 + 1800
        );
        assert!(parse_time_zone("Mars/Olympus").is_err());
    }
}
