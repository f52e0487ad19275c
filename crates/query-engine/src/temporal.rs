//! Datetime filtering.
//!
//! Accepts an instant (`2018-02-12T10:00:00Z`) or an interval
//! (`start/end`, either side may be `..`). Instants match the whole UTC
//! calendar day they fall in.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::predicate::{CompareOp, Predicate};

/// A parsed datetime expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalQuery {
    Instant(DateTime<Utc>),
    /// Bounds are inclusive; `None` means open.
    Interval {
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
}

impl TemporalQuery {
    /// Parse a datetime expression.
    ///
    /// Returns `Ok(None)` when the expression is empty or yields no bound:
    /// an unparseable instant, or an interval whose sides are all open or
    /// unparseable. Only an interval with other than two parts is an error.
    pub fn parse(expression: &str) -> EngineResult<Option<Self>> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Ok(None);
        }

        if !expression.contains('/') {
            let instant = parse_datetime(expression);
            if instant.is_none() {
                warn!(datetime = %expression, "Ignoring unparseable datetime");
            }
            return Ok(instant.map(TemporalQuery::Instant));
        }

        let parts: Vec<&str> = expression.split('/').collect();
        if parts.len() != 2 {
            return Err(EngineError::InvalidDateRange(format!(
                "expected start/end, got {} parts",
                parts.len()
            )));
        }

        let start = parse_bound(parts[0]);
        let end = parse_bound(parts[1]);

        if start.is_none() && end.is_none() {
            return Ok(None);
        }
        Ok(Some(TemporalQuery::Interval { start, end }))
    }

    /// Range predicate on `column`.
    pub fn to_predicate(&self, column: &str) -> Predicate {
        match self {
            TemporalQuery::Instant(instant) => {
                let day_start = instant
                    .date_naive()
                    .and_hms_opt(0, 0, 0)
                    .map(|dt| dt.and_utc())
                    .unwrap_or(*instant);
                let next_day = day_start + Duration::days(1);

                Predicate::And(vec![
                    Predicate::compare(column, CompareOp::Ge, day_start),
                    Predicate::compare(column, CompareOp::Lt, next_day),
                ])
            }
            TemporalQuery::Interval { start, end } => {
                let mut parts = Vec::new();
                if let Some(start) = start {
                    parts.push(Predicate::compare(column, CompareOp::Ge, *start));
                }
                if let Some(end) = end {
                    parts.push(Predicate::compare(column, CompareOp::Le, *end));
                }
                Predicate::all(parts).unwrap_or(Predicate::And(Vec::new()))
            }
        }
    }
}

fn parse_bound(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text == ".." || text.is_empty() {
        return None;
    }
    let parsed = parse_datetime(text);
    if parsed.is_none() {
        warn!(datetime = %text, "Ignoring unparseable interval bound");
    }
    parsed
}

/// Parse a single datetime.
///
/// Accepts RFC 3339 plus zone-less `YYYY-MM-DDTHH:MM:SS`,
/// `YYYY-MM-DD HH:MM:SS` and `YYYY-MM-DD`, which are taken as UTC.
pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.and_utc());
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Builds the datetime predicate for a collection.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemporalPredicateBuilder;

impl TemporalPredicateBuilder {
    /// Predicate for `datetime` on `column`.
    ///
    /// Without a datetime column, or without a datetime expression, there is
    /// nothing to filter and the expression is not inspected.
    pub fn build(datetime: Option<&str>, column: Option<&str>) -> EngineResult<Option<Predicate>> {
        let (Some(datetime), Some(column)) = (datetime, column) else {
            return Ok(None);
        };
        if column.trim().is_empty() {
            return Ok(None);
        }

        Ok(TemporalQuery::parse(datetime)?.map(|query| query.to_predicate(column)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn test_open_end_interval_has_only_lower_bound() {
        let predicate = TemporalPredicateBuilder::build(Some("2018-02-12T00:00:00Z/.."), Some("observed"))
            .unwrap()
            .unwrap();
        assert_eq!(
            predicate,
            Predicate::compare("observed", CompareOp::Ge, utc(2018, 2, 12, 0, 0, 0))
        );
    }

    #[test]
    fn test_open_start_interval_has_only_upper_bound() {
        let predicate = TemporalPredicateBuilder::build(Some("../2018-03-18T12:31:12Z"), Some("observed"))
            .unwrap()
            .unwrap();
        assert_eq!(
            predicate,
            Predicate::compare("observed", CompareOp::Le, utc(2018, 3, 18, 12, 31, 12))
        );
    }

    #[test]
    fn test_closed_interval() {
        let predicate =
            TemporalPredicateBuilder::build(Some("2018-02-12/2018-03-18"), Some("observed"))
                .unwrap()
                .unwrap();
        assert_eq!(
            predicate,
            Predicate::And(vec![
                Predicate::compare("observed", CompareOp::Ge, utc(2018, 2, 12, 0, 0, 0)),
                Predicate::compare("observed", CompareOp::Le, utc(2018, 3, 18, 0, 0, 0)),
            ])
        );
    }

    #[test]
    fn test_too_many_parts() {
        assert!(matches!(
            TemporalPredicateBuilder::build(Some("a/b/c"), Some("observed")),
            Err(EngineError::InvalidDateRange(_))
        ));
    }

    #[test]
    fn test_unparseable_interval_side_skipped() {
        let predicate = TemporalPredicateBuilder::build(Some("yesterday/2018-03-18"), Some("observed"))
            .unwrap()
            .unwrap();
        assert_eq!(
            predicate,
            Predicate::compare("observed", CompareOp::Le, utc(2018, 3, 18, 0, 0, 0))
        );

        assert_eq!(
            TemporalPredicateBuilder::build(Some("a/b"), Some("observed")).unwrap(),
            None
        );
        assert_eq!(TemporalPredicateBuilder::build(Some("../.."), Some("observed")).unwrap(), None);
    }

    #[test]
    fn test_instant_matches_calendar_day() {
        let predicate = TemporalPredicateBuilder::build(Some("2018-02-12T15:45:00Z"), Some("observed"))
            .unwrap()
            .unwrap();
        assert_eq!(
            predicate,
            Predicate::And(vec![
                Predicate::compare("observed", CompareOp::Ge, utc(2018, 2, 12, 0, 0, 0)),
                Predicate::compare("observed", CompareOp::Lt, utc(2018, 2, 13, 0, 0, 0)),
            ])
        );
    }

    #[test]
    fn test_instant_with_offset_uses_utc_day() {
        let query = TemporalQuery::parse("2018-02-12T23:30:00-02:00").unwrap().unwrap();
        assert_eq!(query, TemporalQuery::Instant(utc(2018, 2, 13, 1, 30, 0)));
    }

    #[test]
    fn test_unparseable_instant_ignored() {
        assert_eq!(TemporalPredicateBuilder::build(Some("not a date"), Some("observed")).unwrap(), None);
    }

    #[test]
    fn test_no_column_is_noop() {
        assert_eq!(TemporalPredicateBuilder::build(Some("a/b/c"), None).unwrap(), None);
        assert_eq!(TemporalPredicateBuilder::build(Some("2018-02-12"), Some("")).unwrap(), None);
        assert_eq!(TemporalPredicateBuilder::build(None, Some("observed")).unwrap(), None);
        assert_eq!(TemporalPredicateBuilder::build(Some("  "), Some("observed")).unwrap(), None);
    }

    #[test]
    fn test_parse_datetime_formats() {
        let expected = utc(2024, 12, 29, 12, 0, 0);
        assert_eq!(parse_datetime("2024-12-29T12:00:00Z"), Some(expected));
        assert_eq!(parse_datetime("2024-12-29T12:00:00"), Some(expected));
        assert_eq!(parse_datetime("2024-12-29 12:00:00"), Some(expected));
        assert_eq!(parse_datetime("2024-12-29"), Some(utc(2024, 12, 29, 0, 0, 0)));
        assert_eq!(parse_datetime("29/12/2024"), None);
    }
}
