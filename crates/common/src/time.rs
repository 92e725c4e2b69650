// Timestamp normalization for heterogeneous wire encodings.
//
// The backend serializes instants as ISO-8601 strings, epoch milliseconds,
// or `[seconds, nanoseconds]` tuples (an artifact of its time type). All of
// them collapse into one comparable `Timestamp`; anything unparseable
// becomes `Timestamp::Invalid` instead of an error.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;

const NAIVE_DATE_TIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
const NANOS_PER_MILLI: f64 = 1e6;

/// A normalized instant, or the marker for an unparseable input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timestamp {
    Invalid,
    At(DateTime<Utc>),
}

impl Timestamp {
    pub fn from_millis(millis: i64) -> Self {
        DateTime::from_timestamp_millis(millis).map_or(Self::Invalid, Self::At)
    }

    pub fn now() -> Self {
        Self::At(Utc::now())
    }

    pub fn instant(self) -> Option<DateTime<Utc>> {
        match self {
            Self::At(at) => Some(at),
            Self::Invalid => None,
        }
    }

    pub fn millis(self) -> Option<i64> {
        self.instant().map(|at| at.timestamp_millis())
    }

    pub fn is_valid(self) -> bool {
        matches!(self, Self::At(_))
    }

    /// Short clock label such as `10:13 PM`; empty for `Invalid`.
    pub fn label(self) -> String {
        match self {
            Self::At(at) => at.format("%-I:%M %p").to_string(),
            Self::Invalid => String::new(),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::At(at) => serializer
                .serialize_str(&at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            Self::Invalid => serializer.serialize_none(),
        }
    }
}

/// Normalize any wire encoding into a `Timestamp`. Never panics.
pub fn normalize(value: &Value) -> Timestamp {
    match value {
        Value::Array(parts) => normalize_tuple(parts),
        Value::Number(number) => number.as_f64().map_or(Timestamp::Invalid, from_float_millis),
        Value::String(text) => normalize_text(text),
        _ => Timestamp::Invalid,
    }
}

/// `[seconds, nanoseconds]` -> `seconds*1000 + floor(nanoseconds/1e6)`.
fn normalize_tuple(parts: &[Value]) -> Timestamp {
    let Some(seconds) = parts.first().and_then(Value::as_f64) else {
        return Timestamp::Invalid;
    };
    let nanos = match parts.get(1) {
        None | Some(Value::Null) => 0.0,
        Some(value) => match value.as_f64() {
            Some(nanos) => nanos,
            None => return Timestamp::Invalid,
        },
    };
    from_float_millis(seconds * 1000.0 + (nanos / NANOS_PER_MILLI).floor())
}

fn normalize_text(text: &str) -> Timestamp {
    let text = text.trim();
    if text.is_empty() {
        return Timestamp::Invalid;
    }
    if let Ok(millis) = text.parse::<i64>() {
        return Timestamp::from_millis(millis);
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Timestamp::At(at.with_timezone(&Utc));
    }
    for format in NAIVE_DATE_TIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Timestamp::At(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map_or(Timestamp::Invalid, |naive| Timestamp::At(naive.and_utc()))
}

fn from_float_millis(millis: f64) -> Timestamp {
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return Timestamp::Invalid;
    }
    Timestamp::from_millis(millis.trunc() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn tuple_converts_seconds_and_nanos() {
        let ts = normalize(&json!([1_700_000_000, 500_000_000]));
        assert_eq!(ts.millis(), Some(1_700_000_000_500));
    }

    #[test]
    fn tuple_floors_sub_millisecond_nanos() {
        let ts = normalize(&json!([1_700_000_000, 999_999]));
        assert_eq!(ts.millis(), Some(1_700_000_000_000));
    }

    #[test]
    fn tuple_without_nanos_defaults_to_zero() {
        assert_eq!(normalize(&json!([1_700_000_000])).millis(), Some(1_700_000_000_000));
        assert_eq!(normalize(&json!([1_700_000_000, null])).millis(), Some(1_700_000_000_000));
    }

    #[test]
    fn malformed_tuples_are_invalid() {
        assert_eq!(normalize(&json!([])), Timestamp::Invalid);
        assert_eq!(normalize(&json!(["soon", 1])), Timestamp::Invalid);
        assert_eq!(normalize(&json!([1_700_000_000, "x"])), Timestamp::Invalid);
    }

    #[test]
    fn number_is_epoch_millis() {
        assert_eq!(normalize(&json!(1_700_000_000_500_i64)).millis(), Some(1_700_000_000_500));
        assert_eq!(normalize(&json!(1_700_000_000_500.9)).millis(), Some(1_700_000_000_500));
    }

    #[test]
    fn rfc3339_strings_parse_with_offsets() {
        let ts = normalize(&json!("2023-11-14T22:13:20.500Z"));
        assert_eq!(ts.millis(), Some(1_700_000_000_500));

        let offset = normalize(&json!("2023-11-15T03:43:20.500+05:30"));
        assert_eq!(offset, ts);
    }

    #[test]
    fn naive_strings_are_taken_as_utc() {
        assert_eq!(
            normalize(&json!("2023-11-14T22:13:20.5")).millis(),
            Some(1_700_000_000_500)
        );
        assert_eq!(normalize(&json!("2023-11-14 22:13:20")).millis(), Some(1_700_000_000_000));
        assert_eq!(normalize(&json!("2023-11-14")).millis(), Some(1_699_920_000_000));
    }

    #[test]
    fn numeric_strings_are_epoch_millis() {
        assert_eq!(normalize(&json!("1700000000500")).millis(), Some(1_700_000_000_500));
    }

    #[test]
    fn garbage_is_invalid_not_an_error() {
        for value in [
            json!("not a date"),
            json!(""),
            json!(null),
            json!(true),
            json!({ "seconds": 1 }),
            json!(f64::MAX),
        ] {
            assert_eq!(normalize(&value), Timestamp::Invalid, "input: {value}");
        }
    }

    #[test]
    fn label_formats_clock_time() {
        let ts = normalize(&json!("2023-11-14T22:13:20Z"));
        assert_eq!(ts.label(), "10:13 PM");
        assert_eq!(normalize(&json!("2023-11-14T09:05:00Z")).label(), "9:05 AM");
        assert_eq!(Timestamp::Invalid.label(), "");
    }

    #[test]
    fn serializes_as_rfc3339_or_null() {
        let ts = Timestamp::from_millis(1_700_000_000_500);
        assert_eq!(serde_json::to_value(ts).unwrap(), json!("2023-11-14T22:13:20.500Z"));
        assert_eq!(serde_json::to_value(Timestamp::Invalid).unwrap(), Value::Null);
    }

    proptest! {
        #[test]
        fn tuple_matches_integer_millis(
            seconds in 0i64..4_000_000_000,
            nanos in 0i64..1_000_000_000,
        ) {
            let ts = normalize(&json!([seconds, nanos]));
            prop_assert_eq!(ts.millis(), Some(seconds * 1000 + nanos / 1_000_000));
        }

        #[test]
        fn numeric_text_is_epoch_millis(millis in -8_000_000_000_000i64..8_000_000_000_000) {
            let ts = normalize(&json!(millis.to_string()));
            prop_assert_eq!(ts.millis(), Some(millis));
        }
    }
}
