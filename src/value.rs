use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use chrono_tz::Tz;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// `YYYYMMDD[HHMMSS[.fff]][[offset[:ZONE]]]`, e.g. `20230615120000.000[-5:EST]`.
static STATEMENT_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{8})(\d{6})?(?:\.(\d+))?(?:\[([+-]?\d{1,2}(?:\.\d+)?)(?::(\w+))?\])?$")
        .expect("timestamp pattern is valid")
});

const TRUTHY: [&str; 4] = ["Y", "YES", "T", "TRUE"];
const FALSY: [&str; 4] = ["N", "NO", "F", "FALSE"];

/// A single typed slot of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Decimal(Decimal),
    Bool(bool),
    Timestamp(NaiveDateTime),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Timestamp(ts) => {
                if ts.time() == NaiveTime::MIN {
                    write!(f, "{}", ts.format("%Y-%m-%d"))
                } else {
                    write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S"))
                }
            }
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// Destination type category of a column, using the single-letter codes of
/// the Postgres `pg_type.typcategory` catalog plus `DATE`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TypeCode {
    /// `S`
    Text,
    /// `E` (enumerations arrive as text too)
    Enum,
    /// `N`
    Numeric,
    /// `B`
    Boolean,
    /// `D`
    Timestamp,
    /// `DATE`: a timestamp truncated to midnight
    Date,
    /// Any other category; values of such columns always cast to null.
    Other(String),
}

impl TypeCode {
    pub fn code(&self) -> &str {
        match self {
            TypeCode::Text => "S",
            TypeCode::Enum => "E",
            TypeCode::Numeric => "N",
            TypeCode::Boolean => "B",
            TypeCode::Timestamp => "D",
            TypeCode::Date => "DATE",
            TypeCode::Other(code) => code,
        }
    }
}

impl From<&str> for TypeCode {
    fn from(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "S" => TypeCode::Text,
            "E" => TypeCode::Enum,
            "N" => TypeCode::Numeric,
            "B" => TypeCode::Boolean,
            "D" => TypeCode::Timestamp,
            "DATE" => TypeCode::Date,
            _ => TypeCode::Other(code.trim().to_string()),
        }
    }
}

impl From<String> for TypeCode {
    fn from(code: String) -> Self {
        TypeCode::from(code.as_str())
    }
}

impl From<TypeCode> for String {
    fn from(code: TypeCode) -> Self {
        code.code().to_string()
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Casts a raw source string into the column's type. Anything that cannot be
/// read under the declared type becomes `Value::Null`.
pub fn cast_value(raw: &str, type_code: &TypeCode, zone: &Tz) -> Value {
    match type_code {
        TypeCode::Text | TypeCode::Enum => {
            Value::Text(html_escape::decode_html_entities(raw).into_owned())
        }
        TypeCode::Numeric => parse_decimal(raw).map_or(Value::Null, Value::Decimal),
        TypeCode::Boolean => parse_bool(raw).map_or(Value::Null, Value::Bool),
        TypeCode::Timestamp => parse_timestamp(raw, zone).map_or(Value::Null, Value::Timestamp),
        TypeCode::Date => parse_timestamp(raw, zone)
            .map(|ts| ts.date().and_time(NaiveTime::MIN))
            .map_or(Value::Null, Value::Timestamp),
        TypeCode::Other(_) => Value::Null,
    }
}

pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .ok()
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    let upper = raw.trim().to_ascii_uppercase();
    if TRUTHY.contains(&upper.as_str()) {
        Some(true)
    } else if FALSY.contains(&upper.as_str()) {
        Some(false)
    } else {
        None
    }
}

/// Parses a statement timestamp and returns it as naive local time in `zone`.
///
/// A value without a time part is taken as midnight in the target zone. A
/// value with a time but no bracketed offset is taken as GMT.
pub fn parse_timestamp(raw: &str, zone: &Tz) -> Option<NaiveDateTime> {
    let caps = STATEMENT_TIMESTAMP.captures(raw.trim())?;
    let date = NaiveDate::parse_from_str(&caps[1], "%Y%m%d").ok()?;

    let Some(clock) = caps.get(2) else {
        return Some(date.and_time(NaiveTime::MIN));
    };

    let time = NaiveTime::parse_from_str(clock.as_str(), "%H%M%S").ok()?;
    let nanos = caps.get(3).map_or(Some(0), |m| fraction_to_nanos(m.as_str()))?;
    let local = date.and_time(time).checked_add_signed(chrono::Duration::nanoseconds(nanos))?;

    let offset_seconds = match caps.get(4) {
        Some(hours) => (hours.as_str().parse::<f64>().ok()? * 3600.0).round() as i32,
        None => 0,
    };
    let offset = FixedOffset::east_opt(offset_seconds)?;
    let stamped = offset.from_local_datetime(&local).single()?;

    Some(stamped.with_timezone(zone).naive_local())
}

fn fraction_to_nanos(digits: &str) -> Option<i64> {
    let significant: String = digits.chars().take(9).collect();
    let padded = format!("{:0<9}", significant);
    padded.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_boolean_tokens() {
        let tz = chrono_tz::UTC;
        for token in ["Y", "yes", "T", "True"] {
            assert_eq!(cast_value(token, &TypeCode::Boolean, &tz), Value::Bool(true));
        }
        for token in ["n", "NO", "f", "FALSE"] {
            assert_eq!(cast_value(token, &TypeCode::Boolean, &tz), Value::Bool(false));
        }
        assert_eq!(cast_value("maybe", &TypeCode::Boolean, &tz), Value::Null);
        assert_eq!(cast_value("", &TypeCode::Boolean, &tz), Value::Null);
    }

    #[test]
    fn test_numeric_keeps_scale() {
        let tz = chrono_tz::UTC;
        let v = cast_value("10.00", &TypeCode::Numeric, &tz);
        assert_eq!(v, Value::Decimal(Decimal::new(1000, 2)));
        assert_eq!(v.to_string(), "10.00");
        assert_eq!(
            cast_value("-2.5E2", &TypeCode::Numeric, &tz),
            Value::Decimal(Decimal::new(-250, 0))
        );
        assert_eq!(cast_value("ten", &TypeCode::Numeric, &tz), Value::Null);
    }

    #[test]
    fn test_text_decodes_entities() {
        let tz = chrono_tz::UTC;
        assert_eq!(
            cast_value("AT&amp;T &quot;Class A&quot;", &TypeCode::Text, &tz),
            Value::Text("AT&T \"Class A\"".to_string())
        );
    }

    #[test]
    fn test_timestamp_moves_to_target_zone() {
        let fixed_minus_five: Tz = "Etc/GMT+5".parse().unwrap();
        assert_eq!(
            parse_timestamp("20230615120000", &fixed_minus_five),
            Some(at(2023, 6, 15, 7, 0, 0))
        );
        assert_eq!(
            cast_value("20230615120000", &TypeCode::Date, &fixed_minus_five),
            Value::Timestamp(at(2023, 6, 15, 0, 0, 0))
        );

        // New York observes daylight time in June
        let new_york: Tz = "America/New_York".parse().unwrap();
        assert_eq!(
            parse_timestamp("20230615120000", &new_york),
            Some(at(2023, 6, 15, 8, 0, 0))
        );
        assert_eq!(
            parse_timestamp("20230115120000", &new_york),
            Some(at(2023, 1, 15, 7, 0, 0))
        );
    }

    #[test]
    fn test_timestamp_with_offset_and_fraction() {
        let tz = chrono_tz::UTC;
        let ts = parse_timestamp("20230615120000.5[-5:EST]", &tz).unwrap();
        assert_eq!(ts, at(2023, 6, 15, 17, 0, 0) + chrono::Duration::milliseconds(500));

        let nst = parse_timestamp("20230615120000[-3.5:NST]", &tz).unwrap();
        assert_eq!(nst, at(2023, 6, 15, 15, 30, 0));
    }

    #[test]
    fn test_date_only_and_garbage() {
        let tz: Tz = "America/New_York".parse().unwrap();
        assert_eq!(parse_timestamp("20231231", &tz), Some(at(2023, 12, 31, 0, 0, 0)));
        assert_eq!(parse_timestamp("2023-12-31", &tz), None);
        assert_eq!(parse_timestamp("20231332120000", &tz), None);
        assert_eq!(cast_value("soon", &TypeCode::Timestamp, &tz), Value::Null);
    }

    #[test]
    fn test_type_code_round_trip() {
        assert_eq!(TypeCode::from("date"), TypeCode::Date);
        assert_eq!(TypeCode::from("U"), TypeCode::Other("U".to_string()));
        assert_eq!(String::from(TypeCode::Numeric), "N");
        assert_eq!(cast_value("x", &TypeCode::from("U"), &chrono_tz::UTC), Value::Null);
    }

    #[test]
    fn test_display_matches_delimited_output() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::Timestamp(at(2023, 6, 15, 0, 0, 0)).to_string(), "2023-06-15");
        assert_eq!(
            Value::Timestamp(at(2023, 6, 15, 7, 5, 9)).to_string(),
            "2023-06-15 07:05:09"
        );
    }
}
