// Per-source adapters - each collection's raw JSON shape mapped onto ObservationRecord
pub mod bird;
pub mod butterfly;
pub mod general;

pub use bird::BirdAdapter;
pub use butterfly::ButterflyAdapter;
pub use general::GeneralAdapter;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::models::{Grade, ObservationRecord, Source};
use crate::query::{self, Param};

/// What the fetcher needs to know about one collection
///
/// The fetch path is shared; only the endpoint, the parameters it
/// understands and the record shape differ between sources.
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    fn endpoint(&self) -> String {
        self.source().endpoint()
    }

    fn accepts(&self, param: Param) -> bool {
        query::accepts(self.source(), param)
    }

    /// Map one raw record; `None` when it has no usable id
    fn normalize(&self, raw: &Value) -> Option<ObservationRecord>;
}

static BIRD: BirdAdapter = BirdAdapter;
static BUTTERFLY: ButterflyAdapter = ButterflyAdapter;
static GENERAL: GeneralAdapter = GeneralAdapter;

pub fn adapter_for(source: Source) -> &'static dyn SourceAdapter {
    match source {
        Source::Bird => &BIRD,
        Source::Butterfly => &BUTTERFLY,
        Source::General => &GENERAL,
    }
}

/// Field deserializer that swallows type mismatches into the default
///
/// Upstream shapes drift; a number where a string was expected should cost
/// us that field, not the whole record.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Upstream ids come as strings or numbers
pub(crate) fn raw_id(raw: &Value) -> Option<String> {
    match raw.get("id")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn parse_grade(raw: &str) -> Option<Grade> {
    raw.parse().ok()
}

/// Accept `YYYY-MM-DD` or anything that starts with it
pub(crate) fn parse_day(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// RFC 3339, or a bare `YYYY-MM-DD HH:MM:SS` taken as UTC
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// First non-blank candidate, or the fallback
pub(crate) fn first_non_blank(candidates: &[&str], fallback: &str) -> String {
    candidates
        .iter()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

pub(crate) const UNKNOWN_SPECIES: &str = "Unknown species";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_adapter_registry() {
        for source in Source::ALL {
            let adapter = adapter_for(source);
            assert_eq!(adapter.source(), source);
            assert_eq!(adapter.endpoint(), source.endpoint());
            assert!(adapter.accepts(Param::Page));
        }
        assert!(!adapter_for(Source::Bird).accepts(Param::Radius));
        assert!(adapter_for(Source::General).accepts(Param::Radius));
    }

    #[test]
    fn test_raw_id_forms() {
        assert_eq!(raw_id(&json!({"id": 42})), Some("42".to_string()));
        assert_eq!(raw_id(&json!({"id": " b-7 "})), Some("b-7".to_string()));
        assert_eq!(raw_id(&json!({"id": ""})), None);
        assert_eq!(raw_id(&json!({"id": null})), None);
        assert_eq!(raw_id(&json!({"name": "x"})), None);
    }

    #[test]
    fn test_date_parsing() {
        assert_eq!(
            parse_day("2024-03-01T08:15:00Z"),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert_eq!(parse_day("01/03/2024"), None);
        assert!(parse_timestamp("2024-03-02T10:00:00+10:00").is_some());
        assert!(parse_timestamp("2024-03-02 10:00:00").is_some());
        assert!(parse_timestamp("last tuesday").is_none());
    }
}
