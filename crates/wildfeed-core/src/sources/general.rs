// General (multi-taxon) collection adapter
use serde::Deserialize;
use serde_json::Value;

use super::{
    first_non_blank, lenient, parse_day, parse_grade, parse_timestamp, raw_id, SourceAdapter,
    UNKNOWN_SPECIES,
};
use crate::models::{
    GeoPoint, Grade, MediaItem, MediaKind, ObservationRecord, OriginCounts, QualityFlags, Source,
};

/// Positional accuracy (meters) at or under which a location counts as accurate
const ACCURATE_WITHIN_M: f64 = 1000.0;

pub struct GeneralAdapter;

/// Raw general record - taxon object, typed media, location as object or "lat,lon"
#[derive(Debug, Default, Deserialize)]
struct RawGeneral {
    #[serde(default, deserialize_with = "lenient")]
    taxon: RawTaxon,
    #[serde(default, deserialize_with = "lenient")]
    description: String,
    #[serde(default, deserialize_with = "lenient")]
    media: Vec<RawMedia>,
    #[serde(default)]
    location: Value,
    #[serde(default, deserialize_with = "lenient")]
    observed_on: String,
    #[serde(default, deserialize_with = "lenient")]
    created_at: String,
    #[serde(default, deserialize_with = "lenient")]
    quality_grade: String,
    #[serde(default, deserialize_with = "lenient")]
    captive: bool,
    #[serde(default, deserialize_with = "lenient")]
    positional_accuracy: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    data_source: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawTaxon {
    #[serde(default, deserialize_with = "lenient")]
    name: String,
    #[serde(default, deserialize_with = "lenient")]
    preferred_common_name: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawMedia {
    #[serde(default, deserialize_with = "lenient")]
    file_url: String,
    #[serde(default, rename = "type", deserialize_with = "lenient")]
    media_type: String,
}

fn media_kind(raw: &str) -> MediaKind {
    match raw.trim().to_ascii_lowercase().as_str() {
        "sound" | "audio" => MediaKind::Audio,
        "video" => MediaKind::Video,
        _ => MediaKind::Photo,
    }
}

fn parse_location(raw: &Value) -> Option<GeoPoint> {
    let point = match raw {
        Value::Object(map) => GeoPoint::new(
            map.get("latitude")?.as_f64()?,
            map.get("longitude")?.as_f64()?,
        ),
        Value::String(s) => {
            let (lat, lon) = s.split_once(',')?;
            GeoPoint::new(lat.trim().parse().ok()?, lon.trim().parse().ok()?)
        }
        _ => return None,
    };
    Some(point).filter(GeoPoint::is_valid)
}

impl SourceAdapter for GeneralAdapter {
    fn source(&self) -> Source {
        Source::General
    }

    fn normalize(&self, raw: &Value) -> Option<ObservationRecord> {
        let id = raw_id(raw)?;
        let obs: RawGeneral = serde_json::from_value(raw.clone()).unwrap_or_default();

        let media: Vec<MediaItem> = obs
            .media
            .into_iter()
            .filter(|m| !m.file_url.trim().is_empty())
            .map(|m| MediaItem {
                kind: media_kind(&m.media_type),
                url: m.file_url,
            })
            .collect();

        let grade = parse_grade(&obs.quality_grade);

        let counts = match obs.data_source.trim().to_ascii_lowercase().as_str() {
            "app" | "native_app" | "mobile" => OriginCounts {
                fobi: 0,
                native_app: 1,
            },
            "fobi" => OriginCounts {
                fobi: 1,
                native_app: 0,
            },
            _ => OriginCounts::default(),
        };

        Some(ObservationRecord {
            id,
            source: Source::General,
            title: first_non_blank(
                &[
                    obs.taxon.preferred_common_name.as_str(),
                    obs.taxon.name.as_str(),
                ],
                UNKNOWN_SPECIES,
            ),
            description: obs.description.trim().to_string(),
            quality: QualityFlags {
                grade,
                has_media: !media.is_empty(),
                is_wild: !obs.captive,
                location_accurate: obs
                    .positional_accuracy
                    .map_or(false, |m| (0.0..=ACCURATE_WITHIN_M).contains(&m)),
                needs_id: grade.map_or(true, |g| g == Grade::NeedsId),
            },
            media,
            location: parse_location(&obs.location),
            observation_date: parse_day(&obs.observed_on),
            created_at: parse_timestamp(&obs.created_at),
            counts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_location_object_and_string() {
        let a = GeneralAdapter
            .normalize(&json!({"id": 1, "location": {"latitude": -27.0, "longitude": 152.9}}))
            .unwrap();
        assert_eq!(a.location, Some(GeoPoint::new(-27.0, 152.9)));

        let b = GeneralAdapter
            .normalize(&json!({"id": 2, "location": "-27.5, 153.1"}))
            .unwrap();
        assert_eq!(b.location, Some(GeoPoint::new(-27.5, 153.1)));

        let c = GeneralAdapter
            .normalize(&json!({"id": 3, "location": "somewhere nice"}))
            .unwrap();
        assert!(c.location.is_none());
    }

    #[test]
    fn test_taxon_media_and_origin() {
        let record = GeneralAdapter
            .normalize(&json!({
                "id": "g-100",
                "taxon": {"name": "Litoria caerulea", "preferred_common_name": "Green Tree Frog"},
                "media": [
                    {"file_url": "https://snd.example/croak.mp3", "type": "sound"},
                    {"file_url": "https://img.example/frog.jpg", "type": "image"}
                ],
                "observed_on": "2023-11-05",
                "quality_grade": "casual",
                "positional_accuracy": 12.5,
                "data_source": "app"
            }))
            .unwrap();

        assert_eq!(record.title, "Green Tree Frog");
        assert_eq!(record.media[0].kind, MediaKind::Audio);
        assert_eq!(record.media[1].kind, MediaKind::Photo);
        assert_eq!(record.quality.grade, Some(Grade::Casual));
        assert!(!record.quality.needs_id);
        assert!(record.quality.location_accurate);
        assert_eq!(record.counts, OriginCounts { fobi: 0, native_app: 1 });
    }
}
