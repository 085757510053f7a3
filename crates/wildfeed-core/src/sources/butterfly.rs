// Butterfly collection adapter
use serde::Deserialize;
use serde_json::Value;

use super::{
    first_non_blank, lenient, parse_day, parse_grade, parse_timestamp, raw_id, SourceAdapter,
    UNKNOWN_SPECIES,
};
use crate::models::{
    GeoPoint, Grade, MediaItem, MediaKind, ObservationRecord, OriginCounts, QualityFlags, Source,
};

pub struct ButterflyAdapter;

/// Raw butterfly record - nested species, bare photo URLs, `lat`/`lng`
#[derive(Debug, Default, Deserialize)]
struct RawButterfly {
    #[serde(default, deserialize_with = "lenient")]
    species: RawSpecies,
    #[serde(default, deserialize_with = "lenient")]
    description: String,
    #[serde(default, deserialize_with = "lenient")]
    photos: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    lng: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    date: String,
    #[serde(default, deserialize_with = "lenient")]
    created_at: String,
    #[serde(default, deserialize_with = "lenient")]
    grade: String,
    #[serde(default, deserialize_with = "lenient")]
    captive: bool,
    #[serde(default, deserialize_with = "lenient")]
    accurate_location: bool,
    #[serde(default, deserialize_with = "lenient")]
    counts: RawCounts,
}

#[derive(Debug, Default, Deserialize)]
struct RawSpecies {
    #[serde(default, deserialize_with = "lenient")]
    common_name: String,
    #[serde(default, deserialize_with = "lenient")]
    scientific_name: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawCounts {
    #[serde(default, deserialize_with = "lenient")]
    fobi: u64,
    #[serde(default, deserialize_with = "lenient")]
    app: u64,
}

impl SourceAdapter for ButterflyAdapter {
    fn source(&self) -> Source {
        Source::Butterfly
    }

    fn normalize(&self, raw: &Value) -> Option<ObservationRecord> {
        let id = raw_id(raw)?;
        let fly: RawButterfly = serde_json::from_value(raw.clone()).unwrap_or_default();

        let media: Vec<MediaItem> = fly
            .photos
            .into_iter()
            .filter(|url| !url.trim().is_empty())
            .map(|url| MediaItem {
                url,
                kind: MediaKind::Photo,
            })
            .collect();

        let location = match (fly.lat, fly.lng) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)).filter(GeoPoint::is_valid),
            _ => None,
        };

        let grade = parse_grade(&fly.grade);

        Some(ObservationRecord {
            id,
            source: Source::Butterfly,
            title: first_non_blank(
                &[
                    fly.species.common_name.as_str(),
                    fly.species.scientific_name.as_str(),
                ],
                UNKNOWN_SPECIES,
            ),
            description: fly.description.trim().to_string(),
            quality: QualityFlags {
                grade,
                has_media: !media.is_empty(),
                is_wild: !fly.captive,
                location_accurate: fly.accurate_location,
                needs_id: grade.map_or(true, |g| g == Grade::NeedsId),
            },
            media,
            location,
            observation_date: parse_day(&fly.date),
            created_at: parse_timestamp(&fly.created_at),
            counts: OriginCounts {
                fobi: fly.counts.fobi,
                native_app: fly.counts.app,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_species_and_photos() {
        let record = ButterflyAdapter
            .normalize(&json!({
                "id": "bf-31",
                "species": {"common_name": "", "scientific_name": "Ornithoptera richmondia"},
                "photos": ["https://img.example/wing.jpg", ""],
                "lat": -28.2,
                "lng": 153.4,
                "date": "2024-01-20",
                "grade": "needs_id",
                "captive": true,
                "counts": {"fobi": 1, "app": 4}
            }))
            .unwrap();

        assert_eq!(record.id, "bf-31");
        assert_eq!(record.source, Source::Butterfly);
        assert_eq!(record.title, "Ornithoptera richmondia");
        assert_eq!(record.media.len(), 1);
        assert_eq!(record.location, Some(GeoPoint::new(-28.2, 153.4)));
        assert_eq!(record.quality.grade, Some(Grade::NeedsId));
        assert!(record.quality.needs_id);
        assert!(!record.quality.is_wild);
        assert_eq!(record.counts.native_app, 4);
    }

    #[test]
    fn test_out_of_range_location_dropped() {
        let record = ButterflyAdapter
            .normalize(&json!({"id": 3, "lat": 128.0, "lng": 153.4}))
            .unwrap();
        assert!(record.location.is_none());
        assert!(record.quality.is_wild);
    }
}
