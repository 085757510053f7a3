// Bird collection adapter
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{
    first_non_blank, lenient, parse_day, parse_grade, parse_timestamp, raw_id, SourceAdapter,
    UNKNOWN_SPECIES,
};
use crate::models::{
    GeoPoint, Grade, MediaItem, MediaKind, ObservationRecord, OriginCounts, QualityFlags, Source,
};

pub struct BirdAdapter;

/// Raw bird record - flat, with photos and recordings in separate arrays
#[derive(Debug, Default, Deserialize)]
struct RawBird {
    #[serde(default, deserialize_with = "lenient")]
    common_name: String,
    #[serde(default, deserialize_with = "lenient")]
    scientific_name: String,
    #[serde(default, deserialize_with = "lenient")]
    notes: String,
    #[serde(default, deserialize_with = "lenient")]
    images: Vec<RawMedia>,
    #[serde(default, deserialize_with = "lenient")]
    recordings: Vec<RawMedia>,
    #[serde(default, deserialize_with = "lenient")]
    latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    longitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    observation_date: String,
    #[serde(default, deserialize_with = "lenient")]
    created_at: String,
    #[serde(default, deserialize_with = "lenient")]
    quality_grade: String,
    #[serde(default = "wild_by_default", deserialize_with = "lenient_wild")]
    is_wild: bool,
    #[serde(default, deserialize_with = "lenient")]
    location_accurate: bool,
    #[serde(default, deserialize_with = "lenient")]
    fobi_count: u64,
    #[serde(default, deserialize_with = "lenient")]
    app_count: u64,
}

#[derive(Debug, Default, Deserialize)]
struct RawMedia {
    #[serde(default, deserialize_with = "lenient")]
    url: String,
}

fn wild_by_default() -> bool {
    true
}

fn lenient_wild<'de, D: serde::Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(value.as_bool().unwrap_or(true))
}

impl SourceAdapter for BirdAdapter {
    fn source(&self) -> Source {
        Source::Bird
    }

    fn normalize(&self, raw: &Value) -> Option<ObservationRecord> {
        let id = raw_id(raw)?;
        let bird: RawBird = match serde_json::from_value(raw.clone()) {
            Ok(bird) => bird,
            Err(e) => {
                debug!("Bird record {} not an object: {}", id, e);
                RawBird::default()
            }
        };

        let media: Vec<MediaItem> = bird
            .images
            .into_iter()
            .map(|m| (m.url, MediaKind::Photo))
            .chain(bird.recordings.into_iter().map(|m| (m.url, MediaKind::Audio)))
            .filter(|(url, _)| !url.trim().is_empty())
            .map(|(url, kind)| MediaItem { url, kind })
            .collect();

        let location = match (bird.latitude, bird.longitude) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)).filter(GeoPoint::is_valid),
            _ => None,
        };

        let grade = parse_grade(&bird.quality_grade);

        Some(ObservationRecord {
            id,
            source: Source::Bird,
            title: first_non_blank(
                &[bird.common_name.as_str(), bird.scientific_name.as_str()],
                UNKNOWN_SPECIES,
            ),
            description: bird.notes.trim().to_string(),
            quality: QualityFlags {
                grade,
                has_media: !media.is_empty(),
                is_wild: bird.is_wild,
                location_accurate: bird.location_accurate,
                needs_id: grade.map_or(true, |g| g == Grade::NeedsId),
            },
            media,
            location,
            observation_date: parse_day(&bird.observation_date),
            created_at: parse_timestamp(&bird.created_at),
            counts: OriginCounts {
                fobi: bird.fobi_count,
                native_app: bird.app_count,
            },
        })
    }
}
