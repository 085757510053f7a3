use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One of the three upstream observation collections
///
/// Declaration order doubles as the merge priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Bird,
    Butterfly,
    General,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Bird, Source::Butterfly, Source::General];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Bird => "bird",
            Source::Butterfly => "butterfly",
            Source::General => "general",
        }
    }

    /// Collection path relative to the API base URL
    pub fn endpoint(&self) -> String {
        format!("{}-observations", self.as_str())
    }

    /// Count endpoint used by the stats refresh
    pub fn count_endpoint(&self) -> String {
        format!("{}-observations/count", self.as_str())
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bird" | "birds" => Ok(Source::Bird),
            "butterfly" | "butterflies" => Ok(Source::Butterfly),
            "general" => Ok(Source::General),
            other => Err(format!("unknown source '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Community quality grade of an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    Research,
    NeedsId,
    Casual,
}

impl Grade {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::Research => "research",
            Grade::NeedsId => "needs_id",
            Grade::Casual => "casual",
        }
    }
}

impl FromStr for Grade {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(|c: char| c == '-' || c == ' ', "_").as_str() {
            "research" | "research_grade" => Ok(Grade::Research),
            "needs_id" | "needsid" => Ok(Grade::NeedsId),
            "casual" => Ok(Grade::Casual),
            other => Err(format!("unknown grade '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub url: String,
    pub kind: MediaKind,
}

/// Yes/no facts about a record, straight from upstream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityFlags {
    pub grade: Option<Grade>,
    pub has_media: bool,
    pub is_wild: bool,
    pub location_accurate: bool,
    pub needs_id: bool,
}

/// How many times an observation was contributed through each channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OriginCounts {
    pub fobi: u64,
    pub native_app: u64,
}

/// Normalized observation, whatever collection it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    /// Unique within `source` only
    pub id: String,
    pub source: Source,
    pub title: String,
    pub description: String,
    pub media: Vec<MediaItem>,
    pub location: Option<GeoPoint>,
    pub observation_date: Option<NaiveDate>,
    pub created_at: Option<DateTime<Utc>>,
    pub quality: QualityFlags,
    pub counts: OriginCounts,
}

impl ObservationRecord {
    /// Identity within a merged feed
    pub fn key(&self) -> (Source, &str) {
        (self.source, self.id.as_str())
    }
}

/// Structured taxon pick from the autocomplete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonSelection {
    pub name: String,
    pub id: Option<u64>,
}

/// Geographic restriction on a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Area {
    Polygon(Vec<GeoPoint>),
    Circle { center: GeoPoint, radius_m: f64 },
}

/// Loose date bounds as typed by the user, `YYYY-MM-DD`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl DateRange {
    pub fn is_empty(&self) -> bool {
        blank(&self.start) && blank(&self.end)
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |s| s.trim().is_empty())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaConstraint {
    #[default]
    Any,
    WithMedia,
    Photo,
    Audio,
}

/// Everything the user can filter a feed by
///
/// Several fields overlap on purpose (free text vs taxon, ad hoc vs central
/// date range). The query builder decides which one wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    pub search: Option<String>,
    pub taxon: Option<TaxonSelection>,
    pub area: Option<Area>,
    /// Free-text place name handed through to the endpoints
    pub location_name: Option<String>,
    pub date_range: DateRange,
    /// Authoritative date range shared across screens; beats `date_range`
    pub central_date_range: DateRange,
    pub grades: BTreeSet<Grade>,
    pub media: MediaConstraint,
    /// Active sources; empty means all of them
    pub sources: BTreeSet<Source>,
}

impl Filters {
    pub fn active_sources(&self) -> Vec<Source> {
        if self.sources.is_empty() {
            Source::ALL.to_vec()
        } else {
            self.sources.iter().copied().collect()
        }
    }
}

/// Presentation mode of the feed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Grid,
    List,
    Map,
}

impl ViewMode {
    pub const ALL: [ViewMode; 3] = [ViewMode::Grid, ViewMode::List, ViewMode::Map];

    pub fn as_str(&self) -> &'static str {
        match self {
            ViewMode::Grid => "grid",
            ViewMode::List => "list",
            ViewMode::Map => "map",
        }
    }
}

impl FromStr for ViewMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grid" => Ok(ViewMode::Grid),
            "list" => Ok(ViewMode::List),
            "map" => Ok(ViewMode::Map),
            other => Err(format!("unknown view '{}'", other)),
        }
    }
}

/// Aggregate counts shown next to the feed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub counts_by_source: BTreeMap<Source, u64>,
    pub total_observations: u64,
    pub total_species: u64,
    pub total_contributors: u64,
}

impl StatsSnapshot {
    pub fn from_counts(
        counts_by_source: BTreeMap<Source, u64>,
        total_species: u64,
        total_contributors: u64,
    ) -> Self {
        let total_observations = counts_by_source.values().sum();
        Self {
            counts_by_source,
            total_observations,
            total_species,
            total_contributors,
        }
    }

    /// A snapshot of all zeros - what a loading screen would show
    pub fn is_empty(&self) -> bool {
        self.total_observations == 0 && self.total_species == 0 && self.total_contributors == 0
    }
}
