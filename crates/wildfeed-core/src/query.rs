// Filters in, one query per active source out. No I/O in here.
use chrono::NaiveDate;
use tracing::warn;

use crate::models::{Area, DateRange, Filters, GeoPoint, MediaConstraint, Source};

/// Points sampled on a circle when it has to travel as a polygon
pub const CIRCLE_SAMPLES: usize = 32;

const METERS_PER_DEGREE: f64 = 111_320.0;
const POLYGON_DELIMITER: &str = "|";

/// Query parameters an observation endpoint may understand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    Page,
    PerPage,
    Search,
    SearchType,
    Location,
    Latitude,
    Longitude,
    Radius,
    Polygon,
    StartDate,
    EndDate,
    Grade,
    DataSource,
    HasMedia,
    MediaType,
}

impl Param {
    pub fn name(&self) -> &'static str {
        match self {
            Param::Page => "page",
            Param::PerPage => "per_page",
            Param::Search => "search",
            Param::SearchType => "searchType",
            Param::Location => "location",
            Param::Latitude => "latitude",
            Param::Longitude => "longitude",
            Param::Radius => "radius",
            Param::Polygon => "polygon",
            Param::StartDate => "start_date",
            Param::EndDate => "end_date",
            Param::Grade => "grade[]",
            Param::DataSource => "data_source[]",
            Param::HasMedia => "has_media",
            Param::MediaType => "media_type",
        }
    }
}

const SPECIES_COLLECTION_PARAMS: &[Param] = &[
    Param::Page,
    Param::PerPage,
    Param::Search,
    Param::SearchType,
    Param::Location,
    Param::Polygon,
    Param::StartDate,
    Param::EndDate,
    Param::Grade,
    Param::HasMedia,
    Param::MediaType,
];

const GENERAL_COLLECTION_PARAMS: &[Param] = &[
    Param::Page,
    Param::PerPage,
    Param::Search,
    Param::SearchType,
    Param::Location,
    Param::Latitude,
    Param::Longitude,
    Param::Radius,
    Param::Polygon,
    Param::StartDate,
    Param::EndDate,
    Param::Grade,
    Param::DataSource,
    Param::HasMedia,
    Param::MediaType,
];

/// Parameters each collection's endpoint understands
pub fn capabilities(source: Source) -> &'static [Param] {
    match source {
        Source::Bird | Source::Butterfly => SPECIES_COLLECTION_PARAMS,
        Source::General => GENERAL_COLLECTION_PARAMS,
    }
}

pub fn accepts(source: Source, param: Param) -> bool {
    capabilities(source).contains(&param)
}

/// Ready-to-send query for one source
#[derive(Debug, Clone, PartialEq)]
pub struct PerSourceQuery {
    pub source: Source,
    pub page: u32,
    pub per_page: u32,
    pub params: Vec<(String, String)>,
}

impl PerSourceQuery {
    /// All values for a parameter, in order (handy for `grade[]`)
    pub fn values(&self, name: &str) -> Vec<&str> {
        self.params
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.values(name).into_iter().next()
    }
}

/// Build the per-source queries for one page of a filter configuration
pub fn build(filters: &Filters, page: u32, page_size: u32) -> Vec<PerSourceQuery> {
    let resolved = ResolvedFilters::resolve(filters);
    filters
        .active_sources()
        .into_iter()
        .map(|source| PerSourceQuery {
            source,
            page,
            per_page: page_size,
            params: resolved.params_for(source, Some((page, page_size))),
        })
        .collect()
}

/// Filter parameters without paging, as the stats endpoints want them
pub fn filter_params(filters: &Filters, source: Source) -> Vec<(String, String)> {
    ResolvedFilters::resolve(filters).params_for(source, None)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchType {
    Species,
    Text,
}

impl SearchType {
    fn as_str(&self) -> &'static str {
        match self {
            SearchType::Species => "species",
            SearchType::Text => "text",
        }
    }
}

#[derive(Debug, Clone)]
enum Geo {
    Polygon(String),
    Circle {
        center: GeoPoint,
        radius_km: f64,
        /// Polygon stand-in for sources without radius search
        ring: Option<String>,
    },
}

/// Filters after precedence and validation, before per-source shaping
#[derive(Debug, Clone, Default)]
struct ResolvedFilters {
    text: Option<(String, SearchType)>,
    location: Option<String>,
    geo: Option<Geo>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    grades: Vec<&'static str>,
    media: MediaConstraint,
    data_sources: Vec<Source>,
}

impl ResolvedFilters {
    fn resolve(filters: &Filters) -> Self {
        // A structured taxon pick always beats whatever free text is lying around
        let taxon = filters
            .taxon
            .as_ref()
            .map(|t| t.name.trim())
            .filter(|name| !name.is_empty())
            .map(|name| (name.to_string(), SearchType::Species));
        let text = taxon.or_else(|| {
            filters
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| (s.to_string(), SearchType::Text))
        });

        // Central range wins whenever it says anything at all
        let dates = if filters.central_date_range.is_empty() {
            &filters.date_range
        } else {
            &filters.central_date_range
        };
        let (start_date, end_date) = resolve_dates(dates);

        Self {
            text,
            location: filters
                .location_name
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            geo: filters.area.as_ref().and_then(resolve_area),
            start_date,
            end_date,
            grades: filters.grades.iter().map(|g| g.as_str()).collect(),
            media: filters.media,
            data_sources: filters.active_sources(),
        }
    }

    fn params_for(&self, source: Source, paging: Option<(u32, u32)>) -> Vec<(String, String)> {
        let mut out = Params::new(source);

        if let Some((page, per_page)) = paging {
            out.push(Param::Page, page.to_string());
            out.push(Param::PerPage, per_page.to_string());
        }

        if let Some((text, kind)) = &self.text {
            out.push(Param::Search, text.clone());
            out.push(Param::SearchType, kind.as_str().to_string());
        }

        if let Some(location) = &self.location {
            out.push(Param::Location, location.clone());
        }

        match &self.geo {
            Some(Geo::Polygon(polygon)) => out.push(Param::Polygon, polygon.clone()),
            Some(Geo::Circle {
                center,
                radius_km,
                ring,
            }) => {
                if accepts(source, Param::Radius) {
                    out.push(Param::Latitude, format_coord(center.lat));
                    out.push(Param::Longitude, format_coord(center.lon));
                    out.push(Param::Radius, radius_km.to_string());
                } else if let Some(ring) = ring {
                    out.push(Param::Polygon, ring.clone());
                }
            }
            None => {}
        }

        if let Some(start) = self.start_date {
            out.push(Param::StartDate, start.format("%Y-%m-%d").to_string());
        }
        if let Some(end) = self.end_date {
            out.push(Param::EndDate, end.format("%Y-%m-%d").to_string());
        }

        for grade in &self.grades {
            out.push(Param::Grade, grade.to_string());
        }

        for data_source in &self.data_sources {
            out.push(Param::DataSource, data_source.as_str().to_string());
        }

        match self.media {
            MediaConstraint::Any => {}
            MediaConstraint::WithMedia => out.push(Param::HasMedia, "true".to_string()),
            MediaConstraint::Photo => {
                out.push(Param::HasMedia, "true".to_string());
                out.push(Param::MediaType, "photo".to_string());
            }
            MediaConstraint::Audio => {
                out.push(Param::HasMedia, "true".to_string());
                out.push(Param::MediaType, "audio".to_string());
            }
        }

        out.into_inner()
    }
}

/// Accumulates parameters, silently skipping the ones a source ignores
struct Params {
    source: Source,
    pairs: Vec<(String, String)>,
}

impl Params {
    fn new(source: Source) -> Self {
        Self {
            source,
            pairs: Vec::new(),
        }
    }

    fn push(&mut self, param: Param, value: String) {
        if accepts(self.source, param) {
            self.pairs.push((param.name().to_string(), value));
        }
    }

    fn into_inner(self) -> Vec<(String, String)> {
        self.pairs
    }
}

fn resolve_dates(range: &DateRange) -> (Option<NaiveDate>, Option<NaiveDate>) {
    let start = parse_date(range.start.as_deref(), "start_date");
    let end = parse_date(range.end.as_deref(), "end_date");

    match (start, end) {
        (Some(s), Some(e)) if s > e => {
            warn!("Dropping inverted date range {} > {}", s, e);
            (None, None)
        }
        other => other,
    }
}

fn parse_date(value: Option<&str>, field: &str) -> Option<NaiveDate> {
    let value = value.map(str::trim).filter(|v| !v.is_empty())?;
    match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(_) => {
            warn!("Dropping malformed {} '{}'", field, value);
            None
        }
    }
}

fn resolve_area(area: &Area) -> Option<Geo> {
    match area {
        Area::Polygon(points) => {
            if points.len() < 3 || !points.iter().all(GeoPoint::is_valid) {
                warn!("Dropping malformed polygon with {} points", points.len());
                return None;
            }
            Some(Geo::Polygon(serialize_polygon(points)))
        }
        Area::Circle { center, radius_m } => {
            if !center.is_valid() || !radius_m.is_finite() || *radius_m <= 0.0 {
                warn!("Dropping malformed circle at {:?} r={}", center, radius_m);
                return None;
            }
            let ring = circle_to_polygon(*center, *radius_m).map(|ring| serialize_polygon(&ring));
            if ring.is_none() {
                warn!(
                    "No polygon for circle at {:?}; only radius-capable sources get an area",
                    center
                );
            }
            Some(Geo::Circle {
                center: *center,
                radius_km: radius_m / 1000.0,
                ring,
            })
        }
    }
}

/// `lon,lat` pairs joined by `|`
pub fn serialize_polygon(points: &[GeoPoint]) -> String {
    points
        .iter()
        .map(|p| format!("{},{}", format_coord(p.lon), format_coord(p.lat)))
        .collect::<Vec<_>>()
        .join(POLYGON_DELIMITER)
}

/// Parse the `lon,lat|lon,lat|...` form back into points
pub fn parse_polygon(raw: &str) -> Option<Vec<GeoPoint>> {
    raw.split(POLYGON_DELIMITER)
        .map(|pair| {
            let (lon, lat) = pair.split_once(',')?;
            Some(GeoPoint::new(
                lat.trim().parse().ok()?,
                lon.trim().parse().ok()?,
            ))
        })
        .collect()
}

/// Approximate a circle with a closed ring of `CIRCLE_SAMPLES + 1` points
///
/// Flat-earth degrees-per-meter; fine at the tens-of-kilometers scale.
/// Returns `None` where longitude degrees degenerate (at the poles).
pub fn circle_to_polygon(center: GeoPoint, radius_m: f64) -> Option<Vec<GeoPoint>> {
    let lon_scale = METERS_PER_DEGREE * center.lat.to_radians().cos();
    if lon_scale.abs() < 1e-6 {
        return None;
    }

    let mut ring: Vec<GeoPoint> = (0..CIRCLE_SAMPLES)
        .map(|i| {
            let theta = 2.0 * std::f64::consts::PI * (i as f64) / (CIRCLE_SAMPLES as f64);
            GeoPoint::new(
                center.lat + radius_m * theta.cos() / METERS_PER_DEGREE,
                center.lon + radius_m * theta.sin() / lon_scale,
            )
        })
        .collect();
    let first = ring[0];
    ring.push(first);
    Some(ring)
}

fn format_coord(value: f64) -> String {
    format!("{:.6}", value)
}
