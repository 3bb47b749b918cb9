use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Mean Earth radius used for all great-circle distances.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Metres per degree of latitude, used to pad bounding boxes.
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Decimal places kept when quantizing to a downsampling grid cell (~110 m).
pub const GRID_DECIMALS: u32 = 3;

/// A WGS84 point in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
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

/// Anything with a position on the map
pub trait Located {
    fn coordinate(&self) -> Coordinate;
}

/// Great-circle distance in metres (haversine).
pub fn haversine_m(a: Coordinate, b: Coordinate) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lon - a.lon).to_radians();

    let h = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Rejection reasons for a bounding box, each with a stable machine code.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BboxError {
    #[error("missing bbox parameter")]
    Missing,

    #[error("bbox must be four comma-separated numbers: {0}")]
    Malformed(String),

    #[error("bbox out of range: {0}")]
    OutOfRange(String),
}

impl BboxError {
    pub fn code(&self) -> &'static str {
        match self {
            BboxError::Missing => "MISSING_PARAM",
            BboxError::Malformed(_) => "INVALID_BBOX",
            BboxError::OutOfRange(_) => "INVALID_BBOX_RANGE",
        }
    }
}

/// Axis-aligned geographic box with `min ≤ max` on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self, BboxError> {
        let values = [min_lon, min_lat, max_lon, max_lat];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(BboxError::Malformed("non-finite coordinate".to_string()));
        }
        if min_lon > max_lon || min_lat > max_lat {
            return Err(BboxError::OutOfRange("min must not exceed max".to_string()));
        }
        let corners = [
            Coordinate::new(min_lat, min_lon),
            Coordinate::new(max_lat, max_lon),
        ];
        if corners.iter().any(|c| !c.is_valid()) {
            return Err(BboxError::OutOfRange(
                "coordinates outside WGS84 bounds".to_string(),
            ));
        }
        Ok(Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        })
    }

    /// Parse `minLon,minLat,maxLon,maxLat`.
    pub fn parse(raw: &str) -> Result<Self, BboxError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(BboxError::Missing);
        }

        let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(BboxError::Malformed(format!(
                "expected 4 values, got {}",
                parts.len()
            )));
        }

        let mut values = [0.0f64; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part
                .parse::<f64>()
                .map_err(|_| BboxError::Malformed(format!("'{part}' is not a number")))?;
        }

        Self::new(values[0], values[1], values[2], values[3])
    }

    /// Box padded by `radius_m` on every side of `center`, clamped to WGS84.
    pub fn around(center: Coordinate, radius_m: f64) -> Self {
        let d_lat = radius_m / METERS_PER_DEGREE;
        let cos_lat = center.lat.to_radians().cos().abs().max(1e-6);
        let d_lon = radius_m / (METERS_PER_DEGREE * cos_lat);

        Self {
            min_lon: (center.lon - d_lon).max(-180.0),
            min_lat: (center.lat - d_lat).max(-90.0),
            max_lon: (center.lon + d_lon).min(180.0),
            max_lat: (center.lat + d_lat).min(90.0),
        }
    }

    pub fn contains(&self, point: Coordinate) -> bool {
        point.lat >= self.min_lat
            && point.lat <= self.max_lat
            && point.lon >= self.min_lon
            && point.lon <= self.max_lon
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

/// Integer cell of a decimal-degree grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridCell {
    pub lat: i64,
    pub lon: i64,
}

/// Quantize a point to `decimals` decimal places.
pub fn grid_cell(point: Coordinate, decimals: u32) -> GridCell {
    let scale = 10f64.powi(decimals as i32);
    GridCell {
        lat: (point.lat * scale).round() as i64,
        lon: (point.lon * scale).round() as i64,
    }
}

/// Rough envelope of Great Britain and Northern Ireland; anchors outside it
/// are geocoding mistakes.
pub fn is_plausible_uk(point: Coordinate) -> bool {
    (49.8..=60.9).contains(&point.lat) && (-8.6..=1.8).contains(&point.lon)
}
