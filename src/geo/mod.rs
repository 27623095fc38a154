//! Geodesy on the WGS84 ellipsoid and the GeoJSON geometries exchanged with the topology.
//!
//! Distances use Vincenty's inverse formula; the rare non-converging (near-antipodal)
//! case falls back to the haversine great-circle distance. Interpolation along a path
//! walks the per-segment geodesic lengths and then moves along the great circle of the
//! selected segment.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// WGS84 semi-major axis (m).
const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// WGS84 semi-minor axis (m).
const WGS84_B: f64 = WGS84_A * (1.0 - WGS84_F);
/// Mean earth radius (m) for spherical fallbacks.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

const VINCENTY_MAX_ITER: usize = 200;
const VINCENTY_EPSILON: f64 = 1e-12;

/// GeoJSON `Point`: `coordinates` is `[longitude, latitude]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Point")]
pub struct Point {
    pub coordinates: [f64; 2],
}

impl Point {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            coordinates: [longitude, latitude],
        }
    }

    pub fn lon(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn lat(&self) -> f64 {
        self.coordinates[1]
    }

    /// Reject coordinates outside the valid longitude/latitude ranges.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let (lon, lat) = (self.lon(), self.lat());
        if !lon.is_finite() || !lat.is_finite() || lon.abs() > 180.0 || lat.abs() > 90.0 {
            return Err(ValidationError::InvalidGeometry(format!(
                "coordinates out of range: [{lon}, {lat}]"
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> String {
        format!(
            r#"{{"type":"Point","coordinates":[{},{}]}}"#,
            self.lon(),
            self.lat()
        )
    }

    pub fn from_json(raw: &str) -> Result<Self, ValidationError> {
        let point: Self = serde_json::from_str(raw)
            .map_err(|e| ValidationError::InvalidGeometry(format!("point: {e}")))?;
        point.validate()?;
        Ok(point)
    }
}

/// GeoJSON `LineString`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "LineString")]
pub struct LineString {
    pub coordinates: Vec<[f64; 2]>,
}

impl LineString {
    pub fn new(points: &[Point]) -> Self {
        Self {
            coordinates: points.iter().map(|p| p.coordinates).collect(),
        }
    }

    pub fn points(&self) -> impl Iterator<Item = Point> + '_ {
        self.coordinates.iter().map(|c| Point { coordinates: *c })
    }

    /// A path needs at least two vertices, each a valid coordinate.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.coordinates.len() < 2 {
            return Err(ValidationError::InvalidGeometry(
                "line string needs at least two points".into(),
            ));
        }
        self.points().try_for_each(|p| p.validate())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(raw: &str) -> Result<Self, ValidationError> {
        let line: Self = serde_json::from_str(raw)
            .map_err(|e| ValidationError::InvalidGeometry(format!("line string: {e}")))?;
        line.validate()?;
        Ok(line)
    }
}

/// Geodesic distance in metres between two points on the WGS84 ellipsoid.
pub fn distance(a: &Point, b: &Point) -> f64 {
    vincenty_inverse(a, b).unwrap_or_else(|| haversine(a, b))
}

/// Whether `b` lies within `radius` metres of `a` (inclusive).
pub fn within_distance(a: &Point, b: &Point, radius: f64) -> bool {
    distance(a, b) <= radius
}

/// Geodesic length of a path in metres.
pub fn line_length(line: &LineString) -> f64 {
    segment_lengths(line).iter().sum()
}

/// Point located at `fraction` (clamped to `[0, 1]`) of the path's geodesic length.
pub fn interpolate(line: &LineString, fraction: f64) -> Option<Point> {
    let first = line.points().next()?;
    let lengths = segment_lengths(line);
    let total: f64 = lengths.iter().sum();
    if total <= 0.0 {
        return Some(first);
    }

    let target = fraction.clamp(0.0, 1.0) * total;
    let mut walked = 0.0;
    for (i, seg) in lengths.iter().enumerate() {
        if *seg > 0.0 && walked + seg >= target {
            let from = Point {
                coordinates: line.coordinates[i],
            };
            let to = Point {
                coordinates: line.coordinates[i + 1],
            };
            return Some(great_circle_point(&from, &to, (target - walked) / seg));
        }
        walked += seg;
    }

    line.points().last()
}

fn segment_lengths(line: &LineString) -> Vec<f64> {
    line.coordinates
        .windows(2)
        .map(|w| {
            distance(
                &Point { coordinates: w[0] },
                &Point { coordinates: w[1] },
            )
        })
        .collect()
}

/// Vincenty inverse solution; `None` when the iteration does not converge.
fn vincenty_inverse(a: &Point, b: &Point) -> Option<f64> {
    let l = (b.lon() - a.lon()).to_radians();
    let u1 = ((1.0 - WGS84_F) * a.lat().to_radians().tan()).atan();
    let u2 = ((1.0 - WGS84_F) * b.lat().to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    for _ in 0..VINCENTY_MAX_ITER {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            return Some(0.0);
        }
        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        // Equatorial line: cos_sq_alpha = 0
        let cos_2sigma_m = if cos_sq_alpha == 0.0 {
            0.0
        } else {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        };
        let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));

        let prev = lambda;
        lambda = l
            + (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))));

        if (lambda - prev).abs() < VINCENTY_EPSILON {
            let u_sq = cos_sq_alpha * (WGS84_A.powi(2) - WGS84_B.powi(2)) / WGS84_B.powi(2);
            let big_a =
                1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
            let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
            let delta_sigma = big_b
                * sin_sigma
                * (cos_2sigma_m
                    + big_b / 4.0
                        * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))
                            - big_b / 6.0
                                * cos_2sigma_m
                                * (-3.0 + 4.0 * sin_sigma.powi(2))
                                * (-3.0 + 4.0 * cos_2sigma_m.powi(2))));
            return Some(WGS84_B * big_a * (sigma - delta_sigma));
        }
    }
    None
}

fn angular_distance(a: &Point, b: &Point) -> f64 {
    let lat1 = a.lat().to_radians();
    let lat2 = b.lat().to_radians();
    let dlat = (b.lat() - a.lat()).to_radians();
    let dlon = (b.lon() - a.lon()).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin()
}

fn haversine(a: &Point, b: &Point) -> f64 {
    EARTH_RADIUS_M * angular_distance(a, b)
}

/// Intermediate point at `f` of the great circle from `a` to `b`.
fn great_circle_point(a: &Point, b: &Point, f: f64) -> Point {
    let delta = angular_distance(a, b);
    if delta == 0.0 {
        return *a;
    }
    let (lat1, lon1) = (a.lat().to_radians(), a.lon().to_radians());
    let (lat2, lon2) = (b.lat().to_radians(), b.lon().to_radians());

    let ka = ((1.0 - f) * delta).sin() / delta.sin();
    let kb = (f * delta).sin() / delta.sin();
    let x = ka * lat1.cos() * lon1.cos() + kb * lat2.cos() * lon2.cos();
    let y = ka * lat1.cos() * lon1.sin() + kb * lat2.cos() * lon2.sin();
    let z = ka * lat1.sin() + kb * lat2.sin();

    let lat = z.atan2((x * x + y * y).sqrt());
    let lon = y.atan2(x);
    Point::new(lon.to_degrees(), lat.to_degrees())
}
