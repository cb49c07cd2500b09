//! Geodesic distance on the WGS-84 ellipsoid.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ApiError;

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const MEAN_EARTH_RADIUS_KM: f64 = 6_371.008_8;
const VINCENTY_MAX_ITER: usize = 200;
const VINCENTY_EPS: f64 = 1e-12;

#[derive(Debug, Error, PartialEq)]
pub enum GeoError {
    #[error("latitude {0} is outside -90..=90")]
    Latitude(f64),
    #[error("longitude {0} is outside -180..=180")]
    Longitude(f64),
}

impl From<GeoError> for ApiError {
    fn from(e: GeoError) -> Self {
        ApiError::validation(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, GeoError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(GeoError::Latitude(latitude));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(GeoError::Longitude(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    fn to_unit_vector(self) -> [f64; 3] {
        let (lat, lon) = (self.latitude.to_radians(), self.longitude.to_radians());
        [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()]
    }
}

/// Great-circle distance on the mean-radius sphere.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (phi1, phi2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let dphi = phi2 - phi1;
    let dlambda = (b.longitude - a.longitude).to_radians();
    let h = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * MEAN_EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Vincenty's inverse formula. `None` when the iteration does not
/// converge, which happens for nearly antipodal points.
pub fn vincenty_km(p1: GeoPoint, p2: GeoPoint) -> Option<f64> {
    let a = WGS84_A;
    let f = WGS84_F;
    let b = (1.0 - f) * a;

    let l = (p2.longitude - p1.longitude).to_radians();
    let u1 = ((1.0 - f) * p1.latitude.to_radians().tan()).atan();
    let u2 = ((1.0 - f) * p2.latitude.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    let mut converged = false;
    let (mut sin_sigma, mut cos_sigma, mut sigma) = (0.0, 0.0, 0.0);
    let (mut cos_sq_alpha, mut cos_2sigma_m) = (0.0, 0.0);

    for _ in 0..VINCENTY_MAX_ITER {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            return Some(0.0);
        }
        cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        // equatorial line
        cos_2sigma_m = if cos_sq_alpha != 0.0 {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        } else {
            0.0
        };
        let c = f / 16.0 * cos_sq_alpha * (4.0 + f * (4.0 - 3.0 * cos_sq_alpha));
        let prev = lambda;
        lambda = l
            + (1.0 - c)
                * f
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));
        if !lambda.is_finite() {
            return None;
        }
        if (lambda - prev).abs() < VINCENTY_EPS {
            converged = true;
            break;
        }
    }
    if !converged {
        return None;
    }

    let u_sq = cos_sq_alpha * (a * a - b * b) / (b * b);
    let big_a = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
    let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
    let delta_sigma = big_b
        * sin_sigma
        * (cos_2sigma_m
            + big_b / 4.0
                * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)
                    - big_b / 6.0
                        * cos_2sigma_m
                        * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                        * (-3.0 + 4.0 * cos_2sigma_m * cos_2sigma_m)));

    let meters = b * big_a * (sigma - delta_sigma);
    meters.is_finite().then_some(meters / 1000.0)
}

pub fn geodesic_km(a: GeoPoint, b: GeoPoint) -> f64 {
    vincenty_km(a, b).unwrap_or_else(|| haversine_km(a, b))
}

/// Mean of the points as unit vectors, projected back onto the sphere.
/// Handles clusters straddling the antimeridian.
pub fn spherical_centroid(points: &[GeoPoint]) -> Option<GeoPoint> {
    if points.is_empty() {
        return None;
    }
    let mut sum = [0.0f64; 3];
    for p in points {
        let v = p.to_unit_vector();
        for (s, c) in sum.iter_mut().zip(v) {
            *s += c;
        }
    }
    let [x, y, z] = sum;
    let hyp = (x * x + y * y).sqrt();
    if hyp.hypot(z) < 1e-12 {
        return None;
    }
    Some(GeoPoint {
        latitude: z.atan2(hyp).to_degrees(),
        longitude: y.atan2(x).to_degrees(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    fn dms(d: f64, m: f64, s: f64) -> f64 {
        d.signum() * (d.abs() + m / 60.0 + s / 3600.0)
    }

    #[test]
    fn vincenty_matches_reference_survey_line() {
        // Flinders Peak -> Buninyong, 54 972.271 m
        let flinders = p(dms(-37.0, 57.0, 3.72030), dms(144.0, 25.0, 29.52440));
        let buninyong = p(dms(-37.0, 39.0, 10.15610), dms(143.0, 55.0, 35.38390));
        let km = vincenty_km(flinders, buninyong).unwrap();
        assert!((km - 54.972_271).abs() < 0.001, "{km}");
    }

    #[test]
    fn one_degree_of_meridian_at_equator() {
        let km = geodesic_km(p(0.0, 0.0), p(1.0, 0.0));
        assert!((km - 110.574).abs() < 0.01, "{km}");
        let sphere = haversine_km(p(0.0, 0.0), p(1.0, 0.0));
        assert!((sphere - 111.195).abs() < 0.01, "{sphere}");
    }

    #[test]
    fn coincident_points_are_zero_apart() {
        let x = p(51.5, -0.12);
        assert_eq!(vincenty_km(x, x), Some(0.0));
        assert_eq!(haversine_km(x, x), 0.0);
    }

    #[test]
    fn nearly_antipodal_points_still_get_a_distance() {
        let km = geodesic_km(p(0.0, 0.0), p(0.5, 179.5));
        assert!(km.is_finite());
        assert!((19_800.0..20_100.0).contains(&km), "{km}");
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert_eq!(GeoPoint::new(91.0, 0.0), Err(GeoError::Latitude(91.0)));
        assert_eq!(GeoPoint::new(0.0, -180.5), Err(GeoError::Longitude(-180.5)));
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn centroid_across_antimeridian() {
        let c = spherical_centroid(&[p(10.0, 170.0), p(10.0, -170.0)]).unwrap();
        assert!((c.longitude.abs() - 180.0).abs() < 1e-9, "{c:?}");
        assert!(c.latitude > 10.0 && c.latitude < 10.5, "{c:?}");
    }

    #[test]
    fn centroid_of_single_point_is_itself() {
        let c = spherical_centroid(&[p(-33.9, 18.4)]).unwrap();
        assert!((c.latitude + 33.9).abs() < 1e-9);
        assert!((c.longitude - 18.4).abs() < 1e-9);
        assert!(spherical_centroid(&[]).is_none());
    }
}
