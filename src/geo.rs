//! Great-circle distance helpers.

/// Mean Earth radius in meters (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Haversine distance between two (lat, lon) points, in meters.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = phi2 - phi1;
    let dlmb = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlmb / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_zero() {
        assert_eq!(haversine_m(0.0, 0.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn test_haversine_known_pair() {
        // One degree of latitude is roughly 111.2 km
        let d = haversine_m(0.0, 0.0, 1.0, 0.0);
        assert!((111_000.0..=111_500.0).contains(&d));
    }

    #[test]
    fn test_haversine_symmetric() {
        let a = haversine_m(47.6561, -122.3094, 47.6006, -122.1395);
        let b = haversine_m(47.6006, -122.1395, 47.6561, -122.3094);
        assert!((a - b).abs() < 1e-9);
        assert!(a > 0.0);
    }
}
