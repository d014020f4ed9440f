use serde::{Deserialize, Serialize};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && self.lat.abs() <= 90.0
            && self.lng.abs() <= 180.0
    }
}

/// Great-circle distance in meters.
pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_M * central_angle
}

/// Initial bearing from `a` to `b` in degrees, normalized to [0, 360).
pub fn bearing_deg(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let y = delta_lng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lng.cos();

    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

#[cfg(test)]
mod tests {
    use super::{bearing_deg, haversine_m, GeoPoint};

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint::new(-1.2921, 36.8219);
        assert!(haversine_m(&p, &p) < 1e-6);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint::new(51.5074, -0.1278);
        let paris = GeoPoint::new(48.8566, 2.3522);
        let distance = haversine_m(&london, &paris);
        assert!((distance - 343_000.0).abs() < 5_000.0);
    }

    #[test]
    fn nairobi_cbd_hop_is_about_1_2_km() {
        let a = GeoPoint::new(-1.2921, 36.8219);
        let b = GeoPoint::new(-1.30, 36.83);
        let distance = haversine_m(&a, &b);
        assert!((distance - 1_220.0).abs() < 60.0);
    }

    #[test]
    fn bearing_due_north_is_zero() {
        let a = GeoPoint::new(0.0, 10.0);
        let b = GeoPoint::new(1.0, 10.0);
        assert!(bearing_deg(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn bearing_due_east_is_ninety() {
        let a = GeoPoint::new(0.0, 10.0);
        let b = GeoPoint::new(0.0, 11.0);
        assert!((bearing_deg(&a, &b) - 90.0).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_coordinates_are_invalid() {
        assert!(!GeoPoint::new(90.01, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, -180.5).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
        assert!(GeoPoint::new(-90.0, 180.0).is_valid());
    }
}
