use crate::models::courier::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// Total length of an ordered path: sum of consecutive pairwise
/// distances, zero for fewer than two points.
pub fn route_length_km(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| haversine_km(&pair[0], &pair[1]))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::{haversine_km, route_length_km};
    use crate::models::courier::GeoPoint;

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: 53.5511,
            lng: 9.9937,
        };
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = GeoPoint {
            lat: 28.61,
            lng: 77.21,
        };
        let b = GeoPoint {
            lat: 28.70,
            lng: 77.30,
        };
        assert!((haversine_km(&a, &b) - haversine_km(&b, &a)).abs() < 1e-12);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint {
            lat: 51.5074,
            lng: -0.1278,
        };
        let paris = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn route_length_degenerate_cases() {
        let p = GeoPoint {
            lat: 51.5074,
            lng: -0.1278,
        };
        let q = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };

        assert_eq!(route_length_km(&[]), 0.0);
        assert_eq!(route_length_km(&[p]), 0.0);
        assert!((route_length_km(&[p, q]) - haversine_km(&p, &q)).abs() < 1e-12);
    }

    #[test]
    fn route_length_sums_legs() {
        let a = GeoPoint { lat: 0.0, lng: 0.0 };
        let b = GeoPoint { lat: 0.0, lng: 1.0 };
        let c = GeoPoint { lat: 0.0, lng: 2.0 };

        let total = route_length_km(&[a, b, c]);
        let legs = haversine_km(&a, &b) + haversine_km(&b, &c);
        assert!((total - legs).abs() < 1e-9);
    }
}
