//! Distance and unit helpers.

use crate::types::Position;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS: f64 = 6_371_000.0;

/// Default point count for `make_geodesic_circle`.
pub const DEFAULT_CIRCLE_POINTS: usize = 40;

/// Great-circle distance in meters between two `(lat, lon)` positions.
pub fn haversine_distance(origin: Position, destination: Position) -> f64 {
    let (lat1, lon1) = origin;
    let (lat2, lon2) = destination;

    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    // rounding can push `a` just past 1 for antipodal points
    let a = a.min(1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS * c
}

pub fn feet_to_meters(feet: f64) -> f64 {
    feet * 0.3048
}

/// 1 knot is 1.852 km/h.
pub fn knots_to_kmh(knots: f64) -> f64 {
    knots * 1.852
}

pub fn knots_to_mps(knots: f64) -> f64 {
    knots_to_kmh(knots) / 3.6
}

/// A closed ring of `num_points` positions, each `radius` meters from
/// `center` along evenly spaced bearings. The first point is repeated at
/// the end so the ring can be drawn as a polygon.
pub fn make_geodesic_circle(center: Position, radius: f64, num_points: usize) -> Vec<Position> {
    if num_points == 0 {
        return Vec::new();
    }

    let angular_distance = radius / EARTH_RADIUS;
    let (lat, lon) = center;
    let lat_r = lat.to_radians();
    let lon_r = lon.to_radians();

    let mut coords = Vec::with_capacity(num_points + 1);
    for i in 0..num_points {
        let bearing = i as f64 * 2.0 * std::f64::consts::PI / num_points as f64;

        let lat2 = (lat_r.sin() * angular_distance.cos()
            + lat_r.cos() * angular_distance.sin() * bearing.cos())
        .asin();
        let lon2 = lon_r
            + (bearing.sin() * angular_distance.sin() * lat_r.cos())
                .atan2(angular_distance.cos() - lat_r.sin() * lat2.sin());

        // normalise to [-180, 180)
        let lon_d = (lon2.to_degrees() + 540.0) % 360.0 - 180.0;
        coords.push((lat2.to_degrees(), lon_d));
    }
    coords.push(coords[0]);

    coords
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADELAIDE: Position = (-34.9285, 138.6007);
    const MELBOURNE: Position = (-37.8136, 144.9631);

    #[test]
    fn test_haversine_zero() {
        assert_eq!(haversine_distance(ADELAIDE, ADELAIDE), 0.0);
    }

    #[test]
    fn test_haversine_known_distance() {
        // ~654 km great-circle
        let d = haversine_distance(ADELAIDE, MELBOURNE);
        assert!((d - 654_000.0).abs() < 5_000.0, "got {d}");
        assert!((haversine_distance(MELBOURNE, ADELAIDE) - d).abs() < 1e-6);
    }

    #[test]
    fn test_haversine_antipodal() {
        let half_circumference = std::f64::consts::PI * EARTH_RADIUS;
        for (origin, destination) in [
            ((0.0, 0.0), (0.0, 180.0)),
            ((45.0, 10.0), (-45.0, -170.0)),
            ((-34.9285, 138.6007), (34.9285, -41.3993)),
        ] {
            let d = haversine_distance(origin, destination);
            assert!(d.is_finite(), "{origin:?} -> {destination:?}");
            assert!((d - half_circumference).abs() < 1.0, "{d}");
        }
    }

    #[test]
    fn test_one_degree_latitude() {
        let d = haversine_distance((0.0, 0.0), (1.0, 0.0));
        assert!((d - 111_195.0).abs() < 1.0, "got {d}");
    }

    #[test]
    fn test_unit_conversions() {
        assert!((feet_to_meters(1000.0) - 304.8).abs() < 1e-9);
        assert!((knots_to_kmh(100.0) - 185.2).abs() < 1e-9);
        assert!((knots_to_mps(100.0) - 51.444_444).abs() < 1e-4);
    }

    #[test]
    fn test_geodesic_circle() {
        let radius = 50_000.0;
        let ring = make_geodesic_circle(ADELAIDE, radius, DEFAULT_CIRCLE_POINTS);

        assert_eq!(ring.len(), DEFAULT_CIRCLE_POINTS + 1);
        assert_eq!(ring.first(), ring.last());
        for point in &ring {
            let d = haversine_distance(ADELAIDE, *point);
            assert!((d - radius).abs() < 1.0, "point {point:?} at {d} m");
        }
        // first bearing is due north
        assert!(ring[0].0 > ADELAIDE.0);
    }

    #[test]
    fn test_geodesic_circle_wraps_antimeridian() {
        let ring = make_geodesic_circle((0.0, 179.9), 100_000.0, 8);
        assert!(ring.iter().all(|(_, lon)| (-180.0..180.0).contains(lon)));
    }

    #[test]
    fn test_geodesic_circle_empty() {
        assert!(make_geodesic_circle(ADELAIDE, 1000.0, 0).is_empty());
    }
}
