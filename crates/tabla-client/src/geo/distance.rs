use super::Coordinates;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometers.
pub fn distance_km(a: Coordinates, b: Coordinates) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    // Rounding can push `h` just past 1 for antipodal points.
    let h = ((d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2))
        .clamp(0.0, 1.0);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Pair every item that has coordinates with its distance from `origin`,
/// nearest first. Items without coordinates are dropped.
pub fn sort_by_distance<T>(
    items: impl IntoIterator<Item = T>,
    origin: Coordinates,
    coordinates: impl Fn(&T) -> Option<Coordinates>,
) -> Vec<(T, f64)> {
    let mut ranked: Vec<(T, f64)> = items
        .into_iter()
        .filter_map(|item| {
            let at = coordinates(&item)?;
            Some((item, distance_km(origin, at)))
        })
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
    ranked
}

/// "850 m" below one kilometer, "2.3 km" above.
pub fn format_distance(km: f64) -> String {
    if km < 1.0 {
        format!("{} m", (km * 1000.0).round() as u64)
    } else {
        format!("{km:.1} km")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISBON: Coordinates = Coordinates {
        latitude: 38.7223,
        longitude: -9.1393,
    };
    const PORTO: Coordinates = Coordinates {
        latitude: 41.1579,
        longitude: -8.6291,
    };

    #[test]
    fn test_zero_for_same_point() {
        assert_eq!(distance_km(LISBON, LISBON), 0.0);
        assert_eq!(distance_km(PORTO, PORTO), 0.0);
    }

    #[test]
    fn test_symmetric() {
        assert_eq!(distance_km(LISBON, PORTO), distance_km(PORTO, LISBON));
    }

    #[test]
    fn test_antipodal_points_are_finite() {
        let half_circumference = std::f64::consts::PI * EARTH_RADIUS_KM;
        for i in 0..30 {
            for j in 0..30 {
                let lat = -87.0 + i as f64 * 6.0;
                let lon = -179.0 + j as f64 * 12.0;
                let a = Coordinates::new(lat, lon);
                let b = Coordinates::new(-lat, lon + 180.0);
                let d = distance_km(a, b);
                assert!(d.is_finite(), "{a:?} -> {b:?}");
                assert!((d - half_circumference).abs() < 1.0, "{a:?} -> {b:?}: {d}");
            }
        }
    }

    #[test]
    fn test_known_distance() {
        let d = distance_km(LISBON, PORTO);
        assert!((d - 274.0).abs() < 2.0, "got {d}");
    }

    #[test]
    fn test_sort_by_distance_drops_unlocated() {
        let items = vec![("porto", Some(PORTO)), ("nowhere", None), ("lisbon", Some(LISBON))];
        let ranked = sort_by_distance(items, LISBON, |(_, at)| *at);
        let names: Vec<&str> = ranked.iter().map(|((name, _), _)| *name).collect();
        assert_eq!(names, vec!["lisbon", "porto"]);
        assert_eq!(ranked[0].1, 0.0);
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(0.85), "850 m");
        assert_eq!(format_distance(2.345), "2.3 km");
    }
}
