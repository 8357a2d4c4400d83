//! Region-ring geometry and the persisted region mirror.
//!
//! While the app is backgrounded, continuous position updates are
//! replaced by a ring of circular geofences centered on the last
//! sampled point: `2N` satellite circles packed so adjacent circles are
//! tangent, plus one larger "exit" circle. Crossing any boundary wakes
//! sampling back up. The registered set is mirrored into the state
//! store so it can be re-armed after a crash or relaunch.

use std::f64::consts::PI;
use std::sync::Arc;

use crate::traits::StateStore;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Identifier of the exit region.
pub const EXIT_REGION_ID: &str = "waymark_region_main";

const REGION_IDS_KEY: &str = "waymark.region.ids";

/// A circular monitored region.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Stable identifier used in monitor callbacks and mirror keys.
    pub id: String,
    /// Center latitude in degrees.
    pub latitude: f64,
    /// Center longitude in degrees.
    pub longitude: f64,
    /// Radius in meters.
    pub radius_m: f64,
}

/// Radius of a satellite circle such that adjacent satellites in the
/// ring are tangent: `r = R·sin(θ)/(1−sin(θ))` with `θ = π/N`.
#[must_use]
pub fn satellite_radius(exit_radius_m: f64, satellite_count: usize) -> f64 {
    let theta = PI / satellite_count as f64;
    exit_radius_m * theta.sin() / (1.0 - theta.sin())
}

/// Destination point at the given bearing and distance from a start
/// point, on a spherical Earth.
#[must_use]
pub fn offset(latitude: f64, longitude: f64, bearing_rad: f64, distance_m: f64) -> (f64, f64) {
    let angular = distance_m / EARTH_RADIUS_M;
    let lat1 = latitude.to_radians();
    let lon1 = longitude.to_radians();

    let lat2 = (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * bearing_rad.cos()).asin();
    let lon2 = lon1
        + (bearing_rad.sin() * angular.sin() * lat1.cos())
            .atan2(angular.cos() - lat1.sin() * lat2.sin());

    (lat2.to_degrees(), lon2.to_degrees())
}

/// Build the region ring for a center point: `2N` satellites of radius
/// [`satellite_radius`] evenly spaced at `2π/(2N)` increments starting
/// at bearing 0, plus the exit region of radius `R` on the center.
#[must_use]
pub fn region_ring(
    latitude: f64,
    longitude: f64,
    exit_radius_m: f64,
    satellite_count: usize,
) -> Vec<Region> {
    let r = satellite_radius(exit_radius_m, satellite_count);
    let total = satellite_count * 2;
    let step = 2.0 * PI / total as f64;
    // Satellite centers sit one satellite radius outside the exit circle
    let center_distance = exit_radius_m + r;

    let mut regions = Vec::with_capacity(total + 1);
    for i in 0..total {
        let bearing = step * i as f64;
        let (lat, lon) = offset(latitude, longitude, bearing, center_distance);
        regions.push(Region {
            id: format!("waymark_region_{i}"),
            latitude: lat,
            longitude: lon,
            radius_m: r,
        });
    }
    regions.push(Region {
        id: EXIT_REGION_ID.to_string(),
        latitude,
        longitude,
        radius_m: exit_radius_m,
    });
    regions
}

/// Persisted mirror of the currently registered region set.
///
/// Keys: `waymark.region.ids` holds the id list; `<id>.lat`,
/// `<id>.long`, and `<id>.radius` hold each center.
#[derive(Clone)]
pub struct RegionMirror {
    state: Arc<dyn StateStore>,
}

impl RegionMirror {
    /// Create a mirror over the given state store.
    pub fn new(state: Arc<dyn StateStore>) -> Self {
        Self { state }
    }

    /// Replace the mirrored set.
    pub fn save(&self, regions: &[Region]) {
        self.clear();
        for region in regions {
            self.state
                .set(&format!("{}.lat", region.id), &region.latitude.to_string());
            self.state.set(
                &format!("{}.long", region.id),
                &region.longitude.to_string(),
            );
            self.state.set(
                &format!("{}.radius", region.id),
                &region.radius_m.to_string(),
            );
        }
        let ids: Vec<&str> = regions.iter().map(|r| r.id.as_str()).collect();
        self.state.set(REGION_IDS_KEY, &ids.join(","));
    }

    /// Load the mirrored set; entries with unreadable values are
    /// skipped.
    pub fn load(&self) -> Vec<Region> {
        let Some(ids) = self.state.get(REGION_IDS_KEY) else {
            return Vec::new();
        };
        ids.split(',')
            .filter(|id| !id.is_empty())
            .filter_map(|id| {
                let latitude = self.state.get(&format!("{id}.lat"))?.parse().ok()?;
                let longitude = self.state.get(&format!("{id}.long"))?.parse().ok()?;
                let radius_m = self.state.get(&format!("{id}.radius"))?.parse().ok()?;
                Some(Region {
                    id: id.to_string(),
                    latitude,
                    longitude,
                    radius_m,
                })
            })
            .collect()
    }

    /// Drop the mirrored set.
    pub fn clear(&self) {
        if let Some(ids) = self.state.get(REGION_IDS_KEY) {
            for id in ids.split(',').filter(|id| !id.is_empty()) {
                self.state.remove(&format!("{id}.lat"));
                self.state.remove(&format!("{id}.long"));
                self.state.remove(&format!("{id}.radius"));
            }
        }
        self.state.remove(REGION_IDS_KEY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemoryStateStore;

    #[test]
    fn test_satellite_radius_formula() {
        let r = satellite_radius(25.0, 5);
        let theta = PI / 5.0;
        let expected = 25.0 * theta.sin() / (1.0 - theta.sin());
        assert!((r - expected).abs() < 1e-12);
    }

    #[test]
    fn test_region_ring_shape() {
        let regions = region_ring(-33.865, 151.209, 25.0, 5);
        // 10 satellites plus the exit region
        assert_eq!(regions.len(), 11);

        let r = satellite_radius(25.0, 5);
        for satellite in &regions[..10] {
            assert!((satellite.radius_m - r).abs() < 1e-12);
        }

        let exit = &regions[10];
        assert_eq!(exit.id, EXIT_REGION_ID);
        assert_eq!(exit.radius_m, 25.0);
        assert_eq!(exit.latitude, -33.865);
        assert_eq!(exit.longitude, 151.209);
    }

    #[test]
    fn test_region_ring_first_satellite_due_north() {
        // Bearing 0 keeps longitude fixed and moves the center north
        let regions = region_ring(-33.865, 151.209, 25.0, 5);
        let first = &regions[0];
        assert!(first.latitude > -33.865);
        assert!((first.longitude - 151.209).abs() < 1e-9);
    }

    #[test]
    fn test_satellite_centers_evenly_spaced() {
        let regions = region_ring(47.62, -122.35, 25.0, 5);
        let r = satellite_radius(25.0, 5);
        let d = 25.0 + r;
        // Distances from the center should all be d (within meters of
        // floating point and spherical projection error)
        for satellite in &regions[..10] {
            let dist = haversine(47.62, -122.35, satellite.latitude, satellite.longitude);
            assert!((dist - d).abs() < 0.01, "distance {dist} vs {d}");
        }
    }

    #[test]
    fn test_offset_round_trip_distance() {
        let (lat, lon) = offset(51.5, -0.12, PI / 3.0, 1000.0);
        let dist = haversine(51.5, -0.12, lat, lon);
        assert!((dist - 1000.0).abs() < 0.01);
    }

    #[test]
    fn test_mirror_round_trip() {
        let state = Arc::new(MemoryStateStore::default());
        let mirror = RegionMirror::new(state);
        let regions = region_ring(47.62, -122.35, 25.0, 5);

        mirror.save(&regions);
        assert_eq!(mirror.load(), regions);

        mirror.clear();
        assert!(mirror.load().is_empty());
    }

    #[test]
    fn test_mirror_save_replaces_previous_set() {
        let state = Arc::new(MemoryStateStore::default());
        let mirror = RegionMirror::new(state);

        mirror.save(&region_ring(47.62, -122.35, 25.0, 5));
        let smaller = region_ring(51.5, -0.12, 50.0, 3);
        mirror.save(&smaller);

        assert_eq!(mirror.load(), smaller);
    }

    fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
        let (lat1, lon1, lat2, lon2) = (
            lat1.to_radians(),
            lon1.to_radians(),
            lat2.to_radians(),
            lon2.to_radians(),
        );
        let dlat = lat2 - lat1;
        let dlon = lon2 - lon1;
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}
