use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

/// Default angular width of a directional listener, in degrees.
pub const DEFAULT_LISTENER_WIDTH: f64 = 30.0;

/// Where the listener is and, optionally, which way they are listening.
///
/// A listener without coordinates disables geofencing entirely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListenerState {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Compass heading in degrees. Enables directional listening.
    #[serde(default)]
    pub heading: Option<f64>,
    /// Angular width around `heading`, in degrees.
    #[serde(default)]
    pub width: Option<f64>,
    /// Minimum audible distance in meters.
    #[serde(default)]
    pub range_min: Option<f64>,
    /// Maximum audible distance in meters. Overrides the geofence radius.
    #[serde(default)]
    pub range_max: Option<f64>,
}

impl ListenerState {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            ..Default::default()
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn position(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
            _ => None,
        }
    }

    /// Whether something at `location` is audible to this listener.
    ///
    /// Listeners without a position, and locations that are unknown, are
    /// always in range.
    pub fn can_hear(&self, location: Option<GeoPoint>, radius_m: f64) -> bool {
        let (listener, location) = match (self.position(), location) {
            (Some(l), Some(r)) => (l, r),
            _ => return true,
        };

        let distance = listener.distance_meters(&location);

        if let Some(range_max) = self.range_max {
            let range_min = self.range_min.unwrap_or(0.0);
            if distance < range_min || distance > range_max {
                return false;
            }
            return match self.heading {
                Some(heading) => {
                    let width = self.width.unwrap_or(DEFAULT_LISTENER_WIDTH);
                    within_heading(listener.bearing_to(&location), heading, width)
                }
                None => true,
            };
        }

        if let Some(heading) = self.heading {
            let range_min = self.range_min.unwrap_or(0.0);
            if distance < range_min {
                return false;
            }
            let width = self.width.unwrap_or(DEFAULT_LISTENER_WIDTH);
            return within_heading(listener.bearing_to(&location), heading, width);
        }

        distance <= radius_m
    }
}

/// True if `bearing` lies within `heading ± width / 2`, wrapping at north.
fn within_heading(bearing: f64, heading: f64, width: f64) -> bool {
    let diff = (bearing - heading).rem_euclid(360.0);
    let diff = if diff > 180.0 { 360.0 - diff } else { diff };
    diff <= width / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_listener_hears_everything() {
        let listener = ListenerState::unknown();
        assert!(listener.can_hear(Some(GeoPoint::new(10.0, 10.0)), 1.0));
    }

    #[test]
    fn test_unlocated_recording_is_always_audible() {
        let listener = ListenerState::at(0.0, 0.0);
        assert!(listener.can_hear(None, 1.0));
    }

    #[test]
    fn test_radius_boundary() {
        let listener = ListenerState::at(0.0, 0.0);
        let point = GeoPoint::new(0.0001, 0.0);
        let d = listener.position().unwrap().distance_meters(&point);
        assert!(listener.can_hear(Some(point), d));
        assert!(!listener.can_hear(Some(point), d - 0.01));
    }

    #[test]
    fn test_range_overrides_radius() {
        let listener = ListenerState {
            range_min: Some(100.0),
            range_max: Some(1000.0),
            ..ListenerState::at(0.0, 0.0)
        };
        // ~11 m away: inside the radius but closer than range_min.
        assert!(!listener.can_hear(Some(GeoPoint::new(0.0001, 0.0)), 50.0));
        // ~556 m away: outside the radius but inside the range.
        assert!(listener.can_hear(Some(GeoPoint::new(0.005, 0.0)), 50.0));
    }

    #[test]
    fn test_directional_listening() {
        let listener = ListenerState {
            heading: Some(0.0),
            width: Some(30.0),
            ..ListenerState::at(0.0, 0.0)
        };
        // Due north is within the cone, due east is not.
        assert!(listener.can_hear(Some(GeoPoint::new(1.0, 0.0)), 10.0));
        assert!(!listener.can_hear(Some(GeoPoint::new(0.0, 1.0)), 10.0));
    }

    #[test]
    fn test_heading_wraps_around_north() {
        assert!(within_heading(355.0, 5.0, 30.0));
        assert!(within_heading(10.0, 350.0, 45.0));
        assert!(!within_heading(180.0, 0.0, 30.0));
    }
}
