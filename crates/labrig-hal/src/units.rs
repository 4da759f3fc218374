//! Angle ↔ raw conversion for bus servos.
//!
//! Bus servos take an integer position in `[raw_min, raw_max]` that maps
//! affinely onto a mechanical range in degrees. Both directions clamp their
//! input first, so no value outside the documented domain ever reaches the
//! bus.

use labrig_types::ArmConfig;

/// Affine mapping between a servo's degree range and its raw encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoScale {
    min_deg: f64,
    max_deg: f64,
    raw_min: i32,
    raw_max: i32,
}

impl ServoScale {
    pub fn new(min_deg: f64, max_deg: f64, raw_min: i32, raw_max: i32) -> Self {
        Self {
            min_deg,
            max_deg,
            raw_min,
            raw_max,
        }
    }

    pub fn from_config(config: &ArmConfig) -> Self {
        Self::new(
            config.min_angle_deg,
            config.max_angle_deg,
            config.raw_min,
            config.raw_max,
        )
    }

    pub fn min_deg(&self) -> f64 {
        self.min_deg
    }

    pub fn max_deg(&self) -> f64 {
        self.max_deg
    }

    pub fn raw_min(&self) -> i32 {
        self.raw_min
    }

    pub fn raw_max(&self) -> i32 {
        self.raw_max
    }

    /// Raw position the arm is assumed to sit at before the first read.
    pub fn midpoint_raw(&self) -> i32 {
        self.raw_min + (self.raw_max - self.raw_min) / 2
    }

    pub fn contains_raw(&self, raw: i64) -> bool {
        (i64::from(self.raw_min)..=i64::from(self.raw_max)).contains(&raw)
    }

    pub fn clamp_raw(&self, raw: i64) -> i32 {
        raw.clamp(i64::from(self.raw_min), i64::from(self.raw_max)) as i32
    }

    pub fn clamp_angle(&self, angle_deg: f64) -> f64 {
        angle_deg.clamp(self.min_deg, self.max_deg)
    }

    pub fn raw_to_angle(&self, raw: i64) -> f64 {
        let raw = self.clamp_raw(raw);
        let raw_span = f64::from(self.raw_max - self.raw_min);
        if raw_span == 0.0 {
            return self.min_deg;
        }
        let ratio = f64::from(raw - self.raw_min) / raw_span;
        self.min_deg + ratio * (self.max_deg - self.min_deg)
    }

    pub fn angle_to_raw(&self, angle_deg: f64) -> i32 {
        let angle = self.clamp_angle(angle_deg);
        let deg_span = self.max_deg - self.min_deg;
        if deg_span == 0.0 {
            return self.raw_min;
        }
        let ratio = (angle - self.min_deg) / deg_span;
        let raw = f64::from(self.raw_min) + ratio * f64::from(self.raw_max - self.raw_min);
        // NaN rounds to 0 through the saturating cast, then clamps like any
        // other out-of-range value.
        self.clamp_raw(raw.round() as i64)
    }
}

impl Default for ServoScale {
    fn default() -> Self {
        Self::from_config(&ArmConfig::default())
    }
}
