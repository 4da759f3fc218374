//! [`ArmController`] – the six-servo arm on a shared serial bus.
//!
//! Cached state is optimistic: a successful write updates the cached raw
//! position without reading it back. Reads are retried a bounded number of
//! times; a servo that never gives a parsable answer is reported as unknown
//! and dropped from the online set rather than failing the caller.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use labrig_hal::{HalError, ServoBus, ServoScale, parse_position_reply};
use labrig_types::{ArmConfig, Availability, Device, RigError};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

type SharedBus = Arc<Mutex<Box<dyn ServoBus>>>;

/// Outcome of a single accepted servo move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoMove {
    pub id: u8,
    /// Commanded angle after clamping, rounded to 0.1°.
    pub angle_deg: f64,
    pub raw: i32,
    pub move_ms: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServoSnapshot {
    pub id: u8,
    pub angle_deg: f64,
    pub center_deg: f64,
    /// Degrees; kept under this name for older dashboards.
    pub position: f64,
    pub center: f64,
    pub raw_position: i32,
    pub raw_center: i32,
    pub online: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Limits<T> {
    pub min: T,
    pub max: T,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveDefaults {
    pub move_ms: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmSnapshot {
    pub available: bool,
    pub error: Option<String>,
    pub servos: Vec<ServoSnapshot>,
    pub limits: Limits<f64>,
    pub raw_limits: Limits<i32>,
    pub defaults: MoveDefaults,
    pub online_ids: Vec<u8>,
}

#[derive(Debug, Default)]
struct ArmState {
    positions: BTreeMap<u8, i32>,
    startup_centers: BTreeMap<u8, i32>,
    online: BTreeSet<u8>,
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub struct ArmController {
    config: ArmConfig,
    scale: ServoScale,
    availability: Availability,
    bus: Option<SharedBus>,
    state: Mutex<ArmState>,
    /// Held across each bus write (or batch of writes).
    write_lock: tokio::sync::Mutex<()>,
}

impl ArmController {
    /// Build the controller around the result of opening the bus. A failed
    /// attach leaves the controller permanently unavailable.
    pub fn new(config: ArmConfig, bus: Result<Box<dyn ServoBus>, HalError>) -> Self {
        let scale = ServoScale::from_config(&config);
        let mid = scale.midpoint_raw();
        let state = ArmState {
            positions: config.servo_ids.iter().map(|&id| (id, mid)).collect(),
            startup_centers: config.servo_ids.iter().map(|&id| (id, mid)).collect(),
            online: BTreeSet::new(),
        };
        let (availability, bus) = match bus {
            Ok(bus) => (Availability::online(), Some(Arc::new(Mutex::new(bus)))),
            Err(e) => {
                warn!(error = %e, "arm servo bus unavailable");
                (Availability::offline(e.to_string()), None)
            }
        };
        Self {
            config,
            scale,
            availability,
            bus,
            state: Mutex::new(state),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ArmConfig {
        &self.config
    }

    pub fn scale(&self) -> &ServoScale {
        &self.scale
    }

    pub fn availability(&self) -> &Availability {
        &self.availability
    }

    pub fn is_valid_id(&self, id: i64) -> bool {
        self.config.servo_ids.iter().any(|&s| i64::from(s) == id)
    }

    fn validate_id(&self, id: i64) -> Result<u8, RigError> {
        if self.is_valid_id(id) {
            Ok(id as u8)
        } else {
            Err(RigError::InvalidServoId(id))
        }
    }

    async fn with_bus<R, F>(&self, f: F) -> Result<R, RigError>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn ServoBus) -> Result<R, HalError> + Send + 'static,
    {
        self.availability.ensure(Device::Arm)?;
        let Some(bus) = self.bus.clone() else {
            return Err(RigError::unavailable(Device::Arm, "not_attached"));
        };
        tokio::task::spawn_blocking(move || {
            let mut guard = bus.lock();
            f(&mut **guard)
        })
        .await
        .map_err(|e| RigError::fault(Device::Arm.as_str(), e))?
        .map_err(|e| e.into_rig(Device::Arm))
    }

    /// Read one servo, retrying unparsable answers. `Ok(None)` means the
    /// servo did not give a usable answer within the retry budget.
    pub async fn read_position(&self, id: u8) -> Result<Option<i32>, RigError> {
        self.availability.ensure(Device::Arm)?;
        let attempts = self.config.read_retries.max(1);
        for attempt in 1..=attempts {
            let scale = self.scale;
            match self
                .with_bus(move |bus| bus.read_position(id).map(|r| parse_position_reply(&r, &scale)))
                .await
            {
                Ok(Some(raw)) => return Ok(Some(raw)),
                Ok(None) => debug!(id, attempt, "unparsable servo reply"),
                Err(e) => debug!(id, attempt, error = %e, "servo read failed"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.read_retry_delay()).await;
            }
        }
        Ok(None)
    }

    /// Re-read every configured servo and replace the online set with the
    /// ones that answered. Returns the new online ids, sorted.
    pub async fn scan_all(&self) -> Result<Vec<u8>, RigError> {
        self.availability.ensure(Device::Arm)?;
        let mut answered = BTreeMap::new();
        for &id in &self.config.servo_ids {
            if let Some(raw) = self.read_position(id).await? {
                answered.insert(id, raw);
            }
        }
        let mut state = self.state.lock();
        state.online = answered.keys().copied().collect();
        state.positions.extend(answered);
        Ok(state.online.iter().copied().collect())
    }

    /// Scan once and remember every answering servo's position as its
    /// recenter target. A detached arm is skipped silently.
    pub async fn capture_startup_centers(&self) -> Result<(), RigError> {
        if !self.availability.available {
            return Ok(());
        }
        let online = self.scan_all().await?;
        let mut state = self.state.lock();
        for id in &online {
            if let Some(&raw) = state.positions.get(id) {
                state.startup_centers.insert(*id, raw);
            }
        }
        info!(online = ?online, "captured arm startup centers");
        Ok(())
    }

    /// Caller must hold `write_lock`.
    async fn write_one(
        &self,
        id: u8,
        angle_deg: f64,
        move_ms: u32,
        wait: bool,
    ) -> Result<ServoMove, RigError> {
        let angle = self.scale.clamp_angle(angle_deg);
        let raw = self.scale.angle_to_raw(angle);
        self.with_bus(move |bus| bus.write_position(id, raw, move_ms, wait))
            .await?;
        let mut state = self.state.lock();
        state.positions.insert(id, raw);
        state.online.insert(id);
        Ok(ServoMove {
            id,
            angle_deg: round1(angle),
            raw,
            move_ms,
        })
    }

    pub async fn set_position(
        &self,
        id: i64,
        angle_deg: f64,
        move_ms: u32,
        wait: bool,
    ) -> Result<ServoMove, RigError> {
        self.availability.ensure(Device::Arm)?;
        let id = self.validate_id(id)?;
        let move_ms = self.config.clamp_move_ms(i64::from(move_ms));
        let _guard = self.write_lock.lock().await;
        self.write_one(id, angle_deg, move_ms, wait).await
    }

    /// Move several servos as one batch; no other write interleaves.
    /// Returns the clamped move time.
    pub async fn set_many(&self, targets: &[(i64, f64)], move_ms: u32) -> Result<u32, RigError> {
        self.availability.ensure(Device::Arm)?;
        let validated = targets
            .iter()
            .map(|&(id, angle)| self.validate_id(id).map(|id| (id, angle)))
            .collect::<Result<Vec<_>, _>>()?;
        let move_ms = self.config.clamp_move_ms(i64::from(move_ms));
        let _guard = self.write_lock.lock().await;
        for (id, angle) in validated {
            self.write_one(id, angle, move_ms, false).await?;
        }
        Ok(move_ms)
    }

    /// Return every servo to the position captured at startup.
    pub async fn recenter(&self, move_ms: u32) -> Result<u32, RigError> {
        let targets: Vec<(i64, f64)> = {
            let state = self.state.lock();
            state
                .startup_centers
                .iter()
                .map(|(&id, &raw)| (i64::from(id), self.scale.raw_to_angle(i64::from(raw))))
                .collect()
        };
        self.set_many(&targets, move_ms).await
    }

    pub fn online_ids(&self) -> Vec<u8> {
        self.state.lock().online.iter().copied().collect()
    }

    pub fn raw_position(&self, id: u8) -> Option<i32> {
        self.state.lock().positions.get(&id).copied()
    }

    pub fn snapshot(&self) -> ArmSnapshot {
        let state = self.state.lock();
        let mid = self.scale.midpoint_raw();
        let servos = self
            .config
            .servo_ids
            .iter()
            .map(|&id| {
                let raw_position = state.positions.get(&id).copied().unwrap_or(mid);
                let raw_center = state.startup_centers.get(&id).copied().unwrap_or(mid);
                let angle_deg = round1(self.scale.raw_to_angle(i64::from(raw_position)));
                let center_deg = round1(self.scale.raw_to_angle(i64::from(raw_center)));
                ServoSnapshot {
                    id,
                    angle_deg,
                    center_deg,
                    position: angle_deg,
                    center: center_deg,
                    raw_position,
                    raw_center,
                    online: state.online.contains(&id),
                }
            })
            .collect();
        ArmSnapshot {
            available: self.availability.available,
            error: self.availability.error.clone(),
            servos,
            limits: Limits {
                min: self.scale.min_deg(),
                max: self.scale.max_deg(),
            },
            raw_limits: Limits {
                min: self.scale.raw_min(),
                max: self.scale.raw_max(),
            },
            defaults: MoveDefaults {
                move_ms: self.config.default_move_ms,
            },
            online_ids: state.online.iter().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labrig_hal::sim::SimServoBus;

    fn fast_config() -> ArmConfig {
        ArmConfig {
            read_retry_delay_s: 0.0,
            ..ArmConfig::default()
        }
    }

    fn arm_with(bus: &SimServoBus) -> ArmController {
        ArmController::new(fast_config(), Ok(Box::new(bus.clone())))
    }

    #[tokio::test]
    async fn read_retries_until_parsable() {
        let bus = SimServoBus::new(&[1, 2, 3, 4, 5, 6], 420);
        bus.with_state(|s| s.garbled_reads = 2);
        let arm = arm_with(&bus);
        assert_eq!(arm.read_position(1).await.unwrap(), Some(420));
        assert_eq!(bus.with_state(|s| s.reads), 3);
    }

    #[tokio::test]
    async fn read_gives_up_as_unknown() {
        let bus = SimServoBus::new(&[1, 2, 3, 4, 5, 6], 420);
        bus.with_state(|s| s.garbled_reads = 10);
        let arm = arm_with(&bus);
        assert_eq!(arm.read_position(1).await.unwrap(), None);
        assert_eq!(bus.with_state(|s| s.reads), 3);
    }

    #[tokio::test]
    async fn scan_replaces_online_set_but_keeps_cached_positions() {
        let bus = SimServoBus::new(&[1, 2, 3, 4, 5, 6], 300);
        let arm = arm_with(&bus);
        assert_eq!(arm.scan_all().await.unwrap(), vec![1, 2, 3, 4, 5, 6]);

        bus.with_state(|s| {
            s.responsive.remove(&4);
            s.positions.insert(4, 900);
        });
        assert_eq!(arm.scan_all().await.unwrap(), vec![1, 2, 3, 5, 6]);
        assert_eq!(arm.raw_position(4), Some(300));
        assert!(!arm.snapshot().servos[3].online);
    }

    #[tokio::test]
    async fn set_position_updates_cache_optimistically() {
        let bus = SimServoBus::new(&[1, 2, 3, 4, 5, 6], 500);
        let arm = arm_with(&bus);
        let mv = arm.set_position(2, 60.04, 50, false).await.unwrap();
        assert_eq!(mv.angle_deg, 60.0);
        assert_eq!(mv.raw, 250);
        assert_eq!(mv.move_ms, 100, "move time clamps to the configured minimum");
        assert_eq!(arm.raw_position(2), Some(250));
        assert_eq!(arm.online_ids(), vec![2]);
    }

    #[tokio::test]
    async fn set_position_rejects_unknown_id() {
        let bus = SimServoBus::new(&[1, 2, 3, 4, 5, 6], 500);
        let arm = arm_with(&bus);
        let err = arm.set_position(9, 10.0, 600, false).await.unwrap_err();
        assert_eq!(err, RigError::InvalidServoId(9));
        assert!(bus.writes().is_empty());
    }

    #[tokio::test]
    async fn set_many_validates_before_writing() {
        let bus = SimServoBus::new(&[1, 2, 3, 4, 5, 6], 500);
        let arm = arm_with(&bus);
        let err = arm.set_many(&[(1, 10.0), (7, 20.0)], 600).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid_id");
        assert!(bus.writes().is_empty());

        assert_eq!(arm.set_many(&[(1, 10.0), (2, 20.0)], 600).await.unwrap(), 600);
        assert_eq!(bus.writes().len(), 2);
    }

    #[tokio::test]
    async fn recenter_returns_to_startup_centers() {
        let bus = SimServoBus::new(&[1, 2, 3, 4, 5, 6], 700);
        let arm = arm_with(&bus);
        arm.capture_startup_centers().await.unwrap();
        arm.set_position(1, 0.0, 600, false).await.unwrap();
        assert_eq!(bus.position(1), Some(0));

        arm.recenter(600).await.unwrap();
        for id in 1..=6u8 {
            assert_eq!(bus.position(id), Some(700));
        }
    }

    #[tokio::test]
    async fn detached_arm_reports_unavailable() {
        let arm = ArmController::new(fast_config(), Err(HalError::NotAttached("hid".into())));
        let err = arm.set_position(1, 10.0, 600, false).await.unwrap_err();
        assert!(err.to_string().starts_with("xarm_unavailable:"));
        assert!(arm.capture_startup_centers().await.is_ok());

        let snap = arm.snapshot();
        assert!(!snap.available);
        assert_eq!(snap.servos.len(), 6);
        assert_eq!(snap.servos[0].raw_position, 500);
    }

    #[tokio::test]
    async fn failed_write_leaves_cache_untouched() {
        let bus = SimServoBus::new(&[1, 2, 3, 4, 5, 6], 500);
        bus.with_state(|s| s.fail_writes = true);
        let arm = arm_with(&bus);
        let err = arm.set_position(1, 0.0, 600, false).await.unwrap_err();
        assert!(matches!(err, RigError::HardwareFault { .. }));
        assert_eq!(arm.raw_position(1), Some(500));
        assert!(arm.online_ids().is_empty());
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let bus = SimServoBus::new(&[1, 2, 3, 4, 5, 6], 500);
        let arm = arm_with(&bus);
        let json = serde_json::to_value(arm.snapshot()).unwrap();
        assert_eq!(json["servos"][0]["angleDeg"], 120.0);
        assert_eq!(json["rawLimits"]["max"], 1000);
        assert_eq!(json["defaults"]["moveMs"], 600);
        assert!(json["error"].is_null());
        assert_eq!(json["onlineIds"], serde_json::json!([]));
    }
}
