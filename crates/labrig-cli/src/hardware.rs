//! Driver attachment. Only the simulated backend is built in; without
//! `simulate` every subsystem reports `driver_not_configured`.

use labrig_devices::RigHardware;
use labrig_hal::sim::SimHardware;
use labrig_hal::{HalError, PwmChannel, ServoBus, ThermalSensor, VideoDevice};
use tracing::info;

use crate::config::Config;

pub struct Drivers {
    pub servo_bus: Result<Box<dyn ServoBus>, HalError>,
    pub rig: Result<RigHardware, HalError>,
    pub thermal: Result<Box<dyn ThermalSensor>, HalError>,
    pub webcam: Result<Box<dyn VideoDevice>, HalError>,
}

pub fn attach(cfg: &Config) -> Drivers {
    if !cfg.server.simulate {
        return Drivers {
            servo_bus: Err(HalError::NotConfigured),
            rig: Err(HalError::NotConfigured),
            thermal: Err(HalError::NotConfigured),
            webcam: Err(HalError::NotConfigured),
        };
    }

    info!("attaching simulated drivers");
    let sim = SimHardware::from_config(&cfg.arm, &cfg.thermal, &cfg.webcam);
    let channels = (0..cfg.rig.channels)
        .map(|c| Box::new(sim.pwm.channel(c)) as Box<dyn PwmChannel>)
        .collect();
    Drivers {
        servo_bus: Ok(Box::new(sim.servo_bus)),
        rig: Ok(RigHardware {
            channels,
            stirrer: Some(Box::new(sim.stirrer)),
        }),
        thermal: Ok(Box::new(sim.thermal)),
        webcam: Ok(Box::new(sim.webcam)),
    }
}
