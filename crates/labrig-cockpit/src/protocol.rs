//! Inbound command parsing.
//!
//! Every client message is a JSON object `{type, ...args}`. Parsing checks
//! shape and JSON types only; ranges that depend on the rig configuration
//! are checked by the controllers and the sequencer.
//!
//! Booleans are never accepted where a number is expected, and integer
//! fields reject fractional JSON numbers.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("invalid_json")]
    InvalidJson,
    #[error("invalid_payload")]
    InvalidPayload,
    #[error("unknown_command")]
    UnknownCommand,
    /// A named argument failed its type check.
    #[error("{0}")]
    Invalid(&'static str),
}

/// A decoded client command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetState,
    Scan,
    ArmSet {
        id: i64,
        angle: f64,
        move_ms: Option<f64>,
        wait: bool,
    },
    ArmSetMany {
        targets: Vec<(i64, f64)>,
        move_ms: Option<f64>,
    },
    Recenter {
        move_ms: Option<f64>,
    },
    RigSet {
        channel: i64,
        angle: f64,
    },
    RigStir {
        duration: i64,
    },
    Diagnostic {
        base_to_valve_delay_s: Option<f64>,
    },
    Dispense {
        dropper: i64,
        amount_ml: f64,
    },
    Cleanup {
        move_ms: Option<f64>,
    },
    AutomationStir {
        duration_s: f64,
    },
}

impl Command {
    pub fn subsystem(&self) -> &'static str {
        match self {
            Command::GetState => "state",
            Command::Scan
            | Command::ArmSet { .. }
            | Command::ArmSetMany { .. }
            | Command::Recenter { .. } => "xarm",
            Command::RigSet { .. } | Command::RigStir { .. } | Command::Diagnostic { .. } => "rig",
            Command::Dispense { .. } | Command::Cleanup { .. } | Command::AutomationStir { .. } => {
                "automation"
            }
        }
    }

    /// Action name as echoed in acks.
    pub fn action(&self) -> &'static str {
        match self {
            Command::GetState => "get_state",
            Command::Scan => "scan",
            Command::ArmSet { .. } | Command::RigSet { .. } => "set",
            Command::ArmSetMany { .. } => "set_many",
            Command::Recenter { .. } => "recenter",
            Command::RigStir { .. } | Command::AutomationStir { .. } => "stir",
            Command::Diagnostic { .. } => "diagnostic",
            Command::Dispense { .. } => "dispense",
            Command::Cleanup { .. } => "cleanup",
        }
    }

    /// Prefix for controller failures that are not reported verbatim.
    pub fn failure_prefix(&self) -> &'static str {
        match self {
            Command::RigSet { .. } => "rig_set_failed",
            Command::GetState => "get_state_failed",
            Command::Scan => "scan_failed",
            Command::ArmSet { .. } => "set_failed",
            Command::ArmSetMany { .. } => "set_many_failed",
            Command::Recenter { .. } => "recenter_failed",
            Command::RigStir { .. } | Command::AutomationStir { .. } => "stir_failed",
            Command::Diagnostic { .. } => "diagnostic_failed",
            Command::Dispense { .. } => "dispense_failed",
            Command::Cleanup { .. } => "cleanup_failed",
        }
    }
}

/// Decode one text frame.
pub fn parse_command(text: &str) -> Result<Command, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(|_| ProtocolError::InvalidJson)?;
    let Value::Object(data) = value else {
        return Err(ProtocolError::InvalidPayload);
    };
    let kind = data.get("type").and_then(Value::as_str).unwrap_or_default();

    match kind {
        "get_state" => Ok(Command::GetState),
        "scan" | "xarm_scan" => Ok(Command::Scan),
        "set_many" | "xarm_set_many" => Ok(Command::ArmSetMany {
            targets: targets(data.get("targets"))?,
            move_ms: move_ms(&data)?,
        }),
        "recenter" | "xarm_recenter" => Ok(Command::Recenter {
            move_ms: move_ms(&data)?,
        }),
        "xarm_set" => arm_set(&data),
        "set" if data.contains_key("id") => arm_set(&data),
        "rig_set" => rig_set(&data),
        "set" if data.contains_key("channel") => rig_set(&data),
        "dispense" | "automation_dispense" => Ok(Command::Dispense {
            dropper: integer(data.get("dropper")).ok_or(ProtocolError::Invalid("invalid_dropper"))?,
            amount_ml: number(either(&data, "amountMl", "amount"))
                .ok_or(ProtocolError::Invalid("invalid_amount_ml"))?,
        }),
        "cleanup" | "automation_cleanup" => Ok(Command::Cleanup {
            move_ms: move_ms(&data)?,
        }),
        "automation_stir" => automation_stir(&data),
        "stir" if data.contains_key("durationS") => automation_stir(&data),
        "stir" | "rig_stir" => Ok(Command::RigStir {
            duration: integer(data.get("duration")).ok_or(ProtocolError::Invalid("invalid_duration"))?,
        }),
        "diagnostic" | "rig_diagnostic" => Ok(Command::Diagnostic {
            base_to_valve_delay_s: optional_number(
                data.get("baseToValveDelayS"),
                "invalid_base_to_valve_delay",
            )?,
        }),
        _ => Err(ProtocolError::UnknownCommand),
    }
}

fn arm_set(data: &Map<String, Value>) -> Result<Command, ProtocolError> {
    let (Some(id), Some(angle)) = (
        integer(data.get("id")),
        number(either(data, "angle", "position")),
    ) else {
        return Err(ProtocolError::InvalidPayload);
    };
    let wait = match present(data.get("wait")) {
        None => false,
        Some(Value::Bool(wait)) => *wait,
        Some(_) => return Err(ProtocolError::Invalid("invalid_wait")),
    };
    Ok(Command::ArmSet {
        id,
        angle,
        move_ms: move_ms(data)?,
        wait,
    })
}

fn rig_set(data: &Map<String, Value>) -> Result<Command, ProtocolError> {
    let channel = integer(data.get("channel")).ok_or(ProtocolError::Invalid("invalid_channel"))?;
    let angle = number(data.get("angle")).ok_or(ProtocolError::Invalid("invalid_angle"))?;
    Ok(Command::RigSet { channel, angle })
}

fn automation_stir(data: &Map<String, Value>) -> Result<Command, ProtocolError> {
    let duration_s = number(either(data, "durationS", "duration"))
        .ok_or(ProtocolError::Invalid("invalid_duration_s"))?;
    Ok(Command::AutomationStir { duration_s })
}

fn targets(raw: Option<&Value>) -> Result<Vec<(i64, f64)>, ProtocolError> {
    let Some(Value::Array(entries)) = raw else {
        return Err(ProtocolError::Invalid("invalid_targets"));
    };
    let mut parsed: Vec<(i64, f64)> = Vec::with_capacity(entries.len());
    for entry in entries {
        let Value::Object(entry) = entry else {
            return Err(ProtocolError::Invalid("invalid_targets"));
        };
        let (Some(id), Some(angle)) = (
            integer(entry.get("id")),
            number(either(entry, "angle", "position")),
        ) else {
            return Err(ProtocolError::Invalid("invalid_targets"));
        };
        // A repeated id keeps its first slot and its last angle.
        match parsed.iter_mut().find(|(existing, _)| *existing == id) {
            Some(slot) => slot.1 = angle,
            None => parsed.push((id, angle)),
        }
    }
    if parsed.is_empty() {
        return Err(ProtocolError::Invalid("empty_targets"));
    }
    Ok(parsed)
}

fn move_ms(data: &Map<String, Value>) -> Result<Option<f64>, ProtocolError> {
    optional_number(data.get("moveMs"), "invalid_move_ms")
}

/// `null` is treated the same as a missing key.
fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

/// `primary` if present, else `fallback`.
fn either<'a>(data: &'a Map<String, Value>, primary: &str, fallback: &str) -> Option<&'a Value> {
    present(data.get(primary)).or_else(|| data.get(fallback))
}

fn integer(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn optional_number(value: Option<&Value>, code: &'static str) -> Result<Option<f64>, ProtocolError> {
    match present(value) {
        None => Ok(None),
        Some(v) => number(Some(v)).map(Some).ok_or(ProtocolError::Invalid(code)),
    }
}
