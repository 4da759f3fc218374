//! [`Dispatcher`] – turns one client message into controller or sequencer
//! calls and exactly one reply.
//!
//! Replies are either `{type:"ack", subsystem, action, ...}` or
//! `{type:"error", error}`. Validation, busy and availability errors are
//! sent verbatim; anything else is prefixed with `<action>_failed:`.

use std::sync::Arc;

use labrig_runtime::{Sequencer, StatusReporter};
use labrig_types::RigError;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::hub::{Client, Hub};
use crate::protocol::{Command, parse_command};
use crate::state::StateView;

/// A successful command: the ack body and whether to rebroadcast state.
struct Outcome {
    fields: Value,
    broadcast: bool,
}

impl Outcome {
    fn ack(fields: Value) -> Self {
        Self {
            fields,
            broadcast: false,
        }
    }

    fn ack_and_broadcast(fields: Value) -> Self {
        Self {
            fields,
            broadcast: true,
        }
    }
}

pub struct Dispatcher {
    view: StateView,
    sequencer: Arc<Sequencer>,
    hub: Arc<Hub>,
}

impl Dispatcher {
    /// Binds `view` into `hub` so state broadcasts see the same controllers.
    pub fn new(view: StateView, sequencer: Arc<Sequencer>, hub: Arc<Hub>) -> Self {
        hub.bind_state(view.clone());
        Self {
            view,
            sequencer,
            hub,
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn view(&self) -> &StateView {
        &self.view
    }

    /// Greeting plus a private state snapshot for a newly connected client.
    pub async fn greet(&self, client: &Client) {
        client
            .send_json(&json!({ "type": "info", "message": "connected" }))
            .await;
        client.send_json(&self.view.snapshot()).await;
    }

    pub async fn handle_text(&self, client: &Arc<Client>, text: &str) {
        let command = match parse_command(text) {
            Ok(command) => command,
            Err(e) => {
                debug!(client = %client.id(), error = %e, "rejected message");
                client.send_error(&e.to_string()).await;
                return;
            }
        };
        debug!(client = %client.id(), ?command, "command");

        if command == Command::GetState {
            client.send_json(&self.view.snapshot()).await;
            return;
        }

        match self.execute(client, &command).await {
            Ok(outcome) => {
                let mut ack = json!({
                    "type": "ack",
                    "subsystem": command.subsystem(),
                    "action": command.action(),
                });
                if let (Value::Object(ack), Value::Object(fields)) = (&mut ack, outcome.fields) {
                    ack.extend(fields);
                }
                client.send_json(&ack).await;
                if outcome.broadcast {
                    self.hub.broadcast_state().await;
                }
            }
            Err(e) => {
                let reason = if e.is_verbatim() {
                    e.to_string()
                } else {
                    warn!(action = command.action(), error = %e, "command failed");
                    format!("{}:{e}", command.failure_prefix())
                };
                client.send_error(&reason).await;
            }
        }
    }

    fn resolve_move_ms(&self, requested: Option<f64>) -> u32 {
        let config = self.view.arm.config();
        match requested {
            None => config.default_move_ms,
            // Fractions truncate; `as` saturates out-of-range values.
            Some(ms) => config.clamp_move_ms(ms.trunc() as i64),
        }
    }

    async fn execute(&self, client: &Arc<Client>, command: &Command) -> Result<Outcome, RigError> {
        let arm = &self.view.arm;
        match *command {
            Command::GetState => Ok(Outcome::ack(json!({}))),
            Command::Scan => {
                let online = arm.scan_all().await?;
                Ok(Outcome::ack_and_broadcast(json!({ "onlineIds": online })))
            }
            Command::ArmSet {
                id,
                angle,
                move_ms,
                wait,
            } => {
                let moved = arm
                    .set_position(id, angle, self.resolve_move_ms(move_ms), wait)
                    .await?;
                Ok(Outcome::ack_and_broadcast(json!({
                    "id": id,
                    "angle": moved.angle_deg,
                    "position": moved.angle_deg,
                    "moveMs": moved.move_ms,
                })))
            }
            Command::ArmSetMany {
                ref targets,
                move_ms,
            } => {
                let applied = arm.set_many(targets, self.resolve_move_ms(move_ms)).await?;
                Ok(Outcome::ack_and_broadcast(json!({
                    "count": targets.len(),
                    "moveMs": applied,
                })))
            }
            Command::Recenter { move_ms } => {
                let applied = arm.recenter(self.resolve_move_ms(move_ms)).await?;
                Ok(Outcome::ack_and_broadcast(json!({ "moveMs": applied })))
            }
            Command::RigSet { channel, angle } => {
                let applied = self.sequencer.set_rig_channel(channel, angle).await?;
                let fields = json!({ "channel": channel, "angle": applied });
                // Base moves broadcast from their own task when they land.
                if channel == self.view.rig.base_channel() as i64 {
                    Ok(Outcome::ack(fields))
                } else {
                    Ok(Outcome::ack_and_broadcast(fields))
                }
            }
            Command::RigStir { duration } => {
                let duration = self.sequencer.rig_stir(duration)?;
                Ok(Outcome::ack(json!({ "duration": duration })))
            }
            Command::Diagnostic {
                base_to_valve_delay_s,
            } => {
                let reporter: Arc<dyn StatusReporter> = client.clone();
                let delay = self
                    .sequencer
                    .start_diagnostic(base_to_valve_delay_s, reporter)?;
                Ok(Outcome::ack(json!({ "baseToValveDelayS": delay })))
            }
            Command::Dispense { dropper, amount_ml } => {
                let report = self.sequencer.dispense(dropper, amount_ml).await?;
                let fields = serde_json::to_value(report)
                    .map_err(|e| RigError::fault("automation", e))?;
                Ok(Outcome::ack(fields))
            }
            Command::Cleanup { move_ms } => {
                let report = self.sequencer.cleanup(self.resolve_move_ms(move_ms)).await?;
                Ok(Outcome::ack(json!({
                    "steps": report.steps,
                    "moveMs": report.move_ms,
                })))
            }
            Command::AutomationStir { duration_s } => {
                let duration = self.sequencer.automation_stir(duration_s).await?;
                Ok(Outcome::ack(json!({ "durationS": duration })))
            }
        }
    }
}
