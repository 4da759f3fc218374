//! Shared serial bus for the arm's servos.

use crate::HalError;
use crate::units::ServoScale;

/// What a servo sent back for a position query.
///
/// Firmware revisions disagree on the reply shape: some return the bare
/// position, others a status code followed by the position. Anything that
/// fits neither shape surfaces as [`ServoReply::Garbled`].
#[derive(Debug, Clone, PartialEq)]
pub enum ServoReply {
    Position(i64),
    Status { code: i64, position: i64 },
    Garbled(String),
}

/// A half-duplex bus carrying position reads and timed moves.
pub trait ServoBus: Send {
    /// Query one servo's current raw position.
    ///
    /// # Errors
    ///
    /// [`HalError::Timeout`] when the servo does not answer; other variants
    /// for bus-level failures.
    fn read_position(&mut self, id: u8) -> Result<ServoReply, HalError>;

    /// Command a move to `raw` over `duration_ms`. With `wait` the call
    /// returns only after the move time has elapsed.
    fn write_position(
        &mut self,
        id: u8,
        raw: i32,
        duration_ms: u32,
        wait: bool,
    ) -> Result<(), HalError>;
}

/// Extract an in-range raw position from a reply, or `None` when the reply
/// is ambiguous and should be retried.
pub fn parse_position_reply(reply: &ServoReply, scale: &ServoScale) -> Option<i32> {
    let position = match *reply {
        ServoReply::Position(position) => position,
        ServoReply::Status { code, position } if code == 0 || code == 1 => position,
        _ => return None,
    };
    scale.contains_raw(position).then_some(position as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_position_in_range_parses() {
        let scale = ServoScale::default();
        assert_eq!(parse_position_reply(&ServoReply::Position(512), &scale), Some(512));
        assert_eq!(parse_position_reply(&ServoReply::Position(1001), &scale), None);
        assert_eq!(parse_position_reply(&ServoReply::Position(-1), &scale), None);
    }

    #[test]
    fn status_pair_requires_ok_code() {
        let scale = ServoScale::default();
        let ok = ServoReply::Status { code: 0, position: 300 };
        let truthy = ServoReply::Status { code: 1, position: 300 };
        let bad = ServoReply::Status { code: 4, position: 300 };
        assert_eq!(parse_position_reply(&ok, &scale), Some(300));
        assert_eq!(parse_position_reply(&truthy, &scale), Some(300));
        assert_eq!(parse_position_reply(&bad, &scale), None);
    }

    #[test]
    fn garbled_reply_is_none() {
        let scale = ServoScale::default();
        let reply = ServoReply::Garbled("55 55 ff".into());
        assert_eq!(parse_position_reply(&reply, &scale), None);
    }
}
