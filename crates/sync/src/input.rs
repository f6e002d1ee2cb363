use bitflags::bitflags;
use glam::Vec3;

use crate::net::InputPacket;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Buttons: u32 {
        const FIRE = 1 << 0;
        const JUMP = 1 << 1;
        const CROUCH = 1 << 2;
        const SPRINT = 1 << 3;
        const USE = 1 << 4;
        const RELOAD = 1 << 5;
    }
}

/// Input intent produced by gameplay for one frame. The session stamps the
/// sequence number and player id when it goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InputRecord {
    pub movement: Vec3,
    pub buttons: Buttons,
}

impl InputRecord {
    pub fn new(movement: Vec3, buttons: Buttons) -> Self {
        Self { movement, buttons }
    }

    pub fn to_packet(self, sequence: u32, player_id: u32) -> InputPacket {
        InputPacket {
            sequence,
            player_id,
            movement: self.movement,
            buttons: self.buttons.bits(),
        }
    }

    /// Unknown button bits from a newer peer are dropped.
    pub fn from_packet(packet: &InputPacket) -> Self {
        Self {
            movement: packet.movement,
            buttons: Buttons::from_bits_truncate(packet.buttons),
        }
    }
}
