// clc.rs -- messages sent from the client to the server

use bitflags::bitflags;

use crate::coords::{Angle, Coord};
use crate::defs::{MAX_BATCH_MOVE_CMDS, MAX_BATCH_MOVE_FRAMES};

bitflags! {
    /// Fields set in a `MoveDelta`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct CmdFlags: u32 {
        const ANGLE0       = 0x1;
        const ANGLE1       = 0x2;
        const ANGLE2       = 0x4;
        const MOVE_FORWARD = 0x8;
        const MOVE_SIDE    = 0x10;
        const MOVE_UP      = 0x20;
        const BUTTONS      = 0x40;
        const IMPULSE      = 0x80;
    }
}

/// One user command, relative to the previous one.
///
/// `msec` and `lightlevel` are always present.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MoveDelta {
    pub delta_bits: CmdFlags,
    pub angles: [Angle; 3],
    /// forward, side, up
    pub moves: [Coord; 3],
    pub buttons: u8,
    pub impulse: u8,
    pub msec: u8,
    pub lightlevel: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Move {
    /// Last frame received from the server
    pub lastframe: i32,
    /// Oldest first
    pub moves: [MoveDelta; 3],
    /// Outgoing packet sequence; used for the vanilla checksum only
    pub sequence: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BatchMoveFrame {
    pub num_cmds: u8,
    pub moves: [MoveDelta; MAX_BATCH_MOVE_CMDS],
}

/// Q2PRO batched moves: `num_dups + 1` frames of commands.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BatchMove {
    pub lastframe: i32,
    pub num_dups: u8,
    pub batch_frames: [BatchMoveFrame; MAX_BATCH_MOVE_FRAMES],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Setting {
    pub index: i16,
    pub value: i16,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserinfoDelta {
    pub name: String,
    pub value: String,
}

/// A message from the client.
#[derive(Clone, Debug, PartialEq)]
pub enum ClcMessage {
    Nop,
    Move(Move),
    BatchMove(Box<BatchMove>),
    Userinfo(String),
    StringCmd(String),
    Setting(Setting),
    UserinfoDelta(UserinfoDelta),
}

impl ClcMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ClcMessage::Nop => "nop",
            ClcMessage::Move(_) => "move",
            ClcMessage::BatchMove(_) => "batch_move",
            ClcMessage::Userinfo(_) => "userinfo",
            ClcMessage::StringCmd(_) => "stringcmd",
            ClcMessage::Setting(_) => "setting",
            ClcMessage::UserinfoDelta(_) => "userinfo_delta",
        }
    }
}
