// svc.rs -- messages sent from the server to the client

use bitflags::bitflags;

use crate::coords::{
    Angle, AnglesDelta, ColorDelta, Coord, CoordsDelta, Fraction, SmallAngle, SmallAnglesDelta,
    SmallOffset, SmallOffsetsDelta,
};
use crate::defs::{INVENTORY_ITEMS, MAX_DAMAGE_INDICATORS, MAX_STATS};

// ============================================================
// Coordinates that may be sent as a difference
// ============================================================

/// Origin/velocity values that some protocols transmit relative to the
/// previous value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MaybeDiffCoords {
    /// As read from the wire. Components with a `diff_bits` bit are to be
    /// added to the previous value, all other changed components replace it.
    Read { diff_bits: u8, value: CoordsDelta },
    /// For writing: the previous and the current value.
    Write { prev: [Coord; 3], current: [Coord; 3] },
}

impl Default for MaybeDiffCoords {
    fn default() -> Self {
        MaybeDiffCoords::Read {
            diff_bits: 0,
            value: CoordsDelta::default(),
        }
    }
}

impl MaybeDiffCoords {
    /// Components whose integer encodings differ between `prev` and `current`.
    pub fn differs_int(&self) -> u8 {
        match self {
            MaybeDiffCoords::Write { prev, current } => (0..3).fold(0, |bits, c| {
                if prev[c].to_int() != current[c].to_int() {
                    bits | (1 << c)
                } else {
                    bits
                }
            }),
            MaybeDiffCoords::Read { value, .. } => value.delta_bits,
        }
    }

    /// Components whose float values differ between `prev` and `current`.
    pub fn differs_float(&self) -> u8 {
        match self {
            MaybeDiffCoords::Write { prev, current } => (0..3).fold(0, |bits, c| {
                if prev[c].to_float() != current[c].to_float() {
                    bits | (1 << c)
                } else {
                    bits
                }
            }),
            MaybeDiffCoords::Read { value, .. } => value.delta_bits,
        }
    }

    /// The value to encode for component `c`.
    pub fn current(&self, c: usize) -> Coord {
        match self {
            MaybeDiffCoords::Write { current, .. } => current[c],
            MaybeDiffCoords::Read { value, .. } => value.values[c],
        }
    }

    /// The previous value of component `c`, for difference encodings.
    pub fn prev(&self, c: usize) -> Coord {
        match self {
            MaybeDiffCoords::Write { prev, .. } => prev[c],
            MaybeDiffCoords::Read { .. } => Coord::Int(0),
        }
    }

    /// Record component `c` as read, optionally as a difference.
    pub fn set_read(&mut self, c: usize, v: Coord, is_diff: bool) {
        if !matches!(self, MaybeDiffCoords::Read { .. }) {
            *self = MaybeDiffCoords::default();
        }
        if let MaybeDiffCoords::Read { diff_bits, value } = self {
            value.set_comp(c, v);
            if is_diff {
                *diff_bits |= 1 << c;
            }
        }
    }

    /// Changed components of a read value.
    pub fn read_bits(&self) -> u8 {
        match self {
            MaybeDiffCoords::Read { value, .. } => value.delta_bits,
            MaybeDiffCoords::Write { .. } => 0,
        }
    }

    /// Apply read values to a float vector.
    pub fn apply_float(&self, to: &mut [f32; 3]) {
        if let MaybeDiffCoords::Read { diff_bits, value } = self {
            for c in 0..3 {
                if !value.has(c) {
                    continue;
                }
                if diff_bits & (1 << c) != 0 {
                    to[c] += value.values[c].to_float();
                } else {
                    to[c] = value.values[c].to_float();
                }
            }
        }
    }

    /// Apply read values to an integer (1/8 unit) vector.
    pub fn apply_int(&self, to: &mut [i32; 3]) {
        if let MaybeDiffCoords::Read { diff_bits, value } = self {
            for c in 0..3 {
                if !value.has(c) {
                    continue;
                }
                if diff_bits & (1 << c) != 0 {
                    to[c] = to[c].wrapping_add(value.values[c].to_int());
                } else {
                    to[c] = value.values[c].to_int();
                }
            }
        }
    }
}

// ============================================================
// Entity state delta
// ============================================================

bitflags! {
    /// Fields set in an `EntityStateDelta`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct EsdFlags: u32 {
        const MODELINDEX       = 0x1;
        const MODELINDEX2      = 0x2;
        const MODELINDEX3      = 0x4;
        const MODELINDEX4      = 0x8;
        const FRAME            = 0x10;
        const SKINNUM          = 0x20;
        const EFFECTS          = 0x40;
        const EFFECTS_MORE     = 0x80;
        const RENDERFX         = 0x100;
        const OLD_ORIGIN       = 0x200;
        const SOUND            = 0x400;
        const LOOP_ATTENUATION = 0x800;
        const LOOP_VOLUME      = 0x1000;
        const EVENT            = 0x2000;
        const SOLID            = 0x4000;
        const ALPHA            = 0x8000;
        const SCALE            = 0x10000;
    }
}

/// Delta between two entity states.
///
/// Origin and angles carry their own per-component change bits.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EntityStateDelta {
    pub delta_bits: EsdFlags,
    pub modelindex: u16,
    pub modelindex2: u16,
    pub modelindex3: u16,
    pub modelindex4: u16,
    pub frame: u16,
    pub skinnum: u32,
    pub effects: u32,
    /// Upper 32 bits of the effects
    pub effects_more: u32,
    pub renderfx: u32,
    pub origin: MaybeDiffCoords,
    pub angle: AnglesDelta,
    pub old_origin: [Coord; 3],
    pub sound: u16,
    pub loop_volume: u8,
    pub loop_attenuation: u8,
    pub event: u8,
    pub solid: u32,
    pub alpha: u8,
    pub scale: u8,
}

impl EntityStateDelta {
    /// Whether the delta carries any change at all.
    pub fn is_empty(&self) -> bool {
        self.delta_bits.is_empty() && self.origin.differs_int() == 0 && self.angle.delta_bits == 0
    }
}

// ============================================================
// Player state delta
// ============================================================

bitflags! {
    /// Fields set in a `PlayerStateDelta`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PsdFlags: u32 {
        const PM_TYPE         = 0x1;
        const PM_TIME         = 0x2;
        const PM_FLAGS        = 0x4;
        const PM_GRAVITY      = 0x8;
        const PM_DELTA_ANGLES = 0x10;
        const PM_VIEWHEIGHT   = 0x20;
        const VIEWOFFSET      = 0x40;
        const KICKANGLES      = 0x80;
        const GUNINDEX        = 0x100;
        const GUNSKIN         = 0x200;
        const GUNFRAME        = 0x400;
        const FOV             = 0x800;
        const RDFLAGS         = 0x1000;
        const GUNRATE         = 0x2000;
        const CLIENTNUM       = 0x4000;
    }
}

bitflags! {
    /// Fields set in a `Fog`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct FogFlags: u32 {
        /// global density and skyfactor
        const DENSITY_SKYFACTOR    = 0x1;
        const TIME                 = 0x2;
        const HEIGHTFOG_FALLOFF    = 0x4;
        const HEIGHTFOG_DENSITY    = 0x8;
        const HEIGHTFOG_START_DIST = 0x10;
        const HEIGHTFOG_END_DIST   = 0x20;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FogGlobal {
    pub density: Fraction,
    pub skyfactor: Fraction,
    pub color: ColorDelta,
    pub time: u16,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FogHeight {
    pub falloff: Fraction,
    pub density: Fraction,
    /// alpha is ignored
    pub start_color: ColorDelta,
    pub start_dist: Coord,
    /// alpha is ignored
    pub end_color: ColorDelta,
    pub end_dist: Coord,
}

/// Rerelease fog; also the Q2PRO player fog.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Fog {
    pub flags: FogFlags,
    pub global: FogGlobal,
    pub height: FogHeight,
}

impl Fog {
    /// Whether any fog field is set.
    pub fn is_set(&self) -> bool {
        !self.flags.is_empty()
            || self.global.color.delta_bits != 0
            || self.height.start_color.delta_bits != 0
            || self.height.end_color.delta_bits != 0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlayerStateDelta {
    pub delta_bits: PsdFlags,
    pub pm_type: u8,
    pub pm_origin: MaybeDiffCoords,
    pub pm_velocity: MaybeDiffCoords,
    pub pm_time: u16,
    pub pm_flags: u16,
    pub pm_gravity: i16,
    pub pm_delta_angles: [Angle; 3],
    pub pm_viewheight: i8,
    pub viewoffset: [SmallOffset; 3],
    pub viewangles: AnglesDelta,
    pub kick_angles: [SmallAngle; 3],
    pub gunindex: u16,
    pub gunskin: u8,
    pub gunframe: u16,
    pub gunoffset: SmallOffsetsDelta,
    pub gunangles: SmallAnglesDelta,
    pub blend: ColorDelta,
    pub damage_blend: ColorDelta,
    pub fov: u8,
    pub rdflags: u8,
    /// Bit mask of the stats that changed
    pub statbits: u64,
    pub stats: [i16; MAX_STATS],
    pub gunrate: u8,
    pub clientnum: i16,
    pub fog: Fog,
}

impl Default for PlayerStateDelta {
    fn default() -> Self {
        Self {
            delta_bits: PsdFlags::empty(),
            pm_type: 0,
            pm_origin: MaybeDiffCoords::default(),
            pm_velocity: MaybeDiffCoords::default(),
            pm_time: 0,
            pm_flags: 0,
            pm_gravity: 0,
            pm_delta_angles: [Angle::default(); 3],
            pm_viewheight: 0,
            viewoffset: [SmallOffset::default(); 3],
            viewangles: AnglesDelta::default(),
            kick_angles: [SmallAngle::default(); 3],
            gunindex: 0,
            gunskin: 0,
            gunframe: 0,
            gunoffset: SmallOffsetsDelta::default(),
            gunangles: SmallAnglesDelta::default(),
            blend: ColorDelta::default(),
            damage_blend: ColorDelta::default(),
            fov: 0,
            rdflags: 0,
            statbits: 0,
            stats: [0; MAX_STATS],
            gunrate: 0,
            clientnum: 0,
            fog: Fog::default(),
        }
    }
}

impl PlayerStateDelta {
    /// Whether the delta carries any change at all.
    pub fn is_empty(&self) -> bool {
        self.delta_bits.is_empty()
            && self.pm_origin.differs_int() == 0
            && self.pm_velocity.differs_int() == 0
            && self.viewangles.delta_bits == 0
            && self.gunoffset.delta_bits == 0
            && self.gunangles.delta_bits == 0
            && self.blend.delta_bits == 0
            && self.damage_blend.delta_bits == 0
            && self.statbits == 0
            && !self.fog.is_set()
    }
}

// ============================================================
// Messages
// ============================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MuzzleFlash {
    pub entity: i16,
    pub weapon: u16,
    pub silenced: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TempEntity {
    pub kind: u8,
    pub position1: [f32; 3],
    pub position2: [f32; 3],
    pub offset: [f32; 3],
    pub direction: [f32; 3],
    pub count: u16,
    pub color: u8,
    pub entity1: i16,
    pub entity2: i16,
    pub time: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Sound {
    /// SND_xxx bits
    pub flags: u8,
    pub index: u16,
    pub volume: u8,
    pub attenuation: u8,
    pub timeofs: u8,
    pub entity: u16,
    pub channel: u8,
    pub pos: [Coord; 3],
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Print {
    pub level: u8,
    pub string: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigString {
    pub index: u16,
    pub value: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SpawnBaseline {
    pub entnum: u16,
    pub delta_state: EntityStateDelta,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Download {
    /// Size of this chunk; -1 signals failure
    pub size: i16,
    pub percent: u8,
    pub data: Vec<u8>,
    /// Data is compressed. Only set when writing.
    pub compressed: bool,
    /// Uncompressed chunk size, -1 if unknown. Only used when writing compressed data.
    pub uncompressed_size: i16,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct R1q2ServerData {
    pub enhanced: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Q2proServerData {
    pub server_state: u8,
    pub qw_mode: bool,
    pub waterjump_hack: bool,
    pub extensions: bool,
    pub extensions_v2: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Q2reproServerData {
    pub server_fps: u8,
    pub game3_compat: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KexServerData {
    pub server_fps: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerData {
    /// Protocol number as on the wire
    pub protocol: i32,
    pub servercount: i32,
    pub attractloop: bool,
    pub gamedir: String,
    pub clientnum: i16,
    pub levelname: String,
    /// Minor protocol version
    pub protocol_version: u16,
    pub strafejump_hack: bool,
    pub r1q2: R1q2ServerData,
    pub q2pro: Q2proServerData,
    pub q2repro: Q2reproServerData,
    pub kex: KexServerData,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    pub serverframe: i32,
    /// -1 for an uncompressed frame
    pub deltaframe: i32,
    pub suppress_count: u8,
    pub q2pro_frame_flags: u8,
    pub areabits: Vec<u8>,
    pub playerstate: PlayerStateDelta,
}

/// One entity delta of a frame. `newnum == 0` ends the frame's entity list.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameEntityDelta {
    pub newnum: u16,
    pub remove: bool,
    pub entity_delta: EntityStateDelta,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Setting {
    pub index: i32,
    pub value: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DamageIndicator {
    /// approximate damage (divided by 3)
    pub damage: u8,
    pub health: bool,
    pub armor: bool,
    pub shield: bool,
    pub direction: [f32; 3],
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Damage {
    pub count: u8,
    pub damage: [DamageIndicator; MAX_DAMAGE_INDICATORS],
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Poi {
    pub key: u16,
    pub time: u16,
    pub pos: [f32; 3],
    pub image: u16,
    pub color: u8,
    pub flags: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HelpPath {
    pub start: bool,
    pub pos: [f32; 3],
    pub dir: [f32; 3],
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocPrint {
    pub flags: u8,
    pub base: String,
    /// At most `MAX_LOCALIZATION_ARGS` entries
    pub args: Vec<String>,
}

/// A message from the server.
#[derive(Clone, Debug, PartialEq)]
pub enum SvcMessage {
    Nop,
    Disconnect,
    Reconnect,
    MuzzleFlash(MuzzleFlash),
    MuzzleFlash2(MuzzleFlash),
    TempEntity(TempEntity),
    Sound(Sound),
    Print(Print),
    StuffText(String),
    ServerData(ServerData),
    ConfigString(ConfigString),
    SpawnBaseline(SpawnBaseline),
    CenterPrint(String),
    Download(Download),
    /// Frame header and player state. The entity deltas follow as
    /// `FrameEntityDelta` messages, terminated by one with `newnum == 0`.
    Frame(Box<Frame>),
    Inventory(Box<[i16; INVENTORY_ITEMS]>),
    Layout(String),
    FrameEntityDelta(FrameEntityDelta),
    Setting(Setting),
    Damage(Damage),
    Fog(Fog),
    Poi(Poi),
    HelpPath(HelpPath),
    Achievement(String),
    LocPrint(LocPrint),
    /// Rerelease split screen: following messages are for this client slot
    SplitClient(u8),
}

impl SvcMessage {
    /// Short name, used in debug output.
    pub fn name(&self) -> &'static str {
        match self {
            SvcMessage::Nop => "nop",
            SvcMessage::Disconnect => "disconnect",
            SvcMessage::Reconnect => "reconnect",
            SvcMessage::MuzzleFlash(_) => "muzzleflash",
            SvcMessage::MuzzleFlash2(_) => "muzzleflash2",
            SvcMessage::TempEntity(_) => "temp_entity",
            SvcMessage::Sound(_) => "sound",
            SvcMessage::Print(_) => "print",
            SvcMessage::StuffText(_) => "stufftext",
            SvcMessage::ServerData(_) => "serverdata",
            SvcMessage::ConfigString(_) => "configstring",
            SvcMessage::SpawnBaseline(_) => "spawnbaseline",
            SvcMessage::CenterPrint(_) => "centerprint",
            SvcMessage::Download(_) => "download",
            SvcMessage::Frame(_) => "frame",
            SvcMessage::Inventory(_) => "inventory",
            SvcMessage::Layout(_) => "layout",
            SvcMessage::FrameEntityDelta(_) => "frame_entity_delta",
            SvcMessage::Setting(_) => "setting",
            SvcMessage::Damage(_) => "damage",
            SvcMessage::Fog(_) => "fog",
            SvcMessage::Poi(_) => "poi",
            SvcMessage::HelpPath(_) => "help_path",
            SvcMessage::Achievement(_) => "achievement",
            SvcMessage::LocPrint(_) => "locprint",
            SvcMessage::SplitClient(_) => "splitclient",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maybe_diff_apply() {
        let mut m = MaybeDiffCoords::default();
        m.set_read(0, Coord::Int(16), true);
        m.set_read(2, Coord::Int(80), false);
        let mut v = [8, 8, 8];
        m.apply_int(&mut v);
        assert_eq!(v, [24, 8, 80]);

        let mut f = [1.0, 1.0, 1.0];
        m.apply_float(&mut f);
        assert_eq!(f, [3.0, 1.0, 10.0]);
    }

    #[test]
    fn test_differs_int_ignores_sub_unit_changes() {
        let m = MaybeDiffCoords::Write {
            prev: [Coord::Float(1.0), Coord::Float(2.0), Coord::Float(3.0)],
            current: [Coord::Float(1.01), Coord::Float(2.5), Coord::Float(3.0)],
        };
        assert_eq!(m.differs_int(), 0b010);
        assert_eq!(m.differs_float(), 0b011);
    }

    #[test]
    fn test_empty_entity_delta() {
        assert!(EntityStateDelta::default().is_empty());
        let d = EntityStateDelta {
            delta_bits: EsdFlags::FRAME,
            ..Default::default()
        };
        assert!(!d.is_empty());
    }
}
