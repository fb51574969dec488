// q2pro.rs -- protocol 36 (Q2PRO)
//
// Q2PRO builds on the R1Q2 additions (compressed packets, settings) and adds
// batched moves, streamed configstrings and baselines, and 16 bit angles.
// With the extended game APIs it also widens model and sound indices, sends
// coordinates as 23 bit values relative to the previous frame and carries
// per-player fog.

use tracing::trace;

use crate::bits::{BitReader, BitWriter};
use crate::clc::{BatchMove, ClcMessage, CmdFlags, Move, MoveDelta, UserinfoDelta};
use crate::client::{ClientContext, ReadState};
use crate::common;
use crate::compression::Inflater;
use crate::coords::{Angle, Color, ColorDelta, Coord, Fraction, SmallAngle, SmallOffset};
use crate::debug;
use crate::defs::*;
use crate::entity::{choose_width_flags, read_entity_bits, read_sized, write_entity_bits, write_sized};
use crate::error::{Error, Result};
use crate::io::{MsgRead, MsgWrite};
use crate::protocol::{
    GameApi, MulticastProtocol, Protocol, MAX_CONFIGSTRINGS_EXTENDED, MAX_CONFIGSTRINGS_V3, PROTOCOL_Q2PRO,
    PROTOCOL_VERSION_Q2PRO_BEAM_ORIGIN, PROTOCOL_VERSION_Q2PRO_CLIENTNUM_SHORT, PROTOCOL_VERSION_Q2PRO_EXTENDED_LIMITS,
    PROTOCOL_VERSION_Q2PRO_EXTENDED_LIMITS_2, PROTOCOL_VERSION_Q2PRO_PLAYERFOG, PROTOCOL_VERSION_Q2PRO_SHORT_ANGLES,
    PROTOCOL_VERSION_Q2PRO_ZLIB_DOWNLOADS,
};
use crate::r1q2;
use crate::server::{self, DownloadCompress, DownloadEncoding, Gamestate, ServerContext, Written};
use crate::svc::{
    Download, EntityStateDelta, EsdFlags, Fog, FogFlags, Frame, FrameEntityDelta, MaybeDiffCoords, PlayerStateDelta,
    PsdFlags, ServerData, SpawnBaseline, SvcMessage,
};
use crate::tent;
use crate::vanilla;

/// Wire options that follow from the game API and protocol version.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Q2proLayout {
    /// Extended game: 16 bit model/sound indices, gunskin, alpha and scale
    pub extensions: bool,
    /// Extended v2 game: 23 bit coordinates, 64 stats, damage blend
    pub extensions_v2: bool,
    pub protocol_version: u16,
    pub playerfog: bool,
}

impl Q2proLayout {
    fn new(game_api: GameApi, protocol_version: u16, playerfog: bool) -> Self {
        Q2proLayout {
            extensions: game_api != GameApi::Vanilla,
            extensions_v2: game_api >= GameApi::Q2proExtendedV2,
            protocol_version,
            playerfog,
        }
    }

    pub(crate) fn client(ctx: &ClientContext) -> Self {
        Self::new(ctx.features.server_game_api, ctx.protocol_version(), ctx.features.has_playerfog)
    }

    pub(crate) fn server(ctx: &ServerContext) -> Self {
        Self::new(ctx.info.game_api, ctx.protocol_version, ctx.features.has_playerfog)
    }

    /// Position encoding of sounds and temp entities.
    pub(crate) fn multicast(&self) -> MulticastProtocol {
        if self.extensions_v2 {
            MulticastProtocol::Q2proExt
        } else {
            MulticastProtocol::Short
        }
    }

    pub(crate) fn max_configstrings(&self) -> u16 {
        if self.extensions {
            MAX_CONFIGSTRINGS_EXTENDED
        } else {
            MAX_CONFIGSTRINGS_V3
        }
    }
}

// ============================================================
// Client side
// ============================================================

pub(crate) fn continue_serverdata(ctx: &mut ClientContext, io: &mut dyn MsgRead, protocol: i32) -> Result<ServerData> {
    let mut serverdata = ServerData {
        protocol,
        servercount: io.read_i32()?,
        attractloop: io.read_bool()?,
        gamedir: io.read_string()?,
        clientnum: io.read_i16()?,
        levelname: io.read_string()?,
        ..Default::default()
    };
    serverdata.protocol_version = io.read_u16()?;
    serverdata.q2pro.server_state = io.read_u8()?;
    if serverdata.protocol_version >= PROTOCOL_VERSION_Q2PRO_EXTENDED_LIMITS {
        let flags = io.read_u16()?;
        serverdata.strafejump_hack = flags & Q2PRO_PF_STRAFEJUMP_HACK != 0;
        serverdata.q2pro.qw_mode = flags & Q2PRO_PF_QW_MODE != 0;
        serverdata.q2pro.waterjump_hack = flags & Q2PRO_PF_WATERJUMP_HACK != 0;
        serverdata.q2pro.extensions = flags & Q2PRO_PF_EXTENSIONS != 0;
        serverdata.q2pro.extensions_v2 = serverdata.protocol_version >= PROTOCOL_VERSION_Q2PRO_EXTENDED_LIMITS_2
            && flags & Q2PRO_PF_EXTENSIONS_2 != 0;
    } else {
        serverdata.strafejump_hack = io.read_bool()?;
        serverdata.q2pro.qw_mode = io.read_bool()?;
        serverdata.q2pro.waterjump_hack = io.read_bool()?;
    }

    ctx.begin_protocol(Protocol::Q2pro, serverdata.protocol_version);
    let features = &mut ctx.features;
    features.batch_move = true;
    features.userinfo_delta = true;
    features.has_upmove = true;
    features.has_clientnum = true;
    features.has_solid32 = true;
    features.has_playerfog = serverdata.protocol_version >= PROTOCOL_VERSION_Q2PRO_PLAYERFOG;
    features.server_game_api = if serverdata.q2pro.extensions_v2 {
        GameApi::Q2proExtendedV2
    } else if serverdata.q2pro.extensions {
        GameApi::Q2proExtended
    } else {
        GameApi::Vanilla
    };
    Ok(serverdata)
}

/// Read the next message. `None` means a sub-stream or compressed block
/// started or ended and the caller should read again.
pub(crate) fn client_read(ctx: &mut ClientContext, io: &mut dyn MsgRead) -> Result<Option<SvcMessage>> {
    let layout = Q2proLayout::client(ctx);
    match ctx.state {
        ReadState::FrameEntities => return read_frame_entity(ctx, io, &layout).map(Some),
        ReadState::GamestateConfigStrings | ReadState::ConfigStringStream => {
            return read_streamed_configstring(ctx, io, layout.max_configstrings())
        }
        ReadState::BaselineStream => {
            return read_streamed_baseline(ctx, io, |io, bits| read_entity_delta(io, &layout, bits))
        }
        _ => {}
    }

    let command = io.read_u8()?;
    let extrabits = command & 0xe0;
    let command = command & 0x1f;
    trace!(command = debug::svc_name(Protocol::Q2pro, command), "q2pro read");
    let msg = match command {
        SVC_NOP => SvcMessage::Nop,
        SVC_DISCONNECT => SvcMessage::Disconnect,
        SVC_RECONNECT => SvcMessage::Reconnect,
        SVC_PRINT => SvcMessage::Print(common::read_print(io)?),
        SVC_CENTERPRINT => SvcMessage::CenterPrint(io.read_string()?),
        SVC_STUFFTEXT => SvcMessage::StuffText(io.read_string()?),
        SVC_SERVERDATA => {
            let protocol = io.read_i32()?;
            if protocol != PROTOCOL_Q2PRO {
                return Err(Error::BadData);
            }
            SvcMessage::ServerData(continue_serverdata(ctx, io, protocol)?)
        }
        SVC_CONFIGSTRING => SvcMessage::ConfigString(common::read_configstring(io)?),
        SVC_SOUND => SvcMessage::Sound(common::read_sound(io, layout.multicast(), false)?),
        SVC_SPAWNBASELINE => SvcMessage::SpawnBaseline(read_baseline(io, &layout)?),
        SVC_TEMP_ENTITY => SvcMessage::TempEntity(tent::read_temp_entity(
            io,
            layout.multicast(),
            ctx.features.server_game_api,
        )?),
        SVC_MUZZLEFLASH => SvcMessage::MuzzleFlash(common::read_muzzleflash(io, MZ_SILENCED)?),
        SVC_MUZZLEFLASH2 => SvcMessage::MuzzleFlash2(read_muzzleflash2(io, &layout)?),
        SVC_DOWNLOAD => SvcMessage::Download(common::read_download(io)?),
        SVC_FRAME => read_frame(ctx, io, &layout, extrabits)?,
        SVC_INVENTORY => SvcMessage::Inventory(common::read_inventory(io)?),
        SVC_LAYOUT => SvcMessage::Layout(io.read_string()?),
        SVC_R1Q2_ZPACKET => {
            ctx.read_zpacket(io)?;
            return Ok(None);
        }
        SVC_R1Q2_ZDOWNLOAD => SvcMessage::Download(read_zdownload(ctx, io)?),
        SVC_R1Q2_SETTING => SvcMessage::Setting(r1q2::read_svc_setting(io)?),
        SVC_Q2PRO_GAMESTATE => {
            ctx.state = ReadState::GamestateConfigStrings;
            return Ok(None);
        }
        SVC_Q2PRO_CONFIGSTRINGSTREAM => {
            ctx.state = ReadState::ConfigStringStream;
            return Ok(None);
        }
        SVC_Q2PRO_BASELINESTREAM => {
            ctx.state = ReadState::BaselineStream;
            return Ok(None);
        }
        _ => return Err(Error::BadCommand),
    };
    Ok(Some(msg))
}

/// Extended games carry the high bits of the weapon in the entity number.
pub(crate) fn read_muzzleflash2(io: &mut dyn MsgRead, layout: &Q2proLayout) -> Result<crate::svc::MuzzleFlash> {
    let mut flash = common::read_muzzleflash(io, 0)?;
    if layout.extensions {
        let raw = flash.entity as u16;
        flash.weapon |= (raw >> 13) << 8;
        flash.entity = (raw & 0x1fff) as i16;
    }
    Ok(flash)
}

/// One configstring of a stream, or `None` at the `max_configstrings` terminator.
pub(crate) fn read_streamed_configstring(
    ctx: &mut ClientContext,
    io: &mut dyn MsgRead,
    max_configstrings: u16,
) -> Result<Option<SvcMessage>> {
    let index = io.read_u16()?;
    if index == max_configstrings {
        // a full gamestate continues with the baselines
        ctx.state = if ctx.state == ReadState::GamestateConfigStrings {
            ReadState::BaselineStream
        } else {
            ReadState::Steady
        };
        return Ok(None);
    }
    Ok(Some(SvcMessage::ConfigString(crate::svc::ConfigString {
        index,
        value: io.read_string()?,
    })))
}

pub(crate) fn read_streamed_baseline(
    ctx: &mut ClientContext,
    io: &mut dyn MsgRead,
    read_delta: impl Fn(&mut dyn MsgRead, u64) -> Result<EntityStateDelta>,
) -> Result<Option<SvcMessage>> {
    let (bits, entnum) = read_entity_bits(io)?;
    if entnum == 0 {
        ctx.state = ReadState::Steady;
        return Ok(None);
    }
    trace!(entnum, bits = %debug::EntityBits(bits), "baseline");
    Ok(Some(SvcMessage::SpawnBaseline(SpawnBaseline {
        entnum,
        delta_state: read_delta(io, bits)?,
    })))
}

pub(crate) fn read_baseline(io: &mut dyn MsgRead, layout: &Q2proLayout) -> Result<SpawnBaseline> {
    let (bits, entnum) = read_entity_bits(io)?;
    trace!(entnum, bits = %debug::EntityBits(bits), "baseline");
    Ok(SpawnBaseline {
        entnum,
        delta_state: read_entity_delta(io, layout, bits)?,
    })
}

/// Read one entity of a frame; shared with the extended demo formats.
pub(crate) fn read_frame_entity(
    ctx: &mut ClientContext,
    io: &mut dyn MsgRead,
    layout: &Q2proLayout,
) -> Result<SvcMessage> {
    let (bits, newnum) = read_entity_bits(io)?;
    trace!(newnum, bits = %debug::EntityBits(bits), "entity delta");

    let mut delta = FrameEntityDelta {
        newnum,
        ..Default::default()
    };
    if newnum == 0 {
        ctx.state = ReadState::Steady;
    } else if bits & U_REMOVE != 0 {
        delta.remove = true;
    } else {
        delta.entity_delta = read_entity_delta(io, layout, bits)?;
    }
    Ok(SvcMessage::FrameEntityDelta(delta))
}

pub(crate) fn read_maybe_diff(io: &mut dyn MsgRead, layout: &Q2proLayout, coords: &mut MaybeDiffCoords, c: usize) -> Result<()> {
    if layout.extensions_v2 {
        let (v, is_diff) = io.read_q2pro_i23()?;
        coords.set_read(c, Coord::Int(v), is_diff);
    } else {
        coords.set_read(c, Coord::from_short(io.read_i16()?), false);
    }
    Ok(())
}

pub(crate) fn write_maybe_diff(io: &mut dyn MsgWrite, layout: &Q2proLayout, coords: &MaybeDiffCoords, c: usize) -> Result<()> {
    if layout.extensions_v2 {
        io.write_q2pro_i23(coords.current(c).to_int(), coords.prev(c).to_int())
    } else {
        io.write_i16(coords.current(c).to_short())
    }
}

/// Read the fields of an entity record whose bits have been read.
pub(crate) fn read_entity_delta(io: &mut dyn MsgRead, layout: &Q2proLayout, bits: u64) -> Result<EntityStateDelta> {
    let mut delta = EntityStateDelta::default();
    let model16 = layout.extensions && bits & U_MODEL16 != 0;

    for (bit, flag, model) in [
        (U_MODEL, EsdFlags::MODELINDEX, &mut delta.modelindex),
        (U_MODEL2, EsdFlags::MODELINDEX2, &mut delta.modelindex2),
        (U_MODEL3, EsdFlags::MODELINDEX3, &mut delta.modelindex3),
        (U_MODEL4, EsdFlags::MODELINDEX4, &mut delta.modelindex4),
    ] {
        if bits & bit != 0 {
            delta.delta_bits |= flag;
            *model = if model16 {
                io.read_u16()?
            } else {
                io.read_u8()? as u16
            };
        }
    }
    if bits & U_FRAME8 != 0 {
        delta.delta_bits |= EsdFlags::FRAME;
        delta.frame = io.read_u8()? as u16;
    } else if bits & U_FRAME16 != 0 {
        delta.delta_bits |= EsdFlags::FRAME;
        delta.frame = io.read_u16()?;
    }
    if bits & U_SKIN32 != 0 {
        delta.delta_bits |= EsdFlags::SKINNUM;
        delta.skinnum = read_sized(io, bits, U_SKIN8, U_SKIN16)?;
    }
    if bits & U_EFFECTS32 != 0 {
        delta.delta_bits |= EsdFlags::EFFECTS;
        delta.effects = read_sized(io, bits, U_EFFECTS8, U_EFFECTS16)?;
    }
    if bits & U_RENDERFX32 != 0 {
        delta.delta_bits |= EsdFlags::RENDERFX;
        delta.renderfx = read_sized(io, bits, U_RENDERFX8, U_RENDERFX16)?;
    }

    for (c, flag) in [U_ORIGIN1, U_ORIGIN2, U_ORIGIN3].into_iter().enumerate() {
        if bits & flag != 0 {
            read_maybe_diff(io, layout, &mut delta.origin, c)?;
        }
    }
    for (c, flag) in [U_ANGLE1, U_ANGLE2, U_ANGLE3].into_iter().enumerate() {
        if bits & flag != 0 {
            let angle = if bits & U_ANGLE16 != 0 {
                Angle::Short(io.read_i16()?)
            } else {
                Angle::Char(io.read_i8()?)
            };
            delta.angle.set_comp(c, angle);
        }
    }
    if bits & U_OLDORIGIN != 0 {
        delta.delta_bits |= EsdFlags::OLD_ORIGIN;
        for c in 0..3 {
            delta.old_origin[c] = if layout.extensions_v2 {
                Coord::Int(io.read_q2pro_i23()?.0)
            } else {
                Coord::from_short(io.read_i16()?)
            };
        }
    }
    if bits & U_SOUND != 0 {
        delta.delta_bits |= EsdFlags::SOUND;
        if layout.extensions {
            let word = io.read_u16()?;
            delta.sound = word & 0x3fff;
            if word & SOUND_FLAG_VOLUME != 0 {
                delta.delta_bits |= EsdFlags::LOOP_VOLUME;
                delta.loop_volume = io.read_u8()?;
            }
            if word & SOUND_FLAG_ATTENUATION != 0 {
                delta.delta_bits |= EsdFlags::LOOP_ATTENUATION;
                delta.loop_attenuation = io.read_u8()?;
            }
        } else {
            delta.sound = io.read_u8()? as u16;
        }
    }
    if bits & U_EVENT != 0 {
        delta.delta_bits |= EsdFlags::EVENT;
        delta.event = io.read_u8()?;
    }
    if bits & U_SOLID != 0 {
        delta.delta_bits |= EsdFlags::SOLID;
        delta.solid = io.read_u32()?;
    }
    if bits & U_MOREFX32 != 0 {
        delta.delta_bits |= EsdFlags::EFFECTS_MORE;
        delta.effects_more = read_sized(io, bits, U_MOREFX8, U_MOREFX16)?;
    }
    if bits & U_ALPHA != 0 {
        delta.delta_bits |= EsdFlags::ALPHA;
        delta.alpha = io.read_u8()?;
    }
    if bits & U_SCALE != 0 {
        delta.delta_bits |= EsdFlags::SCALE;
        delta.scale = io.read_u8()?;
    }
    Ok(delta)
}

pub(crate) fn read_blends(io: &mut dyn MsgRead, ps: &mut PlayerStateDelta) -> Result<()> {
    let bits = io.read_u8()?;
    for c in 0..4 {
        if bits & (1 << c) != 0 {
            ps.blend.set_comp(c, Color::Byte(io.read_u8()?));
        }
    }
    for c in 0..4 {
        if bits & (0x10 << c) != 0 {
            ps.damage_blend.set_comp(c, Color::Byte(io.read_u8()?));
        }
    }
    Ok(())
}

pub(crate) fn write_blends(io: &mut dyn MsgWrite, blend: &ColorDelta, damage_blend: &ColorDelta) -> Result<()> {
    let bits = (blend.delta_bits & 0xf) | ((damage_blend.delta_bits & 0xf) << 4);
    io.write_u8(bits)?;
    for c in 0..4 {
        if blend.has(c) {
            io.write_u8(blend.values[c].to_byte())?;
        }
    }
    for c in 0..4 {
        if damage_blend.has(c) {
            io.write_u8(damage_blend.values[c].to_byte())?;
        }
    }
    Ok(())
}

fn read_color3(io: &mut dyn MsgRead, color: &mut ColorDelta) -> Result<()> {
    for c in 0..3 {
        color.set_comp(c, Color::Byte(io.read_u8()?));
    }
    Ok(())
}

fn write_color3(io: &mut dyn MsgWrite, color: &ColorDelta) -> Result<()> {
    for c in 0..3 {
        io.write_u8(color.values[c].to_byte())?;
    }
    Ok(())
}

/// Player fog as carried in Q2PRO player states.
pub(crate) fn read_playerfog(io: &mut dyn MsgRead) -> Result<Fog> {
    let mut fog = Fog::default();
    let bits = io.read_u8()?;
    if bits & Q2PRO_FOG_BIT_COLOR != 0 {
        read_color3(io, &mut fog.global.color)?;
    }
    if bits & Q2PRO_FOG_BIT_DENSITY != 0 {
        fog.flags |= FogFlags::DENSITY_SKYFACTOR;
        let v = io.read_u32()?;
        fog.global.density = Fraction::Word(v as u16);
        fog.global.skyfactor = Fraction::Word((v >> 16) as u16);
    }
    if bits & Q2PRO_FOG_BIT_HEIGHT_DENSITY != 0 {
        fog.flags |= FogFlags::HEIGHTFOG_DENSITY;
        fog.height.density = Fraction::Word(io.read_u16()?);
    }
    if bits & Q2PRO_FOG_BIT_HEIGHT_FALLOFF != 0 {
        fog.flags |= FogFlags::HEIGHTFOG_FALLOFF;
        fog.height.falloff = Fraction::Word(io.read_u16()?);
    }
    if bits & Q2PRO_FOG_BIT_HEIGHT_START_COLOR != 0 {
        read_color3(io, &mut fog.height.start_color)?;
    }
    if bits & Q2PRO_FOG_BIT_HEIGHT_END_COLOR != 0 {
        read_color3(io, &mut fog.height.end_color)?;
    }
    if bits & Q2PRO_FOG_BIT_HEIGHT_START_DIST != 0 {
        fog.flags |= FogFlags::HEIGHTFOG_START_DIST;
        fog.height.start_dist = Coord::Int(io.read_q2pro_i23()?.0);
    }
    if bits & Q2PRO_FOG_BIT_HEIGHT_END_DIST != 0 {
        fog.flags |= FogFlags::HEIGHTFOG_END_DIST;
        fog.height.end_dist = Coord::Int(io.read_q2pro_i23()?.0);
    }
    Ok(fog)
}

pub(crate) fn write_playerfog(io: &mut dyn MsgWrite, fog: &Fog) -> Result<()> {
    let mut bits = 0u8;
    if fog.global.color.delta_bits != 0 {
        bits |= Q2PRO_FOG_BIT_COLOR;
    }
    if fog.flags.contains(FogFlags::DENSITY_SKYFACTOR) {
        bits |= Q2PRO_FOG_BIT_DENSITY;
    }
    if fog.flags.contains(FogFlags::HEIGHTFOG_DENSITY) {
        bits |= Q2PRO_FOG_BIT_HEIGHT_DENSITY;
    }
    if fog.flags.contains(FogFlags::HEIGHTFOG_FALLOFF) {
        bits |= Q2PRO_FOG_BIT_HEIGHT_FALLOFF;
    }
    if fog.height.start_color.delta_bits != 0 {
        bits |= Q2PRO_FOG_BIT_HEIGHT_START_COLOR;
    }
    if fog.height.end_color.delta_bits != 0 {
        bits |= Q2PRO_FOG_BIT_HEIGHT_END_COLOR;
    }
    if fog.flags.contains(FogFlags::HEIGHTFOG_START_DIST) {
        bits |= Q2PRO_FOG_BIT_HEIGHT_START_DIST;
    }
    if fog.flags.contains(FogFlags::HEIGHTFOG_END_DIST) {
        bits |= Q2PRO_FOG_BIT_HEIGHT_END_DIST;
    }

    io.write_u8(bits)?;
    if bits & Q2PRO_FOG_BIT_COLOR != 0 {
        write_color3(io, &fog.global.color)?;
    }
    if bits & Q2PRO_FOG_BIT_DENSITY != 0 {
        io.write_u32(fog.global.density.to_word() as u32 | (fog.global.skyfactor.to_word() as u32) << 16)?;
    }
    if bits & Q2PRO_FOG_BIT_HEIGHT_DENSITY != 0 {
        io.write_u16(fog.height.density.to_word())?;
    }
    if bits & Q2PRO_FOG_BIT_HEIGHT_FALLOFF != 0 {
        io.write_u16(fog.height.falloff.to_word())?;
    }
    if bits & Q2PRO_FOG_BIT_HEIGHT_START_COLOR != 0 {
        write_color3(io, &fog.height.start_color)?;
    }
    if bits & Q2PRO_FOG_BIT_HEIGHT_END_COLOR != 0 {
        write_color3(io, &fog.height.end_color)?;
    }
    if bits & Q2PRO_FOG_BIT_HEIGHT_START_DIST != 0 {
        io.write_q2pro_i23(fog.height.start_dist.to_int(), 0)?;
    }
    if bits & Q2PRO_FOG_BIT_HEIGHT_END_DIST != 0 {
        io.write_q2pro_i23(fog.height.end_dist.to_int(), 0)?;
    }
    Ok(())
}

pub(crate) fn read_playerstate(io: &mut dyn MsgRead, layout: &Q2proLayout, extraflags: u32) -> Result<PlayerStateDelta> {
    let mut flags = io.read_u16()? as u32;
    if layout.playerfog && flags & PS_MOREBITS != 0 {
        flags |= (io.read_u8()? as u32) << 16;
    }
    trace!(flags = %debug::PlayerBits(flags), extraflags, "playerstate");
    let mut ps = PlayerStateDelta::default();

    if flags & PS_M_TYPE != 0 {
        ps.delta_bits |= PsdFlags::PM_TYPE;
        ps.pm_type = io.read_u8()?;
    }
    if flags & PS_M_ORIGIN != 0 {
        read_maybe_diff(io, layout, &mut ps.pm_origin, 0)?;
        read_maybe_diff(io, layout, &mut ps.pm_origin, 1)?;
    }
    if extraflags & EPS_M_ORIGIN2 != 0 {
        read_maybe_diff(io, layout, &mut ps.pm_origin, 2)?;
    }
    if flags & PS_M_VELOCITY != 0 {
        read_maybe_diff(io, layout, &mut ps.pm_velocity, 0)?;
        read_maybe_diff(io, layout, &mut ps.pm_velocity, 1)?;
    }
    if extraflags & EPS_M_VELOCITY2 != 0 {
        read_maybe_diff(io, layout, &mut ps.pm_velocity, 2)?;
    }
    if flags & PS_M_TIME != 0 {
        ps.delta_bits |= PsdFlags::PM_TIME;
        ps.pm_time = if layout.extensions_v2 {
            io.read_u16()?
        } else {
            io.read_u8()? as u16
        };
    }
    if flags & PS_M_FLAGS != 0 {
        ps.delta_bits |= PsdFlags::PM_FLAGS;
        ps.pm_flags = if layout.extensions_v2 {
            io.read_u16()?
        } else {
            io.read_u8()? as u16
        };
    }
    if flags & PS_M_GRAVITY != 0 {
        ps.delta_bits |= PsdFlags::PM_GRAVITY;
        ps.pm_gravity = io.read_i16()?;
    }
    if flags & PS_M_DELTA_ANGLES != 0 {
        ps.delta_bits |= PsdFlags::PM_DELTA_ANGLES;
        for c in 0..3 {
            ps.pm_delta_angles[c] = Angle::Short(io.read_i16()?);
        }
    }
    if flags & PS_VIEWOFFSET != 0 {
        ps.delta_bits |= PsdFlags::VIEWOFFSET;
        for c in 0..3 {
            ps.viewoffset[c] = SmallOffset::Char(io.read_i8()?);
        }
    }
    if flags & PS_VIEWANGLES != 0 {
        ps.viewangles.set_comp(0, Angle::Short(io.read_i16()?));
        ps.viewangles.set_comp(1, Angle::Short(io.read_i16()?));
    }
    if extraflags & EPS_VIEWANGLE2 != 0 {
        ps.viewangles.set_comp(2, Angle::Short(io.read_i16()?));
    }
    if flags & PS_KICKANGLES != 0 {
        ps.delta_bits |= PsdFlags::KICKANGLES;
        for c in 0..3 {
            ps.kick_angles[c] = SmallAngle::Char(io.read_i8()?);
        }
    }
    if flags & PS_WEAPONINDEX != 0 {
        ps.delta_bits |= PsdFlags::GUNINDEX;
        if layout.extensions {
            let v = io.read_u16()?;
            ps.delta_bits |= PsdFlags::GUNSKIN;
            ps.gunindex = v & Q2PRO_GUNINDEX_MASK;
            ps.gunskin = (v >> Q2PRO_GUNINDEX_BITS) as u8;
        } else {
            ps.gunindex = io.read_u8()? as u16;
        }
    }
    if flags & PS_WEAPONFRAME != 0 {
        ps.delta_bits |= PsdFlags::GUNFRAME;
        ps.gunframe = io.read_u8()? as u16;
    }
    if extraflags & EPS_GUNOFFSET != 0 {
        for c in 0..3 {
            ps.gunoffset.set_comp(c, SmallOffset::Char(io.read_i8()?));
        }
    }
    if extraflags & EPS_GUNANGLES != 0 {
        for c in 0..3 {
            ps.gunangles.set_comp(c, SmallAngle::Char(io.read_i8()?));
        }
    }
    if flags & PS_BLEND != 0 {
        if layout.extensions_v2 {
            read_blends(io, &mut ps)?;
        } else {
            for c in 0..4 {
                ps.blend.set_comp(c, Color::Byte(io.read_u8()?));
            }
        }
    }
    if layout.playerfog && flags & PS_Q2PRO_PLAYERFOG != 0 {
        ps.fog = read_playerfog(io)?;
    }
    if flags & PS_FOV != 0 {
        ps.delta_bits |= PsdFlags::FOV;
        ps.fov = io.read_u8()?;
    }
    if flags & PS_RDFLAGS != 0 {
        ps.delta_bits |= PsdFlags::RDFLAGS;
        ps.rdflags = io.read_u8()?;
    }
    if extraflags & EPS_STATS != 0 {
        let numstats = if layout.extensions_v2 {
            ps.statbits = io.read_var_u64()?;
            64
        } else {
            ps.statbits = io.read_u32()? as u64;
            32
        };
        for i in 0..numstats {
            if ps.statbits & (1 << i) != 0 {
                ps.stats[i] = io.read_i16()?;
            }
        }
    }
    if extraflags & EPS_CLIENTNUM != 0 {
        ps.delta_bits |= PsdFlags::CLIENTNUM;
        ps.clientnum = if layout.protocol_version >= PROTOCOL_VERSION_Q2PRO_CLIENTNUM_SHORT {
            io.read_i16()?
        } else {
            io.read_u8()? as i16
        };
    }
    Ok(ps)
}

fn read_frame(ctx: &mut ClientContext, io: &mut dyn MsgRead, layout: &Q2proLayout, extrabits: u8) -> Result<SvcMessage> {
    let serverframe = io.read_i32()?;
    let offset = (serverframe as u32 & 0xf800_0000) >> 27;
    let serverframe = serverframe & 0x07ff_ffff;
    let mut frame = Frame {
        serverframe,
        deltaframe: if offset == 31 {
            -1
        } else {
            serverframe - offset as i32
        },
        ..Default::default()
    };

    let mut extraflags = (extrabits >> 1) as u32;
    let frame_flags = io.read_u8()?;
    extraflags |= ((frame_flags & 0xf0) >> 4) as u32;
    frame.q2pro_frame_flags = frame_flags & 0x0f;

    let areabits_len = io.read_u8()? as usize;
    frame.areabits = io.read_data(areabits_len)?;
    frame.playerstate = read_playerstate(io, layout, extraflags)?;
    ctx.state = ReadState::FrameEntities;
    Ok(SvcMessage::Frame(Box::new(frame)))
}

/// Read a compressed download chunk; shared with Q2rePRO.
///
/// All chunks of one file form a single raw deflate stream.
pub(crate) fn read_zdownload(ctx: &mut ClientContext, io: &mut dyn MsgRead) -> Result<Download> {
    let size = io.read_i16()?;
    let percent = io.read_u8()?;
    let compressed = io.read_data(size.max(0) as usize)?;
    let inflater = ctx.download_inflater.get_or_insert_with(Inflater::new);
    let data = inflater.inflate(&compressed)?;
    if inflater.stream_ended() {
        ctx.download_inflater = None;
    }
    Ok(Download {
        size: i16::try_from(data.len()).map_err(|_| Error::BadData)?,
        percent,
        data,
        compressed: true,
        uncompressed_size: -1,
    })
}

pub(crate) fn client_write(_ctx: &mut ClientContext, io: &mut dyn MsgWrite, msg: &ClcMessage) -> Result<()> {
    trace!(message = msg.name(), "q2pro write");
    match msg {
        ClcMessage::Nop => io.write_u8(CLC_NOP),
        ClcMessage::Move(mv) => write_move(io, mv),
        ClcMessage::BatchMove(mv) => write_batch_move(io, mv),
        ClcMessage::Userinfo(userinfo) => common::write_string_cmd(io, CLC_USERINFO, userinfo),
        ClcMessage::StringCmd(cmd) => common::write_string_cmd(io, CLC_STRINGCMD, cmd),
        ClcMessage::Setting(setting) => r1q2::write_clc_setting(io, setting),
        ClcMessage::UserinfoDelta(delta) => {
            io.write_u8(CLC_Q2PRO_USERINFO_DELTA)?;
            io.write_string(&delta.name)?;
            io.write_string(&delta.value)
        }
    }
}

/// Unbatched move: the vanilla layout without a checksum byte.
fn write_move(io: &mut dyn MsgWrite, mv: &Move) -> Result<()> {
    io.write_u8(CLC_MOVE)?;
    io.write_i32(mv.lastframe)?;
    for delta in &mv.moves {
        vanilla::write_move_delta(io, delta)?;
    }
    Ok(())
}

fn write_batch_move(io: &mut dyn MsgWrite, mv: &BatchMove) -> Result<()> {
    let num_dups = mv.num_dups as usize;
    if num_dups >= MAX_BATCH_MOVE_FRAMES {
        return Err(Error::BadData);
    }
    let cmd = if mv.lastframe == -1 {
        CLC_Q2PRO_MOVE_NODELTA
    } else {
        CLC_Q2PRO_MOVE_BATCHED
    };
    io.write_u8(cmd | (mv.num_dups << 5))?;
    if mv.lastframe != -1 {
        io.write_i32(mv.lastframe)?;
    }

    let last = &mv.batch_frames[num_dups];
    let lightlevel = match last.num_cmds as usize {
        0 => 0,
        n => last.moves[n.min(MAX_BATCH_MOVE_CMDS) - 1].lightlevel,
    };
    io.write_u8(lightlevel)?;

    let mut base = MoveDelta::default();
    let mut bits = BitWriter::new(io);
    for frame in &mv.batch_frames[..=num_dups] {
        let num_cmds = frame.num_cmds as usize;
        if num_cmds >= MAX_BATCH_MOVE_CMDS {
            return Err(Error::BadData);
        }
        bits.write(num_cmds as i32, 5)?;
        for delta in &frame.moves[..num_cmds] {
            write_batch_delta(&mut bits, &mut base, delta)?;
        }
    }
    bits.flush()
}

// CM_IMPULSE is reused as "msec changed"; impulses are not carried.
fn write_batch_delta(out: &mut BitWriter, base: &mut MoveDelta, delta: &MoveDelta) -> Result<()> {
    let mut bits = (delta.delta_bits.bits() & 0x7f) as u8;
    if delta.msec != base.msec {
        bits |= CM_IMPULSE;
    }
    if bits == 0 {
        return out.write(0, 1);
    }
    out.write(1, 1)?;
    out.write(bits as i32, 8)?;

    for c in 0..2 {
        if bits & (CM_ANGLE1 << c) != 0 {
            let angle = delta.angles[c].to_short();
            let diff = angle as i32 - base.angles[c].to_short() as i32;
            if (-128..=127).contains(&diff) {
                out.write(1, 1)?;
                out.write(diff, -8)?;
            } else {
                out.write(0, 1)?;
                out.write(angle as i32, -16)?;
            }
            base.angles[c] = Angle::Short(angle);
        }
    }
    if bits & CM_ANGLE3 != 0 {
        let angle = delta.angles[2].to_short();
        out.write(angle as i32, -16)?;
        base.angles[2] = Angle::Short(angle);
    }
    for c in 0..3 {
        if bits & (CM_FORWARD << c) != 0 {
            out.write(delta.moves[c].to_short_unscaled() as i32, -10)?;
        }
    }
    if bits & CM_BUTTONS != 0 {
        let buttons = delta.buttons;
        out.write(((buttons & 3) | (buttons >> 5)) as i32, 3)?;
    }
    if bits & CM_IMPULSE != 0 {
        out.write(delta.msec as i32, 8)?;
        base.msec = delta.msec;
    }
    Ok(())
}

// ============================================================
// Server side
// ============================================================

pub(crate) fn init_server(ctx: &mut ServerContext) -> Result<()> {
    if ctx.info.game_api > GameApi::Q2proExtendedV2 {
        return Err(Error::GametypeUnsupported);
    }
    ctx.protocol_version = ctx.connect.version;
    ctx.zpacket_cmd = SVC_R1Q2_ZPACKET;
    let version = ctx.protocol_version;
    let features = &mut ctx.features;
    features.enable_deflate = ctx.connect.has_zlib;
    features.download_compress_raw = features.enable_deflate && version >= PROTOCOL_VERSION_Q2PRO_ZLIB_DOWNLOADS;
    features.has_beam_old_origin_fix = version >= PROTOCOL_VERSION_Q2PRO_BEAM_ORIGIN;
    features.has_playerfog = version >= PROTOCOL_VERSION_Q2PRO_PLAYERFOG;
    features.playerstate_clientnum = true;
    Ok(())
}

pub(crate) fn fill_serverdata(ctx: &ServerContext, serverdata: &mut ServerData) {
    serverdata.protocol = PROTOCOL_Q2PRO;
    serverdata.protocol_version = ctx.protocol_version;
    serverdata.q2pro.extensions = ctx.info.game_api >= GameApi::Q2proExtended;
    serverdata.q2pro.extensions_v2 = ctx.info.game_api >= GameApi::Q2proExtendedV2;
}

pub(crate) fn server_write(ctx: &mut ServerContext, io: &mut dyn MsgWrite, msg: &SvcMessage) -> Result<()> {
    trace!(message = msg.name(), "q2pro write");
    let layout = Q2proLayout::server(ctx);
    match msg {
        SvcMessage::Nop => io.write_u8(SVC_NOP),
        SvcMessage::Disconnect => io.write_u8(SVC_DISCONNECT),
        SvcMessage::Reconnect => io.write_u8(SVC_RECONNECT),
        SvcMessage::Sound(sound) => common::write_sound(io, layout.multicast(), false, sound),
        SvcMessage::Print(print) => common::write_print(io, print),
        SvcMessage::StuffText(text) => common::write_string_cmd(io, SVC_STUFFTEXT, text),
        SvcMessage::ServerData(serverdata) => write_serverdata(io, serverdata),
        SvcMessage::ConfigString(cs) => common::write_configstring(io, cs),
        SvcMessage::SpawnBaseline(baseline) => write_spawnbaseline(ctx, io, baseline),
        SvcMessage::CenterPrint(text) => common::write_string_cmd(io, SVC_CENTERPRINT, text),
        SvcMessage::Download(download) => write_download(io, SVC_R1Q2_ZDOWNLOAD, download),
        SvcMessage::Frame(frame) => write_frame(io, &layout, frame),
        SvcMessage::FrameEntityDelta(delta) => write_frame_entity(io, &layout, delta),
        SvcMessage::Layout(text) => common::write_string_cmd(io, SVC_LAYOUT, text),
        SvcMessage::Setting(setting) => r1q2::write_svc_setting(io, SVC_R1Q2_SETTING, setting),
        // muzzleflashes, temp entities and inventory come from game code
        _ => Err(Error::NotImplemented),
    }
}

fn write_serverdata(io: &mut dyn MsgWrite, serverdata: &ServerData) -> Result<()> {
    io.write_u8(SVC_SERVERDATA)?;
    io.write_i32(PROTOCOL_Q2PRO)?;
    io.write_i32(serverdata.servercount)?;
    io.write_bool(serverdata.attractloop)?;
    io.write_string(&serverdata.gamedir)?;
    io.write_i16(serverdata.clientnum)?;
    io.write_string(&serverdata.levelname)?;
    io.write_u16(serverdata.protocol_version)?;
    io.write_u8(serverdata.q2pro.server_state)?;
    if serverdata.protocol_version >= PROTOCOL_VERSION_Q2PRO_EXTENDED_LIMITS {
        let mut flags = 0u16;
        for (set, flag) in [
            (serverdata.strafejump_hack, Q2PRO_PF_STRAFEJUMP_HACK),
            (serverdata.q2pro.qw_mode, Q2PRO_PF_QW_MODE),
            (serverdata.q2pro.waterjump_hack, Q2PRO_PF_WATERJUMP_HACK),
            (serverdata.q2pro.extensions, Q2PRO_PF_EXTENSIONS),
            (serverdata.q2pro.extensions_v2, Q2PRO_PF_EXTENSIONS_2),
        ] {
            if set {
                flags |= flag;
            }
        }
        io.write_u16(flags)
    } else {
        io.write_bool(serverdata.strafejump_hack)?;
        io.write_bool(serverdata.q2pro.qw_mode)?;
        io.write_bool(serverdata.q2pro.waterjump_hack)
    }
}

pub(crate) fn write_spawnbaseline(ctx: &mut ServerContext, io: &mut dyn MsgWrite, baseline: &SpawnBaseline) -> Result<()> {
    io.write_u8(SVC_SPAWNBASELINE)?;
    write_entity_delta(io, &Q2proLayout::server(ctx), baseline.entnum, &baseline.delta_state)
}

/// Write a download chunk; compressed chunks go out under `zdownload_cmd`.
pub(crate) fn write_download(io: &mut dyn MsgWrite, zdownload_cmd: u8, download: &Download) -> Result<()> {
    if !download.compressed {
        return common::write_download(io, download);
    }
    let data = common::download_payload(download)?;
    io.write_u8(zdownload_cmd)?;
    io.write_i16(download.size)?;
    io.write_u8(download.percent)?;
    io.write_raw(data)
}

/// Write an entity record, bits and number included; shared with the extended demo formats.
pub(crate) fn write_entity_delta(
    io: &mut dyn MsgWrite,
    layout: &Q2proLayout,
    entnum: u16,
    delta: &EntityStateDelta,
) -> Result<()> {
    let flags = delta.delta_bits;
    let mut bits = 0u64;

    let origin_changes = delta.origin.differs_int();
    for (c, flag) in [U_ORIGIN1, U_ORIGIN2, U_ORIGIN3].into_iter().enumerate() {
        if origin_changes & (1 << c) != 0 {
            bits |= flag;
        }
    }
    for (c, flag) in [U_ANGLE1, U_ANGLE2, U_ANGLE3].into_iter().enumerate() {
        if delta.angle.has(c) {
            bits |= flag;
        }
    }
    if bits & (U_ANGLE1 | U_ANGLE2 | U_ANGLE3) != 0 && layout.protocol_version >= PROTOCOL_VERSION_Q2PRO_SHORT_ANGLES {
        bits |= U_ANGLE16;
    }
    if flags.contains(EsdFlags::SKINNUM) {
        bits |= choose_width_flags(delta.skinnum, U_SKIN8, U_SKIN16, true);
    }
    if flags.contains(EsdFlags::FRAME) {
        bits |= if delta.frame >= 256 { U_FRAME16 } else { U_FRAME8 };
    }
    if flags.contains(EsdFlags::EFFECTS) {
        bits |= choose_width_flags(delta.effects, U_EFFECTS8, U_EFFECTS16, true);
    }
    if flags.contains(EsdFlags::EFFECTS_MORE) {
        if !layout.extensions {
            return Err(Error::BadData);
        }
        bits |= choose_width_flags(delta.effects_more, U_MOREFX8, U_MOREFX16, true);
    }
    if flags.contains(EsdFlags::RENDERFX) {
        bits |= choose_width_flags(delta.renderfx, U_RENDERFX8, U_RENDERFX16, true);
    }
    for (flag, bit) in [
        (EsdFlags::SOLID, U_SOLID),
        (EsdFlags::EVENT, U_EVENT),
        (EsdFlags::MODELINDEX, U_MODEL),
        (EsdFlags::MODELINDEX2, U_MODEL2),
        (EsdFlags::MODELINDEX3, U_MODEL3),
        (EsdFlags::MODELINDEX4, U_MODEL4),
        (EsdFlags::SOUND, U_SOUND),
        (EsdFlags::OLD_ORIGIN, U_OLDORIGIN),
    ] {
        if flags.contains(flag) {
            bits |= bit;
        }
    }
    let models = [
        (U_MODEL, delta.modelindex),
        (U_MODEL2, delta.modelindex2),
        (U_MODEL3, delta.modelindex3),
        (U_MODEL4, delta.modelindex4),
    ];
    if models.iter().any(|&(bit, model)| bits & bit != 0 && model > 255) {
        if !layout.extensions {
            return Err(Error::BadData);
        }
        bits |= U_MODEL16;
    }
    for (flag, bit) in [(EsdFlags::ALPHA, U_ALPHA), (EsdFlags::SCALE, U_SCALE)] {
        if flags.contains(flag) {
            if !layout.extensions {
                return Err(Error::BadData);
            }
            bits |= bit;
        }
    }
    if bits & U_SOUND != 0
        && !layout.extensions
        && (delta.sound > 255 || flags.intersects(EsdFlags::LOOP_VOLUME | EsdFlags::LOOP_ATTENUATION))
    {
        return Err(Error::BadData);
    }

    write_entity_bits(io, bits, entnum)?;

    for (bit, model) in models {
        if bits & bit != 0 {
            if bits & U_MODEL16 != 0 {
                io.write_u16(model)?;
            } else {
                io.write_u8(model as u8)?;
            }
        }
    }
    if bits & U_FRAME16 != 0 {
        io.write_u16(delta.frame)?;
    } else if bits & U_FRAME8 != 0 {
        io.write_u8(delta.frame as u8)?;
    }
    write_sized(io, bits, U_SKIN8, U_SKIN16, delta.skinnum)?;
    write_sized(io, bits, U_EFFECTS8, U_EFFECTS16, delta.effects)?;
    write_sized(io, bits, U_RENDERFX8, U_RENDERFX16, delta.renderfx)?;

    for (c, flag) in [U_ORIGIN1, U_ORIGIN2, U_ORIGIN3].into_iter().enumerate() {
        if bits & flag != 0 {
            write_maybe_diff(io, layout, &delta.origin, c)?;
        }
    }
    for (c, flag) in [U_ANGLE1, U_ANGLE2, U_ANGLE3].into_iter().enumerate() {
        if bits & flag != 0 {
            if bits & U_ANGLE16 != 0 {
                io.write_i16(delta.angle.values[c].to_short())?;
            } else {
                io.write_i8(delta.angle.values[c].to_char())?;
            }
        }
    }
    if bits & U_OLDORIGIN != 0 {
        for coord in &delta.old_origin {
            if layout.extensions_v2 {
                io.write_q2pro_i23(coord.to_int(), 0)?;
            } else {
                io.write_i16(coord.to_short())?;
            }
        }
    }
    if bits & U_SOUND != 0 {
        if layout.extensions {
            let mut word = delta.sound;
            if flags.contains(EsdFlags::LOOP_VOLUME) {
                word |= SOUND_FLAG_VOLUME;
            }
            if flags.contains(EsdFlags::LOOP_ATTENUATION) {
                word |= SOUND_FLAG_ATTENUATION;
            }
            io.write_u16(word)?;
            if word & SOUND_FLAG_VOLUME != 0 {
                io.write_u8(delta.loop_volume)?;
            }
            if word & SOUND_FLAG_ATTENUATION != 0 {
                io.write_u8(delta.loop_attenuation)?;
            }
        } else {
            io.write_u8(delta.sound as u8)?;
        }
    }
    if bits & U_EVENT != 0 {
        io.write_u8(delta.event)?;
    }
    if bits & U_SOLID != 0 {
        io.write_u32(delta.solid)?;
    }
    write_sized(io, bits, U_MOREFX8, U_MOREFX16, delta.effects_more)?;
    if bits & U_ALPHA != 0 {
        io.write_u8(delta.alpha)?;
    }
    if bits & U_SCALE != 0 {
        io.write_u8(delta.scale)?;
    }
    Ok(())
}

/// Write one entity of a frame; shared with the extended demo formats.
pub(crate) fn write_frame_entity(io: &mut dyn MsgWrite, layout: &Q2proLayout, delta: &FrameEntityDelta) -> Result<()> {
    if delta.remove {
        return write_entity_bits(io, U_REMOVE, delta.newnum);
    }
    if delta.newnum == 0 {
        io.write_u8(0)?;
        return io.write_u8(0);
    }
    write_entity_delta(io, layout, delta.newnum, &delta.entity_delta)
}

/// Write a player state; returns the extra flags that travel in the frame header.
pub(crate) fn write_playerstate(io: &mut dyn MsgWrite, layout: &Q2proLayout, ps: &PlayerStateDelta) -> Result<u32> {
    let bits = ps.delta_bits;
    let mut flags = 0u32;
    let mut extraflags = 0u32;

    let origin_differs = ps.pm_origin.differs_int();
    let velocity_differs = ps.pm_velocity.differs_int();
    if bits.contains(PsdFlags::PM_TYPE) {
        flags |= PS_M_TYPE;
    }
    if origin_differs & 3 != 0 {
        flags |= PS_M_ORIGIN;
    }
    if origin_differs & 4 != 0 {
        extraflags |= EPS_M_ORIGIN2;
    }
    if velocity_differs & 3 != 0 {
        flags |= PS_M_VELOCITY;
    }
    if velocity_differs & 4 != 0 {
        extraflags |= EPS_M_VELOCITY2;
    }
    if bits.contains(PsdFlags::PM_TIME) {
        if !layout.extensions_v2 && ps.pm_time > 0xff {
            return Err(Error::BadData);
        }
        flags |= PS_M_TIME;
    }
    if bits.contains(PsdFlags::PM_FLAGS) {
        if !layout.extensions_v2 && ps.pm_flags > 0xff {
            return Err(Error::BadData);
        }
        flags |= PS_M_FLAGS;
    }
    if bits.contains(PsdFlags::PM_GRAVITY) {
        flags |= PS_M_GRAVITY;
    }
    if bits.contains(PsdFlags::PM_DELTA_ANGLES) {
        flags |= PS_M_DELTA_ANGLES;
    }
    if bits.contains(PsdFlags::PM_VIEWHEIGHT) {
        return Err(Error::BadData);
    }
    if bits.contains(PsdFlags::VIEWOFFSET) {
        flags |= PS_VIEWOFFSET;
    }
    if ps.viewangles.delta_bits & 3 != 0 {
        flags |= PS_VIEWANGLES;
    }
    if ps.viewangles.delta_bits & 4 != 0 {
        extraflags |= EPS_VIEWANGLE2;
    }
    if bits.contains(PsdFlags::KICKANGLES) {
        flags |= PS_KICKANGLES;
    }
    if ps.blend.delta_bits != 0 {
        flags |= PS_BLEND;
    }
    if ps.damage_blend.delta_bits != 0 {
        if !layout.extensions_v2 {
            return Err(Error::BadData);
        }
        flags |= PS_BLEND;
    }
    if bits.contains(PsdFlags::FOV) {
        flags |= PS_FOV;
    }
    if bits.contains(PsdFlags::RDFLAGS) {
        flags |= PS_RDFLAGS;
    }
    if bits.intersects(PsdFlags::GUNINDEX | PsdFlags::GUNSKIN) {
        let too_large = if layout.extensions {
            ps.gunindex > Q2PRO_GUNINDEX_MASK
        } else {
            bits.contains(PsdFlags::GUNSKIN) || ps.gunindex > 0xff
        };
        if too_large {
            return Err(Error::BadData);
        }
        flags |= PS_WEAPONINDEX;
    }
    if bits.contains(PsdFlags::GUNFRAME) {
        if ps.gunframe > 0xff {
            return Err(Error::BadData);
        }
        flags |= PS_WEAPONFRAME;
    }
    if ps.gunoffset.delta_bits != 0 {
        extraflags |= EPS_GUNOFFSET;
    }
    if ps.gunangles.delta_bits != 0 {
        extraflags |= EPS_GUNANGLES;
    }
    if ps.statbits != 0 {
        if !layout.extensions_v2 && ps.statbits > u32::MAX as u64 {
            return Err(Error::BadData);
        }
        extraflags |= EPS_STATS;
    }
    if bits.contains(PsdFlags::CLIENTNUM) {
        extraflags |= EPS_CLIENTNUM;
    }
    if bits.contains(PsdFlags::GUNRATE) {
        return Err(Error::BadData);
    }
    if ps.fog.is_set() {
        flags |= PS_Q2PRO_PLAYERFOG;
    }
    if flags > 0xffff {
        if !layout.playerfog {
            return Err(Error::BadData);
        }
        flags |= PS_MOREBITS;
    }

    io.write_u16(flags as u16)?;
    if flags & PS_MOREBITS != 0 {
        io.write_u8((flags >> 16) as u8)?;
    }
    if flags & PS_M_TYPE != 0 {
        io.write_u8(ps.pm_type)?;
    }
    if flags & PS_M_ORIGIN != 0 {
        write_maybe_diff(io, layout, &ps.pm_origin, 0)?;
        write_maybe_diff(io, layout, &ps.pm_origin, 1)?;
    }
    if extraflags & EPS_M_ORIGIN2 != 0 {
        write_maybe_diff(io, layout, &ps.pm_origin, 2)?;
    }
    if flags & PS_M_VELOCITY != 0 {
        write_maybe_diff(io, layout, &ps.pm_velocity, 0)?;
        write_maybe_diff(io, layout, &ps.pm_velocity, 1)?;
    }
    if extraflags & EPS_M_VELOCITY2 != 0 {
        write_maybe_diff(io, layout, &ps.pm_velocity, 2)?;
    }
    for (flag, value) in [(PS_M_TIME, ps.pm_time), (PS_M_FLAGS, ps.pm_flags)] {
        if flags & flag != 0 {
            if layout.extensions_v2 {
                io.write_u16(value)?;
            } else {
                io.write_u8(value as u8)?;
            }
        }
    }
    if flags & PS_M_GRAVITY != 0 {
        io.write_i16(ps.pm_gravity)?;
    }
    if flags & PS_M_DELTA_ANGLES != 0 {
        for angle in &ps.pm_delta_angles {
            io.write_i16(angle.to_short())?;
        }
    }
    if flags & PS_VIEWOFFSET != 0 {
        for offset in &ps.viewoffset {
            io.write_i8(offset.to_char())?;
        }
    }
    if flags & PS_VIEWANGLES != 0 {
        io.write_i16(ps.viewangles.values[0].to_short())?;
        io.write_i16(ps.viewangles.values[1].to_short())?;
    }
    if extraflags & EPS_VIEWANGLE2 != 0 {
        io.write_i16(ps.viewangles.values[2].to_short())?;
    }
    if flags & PS_KICKANGLES != 0 {
        for angle in &ps.kick_angles {
            io.write_i8(angle.to_char())?;
        }
    }
    if flags & PS_WEAPONINDEX != 0 {
        if layout.extensions {
            io.write_u16((ps.gunindex & Q2PRO_GUNINDEX_MASK) | ((ps.gunskin as u16) << Q2PRO_GUNINDEX_BITS))?;
        } else {
            io.write_u8(ps.gunindex as u8)?;
        }
    }
    if flags & PS_WEAPONFRAME != 0 {
        io.write_u8(ps.gunframe as u8)?;
    }
    if extraflags & EPS_GUNOFFSET != 0 {
        for offset in &ps.gunoffset.values {
            io.write_i8(offset.to_char())?;
        }
    }
    if extraflags & EPS_GUNANGLES != 0 {
        for angle in &ps.gunangles.values {
            io.write_i8(angle.to_char())?;
        }
    }
    if flags & PS_BLEND != 0 {
        if layout.extensions_v2 {
            write_blends(io, &ps.blend, &ps.damage_blend)?;
        } else {
            for color in &ps.blend.values {
                io.write_u8(color.to_byte())?;
            }
        }
    }
    if flags & PS_Q2PRO_PLAYERFOG != 0 {
        write_playerfog(io, &ps.fog)?;
    }
    if flags & PS_FOV != 0 {
        io.write_u8(ps.fov)?;
    }
    if flags & PS_RDFLAGS != 0 {
        io.write_u8(ps.rdflags)?;
    }
    if extraflags & EPS_STATS != 0 {
        let numstats = if layout.extensions_v2 {
            io.write_var_u64(ps.statbits)?;
            64
        } else {
            io.write_u32(ps.statbits as u32)?;
            32
        };
        for i in 0..numstats {
            if ps.statbits & (1 << i) != 0 {
                io.write_i16(ps.stats[i])?;
            }
        }
    }
    if extraflags & EPS_CLIENTNUM != 0 {
        if layout.protocol_version >= PROTOCOL_VERSION_Q2PRO_CLIENTNUM_SHORT {
            io.write_i16(ps.clientnum)?;
        } else {
            let clientnum = u8::try_from(ps.clientnum).map_err(|_| Error::BadData)?;
            io.write_u8(clientnum)?;
        }
    }
    Ok(extraflags)
}

fn write_frame(io: &mut dyn MsgWrite, layout: &Q2proLayout, frame: &Frame) -> Result<()> {
    let areabits_len = u8::try_from(frame.areabits.len()).map_err(|_| Error::BadData)?;
    // the extra flags go in front of the player state
    let mut playerstate = Vec::with_capacity(128);
    let extraflags = write_playerstate(&mut playerstate, layout, &frame.playerstate)?;

    let offset = if frame.deltaframe == -1 {
        31
    } else {
        frame.serverframe - frame.deltaframe
    };
    if !(0..=31).contains(&offset) {
        return Err(Error::BadData);
    }
    let encoded = (frame.serverframe & 0x07ff_ffff) | (offset << 27);

    io.write_u8(SVC_FRAME | ((extraflags & 0x70) << 1) as u8)?;
    io.write_i32(encoded)?;
    io.write_u8((frame.q2pro_frame_flags & 0x0f) | ((extraflags & 0x0f) << 4) as u8)?;
    io.write_u8(areabits_len)?;
    io.write_raw(&frame.areabits)?;
    io.write_raw(&playerstate)
}

pub(crate) fn write_gamestate(ctx: &mut ServerContext, io: &mut dyn MsgWrite, gamestate: &Gamestate) -> Result<()> {
    let layout = Q2proLayout::server(ctx);
    if ctx.protocol_version >= PROTOCOL_VERSION_Q2PRO_EXTENDED_LIMITS {
        let streams = GamestateStreams {
            configstring_cmd: SVC_Q2PRO_CONFIGSTRINGSTREAM,
            baseline_cmd: SVC_Q2PRO_BASELINESTREAM,
            max_configstrings: layout.max_configstrings(),
            baseline_size: Q2PRO_WRITE_GAMESTATE_BASELINE_SIZE,
        };
        server::maybe_zpacket(ctx, io, |ctx, io| {
            write_gamestate_streams(ctx, io, gamestate, &streams, |io, baseline| {
                write_entity_delta(io, &layout, baseline.entnum, &baseline.delta_state)
            })
        })
    } else {
        server::maybe_zpacket(ctx, io, |ctx, io| write_gamestate_mono(ctx, io, gamestate))
    }
}

/// Commands and limits of a streamed gamestate.
pub(crate) struct GamestateStreams {
    pub configstring_cmd: u8,
    pub baseline_cmd: u8,
    pub max_configstrings: u16,
    /// Upper bound of one encoded baseline
    pub baseline_size: usize,
}

/// Configstring and baseline streams; each packet carries complete,
/// terminated streams and the next call resumes where this one stopped.
pub(crate) fn write_gamestate_streams(
    ctx: &mut ServerContext,
    io: &mut dyn MsgWrite,
    gamestate: &Gamestate,
    streams: &GamestateStreams,
    write_baseline: impl Fn(&mut dyn MsgWrite, &SpawnBaseline) -> Result<()>,
) -> Result<Written> {
    let max = streams.max_configstrings;
    let num_configstrings = gamestate.configstrings.len();

    if ctx.gamestate_pos < num_configstrings {
        // command and terminator
        if io.available() < 3 {
            return Ok(Written::Partial);
        }
        io.write_u8(streams.configstring_cmd)?;
        while ctx.gamestate_pos < num_configstrings {
            let cs = &gamestate.configstrings[ctx.gamestate_pos];
            // index, string and terminator, plus the stream terminator
            if io.available() < 2 + cs.value.len() + 1 + 2 {
                io.write_u16(max)?;
                return Ok(Written::Partial);
            }
            io.write_u16(cs.index)?;
            io.write_string(&cs.value)?;
            ctx.gamestate_pos += 1;
        }
        io.write_u16(max)?;
    }

    let baseline_pos = ctx.gamestate_pos - num_configstrings;
    if baseline_pos < gamestate.spawnbaselines.len() {
        if io.available() < 3 {
            return Ok(Written::Partial);
        }
        io.write_u8(streams.baseline_cmd)?;
        for baseline in &gamestate.spawnbaselines[baseline_pos..] {
            if io.available() < streams.baseline_size + 2 {
                io.write_u16(0)?;
                return Ok(Written::Partial);
            }
            write_baseline(io, baseline)?;
            ctx.gamestate_pos += 1;
        }
        io.write_u16(0)?;
    }

    ctx.gamestate_pos = 0;
    Ok(Written::All)
}

/// The whole gamestate as one message, for older clients.
fn write_gamestate_mono(ctx: &mut ServerContext, io: &mut dyn MsgWrite, gamestate: &Gamestate) -> Result<Written> {
    let layout = Q2proLayout::server(ctx);
    io.write_u8(SVC_Q2PRO_GAMESTATE)?;
    for cs in &gamestate.configstrings {
        io.write_u16(cs.index)?;
        io.write_string(&cs.value)?;
    }
    io.write_u16(layout.max_configstrings())?;
    for baseline in &gamestate.spawnbaselines {
        write_entity_delta(io, &layout, baseline.entnum, &baseline.delta_state)?;
    }
    io.write_u16(0)?;
    Ok(Written::All)
}

/// Pick how a download gets sent; shared with Q2rePRO.
pub(crate) fn download_encoding(
    ctx: &ServerContext,
    total_size: usize,
    compress: DownloadCompress,
) -> Result<DownloadEncoding> {
    if total_size == 0 {
        return Ok(DownloadEncoding::Plain);
    }
    match compress {
        DownloadCompress::Raw if !ctx.features.download_compress_raw => Err(Error::RawCompressNotSupported),
        DownloadCompress::Raw => Ok(DownloadEncoding::RawDeflate),
        DownloadCompress::Auto if ctx.features.enable_deflate => Ok(DownloadEncoding::Compress),
        _ => Ok(DownloadEncoding::Plain),
    }
}

pub(crate) fn server_read(_ctx: &mut ServerContext, io: &mut dyn MsgRead) -> Result<ClcMessage> {
    let command = io.read_u8()?;
    let extrabits = command >> 5;
    let command = command & 0x1f;
    trace!(command = debug::clc_name(Protocol::Q2pro, command), "q2pro read");
    match command {
        CLC_NOP => Ok(ClcMessage::Nop),
        CLC_MOVE => {
            let mut mv = Move {
                lastframe: io.read_i32()?,
                ..Default::default()
            };
            for delta in &mut mv.moves {
                *delta = vanilla::read_move_delta(io)?;
            }
            Ok(ClcMessage::Move(mv))
        }
        CLC_USERINFO => Ok(ClcMessage::Userinfo(io.read_string()?)),
        CLC_STRINGCMD => Ok(ClcMessage::StringCmd(io.read_string()?)),
        CLC_R1Q2_SETTING => Ok(ClcMessage::Setting(r1q2::read_clc_setting(io)?)),
        CLC_Q2PRO_MOVE_NODELTA | CLC_Q2PRO_MOVE_BATCHED => Ok(ClcMessage::BatchMove(Box::new(read_batch_move(
            io,
            extrabits,
            command == CLC_Q2PRO_MOVE_NODELTA,
        )?))),
        CLC_Q2PRO_USERINFO_DELTA => Ok(ClcMessage::UserinfoDelta(UserinfoDelta {
            name: io.read_string()?,
            value: io.read_string()?,
        })),
        _ => Err(Error::BadCommand),
    }
}

fn read_batch_move(io: &mut dyn MsgRead, num_dups: u8, nodelta: bool) -> Result<BatchMove> {
    if num_dups as usize >= MAX_BATCH_MOVE_FRAMES {
        return Err(Error::BadData);
    }
    let mut mv = BatchMove {
        num_dups,
        lastframe: if nodelta { -1 } else { io.read_i32()? },
        ..Default::default()
    };
    let lightlevel = io.read_u8()?;

    let mut prev = MoveDelta::default();
    let mut bits = BitReader::new(io);
    for frame in &mut mv.batch_frames[..=num_dups as usize] {
        let num_cmds = bits.read(5)? as usize;
        frame.num_cmds = num_cmds as u8;
        for delta in &mut frame.moves[..num_cmds] {
            *delta = read_batch_delta(&mut bits, &prev)?;
            delta.lightlevel = lightlevel;
            prev = *delta;
        }
    }
    Ok(mv)
}

fn read_batch_delta(input: &mut BitReader, prev: &MoveDelta) -> Result<MoveDelta> {
    let mut delta = MoveDelta {
        angles: prev.angles,
        msec: prev.msec,
        ..Default::default()
    };
    if input.read(1)? == 0 {
        return Ok(delta);
    }
    let bits = input.read(8)? as u8;

    for c in 0..2 {
        if bits & (CM_ANGLE1 << c) != 0 {
            let angle = if input.read(1)? != 0 {
                (prev.angles[c].to_short() as i32 + input.read(-8)?) as i16
            } else {
                input.read(-16)? as i16
            };
            delta.angles[c] = Angle::Short(angle);
        }
    }
    if bits & CM_ANGLE3 != 0 {
        delta.angles[2] = Angle::Short(input.read(-16)? as i16);
    }
    for c in 0..3 {
        if bits & (CM_FORWARD << c) != 0 {
            delta.moves[c] = Coord::from_int_unscaled(input.read(-10)?);
        }
    }
    if bits & CM_BUTTONS != 0 {
        let v = input.read(3)? as u8;
        delta.buttons = (v & 3) | ((v & 4) << 5);
    }
    if bits & CM_IMPULSE != 0 {
        delta.msec = input.read(8)? as u8;
    }
    delta.delta_bits = CmdFlags::from_bits_truncate((bits & !CM_IMPULSE) as u32);
    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clc::BatchMoveFrame;
    use crate::connect::ConnectInfo;
    use crate::io::{MsgReader, SizeBuf};
    use crate::server::ServerInfo;
    use crate::svc::ConfigString;

    fn connected(game_api: GameApi, version: u16, has_zlib: bool) -> (ServerContext, ClientContext) {
        let info = ServerInfo {
            game_api,
            ..Default::default()
        };
        let connect = ConnectInfo {
            protocol: Protocol::Q2pro,
            version,
            has_zlib,
            ..Default::default()
        };
        let mut server = ServerContext::new(&info, &connect).unwrap();
        let mut serverdata = ServerData {
            servercount: 7,
            gamedir: "baseq2".into(),
            levelname: "q2dm1".into(),
            ..Default::default()
        };
        server.fill_serverdata(&mut serverdata);

        let mut buf = Vec::new();
        server.write(&mut buf, &SvcMessage::ServerData(serverdata)).unwrap();
        let mut client = ClientContext::new();
        let SvcMessage::ServerData(read) = client.read(&mut MsgReader::new(&buf)).unwrap() else {
            panic!("expected serverdata");
        };
        assert_eq!(read.protocol_version, version);
        (server, client)
    }

    #[test]
    fn test_serverdata_negotiates_game_api() {
        let (_, client) = connected(GameApi::Q2proExtendedV2, 1026, false);
        assert_eq!(client.protocol(), Some(Protocol::Q2pro));
        assert_eq!(client.features.server_game_api, GameApi::Q2proExtendedV2);
        assert!(client.features.has_playerfog);

        // extensions v2 needs version 1025
        let (_, client) = connected(GameApi::Q2proExtendedV2, 1024, false);
        assert_eq!(client.features.server_game_api, GameApi::Q2proExtended);

        let (_, client) = connected(GameApi::Vanilla, 1021, false);
        assert_eq!(client.features.server_game_api, GameApi::Vanilla);
        assert!(!client.features.has_playerfog);
    }

    #[test]
    fn test_extended_entity_round_trip() {
        let (mut server, mut client) = connected(GameApi::Q2proExtendedV2, 1026, false);
        let mut delta = EntityStateDelta {
            delta_bits: EsdFlags::MODELINDEX
                | EsdFlags::EFFECTS_MORE
                | EsdFlags::SOUND
                | EsdFlags::LOOP_VOLUME
                | EsdFlags::ALPHA
                | EsdFlags::SOLID,
            modelindex: 300,
            effects_more: 0x1234,
            sound: 1000,
            loop_volume: 128,
            alpha: 77,
            solid: 0xdead_beef,
            origin: MaybeDiffCoords::Write {
                prev: [Coord::Int(800), Coord::Int(0), Coord::Int(0)],
                current: [Coord::Int(1000), Coord::Int(0), Coord::Int(400_000)],
            },
            ..Default::default()
        };
        delta.angle.set_comp(1, Angle::Short(12345));
        let entity = FrameEntityDelta {
            newnum: 300,
            remove: false,
            entity_delta: delta,
        };

        let mut buf = Vec::new();
        server.write(&mut buf, &SvcMessage::FrameEntityDelta(entity)).unwrap();
        client.state = ReadState::FrameEntities;
        let SvcMessage::FrameEntityDelta(read) = client.read(&mut MsgReader::new(&buf)).unwrap() else {
            panic!("expected an entity");
        };
        assert_eq!(read.newnum, 300);
        let read = read.entity_delta;
        assert_eq!(read.delta_bits, delta.delta_bits);
        assert_eq!(read.modelindex, 300);
        assert_eq!(read.effects_more, 0x1234);
        assert_eq!(read.sound, 1000);
        assert_eq!(read.loop_volume, 128);
        assert_eq!(read.alpha, 77);
        assert_eq!(read.solid, 0xdead_beef);
        assert_eq!(read.angle.values[1], Angle::Short(12345));

        // small change goes as a difference, the large one absolute
        let mut origin = [800, 0, 0];
        read.origin.apply_int(&mut origin);
        assert_eq!(origin, [1000, 0, 400_000]);
    }

    #[test]
    fn test_entity_limits_without_extensions() {
        let (mut server, _) = connected(GameApi::Vanilla, 1021, false);
        let mut buf = Vec::new();
        for delta in [
            EntityStateDelta {
                delta_bits: EsdFlags::MODELINDEX,
                modelindex: 256,
                ..Default::default()
            },
            EntityStateDelta {
                delta_bits: EsdFlags::ALPHA,
                alpha: 1,
                ..Default::default()
            },
            EntityStateDelta {
                delta_bits: EsdFlags::SOUND,
                sound: 300,
                ..Default::default()
            },
        ] {
            let entity = FrameEntityDelta {
                newnum: 1,
                remove: false,
                entity_delta: delta,
            };
            assert_eq!(
                server.write(&mut buf, &SvcMessage::FrameEntityDelta(entity)),
                Err(Error::BadData)
            );
        }
    }

    #[test]
    fn test_frame_extraflags_round_trip() {
        let (mut server, mut client) = connected(GameApi::Q2proExtendedV2, 1026, false);
        let mut frame = Frame {
            serverframe: 1000,
            deltaframe: 998,
            q2pro_frame_flags: 3,
            areabits: vec![1, 2],
            ..Default::default()
        };
        let ps = &mut frame.playerstate;
        ps.pm_origin = MaybeDiffCoords::Write {
            prev: [Coord::Int(0); 3],
            current: [Coord::Int(0), Coord::Int(0), Coord::Int(-64)],
        };
        ps.delta_bits = PsdFlags::CLIENTNUM | PsdFlags::GUNINDEX | PsdFlags::GUNSKIN | PsdFlags::PM_TIME;
        ps.pm_time = 1000;
        ps.clientnum = 300;
        ps.gunindex = 12;
        ps.gunskin = 2;
        ps.gunoffset.set_comp(0, SmallOffset::Char(-4));
        ps.statbits = 1 << 40;
        ps.stats[40] = 99;
        ps.damage_blend.set_comp(3, Color::Byte(200));

        let mut buf = Vec::new();
        server.write(&mut buf, &SvcMessage::Frame(Box::new(frame.clone()))).unwrap();
        server.write(&mut buf, &SvcMessage::FrameEntityDelta(Default::default())).unwrap();

        let mut r = MsgReader::new(&buf);
        let SvcMessage::Frame(read) = client.read(&mut r).unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(read.serverframe, 1000);
        assert_eq!(read.deltaframe, 998);
        assert_eq!(read.q2pro_frame_flags, 3);
        let rps = &read.playerstate;
        assert_eq!(rps.pm_origin.read_bits(), 4);
        assert_eq!(rps.pm_time, 1000);
        assert_eq!(rps.clientnum, 300);
        assert_eq!((rps.gunindex, rps.gunskin), (12, 2));
        assert_eq!(rps.gunoffset.values[0], SmallOffset::Char(-4));
        assert_eq!(rps.statbits, 1 << 40);
        assert_eq!(rps.stats[40], 99);
        assert_eq!(rps.damage_blend.delta_bits, 8);
        assert_eq!(rps.blend.delta_bits, 0);

        assert_eq!(client.read(&mut r).unwrap(), SvcMessage::FrameEntityDelta(Default::default()));
        assert_eq!(client.read(&mut r), Err(Error::NoMoreInput));
    }

    #[test]
    fn test_playerstate_limits() {
        let layout = Q2proLayout {
            extensions: false,
            extensions_v2: false,
            protocol_version: 1021,
            playerfog: false,
        };
        let mut buf = Vec::new();

        let mut ps = PlayerStateDelta::default();
        ps.delta_bits = PsdFlags::PM_TIME;
        ps.pm_time = 256;
        assert_eq!(write_playerstate(&mut buf, &layout, &ps), Err(Error::BadData));

        let mut ps = PlayerStateDelta::default();
        ps.delta_bits = PsdFlags::GUNSKIN;
        assert_eq!(write_playerstate(&mut buf, &layout, &ps), Err(Error::BadData));

        let mut ps = PlayerStateDelta::default();
        ps.delta_bits = PsdFlags::CLIENTNUM;
        ps.clientnum = 256;
        assert_eq!(write_playerstate(&mut buf, &layout, &ps), Err(Error::BadData));

        // fog needs the extra flag byte
        let mut ps = PlayerStateDelta::default();
        ps.fog.flags = FogFlags::DENSITY_SKYFACTOR;
        assert_eq!(write_playerstate(&mut buf, &layout, &ps), Err(Error::BadData));
    }

    #[test]
    fn test_playerfog_round_trip() {
        let mut fog = Fog::default();
        fog.flags = FogFlags::DENSITY_SKYFACTOR | FogFlags::HEIGHTFOG_FALLOFF | FogFlags::HEIGHTFOG_END_DIST;
        fog.global.density = Fraction::Word(0x1234);
        fog.global.skyfactor = Fraction::Word(0xffff);
        for c in 0..3 {
            fog.global.color.set_comp(c, Color::Byte(10 * c as u8));
        }
        fog.height.falloff = Fraction::Word(500);
        fog.height.end_dist = Coord::Int(-80_000);

        let mut buf = Vec::new();
        write_playerfog(&mut buf, &fog).unwrap();
        let read = read_playerfog(&mut MsgReader::new(&buf)).unwrap();
        assert_eq!(read, fog);
    }

    #[test]
    fn test_batch_move_round_trip() {
        let mut mv = BatchMove {
            lastframe: 500,
            num_dups: 1,
            ..Default::default()
        };
        let first = MoveDelta {
            delta_bits: CmdFlags::ANGLE0 | CmdFlags::ANGLE1 | CmdFlags::MOVE_FORWARD | CmdFlags::BUTTONS,
            angles: [Angle::Short(100), Angle::Short(-20000), Angle::Short(0)],
            moves: [Coord::from_int_unscaled(400), Coord::Int(0), Coord::Int(0)],
            buttons: 1 | 128,
            msec: 16,
            lightlevel: 50,
            ..Default::default()
        };
        let second = MoveDelta {
            delta_bits: CmdFlags::ANGLE0 | CmdFlags::ANGLE2,
            angles: [Angle::Short(150), Angle::Short(-20000), Angle::Short(3000)],
            msec: 16,
            lightlevel: 50,
            ..Default::default()
        };
        mv.batch_frames[0] = BatchMoveFrame {
            num_cmds: 1,
            ..Default::default()
        };
        mv.batch_frames[0].moves[0] = first;
        mv.batch_frames[1].num_cmds = 2;
        mv.batch_frames[1].moves[0] = second;
        // nothing changed
        mv.batch_frames[1].moves[1] = MoveDelta {
            msec: 16,
            lightlevel: 50,
            ..Default::default()
        };

        let mut client = ClientContext::new();
        client.begin_protocol(Protocol::Q2pro, 1026);
        let mut buf = Vec::new();
        client.write(&mut buf, &ClcMessage::BatchMove(Box::new(mv.clone()))).unwrap();
        assert_eq!(buf[0], CLC_Q2PRO_MOVE_BATCHED | (1 << 5));

        let (mut server, _) = connected(GameApi::Vanilla, 1026, false);
        let ClcMessage::BatchMove(read) = server.read(&mut MsgReader::new(&buf)).unwrap() else {
            panic!("expected a batch move");
        };
        assert_eq!(read.lastframe, 500);
        assert_eq!(read.num_dups, 1);
        assert_eq!(read.batch_frames[0].num_cmds, 1);
        assert_eq!(read.batch_frames[0].moves[0], first);
        assert_eq!(read.batch_frames[1].num_cmds, 2);
        assert_eq!(read.batch_frames[1].moves[0], second);
        // unchanged commands inherit angles and msec
        let unchanged = read.batch_frames[1].moves[1];
        assert_eq!(unchanged.delta_bits, CmdFlags::empty());
        assert_eq!(unchanged.angles, second.angles);
        assert_eq!(unchanged.msec, 16);
    }

    #[test]
    fn test_batch_move_too_many_frames() {
        let (mut server, _) = connected(GameApi::Vanilla, 1026, false);
        let buf = [CLC_Q2PRO_MOVE_NODELTA | (4 << 5), 0];
        assert_eq!(server.read(&mut MsgReader::new(&buf)), Err(Error::BadData));
    }

    #[test]
    fn test_gamestate_stream_resumes() {
        let (mut server, mut client) = connected(GameApi::Q2proExtended, 1026, false);
        let gamestate = Gamestate {
            configstrings: (0..40)
                .map(|i| ConfigString {
                    index: i,
                    value: format!("configstring number {i}"),
                })
                .collect(),
            spawnbaselines: (1..30)
                .map(|entnum| SpawnBaseline {
                    entnum,
                    delta_state: EntityStateDelta {
                        delta_bits: EsdFlags::MODELINDEX | EsdFlags::FRAME,
                        modelindex: entnum,
                        frame: 3,
                        ..Default::default()
                    },
                })
                .collect(),
        };

        let mut configstrings = Vec::new();
        let mut baselines = Vec::new();
        let mut packets = 0;
        loop {
            let mut packet = SizeBuf::new(300);
            let result = server.write_gamestate(&mut packet, &gamestate);
            packets += 1;
            let mut r = MsgReader::new(packet.as_bytes());
            loop {
                match client.read(&mut r) {
                    Ok(SvcMessage::ConfigString(cs)) => configstrings.push(cs),
                    Ok(SvcMessage::SpawnBaseline(b)) => baselines.push(b),
                    Ok(other) => panic!("unexpected {other:?}"),
                    Err(Error::NoMoreInput) => break,
                    Err(e) => panic!("read failed: {e}"),
                }
            }
            match result {
                Ok(()) => break,
                Err(Error::NotEnoughPacketSpace) => continue,
                Err(e) => panic!("write failed: {e}"),
            }
        }
        assert!(packets > 2);
        assert_eq!(configstrings, gamestate.configstrings);
        assert_eq!(baselines, gamestate.spawnbaselines);
    }

    #[test]
    fn test_gamestate_mono() {
        let (mut server, mut client) = connected(GameApi::Vanilla, 1021, false);
        let gamestate = Gamestate {
            configstrings: vec![ConfigString {
                index: 5,
                value: "hello".into(),
            }],
            spawnbaselines: vec![SpawnBaseline {
                entnum: 3,
                delta_state: EntityStateDelta {
                    delta_bits: EsdFlags::EVENT,
                    event: 2,
                    ..Default::default()
                },
            }],
        };
        let mut buf = Vec::new();
        server.write_gamestate(&mut buf, &gamestate).unwrap();
        assert_eq!(buf[0], SVC_Q2PRO_GAMESTATE);

        let mut r = MsgReader::new(&buf);
        assert_eq!(
            client.read(&mut r).unwrap(),
            SvcMessage::ConfigString(gamestate.configstrings[0].clone())
        );
        assert_eq!(client.read(&mut r).unwrap(), SvcMessage::SpawnBaseline(gamestate.spawnbaselines[0]));
        assert_eq!(client.read(&mut r), Err(Error::NoMoreInput));
    }

    #[test]
    fn test_compressed_gamestate() {
        let (mut server, mut client) = connected(GameApi::Q2proExtended, 1026, true);
        let gamestate = Gamestate {
            configstrings: (0..100)
                .map(|i| ConfigString {
                    index: i,
                    value: "models/weapons/v_blast/tris.md2".into(),
                })
                .collect(),
            spawnbaselines: Vec::new(),
        };
        let mut buf = SizeBuf::new(1400);
        server.write_gamestate(&mut buf, &gamestate).unwrap();
        assert_eq!(buf.as_bytes()[0], SVC_R1Q2_ZPACKET);

        let mut r = MsgReader::new(buf.as_bytes());
        let mut read = Vec::new();
        loop {
            match client.read(&mut r) {
                Ok(SvcMessage::ConfigString(cs)) => read.push(cs),
                Ok(other) => panic!("unexpected {other:?}"),
                Err(Error::NoMoreInput) => break,
                Err(e) => panic!("read failed: {e}"),
            }
        }
        assert_eq!(read, gamestate.configstrings);
    }

    #[test]
    fn test_muzzleflash2_high_weapon_bits() {
        let layout = Q2proLayout {
            extensions: true,
            extensions_v2: false,
            protocol_version: 1026,
            playerfog: true,
        };
        let mut buf = Vec::new();
        buf.write_u16(5 | (1 << 13)).unwrap();
        buf.write_u8(0x22).unwrap();
        let flash = read_muzzleflash2(&mut MsgReader::new(&buf), &layout).unwrap();
        assert_eq!(flash.entity, 5);
        assert_eq!(flash.weapon, 0x122);
    }

    #[test]
    fn test_download_size_must_match_data() {
        let (mut server, _) = connected(GameApi::Vanilla, 1021, true);
        for compressed in [true, false] {
            let download = Download {
                size: 10,
                percent: 5,
                data: vec![1, 2, 3],
                compressed,
                uncompressed_size: 10,
            };
            let mut buf = Vec::new();
            assert_eq!(server.write(&mut buf, &SvcMessage::Download(download)), Err(Error::BadData));
            assert!(buf.is_empty());
        }
    }
}
