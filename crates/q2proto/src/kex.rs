// kex.rs -- protocols 2022/2023 (Quake II rerelease)
//
// The rerelease sends entity origins and angles as floats and bundles the
// gamestate into zlib compressed "blast" messages. Protocol 2022, found in
// the demos shipped with the game, sends the origin of an entity without a
// solid value as 12.3 fixed point, so both sides track which entities
// currently have a nonzero solid.

use tracing::{debug, trace};

use crate::clc::ClcMessage;
use crate::client::{ClientContext, ReadState};
use crate::common;
use crate::compression::{DeflateWriter, Inflater, MIN_COMPRESS_SIZE, ZPACKET_HEADER_SIZE};
use crate::coords::{Angle, Color, Coord, SmallAngle, SmallOffset};
use crate::debug as names;
use crate::defs::*;
use crate::entity::{choose_width_flags, read_entity_bits, read_sized, write_entity_bits, write_sized};
use crate::error::{Error, Result};
use crate::io::{MsgRead, MsgWrite};
use crate::protocol::{GameApi, MulticastProtocol, Protocol, PROTOCOL_KEX, PROTOCOL_KEX_DEMOS};
use crate::server::{self, Gamestate, ServerContext};
use crate::svc::{
    ConfigString, EntityStateDelta, EsdFlags, Frame, FrameEntityDelta, PlayerStateDelta, PsdFlags, ServerData,
    SpawnBaseline, SvcMessage,
};
use crate::tent;

fn multicast(protocol: Option<Protocol>) -> MulticastProtocol {
    if protocol == Some(Protocol::KexDemos) {
        MulticastProtocol::Short
    } else {
        MulticastProtocol::Float
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
        ..Default::default()
    };
    serverdata.kex.server_fps = io.read_u8()?;
    serverdata.gamedir = io.read_string()?;
    serverdata.clientnum = io.read_i16()?;
    // split screen
    if serverdata.clientnum == -2 {
        return Err(Error::BadData);
    }
    serverdata.levelname = io.read_string()?;

    let dialect = Protocol::from_netver(protocol).ok_or(Error::ProtocolNotSupported)?;
    ctx.begin_protocol(dialect, 0);
    ctx.kex_edict_nonzero_solid.clear();
    ctx.kex_baseline_nonzero_solid.clear();
    ctx.features.has_solid32 = true;
    ctx.features.server_game_api = GameApi::Rerelease;
    debug!(protocol = %dialect, fps = serverdata.kex.server_fps, "kex serverdata");
    Ok(serverdata)
}

/// Read the next message. `None` means a blast started and the caller
/// should read again.
pub(crate) fn client_read(ctx: &mut ClientContext, io: &mut dyn MsgRead) -> Result<Option<SvcMessage>> {
    match ctx.state {
        ReadState::FrameEntities => return read_frame_entity(ctx, io).map(Some),
        ReadState::ConfigBlast => {
            let cs = ConfigString {
                index: io.read_u16()?,
                value: io.read_string()?,
            };
            return Ok(Some(SvcMessage::ConfigString(cs)));
        }
        ReadState::BaselineBlast => return read_baseline(ctx, io).map(|b| Some(SvcMessage::SpawnBaseline(b))),
        _ => {}
    }

    let protocol = ctx.protocol();
    let command = io.read_u8()?;
    trace!(command = names::svc_name(Protocol::Kex, command), "kex read");
    let msg = match command {
        SVC_NOP => SvcMessage::Nop,
        SVC_DISCONNECT => SvcMessage::Disconnect,
        SVC_RECONNECT => SvcMessage::Reconnect,
        SVC_PRINT => SvcMessage::Print(common::read_print(io)?),
        SVC_CENTERPRINT => SvcMessage::CenterPrint(io.read_string()?),
        SVC_STUFFTEXT => SvcMessage::StuffText(io.read_string()?),
        SVC_SERVERDATA => {
            let protocol = io.read_i32()?;
            if !(PROTOCOL_KEX_DEMOS..=PROTOCOL_KEX).contains(&protocol) {
                return Err(Error::BadData);
            }
            SvcMessage::ServerData(continue_serverdata(ctx, io, protocol)?)
        }
        SVC_CONFIGSTRING => SvcMessage::ConfigString(common::read_configstring(io)?),
        SVC_SOUND => SvcMessage::Sound(common::read_sound(io, multicast(protocol), true)?),
        SVC_SPAWNBASELINE => SvcMessage::SpawnBaseline(read_baseline(ctx, io)?),
        SVC_TEMP_ENTITY => {
            SvcMessage::TempEntity(tent::read_temp_entity(io, multicast(protocol), GameApi::Rerelease)?)
        }
        SVC_MUZZLEFLASH => SvcMessage::MuzzleFlash(common::read_muzzleflash(io, MZ_SILENCED)?),
        SVC_MUZZLEFLASH2 => SvcMessage::MuzzleFlash2(common::read_muzzleflash(io, 0)?),
        SVC_RR_MUZZLEFLASH3 => SvcMessage::MuzzleFlash2(common::read_muzzleflash3(io)?),
        SVC_FRAME => read_frame(ctx, io)?,
        SVC_INVENTORY => SvcMessage::Inventory(common::read_inventory(io)?),
        SVC_LAYOUT => SvcMessage::Layout(io.read_string()?),
        SVC_RR_SPLITCLIENT => SvcMessage::SplitClient(io.read_u8()?),
        SVC_RR_CONFIGBLAST => {
            begin_blast(ctx, io, ReadState::ConfigBlast)?;
            return Ok(None);
        }
        SVC_RR_SPAWNBASELINEBLAST => {
            begin_blast(ctx, io, ReadState::BaselineBlast)?;
            return Ok(None);
        }
        SVC_RR_DAMAGE => SvcMessage::Damage(common::read_damage(io)?),
        SVC_RR_LOCPRINT => SvcMessage::LocPrint(common::read_locprint(io)?),
        SVC_RR_FOG => SvcMessage::Fog(common::read_fog(io)?),
        SVC_RR_POI => SvcMessage::Poi(common::read_poi(io)?),
        SVC_RR_HELP_PATH => SvcMessage::HelpPath(common::read_help_path(io)?),
        SVC_RR_ACHIEVEMENT => SvcMessage::Achievement(io.read_string()?),
        _ => return Err(Error::BadCommand),
    };
    Ok(Some(msg))
}

/// Inflate a blast; its records are read from the inflated data until it runs out.
fn begin_blast(ctx: &mut ClientContext, io: &mut dyn MsgRead, state: ReadState) -> Result<()> {
    let compressed_len = io.read_u16()? as usize;
    let uncompressed_len = io.read_u16()?;
    let data = Inflater::with_header().inflate(io.read_raw(compressed_len)?)?;
    trace!(compressed_len, uncompressed_len, inflated = data.len(), "blast");
    ctx.push_inflated(data)?;
    ctx.state = state;
    Ok(())
}

fn read_baseline(ctx: &mut ClientContext, io: &mut dyn MsgRead) -> Result<SpawnBaseline> {
    let (bits, entnum) = read_entity_bits(io)?;
    trace!(entnum, bits = %names::EntityBits(bits), "baseline");
    let delta_state = read_entity_delta(ctx, io, bits, entnum, false)?;
    let nonzero = ctx.kex_edict_nonzero_solid.get(entnum);
    ctx.kex_baseline_nonzero_solid.set(entnum, nonzero);
    Ok(SpawnBaseline { entnum, delta_state })
}

fn read_frame_entity(ctx: &mut ClientContext, io: &mut dyn MsgRead) -> Result<SvcMessage> {
    let (bits, newnum) = read_entity_bits(io)?;
    trace!(newnum, bits = %names::EntityBits(bits), "entity delta");

    let mut delta = FrameEntityDelta {
        newnum,
        ..Default::default()
    };
    if newnum == 0 {
        ctx.state = ReadState::Steady;
    } else if bits & U_REMOVE != 0 {
        delta.remove = true;
        let nonzero = ctx.kex_baseline_nonzero_solid.get(newnum);
        ctx.kex_edict_nonzero_solid.set(newnum, nonzero);
    } else {
        let nonzero = ctx.kex_edict_nonzero_solid.get(newnum);
        delta.entity_delta = read_entity_delta(ctx, io, bits, newnum, nonzero)?;
    }
    Ok(SvcMessage::FrameEntityDelta(delta))
}

fn read_entity_delta(
    ctx: &mut ClientContext,
    io: &mut dyn MsgRead,
    bits: u64,
    entnum: u16,
    nonzero_solid: bool,
) -> Result<EntityStateDelta> {
    let mut delta = EntityStateDelta::default();
    let model16 = bits & U_MODEL16 != 0;

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

    // 64 bit effects: low word first, the high word uses the effects width
    if bits & (U_KEX_EFFECTS64 | U_EFFECTS32) != 0 {
        delta.delta_bits |= EsdFlags::EFFECTS | EsdFlags::EFFECTS_MORE;
        if bits & U_KEX_EFFECTS64 != 0 {
            delta.effects = io.read_u32()?;
            delta.effects_more = read_sized(io, bits, U_EFFECTS8, U_EFFECTS16)?;
        } else {
            delta.effects = read_sized(io, bits, U_EFFECTS8, U_EFFECTS16)?;
        }
    }
    if bits & U_RENDERFX32 != 0 {
        delta.delta_bits |= EsdFlags::RENDERFX;
        delta.renderfx = read_sized(io, bits, U_RENDERFX8, U_RENDERFX16)?;
    }

    let mut nonzero_solid = nonzero_solid;
    if bits & U_SOLID != 0 {
        delta.delta_bits |= EsdFlags::SOLID;
        delta.solid = io.read_u32()?;
        nonzero_solid = delta.solid != 0;
        ctx.kex_edict_nonzero_solid.set(entnum, nonzero_solid);
    }

    let high_precision = ctx.protocol() != Some(Protocol::KexDemos) || nonzero_solid;
    let read_coord = |io: &mut dyn MsgRead| -> Result<Coord> {
        if high_precision {
            Ok(Coord::Float(io.read_float()?))
        } else {
            Ok(Coord::from_short(io.read_i16()?))
        }
    };
    for (c, flag) in [U_ORIGIN1, U_ORIGIN2, U_ORIGIN3].into_iter().enumerate() {
        if bits & flag != 0 {
            delta.origin.set_read(c, read_coord(io)?, false);
        }
    }
    if bits & U_OLDORIGIN != 0 {
        delta.delta_bits |= EsdFlags::OLD_ORIGIN;
        for coord in &mut delta.old_origin {
            *coord = read_coord(io)?;
        }
    }
    for (c, flag) in [U_ANGLE1, U_ANGLE2, U_ANGLE3].into_iter().enumerate() {
        if bits & flag != 0 {
            delta.angle.set_comp(c, Angle::Float(io.read_float()?));
        }
    }

    if bits & U_SOUND != 0 {
        delta.delta_bits |= EsdFlags::SOUND;
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
    }
    if bits & U_EVENT != 0 {
        delta.delta_bits |= EsdFlags::EVENT;
        delta.event = io.read_u8()?;
    }
    if bits & U_ALPHA != 0 {
        delta.delta_bits |= EsdFlags::ALPHA;
        delta.alpha = io.read_u8()?;
    }
    if bits & U_SCALE != 0 {
        delta.delta_bits |= EsdFlags::SCALE;
        delta.scale = io.read_u8()?;
    }

    // instance bits, owner and old frame are not kept
    if bits & U_KEX_INSTANCE != 0 {
        io.read_u8()?;
    }
    if bits & U_KEX_OWNER != 0 {
        io.read_u16()?;
    }
    if bits & U_KEX_OLDFRAME != 0 {
        io.read_u16()?;
    }
    Ok(delta)
}

fn read_playerstate(io: &mut dyn MsgRead) -> Result<PlayerStateDelta> {
    let mut flags = io.read_u16()? as u32;
    if flags & PS_MOREBITS != 0 {
        flags |= (io.read_u16()? as u32) << 16;
    }
    trace!(flags = %names::PlayerBits(flags), "playerstate");
    let mut ps = PlayerStateDelta::default();

    if flags & PS_M_TYPE != 0 {
        ps.delta_bits |= PsdFlags::PM_TYPE;
        ps.pm_type = io.read_u8()?;
    }
    if flags & PS_M_ORIGIN != 0 {
        for c in 0..3 {
            ps.pm_origin.set_read(c, Coord::Float(io.read_float()?), false);
        }
    }
    if flags & PS_M_VELOCITY != 0 {
        for c in 0..3 {
            ps.pm_velocity.set_read(c, Coord::Float(io.read_float()?), false);
        }
    }
    if flags & PS_M_TIME != 0 {
        ps.delta_bits |= PsdFlags::PM_TIME;
        ps.pm_time = io.read_u16()?;
    }
    if flags & PS_M_FLAGS != 0 {
        ps.delta_bits |= PsdFlags::PM_FLAGS;
        ps.pm_flags = io.read_u16()?;
    }
    if flags & PS_M_GRAVITY != 0 {
        ps.delta_bits |= PsdFlags::PM_GRAVITY;
        ps.pm_gravity = io.read_i16()?;
    }
    if flags & PS_M_DELTA_ANGLES != 0 {
        ps.delta_bits |= PsdFlags::PM_DELTA_ANGLES;
        for angle in &mut ps.pm_delta_angles {
            *angle = Angle::Float(io.read_float()?);
        }
    }
    if flags & PS_VIEWOFFSET != 0 {
        ps.delta_bits |= PsdFlags::VIEWOFFSET | PsdFlags::PM_VIEWHEIGHT;
        for offset in &mut ps.viewoffset {
            *offset = SmallOffset::ReproViewoffset(io.read_i16()?);
        }
        // present in protocol 2022 as well
        ps.pm_viewheight = io.read_i8()?;
    }
    if flags & PS_VIEWANGLES != 0 {
        for c in 0..3 {
            ps.viewangles.set_comp(c, Angle::Float(io.read_float()?));
        }
    }
    if flags & PS_KICKANGLES != 0 {
        ps.delta_bits |= PsdFlags::KICKANGLES;
        for angle in &mut ps.kick_angles {
            *angle = SmallAngle::ReproKickAngle(io.read_i16()?);
        }
    }
    if flags & PS_WEAPONINDEX != 0 {
        ps.delta_bits |= PsdFlags::GUNINDEX | PsdFlags::GUNSKIN;
        let v = io.read_u16()?;
        ps.gunindex = v & Q2PRO_GUNINDEX_MASK;
        ps.gunskin = (v >> Q2PRO_GUNINDEX_BITS) as u8;
    }
    if flags & PS_WEAPONFRAME != 0 {
        let v = io.read_u16()?;
        ps.delta_bits |= PsdFlags::GUNFRAME;
        ps.gunframe = v & 0x1ff;
        let gunbits = (v >> 9) as u8;
        for (c, bit) in [GUNBIT_OFFSET_X, GUNBIT_OFFSET_Y, GUNBIT_OFFSET_Z].into_iter().enumerate() {
            if gunbits & bit != 0 {
                ps.gunoffset.set_comp(c, SmallOffset::Float(io.read_float()?));
            }
        }
        for (c, bit) in [GUNBIT_ANGLES_X, GUNBIT_ANGLES_Y, GUNBIT_ANGLES_Z].into_iter().enumerate() {
            if gunbits & bit != 0 {
                ps.gunangles.set_comp(c, SmallAngle::Float(io.read_float()?));
            }
        }
        if gunbits & GUNBIT_GUNRATE != 0 {
            ps.delta_bits |= PsdFlags::GUNRATE;
            ps.gunrate = io.read_u8()?;
        }
    }
    if flags & PS_BLEND != 0 {
        for c in 0..4 {
            ps.blend.set_comp(c, Color::Byte(io.read_u8()?));
        }
    }
    if flags & PS_FOV != 0 {
        ps.delta_bits |= PsdFlags::FOV;
        ps.fov = io.read_u8()?;
    }
    if flags & PS_RDFLAGS != 0 {
        ps.delta_bits |= PsdFlags::RDFLAGS;
        ps.rdflags = io.read_u8()?;
    }

    // stats come in two 32 bit halves
    for half in 0..2 {
        let statbits = io.read_u32()?;
        for i in 0..32 {
            if statbits & (1 << i) != 0 {
                ps.stats[half * 32 + i] = io.read_i16()?;
            }
        }
        ps.statbits |= (statbits as u64) << (half * 32);
    }

    if flags & PS_KEX_DAMAGE_BLEND != 0 {
        for c in 0..4 {
            ps.damage_blend.set_comp(c, Color::Byte(io.read_u8()?));
        }
    }
    if flags & PS_KEX_TEAM_ID != 0 {
        io.read_u8()?;
    }
    Ok(ps)
}

fn read_frame(ctx: &mut ClientContext, io: &mut dyn MsgRead) -> Result<SvcMessage> {
    let mut frame = Frame {
        serverframe: io.read_i32()?,
        deltaframe: io.read_i32()?,
        suppress_count: io.read_u8()?,
        ..Default::default()
    };
    let areabits_len = io.read_u8()? as usize;
    frame.areabits = io.read_data(areabits_len)?;

    if io.read_u8()? != SVC_PLAYERINFO {
        return Err(Error::BadData);
    }
    frame.playerstate = read_playerstate(io)?;
    if io.read_u8()? != SVC_PACKETENTITIES {
        return Err(Error::BadData);
    }
    ctx.state = ReadState::FrameEntities;
    Ok(SvcMessage::Frame(Box::new(frame)))
}

/// Rerelease clients only use the basic string messages here.
pub(crate) fn client_write(_ctx: &mut ClientContext, io: &mut dyn MsgWrite, msg: &ClcMessage) -> Result<()> {
    trace!(message = msg.name(), "kex write");
    match msg {
        ClcMessage::Nop => io.write_u8(CLC_NOP),
        ClcMessage::Userinfo(userinfo) => common::write_string_cmd(io, CLC_USERINFO, userinfo),
        ClcMessage::StringCmd(cmd) => common::write_string_cmd(io, CLC_STRINGCMD, cmd),
        _ => Err(Error::NotImplemented),
    }
}

// ============================================================
// Server side
// ============================================================

pub(crate) fn init_server(ctx: &mut ServerContext) -> Result<()> {
    if ctx.info.game_api != GameApi::Rerelease {
        return Err(Error::GametypeUnsupported);
    }
    ctx.protocol_version = 0;
    ctx.kex_edict_nonzero_solid.clear();
    ctx.kex_baseline_nonzero_solid.clear();
    let features = &mut ctx.features;
    features.enable_deflate = false;
    features.download_compress_raw = false;
    features.has_beam_old_origin_fix = true;
    features.playerstate_clientnum = false;
    features.has_playerfog = false;
    Ok(())
}

pub(crate) fn fill_serverdata(ctx: &ServerContext, serverdata: &mut ServerData) {
    serverdata.protocol = ctx.connect.protocol.netver();
}

pub(crate) fn server_write(ctx: &mut ServerContext, io: &mut dyn MsgWrite, msg: &SvcMessage) -> Result<()> {
    trace!(message = msg.name(), "kex write");
    match msg {
        SvcMessage::Nop => io.write_u8(SVC_NOP),
        SvcMessage::Disconnect => io.write_u8(SVC_DISCONNECT),
        SvcMessage::Reconnect => io.write_u8(SVC_RECONNECT),
        SvcMessage::Sound(sound) => common::write_sound(io, multicast(Some(ctx.connect.protocol)), true, sound),
        SvcMessage::Print(print) => common::write_print(io, print),
        SvcMessage::StuffText(text) => common::write_string_cmd(io, SVC_STUFFTEXT, text),
        SvcMessage::ServerData(serverdata) => write_serverdata(io, serverdata),
        SvcMessage::ConfigString(cs) => common::write_configstring(io, cs),
        SvcMessage::SpawnBaseline(baseline) => write_spawnbaseline(ctx, io, baseline),
        SvcMessage::CenterPrint(text) => common::write_string_cmd(io, SVC_CENTERPRINT, text),
        SvcMessage::Frame(frame) => write_frame(io, frame),
        SvcMessage::FrameEntityDelta(delta) => write_frame_entity(ctx, io, delta),
        SvcMessage::Layout(text) => common::write_string_cmd(io, SVC_LAYOUT, text),
        // usually sent by game code, but demos need it
        SvcMessage::Fog(fog) => common::write_fog(io, fog),
        _ => Err(Error::NotImplemented),
    }
}

fn write_serverdata(io: &mut dyn MsgWrite, serverdata: &ServerData) -> Result<()> {
    io.write_u8(SVC_SERVERDATA)?;
    io.write_i32(serverdata.protocol)?;
    io.write_i32(serverdata.servercount)?;
    io.write_bool(serverdata.attractloop)?;
    io.write_u8(serverdata.kex.server_fps)?;
    io.write_string(&serverdata.gamedir)?;
    io.write_i16(serverdata.clientnum)?;
    io.write_string(&serverdata.levelname)
}

fn write_spawnbaseline(ctx: &mut ServerContext, io: &mut dyn MsgWrite, baseline: &SpawnBaseline) -> Result<()> {
    io.write_u8(SVC_SPAWNBASELINE)?;
    write_baseline_record(ctx, io, baseline)
}

fn write_baseline_record(ctx: &mut ServerContext, io: &mut dyn MsgWrite, baseline: &SpawnBaseline) -> Result<()> {
    write_entity_delta(ctx, io, baseline.entnum, &baseline.delta_state, false)?;
    let nonzero = ctx.kex_edict_nonzero_solid.get(baseline.entnum);
    ctx.kex_baseline_nonzero_solid.set(baseline.entnum, nonzero);
    Ok(())
}

fn write_frame_entity(ctx: &mut ServerContext, io: &mut dyn MsgWrite, delta: &FrameEntityDelta) -> Result<()> {
    if delta.remove {
        write_entity_bits(io, U_REMOVE, delta.newnum)?;
        let nonzero = ctx.kex_baseline_nonzero_solid.get(delta.newnum);
        ctx.kex_edict_nonzero_solid.set(delta.newnum, nonzero);
        return Ok(());
    }
    if delta.newnum == 0 {
        io.write_u8(0)?;
        return io.write_u8(0);
    }
    let nonzero = ctx.kex_edict_nonzero_solid.get(delta.newnum);
    write_entity_delta(ctx, io, delta.newnum, &delta.entity_delta, nonzero)
}

fn write_entity_delta(
    ctx: &mut ServerContext,
    io: &mut dyn MsgWrite,
    entnum: u16,
    delta: &EntityStateDelta,
    nonzero_solid: bool,
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
    if flags.contains(EsdFlags::SKINNUM) {
        bits |= choose_width_flags(delta.skinnum, U_SKIN8, U_SKIN16, true);
    }
    if flags.contains(EsdFlags::FRAME) {
        bits |= if delta.frame >= 256 { U_FRAME16 } else { U_FRAME8 };
    }
    if flags.intersects(EsdFlags::EFFECTS | EsdFlags::EFFECTS_MORE) {
        if delta.effects_more != 0 {
            bits |= U_KEX_EFFECTS64 | choose_width_flags(delta.effects_more, U_EFFECTS8, U_EFFECTS16, true);
        } else {
            bits |= choose_width_flags(delta.effects, U_EFFECTS8, U_EFFECTS16, true);
        }
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
        (EsdFlags::ALPHA, U_ALPHA),
        (EsdFlags::SCALE, U_SCALE),
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
        bits |= U_MODEL16;
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
    if bits & U_KEX_EFFECTS64 != 0 {
        io.write_u32(delta.effects)?;
        write_sized(io, bits, U_EFFECTS8, U_EFFECTS16, delta.effects_more)?;
    } else {
        write_sized(io, bits, U_EFFECTS8, U_EFFECTS16, delta.effects)?;
    }
    write_sized(io, bits, U_RENDERFX8, U_RENDERFX16, delta.renderfx)?;

    let mut nonzero_solid = nonzero_solid;
    if bits & U_SOLID != 0 {
        io.write_u32(delta.solid)?;
        nonzero_solid = delta.solid != 0;
        ctx.kex_edict_nonzero_solid.set(entnum, nonzero_solid);
    }

    let high_precision = ctx.connect.protocol != Protocol::KexDemos || nonzero_solid;
    let write_coord = |io: &mut dyn MsgWrite, coord: Coord| {
        if high_precision {
            io.write_float(coord.to_float())
        } else {
            io.write_i16(coord.to_short())
        }
    };
    for (c, flag) in [U_ORIGIN1, U_ORIGIN2, U_ORIGIN3].into_iter().enumerate() {
        if bits & flag != 0 {
            write_coord(io, delta.origin.current(c))?;
        }
    }
    if bits & U_OLDORIGIN != 0 {
        for &coord in &delta.old_origin {
            write_coord(io, coord)?;
        }
    }
    for (c, flag) in [U_ANGLE1, U_ANGLE2, U_ANGLE3].into_iter().enumerate() {
        if bits & flag != 0 {
            io.write_float(delta.angle.values[c].to_float())?;
        }
    }

    if bits & U_SOUND != 0 {
        let mut word = delta.sound & 0x3fff;
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
    }
    if bits & U_EVENT != 0 {
        io.write_u8(delta.event)?;
    }
    if bits & U_ALPHA != 0 {
        io.write_u8(delta.alpha)?;
    }
    if bits & U_SCALE != 0 {
        io.write_u8(delta.scale)?;
    }
    Ok(())
}

fn write_playerstate(io: &mut dyn MsgWrite, ps: &PlayerStateDelta) -> Result<()> {
    let bits = ps.delta_bits;
    if bits.contains(PsdFlags::CLIENTNUM) || ps.fog.is_set() {
        return Err(Error::BadData);
    }

    let mut flags = 0u32;
    if bits.contains(PsdFlags::PM_TYPE) {
        flags |= PS_M_TYPE;
    }
    if ps.pm_origin.differs_int() != 0 {
        flags |= PS_M_ORIGIN;
    }
    if ps.pm_velocity.differs_int() != 0 {
        flags |= PS_M_VELOCITY;
    }
    for (flag, bit) in [
        (PsdFlags::PM_TIME, PS_M_TIME),
        (PsdFlags::PM_FLAGS, PS_M_FLAGS),
        (PsdFlags::PM_GRAVITY, PS_M_GRAVITY),
        (PsdFlags::PM_DELTA_ANGLES, PS_M_DELTA_ANGLES),
        (PsdFlags::VIEWOFFSET, PS_VIEWOFFSET),
        (PsdFlags::KICKANGLES, PS_KICKANGLES),
        (PsdFlags::FOV, PS_FOV),
        (PsdFlags::RDFLAGS, PS_RDFLAGS),
    ] {
        if bits.contains(flag) {
            flags |= bit;
        }
    }
    if ps.viewangles.delta_bits != 0 {
        flags |= PS_VIEWANGLES;
    }
    if ps.blend.delta_bits != 0 {
        flags |= PS_BLEND;
    }
    if ps.damage_blend.delta_bits != 0 {
        flags |= PS_KEX_DAMAGE_BLEND;
    }
    if bits.intersects(PsdFlags::GUNINDEX | PsdFlags::GUNSKIN) {
        if ps.gunindex > Q2PRO_GUNINDEX_MASK {
            return Err(Error::BadData);
        }
        flags |= PS_WEAPONINDEX;
    }
    if bits.intersects(PsdFlags::GUNFRAME | PsdFlags::GUNRATE)
        || ps.gunoffset.delta_bits != 0
        || ps.gunangles.delta_bits != 0
    {
        flags |= PS_WEAPONFRAME;
    }
    if flags > u16::MAX as u32 {
        flags |= PS_MOREBITS;
    }

    io.write_u8(SVC_PLAYERINFO)?;
    io.write_u16(flags as u16)?;
    if flags & PS_MOREBITS != 0 {
        io.write_u16((flags >> 16) as u16)?;
    }
    if flags & PS_M_TYPE != 0 {
        io.write_u8(ps.pm_type)?;
    }
    if flags & PS_M_ORIGIN != 0 {
        for c in 0..3 {
            io.write_float(ps.pm_origin.current(c).to_float())?;
        }
    }
    if flags & PS_M_VELOCITY != 0 {
        for c in 0..3 {
            io.write_float(ps.pm_velocity.current(c).to_float())?;
        }
    }
    if flags & PS_M_TIME != 0 {
        io.write_u16(ps.pm_time)?;
    }
    if flags & PS_M_FLAGS != 0 {
        io.write_u16(ps.pm_flags)?;
    }
    if flags & PS_M_GRAVITY != 0 {
        io.write_i16(ps.pm_gravity)?;
    }
    if flags & PS_M_DELTA_ANGLES != 0 {
        for angle in &ps.pm_delta_angles {
            io.write_float(angle.to_float())?;
        }
    }
    if flags & PS_VIEWOFFSET != 0 {
        for offset in &ps.viewoffset {
            io.write_i16(offset.to_repro_viewoffset())?;
        }
        io.write_i8(ps.pm_viewheight)?;
    }
    if flags & PS_VIEWANGLES != 0 {
        for angle in &ps.viewangles.values {
            io.write_float(angle.to_float())?;
        }
    }
    if flags & PS_KICKANGLES != 0 {
        for angle in &ps.kick_angles {
            io.write_i16(angle.to_repro_kick_angle())?;
        }
    }
    if flags & PS_WEAPONINDEX != 0 {
        io.write_u16(ps.gunindex | ((ps.gunskin as u16) << Q2PRO_GUNINDEX_BITS))?;
    }
    if flags & PS_WEAPONFRAME != 0 {
        let mut gunbits = 0u8;
        for (c, bit) in [GUNBIT_OFFSET_X, GUNBIT_OFFSET_Y, GUNBIT_OFFSET_Z].into_iter().enumerate() {
            if ps.gunoffset.has(c) {
                gunbits |= bit;
            }
        }
        for (c, bit) in [GUNBIT_ANGLES_X, GUNBIT_ANGLES_Y, GUNBIT_ANGLES_Z].into_iter().enumerate() {
            if ps.gunangles.has(c) {
                gunbits |= bit;
            }
        }
        if bits.contains(PsdFlags::GUNRATE) {
            gunbits |= GUNBIT_GUNRATE;
        }
        io.write_u16(((gunbits as u16) << 9) | (ps.gunframe & 0x1ff))?;
        for c in 0..3 {
            if ps.gunoffset.has(c) {
                io.write_float(ps.gunoffset.values[c].to_float())?;
            }
        }
        for c in 0..3 {
            if ps.gunangles.has(c) {
                io.write_float(ps.gunangles.values[c].to_float())?;
            }
        }
        if gunbits & GUNBIT_GUNRATE != 0 {
            io.write_u8(ps.gunrate)?;
        }
    }
    if flags & PS_BLEND != 0 {
        for color in &ps.blend.values {
            io.write_u8(color.to_byte())?;
        }
    }
    if flags & PS_FOV != 0 {
        io.write_u8(ps.fov)?;
    }
    if flags & PS_RDFLAGS != 0 {
        io.write_u8(ps.rdflags)?;
    }

    for half in 0..2 {
        let statbits = (ps.statbits >> (half * 32)) as u32;
        io.write_u32(statbits)?;
        for i in 0..32 {
            if statbits & (1 << i) != 0 {
                io.write_i16(ps.stats[half * 32 + i])?;
            }
        }
    }

    if flags & PS_KEX_DAMAGE_BLEND != 0 {
        for color in &ps.damage_blend.values {
            io.write_u8(color.to_byte())?;
        }
    }
    Ok(())
}

fn write_frame(io: &mut dyn MsgWrite, frame: &Frame) -> Result<()> {
    let areabits_len = u8::try_from(frame.areabits.len()).map_err(|_| Error::BadData)?;
    io.write_u8(SVC_FRAME)?;
    io.write_i32(frame.serverframe)?;
    io.write_i32(frame.deltaframe)?;
    io.write_u8(frame.suppress_count)?;
    io.write_u8(areabits_len)?;
    io.write_raw(&frame.areabits)?;
    write_playerstate(io, &frame.playerstate)?;
    io.write_u8(SVC_PACKETENTITIES)
}

/// With deflate enabled the gamestate goes out as blasts, otherwise as
/// individual configstring and baseline messages.
pub(crate) fn write_gamestate(ctx: &mut ServerContext, io: &mut dyn MsgWrite, gamestate: &Gamestate) -> Result<()> {
    if !ctx.features.enable_deflate {
        return server::write_gamestate_records(ctx, io, gamestate, KEX_WRITE_GAMESTATE_BASELINE_SIZE, write_spawnbaseline);
    }

    let num_configstrings = gamestate.configstrings.len();
    if ctx.gamestate_pos < num_configstrings {
        let mut blast = begin_blast_write(io)?;
        while ctx.gamestate_pos < num_configstrings {
            let cs = &gamestate.configstrings[ctx.gamestate_pos];
            if blast.available() < 2 + cs.value.len() + 1 {
                end_blast_write(io, blast, SVC_RR_CONFIGBLAST)?;
                return Err(Error::NotEnoughPacketSpace);
            }
            blast.write_u16(cs.index)?;
            blast.write_string(&cs.value)?;
            ctx.gamestate_pos += 1;
        }
        end_blast_write(io, blast, SVC_RR_CONFIGBLAST)?;
    }

    let baselines = &gamestate.spawnbaselines;
    if ctx.gamestate_pos - num_configstrings < baselines.len() {
        let mut blast = begin_blast_write(io)?;
        while ctx.gamestate_pos - num_configstrings < baselines.len() {
            let baseline = &baselines[ctx.gamestate_pos - num_configstrings];
            if blast.available() < KEX_WRITE_GAMESTATE_BASELINE_SIZE {
                end_blast_write(io, blast, SVC_RR_SPAWNBASELINEBLAST)?;
                return Err(Error::NotEnoughPacketSpace);
            }
            write_baseline_record(ctx, &mut blast, baseline)?;
            ctx.gamestate_pos += 1;
        }
        end_blast_write(io, blast, SVC_RR_SPAWNBASELINEBLAST)?;
    }

    ctx.gamestate_pos = 0;
    Ok(())
}

fn begin_blast_write(io: &mut dyn MsgWrite) -> Result<DeflateWriter> {
    let available = io.available();
    if available < MIN_COMPRESS_SIZE {
        return Err(Error::NotEnoughPacketSpace);
    }
    Ok(DeflateWriter::with_header((available - ZPACKET_HEADER_SIZE).min(u16::MAX as usize)))
}

/// Write out a blast; an empty one is dropped.
fn end_blast_write(io: &mut dyn MsgWrite, blast: DeflateWriter, cmd: u8) -> Result<()> {
    if blast.uncompressed_len() == 0 {
        return Ok(());
    }
    let (uncompressed_len, data) = blast.finish()?;
    trace!(cmd, uncompressed_len, compressed_len = data.len(), "blast write");
    let compressed_len = u16::try_from(data.len()).map_err(|_| Error::NotEnoughPacketSpace)?;
    let uncompressed_len = u16::try_from(uncompressed_len).map_err(|_| Error::NotEnoughPacketSpace)?;
    io.write_u8(cmd)?;
    io.write_u16(compressed_len)?;
    io.write_u16(uncompressed_len)?;
    io.write_raw(&data)
}

pub(crate) fn server_read(_ctx: &mut ServerContext, io: &mut dyn MsgRead) -> Result<ClcMessage> {
    let command = io.read_u8()?;
    trace!(command = names::clc_name(Protocol::Kex, command), "kex read");
    match command {
        CLC_NOP => Ok(ClcMessage::Nop),
        CLC_USERINFO => Ok(ClcMessage::Userinfo(io.read_string()?)),
        CLC_STRINGCMD => Ok(ClcMessage::StringCmd(io.read_string()?)),
        _ => Err(Error::BadCommand),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect::ConnectInfo;
    use crate::io::{MsgReader, SizeBuf};
    use crate::server::ServerInfo;
    use crate::svc::{MaybeDiffCoords, Sound};

    fn connected(protocol: Protocol) -> (ServerContext, ClientContext) {
        let info = ServerInfo {
            game_api: GameApi::Rerelease,
            ..Default::default()
        };
        let connect = ConnectInfo {
            protocol,
            ..Default::default()
        };
        let mut server = ServerContext::new(&info, &connect).unwrap();
        let mut serverdata = ServerData {
            servercount: 9,
            clientnum: 1,
            gamedir: "baseq2".into(),
            levelname: "q2dm1".into(),
            ..Default::default()
        };
        serverdata.kex.server_fps = 40;
        server.fill_serverdata(&mut serverdata);

        let mut buf = Vec::new();
        server.write(&mut buf, &SvcMessage::ServerData(serverdata)).unwrap();
        let mut client = ClientContext::new();
        let SvcMessage::ServerData(read) = client.read(&mut MsgReader::new(&buf)).unwrap() else {
            panic!("expected serverdata");
        };
        assert_eq!(read.kex.server_fps, 40);
        assert_eq!(read.levelname, "q2dm1");
        (server, client)
    }

    fn entity(newnum: u16, delta: EntityStateDelta) -> SvcMessage {
        SvcMessage::FrameEntityDelta(FrameEntityDelta {
            newnum,
            remove: false,
            entity_delta: delta,
        })
    }

    fn moved_to(x: f32) -> EntityStateDelta {
        EntityStateDelta {
            origin: MaybeDiffCoords::Write {
                prev: [Coord::Float(0.0); 3],
                current: [Coord::Float(x), Coord::Float(0.0), Coord::Float(0.0)],
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_serverdata_protocols() {
        let (_, client) = connected(Protocol::Kex);
        assert_eq!(client.protocol(), Some(Protocol::Kex));
        assert_eq!(client.features.server_game_api, GameApi::Rerelease);
        assert!(client.features.has_solid32);

        let (_, client) = connected(Protocol::KexDemos);
        assert_eq!(client.protocol(), Some(Protocol::KexDemos));
    }

    #[test]
    fn test_split_screen_rejected() {
        let serverdata = ServerData {
            protocol: PROTOCOL_KEX,
            clientnum: -2,
            ..Default::default()
        };
        let mut buf = Vec::new();
        write_serverdata(&mut buf, &serverdata).unwrap();
        let mut client = ClientContext::new();
        assert_eq!(client.read(&mut MsgReader::new(&buf)), Err(Error::BadData));
    }

    #[test]
    fn test_float_entity_round_trip() {
        let (mut server, mut client) = connected(Protocol::Kex);
        let mut delta = EntityStateDelta {
            delta_bits: EsdFlags::EFFECTS | EsdFlags::EFFECTS_MORE | EsdFlags::SKINNUM | EsdFlags::SCALE,
            effects: 0x8000_0001,
            effects_more: 0x200,
            skinnum: 0x0102_0304,
            scale: 32,
            ..moved_to(-1234.75)
        };
        delta.angle.set_comp(1, Angle::Float(90.0));

        let mut buf = Vec::new();
        server.write(&mut buf, &entity(600, delta)).unwrap();
        client.state = ReadState::FrameEntities;
        let SvcMessage::FrameEntityDelta(read) = client.read(&mut MsgReader::new(&buf)).unwrap() else {
            panic!("expected an entity");
        };
        assert_eq!(read.newnum, 600);
        let read = read.entity_delta;
        assert_eq!(read.delta_bits, delta.delta_bits);
        assert_eq!(read.effects, 0x8000_0001);
        assert_eq!(read.effects_more, 0x200);
        assert_eq!(read.skinnum, 0x0102_0304);
        assert_eq!(read.scale, 32);
        assert_eq!(read.angle.values[1], Angle::Float(90.0));
        assert_eq!(read.origin.current(0), Coord::Float(-1234.75));
    }

    #[test]
    fn test_demo_origin_precision_follows_solid() {
        let (mut server, mut client) = connected(Protocol::KexDemos);
        client.state = ReadState::FrameEntities;

        // no solid: 12.3 fixed point
        let mut buf = Vec::new();
        server.write(&mut buf, &entity(5, moved_to(100.5))).unwrap();
        // bits, entnum, one short
        assert_eq!(buf.len(), 4);
        let SvcMessage::FrameEntityDelta(read) = client.read(&mut MsgReader::new(&buf)).unwrap() else {
            panic!("expected an entity");
        };
        assert_eq!(read.entity_delta.origin.current(0), Coord::Int(804));

        // a solid entity switches to floats, for this and later deltas
        let solid = EntityStateDelta {
            delta_bits: EsdFlags::SOLID,
            solid: 0x1234,
            ..moved_to(200.25)
        };
        buf.clear();
        server.write(&mut buf, &entity(5, solid)).unwrap();
        server.write(&mut buf, &entity(5, moved_to(300.125))).unwrap();
        let mut r = MsgReader::new(&buf);
        let SvcMessage::FrameEntityDelta(read) = client.read(&mut r).unwrap() else {
            panic!("expected an entity");
        };
        assert_eq!(read.entity_delta.origin.current(0), Coord::Float(200.25));
        let SvcMessage::FrameEntityDelta(read) = client.read(&mut r).unwrap() else {
            panic!("expected an entity");
        };
        assert_eq!(read.entity_delta.origin.current(0), Coord::Float(300.125));

        // removal falls back to the baseline, which had no solid
        buf.clear();
        let removed = FrameEntityDelta {
            newnum: 5,
            remove: true,
            ..Default::default()
        };
        server.write(&mut buf, &SvcMessage::FrameEntityDelta(removed)).unwrap();
        server.write(&mut buf, &entity(5, moved_to(8.0))).unwrap();
        let mut r = MsgReader::new(&buf);
        assert!(matches!(client.read(&mut r).unwrap(), SvcMessage::FrameEntityDelta(d) if d.remove));
        let SvcMessage::FrameEntityDelta(read) = client.read(&mut r).unwrap() else {
            panic!("expected an entity");
        };
        assert_eq!(read.entity_delta.origin.current(0), Coord::Int(64));
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_playerstate_round_trip() {
        let (mut server, mut client) = connected(Protocol::Kex);
        let mut frame = Frame {
            serverframe: 100,
            deltaframe: 98,
            suppress_count: 2,
            areabits: vec![1, 2, 3],
            ..Default::default()
        };
        let ps = &mut frame.playerstate;
        ps.pm_origin = MaybeDiffCoords::Write {
            prev: [Coord::Float(0.0); 3],
            current: [Coord::Float(1.5), Coord::Float(-2.0), Coord::Float(24.25)],
        };
        ps.delta_bits = PsdFlags::GUNFRAME | PsdFlags::GUNRATE | PsdFlags::VIEWOFFSET | PsdFlags::PM_VIEWHEIGHT;
        ps.gunframe = 300;
        ps.gunrate = 20;
        ps.pm_viewheight = 22;
        ps.viewoffset = [
            SmallOffset::ReproViewoffset(0),
            SmallOffset::ReproViewoffset(16),
            SmallOffset::ReproViewoffset(352),
        ];
        ps.gunoffset.set_comp(2, SmallOffset::Float(-1.5));
        ps.gunangles.set_comp(0, SmallAngle::Float(3.25));
        ps.damage_blend.set_comp(0, Color::Byte(255));
        ps.statbits = 1 | (1 << 40);
        ps.stats[0] = 100;
        ps.stats[40] = -3;

        let mut buf = Vec::new();
        server.write(&mut buf, &SvcMessage::Frame(Box::new(frame.clone()))).unwrap();
        server.write(&mut buf, &SvcMessage::FrameEntityDelta(Default::default())).unwrap();

        let mut r = MsgReader::new(&buf);
        let SvcMessage::Frame(read) = client.read(&mut r).unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(read.serverframe, 100);
        assert_eq!(read.deltaframe, 98);
        assert_eq!(read.suppress_count, 2);
        assert_eq!(read.areabits, vec![1, 2, 3]);
        let rps = &read.playerstate;
        let mut origin = [0.0; 3];
        rps.pm_origin.apply_float(&mut origin);
        assert_eq!(origin, [1.5, -2.0, 24.25]);
        assert_eq!(rps.gunframe, 300);
        assert_eq!(rps.gunrate, 20);
        assert_eq!(rps.pm_viewheight, 22);
        assert_eq!(rps.viewoffset, frame.playerstate.viewoffset);
        assert_eq!(rps.gunoffset.delta_bits, 4);
        assert_eq!(rps.gunoffset.values[2], SmallOffset::Float(-1.5));
        assert_eq!(rps.gunangles.values[0], SmallAngle::Float(3.25));
        assert_eq!(rps.damage_blend.delta_bits, 0xf);
        assert_eq!(rps.statbits, 1 | (1 << 40));
        assert_eq!(rps.stats[40], -3);
        assert_eq!(client.read(&mut r).unwrap(), SvcMessage::FrameEntityDelta(Default::default()));
        assert_eq!(client.state, ReadState::Steady);
        assert_eq!(client.read(&mut r), Err(Error::NoMoreInput));
    }

    #[test]
    fn test_clientnum_rejected() {
        let mut ps = PlayerStateDelta::default();
        ps.delta_bits = PsdFlags::CLIENTNUM;
        assert_eq!(write_playerstate(&mut Vec::new(), &ps), Err(Error::BadData));
    }

    #[test]
    fn test_frame_requires_playerinfo() {
        let (_, mut client) = connected(Protocol::Kex);
        let mut buf = vec![SVC_FRAME];
        buf.extend_from_slice(&[0; 9]);
        buf.push(0);
        buf.push(SVC_PACKETENTITIES);
        assert_eq!(client.read(&mut MsgReader::new(&buf)), Err(Error::BadData));
    }

    #[test]
    fn test_large_entity_sound() {
        let (mut server, mut client) = connected(Protocol::Kex);
        let sound = Sound {
            flags: SND_ENT | SND_POS,
            index: 300,
            entity: 0x2100,
            channel: 5,
            pos: [Coord::Float(1.0), Coord::Float(2.0), Coord::Float(3.5)],
            ..Default::default()
        };
        let mut buf = Vec::new();
        server.write(&mut buf, &SvcMessage::Sound(sound)).unwrap();
        let SvcMessage::Sound(read) = client.read(&mut MsgReader::new(&buf)).unwrap() else {
            panic!("expected a sound");
        };
        assert_eq!(read.entity, 0x2100);
        assert_eq!(read.channel, 5);
        assert_eq!(read.pos, sound.pos);
    }

    #[test]
    fn test_blast_gamestate_round_trip() {
        let (mut server, mut client) = connected(Protocol::Kex);
        server.features.enable_deflate = true;
        let gamestate = Gamestate {
            configstrings: (0..40)
                .map(|i| ConfigString {
                    index: i,
                    value: format!("models/item{i}/tris.md2"),
                })
                .collect(),
            spawnbaselines: (1..20)
                .map(|entnum| SpawnBaseline {
                    entnum,
                    delta_state: EntityStateDelta {
                        delta_bits: EsdFlags::MODELINDEX | EsdFlags::SOLID,
                        modelindex: entnum,
                        solid: entnum as u32 % 2,
                        ..moved_to(entnum as f32 * 8.0)
                    },
                })
                .collect(),
        };
        let mut buf = SizeBuf::new(1400);
        server.write_gamestate(&mut buf, &gamestate).unwrap();
        assert_eq!(buf.as_bytes()[0], SVC_RR_CONFIGBLAST);

        let mut r = MsgReader::new(buf.as_bytes());
        for cs in &gamestate.configstrings {
            assert_eq!(client.read(&mut r).unwrap(), SvcMessage::ConfigString(cs.clone()));
        }
        for baseline in &gamestate.spawnbaselines {
            let SvcMessage::SpawnBaseline(read) = client.read(&mut r).unwrap() else {
                panic!("expected a baseline");
            };
            assert_eq!(read.entnum, baseline.entnum);
            assert_eq!(read.delta_state.modelindex, baseline.entnum);
        }
        assert_eq!(client.read(&mut r), Err(Error::NoMoreInput));
        assert_eq!(client.state, ReadState::Steady);
        assert!(client.kex_baseline_nonzero_solid.get(1));
        assert!(!client.kex_baseline_nonzero_solid.get(2));
    }

    #[test]
    fn test_gamestate_records_without_deflate() {
        let (mut server, mut client) = connected(Protocol::Kex);
        let gamestate = Gamestate {
            configstrings: vec![ConfigString {
                index: 1,
                value: "sky".into(),
            }],
            spawnbaselines: vec![SpawnBaseline {
                entnum: 3,
                delta_state: EntityStateDelta {
                    delta_bits: EsdFlags::MODELINDEX,
                    modelindex: 7,
                    ..Default::default()
                },
            }],
        };
        let mut buf = SizeBuf::new(1400);
        server.write_gamestate(&mut buf, &gamestate).unwrap();
        assert_eq!(buf.as_bytes()[0], SVC_CONFIGSTRING);
        let mut r = MsgReader::new(buf.as_bytes());
        assert_eq!(
            client.read(&mut r).unwrap(),
            SvcMessage::ConfigString(gamestate.configstrings[0].clone())
        );
        assert_eq!(client.read(&mut r).unwrap(), SvcMessage::SpawnBaseline(gamestate.spawnbaselines[0]));
    }

    #[test]
    fn test_oversized_blast_rejected() {
        let mut blast = DeflateWriter::with_header(u16::MAX as usize);
        for _ in 0..80 {
            blast.write_raw(&[0u8; 1000]).unwrap();
        }
        let mut buf = Vec::new();
        assert_eq!(
            end_blast_write(&mut buf, blast, SVC_RR_CONFIGBLAST),
            Err(Error::NotEnoughPacketSpace)
        );
        assert!(buf.is_empty());
    }
}
