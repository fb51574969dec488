// q2repro.rs -- protocol 1038 (Q2rePRO)
//
// Q2rePRO carries rerelease games over a Q2PRO style connection. Positions
// are sent as floats, view and gun offsets with more precision, and the
// rerelease messages (damage, fog, points of interest) are understood.
// Clients of this protocol have no up move.

use tracing::{debug, trace};

use crate::bits::{BitReader, BitWriter};
use crate::clc::{BatchMove, ClcMessage, CmdFlags, Move, MoveDelta, UserinfoDelta};
use crate::client::{ClientContext, ReadState};
use crate::common;
use crate::coords::{Angle, Coord, SmallAngle, SmallOffset};
use crate::debug as names;
use crate::defs::*;
use crate::entity::{choose_width_flags, read_entity_bits, read_sized, write_entity_bits, write_sized};
use crate::error::{Error, Result};
use crate::io::{MsgRead, MsgWrite};
use crate::protocol::{GameApi, MulticastProtocol, Protocol, PROTOCOL_Q2REPRO};
use crate::q2pro::{self, GamestateStreams, Q2proLayout};
use crate::r1q2;
use crate::server::{self, Gamestate, ServerContext};
use crate::svc::{
    EntityStateDelta, EsdFlags, Frame, FrameEntityDelta, PlayerStateDelta, PsdFlags, ServerData, SpawnBaseline,
    SvcMessage,
};
use crate::tent;

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
    let flags = io.read_u16()?;
    serverdata.strafejump_hack = flags & Q2PRO_PF_STRAFEJUMP_HACK != 0;
    serverdata.q2pro.qw_mode = flags & Q2PRO_PF_QW_MODE != 0;
    serverdata.q2pro.waterjump_hack = flags & Q2PRO_PF_WATERJUMP_HACK != 0;
    serverdata.q2pro.extensions = flags & Q2PRO_PF_EXTENSIONS != 0;
    serverdata.q2pro.extensions_v2 = flags & Q2PRO_PF_EXTENSIONS_2 != 0;
    serverdata.q2repro.game3_compat = flags & Q2REPRO_PF_GAME3_COMPAT != 0;
    serverdata.q2repro.server_fps = io.read_u8()?;
    if serverdata.attractloop {
        // demo recorders stored a rounded-down rate
        let fps = serverdata.q2repro.server_fps as u32;
        serverdata.q2repro.server_fps = (((fps + 5) / 10) * 10).min(u8::MAX as u32) as u8;
    }

    ctx.begin_protocol(Protocol::Q2repro, serverdata.protocol_version);
    let features = &mut ctx.features;
    features.batch_move = true;
    features.userinfo_delta = true;
    features.has_clientnum = true;
    features.has_solid32 = true;
    features.server_game_api = if !serverdata.q2repro.game3_compat {
        GameApi::Rerelease
    } else if serverdata.q2pro.extensions_v2 {
        GameApi::Q2proExtendedV2
    } else if serverdata.q2pro.extensions {
        GameApi::Q2proExtended
    } else {
        GameApi::Vanilla
    };
    debug!(game_api = ?features.server_game_api, fps = serverdata.q2repro.server_fps, "q2repro serverdata");
    Ok(serverdata)
}

/// Read the next message. `None` means a sub-stream or compressed block
/// started or ended and the caller should read again.
pub(crate) fn client_read(ctx: &mut ClientContext, io: &mut dyn MsgRead) -> Result<Option<SvcMessage>> {
    let game_api = ctx.features.server_game_api;
    match ctx.state {
        ReadState::FrameEntities => return read_frame_entity(ctx, io).map(Some),
        ReadState::GamestateConfigStrings | ReadState::ConfigStringStream => {
            return q2pro::read_streamed_configstring(ctx, io, game_api.max_configstrings())
        }
        ReadState::BaselineStream => return q2pro::read_streamed_baseline(ctx, io, read_entity_delta),
        _ => {}
    }

    let command = io.read_u8()?;
    trace!(command = names::svc_name(Protocol::Q2repro, command), "q2repro read");
    let msg = match command {
        SVC_NOP => SvcMessage::Nop,
        SVC_DISCONNECT => SvcMessage::Disconnect,
        SVC_RECONNECT => SvcMessage::Reconnect,
        SVC_PRINT => SvcMessage::Print(common::read_print(io)?),
        SVC_CENTERPRINT => SvcMessage::CenterPrint(io.read_string()?),
        SVC_STUFFTEXT => SvcMessage::StuffText(io.read_string()?),
        SVC_SERVERDATA => {
            let protocol = io.read_i32()?;
            if protocol != PROTOCOL_Q2REPRO {
                return Err(Error::BadData);
            }
            SvcMessage::ServerData(continue_serverdata(ctx, io, protocol)?)
        }
        SVC_CONFIGSTRING => SvcMessage::ConfigString(common::read_configstring(io)?),
        SVC_SOUND => SvcMessage::Sound(common::read_sound(io, MulticastProtocol::Float, false)?),
        SVC_SPAWNBASELINE => SvcMessage::SpawnBaseline(read_baseline(io)?),
        SVC_TEMP_ENTITY => SvcMessage::TempEntity(tent::read_temp_entity(io, MulticastProtocol::Float, game_api)?),
        SVC_MUZZLEFLASH => SvcMessage::MuzzleFlash(common::read_muzzleflash(io, MZ_SILENCED)?),
        SVC_MUZZLEFLASH2 => SvcMessage::MuzzleFlash2(q2pro::read_muzzleflash2(io, &Q2proLayout::client(ctx))?),
        SVC_RR_MUZZLEFLASH3 => SvcMessage::MuzzleFlash2(common::read_muzzleflash3(io)?),
        SVC_DOWNLOAD => SvcMessage::Download(common::read_download(io)?),
        SVC_FRAME => read_frame(ctx, io)?,
        SVC_INVENTORY => SvcMessage::Inventory(common::read_inventory(io)?),
        SVC_LAYOUT => SvcMessage::Layout(io.read_string()?),
        SVC_RR_DAMAGE => SvcMessage::Damage(common::read_damage(io)?),
        SVC_RR_FOG => SvcMessage::Fog(common::read_fog(io)?),
        SVC_RR_POI => SvcMessage::Poi(common::read_poi(io)?),
        SVC_RR_HELP_PATH => SvcMessage::HelpPath(common::read_help_path(io)?),
        SVC_RR_ACHIEVEMENT => SvcMessage::Achievement(io.read_string()?),
        SVC_Q2REPRO_ZPACKET => {
            ctx.read_zpacket(io)?;
            return Ok(None);
        }
        SVC_Q2REPRO_ZDOWNLOAD => SvcMessage::Download(q2pro::read_zdownload(ctx, io)?),
        SVC_Q2REPRO_SETTING => SvcMessage::Setting(r1q2::read_svc_setting(io)?),
        SVC_Q2REPRO_GAMESTATE => {
            ctx.state = ReadState::GamestateConfigStrings;
            return Ok(None);
        }
        SVC_Q2REPRO_CONFIGSTRINGSTREAM => {
            ctx.state = ReadState::ConfigStringStream;
            return Ok(None);
        }
        SVC_Q2REPRO_BASELINESTREAM => {
            ctx.state = ReadState::BaselineStream;
            return Ok(None);
        }
        _ => return Err(Error::BadCommand),
    };
    Ok(Some(msg))
}

fn read_baseline(io: &mut dyn MsgRead) -> Result<SpawnBaseline> {
    let (bits, entnum) = read_entity_bits(io)?;
    trace!(entnum, bits = %names::EntityBits(bits), "baseline");
    Ok(SpawnBaseline {
        entnum,
        delta_state: read_entity_delta(io, bits)?,
    })
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
    } else {
        delta.entity_delta = read_entity_delta(io, bits)?;
    }
    Ok(SvcMessage::FrameEntityDelta(delta))
}

fn read_entity_delta(io: &mut dyn MsgRead, bits: u64) -> Result<EntityStateDelta> {
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
            delta.origin.set_read(c, Coord::Float(io.read_float()?), false);
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
        for coord in &mut delta.old_origin {
            *coord = Coord::Float(io.read_float()?);
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

fn read_playerstate(io: &mut dyn MsgRead, extraflags: u32) -> Result<PlayerStateDelta> {
    let flags = io.read_u16()? as u32;
    trace!(flags = %names::PlayerBits(flags), extraflags, "playerstate");
    let mut ps = PlayerStateDelta::default();

    if flags & PS_M_TYPE != 0 {
        ps.delta_bits |= PsdFlags::PM_TYPE;
        ps.pm_type = io.read_u8()?;
    }
    if flags & PS_M_ORIGIN != 0 {
        ps.pm_origin.set_read(0, Coord::Float(io.read_float()?), false);
        ps.pm_origin.set_read(1, Coord::Float(io.read_float()?), false);
    }
    if extraflags & EPS_M_ORIGIN2 != 0 {
        ps.pm_origin.set_read(2, Coord::Float(io.read_float()?), false);
    }
    if flags & PS_M_VELOCITY != 0 {
        ps.pm_velocity.set_read(0, Coord::Float(io.read_float()?), false);
        ps.pm_velocity.set_read(1, Coord::Float(io.read_float()?), false);
    }
    if extraflags & EPS_M_VELOCITY2 != 0 {
        ps.pm_velocity.set_read(2, Coord::Float(io.read_float()?), false);
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
            *angle = Angle::Short(io.read_i16()?);
        }
    }
    if flags & PS_VIEWOFFSET != 0 {
        ps.delta_bits |= PsdFlags::VIEWOFFSET;
        for offset in &mut ps.viewoffset {
            *offset = SmallOffset::ReproViewoffset(io.read_i16()?);
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
        ps.delta_bits |= PsdFlags::GUNFRAME;
        ps.gunframe = io.read_u16()?;
    }
    if extraflags & EPS_GUNOFFSET != 0 {
        for c in 0..3 {
            ps.gunoffset.set_comp(c, SmallOffset::ReproGunoffset(io.read_i16()?));
        }
    }
    if extraflags & EPS_GUNANGLES != 0 {
        for c in 0..3 {
            ps.gunangles.set_comp(c, SmallAngle::ReproGunangle(io.read_i16()?));
        }
    }
    if flags & PS_BLEND != 0 {
        q2pro::read_blends(io, &mut ps)?;
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
        ps.statbits = io.read_u64()?;
        for i in 0..MAX_STATS {
            if ps.statbits & (1 << i) != 0 {
                ps.stats[i] = io.read_i16()?;
            }
        }
    }
    if extraflags & EPS_GUNRATE != 0 {
        ps.delta_bits |= PsdFlags::GUNRATE;
        ps.gunrate = io.read_u8()?;
    }
    if flags & PS_RR_VIEWHEIGHT != 0 {
        ps.delta_bits |= PsdFlags::PM_VIEWHEIGHT;
        ps.pm_viewheight = io.read_i8()?;
    }
    if extraflags & EPS_CLIENTNUM != 0 {
        ps.delta_bits |= PsdFlags::CLIENTNUM;
        ps.clientnum = io.read_i16()?;
    }
    Ok(ps)
}

fn read_frame(ctx: &mut ClientContext, io: &mut dyn MsgRead) -> Result<SvcMessage> {
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
        q2pro_frame_flags: io.read_u8()? & 0x0f,
        ..Default::default()
    };
    let extraflags = io.read_u8()? as u32;
    let areabits_len = io.read_u8()? as usize;
    frame.areabits = io.read_data(areabits_len)?;
    frame.playerstate = read_playerstate(io, extraflags)?;
    ctx.state = ReadState::FrameEntities;
    Ok(SvcMessage::Frame(Box::new(frame)))
}

pub(crate) fn client_write(_ctx: &mut ClientContext, io: &mut dyn MsgWrite, msg: &ClcMessage) -> Result<()> {
    trace!(message = msg.name(), "q2repro write");
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

fn write_move(io: &mut dyn MsgWrite, mv: &Move) -> Result<()> {
    io.write_u8(CLC_MOVE)?;
    io.write_i32(mv.lastframe)?;
    for delta in &mv.moves {
        write_move_delta(io, delta)?;
    }
    Ok(())
}

fn write_move_delta(io: &mut dyn MsgWrite, delta: &MoveDelta) -> Result<()> {
    if delta.delta_bits.contains(CmdFlags::MOVE_UP) {
        return Err(Error::BadData);
    }
    let bits = delta.delta_bits.bits() as u8;
    io.write_u8(bits)?;
    for c in 0..3 {
        if bits & (CM_ANGLE1 << c) != 0 {
            io.write_i16(delta.angles[c].to_short())?;
        }
    }
    for c in 0..2 {
        if bits & (CM_FORWARD << c) != 0 {
            io.write_i16(delta.moves[c].to_short_unscaled())?;
        }
    }
    if bits & CM_BUTTONS != 0 {
        io.write_u8(delta.buttons)?;
    }
    if bits & CM_IMPULSE != 0 {
        io.write_u8(delta.impulse)?;
    }
    io.write_u8(delta.msec)?;
    io.write_u8(delta.lightlevel)
}

fn write_batch_move(io: &mut dyn MsgWrite, mv: &BatchMove) -> Result<()> {
    let num_dups = mv.num_dups as usize;
    if num_dups >= MAX_BATCH_MOVE_FRAMES {
        return Err(Error::BadData);
    }
    if mv.lastframe == -1 {
        io.write_u8(CLC_Q2PRO_MOVE_NODELTA)?;
    } else {
        io.write_u8(CLC_Q2PRO_MOVE_BATCHED)?;
        io.write_i32(mv.lastframe)?;
    }
    io.write_u8(mv.num_dups)?;

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
    if delta.delta_bits.contains(CmdFlags::MOVE_UP) {
        return Err(Error::BadData);
    }
    let mut bits = (delta.delta_bits.bits() & 0x5f) as u8;
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
    for c in 0..2 {
        if bits & (CM_FORWARD << c) != 0 {
            out.write(delta.moves[c].to_short_unscaled() as i32, -10)?;
        }
    }
    if bits & CM_BUTTONS != 0 {
        out.write(delta.buttons as i32, 8)?;
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
    ctx.protocol_version = ctx.connect.version;
    ctx.zpacket_cmd = SVC_Q2REPRO_ZPACKET;
    let features = &mut ctx.features;
    features.enable_deflate = ctx.connect.has_zlib;
    features.download_compress_raw = true;
    features.has_beam_old_origin_fix = true;
    features.playerstate_clientnum = true;
    Ok(())
}

pub(crate) fn fill_serverdata(ctx: &ServerContext, serverdata: &mut ServerData) {
    serverdata.protocol = PROTOCOL_Q2REPRO;
    serverdata.protocol_version = ctx.protocol_version;
    serverdata.q2pro.extensions = ctx.info.game_api >= GameApi::Q2proExtended;
    serverdata.q2pro.extensions_v2 = ctx.info.game_api >= GameApi::Q2proExtendedV2;
    serverdata.q2repro.game3_compat = ctx.info.game_api != GameApi::Rerelease;
}

pub(crate) fn server_write(ctx: &mut ServerContext, io: &mut dyn MsgWrite, msg: &SvcMessage) -> Result<()> {
    trace!(message = msg.name(), "q2repro write");
    match msg {
        SvcMessage::Nop => io.write_u8(SVC_NOP),
        SvcMessage::Disconnect => io.write_u8(SVC_DISCONNECT),
        SvcMessage::Reconnect => io.write_u8(SVC_RECONNECT),
        SvcMessage::Sound(sound) => common::write_sound(io, MulticastProtocol::Float, false, sound),
        SvcMessage::Print(print) => common::write_print(io, print),
        SvcMessage::StuffText(text) => common::write_string_cmd(io, SVC_STUFFTEXT, text),
        SvcMessage::ServerData(serverdata) => write_serverdata(io, serverdata),
        SvcMessage::ConfigString(cs) => common::write_configstring(io, cs),
        SvcMessage::SpawnBaseline(baseline) => write_spawnbaseline(ctx, io, baseline),
        SvcMessage::CenterPrint(text) => common::write_string_cmd(io, SVC_CENTERPRINT, text),
        SvcMessage::Download(download) => q2pro::write_download(io, SVC_Q2REPRO_ZDOWNLOAD, download),
        SvcMessage::Frame(frame) => write_frame(io, frame),
        SvcMessage::FrameEntityDelta(delta) => write_frame_entity(io, delta),
        SvcMessage::Layout(text) => common::write_string_cmd(io, SVC_LAYOUT, text),
        SvcMessage::Setting(setting) => r1q2::write_svc_setting(io, SVC_Q2REPRO_SETTING, setting),
        // layouts and fog usually come from game code, but demos need them
        SvcMessage::Fog(fog) => common::write_fog(io, fog),
        _ => Err(Error::NotImplemented),
    }
}

fn write_serverdata(io: &mut dyn MsgWrite, serverdata: &ServerData) -> Result<()> {
    io.write_u8(SVC_SERVERDATA)?;
    io.write_i32(PROTOCOL_Q2REPRO)?;
    io.write_i32(serverdata.servercount)?;
    io.write_bool(serverdata.attractloop)?;
    io.write_string(&serverdata.gamedir)?;
    io.write_i16(serverdata.clientnum)?;
    io.write_string(&serverdata.levelname)?;
    io.write_u16(serverdata.protocol_version)?;
    io.write_u8(serverdata.q2pro.server_state)?;
    let mut flags = 0u16;
    for (set, flag) in [
        (serverdata.strafejump_hack, Q2PRO_PF_STRAFEJUMP_HACK),
        (serverdata.q2pro.qw_mode, Q2PRO_PF_QW_MODE),
        (serverdata.q2pro.waterjump_hack, Q2PRO_PF_WATERJUMP_HACK),
        (serverdata.q2pro.extensions, Q2PRO_PF_EXTENSIONS),
        (serverdata.q2pro.extensions_v2, Q2PRO_PF_EXTENSIONS_2),
        (serverdata.q2repro.game3_compat, Q2REPRO_PF_GAME3_COMPAT),
    ] {
        if set {
            flags |= flag;
        }
    }
    io.write_u16(flags)?;
    io.write_u8(serverdata.q2repro.server_fps)
}

fn write_spawnbaseline(_ctx: &mut ServerContext, io: &mut dyn MsgWrite, baseline: &SpawnBaseline) -> Result<()> {
    io.write_u8(SVC_SPAWNBASELINE)?;
    write_entity_delta(io, baseline.entnum, &baseline.delta_state)
}

fn write_entity_delta(io: &mut dyn MsgWrite, entnum: u16, delta: &EntityStateDelta) -> Result<()> {
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
    if bits & (U_ANGLE1 | U_ANGLE2 | U_ANGLE3) != 0 {
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
    write_sized(io, bits, U_EFFECTS8, U_EFFECTS16, delta.effects)?;
    write_sized(io, bits, U_RENDERFX8, U_RENDERFX16, delta.renderfx)?;

    for (c, flag) in [U_ORIGIN1, U_ORIGIN2, U_ORIGIN3].into_iter().enumerate() {
        if bits & flag != 0 {
            io.write_float(delta.origin.current(c).to_float())?;
        }
    }
    for (c, flag) in [U_ANGLE1, U_ANGLE2, U_ANGLE3].into_iter().enumerate() {
        if bits & flag != 0 {
            io.write_i16(delta.angle.values[c].to_short())?;
        }
    }
    if bits & U_OLDORIGIN != 0 {
        for coord in &delta.old_origin {
            io.write_float(coord.to_float())?;
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

fn write_frame_entity(io: &mut dyn MsgWrite, delta: &FrameEntityDelta) -> Result<()> {
    if delta.remove {
        return write_entity_bits(io, U_REMOVE, delta.newnum);
    }
    if delta.newnum == 0 {
        io.write_u8(0)?;
        return io.write_u8(0);
    }
    write_entity_delta(io, delta.newnum, &delta.entity_delta)
}

/// Write a player state; returns the extra flags byte of the frame header.
fn write_playerstate(io: &mut dyn MsgWrite, ps: &PlayerStateDelta) -> Result<u8> {
    let bits = ps.delta_bits;
    let mut flags = 0u32;
    let mut extraflags = 0u32;

    // rerelease fog travels in its own message
    if ps.fog.is_set() {
        return Err(Error::BadData);
    }

    let origin_differs = ps.pm_origin.differs_float();
    let velocity_differs = ps.pm_velocity.differs_float();
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
    for (flag, bit) in [
        (PsdFlags::PM_TIME, PS_M_TIME),
        (PsdFlags::PM_FLAGS, PS_M_FLAGS),
        (PsdFlags::PM_GRAVITY, PS_M_GRAVITY),
        (PsdFlags::PM_DELTA_ANGLES, PS_M_DELTA_ANGLES),
        (PsdFlags::PM_VIEWHEIGHT, PS_RR_VIEWHEIGHT),
        (PsdFlags::VIEWOFFSET, PS_VIEWOFFSET),
        (PsdFlags::KICKANGLES, PS_KICKANGLES),
        (PsdFlags::FOV, PS_FOV),
        (PsdFlags::RDFLAGS, PS_RDFLAGS),
        (PsdFlags::GUNFRAME, PS_WEAPONFRAME),
    ] {
        if bits.contains(flag) {
            flags |= bit;
        }
    }
    if ps.viewangles.delta_bits & 3 != 0 {
        flags |= PS_VIEWANGLES;
    }
    if ps.viewangles.delta_bits & 4 != 0 {
        extraflags |= EPS_VIEWANGLE2;
    }
    if ps.blend.delta_bits != 0 || ps.damage_blend.delta_bits != 0 {
        flags |= PS_BLEND;
    }
    if bits.intersects(PsdFlags::GUNINDEX | PsdFlags::GUNSKIN) {
        if ps.gunindex > Q2PRO_GUNINDEX_MASK {
            return Err(Error::BadData);
        }
        flags |= PS_WEAPONINDEX;
    }
    if ps.gunoffset.delta_bits != 0 {
        extraflags |= EPS_GUNOFFSET;
    }
    if ps.gunangles.delta_bits != 0 {
        extraflags |= EPS_GUNANGLES;
    }
    if ps.statbits != 0 {
        extraflags |= EPS_STATS;
    }
    if bits.contains(PsdFlags::GUNRATE) {
        extraflags |= EPS_GUNRATE;
    }
    if bits.contains(PsdFlags::CLIENTNUM) {
        extraflags |= EPS_CLIENTNUM;
    }

    io.write_u16(flags as u16)?;
    if flags & PS_M_TYPE != 0 {
        io.write_u8(ps.pm_type)?;
    }
    if flags & PS_M_ORIGIN != 0 {
        io.write_float(ps.pm_origin.current(0).to_float())?;
        io.write_float(ps.pm_origin.current(1).to_float())?;
    }
    if extraflags & EPS_M_ORIGIN2 != 0 {
        io.write_float(ps.pm_origin.current(2).to_float())?;
    }
    if flags & PS_M_VELOCITY != 0 {
        io.write_float(ps.pm_velocity.current(0).to_float())?;
        io.write_float(ps.pm_velocity.current(1).to_float())?;
    }
    if extraflags & EPS_M_VELOCITY2 != 0 {
        io.write_float(ps.pm_velocity.current(2).to_float())?;
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
            io.write_i16(angle.to_short())?;
        }
    }
    if flags & PS_VIEWOFFSET != 0 {
        for offset in &ps.viewoffset {
            io.write_i16(offset.to_repro_viewoffset())?;
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
            io.write_i16(angle.to_repro_kick_angle())?;
        }
    }
    if flags & PS_WEAPONINDEX != 0 {
        io.write_u16(ps.gunindex | ((ps.gunskin as u16) << Q2PRO_GUNINDEX_BITS))?;
    }
    if flags & PS_WEAPONFRAME != 0 {
        io.write_u16(ps.gunframe)?;
    }
    if extraflags & EPS_GUNOFFSET != 0 {
        for offset in &ps.gunoffset.values {
            io.write_i16(offset.to_repro_gunoffset())?;
        }
    }
    if extraflags & EPS_GUNANGLES != 0 {
        for angle in &ps.gunangles.values {
            io.write_i16(angle.to_repro_gunangle())?;
        }
    }
    if flags & PS_BLEND != 0 {
        q2pro::write_blends(io, &ps.blend, &ps.damage_blend)?;
    }
    if flags & PS_FOV != 0 {
        io.write_u8(ps.fov)?;
    }
    if flags & PS_RDFLAGS != 0 {
        io.write_u8(ps.rdflags)?;
    }
    if extraflags & EPS_STATS != 0 {
        io.write_u64(ps.statbits)?;
        for i in 0..MAX_STATS {
            if ps.statbits & (1 << i) != 0 {
                io.write_i16(ps.stats[i])?;
            }
        }
    }
    if extraflags & EPS_GUNRATE != 0 {
        io.write_u8(ps.gunrate)?;
    }
    if flags & PS_RR_VIEWHEIGHT != 0 {
        io.write_i8(ps.pm_viewheight)?;
    }
    if extraflags & EPS_CLIENTNUM != 0 {
        io.write_i16(ps.clientnum)?;
    }
    Ok(extraflags as u8)
}

fn write_frame(io: &mut dyn MsgWrite, frame: &Frame) -> Result<()> {
    let areabits_len = u8::try_from(frame.areabits.len()).map_err(|_| Error::BadData)?;
    // the extra flags go in front of the player state
    let mut playerstate = Vec::with_capacity(160);
    let extraflags = write_playerstate(&mut playerstate, &frame.playerstate)?;

    let offset = if frame.deltaframe == -1 {
        31
    } else {
        frame.serverframe - frame.deltaframe
    };
    if !(0..=31).contains(&offset) {
        return Err(Error::BadData);
    }

    io.write_u8(SVC_FRAME)?;
    io.write_i32((frame.serverframe & 0x07ff_ffff) | (offset << 27))?;
    io.write_u8(frame.q2pro_frame_flags)?;
    io.write_u8(extraflags)?;
    io.write_u8(areabits_len)?;
    io.write_raw(&frame.areabits)?;
    io.write_raw(&playerstate)
}

/// Q2rePRO always streams the gamestate.
pub(crate) fn write_gamestate(ctx: &mut ServerContext, io: &mut dyn MsgWrite, gamestate: &Gamestate) -> Result<()> {
    let streams = GamestateStreams {
        configstring_cmd: SVC_Q2REPRO_CONFIGSTRINGSTREAM,
        baseline_cmd: SVC_Q2REPRO_BASELINESTREAM,
        max_configstrings: ctx.info.game_api.max_configstrings(),
        baseline_size: Q2REPRO_WRITE_GAMESTATE_BASELINE_SIZE,
    };
    server::maybe_zpacket(ctx, io, |ctx, io| {
        q2pro::write_gamestate_streams(ctx, io, gamestate, &streams, |io, baseline| {
            write_entity_delta(io, baseline.entnum, &baseline.delta_state)
        })
    })
}

pub(crate) fn server_read(_ctx: &mut ServerContext, io: &mut dyn MsgRead) -> Result<ClcMessage> {
    let command = io.read_u8()?;
    trace!(command = names::clc_name(Protocol::Q2repro, command), "q2repro read");
    match command {
        CLC_NOP => Ok(ClcMessage::Nop),
        CLC_MOVE => {
            let mut mv = Move {
                lastframe: io.read_i32()?,
                ..Default::default()
            };
            for delta in &mut mv.moves {
                *delta = read_move_delta(io)?;
            }
            Ok(ClcMessage::Move(mv))
        }
        CLC_USERINFO => Ok(ClcMessage::Userinfo(io.read_string()?)),
        CLC_STRINGCMD => Ok(ClcMessage::StringCmd(io.read_string()?)),
        CLC_R1Q2_SETTING => Ok(ClcMessage::Setting(r1q2::read_clc_setting(io)?)),
        CLC_Q2PRO_MOVE_NODELTA | CLC_Q2PRO_MOVE_BATCHED => Ok(ClcMessage::BatchMove(Box::new(read_batch_move(
            io,
            command == CLC_Q2PRO_MOVE_NODELTA,
        )?))),
        CLC_Q2PRO_USERINFO_DELTA => Ok(ClcMessage::UserinfoDelta(UserinfoDelta {
            name: io.read_string()?,
            value: io.read_string()?,
        })),
        _ => Err(Error::BadCommand),
    }
}

fn read_move_delta(io: &mut dyn MsgRead) -> Result<MoveDelta> {
    let bits = io.read_u8()?;
    if bits & CM_UP != 0 {
        return Err(Error::BadData);
    }
    let mut delta = MoveDelta {
        delta_bits: CmdFlags::from_bits_truncate(bits as u32),
        ..Default::default()
    };
    for c in 0..3 {
        if bits & (CM_ANGLE1 << c) != 0 {
            delta.angles[c] = Angle::Short(io.read_i16()?);
        }
    }
    for c in 0..2 {
        if bits & (CM_FORWARD << c) != 0 {
            delta.moves[c] = Coord::from_int_unscaled(io.read_i16()? as i32);
        }
    }
    if bits & CM_BUTTONS != 0 {
        delta.buttons = io.read_u8()?;
    }
    if bits & CM_IMPULSE != 0 {
        delta.impulse = io.read_u8()?;
    }
    delta.msec = io.read_u8()?;
    delta.lightlevel = io.read_u8()?;
    Ok(delta)
}

fn read_batch_move(io: &mut dyn MsgRead, nodelta: bool) -> Result<BatchMove> {
    let lastframe = if nodelta { -1 } else { io.read_i32()? };
    let num_dups = io.read_u8()?;
    if num_dups as usize >= MAX_BATCH_MOVE_FRAMES {
        return Err(Error::BadData);
    }
    let mut mv = BatchMove {
        num_dups,
        lastframe,
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
    if bits & CM_UP != 0 {
        return Err(Error::BadData);
    }

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
    for c in 0..2 {
        if bits & (CM_FORWARD << c) != 0 {
            delta.moves[c] = Coord::from_int_unscaled(input.read(-10)?);
        }
    }
    if bits & CM_BUTTONS != 0 {
        delta.buttons = input.read(8)? as u8;
    }
    if bits & CM_IMPULSE != 0 {
        delta.msec = input.read(8)? as u8;
    }
    delta.delta_bits = CmdFlags::from_bits_truncate((bits & !CM_IMPULSE) as u32);
    Ok(delta)
}
