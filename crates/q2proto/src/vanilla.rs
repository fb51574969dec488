// vanilla.rs -- protocol 34 (and the protocol 26 demo format)
//
// The original game's wire format. Coordinates travel as 1/8 unit shorts,
// entity angles as bytes, and only 32 stats exist. Everything newer is an
// extension of this layout.

use tracing::trace;

use crate::checksum::block_sequence_crc_byte;
use crate::clc::{ClcMessage, CmdFlags, Move, MoveDelta};
use crate::client::{ClientContext, ReadState};
use crate::common;
use crate::coords::{Angle, Color, Coord, SmallAngle, SmallOffset};
use crate::debug;
use crate::defs::*;
use crate::entity::{read_entity_bits, read_short_entity_delta, write_entity_bits, write_short_entity_delta};
use crate::error::{Error, Result};
use crate::io::{MsgRead, MsgWrite};
use crate::protocol::{GameApi, MulticastProtocol, Protocol, PROTOCOL_OLD_DEMO, PROTOCOL_VANILLA};
use crate::server::{self, Gamestate, ServerContext};
use crate::svc::{
    Frame, FrameEntityDelta, PlayerStateDelta, PsdFlags, ServerData, SpawnBaseline, SvcMessage,
};
use crate::tent;

// ============================================================
// Client side
// ============================================================

/// Finish reading a serverdata message after its protocol number and set up `ctx`.
pub(crate) fn continue_serverdata(ctx: &mut ClientContext, io: &mut dyn MsgRead, protocol: i32) -> Result<ServerData> {
    let serverdata = ServerData {
        protocol,
        servercount: io.read_i32()?,
        attractloop: io.read_bool()?,
        gamedir: io.read_string()?,
        clientnum: io.read_i16()?,
        levelname: io.read_string()?,
        ..Default::default()
    };

    let server_protocol = if protocol == PROTOCOL_OLD_DEMO {
        Protocol::OldDemo
    } else {
        Protocol::Vanilla
    };
    ctx.begin_protocol(server_protocol, 0);
    ctx.features.has_upmove = true;
    Ok(serverdata)
}

pub(crate) fn client_read(ctx: &mut ClientContext, io: &mut dyn MsgRead) -> Result<SvcMessage> {
    if ctx.state == ReadState::FrameEntities {
        return read_short_frame_entity(ctx, io, false);
    }

    let command = io.read_u8()?;
    trace!(command = debug::svc_name(Protocol::Vanilla, command), "vanilla read");
    match command {
        SVC_NOP => Ok(SvcMessage::Nop),
        SVC_DISCONNECT => Ok(SvcMessage::Disconnect),
        SVC_RECONNECT => Ok(SvcMessage::Reconnect),
        SVC_PRINT => Ok(SvcMessage::Print(common::read_print(io)?)),
        SVC_CENTERPRINT => Ok(SvcMessage::CenterPrint(io.read_string()?)),
        SVC_STUFFTEXT => Ok(SvcMessage::StuffText(io.read_string()?)),
        SVC_SERVERDATA => {
            let protocol = io.read_i32()?;
            if protocol != PROTOCOL_OLD_DEMO && protocol != PROTOCOL_VANILLA {
                return Err(Error::BadData);
            }
            Ok(SvcMessage::ServerData(continue_serverdata(ctx, io, protocol)?))
        }
        SVC_CONFIGSTRING => Ok(SvcMessage::ConfigString(common::read_configstring(io)?)),
        SVC_SOUND => Ok(SvcMessage::Sound(common::read_sound(io, MulticastProtocol::Short, false)?)),
        SVC_SPAWNBASELINE => Ok(SvcMessage::SpawnBaseline(read_short_baseline(io, false)?)),
        SVC_TEMP_ENTITY => Ok(SvcMessage::TempEntity(tent::read_temp_entity(
            io,
            MulticastProtocol::Short,
            ctx.features.server_game_api,
        )?)),
        SVC_MUZZLEFLASH => Ok(SvcMessage::MuzzleFlash(common::read_muzzleflash(io, MZ_SILENCED)?)),
        SVC_MUZZLEFLASH2 => Ok(SvcMessage::MuzzleFlash2(common::read_muzzleflash(io, 0)?)),
        SVC_DOWNLOAD => Ok(SvcMessage::Download(common::read_download(io)?)),
        SVC_FRAME => read_frame(ctx, io),
        SVC_INVENTORY => Ok(SvcMessage::Inventory(common::read_inventory(io)?)),
        SVC_LAYOUT => Ok(SvcMessage::Layout(io.read_string()?)),
        _ => Err(Error::BadCommand),
    }
}

/// Read one entity of a frame in the short coordinate format; shared with R1Q2.
pub(crate) fn read_short_frame_entity(ctx: &mut ClientContext, io: &mut dyn MsgRead, solid32: bool) -> Result<SvcMessage> {
    let (bits, newnum) = read_entity_bits(io)?;
    if bits & U_MOREBITS4 != 0 {
        return Err(Error::BadData);
    }
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
        delta.entity_delta = read_short_entity_delta(io, bits, solid32)?;
    }
    Ok(SvcMessage::FrameEntityDelta(delta))
}

/// Read a spawnbaseline body in the short coordinate format; shared with R1Q2.
pub(crate) fn read_short_baseline(io: &mut dyn MsgRead, solid32: bool) -> Result<SpawnBaseline> {
    let (bits, entnum) = read_entity_bits(io)?;
    if bits & U_MOREBITS4 != 0 {
        return Err(Error::BadData);
    }
    trace!(entnum, bits = %debug::EntityBits(bits), "baseline");
    Ok(SpawnBaseline {
        entnum,
        delta_state: read_short_entity_delta(io, bits, solid32)?,
    })
}

fn read_playerstate(io: &mut dyn MsgRead) -> Result<PlayerStateDelta> {
    let flags = io.read_u16()? as u32;
    trace!(flags = %debug::PlayerBits(flags), "playerstate");
    let mut ps = PlayerStateDelta::default();

    if flags & PS_M_TYPE != 0 {
        ps.delta_bits |= PsdFlags::PM_TYPE;
        ps.pm_type = io.read_u8()?;
    }
    if flags & PS_M_ORIGIN != 0 {
        for c in 0..3 {
            ps.pm_origin.set_read(c, Coord::from_short(io.read_i16()?), false);
        }
    }
    if flags & PS_M_VELOCITY != 0 {
        for c in 0..3 {
            ps.pm_velocity.set_read(c, Coord::from_short(io.read_i16()?), false);
        }
    }
    if flags & PS_M_TIME != 0 {
        ps.delta_bits |= PsdFlags::PM_TIME;
        ps.pm_time = io.read_u8()? as u16;
    }
    if flags & PS_M_FLAGS != 0 {
        ps.delta_bits |= PsdFlags::PM_FLAGS;
        ps.pm_flags = io.read_u8()? as u16;
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
        for c in 0..3 {
            ps.viewangles.set_comp(c, Angle::Short(io.read_i16()?));
        }
    }
    if flags & PS_KICKANGLES != 0 {
        ps.delta_bits |= PsdFlags::KICKANGLES;
        for c in 0..3 {
            ps.kick_angles[c] = SmallAngle::Char(io.read_i8()?);
        }
    }
    if flags & PS_WEAPONINDEX != 0 {
        ps.delta_bits |= PsdFlags::GUNINDEX;
        ps.gunindex = io.read_u8()? as u16;
    }
    if flags & PS_WEAPONFRAME != 0 {
        ps.delta_bits |= PsdFlags::GUNFRAME;
        ps.gunframe = io.read_u8()? as u16;
        for c in 0..3 {
            ps.gunoffset.set_comp(c, SmallOffset::Char(io.read_i8()?));
        }
        for c in 0..3 {
            ps.gunangles.set_comp(c, SmallAngle::Char(io.read_i8()?));
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

    ps.statbits = io.read_u32()? as u64;
    for i in 0..32 {
        if ps.statbits & (1 << i) != 0 {
            ps.stats[i] = io.read_i16()?;
        }
    }
    Ok(ps)
}

fn read_frame(ctx: &mut ClientContext, io: &mut dyn MsgRead) -> Result<SvcMessage> {
    let mut frame = Frame {
        serverframe: io.read_i32()?,
        deltaframe: io.read_i32()?,
        ..Default::default()
    };
    // protocol 26 demos have no suppress count
    if ctx.protocol() != Some(Protocol::OldDemo) {
        frame.suppress_count = io.read_u8()?;
    }
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

pub(crate) fn client_write(_ctx: &mut ClientContext, io: &mut dyn MsgWrite, msg: &ClcMessage) -> Result<()> {
    trace!(message = msg.name(), "vanilla write");
    match msg {
        ClcMessage::Nop => io.write_u8(CLC_NOP),
        ClcMessage::Move(mv) => write_move(io, mv),
        ClcMessage::Userinfo(userinfo) => common::write_string_cmd(io, CLC_USERINFO, userinfo),
        ClcMessage::StringCmd(cmd) => common::write_string_cmd(io, CLC_STRINGCMD, cmd),
        _ => Err(Error::BadCommand),
    }
}

pub(crate) fn write_move_delta(io: &mut dyn MsgWrite, delta: &MoveDelta) -> Result<()> {
    let bits = delta.delta_bits.bits() as u8;
    io.write_u8(bits)?;
    for c in 0..3 {
        if bits & (CM_ANGLE1 << c) != 0 {
            io.write_i16(delta.angles[c].to_short())?;
        }
    }
    for c in 0..3 {
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

fn write_move(io: &mut dyn MsgWrite, mv: &Move) -> Result<()> {
    // The checksum byte covers everything after it.
    let mut body = Vec::with_capacity(64);
    body.write_i32(mv.lastframe)?;
    for delta in &mv.moves {
        write_move_delta(&mut body, delta)?;
    }
    io.write_u8(CLC_MOVE)?;
    io.write_u8(block_sequence_crc_byte(&body, mv.sequence))?;
    io.write_raw(&body)
}

// ============================================================
// Server side
// ============================================================

pub(crate) fn init_server(ctx: &mut ServerContext) -> Result<()> {
    if ctx.info.game_api != GameApi::Vanilla {
        return Err(Error::GametypeUnsupported);
    }
    Ok(())
}

pub(crate) fn fill_serverdata(_ctx: &ServerContext, serverdata: &mut ServerData) {
    serverdata.protocol = PROTOCOL_VANILLA;
}

pub(crate) fn server_write(ctx: &mut ServerContext, io: &mut dyn MsgWrite, msg: &SvcMessage) -> Result<()> {
    trace!(message = msg.name(), "vanilla write");
    match msg {
        SvcMessage::Nop => io.write_u8(SVC_NOP),
        SvcMessage::Disconnect => io.write_u8(SVC_DISCONNECT),
        SvcMessage::Reconnect => io.write_u8(SVC_RECONNECT),
        SvcMessage::Sound(sound) => common::write_sound(io, MulticastProtocol::Short, false, sound),
        SvcMessage::Print(print) => common::write_print(io, print),
        SvcMessage::StuffText(text) => common::write_string_cmd(io, SVC_STUFFTEXT, text),
        SvcMessage::ServerData(serverdata) => write_serverdata(ctx, io, serverdata),
        SvcMessage::ConfigString(cs) => common::write_configstring(io, cs),
        SvcMessage::SpawnBaseline(baseline) => write_spawnbaseline(ctx, io, baseline),
        SvcMessage::CenterPrint(text) => common::write_string_cmd(io, SVC_CENTERPRINT, text),
        SvcMessage::Download(download) => common::write_download(io, download),
        SvcMessage::Frame(frame) => write_frame(ctx, io, frame),
        SvcMessage::FrameEntityDelta(delta) => write_short_frame_entity(io, delta, false),
        SvcMessage::Layout(layout) => common::write_string_cmd(io, SVC_LAYOUT, layout),
        // muzzleflashes, temp entities and inventory come from game code
        _ => Err(Error::NotImplemented),
    }
}

fn write_serverdata(ctx: &mut ServerContext, io: &mut dyn MsgWrite, serverdata: &ServerData) -> Result<()> {
    // Writing a protocol 26 serverdata switches to the old demo frame layout.
    let protocol = if serverdata.protocol == PROTOCOL_OLD_DEMO {
        PROTOCOL_OLD_DEMO
    } else {
        PROTOCOL_VANILLA
    };
    ctx.old_demo_frames = protocol == PROTOCOL_OLD_DEMO;

    io.write_u8(SVC_SERVERDATA)?;
    io.write_i32(protocol)?;
    io.write_i32(serverdata.servercount)?;
    io.write_bool(serverdata.attractloop)?;
    io.write_string(&serverdata.gamedir)?;
    io.write_i16(serverdata.clientnum)?;
    io.write_string(&serverdata.levelname)
}

pub(crate) fn write_spawnbaseline(_ctx: &mut ServerContext, io: &mut dyn MsgWrite, baseline: &SpawnBaseline) -> Result<()> {
    io.write_u8(SVC_SPAWNBASELINE)?;
    write_short_entity_delta(io, baseline.entnum, &baseline.delta_state, false)
}

/// Write one entity of a frame in the short coordinate format; shared with R1Q2.
pub(crate) fn write_short_frame_entity(io: &mut dyn MsgWrite, delta: &FrameEntityDelta, solid32: bool) -> Result<()> {
    if delta.remove {
        return write_entity_bits(io, U_REMOVE, delta.newnum);
    }
    if delta.newnum == 0 {
        // bits and entity number
        io.write_u8(0)?;
        return io.write_u8(0);
    }
    write_short_entity_delta(io, delta.newnum, &delta.entity_delta, solid32)
}

fn write_playerstate(io: &mut dyn MsgWrite, ps: &PlayerStateDelta) -> Result<()> {
    let bits = ps.delta_bits;
    if bits.intersects(PsdFlags::PM_VIEWHEIGHT | PsdFlags::GUNSKIN | PsdFlags::CLIENTNUM | PsdFlags::GUNRATE)
        || ps.damage_blend.delta_bits != 0
        || ps.statbits > u32::MAX as u64
        || ps.fog.is_set()
    {
        return Err(Error::BadData);
    }

    let mut flags = 0u16;
    if bits.contains(PsdFlags::PM_TYPE) {
        flags |= PS_M_TYPE as u16;
    }
    if ps.pm_origin.differs_int() != 0 {
        flags |= PS_M_ORIGIN as u16;
    }
    if ps.pm_velocity.differs_int() != 0 {
        flags |= PS_M_VELOCITY as u16;
    }
    if bits.contains(PsdFlags::PM_TIME) {
        if ps.pm_time > 0xff {
            return Err(Error::BadData);
        }
        flags |= PS_M_TIME as u16;
    }
    if bits.contains(PsdFlags::PM_FLAGS) {
        if ps.pm_flags > 0xff {
            return Err(Error::BadData);
        }
        flags |= PS_M_FLAGS as u16;
    }
    if bits.contains(PsdFlags::PM_GRAVITY) {
        flags |= PS_M_GRAVITY as u16;
    }
    if bits.contains(PsdFlags::PM_DELTA_ANGLES) {
        flags |= PS_M_DELTA_ANGLES as u16;
    }
    if bits.contains(PsdFlags::VIEWOFFSET) {
        flags |= PS_VIEWOFFSET as u16;
    }
    if ps.viewangles.delta_bits != 0 {
        flags |= PS_VIEWANGLES as u16;
    }
    if bits.contains(PsdFlags::KICKANGLES) {
        flags |= PS_KICKANGLES as u16;
    }
    if ps.blend.delta_bits != 0 {
        flags |= PS_BLEND as u16;
    }
    if bits.contains(PsdFlags::FOV) {
        flags |= PS_FOV as u16;
    }
    if bits.contains(PsdFlags::RDFLAGS) {
        flags |= PS_RDFLAGS as u16;
    }
    if bits.contains(PsdFlags::GUNINDEX) {
        if ps.gunindex > 0xff {
            return Err(Error::BadData);
        }
        flags |= PS_WEAPONINDEX as u16;
    }
    if bits.contains(PsdFlags::GUNFRAME) || ps.gunoffset.delta_bits != 0 || ps.gunangles.delta_bits != 0 {
        if ps.gunframe > 0xff {
            return Err(Error::BadData);
        }
        flags |= PS_WEAPONFRAME as u16;
    }

    io.write_u8(SVC_PLAYERINFO)?;
    io.write_u16(flags)?;
    let flags = flags as u32;

    if flags & PS_M_TYPE != 0 {
        io.write_u8(ps.pm_type)?;
    }
    if flags & PS_M_ORIGIN != 0 {
        for c in 0..3 {
            io.write_u16(ps.pm_origin.current(c).to_int() as u16)?;
        }
    }
    if flags & PS_M_VELOCITY != 0 {
        for c in 0..3 {
            io.write_u16(ps.pm_velocity.current(c).to_int() as u16)?;
        }
    }
    if flags & PS_M_TIME != 0 {
        io.write_u8(ps.pm_time as u8)?;
    }
    if flags & PS_M_FLAGS != 0 {
        io.write_u8(ps.pm_flags as u8)?;
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
        for angle in &ps.viewangles.values {
            io.write_i16(angle.to_short())?;
        }
    }
    if flags & PS_KICKANGLES != 0 {
        for angle in &ps.kick_angles {
            io.write_i8(angle.to_char())?;
        }
    }
    if flags & PS_WEAPONINDEX != 0 {
        io.write_u8(ps.gunindex as u8)?;
    }
    if flags & PS_WEAPONFRAME != 0 {
        io.write_u8(ps.gunframe as u8)?;
        for offset in &ps.gunoffset.values {
            io.write_i8(offset.to_char())?;
        }
        for angle in &ps.gunangles.values {
            io.write_i8(angle.to_char())?;
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

    io.write_u32(ps.statbits as u32)?;
    for i in 0..32 {
        if ps.statbits & (1 << i) != 0 {
            io.write_i16(ps.stats[i])?;
        }
    }
    Ok(())
}

fn write_frame(ctx: &mut ServerContext, io: &mut dyn MsgWrite, frame: &Frame) -> Result<()> {
    let areabits_len = u8::try_from(frame.areabits.len()).map_err(|_| Error::BadData)?;
    io.write_u8(SVC_FRAME)?;
    io.write_i32(frame.serverframe)?;
    io.write_i32(frame.deltaframe)?;
    if !ctx.old_demo_frames {
        io.write_u8(frame.suppress_count)?;
    }
    io.write_u8(areabits_len)?;
    io.write_raw(&frame.areabits)?;
    write_playerstate(io, &frame.playerstate)?;
    io.write_u8(SVC_PACKETENTITIES)
}

pub(crate) fn write_gamestate(ctx: &mut ServerContext, io: &mut dyn MsgWrite, gamestate: &Gamestate) -> Result<()> {
    server::write_gamestate_records(ctx, io, gamestate, VANILLA_WRITE_GAMESTATE_BASELINE_SIZE, write_spawnbaseline)
}

pub(crate) fn server_read(_ctx: &mut ServerContext, io: &mut dyn MsgRead) -> Result<ClcMessage> {
    let command = io.read_u8()?;
    trace!(command = debug::clc_name(Protocol::Vanilla, command), "vanilla read");
    match command {
        CLC_NOP => Ok(ClcMessage::Nop),
        CLC_MOVE => {
            // checksum; not verified
            io.read_u8()?;
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
        _ => Err(Error::BadCommand),
    }
}

pub(crate) fn read_move_delta(io: &mut dyn MsgRead) -> Result<MoveDelta> {
    let bits = io.read_u8()?;
    let mut delta = MoveDelta {
        delta_bits: CmdFlags::from_bits_truncate(bits as u32),
        ..Default::default()
    };
    for c in 0..3 {
        if bits & (CM_ANGLE1 << c) != 0 {
            delta.angles[c] = Angle::Short(io.read_i16()?);
        }
    }
    for c in 0..3 {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MsgReader;
    use crate::svc::EsdFlags;

    #[test]
    fn test_move_round_trip() {
        let mut mv = Move {
            lastframe: 1234,
            sequence: 77,
            ..Default::default()
        };
        mv.moves[2] = MoveDelta {
            delta_bits: CmdFlags::ANGLE1 | CmdFlags::MOVE_FORWARD | CmdFlags::BUTTONS,
            angles: [Angle::Short(0), Angle::Short(1000), Angle::Short(0)],
            moves: [Coord::from_int_unscaled(400), Coord::Int(0), Coord::Int(0)],
            buttons: 1,
            msec: 16,
            lightlevel: 100,
            ..Default::default()
        };

        let mut ctx = ClientContext::new();
        let mut buf = Vec::new();
        client_write(&mut ctx, &mut buf, &ClcMessage::Move(mv)).unwrap();
        assert_eq!(buf[0], CLC_MOVE);
        assert_eq!(buf[1], block_sequence_crc_byte(&buf[2..], 77));

        let mut server = ServerContext::new_demo(&Default::default()).unwrap().0;
        let read = server_read(&mut server, &mut MsgReader::new(&buf)).unwrap();
        let ClcMessage::Move(read) = read else {
            panic!("expected a move");
        };
        assert_eq!(read.lastframe, 1234);
        assert_eq!(read.moves[2], mv.moves[2]);
    }

    #[test]
    fn test_frame_and_entities() {
        let (mut server, _) = ServerContext::new_demo(&Default::default()).unwrap();
        let mut frame = Frame {
            serverframe: 10,
            deltaframe: -1,
            areabits: vec![0xff; 4],
            ..Default::default()
        };
        frame.playerstate.delta_bits = PsdFlags::PM_TYPE | PsdFlags::FOV;
        frame.playerstate.pm_type = 2;
        frame.playerstate.fov = 90;
        frame.playerstate.statbits = 0b101;
        frame.playerstate.stats[0] = 100;
        frame.playerstate.stats[2] = -3;

        let mut entity = FrameEntityDelta {
            newnum: 5,
            ..Default::default()
        };
        entity.entity_delta.delta_bits = EsdFlags::EVENT;
        entity.entity_delta.event = 1;

        let mut buf = Vec::new();
        server_write(&mut server, &mut buf, &SvcMessage::Frame(Box::new(frame.clone()))).unwrap();
        server_write(&mut server, &mut buf, &SvcMessage::FrameEntityDelta(entity)).unwrap();
        server_write(&mut server, &mut buf, &SvcMessage::FrameEntityDelta(Default::default())).unwrap();

        let mut client = ClientContext::new();
        client.begin_protocol(Protocol::Vanilla, 0);
        let mut r = MsgReader::new(&buf);
        let SvcMessage::Frame(read) = client.read(&mut r).unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(read.serverframe, 10);
        assert_eq!(read.areabits, frame.areabits);
        assert_eq!(read.playerstate.pm_type, 2);
        assert_eq!(read.playerstate.fov, 90);
        assert_eq!(read.playerstate.stats[2], -3);
        assert_eq!(client.read(&mut r).unwrap(), SvcMessage::FrameEntityDelta(entity));
        assert_eq!(client.read(&mut r).unwrap(), SvcMessage::FrameEntityDelta(Default::default()));
        assert_eq!(client.read(&mut r), Err(Error::NoMoreInput));
    }

    #[test]
    fn test_unsupported_playerstate_fields() {
        let mut ps = PlayerStateDelta::default();
        ps.delta_bits = PsdFlags::CLIENTNUM;
        let mut buf = Vec::new();
        assert_eq!(write_playerstate(&mut buf, &ps), Err(Error::BadData));

        let mut ps = PlayerStateDelta::default();
        ps.statbits = 1 << 40;
        assert_eq!(write_playerstate(&mut buf, &ps), Err(Error::BadData));
    }

    #[test]
    fn test_bad_command() {
        let mut ctx = ClientContext::new();
        ctx.begin_protocol(Protocol::Vanilla, 0);
        assert_eq!(ctx.read(&mut MsgReader::new(&[SVC_RR_FOG])), Err(Error::BadCommand));
    }
}
