// extdemo.rs -- Q2PRO extended demo formats (3434-3436)
//
// Demos recorded by Q2PRO for extended games. Entities use the Q2PRO
// layout, but frames follow the vanilla structure: explicit delta frame,
// playerinfo and packetentities markers, and no extra flag bits. All three
// components of origin, velocity and view angles travel together.

use tracing::trace;

use crate::client::{ClientContext, ReadState};
use crate::common;
use crate::coords::{Angle, Color, SmallAngle, SmallOffset};
use crate::debug;
use crate::defs::*;
use crate::error::{Error, Result};
use crate::io::{MsgRead, MsgWrite};
use crate::protocol::{
    GameApi, Protocol, PROTOCOL_Q2PRO_DEMO_EXT, PROTOCOL_Q2PRO_DEMO_EXT_CURRENT, PROTOCOL_Q2PRO_DEMO_EXT_LIMITS_2,
    PROTOCOL_Q2PRO_DEMO_EXT_PLAYERFOG, PROTOCOL_VERSION_Q2PRO_BEAM_ORIGIN, PROTOCOL_VERSION_Q2PRO_CURRENT,
    PROTOCOL_VERSION_Q2PRO_EXTENDED_LIMITS, PROTOCOL_VERSION_Q2PRO_EXTENDED_LIMITS_2, PROTOCOL_VERSION_Q2PRO_PLAYERFOG,
    PROTOCOL_VERSION_Q2PRO_ZLIB_DOWNLOADS,
};
use crate::q2pro::{self, Q2proLayout};
use crate::r1q2;
use crate::server::{self, Gamestate, ServerContext};
use crate::svc::{Frame, PlayerStateDelta, PsdFlags, ServerData, SpawnBaseline, SvcMessage};
use crate::tent;

// ============================================================
// Client side
// ============================================================

pub(crate) fn continue_serverdata(ctx: &mut ClientContext, io: &mut dyn MsgRead, protocol: i32) -> Result<ServerData> {
    let extensions_v2 = protocol >= PROTOCOL_Q2PRO_DEMO_EXT_LIMITS_2;
    let playerfog = protocol >= PROTOCOL_Q2PRO_DEMO_EXT_PLAYERFOG;
    let mut serverdata = ServerData {
        protocol,
        servercount: io.read_i32()?,
        attractloop: io.read_bool()?,
        gamedir: io.read_string()?,
        clientnum: io.read_i16()?,
        levelname: io.read_string()?,
        ..Default::default()
    };
    serverdata.protocol_version = if playerfog {
        PROTOCOL_VERSION_Q2PRO_PLAYERFOG
    } else if extensions_v2 {
        PROTOCOL_VERSION_Q2PRO_EXTENDED_LIMITS_2
    } else {
        PROTOCOL_VERSION_Q2PRO_EXTENDED_LIMITS
    };
    // ss_game
    serverdata.q2pro.server_state = 2;
    serverdata.q2pro.extensions = true;
    serverdata.q2pro.extensions_v2 = extensions_v2;

    let server_protocol = Protocol::from_netver(protocol).ok_or(Error::BadData)?;
    ctx.begin_protocol(server_protocol, serverdata.protocol_version);
    let features = &mut ctx.features;
    features.batch_move = true;
    features.userinfo_delta = true;
    features.has_upmove = true;
    features.has_clientnum = true;
    features.has_solid32 = true;
    features.has_playerfog = playerfog;
    features.server_game_api = if extensions_v2 {
        GameApi::Q2proExtendedV2
    } else {
        GameApi::Q2proExtended
    };
    Ok(serverdata)
}

pub(crate) fn client_read(ctx: &mut ClientContext, io: &mut dyn MsgRead) -> Result<SvcMessage> {
    let layout = Q2proLayout::client(ctx);
    if ctx.state == ReadState::FrameEntities {
        return q2pro::read_frame_entity(ctx, io, &layout);
    }

    let command = io.read_u8()? & 0x1f;
    trace!(command = debug::svc_name(Protocol::Q2proExtendedDemo, command), "extdemo read");
    let msg = match command {
        SVC_NOP => SvcMessage::Nop,
        SVC_DISCONNECT => SvcMessage::Disconnect,
        SVC_RECONNECT => SvcMessage::Reconnect,
        SVC_PRINT => SvcMessage::Print(common::read_print(io)?),
        SVC_CENTERPRINT => SvcMessage::CenterPrint(io.read_string()?),
        SVC_STUFFTEXT => SvcMessage::StuffText(io.read_string()?),
        SVC_SERVERDATA => {
            let protocol = io.read_i32()?;
            if !(PROTOCOL_Q2PRO_DEMO_EXT..=PROTOCOL_Q2PRO_DEMO_EXT_PLAYERFOG).contains(&protocol) {
                return Err(Error::BadData);
            }
            SvcMessage::ServerData(continue_serverdata(ctx, io, protocol)?)
        }
        SVC_CONFIGSTRING => SvcMessage::ConfigString(common::read_configstring(io)?),
        SVC_SOUND => SvcMessage::Sound(common::read_sound(io, layout.multicast(), false)?),
        SVC_SPAWNBASELINE => SvcMessage::SpawnBaseline(q2pro::read_baseline(io, &layout)?),
        SVC_TEMP_ENTITY => SvcMessage::TempEntity(tent::read_temp_entity(
            io,
            layout.multicast(),
            ctx.features.server_game_api,
        )?),
        SVC_MUZZLEFLASH => SvcMessage::MuzzleFlash(common::read_muzzleflash(io, MZ_SILENCED)?),
        SVC_MUZZLEFLASH2 => SvcMessage::MuzzleFlash2(common::read_muzzleflash(io, 0)?),
        SVC_DOWNLOAD => SvcMessage::Download(common::read_download(io)?),
        SVC_FRAME => read_frame(ctx, io, &layout)?,
        SVC_INVENTORY => SvcMessage::Inventory(common::read_inventory(io)?),
        SVC_LAYOUT => SvcMessage::Layout(io.read_string()?),
        SVC_R1Q2_SETTING => SvcMessage::Setting(r1q2::read_svc_setting(io)?),
        _ => return Err(Error::BadCommand),
    };
    Ok(msg)
}

fn expect_command(io: &mut dyn MsgRead, expected: u8) -> Result<()> {
    let cmd = io.read_u8()?;
    if cmd != expected {
        trace!(cmd, expected, "unexpected frame section");
        return Err(Error::BadData);
    }
    Ok(())
}

fn read_frame(ctx: &mut ClientContext, io: &mut dyn MsgRead, layout: &Q2proLayout) -> Result<SvcMessage> {
    let mut frame = Frame {
        serverframe: io.read_i32()?,
        deltaframe: io.read_i32()?,
        suppress_count: io.read_u8()?,
        ..Default::default()
    };
    let areabits_len = io.read_u8()? as usize;
    frame.areabits = io.read_data(areabits_len)?;
    expect_command(io, SVC_PLAYERINFO)?;
    frame.playerstate = read_playerstate(io, layout)?;
    expect_command(io, SVC_PACKETENTITIES)?;
    ctx.state = ReadState::FrameEntities;
    Ok(SvcMessage::Frame(Box::new(frame)))
}

fn read_playerstate(io: &mut dyn MsgRead, layout: &Q2proLayout) -> Result<PlayerStateDelta> {
    let mut flags = io.read_u16()? as u32;
    if layout.playerfog && flags & PS_MOREBITS != 0 {
        flags |= (io.read_u8()? as u32) << 16;
    }
    trace!(flags = %debug::PlayerBits(flags), "playerstate");
    let mut ps = PlayerStateDelta::default();

    if flags & PS_M_TYPE != 0 {
        ps.delta_bits |= PsdFlags::PM_TYPE;
        ps.pm_type = io.read_u8()?;
    }
    if flags & PS_M_ORIGIN != 0 {
        for c in 0..3 {
            q2pro::read_maybe_diff(io, layout, &mut ps.pm_origin, c)?;
        }
    }
    if flags & PS_M_VELOCITY != 0 {
        for c in 0..3 {
            q2pro::read_maybe_diff(io, layout, &mut ps.pm_velocity, c)?;
        }
    }
    if flags & PS_M_TIME != 0 {
        ps.delta_bits |= PsdFlags::PM_TIME;
        ps.pm_time = read_byte_or_word(io, layout)?;
    }
    if flags & PS_M_FLAGS != 0 {
        ps.delta_bits |= PsdFlags::PM_FLAGS;
        ps.pm_flags = read_byte_or_word(io, layout)?;
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
            *offset = SmallOffset::Char(io.read_i8()?);
        }
    }
    if flags & PS_VIEWANGLES != 0 {
        for c in 0..3 {
            ps.viewangles.set_comp(c, Angle::Short(io.read_i16()?));
        }
    }
    if flags & PS_KICKANGLES != 0 {
        ps.delta_bits |= PsdFlags::KICKANGLES;
        for angle in &mut ps.kick_angles {
            *angle = SmallAngle::Char(io.read_i8()?);
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
        ps.gunframe = io.read_u8()? as u16;
        for c in 0..3 {
            ps.gunoffset.set_comp(c, SmallOffset::Char(io.read_i8()?));
        }
        for c in 0..3 {
            ps.gunangles.set_comp(c, SmallAngle::Char(io.read_i8()?));
        }
    }
    if flags & PS_BLEND != 0 {
        if layout.extensions_v2 {
            q2pro::read_blends(io, &mut ps)?;
        } else {
            for c in 0..4 {
                ps.blend.set_comp(c, Color::Byte(io.read_u8()?));
            }
        }
    }
    if layout.playerfog && flags & PS_Q2PRO_PLAYERFOG != 0 {
        ps.fog = q2pro::read_playerfog(io)?;
    }
    if flags & PS_FOV != 0 {
        ps.delta_bits |= PsdFlags::FOV;
        ps.fov = io.read_u8()?;
    }
    if flags & PS_RDFLAGS != 0 {
        ps.delta_bits |= PsdFlags::RDFLAGS;
        ps.rdflags = io.read_u8()?;
    }

    // stats are always present
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
    Ok(ps)
}

fn read_byte_or_word(io: &mut dyn MsgRead, layout: &Q2proLayout) -> Result<u16> {
    if layout.extensions_v2 {
        io.read_u16()
    } else {
        Ok(io.read_u8()? as u16)
    }
}

// ============================================================
// Server side
// ============================================================

pub(crate) fn init_server(ctx: &mut ServerContext) -> Result<()> {
    let version = match ctx.info.game_api {
        GameApi::Q2proExtended => PROTOCOL_VERSION_Q2PRO_EXTENDED_LIMITS,
        GameApi::Q2proExtendedV2 => PROTOCOL_VERSION_Q2PRO_CURRENT,
        _ => return Err(Error::GametypeUnsupported),
    };
    ctx.protocol_version = version;
    let features = &mut ctx.features;
    features.enable_deflate = ctx.connect.has_zlib;
    features.download_compress_raw = features.enable_deflate && version >= PROTOCOL_VERSION_Q2PRO_ZLIB_DOWNLOADS;
    features.has_beam_old_origin_fix = version >= PROTOCOL_VERSION_Q2PRO_BEAM_ORIGIN;
    features.playerstate_clientnum = true;
    features.has_playerfog = ctx.connect.protocol >= Protocol::Q2proExtendedDemoPlayerfog;
    Ok(())
}

pub(crate) fn fill_serverdata(ctx: &ServerContext, serverdata: &mut ServerData) {
    serverdata.protocol = if ctx.info.game_api == GameApi::Q2proExtendedV2 {
        PROTOCOL_Q2PRO_DEMO_EXT_CURRENT
    } else {
        PROTOCOL_Q2PRO_DEMO_EXT
    };
    serverdata.protocol_version = ctx.protocol_version;
}

pub(crate) fn server_write(ctx: &mut ServerContext, io: &mut dyn MsgWrite, msg: &SvcMessage) -> Result<()> {
    trace!(message = msg.name(), "extdemo write");
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
        SvcMessage::Frame(frame) => write_frame(io, &layout, frame),
        SvcMessage::FrameEntityDelta(delta) => q2pro::write_frame_entity(io, &layout, delta),
        SvcMessage::Layout(text) => common::write_string_cmd(io, SVC_LAYOUT, text),
        SvcMessage::Setting(setting) => r1q2::write_svc_setting(io, SVC_R1Q2_SETTING, setting),
        // muzzleflashes, temp entities and inventory come from game code
        _ => Err(Error::NotImplemented),
    }
}

fn write_serverdata(io: &mut dyn MsgWrite, serverdata: &ServerData) -> Result<()> {
    if !(PROTOCOL_Q2PRO_DEMO_EXT..=PROTOCOL_Q2PRO_DEMO_EXT_PLAYERFOG).contains(&serverdata.protocol) {
        return Err(Error::InvalidArgument);
    }
    io.write_u8(SVC_SERVERDATA)?;
    io.write_i32(serverdata.protocol)?;
    io.write_i32(serverdata.servercount)?;
    io.write_bool(serverdata.attractloop)?;
    io.write_string(&serverdata.gamedir)?;
    io.write_i16(serverdata.clientnum)?;
    io.write_string(&serverdata.levelname)
}

fn write_spawnbaseline(ctx: &mut ServerContext, io: &mut dyn MsgWrite, baseline: &SpawnBaseline) -> Result<()> {
    io.write_u8(SVC_SPAWNBASELINE)?;
    q2pro::write_entity_delta(io, &Q2proLayout::server(ctx), baseline.entnum, &baseline.delta_state)
}

fn write_frame(io: &mut dyn MsgWrite, layout: &Q2proLayout, frame: &Frame) -> Result<()> {
    let areabits_len = u8::try_from(frame.areabits.len()).map_err(|_| Error::BadData)?;
    io.write_u8(SVC_FRAME)?;
    io.write_i32(frame.serverframe)?;
    io.write_i32(frame.deltaframe)?;
    io.write_u8(frame.suppress_count)?;
    io.write_u8(areabits_len)?;
    io.write_raw(&frame.areabits)?;
    write_playerstate(io, layout, &frame.playerstate)?;
    io.write_u8(SVC_PACKETENTITIES)
}

fn write_playerstate(io: &mut dyn MsgWrite, layout: &Q2proLayout, ps: &PlayerStateDelta) -> Result<()> {
    let bits = ps.delta_bits;
    let mut flags = 0u32;

    if bits.contains(PsdFlags::CLIENTNUM) {
        return Err(Error::BadData);
    }
    if bits.contains(PsdFlags::PM_TYPE) {
        flags |= PS_M_TYPE;
    }
    if ps.pm_origin.differs_int() != 0 {
        flags |= PS_M_ORIGIN;
    }
    if ps.pm_velocity.differs_int() != 0 {
        flags |= PS_M_VELOCITY;
    }
    for (flag, bit, value) in [
        (PsdFlags::PM_TIME, PS_M_TIME, ps.pm_time),
        (PsdFlags::PM_FLAGS, PS_M_FLAGS, ps.pm_flags),
    ] {
        if bits.contains(flag) {
            if !layout.extensions_v2 && value > 0xff {
                return Err(Error::BadData);
            }
            flags |= bit;
        }
    }
    for (flag, bit) in [
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
        if !layout.extensions_v2 {
            return Err(Error::BadData);
        }
        flags |= PS_BLEND;
    }
    if bits.intersects(PsdFlags::GUNINDEX | PsdFlags::GUNSKIN) {
        if ps.gunindex > Q2PRO_GUNINDEX_MASK {
            return Err(Error::BadData);
        }
        flags |= PS_WEAPONINDEX;
    }
    if bits.contains(PsdFlags::GUNFRAME) || ps.gunoffset.delta_bits != 0 || ps.gunangles.delta_bits != 0 {
        if ps.gunframe > 0xff {
            return Err(Error::BadData);
        }
        flags |= PS_WEAPONFRAME;
    }
    if !layout.extensions_v2 && ps.statbits > u32::MAX as u64 {
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

    io.write_u8(SVC_PLAYERINFO)?;
    io.write_u16(flags as u16)?;
    if flags & PS_MOREBITS != 0 {
        io.write_u8((flags >> 16) as u8)?;
    }
    if flags & PS_M_TYPE != 0 {
        io.write_u8(ps.pm_type)?;
    }
    if flags & PS_M_ORIGIN != 0 {
        for c in 0..3 {
            q2pro::write_maybe_diff(io, layout, &ps.pm_origin, c)?;
        }
    }
    if flags & PS_M_VELOCITY != 0 {
        for c in 0..3 {
            q2pro::write_maybe_diff(io, layout, &ps.pm_velocity, c)?;
        }
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
        io.write_u16(ps.gunindex | ((ps.gunskin as u16) << Q2PRO_GUNINDEX_BITS))?;
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
        if layout.extensions_v2 {
            q2pro::write_blends(io, &ps.blend, &ps.damage_blend)?;
        } else {
            for color in &ps.blend.values {
                io.write_u8(color.to_byte())?;
            }
        }
    }
    if flags & PS_Q2PRO_PLAYERFOG != 0 {
        q2pro::write_playerfog(io, &ps.fog)?;
    }
    if flags & PS_FOV != 0 {
        io.write_u8(ps.fov)?;
    }
    if flags & PS_RDFLAGS != 0 {
        io.write_u8(ps.rdflags)?;
    }
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
    Ok(())
}

pub(crate) fn write_gamestate(ctx: &mut ServerContext, io: &mut dyn MsgWrite, gamestate: &Gamestate) -> Result<()> {
    server::write_gamestate_records(ctx, io, gamestate, Q2PRO_WRITE_GAMESTATE_BASELINE_SIZE, write_spawnbaseline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Coord;
    use crate::io::MsgReader;
    use crate::server::ServerInfo;
    use crate::svc::{EntityStateDelta, EsdFlags, FrameEntityDelta, MaybeDiffCoords};

    fn demo(game_api: GameApi) -> (ServerContext, ClientContext) {
        let info = ServerInfo {
            game_api,
            ..Default::default()
        };
        let (mut server, _) = ServerContext::new_demo(&info).unwrap();
        let mut serverdata = ServerData {
            servercount: 3,
            gamedir: "baseq2".into(),
            levelname: "demo1".into(),
            ..Default::default()
        };
        server.fill_serverdata(&mut serverdata);

        let mut buf = Vec::new();
        server.write(&mut buf, &SvcMessage::ServerData(serverdata)).unwrap();
        let mut client = ClientContext::new();
        let SvcMessage::ServerData(read) = client.read(&mut MsgReader::new(&buf)).unwrap() else {
            panic!("expected serverdata");
        };
        assert_eq!(read.levelname, "demo1");
        (server, client)
    }

    #[test]
    fn test_serverdata_selects_format() {
        let (_, client) = demo(GameApi::Q2proExtendedV2);
        assert_eq!(client.protocol(), Some(Protocol::Q2proExtendedDemoPlayerfog));
        assert_eq!(client.protocol_version(), PROTOCOL_VERSION_Q2PRO_PLAYERFOG);
        assert_eq!(client.features.server_game_api, GameApi::Q2proExtendedV2);
        assert!(client.features.has_playerfog);

        let (_, client) = demo(GameApi::Q2proExtended);
        assert_eq!(client.protocol(), Some(Protocol::Q2proExtendedDemo));
        assert_eq!(client.features.server_game_api, GameApi::Q2proExtended);
        assert!(!client.features.has_playerfog);
    }

    #[test]
    fn test_frame_round_trip() {
        let (mut server, mut client) = demo(GameApi::Q2proExtendedV2);
        let mut frame = Frame {
            serverframe: 50,
            deltaframe: 49,
            suppress_count: 1,
            areabits: vec![0xff],
            ..Default::default()
        };
        let ps = &mut frame.playerstate;
        ps.pm_origin = MaybeDiffCoords::Write {
            prev: [Coord::Int(0); 3],
            current: [Coord::Int(16), Coord::Int(0), Coord::Int(0)],
        };
        ps.delta_bits = PsdFlags::PM_FLAGS | PsdFlags::GUNINDEX;
        ps.pm_flags = 0x1234;
        ps.gunindex = 700;
        ps.gunangles.set_comp(1, SmallAngle::Char(9));
        ps.statbits = 1 << 33;
        ps.stats[33] = -5;

        let mut buf = Vec::new();
        server.write(&mut buf, &SvcMessage::Frame(Box::new(frame))).unwrap();
        let entity = FrameEntityDelta {
            newnum: 20,
            remove: false,
            entity_delta: EntityStateDelta {
                delta_bits: EsdFlags::MODELINDEX,
                modelindex: 400,
                ..Default::default()
            },
        };
        server.write(&mut buf, &SvcMessage::FrameEntityDelta(entity)).unwrap();
        server.write(&mut buf, &SvcMessage::FrameEntityDelta(Default::default())).unwrap();

        let mut r = MsgReader::new(&buf);
        let SvcMessage::Frame(read) = client.read(&mut r).unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!((read.serverframe, read.deltaframe, read.suppress_count), (50, 49, 1));
        let rps = &read.playerstate;
        // all three components travel together
        assert_eq!(rps.pm_origin.read_bits(), 7);
        let mut origin = [0; 3];
        rps.pm_origin.apply_int(&mut origin);
        assert_eq!(origin, [16, 0, 0]);
        assert_eq!(rps.pm_flags, 0x1234);
        assert_eq!(rps.gunindex, 700);
        assert_eq!(rps.gunangles.delta_bits, 7);
        assert_eq!(rps.gunangles.values[1], SmallAngle::Char(9));
        assert_eq!(rps.stats[33], -5);

        assert_eq!(client.read(&mut r).unwrap(), SvcMessage::FrameEntityDelta(entity));
        assert_eq!(client.read(&mut r).unwrap(), SvcMessage::FrameEntityDelta(Default::default()));
        assert_eq!(client.read(&mut r), Err(Error::NoMoreInput));
    }

    #[test]
    fn test_clientnum_rejected() {
        let (mut server, _) = demo(GameApi::Q2proExtended);
        let mut frame = Frame::default();
        frame.playerstate.delta_bits = PsdFlags::CLIENTNUM;
        let mut buf = Vec::new();
        assert_eq!(server.write(&mut buf, &SvcMessage::Frame(Box::new(frame))), Err(Error::BadData));
    }

    #[test]
    fn test_narrow_fields_without_v2() {
        let (mut server, _) = demo(GameApi::Q2proExtended);
        let mut frame = Frame::default();
        frame.playerstate.delta_bits = PsdFlags::PM_TIME;
        frame.playerstate.pm_time = 300;
        let mut buf = Vec::new();
        assert_eq!(server.write(&mut buf, &SvcMessage::Frame(Box::new(frame))), Err(Error::BadData));
    }

    #[test]
    fn test_missing_playerinfo() {
        let (_, mut client) = demo(GameApi::Q2proExtended);
        let mut buf = Vec::new();
        buf.write_u8(SVC_FRAME).unwrap();
        buf.write_i32(10).unwrap();
        buf.write_i32(-1).unwrap();
        buf.write_u8(0).unwrap();
        buf.write_u8(0).unwrap();
        buf.write_u8(SVC_PACKETENTITIES).unwrap();
        assert_eq!(client.read(&mut MsgReader::new(&buf)), Err(Error::BadData));
    }

    #[test]
    fn test_rejects_vanilla_game() {
        let info = ServerInfo::default();
        let connect = crate::connect::ConnectInfo {
            protocol: Protocol::Q2proExtendedDemo,
            ..Default::default()
        };
        assert_eq!(ServerContext::new(&info, &connect).err(), Some(Error::GametypeUnsupported));
    }
}
