// r1q2.rs -- protocol 35 (R1Q2)
//
// R1Q2 keeps the vanilla entity layout but adds compressed packets and
// downloads, server/client settings, delta-coded frame numbers and the
// "extra flags" split of the player state. From minor version 1904 the
// client may halve the size of its movement commands, and from 1905
// entity bounding boxes travel as 32 bit values.

use tracing::trace;

use crate::clc::{self, ClcMessage, CmdFlags, Move, MoveDelta};
use crate::client::{ClientContext, ReadState};
use crate::common;
use crate::compression::Inflater;
use crate::coords::{Angle, Coord};
use crate::debug;
use crate::defs::*;
use crate::entity::write_short_entity_delta;
use crate::error::{Error, Result};
use crate::io::{MsgRead, MsgWrite};
use crate::protocol::{
    GameApi, MulticastProtocol, Protocol, PROTOCOL_R1Q2, PROTOCOL_VERSION_R1Q2_LONG_SOLID, PROTOCOL_VERSION_R1Q2_UCMD,
};
use crate::q2pro::{self, Q2proLayout};
use crate::server::{self, DownloadCompress, DownloadEncoding, Gamestate, ServerContext};
use crate::svc::{self, Download, Frame, PlayerStateDelta, PsdFlags, ServerData, SpawnBaseline, SvcMessage};
use crate::tent;
use crate::vanilla;

// Button bits reused by compressed movement commands.
const BUTTON_UCMD_DBLFORWARD: u8 = 1 << 2;
const BUTTON_UCMD_DBLSIDE: u8 = 1 << 3;
const BUTTON_UCMD_DBLUP: u8 = 1 << 4;
/// angles[0] sent divided by 64
const BUTTON_UCMD_DBL_ANGLE1: u8 = 1 << 5;
/// angles[1] sent divided by 256
const BUTTON_UCMD_DBL_ANGLE2: u8 = 1 << 6;
const BUTTON_UCMD_MASK: u8 =
    BUTTON_UCMD_DBLFORWARD | BUTTON_UCMD_DBLSIDE | BUTTON_UCMD_DBLUP | BUTTON_UCMD_DBL_ANGLE1 | BUTTON_UCMD_DBL_ANGLE2;

/// Player states use the Q2PRO layout without any of its extensions.
fn playerstate_layout() -> Q2proLayout {
    Q2proLayout {
        extensions: false,
        extensions_v2: false,
        protocol_version: 0,
        playerfog: false,
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
    serverdata.r1q2.enhanced = io.read_bool()?;
    serverdata.protocol_version = io.read_u16()?;
    // advanced deltas; never used
    io.read_u8()?;
    serverdata.strafejump_hack = io.read_bool()?;

    ctx.begin_protocol(Protocol::R1q2, serverdata.protocol_version);
    ctx.features.has_upmove = true;
    ctx.features.has_solid32 = serverdata.protocol_version >= PROTOCOL_VERSION_R1Q2_LONG_SOLID;
    Ok(serverdata)
}

/// Read the next message. `None` means a compressed block started and the
/// caller should read again.
pub(crate) fn client_read(ctx: &mut ClientContext, io: &mut dyn MsgRead) -> Result<Option<SvcMessage>> {
    let solid32 = ctx.features.has_solid32;
    if ctx.state == ReadState::FrameEntities {
        return vanilla::read_short_frame_entity(ctx, io, solid32).map(Some);
    }

    let command = io.read_u8()?;
    let extrabits = command & 0xe0;
    let command = command & 0x1f;
    trace!(command = debug::svc_name(Protocol::R1q2, command), "r1q2 read");
    let msg = match command {
        SVC_NOP => SvcMessage::Nop,
        SVC_DISCONNECT => SvcMessage::Disconnect,
        SVC_RECONNECT => SvcMessage::Reconnect,
        SVC_PRINT => SvcMessage::Print(common::read_print(io)?),
        SVC_CENTERPRINT => SvcMessage::CenterPrint(io.read_string()?),
        SVC_STUFFTEXT => SvcMessage::StuffText(io.read_string()?),
        SVC_SERVERDATA => {
            let protocol = io.read_i32()?;
            if protocol != PROTOCOL_R1Q2 {
                return Err(Error::BadData);
            }
            SvcMessage::ServerData(continue_serverdata(ctx, io, protocol)?)
        }
        SVC_CONFIGSTRING => SvcMessage::ConfigString(common::read_configstring(io)?),
        SVC_SOUND => SvcMessage::Sound(common::read_sound(io, MulticastProtocol::Short, false)?),
        SVC_SPAWNBASELINE => SvcMessage::SpawnBaseline(vanilla::read_short_baseline(io, solid32)?),
        SVC_TEMP_ENTITY => SvcMessage::TempEntity(tent::read_temp_entity(
            io,
            MulticastProtocol::Short,
            ctx.features.server_game_api,
        )?),
        SVC_MUZZLEFLASH => SvcMessage::MuzzleFlash(common::read_muzzleflash(io, MZ_SILENCED)?),
        SVC_MUZZLEFLASH2 => SvcMessage::MuzzleFlash2(common::read_muzzleflash(io, 0)?),
        SVC_DOWNLOAD => SvcMessage::Download(common::read_download(io)?),
        SVC_FRAME => read_frame(ctx, io, extrabits)?,
        SVC_INVENTORY => SvcMessage::Inventory(common::read_inventory(io)?),
        SVC_LAYOUT => SvcMessage::Layout(io.read_string()?),
        SVC_R1Q2_ZPACKET => {
            ctx.read_zpacket(io)?;
            return Ok(None);
        }
        SVC_R1Q2_ZDOWNLOAD => SvcMessage::Download(read_zdownload(io)?),
        SVC_R1Q2_SETTING => SvcMessage::Setting(read_svc_setting(io)?),
        _ => return Err(Error::BadCommand),
    };
    Ok(Some(msg))
}

fn read_frame(ctx: &mut ClientContext, io: &mut dyn MsgRead, extrabits: u8) -> Result<SvcMessage> {
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
    let suppress_count = io.read_u8()?;
    extraflags |= ((suppress_count & 0xf0) >> 4) as u32;
    frame.suppress_count = suppress_count & 0x0f;

    let areabits_len = io.read_u8()? as usize;
    frame.areabits = io.read_data(areabits_len)?;
    // no client number in R1Q2 player states
    frame.playerstate = q2pro::read_playerstate(io, &playerstate_layout(), extraflags & 0x3f)?;
    ctx.state = ReadState::FrameEntities;
    Ok(SvcMessage::Frame(Box::new(frame)))
}

/// Each compressed chunk is a complete deflate stream of its own.
fn read_zdownload(io: &mut dyn MsgRead) -> Result<Download> {
    let size = io.read_i16()?;
    let percent = io.read_u8()?;
    let uncompressed_len = io.read_u16()?;
    let compressed = io.read_data(size.max(0) as usize)?;
    let data = if compressed.is_empty() {
        Vec::new()
    } else {
        Inflater::new().inflate(&compressed)?
    };
    if data.len() != uncompressed_len as usize {
        return Err(Error::BadData);
    }
    Ok(Download {
        size: i16::try_from(data.len()).map_err(|_| Error::BadData)?,
        percent,
        data,
        compressed: true,
        uncompressed_size: uncompressed_len as i16,
    })
}

/// Read a server setting; shared with Q2PRO and Q2rePRO.
pub(crate) fn read_svc_setting(io: &mut dyn MsgRead) -> Result<svc::Setting> {
    Ok(svc::Setting {
        index: io.read_i32()?,
        value: io.read_i32()?,
    })
}

pub(crate) fn write_svc_setting(io: &mut dyn MsgWrite, cmd: u8, setting: &svc::Setting) -> Result<()> {
    io.write_u8(cmd)?;
    io.write_i32(setting.index)?;
    io.write_i32(setting.value)
}

pub(crate) fn client_write(ctx: &mut ClientContext, io: &mut dyn MsgWrite, msg: &ClcMessage) -> Result<()> {
    trace!(message = msg.name(), "r1q2 write");
    match msg {
        ClcMessage::Nop => io.write_u8(CLC_NOP),
        ClcMessage::Move(mv) => write_move(io, ctx.protocol_version() >= PROTOCOL_VERSION_R1Q2_UCMD, mv),
        ClcMessage::Userinfo(userinfo) => common::write_string_cmd(io, CLC_USERINFO, userinfo),
        ClcMessage::StringCmd(cmd) => common::write_string_cmd(io, CLC_STRINGCMD, cmd),
        ClcMessage::Setting(setting) => write_clc_setting(io, setting),
        _ => Err(Error::BadCommand),
    }
}

/// Write a client setting; shared with Q2PRO and Q2rePRO.
pub(crate) fn write_clc_setting(io: &mut dyn MsgWrite, setting: &clc::Setting) -> Result<()> {
    io.write_u8(CLC_R1Q2_SETTING)?;
    io.write_i16(setting.index)?;
    io.write_i16(setting.value)
}

pub(crate) fn read_clc_setting(io: &mut dyn MsgRead) -> Result<clc::Setting> {
    Ok(clc::Setting {
        index: io.read_i16()?,
        value: io.read_i16()?,
    })
}

fn write_move(io: &mut dyn MsgWrite, compressed: bool, mv: &Move) -> Result<()> {
    io.write_u8(CLC_MOVE)?;
    io.write_i32(mv.lastframe)?;
    for delta in &mv.moves {
        write_move_delta(io, compressed, delta)?;
    }
    Ok(())
}

/// A value that survives being sent as `i8` after division by `div`.
fn divides_into_char(value: i16, div: i16) -> bool {
    value % div == 0 && i8::try_from(value / div).is_ok()
}

fn write_move_delta(io: &mut dyn MsgWrite, compressed: bool, delta: &MoveDelta) -> Result<()> {
    let bits = delta.delta_bits.bits() as u8;
    io.write_u8(bits)?;

    let moves = delta.moves.map(|m| m.to_short_unscaled());
    let angles = delta.angles.map(|a| a.to_short());

    // Compressed commands need the buttons byte up front to announce which
    // values are sent as single bytes.
    let mut buttons = 0u8;
    if compressed && bits & CM_BUTTONS != 0 {
        buttons = delta.buttons & !BUTTON_UCMD_MASK;
        for (c, flag) in [BUTTON_UCMD_DBLFORWARD, BUTTON_UCMD_DBLSIDE, BUTTON_UCMD_DBLUP].into_iter().enumerate() {
            if bits & (CM_FORWARD << c) != 0 && divides_into_char(moves[c], 5) {
                buttons |= flag;
            }
        }
        if bits & CM_ANGLE1 != 0 && divides_into_char(angles[0], 64) {
            buttons |= BUTTON_UCMD_DBL_ANGLE1;
        }
        if bits & CM_ANGLE2 != 0 && angles[1] % 256 == 0 {
            buttons |= BUTTON_UCMD_DBL_ANGLE2;
        }
        io.write_u8(buttons)?;
    }

    for (c, (flag, div)) in [(BUTTON_UCMD_DBL_ANGLE1, 64), (BUTTON_UCMD_DBL_ANGLE2, 256), (0, 1)]
        .into_iter()
        .enumerate()
    {
        if bits & (CM_ANGLE1 << c) != 0 {
            if buttons & flag != 0 {
                io.write_i8((angles[c] / div) as i8)?;
            } else {
                io.write_i16(angles[c])?;
            }
        }
    }
    for (c, flag) in [BUTTON_UCMD_DBLFORWARD, BUTTON_UCMD_DBLSIDE, BUTTON_UCMD_DBLUP].into_iter().enumerate() {
        if bits & (CM_FORWARD << c) != 0 {
            if buttons & flag != 0 {
                io.write_i8((moves[c] / 5) as i8)?;
            } else {
                io.write_i16(moves[c])?;
            }
        }
    }

    if !compressed && bits & CM_BUTTONS != 0 {
        io.write_u8(delta.buttons)?;
    }
    if bits & CM_IMPULSE != 0 {
        io.write_u8(delta.impulse)?;
    }
    io.write_u8(delta.msec)?;
    io.write_u8(delta.lightlevel)
}

// ============================================================
// Server side
// ============================================================

pub(crate) fn init_server(ctx: &mut ServerContext) -> Result<()> {
    if ctx.info.game_api != GameApi::Vanilla {
        return Err(Error::GametypeUnsupported);
    }
    ctx.protocol_version = ctx.connect.version;
    ctx.zpacket_cmd = SVC_R1Q2_ZPACKET;
    ctx.features.enable_deflate = ctx.connect.has_zlib;
    ctx.features.has_beam_old_origin_fix = true;
    Ok(())
}

pub(crate) fn fill_serverdata(ctx: &ServerContext, serverdata: &mut ServerData) {
    serverdata.protocol = PROTOCOL_R1Q2;
    serverdata.protocol_version = ctx.protocol_version;
}

fn solid32(ctx: &ServerContext) -> bool {
    ctx.protocol_version >= PROTOCOL_VERSION_R1Q2_LONG_SOLID
}

pub(crate) fn server_write(ctx: &mut ServerContext, io: &mut dyn MsgWrite, msg: &SvcMessage) -> Result<()> {
    trace!(message = msg.name(), "r1q2 write");
    match msg {
        SvcMessage::Nop => io.write_u8(SVC_NOP),
        SvcMessage::Disconnect => io.write_u8(SVC_DISCONNECT),
        SvcMessage::Reconnect => io.write_u8(SVC_RECONNECT),
        SvcMessage::Sound(sound) => common::write_sound(io, MulticastProtocol::Short, false, sound),
        SvcMessage::Print(print) => common::write_print(io, print),
        SvcMessage::StuffText(text) => common::write_string_cmd(io, SVC_STUFFTEXT, text),
        SvcMessage::ServerData(serverdata) => write_serverdata(io, serverdata),
        SvcMessage::ConfigString(cs) => common::write_configstring(io, cs),
        SvcMessage::SpawnBaseline(baseline) => write_spawnbaseline(ctx, io, baseline),
        SvcMessage::CenterPrint(text) => common::write_string_cmd(io, SVC_CENTERPRINT, text),
        SvcMessage::Download(download) => write_download(io, download),
        SvcMessage::Frame(frame) => write_frame(io, frame),
        SvcMessage::FrameEntityDelta(delta) => vanilla::write_short_frame_entity(io, delta, solid32(ctx)),
        SvcMessage::Layout(text) => common::write_string_cmd(io, SVC_LAYOUT, text),
        SvcMessage::Setting(setting) => write_svc_setting(io, SVC_R1Q2_SETTING, setting),
        // muzzleflashes, temp entities and inventory come from game code
        _ => Err(Error::NotImplemented),
    }
}

fn write_serverdata(io: &mut dyn MsgWrite, serverdata: &ServerData) -> Result<()> {
    io.write_u8(SVC_SERVERDATA)?;
    io.write_i32(PROTOCOL_R1Q2)?;
    io.write_i32(serverdata.servercount)?;
    io.write_bool(serverdata.attractloop)?;
    io.write_string(&serverdata.gamedir)?;
    io.write_i16(serverdata.clientnum)?;
    io.write_string(&serverdata.levelname)?;
    io.write_bool(serverdata.r1q2.enhanced)?;
    io.write_u16(serverdata.protocol_version)?;
    // advanced deltas
    io.write_u8(0)?;
    io.write_bool(serverdata.strafejump_hack)
}

pub(crate) fn write_spawnbaseline(ctx: &mut ServerContext, io: &mut dyn MsgWrite, baseline: &SpawnBaseline) -> Result<()> {
    io.write_u8(SVC_SPAWNBASELINE)?;
    write_short_entity_delta(io, baseline.entnum, &baseline.delta_state, solid32(ctx))
}

fn write_download(io: &mut dyn MsgWrite, download: &Download) -> Result<()> {
    if !download.compressed {
        return common::write_download(io, download);
    }
    let data = common::download_payload(download)?;
    io.write_u8(SVC_R1Q2_ZDOWNLOAD)?;
    io.write_i16(download.size)?;
    io.write_u8(download.percent)?;
    io.write_i16(download.uncompressed_size)?;
    io.write_raw(data)
}

fn write_playerstate(io: &mut dyn MsgWrite, ps: &PlayerStateDelta) -> Result<u32> {
    if ps.delta_bits.contains(PsdFlags::CLIENTNUM) {
        return Err(Error::BadData);
    }
    q2pro::write_playerstate(io, &playerstate_layout(), ps)
}

fn write_frame(io: &mut dyn MsgWrite, frame: &Frame) -> Result<()> {
    let areabits_len = u8::try_from(frame.areabits.len()).map_err(|_| Error::BadData)?;
    let mut playerstate = Vec::with_capacity(128);
    let extraflags = write_playerstate(&mut playerstate, &frame.playerstate)?;

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
    io.write_u8((frame.suppress_count & 0x0f) | ((extraflags & 0x0f) << 4) as u8)?;
    io.write_u8(areabits_len)?;
    io.write_raw(&frame.areabits)?;
    io.write_raw(&playerstate)
}

pub(crate) fn write_gamestate(ctx: &mut ServerContext, io: &mut dyn MsgWrite, gamestate: &Gamestate) -> Result<()> {
    server::write_gamestate_records(ctx, io, gamestate, R1Q2_WRITE_GAMESTATE_BASELINE_SIZE, write_spawnbaseline)
}

/// R1Q2 compresses every download chunk separately; raw deflated files
/// can't be passed through.
pub(crate) fn download_encoding(
    ctx: &ServerContext,
    total_size: usize,
    compress: DownloadCompress,
) -> Result<DownloadEncoding> {
    match compress {
        DownloadCompress::Raw => Err(Error::RawCompressNotSupported),
        DownloadCompress::Auto if ctx.features.enable_deflate && total_size > 0 => Ok(DownloadEncoding::ChunkCompress),
        _ => Ok(DownloadEncoding::Plain),
    }
}

pub(crate) fn server_read(ctx: &mut ServerContext, io: &mut dyn MsgRead) -> Result<ClcMessage> {
    let command = io.read_u8()?;
    trace!(command = debug::clc_name(Protocol::R1q2, command), "r1q2 read");
    match command {
        CLC_NOP => Ok(ClcMessage::Nop),
        CLC_MOVE => {
            let compressed = ctx.protocol_version >= PROTOCOL_VERSION_R1Q2_UCMD;
            let mut mv = Move {
                lastframe: io.read_i32()?,
                ..Default::default()
            };
            for delta in &mut mv.moves {
                *delta = read_move_delta(io, compressed)?;
            }
            Ok(ClcMessage::Move(mv))
        }
        CLC_USERINFO => Ok(ClcMessage::Userinfo(io.read_string()?)),
        CLC_STRINGCMD => Ok(ClcMessage::StringCmd(io.read_string()?)),
        CLC_R1Q2_SETTING => Ok(ClcMessage::Setting(read_clc_setting(io)?)),
        _ => Err(Error::BadCommand),
    }
}

fn read_move_delta(io: &mut dyn MsgRead, compressed: bool) -> Result<MoveDelta> {
    let bits = io.read_u8()?;
    let mut delta = MoveDelta {
        delta_bits: CmdFlags::from_bits_truncate(bits as u32),
        ..Default::default()
    };

    let mut buttons = 0u8;
    if compressed && bits & CM_BUTTONS != 0 {
        buttons = io.read_u8()?;
    }

    for (c, (flag, scale)) in [(BUTTON_UCMD_DBL_ANGLE1, 64), (BUTTON_UCMD_DBL_ANGLE2, 256), (0, 1)]
        .into_iter()
        .enumerate()
    {
        if bits & (CM_ANGLE1 << c) != 0 {
            let angle = if buttons & flag != 0 {
                (io.read_i8()? as i16).wrapping_mul(scale)
            } else {
                io.read_i16()?
            };
            delta.angles[c] = Angle::Short(angle);
        }
    }
    for (c, flag) in [BUTTON_UCMD_DBLFORWARD, BUTTON_UCMD_DBLSIDE, BUTTON_UCMD_DBLUP].into_iter().enumerate() {
        if bits & (CM_FORWARD << c) != 0 {
            let value = if buttons & flag != 0 {
                io.read_i8()? as i32 * 5
            } else {
                io.read_i16()? as i32
            };
            delta.moves[c] = Coord::from_int_unscaled(value);
        }
    }

    if !compressed && bits & CM_BUTTONS != 0 {
        buttons = io.read_u8()?;
    }
    if bits & CM_IMPULSE != 0 {
        delta.impulse = io.read_u8()?;
    }
    delta.msec = io.read_u8()?;
    delta.lightlevel = io.read_u8()?;
    delta.buttons = buttons & !BUTTON_UCMD_MASK;
    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect::ConnectInfo;
    use crate::io::MsgReader;
    use crate::server::ServerInfo;
    use crate::svc::{EsdFlags, FrameEntityDelta, MaybeDiffCoords};

    fn connected(version: u16) -> (ServerContext, ClientContext) {
        let connect = ConnectInfo {
            protocol: Protocol::R1q2,
            version,
            has_zlib: true,
            ..Default::default()
        };
        let server = ServerContext::new(&ServerInfo::default(), &connect).unwrap();
        let mut client = ClientContext::new();
        client.begin_protocol(Protocol::R1q2, version);
        client.features.has_solid32 = version >= PROTOCOL_VERSION_R1Q2_LONG_SOLID;
        (server, client)
    }

    fn move_delta() -> MoveDelta {
        MoveDelta {
            delta_bits: CmdFlags::ANGLE0
                | CmdFlags::ANGLE1
                | CmdFlags::ANGLE2
                | CmdFlags::MOVE_FORWARD
                | CmdFlags::MOVE_SIDE
                | CmdFlags::BUTTONS
                | CmdFlags::IMPULSE,
            angles: [Angle::Short(-640), Angle::Short(4096), Angle::Short(123)],
            moves: [Coord::from_int_unscaled(400), Coord::from_int_unscaled(-201), Coord::Int(0)],
            buttons: 0x81,
            impulse: 7,
            msec: 12,
            lightlevel: 50,
        }
    }

    #[test]
    fn test_serverdata_round_trip() {
        let (mut server, _) = connected(1905);
        let mut sd = ServerData {
            servercount: 77,
            gamedir: "rocketarena".into(),
            clientnum: 3,
            levelname: "Arena".into(),
            strafejump_hack: true,
            ..Default::default()
        };
        sd.r1q2.enhanced = true;
        server.fill_serverdata(&mut sd);

        let mut buf = Vec::new();
        server.write(&mut buf, &SvcMessage::ServerData(sd.clone())).unwrap();

        let mut client = ClientContext::new();
        let SvcMessage::ServerData(read) = client.read(&mut MsgReader::new(&buf)).unwrap() else {
            panic!("expected serverdata");
        };
        assert_eq!(read, sd);
        assert_eq!(client.protocol(), Some(Protocol::R1q2));
        assert_eq!(client.protocol_version(), 1905);
        assert!(client.features.has_solid32);
    }

    #[test]
    fn test_compressed_move_round_trip() {
        let (mut server, mut client) = connected(PROTOCOL_VERSION_R1Q2_UCMD);
        let mut mv = Move {
            lastframe: 99,
            ..Default::default()
        };
        mv.moves[2] = move_delta();

        let mut buf = Vec::new();
        client.write(&mut buf, &ClcMessage::Move(mv)).unwrap();
        let ClcMessage::Move(read) = server.read(&mut MsgReader::new(&buf)).unwrap() else {
            panic!("expected a move");
        };
        assert_eq!(read.lastframe, 99);
        assert_eq!(read.moves[2], mv.moves[2]);

        // forward and both divisible angles shrink to one byte each
        let mut plain = Vec::new();
        write_move(&mut plain, false, &mv).unwrap();
        assert_eq!(plain.len() - buf.len(), 3);
    }

    #[test]
    fn test_compressed_move_keeps_large_values() {
        let (mut server, mut client) = connected(PROTOCOL_VERSION_R1Q2_UCMD);
        let mut mv = Move::default();
        mv.moves[0] = MoveDelta {
            delta_bits: CmdFlags::ANGLE0 | CmdFlags::MOVE_FORWARD | CmdFlags::BUTTONS,
            // 1000 / 5 and 8192 / 64 don't fit a signed byte
            angles: [Angle::Short(8192), Angle::Short(0), Angle::Short(0)],
            moves: [Coord::from_int_unscaled(1000), Coord::Int(0), Coord::Int(0)],
            buttons: 1,
            ..Default::default()
        };
        let mut buf = Vec::new();
        client.write(&mut buf, &ClcMessage::Move(mv)).unwrap();
        let ClcMessage::Move(read) = server.read(&mut MsgReader::new(&buf)).unwrap() else {
            panic!("expected a move");
        };
        assert_eq!(read.moves[0], mv.moves[0]);
    }

    #[test]
    fn test_old_move_layout() {
        let (mut server, mut client) = connected(1903);
        let mut mv = Move::default();
        mv.moves[1] = move_delta();
        let mut buf = Vec::new();
        client.write(&mut buf, &ClcMessage::Move(mv)).unwrap();
        let ClcMessage::Move(read) = server.read(&mut MsgReader::new(&buf)).unwrap() else {
            panic!("expected a move");
        };
        assert_eq!(read.moves[1], mv.moves[1]);
    }

    #[test]
    fn test_frame_with_vertical_velocity() {
        let (mut server, mut client) = connected(1905);
        let mut frame = Frame {
            serverframe: 500,
            deltaframe: 498,
            suppress_count: 2,
            ..Default::default()
        };
        frame.playerstate.pm_velocity = MaybeDiffCoords::Write {
            prev: [Coord::Int(0); 3],
            current: [Coord::Int(0), Coord::Int(0), Coord::Int(-800)],
        };
        frame.playerstate.statbits = 1;
        frame.playerstate.stats[0] = 42;

        let mut buf = Vec::new();
        server.write(&mut buf, &SvcMessage::Frame(Box::new(frame))).unwrap();
        let mut r = MsgReader::new(&buf);
        let SvcMessage::Frame(read) = client.read(&mut r).unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(read.deltaframe, 498);
        assert_eq!(read.suppress_count, 2);
        assert_eq!(read.playerstate.pm_velocity.read_bits(), 4);
        assert_eq!(read.playerstate.pm_velocity.current(2).to_int(), -800);
        assert_eq!(read.playerstate.stats[0], 42);
    }

    #[test]
    fn test_clientnum_not_sent() {
        let (mut server, _) = connected(1905);
        let mut frame = Frame::default();
        frame.playerstate.delta_bits = PsdFlags::CLIENTNUM;
        let mut buf = Vec::new();
        assert_eq!(server.write(&mut buf, &SvcMessage::Frame(Box::new(frame))), Err(Error::BadData));
    }

    #[test]
    fn test_long_solid_entities() {
        let (mut server, mut client) = connected(1905);
        client.state = ReadState::FrameEntities;
        let mut entity = FrameEntityDelta {
            newnum: 12,
            ..Default::default()
        };
        entity.entity_delta.delta_bits = EsdFlags::SOLID;
        entity.entity_delta.solid = 0x1234_5678;

        let mut buf = Vec::new();
        server.write(&mut buf, &SvcMessage::FrameEntityDelta(entity)).unwrap();
        assert_eq!(client.read(&mut MsgReader::new(&buf)).unwrap(), SvcMessage::FrameEntityDelta(entity));
    }

    #[test]
    fn test_zdownload_chunk() {
        let (mut server, mut client) = connected(1905);
        let file: Vec<u8> = b"r1q2 ".iter().copied().cycle().take(3000).collect();
        let (consumed, compressed) = crate::compression::deflate_block(&file, 1000).unwrap();
        assert_eq!(consumed, file.len());
        let download = Download {
            size: compressed.len() as i16,
            percent: 100,
            data: compressed,
            compressed: true,
            uncompressed_size: consumed as i16,
        };
        let mut buf = Vec::new();
        server.write(&mut buf, &SvcMessage::Download(download)).unwrap();
        assert_eq!(buf[0], SVC_R1Q2_ZDOWNLOAD);

        let SvcMessage::Download(read) = client.read(&mut MsgReader::new(&buf)).unwrap() else {
            panic!("expected a download");
        };
        assert_eq!(read.data, file);
        assert_eq!(read.size, 3000);
        assert_eq!(read.percent, 100);
    }

    #[test]
    fn test_setting_round_trip() {
        let (mut server, mut client) = connected(1905);
        let setting = clc::Setting { index: 1, value: -5 };
        let mut buf = Vec::new();
        client.write(&mut buf, &ClcMessage::Setting(setting)).unwrap();
        assert_eq!(server.read(&mut MsgReader::new(&buf)).unwrap(), ClcMessage::Setting(setting));

        let setting = svc::Setting { index: 2, value: 100000 };
        let mut buf = Vec::new();
        server.write(&mut buf, &SvcMessage::Setting(setting)).unwrap();
        assert_eq!(client.read(&mut MsgReader::new(&buf)).unwrap(), SvcMessage::Setting(setting));
    }

    #[test]
    fn test_rejects_extended_game() {
        let info = ServerInfo {
            game_api: GameApi::Q2proExtended,
            ..Default::default()
        };
        let connect = ConnectInfo {
            protocol: Protocol::R1q2,
            version: 1905,
            ..Default::default()
        };
        assert_eq!(ServerContext::new(&info, &connect).err(), Some(Error::GametypeUnsupported));
    }
}
