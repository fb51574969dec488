// server.rs -- server side of a connection
//
// A `ServerContext` is created from the negotiated `ConnectInfo` (or for
// demo recording) and writes svc messages, the gamestate, downloads and
// zpackets in the connection's dialect. It also reads client messages.

use tracing::{debug, trace};

use crate::clc::ClcMessage;
use crate::common;
use crate::compression::{deflate_block, deflate_chunk, deflate_packet, DeflateWriter, MIN_COMPRESS_SIZE, ZPACKET_HEADER_SIZE};
use crate::connect::ConnectInfo;
use crate::entity::EntityBitset;
use crate::error::{Error, Result};
use crate::io::{MsgRead, MsgWrite};
use crate::packing::{self, PackedEntity, PackedPlayer, PackingFlavor};
use crate::protocol::{GameApi, Protocol};
use crate::svc::{ConfigString, Download, EntityStateDelta, PlayerStateDelta, ServerData, SpawnBaseline, SvcMessage};
use crate::{extdemo, kex, q2pro, q2repro, r1q2, vanilla};

/// Packet size used for demos when the server doesn't specify one.
const DEFAULT_DEMO_PACKET_LENGTH: usize = 1390;
/// Smallest demo packet size.
const MIN_DEMO_PACKET_LENGTH: usize = 512;
/// Message size limit of Q2PRO demos.
const MAX_DEMO_MSGLEN_EXTENDED: usize = 0x8000;

/// Plain download header: command, size, percent.
const DOWNLOAD_HEADER_SIZE: usize = 4;
/// R1Q2 compressed download header also carries the uncompressed size.
const R1Q2_ZDOWNLOAD_HEADER_SIZE: usize = 6;

/// Static information about the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServerInfo {
    /// API level of the game the server runs
    pub game_api: GameApi,
    /// Packet length used when the client doesn't request one
    pub default_packet_length: usize,
}

/// Connection features, decided when the context is created. The caller
/// may turn features off afterwards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServerFeatures {
    /// Zpackets, compressed downloads and gamestate blasts may be sent
    pub enable_deflate: bool,
    /// Already deflated file data may be sent as download chunks
    pub download_compress_raw: bool,
    /// The client handles beam old_origin correctly
    pub has_beam_old_origin_fix: bool,
    /// The player state can carry a client number
    pub playerstate_clientnum: bool,
    /// The player state can carry fog
    pub has_playerfog: bool,
}

/// Configstrings and baselines sent to a client entering the game.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Gamestate {
    pub configstrings: Vec<ConfigString>,
    pub spawnbaselines: Vec<SpawnBaseline>,
}

/// Outcome of a write that may stop when the packet is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Written {
    All,
    Partial,
}

pub struct ServerContext {
    pub info: ServerInfo,
    pub connect: ConnectInfo,
    /// Dialect minor version in use
    pub protocol_version: u16,
    pub features: ServerFeatures,
    pub(crate) zpacket_cmd: u8,
    /// Resume position of a gamestate that didn't fit in one packet
    pub(crate) gamestate_pos: usize,
    /// Protocol 26 frames lack the suppress count
    pub(crate) old_demo_frames: bool,
    pub(crate) kex_edict_nonzero_solid: EntityBitset,
    pub(crate) kex_baseline_nonzero_solid: EntityBitset,
}

impl ServerContext {
    /// Context for a client connected with `connect`.
    pub fn new(info: &ServerInfo, connect: &ConnectInfo) -> Result<Self> {
        let mut ctx = Self {
            info: *info,
            connect: connect.clone(),
            protocol_version: 0,
            features: ServerFeatures::default(),
            zpacket_cmd: 0,
            gamestate_pos: 0,
            old_demo_frames: false,
            kex_edict_nonzero_solid: EntityBitset::default(),
            kex_baseline_nonzero_solid: EntityBitset::default(),
        };
        match connect.protocol {
            Protocol::OldDemo => return Err(Error::ProtocolNotSupported),
            Protocol::Vanilla => vanilla::init_server(&mut ctx)?,
            Protocol::R1q2 => r1q2::init_server(&mut ctx)?,
            Protocol::Q2pro => q2pro::init_server(&mut ctx)?,
            Protocol::Q2proExtendedDemo | Protocol::Q2proExtendedV2Demo | Protocol::Q2proExtendedDemoPlayerfog => {
                extdemo::init_server(&mut ctx)?
            }
            Protocol::Q2repro => q2repro::init_server(&mut ctx)?,
            Protocol::KexDemos | Protocol::Kex => kex::init_server(&mut ctx)?,
        }
        debug!(
            protocol = %connect.protocol,
            version = ctx.protocol_version,
            deflate = ctx.features.enable_deflate,
            "server context"
        );
        Ok(ctx)
    }

    /// Context for recording a demo of a game with `info.game_api`.
    ///
    /// Returns the context and the maximum message length demo packets
    /// should have.
    pub fn new_demo(info: &ServerInfo) -> Result<(Self, usize)> {
        let packet_length = match info.default_packet_length {
            0 => DEFAULT_DEMO_PACKET_LENGTH,
            n => n,
        }
        .max(MIN_DEMO_PACKET_LENGTH);
        let (protocol, max_msglen) = match info.game_api {
            GameApi::Vanilla => (Protocol::Vanilla, packet_length),
            GameApi::Q2proExtended => (Protocol::Q2proExtendedDemo, MAX_DEMO_MSGLEN_EXTENDED),
            GameApi::Q2proExtendedV2 => (Protocol::Q2proExtendedDemoPlayerfog, MAX_DEMO_MSGLEN_EXTENDED),
            GameApi::Rerelease => (Protocol::Q2repro, MAX_DEMO_MSGLEN_EXTENDED),
        };
        let connect = ConnectInfo {
            protocol,
            version: match protocol {
                Protocol::Q2repro => crate::protocol::PROTOCOL_VERSION_Q2REPRO_CURRENT,
                _ => 0,
            },
            packet_length,
            ..Default::default()
        };
        Ok((Self::new(info, &connect)?, max_msglen))
    }

    pub fn protocol(&self) -> Protocol {
        self.connect.protocol
    }

    /// Fill in the protocol fields of a serverdata message.
    pub fn fill_serverdata(&self, serverdata: &mut ServerData) {
        match self.connect.protocol {
            Protocol::OldDemo | Protocol::Vanilla => vanilla::fill_serverdata(self, serverdata),
            Protocol::R1q2 => r1q2::fill_serverdata(self, serverdata),
            Protocol::Q2pro => q2pro::fill_serverdata(self, serverdata),
            Protocol::Q2proExtendedDemo | Protocol::Q2proExtendedV2Demo | Protocol::Q2proExtendedDemoPlayerfog => {
                extdemo::fill_serverdata(self, serverdata)
            }
            Protocol::Q2repro => q2repro::fill_serverdata(self, serverdata),
            Protocol::KexDemos | Protocol::Kex => kex::fill_serverdata(self, serverdata),
        }
    }

    /// How game states are packed for this connection.
    pub fn packing_flavor(&self) -> PackingFlavor {
        match self.connect.protocol {
            Protocol::Q2repro | Protocol::KexDemos | Protocol::Kex => PackingFlavor::Repro,
            _ => PackingFlavor::Vanilla,
        }
    }

    /// Entity delta in the fields this connection can transmit.
    pub fn make_entity_delta(
        &self,
        from: Option<&PackedEntity>,
        to: &PackedEntity,
        write_old_origin: bool,
    ) -> EntityStateDelta {
        let extended = match self.connect.protocol {
            Protocol::OldDemo | Protocol::Vanilla | Protocol::R1q2 => false,
            Protocol::Q2repro => true,
            _ => self.info.game_api != GameApi::Vanilla,
        };
        packing::make_entity_delta(from, to, write_old_origin, extended)
    }

    pub fn make_player_delta(&self, from: Option<&PackedPlayer>, to: &PackedPlayer) -> PlayerStateDelta {
        packing::make_player_delta(self.packing_flavor(), from, to)
    }

    /// Write one message.
    pub fn write(&mut self, io: &mut dyn MsgWrite, msg: &SvcMessage) -> Result<()> {
        match self.connect.protocol {
            Protocol::OldDemo | Protocol::Vanilla => vanilla::server_write(self, io, msg),
            Protocol::R1q2 => r1q2::server_write(self, io, msg),
            Protocol::Q2pro => q2pro::server_write(self, io, msg),
            Protocol::Q2proExtendedDemo | Protocol::Q2proExtendedV2Demo | Protocol::Q2proExtendedDemoPlayerfog => {
                extdemo::server_write(self, io, msg)
            }
            Protocol::Q2repro => q2repro::server_write(self, io, msg),
            Protocol::KexDemos | Protocol::Kex => kex::server_write(self, io, msg),
        }
    }

    /// Write as much of `gamestate` as fits.
    ///
    /// Returns `NotEnoughPacketSpace` if more remains; the caller sends the
    /// packet and calls again with the same gamestate.
    pub fn write_gamestate(&mut self, io: &mut dyn MsgWrite, gamestate: &Gamestate) -> Result<()> {
        match self.connect.protocol {
            Protocol::OldDemo | Protocol::Vanilla => vanilla::write_gamestate(self, io, gamestate),
            Protocol::R1q2 => r1q2::write_gamestate(self, io, gamestate),
            Protocol::Q2pro => q2pro::write_gamestate(self, io, gamestate),
            Protocol::Q2proExtendedDemo | Protocol::Q2proExtendedV2Demo | Protocol::Q2proExtendedDemoPlayerfog => {
                extdemo::write_gamestate(self, io, gamestate)
            }
            Protocol::Q2repro => q2repro::write_gamestate(self, io, gamestate),
            Protocol::KexDemos | Protocol::Kex => kex::write_gamestate(self, io, gamestate),
        }
    }

    /// Compress an assembled packet into a zpacket.
    ///
    /// Fails with `AlreadyCompressed` if the packet already is one or doesn't
    /// get smaller; the caller then sends it as is.
    pub fn write_zpacket(&self, io: &mut dyn MsgWrite, packet: &[u8]) -> Result<()> {
        if !self.features.enable_deflate {
            return Err(Error::DeflateNotSupported);
        }
        match packet.first() {
            None => return Err(Error::InvalidArgument),
            Some(&cmd) if cmd == self.zpacket_cmd => return Err(Error::AlreadyCompressed),
            Some(_) => {}
        }
        let uncompressed_len = u16::try_from(packet.len()).map_err(|_| Error::InvalidArgument)?;
        let compressed = deflate_packet(packet)?;
        if compressed.len() + ZPACKET_HEADER_SIZE >= packet.len() {
            return Err(Error::AlreadyCompressed);
        }
        if io.available() < compressed.len() + ZPACKET_HEADER_SIZE {
            return Err(Error::NotEnoughPacketSpace);
        }
        trace!(uncompressed_len, compressed_len = compressed.len(), "zpacket");
        io.write_u8(self.zpacket_cmd)?;
        io.write_u16(compressed.len() as u16)?;
        io.write_u16(uncompressed_len)?;
        io.write_raw(&compressed)
    }

    /// Start sending a file of `total_size` bytes.
    pub fn download_begin(&self, total_size: usize, compress: DownloadCompress) -> Result<DownloadState> {
        let encoding = match self.connect.protocol {
            Protocol::R1q2 => r1q2::download_encoding(self, total_size, compress)?,
            Protocol::Q2pro | Protocol::Q2repro => q2pro::download_encoding(self, total_size, compress)?,
            _ => DownloadEncoding::Plain,
        };
        debug!(total_size, ?encoding, "download begin");
        Ok(DownloadState {
            encoding,
            total_size,
            transferred: 0,
        })
    }

    /// Read one client message.
    pub fn read(&mut self, io: &mut dyn MsgRead) -> Result<ClcMessage> {
        match self.connect.protocol {
            Protocol::OldDemo | Protocol::Vanilla => vanilla::server_read(self, io),
            Protocol::R1q2 => r1q2::server_read(self, io),
            Protocol::Q2pro => q2pro::server_read(self, io),
            Protocol::Q2repro => q2repro::server_read(self, io),
            Protocol::KexDemos | Protocol::Kex => kex::server_read(self, io),
            // demos have no client
            Protocol::Q2proExtendedDemo | Protocol::Q2proExtendedV2Demo | Protocol::Q2proExtendedDemoPlayerfog => {
                Err(Error::NotImplemented)
            }
        }
    }
}

// ============================================================
// Zpackets and gamestate records
// ============================================================

/// Run `write`, deflating its output into a zpacket if the connection
/// allows it.
///
/// `Written::Partial` turns into `NotEnoughPacketSpace` once the written
/// part was emitted.
pub(crate) fn maybe_zpacket(
    ctx: &mut ServerContext,
    io: &mut dyn MsgWrite,
    write: impl FnOnce(&mut ServerContext, &mut dyn MsgWrite) -> Result<Written>,
) -> Result<()> {
    let written = if ctx.features.enable_deflate {
        let available = io.available();
        if available < MIN_COMPRESS_SIZE {
            return Err(Error::NotEnoughPacketSpace);
        }
        let mut deflate = DeflateWriter::new((available - ZPACKET_HEADER_SIZE).min(u16::MAX as usize));
        let written = write(ctx, &mut deflate)?;
        if deflate.uncompressed_len() > 0 {
            let (uncompressed_len, data) = deflate.finish()?;
            let compressed_len = u16::try_from(data.len()).map_err(|_| Error::NotEnoughPacketSpace)?;
            let uncompressed_len = u16::try_from(uncompressed_len).map_err(|_| Error::NotEnoughPacketSpace)?;
            trace!(uncompressed_len, compressed_len, "zpacket");
            io.write_u8(ctx.zpacket_cmd)?;
            io.write_u16(compressed_len)?;
            io.write_u16(uncompressed_len)?;
            io.write_raw(&data)?;
        }
        written
    } else {
        write(ctx, io)?
    };
    match written {
        Written::All => Ok(()),
        Written::Partial => Err(Error::NotEnoughPacketSpace),
    }
}

/// Gamestate as individual configstring and spawnbaseline messages.
pub(crate) fn write_gamestate_records(
    ctx: &mut ServerContext,
    io: &mut dyn MsgWrite,
    gamestate: &Gamestate,
    baseline_size: usize,
    write_spawnbaseline: impl Fn(&mut ServerContext, &mut dyn MsgWrite, &SpawnBaseline) -> Result<()>,
) -> Result<()> {
    maybe_zpacket(ctx, io, |ctx, io| {
        let num_configstrings = gamestate.configstrings.len();
        while let Some(cs) = gamestate.configstrings.get(ctx.gamestate_pos) {
            // command, index, string and terminator
            if io.available() < 1 + 2 + cs.value.len() + 1 {
                return Ok(Written::Partial);
            }
            common::write_configstring(io, cs)?;
            ctx.gamestate_pos += 1;
        }
        while let Some(baseline) = gamestate.spawnbaselines.get(ctx.gamestate_pos - num_configstrings) {
            if io.available() < baseline_size {
                return Ok(Written::Partial);
            }
            write_spawnbaseline(ctx, io, baseline)?;
            ctx.gamestate_pos += 1;
        }
        ctx.gamestate_pos = 0;
        Ok(Written::All)
    })
}

// ============================================================
// Downloads
// ============================================================

/// Compression the caller asks for when starting a download.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DownloadCompress {
    /// Send the data as is
    #[default]
    None,
    /// Compress if the connection supports it
    Auto,
    /// The file data is already raw deflate compressed
    Raw,
}

/// How download chunks are sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadEncoding {
    /// Uncompressed `svc_download`
    Plain,
    /// Pass-through of already deflated data
    RawDeflate,
    /// One deflate stream spanning all chunks
    Compress,
    /// A separate deflate stream per chunk
    ChunkCompress,
}

/// Progress of one file transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadState {
    encoding: DownloadEncoding,
    total_size: usize,
    transferred: usize,
}

impl DownloadState {
    pub fn encoding(&self) -> DownloadEncoding {
        self.encoding
    }

    /// Bytes sent and total bytes.
    pub fn progress(&self) -> (usize, usize) {
        (self.transferred, self.total_size)
    }

    pub fn is_complete(&self) -> bool {
        self.transferred == self.total_size
    }

    /// Next chunk of the file, taken from the front of `data`, sized to fit
    /// into `packet_remaining` bytes.
    ///
    /// `data` holds the part of the file not sent yet. Fails with
    /// `DownloadComplete` once the whole file went out.
    pub fn data(&mut self, data: &mut &[u8], packet_remaining: usize) -> Result<Download> {
        if self.total_size > 0 && self.is_complete() {
            return Err(Error::DownloadComplete);
        }
        let header = match self.encoding {
            DownloadEncoding::ChunkCompress => R1Q2_ZDOWNLOAD_HEADER_SIZE,
            _ => DOWNLOAD_HEADER_SIZE,
        };
        if packet_remaining <= header {
            return Err(Error::NotEnoughPacketSpace);
        }
        let max_size = (packet_remaining - header).min(i16::MAX as usize);
        let input = &data[..data.len().min(i16::MAX as usize)];

        let (consumed, chunk, compressed, uncompressed_size) = match self.encoding {
            DownloadEncoding::Plain | DownloadEncoding::RawDeflate => {
                let n = input.len().min(max_size);
                let compressed = self.encoding == DownloadEncoding::RawDeflate;
                // raw data doesn't know its uncompressed size
                let uncompressed_size = if compressed { -1 } else { 0 };
                (n, input[..n].to_vec(), compressed, uncompressed_size)
            }
            DownloadEncoding::Compress => {
                let (n, out) = deflate_chunk(input, max_size, input.len() == data.len())?;
                (n, out, true, n as i16)
            }
            DownloadEncoding::ChunkCompress => {
                let (n, out) = deflate_block(input, max_size)?;
                (n, out, true, n as i16)
            }
        };
        *data = &data[consumed..];
        self.transferred = self.total_size.saturating_sub(data.len());
        trace!(consumed, size = chunk.len(), transferred = self.transferred, "download chunk");

        Ok(Download {
            size: chunk.len() as i16,
            percent: self.percent(),
            data: chunk,
            compressed,
            uncompressed_size,
        })
    }

    /// Message marking the end of the download.
    pub fn finish(&self) -> Download {
        Download {
            percent: 100,
            ..Default::default()
        }
    }

    /// Message telling the client the download failed.
    pub fn abort(&self) -> Download {
        Download {
            size: -1,
            percent: self.percent(),
            ..Default::default()
        }
    }

    fn percent(&self) -> u8 {
        if self.total_size == 0 {
            return 100;
        }
        (self.transferred * 100 / self.total_size).min(100) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientContext;
    use crate::io::{MsgReader, SizeBuf};
    use crate::protocol::{PROTOCOL_VERSION_Q2PRO_CURRENT, PROTOCOL_VERSION_R1Q2_CURRENT};

    fn connected(protocol: Protocol, version: u16, has_zlib: bool) -> (ServerContext, ClientContext) {
        let connect = ConnectInfo {
            protocol,
            version,
            has_zlib,
            ..Default::default()
        };
        let server = ServerContext::new(&ServerInfo::default(), &connect).unwrap();
        let mut client = ClientContext::new();
        client.begin_protocol(protocol, version);
        (server, client)
    }

    #[test]
    fn test_old_demo_not_connectable() {
        let connect = ConnectInfo {
            protocol: Protocol::OldDemo,
            ..Default::default()
        };
        assert_eq!(
            ServerContext::new(&ServerInfo::default(), &connect).err(),
            Some(Error::ProtocolNotSupported)
        );
    }

    #[test]
    fn test_demo_contexts() {
        let (ctx, len) = ServerContext::new_demo(&ServerInfo::default()).unwrap();
        assert_eq!(ctx.protocol(), Protocol::Vanilla);
        assert_eq!(len, DEFAULT_DEMO_PACKET_LENGTH);

        let info = ServerInfo {
            game_api: GameApi::Vanilla,
            default_packet_length: 100,
        };
        assert_eq!(ServerContext::new_demo(&info).unwrap().1, MIN_DEMO_PACKET_LENGTH);

        let info = ServerInfo {
            game_api: GameApi::Q2proExtendedV2,
            ..Default::default()
        };
        let (ctx, len) = ServerContext::new_demo(&info).unwrap();
        assert_eq!(ctx.protocol(), Protocol::Q2proExtendedDemoPlayerfog);
        assert_eq!(len, MAX_DEMO_MSGLEN_EXTENDED);

        let info = ServerInfo {
            game_api: GameApi::Rerelease,
            ..Default::default()
        };
        assert_eq!(ServerContext::new_demo(&info).unwrap().0.protocol(), Protocol::Q2repro);
    }

    #[test]
    fn test_zpacket_round_trip() {
        let (server, mut client) = connected(Protocol::R1q2, PROTOCOL_VERSION_R1Q2_CURRENT, true);
        let mut packet = Vec::new();
        for _ in 0..20 {
            common::write_string_cmd(&mut packet, crate::defs::SVC_STUFFTEXT, "cmd configstrings 1 0\n").unwrap();
        }
        let mut buf = Vec::new();
        server.write_zpacket(&mut buf, &packet).unwrap();
        assert_eq!(buf[0], crate::defs::SVC_R1Q2_ZPACKET);
        assert!(buf.len() < packet.len());

        let mut r = MsgReader::new(&buf);
        for _ in 0..20 {
            assert_eq!(
                client.read(&mut r).unwrap(),
                SvcMessage::StuffText("cmd configstrings 1 0\n".into())
            );
        }
        assert_eq!(client.read(&mut r), Err(Error::NoMoreInput));

        // compressing twice is refused
        assert_eq!(server.write_zpacket(&mut Vec::new(), &buf), Err(Error::AlreadyCompressed));
    }

    #[test]
    fn test_zpacket_needs_deflate() {
        let (server, _) = connected(Protocol::R1q2, PROTOCOL_VERSION_R1Q2_CURRENT, false);
        assert_eq!(server.write_zpacket(&mut Vec::new(), &[1, 2, 3]), Err(Error::DeflateNotSupported));
    }

    #[test]
    fn test_gamestate_records_resume() {
        let (mut server, mut client) = connected(Protocol::Vanilla, 0, false);
        let gamestate = Gamestate {
            configstrings: (0..30)
                .map(|index| ConfigString {
                    index,
                    value: format!("configstring number {index}"),
                })
                .collect(),
            spawnbaselines: Vec::new(),
        };

        let mut received = Vec::new();
        let mut packets = 0;
        loop {
            let mut buf = SizeBuf::new(200);
            let result = server.write_gamestate(&mut buf, &gamestate);
            packets += 1;
            let mut r = MsgReader::new(buf.as_bytes());
            while let Ok(SvcMessage::ConfigString(cs)) = client.read(&mut r) {
                received.push(cs);
            }
            match result {
                Ok(()) => break,
                Err(err) => assert_eq!(err, Error::NotEnoughPacketSpace),
            }
        }
        assert!(packets > 1);
        assert_eq!(received, gamestate.configstrings);
        assert_eq!(server.gamestate_pos, 0);
    }

    #[test]
    fn test_plain_download() {
        let (server, _) = connected(Protocol::Vanilla, 0, false);
        let file = vec![7u8; 250];
        let mut state = server.download_begin(file.len(), DownloadCompress::Auto).unwrap();
        assert_eq!(state.encoding(), DownloadEncoding::Plain);

        let mut rest = &file[..];
        let sizes_and_percent: Vec<_> = (0..3)
            .map(|_| {
                let chunk = state.data(&mut rest, 104).unwrap();
                (chunk.size, chunk.percent)
            })
            .collect();
        assert_eq!(sizes_and_percent, vec![(100, 40), (100, 80), (50, 100)]);
        assert!(state.is_complete());
        assert_eq!(state.data(&mut rest, 104), Err(Error::DownloadComplete));
        assert_eq!(state.finish().percent, 100);
        assert_eq!(state.abort().size, -1);
    }

    #[test]
    fn test_download_needs_space() {
        let (server, _) = connected(Protocol::Vanilla, 0, false);
        let mut state = server.download_begin(10, DownloadCompress::None).unwrap();
        let mut rest = &[0u8; 10][..];
        assert_eq!(state.data(&mut rest, 3), Err(Error::NotEnoughPacketSpace));
        assert_eq!(rest.len(), 10);
    }

    #[test]
    fn test_compressed_download_spans_packets() {
        let (mut server, mut client) = connected(Protocol::Q2pro, PROTOCOL_VERSION_Q2PRO_CURRENT, true);
        let file: Vec<u8> = (0..6000u32).map(|i| (i * 7919 % 251) as u8 ^ (i / 97) as u8).collect();
        let mut state = server.download_begin(file.len(), DownloadCompress::Auto).unwrap();
        assert_eq!(state.encoding(), DownloadEncoding::Compress);

        let mut rest = &file[..];
        let mut received = Vec::new();
        while !state.is_complete() {
            let chunk = state.data(&mut rest, 300).unwrap();
            let mut buf = Vec::new();
            server.write(&mut buf, &SvcMessage::Download(chunk)).unwrap();
            let SvcMessage::Download(read) = client.read(&mut MsgReader::new(&buf)).unwrap() else {
                panic!("expected a download");
            };
            received.extend_from_slice(&read.data);
        }
        assert_eq!(received, file);
    }

    #[test]
    fn test_raw_download_needs_support() {
        let (server, _) = connected(Protocol::R1q2, PROTOCOL_VERSION_R1Q2_CURRENT, true);
        assert_eq!(
            server.download_begin(100, DownloadCompress::Raw).err(),
            Some(Error::RawCompressNotSupported)
        );
        let (server, _) = connected(Protocol::Q2pro, PROTOCOL_VERSION_Q2PRO_CURRENT, true);
        let state = server.download_begin(100, DownloadCompress::Raw).unwrap();
        assert_eq!(state.encoding(), DownloadEncoding::RawDeflate);
    }
}
