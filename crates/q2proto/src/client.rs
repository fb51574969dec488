// client.rs -- client side of a connection
//
// The context starts out knowing nothing about the server. The first
// serverdata message picks the dialect; after that every read goes through
// that dialect's reader. Compressed packets and blasts are inflated into a
// buffer that is drained before reading from the caller's source resumes.

use tracing::{debug, trace};

use crate::clc::ClcMessage;
use crate::common;
use crate::compression::Inflater;
use crate::defs::{CLC_STRINGCMD, SVC_SERVERDATA, SVC_STUFFTEXT};
use crate::entity::EntityBitset;
use crate::error::{Error, Result};
use crate::io::{MsgRead, MsgReader, MsgWrite};
use crate::protocol::{
    GameApi, Protocol, PROTOCOL_KEX, PROTOCOL_KEX_DEMOS, PROTOCOL_OLD_DEMO, PROTOCOL_Q2PRO, PROTOCOL_Q2PRO_DEMO_EXT,
    PROTOCOL_Q2PRO_DEMO_EXT_PLAYERFOG, PROTOCOL_Q2REPRO, PROTOCOL_R1Q2, PROTOCOL_VANILLA,
    PROTOCOL_VERSION_R1Q2_LONG_SOLID,
};
use crate::solid;
use crate::svc::SvcMessage;
use crate::{extdemo, kex, q2pro, q2repro, r1q2, vanilla};

/// What the server supports, learned from serverdata.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientFeatures {
    /// API level of the game running on the server
    pub server_game_api: GameApi,
    /// Moves may be sent batched
    pub batch_move: bool,
    /// Userinfo changes may be sent as deltas
    pub userinfo_delta: bool,
    /// Moves carry an upward component
    pub has_upmove: bool,
    /// Player states may carry a client number
    pub has_clientnum: bool,
    /// Bounding boxes are packed into 32 bits
    pub has_solid32: bool,
    /// Player states may carry fog
    pub has_playerfog: bool,
}

/// What the next read expects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadState {
    /// A command byte
    #[default]
    Steady,
    /// Entity records of a frame, up to entity number 0
    FrameEntities,
    /// Configstrings of a monolithic gamestate, followed by its baselines
    GamestateConfigStrings,
    ConfigStringStream,
    BaselineStream,
    /// Configstring records until the inflated blast runs out
    ConfigBlast,
    /// Baseline records until the inflated blast runs out
    BaselineBlast,
}

impl ReadState {
    fn is_blast(self) -> bool {
        matches!(self, ReadState::ConfigBlast | ReadState::BaselineBlast)
    }
}

/// Inflated data waiting to be read.
#[derive(Debug)]
struct Inflated {
    data: Vec<u8>,
    pos: usize,
}

#[derive(Debug, Default)]
pub struct ClientContext {
    pub features: ClientFeatures,
    pub(crate) state: ReadState,
    protocol: Option<Protocol>,
    protocol_version: u16,
    inflated: Option<Inflated>,
    reading_inflated: bool,
    /// Stream of a compressed download, kept across chunks
    pub(crate) download_inflater: Option<Inflater>,
    /// Entities whose current state has a nonzero solid (kex demos)
    pub(crate) kex_edict_nonzero_solid: EntityBitset,
    /// Entities whose baseline has a nonzero solid (kex demos)
    pub(crate) kex_baseline_nonzero_solid: EntityBitset,
}

impl ClientContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dialect of the server, once serverdata was received.
    pub fn protocol(&self) -> Option<Protocol> {
        self.protocol
    }

    pub fn protocol_version(&self) -> u16 {
        self.protocol_version
    }

    /// Switch to `protocol`, forgetting everything learned about the
    /// previous server.
    pub(crate) fn begin_protocol(&mut self, protocol: Protocol, version: u16) {
        debug!(%protocol, version, "client protocol");
        self.protocol = Some(protocol);
        self.protocol_version = version;
        self.features = ClientFeatures::default();
        self.state = ReadState::Steady;
        self.download_inflater = None;
    }

    /// Read the next message.
    ///
    /// `NoMoreInput` means the packet is used up. After any error inside a
    /// sub-stream the context is back to reading commands.
    pub fn read(&mut self, io: &mut dyn MsgRead) -> Result<SvcMessage> {
        loop {
            let result = match self.inflated.take() {
                Some(inflated) => self.read_inflated(inflated),
                None => {
                    if self.state.is_blast() {
                        self.state = ReadState::Steady;
                    }
                    self.read_one(io)
                }
            };
            match result {
                Ok(Some(msg)) => return Ok(msg),
                Ok(None) => continue,
                Err(err) => {
                    if self.state != ReadState::Steady {
                        debug!(state = ?self.state, %err, "sub-stream reset");
                        self.state = ReadState::Steady;
                        self.inflated = None;
                    }
                    return Err(err);
                }
            }
        }
    }

    fn read_inflated(&mut self, mut inflated: Inflated) -> Result<Option<SvcMessage>> {
        if inflated.pos >= inflated.data.len() {
            trace!(len = inflated.data.len(), "inflated data done");
            if self.state.is_blast() {
                self.state = ReadState::Steady;
            }
            return Ok(None);
        }
        let mut reader = MsgReader::new(&inflated.data[inflated.pos..]);
        self.reading_inflated = true;
        let result = self.read_one(&mut reader);
        self.reading_inflated = false;
        inflated.pos += reader.position();
        if result.is_ok() {
            self.inflated = Some(inflated);
        }
        result
    }

    /// One message from `io` in the current dialect. `None` asks for
    /// another read.
    fn read_one(&mut self, io: &mut dyn MsgRead) -> Result<Option<SvcMessage>> {
        match self.protocol {
            None => self.read_before_serverdata(io).map(Some),
            Some(Protocol::OldDemo | Protocol::Vanilla) => vanilla::client_read(self, io).map(Some),
            Some(Protocol::R1q2) => r1q2::client_read(self, io),
            Some(Protocol::Q2pro) => q2pro::client_read(self, io),
            Some(
                Protocol::Q2proExtendedDemo | Protocol::Q2proExtendedV2Demo | Protocol::Q2proExtendedDemoPlayerfog,
            ) => extdemo::client_read(self, io).map(Some),
            Some(Protocol::Q2repro) => q2repro::client_read(self, io),
            Some(Protocol::KexDemos | Protocol::Kex) => kex::client_read(self, io),
        }
    }

    /// Until serverdata arrives only stufftext is understood.
    fn read_before_serverdata(&mut self, io: &mut dyn MsgRead) -> Result<SvcMessage> {
        match io.read_u8()? {
            SVC_STUFFTEXT => Ok(SvcMessage::StuffText(io.read_string()?)),
            SVC_SERVERDATA => {
                let protocol = io.read_i32()?;
                let serverdata = match protocol {
                    PROTOCOL_OLD_DEMO..=PROTOCOL_VANILLA => vanilla::continue_serverdata(self, io, protocol)?,
                    PROTOCOL_R1Q2 => r1q2::continue_serverdata(self, io, protocol)?,
                    PROTOCOL_Q2PRO => q2pro::continue_serverdata(self, io, protocol)?,
                    PROTOCOL_Q2PRO_DEMO_EXT..=PROTOCOL_Q2PRO_DEMO_EXT_PLAYERFOG => {
                        extdemo::continue_serverdata(self, io, protocol)?
                    }
                    PROTOCOL_Q2REPRO => q2repro::continue_serverdata(self, io, protocol)?,
                    PROTOCOL_KEX_DEMOS | PROTOCOL_KEX => kex::continue_serverdata(self, io, protocol)?,
                    _ => return Err(Error::ProtocolNotSupported),
                };
                Ok(SvcMessage::ServerData(serverdata))
            }
            _ => Err(Error::ExpectedServerdata),
        }
    }

    /// Read the header of a compressed packet and queue its inflated contents.
    pub(crate) fn read_zpacket(&mut self, io: &mut dyn MsgRead) -> Result<()> {
        let compressed_len = io.read_u16()? as usize;
        let uncompressed_len = io.read_u16()? as usize;
        let data = Inflater::new().inflate(io.read_raw(compressed_len)?)?;
        trace!(compressed_len, uncompressed_len, inflated = data.len(), "zpacket");
        if data.len() != uncompressed_len {
            return Err(Error::BadData);
        }
        self.push_inflated(data)
    }

    /// Read `data` before anything else from the caller's source.
    pub(crate) fn push_inflated(&mut self, data: Vec<u8>) -> Result<()> {
        // compressed data never contains more compressed data
        if self.reading_inflated || self.inflated.is_some() {
            return Err(Error::BadData);
        }
        self.inflated = Some(Inflated { data, pos: 0 });
        Ok(())
    }

    /// Forget a compressed download in progress, e.g. when it was cancelled.
    pub fn download_reset(&mut self) {
        self.download_inflater = None;
    }

    /// Write one message. Before serverdata only string commands are allowed.
    pub fn write(&mut self, io: &mut dyn MsgWrite, msg: &ClcMessage) -> Result<()> {
        match self.protocol {
            None => match msg {
                ClcMessage::StringCmd(cmd) => common::write_string_cmd(io, CLC_STRINGCMD, cmd),
                _ => Err(Error::BadCommand),
            },
            Some(Protocol::OldDemo | Protocol::Vanilla) => vanilla::client_write(self, io, msg),
            Some(Protocol::R1q2) => r1q2::client_write(self, io, msg),
            Some(Protocol::Q2pro) => q2pro::client_write(self, io, msg),
            Some(Protocol::Q2repro) => q2repro::client_write(self, io, msg),
            Some(Protocol::KexDemos | Protocol::Kex) => kex::client_write(self, io, msg),
            // demo playback has nobody to talk to
            Some(
                Protocol::Q2proExtendedDemo | Protocol::Q2proExtendedV2Demo | Protocol::Q2proExtendedDemoPlayerfog,
            ) => Err(Error::NotImplemented),
        }
    }

    /// Pack a bounding box the way this server expects it.
    pub fn pack_solid(&self, mins: &[f32; 3], maxs: &[f32; 3]) -> u32 {
        match self.solid_encoding() {
            SolidEncoding::Short => solid::pack_solid_16(mins, maxs) as u32,
            SolidEncoding::R1q2 => solid::pack_solid_32_r1q2(mins, maxs),
            SolidEncoding::Q2proV2 => solid::pack_solid_32_q2pro_v2(mins, maxs),
        }
    }

    /// Bounding box of an entity's packed solid.
    pub fn unpack_solid(&self, solid: u32) -> ([f32; 3], [f32; 3]) {
        match self.solid_encoding() {
            SolidEncoding::Short => solid::unpack_solid_16(solid as u16),
            SolidEncoding::R1q2 => solid::unpack_solid_32_r1q2(solid),
            SolidEncoding::Q2proV2 => solid::unpack_solid_32_q2pro_v2(solid),
        }
    }

    fn solid_encoding(&self) -> SolidEncoding {
        match self.protocol {
            None | Some(Protocol::OldDemo | Protocol::Vanilla) => SolidEncoding::Short,
            Some(Protocol::R1q2) if self.protocol_version >= PROTOCOL_VERSION_R1Q2_LONG_SOLID => SolidEncoding::R1q2,
            Some(Protocol::R1q2) => SolidEncoding::Short,
            Some(Protocol::Q2pro) if self.features.server_game_api >= GameApi::Q2proExtended => SolidEncoding::Q2proV2,
            Some(Protocol::Q2pro) => SolidEncoding::R1q2,
            Some(_) => SolidEncoding::Q2proV2,
        }
    }
}

#[derive(Clone, Copy)]
enum SolidEncoding {
    Short,
    R1q2,
    Q2proV2,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::deflate_packet;
    use crate::connect::ConnectInfo;
    use crate::defs::{SVC_PRINT, SVC_Q2PRO_CONFIGSTRINGSTREAM, SVC_R1Q2_ZPACKET};
    use crate::protocol::{PROTOCOL_VERSION_Q2PRO_CURRENT, PROTOCOL_VERSION_R1Q2_CURRENT};
    use crate::server::{ServerContext, ServerInfo};
    use crate::svc::ServerData;

    fn zpacket(data: &[u8]) -> Vec<u8> {
        let compressed = deflate_packet(data).unwrap();
        let mut buf = vec![SVC_R1Q2_ZPACKET];
        buf.extend_from_slice(&(compressed.len() as u16).to_le_bytes());
        buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
        buf.extend_from_slice(&compressed);
        buf
    }

    #[test]
    fn test_stufftext_before_serverdata() {
        let mut client = ClientContext::new();
        let mut buf = Vec::new();
        common::write_string_cmd(&mut buf, SVC_STUFFTEXT, "cmd\n").unwrap();
        buf.push(SVC_PRINT);
        let mut r = MsgReader::new(&buf);
        assert_eq!(client.read(&mut r).unwrap(), SvcMessage::StuffText("cmd\n".into()));
        assert_eq!(client.read(&mut r), Err(Error::ExpectedServerdata));
        assert_eq!(client.protocol(), None);
    }

    #[test]
    fn test_unknown_serverdata_protocol() {
        let mut client = ClientContext::new();
        let mut buf = vec![SVC_SERVERDATA];
        buf.extend_from_slice(&33i32.to_le_bytes());
        // falls in the vanilla range
        assert!(client.read(&mut MsgReader::new(&buf)).is_err());

        let mut buf = vec![SVC_SERVERDATA];
        buf.extend_from_slice(&1234i32.to_le_bytes());
        assert_eq!(client.read(&mut MsgReader::new(&buf)), Err(Error::ProtocolNotSupported));
    }

    #[test]
    fn test_serverdata_selects_dialect() {
        for protocol in [Protocol::Vanilla, Protocol::R1q2, Protocol::Q2pro, Protocol::Q2repro, Protocol::Kex] {
            let version = match protocol {
                Protocol::R1q2 => PROTOCOL_VERSION_R1Q2_CURRENT,
                Protocol::Q2pro => PROTOCOL_VERSION_Q2PRO_CURRENT,
                Protocol::Q2repro => crate::protocol::PROTOCOL_VERSION_Q2REPRO_CURRENT,
                _ => 0,
            };
            let info = ServerInfo {
                game_api: match protocol {
                    Protocol::Q2repro | Protocol::Kex => GameApi::Rerelease,
                    _ => GameApi::Vanilla,
                },
                ..Default::default()
            };
            let connect = ConnectInfo {
                protocol,
                version,
                ..Default::default()
            };
            let mut server = ServerContext::new(&info, &connect).unwrap();
            let mut serverdata = ServerData {
                servercount: 7,
                gamedir: "baseq2".into(),
                levelname: "base1".into(),
                ..Default::default()
            };
            server.fill_serverdata(&mut serverdata);
            let mut buf = Vec::new();
            server.write(&mut buf, &SvcMessage::ServerData(serverdata)).unwrap();

            let mut client = ClientContext::new();
            let SvcMessage::ServerData(read) = client.read(&mut MsgReader::new(&buf)).unwrap() else {
                panic!("expected serverdata");
            };
            assert_eq!(client.protocol(), Some(protocol));
            assert_eq!(client.protocol_version(), version);
            assert_eq!(read.servercount, 7);
            assert_eq!(read.levelname, "base1");
        }
    }

    #[test]
    fn test_write_before_serverdata() {
        let mut client = ClientContext::new();
        let mut buf = Vec::new();
        client.write(&mut buf, &ClcMessage::StringCmd("connect".into())).unwrap();
        assert_eq!(buf[0], CLC_STRINGCMD);
        assert_eq!(client.write(&mut buf, &ClcMessage::Nop), Err(Error::BadCommand));
    }

    #[test]
    fn test_zpacket_messages_then_outer_source() {
        let mut client = ClientContext::new();
        client.begin_protocol(Protocol::R1q2, PROTOCOL_VERSION_R1Q2_CURRENT);

        let mut inner = Vec::new();
        common::write_string_cmd(&mut inner, SVC_STUFFTEXT, "one\n").unwrap();
        common::write_string_cmd(&mut inner, SVC_STUFFTEXT, "two\n").unwrap();
        let mut buf = zpacket(&inner);
        common::write_string_cmd(&mut buf, SVC_STUFFTEXT, "three\n").unwrap();

        let mut r = MsgReader::new(&buf);
        for text in ["one\n", "two\n", "three\n"] {
            assert_eq!(client.read(&mut r).unwrap(), SvcMessage::StuffText(text.into()));
        }
        assert_eq!(client.read(&mut r), Err(Error::NoMoreInput));
    }

    #[test]
    fn test_nested_zpacket_rejected() {
        let mut client = ClientContext::new();
        client.begin_protocol(Protocol::R1q2, PROTOCOL_VERSION_R1Q2_CURRENT);
        let mut inner = Vec::new();
        common::write_string_cmd(&mut inner, SVC_STUFFTEXT, "nested\n").unwrap();
        let buf = zpacket(&zpacket(&inner));
        assert_eq!(client.read(&mut MsgReader::new(&buf)), Err(Error::BadData));
    }

    #[test]
    fn test_stream_terminator_returns_to_steady() {
        let mut client = ClientContext::new();
        client.begin_protocol(Protocol::Q2pro, PROTOCOL_VERSION_Q2PRO_CURRENT);
        let mut buf = vec![SVC_Q2PRO_CONFIGSTRINGSTREAM];
        buf.extend_from_slice(&GameApi::Vanilla.max_configstrings().to_le_bytes());
        assert_eq!(client.read(&mut MsgReader::new(&buf)), Err(Error::NoMoreInput));
        assert_eq!(client.state, ReadState::Steady);
    }

    #[test]
    fn test_substream_error_resets() {
        let mut client = ClientContext::new();
        client.begin_protocol(Protocol::Q2pro, PROTOCOL_VERSION_Q2PRO_CURRENT);
        // configstring 5 without its terminating NUL
        let buf = [SVC_Q2PRO_CONFIGSTRINGSTREAM, 5, 0, b'a', b'b'];
        assert_eq!(client.read(&mut MsgReader::new(&buf)), Err(Error::BadData));
        assert_eq!(client.state, ReadState::Steady);

        let mut buf = Vec::new();
        common::write_string_cmd(&mut buf, SVC_STUFFTEXT, "ok\n").unwrap();
        assert_eq!(client.read(&mut MsgReader::new(&buf)).unwrap(), SvcMessage::StuffText("ok\n".into()));
    }

    #[test]
    fn test_solid_encoding_follows_server() {
        let mins = [-16.0, -16.0, -24.0];
        let maxs = [16.0, 16.0, 32.0];

        let mut client = ClientContext::new();
        client.begin_protocol(Protocol::Vanilla, 0);
        assert_eq!(client.pack_solid(&mins, &maxs), solid::pack_solid_16(&mins, &maxs) as u32);

        client.begin_protocol(Protocol::R1q2, PROTOCOL_VERSION_R1Q2_CURRENT);
        assert_eq!(client.pack_solid(&mins, &maxs), solid::pack_solid_32_r1q2(&mins, &maxs));

        client.begin_protocol(Protocol::Q2pro, PROTOCOL_VERSION_Q2PRO_CURRENT);
        client.features.server_game_api = GameApi::Q2proExtendedV2;
        let packed = client.pack_solid(&mins, &maxs);
        assert_eq!(packed, solid::pack_solid_32_q2pro_v2(&mins, &maxs));
        assert_eq!(client.unpack_solid(packed), (mins, maxs));
    }

    #[test]
    fn test_download_reset() {
        let mut client = ClientContext::new();
        client.download_inflater = Some(Inflater::new());
        client.download_reset();
        assert!(client.download_inflater.is_none());
    }
}
