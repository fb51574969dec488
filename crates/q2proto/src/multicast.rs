// multicast.rs -- messages written once and sent to many clients
//
// A multicast message must be readable by every client it goes to, so only
// messages without per-connection state can be written this way. The
// encoding is picked with `protocol::multicast_protocol`.

use tracing::trace;

use crate::common;
use crate::defs::*;
use crate::error::{Error, Result};
use crate::io::MsgWrite;
use crate::protocol::{GameApi, MulticastProtocol};
use crate::svc::SvcMessage;
use crate::tent::write_temp_entity;

/// Game API implied by a multicast encoding; temp entity layouts depend on it.
fn game_api_for(proto: MulticastProtocol) -> GameApi {
    match proto {
        MulticastProtocol::Short => GameApi::Vanilla,
        MulticastProtocol::Q2proExt => GameApi::Q2proExtendedV2,
        MulticastProtocol::Float => GameApi::Rerelease,
    }
}

/// Write `msg` so that every client using `proto` can read it.
pub fn write(proto: MulticastProtocol, io: &mut dyn MsgWrite, msg: &SvcMessage) -> Result<()> {
    trace!(message = msg.name(), ?proto, "multicast write");
    match msg {
        SvcMessage::Nop => io.write_u8(SVC_NOP),
        SvcMessage::Disconnect => io.write_u8(SVC_DISCONNECT),
        SvcMessage::Reconnect => io.write_u8(SVC_RECONNECT),
        SvcMessage::Sound(sound) => common::write_sound(io, proto, false, sound),
        SvcMessage::Print(print) => common::write_print(io, print),
        SvcMessage::StuffText(text) => common::write_string_cmd(io, SVC_STUFFTEXT, text),
        SvcMessage::ConfigString(cs) => common::write_configstring(io, cs),
        SvcMessage::CenterPrint(text) => common::write_string_cmd(io, SVC_CENTERPRINT, text),
        SvcMessage::Layout(layout) => common::write_string_cmd(io, SVC_LAYOUT, layout),
        SvcMessage::TempEntity(te) => write_temp_entity(io, proto, game_api_for(proto), te),
        SvcMessage::MuzzleFlash(flash) => common::write_muzzleflash(io, SVC_MUZZLEFLASH, flash, MZ_SILENCED),
        SvcMessage::MuzzleFlash2(flash) if flash.weapon > 0xff => {
            if proto != MulticastProtocol::Float {
                return Err(Error::InvalidArgument);
            }
            common::write_muzzleflash3(io, flash)
        }
        SvcMessage::MuzzleFlash2(flash) => common::write_muzzleflash(io, SVC_MUZZLEFLASH2, flash, 0),
        _ => Err(Error::NotImplemented),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Coord;
    use crate::io::MsgReader;
    use crate::svc::{MuzzleFlash, Print, Sound, TempEntity};

    #[test]
    fn test_print() {
        let mut buf = Vec::new();
        let msg = SvcMessage::Print(Print {
            level: 2,
            string: "hello".into(),
        });
        write(MulticastProtocol::Short, &mut buf, &msg).unwrap();
        assert_eq!(buf, b"\x0a\x02hello\0");
    }

    #[test]
    fn test_sound_position_encoding() {
        let sound = Sound {
            flags: SND_POS,
            index: 1,
            pos: [Coord::Float(1.0), Coord::Float(2.0), Coord::Float(3.0)],
            ..Default::default()
        };
        let mut short = Vec::new();
        write(MulticastProtocol::Short, &mut short, &SvcMessage::Sound(sound)).unwrap();
        let mut float = Vec::new();
        write(MulticastProtocol::Float, &mut float, &SvcMessage::Sound(sound)).unwrap();
        assert_eq!(short.len(), 3 + 6);
        assert_eq!(float.len(), 3 + 12);

        let read = common::read_sound(&mut MsgReader::new(&float[1..]), MulticastProtocol::Float, false).unwrap();
        assert_eq!(read.pos, sound.pos);
    }

    #[test]
    fn test_temp_entity() {
        let te = TempEntity {
            kind: TE_EXPLOSION1,
            position1: [10.0, 20.0, 30.0],
            ..Default::default()
        };
        let mut buf = Vec::new();
        write(MulticastProtocol::Q2proExt, &mut buf, &SvcMessage::TempEntity(te)).unwrap();
        assert_eq!(buf[0], SVC_TEMP_ENTITY);
        assert_eq!(buf.len(), 2 + 6);
    }

    #[test]
    fn test_muzzleflash3_needs_rerelease() {
        let flash = SvcMessage::MuzzleFlash2(MuzzleFlash {
            entity: 1,
            weapon: 300,
            silenced: false,
        });
        let mut buf = Vec::new();
        assert_eq!(write(MulticastProtocol::Short, &mut buf, &flash), Err(Error::InvalidArgument));
        write(MulticastProtocol::Float, &mut buf, &flash).unwrap();
        assert_eq!(buf, vec![SVC_RR_MUZZLEFLASH3, 1, 0, 0x2c, 0x01]);
    }

    #[test]
    fn test_frame_is_not_multicast() {
        let mut buf = Vec::new();
        assert_eq!(
            write(MulticastProtocol::Short, &mut buf, &SvcMessage::Reconnect),
            Ok(())
        );
        assert_eq!(
            write(MulticastProtocol::Short, &mut buf, &SvcMessage::Frame(Default::default())),
            Err(Error::NotImplemented)
        );
    }
}
