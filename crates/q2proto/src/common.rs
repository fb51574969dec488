// common.rs -- message layouts shared by several dialects
//
// Positions in game messages (sounds, temp entities) use the multicast
// encoding of the connection: 16 bit coordinates, Q2PRO int23 or floats.

use crate::coords::{coords_to_float, Color, ColorDelta, Coord, Fraction};
use crate::defs::*;
use crate::error::{Error, Result};
use crate::io::{MsgRead, MsgWrite};
use crate::protocol::MulticastProtocol;
use crate::svc::{
    ConfigString, Damage, DamageIndicator, Download, Fog, FogFlags, HelpPath, LocPrint, MuzzleFlash, Poi, Print,
    Sound,
};
use crate::tent::read_dir;

// ============================================================
// Positions
// ============================================================

pub fn read_pos(io: &mut dyn MsgRead, proto: MulticastProtocol) -> Result<[Coord; 3]> {
    let mut pos = [Coord::default(); 3];
    for c in pos.iter_mut() {
        *c = match proto {
            MulticastProtocol::Short => Coord::from_short(io.read_i16()?),
            MulticastProtocol::Q2proExt => Coord::Int(io.read_q2pro_i23()?.0),
            MulticastProtocol::Float => Coord::Float(io.read_float()?),
        };
    }
    Ok(pos)
}

pub fn write_pos(io: &mut dyn MsgWrite, proto: MulticastProtocol, pos: &[Coord; 3]) -> Result<()> {
    for c in pos {
        match proto {
            MulticastProtocol::Short => io.write_i16(c.to_short())?,
            MulticastProtocol::Q2proExt => io.write_q2pro_i23(c.to_int(), 0)?,
            MulticastProtocol::Float => io.write_float(c.to_float())?,
        }
    }
    Ok(())
}

pub fn read_pos_float(io: &mut dyn MsgRead, proto: MulticastProtocol) -> Result<[f32; 3]> {
    Ok(coords_to_float(&read_pos(io, proto)?))
}

pub fn write_pos_float(io: &mut dyn MsgWrite, proto: MulticastProtocol, pos: &[f32; 3]) -> Result<()> {
    write_pos(io, proto, &pos.map(Coord::Float))
}

// ============================================================
// Server to client
// ============================================================

pub fn read_muzzleflash(io: &mut dyn MsgRead, silenced_mask: u16) -> Result<MuzzleFlash> {
    let entity = io.read_i16()?;
    let weapon = io.read_u8()? as u16;
    Ok(MuzzleFlash {
        entity,
        weapon: weapon & !silenced_mask,
        silenced: weapon & silenced_mask != 0,
    })
}

pub fn write_muzzleflash(io: &mut dyn MsgWrite, cmd: u8, flash: &MuzzleFlash, silenced_mask: u16) -> Result<()> {
    let mut weapon = flash.weapon;
    if flash.silenced {
        weapon |= silenced_mask;
    }
    if weapon > 0xff {
        return Err(Error::InvalidArgument);
    }
    io.write_u8(cmd)?;
    io.write_i16(flash.entity)?;
    io.write_u8(weapon as u8)
}

/// Rerelease muzzle flash with a 16 bit weapon number.
pub fn read_muzzleflash3(io: &mut dyn MsgRead) -> Result<MuzzleFlash> {
    Ok(MuzzleFlash {
        entity: io.read_i16()?,
        weapon: io.read_u16()?,
        silenced: false,
    })
}

pub fn write_muzzleflash3(io: &mut dyn MsgWrite, flash: &MuzzleFlash) -> Result<()> {
    io.write_u8(SVC_RR_MUZZLEFLASH3)?;
    io.write_i16(flash.entity)?;
    io.write_u16(flash.weapon)
}

pub fn read_inventory(io: &mut dyn MsgRead) -> Result<Box<[i16; INVENTORY_ITEMS]>> {
    let mut inventory = Box::new([0i16; INVENTORY_ITEMS]);
    for item in inventory.iter_mut() {
        *item = io.read_i16()?;
    }
    Ok(inventory)
}

pub fn read_print(io: &mut dyn MsgRead) -> Result<Print> {
    let level = io.read_u8()?;
    let string = io.read_string()?;
    Ok(Print { level, string })
}

pub fn read_configstring(io: &mut dyn MsgRead) -> Result<ConfigString> {
    let index = io.read_u16()?;
    let value = io.read_string()?;
    Ok(ConfigString { index, value })
}

pub fn read_download(io: &mut dyn MsgRead) -> Result<Download> {
    let size = io.read_i16()?;
    let percent = io.read_u8()?;
    let data = if size > 0 { io.read_data(size as usize)? } else { Vec::new() };
    Ok(Download {
        size,
        percent,
        data,
        ..Default::default()
    })
}

/// Read a sound message. The KEX dialect always sends a 16 bit sound index
/// and may send a 32 bit entity/channel word.
pub fn read_sound(io: &mut dyn MsgRead, proto: MulticastProtocol, kex: bool) -> Result<Sound> {
    let flags = io.read_u8()?;
    let index = if kex || flags & SND_Q2PRO_INDEX16 != 0 {
        io.read_u16()?
    } else {
        io.read_u8()? as u16
    };

    let mut sound = Sound {
        flags,
        index,
        volume: SOUND_DEFAULT_VOLUME,
        attenuation: SOUND_DEFAULT_ATTENUATION,
        ..Default::default()
    };
    if flags & SND_VOLUME != 0 {
        sound.volume = io.read_u8()?;
    }
    if flags & SND_ATTENUATION != 0 {
        sound.attenuation = io.read_u8()?;
    }
    if flags & SND_OFFSET != 0 {
        sound.timeofs = io.read_u8()?;
    }
    if flags & SND_ENT != 0 {
        let entchan = if kex && flags & SND_KEX_LARGE_ENT != 0 {
            io.read_u32()?
        } else {
            io.read_u16()? as u32
        };
        sound.entity = (entchan >> 3) as u16;
        sound.channel = (entchan & 7) as u8;
    }
    if flags & SND_POS != 0 {
        sound.pos = read_pos(io, proto)?;
    }
    Ok(sound)
}

pub fn write_sound(io: &mut dyn MsgWrite, proto: MulticastProtocol, kex: bool, sound: &Sound) -> Result<()> {
    let mut flags = sound.flags;
    if kex {
        flags &= !SND_KEX_LARGE_ENT;
        if flags & SND_ENT != 0 && sound.entity >= 0x2000 {
            flags |= SND_KEX_LARGE_ENT;
        }
    }

    io.write_u8(SVC_SOUND)?;
    io.write_u8(flags)?;
    if kex || flags & SND_Q2PRO_INDEX16 != 0 {
        io.write_u16(sound.index)?;
    } else {
        io.write_u8(sound.index as u8)?;
    }
    if flags & SND_VOLUME != 0 {
        io.write_u8(sound.volume)?;
    }
    if flags & SND_ATTENUATION != 0 {
        io.write_u8(sound.attenuation)?;
    }
    if flags & SND_OFFSET != 0 {
        io.write_u8(sound.timeofs)?;
    }
    if flags & SND_ENT != 0 {
        let entchan = ((sound.entity as u32) << 3) | (sound.channel & 7) as u32;
        if flags & SND_KEX_LARGE_ENT != 0 {
            io.write_u32(entchan)?;
        } else {
            io.write_u16(entchan as u16)?;
        }
    }
    if flags & SND_POS != 0 {
        write_pos(io, proto, &sound.pos)?;
    }
    Ok(())
}

/// Command byte followed by a string (layout, stufftext, centerprint, clc stringcmd ...)
pub fn write_string_cmd(io: &mut dyn MsgWrite, cmd: u8, s: &str) -> Result<()> {
    io.write_u8(cmd)?;
    io.write_string(s)
}

pub fn write_print(io: &mut dyn MsgWrite, print: &Print) -> Result<()> {
    io.write_u8(SVC_PRINT)?;
    io.write_u8(print.level)?;
    io.write_string(&print.string)
}

pub fn write_configstring(io: &mut dyn MsgWrite, configstring: &ConfigString) -> Result<()> {
    io.write_u8(SVC_CONFIGSTRING)?;
    io.write_u16(configstring.index)?;
    io.write_string(&configstring.value)
}

/// Payload of a download chunk. A positive `size` must match the data length.
pub fn download_payload(download: &Download) -> Result<&[u8]> {
    if download.size <= 0 {
        return Ok(&[]);
    }
    match download.data.get(..download.size as usize) {
        Some(data) if data.len() == download.data.len() => Ok(data),
        _ => Err(Error::BadData),
    }
}

/// Plain (uncompressed) download chunk.
pub fn write_download(io: &mut dyn MsgWrite, download: &Download) -> Result<()> {
    let data = download_payload(download)?;
    io.write_u8(SVC_DOWNLOAD)?;
    io.write_i16(download.size)?;
    io.write_u8(download.percent)?;
    io.write_raw(data)
}

// ============================================================
// Rerelease messages
// ============================================================

pub fn read_damage(io: &mut dyn MsgRead) -> Result<Damage> {
    let mut damage = Damage {
        count: io.read_u8()?,
        ..Default::default()
    };
    for i in 0..damage.count as usize {
        let encoded = io.read_u8()?;
        let direction = read_dir(io)?;
        if i >= MAX_DAMAGE_INDICATORS {
            continue;
        }
        damage.damage[i] = DamageIndicator {
            damage: encoded & 0x1f,
            health: encoded & 0x20 != 0,
            armor: encoded & 0x40 != 0,
            shield: encoded & 0x80 != 0,
            direction,
        };
    }
    Ok(damage)
}

fn read_color_comps(io: &mut dyn MsgRead, bits: u16, comp_bits: [u16; 3], color: &mut ColorDelta) -> Result<()> {
    for (c, &bit) in comp_bits.iter().enumerate() {
        if bits & bit != 0 {
            color.set_comp(c, Color::Byte(io.read_u8()?));
        }
    }
    Ok(())
}

fn write_color_comps(io: &mut dyn MsgWrite, color: &ColorDelta) -> Result<()> {
    for c in 0..3 {
        if color.has(c) {
            io.write_u8(color.values[c].to_byte())?;
        }
    }
    Ok(())
}

fn color_bits(color: &ColorDelta, comp_bits: [u16; 3]) -> u16 {
    (0..3).filter(|&c| color.has(c)).fold(0, |bits, c| bits | comp_bits[c])
}

const GLOBAL_RGB: [u16; 3] = [FOG_RR_BIT_R, FOG_RR_BIT_G, FOG_RR_BIT_B];
const START_RGB: [u16; 3] = [FOG_RR_BIT_HEIGHTFOG_START_R, FOG_RR_BIT_HEIGHTFOG_START_G, FOG_RR_BIT_HEIGHTFOG_START_B];
const END_RGB: [u16; 3] = [FOG_RR_BIT_HEIGHTFOG_END_R, FOG_RR_BIT_HEIGHTFOG_END_G, FOG_RR_BIT_HEIGHTFOG_END_B];

pub fn read_fog(io: &mut dyn MsgRead) -> Result<Fog> {
    let mut bits = io.read_u8()? as u16;
    if bits & FOG_RR_BIT_MORE_BITS != 0 {
        bits |= (io.read_u8()? as u16) << 8;
    }

    let mut fog = Fog::default();
    if bits & FOG_RR_BIT_DENSITY != 0 {
        fog.flags |= FogFlags::DENSITY_SKYFACTOR;
        fog.global.density = Fraction::Float(io.read_float()?);
        fog.global.skyfactor = Fraction::Byte(io.read_u8()?);
    }
    read_color_comps(io, bits, GLOBAL_RGB, &mut fog.global.color)?;
    if bits & FOG_RR_BIT_TIME != 0 {
        fog.flags |= FogFlags::TIME;
        fog.global.time = io.read_u16()?;
    }

    if bits & FOG_RR_BIT_HEIGHTFOG_FALLOFF != 0 {
        fog.flags |= FogFlags::HEIGHTFOG_FALLOFF;
        fog.height.falloff = Fraction::Float(io.read_float()?);
    }
    if bits & FOG_RR_BIT_HEIGHTFOG_DENSITY != 0 {
        fog.flags |= FogFlags::HEIGHTFOG_DENSITY;
        fog.height.density = Fraction::Float(io.read_float()?);
    }

    read_color_comps(io, bits, START_RGB, &mut fog.height.start_color)?;
    if bits & FOG_RR_BIT_HEIGHTFOG_START_DIST != 0 {
        fog.flags |= FogFlags::HEIGHTFOG_START_DIST;
        fog.height.start_dist = Coord::from_int_unscaled(io.read_i32()?);
    }

    read_color_comps(io, bits, END_RGB, &mut fog.height.end_color)?;
    if bits & FOG_RR_BIT_HEIGHTFOG_END_DIST != 0 {
        fog.flags |= FogFlags::HEIGHTFOG_END_DIST;
        fog.height.end_dist = Coord::from_int_unscaled(io.read_i32()?);
    }

    Ok(fog)
}

pub fn write_fog(io: &mut dyn MsgWrite, fog: &Fog) -> Result<()> {
    let mut bits = 0u16;
    if fog.flags.contains(FogFlags::DENSITY_SKYFACTOR) {
        bits |= FOG_RR_BIT_DENSITY;
    }
    bits |= color_bits(&fog.global.color, GLOBAL_RGB);
    if fog.flags.contains(FogFlags::TIME) {
        bits |= FOG_RR_BIT_TIME;
    }
    if fog.flags.contains(FogFlags::HEIGHTFOG_FALLOFF) {
        bits |= FOG_RR_BIT_HEIGHTFOG_FALLOFF;
    }
    if fog.flags.contains(FogFlags::HEIGHTFOG_DENSITY) {
        bits |= FOG_RR_BIT_HEIGHTFOG_DENSITY;
    }
    bits |= color_bits(&fog.height.start_color, START_RGB);
    if fog.flags.contains(FogFlags::HEIGHTFOG_START_DIST) {
        bits |= FOG_RR_BIT_HEIGHTFOG_START_DIST;
    }
    bits |= color_bits(&fog.height.end_color, END_RGB);
    if fog.flags.contains(FogFlags::HEIGHTFOG_END_DIST) {
        bits |= FOG_RR_BIT_HEIGHTFOG_END_DIST;
    }
    if bits >> 8 != 0 {
        bits |= FOG_RR_BIT_MORE_BITS;
    }

    io.write_u8(SVC_RR_FOG)?;
    io.write_u8(bits as u8)?;
    if bits & FOG_RR_BIT_MORE_BITS != 0 {
        io.write_u8((bits >> 8) as u8)?;
    }

    if bits & FOG_RR_BIT_DENSITY != 0 {
        io.write_float(fog.global.density.to_float())?;
        io.write_u8(fog.global.skyfactor.to_byte())?;
    }
    write_color_comps(io, &fog.global.color)?;
    if bits & FOG_RR_BIT_TIME != 0 {
        io.write_u16(fog.global.time)?;
    }
    if bits & FOG_RR_BIT_HEIGHTFOG_FALLOFF != 0 {
        io.write_float(fog.height.falloff.to_float())?;
    }
    if bits & FOG_RR_BIT_HEIGHTFOG_DENSITY != 0 {
        io.write_float(fog.height.density.to_float())?;
    }
    write_color_comps(io, &fog.height.start_color)?;
    if bits & FOG_RR_BIT_HEIGHTFOG_START_DIST != 0 {
        io.write_i32(fog.height.start_dist.to_int_unscaled())?;
    }
    write_color_comps(io, &fog.height.end_color)?;
    if bits & FOG_RR_BIT_HEIGHTFOG_END_DIST != 0 {
        io.write_i32(fog.height.end_dist.to_int_unscaled())?;
    }
    Ok(())
}

pub fn read_poi(io: &mut dyn MsgRead) -> Result<Poi> {
    Ok(Poi {
        key: io.read_u16()?,
        time: io.read_u16()?,
        pos: read_pos_float(io, MulticastProtocol::Float)?,
        image: io.read_u16()?,
        color: io.read_u8()?,
        flags: io.read_u8()?,
    })
}

pub fn read_help_path(io: &mut dyn MsgRead) -> Result<HelpPath> {
    Ok(HelpPath {
        start: io.read_bool()?,
        pos: read_pos_float(io, MulticastProtocol::Float)?,
        dir: read_dir(io)?,
    })
}

/// Localized print (KEX).
pub fn read_locprint(io: &mut dyn MsgRead) -> Result<LocPrint> {
    let flags = io.read_u8()?;
    let base = io.read_string()?;
    let num_args = io.read_u8()? as usize;
    if num_args > MAX_LOCALIZATION_ARGS {
        return Err(Error::BadData);
    }
    let args = (0..num_args).map(|_| io.read_string()).collect::<Result<Vec<_>>>()?;
    Ok(LocPrint { flags, base, args })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MsgReader;

    #[test]
    fn test_pos_encodings() {
        let pos = [Coord::Float(100.0), Coord::Float(-12.5), Coord::Float(4000.125)];

        let mut short = Vec::new();
        write_pos(&mut short, MulticastProtocol::Short, &pos).unwrap();
        assert_eq!(short.len(), 6);
        let read = read_pos_float(&mut MsgReader::new(&short), MulticastProtocol::Short).unwrap();
        assert_eq!(read, [100.0, -12.5, 4000.125]);

        let mut float = Vec::new();
        write_pos(&mut float, MulticastProtocol::Float, &pos).unwrap();
        assert_eq!(float.len(), 12);

        // far away coordinates need the 24 bit form
        let far = [Coord::Float(5000.0), Coord::Float(0.0), Coord::Float(-5000.0)];
        let mut ext = Vec::new();
        write_pos(&mut ext, MulticastProtocol::Q2proExt, &far).unwrap();
        assert_eq!(ext.len(), 3 + 2 + 3);
        let read = read_pos_float(&mut MsgReader::new(&ext), MulticastProtocol::Q2proExt).unwrap();
        assert_eq!(read, [5000.0, 0.0, -5000.0]);
    }

    #[test]
    fn test_muzzleflash_silenced() {
        let mut buf = Vec::new();
        let flash = MuzzleFlash {
            entity: 3,
            weapon: 7,
            silenced: true,
        };
        write_muzzleflash(&mut buf, SVC_MUZZLEFLASH, &flash, MZ_SILENCED).unwrap();
        assert_eq!(buf, vec![SVC_MUZZLEFLASH, 3, 0, 7 | 0x80]);

        let mut r = MsgReader::new(&buf[1..]);
        assert_eq!(read_muzzleflash(&mut r, MZ_SILENCED).unwrap(), flash);
    }

    #[test]
    fn test_sound_defaults() {
        // flags: entity only
        let buf = [SND_ENT, 17, 0x2b, 0x00];
        let sound = read_sound(&mut MsgReader::new(&buf), MulticastProtocol::Short, false).unwrap();
        assert_eq!(sound.index, 17);
        assert_eq!(sound.volume, SOUND_DEFAULT_VOLUME);
        assert_eq!(sound.attenuation, SOUND_DEFAULT_ATTENUATION);
        assert_eq!(sound.entity, 5);
        assert_eq!(sound.channel, 3);
    }

    #[test]
    fn test_kex_sound_large_entity() {
        let sound = Sound {
            flags: SND_ENT | SND_VOLUME,
            index: 300,
            volume: 128,
            entity: 5000,
            channel: 2,
            ..Default::default()
        };
        let mut buf = Vec::new();
        write_sound(&mut buf, MulticastProtocol::Float, true, &sound).unwrap();
        assert_ne!(buf[1] & SND_KEX_LARGE_ENT, 0);

        let read = read_sound(&mut MsgReader::new(&buf[1..]), MulticastProtocol::Float, true).unwrap();
        assert_eq!(read.index, 300);
        assert_eq!(read.volume, 128);
        assert_eq!(read.entity, 5000);
        assert_eq!(read.channel, 2);
    }

    #[test]
    fn test_download_without_data() {
        let buf = [0xff, 0xff, 0];
        let dl = read_download(&mut MsgReader::new(&buf)).unwrap();
        assert_eq!(dl.size, -1);
        assert!(dl.data.is_empty());
    }

    #[test]
    fn test_damage_extra_entries_skipped() {
        // six entries, only the first four are kept
        let mut buf = vec![6];
        for i in 0..6u8 {
            buf.push(0x20 | i);
            buf.push(5);
        }
        let damage = read_damage(&mut MsgReader::new(&buf)).unwrap();
        assert_eq!(damage.count, 6);
        assert_eq!(damage.damage[3].damage, 3);
        assert!(damage.damage[3].health);
        assert!(!damage.damage[3].armor);
    }

    #[test]
    fn test_fog_more_bits() {
        let mut fog = Fog {
            flags: FogFlags::DENSITY_SKYFACTOR | FogFlags::HEIGHTFOG_END_DIST,
            ..Default::default()
        };
        fog.global.density = Fraction::Float(0.25);
        fog.global.skyfactor = Fraction::Byte(10);
        fog.global.color.set_comp(1, Color::Byte(200));
        fog.height.end_dist = Coord::from_int_unscaled(1024);

        let mut buf = Vec::new();
        write_fog(&mut buf, &fog).unwrap();
        assert_eq!(buf[0], SVC_RR_FOG);
        assert_ne!(buf[1] as u16 & FOG_RR_BIT_MORE_BITS, 0);

        let read = read_fog(&mut MsgReader::new(&buf[1..])).unwrap();
        assert_eq!(read.flags, fog.flags);
        assert_eq!(read.global.density.to_float(), 0.25);
        assert_eq!(read.global.skyfactor.to_byte(), 10);
        assert_eq!(read.global.color.delta_bits, 0b010);
        assert_eq!(read.global.color.values[1].to_byte(), 200);
        assert_eq!(read.height.end_dist.to_int_unscaled(), 1024);
        assert_eq!(read.height.start_color, ColorDelta::default());
    }

    #[test]
    fn test_locprint_too_many_args() {
        let mut buf = vec![0];
        buf.extend_from_slice(b"$base\0");
        buf.push(9);
        assert_eq!(read_locprint(&mut MsgReader::new(&buf)), Err(Error::BadData));
    }

    #[test]
    fn test_download_payload_checked() {
        let mut download = Download {
            size: 3,
            percent: 40,
            data: vec![7, 8, 9, 10],
            ..Default::default()
        };
        let mut buf = Vec::new();
        assert_eq!(write_download(&mut buf, &download), Err(Error::BadData));
        assert!(buf.is_empty());

        download.data.truncate(3);
        write_download(&mut buf, &download).unwrap();
        assert_eq!(buf, [SVC_DOWNLOAD, 3, 0, 40, 7, 8, 9]);

        let failed = Download {
            size: -1,
            data: vec![1],
            ..Default::default()
        };
        assert_eq!(download_payload(&failed), Ok(&[][..]));
    }
}
