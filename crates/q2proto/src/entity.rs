// entity.rs -- entity delta framing shared by all dialects
//
// Every entity record starts with a variable length bit mask (1 to 5 bytes,
// chained by the MOREBITS flags) followed by the entity number (8 or 16 bits).

use crate::coords::{Angle, Coord};
use crate::defs::*;
use crate::error::{Error, Result};
use crate::io::{MsgRead, MsgWrite};
use crate::svc::{EntityStateDelta, EsdFlags};

// ============================================================
// Bits and entity number
// ============================================================

/// Read the bit mask and entity number of an entity record.
pub fn read_entity_bits(io: &mut dyn MsgRead) -> Result<(u64, u16)> {
    let mut total = io.read_u8()? as u64;
    if total & U_MOREBITS1 != 0 {
        total |= (io.read_u8()? as u64) << 8;
    }
    if total & U_MOREBITS2 != 0 {
        total |= (io.read_u8()? as u64) << 16;
    }
    if total & U_MOREBITS3 != 0 {
        total |= (io.read_u8()? as u64) << 24;
    }
    if total & U_MOREBITS4 != 0 {
        total |= (io.read_u8()? as u64) << 32;
    }

    let entnum = if total & U_NUMBER16 != 0 {
        io.read_u16()?
    } else {
        io.read_u8()? as u16
    };
    Ok((total, entnum))
}

/// Size in bytes of the bit mask and entity number as written.
pub fn entity_bits_size(bits: u64) -> usize {
    let mask_size = if bits & U_MOREBITS4 != 0 {
        5
    } else if bits & U_MOREBITS3 != 0 {
        4
    } else if bits & U_MOREBITS2 != 0 {
        3
    } else if bits & U_MOREBITS1 != 0 {
        2
    } else {
        1
    };
    mask_size + if bits & U_NUMBER16 != 0 { 2 } else { 1 }
}

/// Write the bit mask and entity number, adding the MOREBITS and NUMBER16 flags as needed.
pub fn write_entity_bits(io: &mut dyn MsgWrite, mut bits: u64, entnum: u16) -> Result<()> {
    if entnum >= 256 {
        bits |= U_NUMBER16;
    }

    if bits & 0xff_0000_0000 != 0 {
        bits |= U_MOREBITS4 | U_MOREBITS3 | U_MOREBITS2 | U_MOREBITS1;
    } else if bits & 0xff00_0000 != 0 {
        bits |= U_MOREBITS3 | U_MOREBITS2 | U_MOREBITS1;
    } else if bits & 0x00ff_0000 != 0 {
        bits |= U_MOREBITS2 | U_MOREBITS1;
    } else if bits & 0x0000_ff00 != 0 {
        bits |= U_MOREBITS1;
    }

    io.write_u8(bits as u8)?;
    if bits & U_MOREBITS1 != 0 {
        io.write_u8((bits >> 8) as u8)?;
    }
    if bits & U_MOREBITS2 != 0 {
        io.write_u8((bits >> 16) as u8)?;
    }
    if bits & U_MOREBITS3 != 0 {
        io.write_u8((bits >> 24) as u8)?;
    }
    if bits & U_MOREBITS4 != 0 {
        io.write_u8((bits >> 32) as u8)?;
    }

    if bits & U_NUMBER16 != 0 {
        io.write_u16(entnum)
    } else {
        io.write_u8(entnum as u8)
    }
}

// ============================================================
// Variable width fields
// ============================================================

/// Pick the width flags for a value sent as 8, 16 or 32 bits.
///
/// Setting both flags selects 32 bits. When `uint16_safe` is false, values
/// with bit 15 set also go out as 32 bits, as some clients sign extend 16 bit
/// values.
pub fn choose_width_flags(value: u32, flag8: u64, flag16: u64, uint16_safe: bool) -> u64 {
    let mask = if uint16_safe { 0xffff_0000 } else { 0xffff_8000 };
    if value & mask != 0 {
        flag8 | flag16
    } else if value & 0xff00 != 0 {
        flag16
    } else {
        flag8
    }
}

/// Read a value whose width is given by `flag8`/`flag16` in `bits`.
pub fn read_sized(io: &mut dyn MsgRead, bits: u64, flag8: u64, flag16: u64) -> Result<u32> {
    let both = flag8 | flag16;
    Ok(if bits & both == both {
        io.read_u32()?
    } else if bits & flag16 != 0 {
        io.read_u16()? as u32
    } else if bits & flag8 != 0 {
        io.read_u8()? as u32
    } else {
        0
    })
}

/// Write a value with the width given by `flag8`/`flag16` in `bits`.
pub fn write_sized(io: &mut dyn MsgWrite, bits: u64, flag8: u64, flag16: u64, value: u32) -> Result<()> {
    let both = flag8 | flag16;
    if bits & both == both {
        io.write_u32(value)
    } else if bits & flag16 != 0 {
        io.write_u16(value as u16)
    } else if bits & flag8 != 0 {
        io.write_u8(value as u8)
    } else {
        Ok(())
    }
}

// ============================================================
// Short coordinate entity records (vanilla, R1Q2)
// ============================================================

/// Read the fields of a vanilla or R1Q2 entity record.
///
/// Coordinates are 16 bit, angles 8 bit. `solid32` selects the R1Q2 long solid encoding.
pub(crate) fn read_short_entity_delta(io: &mut dyn MsgRead, bits: u64, solid32: bool) -> Result<EntityStateDelta> {
    let mut delta = EntityStateDelta::default();

    if bits & U_MODEL != 0 {
        delta.delta_bits |= EsdFlags::MODELINDEX;
        delta.modelindex = io.read_u8()? as u16;
    }
    if bits & U_MODEL2 != 0 {
        delta.delta_bits |= EsdFlags::MODELINDEX2;
        delta.modelindex2 = io.read_u8()? as u16;
    }
    if bits & U_MODEL3 != 0 {
        delta.delta_bits |= EsdFlags::MODELINDEX3;
        delta.modelindex3 = io.read_u8()? as u16;
    }
    if bits & U_MODEL4 != 0 {
        delta.delta_bits |= EsdFlags::MODELINDEX4;
        delta.modelindex4 = io.read_u8()? as u16;
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
            delta.origin.set_read(c, Coord::from_short(io.read_i16()?), false);
        }
    }
    for (c, flag) in [U_ANGLE1, U_ANGLE2, U_ANGLE3].into_iter().enumerate() {
        if bits & flag != 0 {
            delta.angle.set_comp(c, Angle::Char(io.read_i8()?));
        }
    }

    if bits & U_OLDORIGIN != 0 {
        delta.delta_bits |= EsdFlags::OLD_ORIGIN;
        for c in 0..3 {
            delta.old_origin[c] = Coord::from_short(io.read_i16()?);
        }
    }
    if bits & U_SOUND != 0 {
        delta.delta_bits |= EsdFlags::SOUND;
        delta.sound = io.read_u8()? as u16;
    }
    if bits & U_EVENT != 0 {
        delta.delta_bits |= EsdFlags::EVENT;
        delta.event = io.read_u8()?;
    }
    if bits & U_SOLID != 0 {
        delta.delta_bits |= EsdFlags::SOLID;
        delta.solid = if solid32 { io.read_u32()? } else { io.read_u16()? as u32 };
    }

    Ok(delta)
}

fn byte_field(value: u16) -> Result<u8> {
    u8::try_from(value).map_err(|_| Error::BadData)
}

/// Write a vanilla or R1Q2 entity record, bits and number included.
///
/// Fields these protocols can't carry fail with `BadData`.
pub(crate) fn write_short_entity_delta(
    io: &mut dyn MsgWrite,
    entnum: u16,
    delta: &EntityStateDelta,
    solid32: bool,
) -> Result<()> {
    let flags = delta.delta_bits;
    if flags.intersects(
        EsdFlags::EFFECTS_MORE
            | EsdFlags::LOOP_ATTENUATION
            | EsdFlags::LOOP_VOLUME
            | EsdFlags::ALPHA
            | EsdFlags::SCALE,
    ) {
        return Err(Error::BadData);
    }

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
        bits |= choose_width_flags(delta.skinnum, U_SKIN8, U_SKIN16, false);
    }
    if flags.contains(EsdFlags::FRAME) {
        bits |= if delta.frame >= 256 { U_FRAME16 } else { U_FRAME8 };
    }
    if flags.contains(EsdFlags::EFFECTS) {
        bits |= choose_width_flags(delta.effects, U_EFFECTS8, U_EFFECTS16, false);
    }
    if flags.contains(EsdFlags::RENDERFX) {
        bits |= choose_width_flags(delta.renderfx, U_RENDERFX8, U_RENDERFX16, false);
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

    write_entity_bits(io, bits, entnum)?;

    for (bit, model) in [
        (U_MODEL, delta.modelindex),
        (U_MODEL2, delta.modelindex2),
        (U_MODEL3, delta.modelindex3),
        (U_MODEL4, delta.modelindex4),
    ] {
        if bits & bit != 0 {
            io.write_u8(byte_field(model)?)?;
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
            io.write_u16(delta.origin.current(c).to_int() as u16)?;
        }
    }
    for (c, flag) in [U_ANGLE1, U_ANGLE2, U_ANGLE3].into_iter().enumerate() {
        if bits & flag != 0 {
            io.write_i8(delta.angle.values[c].to_char())?;
        }
    }
    if bits & U_OLDORIGIN != 0 {
        for c in 0..3 {
            io.write_u16(delta.old_origin[c].to_int() as u16)?;
        }
    }
    if bits & U_SOUND != 0 {
        io.write_u8(byte_field(delta.sound)?)?;
    }
    if bits & U_EVENT != 0 {
        io.write_u8(delta.event)?;
    }
    if bits & U_SOLID != 0 {
        if solid32 {
            io.write_u32(delta.solid)?;
        } else {
            io.write_u16(delta.solid as u16)?;
        }
    }
    Ok(())
}

// ============================================================
// Per-entity flags
// ============================================================

/// One bit per entity number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityBitset {
    words: Box<[u64; MAX_ENTITIES as usize / 64]>,
}

impl Default for EntityBitset {
    fn default() -> Self {
        Self {
            words: Box::new([0; MAX_ENTITIES as usize / 64]),
        }
    }
}

impl EntityBitset {
    pub fn get(&self, entnum: u16) -> bool {
        let n = entnum as usize % MAX_ENTITIES as usize;
        self.words[n / 64] & (1 << (n % 64)) != 0
    }

    pub fn set(&mut self, entnum: u16, value: bool) {
        let n = entnum as usize % MAX_ENTITIES as usize;
        if value {
            self.words[n / 64] |= 1 << (n % 64);
        } else {
            self.words[n / 64] &= !(1 << (n % 64));
        }
    }

    pub fn clear(&mut self) {
        self.words.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MsgReader;

    #[test]
    fn test_entity_bits_small() {
        let mut buf = Vec::new();
        write_entity_bits(&mut buf, U_ORIGIN1 | U_FRAME8, 5).unwrap();
        assert_eq!(buf, vec![(U_ORIGIN1 | U_FRAME8) as u8, 5]);
        assert_eq!(entity_bits_size(U_ORIGIN1 | U_FRAME8), 2);

        let mut r = MsgReader::new(&buf);
        assert_eq!(read_entity_bits(&mut r).unwrap(), (U_ORIGIN1 | U_FRAME8, 5));
    }

    #[test]
    fn test_entity_bits_chain() {
        let mut buf = Vec::new();
        write_entity_bits(&mut buf, U_SOLID | U_SCALE, 300).unwrap();
        // 5 mask bytes and a 16 bit entity number
        assert_eq!(buf.len(), 7);

        let mut r = MsgReader::new(&buf);
        let (bits, entnum) = read_entity_bits(&mut r).unwrap();
        assert_eq!(entnum, 300);
        assert_eq!(bits & (U_SOLID | U_SCALE), U_SOLID | U_SCALE);
        assert_ne!(bits & U_MOREBITS4, 0);
        assert_ne!(bits & U_NUMBER16, 0);
        assert_eq!(entity_bits_size(bits), 7);
    }

    #[test]
    fn test_choose_width_flags() {
        assert_eq!(choose_width_flags(0x12, U_SKIN8, U_SKIN16, false), U_SKIN8);
        assert_eq!(choose_width_flags(0x1234, U_SKIN8, U_SKIN16, false), U_SKIN16);
        assert_eq!(choose_width_flags(0x8000, U_SKIN8, U_SKIN16, false), U_SKIN32);
        assert_eq!(choose_width_flags(0x8000, U_SKIN8, U_SKIN16, true), U_SKIN16);
        assert_eq!(choose_width_flags(0x10000, U_SKIN8, U_SKIN16, true), U_SKIN32);
    }

    #[test]
    fn test_sized_values() {
        for value in [0u32, 0x7f, 0x1234, 0x8000, 0xdead_beef] {
            let bits = choose_width_flags(value, U_EFFECTS8, U_EFFECTS16, false);
            let mut buf = Vec::new();
            write_sized(&mut buf, bits, U_EFFECTS8, U_EFFECTS16, value).unwrap();
            let mut r = MsgReader::new(&buf);
            assert_eq!(read_sized(&mut r, bits, U_EFFECTS8, U_EFFECTS16).unwrap(), value);
            assert_eq!(r.remaining(), 0);
        }
    }

    #[test]
    fn test_short_entity_delta() {
        let mut delta = EntityStateDelta::default();
        delta.delta_bits = EsdFlags::MODELINDEX | EsdFlags::FRAME | EsdFlags::SKINNUM | EsdFlags::SOLID;
        delta.modelindex = 3;
        delta.frame = 300;
        delta.skinnum = 0x8000;
        delta.solid = 0x1234_5678;
        delta.origin.set_read(1, Coord::Int(-800), false);
        delta.angle.set_comp(2, Angle::Char(-5));

        let mut buf = Vec::new();
        write_short_entity_delta(&mut buf, 42, &delta, true).unwrap();
        let mut r = MsgReader::new(&buf);
        let (bits, entnum) = read_entity_bits(&mut r).unwrap();
        assert_eq!(entnum, 42);
        assert_eq!(bits & U_SKIN32, U_SKIN32);
        let read = read_short_entity_delta(&mut r, bits, true).unwrap();
        assert_eq!(r.remaining(), 0);
        assert_eq!(read, delta);
    }

    #[test]
    fn test_short_entity_delta_limits() {
        let mut delta = EntityStateDelta::default();
        delta.delta_bits = EsdFlags::MODELINDEX;
        delta.modelindex = 256;
        let mut buf = Vec::new();
        assert_eq!(write_short_entity_delta(&mut buf, 1, &delta, false), Err(Error::BadData));

        delta.modelindex = 1;
        delta.delta_bits |= EsdFlags::ALPHA;
        assert_eq!(write_short_entity_delta(&mut buf, 1, &delta, false), Err(Error::BadData));
    }

    #[test]
    fn test_bitset() {
        let mut set = EntityBitset::default();
        assert!(!set.get(100));
        set.set(100, true);
        set.set(8191, true);
        assert!(set.get(100));
        assert!(set.get(8191));
        assert!(!set.get(101));
        set.set(100, false);
        assert!(!set.get(100));
        set.clear();
        assert!(!set.get(8191));
    }
}
