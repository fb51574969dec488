// coords.rs -- coordinate, angle and other value encodings
//
// Values travel in different precisions depending on the dialect. The
// variant types here remember the representation they were set with and
// convert on access, so a value read in one encoding can be written in
// another without a detour through floats where avoidable.

// ============================================================
// Scalar encodings
// ============================================================

/// Multiply, clamp to `min..=max`, then truncate.
pub fn clamped_mul(x: f32, scale: i32, min: i32, max: i32) -> i32 {
    let mut x = x * scale as f32;
    if x < min as f32 {
        x = min as f32;
    }
    if x > max as f32 {
        x = max as f32;
    }
    x as i32
}

fn clip_i8(a: i32) -> i8 {
    a.clamp(i8::MIN as i32, i8::MAX as i32) as i8
}

fn clip_i16(a: i32) -> i16 {
    a.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

pub fn int2coord(x: i32) -> f32 {
    x as f32 * 0.125
}

pub fn coord2int(x: f32) -> i32 {
    clamped_mul(x, 8, i32::MIN, i32::MAX)
}

pub fn short2angle(x: i16) -> f32 {
    x as f32 * (360.0 / 65536.0)
}

pub fn angle2short(x: f32) -> i16 {
    ((x * 65536.0 / 360.0) as i32 & 65535) as u16 as i16
}

pub fn char2angle(x: i8) -> f32 {
    x as f32 * (360.0 / 256.0)
}

pub fn angle2char(x: f32) -> i8 {
    ((x * 256.0 / 360.0) as i32 & 255) as u8 as i8
}

pub fn char2smalloffset(x: i8) -> f32 {
    x as f32 * 0.25
}

/// Encode a "small" coordinate (-32...31.75).
pub fn smalloffset2char(x: f32) -> i8 {
    clamped_mul(x, 4, i8::MIN as i32, i8::MAX as i32) as i8
}

pub fn char2smallangle(x: i8) -> f32 {
    x as f32 * 0.25
}

/// Encode a "small" angle (-32...31.75 degrees).
pub fn smallangle2char(x: f32) -> i8 {
    clamped_mul(x, 4, i8::MIN as i32, i8::MAX as i32) as i8
}

pub fn byte2color(x: u8) -> f32 {
    x as f32 / 255.0
}

pub fn color2byte(x: f32) -> u8 {
    clamped_mul(x, 255, 0, 255) as u8
}

/// Entity loop volume. 0 means "default", so only a true 0 encodes to 0.
pub fn entity_loop_volume2byte(x: f32) -> u8 {
    if x != 0.0 {
        clamped_mul(x, 255, 1, 255) as u8
    } else {
        0
    }
}

/// Entity alpha. 0 means "default", so only a true 0 encodes to 0.
pub fn entity_alpha2byte(x: f32) -> u8 {
    if x != 0.0 {
        clamped_mul(x, 255, 1, 255) as u8
    } else {
        0
    }
}

/// Entity scale. 0 means "default", so only a true 0 encodes to 0.
pub fn entity_scale2byte(x: f32) -> u8 {
    if x != 0.0 {
        clamped_mul(x, 16, 1, 255) as u8
    } else {
        0
    }
}

pub fn q2repro_short2viewoffset(x: i16) -> f32 {
    x as f32 / 16.0
}

pub fn q2repro_viewoffset2short(x: f32) -> i16 {
    clamped_mul(x, 16, i16::MIN as i32, i16::MAX as i32) as i16
}

pub fn q2repro_short2gunoffset(x: i16) -> f32 {
    x as f32 / 512.0
}

pub fn q2repro_gunoffset2short(x: f32) -> i16 {
    clamped_mul(x, 512, i16::MIN as i32, i16::MAX as i32) as i16
}

pub fn q2repro_short2kick_angle(x: i16) -> f32 {
    x as f32 / 1024.0
}

pub fn q2repro_kick_angle2short(x: f32) -> i16 {
    clamped_mul(x, 1024, i16::MIN as i32, i16::MAX as i32) as i16
}

pub fn q2repro_short2gunangle(x: i16) -> f32 {
    x as f32 / 4096.0
}

pub fn q2repro_gunangle2short(x: f32) -> i16 {
    clamped_mul(x, 4096, i16::MIN as i32, i16::MAX as i32) as i16
}

// ============================================================
// Variant values
// ============================================================

/// A coordinate stored as float or as integer in 1/8 units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Coord {
    Float(f32),
    Int(i32),
}

impl Default for Coord {
    fn default() -> Self {
        Coord::Int(0)
    }
}

impl Coord {
    /// A coordinate from a plain (not 1/8 scaled) integer.
    pub fn from_int_unscaled(i: i32) -> Self {
        Coord::Int(i.clamp(i32::MIN / 8, i32::MAX / 8) * 8)
    }

    pub fn from_short(s: i16) -> Self {
        Coord::Int(s as i32)
    }

    pub fn to_float(self) -> f32 {
        match self {
            Coord::Float(f) => f,
            Coord::Int(i) => int2coord(i),
        }
    }

    pub fn to_int(self) -> i32 {
        match self {
            Coord::Float(f) => coord2int(f),
            Coord::Int(i) => i,
        }
    }

    pub fn to_short(self) -> i16 {
        self.to_int() as i16
    }

    pub fn to_int_unscaled(self) -> i32 {
        self.to_int() / 8
    }

    pub fn to_short_unscaled(self) -> i16 {
        clip_i16(self.to_int_unscaled())
    }
}

/// An angle stored as float degrees, or in 16 or 8 bits.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Angle {
    Short(i16),
    Char(i8),
    Float(f32),
}

impl Default for Angle {
    fn default() -> Self {
        Angle::Short(0)
    }
}

impl Angle {
    pub fn to_float(self) -> f32 {
        match self {
            Angle::Short(s) => short2angle(s),
            Angle::Char(c) => char2angle(c),
            Angle::Float(f) => f,
        }
    }

    pub fn to_short(self) -> i16 {
        match self {
            Angle::Short(s) => s,
            Angle::Char(c) => (c as i16).wrapping_mul(0x101),
            Angle::Float(f) => angle2short(f),
        }
    }

    pub fn to_char(self) -> i8 {
        match self {
            Angle::Short(s) => (s >> 8) as i8,
            Angle::Char(c) => c,
            Angle::Float(f) => angle2char(f),
        }
    }
}

/// A "small" offset (viewoffset, gunoffset) with limited range and precision.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SmallOffset {
    Float(f32),
    Char(i8),
    /// Q2rePRO/KEX viewoffset encoding, 1/16 units
    ReproViewoffset(i16),
    /// Q2rePRO gunoffset encoding, 1/512 units
    ReproGunoffset(i16),
}

impl Default for SmallOffset {
    fn default() -> Self {
        SmallOffset::Float(0.0)
    }
}

impl SmallOffset {
    pub fn to_float(self) -> f32 {
        match self {
            SmallOffset::Float(f) => f,
            SmallOffset::Char(c) => char2smalloffset(c),
            SmallOffset::ReproViewoffset(s) => q2repro_short2viewoffset(s),
            SmallOffset::ReproGunoffset(s) => q2repro_short2gunoffset(s),
        }
    }

    pub fn to_char(self) -> i8 {
        match self {
            SmallOffset::Float(f) => smalloffset2char(f),
            SmallOffset::Char(c) => c,
            SmallOffset::ReproViewoffset(s) => clip_i8(s as i32 >> 2),
            SmallOffset::ReproGunoffset(s) => clip_i8(s as i32 >> 7),
        }
    }

    pub fn to_repro_viewoffset(self) -> i16 {
        match self {
            SmallOffset::Float(f) => q2repro_viewoffset2short(f),
            SmallOffset::Char(c) => (c as i16) << 2,
            SmallOffset::ReproViewoffset(s) => s,
            SmallOffset::ReproGunoffset(s) => s >> 5,
        }
    }

    pub fn to_repro_gunoffset(self) -> i16 {
        match self {
            SmallOffset::Float(f) => q2repro_gunoffset2short(f),
            SmallOffset::Char(c) => (c as i16) << 7,
            SmallOffset::ReproViewoffset(s) => clip_i16((s as i32) << 5),
            SmallOffset::ReproGunoffset(s) => s,
        }
    }
}

/// A "small" angle (kick angles, gun angles) with limited range and precision.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SmallAngle {
    Float(f32),
    Char(i8),
    /// Q2rePRO/KEX kick angle encoding, 1/1024 degrees
    ReproKickAngle(i16),
    /// Q2rePRO gun angle encoding, 1/4096 degrees
    ReproGunangle(i16),
}

impl Default for SmallAngle {
    fn default() -> Self {
        SmallAngle::Float(0.0)
    }
}

impl SmallAngle {
    pub fn to_float(self) -> f32 {
        match self {
            SmallAngle::Float(f) => f,
            SmallAngle::Char(c) => char2smallangle(c),
            SmallAngle::ReproKickAngle(s) => q2repro_short2kick_angle(s),
            SmallAngle::ReproGunangle(s) => q2repro_short2gunangle(s),
        }
    }

    pub fn to_char(self) -> i8 {
        match self {
            SmallAngle::Float(f) => smallangle2char(f),
            SmallAngle::Char(c) => c,
            SmallAngle::ReproKickAngle(s) => clip_i8(s as i32 >> 8),
            SmallAngle::ReproGunangle(s) => clip_i8(s as i32 >> 10),
        }
    }

    pub fn to_repro_kick_angle(self) -> i16 {
        match self {
            SmallAngle::Float(f) => q2repro_kick_angle2short(f),
            SmallAngle::Char(c) => (c as i16) << 8,
            SmallAngle::ReproKickAngle(s) => s,
            SmallAngle::ReproGunangle(s) => s >> 2,
        }
    }

    pub fn to_repro_gunangle(self) -> i16 {
        match self {
            SmallAngle::Float(f) => q2repro_gunangle2short(f),
            SmallAngle::Char(c) => clip_i16((c as i32) << 10),
            SmallAngle::ReproKickAngle(s) => clip_i16((s as i32) << 2),
            SmallAngle::ReproGunangle(s) => s,
        }
    }
}

/// A color component (0..1) stored as float or byte.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Color {
    Float(f32),
    Byte(u8),
}

impl Default for Color {
    fn default() -> Self {
        Color::Byte(0)
    }
}

impl Color {
    pub fn to_float(self) -> f32 {
        match self {
            Color::Float(f) => f,
            Color::Byte(b) => byte2color(b),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Color::Float(f) => color2byte(f),
            Color::Byte(b) => b,
        }
    }
}

/// A fraction (0..1 inclusive) stored as float, 16 bit or 8 bit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Fraction {
    Word(u16),
    Byte(u8),
    Float(f32),
}

impl Default for Fraction {
    fn default() -> Self {
        Fraction::Word(0)
    }
}

impl Fraction {
    pub fn to_float(self) -> f32 {
        match self {
            Fraction::Word(w) => w as f32 / 65535.0,
            Fraction::Byte(b) => b as f32 / 255.0,
            Fraction::Float(f) => f,
        }
    }

    pub fn to_word(self) -> u16 {
        match self {
            Fraction::Word(w) => w,
            Fraction::Byte(b) => b as u16 * 0x101,
            Fraction::Float(f) => clamped_mul(f, 65535, 0, 65535) as u16,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Fraction::Word(w) => (w >> 8) as u8,
            Fraction::Byte(b) => b,
            Fraction::Float(f) => clamped_mul(f, 255, 0, 255) as u8,
        }
    }
}

// ============================================================
// Component deltas
// ============================================================

/// Component values plus a bit mask of the components that changed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Delta<T, const N: usize> {
    pub delta_bits: u8,
    pub values: [T; N],
}

impl<T: Copy + Default, const N: usize> Default for Delta<T, N> {
    fn default() -> Self {
        Self {
            delta_bits: 0,
            values: [T::default(); N],
        }
    }
}

impl<T: Copy, const N: usize> Delta<T, N> {
    /// Take values from `to`, marking the components that differ from `from`.
    pub fn set<V: Copy + PartialEq>(&mut self, to: &[V; N], from: &[V; N], conv: impl Fn(V) -> T) {
        self.delta_bits = 0;
        for c in 0..N {
            if to[c] != from[c] {
                self.delta_bits |= 1 << c;
            }
        }
        if self.delta_bits != 0 {
            for c in 0..N {
                self.values[c] = conv(to[c]);
            }
        }
    }

    /// Mark component `c` changed and store its value.
    pub fn set_comp(&mut self, c: usize, value: T) {
        self.values[c] = value;
        self.delta_bits |= 1 << c;
    }

    pub fn has(&self, c: usize) -> bool {
        self.delta_bits & (1 << c) != 0
    }

    /// Overwrite changed components of `to`.
    pub fn apply<V>(&self, to: &mut [V; N], conv: impl Fn(T) -> V) {
        for c in 0..N {
            if self.has(c) {
                to[c] = conv(self.values[c]);
            }
        }
    }
}

pub type CoordsDelta = Delta<Coord, 3>;
pub type AnglesDelta = Delta<Angle, 3>;
pub type SmallOffsetsDelta = Delta<SmallOffset, 3>;
pub type SmallAnglesDelta = Delta<SmallAngle, 3>;
pub type ColorDelta = Delta<Color, 4>;

/// Convert a coordinate triple to floats.
pub fn coords_to_float(v: &[Coord; 3]) -> [f32; 3] {
    [v[0].to_float(), v[1].to_float(), v[2].to_float()]
}

pub fn coords_to_int(v: &[Coord; 3]) -> [i32; 3] {
    [v[0].to_int(), v[1].to_int(), v[2].to_int()]
}

pub fn angles_to_float(v: &[Angle; 3]) -> [f32; 3] {
    [v[0].to_float(), v[1].to_float(), v[2].to_float()]
}
