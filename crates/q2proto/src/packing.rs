// packing.rs -- packed entity/player states and the delta engine
//
// Game states are first packed into their wire precision. Deltas are then
// computed by comparing packed states, so two states that only differ below
// the wire precision produce no update. On the receiving side, deltas are
// applied to float snapshots.

use crate::coords::{
    angle2short, color2byte, coord2int, entity_alpha2byte, entity_loop_volume2byte, entity_scale2byte,
    q2repro_gunangle2short, q2repro_gunoffset2short, q2repro_kick_angle2short, q2repro_viewoffset2short,
    smallangle2char, smalloffset2char, Angle, Color, Coord, Fraction, SmallAngle, SmallOffset,
};
use crate::defs::MAX_STATS;
use crate::sound::{decode_loop_attenuation, encode_loop_attenuation};
use crate::svc::{EntityStateDelta, EsdFlags, FogFlags, MaybeDiffCoords, PlayerStateDelta, PsdFlags};

/// Representation used for packed values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PackingFlavor {
    /// Vanilla and derived protocols: 1/8 unit coordinates, byte sized small values
    #[default]
    Vanilla,
    /// Q2rePRO: float coordinates, 16 bit small values
    Repro,
}

// ============================================================
// Game-side snapshots
// ============================================================

/// Entity state as kept by a game or client.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EntityState {
    pub modelindex: u16,
    pub modelindex2: u16,
    pub modelindex3: u16,
    pub modelindex4: u16,
    pub frame: u16,
    pub skinnum: u32,
    pub effects: u64,
    pub renderfx: u32,
    pub origin: [f32; 3],
    pub angles: [f32; 3],
    pub old_origin: [f32; 3],
    pub sound: u16,
    /// 0..1, 0 means default
    pub loop_volume: f32,
    pub loop_attenuation: f32,
    pub event: u8,
    pub solid: u32,
    /// 0..1, 0 means default
    pub alpha: f32,
    /// 0 means default
    pub scale: f32,
}

/// Q2PRO player fog.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FogState {
    pub color: [f32; 3],
    pub density: f32,
    pub skyfactor: f32,
    pub heightfog_start_color: [f32; 3],
    pub heightfog_end_color: [f32; 3],
    pub heightfog_density: f32,
    pub heightfog_falloff: f32,
    pub heightfog_start_dist: f32,
    pub heightfog_end_dist: f32,
}

/// Player state as kept by a game or client.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlayerState {
    pub pm_type: u8,
    pub pm_origin: [f32; 3],
    pub pm_velocity: [f32; 3],
    pub pm_time: u16,
    pub pm_flags: u16,
    pub pm_gravity: i16,
    pub pm_delta_angles: [f32; 3],
    pub pm_viewheight: i8,
    pub viewoffset: [f32; 3],
    pub viewangles: [f32; 3],
    pub kick_angles: [f32; 3],
    pub gunindex: u16,
    pub gunskin: u8,
    pub gunframe: u16,
    pub gunoffset: [f32; 3],
    pub gunangles: [f32; 3],
    pub gunrate: u8,
    pub blend: [f32; 4],
    pub damage_blend: [f32; 4],
    pub fov: f32,
    pub rdflags: u8,
    pub stats: [i16; MAX_STATS],
    pub clientnum: i16,
    pub fog: FogState,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            pm_type: 0,
            pm_origin: [0.0; 3],
            pm_velocity: [0.0; 3],
            pm_time: 0,
            pm_flags: 0,
            pm_gravity: 0,
            pm_delta_angles: [0.0; 3],
            pm_viewheight: 0,
            viewoffset: [0.0; 3],
            viewangles: [0.0; 3],
            kick_angles: [0.0; 3],
            gunindex: 0,
            gunskin: 0,
            gunframe: 0,
            gunoffset: [0.0; 3],
            gunangles: [0.0; 3],
            gunrate: 0,
            blend: [0.0; 4],
            damage_blend: [0.0; 4],
            fov: 0.0,
            rdflags: 0,
            stats: [0; MAX_STATS],
            clientnum: 0,
            fog: FogState::default(),
        }
    }
}

// ============================================================
// Packed states
// ============================================================

/// Entity state in wire precision. Only compare states packed with the same flavor.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PackedEntity {
    pub modelindex: u16,
    pub modelindex2: u16,
    pub modelindex3: u16,
    pub modelindex4: u16,
    pub frame: u16,
    pub skinnum: u32,
    pub effects: u64,
    pub renderfx: u32,
    pub origin: [Coord; 3],
    pub angles: [i16; 3],
    pub old_origin: [Coord; 3],
    pub sound: u16,
    pub loop_volume: u8,
    pub loop_attenuation: u8,
    pub event: u8,
    pub solid: u32,
    pub alpha: u8,
    pub scale: u8,
}

fn pack_coords(flavor: PackingFlavor, v: &[f32; 3]) -> [Coord; 3] {
    match flavor {
        PackingFlavor::Vanilla => v.map(|x| Coord::Int(coord2int(x))),
        PackingFlavor::Repro => v.map(Coord::Float),
    }
}

impl PackedEntity {
    pub fn pack(flavor: PackingFlavor, state: &EntityState) -> Self {
        Self {
            modelindex: state.modelindex,
            modelindex2: state.modelindex2,
            modelindex3: state.modelindex3,
            modelindex4: state.modelindex4,
            frame: state.frame,
            skinnum: state.skinnum,
            effects: state.effects,
            renderfx: state.renderfx,
            origin: pack_coords(flavor, &state.origin),
            angles: state.angles.map(angle2short),
            old_origin: pack_coords(flavor, &state.old_origin),
            sound: state.sound,
            loop_volume: entity_loop_volume2byte(state.loop_volume),
            loop_attenuation: encode_loop_attenuation(state.loop_attenuation),
            event: state.event,
            solid: state.solid,
            alpha: entity_alpha2byte(state.alpha),
            scale: entity_scale2byte(state.scale),
        }
    }
}

/// Packed Q2PRO player fog.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PackedFog {
    pub color: [u8; 3],
    pub density: u16,
    pub skyfactor: u16,
    pub heightfog_start_color: [u8; 3],
    pub heightfog_end_color: [u8; 3],
    pub heightfog_density: u16,
    pub heightfog_falloff: u16,
    pub heightfog_start_dist: i32,
    pub heightfog_end_dist: i32,
}

/// Player state in wire precision. Only compare states packed with the same flavor.
///
/// The small values (view offset, kick angles, gun offset and angles) hold
/// chars for the vanilla flavor and Q2rePRO shorts for the repro flavor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PackedPlayer {
    pub pm_type: u8,
    pub pm_origin: [Coord; 3],
    pub pm_velocity: [Coord; 3],
    pub pm_time: u16,
    pub pm_flags: u16,
    pub pm_gravity: i16,
    pub pm_delta_angles: [i16; 3],
    pub pm_viewheight: i8,
    pub viewoffset: [i16; 3],
    pub viewangles: [i16; 3],
    pub kick_angles: [i16; 3],
    pub gunindex: u16,
    pub gunskin: u8,
    pub gunframe: u16,
    pub gunoffset: [i16; 3],
    pub gunangles: [i16; 3],
    pub gunrate: u8,
    pub blend: [u8; 4],
    pub damage_blend: [u8; 4],
    pub fov: u8,
    pub rdflags: u8,
    pub stats: [i16; MAX_STATS],
    pub fog: PackedFog,
}

impl Default for PackedPlayer {
    fn default() -> Self {
        Self {
            pm_type: 0,
            pm_origin: [Coord::default(); 3],
            pm_velocity: [Coord::default(); 3],
            pm_time: 0,
            pm_flags: 0,
            pm_gravity: 0,
            pm_delta_angles: [0; 3],
            pm_viewheight: 0,
            viewoffset: [0; 3],
            viewangles: [0; 3],
            kick_angles: [0; 3],
            gunindex: 0,
            gunskin: 0,
            gunframe: 0,
            gunoffset: [0; 3],
            gunangles: [0; 3],
            gunrate: 0,
            blend: [0; 4],
            damage_blend: [0; 4],
            fov: 0,
            rdflags: 0,
            stats: [0; MAX_STATS],
            fog: PackedFog::default(),
        }
    }
}

fn fraction_word(x: f32) -> u16 {
    Fraction::Float(x).to_word()
}

impl PackedPlayer {
    pub fn pack(flavor: PackingFlavor, state: &PlayerState) -> Self {
        let (viewoffset, kick_angles, gunoffset, gunangles) = match flavor {
            PackingFlavor::Vanilla => (
                state.viewoffset.map(|x| smalloffset2char(x) as i16),
                state.kick_angles.map(|x| smallangle2char(x) as i16),
                state.gunoffset.map(|x| smalloffset2char(x) as i16),
                state.gunangles.map(|x| smallangle2char(x) as i16),
            ),
            PackingFlavor::Repro => (
                state.viewoffset.map(q2repro_viewoffset2short),
                state.kick_angles.map(q2repro_kick_angle2short),
                state.gunoffset.map(q2repro_gunoffset2short),
                state.gunangles.map(q2repro_gunangle2short),
            ),
        };
        let fog = &state.fog;
        Self {
            pm_type: state.pm_type,
            pm_origin: pack_coords(flavor, &state.pm_origin),
            pm_velocity: pack_coords(flavor, &state.pm_velocity),
            pm_time: state.pm_time,
            pm_flags: state.pm_flags,
            pm_gravity: state.pm_gravity,
            pm_delta_angles: state.pm_delta_angles.map(angle2short),
            pm_viewheight: state.pm_viewheight,
            viewoffset,
            viewangles: state.viewangles.map(angle2short),
            kick_angles,
            gunindex: state.gunindex,
            gunskin: state.gunskin,
            gunframe: state.gunframe,
            gunoffset,
            gunangles,
            gunrate: state.gunrate,
            blend: state.blend.map(color2byte),
            damage_blend: state.damage_blend.map(color2byte),
            fov: state.fov.clamp(0.0, 255.0) as u8,
            rdflags: state.rdflags,
            stats: state.stats,
            fog: PackedFog {
                color: fog.color.map(color2byte),
                density: fraction_word(fog.density),
                skyfactor: fraction_word(fog.skyfactor),
                heightfog_start_color: fog.heightfog_start_color.map(color2byte),
                heightfog_end_color: fog.heightfog_end_color.map(color2byte),
                heightfog_density: fraction_word(fog.heightfog_density),
                heightfog_falloff: fraction_word(fog.heightfog_falloff),
                heightfog_start_dist: coord2int(fog.heightfog_start_dist),
                heightfog_end_dist: coord2int(fog.heightfog_end_dist),
            },
        }
    }
}

// ============================================================
// Delta computation
// ============================================================

/// Compute the delta from `from` (or the null state) to `to`.
///
/// `extended` enables the Q2PRO extended fields: upper effects bits, loop
/// volume and attenuation, alpha and scale. Origin changes are left for the
/// dialect writer to detect, as it knows the precision it transmits in.
pub fn make_entity_delta(
    from: Option<&PackedEntity>,
    to: &PackedEntity,
    write_old_origin: bool,
    extended: bool,
) -> EntityStateDelta {
    let null = PackedEntity::default();
    let from = from.unwrap_or(&null);
    let mut delta = EntityStateDelta {
        origin: MaybeDiffCoords::Write {
            prev: from.origin,
            current: to.origin,
        },
        ..Default::default()
    };

    for c in 0..3 {
        if to.angles[c] != from.angles[c] {
            delta.angle.set_comp(c, Angle::Short(to.angles[c]));
        }
    }

    if write_old_origin {
        delta.delta_bits |= EsdFlags::OLD_ORIGIN;
        delta.old_origin = to.old_origin;
    }

    if to.skinnum != from.skinnum {
        delta.delta_bits |= EsdFlags::SKINNUM;
        delta.skinnum = to.skinnum;
    }
    if to.frame != from.frame {
        delta.delta_bits |= EsdFlags::FRAME;
        delta.frame = to.frame;
    }

    if to.effects as u32 != from.effects as u32 {
        delta.delta_bits |= EsdFlags::EFFECTS;
    }
    if extended && (to.effects >> 32) != (from.effects >> 32) {
        delta.delta_bits |= EsdFlags::EFFECTS_MORE;
    }
    if delta.delta_bits.intersects(EsdFlags::EFFECTS | EsdFlags::EFFECTS_MORE) {
        delta.effects = to.effects as u32;
        delta.effects_more = (to.effects >> 32) as u32;
    }

    if to.renderfx != from.renderfx {
        delta.delta_bits |= EsdFlags::RENDERFX;
        delta.renderfx = to.renderfx;
    }
    if to.solid != from.solid {
        delta.delta_bits |= EsdFlags::SOLID;
        delta.solid = to.solid;
    }
    // events are sent whenever set, not delta compressed
    if to.event != 0 {
        delta.delta_bits |= EsdFlags::EVENT;
        delta.event = to.event;
    }

    let models = [
        (EsdFlags::MODELINDEX, from.modelindex, to.modelindex),
        (EsdFlags::MODELINDEX2, from.modelindex2, to.modelindex2),
        (EsdFlags::MODELINDEX3, from.modelindex3, to.modelindex3),
        (EsdFlags::MODELINDEX4, from.modelindex4, to.modelindex4),
    ];
    for (flag, old, new) in models {
        if old != new {
            delta.delta_bits |= flag;
        }
    }
    delta.modelindex = to.modelindex;
    delta.modelindex2 = to.modelindex2;
    delta.modelindex3 = to.modelindex3;
    delta.modelindex4 = to.modelindex4;

    if to.sound != from.sound {
        delta.delta_bits |= EsdFlags::SOUND;
        delta.sound = to.sound;
    }

    if extended {
        if to.loop_volume != from.loop_volume {
            delta.delta_bits |= EsdFlags::LOOP_VOLUME;
            delta.loop_volume = to.loop_volume;
        }
        if to.loop_attenuation != from.loop_attenuation {
            delta.delta_bits |= EsdFlags::LOOP_ATTENUATION;
            delta.loop_attenuation = to.loop_attenuation;
        }
        if to.alpha != from.alpha {
            delta.delta_bits |= EsdFlags::ALPHA;
            delta.alpha = to.alpha;
        }
        if to.scale != from.scale {
            delta.delta_bits |= EsdFlags::SCALE;
            delta.scale = to.scale;
        }
    }

    delta
}

fn small_offset(flavor: PackingFlavor, v: i16, viewoffset: bool) -> SmallOffset {
    match (flavor, viewoffset) {
        (PackingFlavor::Vanilla, _) => SmallOffset::Char(v as i8),
        (PackingFlavor::Repro, true) => SmallOffset::ReproViewoffset(v),
        (PackingFlavor::Repro, false) => SmallOffset::ReproGunoffset(v),
    }
}

fn small_angle(flavor: PackingFlavor, v: i16, kick: bool) -> SmallAngle {
    match (flavor, kick) {
        (PackingFlavor::Vanilla, _) => SmallAngle::Char(v as i8),
        (PackingFlavor::Repro, true) => SmallAngle::ReproKickAngle(v),
        (PackingFlavor::Repro, false) => SmallAngle::ReproGunangle(v),
    }
}

fn color_bits(from: &[u8], to: &[u8]) -> u8 {
    from.iter()
        .zip(to)
        .enumerate()
        .fold(0, |bits, (c, (a, b))| if a != b { bits | (1 << c) } else { bits })
}

/// Compute the delta from `from` (or the null state) to `to`.
///
/// Player fog is only considered for the vanilla flavor; Q2rePRO sends fog as
/// a separate message.
pub fn make_player_delta(flavor: PackingFlavor, from: Option<&PackedPlayer>, to: &PackedPlayer) -> PlayerStateDelta {
    let null = PackedPlayer::default();
    let from = from.unwrap_or(&null);
    let mut delta = PlayerStateDelta {
        pm_origin: MaybeDiffCoords::Write {
            prev: from.pm_origin,
            current: to.pm_origin,
        },
        pm_velocity: MaybeDiffCoords::Write {
            prev: from.pm_velocity,
            current: to.pm_velocity,
        },
        ..Default::default()
    };

    if to.pm_type != from.pm_type {
        delta.delta_bits |= PsdFlags::PM_TYPE;
        delta.pm_type = to.pm_type;
    }
    if to.pm_time != from.pm_time {
        delta.delta_bits |= PsdFlags::PM_TIME;
        delta.pm_time = to.pm_time;
    }
    if to.pm_flags != from.pm_flags {
        delta.delta_bits |= PsdFlags::PM_FLAGS;
        delta.pm_flags = to.pm_flags;
    }
    if to.pm_gravity != from.pm_gravity {
        delta.delta_bits |= PsdFlags::PM_GRAVITY;
        delta.pm_gravity = to.pm_gravity;
    }
    if to.pm_delta_angles != from.pm_delta_angles {
        delta.delta_bits |= PsdFlags::PM_DELTA_ANGLES;
        delta.pm_delta_angles = to.pm_delta_angles.map(Angle::Short);
    }
    if to.pm_viewheight != from.pm_viewheight {
        delta.delta_bits |= PsdFlags::PM_VIEWHEIGHT;
        delta.pm_viewheight = to.pm_viewheight;
    }

    if to.viewoffset != from.viewoffset {
        delta.delta_bits |= PsdFlags::VIEWOFFSET;
        delta.viewoffset = to.viewoffset.map(|v| small_offset(flavor, v, true));
    }
    for c in 0..3 {
        if to.viewangles[c] != from.viewangles[c] {
            delta.viewangles.set_comp(c, Angle::Short(to.viewangles[c]));
        }
    }
    if to.kick_angles != from.kick_angles {
        delta.delta_bits |= PsdFlags::KICKANGLES;
        delta.kick_angles = to.kick_angles.map(|v| small_angle(flavor, v, true));
    }

    for c in 0..4 {
        if to.blend[c] != from.blend[c] {
            delta.blend.set_comp(c, Color::Byte(to.blend[c]));
        }
        if to.damage_blend[c] != from.damage_blend[c] {
            delta.damage_blend.set_comp(c, Color::Byte(to.damage_blend[c]));
        }
    }

    if to.fov != from.fov {
        delta.delta_bits |= PsdFlags::FOV;
        delta.fov = to.fov;
    }
    if to.rdflags != from.rdflags {
        delta.delta_bits |= PsdFlags::RDFLAGS;
        delta.rdflags = to.rdflags;
    }

    if to.gunframe != from.gunframe {
        delta.delta_bits |= PsdFlags::GUNFRAME;
    }
    if to.gunrate != from.gunrate {
        delta.delta_bits |= PsdFlags::GUNRATE;
    }
    for c in 0..3 {
        if to.gunoffset[c] != from.gunoffset[c] {
            delta.gunoffset.delta_bits |= 1 << c;
        }
        if to.gunangles[c] != from.gunangles[c] {
            delta.gunangles.delta_bits |= 1 << c;
        }
    }
    if delta.delta_bits.intersects(PsdFlags::GUNFRAME | PsdFlags::GUNRATE)
        || delta.gunoffset.delta_bits != 0
        || delta.gunangles.delta_bits != 0
    {
        // gun values always travel together
        delta.gunframe = to.gunframe;
        delta.gunrate = to.gunrate;
        delta.gunoffset.values = to.gunoffset.map(|v| small_offset(flavor, v, false));
        delta.gunangles.values = to.gunangles.map(|v| small_angle(flavor, v, false));
    }

    if to.gunindex != from.gunindex {
        delta.delta_bits |= PsdFlags::GUNINDEX;
    }
    if to.gunskin != from.gunskin {
        delta.delta_bits |= PsdFlags::GUNSKIN;
    }
    if delta.delta_bits.intersects(PsdFlags::GUNINDEX | PsdFlags::GUNSKIN) {
        delta.gunindex = to.gunindex;
        delta.gunskin = to.gunskin;
    }

    for i in 0..MAX_STATS {
        if to.stats[i] != from.stats[i] {
            delta.statbits |= 1 << i;
            delta.stats[i] = to.stats[i];
        }
    }

    if flavor == PackingFlavor::Vanilla {
        make_fog_delta(&from.fog, &to.fog, &mut delta);
    }

    delta
}

fn make_fog_delta(from: &PackedFog, to: &PackedFog, delta: &mut PlayerStateDelta) {
    let fog = &mut delta.fog;

    fog.global.color.delta_bits = color_bits(&from.color, &to.color);
    if fog.global.color.delta_bits != 0 {
        for c in 0..3 {
            fog.global.color.values[c] = Color::Byte(to.color[c]);
        }
    }
    if from.density != to.density || from.skyfactor != to.skyfactor {
        fog.flags |= FogFlags::DENSITY_SKYFACTOR;
        fog.global.density = Fraction::Word(to.density);
        fog.global.skyfactor = Fraction::Word(to.skyfactor);
    }

    fog.height.start_color.delta_bits = color_bits(&from.heightfog_start_color, &to.heightfog_start_color);
    if fog.height.start_color.delta_bits != 0 {
        for c in 0..3 {
            fog.height.start_color.values[c] = Color::Byte(to.heightfog_start_color[c]);
        }
    }
    fog.height.end_color.delta_bits = color_bits(&from.heightfog_end_color, &to.heightfog_end_color);
    if fog.height.end_color.delta_bits != 0 {
        for c in 0..3 {
            fog.height.end_color.values[c] = Color::Byte(to.heightfog_end_color[c]);
        }
    }

    if from.heightfog_density != to.heightfog_density {
        fog.flags |= FogFlags::HEIGHTFOG_DENSITY;
        fog.height.density = Fraction::Word(to.heightfog_density);
    }
    if from.heightfog_falloff != to.heightfog_falloff {
        fog.flags |= FogFlags::HEIGHTFOG_FALLOFF;
        fog.height.falloff = Fraction::Word(to.heightfog_falloff);
    }
    if from.heightfog_start_dist != to.heightfog_start_dist {
        fog.flags |= FogFlags::HEIGHTFOG_START_DIST;
        fog.height.start_dist = Coord::Int(to.heightfog_start_dist);
    }
    if from.heightfog_end_dist != to.heightfog_end_dist {
        fog.flags |= FogFlags::HEIGHTFOG_END_DIST;
        fog.height.end_dist = Coord::Int(to.heightfog_end_dist);
    }
}

// ============================================================
// Delta application
// ============================================================

/// Update `state` with the changes in a received delta.
pub fn apply_entity_delta(state: &mut EntityState, delta: &EntityStateDelta) {
    let bits = delta.delta_bits;
    if bits.contains(EsdFlags::MODELINDEX) {
        state.modelindex = delta.modelindex;
    }
    if bits.contains(EsdFlags::MODELINDEX2) {
        state.modelindex2 = delta.modelindex2;
    }
    if bits.contains(EsdFlags::MODELINDEX3) {
        state.modelindex3 = delta.modelindex3;
    }
    if bits.contains(EsdFlags::MODELINDEX4) {
        state.modelindex4 = delta.modelindex4;
    }
    if bits.contains(EsdFlags::FRAME) {
        state.frame = delta.frame;
    }
    if bits.contains(EsdFlags::SKINNUM) {
        state.skinnum = delta.skinnum;
    }
    if bits.contains(EsdFlags::EFFECTS) {
        state.effects = (state.effects & !0xffff_ffff) | delta.effects as u64;
    }
    if bits.contains(EsdFlags::EFFECTS_MORE) {
        state.effects = (state.effects & 0xffff_ffff) | ((delta.effects_more as u64) << 32);
    }
    if bits.contains(EsdFlags::RENDERFX) {
        state.renderfx = delta.renderfx;
    }
    delta.origin.apply_float(&mut state.origin);
    delta.angle.apply(&mut state.angles, Angle::to_float);
    if bits.contains(EsdFlags::OLD_ORIGIN) {
        state.old_origin = delta.old_origin.map(Coord::to_float);
    }
    if bits.contains(EsdFlags::SOUND) {
        state.sound = delta.sound;
    }
    if bits.contains(EsdFlags::LOOP_VOLUME) {
        state.loop_volume = delta.loop_volume as f32 / 255.0;
    }
    if bits.contains(EsdFlags::LOOP_ATTENUATION) {
        state.loop_attenuation = decode_loop_attenuation(delta.loop_attenuation);
    }
    state.event = if bits.contains(EsdFlags::EVENT) { delta.event } else { 0 };
    if bits.contains(EsdFlags::SOLID) {
        state.solid = delta.solid;
    }
    if bits.contains(EsdFlags::ALPHA) {
        state.alpha = delta.alpha as f32 / 255.0;
    }
    if bits.contains(EsdFlags::SCALE) {
        state.scale = delta.scale as f32 / 16.0;
    }
}

/// Update `state` with the changes in a received delta.
pub fn apply_player_delta(state: &mut PlayerState, delta: &PlayerStateDelta) {
    let bits = delta.delta_bits;
    if bits.contains(PsdFlags::PM_TYPE) {
        state.pm_type = delta.pm_type;
    }
    delta.pm_origin.apply_float(&mut state.pm_origin);
    delta.pm_velocity.apply_float(&mut state.pm_velocity);
    if bits.contains(PsdFlags::PM_TIME) {
        state.pm_time = delta.pm_time;
    }
    if bits.contains(PsdFlags::PM_FLAGS) {
        state.pm_flags = delta.pm_flags;
    }
    if bits.contains(PsdFlags::PM_GRAVITY) {
        state.pm_gravity = delta.pm_gravity;
    }
    if bits.contains(PsdFlags::PM_DELTA_ANGLES) {
        state.pm_delta_angles = delta.pm_delta_angles.map(Angle::to_float);
    }
    if bits.contains(PsdFlags::PM_VIEWHEIGHT) {
        state.pm_viewheight = delta.pm_viewheight;
    }
    if bits.contains(PsdFlags::VIEWOFFSET) {
        state.viewoffset = delta.viewoffset.map(SmallOffset::to_float);
    }
    delta.viewangles.apply(&mut state.viewangles, Angle::to_float);
    if bits.contains(PsdFlags::KICKANGLES) {
        state.kick_angles = delta.kick_angles.map(SmallAngle::to_float);
    }
    if bits.contains(PsdFlags::GUNINDEX) {
        state.gunindex = delta.gunindex;
    }
    if bits.contains(PsdFlags::GUNSKIN) {
        state.gunskin = delta.gunskin;
    }
    if bits.contains(PsdFlags::GUNFRAME) {
        state.gunframe = delta.gunframe;
    }
    delta.gunoffset.apply(&mut state.gunoffset, SmallOffset::to_float);
    delta.gunangles.apply(&mut state.gunangles, SmallAngle::to_float);
    if bits.contains(PsdFlags::GUNRATE) {
        state.gunrate = delta.gunrate;
    }
    delta.blend.apply(&mut state.blend, Color::to_float);
    delta.damage_blend.apply(&mut state.damage_blend, Color::to_float);
    if bits.contains(PsdFlags::FOV) {
        state.fov = delta.fov as f32;
    }
    if bits.contains(PsdFlags::RDFLAGS) {
        state.rdflags = delta.rdflags;
    }
    if bits.contains(PsdFlags::CLIENTNUM) {
        state.clientnum = delta.clientnum;
    }
    for i in 0..MAX_STATS {
        if delta.statbits & (1 << i) != 0 {
            state.stats[i] = delta.stats[i];
        }
    }

    let fog = &delta.fog;
    let mut color = state.fog.color;
    for c in 0..3 {
        if fog.global.color.has(c) {
            color[c] = fog.global.color.values[c].to_float();
        }
    }
    state.fog.color = color;
    if fog.flags.contains(FogFlags::DENSITY_SKYFACTOR) {
        state.fog.density = fog.global.density.to_float();
        state.fog.skyfactor = fog.global.skyfactor.to_float();
    }
    for c in 0..3 {
        if fog.height.start_color.has(c) {
            state.fog.heightfog_start_color[c] = fog.height.start_color.values[c].to_float();
        }
        if fog.height.end_color.has(c) {
            state.fog.heightfog_end_color[c] = fog.height.end_color.values[c].to_float();
        }
    }
    if fog.flags.contains(FogFlags::HEIGHTFOG_DENSITY) {
        state.fog.heightfog_density = fog.height.density.to_float();
    }
    if fog.flags.contains(FogFlags::HEIGHTFOG_FALLOFF) {
        state.fog.heightfog_falloff = fog.height.falloff.to_float();
    }
    if fog.flags.contains(FogFlags::HEIGHTFOG_START_DIST) {
        state.fog.heightfog_start_dist = fog.height.start_dist.to_float();
    }
    if fog.flags.contains(FogFlags::HEIGHTFOG_END_DIST) {
        state.fog.heightfog_end_dist = fog.height.end_dist.to_float();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn random_entity(rng: &mut impl Rng) -> EntityState {
        EntityState {
            modelindex: rng.gen_range(0..512),
            modelindex2: rng.gen_range(0..4),
            frame: rng.gen(),
            skinnum: rng.gen(),
            effects: rng.gen(),
            renderfx: rng.gen(),
            origin: [rng.gen_range(-4096.0..4096.0), rng.gen_range(-4096.0..4096.0), 0.0],
            angles: [0.0, rng.gen_range(0.0..360.0), 0.0],
            sound: rng.gen_range(0..300),
            loop_volume: rng.gen_range(0.0..1.0),
            event: rng.gen_range(0..4),
            solid: rng.gen(),
            alpha: rng.gen_range(0.0..1.0),
            scale: rng.gen_range(0.0..4.0),
            ..Default::default()
        }
    }

    fn random_player(rng: &mut impl Rng) -> PlayerState {
        let mut ps = PlayerState {
            pm_type: rng.gen_range(0..5),
            pm_origin: [rng.gen_range(-4096.0..4096.0), 1.0, 2.0],
            pm_velocity: [rng.gen_range(-800.0..800.0), 0.0, 0.0],
            pm_flags: rng.gen(),
            pm_gravity: 800,
            viewoffset: [0.0, 0.0, rng.gen_range(-10.0..30.0)],
            viewangles: [rng.gen_range(-90.0..90.0), rng.gen_range(0.0..360.0), 0.0],
            kick_angles: [rng.gen_range(-5.0..5.0), 0.0, 0.0],
            gunindex: rng.gen_range(0..256),
            gunframe: rng.gen_range(0..256),
            gunoffset: [rng.gen_range(-1.0..1.0), 0.0, 0.0],
            blend: [rng.gen(), 0.5, 0.0, rng.gen()],
            fov: 90.0,
            ..Default::default()
        };
        for stat in ps.stats.iter_mut() {
            *stat = rng.gen_range(-10..10);
        }
        ps.fog.density = rng.gen();
        ps.fog.heightfog_start_dist = rng.gen_range(0.0..1000.0);
        ps
    }

    #[test]
    fn test_entity_delta_minimality() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let state = random_entity(&mut rng);
            for flavor in [PackingFlavor::Vanilla, PackingFlavor::Repro] {
                let packed = PackedEntity::pack(flavor, &state);
                let mut delta = make_entity_delta(Some(&packed), &packed, false, true);
                // events are always sent
                delta.delta_bits.remove(EsdFlags::EVENT);
                assert!(delta.is_empty(), "{:?}", delta);
            }
        }
    }

    #[test]
    fn test_player_delta_minimality() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let state = random_player(&mut rng);
            for flavor in [PackingFlavor::Vanilla, PackingFlavor::Repro] {
                let packed = PackedPlayer::pack(flavor, &state);
                let delta = make_player_delta(flavor, Some(&packed), &packed);
                assert!(delta.is_empty(), "{:?}", delta);
            }
        }
    }

    #[test]
    fn test_entity_delta_from_null() {
        let state = EntityState {
            modelindex: 3,
            frame: 7,
            origin: [1.0, 0.0, 0.0],
            ..Default::default()
        };
        let packed = PackedEntity::pack(PackingFlavor::Vanilla, &state);
        let delta = make_entity_delta(None, &packed, false, false);
        assert_eq!(delta.delta_bits, EsdFlags::MODELINDEX | EsdFlags::FRAME);
        assert_eq!(delta.origin.differs_int(), 0b001);
        assert_eq!(delta.angle.delta_bits, 0);
    }

    #[test]
    fn test_effects_more_needs_extended() {
        let from = PackedEntity::default();
        let to = PackedEntity {
            effects: 0x1_0000_0000,
            ..Default::default()
        };
        let plain = make_entity_delta(Some(&from), &to, false, false);
        assert!(plain.delta_bits.is_empty());
        let ext = make_entity_delta(Some(&from), &to, false, true);
        assert_eq!(ext.delta_bits, EsdFlags::EFFECTS_MORE);
        assert_eq!((ext.effects, ext.effects_more), (0, 1));
    }

    #[test]
    fn test_old_origin_on_request() {
        let to = PackedEntity::default();
        let delta = make_entity_delta(Some(&to), &to, true, false);
        assert_eq!(delta.delta_bits, EsdFlags::OLD_ORIGIN);
    }

    #[test]
    fn test_repro_origin_from_null_compares_equal() {
        let packed = PackedEntity::pack(PackingFlavor::Repro, &EntityState::default());
        let delta = make_entity_delta(None, &packed, false, true);
        assert!(delta.is_empty());
    }

    #[test]
    fn test_gun_values_travel_together() {
        let from = PackedPlayer::default();
        let to = PackedPlayer {
            gunangles: [0, 3, 0],
            gunframe: 0,
            ..Default::default()
        };
        let delta = make_player_delta(PackingFlavor::Vanilla, Some(&from), &to);
        assert!(!delta.delta_bits.contains(PsdFlags::GUNFRAME));
        assert_eq!(delta.gunangles.delta_bits, 0b010);
        assert_eq!(delta.gunangles.values[1], SmallAngle::Char(3));
        assert_eq!(delta.gunoffset.values[0], SmallOffset::Char(0));
    }

    #[test]
    fn test_repro_small_values() {
        let state = PlayerState {
            viewoffset: [0.0, 0.0, 22.0],
            kick_angles: [1.0, 0.0, 0.0],
            ..Default::default()
        };
        let packed = PackedPlayer::pack(PackingFlavor::Repro, &state);
        assert_eq!(packed.viewoffset[2], 22 * 16);
        let delta = make_player_delta(PackingFlavor::Repro, None, &packed);
        assert_eq!(delta.viewoffset[2], SmallOffset::ReproViewoffset(22 * 16));
        assert_eq!(delta.kick_angles[0], SmallAngle::ReproKickAngle(1024));
        // repro fog goes through svc_fog
        assert!(!delta.fog.is_set());
    }

    #[test]
    fn test_stats_bits() {
        let mut to = PackedPlayer::default();
        to.stats[0] = 5;
        to.stats[63] = -1;
        let delta = make_player_delta(PackingFlavor::Vanilla, None, &to);
        assert_eq!(delta.statbits, 1 | (1 << 63));
        assert_eq!(delta.stats[63], -1);
    }

    #[test]
    fn test_apply_entity_delta_event_resets() {
        let mut state = EntityState {
            event: 3,
            ..Default::default()
        };
        apply_entity_delta(&mut state, &EntityStateDelta::default());
        assert_eq!(state.event, 0);
    }

    #[test]
    fn test_apply_effects_halves() {
        let mut state = EntityState {
            effects: 0xaaaa_aaaa_bbbb_bbbb,
            ..Default::default()
        };
        let delta = EntityStateDelta {
            delta_bits: EsdFlags::EFFECTS,
            effects: 1,
            ..Default::default()
        };
        apply_entity_delta(&mut state, &delta);
        assert_eq!(state.effects, 0xaaaa_aaaa_0000_0001);
    }

    #[test]
    fn test_apply_player_fog() {
        let mut state = PlayerState::default();
        let from = PackedPlayer::default();
        let to = PackedPlayer {
            fog: PackedFog {
                color: [255, 0, 0],
                density: 0xffff,
                heightfog_end_dist: 800,
                ..Default::default()
            },
            ..Default::default()
        };
        let delta = make_player_delta(PackingFlavor::Vanilla, Some(&from), &to);
        apply_player_delta(&mut state, &delta);
        assert_eq!(state.fog.color, [1.0, 0.0, 0.0]);
        assert_eq!(state.fog.density, 1.0);
        assert_eq!(state.fog.heightfog_end_dist, 100.0);
    }
}
