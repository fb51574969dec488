// defs.rs -- wire-level constants: command bytes, field bits, limits

// ============================================================
// Limits
// ============================================================

/// Number of player stats slots
pub const MAX_STATS: usize = 64;
/// Damage indicators per svc_damage message
pub const MAX_DAMAGE_INDICATORS: usize = 4;
pub const MAX_ENTITIES: u16 = 8192;
pub const MAX_LOCALIZATION_ARGS: usize = 8;
pub const INVENTORY_ITEMS: usize = 256;

pub const MAX_BATCH_MOVE_FRAMES: usize = 4;
pub const MAX_BATCH_MOVE_CMDS: usize = 32;

pub const SOUND_DEFAULT_VOLUME: u8 = 255;
pub const SOUND_DEFAULT_ATTENUATION: u8 = 64;

/// Gunindex bits used by Q2PRO, Q2rePRO and KEX; the remaining bits carry the gunskin
pub const Q2PRO_GUNINDEX_BITS: u32 = 13;
pub const Q2PRO_GUNINDEX_MASK: u16 = (1 << 13) - 1;

// ============================================================
// Server commands
// ============================================================

pub const SVC_MUZZLEFLASH: u8 = 1;
pub const SVC_MUZZLEFLASH2: u8 = 2;
pub const SVC_TEMP_ENTITY: u8 = 3;
pub const SVC_LAYOUT: u8 = 4;
pub const SVC_INVENTORY: u8 = 5;
pub const SVC_NOP: u8 = 6;
pub const SVC_DISCONNECT: u8 = 7;
pub const SVC_RECONNECT: u8 = 8;
pub const SVC_SOUND: u8 = 9;
pub const SVC_PRINT: u8 = 10;
pub const SVC_STUFFTEXT: u8 = 11;
pub const SVC_SERVERDATA: u8 = 12;
pub const SVC_CONFIGSTRING: u8 = 13;
pub const SVC_SPAWNBASELINE: u8 = 14;
pub const SVC_CENTERPRINT: u8 = 15;
pub const SVC_DOWNLOAD: u8 = 16;
pub const SVC_PLAYERINFO: u8 = 17;
pub const SVC_PACKETENTITIES: u8 = 18;
pub const SVC_FRAME: u8 = 20;

pub const SVC_R1Q2_ZPACKET: u8 = 21;
pub const SVC_R1Q2_ZDOWNLOAD: u8 = 22;
pub const SVC_R1Q2_SETTING: u8 = 24;

pub const SVC_Q2PRO_GAMESTATE: u8 = 23;
pub const SVC_Q2PRO_CONFIGSTRINGSTREAM: u8 = 25;
pub const SVC_Q2PRO_BASELINESTREAM: u8 = 26;

pub const SVC_RR_SPLITCLIENT: u8 = 21;
pub const SVC_RR_CONFIGBLAST: u8 = 22;
pub const SVC_RR_SPAWNBASELINEBLAST: u8 = 23;
pub const SVC_RR_DAMAGE: u8 = 25;
pub const SVC_RR_LOCPRINT: u8 = 26;
pub const SVC_RR_FOG: u8 = 27;
pub const SVC_RR_POI: u8 = 30;
pub const SVC_RR_HELP_PATH: u8 = 31;
pub const SVC_RR_MUZZLEFLASH3: u8 = 32;
pub const SVC_RR_ACHIEVEMENT: u8 = 33;

pub const SVC_Q2REPRO_ZPACKET: u8 = 34;
pub const SVC_Q2REPRO_ZDOWNLOAD: u8 = 35;
pub const SVC_Q2REPRO_GAMESTATE: u8 = 36;
pub const SVC_Q2REPRO_SETTING: u8 = 37;
pub const SVC_Q2REPRO_CONFIGSTRINGSTREAM: u8 = 38;
pub const SVC_Q2REPRO_BASELINESTREAM: u8 = 39;

// ============================================================
// Client commands
// ============================================================

pub const CLC_BAD: u8 = 0;
pub const CLC_NOP: u8 = 1;
pub const CLC_MOVE: u8 = 2;
pub const CLC_USERINFO: u8 = 3;
pub const CLC_STRINGCMD: u8 = 4;
pub const CLC_R1Q2_SETTING: u8 = 5;
pub const CLC_Q2PRO_MOVE_NODELTA: u8 = 10;
pub const CLC_Q2PRO_MOVE_BATCHED: u8 = 11;
pub const CLC_Q2PRO_USERINFO_DELTA: u8 = 12;

// ============================================================
// Sound message flags
// ============================================================

pub const SND_VOLUME: u8 = 1 << 0;
pub const SND_ATTENUATION: u8 = 1 << 1;
pub const SND_POS: u8 = 1 << 2;
pub const SND_ENT: u8 = 1 << 3;
pub const SND_OFFSET: u8 = 1 << 4;
pub const SND_Q2PRO_INDEX16: u8 = 1 << 5;
pub const SND_KEX_LARGE_ENT: u8 = 1 << 6;

/// Extended sound value: loop volume present
pub const SOUND_FLAG_VOLUME: u16 = 1 << 14;
/// Extended sound value: loop attenuation present
pub const SOUND_FLAG_ATTENUATION: u16 = 1 << 15;

// ============================================================
// Entity update bits
// ============================================================

pub const U_ORIGIN1: u64 = 1 << 0;
pub const U_ORIGIN2: u64 = 1 << 1;
pub const U_ANGLE2: u64 = 1 << 2;
pub const U_ANGLE3: u64 = 1 << 3;
pub const U_FRAME8: u64 = 1 << 4;
pub const U_EVENT: u64 = 1 << 5;
pub const U_REMOVE: u64 = 1 << 6;
pub const U_MOREBITS1: u64 = 1 << 7;

pub const U_NUMBER16: u64 = 1 << 8;
pub const U_ORIGIN3: u64 = 1 << 9;
pub const U_ANGLE1: u64 = 1 << 10;
pub const U_MODEL: u64 = 1 << 11;
pub const U_RENDERFX8: u64 = 1 << 12;
/// Q2PRO: 'short' angles
pub const U_ANGLE16: u64 = 1 << 13;
pub const U_EFFECTS8: u64 = 1 << 14;
pub const U_MOREBITS2: u64 = 1 << 15;

pub const U_SKIN8: u64 = 1 << 16;
pub const U_FRAME16: u64 = 1 << 17;
pub const U_RENDERFX16: u64 = 1 << 18;
pub const U_EFFECTS16: u64 = 1 << 19;
pub const U_MODEL2: u64 = 1 << 20;
pub const U_MODEL3: u64 = 1 << 21;
pub const U_MODEL4: u64 = 1 << 22;
pub const U_MOREBITS3: u64 = 1 << 23;

pub const U_OLDORIGIN: u64 = 1 << 24;
pub const U_SKIN16: u64 = 1 << 25;
pub const U_SOUND: u64 = 1 << 26;
pub const U_SOLID: u64 = 1 << 27;
pub const U_MODEL16: u64 = 1 << 28;
pub const U_MOREFX8: u64 = 1 << 29;
pub const U_KEX_EFFECTS64: u64 = 1 << 29;
pub const U_ALPHA: u64 = 1 << 30;
pub const U_MOREBITS4: u64 = 1 << 31;

pub const U_SCALE: u64 = 1 << 32;
pub const U_MOREFX16: u64 = 1 << 33;
pub const U_KEX_INSTANCE: u64 = 1 << 33;
pub const U_KEX_OWNER: u64 = 1 << 34;
pub const U_KEX_OLDFRAME: u64 = 1 << 35;

pub const U_SKIN32: u64 = U_SKIN8 | U_SKIN16;
pub const U_EFFECTS32: u64 = U_EFFECTS8 | U_EFFECTS16;
pub const U_RENDERFX32: u64 = U_RENDERFX8 | U_RENDERFX16;
pub const U_MOREFX32: u64 = U_MOREFX8 | U_MOREFX16;

// ============================================================
// Player state bits
// ============================================================

pub const PS_M_TYPE: u32 = 1 << 0;
pub const PS_M_ORIGIN: u32 = 1 << 1;
pub const PS_M_VELOCITY: u32 = 1 << 2;
pub const PS_M_TIME: u32 = 1 << 3;
pub const PS_M_FLAGS: u32 = 1 << 4;
pub const PS_M_GRAVITY: u32 = 1 << 5;
pub const PS_M_DELTA_ANGLES: u32 = 1 << 6;
pub const PS_VIEWOFFSET: u32 = 1 << 7;
pub const PS_VIEWANGLES: u32 = 1 << 8;
pub const PS_KICKANGLES: u32 = 1 << 9;
pub const PS_BLEND: u32 = 1 << 10;
pub const PS_FOV: u32 = 1 << 11;
pub const PS_WEAPONINDEX: u32 = 1 << 12;
pub const PS_WEAPONFRAME: u32 = 1 << 13;
pub const PS_RDFLAGS: u32 = 1 << 14;
pub const PS_RR_VIEWHEIGHT: u32 = 1 << 15;
pub const PS_MOREBITS: u32 = 1 << 15;
pub const PS_Q2PRO_PLAYERFOG: u32 = 1 << 16;
pub const PS_KEX_DAMAGE_BLEND: u32 = 1 << 16;
pub const PS_KEX_TEAM_ID: u32 = 1 << 17;

// r1q2 extra flags
pub const EPS_GUNOFFSET: u32 = 1 << 0;
pub const EPS_GUNANGLES: u32 = 1 << 1;
pub const EPS_M_VELOCITY2: u32 = 1 << 2;
pub const EPS_M_ORIGIN2: u32 = 1 << 3;
pub const EPS_VIEWANGLE2: u32 = 1 << 4;
pub const EPS_STATS: u32 = 1 << 5;
// Q2PRO
pub const EPS_CLIENTNUM: u32 = 1 << 6;
// KEX
pub const EPS_GUNRATE: u32 = 1 << 7;

// ============================================================
// User command bits
// ============================================================

pub const CM_ANGLE1: u8 = 1 << 0;
pub const CM_ANGLE2: u8 = 1 << 1;
pub const CM_ANGLE3: u8 = 1 << 2;
pub const CM_FORWARD: u8 = 1 << 3;
pub const CM_SIDE: u8 = 1 << 4;
pub const CM_UP: u8 = 1 << 5;
pub const CM_BUTTONS: u8 = 1 << 6;
pub const CM_IMPULSE: u8 = 1 << 7;

// ============================================================
// Q2PRO / Q2rePRO serverdata protocol flags
// ============================================================

pub const Q2PRO_PF_STRAFEJUMP_HACK: u16 = 1 << 0;
pub const Q2PRO_PF_QW_MODE: u16 = 1 << 1;
pub const Q2PRO_PF_WATERJUMP_HACK: u16 = 1 << 2;
pub const Q2PRO_PF_EXTENSIONS: u16 = 1 << 3;
pub const Q2PRO_PF_EXTENSIONS_2: u16 = 1 << 4;
/// The server game library is a version 3 game
pub const Q2REPRO_PF_GAME3_COMPAT: u16 = 1 << 15;

/// Muzzle flash weapon flag for silenced weapons
pub const MZ_SILENCED: u16 = 1 << 7;

/// Worst case size of one Q2PRO (possibly extended) baseline record
pub const Q2PRO_WRITE_GAMESTATE_BASELINE_SIZE: usize = 1 // command byte
    + 7 // bits & number
    + 8 // model indices
    + 2 // frame
    + 4 // skin
    + 8 // effects + morefx
    + 4 // renderfx
    + 9 // origin
    + 6 // angles
    + 9 // old_origin
    + 2 // sound
    + 1 // loop volume
    + 1 // loop attenuation
    + 1 // event
    + 4 // solid
    + 1 // alpha
    + 1; // scale

/// Worst case size of one vanilla baseline record
pub const VANILLA_WRITE_GAMESTATE_BASELINE_SIZE: usize = 1 // command byte
    + 6 // bits & number
    + 4 // model indices
    + 2 // frame
    + 4 // skin
    + 4 // effects
    + 4 // renderfx
    + 6 // origin
    + 3 // angles
    + 6 // old_origin
    + 1 // sound
    + 1 // event
    + 2; // solid

/// Worst case size of one R1Q2 baseline record
pub const R1Q2_WRITE_GAMESTATE_BASELINE_SIZE: usize = 1 // command byte
    + 6 // bits & number
    + 4 // model indices
    + 2 // frame
    + 4 // skin
    + 4 // effects
    + 4 // renderfx
    + 6 // origin
    + 3 // angles
    + 6 // old_origin
    + 1 // sound
    + 1 // event
    + 4; // solid

/// Worst case size of one Q2rePRO baseline record
pub const Q2REPRO_WRITE_GAMESTATE_BASELINE_SIZE: usize = 1 // command byte
    + 7 // bits & number
    + 8 // model indices
    + 2 // frame
    + 4 // skin
    + 8 // effects + morefx
    + 4 // renderfx
    + 12 // origin
    + 6 // angles
    + 12 // old_origin
    + 2 // sound
    + 1 // loop volume
    + 1 // loop attenuation
    + 1 // event
    + 4 // solid
    + 1 // alpha
    + 1; // scale

/// Worst case size of one KEX baseline record
pub const KEX_WRITE_GAMESTATE_BASELINE_SIZE: usize = 1 // command byte
    + 7 // bits & number
    + 8 // model indices
    + 2 // frame
    + 4 // skin
    + 8 // effects + morefx
    + 4 // renderfx
    + 12 // origin
    + 12 // angles
    + 12 // old_origin
    + 2 // sound
    + 1 // loop volume
    + 1 // loop attenuation
    + 1 // event
    + 4 // solid
    + 1 // alpha
    + 1; // scale

// ============================================================
// Temp entities
// ============================================================

pub const TE_GUNSHOT: u8 = 0;
pub const TE_BLOOD: u8 = 1;
pub const TE_BLASTER: u8 = 2;
pub const TE_RAILTRAIL: u8 = 3;
pub const TE_SHOTGUN: u8 = 4;
pub const TE_EXPLOSION1: u8 = 5;
pub const TE_EXPLOSION2: u8 = 6;
pub const TE_ROCKET_EXPLOSION: u8 = 7;
pub const TE_GRENADE_EXPLOSION: u8 = 8;
pub const TE_SPARKS: u8 = 9;
pub const TE_SPLASH: u8 = 10;
pub const TE_BUBBLETRAIL: u8 = 11;
pub const TE_SCREEN_SPARKS: u8 = 12;
pub const TE_SHIELD_SPARKS: u8 = 13;
pub const TE_BULLET_SPARKS: u8 = 14;
pub const TE_LASER_SPARKS: u8 = 15;
pub const TE_PARASITE_ATTACK: u8 = 16;
pub const TE_ROCKET_EXPLOSION_WATER: u8 = 17;
pub const TE_GRENADE_EXPLOSION_WATER: u8 = 18;
pub const TE_MEDIC_CABLE_ATTACK: u8 = 19;
pub const TE_BFG_EXPLOSION: u8 = 20;
pub const TE_BFG_BIGEXPLOSION: u8 = 21;
pub const TE_BOSSTPORT: u8 = 22;
pub const TE_BFG_LASER: u8 = 23;
pub const TE_GRAPPLE_CABLE: u8 = 24;
pub const TE_WELDING_SPARKS: u8 = 25;
pub const TE_GREENBLOOD: u8 = 26;
pub const TE_BLUEHYPERBLASTER: u8 = 27;
pub const TE_PLASMA_EXPLOSION: u8 = 28;
pub const TE_TUNNEL_SPARKS: u8 = 29;
// ROGUE
pub const TE_BLASTER2: u8 = 30;
pub const TE_RAILTRAIL2: u8 = 31;
pub const TE_FLAME: u8 = 32;
pub const TE_LIGHTNING: u8 = 33;
pub const TE_DEBUGTRAIL: u8 = 34;
pub const TE_PLAIN_EXPLOSION: u8 = 35;
pub const TE_FLASHLIGHT: u8 = 36;
pub const TE_FORCEWALL: u8 = 37;
pub const TE_HEATBEAM: u8 = 38;
pub const TE_MONSTER_HEATBEAM: u8 = 39;
pub const TE_STEAM: u8 = 40;
pub const TE_BUBBLETRAIL2: u8 = 41;
pub const TE_MOREBLOOD: u8 = 42;
pub const TE_HEATBEAM_SPARKS: u8 = 43;
pub const TE_HEATBEAM_STEAM: u8 = 44;
pub const TE_CHAINFIST_SMOKE: u8 = 45;
pub const TE_ELECTRIC_SPARKS: u8 = 46;
pub const TE_TRACKER_EXPLOSION: u8 = 47;
pub const TE_TELEPORT_EFFECT: u8 = 48;
pub const TE_DBALL_GOAL: u8 = 49;
pub const TE_WIDOWBEAMOUT: u8 = 50;
pub const TE_NUKEBLAST: u8 = 51;
pub const TE_WIDOWSPLASH: u8 = 52;
pub const TE_EXPLOSION1_BIG: u8 = 53;
pub const TE_EXPLOSION1_NP: u8 = 54;
pub const TE_FLECHETTE: u8 = 55;
// rerelease
pub const TE_BLUEHYPERBLASTER_2: u8 = 56;
pub const TE_BFG_ZAP: u8 = 57;
pub const TE_BERSERK_SLAM: u8 = 58;
pub const TE_GRAPPLE_CABLE_2: u8 = 59;
pub const TE_POWER_SPLASH: u8 = 60;
pub const TE_LIGHTNING_BEAM: u8 = 61;
pub const TE_EXPLOSION1_NL: u8 = 62;
pub const TE_EXPLOSION2_NL: u8 = 63;
/// Q2PRO extension
pub const TE_Q2PRO_DAMAGE_DEALT: u8 = 128;

/// Number of packed direction vectors
pub const NUMVERTEXNORMALS: usize = 162;

// ============================================================
// Fog bits
// ============================================================

// Q2PRO player fog
pub const Q2PRO_FOG_BIT_COLOR: u8 = 1 << 0;
pub const Q2PRO_FOG_BIT_DENSITY: u8 = 1 << 1;
pub const Q2PRO_FOG_BIT_HEIGHT_DENSITY: u8 = 1 << 2;
pub const Q2PRO_FOG_BIT_HEIGHT_FALLOFF: u8 = 1 << 3;
pub const Q2PRO_FOG_BIT_HEIGHT_START_COLOR: u8 = 1 << 4;
pub const Q2PRO_FOG_BIT_HEIGHT_END_COLOR: u8 = 1 << 5;
pub const Q2PRO_FOG_BIT_HEIGHT_START_DIST: u8 = 1 << 6;
pub const Q2PRO_FOG_BIT_HEIGHT_END_DIST: u8 = 1 << 7;

// rerelease svc_fog
pub const FOG_RR_BIT_DENSITY: u16 = 1 << 0;
pub const FOG_RR_BIT_R: u16 = 1 << 1;
pub const FOG_RR_BIT_G: u16 = 1 << 2;
pub const FOG_RR_BIT_B: u16 = 1 << 3;
pub const FOG_RR_BIT_TIME: u16 = 1 << 4;
pub const FOG_RR_BIT_HEIGHTFOG_FALLOFF: u16 = 1 << 5;
pub const FOG_RR_BIT_HEIGHTFOG_DENSITY: u16 = 1 << 6;
pub const FOG_RR_BIT_MORE_BITS: u16 = 1 << 7;
pub const FOG_RR_BIT_HEIGHTFOG_START_R: u16 = 1 << 8;
pub const FOG_RR_BIT_HEIGHTFOG_START_G: u16 = 1 << 9;
pub const FOG_RR_BIT_HEIGHTFOG_START_B: u16 = 1 << 10;
pub const FOG_RR_BIT_HEIGHTFOG_START_DIST: u16 = 1 << 11;
pub const FOG_RR_BIT_HEIGHTFOG_END_R: u16 = 1 << 12;
pub const FOG_RR_BIT_HEIGHTFOG_END_G: u16 = 1 << 13;
pub const FOG_RR_BIT_HEIGHTFOG_END_B: u16 = 1 << 14;
pub const FOG_RR_BIT_HEIGHTFOG_END_DIST: u16 = 1 << 15;

// ============================================================
// KEX gun bits
// ============================================================

pub const GUNBIT_OFFSET_X: u8 = 1 << 0;
pub const GUNBIT_OFFSET_Y: u8 = 1 << 1;
pub const GUNBIT_OFFSET_Z: u8 = 1 << 2;
pub const GUNBIT_ANGLES_X: u8 = 1 << 3;
pub const GUNBIT_ANGLES_Y: u8 = 1 << 4;
pub const GUNBIT_ANGLES_Z: u8 = 1 << 5;
pub const GUNBIT_GUNRATE: u8 = 1 << 6;
