// debug.rs -- names of commands and delta bits for trace output

use std::fmt;

use crate::defs::*;
use crate::protocol::Protocol;

/// Server command names shared by every dialect.
const SVC_STRINGS: [&str; 21] = [
    "svc_bad",
    "svc_muzzleflash",
    "svc_muzzlflash2",
    "svc_temp_entity",
    "svc_layout",
    "svc_inventory",
    "svc_nop",
    "svc_disconnect",
    "svc_reconnect",
    "svc_sound",
    "svc_print",
    "svc_stufftext",
    "svc_serverdata",
    "svc_configstring",
    "svc_spawnbaseline",
    "svc_centerprint",
    "svc_download",
    "svc_playerinfo",
    "svc_packetentities",
    "svc_deltapacketentities",
    "svc_frame",
];

const SVC_R1Q2_STRINGS: &[(u8, &str)] = &[
    (SVC_R1Q2_ZPACKET, "svc_zpacket"),
    (SVC_R1Q2_ZDOWNLOAD, "svc_zdownload"),
    (SVC_R1Q2_SETTING, "svc_setting"),
];

const SVC_Q2PRO_STRINGS: &[(u8, &str)] = &[
    (SVC_R1Q2_ZPACKET, "svc_zpacket"),
    (SVC_R1Q2_ZDOWNLOAD, "svc_zdownload"),
    (SVC_Q2PRO_GAMESTATE, "svc_gamestate"),
    (SVC_R1Q2_SETTING, "svc_setting"),
    (SVC_Q2PRO_CONFIGSTRINGSTREAM, "svc_configstringstream"),
    (SVC_Q2PRO_BASELINESTREAM, "svc_baselinestream"),
];

const SVC_RERELEASE_STRINGS: &[(u8, &str)] = &[
    (SVC_RR_SPLITCLIENT, "svc_splitclient"),
    (SVC_RR_CONFIGBLAST, "svc_configblast"),
    (SVC_RR_SPAWNBASELINEBLAST, "svc_spawnbaselineblast"),
    (SVC_RR_DAMAGE, "svc_damage"),
    (SVC_RR_LOCPRINT, "svc_locprint"),
    (SVC_RR_FOG, "svc_fog"),
    (SVC_RR_POI, "svc_poi"),
    (SVC_RR_HELP_PATH, "svc_help_path"),
    (SVC_RR_MUZZLEFLASH3, "svc_muzzleflash3"),
    (SVC_RR_ACHIEVEMENT, "svc_achievement"),
];

const SVC_Q2REPRO_STRINGS: &[(u8, &str)] = &[
    (SVC_Q2REPRO_ZPACKET, "svc_zpacket"),
    (SVC_Q2REPRO_ZDOWNLOAD, "svc_zdownload"),
    (SVC_Q2REPRO_GAMESTATE, "svc_gamestate"),
    (SVC_Q2REPRO_SETTING, "svc_setting"),
    (SVC_Q2REPRO_CONFIGSTRINGSTREAM, "svc_configstringstream"),
    (SVC_Q2REPRO_BASELINESTREAM, "svc_baselinestream"),
];

const CLC_STRINGS: &[(u8, &str)] = &[
    (CLC_BAD, "clc_bad"),
    (CLC_NOP, "clc_nop"),
    (CLC_MOVE, "clc_move"),
    (CLC_USERINFO, "clc_userinfo"),
    (CLC_STRINGCMD, "clc_stringcmd"),
];

const CLC_EXTENDED_STRINGS: &[(u8, &str)] = &[
    (CLC_R1Q2_SETTING, "clc_setting"),
    (CLC_Q2PRO_MOVE_NODELTA, "clc_move_nodelta"),
    (CLC_Q2PRO_MOVE_BATCHED, "clc_move_batched"),
    (CLC_Q2PRO_USERINFO_DELTA, "clc_userinfo_delta"),
];

fn lookup(tables: &[&[(u8, &'static str)]], command: u8) -> Option<&'static str> {
    tables
        .iter()
        .flat_map(|table| table.iter())
        .find(|(cmd, _)| *cmd == command)
        .map(|(_, name)| *name)
}

/// Name of a server command byte in `protocol`.
pub fn svc_name(protocol: Protocol, command: u8) -> &'static str {
    let extensions: &[&[(u8, &str)]] = match protocol {
        Protocol::OldDemo | Protocol::Vanilla => &[],
        Protocol::R1q2 => &[SVC_R1Q2_STRINGS],
        Protocol::Q2pro
        | Protocol::Q2proExtendedDemo
        | Protocol::Q2proExtendedV2Demo
        | Protocol::Q2proExtendedDemoPlayerfog => &[SVC_Q2PRO_STRINGS],
        Protocol::Q2repro => &[SVC_RERELEASE_STRINGS, SVC_Q2REPRO_STRINGS],
        Protocol::KexDemos | Protocol::Kex => &[SVC_RERELEASE_STRINGS],
    };
    match lookup(extensions, command) {
        Some(name) => name,
        None => SVC_STRINGS.get(command as usize).copied().unwrap_or("svc_unknown"),
    }
}

/// Name of a client command byte in `protocol`.
pub fn clc_name(protocol: Protocol, command: u8) -> &'static str {
    let tables: &[&[(u8, &str)]] = match protocol {
        Protocol::OldDemo | Protocol::Vanilla | Protocol::KexDemos | Protocol::Kex => &[CLC_STRINGS],
        _ => &[CLC_STRINGS, CLC_EXTENDED_STRINGS],
    };
    lookup(tables, command).unwrap_or("clc_unknown")
}

const ENTITY_BITS: &[(u64, &str)] = &[
    (U_ORIGIN1, "U_ORIGIN1"),
    (U_ORIGIN2, "U_ORIGIN2"),
    (U_ORIGIN3, "U_ORIGIN3"),
    (U_ANGLE1, "U_ANGLE1"),
    (U_ANGLE2, "U_ANGLE2"),
    (U_ANGLE3, "U_ANGLE3"),
    (U_ANGLE16, "U_ANGLE16"),
    (U_FRAME8, "U_FRAME8"),
    (U_FRAME16, "U_FRAME16"),
    (U_EVENT, "U_EVENT"),
    (U_REMOVE, "U_REMOVE"),
    (U_NUMBER16, "U_NUMBER16"),
    (U_MODEL, "U_MODEL"),
    (U_MODEL2, "U_MODEL2"),
    (U_MODEL3, "U_MODEL3"),
    (U_MODEL4, "U_MODEL4"),
    (U_MODEL16, "U_MODEL16"),
    (U_RENDERFX8, "U_RENDERFX8"),
    (U_RENDERFX16, "U_RENDERFX16"),
    (U_EFFECTS8, "U_EFFECTS8"),
    (U_EFFECTS16, "U_EFFECTS16"),
    (U_SKIN8, "U_SKIN8"),
    (U_SKIN16, "U_SKIN16"),
    (U_OLDORIGIN, "U_OLDORIGIN"),
    (U_SOUND, "U_SOUND"),
    (U_SOLID, "U_SOLID"),
    (U_MOREFX8, "U_MOREFX8"),
    (U_ALPHA, "U_ALPHA"),
    (U_SCALE, "U_SCALE"),
    (U_MOREFX16, "U_MOREFX16"),
    (U_KEX_OWNER, "U_OWNER"),
    (U_KEX_OLDFRAME, "U_OLDFRAME"),
];

const PLAYER_BITS: &[(u32, &str)] = &[
    (PS_M_TYPE, "PS_M_TYPE"),
    (PS_M_ORIGIN, "PS_M_ORIGIN"),
    (PS_M_VELOCITY, "PS_M_VELOCITY"),
    (PS_M_TIME, "PS_M_TIME"),
    (PS_M_FLAGS, "PS_M_FLAGS"),
    (PS_M_GRAVITY, "PS_M_GRAVITY"),
    (PS_M_DELTA_ANGLES, "PS_M_DELTA_ANGLES"),
    (PS_VIEWOFFSET, "PS_VIEWOFFSET"),
    (PS_VIEWANGLES, "PS_VIEWANGLES"),
    (PS_KICKANGLES, "PS_KICKANGLES"),
    (PS_BLEND, "PS_BLEND"),
    (PS_FOV, "PS_FOV"),
    (PS_WEAPONINDEX, "PS_WEAPONINDEX"),
    (PS_WEAPONFRAME, "PS_WEAPONFRAME"),
    (PS_RDFLAGS, "PS_RDFLAGS"),
    (PS_MOREBITS, "PS_MOREBITS"),
    (PS_Q2PRO_PLAYERFOG, "PS_PLAYERFOG"),
    (PS_KEX_TEAM_ID, "PS_TEAM_ID"),
];

fn write_flags<T>(f: &mut fmt::Formatter<'_>, bits: T, names: &[(T, &str)]) -> fmt::Result
where
    T: Copy + PartialEq + Default + std::ops::BitAnd<Output = T>,
{
    let mut first = true;
    for &(bit, name) in names {
        if bits & bit != T::default() {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(name)?;
            first = false;
        }
    }
    if first {
        f.write_str("0")?;
    }
    Ok(())
}

/// Entity delta bits, rendered as `U_MODEL|U_ORIGIN1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityBits(pub u64);

impl fmt::Display for EntityBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_flags(f, self.0, ENTITY_BITS)
    }
}

/// Player state delta bits, rendered as `PS_M_ORIGIN|PS_FOV`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlayerBits(pub u32);

impl fmt::Display for PlayerBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_flags(f, self.0, PLAYER_BITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_svc_names_per_dialect() {
        assert_eq!(svc_name(Protocol::Vanilla, SVC_FRAME), "svc_frame");
        assert_eq!(svc_name(Protocol::Vanilla, SVC_R1Q2_ZPACKET), "svc_unknown");
        assert_eq!(svc_name(Protocol::R1q2, SVC_R1Q2_ZPACKET), "svc_zpacket");
        assert_eq!(svc_name(Protocol::Q2pro, SVC_Q2PRO_GAMESTATE), "svc_gamestate");
        assert_eq!(svc_name(Protocol::Kex, SVC_RR_CONFIGBLAST), "svc_configblast");
        assert_eq!(svc_name(Protocol::Q2repro, SVC_Q2REPRO_ZPACKET), "svc_zpacket");
        assert_eq!(svc_name(Protocol::Q2repro, SVC_RR_FOG), "svc_fog");
    }

    #[test]
    fn test_clc_names() {
        assert_eq!(clc_name(Protocol::Vanilla, CLC_MOVE), "clc_move");
        assert_eq!(clc_name(Protocol::Vanilla, CLC_Q2PRO_MOVE_BATCHED), "clc_unknown");
        assert_eq!(clc_name(Protocol::Q2pro, CLC_Q2PRO_MOVE_BATCHED), "clc_move_batched");
    }

    #[test]
    fn test_bits_display() {
        assert_eq!(EntityBits(U_MODEL | U_ORIGIN1).to_string(), "U_ORIGIN1|U_MODEL");
        assert_eq!(EntityBits(0).to_string(), "0");
        assert_eq!(PlayerBits(PS_M_ORIGIN | PS_FOV).to_string(), "PS_M_ORIGIN|PS_FOV");
    }
}
