// protocol.rs -- protocol dialects, game API levels and their mapping

use std::fmt;

/// Protocol dialects understood by the codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    /// Protocol 26, used by original release demos
    OldDemo,
    /// Vanilla 3.20 protocol
    Vanilla,
    R1q2,
    Q2pro,
    /// Q2PRO extended demo (not used for network communication)
    Q2proExtendedDemo,
    /// Q2PRO extended v2 demo (not used for network communication)
    Q2proExtendedV2Demo,
    /// Q2PRO extended v2 demo with player fog (not used for network communication)
    Q2proExtendedDemoPlayerfog,
    /// Q2PRO fork with rerelease game support
    Q2repro,
    /// Quake 2 Remastered, as used for demos
    KexDemos,
    /// Quake 2 Remastered
    Kex,
}

pub const PROTOCOL_OLD_DEMO: i32 = 26;
pub const PROTOCOL_VANILLA: i32 = 34;
pub const PROTOCOL_R1Q2: i32 = 35;
pub const PROTOCOL_Q2PRO: i32 = 36;
pub const PROTOCOL_Q2PRO_DEMO_EXT: i32 = 3434;
pub const PROTOCOL_Q2PRO_DEMO_EXT_LIMITS_2: i32 = 3435;
pub const PROTOCOL_Q2PRO_DEMO_EXT_PLAYERFOG: i32 = 3436;
pub const PROTOCOL_Q2PRO_DEMO_EXT_CURRENT: i32 = PROTOCOL_Q2PRO_DEMO_EXT_PLAYERFOG;
pub const PROTOCOL_Q2REPRO: i32 = 1038;
pub const PROTOCOL_KEX_DEMOS: i32 = 2022;
pub const PROTOCOL_KEX: i32 = 2023;

// Minor revisions used by R1Q2 and Q2PRO
pub const PROTOCOL_VERSION_R1Q2_MINIMUM: u16 = 1903;
pub const PROTOCOL_VERSION_R1Q2_UCMD: u16 = 1904;
pub const PROTOCOL_VERSION_R1Q2_LONG_SOLID: u16 = 1905;
pub const PROTOCOL_VERSION_R1Q2_CURRENT: u16 = 1905;

pub const PROTOCOL_VERSION_Q2PRO_MINIMUM: u16 = 1015;
pub const PROTOCOL_VERSION_Q2PRO_RESERVED: u16 = 1016;
pub const PROTOCOL_VERSION_Q2PRO_BEAM_ORIGIN: u16 = 1017;
pub const PROTOCOL_VERSION_Q2PRO_SHORT_ANGLES: u16 = 1018;
pub const PROTOCOL_VERSION_Q2PRO_SERVER_STATE: u16 = 1019;
pub const PROTOCOL_VERSION_Q2PRO_EXTENDED_LAYOUT: u16 = 1020;
pub const PROTOCOL_VERSION_Q2PRO_ZLIB_DOWNLOADS: u16 = 1021;
pub const PROTOCOL_VERSION_Q2PRO_CLIENTNUM_SHORT: u16 = 1022;
pub const PROTOCOL_VERSION_Q2PRO_CINEMATICS: u16 = 1023;
pub const PROTOCOL_VERSION_Q2PRO_EXTENDED_LIMITS: u16 = 1024;
pub const PROTOCOL_VERSION_Q2PRO_EXTENDED_LIMITS_2: u16 = 1025;
pub const PROTOCOL_VERSION_Q2PRO_PLAYERFOG: u16 = 1026;
pub const PROTOCOL_VERSION_Q2PRO_CURRENT: u16 = 1026;

pub const PROTOCOL_VERSION_Q2REPRO_MINIMUM: u16 = 1024;
pub const PROTOCOL_VERSION_Q2REPRO_CURRENT: u16 = PROTOCOL_VERSION_Q2REPRO_MINIMUM;

impl Protocol {
    pub const ALL: [Protocol; 10] = [
        Protocol::OldDemo,
        Protocol::Vanilla,
        Protocol::R1q2,
        Protocol::Q2pro,
        Protocol::Q2proExtendedDemo,
        Protocol::Q2proExtendedV2Demo,
        Protocol::Q2proExtendedDemoPlayerfog,
        Protocol::Q2repro,
        Protocol::KexDemos,
        Protocol::Kex,
    ];

    /// Protocol number as sent over the network.
    pub fn netver(self) -> i32 {
        match self {
            Protocol::OldDemo => PROTOCOL_OLD_DEMO,
            Protocol::Vanilla => PROTOCOL_VANILLA,
            Protocol::R1q2 => PROTOCOL_R1Q2,
            Protocol::Q2pro => PROTOCOL_Q2PRO,
            Protocol::Q2proExtendedDemo => PROTOCOL_Q2PRO_DEMO_EXT,
            Protocol::Q2proExtendedV2Demo => PROTOCOL_Q2PRO_DEMO_EXT_LIMITS_2,
            Protocol::Q2proExtendedDemoPlayerfog => PROTOCOL_Q2PRO_DEMO_EXT_PLAYERFOG,
            Protocol::Q2repro => PROTOCOL_Q2REPRO,
            Protocol::KexDemos => PROTOCOL_KEX_DEMOS,
            Protocol::Kex => PROTOCOL_KEX,
        }
    }

    pub fn from_netver(version: i32) -> Option<Protocol> {
        Protocol::ALL.iter().copied().find(|p| p.netver() == version)
    }

    fn bit(self) -> u32 {
        1 << (self as u32)
    }

    pub fn is_extended_demo(self) -> bool {
        matches!(
            self,
            Protocol::Q2proExtendedDemo | Protocol::Q2proExtendedV2Demo | Protocol::Q2proExtendedDemoPlayerfog
        )
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::OldDemo => "old demo",
            Protocol::Vanilla => "vanilla",
            Protocol::R1q2 => "r1q2",
            Protocol::Q2pro => "q2pro",
            Protocol::Q2proExtendedDemo => "q2pro extended demo",
            Protocol::Q2proExtendedV2Demo => "q2pro extended v2 demo",
            Protocol::Q2proExtendedDemoPlayerfog => "q2pro extended demo (playerfog)",
            Protocol::Q2repro => "q2repro",
            Protocol::KexDemos => "kex demos",
            Protocol::Kex => "kex",
        };
        write!(f, "{} ({})", name, self.netver())
    }
}

/// API level of the game run by the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GameApi {
    /// Vanilla/original/v3 game
    #[default]
    Vanilla,
    Q2proExtended,
    Q2proExtendedV2,
    Rerelease,
}

pub const MAX_CONFIGSTRINGS_V3: u16 = 2080;
pub const MAX_CONFIGSTRINGS_EXTENDED: u16 = 13630;
pub const MAX_CONFIGSTRINGS_RERELEASE: u16 = 12448;

impl GameApi {
    pub fn max_configstrings(self) -> u16 {
        match self {
            GameApi::Vanilla => MAX_CONFIGSTRINGS_V3,
            GameApi::Q2proExtended | GameApi::Q2proExtendedV2 => MAX_CONFIGSTRINGS_EXTENDED,
            GameApi::Rerelease => MAX_CONFIGSTRINGS_RERELEASE,
        }
    }

    fn protocol_mask(self) -> u32 {
        match self {
            GameApi::Vanilla => Protocol::Vanilla.bit() | Protocol::R1q2.bit() | Protocol::Q2pro.bit(),
            GameApi::Q2proExtended | GameApi::Q2proExtendedV2 => Protocol::Q2pro.bit(),
            GameApi::Rerelease => Protocol::Q2repro.bit(),
        }
    }
}

/// Protocols a server running any of `games` can offer, most capable first.
pub fn protocols_for_gametypes(games: &[GameApi]) -> Vec<Protocol> {
    let mask = games.iter().fold(0, |mask, game| mask | game.protocol_mask());
    Protocol::ALL.iter().rev().copied().filter(|p| mask & p.bit() != 0).collect()
}

/// Position encoding shared by several protocols, for messages sent to many clients at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MulticastProtocol {
    /// "short" positions
    Short,
    /// Q2PRO "int23" positions
    Q2proExt,
    /// float positions
    Float,
}

/// Pick a multicast encoding understood by every protocol in `protocols`.
pub fn multicast_protocol(protocols: &[Protocol], game_api: GameApi) -> Option<MulticastProtocol> {
    let proto_bits = protocols.iter().fold(0, |bits, p| bits | p.bit());
    let supported = game_api.protocol_mask();
    if proto_bits & supported == 0 || proto_bits & !supported != 0 {
        return None;
    }
    Some(match game_api {
        GameApi::Vanilla | GameApi::Q2proExtended => MulticastProtocol::Short,
        GameApi::Q2proExtendedV2 => MulticastProtocol::Q2proExt,
        GameApi::Rerelease => MulticastProtocol::Float,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_netver_mapping() {
        for p in Protocol::ALL {
            assert_eq!(Protocol::from_netver(p.netver()), Some(p));
        }
        assert_eq!(Protocol::from_netver(34), Some(Protocol::Vanilla));
        assert_eq!(Protocol::from_netver(33), None);
    }

    #[test]
    fn test_protocols_for_vanilla_game() {
        assert_eq!(
            protocols_for_gametypes(&[GameApi::Vanilla]),
            vec![Protocol::Q2pro, Protocol::R1q2, Protocol::Vanilla]
        );
    }

    #[test]
    fn test_protocols_for_mixed_games() {
        assert_eq!(
            protocols_for_gametypes(&[GameApi::Rerelease, GameApi::Q2proExtended]),
            vec![Protocol::Q2repro, Protocol::Q2pro]
        );
        assert!(protocols_for_gametypes(&[]).is_empty());
    }

    #[test]
    fn test_multicast_protocol() {
        let vanilla = [Protocol::Vanilla, Protocol::R1q2, Protocol::Q2pro];
        assert_eq!(multicast_protocol(&vanilla, GameApi::Vanilla), Some(MulticastProtocol::Short));
        assert_eq!(multicast_protocol(&[Protocol::Q2pro], GameApi::Q2proExtendedV2), Some(MulticastProtocol::Q2proExt));
        assert_eq!(multicast_protocol(&[Protocol::Q2repro], GameApi::Rerelease), Some(MulticastProtocol::Float));
        // vanilla clients can't join an extended game
        assert_eq!(multicast_protocol(&vanilla, GameApi::Q2proExtended), None);
        assert_eq!(multicast_protocol(&[], GameApi::Vanilla), None);
    }
}
