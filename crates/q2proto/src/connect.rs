// connect.rs -- challenge and connect strings
//
// The server answers "getchallenge" with `challenge <n> p=<netvers>`, listing
// the protocols it accepts. The client picks one and replies with
// `connect <netver> <qport> <challenge> "<userinfo>" [<packet length> <tail>]`,
// where the tail depends on the dialect.

use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::{
    Protocol, PROTOCOL_VERSION_Q2PRO_CURRENT, PROTOCOL_VERSION_Q2PRO_MINIMUM, PROTOCOL_VERSION_Q2PRO_RESERVED,
    PROTOCOL_VERSION_Q2REPRO_CURRENT, PROTOCOL_VERSION_R1Q2_CURRENT, PROTOCOL_VERSION_R1Q2_MINIMUM,
};

/// Q2PRO netchan type used when the client doesn't name one.
pub const NETCHAN_NEW: i32 = 1;

/// Parameters of a connection, as negotiated by the connect string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectInfo {
    pub protocol: Protocol,
    /// Dialect minor version
    pub version: u16,
    pub qport: i32,
    pub challenge: i32,
    pub userinfo: String,
    pub packet_length: usize,
    /// Client can inflate zpackets and compressed downloads
    pub has_zlib: bool,
    /// Q2PRO netchan type
    pub nctype: i32,
}

impl Default for ConnectInfo {
    fn default() -> Self {
        Self {
            protocol: Protocol::Vanilla,
            version: 0,
            qport: 0,
            challenge: 0,
            userinfo: String::new(),
            packet_length: 0,
            has_zlib: false,
            nctype: 0,
        }
    }
}

/// A parsed challenge response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Challenge {
    pub challenge: i32,
    /// Best protocol both sides support
    pub protocol: Protocol,
}

/// Splits on single separator characters; consecutive separators yield
/// empty tokens.
struct Tokens<'a> {
    rest: Option<&'a str>,
}

impl<'a> Tokens<'a> {
    fn new(s: &'a str) -> Self {
        Self {
            rest: (!s.is_empty()).then_some(s),
        }
    }

    fn next_token(&mut self, sep: char) -> Option<&'a str> {
        let s = self.rest?;
        match s.split_once(sep) {
            Some((token, rest)) => {
                self.rest = (!rest.is_empty()).then_some(rest);
                Some(token)
            }
            None => {
                self.rest = None;
                Some(s)
            }
        }
    }

    /// A token that may be quoted and then contain separators.
    fn next_quoted(&mut self, sep: char) -> Option<&'a str> {
        let s = self.rest?;
        let Some(quoted) = s.strip_prefix('"') else {
            return self.next_token(sep);
        };
        match quoted.split_once('"') {
            Some((token, rest)) => {
                let rest = rest.strip_prefix(sep).unwrap_or(rest);
                self.rest = (!rest.is_empty()).then_some(rest);
                Some(token)
            }
            None => {
                self.rest = None;
                Some(quoted)
            }
        }
    }

    fn next_int(&mut self, sep: char) -> Result<i32> {
        self.next_token(sep).ok_or(Error::BadData)?.trim().parse().map_err(|_| Error::BadData)
    }
}

/// Lenient integer parse for optional fields; garbage reads as 0.
fn parse_int(token: &str) -> i32 {
    token.trim().parse().unwrap_or(0)
}

/// Parse the arguments of a `challenge` response and pick the protocol to
/// connect with.
///
/// Without a `p=` list the server is vanilla. Otherwise the protocol that
/// comes first in `accepted` among those the server listed wins.
pub fn parse_challenge(args: &str, accepted: &[Protocol]) -> Result<Challenge> {
    let mut tokens = Tokens::new(args);
    let challenge = tokens.next_int(' ')?;

    let mut best: Option<(usize, Protocol)> = None;
    let mut has_protocol_list = false;
    while let Some(arg) = tokens.next_token(' ') {
        let Some(list) = arg.strip_prefix("p=") else {
            continue;
        };
        has_protocol_list = true;
        let mut netvers = Tokens::new(list);
        while let Some(netver) = netvers.next_token(',') {
            let Ok(netver) = netver.trim().parse::<i32>() else {
                continue;
            };
            let found = accepted.iter().enumerate().find(|(_, p)| p.netver() == netver);
            if let Some((index, &protocol)) = found {
                if best.map_or(true, |(best_index, _)| index < best_index) {
                    best = Some((index, protocol));
                }
            }
        }
    }

    let protocol = match best {
        Some((_, protocol)) => protocol,
        None if !has_protocol_list && accepted.contains(&Protocol::Vanilla) => Protocol::Vanilla,
        None => return Err(Error::NoAcceptableProtocol),
    };
    debug!(challenge, %protocol, "challenge");
    Ok(Challenge { challenge, protocol })
}

/// The `p=` argument a server appends to its challenge response.
pub fn challenge_extras(accepted: &[Protocol]) -> String {
    if accepted.is_empty() {
        return String::new();
    }
    let mut netvers: Vec<i32> = accepted.iter().map(|p| p.netver()).collect();
    netvers.sort_unstable();
    let list: Vec<String> = netvers.iter().map(|v| v.to_string()).collect();
    format!("p={}", list.join(","))
}

/// Parse the arguments of a `connect` command on the server.
pub fn parse_connect(args: &str, accepted: &[Protocol], default_packet_length: usize) -> Result<ConnectInfo> {
    let mut tokens = Tokens::new(args);
    let protocol = Protocol::from_netver(tokens.next_int(' ')?)
        .filter(|p| accepted.contains(p))
        .ok_or(Error::ProtocolNotSupported)?;
    let qport = tokens.next_int(' ')?;
    let challenge = tokens.next_int(' ')?;
    let userinfo = tokens.next_quoted(' ').ok_or(Error::BadData)?.to_owned();

    let mut packet_length = default_packet_length;
    if protocol >= Protocol::R1q2 {
        let token = tokens.next_token(' ').ok_or(Error::BadData)?;
        if !token.is_empty() {
            packet_length = usize::try_from(parse_int(token)).map_err(|_| Error::BadData)?;
        }
    }

    let mut connect = ConnectInfo {
        protocol,
        qport,
        challenge,
        userinfo,
        packet_length,
        ..Default::default()
    };
    match protocol {
        Protocol::OldDemo | Protocol::Vanilla => {}
        Protocol::R1q2 => {
            connect.version = match tokens.next_token(' ') {
                Some(token) if !token.is_empty() => clamp_version(
                    parse_int(token),
                    PROTOCOL_VERSION_R1Q2_MINIMUM,
                    PROTOCOL_VERSION_R1Q2_CURRENT,
                ),
                _ => PROTOCOL_VERSION_R1Q2_MINIMUM,
            };
            connect.has_zlib = true;
        }
        Protocol::Q2pro => {
            connect.nctype = match tokens.next_token(' ') {
                Some(token) if !token.is_empty() => parse_int(token),
                _ => NETCHAN_NEW,
            };
            connect.has_zlib = tokens.next_token(' ').map_or(0, parse_int) != 0;
            connect.version = match tokens.next_token(' ') {
                Some(token) if !token.is_empty() => {
                    let version = clamp_version(
                        parse_int(token),
                        PROTOCOL_VERSION_Q2PRO_MINIMUM,
                        PROTOCOL_VERSION_Q2PRO_CURRENT,
                    );
                    // never used on the wire
                    if version == PROTOCOL_VERSION_Q2PRO_RESERVED {
                        version - 1
                    } else {
                        version
                    }
                }
                _ => PROTOCOL_VERSION_Q2PRO_MINIMUM,
            };
        }
        Protocol::Q2repro => {
            connect.nctype = NETCHAN_NEW;
            connect.has_zlib = tokens.next_token(' ').map_or(0, parse_int) != 0;
            connect.version = PROTOCOL_VERSION_Q2REPRO_CURRENT;
        }
        Protocol::Q2proExtendedDemo
        | Protocol::Q2proExtendedV2Demo
        | Protocol::Q2proExtendedDemoPlayerfog
        | Protocol::KexDemos
        | Protocol::Kex => return Err(Error::ProtocolNotSupported),
    }
    debug!(protocol = %connect.protocol, version = connect.version, zlib = connect.has_zlib, "connect");
    Ok(connect)
}

fn clamp_version(version: i32, min: u16, max: u16) -> u16 {
    version.clamp(min as i32, max as i32) as u16
}

/// Fill in what a client sends for `connect.protocol` that the caller
/// left unset.
pub fn complete_connect(connect: &mut ConnectInfo) -> Result<()> {
    let current = match connect.protocol {
        Protocol::Vanilla => return Ok(()),
        Protocol::R1q2 => PROTOCOL_VERSION_R1Q2_CURRENT,
        Protocol::Q2pro => PROTOCOL_VERSION_Q2PRO_CURRENT,
        Protocol::Q2repro => {
            connect.nctype = NETCHAN_NEW;
            PROTOCOL_VERSION_Q2REPRO_CURRENT
        }
        _ => return Err(Error::ProtocolNotSupported),
    };
    if connect.version == 0 {
        connect.version = current;
    }
    connect.has_zlib = true;
    connect.qport &= 0xff;
    Ok(())
}

/// Arguments of the client's `connect` command.
pub fn connect_args(connect: &ConnectInfo) -> Result<String> {
    let tail = match connect.protocol {
        Protocol::Vanilla => None,
        Protocol::R1q2 => Some(format!("{} {}", connect.packet_length, connect.version)),
        Protocol::Q2pro => Some(format!(
            "{} {} {} {}",
            connect.packet_length, connect.nctype, connect.has_zlib as i32, connect.version
        )),
        Protocol::Q2repro => Some(format!("{} {}", connect.packet_length, connect.has_zlib as i32)),
        _ => return Err(Error::ProtocolNotSupported),
    };
    let mut args = format!(
        "{} {} {} \"{}\"",
        connect.protocol.netver(),
        connect.qport,
        connect.challenge,
        connect.userinfo
    );
    if let Some(tail) = tail {
        args.push(' ');
        args.push_str(&tail);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCEPTED: [Protocol; 4] = [Protocol::Q2repro, Protocol::Q2pro, Protocol::R1q2, Protocol::Vanilla];

    #[test]
    fn test_challenge_without_protocols_is_vanilla() {
        let challenge = parse_challenge("12345", &ACCEPTED).unwrap();
        assert_eq!(challenge.challenge, 12345);
        assert_eq!(challenge.protocol, Protocol::Vanilla);
        assert_eq!(
            parse_challenge("12345", &[Protocol::Q2pro]),
            Err(Error::NoAcceptableProtocol)
        );
    }

    #[test]
    fn test_challenge_prefers_earliest_accepted() {
        let accepted = [Protocol::Q2pro, Protocol::R1q2, Protocol::Vanilla];
        let challenge = parse_challenge("99 p=34,35", &accepted).unwrap();
        assert_eq!(challenge.protocol, Protocol::R1q2);

        // server list order decides, not the order in the string
        let challenge = parse_challenge("99 p=34,36", &accepted).unwrap();
        assert_eq!(challenge.protocol, Protocol::Q2pro);
    }

    #[test]
    fn test_challenge_skips_unknown_protocols() {
        let challenge = parse_challenge("1 p=abc,,9999,35", &ACCEPTED).unwrap();
        assert_eq!(challenge.protocol, Protocol::R1q2);
        assert_eq!(
            parse_challenge("1 p=9999", &ACCEPTED),
            Err(Error::NoAcceptableProtocol)
        );
    }

    #[test]
    fn test_bad_challenge_value() {
        assert_eq!(parse_challenge("", &ACCEPTED), Err(Error::BadData));
        assert_eq!(parse_challenge("nope p=34", &ACCEPTED), Err(Error::BadData));
    }

    #[test]
    fn test_challenge_extras_sorted() {
        assert_eq!(challenge_extras(&ACCEPTED), "p=34,35,36,1038");
        assert_eq!(challenge_extras(&[]), "");
    }

    #[test]
    fn test_parse_vanilla_connect() {
        let connect = parse_connect("34 1234 -5 \"\\name\\player one\"", &ACCEPTED, 1400).unwrap();
        assert_eq!(connect.protocol, Protocol::Vanilla);
        assert_eq!(connect.qport, 1234);
        assert_eq!(connect.challenge, -5);
        assert_eq!(connect.userinfo, "\\name\\player one");
        assert_eq!(connect.packet_length, 1400);
        assert!(!connect.has_zlib);
    }

    #[test]
    fn test_parse_connect_rejects_unaccepted() {
        assert_eq!(
            parse_connect("35 1 2 \"\"", &[Protocol::Vanilla], 1400),
            Err(Error::ProtocolNotSupported)
        );
        assert_eq!(
            parse_connect("2023 1 2 \"\" 1400", &[Protocol::Kex], 1400),
            Err(Error::ProtocolNotSupported)
        );
    }

    #[test]
    fn test_parse_r1q2_connect() {
        let connect = parse_connect("35 17 3 \"\\name\\a\" 1200 2000", &ACCEPTED, 1400).unwrap();
        assert_eq!(connect.packet_length, 1200);
        assert_eq!(connect.version, PROTOCOL_VERSION_R1Q2_CURRENT);
        assert!(connect.has_zlib);

        let connect = parse_connect("35 17 3 \"\"  ", &ACCEPTED, 1400).unwrap();
        assert_eq!(connect.packet_length, 1400);
        assert_eq!(connect.version, PROTOCOL_VERSION_R1Q2_MINIMUM);

        // packet length is required
        assert_eq!(parse_connect("35 17 3 \"\"", &ACCEPTED, 1400), Err(Error::BadData));
    }

    #[test]
    fn test_parse_q2pro_connect() {
        let connect = parse_connect("36 17 3 \"\" 1390 2 1 1016", &ACCEPTED, 1400).unwrap();
        assert_eq!(connect.nctype, 2);
        assert!(connect.has_zlib);
        assert_eq!(connect.version, PROTOCOL_VERSION_Q2PRO_MINIMUM);

        let connect = parse_connect("36 17 3 \"\" 1390", &ACCEPTED, 1400).unwrap();
        assert_eq!(connect.nctype, NETCHAN_NEW);
        assert!(!connect.has_zlib);
        assert_eq!(connect.version, PROTOCOL_VERSION_Q2PRO_MINIMUM);

        let connect = parse_connect("36 17 3 \"\" 1390 1 0 5000", &ACCEPTED, 1400).unwrap();
        assert_eq!(connect.version, PROTOCOL_VERSION_Q2PRO_CURRENT);
    }

    #[test]
    fn test_connect_args_parse_back() {
        for protocol in [Protocol::Vanilla, Protocol::R1q2, Protocol::Q2pro, Protocol::Q2repro] {
            let mut connect = ConnectInfo {
                protocol,
                qport: 0x1234,
                challenge: 77,
                userinfo: "\\name\\someone\\skin\\male/grunt".into(),
                packet_length: 1390,
                ..Default::default()
            };
            complete_connect(&mut connect).unwrap();
            let args = connect_args(&connect).unwrap();
            let parsed = parse_connect(&args, &ACCEPTED, 1390).unwrap();
            assert_eq!(parsed, connect, "{args}");
        }
    }

    #[test]
    fn test_complete_connect() {
        let mut connect = ConnectInfo {
            protocol: Protocol::Q2pro,
            qport: 0x1234,
            ..Default::default()
        };
        complete_connect(&mut connect).unwrap();
        assert_eq!(connect.version, PROTOCOL_VERSION_Q2PRO_CURRENT);
        assert_eq!(connect.qport, 0x34);
        assert!(connect.has_zlib);

        let mut connect = ConnectInfo {
            protocol: Protocol::Kex,
            ..Default::default()
        };
        assert_eq!(complete_connect(&mut connect), Err(Error::ProtocolNotSupported));
        assert_eq!(connect_args(&connect), Err(Error::ProtocolNotSupported));
    }
}
