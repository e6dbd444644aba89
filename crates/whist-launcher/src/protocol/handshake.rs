//! Line protocol spoken to the streaming client over its stdin.
//!
//! Each line is `key?value`, newline-terminated ASCII. A connection block is
//! `ports?32262:{p}.32263:{p}.32273:{p}`, `private-key?{hex}`, `ip?{ip}`
//! followed by `finished?0`. `loading?{message}` updates the splash text and
//! `kill?0` asks the client to exit.

use std::fmt;
use std::str::FromStr;

use whist_core::{HostSpinUpResult, MandelboxPorts};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("line has no '?' separator: {0:?}")]
    MissingSeparator(String),
    #[error("unknown handshake key: {0:?}")]
    UnknownKey(String),
    #[error("malformed ports value: {0:?}")]
    InvalidPorts(String),
    /// A value would break the line framing.
    #[error("{0} contains a line break")]
    LineBreak(&'static str),
    #[error("connection block is missing {0}")]
    Incomplete(&'static str),
}

/// One handshake line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeLine {
    Ports(MandelboxPorts),
    PrivateKey(String),
    Ip(String),
    Loading(String),
    Finished,
    Kill,
}

impl fmt::Display for HandshakeLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ports(p) => write!(
                f,
                "ports?32262:{}.32263:{}.32273:{}",
                p.port_32262, p.port_32263, p.port_32273
            ),
            Self::PrivateKey(key) => write!(f, "private-key?{key}"),
            Self::Ip(ip) => write!(f, "ip?{ip}"),
            Self::Loading(message) => write!(f, "loading?{message}"),
            Self::Finished => f.write_str("finished?0"),
            Self::Kill => f.write_str("kill?0"),
        }
    }
}

impl FromStr for HandshakeLine {
    type Err = HandshakeError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (key, value) = line
            .split_once('?')
            .ok_or_else(|| HandshakeError::MissingSeparator(line.to_string()))?;
        match key {
            "ports" => parse_ports(value).map(Self::Ports),
            "private-key" => Ok(Self::PrivateKey(value.to_string())),
            "ip" => Ok(Self::Ip(value.to_string())),
            "loading" => Ok(Self::Loading(value.to_string())),
            "finished" => Ok(Self::Finished),
            "kill" => Ok(Self::Kill),
            other => Err(HandshakeError::UnknownKey(other.to_string())),
        }
    }
}

fn parse_ports(value: &str) -> Result<MandelboxPorts, HandshakeError> {
    let invalid = || HandshakeError::InvalidPorts(value.to_string());
    let mut ports = [None; 3];
    for pair in value.split('.') {
        let (name, port) = pair.split_once(':').ok_or_else(invalid)?;
        let port: u16 = port.parse().map_err(|_| invalid())?;
        let slot = match name {
            "32262" => 0,
            "32263" => 1,
            "32273" => 2,
            _ => return Err(invalid()),
        };
        ports[slot] = Some(port);
    }
    match ports {
        [Some(port_32262), Some(port_32263), Some(port_32273)] => Ok(MandelboxPorts {
            port_32262,
            port_32263,
            port_32273,
        }),
        _ => Err(invalid()),
    }
}

/// The connection block for `host`, newline-terminated.
pub fn encode(host: &HostSpinUpResult) -> Result<String, HandshakeError> {
    if host.mandelbox_ip.contains(['\r', '\n']) {
        return Err(HandshakeError::LineBreak("ip"));
    }
    if host.mandelbox_secret.contains(['\r', '\n']) {
        return Err(HandshakeError::LineBreak("private key"));
    }
    let lines = [
        HandshakeLine::Ports(host.mandelbox_ports),
        HandshakeLine::PrivateKey(host.mandelbox_secret.clone()),
        HandshakeLine::Ip(host.mandelbox_ip.clone()),
        HandshakeLine::Finished,
    ];
    Ok(lines.iter().map(|line| format!("{line}\n")).collect())
}

/// Read a connection block back. Later lines override earlier ones;
/// `loading` lines are ignored.
pub fn parse(text: &str) -> Result<HostSpinUpResult, HandshakeError> {
    let (mut ports, mut secret, mut ip) = (None, None, None);
    for line in text.lines().filter(|l| !l.is_empty()) {
        match line.parse()? {
            HandshakeLine::Ports(p) => ports = Some(p),
            HandshakeLine::PrivateKey(k) => secret = Some(k),
            HandshakeLine::Ip(i) => ip = Some(i),
            HandshakeLine::Loading(_) => {}
            HandshakeLine::Finished | HandshakeLine::Kill => break,
        }
    }
    Ok(HostSpinUpResult {
        mandelbox_ip: ip.ok_or(HandshakeError::Incomplete("ip"))?,
        mandelbox_secret: secret.ok_or(HandshakeError::Incomplete("private-key"))?,
        mandelbox_ports: ports.ok_or(HandshakeError::Incomplete("ports"))?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
