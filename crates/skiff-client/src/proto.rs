//! Upstream session request encoding.
//!
//! The first DAT frame of every session carries the target address the
//! relay server should connect to, in the SOCKS address layout:
//! `[atyp][address][port: u16 BE]` with atyp 0x01 = IPv4, 0x03 = domain
//! (length-prefixed), 0x04 = IPv6.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::BytesMut;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

/// Maximum domain name length.
pub const MAX_DOMAIN_LEN: usize = 255;

/// A session target address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl Address {
    /// Target port.
    pub fn port(&self) -> u16 {
        match self {
            Address::Ip(addr) => addr.port(),
            Address::Domain(_, port) => *port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ip(addr) => write!(f, "{addr}"),
            Address::Domain(domain, port) => write!(f, "{domain}:{port}"),
        }
    }
}

/// Errors that can occur when encoding a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    /// Domain name exceeds 255 bytes.
    DomainTooLong,
}

/// Errors that can occur when parsing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    Truncated,
    InvalidAtyp(u8),
    InvalidDomain,
}

/// Encode `addr` into `buf`.
pub fn write_address(buf: &mut BytesMut, addr: &Address) -> Result<(), WriteError> {
    match addr {
        Address::Ip(SocketAddr::V4(v4)) => {
            buf.extend_from_slice(&[ATYP_IPV4]);
            buf.extend_from_slice(&v4.ip().octets());
        }
        Address::Ip(SocketAddr::V6(v6)) => {
            buf.extend_from_slice(&[ATYP_IPV6]);
            buf.extend_from_slice(&v6.ip().octets());
        }
        Address::Domain(domain, _) => {
            if domain.len() > MAX_DOMAIN_LEN {
                return Err(WriteError::DomainTooLong);
            }
            buf.extend_from_slice(&[ATYP_DOMAIN, domain.len() as u8]);
            buf.extend_from_slice(domain.as_bytes());
        }
    }
    buf.extend_from_slice(&addr.port().to_be_bytes());
    Ok(())
}

/// Parse an address from the front of `buf`, returning it together with
/// the number of bytes consumed.
pub fn parse_address(buf: &[u8]) -> Result<(Address, usize), ParseError> {
    let Some(&atyp) = buf.first() else {
        return Err(ParseError::Truncated);
    };
    match atyp {
        ATYP_IPV4 => {
            if buf.len() < 1 + 4 + 2 {
                return Err(ParseError::Truncated);
            }
            let ip: [u8; 4] = buf[1..5].try_into().map_err(|_| ParseError::Truncated)?;
            let port = u16::from_be_bytes([buf[5], buf[6]]);
            Ok((
                Address::Ip(SocketAddr::from((Ipv4Addr::from(ip), port))),
                7,
            ))
        }
        ATYP_IPV6 => {
            if buf.len() < 1 + 16 + 2 {
                return Err(ParseError::Truncated);
            }
            let ip: [u8; 16] = buf[1..17].try_into().map_err(|_| ParseError::Truncated)?;
            let port = u16::from_be_bytes([buf[17], buf[18]]);
            Ok((
                Address::Ip(SocketAddr::from((Ipv6Addr::from(ip), port))),
                19,
            ))
        }
        ATYP_DOMAIN => {
            let Some(&len) = buf.get(1) else {
                return Err(ParseError::Truncated);
            };
            let len = len as usize;
            if buf.len() < 2 + len + 2 {
                return Err(ParseError::Truncated);
            }
            let domain = std::str::from_utf8(&buf[2..2 + len])
                .map_err(|_| ParseError::InvalidDomain)?
                .to_string();
            let port = u16::from_be_bytes([buf[2 + len], buf[3 + len]]);
            Ok((Address::Domain(domain, port), 2 + len + 2))
        }
        other => Err(ParseError::InvalidAtyp(other)),
    }
}
