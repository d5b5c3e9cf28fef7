//! SOCKS5 handshake: method negotiation and command parsing (RFC 1928).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Socks5Error;
use crate::proto::Address;

const SOCKS5_VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

pub const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// SOCKS5 reply codes.
pub const REPLY_SUCCEEDED: u8 = 0x00;
pub const REPLY_GENERAL_FAILURE: u8 = 0x01;
pub const REPLY_NETWORK_UNREACHABLE: u8 = 0x03;
pub const REPLY_HOST_UNREACHABLE: u8 = 0x04;
pub const REPLY_CONNECTION_REFUSED: u8 = 0x05;
pub const REPLY_TTL_EXPIRED: u8 = 0x06;
pub const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Parsed SOCKS5 request.
#[derive(Debug)]
pub struct Socks5Request {
    pub command: u8,
    pub address: Address,
}

/// Perform SOCKS5 method negotiation (server side).
///
/// Reads the client's greeting and responds with NO AUTH (0x00).
pub async fn negotiate_method<S>(stream: &mut S) -> Result<(), Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 2];
    stream
        .read_exact(&mut header)
        .await
        .map_err(|_| Socks5Error::InvalidVersion(0))?;

    if header[0] != SOCKS5_VERSION {
        return Err(Socks5Error::InvalidVersion(header[0]));
    }

    let nmethods = header[1] as usize;
    let mut methods = vec![0u8; nmethods];
    stream
        .read_exact(&mut methods)
        .await
        .map_err(|_| Socks5Error::NoAcceptableMethods)?;

    if methods.contains(&METHOD_NO_AUTH) {
        stream
            .write_all(&[SOCKS5_VERSION, METHOD_NO_AUTH])
            .await
            .map_err(|_| Socks5Error::NoAcceptableMethods)?;
        Ok(())
    } else {
        let _ = stream
            .write_all(&[SOCKS5_VERSION, METHOD_NO_ACCEPTABLE])
            .await;
        Err(Socks5Error::NoAcceptableMethods)
    }
}

/// Read the SOCKS5 request after method negotiation.
pub async fn read_request<S>(stream: &mut S) -> Result<Socks5Request, Socks5Error>
where
    S: AsyncRead + Unpin,
{
    // VER CMD RSV ATYP
    let mut header = [0u8; 4];
    stream
        .read_exact(&mut header)
        .await
        .map_err(|_| Socks5Error::InvalidVersion(0))?;

    if header[0] != SOCKS5_VERSION {
        return Err(Socks5Error::InvalidVersion(header[0]));
    }

    let command = header[1];
    // header[2] is RSV (reserved)
    let atyp = header[3];
    let address = read_address(stream, atyp).await?;

    Ok(Socks5Request { command, address })
}

/// Read the target address based on address type.
async fn read_address<S>(stream: &mut S, atyp: u8) -> Result<Address, Socks5Error>
where
    S: AsyncRead + Unpin,
{
    match atyp {
        ATYP_IPV4 => {
            let mut buf = [0u8; 6]; // 4 addr + 2 port
            stream
                .read_exact(&mut buf)
                .await
                .map_err(|_| Socks5Error::UnsupportedAddressType(atyp))?;
            let ip = std::net::Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
            let port = u16::from_be_bytes([buf[4], buf[5]]);
            Ok(Address::Ip((ip, port).into()))
        }
        ATYP_DOMAIN => {
            let mut len_buf = [0u8; 1];
            stream
                .read_exact(&mut len_buf)
                .await
                .map_err(|_| Socks5Error::UnsupportedAddressType(atyp))?;
            let domain_len = len_buf[0] as usize;
            let mut buf = vec![0u8; domain_len + 2]; // domain + port
            stream
                .read_exact(&mut buf)
                .await
                .map_err(|_| Socks5Error::UnsupportedAddressType(atyp))?;
            let port = u16::from_be_bytes([buf[domain_len], buf[domain_len + 1]]);
            let domain = std::str::from_utf8(&buf[..domain_len])
                .map_err(|_| Socks5Error::InvalidDomain)?
                .to_string();
            Ok(Address::Domain(domain, port))
        }
        ATYP_IPV6 => {
            let mut buf = [0u8; 18]; // 16 addr + 2 port
            stream
                .read_exact(&mut buf)
                .await
                .map_err(|_| Socks5Error::UnsupportedAddressType(atyp))?;
            let ip: [u8; 16] = buf[..16]
                .try_into()
                .map_err(|_| Socks5Error::UnsupportedAddressType(atyp))?;
            let port = u16::from_be_bytes([buf[16], buf[17]]);
            Ok(Address::Ip((std::net::Ipv6Addr::from(ip), port).into()))
        }
        _ => Err(Socks5Error::UnsupportedAddressType(atyp)),
    }
}

/// Send a SOCKS5 reply with a zeroed bind address (0.0.0.0:0).
pub async fn send_reply_unspecified<S>(stream: &mut S, reply: u8) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(10);
    buf.push(SOCKS5_VERSION);
    buf.push(reply);
    buf.push(0x00); // RSV
    buf.push(ATYP_IPV4);
    buf.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
    stream.write_all(&buf).await
}
