//! Per-connection handling: SOCKS5 handshake, session request, relay.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::net::TcpStream;
use tracing::debug;

use skiff_pool::PoolError;

use crate::ClientState;
use crate::error::ClientError;
use crate::proto;
use crate::relay::relay;
use crate::socks5::{
    self, CMD_CONNECT, REPLY_COMMAND_NOT_SUPPORTED, REPLY_CONNECTION_REFUSED,
    REPLY_GENERAL_FAILURE, REPLY_HOST_UNREACHABLE, REPLY_NETWORK_UNREACHABLE, REPLY_SUCCEEDED,
    REPLY_TTL_EXPIRED, send_reply_unspecified,
};

/// Handle a single SOCKS5 client connection.
pub async fn handle_socks5_conn(mut stream: TcpStream, peer: SocketAddr, state: Arc<ClientState>) {
    if let Err(e) = handle_socks5_conn_inner(&mut stream, &state).await {
        debug!(peer = %peer, error = %e, "connection error");
    }
}

async fn handle_socks5_conn_inner(
    stream: &mut TcpStream,
    state: &ClientState,
) -> Result<(), ClientError> {
    socks5::negotiate_method(stream).await?;

    let request = read_connect_request(stream).await?;
    debug!(target = %request.address, "CONNECT");

    // Borrow a cipher connection for the session.
    let mut entry = match state.pool.get().await {
        Ok(entry) => entry,
        Err(e) => {
            let _ = send_reply_unspecified(stream, reply_code_for_pool_error(&e)).await;
            return Err(e.into());
        }
    };

    // The first frame of the session tells the relay server where to
    // connect.
    let mut request_buf = BytesMut::with_capacity(256 + 2);
    proto::write_address(&mut request_buf, &request.address)?;
    if let Err(e) = entry.stream_mut().write(&request_buf).await {
        let _ = send_reply_unspecified(stream, REPLY_GENERAL_FAILURE).await;
        entry.mark_unusable();
        state.pool.put(entry);
        return Err(e.into());
    }

    if let Err(e) = send_reply_unspecified(stream, REPLY_SUCCEEDED).await {
        // The session header is already on the wire; the stream is no
        // longer at a session boundary.
        entry.mark_unusable();
        state.pool.put(entry);
        return Err(e.into());
    }

    let stats = relay(stream, &mut entry, state.timeout).await;
    state.stats.record(stats.up, stats.down);
    state.pool.put(entry);

    Ok(())
}

async fn read_connect_request(
    stream: &mut TcpStream,
) -> Result<socks5::Socks5Request, ClientError> {
    let request = match socks5::read_request(stream).await {
        Ok(req) => req,
        Err(crate::error::Socks5Error::UnsupportedAddressType(atyp)) => {
            let _ = send_reply_unspecified(stream, socks5::REPLY_ADDRESS_TYPE_NOT_SUPPORTED).await;
            return Err(crate::error::Socks5Error::UnsupportedAddressType(atyp).into());
        }
        Err(e) => return Err(e.into()),
    };

    if request.command != CMD_CONNECT {
        let _ = send_reply_unspecified(stream, REPLY_COMMAND_NOT_SUPPORTED).await;
        return Err(crate::error::Socks5Error::UnsupportedCommand(request.command).into());
    }

    Ok(request)
}

fn reply_code_for_pool_error(error: &PoolError) -> u8 {
    match error {
        PoolError::Factory(err) => match err.kind() {
            ErrorKind::ConnectionRefused => REPLY_CONNECTION_REFUSED,
            ErrorKind::NetworkUnreachable => REPLY_NETWORK_UNREACHABLE,
            ErrorKind::HostUnreachable | ErrorKind::NotFound => REPLY_HOST_UNREACHABLE,
            ErrorKind::TimedOut => REPLY_TTL_EXPIRED,
            _ => REPLY_GENERAL_FAILURE,
        },
        PoolError::Closed => REPLY_GENERAL_FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn reply_code_maps_common_errors() {
        let err = PoolError::Factory(io::Error::new(ErrorKind::ConnectionRefused, "refused"));
        assert_eq!(reply_code_for_pool_error(&err), REPLY_CONNECTION_REFUSED);

        let err = PoolError::Factory(io::Error::new(ErrorKind::TimedOut, "timeout"));
        assert_eq!(reply_code_for_pool_error(&err), REPLY_TTL_EXPIRED);

        let err = PoolError::Factory(io::Error::new(ErrorKind::NotFound, "no address"));
        assert_eq!(reply_code_for_pool_error(&err), REPLY_HOST_UNREACHABLE);

        assert_eq!(
            reply_code_for_pool_error(&PoolError::Closed),
            REPLY_GENERAL_FAILURE
        );
    }
}
