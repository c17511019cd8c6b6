//! TFTP Transfer Sockets
//!
//! Socket plumbing shared by the dispatcher and the sessions: binding the
//! per-transfer socket and sending terminal ERROR packets.

use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

use crate::protocol::{TftpErrorCode, build_error};

/// Create an ephemeral UDP socket appropriate for the client address family
///
/// Each transfer gets its own socket so the client can tell sessions apart by
/// the server's source port (its transfer ID, RFC 1350 §4).
pub async fn create_ephemeral_socket(client: SocketAddr, local_bind: Option<IpAddr>) -> Result<UdpSocket> {
    let bind_addr = match local_bind {
        Some(ip) => SocketAddr::new(ip, 0),
        None => match client {
            SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
            SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
        },
    };

    let sock = UdpSocket::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind transfer socket on {}", bind_addr))?;

    tracing::debug!("Transfer socket for {} bound to {}", client, sock.local_addr()?);
    Ok(sock)
}

/// Send a single ERROR packet to `peer`.
///
/// The packet is never retransmitted and no reply is awaited. A failed send
/// is logged and otherwise ignored since the session ends either way.
pub async fn send_error(socket: &UdpSocket, peer: SocketAddr, code: TftpErrorCode, message: &str) {
    let packet = build_error(code.as_u16(), message);
    match socket.send_to(&packet, peer).await {
        Ok(_) => tracing::debug!("Sent ERROR {} to {}: {}", code.as_u16(), peer, message),
        Err(e) => tracing::warn!("Failed to send ERROR {} to {}: {}", code.as_u16(), peer, e),
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::protocol::Packet;

    #[tokio::test]
    async fn test_ephemeral_socket_follows_local_bind() {
        let client = SocketAddr::from((Ipv4Addr::LOCALHOST, 40000));
        let sock = create_ephemeral_socket(client, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)))
            .await
            .unwrap();
        let local = sock.local_addr().unwrap();
        assert_eq!(local.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_ne!(local.port(), 0);
    }

    #[tokio::test]
    async fn test_ephemeral_socket_matches_client_family() {
        let client = SocketAddr::from((Ipv4Addr::new(192, 0, 2, 7), 40000));
        let sock = create_ephemeral_socket(client, None).await.unwrap();
        assert!(sock.local_addr().unwrap().is_ipv4());
    }

    #[tokio::test]
    async fn test_send_error_delivers_one_packet() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        send_error(
            &server,
            client.local_addr().unwrap(),
            TftpErrorCode::AccessViolation,
            "Access violation",
        )
        .await;

        let mut buf = [0u8; 64];
        let (n, src) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(src, server.local_addr().unwrap());
        assert_eq!(
            Packet::decode(&buf[..n]).unwrap(),
            Packet::Error {
                code: 2,
                message: "Access violation".into()
            }
        );
    }
}
