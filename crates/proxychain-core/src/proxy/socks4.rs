/// SOCKS4 / SOCKS4a client.
///
/// Dotted-quad targets use plain SOCKS4; hostnames use SOCKS4a (DSTIP set to
/// 0.0.0.1, hostname appended after the user-ID NUL). The protocol has no
/// notion of IPv6.

use crate::addr::{self, HostKind};
use crate::error::Error;
use crate::transport::Transport;
use tokio::io::{AsyncRead, AsyncWrite};

pub const VERSION: u8 = 0x04;
pub const CMD_CONNECT: u8 = 0x01;

// The reply carries version 0, not 4.
pub const REPLY_VERSION: u8 = 0x00;

// Reply codes
pub const REPLY_GRANTED: u8 = 0x5A;
pub const REPLY_REJECTED: u8 = 0x5B;
pub const REPLY_NO_IDENTD: u8 = 0x5C;
pub const REPLY_IDENTD_MISMATCH: u8 = 0x5D;

/// Establish a SOCKS4/SOCKS4a CONNECT to `host:port` over `transport`.
///
/// `user` is the SOCKS4 user-ID, sent zero-length when absent. Returns the
/// bound IPv4/port from the 8-byte reply.
pub async fn negotiate<S>(
    transport: &mut Transport<S>,
    host: &str,
    port: u16,
    user: Option<&str>,
) -> Result<(String, u16), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let user_bytes = user.unwrap_or("").as_bytes();

    let mut request: Vec<u8> = vec![VERSION, CMD_CONNECT];
    request.extend_from_slice(&port.to_be_bytes());
    match addr::classify(host) {
        HostKind::Ipv6 => {
            return Err(Error::AddressTypeUnsupported(format!(
                "SOCKS4 cannot reach IPv6 target {host}"
            )))
        }
        HostKind::Ipv4(octets) => {
            request.extend_from_slice(&octets);
            request.extend_from_slice(user_bytes);
            request.push(0x00);
        }
        HostKind::Domain => {
            request.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
            request.extend_from_slice(user_bytes);
            request.push(0x00);
            request.extend_from_slice(host.as_bytes());
            request.push(0x00);
        }
    }
    transport.write_all(&request).await?;

    // Reply: [VN, CD, DSTPORT(2), DSTIP(4)]
    let mut response = [0u8; 8];
    transport.read_exact(&mut response).await?;

    if response[0] != REPLY_VERSION {
        return Err(Error::Protocol(format!(
            "SOCKS4: unexpected reply version byte 0x{:02X}",
            response[0]
        )));
    }
    match response[1] {
        REPLY_GRANTED => {}
        code => {
            return Err(Error::NegotiationRejected {
                code: code as u16,
                reason: reply_description(code).to_string(),
            })
        }
    }

    let bound_port = u16::from_be_bytes([response[2], response[3]]);
    let bound_ip =
        std::net::Ipv4Addr::new(response[4], response[5], response[6], response[7]).to_string();
    Ok((bound_ip, bound_port))
}

fn reply_description(code: u8) -> &'static str {
    match code {
        REPLY_REJECTED => "request rejected or failed",
        REPLY_NO_IDENTD => "identd unreachable",
        REPLY_IDENTD_MISMATCH => "identd rejected the user-ID",
        _ => "unknown reply code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn socks4a_hostname_target() {
        let (client, mut server) = tokio::io::duplex(256);
        let mut t = Transport::new(client);

        let peer = tokio::spawn(async move {
            // [VN, CD, port, 0.0.0.1] + userid NUL + "example.com" NUL
            let mut request = [0u8; 9 + 12];
            server.read_exact(&mut request).await.unwrap();
            assert_eq!(&request[..8], &[0x04, 0x01, 0x00, 0x50, 0, 0, 0, 1]);
            assert_eq!(request[8], 0x00); // empty user-id
            assert_eq!(&request[9..20], b"example.com");
            assert_eq!(request[20], 0x00);
            server
                .write_all(&[0x00, 0x5A, 0x1F, 0x90, 10, 0, 0, 7])
                .await
                .unwrap();
        });

        let bound = negotiate(&mut t, "example.com", 80, None).await.unwrap();
        assert_eq!(bound, ("10.0.0.7".to_string(), 8080));
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn socks4_ipv4_target_with_user() {
        let (client, mut server) = tokio::io::duplex(256);
        let mut t = Transport::new(client);

        let peer = tokio::spawn(async move {
            let mut request = [0u8; 8 + 3 + 1];
            server.read_exact(&mut request).await.unwrap();
            assert_eq!(&request[..8], &[0x04, 0x01, 0x01, 0xBB, 192, 0, 2, 1]);
            assert_eq!(&request[8..11], b"bob");
            assert_eq!(request[11], 0x00);
            server
                .write_all(&[0x00, 0x5A, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        negotiate(&mut t, "192.0.2.1", 443, Some("bob")).await.unwrap();
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn ipv6_target_unsupported() {
        let (client, _server) = tokio::io::duplex(256);
        let mut t = Transport::new(client);

        let err = negotiate(&mut t, "2001:db8::1", 443, None).await.unwrap_err();
        assert!(matches!(err, Error::AddressTypeUnsupported(_)));
    }

    #[tokio::test]
    async fn rejection_maps_reply_code() {
        let (client, mut server) = tokio::io::duplex(256);
        let mut t = Transport::new(client);

        tokio::spawn(async move {
            let mut request = [0u8; 9];
            server.read_exact(&mut request).await.unwrap();
            server
                .write_all(&[0x00, 0x5B, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        let err = negotiate(&mut t, "1.2.3.4", 80, None).await.unwrap_err();
        match err {
            Error::NegotiationRejected { code, reason } => {
                assert_eq!(code, 0x5B);
                assert_eq!(reason, "request rejected or failed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn reply_version_must_be_zero() {
        let (client, mut server) = tokio::io::duplex(256);
        let mut t = Transport::new(client);

        tokio::spawn(async move {
            let mut request = [0u8; 9];
            server.read_exact(&mut request).await.unwrap();
            server
                .write_all(&[0x04, 0x5A, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        let err = negotiate(&mut t, "1.2.3.4", 80, None).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
