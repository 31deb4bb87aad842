/// SOCKS5 client (RFC 1928 + RFC 1929).

use crate::addr::{self, HostKind};
use crate::error::Error;
use crate::transport::Transport;
use tokio::io::{AsyncRead, AsyncWrite};

// Version
pub const VERSION: u8 = 0x05;
pub const SUBNEG_VERSION: u8 = 0x01;

// Auth methods
pub const METHOD_NO_AUTH: u8 = 0x00;
pub const METHOD_USER_PASS: u8 = 0x02;
pub const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

// Address types
pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

// Commands
pub const CMD_CONNECT: u8 = 0x01;

// Reply codes
pub const REP_SUCCESS: u8 = 0x00;

/// Establish a SOCKS5 CONNECT to `host:port` over `transport`.
///
/// `auth` is an optional `(username, password)` pair for RFC 1929
/// sub-negotiation; the greeting offers user/pass only when it is present.
/// Returns the bound address/port the server echoed in its reply.
pub async fn negotiate<S>(
    transport: &mut Transport<S>,
    host: &str,
    port: u16,
    auth: Option<(&str, &str)>,
) -> Result<(String, u16), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // ---- Greeting ----
    let mut greeting = vec![VERSION, 0x01, METHOD_NO_AUTH];
    if auth.is_some() {
        greeting[1] = 0x02;
        greeting.push(METHOD_USER_PASS);
    }
    transport.write_all(&greeting).await?;

    let mut choice = [0u8; 2];
    transport.read_exact(&mut choice).await?;
    if choice[0] != VERSION {
        return Err(Error::Protocol(format!(
            "SOCKS5: unexpected version byte 0x{:02X} in method reply",
            choice[0]
        )));
    }
    match choice[1] {
        METHOD_NO_AUTH => {}
        METHOD_USER_PASS => {
            let (username, password) = auth.ok_or(Error::AuthRequiredButNotProvided)?;
            authenticate(transport, username, password).await?;
        }
        METHOD_NO_ACCEPTABLE => return Err(Error::NoAcceptableMethods),
        m => return Err(Error::UnexpectedAuthMethod(m)),
    }

    // ---- CONNECT request ----
    let mut request = vec![VERSION, CMD_CONNECT, 0x00];
    match addr::classify(host) {
        HostKind::Ipv4(octets) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(&octets);
        }
        HostKind::Ipv6 => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(&addr::ipv6_octets(host)?);
        }
        HostKind::Domain => {
            let host_bytes = host.as_bytes();
            if host_bytes.is_empty() || host_bytes.len() > 255 {
                return Err(Error::Protocol(format!(
                    "SOCKS5: domain name length {} outside 1..=255",
                    host_bytes.len()
                )));
            }
            request.push(ATYP_DOMAIN);
            request.push(host_bytes.len() as u8);
            request.extend_from_slice(host_bytes);
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    transport.write_all(&request).await?;

    // ---- Reply: VER REP RSV ATYP, then BND.ADDR + BND.PORT ----
    let mut head = [0u8; 4];
    transport.read_exact(&mut head).await?;
    if head[0] != VERSION {
        return Err(Error::Protocol(format!(
            "SOCKS5: unexpected version byte 0x{:02X} in reply",
            head[0]
        )));
    }
    if head[2] != 0x00 {
        return Err(Error::Protocol(format!(
            "SOCKS5: non-zero reserved byte 0x{:02X} in reply",
            head[2]
        )));
    }
    if head[1] != REP_SUCCESS {
        return Err(Error::NegotiationRejected {
            code: head[1] as u16,
            reason: rep_description(head[1]).to_string(),
        });
    }

    read_bound_endpoint(transport, head[3]).await
}

/// RFC 1929 username/password sub-negotiation.
async fn authenticate<S>(
    transport: &mut Transport<S>,
    username: &str,
    password: &str,
) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if username.is_empty() || password.is_empty() {
        return Err(Error::AuthRequiredButNotProvided);
    }
    if username.len() > 255 || password.len() > 255 {
        return Err(Error::Protocol(
            "SOCKS5: username or password exceeds 255 bytes".into(),
        ));
    }

    let mut request = vec![SUBNEG_VERSION, username.len() as u8];
    request.extend_from_slice(username.as_bytes());
    request.push(password.len() as u8);
    request.extend_from_slice(password.as_bytes());
    transport.write_all(&request).await?;

    let mut response = [0u8; 2];
    transport.read_exact(&mut response).await?;
    if response[0] != SUBNEG_VERSION {
        return Err(Error::Protocol(format!(
            "SOCKS5: unexpected auth version byte 0x{:02X}",
            response[0]
        )));
    }
    if response[1] != 0x00 {
        return Err(Error::AuthFailed);
    }
    Ok(())
}

/// Consume the bound-address block sized by ATYP, plus the 2-byte port.
/// Contents are not validated beyond their length.
async fn read_bound_endpoint<S>(
    transport: &mut Transport<S>,
    atyp: u8,
) -> Result<(String, u16), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let address = match atyp {
        ATYP_IPV4 => {
            let mut ip = [0u8; 4];
            transport.read_exact(&mut ip).await?;
            std::net::Ipv4Addr::from(ip).to_string()
        }
        ATYP_IPV6 => {
            let mut ip = [0u8; 16];
            transport.read_exact(&mut ip).await?;
            std::net::Ipv6Addr::from(ip).to_string()
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            transport.read_exact(&mut len).await?;
            let mut domain = vec![0u8; len[0] as usize];
            transport.read_exact(&mut domain).await?;
            String::from_utf8_lossy(&domain).into_owned()
        }
        t => {
            return Err(Error::Protocol(format!(
                "SOCKS5: unknown address type 0x{t:02X} in reply"
            )))
        }
    };

    let mut port = [0u8; 2];
    transport.read_exact(&mut port).await?;
    Ok((address, u16::from_be_bytes(port)))
}

fn rep_description(code: u8) -> &'static str {
    match code {
        0x01 => "general failure",
        0x02 => "connection not allowed",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown reply code",
    }
}
