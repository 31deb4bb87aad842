/// HTTP/1.1 CONNECT client with optional Basic proxy auth.
///
/// The response is parsed as CRLF-delimited lines: a strict status line, then
/// headers until the blank line. Nothing past the header terminator is
/// consumed; the first bytes of whatever the caller speaks next (e.g. a TLS
/// ClientHello) belong to the caller.

use crate::error::Error;
use crate::transport::Transport;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::io::{AsyncRead, AsyncWrite};

const USER_AGENT: &str = "proxychain/0.3";

// Cap on a single response line; headers in the wild stay far below this.
const MAX_LINE_BYTES: usize = 8 * 1024;

/// Encode credentials as an HTTP Basic auth header value:
/// `"Basic <base64(username:password)>"`.
pub fn basic_auth_value(username: &str, password: &str) -> String {
    let credentials = format!("{username}:{password}");
    format!("Basic {}", STANDARD.encode(credentials.as_bytes()))
}

/// Establish an HTTP CONNECT tunnel to `host:port` over `transport`.
///
/// `auth` carries Basic credentials when present; a missing password is sent
/// as the empty string.
pub async fn negotiate<S>(
    transport: &mut Transport<S>,
    host: &str,
    port: u16,
    auth: Option<(&str, &str)>,
) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let target = format!("{host}:{port}");

    let mut request = format!(
        "CONNECT {target} HTTP/1.1\r\nHost: {target}\r\nUser-Agent: {USER_AGENT}\r\n"
    );
    if let Some((username, password)) = auth {
        request.push_str(&format!(
            "Proxy-Authorization: {}\r\n",
            basic_auth_value(username, password)
        ));
    }
    request.push_str("Proxy-Connection: Keep-Alive\r\nConnection: Keep-Alive\r\n\r\n");
    transport.write_all(request.as_bytes()).await?;

    let status_line = read_line(transport).await?;
    let status = parse_status_line(&status_line)?;

    // Headers until the blank line, case-normalized. Kept for diagnostics
    // only; CONNECT responses carry nothing the tunnel needs.
    let mut headers: Vec<(String, String)> = Vec::new();
    loop {
        let line = read_line(transport).await?;
        if line.is_empty() {
            break;
        }
        match line.split_once(':') {
            Some((name, value)) => {
                headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()))
            }
            None => {
                return Err(Error::Protocol(format!(
                    "HTTP: header line without a colon: {line:?}"
                )))
            }
        }
    }
    tracing::trace!(status, header_count = headers.len(), "CONNECT response");

    match status {
        200 => Ok(()),
        401 | 407 => {
            if auth.is_some() {
                Err(Error::AuthFailed)
            } else {
                Err(Error::AuthRequiredButNotProvided)
            }
        }
        code => Err(Error::NegotiationRejected {
            code,
            reason: status_description(code).to_string(),
        }),
    }
}

/// Read one CRLF-terminated line, stripped of the delimiter.
async fn read_line<S>(transport: &mut Transport<S>) -> Result<String, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let raw = transport.read_until_crlf(MAX_LINE_BYTES).await?;
    let body = &raw[..raw.len() - 2];
    String::from_utf8(body.to_vec())
        .map_err(|_| Error::Protocol("HTTP: non-UTF-8 bytes in response header".into()))
}

/// Accepts exactly `HTTP/1.<0|1> <3-digit>[ <reason>]`.
fn parse_status_line(line: &str) -> Result<u16, Error> {
    let malformed = || Error::Protocol(format!("HTTP: malformed status line: {line:?}"));

    if !(line.starts_with("HTTP/1.0 ") || line.starts_with("HTTP/1.1 ")) {
        return Err(malformed());
    }
    let rest = &line[9..];
    let code_bytes = rest.as_bytes();
    if code_bytes.len() < 3 || !code_bytes[..3].iter().all(u8::is_ascii_digit) {
        return Err(malformed());
    }
    if code_bytes.len() > 3 && code_bytes[3] != b' ' {
        return Err(malformed());
    }
    rest[..3].parse().map_err(|_| malformed())
}

fn status_description(code: u16) -> &'static str {
    match code {
        403 => "forbidden",
        404 => "host not found",
        405 => "method not allowed",
        408 | 504 => "timed out at the proxy",
        500 => "proxy internal error",
        502 => "bad gateway",
        503 => "service unavailable",
        _ => "HTTP error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn read_request(server: &mut tokio::io::DuplexStream) -> String {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            server.read_exact(&mut byte).await.unwrap();
            buf.push(byte[0]);
            if buf.ends_with(b"\r\n\r\n") {
                break;
            }
        }
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn basic_auth_rfc7617_example() {
        // Aladdin:open sesame -> QWxhZGRpbjpvcGVuIHNlc2FtZQ==
        assert_eq!(
            basic_auth_value("Aladdin", "open sesame"),
            "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="
        );
    }

    #[test]
    fn status_line_shapes() {
        assert_eq!(parse_status_line("HTTP/1.1 200 OK").unwrap(), 200);
        assert_eq!(parse_status_line("HTTP/1.0 407 Auth Required").unwrap(), 407);
        assert_eq!(parse_status_line("HTTP/1.1 502").unwrap(), 502);
        assert!(parse_status_line("HTTP/2 200 OK").is_err());
        assert!(parse_status_line("HTTP/1.1 20 OK").is_err());
        assert!(parse_status_line("HTTP/1.1 20x OK").is_err());
        assert!(parse_status_line("ICY 200 OK").is_err());
        assert!(parse_status_line("").is_err());
    }

    #[tokio::test]
    async fn connect_with_basic_auth() {
        let (client, mut server) = tokio::io::duplex(2048);
        let mut t = Transport::new(client);

        let peer = tokio::spawn(async move {
            let request = read_request(&mut server).await;
            assert!(request.starts_with("CONNECT t:443 HTTP/1.1\r\n"));
            assert!(request.contains("\r\nHost: t:443\r\n"));
            assert!(request.contains("\r\nProxy-Authorization: Basic dXA6cA==\r\n"));
            assert!(request.contains("\r\nUser-Agent: "));
            assert!(request.contains("\r\nProxy-Connection: Keep-Alive\r\n"));
            assert!(request.contains("\r\nConnection: Keep-Alive\r\n"));
            server
                .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                .await
                .unwrap();
        });

        negotiate(&mut t, "t", 443, Some(("u", "p"))).await.unwrap();
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn no_bytes_consumed_past_header_terminator() {
        let (client, mut server) = tokio::io::duplex(2048);
        let mut t = Transport::new(client);

        let peer = tokio::spawn(async move {
            let _ = read_request(&mut server).await;
            // Payload bytes arrive in the same flush as the response.
            server
                .write_all(b"HTTP/1.1 200 OK\r\nServer: test\r\n\r\nhello")
                .await
                .unwrap();
        });

        negotiate(&mut t, "t", 443, None).await.unwrap();

        let mut payload = [0u8; 5];
        t.read_exact(&mut payload).await.unwrap();
        assert_eq!(&payload, b"hello");
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn auth_required_without_credentials() {
        let (client, mut server) = tokio::io::duplex(2048);
        let mut t = Transport::new(client);

        tokio::spawn(async move {
            let _ = read_request(&mut server).await;
            server
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await
                .unwrap();
        });

        let err = negotiate(&mut t, "t", 443, None).await.unwrap_err();
        assert!(matches!(err, Error::AuthRequiredButNotProvided));
    }

    #[tokio::test]
    async fn auth_rejected_with_credentials() {
        let (client, mut server) = tokio::io::duplex(2048);
        let mut t = Transport::new(client);

        tokio::spawn(async move {
            let _ = read_request(&mut server).await;
            server
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await
                .unwrap();
        });

        let err = negotiate(&mut t, "t", 443, Some(("u", "bad"))).await.unwrap_err();
        assert!(matches!(err, Error::AuthFailed));
    }

    #[tokio::test]
    async fn forbidden_maps_to_rejection() {
        let (client, mut server) = tokio::io::duplex(2048);
        let mut t = Transport::new(client);

        tokio::spawn(async move {
            let _ = read_request(&mut server).await;
            server
                .write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
        });

        let err = negotiate(&mut t, "t", 443, None).await.unwrap_err();
        match err {
            Error::NegotiationRejected { code, reason } => {
                assert_eq!(code, 403);
                assert_eq!(reason, "forbidden");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_status_line_is_protocol_error() {
        let (client, mut server) = tokio::io::duplex(2048);
        let mut t = Transport::new(client);

        tokio::spawn(async move {
            let _ = read_request(&mut server).await;
            server.write_all(b"SOCKS nonsense\r\n\r\n").await.unwrap();
        });

        let err = negotiate(&mut t, "t", 443, None).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
