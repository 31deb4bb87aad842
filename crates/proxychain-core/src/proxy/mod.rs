pub mod http;
pub mod socks4;
pub mod socks5;

use crate::config::{ProxyDescriptor, ProxyKind};
use crate::error::Error;
use crate::transport::Transport;
use tokio::io::{AsyncRead, AsyncWrite};

/// Bound address/port echoed by the hop on success, for the protocols that
/// report one (HTTP CONNECT does not).
pub type BoundEndpoint = Option<(String, u16)>;

/// Run `proxy`'s protocol client over `transport`, converting a stream that
/// currently terminates at the proxy into a stream tunnelled through it to
/// `next_host:next_port`.
pub async fn negotiate<S>(
    transport: &mut Transport<S>,
    proxy: &ProxyDescriptor,
    next_host: &str,
    next_port: u16,
) -> Result<BoundEndpoint, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match proxy.kind {
        ProxyKind::Socks5 => socks5::negotiate(transport, next_host, next_port, proxy.credentials())
            .await
            .map(Some),
        ProxyKind::Socks4 => {
            socks4::negotiate(transport, next_host, next_port, proxy.username.as_deref())
                .await
                .map(Some)
        }
        ProxyKind::Http => http::negotiate(transport, next_host, next_port, proxy.credentials())
            .await
            .map(|_| None),
    }
}
