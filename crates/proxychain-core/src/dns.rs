/// Remote DNS resolution via a SOCKS5 hop.
///
/// A SOCKS5 server resolves domain-ATYP CONNECT targets itself and echoes
/// the resolved address in BND.ADDR, which makes the reply double as a
/// resolver answer.

use crate::config::{ProxyDescriptor, ProxyKind};
use crate::error::{Error, TimeoutScope};
use crate::proxy::socks5;
use crate::transport::Transport;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::timeout;

const RESOLVE_PORT: u16 = 80;

/// Resolve `hostname` through `proxy`'s built-in resolver.
///
/// Opens a throwaway connection, runs a full CONNECT for `hostname:80`, and
/// parses the bound address out of the reply. The connection is closed
/// before returning; the tunnel is never used.
pub async fn resolve_via_socks5(
    proxy: &ProxyDescriptor,
    hostname: &str,
    op_timeout: Duration,
) -> Result<IpAddr, Error> {
    if proxy.kind != ProxyKind::Socks5 {
        return Err(Error::Config(format!(
            "remote DNS requires a SOCKS5 hop, got {}",
            proxy.kind
        )));
    }

    let mut transport = timeout(op_timeout, Transport::open(&proxy.address, proxy.port))
        .await
        .map_err(|_| Error::Timeout {
            scope: TimeoutScope::Step,
        })??;

    let result = match timeout(
        op_timeout,
        socks5::negotiate(&mut transport, hostname, RESOLVE_PORT, proxy.credentials()),
    )
    .await
    {
        Ok(r) => r,
        Err(_) => Err(Error::Timeout {
            scope: TimeoutScope::Step,
        }),
    };

    transport.close().await;

    let (bound_address, _bound_port) = result?;
    bound_address.parse::<IpAddr>().map_err(|_| {
        Error::Protocol(format!(
            "SOCKS5 resolver returned a non-IP bound address for {hostname}"
        ))
    })
}
