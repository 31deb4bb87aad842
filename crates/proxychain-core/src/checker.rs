/// Hop reachability checker.

use crate::config::{ChainDescriptor, ProxyDescriptor, ProxyKind};
use crate::transport::Transport;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Debug, Clone)]
pub struct ProxyCheckResult {
    pub endpoint: String,
    pub kind: ProxyKind,
    pub reachable: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

/// Check a single hop and measure latency.
///
/// SOCKS5 and HTTP hops get a protocol-level probe on top of the TCP
/// connect; for SOCKS4 a completed connect is the best cheap signal, since
/// the protocol has no probe that does not commit to a CONNECT.
pub async fn check_proxy(proxy: ProxyDescriptor, probe_timeout: Duration) -> ProxyCheckResult {
    let endpoint = proxy.endpoint();
    let start = Instant::now();

    let connected = timeout(
        probe_timeout,
        TcpStream::connect((proxy.address.as_str(), proxy.port)),
    )
    .await;

    let stream = match connected {
        Err(_) => {
            return ProxyCheckResult {
                endpoint,
                kind: proxy.kind,
                reachable: false,
                latency_ms: None,
                error: Some("connection timed out".into()),
            }
        }
        Ok(Err(e)) => {
            return ProxyCheckResult {
                endpoint,
                kind: proxy.kind,
                reachable: false,
                latency_ms: None,
                error: Some(e.to_string()),
            }
        }
        Ok(Ok(stream)) => stream,
    };

    let mut transport = Transport::new(stream);
    let probe = match proxy.kind {
        ProxyKind::Socks5 => probe_socks5(&mut transport, probe_timeout).await,
        ProxyKind::Socks4 => Ok(()),
        ProxyKind::Http => {
            probe_http(&mut transport, &proxy.address, proxy.port, probe_timeout).await
        }
    };
    transport.close().await;

    let latency_ms = start.elapsed().as_millis() as u64;
    match probe {
        Ok(()) => ProxyCheckResult {
            endpoint,
            kind: proxy.kind,
            reachable: true,
            latency_ms: Some(latency_ms),
            error: None,
        },
        Err(e) => ProxyCheckResult {
            endpoint,
            kind: proxy.kind,
            reachable: false,
            latency_ms: Some(latency_ms),
            error: Some(e),
        },
    }
}

/// Send a SOCKS5 no-auth greeting and verify the reply shape.
async fn probe_socks5<S>(transport: &mut Transport<S>, budget: Duration) -> Result<(), String>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let run = async {
        transport.write_all(&[0x05, 0x01, 0x00]).await?;
        let mut reply = [0u8; 2];
        transport.read_exact(&mut reply).await?;
        if reply[0] != 0x05 {
            return Err(crate::error::Error::Protocol(format!(
                "SOCKS5 probe: unexpected version {}",
                reply[0]
            )));
        }
        Ok(())
    };
    match timeout(budget, run).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("probe timed out".into()),
    }
}

/// Send a minimal HTTP OPTIONS request and verify an HTTP response starts.
async fn probe_http<S>(
    transport: &mut Transport<S>,
    host: &str,
    port: u16,
    budget: Duration,
) -> Result<(), String>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let run = async {
        let request = format!("OPTIONS / HTTP/1.0\r\nHost: {host}:{port}\r\n\r\n");
        transport.write_all(request.as_bytes()).await?;
        let mut head = [0u8; 8];
        transport.read_exact(&mut head).await?;
        if &head[..5] != b"HTTP/" {
            return Err(crate::error::Error::Protocol(format!(
                "HTTP probe: unexpected response {:?}",
                &head[..]
            )));
        }
        Ok(())
    };
    match timeout(budget, run).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("probe timed out".into()),
    }
}

/// Check every hop of a chain concurrently, in chain order.
pub async fn check_chain(
    chain: &ChainDescriptor,
    probe_timeout: Duration,
) -> Vec<ProxyCheckResult> {
    check_all(&chain.proxies, probe_timeout).await
}

/// Check a list of hops concurrently.
pub async fn check_all(
    proxies: &[ProxyDescriptor],
    probe_timeout: Duration,
) -> Vec<ProxyCheckResult> {
    let handles: Vec<_> = proxies
        .iter()
        .map(|p| tokio::spawn(check_proxy(p.clone(), probe_timeout)))
        .collect();
    let mut results = Vec::with_capacity(handles.len());
    for (handle, proxy) in handles.into_iter().zip(proxies) {
        results.push(handle.await.unwrap_or_else(|e| ProxyCheckResult {
            endpoint: proxy.endpoint(),
            kind: proxy.kind,
            reachable: false,
            latency_ms: None,
            error: Some(e.to_string()),
        }));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn unreachable_proxy_is_reported() {
        let proxy = ProxyDescriptor::new(ProxyKind::Socks5, "127.0.0.1", 1);
        let result = check_proxy(proxy, Duration::from_millis(500)).await;
        assert!(!result.reachable);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn socks5_probe_succeeds_against_scripted_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut greeting = [0u8; 3];
            stream.read_exact(&mut greeting).await.unwrap();
            stream.write_all(&[0x05, 0x00]).await.unwrap();
        });

        let proxy = ProxyDescriptor::new(ProxyKind::Socks5, "127.0.0.1", addr.port());
        let result = check_proxy(proxy, Duration::from_secs(2)).await;
        assert!(result.reachable, "error: {:?}", result.error);
        assert!(result.latency_ms.is_some());
    }

    #[tokio::test]
    async fn check_chain_covers_every_hop() {
        let chain = ChainDescriptor::new("c", "Chain")
            .push(ProxyDescriptor::new(ProxyKind::Socks4, "127.0.0.1", 1))
            .push(ProxyDescriptor::new(ProxyKind::Http, "127.0.0.1", 2));
        let results = check_chain(&chain, Duration::from_millis(300)).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].kind, ProxyKind::Socks4);
        assert_eq!(results[1].kind, ProxyKind::Http);
    }

    #[tokio::test]
    async fn check_all_preserves_order() {
        let proxies = vec![
            ProxyDescriptor::new(ProxyKind::Socks4, "127.0.0.1", 1),
            ProxyDescriptor::new(ProxyKind::Socks4, "127.0.0.1", 2),
        ];
        let results = check_all(&proxies, Duration::from_millis(300)).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].endpoint, "127.0.0.1:1");
        assert_eq!(results[1].endpoint, "127.0.0.1:2");
    }
}
