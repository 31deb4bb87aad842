/// Chain orchestration: hop-by-hop negotiation over one re-used transport.

use crate::config::{ChainDescriptor, EngineConfig, ProxyDescriptor};
use crate::error::{ChainError, Error, TimeoutScope};
use crate::logger::ChainLogger;
use crate::proxy::{self, BoundEndpoint};
use crate::report::{ConnectionReport, StepKind};
use crate::transport::{Transport, Tunnel, TunnelRegistry};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineStats {
    pub live_tunnel_count: usize,
    pub config: EngineConfig,
}

pub struct ChainEngine {
    config: EngineConfig,
    live: Arc<TunnelRegistry>,
    next_id: AtomicU64,
    logger: Option<ChainLogger>,
}

impl ChainEngine {
    pub fn new(config: EngineConfig) -> Self {
        ChainEngine {
            config,
            live: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            logger: None,
        }
    }

    /// Attach a file logger for connection reports; emission is still gated
    /// by `config.logging_enabled`.
    pub fn with_logger(mut self, logger: ChainLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Negotiate every hop of `chain` in order and return the end-to-end
    /// tunnel plus a structured report. On any failure the transport is
    /// closed before returning and the error names the failing step.
    pub async fn build_chain(
        &self,
        chain: &ChainDescriptor,
        target_host: &str,
        target_port: u16,
    ) -> Result<(Tunnel, ConnectionReport), ChainError> {
        let start_time = Utc::now();
        let started = Instant::now();
        let total_deadline = started + self.config.total();
        let mut report = ConnectionReport::started(chain, target_host, target_port, start_time);

        match self
            .drive(chain, target_host, target_port, total_deadline, &mut report)
            .await
        {
            Ok((transport, bound)) => {
                report.duration_ms = started.elapsed().as_millis() as u64;
                if let Some((address, port)) = bound {
                    report.bind_address = Some(address);
                    report.bind_port = Some(port);
                }
                let tunnel = self.register(transport.into_inner());
                if self.config.logging_enabled {
                    info!(
                        chain = %chain.id,
                        target = %format!("{target_host}:{target_port}"),
                        hops = chain.proxies.len(),
                        duration_ms = report.duration_ms,
                        "chain established"
                    );
                    if let Some(logger) = &self.logger {
                        logger.log_report(&report);
                    }
                }
                Ok((tunnel, report))
            }
            Err((failed_hop, error)) => {
                report.duration_ms = started.elapsed().as_millis() as u64;
                report.error_message = Some(error.to_string());
                report.failed_step = Some(report.steps.len());
                if self.config.logging_enabled {
                    warn!(
                        chain = %chain.id,
                        target = %format!("{target_host}:{target_port}"),
                        failed_hop,
                        error = %error,
                        "chain build failed"
                    );
                    if let Some(logger) = &self.logger {
                        logger.log_report(&report);
                    }
                }
                Err(ChainError {
                    failed_hop,
                    failed_step: report.steps.len(),
                    error,
                    report,
                })
            }
        }
    }

    /// Close every tunnel still in the live set; returns how many were
    /// revoked. Idempotent.
    pub fn close_all(&self) -> usize {
        let mut count = 0;
        if let Ok(mut map) = self.live.lock() {
            count = map.len();
            for flag in map.values() {
                flag.store(true, Ordering::Relaxed);
            }
            map.clear();
        }
        if count > 0 {
            info!(count, "revoked live tunnels");
        }
        count
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            live_tunnel_count: self.live.lock().map(|m| m.len()).unwrap_or(0),
            config: self.config.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Build internals
    // -----------------------------------------------------------------------

    /// Hop-by-hop negotiation. Errors carry the 1-based failing hop
    /// (0 = descriptor validation, before any I/O).
    async fn drive(
        &self,
        chain: &ChainDescriptor,
        target_host: &str,
        target_port: u16,
        total_deadline: Instant,
        report: &mut ConnectionReport,
    ) -> Result<(Transport<TcpStream>, BoundEndpoint), (usize, Error)> {
        chain.validate().map_err(|e| (0, e))?;
        if target_host.is_empty() {
            return Err((0, Error::Config("target host is empty".into())));
        }
        if target_port == 0 {
            return Err((0, Error::Config("target port is 0".into())));
        }

        let first = &chain.proxies[0];
        let mut transport = match self.open_with_retry(first, total_deadline).await {
            Ok(t) => {
                report.record_step(StepKind::DirectOpen, first, None, "ok".into());
                t
            }
            Err(e) => {
                report.record_step(StepKind::DirectOpen, first, None, format!("error: {e}"));
                return Err((1, e));
            }
        };

        let hop_count = chain.proxies.len();
        let mut bound = None;
        for (i, hop) in chain.proxies.iter().enumerate() {
            let (next_host, next_port, kind) = if i + 1 < hop_count {
                let next = &chain.proxies[i + 1];
                (next.address.as_str(), next.port, StepKind::ProxyToProxy)
            } else {
                (target_host, target_port, StepKind::ProxyToTarget)
            };
            let next_endpoint = format!("{next_host}:{next_port}");

            match self
                .negotiate_with_retry(&mut transport, hop, next_host, next_port, total_deadline)
                .await
            {
                Ok(b) => {
                    bound = b;
                    report.record_step(kind, hop, Some(next_endpoint), "ok".into());
                }
                Err(e) => {
                    report.record_step(kind, hop, Some(next_endpoint), format!("error: {e}"));
                    transport.close().await;
                    return Err((i + 1, e));
                }
            }
        }

        Ok((transport, bound))
    }

    async fn open_with_retry(
        &self,
        hop: &ProxyDescriptor,
        total_deadline: Instant,
    ) -> Result<Transport<TcpStream>, Error> {
        let mut attempt = 0u32;
        loop {
            let (budget, scope) = self.step_budget(total_deadline)?;
            let error = match timeout(budget, Transport::open(&hop.address, hop.port)).await {
                Ok(Ok(transport)) => return Ok(transport),
                Ok(Err(e)) => e,
                Err(_) => Error::Timeout { scope },
            };

            attempt += 1;
            if attempt > self.config.max_retries || !error.is_retryable() {
                return Err(error);
            }
            debug!(attempt, proxy = %hop.endpoint(), error = %error, "retrying transport open");
            self.backoff(attempt, total_deadline).await?;
        }
    }

    async fn negotiate_with_retry(
        &self,
        transport: &mut Transport<TcpStream>,
        hop: &ProxyDescriptor,
        next_host: &str,
        next_port: u16,
        total_deadline: Instant,
    ) -> Result<BoundEndpoint, Error> {
        let mut attempt = 0u32;
        loop {
            let consumed_before = transport.bytes_read();
            let (budget, scope) = self.step_budget(total_deadline)?;
            let error = match timeout(
                budget,
                proxy::negotiate(transport, hop, next_host, next_port),
            )
            .await
            {
                Ok(Ok(bound)) => return Ok(bound),
                Ok(Err(e)) => e,
                Err(_) => Error::Timeout { scope },
            };

            attempt += 1;
            // An attempt that already consumed reply bytes leaves the stream
            // mid-protocol; retrying it would desynchronise the hop.
            if attempt > self.config.max_retries
                || !error.is_retryable()
                || transport.bytes_read() != consumed_before
            {
                return Err(error);
            }
            debug!(attempt, proxy = %hop.endpoint(), error = %error, "retrying hop negotiation");
            self.backoff(attempt, total_deadline).await?;
        }
    }

    fn step_budget(&self, total_deadline: Instant) -> Result<(Duration, TimeoutScope), Error> {
        let remaining = total_deadline
            .checked_duration_since(Instant::now())
            .ok_or(Error::Timeout {
                scope: TimeoutScope::Total,
            })?;
        Ok(effective_budget(self.config.per_step(), remaining))
    }

    async fn backoff(&self, attempt: u32, total_deadline: Instant) -> Result<(), Error> {
        let delay = backoff_delay(attempt);
        if Instant::now() + delay >= total_deadline {
            return Err(Error::Timeout {
                scope: TimeoutScope::Total,
            });
        }
        sleep(delay).await;
        Ok(())
    }

    fn register(&self, stream: TcpStream) -> Tunnel {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let flag = Arc::new(AtomicBool::new(false));
        if let Ok(mut map) = self.live.lock() {
            map.insert(id, Arc::clone(&flag));
        }
        Tunnel::new(stream, flag, Arc::downgrade(&self.live), id)
    }
}

/// One wait is bounded by the lesser of the per-step timeout and the time
/// left until the total deadline; the scope names which bound is in force.
fn effective_budget(per_step: Duration, remaining_total: Duration) -> (Duration, TimeoutScope) {
    if per_step <= remaining_total {
        (per_step, TimeoutScope::Step)
    } else {
        (remaining_total, TimeoutScope::Total)
    }
}

/// Linear backoff: attempt 1 sleeps 1 s, attempt 2 sleeps 2 s, and so on.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(u64::from(attempt))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
