/// Structured step records and connection reports.

use crate::config::{ChainDescriptor, ProxyDescriptor, ProxyKind};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    DirectOpen,
    ProxyToProxy,
    ProxyToTarget,
}

/// Redacted view of the hop that acted in a step. Credentials never enter
/// reports or logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepProxy {
    pub address: String,
    pub port: u16,
    pub kind: ProxyKind,
}

impl From<&ProxyDescriptor> for StepProxy {
    fn from(p: &ProxyDescriptor) -> Self {
        StepProxy {
            address: p.address.clone(),
            port: p.port,
            kind: p.kind,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub index: usize,
    pub kind: StepKind,
    pub proxy: StepProxy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_endpoint: Option<String>,
    /// `"ok"` or `"error: <reason>"`.
    pub outcome: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub chain_id: String,
    pub chain_name: String,
    pub target_host: String,
    pub target_port: u16,
    pub steps: Vec<StepRecord>,
    pub start_time: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<usize>,
}

impl ConnectionReport {
    pub(crate) fn started(
        chain: &ChainDescriptor,
        target_host: &str,
        target_port: u16,
        start_time: DateTime<Utc>,
    ) -> Self {
        ConnectionReport {
            chain_id: chain.id.clone(),
            chain_name: chain.name.clone(),
            target_host: target_host.to_string(),
            target_port,
            steps: Vec::new(),
            start_time,
            duration_ms: 0,
            bind_address: None,
            bind_port: None,
            error_message: None,
            failed_step: None,
        }
    }

    pub(crate) fn record_step(
        &mut self,
        kind: StepKind,
        proxy: &ProxyDescriptor,
        next_endpoint: Option<String>,
        outcome: String,
    ) {
        self.steps.push(StepRecord {
            index: self.steps.len() + 1,
            kind,
            proxy: proxy.into(),
            next_endpoint,
            outcome,
            timestamp: Utc::now(),
        });
    }

    pub fn succeeded(&self) -> bool {
        self.error_message.is_none()
    }
}
