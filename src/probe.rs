//! Connectivity and capability probes.
//!
//! A probe never fails with an error: every outcome, including an unreachable
//! host, is folded into a [`ProbeReport`] whose sub-checks say exactly what
//! went wrong.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::stage::{FailureKind, StageKey, StageResult};

/// One named prerequisite checked after the connection succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityCheck {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

impl CapabilityCheck {
    pub fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: true,
            detail: detail.into(),
        }
    }

    pub fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    target: String,
    connect_error: Option<String>,
    version: Option<String>,
    checks: Vec<CapabilityCheck>,
}

impl ProbeReport {
    pub fn unreachable(target: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            connect_error: Some(error.into()),
            version: None,
            checks: Vec::new(),
        }
    }

    pub fn connected(target: impl Into<String>, version: Option<String>) -> Self {
        Self {
            target: target.into(),
            connect_error: None,
            version,
            checks: Vec::new(),
        }
    }

    pub fn with_check(mut self, check: CapabilityCheck) -> Self {
        self.checks.push(check);
        self
    }

    pub fn push_check(&mut self, check: CapabilityCheck) {
        self.checks.push(check);
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn checks(&self) -> &[CapabilityCheck] {
        &self.checks
    }

    pub fn reachable(&self) -> bool {
        self.connect_error.is_none()
    }

    /// Every capability check passed. False when the target was unreachable.
    pub fn capable(&self) -> bool {
        self.reachable() && self.checks.iter().all(|check| check.passed)
    }

    pub fn ok(&self) -> bool {
        self.capable()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        if !self.reachable() {
            Some(FailureKind::Connectivity)
        } else if !self.capable() {
            Some(FailureKind::CapabilityMissing)
        } else {
            None
        }
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &CapabilityCheck> {
        self.checks.iter().filter(|check| !check.passed)
    }

    /// Diagnostic text: the connection error, the failed sub-checks, or the
    /// server version on success.
    pub fn detail(&self) -> String {
        if let Some(error) = &self.connect_error {
            return format!("{}: {error}", self.target);
        }
        let failed: Vec<String> = self
            .failed_checks()
            .map(|check| format!("{}: {}", check.name, check.detail))
            .collect();
        if !failed.is_empty() {
            return failed.join("; ");
        }
        match &self.version {
            Some(version) => format!("version {version}"),
            None => self.target.clone(),
        }
    }

    /// Single result requiring connectivity and every capability check.
    pub fn to_stage_result(&self, key: StageKey) -> StageResult {
        match self.failure_kind() {
            None => StageResult::passed(key, self.detail()),
            Some(kind) => StageResult::failed(key, kind, self.detail()),
        }
    }

    /// Result covering connectivity only.
    pub fn connection_result(&self, key: StageKey) -> StageResult {
        match &self.connect_error {
            None => StageResult::passed(
                key,
                self.version
                    .as_deref()
                    .map(|version| format!("version {version}"))
                    .unwrap_or_default(),
            ),
            Some(_) => StageResult::failed(key, FailureKind::Connectivity, self.detail()),
        }
    }

    /// Result covering the capability checks only; skipped when unreachable.
    pub fn capability_result(&self, key: StageKey, connection_key: StageKey) -> StageResult {
        if !self.reachable() {
            return StageResult::skipped(key, connection_key);
        }
        if self.capable() {
            let names: Vec<&str> = self.checks.iter().map(|check| check.name).collect();
            StageResult::passed(key, names.join(", "))
        } else {
            StageResult::failed(key, FailureKind::CapabilityMissing, self.detail())
        }
    }
}

/// Liveness probe against an HTTP service.
#[async_trait]
pub trait ServiceProbe: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeReport;
}

/// Issues a bounded-timeout GET; success is any 2xx status.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn with_timeouts(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self::new(crate::analytics::build_http_client(
            connect_timeout,
            request_timeout,
        ))
    }
}

#[async_trait]
impl ServiceProbe for HttpProbe {
    async fn probe(&self, url: &str) -> ProbeReport {
        match self.client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                let report = ProbeReport::connected(url, None);
                if status.is_success() {
                    report.with_check(CapabilityCheck::pass("http_status", status.to_string()))
                } else {
                    report.with_check(CapabilityCheck::fail(
                        "http_status",
                        format!("returned status code {}", status.as_u16()),
                    ))
                }
            }
            Err(err) if err.is_timeout() => ProbeReport::unreachable(url, "request timed out"),
            Err(err) => ProbeReport::unreachable(url, err.to_string()),
        }
    }
}
