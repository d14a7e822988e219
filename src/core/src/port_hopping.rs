use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{info, warn};

use crate::error::ControlError;

/// Dedicated NAT chain holding the redirect rules.
pub const PORT_HOPPING_CHAIN: &str = "HUI_PORT_HOPPING";

fn port_hopping_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d+(?:-\d+)?(?:,\d+(?:-\d+)?)*$").expect("port hopping pattern")
    })
}

/// Inclusive UDP port range redirected to the primary listen port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    fn as_dport(&self) -> String {
        if self.start == self.end {
            self.start.to_string()
        } else {
            format!("{}:{}", self.start, self.end)
        }
    }
}

/// Syntax check only; an empty value disables port hopping.
pub fn validate_port_hopping(value: &str) -> Result<(), ControlError> {
    parse_port_ranges(value).map(|_| ())
}

/// Parse `1000-2000,3000` into ranges.
pub fn parse_port_ranges(value: &str) -> Result<Vec<PortRange>, ControlError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(Vec::new());
    }
    let invalid = || ControlError::InvalidConfig(format!("invalid port hopping value: {value}"));
    if !port_hopping_pattern().is_match(value) {
        return Err(invalid());
    }

    let mut ranges = Vec::new();
    for part in value.split(',') {
        let (start, end) = part.split_once('-').unwrap_or((part, part));
        let start: u16 = start.parse().map_err(|_| invalid())?;
        let end: u16 = end.parse().map_err(|_| invalid())?;
        if start == 0 || start > end {
            return Err(invalid());
        }
        ranges.push(PortRange { start, end });
    }
    Ok(ranges)
}

/// Installs the UDP redirect rules behind port hopping.
///
/// `reset` replaces the whole rule set; after it returns either every rule
/// is in place or none is.
#[async_trait]
pub trait PortForwarder: Send + Sync + 'static {
    async fn reset(&self, ranges: &[PortRange], target_port: u16) -> Result<(), String>;
}

/// Commands that replace the chain's content with redirects for `ranges`.
pub fn plan_rules(chain: &str, ranges: &[PortRange], target_port: u16) -> Vec<Vec<String>> {
    let to = target_port.to_string();
    ranges
        .iter()
        .map(|range| {
            [
                "-t", "nat", "-A", chain, "-p", "udp", "--dport", &range.as_dport(), "-j",
                "REDIRECT", "--to-ports", &to,
            ]
            .iter()
            .map(|s| s.to_string())
            .collect()
        })
        .collect()
}

/// `iptables`-based forwarder.
pub struct IptablesForwarder {
    program: String,
    chain: String,
}

impl Default for IptablesForwarder {
    fn default() -> Self {
        Self {
            program: "iptables".to_string(),
            chain: PORT_HOPPING_CHAIN.to_string(),
        }
    }
}

impl IptablesForwarder {
    async fn run(&self, args: &[&str]) -> Result<(), String> {
        let output = tokio::process::Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| format!("{} {}: {e}", self.program, args.join(" ")))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!(
            "{} {}: {}",
            self.program,
            args.join(" "),
            stderr.trim()
        ))
    }

    async fn flush(&self) -> Result<(), String> {
        self.run(&["-t", "nat", "-F", &self.chain]).await
    }

    async fn ensure_chain(&self) -> Result<(), String> {
        // Fails when the chain already exists; the flush below is the real check.
        let _ = self.run(&["-t", "nat", "-N", &self.chain]).await;
        self.flush().await?;
        let jump = ["-t", "nat", "-C", "PREROUTING", "-p", "udp", "-j", &self.chain];
        if self.run(&jump).await.is_err() {
            self.run(&["-t", "nat", "-A", "PREROUTING", "-p", "udp", "-j", &self.chain])
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PortForwarder for IptablesForwarder {
    async fn reset(&self, ranges: &[PortRange], target_port: u16) -> Result<(), String> {
        self.ensure_chain().await?;
        for rule in plan_rules(&self.chain, ranges, target_port) {
            let args: Vec<&str> = rule.iter().map(String::as_str).collect();
            if let Err(err) = self.run(&args).await {
                if let Err(flush_err) = self.flush().await {
                    warn!(error = %flush_err, "port hopping rollback failed");
                }
                return Err(err);
            }
        }
        info!(rules = ranges.len(), target_port, "port hopping rules installed");
        Ok(())
    }
}
