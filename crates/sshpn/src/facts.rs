//! Fact providers
//!
//! Orchestrators never discover network facts themselves. They ask a
//! [`FactProvider`]: [`ShellFactProvider`] queries the hosts over the ssh
//! session, [`StaticFacts`] returns fixed values (tests, dry runs).

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sshpn_common::{shell, TunnelError, TunnelResult};
use tracing::debug;

use crate::commands;
use crate::types::SessionTarget;

pub const REMOTE_DEFAULT_DEVICE: &str = "remote default device";
pub const REMOTE_PUBLIC_ADDRESS: &str = "remote public address";
pub const LOCAL_DEFAULT_DEVICE: &str = "local default device";
pub const LOCAL_DEFAULT_GATEWAY: &str = "local default gateway";
pub const REMOTE_NAT_RULES: &str = "remote NAT rule numbers";

/// Source of the external facts a lifecycle phase depends on.
#[async_trait]
pub trait FactProvider: Send + Sync {
    /// Device of the remote host's default route.
    async fn remote_default_device(&self, target: &SessionTarget) -> TunnelResult<String>;

    /// Address the remote host is seen from on the internet.
    async fn remote_public_address(&self, target: &SessionTarget) -> TunnelResult<IpAddr>;

    /// Device of the local default route.
    async fn local_default_device(&self) -> TunnelResult<String>;

    /// Gateway of the local default route.
    async fn local_default_gateway(&self) -> TunnelResult<IpAddr>;

    /// Line numbers of remote POSTROUTING rules mentioning `laddr`, in the
    /// order the firewall lists them. Empty when none match.
    async fn remote_nat_rule_numbers(
        &self,
        target: &SessionTarget,
        laddr: Ipv4Addr,
    ) -> TunnelResult<Vec<u32>>;
}

/// Parses the first non-empty line of `output` as a device name.
fn parse_device(fact: &str, output: &str) -> TunnelResult<String> {
    output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TunnelError::fact_query(fact, "query returned no device"))
}

/// Parses the first line of `output` that is an IP address.
fn parse_address(fact: &str, output: &str) -> TunnelResult<IpAddr> {
    output
        .lines()
        .find_map(|l| l.trim().parse().ok())
        .ok_or_else(|| {
            TunnelError::fact_query(fact, format!("no address in query output '{}'", output))
        })
}

/// Parses whitespace separated rule numbers.
pub fn parse_rule_numbers(output: &str) -> TunnelResult<Vec<u32>> {
    output
        .split_whitespace()
        .map(|tok| {
            tok.parse().map_err(|_| {
                TunnelError::fact_query(REMOTE_NAT_RULES, format!("unexpected token '{}'", tok))
            })
        })
        .collect()
}

/// Queries facts by running shell commands locally and over the session.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellFactProvider;

impl ShellFactProvider {
    pub fn new() -> Self {
        Self
    }

    async fn query(fact: &str, cmd: &str) -> TunnelResult<String> {
        debug!(fact = fact, command = %cmd, "Querying fact");
        shell::exec_or_throw(cmd)
            .await
            .map_err(|e| TunnelError::fact_query(fact, e.to_string()))
    }
}

#[async_trait]
impl FactProvider for ShellFactProvider {
    async fn remote_default_device(&self, target: &SessionTarget) -> TunnelResult<String> {
        let cmd = commands::run_remote(target, commands::DEFAULT_DEVICE_QUERY);
        let out = Self::query(REMOTE_DEFAULT_DEVICE, &cmd).await?;
        parse_device(REMOTE_DEFAULT_DEVICE, &out)
    }

    async fn remote_public_address(&self, target: &SessionTarget) -> TunnelResult<IpAddr> {
        let cmd = commands::run_remote(target, commands::PUBLIC_ADDRESS_QUERY);
        let out = Self::query(REMOTE_PUBLIC_ADDRESS, &cmd).await?;
        parse_address(REMOTE_PUBLIC_ADDRESS, &out)
    }

    async fn local_default_device(&self) -> TunnelResult<String> {
        let out = Self::query(LOCAL_DEFAULT_DEVICE, commands::DEFAULT_DEVICE_QUERY).await?;
        parse_device(LOCAL_DEFAULT_DEVICE, &out)
    }

    async fn local_default_gateway(&self) -> TunnelResult<IpAddr> {
        let out = Self::query(LOCAL_DEFAULT_GATEWAY, commands::DEFAULT_GATEWAY_QUERY).await?;
        parse_address(LOCAL_DEFAULT_GATEWAY, &out)
    }

    async fn remote_nat_rule_numbers(
        &self,
        target: &SessionTarget,
        laddr: Ipv4Addr,
    ) -> TunnelResult<Vec<u32>> {
        let cmd = commands::run_remote(target, &commands::nat_rule_numbers_query(laddr));
        debug!(fact = REMOTE_NAT_RULES, command = %cmd, "Querying fact");

        // grep exits 1 when nothing matches, which just means no rules.
        let result = shell::exec(&cmd).await?;
        match result.exit_code {
            0 => parse_rule_numbers(&result.stdout),
            1 if result.stdout.is_empty() => Ok(Vec::new()),
            _ => Err(TunnelError::fact_query(
                REMOTE_NAT_RULES,
                result.combined_output(),
            )),
        }
    }
}

/// Fixed facts. A fact set to `None` fails its query.
#[derive(Debug, Clone)]
pub struct StaticFacts {
    pub remote_device: Option<String>,
    pub public_address: Option<IpAddr>,
    pub local_device: Option<String>,
    pub local_gateway: Option<IpAddr>,
    pub nat_rules: Option<Vec<u32>>,
    queried: Arc<Mutex<Vec<&'static str>>>,
}

impl StaticFacts {
    pub fn new(
        remote_device: impl Into<String>,
        public_address: IpAddr,
        local_device: impl Into<String>,
        local_gateway: IpAddr,
    ) -> Self {
        Self {
            remote_device: Some(remote_device.into()),
            public_address: Some(public_address),
            local_device: Some(local_device.into()),
            local_gateway: Some(local_gateway),
            nat_rules: Some(Vec::new()),
            queried: Default::default(),
        }
    }

    /// Stand-in values for dry runs. Addresses come from TEST-NET-1.
    pub fn placeholders() -> Self {
        Self::new(
            "REMOTE_DEV",
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
            "LOCAL_DEV",
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, 254)),
        )
    }

    pub fn with_nat_rules(mut self, rules: Vec<u32>) -> Self {
        self.nat_rules = Some(rules);
        self
    }

    /// Makes every query for `fact` fail.
    pub fn without(mut self, fact: &str) -> Self {
        match fact {
            REMOTE_DEFAULT_DEVICE => self.remote_device = None,
            REMOTE_PUBLIC_ADDRESS => self.public_address = None,
            LOCAL_DEFAULT_DEVICE => self.local_device = None,
            LOCAL_DEFAULT_GATEWAY => self.local_gateway = None,
            REMOTE_NAT_RULES => self.nat_rules = None,
            _ => {}
        }
        self
    }

    /// Facts queried so far, in order.
    pub fn queried(&self) -> Vec<&'static str> {
        self.queried.lock().map(|q| q.clone()).unwrap_or_default()
    }

    fn answer<T: Clone>(&self, fact: &'static str, value: &Option<T>) -> TunnelResult<T> {
        if let Ok(mut q) = self.queried.lock() {
            q.push(fact);
        }
        value
            .clone()
            .ok_or_else(|| TunnelError::fact_query(fact, "no fixture value"))
    }
}

#[async_trait]
impl FactProvider for StaticFacts {
    async fn remote_default_device(&self, _target: &SessionTarget) -> TunnelResult<String> {
        self.answer(REMOTE_DEFAULT_DEVICE, &self.remote_device)
    }

    async fn remote_public_address(&self, _target: &SessionTarget) -> TunnelResult<IpAddr> {
        self.answer(REMOTE_PUBLIC_ADDRESS, &self.public_address)
    }

    async fn local_default_device(&self) -> TunnelResult<String> {
        self.answer(LOCAL_DEFAULT_DEVICE, &self.local_device)
    }

    async fn local_default_gateway(&self) -> TunnelResult<IpAddr> {
        self.answer(LOCAL_DEFAULT_GATEWAY, &self.local_gateway)
    }

    async fn remote_nat_rule_numbers(
        &self,
        _target: &SessionTarget,
        _laddr: Ipv4Addr,
    ) -> TunnelResult<Vec<u32>> {
        self.answer(REMOTE_NAT_RULES, &self.nat_rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts() -> StaticFacts {
        StaticFacts::new(
            "eth0",
            "203.0.113.7".parse().unwrap(),
            "wlan0",
            "192.168.1.1".parse().unwrap(),
        )
    }

    #[test]
    fn test_parse_device() {
        assert_eq!(parse_device("x", "\n eth0 \nwlan0").unwrap(), "eth0");
        assert!(matches!(
            parse_device("x", "   "),
            Err(TunnelError::FactQuery { .. })
        ));
    }

    #[test]
    fn test_parse_address() {
        let addr = parse_address("x", ";; connection timed out\n198.51.100.4").unwrap();
        assert_eq!(addr.to_string(), "198.51.100.4");
        assert!(parse_address("x", "Failed").is_err());
    }

    #[test]
    fn test_parse_rule_numbers() {
        assert_eq!(parse_rule_numbers("1\n3\n7").unwrap(), vec![1, 3, 7]);
        assert!(parse_rule_numbers("").unwrap().is_empty());
        assert!(parse_rule_numbers("1\nMASQUERADE").is_err());
    }

    #[tokio::test]
    async fn test_static_facts() {
        let facts = facts().with_nat_rules(vec![2, 5]);
        let target = SessionTarget::new("example.com");

        assert_eq!(facts.remote_default_device(&target).await.unwrap(), "eth0");
        assert_eq!(
            facts.remote_public_address(&target).await.unwrap().to_string(),
            "203.0.113.7"
        );
        assert_eq!(facts.local_default_device().await.unwrap(), "wlan0");
        assert_eq!(
            facts
                .remote_nat_rule_numbers(&target, Ipv4Addr::new(10, 32, 32, 2))
                .await
                .unwrap(),
            vec![2, 5]
        );
        assert_eq!(
            facts.queried(),
            vec![REMOTE_DEFAULT_DEVICE, REMOTE_PUBLIC_ADDRESS, LOCAL_DEFAULT_DEVICE, REMOTE_NAT_RULES]
        );
    }

    #[tokio::test]
    async fn test_static_facts_missing() {
        let facts = facts().without(REMOTE_PUBLIC_ADDRESS);
        let target = SessionTarget::new("example.com");
        let err = facts.remote_public_address(&target).await.unwrap_err();
        assert!(err.to_string().contains(REMOTE_PUBLIC_ADDRESS));
    }
}
