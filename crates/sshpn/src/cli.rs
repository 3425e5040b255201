//! Command line interface
//!
//! Arguments are parsed by clap, then validated into a [`TunnelRequest`].
//! Every value that ends up in a shell command passes through a typed parser
//! first, so nothing unvalidated reaches `/bin/sh`.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use once_cell::sync::Lazy;
use regex::Regex;
use sshpn_common::{TunnelError, TunnelResult};

use crate::types::{
    DeviceKind, DeviceName, IpPrefix, LifecyclePhase, ProxySpec, RoutingPolicy, TapSpec,
    TunSpec, TunnelSpec,
};

/// RFC 1123 host name.
static HOST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(([a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9\-]*[a-zA-Z0-9])\.)*([a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9\-]*[a-zA-Z0-9])$",
    )
    .expect("Invalid regex pattern")
});

/// Create transparent tunnels using ssh
#[derive(Parser, Debug)]
#[command(name = "sshpn")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Minimize command output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Location of the master ssh multiplex socket
    #[arg(short = 'S', long, global = true, value_name = "PATH")]
    pub socket: Option<String>,

    /// Path to the configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the commands instead of running them
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Configure a L3 vpn
    Tun(TunArgs),
    /// Configure a L2 vpn
    Tap(TapArgs),
    /// Create a transparent proxy
    Proxy(ProxyArgs),
}

/// Lifecycle action
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Action {
    Start,
    Stop,
}

impl From<Action> for LifecyclePhase {
    fn from(action: Action) -> Self {
        match action {
            Action::Start => LifecyclePhase::Start,
            Action::Stop => LifecyclePhase::Stop,
        }
    }
}

#[derive(Args, Debug)]
pub struct PhaseArgs {
    /// Start or stop the tunnel
    #[arg(value_enum)]
    pub action: Action,

    /// The host you are connecting to via ssh
    pub host: String,
}

#[derive(Args, Debug)]
pub struct TunArgs {
    /// The name of the tun device on each system
    #[arg(short, long, default_value = "tun0")]
    pub name: String,

    /// The local address used in the tunnel
    #[arg(short, long, default_value = "10.32.32.2")]
    pub laddr: String,

    /// The remote address used in the tunnel
    #[arg(short, long, default_value = "10.32.32.1")]
    pub raddr: String,

    /// Route all traffic through the tunnel
    #[arg(short, long)]
    pub all: bool,

    /// Subnets to keep on the local default device when using --all
    #[arg(short, long, value_delimiter = ',', requires = "all")]
    pub exclude_subnets: Vec<String>,

    /// Subnets to route through the tunnel
    #[arg(short, long, value_delimiter = ',', conflicts_with = "all")]
    pub subnets: Vec<String>,

    #[command(flatten)]
    pub phase: PhaseArgs,
}

#[derive(Args, Debug)]
pub struct TapArgs {
    /// The name of the tap device on each system
    #[arg(short, long, default_value = "tap0")]
    pub name: String,

    /// Route all traffic through the tunnel
    #[arg(short, long)]
    pub all: bool,

    /// Acquire an address over dhcp once the devices are up
    #[arg(short, long)]
    pub dhcp: bool,

    #[command(flatten)]
    pub phase: PhaseArgs,
}

#[derive(Args, Debug)]
pub struct ProxyArgs {
    /// The host the proxy listens on
    #[arg(short = 'H', long, default_value = "localhost")]
    pub proxy_host: String,

    /// The port the proxy listens on
    #[arg(short, long, default_value_t = crate::types::DEFAULT_PROXY_PORT)]
    pub port: u16,

    /// Route all tcp traffic through the proxy
    #[arg(short, long)]
    pub all: bool,

    /// Forward udp as well
    #[arg(short, long)]
    pub udp: bool,

    /// Subnets to keep local when using --all
    #[arg(short, long, value_delimiter = ',', requires = "all")]
    pub exclude_subnets: Vec<String>,

    /// Subnets to route through the proxy
    #[arg(short, long, value_delimiter = ',', conflicts_with_all = ["all", "exclude_subnets"])]
    pub subnets: Vec<String>,

    #[command(flatten)]
    pub phase: PhaseArgs,
}

/// A fully validated invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRequest {
    pub spec: TunnelSpec,
    pub phase: LifecyclePhase,
    pub host: String,
}

impl Cli {
    /// Validates the parsed arguments.
    pub fn request(&self) -> TunnelResult<TunnelRequest> {
        let (spec, phase) = match &self.command {
            Commands::Tun(args) => (TunnelSpec::Tun(args.spec()?), &args.phase),
            Commands::Tap(args) => (TunnelSpec::Tap(args.spec()?), &args.phase),
            Commands::Proxy(args) => (TunnelSpec::Proxy(args.spec()?), &args.phase),
        };

        Ok(TunnelRequest {
            spec,
            phase: phase.action.into(),
            host: validate_host("host", &phase.host)?,
        })
    }
}

impl TunArgs {
    fn spec(&self) -> TunnelResult<TunSpec> {
        let name = parse_device(DeviceKind::Tun, &self.name)?;
        let laddr = parse_ipv4("laddr", &self.laddr)?;
        let raddr = parse_ipv4("raddr", &self.raddr)?;
        if laddr == raddr {
            return Err(TunnelError::invalid_input(
                "raddr",
                "local and remote addresses must differ",
            ));
        }

        let routing = routing_policy(self.all, &self.exclude_subnets, &self.subnets)?;
        Ok(TunSpec::new(name)
            .with_addrs(laddr, raddr)
            .with_routing(routing))
    }
}

impl TapArgs {
    fn spec(&self) -> TunnelResult<TapSpec> {
        let mut spec = TapSpec::new(parse_device(DeviceKind::Tap, &self.name)?);
        spec.all = self.all;
        spec.dhcp = self.dhcp;
        Ok(spec)
    }
}

impl ProxyArgs {
    fn spec(&self) -> TunnelResult<ProxySpec> {
        let mut spec = ProxySpec::new(self.port);
        spec.proxy_host = validate_host("proxy_host", &self.proxy_host)?;
        spec.udp = self.udp;
        spec.routing = routing_policy(self.all, &self.exclude_subnets, &self.subnets)?;
        Ok(spec)
    }
}

/// Accepts an RFC 1123 host name or an IP address.
pub fn validate_host(field: &str, host: &str) -> TunnelResult<String> {
    if HOST_RE.is_match(host) || host.parse::<IpAddr>().is_ok() {
        Ok(host.to_string())
    } else {
        Err(TunnelError::invalid_input(
            field,
            format!("'{}' is not a valid hostname or ip address", host),
        ))
    }
}

fn parse_device(kind: DeviceKind, name: &str) -> TunnelResult<DeviceName> {
    let dev: DeviceName = name.parse()?;
    if dev.kind != kind {
        return Err(TunnelError::invalid_input(
            "name",
            format!("'{}' must be of format {}[0-9]+", name, kind.prefix()),
        ));
    }
    Ok(dev)
}

fn parse_ipv4(field: &str, addr: &str) -> TunnelResult<Ipv4Addr> {
    addr.parse().map_err(|_| {
        TunnelError::invalid_input(field, format!("invalid ipv4 address '{}'", addr))
    })
}

fn parse_subnets(subnets: &[String]) -> TunnelResult<Vec<IpPrefix>> {
    subnets.iter().map(|s| s.parse()).collect()
}

fn routing_policy(
    all: bool,
    exclude: &[String],
    subnets: &[String],
) -> TunnelResult<RoutingPolicy> {
    if all {
        Ok(RoutingPolicy::All {
            exclude: parse_subnets(exclude)?,
        })
    } else {
        Ok(RoutingPolicy::Subnets(parse_subnets(subnets)?))
    }
}
