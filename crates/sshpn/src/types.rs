//! Tunnel type definitions and constants

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use sshpn_common::{TunnelError, TunnelResult};

/// Default remote login user.
pub const DEFAULT_USER: &str = "root";

/// Default multiplex control socket. `%h` and `%p` are expanded by ssh.
pub const DEFAULT_SOCKET: &str = "/root/.ssh/socket/%h:%p";

/// Default local end of the point-to-point link.
pub const DEFAULT_TUN_LADDR: Ipv4Addr = Ipv4Addr::new(10, 32, 32, 2);

/// Default remote end of the point-to-point link.
pub const DEFAULT_TUN_RADDR: Ipv4Addr = Ipv4Addr::new(10, 32, 32, 1);

/// Default SOCKS listening port.
pub const DEFAULT_PROXY_PORT: u16 = 1080;

/// Kind of virtual network device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// L3 point-to-point device.
    Tun,
    /// L2 ethernet device.
    Tap,
}

impl DeviceKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            DeviceKind::Tun => "tun",
            DeviceKind::Tap => "tap",
        }
    }

    /// Value for ssh's `Tunnel=` option.
    pub fn ssh_tunnel_type(&self) -> &'static str {
        match self {
            DeviceKind::Tun => "point-to-point",
            DeviceKind::Tap => "ethernet",
        }
    }
}

/// A `tun[0-9]+` or `tap[0-9]+` device name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceName {
    pub kind: DeviceKind,
    pub index: u32,
}

impl DeviceName {
    pub fn new(kind: DeviceKind, index: u32) -> Self {
        Self { kind, index }
    }

    pub fn tun(index: u32) -> Self {
        Self::new(DeviceKind::Tun, index)
    }

    pub fn tap(index: u32) -> Self {
        Self::new(DeviceKind::Tap, index)
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.index)
    }
}

impl FromStr for DeviceName {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = if s.starts_with("tun") {
            DeviceKind::Tun
        } else if s.starts_with("tap") {
            DeviceKind::Tap
        } else {
            return Err(TunnelError::invalid_input(
                "name",
                format!("'{}' must be of format tun[0-9]+ or tap[0-9]+", s),
            ));
        };

        let digits = &s[3..];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TunnelError::invalid_input(
                "name",
                format!("'{}' must be of format {}[0-9]+", s, kind.prefix()),
            ));
        }

        let index = digits.parse().map_err(|_| {
            TunnelError::invalid_input("name", format!("device index in '{}' is too large", s))
        })?;
        Ok(Self { kind, index })
    }
}

/// What a tunnel is identified by: its device, or its SOCKS listening port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunnelIdentity {
    Device(DeviceName),
    Port(u16),
}

impl TunnelIdentity {
    /// Key prefix used for persisted state.
    pub fn state_key(&self, fact: &str) -> String {
        format!("{}.{}", self, fact)
    }
}

impl fmt::Display for TunnelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelIdentity::Device(dev) => write!(f, "{}", dev),
            TunnelIdentity::Port(port) => write!(f, "{}", port),
        }
    }
}

impl FromStr for TunnelIdentity {
    type Err = TunnelError;

    /// Numeric input is always a port, whatever the device naming rules say.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(port) = s.parse::<u16>() {
            return Ok(TunnelIdentity::Port(port));
        }
        s.parse().map(TunnelIdentity::Device)
    }
}

/// Validated CIDR prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpPrefix {
    addr: IpAddr,
    len: u8,
}

impl IpPrefix {
    pub fn new(addr: IpAddr, len: u8) -> TunnelResult<Self> {
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if len > max {
            return Err(TunnelError::invalid_input(
                "subnet",
                format!("prefix length {} exceeds {} for {}", len, max, addr),
            ));
        }
        Ok(Self { addr, len })
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn prefix_len(&self) -> u8 {
        self.len
    }

    pub fn is_v4(&self) -> bool {
        self.addr.is_ipv4()
    }

    pub fn is_v6(&self) -> bool {
        self.addr.is_ipv6()
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

impl FromStr for IpPrefix {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            TunnelError::invalid_input(
                "subnet",
                format!("'{}' is not in cidr notation", s),
            )
        };

        let (addr, len) = s.split_once('/').ok_or_else(invalid)?;
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let len: u8 = len.parse().map_err(|_| invalid())?;
        Self::new(addr, len)
    }
}

/// Which destinations are sent through the tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingPolicy {
    /// Everything, except the listed subnets which stay on the local default device.
    All { exclude: Vec<IpPrefix> },
    /// Only the listed subnets.
    Subnets(Vec<IpPrefix>),
}

impl RoutingPolicy {
    /// Policy that adds no routes at all.
    pub fn none() -> Self {
        RoutingPolicy::Subnets(Vec::new())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, RoutingPolicy::All { .. })
    }

    /// True when the policy asks for no routing changes.
    pub fn is_empty(&self) -> bool {
        matches!(self, RoutingPolicy::Subnets(s) if s.is_empty())
    }

    /// Subnets routed over the local default device instead of the tunnel.
    pub fn excluded(&self) -> &[IpPrefix] {
        match self {
            RoutingPolicy::All { exclude } => exclude,
            RoutingPolicy::Subnets(_) => &[],
        }
    }
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// L3 tunnel parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunSpec {
    pub name: DeviceName,
    /// Local end of the point-to-point link.
    pub laddr: Ipv4Addr,
    /// Remote end of the point-to-point link.
    pub raddr: Ipv4Addr,
    pub routing: RoutingPolicy,
}

impl TunSpec {
    pub fn new(name: DeviceName) -> Self {
        Self {
            name,
            laddr: DEFAULT_TUN_LADDR,
            raddr: DEFAULT_TUN_RADDR,
            routing: RoutingPolicy::none(),
        }
    }

    pub fn with_addrs(mut self, laddr: Ipv4Addr, raddr: Ipv4Addr) -> Self {
        self.laddr = laddr;
        self.raddr = raddr;
        self
    }

    pub fn with_routing(mut self, routing: RoutingPolicy) -> Self {
        self.routing = routing;
        self
    }
}

/// L2 tunnel parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapSpec {
    pub name: DeviceName,
    pub all: bool,
    /// Acquire an address over DHCP once the devices are up.
    pub dhcp: bool,
}

impl TapSpec {
    pub fn new(name: DeviceName) -> Self {
        Self {
            name,
            all: false,
            dhcp: false,
        }
    }
}

/// SOCKS proxy parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySpec {
    pub port: u16,
    pub proxy_host: String,
    /// Forward UDP as well (not something `ssh -D` can do).
    pub udp: bool,
    pub routing: RoutingPolicy,
}

impl ProxySpec {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            proxy_host: "localhost".to_string(),
            udp: false,
            routing: RoutingPolicy::none(),
        }
    }
}

/// A validated tunnel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelSpec {
    Tun(TunSpec),
    Tap(TapSpec),
    Proxy(ProxySpec),
}

impl TunnelSpec {
    pub fn identity(&self) -> TunnelIdentity {
        match self {
            TunnelSpec::Tun(t) => TunnelIdentity::Device(t.name),
            TunnelSpec::Tap(t) => TunnelIdentity::Device(t.name),
            TunnelSpec::Proxy(p) => TunnelIdentity::Port(p.port),
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            TunnelSpec::Tun(_) => "tun",
            TunnelSpec::Tap(_) => "tap",
            TunnelSpec::Proxy(_) => "proxy",
        }
    }
}

/// Lifecycle phase requested for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Start,
    Stop,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecyclePhase::Start => f.write_str("start"),
            LifecyclePhase::Stop => f.write_str("stop"),
        }
    }
}

/// The ssh session every operation of one invocation goes through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub host: String,
    pub user: String,
    /// Control socket path, possibly containing ssh `%` tokens.
    pub socket: String,
}

impl SessionTarget {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: DEFAULT_USER.to_string(),
            socket: DEFAULT_SOCKET.to_string(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_socket(mut self, socket: impl Into<String>) -> Self {
        self.socket = socket.into();
        self
    }

    /// `user@host` destination for ssh.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_name_parse() {
        let dev: DeviceName = "tun3".parse().unwrap();
        assert_eq!(dev, DeviceName::tun(3));
        assert_eq!(dev.to_string(), "tun3");

        let dev: DeviceName = "tap12".parse().unwrap();
        assert_eq!(dev.kind, DeviceKind::Tap);
        assert_eq!(dev.index, 12);
    }

    #[test]
    fn test_device_name_invalid() {
        assert!("eth0".parse::<DeviceName>().is_err());
        assert!("tun".parse::<DeviceName>().is_err());
        assert!("tun0; rm -rf /".parse::<DeviceName>().is_err());
        assert!("tapx".parse::<DeviceName>().is_err());
    }

    #[test]
    fn test_identity_numeric_is_port() {
        assert_eq!(
            "1080".parse::<TunnelIdentity>().unwrap(),
            TunnelIdentity::Port(1080)
        );
        assert_eq!(
            "tun0".parse::<TunnelIdentity>().unwrap(),
            TunnelIdentity::Device(DeviceName::tun(0))
        );
        assert!("socks".parse::<TunnelIdentity>().is_err());
    }

    #[test]
    fn test_state_key() {
        let id = TunnelIdentity::Device(DeviceName::tun(3));
        assert_eq!(id.state_key("public_ip"), "tun3.public_ip");
        assert_eq!(TunnelIdentity::Port(1080).state_key("public_ip"), "1080.public_ip");
    }

    #[test]
    fn test_ip_prefix_parse() {
        let prefix: IpPrefix = "192.168.1.0/24".parse().unwrap();
        assert!(prefix.is_v4());
        assert_eq!(prefix.prefix_len(), 24);
        assert_eq!(prefix.to_string(), "192.168.1.0/24");

        let prefix: IpPrefix = "2001:db8::/32".parse().unwrap();
        assert!(prefix.is_v6());
        assert_eq!(prefix.to_string(), "2001:db8::/32");
    }

    #[test]
    fn test_ip_prefix_invalid() {
        assert!("192.168.1.0".parse::<IpPrefix>().is_err());
        assert!("192.168.1.0/33".parse::<IpPrefix>().is_err());
        assert!("example.com/24".parse::<IpPrefix>().is_err());
        assert!("10.0.0.0/x".parse::<IpPrefix>().is_err());
    }

    #[test]
    fn test_routing_policy_excluded() {
        let lan: IpPrefix = "192.168.0.0/16".parse().unwrap();
        let all = RoutingPolicy::All { exclude: vec![lan] };
        assert!(all.is_all());
        assert_eq!(all.excluded(), &[lan]);

        let subnets = RoutingPolicy::Subnets(vec![lan]);
        assert!(!subnets.is_all());
        assert!(subnets.excluded().is_empty());
        assert!(RoutingPolicy::none().is_empty());
    }

    #[test]
    fn test_tun_spec_defaults() {
        let spec = TunSpec::new(DeviceName::tun(0));
        assert_eq!(spec.laddr.to_string(), "10.32.32.2");
        assert_eq!(spec.raddr.to_string(), "10.32.32.1");
        assert_eq!(spec.routing, RoutingPolicy::none());
    }

    #[test]
    fn test_spec_identity() {
        let spec = TunnelSpec::Proxy(ProxySpec::new(1080));
        assert_eq!(spec.identity(), TunnelIdentity::Port(1080));
        assert_eq!(spec.mode(), "proxy");

        let spec = TunnelSpec::Tap(TapSpec::new(DeviceName::tap(1)));
        assert_eq!(spec.identity().to_string(), "tap1");
    }

    #[test]
    fn test_session_target() {
        let target = SessionTarget::new("example.com");
        assert_eq!(target.destination(), "root@example.com");
        assert_eq!(target.socket, DEFAULT_SOCKET);

        let target = target.with_user("admin").with_socket("/tmp/ctl");
        assert_eq!(target.destination(), "admin@example.com");
        assert_eq!(target.socket, "/tmp/ctl");
    }
}
