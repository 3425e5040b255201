//! Shell command builders for tunnel operations
//!
//! Everything here is pure string construction. Inputs are expected to be
//! validated already; interpolated values are still shell-quoted.

use std::net::{IpAddr, Ipv4Addr};

use sshpn_common::shell::{self, GREP_CMD, IPTABLES_CMD, IP_CMD, SSH_CMD, SUDO_CMD};

use crate::types::{DeviceName, IpPrefix, SessionTarget, TunnelIdentity};

/// Kernel IPv4 forwarding switch.
pub const IP_FORWARD_PATH: &str = "/proc/sys/net/ipv4/ip_forward";

/// Backup of the remote forwarding switch taken at start.
pub const IP_FORWARD_BACKUP: &str = "/tmp/ip_forward";

/// Prints the device of the default route.
pub const DEFAULT_DEVICE_QUERY: &str =
    r#"ip r | grep -E "^default" | grep -oE "dev [a-z0-9]+" | cut -d " " -f 2"#;

/// Prints the address the host is seen from on the internet.
pub const PUBLIC_ADDRESS_QUERY: &str =
    "dig -4 +short myip.opendns.com A @resolver1.opendns.com +timeout=3 || curl -4 -s ifconfig.me";

/// Prints the gateway of the default route.
pub const DEFAULT_GATEWAY_QUERY: &str =
    r#"ip r | grep -E '^default' | grep -oE '([0-9]{1,3}[\.]){3}[0-9]{1,3}'"#;

/// Remote no-op used to confirm the session accepts commands.
pub const PROBE_CMD: &str = "true";

/// Build the command that opens the multiplexed session and the forward.
///
/// A port becomes a dynamic (SOCKS) forward; a device becomes an ssh tunnel
/// device request whose type follows the device prefix.
pub fn session_init(target: &SessionTarget, identity: &TunnelIdentity) -> String {
    match identity {
        TunnelIdentity::Port(port) => format!(
            "{} -fNTMS {} -D {} {}",
            SSH_CMD,
            shell::shellquote(&target.socket),
            port,
            shell::shellquote(&target.destination())
        ),
        TunnelIdentity::Device(dev) => format!(
            "{} -fNTMS {} -w {}:{} -o Tunnel={} {}",
            SSH_CMD,
            shell::shellquote(&target.socket),
            dev.index,
            dev.index,
            dev.kind.ssh_tunnel_type(),
            shell::shellquote(&target.destination())
        ),
    }
}

/// `host:port` for an ssh forward, with IPv6 literals in brackets.
pub fn socks_bind(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Build the session command for a dynamic forward listening on `bind_host`.
pub fn session_init_socks(target: &SessionTarget, bind_host: &str, port: u16) -> String {
    format!(
        "{} -fNTMS {} -D {} {}",
        SSH_CMD,
        shell::shellquote(&target.socket),
        shell::shellquote(&socks_bind(bind_host, port)),
        shell::shellquote(&target.destination())
    )
}

/// Build the command that closes the multiplexed session.
///
/// Uses `-O exit`: `-O stop` leaves the master running in practice.
pub fn session_stop(target: &SessionTarget) -> String {
    format!(
        "{} -S {} -O exit {}",
        SSH_CMD,
        shell::shellquote(&target.socket),
        shell::shellquote(&target.destination())
    )
}

/// Build the command that runs `snippet` on the remote end of the session.
///
/// The snippet is wrapped in a subshell so `&&`/`||` inside it keep their
/// grouping.
pub fn run_remote(target: &SessionTarget, snippet: &str) -> String {
    format!(
        "{} -S {} {} -- {}",
        SSH_CMD,
        shell::shellquote(&target.socket),
        shell::shellquote(&target.destination()),
        shell::shellquote(&format!("({})", snippet))
    )
}

/// Prefix a local command with sudo.
pub fn sudo(cmd: &str) -> String {
    format!("{} {}", SUDO_CMD, cmd)
}

/// Remote query printing POSTROUTING rule numbers that mention `laddr`.
pub fn nat_rule_numbers_query(laddr: Ipv4Addr) -> String {
    format!(
        "{} -t nat -L POSTROUTING -n --line-numbers | {} -wF {} | {} -oE '^[0-9]+'",
        IPTABLES_CMD,
        GREP_CMD,
        shell::shellquote(&laddr.to_string()),
        GREP_CMD
    )
}

/// `ip addr add <addr>/32 peer <peer> dev <dev>`
pub fn build_add_p2p_address_cmd(addr: Ipv4Addr, peer: Ipv4Addr, dev: &DeviceName) -> String {
    format!("{} addr add {}/32 peer {} dev {}", IP_CMD, addr, peer, dev)
}

/// `ip link set <dev> up`
pub fn build_set_link_up_cmd(dev: &DeviceName) -> String {
    format!("{} link set {} up", IP_CMD, dev)
}

/// `ip link show <dev>`
pub fn build_show_link_cmd(dev: &DeviceName) -> String {
    format!("{} link show {}", IP_CMD, dev)
}

/// Masquerade traffic from `laddr` leaving through `out_dev`.
pub fn build_add_masquerade_cmd(laddr: Ipv4Addr, out_dev: &str) -> String {
    format!(
        "{} -t nat -A POSTROUTING -s {}/32 -o {} -j MASQUERADE",
        IPTABLES_CMD,
        laddr,
        shell::shellquote(out_dev)
    )
}

/// Delete POSTROUTING rule number `line`.
pub fn build_del_nat_rule_cmd(line: u32) -> String {
    format!("{} -t nat -D POSTROUTING {}", IPTABLES_CMD, line)
}

pub fn build_backup_ip_forward_cmd() -> String {
    format!("cp {} {}", IP_FORWARD_PATH, IP_FORWARD_BACKUP)
}

pub fn build_enable_ip_forward_cmd() -> String {
    format!("echo 1 > {}", IP_FORWARD_PATH)
}

pub fn build_restore_ip_forward_cmd() -> String {
    format!("cat {} > {}", IP_FORWARD_BACKUP, IP_FORWARD_PATH)
}

pub fn build_remove_ip_forward_backup_cmd() -> String {
    format!("rm {}", IP_FORWARD_BACKUP)
}

/// `ip route add <prefix> dev <dev>`
pub fn build_add_route_cmd(prefix: &str, dev: &str) -> String {
    format!(
        "{} route add {} dev {}",
        IP_CMD,
        shell::shellquote(prefix),
        shell::shellquote(dev)
    )
}

/// `ip route del <prefix> dev <dev>`
pub fn build_del_route_cmd(prefix: &str, dev: &str) -> String {
    format!(
        "{} route del {} dev {}",
        IP_CMD,
        shell::shellquote(prefix),
        shell::shellquote(dev)
    )
}

/// Host route for `host` via the local gateway, so ssh traffic to the remote
/// keeps using the physical link once the default routes point at the tunnel.
pub fn build_add_host_route_cmd(host: IpAddr, gateway: IpAddr, dev: &str) -> String {
    format!(
        "{} route add {} via {} dev {}",
        IP_CMD,
        host,
        gateway,
        shell::shellquote(dev)
    )
}

pub fn build_del_host_route_cmd(host: IpAddr, dev: &str) -> String {
    build_del_route_cmd(&host.to_string(), dev)
}

/// The two halves of the IPv4 space; together they override the default
/// route without replacing it.
pub fn default_covering_prefixes() -> [IpPrefix; 2] {
    [
        IpPrefix::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 1).expect("static prefix"),
        IpPrefix::new(IpAddr::V4(Ipv4Addr::new(128, 0, 0, 0)), 1).expect("static prefix"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceKind;

    fn target() -> SessionTarget {
        SessionTarget::new("example.com")
    }

    #[test]
    fn test_session_init_tun() {
        let id = TunnelIdentity::Device(DeviceName::tun(3));
        let cmd = session_init(&target(), &id);
        assert_eq!(
            cmd,
            "ssh -fNTMS \"/root/.ssh/socket/%h:%p\" -w 3:3 -o Tunnel=point-to-point \"root@example.com\""
        );
    }

    #[test]
    fn test_session_init_tap() {
        let id = TunnelIdentity::Device(DeviceName::new(DeviceKind::Tap, 0));
        let cmd = session_init(&target(), &id);
        assert!(cmd.contains("-w 0:0"));
        assert!(cmd.contains("-o Tunnel=ethernet"));
    }

    #[test]
    fn test_session_init_port() {
        let id: TunnelIdentity = "1080".parse().unwrap();
        let cmd = session_init(&target(), &id);
        assert_eq!(
            cmd,
            "ssh -fNTMS \"/root/.ssh/socket/%h:%p\" -D 1080 \"root@example.com\""
        );
        assert!(!cmd.contains("Tunnel="));
    }

    #[test]
    fn test_session_init_socks_binds_host() {
        let cmd = session_init_socks(&target(), "127.0.0.1", 9050);
        assert_eq!(
            cmd,
            "ssh -fNTMS \"/root/.ssh/socket/%h:%p\" -D \"127.0.0.1:9050\" \"root@example.com\""
        );

        let v6 = session_init_socks(&target(), "::1", 1080);
        assert!(v6.contains("-D \"[::1]:1080\""));
        assert_eq!(socks_bind("localhost", 1080), "localhost:1080");
    }

    #[test]
    fn test_session_stop_uses_exit() {
        let cmd = session_stop(&target());
        assert_eq!(
            cmd,
            "ssh -S \"/root/.ssh/socket/%h:%p\" -O exit \"root@example.com\""
        );
    }

    #[test]
    fn test_run_remote_parenthesizes() {
        let cmd = run_remote(&target(), "false || echo ok && echo done");
        assert!(cmd.ends_with("-- \"(false || echo ok && echo done)\""));
        assert!(cmd.starts_with("ssh -S \"/root/.ssh/socket/%h:%p\" \"root@example.com\""));
    }

    #[test]
    fn test_run_remote_escapes_snippet() {
        let cmd = run_remote(&target(), "echo $HOME");
        assert!(cmd.contains("\"(echo \\$HOME)\""));
    }

    #[test]
    fn test_nat_rule_query() {
        let cmd = nat_rule_numbers_query(Ipv4Addr::new(10, 32, 32, 2));
        assert!(cmd.starts_with("iptables -t nat -L POSTROUTING -n --line-numbers"));
        assert!(cmd.contains("grep -wF \"10.32.32.2\""));
    }

    #[test]
    fn test_p2p_address() {
        let cmd = build_add_p2p_address_cmd(
            Ipv4Addr::new(10, 32, 32, 1),
            Ipv4Addr::new(10, 32, 32, 2),
            &DeviceName::tun(3),
        );
        assert_eq!(cmd, "ip addr add 10.32.32.1/32 peer 10.32.32.2 dev tun3");
    }

    #[test]
    fn test_masquerade() {
        let cmd = build_add_masquerade_cmd(Ipv4Addr::new(10, 32, 32, 2), "eth0");
        assert_eq!(
            cmd,
            "iptables -t nat -A POSTROUTING -s 10.32.32.2/32 -o \"eth0\" -j MASQUERADE"
        );
        assert_eq!(build_del_nat_rule_cmd(4), "iptables -t nat -D POSTROUTING 4");
    }

    #[test]
    fn test_ip_forward_commands() {
        assert_eq!(
            build_backup_ip_forward_cmd(),
            "cp /proc/sys/net/ipv4/ip_forward /tmp/ip_forward"
        );
        assert_eq!(build_enable_ip_forward_cmd(), "echo 1 > /proc/sys/net/ipv4/ip_forward");
        assert_eq!(
            build_restore_ip_forward_cmd(),
            "cat /tmp/ip_forward > /proc/sys/net/ipv4/ip_forward"
        );
        assert_eq!(build_remove_ip_forward_backup_cmd(), "rm /tmp/ip_forward");
    }

    #[test]
    fn test_routes() {
        assert_eq!(
            build_add_route_cmd("192.168.1.0/24", "tun3"),
            "ip route add \"192.168.1.0/24\" dev \"tun3\""
        );
        assert_eq!(
            build_del_route_cmd("192.168.1.0/24", "wlan0"),
            "ip route del \"192.168.1.0/24\" dev \"wlan0\""
        );
        let host: IpAddr = "203.0.113.7".parse().unwrap();
        let gw: IpAddr = "192.168.1.1".parse().unwrap();
        assert_eq!(
            build_add_host_route_cmd(host, gw, "wlan0"),
            "ip route add 203.0.113.7 via 192.168.1.1 dev \"wlan0\""
        );
        assert_eq!(
            build_del_host_route_cmd(host, "wlan0"),
            "ip route del \"203.0.113.7\" dev \"wlan0\""
        );
    }

    #[test]
    fn test_sudo_prefix() {
        assert_eq!(sudo("ip link set tun0 up"), "sudo ip link set tun0 up");
    }

    #[test]
    fn test_default_covering_prefixes() {
        let [low, high] = default_covering_prefixes();
        assert_eq!(low.to_string(), "0.0.0.0/1");
        assert_eq!(high.to_string(), "128.0.0.0/1");
    }

    #[test]
    fn test_shellquote_safety() {
        let cmd = build_add_route_cmd("10.0.0.0/8; rm -rf /", "tun0");
        // Should be quoted to prevent injection
        assert!(cmd.contains("\"10.0.0.0/8; rm -rf /\""));
    }
}
