//! Wireless address discovery for a USB-attached device.
//!
//! Firmware builds disagree on which shell tools exist and how they format
//! their output, so the lookup is an ordered chain of [`AddressStrategy`]
//! implementations. The first one that yields an IPv4 address wins. New
//! firmware quirks are handled by adding a strategy, not by touching the
//! bridge state machine.
//!
//! # Default chain
//!
//! 1. [`RouteProbe`]: `ip route get <anchor>` and take the `src` address.
//! 2. [`InterfaceScan`]: every `wlan*` link (up before down), each probed
//!    with `ip addr`, the `dhcp.<iface>.ipaddress` property and `ifconfig`.
//! 3. [`PropertyScan`]: the full `getprop` dump, looking for a DHCP lease.
//!
//! If the whole chain fails, [`AddressResolver::resolve`] waits and runs it
//! once more, because DHCP leases often lag behind the switch to TCP mode.

use std::net::Ipv4Addr;
use std::thread;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::adb::DeviceControl;
use crate::error::CastLinkError;
use crate::interface::{candidate_names, list_wireless_interfaces};

lazy_static! {
    static ref ROUTE_SRC: Regex =
        Regex::new(r"\bsrc\s+(\d{1,3}(?:\.\d{1,3}){3})").expect("valid route pattern");
    static ref ADDR_INET: Regex =
        Regex::new(r"\binet\s+(\d{1,3}(?:\.\d{1,3}){3})/").expect("valid addr pattern");
    static ref IFCONFIG_INET: Regex =
        Regex::new(r"\binet(?:\s+addr:|\s+)(\d{1,3}(?:\.\d{1,3}){3})").expect("valid ifconfig pattern");
    static ref DHCP_LEASE: Regex = Regex::new(
        r"dhcp\.(wlan\d*).*?ipaddress\]\s*:\s*\[(\d{1,3}(?:\.\d{1,3}){3})\]"
    )
    .expect("valid getprop pattern");
}

/// Public address whose route reveals the device's outbound source address.
pub const DEFAULT_ROUTE_ANCHOR: &str = "8.8.8.8";

/// One way of finding the device's wireless IPv4 address.
pub trait AddressStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn resolve(&self, adb: &DeviceControl, serial: &str) -> Option<Ipv4Addr>;
}

/// Asks the routing table which source address reaches a public anchor.
#[derive(Debug, Clone)]
pub struct RouteProbe {
    anchor: String,
}

impl RouteProbe {
    pub fn new(anchor: impl Into<String>) -> Self {
        Self {
            anchor: anchor.into(),
        }
    }
}

impl Default for RouteProbe {
    fn default() -> Self {
        Self::new(DEFAULT_ROUTE_ANCHOR)
    }
}

impl AddressStrategy for RouteProbe {
    fn name(&self) -> &'static str {
        "route-probe"
    }

    fn resolve(&self, adb: &DeviceControl, serial: &str) -> Option<Ipv4Addr> {
        let output = adb.shell(serial, &["ip", "route", "get", self.anchor.as_str()]);
        if !output.success() {
            return None;
        }
        let found = capture_ipv4(&ROUTE_SRC, &output.stdout, 1);
        if found.is_none() {
            debug!(error = %CastLinkError::ParseMismatch("no src in route".into()), "route probe missed");
        }
        found
    }
}

/// Probes each wireless interface the device reports.
#[derive(Debug, Clone, Default)]
pub struct InterfaceScan;

impl AddressStrategy for InterfaceScan {
    fn name(&self) -> &'static str {
        "interface-scan"
    }

    fn resolve(&self, adb: &DeviceControl, serial: &str) -> Option<Ipv4Addr> {
        let interfaces = list_wireless_interfaces(adb, serial);
        candidate_names(&interfaces)
            .iter()
            .find_map(|iface| probe_interface(adb, serial, iface))
    }
}

/// Searches every device property for a wireless DHCP lease.
#[derive(Debug, Clone, Default)]
pub struct PropertyScan;

impl AddressStrategy for PropertyScan {
    fn name(&self) -> &'static str {
        "property-scan"
    }

    fn resolve(&self, adb: &DeviceControl, serial: &str) -> Option<Ipv4Addr> {
        let output = adb.shell(serial, &["getprop"]);
        if !output.success() {
            return None;
        }
        capture_ipv4(&DHCP_LEASE, &output.stdout, 2)
    }
}

/// Probes a single, fixed interface name. Older builds only ever looked at
/// `wlan0`; kept as a degraded mode for devices where scanning misbehaves.
#[derive(Debug, Clone)]
pub struct FixedInterface {
    name: String,
}

impl FixedInterface {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl AddressStrategy for FixedInterface {
    fn name(&self) -> &'static str {
        "fixed-interface"
    }

    fn resolve(&self, adb: &DeviceControl, serial: &str) -> Option<Ipv4Addr> {
        probe_interface(adb, serial, &self.name)
    }
}

/// Address query, DHCP property, then `ifconfig`, for one interface.
pub fn probe_interface(adb: &DeviceControl, serial: &str, iface: &str) -> Option<Ipv4Addr> {
    let addr = adb.shell(serial, &["ip", "-o", "-4", "addr", "show", "dev", iface]);
    if addr.success() {
        if let Some(ip) = capture_ipv4(&ADDR_INET, &addr.stdout, 1) {
            return Some(ip);
        }
    }

    let prop = adb.shell(serial, &["getprop", format!("dhcp.{iface}.ipaddress").as_str()]);
    if prop.success() {
        if let Ok(ip) = prop.stdout.trim().parse::<Ipv4Addr>() {
            return Some(ip);
        }
    }

    let ifconfig = adb.shell(serial, &["ifconfig", iface]);
    if ifconfig.success() {
        return capture_ipv4(&IFCONFIG_INET, &ifconfig.stdout, 1);
    }
    None
}

fn capture_ipv4(pattern: &Regex, text: &str, group: usize) -> Option<Ipv4Addr> {
    pattern
        .captures_iter(text)
        .filter_map(|caps| caps.get(group))
        .find_map(|m| m.as_str().parse().ok())
}

/// Which strategy chain to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverMode {
    /// Route probe, interface scan, property scan.
    #[default]
    Full,
    /// `wlan0` only.
    Legacy,
}

/// Ordered strategy chain with one delayed retry.
pub struct AddressResolver {
    strategies: Vec<Box<dyn AddressStrategy>>,
    retry_delay: Duration,
}

impl AddressResolver {
    pub fn new(strategies: Vec<Box<dyn AddressStrategy>>, retry_delay: Duration) -> Self {
        Self {
            strategies,
            retry_delay,
        }
    }

    pub fn full(anchor: &str, retry_delay: Duration) -> Self {
        let strategies: Vec<Box<dyn AddressStrategy>> = vec![
            Box::new(RouteProbe::new(anchor)) as Box<dyn AddressStrategy>,
            Box::new(InterfaceScan),
            Box::new(PropertyScan),
        ];
        Self::new(strategies, retry_delay)
    }

    pub fn legacy(retry_delay: Duration) -> Self {
        let strategies: Vec<Box<dyn AddressStrategy>> =
            vec![Box::new(FixedInterface::new("wlan0")) as Box<dyn AddressStrategy>];
        Self::new(strategies, retry_delay)
    }

    pub fn for_mode(mode: ResolverMode, anchor: &str, retry_delay: Duration) -> Self {
        match mode {
            ResolverMode::Full => Self::full(anchor, retry_delay),
            ResolverMode::Legacy => Self::legacy(retry_delay),
        }
    }

    /// Appends a strategy to the end of the chain.
    pub fn with_strategy(mut self, strategy: Box<dyn AddressStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Finds the wireless address of a USB device in `device` state.
    pub fn resolve(&self, adb: &DeviceControl, serial: &str) -> Option<Ipv4Addr> {
        if let Some(ip) = self.run_chain(adb, serial) {
            return Some(ip);
        }
        debug!(serial, delay = ?self.retry_delay, "no address yet, retrying");
        thread::sleep(self.retry_delay);
        self.run_chain(adb, serial)
    }

    fn run_chain(&self, adb: &DeviceControl, serial: &str) -> Option<Ipv4Addr> {
        for strategy in &self.strategies {
            if let Some(ip) = strategy.resolve(adb, serial) {
                info!(serial, strategy = strategy.name(), %ip, "resolved wireless address");
                return Some(ip);
            }
            debug!(serial, strategy = strategy.name(), "strategy found no address");
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutput, ScriptedRunner};
    use std::sync::Arc;

    const SERIAL: &str = "1WMHH8151K0271";

    fn key(cmd: &str) -> String {
        format!("-s {SERIAL} shell {cmd}")
    }

    fn setup() -> (Arc<ScriptedRunner>, DeviceControl) {
        let runner = Arc::new(ScriptedRunner::new());
        let adb = DeviceControl::new("adb", runner.clone());
        (runner, adb)
    }

    fn resolver() -> AddressResolver {
        AddressResolver::full(DEFAULT_ROUTE_ANCHOR, Duration::ZERO)
    }

    #[test]
    fn test_route_probe_wins_first() {
        let (runner, adb) = setup();
        runner.respond(
            &key("ip route get 8.8.8.8"),
            CommandOutput::ok("8.8.8.8 via 192.168.1.1 dev wlan0 src 192.168.1.42 uid 2000\n    cache\n"),
        );

        assert_eq!(resolver().resolve(&adb, SERIAL), Some(Ipv4Addr::new(192, 168, 1, 42)));
        assert_eq!(runner.calls(), vec![key("ip route get 8.8.8.8")]);
    }

    #[test]
    fn test_interface_scan_skips_property_scan() {
        let (runner, adb) = setup();
        runner
            .respond(&key("ip route get 8.8.8.8"), CommandOutput::ok("unreachable\n"))
            .respond(
                &key("ip -o link show"),
                CommandOutput::ok("3: wlan0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 state UP\n"),
            )
            .respond(
                &key("ip -o -4 addr show dev wlan0"),
                CommandOutput::ok("3: wlan0    inet 192.168.1.77/24 brd 192.168.1.255 scope global wlan0\n"),
            );

        assert_eq!(resolver().resolve(&adb, SERIAL), Some(Ipv4Addr::new(192, 168, 1, 77)));
        assert_eq!(runner.call_count(&key("getprop")), 0);
    }

    #[test]
    fn test_interface_probes_fall_through_per_interface() {
        let (runner, adb) = setup();
        runner
            .respond(
                &key("ip -o link show"),
                CommandOutput::ok("2: wlan1: <BROADCAST> mtu 1500\n3: wlan0: <UP> mtu 1500\n"),
            )
            .respond(&key("ip -o -4 addr show dev wlan0"), CommandOutput::ok(""))
            .respond(&key("getprop dhcp.wlan0.ipaddress"), CommandOutput::ok("\n"))
            .respond(
                &key("ifconfig wlan1"),
                CommandOutput::ok("wlan1: ip 10.0.0.3 mask 255.255.255.0 flags [up]\n"),
            )
            .respond(&key("getprop dhcp.wlan1.ipaddress"), CommandOutput::ok("10.0.0.3\n"));

        assert_eq!(resolver().resolve(&adb, SERIAL), Some(Ipv4Addr::new(10, 0, 0, 3)));
        // wlan0 is up, so it is exhausted before wlan1 is touched.
        let calls = runner.calls();
        let first_wlan1 = calls.iter().position(|c| c.contains("wlan1")).unwrap();
        let last_wlan0 = calls.iter().rposition(|c| c.contains("wlan0")).unwrap();
        assert!(last_wlan0 < first_wlan1);
        assert_eq!(runner.call_count(&key("ifconfig wlan1")), 0);
    }

    #[test]
    fn test_blind_interfaces_and_legacy_ifconfig() {
        let (runner, adb) = setup();
        runner.respond(
            &key("ifconfig wlan1"),
            CommandOutput::ok("wlan1     Link encap:Ethernet\n          inet addr:172.16.4.20  Bcast:172.16.4.255\n"),
        );

        assert_eq!(resolver().resolve(&adb, SERIAL), Some(Ipv4Addr::new(172, 16, 4, 20)));
        assert_eq!(runner.call_count(&key("ifconfig wlan0")), 1);
    }

    #[test]
    fn test_property_scan_last_resort() {
        let (runner, adb) = setup();
        runner.respond(
            &key("getprop"),
            CommandOutput::ok(
                "[dhcp.eth0.ipaddress]: [10.9.9.9]\n[dhcp.wlan0.ipaddress]: [192.168.0.31]\n[net.bt.name]: [Android]\n",
            ),
        );

        assert_eq!(resolver().resolve(&adb, SERIAL), Some(Ipv4Addr::new(192, 168, 0, 31)));
    }

    #[test]
    fn test_invalid_octets_are_rejected() {
        let (runner, adb) = setup();
        runner.respond(
            &key("ip route get 8.8.8.8"),
            CommandOutput::ok("8.8.8.8 dev wlan0 src 300.1.1.1\n"),
        );
        assert_eq!(resolver().resolve(&adb, SERIAL), None);
    }

    #[test]
    fn test_retries_whole_chain_once() {
        let (runner, adb) = setup();
        runner
            .respond(&key("ip route get 8.8.8.8"), CommandOutput::ok("unreachable\n"))
            .respond(
                &key("ip route get 8.8.8.8"),
                CommandOutput::ok("8.8.8.8 via 192.168.1.1 dev wlan0 src 192.168.1.77\n"),
            );

        assert_eq!(resolver().resolve(&adb, SERIAL), Some(Ipv4Addr::new(192, 168, 1, 77)));
        assert_eq!(runner.call_count(&key("ip route get 8.8.8.8")), 2);
        assert_eq!(runner.call_count(&key("getprop")), 1);
    }

    #[test]
    fn test_gives_up_after_second_pass() {
        let (runner, adb) = setup();
        assert_eq!(resolver().resolve(&adb, SERIAL), None);
        assert_eq!(runner.call_count(&key("ip route get 8.8.8.8")), 2);
    }

    #[test]
    fn test_resolution_is_repeatable() {
        let (runner, adb) = setup();
        runner
            .respond(&key("ip -o link show"), CommandOutput::ok("3: wlan0: <UP> mtu 1500\n"))
            .respond(&key("getprop dhcp.wlan0.ipaddress"), CommandOutput::ok("192.168.5.5\n"));

        let resolver = resolver();
        let first = resolver.resolve(&adb, SERIAL);
        assert_eq!(first, Some(Ipv4Addr::new(192, 168, 5, 5)));
        assert_eq!(resolver.resolve(&adb, SERIAL), first);
    }

    #[test]
    fn test_legacy_mode_only_checks_wlan0() {
        let (runner, adb) = setup();
        runner.respond(
            &key("ip route get 8.8.8.8"),
            CommandOutput::ok("8.8.8.8 dev wlan0 src 192.168.1.42\n"),
        );
        let legacy = AddressResolver::for_mode(ResolverMode::Legacy, DEFAULT_ROUTE_ANCHOR, Duration::ZERO);

        assert_eq!(legacy.strategy_names(), vec!["fixed-interface"]);
        assert_eq!(legacy.resolve(&adb, SERIAL), None);
        assert_eq!(runner.call_count(&key("ip route get 8.8.8.8")), 0);
        assert_eq!(runner.call_count(&key("ip -o -4 addr show dev wlan0")), 2);
    }

    #[test]
    fn test_custom_strategy_is_appended() {
        struct Constant;
        impl AddressStrategy for Constant {
            fn name(&self) -> &'static str {
                "constant"
            }
            fn resolve(&self, _: &DeviceControl, _: &str) -> Option<Ipv4Addr> {
                Some(Ipv4Addr::new(10, 1, 2, 3))
            }
        }

        let (_, adb) = setup();
        let resolver = resolver().with_strategy(Box::new(Constant));
        assert_eq!(
            resolver.strategy_names(),
            vec!["route-probe", "interface-scan", "property-scan", "constant"]
        );
        assert_eq!(resolver.resolve(&adb, SERIAL), Some(Ipv4Addr::new(10, 1, 2, 3)));
    }
}
