use crate::adb::DeviceControl;

/// Interface names tried when the device does not list any wireless link.
pub const FALLBACK_INTERFACES: [&str; 2] = ["wlan0", "wlan1"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirelessInterface {
    pub name: String,
    pub up: bool,
}

/// List wireless interfaces on the device, administratively up ones first
pub fn list_wireless_interfaces(adb: &DeviceControl, serial: &str) -> Vec<WirelessInterface> {
    let output = adb.shell(serial, &["ip", "-o", "link", "show"]);
    if !output.success() {
        return Vec::new();
    }
    parse_link_show(&output.stdout)
}

/// Parse `ip -o link show` output, e.g.
/// `3: wlan0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 ... state UP ...`
pub fn parse_link_show(text: &str) -> Vec<WirelessInterface> {
    let mut up = Vec::new();
    let mut down = Vec::new();

    for line in text.lines() {
        let parts: Vec<&str> = line.splitn(3, ':').collect();
        if parts.len() < 3 {
            continue;
        }

        // "wlan0@if3" names the peer after '@'
        let name = parts[1].trim();
        let name = name.split('@').next().unwrap_or(name);
        if !is_wireless(name) {
            continue;
        }

        let iface = WirelessInterface {
            name: name.to_string(),
            up: has_up_flag(parts[2]),
        };
        if iface.up {
            up.push(iface);
        } else {
            down.push(iface);
        }
    }

    up.extend(down);
    up
}

/// Candidate interface names for address probing
pub fn candidate_names(interfaces: &[WirelessInterface]) -> Vec<String> {
    if interfaces.is_empty() {
        return FALLBACK_INTERFACES.iter().map(|s| s.to_string()).collect();
    }
    interfaces.iter().map(|i| i.name.clone()).collect()
}

fn is_wireless(name: &str) -> bool {
    name.starts_with("wlan")
}

fn has_up_flag(rest: &str) -> bool {
    match (rest.find('<'), rest.find('>')) {
        (Some(open), Some(close)) if open < close => {
            rest[open + 1..close].split(',').any(|flag| flag.trim() == "UP")
        }
        _ => rest.contains("state UP"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINKS: &str = "\
1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN mode DEFAULT group default qlen 1000\\    link/loopback 00:00:00:00:00:00 brd 00:00:00:00:00:00
2: wlan1: <BROADCAST,MULTICAST> mtu 1500 qdisc noop state DOWN mode DEFAULT group default qlen 3000\\    link/ether 2c:26:17:aa:bb:cc brd ff:ff:ff:ff:ff:ff
3: wlan0: <NO-CARRIER,BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc mq state UP mode DORMANT group default qlen 3000\\    link/ether 2c:26:17:aa:bb:cd brd ff:ff:ff:ff:ff:ff
4: rmnet0@if2: <UP> mtu 1500
5: p2p0: <BROADCAST,MULTICAST,UP> mtu 1500
";

    #[test]
    fn test_up_interfaces_come_first() {
        let ifaces = parse_link_show(LINKS);
        assert_eq!(
            ifaces,
            vec![
                WirelessInterface { name: "wlan0".into(), up: true },
                WirelessInterface { name: "wlan1".into(), up: false },
            ]
        );
    }

    #[test]
    fn test_lower_up_alone_is_not_up() {
        let ifaces = parse_link_show("7: wlan2: <BROADCAST,LOWER_UP> mtu 1500\n");
        assert_eq!(ifaces.len(), 1);
        assert!(!ifaces[0].up);
    }

    #[test]
    fn test_peer_suffix_is_stripped() {
        let ifaces = parse_link_show("9: wlan0@if3: <UP> mtu 1500\n");
        assert_eq!(ifaces[0].name, "wlan0");
    }

    #[test]
    fn test_fallback_names_when_nothing_listed() {
        assert_eq!(candidate_names(&parse_link_show("")), vec!["wlan0", "wlan1"]);
        assert_eq!(candidate_names(&parse_link_show(LINKS)), vec!["wlan0", "wlan1"]);
        let only_up = parse_link_show("3: wlan1: <UP> mtu 1500\n");
        assert_eq!(candidate_names(&only_up), vec!["wlan1"]);
    }
}
