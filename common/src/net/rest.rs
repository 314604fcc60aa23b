use std::net::Ipv4Addr;

pub(crate) fn ipv4_addresses() -> Vec<Ipv4Addr> {
    let mut addrs = Vec::new();
    for iface in pnet_datalink::interfaces() {
        if !iface.is_up() {
            continue;
        }
        for ip in iface.ips {
            if let ipnetwork::IpNetwork::V4(v4) = ip {
                addrs.push(v4.ip());
            }
        }
    }
    addrs
}
