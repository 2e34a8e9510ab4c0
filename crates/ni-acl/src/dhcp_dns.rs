//! Renders the generated DHCP-server and DNS-forwarder config files for a
//! Local NI's bridge (spec §4.E "a DHCP-server config file", "a
//! DNS-forwarder config file"). Both daemons are dnsmasq-compatible, so
//! the generated syntax targets that.

use crate::types::{DhcpConfigValue, DnsConfigValue};

pub fn render_dhcp_config(config: &DhcpConfigValue) -> String {
    let mut out = String::new();
    out.push_str(&format!("# generated for network instance {}\n", config.ni_uuid));
    out.push_str(&format!("interface={}\n", config.bridge_name));
    out.push_str("bind-interfaces\n");
    out.push_str(&format!(
        "dhcp-range={},{},{}\n",
        config.range_start, config.range_end, config.lease_time_secs
    ));
    out.push_str(&format!("dhcp-option=option:router,{}\n", config.gateway));
    out
}

pub fn render_dns_config(config: &DnsConfigValue) -> String {
    let mut out = String::new();
    out.push_str(&format!("# generated for network instance {}\n", config.ni_uuid));
    out.push_str(&format!("interface={}\n", config.bridge_name));
    out.push_str("bind-interfaces\n");
    out.push_str("no-resolv\n");
    for server in &config.upstream_servers {
        out.push_str(&format!("server={server}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    #[test]
    fn dhcp_config_renders_range_and_gateway() {
        let cfg = DhcpConfigValue {
            ni_uuid: "ni-1".into(),
            bridge_name: "bn1".into(),
            range_start: "10.1.0.10".parse::<IpAddr>().unwrap(),
            range_end: "10.1.0.250".parse::<IpAddr>().unwrap(),
            gateway: "10.1.0.1".parse::<IpAddr>().unwrap(),
            lease_time_secs: 3600,
        };
        let rendered = render_dhcp_config(&cfg);
        assert!(rendered.contains("interface=bn1"));
        assert!(rendered.contains("dhcp-range=10.1.0.10,10.1.0.250,3600"));
        assert!(rendered.contains("dhcp-option=option:router,10.1.0.1"));
    }

    #[test]
    fn dns_config_renders_one_server_line_per_upstream() {
        let cfg = DnsConfigValue {
            ni_uuid: "ni-1".into(),
            bridge_name: "bn1".into(),
            upstream_servers: vec!["8.8.8.8".parse().unwrap(), "1.1.1.1".parse().unwrap()],
        };
        let rendered = render_dns_config(&cfg);
        assert!(rendered.contains("server=8.8.8.8"));
        assert!(rendered.contains("server=1.1.1.1"));
    }
}
