// S3F-RS: a hybrid network emulation/simulation runtime
// Copyright (C) 2024-2025 Roland Schmid <roschmi@ethz.ch> and Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! End to end: a DML route attribute resolves against a hand-wired
//! two-host topology and lands in a `ForwardingTable` lookup, the shape
//! spec.md §2's data flow describes (config -> graph -> routes -> FIB).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::ConfigContext;
use crate::net::host::{Host, HostId, Link, LinkId, NetworkInterface, Topology};
use crate::net::nhi::{Nhi, NhiType};
use crate::routing::{CacheVariant, ForwardingTable, Protocol, RouteInfo, RouteSpec};
use crate::routing::trie::TrieVariant;

struct TempDml {
    path: std::path::PathBuf,
}

impl TempDml {
    fn new(text: &str) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut path = std::env::temp_dir();
        path.push(format!("s3f-rs-pipeline-test-{}-{unique}.dml", std::process::id()));
        std::fs::write(&path, text).unwrap();
        TempDml { path }
    }
}

impl Drop for TempDml {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn two_host_topology() -> Topology {
    let link = Link {
        id: LinkId(0),
        endpoints: vec![(HostId(0), 0), (HostId(1), 0)],
        min_delay: 0,
        propagation_delay: 10,
    };
    let host0 = Host::new(
        HostId(0),
        Nhi::parse("0", NhiType::Machine).unwrap(),
        vec![NetworkInterface {
            id: 0,
            ip: 0x0A000001,
            link: Some(LinkId(0)),
            nhi: Some(Nhi::parse("0(0)", NhiType::Interface).unwrap()),
        }],
        0,
    );
    let host1 = Host::new(
        HostId(1),
        Nhi::parse("1", NhiType::Machine).unwrap(),
        vec![NetworkInterface {
            id: 0,
            ip: 0x0A000002,
            link: Some(LinkId(0)),
            nhi: Some(Nhi::parse("1(0)", NhiType::Interface).unwrap()),
        }],
        1,
    );
    Topology {
        hosts: vec![host0, host1],
        links: vec![link],
    }
}

fn parse_protocol(s: &str) -> Protocol {
    match s.to_ascii_uppercase().as_str() {
        "STATIC" => Protocol::Static,
        "IGP" => Protocol::Igp,
        "EGP" => Protocol::Egp,
        "BGP" => Protocol::Bgp,
        "OSPF" => Protocol::Ospf,
        _ => Protocol::Static,
    }
}

/// A `route[...]` attribute read out of a DML file resolves against the
/// topology and becomes a lookup hit on host 0's forwarding table for any
/// address inside the configured destination prefix.
#[test]
fn dml_route_attribute_resolves_and_installs() {
    let dml = TempDml::new(r#"route [ dest "10.0.0.2/32" nic 0 cost 1 protocol "STATIC" ]"#);
    let mut ctx = ConfigContext::new();
    ctx.load(&[&dml.path]).unwrap();

    let dest = ctx.find_single("route.dest").unwrap();
    let nic: u32 = ctx.find_single("route.nic").unwrap().parse().unwrap();
    let cost: u32 = ctx.find_single("route.cost").unwrap().parse().unwrap();
    let protocol = parse_protocol(&ctx.find_single("route.protocol").unwrap());

    let spec = RouteSpec {
        dest,
        iface_id: nic,
        next_hop: None,
        cost: Some(cost),
        protocol: Some(protocol),
    };

    let topology = two_host_topology();
    let route = RouteInfo::resolve(&spec, HostId(0), None, &topology).unwrap();
    assert_eq!(route.next_hop, 0x0A000002);
    assert_eq!(route.protocol, Protocol::Static);

    let mut table = ForwardingTable::new(TrieVariant::Simple, CacheVariant::Single);
    table.add_route(route, true);
    let looked_up = table.lookup(0x0A000002).unwrap();
    assert_eq!(looked_up.cost, 1);
    assert_eq!(looked_up.nic, (HostId(0), 0));
}

/// A route spec naming the outgoing interface's own address as next hop
/// falls back to the link's peer, same as when `next_hop` is omitted.
#[test]
fn next_hop_naming_local_interface_falls_back_to_peer() {
    let topology = two_host_topology();
    let spec = RouteSpec {
        dest: "10.0.0.2/32".to_string(),
        iface_id: 0,
        next_hop: Some("10.0.0.1".to_string()),
        cost: None,
        protocol: None,
    };
    let route = RouteInfo::resolve(&spec, HostId(0), None, &topology).unwrap();
    assert_eq!(route.next_hop, 0x0A000002);
    assert_eq!(route.cost, 0);
    assert_eq!(route.protocol, Protocol::Static);
}
