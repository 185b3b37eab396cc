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
//! The minimal topology surface consumed by `RouteInfo::resolve` (spec.md
//! §4.C): a `Link` connects `NetworkInterface`s, each owned by a `Host`.
//! Building a full topology from DML `Net`/`Host`/`link` attributes is the
//! lifecycle's "construct graph" step (spec.md §3); this module only
//! carries the shape that resolution needs, not a DML→topology compiler.

use super::nhi::{Nhi, NhiType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(pub u32);

/// One interface of a `Host`: an id local to the host, an IPv4 address, and
/// the `Link` it attaches to (if any — a host may have unattached stub
/// interfaces during incremental configuration).
#[derive(Debug, Clone)]
pub struct NetworkInterface {
    pub id: u32,
    pub ip: u32,
    pub link: Option<LinkId>,
    /// NHI naming this interface, e.g. `0:1(2)`; used to resolve route
    /// destinations given as an NHI string rather than a dotted CIDR.
    pub nhi: Option<Nhi>,
}

/// Connects >=2 interfaces across hosts; carries the link-level delay and
/// IP prefix spec.md §3 names.
#[derive(Debug, Clone)]
pub struct Link {
    pub id: LinkId,
    /// `(host, interface id)` pairs attached to this link, in attach order.
    pub endpoints: Vec<(HostId, u32)>,
    pub min_delay: u32,
    pub propagation_delay: u32,
}

/// The host-level RNG spec.md §3 names (`Host`'s "per-host RNG"): shared by
/// every session on the host that doesn't ask for its own, matching
/// `protocol_session.cc`'s `inHost()->getHostSeed() == 0` case where a
/// session borrows `inHost()->getRandom()` instead of constructing its own.
#[derive(Debug, Clone)]
pub struct Host {
    pub id: HostId,
    pub nhi: Nhi,
    pub interfaces: Vec<NetworkInterface>,
    rng: std::cell::RefCell<rand::rngs::StdRng>,
}

impl Host {
    pub fn new(id: HostId, nhi: Nhi, interfaces: Vec<NetworkInterface>, seed: u64) -> Self {
        use rand::SeedableRng;
        Self {
            id,
            nhi,
            interfaces,
            rng: std::cell::RefCell::new(rand::rngs::StdRng::seed_from_u64(seed)),
        }
    }

    pub fn get_network_interface(&self, iface_id: u32) -> Option<&NetworkInterface> {
        self.interfaces.iter().find(|i| i.id == iface_id)
    }

    /// Draw the next value from this host's shared RNG, the way a session
    /// with no seed of its own calls `inHost()->getRandom()`.
    pub fn next_random(&self) -> u64 {
        use rand::RngCore;
        self.rng.borrow_mut().next_u64()
    }
}

/// The read-only topology view `RouteInfo::resolve` needs: enough to find a
/// host's interfaces and a link's other endpoints.
pub struct Topology {
    pub hosts: Vec<Host>,
    pub links: Vec<Link>,
}

impl Topology {
    pub fn host(&self, id: HostId) -> Option<&Host> {
        self.hosts.iter().find(|h| h.id == id)
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.iter().find(|l| l.id == id)
    }

    /// The IP address of the peer endpoint on `link` that is not `(host,
    /// iface)`, used when a route spec omits `next_hop` (spec.md §4.C).
    pub fn peer_ip(&self, link: LinkId, host: HostId, iface: u32) -> Option<u32> {
        let link = self.link(link)?;
        let (peer_host, peer_iface) = link
            .endpoints
            .iter()
            .copied()
            .find(|&(h, i)| !(h == host && i == iface))?;
        self.host(peer_host)?
            .get_network_interface(peer_iface)
            .map(|i| i.ip)
    }

    /// Find the `(host, interface)` named by an interface NHI, searched
    /// first relative to `parent` (if given) then as an absolute path —
    /// the same two-step fallback spec.md §4.C's route-spec resolution
    /// uses for NHI-based destinations and next hops.
    pub fn find_by_nhi(&self, nhi: &Nhi, parent: Option<&Nhi>) -> Option<(HostId, u32)> {
        if nhi.ty() != NhiType::Interface {
            return None;
        }
        let relative = parent.map(|p| {
            let mut n = nhi.clone();
            n.set_relative_to(p);
            n
        });
        for host in &self.hosts {
            for iface in &host.interfaces {
                let Some(iface_nhi) = &iface.nhi else {
                    continue;
                };
                if iface_nhi == nhi || relative.as_ref().is_some_and(|r| iface_nhi == r) {
                    return Some((host.id, iface.id));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rng_is_deterministic_per_seed() {
        let a = Host::new(HostId(0), Nhi::parse("0", NhiType::Machine).unwrap(), Vec::new(), 42);
        let b = Host::new(HostId(0), Nhi::parse("0", NhiType::Machine).unwrap(), Vec::new(), 42);
        assert_eq!(a.next_random(), b.next_random());
    }

    #[test]
    fn different_hosts_draw_independently() {
        let host = Host::new(HostId(0), Nhi::parse("0", NhiType::Machine).unwrap(), Vec::new(), 1);
        let first = host.next_random();
        let second = host.next_random();
        assert_ne!(first, second, "successive draws from the same host advance the RNG state");
    }
}
