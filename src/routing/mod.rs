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
//! Longest-prefix-match forwarding: a `BinaryTrie` plus an optional
//! `RouteCache`, and `RouteInfo::resolve` for turning a DML route spec into
//! a concrete route, ported from `forwardingtable.cc`.

pub mod route_cache;
pub mod trie;

use thiserror::Error;

use crate::net::{
    host::{HostId, Topology},
    ip_prefix::IpPrefix,
    nhi::{Nhi, NhiError, NhiType},
};
use route_cache::RouteCache;
use trie::{BinaryTrie, TrieVariant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Static,
    Igp,
    Egp,
    Bgp,
    Ospf,
    Pao,
}

/// `(destination, next_hop, nic, cost, protocol)`. Two routes are
/// equivalent iff all fields except `cost` are equal (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct RouteInfo {
    pub destination: IpPrefix,
    pub next_hop: u32,
    pub nic: (HostId, u32),
    pub cost: u32,
    pub protocol: Protocol,
}

impl RouteInfo {
    pub fn equiv(&self, other: &RouteInfo) -> bool {
        self.destination == other.destination
            && self.next_hop == other.next_hop
            && self.nic == other.nic
            && self.protocol == other.protocol
    }
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("route destination '{0}' does not resolve to a prefix, NHI, or 'default'")]
    BadDestination(String),
    #[error("host has no network interface {0}")]
    NoSuchInterface(u32),
    #[error("next hop unspecified and link {0:?} does not have exactly two endpoints")]
    AmbiguousNextHop(crate::net::host::LinkId),
    #[error("next hop '{0}' is not an endpoint of the outgoing interface's link")]
    NextHopNotOnLink(String),
    #[error("outgoing interface is not attached to any link")]
    InterfaceUnattached,
    #[error("nhi error resolving route: {0}")]
    Nhi(#[from] NhiError),
}

/// A DML route attribute, unresolved (spec.md §6 `route[...]`). `dest` may
/// be `"default"`, a dotted CIDR, or an NHI path (`RouteSpecKind` folds both
/// string forms into one resolution path rather than a separate module, per
/// SPEC_FULL.md's §3 supplement).
#[derive(Debug, Clone)]
pub struct RouteSpec {
    pub dest: String,
    pub iface_id: u32,
    pub next_hop: Option<String>,
    pub cost: Option<u32>,
    pub protocol: Option<Protocol>,
}

impl RouteInfo {
    /// Resolve a `RouteSpec` against `host` (by id) within `topology`,
    /// exactly as `forwardingtable.cc`'s `RouteInfo::resolve` does.
    pub fn resolve(
        spec: &RouteSpec,
        host_id: HostId,
        host_parent_nhi: Option<&Nhi>,
        topology: &Topology,
    ) -> Result<RouteInfo, RouteError> {
        let host = topology
            .host(host_id)
            .expect("caller passes a valid host id");
        let nic = host
            .get_network_interface(spec.iface_id)
            .ok_or(RouteError::NoSuchInterface(spec.iface_id))?;

        let destination = if spec.dest.eq_ignore_ascii_case("default") {
            IpPrefix::default_route()
        } else if let Ok(p) = IpPrefix::parse(&spec.dest) {
            p
        } else {
            let nhi = Nhi::parse(&spec.dest, NhiType::Interface)?;
            let (h, i) = topology
                .find_by_nhi(&nhi, host_parent_nhi)
                .ok_or_else(|| RouteError::BadDestination(spec.dest.clone()))?;
            let ip = topology
                .host(h)
                .and_then(|h| h.get_network_interface(i))
                .map(|i| i.ip)
                .ok_or_else(|| RouteError::BadDestination(spec.dest.clone()))?;
            IpPrefix::new(ip, 32).map_err(|_| RouteError::BadDestination(spec.dest.clone()))?
        };

        let link_id = nic.link.ok_or(RouteError::InterfaceUnattached)?;
        let link = topology
            .link(link_id)
            .expect("interface names a link id that exists in the topology");

        let next_hop = match &spec.next_hop {
            None => {
                if link.endpoints.len() != 2 {
                    return Err(RouteError::AmbiguousNextHop(link_id));
                }
                topology
                    .peer_ip(link_id, host_id, spec.iface_id)
                    .ok_or(RouteError::InterfaceUnattached)?
            }
            Some(nh) if nh == &IpPrefix::display_addr(nic.ip) => {
                // Next hop names the local interface itself: treat as
                // unspecified, same fallback as the `None` arm above.
                if link.endpoints.len() != 2 {
                    return Err(RouteError::AmbiguousNextHop(link_id));
                }
                topology
                    .peer_ip(link_id, host_id, spec.iface_id)
                    .ok_or(RouteError::InterfaceUnattached)?
            }
            Some(nh) => {
                let ip = if let Ok(addr) = IpPrefix::parse(nh).map(|p| p.addr()) {
                    addr
                } else {
                    let nhi = Nhi::parse(nh, NhiType::Interface)?;
                    let (h, i) = topology
                        .find_by_nhi(&nhi, host_parent_nhi)
                        .ok_or_else(|| RouteError::NextHopNotOnLink(nh.clone()))?;
                    topology
                        .host(h)
                        .and_then(|h| h.get_network_interface(i))
                        .map(|i| i.ip)
                        .ok_or_else(|| RouteError::NextHopNotOnLink(nh.clone()))?
                };
                let is_endpoint = link.endpoints.iter().any(|&(h, i)| {
                    topology
                        .host(h)
                        .and_then(|h| h.get_network_interface(i))
                        .is_some_and(|iface| iface.ip == ip)
                });
                if !is_endpoint {
                    return Err(RouteError::NextHopNotOnLink(nh.clone()));
                }
                ip
            }
        };

        Ok(RouteInfo {
            destination,
            next_hop,
            nic: (host_id, spec.iface_id),
            cost: spec.cost.unwrap_or(0),
            protocol: spec.protocol.unwrap_or(Protocol::Static),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Added,
    Overwritten,
    NotReplaced,
    Removed,
    NotFound,
}

/// Event raised by `addRoute`/`removeRoute` so listeners (e.g. the trie's
/// owning protocol session) can react to FIB changes, matching
/// `forwardingtable.cc`'s `DelRoute`/`AddRoute` notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteEvent {
    AddRoute,
    DelRoute,
}

/// Trie + optional cache, dispatching on `(TrieVariant, CacheVariant)` with
/// "SIMPLE"/"SINGLE_ENTRY" as the compiled-in defaults (spec.md §4.C).
#[derive(Debug, Clone)]
pub struct ForwardingTable {
    trie: BinaryTrie<RouteInfo>,
    cache: RouteCache<RouteInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheVariant {
    None,
    Single,
    DirectMapped,
    SetAssociative,
}

impl ForwardingTable {
    pub fn new(trie_variant: TrieVariant, cache_variant: CacheVariant) -> Self {
        Self {
            trie: BinaryTrie::new(trie_variant),
            cache: match cache_variant {
                CacheVariant::None => RouteCache::none(),
                CacheVariant::Single => RouteCache::single(),
                CacheVariant::DirectMapped => RouteCache::direct_mapped(),
                CacheVariant::SetAssociative => RouteCache::set_associative(),
            },
        }
    }

    /// The compiled-in default: SIMPLE trie, SINGLE_ENTRY cache.
    pub fn default_variants() -> Self {
        Self::new(TrieVariant::Simple, CacheVariant::Single)
    }

    pub fn size(&self) -> usize {
        self.trie.size()
    }

    /// Cache-then-trie lookup (invariant 2/3): a cache hit short-circuits
    /// the trie walk; a miss falls through to the trie and populates the
    /// cache on the way out.
    pub fn lookup(&mut self, addr: u32) -> Option<&RouteInfo> {
        if self.cache.lookup(addr).is_some() {
            return self.cache.lookup(addr);
        }
        let route = self.trie.lookup(addr)?.clone();
        self.cache.update(addr, route);
        self.cache.lookup(addr)
    }

    pub fn get_default_route(&self) -> Option<&RouteInfo> {
        self.trie.get_default()
    }

    /// `addRoute(route, replace)`: on an exact-match conflict, `replace`
    /// governs overwrite-vs-reject; either way the cache is invalidated. The
    /// returned `Vec<RouteEvent>` is `[DelRoute, AddRoute]` on an overwrite
    /// (matching the original's notification order), `[AddRoute]` on a
    /// fresh insert, and empty when the insert was rejected.
    pub fn add_route(&mut self, route: RouteInfo, replace: bool) -> (RouteOutcome, Vec<RouteEvent>) {
        let bitlen = route.destination.len();
        let key = route.destination.addr();
        match self.trie.insert(key, bitlen, route, replace) {
            Ok(Some(_old)) => {
                self.cache.invalidate();
                (RouteOutcome::Overwritten, vec![RouteEvent::DelRoute, RouteEvent::AddRoute])
            }
            Ok(None) => {
                self.cache.invalidate();
                (RouteOutcome::Added, vec![RouteEvent::AddRoute])
            }
            Err(_rejected) => (RouteOutcome::NotReplaced, Vec::new()),
        }
    }

    /// `removeRoute(route)`: only removes if the stored route equals
    /// `route` exactly (re-inserts the original otherwise); invalidates the
    /// cache either way.
    pub fn remove_route(&mut self, route: &RouteInfo) -> RouteOutcome {
        let bitlen = route.destination.len();
        let key = route.destination.addr();
        match self.trie.remove(key, bitlen) {
            Some(stored) if stored == *route => {
                self.cache.invalidate();
                RouteOutcome::Removed
            }
            Some(stored) => {
                // Wrong route at that prefix: put it back, nothing removed.
                self.trie.insert(key, bitlen, stored, true).ok();
                self.cache.invalidate();
                RouteOutcome::NotFound
            }
            None => RouteOutcome::NotFound,
        }
    }
}
