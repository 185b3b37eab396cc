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
//! Route caches sitting in front of the trie, ported from
//! `route_caches/route_cache{0,1,2}.cc`. Every variant must be invalidated
//! by the owning `ForwardingTable` on any trie mutation (spec.md §4.C).

/// `ROUTE_CACHE_SIZE` shared by the direct-mapped and set-associative
/// variants (`route_cache1.cc`/`route_cache2.cc`).
const ROUTE_CACHE_SIZE: usize = 256;
const ASSOCIATIVITY: usize = 2;
const INDEX_MASK: u32 = 0x7F;

#[derive(Debug, Clone)]
struct Slot<T> {
    valid: bool,
    addr: u32,
    route: Option<T>,
}

impl<T> Slot<T> {
    fn empty() -> Self {
        Self {
            valid: false,
            addr: 0,
            route: None,
        }
    }
}

/// Pluggable cache in front of a `BinaryTrie`. `None` disables caching
/// entirely (every lookup misses); the other variants trade lookup cost for
/// differing collision behavior, exactly as named in spec.md §4.C.
#[derive(Debug, Clone)]
pub enum RouteCache<T> {
    /// No caching: `lookup` always misses, `update` is a no-op.
    None,
    /// Holds exactly one `(addr, route)` pair (`route_cache0.cc`).
    Single(Option<(u32, T)>),
    /// `route_cache1.cc`: index = last byte of the address; a miss or
    /// collision simply overwrites that slot.
    DirectMapped(Vec<Slot<T>>),
    /// `route_cache2.cc`: 128 ways * 2-way associativity, with a pseudo-LFU
    /// eviction counter per slot and a remembered eviction target per way.
    SetAssociative {
        slots: Vec<[Slot<T>; ASSOCIATIVITY]>,
        ctr: Vec<[u8; ASSOCIATIVITY]>,
        evictor: Vec<u8>,
    },
}

impl<T: Clone> RouteCache<T> {
    pub fn none() -> Self {
        RouteCache::None
    }

    pub fn single() -> Self {
        RouteCache::Single(None)
    }

    pub fn direct_mapped() -> Self {
        RouteCache::DirectMapped((0..ROUTE_CACHE_SIZE).map(|_| Slot::empty()).collect())
    }

    pub fn set_associative() -> Self {
        let ways = ROUTE_CACHE_SIZE / ASSOCIATIVITY;
        RouteCache::SetAssociative {
            slots: (0..ways).map(|_| [Slot::empty(), Slot::empty()]).collect(),
            ctr: vec![[0u8; ASSOCIATIVITY]; ways],
            evictor: vec![0u8; ways],
        }
    }

    pub fn lookup(&self, addr: u32) -> Option<&T> {
        match self {
            RouteCache::None => None,
            RouteCache::Single(entry) => entry
                .as_ref()
                .filter(|(a, _)| *a == addr)
                .map(|(_, r)| r),
            RouteCache::DirectMapped(slots) => {
                let idx = (addr & 0xFF) as usize;
                let slot = &slots[idx];
                if slot.valid && slot.addr == addr {
                    slot.route.as_ref()
                } else {
                    None
                }
            }
            RouteCache::SetAssociative { slots, .. } => {
                let way = (addr & INDEX_MASK) as usize;
                slots[way]
                    .iter()
                    .find(|s| s.valid && s.addr == addr)
                    .and_then(|s| s.route.as_ref())
            }
        }
    }

    pub fn update(&mut self, addr: u32, route: T) {
        match self {
            RouteCache::None => {}
            RouteCache::Single(entry) => *entry = Some((addr, route)),
            RouteCache::DirectMapped(slots) => {
                let idx = (addr & 0xFF) as usize;
                slots[idx] = Slot {
                    valid: true,
                    addr,
                    route: Some(route),
                };
            }
            RouteCache::SetAssociative {
                slots,
                ctr,
                evictor,
            } => {
                let way = (addr & INDEX_MASK) as usize;
                // Recompute the eviction target: first invalid slot, else
                // the slot with the lower counter (route_cache2.cc).
                let target = if let Some((i, _)) = slots[way]
                    .iter()
                    .enumerate()
                    .find(|(_, s)| !s.valid)
                {
                    i
                } else if ctr[way][0] <= ctr[way][1] {
                    0
                } else {
                    1
                };
                evictor[way] = target as u8;
                slots[way][target] = Slot {
                    valid: true,
                    addr,
                    route: Some(route),
                };
                ctr[way][target] = 0;
            }
        }
    }

    /// Drops all entries. The set-associative variant leaves `evictor`
    /// untouched, matching the original: only `valid` is load-bearing.
    pub fn invalidate(&mut self) {
        match self {
            RouteCache::None => {}
            RouteCache::Single(entry) => *entry = None,
            RouteCache::DirectMapped(slots) => {
                for s in slots.iter_mut() {
                    s.valid = false;
                }
            }
            RouteCache::SetAssociative { slots, .. } => {
                for way in slots.iter_mut() {
                    for s in way.iter_mut() {
                        s.valid = false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_entry_holds_one() {
        let mut cache = RouteCache::single();
        cache.update(1, "a");
        assert_eq!(cache.lookup(1), Some(&"a"));
        cache.update(2, "b");
        assert_eq!(cache.lookup(1), None);
        assert_eq!(cache.lookup(2), Some(&"b"));
    }

    #[test]
    fn direct_mapped_collision_overwrites() {
        let mut cache = RouteCache::direct_mapped();
        cache.update(0x0000_0001, "a");
        cache.update(0x0100_0001, "b"); // same last byte, different address
        assert_eq!(cache.lookup(0x0000_0001), None);
        assert_eq!(cache.lookup(0x0100_0001), Some(&"b"));
    }

    #[test]
    fn set_associative_two_way() {
        let mut cache = RouteCache::set_associative();
        let a = 0x0000_0000u32; // way 0
        let b = 0x0000_0080u32; // same way (bit 7+ differs, masked by INDEX_MASK)
        cache.update(a, "a");
        cache.update(b, "b");
        assert_eq!(cache.lookup(a), Some(&"a"));
        assert_eq!(cache.lookup(b), Some(&"b"));
    }

    #[test]
    fn invalidate_clears_all_variants() {
        let mut cache = RouteCache::direct_mapped();
        cache.update(5, "x");
        cache.invalidate();
        assert_eq!(cache.lookup(5), None);
    }
}
