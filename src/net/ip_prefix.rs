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
//! IPv4 prefix arithmetic: `(addr, len)` plus the 33-entry mask lookup
//! table, ported from `net/ip_prefix.cc`.

use std::fmt;

use thiserror::Error;

const MASKS: [u32; 33] = build_masks();

const fn build_masks() -> [u32; 33] {
    let mut masks = [0u32; 33];
    let mut len = 1;
    while len <= 32 {
        masks[len] = (!0u32) << (32 - len);
        len += 1;
    }
    masks
}

fn mask(len: u8) -> u32 {
    MASKS[len as usize]
}

#[derive(Debug, Error)]
pub enum IpPrefixError {
    #[error("invalid IPv4 prefix literal '{0}'")]
    InvalidLiteral(String),
    #[error("prefix length {0} out of range 0..=32")]
    InvalidLength(u8),
}

/// `(addr: u32, len: 0..=32)`. Contains another prefix/address iff
/// `(other XOR self.addr) & mask(self.len) == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IpPrefix {
    addr: u32,
    len: u8,
}

impl IpPrefix {
    pub fn new(addr: u32, len: u8) -> Result<Self, IpPrefixError> {
        if len > 32 {
            return Err(IpPrefixError::InvalidLength(len));
        }
        Ok(Self {
            addr: addr & mask(len),
            len,
        })
    }

    pub const fn default_route() -> Self {
        Self { addr: 0, len: 0 }
    }

    pub fn addr(&self) -> u32 {
        self.addr
    }

    pub fn len(&self) -> u8 {
        self.len
    }

    /// `txt2ip`: accepts `a.b.c.d[/n]`; `n` defaults to 32 when omitted.
    pub fn parse(s: &str) -> Result<Self, IpPrefixError> {
        let (addr_part, len_part) = match s.split_once('/') {
            Some((a, l)) => (a, Some(l)),
            None => (s, None),
        };
        let addr = parse_ipv4(addr_part).ok_or_else(|| IpPrefixError::InvalidLiteral(s.to_string()))?;
        let len = match len_part {
            Some(l) => l
                .parse::<u8>()
                .map_err(|_| IpPrefixError::InvalidLiteral(s.to_string()))?,
            None => 32,
        };
        IpPrefix::new(addr, len)
    }

    /// `ip2txt` equivalent: renders `a.b.c.d/n`, or just `a.b.c.d` for a
    /// host address (`len == 32`).
    pub fn display_addr(addr: u32) -> String {
        format!(
            "{}.{}.{}.{}",
            (addr >> 24) & 0xff,
            (addr >> 16) & 0xff,
            (addr >> 8) & 0xff,
            addr & 0xff
        )
    }

    pub fn contains_addr(&self, addr: u32) -> bool {
        (addr ^ self.addr) & mask(self.len) == 0
    }

    pub fn contains(&self, other: &IpPrefix) -> bool {
        other.len >= self.len && self.contains_addr(other.addr)
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.len == 32 {
            write!(f, "{}", Self::display_addr(self.addr))
        } else {
            write!(f, "{}/{}", Self::display_addr(self.addr), self.len)
        }
    }
}

fn parse_ipv4(s: &str) -> Option<u32> {
    let mut parts = s.split('.');
    let mut out: u32 = 0;
    for _ in 0..4 {
        let octet: u32 = parts.next()?.parse().ok()?;
        if octet > 255 {
            return None;
        }
        out = (out << 8) | octet;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Invariant 1: prefix containment.
    #[test]
    fn prefix_containment() {
        let p = IpPrefix::parse("10.0.0.0/8").unwrap();
        assert!(p.contains_addr(parse_ipv4("10.1.2.3").unwrap()));
        assert!(!p.contains_addr(parse_ipv4("11.0.0.0").unwrap()));

        let narrower = IpPrefix::parse("10.0.0.0/16").unwrap();
        assert!(p.contains(&narrower));
        assert!(!narrower.contains(&p));
    }

    #[test]
    fn parse_round_trip() {
        let p = IpPrefix::parse("192.168.1.0/24").unwrap();
        assert_eq!(p.to_string(), "192.168.1.0/24");
        let host = IpPrefix::parse("192.168.1.5").unwrap();
        assert_eq!(host.to_string(), "192.168.1.5");
    }

    #[test]
    fn default_route_contains_everything() {
        let d = IpPrefix::default_route();
        assert!(d.contains_addr(0xffff_ffff));
        assert!(d.contains_addr(0));
    }
}
