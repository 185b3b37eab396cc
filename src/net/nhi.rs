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
//! Network/Host/Interface hierarchical identifier, ported from
//! `net_old/nhi.h` and `net/nhi.cc`.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NhiType {
    Interface,
    Machine,
    Net,
    Invalid,
}

#[derive(Debug, Error)]
pub enum NhiError {
    #[error("'{0}' does not parse as an NHI of the requested type")]
    TypeMismatch(String),
    #[error("empty NHI id sequence")]
    Empty,
    #[error("nhi_range endpoints are not in the same subnet")]
    RangeSubnetMismatch,
    #[error("nhi_range endpoints must both be of interface type")]
    RangeNotInterface,
}

/// Ordered sequence of ids `[net0, net1, ..., host(, iface)]` with a type
/// tag. `start` offsets the slice used for comparisons/printing so the same
/// backing `ids` vector can represent both a relative and an absolute view
/// (`set_relative_to`).
#[derive(Debug, Clone)]
pub struct Nhi {
    ids: Vec<i64>,
    start: usize,
    ty: NhiType,
}

impl Nhi {
    pub fn ty(&self) -> NhiType {
        self.ty
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids[self.start..]
    }

    /// `convert`: parse a colon-separated id path, detecting a trailing
    /// `(d)` interface-id suffix. Fails if the detected type doesn't match
    /// `want`.
    pub fn parse(s: &str, want: NhiType) -> Result<Self, NhiError> {
        let (path, iface) = match s.find('(') {
            Some(paren) => {
                let close = s.find(')').filter(|&c| c > paren).ok_or(NhiError::TypeMismatch(s.to_string()))?;
                let iface: i64 = s[paren + 1..close]
                    .parse()
                    .map_err(|_| NhiError::TypeMismatch(s.to_string()))?;
                (&s[..paren], Some(iface))
            }
            None => (s, None),
        };

        let mut ids: Vec<i64> = path
            .split(':')
            .map(|seg| seg.parse::<i64>())
            .collect::<Result<_, _>>()
            .map_err(|_| NhiError::TypeMismatch(s.to_string()))?;
        if ids.is_empty() {
            return Err(NhiError::Empty);
        }

        let ty = if let Some(iface) = iface {
            ids.push(iface);
            NhiType::Interface
        } else {
            // Net vs. Machine is not distinguishable from the string alone
            // in the original either; it is carried by the caller's
            // expected type, same as `convert`'s `type & ntype` check.
            want
        };

        if ty != want {
            return Err(NhiError::TypeMismatch(s.to_string()));
        }
        if iface.is_some() && want != NhiType::Interface {
            return Err(NhiError::TypeMismatch(s.to_string()));
        }

        Ok(Nhi { ids, start: 0, ty })
    }

    /// `toString`: all but the last `minlength` ids joined by `:`, then the
    /// final segment(s) formatted per type.
    pub fn to_nhi_string(&self) -> String {
        if self.ty == NhiType::Invalid {
            return "NHI_INVALID".to_string();
        }
        let ids = self.ids();
        let minlength = if self.ty == NhiType::Interface { 2 } else { 1 };
        let split = ids.len().saturating_sub(minlength);
        let prefix = ids[..split]
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(":");
        let tail = match self.ty {
            NhiType::Interface => {
                let machine = ids[ids.len() - 2];
                let iface = ids[ids.len() - 1];
                format!("{machine}({iface})")
            }
            _ => ids[ids.len() - 1].to_string(),
        };
        if prefix.is_empty() {
            tail
        } else {
            format!("{prefix}:{tail}")
        }
    }

    /// `NHI::contains`: prefix check over the id sequence.
    pub fn contains(&self, other: &Nhi) -> bool {
        let a = self.ids();
        let b = other.ids();
        a.len() <= b.len() && a == &b[..a.len()]
    }

    /// Reinterpret this NHI relative to `parent`: sets `start` so that the
    /// comparable slice begins after `parent`'s ids.
    pub fn set_relative_to(&mut self, parent: &Nhi) {
        self.start = parent.ids().len();
    }

    /// `readNhiRange`: parses `[from A:B(i) to A:C(i)]` (already split into
    /// `from`/`to` strings by the DML route-spec reader) and yields one
    /// `Nhi` per machine id in `[B..=C]`.
    pub fn nhi_range(from: &str, to: &str) -> Result<Vec<Nhi>, NhiError> {
        let from = Nhi::parse(from, NhiType::Interface)?;
        let to = Nhi::parse(to, NhiType::Interface)?;
        if from.ty != NhiType::Interface || to.ty != NhiType::Interface {
            return Err(NhiError::RangeNotInterface);
        }
        let n = from.ids.len();
        if n != to.ids.len() || from.ids[..n - 2] != to.ids[..n - 2] {
            return Err(NhiError::RangeSubnetMismatch);
        }
        let lo = from.ids[n - 2];
        let hi = to.ids[n - 2];
        let mut out = Vec::new();
        for machine in lo..=hi {
            let mut ids = from.ids.clone();
            ids[n - 2] = machine;
            out.push(Nhi {
                ids,
                start: 0,
                ty: NhiType::Interface,
            });
        }
        Ok(out)
    }
}

impl PartialEq for Nhi {
    fn eq(&self, other: &Self) -> bool {
        self.ids() == other.ids()
    }
}
impl Eq for Nhi {}

impl fmt::Display for Nhi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_nhi_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_machine() {
        let nhi = Nhi::parse("0:1", NhiType::Machine).unwrap();
        assert_eq!(nhi.ids(), &[0, 1]);
        assert_eq!(nhi.to_nhi_string(), "0:1");
    }

    #[test]
    fn parse_interface() {
        let nhi = Nhi::parse("0:1(2)", NhiType::Interface).unwrap();
        assert_eq!(nhi.ids(), &[0, 1, 2]);
        assert_eq!(nhi.to_nhi_string(), "0:1(2)");
    }

    #[test]
    fn relative_absolute_equality() {
        let parent = Nhi::parse("0", NhiType::Net).unwrap();
        let mut child = Nhi::parse("0:1", NhiType::Machine).unwrap();
        child.set_relative_to(&parent);
        let relative = Nhi::parse("1", NhiType::Machine).unwrap();
        assert_eq!(child, relative);
    }

    #[test]
    fn range_yields_one_per_machine() {
        let range = Nhi::nhi_range("0:1(2)", "0:3(2)").unwrap();
        assert_eq!(range.len(), 3);
        assert_eq!(range[0].ids(), &[0, 1, 2]);
        assert_eq!(range[2].ids(), &[0, 3, 2]);
    }
}
