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
//! Arena-indexed DML tree node, re-expressing the original's
//! reference-counted nodes with raw parent back-pointers as stable
//! `NodeId` indices into a `ConfigContext`-owned arena (spec.md §9).

use super::error::Location;

/// Index into `ConfigContext::nodes`. Stable for the lifetime of the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    List,
    String,
}

/// Reserved keys plus the general case of an arbitrary identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    Root,
    Extends,
    Find,
    Schema,
    Ident(u32), // interned string id, see ConfigContext::dictionary
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeValue {
    /// `List` nodes hold an ordered sequence of child `NodeId`s.
    Children(Vec<NodeId>),
    /// `String` nodes hold an interned string id.
    String(u32),
}

#[derive(Debug, Clone)]
pub struct ConfigNode {
    pub kind: NodeKind,
    pub key: NodeKey,
    pub value: NodeValue,
    pub parent: Option<NodeId>,
    /// Resolved target of an `Extends`/`Find` string node, set by the
    /// expansion pass. `None` for nodes that are not references or have not
    /// yet been expanded.
    pub expansion_link: Option<NodeId>,
    pub location: Location,
    /// Cycle-detection flag set while a traversal is currently descending
    /// through this node's `expansion_link` (spec.md §4.A expansion
    /// algorithm); cleared on the way back out.
    pub expanding: bool,
}

impl ConfigNode {
    pub fn children(&self) -> &[NodeId] {
        match &self.value {
            NodeValue::Children(c) => c,
            NodeValue::String(_) => &[],
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, NodeKind::List)
    }
}
