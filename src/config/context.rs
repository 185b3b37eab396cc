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
//! `ConfigContext`: the arena, string dictionary, and load/find API for the
//! DML configuration tree (spec.md §4.A). Re-expresses the original's
//! global singletons for the string dictionary and attribute buffer as an
//! explicit context object threaded through load and query calls.

use std::{collections::HashMap, fs, path::Path, rc::Rc};

use super::{
    error::{ConfigError, Location},
    node::{ConfigNode, NodeId, NodeKey, NodeKind, NodeValue},
};

/// Owns every node in the tree plus the string interning dictionary. A
/// thin `load`/`find*` API is the only way callers touch nodes; there is no
/// global/static instance (the original's global singleton is retained
/// only as a convenience alias at an outer binary layer, per spec.md §9).
#[derive(Debug, Default)]
pub struct ConfigContext {
    nodes: Vec<ConfigNode>,
    root: Option<NodeId>,
    dictionary: HashMap<Rc<str>, u32>,
    strings: Vec<Rc<str>>,
    refcounts: Vec<u32>,
}

impl ConfigContext {
    pub fn new() -> Self {
        let mut ctx = Self::default();
        let root_loc = Location {
            file: Rc::from(""),
            line: 0,
            column: 0,
            start_byte: 0,
            end_byte: 0,
        };
        let root = ctx.push_node(ConfigNode {
            kind: NodeKind::List,
            key: NodeKey::Root,
            value: NodeValue::Children(Vec::new()),
            parent: None,
            expansion_link: None,
            location: root_loc,
            expanding: false,
        });
        ctx.root = Some(root);
        ctx
    }

    pub fn root(&self) -> NodeId {
        self.root.expect("ConfigContext::new always creates a root")
    }

    pub fn node(&self, id: NodeId) -> &ConfigNode {
        &self.nodes[id.0 as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut ConfigNode {
        &mut self.nodes[id.0 as usize]
    }

    fn push_node(&mut self, node: ConfigNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Used only by `config::parser` while building a fresh subtree.
    pub(super) fn push_node_for_parser(&mut self, node: ConfigNode) -> NodeId {
        self.push_node(node)
    }

    /// Used only by `config::parser` to fill in a List node's children once
    /// its subtree has finished parsing.
    pub(super) fn set_children_for_parser(&mut self, node: NodeId, children: Vec<NodeId>) {
        self.node_mut(node).value = NodeValue::Children(children);
    }

    /// Interns `s`, bumping its refcount. Returns the string id used by
    /// `NodeKey::Ident`/`NodeValue::String`.
    pub fn intern(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.dictionary.get(s) {
            self.refcounts[id as usize] += 1;
            return id;
        }
        let rc: Rc<str> = Rc::from(s);
        let id = self.strings.len() as u32;
        self.strings.push(rc.clone());
        self.refcounts.push(1);
        self.dictionary.insert(rc, id);
        id
    }

    pub fn resolve(&self, id: u32) -> &str {
        &self.strings[id as usize]
    }

    /// Drops one reference to every string under `node` (recursively);
    /// strings that reach a refcount of zero are reported so the caller
    /// can decide whether that indicates an orphaned file unload. Mirrors
    /// the original dictionary's per-string refcounts; Rust's ownership
    /// already makes this bookkeeping informational rather than load-bearing
    /// for memory safety.
    pub fn release(&mut self, node: NodeId) -> Vec<u32> {
        let mut orphaned = Vec::new();
        self.release_inner(node, &mut orphaned);
        orphaned
    }

    fn release_inner(&mut self, node: NodeId, orphaned: &mut Vec<u32>) {
        let (key_id, val_id, children) = {
            let n = self.node(node);
            let key_id = match n.key {
                NodeKey::Ident(id) => Some(id),
                _ => None,
            };
            let val_id = match n.value {
                NodeValue::String(id) => Some(id),
                _ => None,
            };
            (key_id, val_id, n.children().to_vec())
        };
        for id in [key_id, val_id].into_iter().flatten() {
            if self.refcounts[id as usize] > 0 {
                self.refcounts[id as usize] -= 1;
                if self.refcounts[id as usize] == 0 {
                    orphaned.push(id);
                }
            }
        }
        for child in children {
            self.release_inner(child, orphaned);
        }
    }

    /// `load(files[])`: parse and merge — first-level children of every
    /// file become children of the root.
    pub fn load<P: AsRef<Path>>(&mut self, files: &[P]) -> Result<(), ConfigError> {
        for path in files {
            let path = path.as_ref();
            log::debug!("loading DML file {}", path.display());
            let text = fs::read_to_string(path).map_err(|source| ConfigError::OpenDmlFile {
                path: path.display().to_string(),
                source,
            })?;
            let file: Rc<str> = Rc::from(path.display().to_string());
            let children = super::parser::parse(self, &text, file)?;
            let root = self.root();
            for child in children {
                self.node_mut(child).parent = Some(root);
                match self.node_mut(root).value {
                    NodeValue::Children(ref mut c) => c.push(child),
                    NodeValue::String(_) => unreachable!("root is always a List"),
                }
            }
        }
        self.expand().inspect_err(|e| log::error!("configuration expansion failed: {e}"))?;
        Ok(())
    }

    /// Post-parse expansion: resolve every `Extends`/`Find` string node's
    /// target subtree, then a second pass that detects expansion cycles
    /// via the per-node `expanding` flag (spec.md §4.A).
    fn expand(&mut self) -> Result<(), ConfigError> {
        self.resolve_links(self.root())?;
        let root = self.root();
        self.detect_cycles(root)?;
        Ok(())
    }

    fn resolve_links(&mut self, node: NodeId) -> Result<(), ConfigError> {
        let children = self.node(node).children().to_vec();
        for child in children.clone() {
            let n = self.node(child);
            if matches!(n.key, NodeKey::Extends | NodeKey::Find) {
                let keypath = match n.value {
                    NodeValue::String(sid) => self.resolve(sid).to_string(),
                    NodeValue::Children(_) => {
                        // `_extends`/`_find` must name a keypath string, never
                        // introduce a subtree of their own.
                        let key = if matches!(n.key, NodeKey::Find) { "_find" } else { "_extends" };
                        return Err(ConfigError::IllegalAttributeKey {
                            key: key.into(),
                            location: n.location.clone(),
                        })
                    }
                };
                let is_find = matches!(n.key, NodeKey::Find);
                let parent = n.parent;
                let target = self.resolve_keypath(&keypath, parent, is_find, &n.location)?;
                if !is_find && !self.node(target).is_list() {
                    return Err(ConfigError::NonlistAttachment {
                        keypath,
                        location: self.node(child).location.clone(),
                    });
                }
                self.node_mut(child).expansion_link = Some(target);
            }
        }
        for child in children {
            if self.node(child).is_list() {
                self.resolve_links(child)?;
            }
        }
        Ok(())
    }

    /// Resolve a dotted keypath relative to `from` (falling back to the
    /// root on an absolute, leading-`.` path).
    fn resolve_keypath(
        &self,
        keypath: &str,
        from: Option<NodeId>,
        find_semantics: bool,
        at: &Location,
    ) -> Result<NodeId, ConfigError> {
        let absolute = keypath.starts_with('.');
        let mut cursor = if absolute {
            self.root()
        } else {
            from.unwrap_or_else(|| self.root())
        };
        let trimmed = keypath.trim_start_matches('.');
        let segments: Vec<&str> = trimmed.split('.').filter(|s| !s.is_empty()).collect();
        for (i, seg) in segments.iter().enumerate() {
            let is_last = i == segments.len() - 1;
            let found = self.node(cursor).children().iter().copied().find(|&c| {
                let n = self.node(c);
                (!find_semantics || is_last) && self.key_matches(&n.key, seg)
            });
            cursor = found.ok_or_else(|| ConfigError::MissingAttachment {
                keypath: keypath.to_string(),
                location: at.clone(),
            })?;
        }
        Ok(cursor)
    }

    fn key_matches(&self, key: &NodeKey, segment: &str) -> bool {
        match key {
            NodeKey::Ident(id) => glob_match(self.resolve(*id), segment),
            NodeKey::Extends => glob_match("_extends", segment),
            NodeKey::Find => glob_match("_find", segment),
            NodeKey::Schema => glob_match("_schema", segment),
            NodeKey::Root => false,
        }
    }

    fn detect_cycles(&mut self, node: NodeId) -> Result<(), ConfigError> {
        if self.node(node).expanding {
            return Err(ConfigError::RecursiveExpansion {
                keypath: format!("{:?}", node),
                location: self.node(node).location.clone(),
            });
        }
        self.node_mut(node).expanding = true;
        let link = self.node(node).expansion_link;
        if let Some(target) = link {
            self.detect_cycles(target)?;
        }
        let children = self.node(node).children().to_vec();
        for child in children {
            self.detect_cycles(child)?;
        }
        self.node_mut(node).expanding = false;
        Ok(())
    }

    /// `findSingle(keypath)`: first matching value under the node.
    pub fn find_single(&self, keypath: &str) -> Option<String> {
        self.find(keypath).into_iter().next()
    }

    /// `find(keypath)`: ordered enumeration of all matching values, with
    /// `*` as a single-segment wildcard and `?` as a single-character
    /// wildcard.
    pub fn find(&self, keypath: &str) -> Vec<String> {
        let segments: Vec<&str> = keypath.split('.').filter(|s| !s.is_empty()).collect();
        let mut out = Vec::new();
        self.find_rec(self.root(), &segments, &mut out);
        out
    }

    fn find_rec(&self, node: NodeId, segments: &[&str], out: &mut Vec<String>) {
        if segments.is_empty() {
            match &self.node(node).value {
                NodeValue::String(sid) => out.push(self.resolve(*sid).to_string()),
                NodeValue::Children(_) => {}
            }
            return;
        }
        let (seg, rest) = (segments[0], &segments[1..]);
        for &child in self.node(node).children() {
            let n = self.node(child);
            let matches = match n.key {
                NodeKey::Find => true, // Find matches only on the final segment, handled via expansion_link below
                _ => self.key_matches(&n.key, seg),
            };
            if matches {
                self.find_rec(child, rest, out);
            }
            if let Some(target) = n.expansion_link {
                // Extends transparently descends into its target; Find
                // matches by final segment name inside its target.
                if matches!(n.key, NodeKey::Extends) {
                    self.find_rec(target, segments, out);
                } else if matches!(n.key, NodeKey::Find) && rest.is_empty() {
                    self.find_by_name(target, seg, out);
                }
            }
        }
    }

    fn find_by_name(&self, node: NodeId, name: &str, out: &mut Vec<String>) {
        for &child in self.node(node).children() {
            let n = self.node(child);
            if self.key_matches(&n.key, name) {
                if let NodeValue::String(sid) = n.value {
                    out.push(self.resolve(sid).to_string());
                }
            }
            self.find_by_name(child, name, out);
        }
    }

    /// `isConfiguration(value)`: true for nested lists, false for
    /// singleton strings. Rust has no need for the original's
    /// shared-buffer `value\0key` encoding (callers get typed `NodeValue`
    /// back); kept only as a boolean discriminator.
    pub fn is_configuration(&self, node: NodeId) -> bool {
        self.node(node).is_list()
    }
}

fn glob_match(s: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if pattern.len() == s.len() {
        pattern
            .chars()
            .zip(s.chars())
            .all(|(p, c)| p == '?' || p == c)
    } else {
        pattern.eq_ignore_ascii_case(s)
    }
}
