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
//! A small recursive-descent reader for the DML grammar named in spec.md
//! §6: `<key> <value>` or `<key> [ <subtree> ]`, quoted or bare strings,
//! `#` line comments. Only the resulting tree shape matters here (the
//! original's lexer/parser internals are out of scope); this reader exists
//! only to produce `ConfigNode`s for `ConfigContext::load`.

use std::rc::Rc;

use super::{
    context::ConfigContext,
    error::{ConfigError, Location},
    node::{ConfigNode, NodeId, NodeKey, NodeKind, NodeValue},
};

struct Reader<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
    file: Rc<str>,
}

impl<'a> Reader<'a> {
    fn new(text: &'a str, file: Rc<str>) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
            file,
        }
    }

    fn loc(&self, start: usize) -> Location {
        Location {
            file: self.file.clone(),
            line: self.line,
            column: self.col,
            start_byte: start as u32,
            end_byte: self.pos as u32,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(b)
    }

    fn skip_ws_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => {
                    self.advance();
                }
                Some(b'#') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// A bare token: any run of non-whitespace, non-bracket characters.
    fn read_bare(&mut self) -> String {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() || b == b'[' || b == b']' {
                break;
            }
            self.advance();
        }
        self.text[start..self.pos].to_string()
    }

    /// A quoted token with C-style escape processing (`\n`, `\t`, `\xHH`,
    /// `\0NN`), matching the original's string-escape conventions.
    fn read_quoted(&mut self) -> Result<String, ConfigError> {
        let start = self.pos;
        self.advance(); // opening quote
        let mut out = String::new();
        loop {
            match self.advance() {
                None => {
                    return Err(ConfigError::ParseError {
                        message: "unterminated quoted string".into(),
                        location: self.loc(start),
                    })
                }
                Some(b'"') => break,
                Some(b'\\') => match self.advance() {
                    Some(b'n') => out.push('\n'),
                    Some(b't') => out.push('\t'),
                    Some(b'x') => {
                        let hi = self.advance().unwrap_or(b'0') as char;
                        let lo = self.advance().unwrap_or(b'0') as char;
                        let byte = u8::from_str_radix(&format!("{hi}{lo}"), 16).unwrap_or(0);
                        out.push(byte as char);
                    }
                    Some(b'0') => {
                        let d1 = self.advance().unwrap_or(b'0') as char;
                        let d2 = self.advance().unwrap_or(b'0') as char;
                        let byte = u8::from_str_radix(&format!("{d1}{d2}"), 8).unwrap_or(0);
                        out.push(byte as char);
                    }
                    Some(other) => out.push(other as char),
                    None => {}
                },
                Some(b) => out.push(b as char),
            }
        }
        Ok(out)
    }

    fn read_token(&mut self) -> Result<String, ConfigError> {
        if self.peek() == Some(b'"') {
            self.read_quoted()
        } else {
            Ok(self.read_bare())
        }
    }
}

fn key_for(ctx: &mut ConfigContext, text: &str) -> NodeKey {
    match text {
        "_extends" => NodeKey::Extends,
        "_find" => NodeKey::Find,
        "_schema" => NodeKey::Schema,
        other => NodeKey::Ident(ctx.intern(other)),
    }
}

/// Parse `text` (the contents of one DML file) into a list of top-level
/// `NodeId`s, which the caller (`ConfigContext::load`) attaches as children
/// of the root.
pub fn parse(ctx: &mut ConfigContext, text: &str, file: Rc<str>) -> Result<Vec<NodeId>, ConfigError> {
    let mut reader = Reader::new(text, file);
    let mut top = Vec::new();
    loop {
        reader.skip_ws_and_comments();
        if reader.at_end() {
            break;
        }
        top.push(parse_entry(ctx, &mut reader, None)?);
    }
    Ok(top)
}

fn parse_entry(
    ctx: &mut ConfigContext,
    reader: &mut Reader<'_>,
    parent: Option<NodeId>,
) -> Result<NodeId, ConfigError> {
    let key_start = reader.pos;
    let key_text = reader.read_token()?;
    if key_text.is_empty() {
        return Err(ConfigError::ParseError {
            message: "expected an attribute key".into(),
            location: reader.loc(key_start),
        });
    }
    let key = key_for(ctx, &key_text);
    reader.skip_ws_and_comments();

    if reader.peek() == Some(b'[') {
        reader.advance();
        let node_id = ctx_push_placeholder(ctx, key, parent, reader.loc(key_start));
        let mut children = Vec::new();
        loop {
            reader.skip_ws_and_comments();
            match reader.peek() {
                Some(b']') => {
                    reader.advance();
                    break;
                }
                None => {
                    return Err(ConfigError::ParseError {
                        message: "unterminated subtree: missing ']'".into(),
                        location: reader.loc(reader.pos),
                    })
                }
                _ => {
                    let child = parse_entry(ctx, reader, Some(node_id))?;
                    children.push(child);
                }
            }
        }
        set_children(ctx, node_id, children);
        Ok(node_id)
    } else {
        let value_start = reader.pos;
        let value_text = reader.read_token()?;
        if value_text.is_empty() {
            return Err(ConfigError::ParseError {
                message: "expected a value or '['".into(),
                location: reader.loc(value_start),
            });
        }
        let value_id = ctx.intern(&value_text);
        Ok(push_string_node(ctx, key, value_id, parent, reader.loc(key_start)))
    }
}

fn ctx_push_placeholder(
    ctx: &mut ConfigContext,
    key: NodeKey,
    parent: Option<NodeId>,
    location: Location,
) -> NodeId {
    push_node(
        ctx,
        ConfigNode {
            kind: NodeKind::List,
            key,
            value: NodeValue::Children(Vec::new()),
            parent,
            expansion_link: None,
            location,
            expanding: false,
        },
    )
}

fn set_children(ctx: &mut ConfigContext, node: NodeId, children: Vec<NodeId>) {
    // SAFETY-free: ConfigContext keeps nodes in a flat Vec; this helper
    // reaches in directly since the parser lives in the same module tree.
    ctx.set_children_for_parser(node, children);
}

fn push_string_node(
    ctx: &mut ConfigContext,
    key: NodeKey,
    value_id: u32,
    parent: Option<NodeId>,
    location: Location,
) -> NodeId {
    push_node(
        ctx,
        ConfigNode {
            kind: NodeKind::String,
            key,
            value: NodeValue::String(value_id),
            parent,
            expansion_link: None,
            location,
            expanding: false,
        },
    )
}

fn push_node(ctx: &mut ConfigContext, node: ConfigNode) -> NodeId {
    ctx.push_node_for_parser(node)
}
