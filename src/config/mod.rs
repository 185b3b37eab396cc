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
//! The DML configuration tree: an attribute tree with include/reference
//! expansion that supplies every other component's parameters.

mod context;
mod error;
mod node;
mod parser;

pub use context::ConfigContext;
pub use error::{ConfigError, Location};
pub use node::{ConfigNode, NodeId, NodeKey, NodeKind, NodeValue};

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load_str(text: &str) -> ConfigContext {
        let mut file = tempfile_with(text);
        let mut ctx = ConfigContext::new();
        ctx.load(&[file.path()]).unwrap();
        file.flush().unwrap();
        ctx
    }

    fn tempfile_with(text: &str) -> NamedTemp {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut path = std::env::temp_dir();
        path.push(format!(
            "s3f-rs-test-{}-{unique}.dml",
            std::process::id()
        ));
        std::fs::write(&path, text).unwrap();
        NamedTemp { path }
    }

    struct NamedTemp {
        path: std::path::PathBuf,
    }
    impl NamedTemp {
        fn path(&self) -> &std::path::Path {
            &self.path
        }
        fn flush(&self) -> std::io::Result<()> {
            Ok(())
        }
    }
    impl Drop for NamedTemp {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    /// S1: `a 1 a 2 b [ c "x" ]` yields three root children.
    #[test]
    fn s1_parse() {
        let ctx = load_str(r#"a 1 a 2 b [ c "x" ]"#);
        let root_children = ctx.node(ctx.root()).children();
        assert_eq!(root_children.len(), 3);
        assert_eq!(ctx.find_single("a"), Some("1".to_string()));
        assert_eq!(ctx.find("a"), vec!["1".to_string(), "2".to_string()]);
        assert_eq!(ctx.find_single("b.c"), Some("x".to_string()));
    }

    /// S2: expansion makes `z.y` resolve through `_extends .x`.
    #[test]
    fn s2_expansion() {
        let ctx = load_str(r#"x [ y "1" ] z [ _extends .x ]"#);
        assert_eq!(ctx.find_single("z.y"), Some("1".to_string()));
    }

    /// Invariant 8: a reference cycle is rejected with RecursiveExpansion.
    #[test]
    fn expansion_acyclicity() {
        let mut ctx_file = tempfile_with(r#"a [ _extends .b ] b [ _extends .a ]"#);
        let mut ctx = ConfigContext::new();
        let result = ctx.load(&[ctx_file.path()]);
        ctx_file.flush().unwrap();
        assert!(matches!(result, Err(ConfigError::RecursiveExpansion { .. })));
    }

    /// `_extends`/`_find` must name a keypath string, not introduce a
    /// subtree of their own.
    #[test]
    fn extends_followed_by_list_is_illegal() {
        let mut ctx_file = tempfile_with(r#"a [ _extends [ b "1" ] ]"#);
        let mut ctx = ConfigContext::new();
        let result = ctx.load(&[ctx_file.path()]);
        ctx_file.flush().unwrap();
        assert!(matches!(result, Err(ConfigError::IllegalAttributeKey { .. })));
    }
}
