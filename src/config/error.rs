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
//! Failure modes of the DML configuration tree loader, each carrying a
//! source location the way `dml-exception.cc` attaches file/line/column to
//! every parse or expansion failure.

use std::fmt;

use thiserror::Error;

/// `(file, line, column, start_byte, end_byte)`, attached to every node and
/// to every `ConfigError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: std::rc::Rc<str>,
    pub line: u32,
    pub column: u32,
    pub start_byte: u32,
    pub end_byte: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{location}: attachment point not found for '{keypath}'")]
    MissingAttachment { keypath: String, location: Location },

    #[error("{location}: attachment '{keypath}' is not a list")]
    NonlistAttachment { keypath: String, location: Location },

    #[error("{location}: illegal attribute key '{key}'")]
    IllegalAttributeKey { key: String, location: Location },

    #[error("{location}: recursive expansion through '{keypath}'")]
    RecursiveExpansion { keypath: String, location: Location },

    #[error("{location}: parse error: {message}")]
    ParseError { message: String, location: Location },

    #[error("could not open DML file '{path}': {source}")]
    OpenDmlFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Environment-specific DML errors (as opposed to model configuration
    /// errors) map to process exit code 2 rather than 1; only file-open
    /// failures are treated as environment errors here, matching the
    /// original's split between "can't find the DML on disk" and "the DML
    /// content itself is wrong".
    pub fn is_environment(&self) -> bool {
        matches!(self, ConfigError::OpenDmlFile { .. })
    }

    pub fn location(&self) -> Option<&Location> {
        match self {
            ConfigError::MissingAttachment { location, .. }
            | ConfigError::NonlistAttachment { location, .. }
            | ConfigError::IllegalAttributeKey { location, .. }
            | ConfigError::RecursiveExpansion { location, .. }
            | ConfigError::ParseError { location, .. } => Some(location),
            ConfigError::OpenDmlFile { .. } => None,
        }
    }
}
