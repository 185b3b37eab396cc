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
//! Crate-wide error kinds and the exit-code mapping used by binaries.

use thiserror::Error;

use crate::{config::ConfigError, proxy::ProxyError, routing::RouteError};

/// Every recoverable or unrecoverable failure mode named in the error
/// handling design: each variant logs or aborts per its own documented
/// policy, never both.
#[derive(Debug, Error)]
pub enum SimError {
    /// Malformed DML, missing required attribute. Abort load; caller reports file+line.
    #[error("configuration invalid: {0}")]
    ConfigInvalid(#[from] ConfigError),

    /// Next-hop cannot be tied to any endpoint of the link. Log, drop route, continue.
    #[error("route unresolvable: {0}")]
    RouteUnresolvable(#[from] RouteError),

    /// Protocol graph sees a second session where only one is allowed. Abort startup.
    #[error("duplicate session: {0}")]
    DuplicateSession(String),

    /// A channel write could not deliver to some subset of targets.
    #[error("cross-timeline delivery dropped for mapping {0}")]
    CrossTimelineDropped(u64),

    /// A container's elapsed vtime after advance differs from target by more than the threshold.
    #[error("emulation drift on timeline {timeline_id}: |elapsed - target| = {drift_us}us")]
    EmulationDrift { timeline_id: u32, drift_us: i64 },

    /// A time-dilation or socket-hook call failed; caller downgrades to wall-clock fallback.
    #[error("kernel service unavailable: {0}")]
    KernelServiceUnavailable(#[from] ProxyError),

    /// Destination IP has no matching Proxy. Log, drop frame.
    #[error("packet unroutable: no proxy for {0}")]
    PacketUnroutable(std::net::Ipv4Addr),
}

impl SimError {
    /// Process exit code per the configuration-attributes / exit-code table:
    /// 0 normal, 1 configuration error, 2 environment DML error.
    pub fn exit_code(&self) -> i32 {
        match self {
            SimError::ConfigInvalid(e) if e.is_environment() => 2,
            SimError::ConfigInvalid(_) => 1,
            _ => 1,
        }
    }
}
