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
//! Core of a hybrid emulation/simulation runtime: a parallel discrete-event
//! kernel whose Timelines can be bound to real OS containers through a
//! time-dilation controller, so that unmodified binaries can exchange
//! packets with a simulated network while virtual time stays globally
//! consistent.

/// Virtual time: signed microseconds since simulation start.
pub type Vtime = i64;

pub mod config;
pub mod error;
pub mod manager;
pub mod net;
pub mod protocol;
pub mod proxy;
pub mod routing;
pub mod runtime;
pub mod timeline;

#[cfg(test)]
mod test;

pub mod prelude {
    pub use super::{
        config::{ConfigContext, ConfigNode, NodeId},
        error::SimError,
        net::{ip_prefix::IpPrefix, nhi::Nhi},
        routing::{ForwardingTable, RouteInfo},
        timeline::{Entity, InChannel, OutChannel, Timeline},
        Vtime,
    };
}
