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
//! A thin, DML-driven scenario runner demonstrating the library: load one
//! or more DML files, resolve every `route[...]` attribute found at the
//! root against a small in-process topology, install the results in a
//! `ForwardingTable`, and report what the Timeline kernel would see.
//!
//! This binary's command-line surface is a convenience, not an API:
//! callers embedding the runtime should depend on the `s3f_rs` library
//! directly instead.

use std::path::PathBuf;

use clap::Parser;

use s3f_rs::config::ConfigContext;
use s3f_rs::error::SimError;
use s3f_rs::net::host::{Host, HostId, Link, LinkId, NetworkInterface, Topology};
use s3f_rs::net::nhi::{Nhi, NhiType};
use s3f_rs::routing::trie::TrieVariant;
use s3f_rs::routing::{CacheVariant, ForwardingTable, Protocol, RouteInfo, RouteSpec};

/// Run a small emulation/simulation scenario described by one or more DML
/// configuration files.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// DML files to load, merged in order (later files may `_extends`
    /// nodes defined by earlier ones).
    #[arg(required = true)]
    dml_files: Vec<PathBuf>,

    /// log4rs YAML config; falls back to a console-only default if unset
    /// or unreadable.
    #[arg(long)]
    log_config: Option<PathBuf>,
}

fn init_logging(log_config: Option<&PathBuf>) {
    let path = log_config.cloned().unwrap_or_else(|| PathBuf::from("log4rs.yml"));
    if log4rs::init_file(&path, Default::default()).is_err() {
        // No usable log4rs.yml on disk (e.g. running outside the repo
        // root): fall back to a bare stderr logger rather than aborting a
        // scenario run over missing logging configuration.
        let _ = env_logger_fallback();
    }
}

fn env_logger_fallback() -> Result<(), log::SetLoggerError> {
    use log4rs::append::console::ConsoleAppender;
    use log4rs::config::{Appender, Config, Root};

    let stdout = ConsoleAppender::builder().build();
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(log::LevelFilter::Info))
        .expect("a minimal hard-coded log4rs config is always valid");
    log4rs::init_config(config).map(|_| ())
}

/// A two-host point-to-point topology, standing in for the DML `Net`/
/// `Host`/`link` construction step (spec.md §3 lifecycle) that this
/// demonstration binary does not implement in full.
fn demo_topology() -> Topology {
    Topology {
        hosts: vec![
            Host::new(
                HostId(0),
                Nhi::parse("0", NhiType::Machine).unwrap(),
                vec![NetworkInterface {
                    id: 0,
                    ip: 0x0A000001,
                    link: Some(LinkId(0)),
                    nhi: Some(Nhi::parse("0(0)", NhiType::Interface).unwrap()),
                }],
                0,
            ),
            Host::new(
                HostId(1),
                Nhi::parse("1", NhiType::Machine).unwrap(),
                vec![NetworkInterface {
                    id: 0,
                    ip: 0x0A000002,
                    link: Some(LinkId(0)),
                    nhi: Some(Nhi::parse("1(0)", NhiType::Interface).unwrap()),
                }],
                1,
            ),
        ],
        links: vec![Link {
            id: LinkId(0),
            endpoints: vec![(HostId(0), 0), (HostId(1), 0)],
            min_delay: 0,
            propagation_delay: 10,
        }],
    }
}

fn parse_protocol(s: &str) -> Protocol {
    match s.to_ascii_uppercase().as_str() {
        "IGP" => Protocol::Igp,
        "EGP" => Protocol::Egp,
        "BGP" => Protocol::Bgp,
        "OSPF" => Protocol::Ospf,
        "PAO" => Protocol::Pao,
        _ => Protocol::Static,
    }
}

fn run(cli: &Cli) -> Result<(), SimError> {
    let mut ctx = ConfigContext::new();
    ctx.load(&cli.dml_files)?;
    log::info!("loaded {} DML file(s)", cli.dml_files.len());

    let topology = demo_topology();
    let mut table = ForwardingTable::default_variants();

    for dest in ctx.find("route.dest") {
        let spec = RouteSpec {
            dest,
            iface_id: ctx
                .find_single("route.nic")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            next_hop: ctx.find_single("route.next_hop"),
            cost: ctx.find_single("route.cost").and_then(|s| s.parse().ok()),
            protocol: ctx.find_single("route.protocol").as_deref().map(parse_protocol),
        };
        match RouteInfo::resolve(&spec, HostId(0), None, &topology) {
            Ok(route) => {
                let (outcome, events) = table.add_route(route, true);
                log::info!("installed route {}: {outcome:?} ({} event(s))", spec.dest, events.len());
            }
            Err(e) => log::warn!("route '{}' did not resolve: {e}", spec.dest),
        }
    }

    println!("forwarding table size: {}", table.size());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_config.as_ref());

    run(&cli).map_err(|e| {
        log::error!("scenario run failed: {e}");
        let code = e.exit_code();
        let err = anyhow::Error::from(e).context("scenario run");
        eprintln!("{err:?}");
        std::process::exit(code);
    })
}
