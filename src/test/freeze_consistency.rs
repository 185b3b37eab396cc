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
//! Invariant 9: container time consistency. Every Proxy frozen from the
//! same shared `synchronize_and_freeze()` instant must record identical
//! `(sec, usec)`; a caller that mismatches them is a logic error, not a
//! recoverable one, so the check lives at the call site rather than
//! inside `Proxy::freeze` itself.

use crate::error::SimError;
use crate::proxy::mock::{MockBackend, MockDilationService};
use crate::proxy::{Proxy, ProxyError};

/// Freezes each Proxy at the given instant, asserting every instant
/// matches the first one seen (spec.md §4.F "Freeze", invariant 9).
fn freeze_all(proxies: &mut [Proxy], starts: &[(i64, i64)]) -> Result<(), SimError> {
    let mut reference = None;
    for (proxy, &start) in proxies.iter_mut().zip(starts) {
        proxy.freeze(start);
        match reference {
            None => reference = Some(start),
            Some(r) if r == start => {}
            Some(r) => return Err(SimError::from(ProxyError::InconsistentFreeze(r, start))),
        }
    }
    Ok(())
}

#[test]
fn every_proxy_records_the_same_freeze_instant() {
    let backend = MockBackend::default();
    let dilation = MockDilationService::default();
    let mut proxies = vec![
        Proxy::new("1:1(0)", 0x0A000001, "c1", 1, 1.0),
        Proxy::new("1:2(0)", 0x0A000002, "c2", 1, 1.0),
        Proxy::new("1:3(0)", 0x0A000003, "c3", 1, 1.0),
    ];
    for proxy in proxies.iter_mut() {
        proxy.launch(&backend).unwrap();
        proxy.attach(&backend, &dilation).unwrap();
    }
    let start = dilation.synchronize_and_freeze().unwrap();

    freeze_all(&mut proxies, &[start, start, start]).unwrap();

    let first = proxies[0].sim_start_wallclock;
    assert!(first.is_some());
    assert!(proxies.iter().all(|p| p.sim_start_wallclock == first));
}

#[test]
fn mismatched_freeze_instants_are_rejected() {
    let mut proxies = vec![
        Proxy::new("1:1(0)", 0x0A000001, "c1", 1, 1.0),
        Proxy::new("1:2(0)", 0x0A000002, "c2", 1, 1.0),
    ];
    let result = freeze_all(&mut proxies, &[(10, 0), (10, 1)]);
    assert!(matches!(
        result,
        Err(SimError::KernelServiceUnavailable(ProxyError::InconsistentFreeze(_, _)))
    ));
}
