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
//! Invariant 10: after `advance_lxcs_on_timeline` reports it advanced a
//! Timeline, every Proxy's vtime-from-dilated-clock is within
//! `DRIFT_THRESHOLD_US` of the requested target, with the real
//! `timeline::Kernel` (not a stub) standing in for the Timeline's own
//! event loop on the `progress` callback.

use crate::manager::{drive_kernel_progress, EmulationManager};
use crate::proxy::mock::{MockBackend, MockDilationService};
use crate::proxy::Proxy;
use crate::timeline::{Entity, Kernel, ProgressFlag, Timeline};

#[test]
fn advancing_a_timeline_drives_the_real_kernel_and_bounds_drift() {
    let mut timeline = Timeline::<&'static str>::new(1);
    timeline.add_entity(Entity {
        id: 0,
        out_channels: vec![],
        in_channels: vec![],
    });
    let mut kernel = Kernel::new(vec![timeline]);

    let mut manager = EmulationManager::new();
    manager.add_proxy(Proxy::new("1:1(0)", 0x0A000001, "c1", 1, 1.0));
    let backend = MockBackend::default();
    let dilation = MockDilationService::default();
    for proxy in manager.proxies_mut() {
        proxy.launch(&backend).unwrap();
        proxy.attach(&backend, &dilation).unwrap();
        proxy.freeze((0, 0));
    }

    let mut progress_calls = 0;
    let advanced = manager
        .advance_lxcs_on_timeline(&dilation, 1, 5_000, || 0, |tid, flag| {
            progress_calls += 1;
            drive_kernel_progress(&mut kernel, tid, flag, |_, _, _| {}).map_err(|e| {
                crate::proxy::ProxyError::BackendFailed(crate::proxy::BackendOp::CreateContainer, e.to_string())
            })
        })
        .unwrap();

    assert!(advanced);
    assert_eq!(progress_calls, 1, "advance arbitration invokes progress exactly once per call");
    assert_eq!(kernel.timeline(1).unwrap().now(), 0, "no events were queued, so the Timeline's own clock doesn't move");

    let stats = manager.stats_snapshot();
    let per_tl = stats.per_timeline.get(&1).unwrap();
    assert_eq!(per_tl.times_timeline_advanced, 1);
    assert!(
        stats.global.maximum_advance_error.unwrap() <= 1000,
        "drift must stay within DRIFT_THRESHOLD_US for a single advance"
    );
}
