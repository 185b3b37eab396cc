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
//! One OS thread per Timeline polls its own captured frames and hands
//! processed packets back to whichever single thread owns the `Kernel`,
//! generalizing `Analyzer::analyze()`'s worker-pool shape (spec.md §5
//! `[SUPPLEMENT - idiom]`) from "one thread per Monte Carlo sample batch"
//! to "one capture thread per Timeline". `timeline::Kernel::write` is the
//! only thing allowed to touch two Timelines at once, so capture threads
//! never reach into the Kernel directly; they only classify, resolve a
//! destination Proxy and a receive vtime, and forward the result.

use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex};

use crate::manager::{process_captured_frame, EmuPacket, ManagerStats};
use crate::proxy::Proxy;
use crate::timeline::TimelineId;
use crate::Vtime;

/// One due frame off a Timeline's tap devices, or `None` if nothing is
/// ready this round. `usize` is the index of the sending Proxy within the
/// slice passed to `run_capture_threads`.
pub trait CaptureSource: Send + Sync {
    fn poll_frame(&self, timeline_id: TimelineId) -> Option<(usize, Vec<u8>, Option<(i64, i64)>)>;
}

/// Runs one capture thread per entry in `timeline_ids`, each polling
/// `source` up to `rounds` times and forwarding every frame that survives
/// `process_captured_frame` over the returned channel. Blocks until every
/// thread has run its full quota (spec.md §5 "one capture thread per
/// Timeline, synchronized through the main driver thread").
pub fn run_capture_threads(
    source: &dyn CaptureSource,
    proxies: &[Proxy],
    timeline_ids: &[TimelineId],
    rounds: usize,
    elapsed_now: &(dyn Fn(TimelineId) -> Vtime + Sync),
    transfer_delay: Vtime,
) -> (Receiver<EmuPacket>, ManagerStats) {
    let (tx, rx) = channel();
    let stats = Arc::new(Mutex::new(ManagerStats::default()));

    crossbeam_utils::thread::scope(|s| {
        for &tid in timeline_ids {
            let tx = tx.clone();
            let stats = stats.clone();
            s.spawn(move |_| {
                let mut last_arrival: Vtime = 0;
                for _ in 0..rounds {
                    let Some((src_idx, frame, hook_record)) = source.poll_frame(tid) else {
                        continue;
                    };
                    let now = elapsed_now(tid);
                    let Some(packet) =
                        process_captured_frame(proxies, src_idx, &frame, hook_record, now, last_arrival, transfer_delay)
                    else {
                        continue;
                    };
                    last_arrival = packet.receive_vtime;
                    stats
                        .lock()
                        .unwrap()
                        .per_timeline
                        .entry(tid)
                        .or_default()
                        .times_timeline_called_progress += 1;
                    if tx.send(packet).is_err() {
                        break;
                    }
                }
            });
        }
    })
    .expect("capture thread panicked");

    drop(tx);
    let stats = Arc::try_unwrap(stats).expect("all capture threads joined").into_inner().unwrap();
    (rx, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct FixedFrames {
        frames: StdMutex<Vec<Vec<u8>>>,
    }

    impl CaptureSource for FixedFrames {
        fn poll_frame(&self, _timeline_id: TimelineId) -> Option<(usize, Vec<u8>, Option<(i64, i64)>)> {
            self.frames.lock().unwrap().pop().map(|frame| (0, frame, None))
        }
    }

    fn eth_ipv4_frame(dst: u32, src: u32) -> Vec<u8> {
        let mut frame = vec![0u8; 36];
        frame[12] = 0x08;
        frame[13] = 0x00;
        frame[14 + 9] = 6;
        frame[12 + 14..16 + 14].copy_from_slice(&src.to_be_bytes());
        frame[16 + 14..20 + 14].copy_from_slice(&dst.to_be_bytes());
        frame
    }

    /// One Timeline's capture thread resolves two queued frames to the
    /// destination Proxy's index and reports a per-Timeline progress count.
    #[test]
    fn single_timeline_forwards_every_resolvable_frame() {
        let proxies = vec![
            Proxy::new("1:1(0)", 0x0A000001, "c1", 1, 1.0),
            Proxy::new("1:2(0)", 0x0A000002, "c2", 1, 1.0),
        ];
        let source = FixedFrames {
            frames: StdMutex::new(vec![
                eth_ipv4_frame(0x0A000002, 0x0A000001),
                eth_ipv4_frame(0x0A000002, 0x0A000001),
            ]),
        };
        let (rx, stats) = run_capture_threads(&source, &proxies, &[1], 4, &|_| 100, 5);
        let received: Vec<_> = rx.iter().collect();
        assert_eq!(received.len(), 2);
        assert!(received.iter().all(|p| p.dst_proxy == 1));
        assert_eq!(stats.per_timeline.get(&1).unwrap().times_timeline_called_progress, 2);
    }
}
