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
//! In-memory `ContainerBackend`/`TimeDilationService`/`SocketHookClient`
//! implementations backing §8's S6/S9/S10 properties without requiring the
//! real kernel dilation module (spec.md §6 `[AMBIENT]`).

use std::{
    collections::HashMap,
    sync::atomic::{AtomicI32, AtomicU32, Ordering},
    sync::Mutex,
};

use super::{BackendOp, ContainerBackend, ProxyError, SocketHookClient, TimeDilationService};
use crate::timeline::ProgressFlag;

#[derive(Default)]
pub struct MockBackend {
    next_pid: AtomicU32,
    next_fd: AtomicI32,
}

impl ContainerBackend for MockBackend {
    fn create_bridge(&self, _bridge_name: &str) -> Result<(), ProxyError> {
        Ok(())
    }

    fn create_tap(&self, _tap_name: &str, _bridge_name: &str) -> Result<i32, ProxyError> {
        Ok(self.next_fd.fetch_add(1, Ordering::SeqCst))
    }

    fn create_container(&self, _container_name: &str) -> Result<(), ProxyError> {
        Ok(())
    }

    fn fetch_pid(&self, container_name: &str) -> Result<u32, ProxyError> {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst) + 1;
        if container_name.is_empty() {
            return Err(ProxyError::BackendFailed(BackendOp::CreateContainer, "empty container name".into()));
        }
        Ok(pid)
    }

    fn destroy_container(&self, _container_name: &str) -> Result<(), ProxyError> {
        Ok(())
    }
}

/// Tracks each registered pid's dilated clock as a simple offset from a
/// shared simulated wall-clock origin, so `gettime_pid` after `set_interval`
/// reflects the advance (S6/S10).
#[derive(Default)]
pub struct MockDilationService {
    clocks: Mutex<HashMap<u32, (i64, i64)>>,
    set_interval_calls: AtomicU32,
}

impl MockDilationService {
    pub fn set_interval_calls(&self) -> u32 {
        self.set_interval_calls.load(Ordering::SeqCst)
    }
}

impl TimeDilationService for MockDilationService {
    fn dilate_all(&self, pid: u32, _tdf: f64) -> Result<(), ProxyError> {
        self.clocks.lock().unwrap().entry(pid).or_insert((0, 0));
        Ok(())
    }

    fn add_to_experiment(&self, _pid: u32, _timeline_id: u32) -> Result<(), ProxyError> {
        Ok(())
    }

    fn synchronize_and_freeze(&self) -> Result<(i64, i64), ProxyError> {
        Ok((0, 0))
    }

    fn set_interval(&self, pid: u32, delta_usec: i64, _timeline_id: u32) -> Result<(), ProxyError> {
        self.set_interval_calls.fetch_add(1, Ordering::SeqCst);
        let mut clocks = self.clocks.lock().unwrap();
        let entry = clocks.entry(pid).or_insert((0, 0));
        let total_usec = entry.0 * 1_000_000 + entry.1 + delta_usec;
        *entry = (total_usec.div_euclid(1_000_000), total_usec.rem_euclid(1_000_000));
        Ok(())
    }

    fn gettime_pid(&self, pid: u32) -> Result<(i64, i64), ProxyError> {
        Ok(*self.clocks.lock().unwrap().entry(pid).or_insert((0, 0)))
    }

    fn progress(&self, _timeline_id: u32, _flag: ProgressFlag) -> Result<(), ProxyError> {
        Ok(())
    }

    fn fix_timeline(&self, _timeline_id: u32) -> Result<(), ProxyError> {
        Ok(())
    }

    fn reset(&self, _timeline_id: u32) -> Result<(), ProxyError> {
        Ok(())
    }

    fn stop_experiment(&self) -> Result<(), ProxyError> {
        Ok(())
    }
}

/// Records the register/start/stop/select calls and hands back a
/// programmable next record, modeling the `NULL`-or-`(sec, usec, hash)`
/// read protocol (spec.md §6 `[SUPPLEMENT]`).
#[derive(Default)]
pub struct MockSocketHook {
    next_record: Mutex<Option<(i64, i64, u64)>>,
}

impl MockSocketHook {
    pub fn set_next_record(&self, record: Option<(i64, i64, u64)>) {
        *self.next_record.lock().unwrap() = record;
    }
}

impl SocketHookClient for MockSocketHook {
    fn register(&self, _pid: u32, _container_name: &str) -> Result<(), ProxyError> {
        Ok(())
    }

    fn start(&self) -> Result<(), ProxyError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), ProxyError> {
        Ok(())
    }

    fn select(&self, _container_name: &str) -> Result<(), ProxyError> {
        Ok(())
    }

    fn read_record(&self) -> Result<Option<(i64, i64, u64)>, ProxyError> {
        Ok(*self.next_record.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s6_advance_reflects_in_gettime() {
        let dilation = MockDilationService::default();
        dilation.dilate_all(1, 10.0).unwrap();
        dilation.set_interval(1, 1000, 0).unwrap();
        let (sec, usec) = dilation.gettime_pid(1).unwrap();
        assert_eq!(sec * 1_000_000 + usec, 1000);
        assert_eq!(dilation.set_interval_calls(), 1);
    }

    #[test]
    fn socket_hook_null_until_a_record_is_set() {
        let hook = MockSocketHook::default();
        assert_eq!(hook.read_record().unwrap(), None);
        hook.set_next_record(Some((1, 2, 3)));
        assert_eq!(hook.read_record().unwrap(), Some((1, 2, 3)));
    }
}
