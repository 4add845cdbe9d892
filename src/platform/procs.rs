//! Process table queries shared by every platform implementation.

use parking_lot::Mutex;
use sysinfo::{Pid as SysinfoPid, ProcessStatus, ProcessesToUpdate, System};

use super::image_name_matches;

/// Reused `System` instance; refreshed on every query.
pub(crate) struct ProcessTable {
  system: Mutex<System>,
}

impl ProcessTable {
  pub(crate) fn new() -> Self {
    Self {
      system: Mutex::new(System::new()),
    }
  }

  /// Pids whose image name matches `executable`, ascending.
  pub(crate) fn matching_pids(&self, executable: &str) -> Vec<u32> {
    let mut system = self.system.lock();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut pids: Vec<u32> = system
      .processes()
      .iter()
      .filter(|(_, process)| process.status() != ProcessStatus::Zombie)
      .filter(|(_, process)| image_name_matches(&process.name().to_string_lossy(), executable))
      .map(|(pid, _)| pid.as_u32())
      .collect();
    // HashMap iteration order is arbitrary; sort so repeated calls agree.
    pids.sort_unstable();
    pids
  }

  pub(crate) fn is_alive(&self, pid: u32) -> bool {
    let pid_obj = SysinfoPid::from_u32(pid);
    let mut system = self.system.lock();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid_obj]), true);
    system
      .process(pid_obj)
      .is_some_and(|process| process.status() != ProcessStatus::Zombie)
  }

  pub(crate) fn kill(&self, pid: u32) -> bool {
    let pid_obj = SysinfoPid::from_u32(pid);
    let mut system = self.system.lock();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid_obj]), true);
    system.process(pid_obj).is_some_and(|process| process.kill())
  }
}
