//! Process table
//!
//! Ordered map owning every live process. The scheduler holds pids only;
//! all lookups come back through here.

use alloc::collections::BTreeMap;

use super::{Pid, Process};

#[derive(Default)]
pub struct ProcessTable {
    processes: BTreeMap<Pid, Process>,
}

impl ProcessTable {
    pub const fn new() -> Self {
        Self {
            processes: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, process: Process) {
        self.processes.insert(process.pid(), process);
    }

    /// Remove and return a process; dropping the returned value releases
    /// its address-space and file references.
    pub fn remove(&mut self, pid: Pid) -> Option<Process> {
        self.processes.remove(&pid)
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.processes.contains_key(&pid)
    }

    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.processes.get(&pid)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.processes.get_mut(&pid)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}
