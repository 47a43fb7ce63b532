//! The process record and its operations

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec;

use super::signal::{ActionType, SignalAction, SignalDelivery};
use super::{Pid, ProcessState, KERNEL_STACK_SIZE, MAX_SIGNALS};
use crate::arch::aarch64::Context;
use crate::error::{Errno, SysResult};
use crate::fs::FileContext;
use crate::mm::AddressSpace;

/// One process: identity, saved context, shared address space, signal
/// actions, and open files.
pub struct Process {
    pid: Pid,
    parent: Pid,
    state: ProcessState,
    ctx: Context,
    /// Pre-handler context, present exactly while `state == Signal`.
    backup_ctx: Option<Box<Context>>,
    address_space: Arc<AddressSpace>,
    signal_actions: [SignalAction; MAX_SIGNALS],
    files: BTreeMap<i32, Arc<dyn FileContext>>,
    /// Owned kernel-stack storage; freed with the process.
    kernel_stack: Option<Box<[u8]>>,
}

/// Allocate a kernel stack and return (storage, top address).
fn allocate_kernel_stack() -> (Box<[u8]>, u64) {
    let stack = vec![0u8; KERNEL_STACK_SIZE].into_boxed_slice();
    let top = stack.as_ptr() as u64 + KERNEL_STACK_SIZE as u64;
    (stack, top)
}

impl Process {
    /// A fresh ACTIVE process with an empty context. `exec` or the cloning
    /// path gives it something to run.
    pub fn new(pid: Pid, parent: Pid, address_space: Arc<AddressSpace>) -> Self {
        Self {
            pid,
            parent,
            state: ProcessState::Active,
            ctx: Context::new(),
            backup_ctx: None,
            address_space,
            signal_actions: [SignalAction::default(); MAX_SIGNALS],
            files: BTreeMap::new(),
            kernel_stack: None,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn parent(&self) -> Pid {
        self.parent
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn set_state(&mut self, state: ProcessState) {
        self.state = state;
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    /// Overwrite the saved context with the one the exception stub spilled.
    pub fn store_context(&mut self, ctx: &Context) {
        self.ctx = ctx.clone();
    }

    pub fn address_space(&self) -> &Arc<AddressSpace> {
        &self.address_space
    }

    pub fn has_backup_context(&self) -> bool {
        self.backup_ctx.is_some()
    }

    /// Create a child sharing this process's address space.
    ///
    /// The child gets its own kernel stack, a context that enters
    /// `entry(userdata)` on the supplied user stack, duplicated file
    /// descriptors (independent cursors), and an empty signal table.
    pub fn clone_for(&self, pid: Pid, entry: u64, stack: u64, userdata: u64) -> Process {
        let (storage, top) = allocate_kernel_stack();
        let mut child = Process::new(pid, self.pid, self.address_space.clone());
        child.kernel_stack = Some(storage);
        child.ctx = Context::with_entry(entry, stack, top);
        child.ctx.function_call(entry, 0, userdata);
        for (&fd, file) in &self.files {
            child.files.insert(fd, file.duplicate());
        }
        child
    }

    /// Swap in a fresh image: new address space (the old reference drops
    /// here, tearing the old space down if this was the last process in
    /// it), new entry point and stacks. Only legal while ACTIVE.
    pub fn replace_image(
        &mut self,
        entry: u64,
        user_stack_top: u64,
        kernel_stack: Box<[u8]>,
        address_space: Arc<AddressSpace>,
    ) -> SysResult<()> {
        if self.state != ProcessState::Active {
            return Err(Errno::Unknown);
        }
        let kernel_stack_top = kernel_stack.as_ptr() as u64 + kernel_stack.len() as u64;
        self.address_space = address_space;
        self.kernel_stack = Some(kernel_stack);
        self.ctx.program_counter = entry;
        self.ctx.stack_pointer = user_stack_top;
        self.ctx.kernel_stack = kernel_stack_top;
        Ok(())
    }

    /// Install or clear a signal action. A null handler clears the slot.
    pub fn set_signal_action(&mut self, signal: usize, handler: u64, trampoline: u64, userdata: u64) {
        if signal >= MAX_SIGNALS {
            return;
        }
        self.signal_actions[signal] = if handler == 0 {
            SignalAction::default()
        } else {
            SignalAction {
                action: ActionType::Handler,
                handler,
                trampoline,
                userdata,
            }
        };
    }

    /// Mark a signal as fatal for this process.
    pub fn set_signal_kill(&mut self, signal: usize) {
        if signal >= MAX_SIGNALS {
            return;
        }
        self.signal_actions[signal] = SignalAction {
            action: ActionType::Kill,
            ..SignalAction::default()
        };
    }

    /// Deliver a signal according to the installed action.
    ///
    /// For a HANDLER action the current context is snapshotted into the
    /// backup slot *before* the active context is rewritten, so `sigret`
    /// can never observe a partial snapshot. Nested delivery while a
    /// handler runs is rejected.
    pub fn signal_trigger(&mut self, signal: usize) -> SignalDelivery {
        if signal >= MAX_SIGNALS {
            return SignalDelivery::Accepted;
        }
        let action = self.signal_actions[signal];
        match action.action {
            ActionType::None => SignalDelivery::Accepted,
            ActionType::Handler => {
                if self.state == ProcessState::Signal {
                    return SignalDelivery::Rejected;
                }
                self.backup_ctx = Some(Box::new(self.ctx.clone()));
                self.ctx
                    .function_call(action.handler, action.trampoline, action.userdata);
                self.state = ProcessState::Signal;
                SignalDelivery::Accepted
            }
            ActionType::Kill => SignalDelivery::Kill,
        }
    }

    /// Return from a signal handler: restore the pre-handler context and
    /// drop the backup. No-op unless a handler is executing.
    pub fn signal_return(&mut self) {
        if self.state != ProcessState::Signal {
            return;
        }
        if let Some(backup) = self.backup_ctx.take() {
            self.ctx = *backup;
        }
        self.state = ProcessState::Active;
    }

    /// Look up an open file.
    pub fn file(&self, fd: i32) -> Option<Arc<dyn FileContext>> {
        self.files.get(&fd).cloned()
    }

    /// Store a file at the lowest free descriptor and return it.
    pub fn store_file(&mut self, file: Arc<dyn FileContext>) -> i32 {
        let mut fd = 0;
        while self.files.contains_key(&fd) {
            fd += 1;
        }
        self.files.insert(fd, file);
        fd
    }

    /// Store a file at a specific descriptor; fails if it is taken.
    pub fn store_file_at(&mut self, file: Arc<dyn FileContext>, fd: i32) -> SysResult<()> {
        if self.files.contains_key(&fd) {
            return Err(Errno::Exists);
        }
        self.files.insert(fd, file);
        Ok(())
    }

    /// Close a descriptor, dropping this process's reference.
    pub fn close_file(&mut self, fd: i32) -> SysResult<()> {
        self.files.remove(&fd).map(|_| ()).ok_or(Errno::NoFile)
    }

    /// Number of open descriptors.
    pub fn open_file_count(&self) -> usize {
        self.files.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::pipe::create_pipe;
    use crate::mm::PhysAddr;
    use crate::process::SIGNAL_CHILD;

    fn fresh_process(pid: u64) -> Process {
        let space = Arc::new(AddressSpace::new(PhysAddr::new(0x4000), pid as u16));
        Process::new(Pid(pid), Pid(0), space)
    }

    #[test]
    fn handler_delivery_backs_up_and_redirects() {
        let mut p = fresh_process(2);
        p.context_mut().program_counter = 0x1000;
        p.context_mut().stack_pointer = 0x8000;
        p.context_mut().gp_regs[5] = 77;
        p.set_signal_action(SIGNAL_CHILD, 0x2000, 0x3000, 0xaa);

        assert_eq!(p.signal_trigger(SIGNAL_CHILD), SignalDelivery::Accepted);
        assert_eq!(p.state(), ProcessState::Signal);
        assert!(p.has_backup_context());
        // Resumes at the handler, returns into the trampoline, userdata in
        // x0.
        assert_eq!(p.context().program_counter(), 0x2000);
        assert_eq!(p.context().gp_regs[30], 0x3000);
        assert_eq!(p.context().gp_regs[0], 0xaa);

        p.signal_return();
        assert_eq!(p.state(), ProcessState::Active);
        assert!(!p.has_backup_context());
        // The full pre-signal context is back.
        assert_eq!(p.context().program_counter(), 0x1000);
        assert_eq!(p.context().stack_pointer(), 0x8000);
        assert_eq!(p.context().gp_regs[5], 77);
    }

    #[test]
    fn nested_handlers_are_rejected_without_side_effects() {
        let mut p = fresh_process(2);
        p.set_signal_action(1, 0x2000, 0x3000, 0);
        assert_eq!(p.signal_trigger(1), SignalDelivery::Accepted);

        let pc = p.context().program_counter();
        assert_eq!(p.signal_trigger(1), SignalDelivery::Rejected);
        assert_eq!(p.state(), ProcessState::Signal);
        assert_eq!(p.context().program_counter(), pc);
    }

    #[test]
    fn unset_signals_are_ignored_and_kill_is_reported() {
        let mut p = fresh_process(2);
        assert_eq!(p.signal_trigger(9), SignalDelivery::Accepted);
        assert_eq!(p.state(), ProcessState::Active);

        p.set_signal_kill(9);
        assert_eq!(p.signal_trigger(9), SignalDelivery::Kill);
        // State is untouched; teardown is the caller's job.
        assert_eq!(p.state(), ProcessState::Active);

        // Out-of-range signals are ignored.
        assert_eq!(p.signal_trigger(MAX_SIGNALS + 3), SignalDelivery::Accepted);
    }

    #[test]
    fn clearing_an_action_restores_ignore() {
        let mut p = fresh_process(2);
        p.set_signal_action(4, 0x2000, 0x3000, 0);
        p.set_signal_action(4, 0, 0, 0);
        assert_eq!(p.signal_trigger(4), SignalDelivery::Accepted);
        assert_eq!(p.state(), ProcessState::Active);
    }

    #[test]
    fn clone_shares_the_address_space_and_copies_descriptors() {
        let mut parent = fresh_process(1);
        let (reader, writer) = create_pipe();
        let rfd = parent.store_file(reader);
        let wfd = parent.store_file(writer);

        let space_refs = Arc::strong_count(parent.address_space());
        let child = parent.clone_for(Pid(2), 0x40_0000, 0x7000_0000, 42);

        assert_eq!(child.pid(), Pid(2));
        assert_eq!(child.parent(), Pid(1));
        assert_eq!(child.state(), ProcessState::Active);
        // One more owner of the same address space.
        assert!(Arc::ptr_eq(parent.address_space(), child.address_space()));
        assert_eq!(Arc::strong_count(parent.address_space()), space_refs + 1);
        // Entry registers per the clone contract.
        assert_eq!(child.context().program_counter(), 0x40_0000);
        assert_eq!(child.context().stack_pointer(), 0x7000_0000);
        assert_eq!(child.context().gp_regs[0], 42);
        assert_eq!(child.context().gp_regs[30], 0);
        // Descriptors duplicated at the same numbers.
        assert!(child.file(rfd).is_some());
        assert!(child.file(wfd).is_some());
        assert_eq!(child.open_file_count(), 2);
    }

    #[test]
    fn descriptor_table_reuses_lowest_free_slot() {
        let mut p = fresh_process(1);
        let (r1, w1) = create_pipe();
        let (r2, _w2) = create_pipe();
        assert_eq!(p.store_file(r1), 0);
        assert_eq!(p.store_file(w1), 1);
        p.close_file(0).unwrap();
        assert_eq!(p.store_file(r2), 0);

        assert_eq!(p.close_file(9), Err(Errno::NoFile));
        let (r3, _w3) = create_pipe();
        assert_eq!(p.store_file_at(r3.clone(), 1), Err(Errno::Exists));
        assert_eq!(p.store_file_at(r3, 7), Ok(()));
    }
}
