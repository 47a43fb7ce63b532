//! The kernel façade
//!
//! One value owning the global singletons the syscall and interrupt paths
//! consult: the run queue, the process table, the RAM filesystem, and the
//! pid counter. Entry points lock [`KERNEL`] exactly once and thread
//! `&mut Kernel` through whatever they call; the kernel is non-reentrant
//! (interrupts stay masked until the return to user mode), so the lock is
//! never contended; it exists to make the sharing story explicit.

use alloc::sync::Arc;
use alloc::vec;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::error::{Errno, SysResult};
use crate::fs::fat32::Fat32;
use crate::fs::FileType;
use crate::mm::address_space::load_address_space;
use crate::process::{
    Pid, Process, ProcessState, ProcessTable, SignalDelivery, KERNEL_STACK_SIZE,
};
use crate::sched::RunQueue;

lazy_static! {
    /// The kernel context. Locked once per entry from the vector stubs.
    pub static ref KERNEL: Mutex<Kernel> = Mutex::new(Kernel::new());
}

pub struct Kernel {
    scheduler: RunQueue,
    processes: ProcessTable,
    ramfs: Option<Arc<Fat32>>,
    next_pid: u64,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    pub const fn new() -> Self {
        Self {
            scheduler: RunQueue::new(),
            processes: ProcessTable::new(),
            ramfs: None,
            next_pid: 1,
        }
    }

    /// Draw the next pid from the monotonic counter.
    pub fn next_pid(&mut self) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;
        Pid(pid)
    }

    /// Mount the RAM filesystem.
    pub fn set_ramfs(&mut self, fs: Arc<Fat32>) {
        if self.ramfs.is_some() {
            log::info!("replacing previously mounted ramfs");
        }
        self.ramfs = Some(fs);
    }

    pub fn ramfs(&self) -> Option<Arc<Fat32>> {
        self.ramfs.clone()
    }

    /// Adopt a process into the table; ACTIVE processes join the run
    /// queue.
    pub fn add_process(&mut self, process: Process) {
        let pid = process.pid();
        let runnable = process.state() == ProcessState::Active;
        self.processes.insert(process);
        if runnable {
            self.scheduler.enqueue(pid);
        }
    }

    pub fn process(&self, pid: Pid) -> Option<&Process> {
        self.processes.get(pid)
    }

    pub fn process_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.processes.get_mut(pid)
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    /// The currently running process, if the current slot is occupied.
    pub fn active_process(&mut self) -> Option<&mut Process> {
        let pid = self.scheduler.current()?;
        self.processes.get_mut(pid)
    }

    pub fn active_pid(&self) -> Option<Pid> {
        self.scheduler.current()
    }

    /// Empty the current slot without requeueing (the running process
    /// blocked or died).
    pub fn sleep_active_process(&mut self) {
        self.scheduler.set_current(None);
    }

    /// Remove the running process from the table entirely; its address
    /// space and file references drop with it.
    pub fn delete_active_process(&mut self) {
        if let Some(pid) = self.scheduler.current() {
            self.processes.remove(pid);
            self.scheduler.set_current(None);
        }
    }

    /// Rotate the run queue and make the new current process's address
    /// space active.
    pub fn switch_task(&mut self) {
        self.scheduler.sched_next();
        if let Some(pid) = self.scheduler.current() {
            if let Some(process) = self.processes.get(pid) {
                load_address_space(process.address_space());
            }
        }
    }

    /// Write `value` into the current process's return-register slot.
    pub fn set_caller_return(&mut self, value: u64) {
        if let Some(process) = self.active_process() {
            process.context_mut().set_return_value(value);
        }
    }

    /// Deliver `signal` to `pid`.
    ///
    /// Returns 0 when the signal was accepted (handler invoked or
    /// ignored), 1 when it killed the target, and -1 when it was rejected
    /// (no such process, wrong state, or a handler is already running).
    /// A SIGWAIT target that accepts a signal wakes up: back to ACTIVE
    /// (or SIGNAL while its handler runs) and onto the run queue.
    pub fn raise_signal(&mut self, pid: Pid, signal: usize) -> i64 {
        let Some(state) = self.processes.get(pid).map(|p| p.state()) else {
            log::warn!("attempt to raise signal {} on non-existent pid {}", signal, pid);
            return -1;
        };
        if state != ProcessState::Active && state != ProcessState::SigWait {
            log::warn!("process {} cannot accept signal: invalid state", pid);
            return -1;
        }
        let waking = state == ProcessState::SigWait;

        let outcome = match self.processes.get_mut(pid) {
            Some(process) => process.signal_trigger(signal),
            None => return -1,
        };
        match outcome {
            SignalDelivery::Kill => {
                log::debug!("killing process {} due to signal {}", pid, signal);
                if state == ProcessState::Active {
                    self.scheduler.remove(pid);
                    if self.scheduler.current() == Some(pid) {
                        self.scheduler.set_current(None);
                        self.switch_task();
                    }
                }
                self.processes.remove(pid);
                1
            }
            SignalDelivery::Accepted => {
                if waking {
                    if let Some(process) = self.processes.get_mut(pid) {
                        if process.state() == ProcessState::SigWait {
                            process.set_state(ProcessState::Active);
                        }
                    }
                    self.scheduler.enqueue(pid);
                }
                0
            }
            SignalDelivery::Rejected => -1,
        }
    }

    /// Replace the current process's image with the executable at `path`.
    ///
    /// Reads the file through the RAM filesystem, builds a fresh address
    /// space, maps the program and a new user stack, marshals the
    /// arguments, and opens the standard descriptors against the log
    /// stream where they are empty. On success the process resumes at the
    /// new entry point; errors leave the caller runnable.
    pub fn exec(&mut self, path: &str, argv: &[&[u8]], envp: &[&[u8]]) -> SysResult<()> {
        use crate::arch::aarch64::serial::{Mode, UART};
        use crate::mm::address_space::create_address_space;
        use crate::mm::page_table::map_region;
        use crate::mm::{PageFlags, VirtAddr, FRAME_ALLOCATOR};
        use crate::process::args::image_size;
        use crate::process::{USER_STACK_BASE, USER_STACK_SIZE, USER_STACK_TOP};

        match self.active_process() {
            Some(process) if process.state() == ProcessState::Active => {}
            _ => return Err(Errno::Unknown),
        }
        let fs = self.ramfs.clone().ok_or(Errno::Io)?;
        if fs.file_type(path).map_err(|_| Errno::NoFile)? != FileType::File {
            log::info!("exec() failure: {} not found", path);
            return Err(Errno::NoFile);
        }
        let size = fs.file_size(path).map_err(|_| Errno::NoFile)?;
        if image_size(argv, envp) > USER_STACK_SIZE {
            return Err(Errno::Inval);
        }

        // Pull the whole image into a kernel buffer before touching the
        // address space.
        let mut image = vec![0u8; size];
        for (sector, chunk) in image.chunks_mut(fs.sector_size()).enumerate() {
            if fs.read_file(path, sector, chunk).is_err() {
                log::warn!("exec() failure: I/O error reading {}", path);
                return Err(Errno::Io);
            }
        }

        let previous = self
            .active_process()
            .ok_or(Errno::Unknown)?
            .address_space()
            .clone();
        let space = create_address_space()?;
        load_address_space(&space);
        let built: SysResult<u64> = (|| {
            let entry = crate::elf::build_program_image(&image)?;
            let stack_frame = FRAME_ALLOCATOR.lock().reserve(USER_STACK_SIZE)?;
            map_region(
                VirtAddr::new(USER_STACK_BASE),
                USER_STACK_SIZE,
                stack_frame,
                PageFlags::RW | PageFlags::USER,
            )?;
            Ok(entry)
        })();
        let entry = match built {
            Ok(entry) => entry,
            Err(e) => {
                // The caller stays on its old image; put its tables back.
                load_address_space(&previous);
                return Err(e);
            }
        };
        let kernel_stack = vec![0u8; KERNEL_STACK_SIZE].into_boxed_slice();

        let process = self.active_process().ok_or(Errno::Unknown)?;
        process.replace_image(entry, USER_STACK_TOP, kernel_stack, space)?;
        // SAFETY: the fresh user stack was just mapped writable and the
        // image was bounds-checked against it.
        unsafe { process.context_mut().store_program_args(argv, envp) };

        for (fd, mode) in [(0, Mode::ReadOnly), (1, Mode::WriteOnly), (2, Mode::WriteOnly)] {
            if process.file(fd).is_none() {
                let _ = process.store_file_at(UART.open(mode), fd);
            }
        }
        Ok(())
    }
}

/// Bring the machine up and enter the first process. The platform
/// bootstrap has already enabled the MMU with the kernel half identity
/// mapped and jumps here with the DTB pointer and the mapped kernel-window
/// size.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub fn boot(dtb: u64, kernel_size: u64) -> ! {
    use crate::arch::aarch64::serial::{UART, UART_IRQ};
    use crate::arch::aarch64::timer::{TIMER, TIMER_IRQS};
    use crate::arch::aarch64::{context::Context, vectors};
    use crate::mm::address_space::create_address_space;
    use crate::mm::page_table::{set_page_entry, HIGH_MEM_BASE};
    use crate::mm::{
        heap, MemoryMap, MemoryType, PageAllocator, PageFlags, PhysAddr, VirtAddr,
        FRAME_ALLOCATOR, PAGE_SIZE,
    };

    extern "C" {
        /// End of the kernel image, placed by the linker script.
        static __end: u8;
    }

    crate::irq::init();
    UART.init();
    crate::irq::insert_handler(UART_IRQ, &*UART);
    crate::logger::init();

    log::info!("kestrel startup...");
    log::debug!("DTB location = {:#018x}", dtb);
    log::debug!("kernel size = {} MiB", kernel_size >> 20);

    // SAFETY: taking the address of a linker-provided symbol.
    let kernel_end = unsafe { &__end as *const u8 as u64 };

    fn place_or_halt(map: &mut MemoryMap, kind: MemoryType, location: u64, size: u64) {
        if map.place(kind, location, size).is_err() {
            log::error!("memory map overflow during boot");
            crate::arch::halt();
        }
    }

    // Physical layout: 512 MiB of RAM with the peripheral hole, minus the
    // kernel image, the allocator's block map, and the RAM-disk image.
    let mut map = MemoryMap::new();
    place_or_halt(&mut map, MemoryType::Available, 0, 0x2000_0000);
    place_or_halt(&mut map, MemoryType::Mmio, 0x3f00_0000, 0x100_0000);
    place_or_halt(&mut map, MemoryType::Unavailable, 0, kernel_size);
    let map_bytes = PageAllocator::map_size(&map, PAGE_SIZE);
    place_or_halt(
        &mut map,
        MemoryType::Unavailable,
        kernel_end - HIGH_MEM_BASE,
        map_bytes as u64,
    );
    place_or_halt(&mut map, MemoryType::Unavailable, 0x800_0000, 1 << 26);

    log::debug!("constructing page allocator at {:#018x}", kernel_end);
    // SAFETY: the block-map region starts at the end of the kernel image
    // and was carved out of the memory map above.
    unsafe { FRAME_ALLOCATOR.lock().init(&map, kernel_end as *mut u8, PAGE_SIZE) };

    let heap_start = (kernel_end + map_bytes as u64 + PAGE_SIZE as u64 - 1)
        & !(PAGE_SIZE as u64 - 1);
    let heap_size = (HIGH_MEM_BASE + kernel_size).saturating_sub(heap_start);
    log::debug!(
        "constructing kernel heap at {:#018x} with size {:#x}",
        heap_start,
        heap_size
    );
    // SAFETY: the heap region sits between the block map's end and the end
    // of the boot-mapped kernel window, unused by anything else.
    unsafe { heap::init_heap(heap_start as *mut u8, heap_size as usize) };

    // Window the first physical gigabyte high so the RAM-disk image is
    // reachable, then mount it.
    set_page_entry(
        2,
        VirtAddr::new(HIGH_MEM_BASE + 0x1_0000_0000),
        PhysAddr::new(0),
        PageFlags::RW,
    );
    // SAFETY: the RAM-disk image sits at physical 0x800_0000 inside the
    // gigabyte window just mapped.
    let ramfs = unsafe { Fat32::from_raw((HIGH_MEM_BASE + 0x1_0800_0000) as *const u8) };
    match ramfs {
        Ok(fs) => KERNEL.lock().set_ramfs(Arc::new(fs)),
        Err(e) => {
            log::error!("failed to mount ramfs: {}", e);
            crate::arch::halt();
        }
    }

    TIMER.reset();
    for source in TIMER_IRQS {
        crate::irq::insert_handler(source, &*TIMER);
    }

    log::debug!("creating first process");
    let space = match create_address_space() {
        Ok(space) => space,
        Err(e) => {
            log::error!("failed to create init address space: {}", e);
            crate::arch::halt();
        }
    };
    {
        let mut kernel = KERNEL.lock();
        let pid = kernel.next_pid();
        kernel.add_process(Process::new(pid, Pid(0), space));
        kernel.switch_task();
        if let Err(e) = kernel.exec("/bin/init", &[b"/bin/init".as_slice()], &[b"cwd=/".as_slice()]) {
            log::error!("failed to load /bin/init: {}", e);
            drop(kernel);
            crate::arch::halt();
        }
    }

    log::info!("bootup complete, loading first process...");
    let ctx = KERNEL
        .lock()
        .active_process()
        .map(|p| p.context() as *const Context);
    match ctx {
        // SAFETY: the context belongs to the table-resident init process
        // and stays in place while we jump to it.
        Some(ctx) => unsafe { vectors::load_context(ctx) },
        None => crate::arch::halt(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::{AddressSpace, PhysAddr};

    fn fresh_kernel(pids: u64) -> Kernel {
        let mut kernel = Kernel::new();
        for _ in 0..pids {
            let pid = kernel.next_pid();
            let space = Arc::new(AddressSpace::new(PhysAddr::new(0x1000 * pid.0), pid.0 as u16));
            kernel.add_process(Process::new(pid, Pid(0), space));
        }
        kernel.switch_task();
        kernel
    }

    #[test]
    fn pids_are_monotonic() {
        let mut kernel = Kernel::new();
        assert_eq!(kernel.next_pid(), Pid(1));
        assert_eq!(kernel.next_pid(), Pid(2));
        assert_eq!(kernel.next_pid(), Pid(3));
    }

    #[test]
    fn switch_task_rotates_processes() {
        let mut kernel = fresh_kernel(3);
        let first = kernel.active_pid().unwrap();
        kernel.switch_task();
        let second = kernel.active_pid().unwrap();
        kernel.switch_task();
        let third = kernel.active_pid().unwrap();
        assert_ne!(first, second);
        assert_ne!(second, third);
        kernel.switch_task();
        assert_eq!(kernel.active_pid(), Some(first));
    }

    #[test]
    fn delete_active_removes_everything() {
        let mut kernel = fresh_kernel(2);
        let doomed = kernel.active_pid().unwrap();
        kernel.delete_active_process();
        assert!(kernel.process(doomed).is_none());
        assert_eq!(kernel.active_pid(), None);
        kernel.switch_task();
        assert_ne!(kernel.active_pid(), Some(doomed));
    }

    #[test]
    fn signals_to_missing_or_busy_processes_are_rejected() {
        let mut kernel = fresh_kernel(1);
        assert_eq!(kernel.raise_signal(Pid(99), 1), -1);

        // A process already in a handler rejects another delivery.
        let pid = kernel.active_pid().unwrap();
        kernel
            .process_mut(pid)
            .unwrap()
            .set_signal_action(1, 0x2000, 0x3000, 0);
        assert_eq!(kernel.raise_signal(pid, 1), 0);
        assert_eq!(kernel.raise_signal(pid, 1), -1);
    }

    #[test]
    fn signal_wakes_a_sigwait_process() {
        let mut kernel = fresh_kernel(2);
        let sleeper = kernel.active_pid().unwrap();
        kernel
            .process_mut(sleeper)
            .unwrap()
            .set_signal_action(7, 0x2000, 0x3000, 5);
        kernel
            .process_mut(sleeper)
            .unwrap()
            .set_state(ProcessState::SigWait);
        kernel.sleep_active_process();
        kernel.switch_task();
        assert_ne!(kernel.active_pid(), Some(sleeper));

        assert_eq!(kernel.raise_signal(sleeper, 7), 0);
        let woken = kernel.process(sleeper).unwrap();
        assert_eq!(woken.state(), ProcessState::Signal);
        assert!(woken.has_backup_context());

        // It rotates back in eventually.
        kernel.switch_task();
        assert_eq!(kernel.active_pid(), Some(sleeper));
    }

    #[test]
    fn signal_with_no_handler_still_wakes_the_sleeper() {
        let mut kernel = fresh_kernel(2);
        let sleeper = kernel.active_pid().unwrap();
        kernel
            .process_mut(sleeper)
            .unwrap()
            .set_state(ProcessState::SigWait);
        kernel.sleep_active_process();
        kernel.switch_task();

        assert_eq!(kernel.raise_signal(sleeper, 3), 0);
        assert_eq!(
            kernel.process(sleeper).unwrap().state(),
            ProcessState::Active
        );
    }

    #[test]
    fn kill_action_tears_the_target_down() {
        let mut kernel = fresh_kernel(3);
        let current = kernel.active_pid().unwrap();
        // Pick a queued (non-current) victim.
        kernel.switch_task();
        let victim = kernel.active_pid().unwrap();
        kernel.process_mut(victim).unwrap().set_signal_kill(9);
        // Rotate so the victim is back in the queue.
        kernel.switch_task();
        let _ = current;

        assert_eq!(kernel.raise_signal(victim, 9), 1);
        assert!(kernel.process(victim).is_none());
        // The victim never runs again.
        for _ in 0..4 {
            kernel.switch_task();
            assert_ne!(kernel.active_pid(), Some(victim));
        }
    }

    #[test]
    fn kill_of_the_running_process_reschedules() {
        let mut kernel = fresh_kernel(2);
        let victim = kernel.active_pid().unwrap();
        kernel.process_mut(victim).unwrap().set_signal_kill(9);

        assert_eq!(kernel.raise_signal(victim, 9), 1);
        assert!(kernel.process(victim).is_none());
        let successor = kernel.active_pid().unwrap();
        assert_ne!(successor, victim);
    }

    #[test]
    fn exec_without_ramfs_fails_cleanly() {
        let mut kernel = fresh_kernel(1);
        assert_eq!(
            kernel.exec("/bin/init", &[b"/bin/init".as_slice()], &[]),
            Err(Errno::Io)
        );
    }
}
