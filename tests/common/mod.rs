//! Test doubles for the ADM registers and command list memory.

#![allow(dead_code)]

use std::{
    alloc::{self, Layout},
    collections::{HashMap, VecDeque},
    ptr::NonNull,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use qcom_adm::{
    channel::{Channel, Cookie, Crci, Flags, SlaveConfig},
    descriptor::{Direction, Fragment},
    memory::{DmaBuffer, DmaMemory},
    ral::{Register, Registers},
    Adm,
};

pub type TestAdm = Adm<MockRegisters, TestMemory>;
pub type TestChannel<'a> = Channel<'a, MockRegisters, TestMemory>;

/// The peripheral register on the far side of every test transfer.
pub const DEVICE: u32 = 0x1a00_0040;

pub fn adm() -> TestAdm {
    init_tracing();
    Adm::with_memory(MockRegisters::default(), TestMemory::default())
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

/// A register access observed by [`MockRegisters`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Write(Register, u32),
    Barrier,
}

pub const STATUS_VALID: u32 = 1 << 1;
pub const RESULT_VALID: u32 = 1 << 31;
pub const RESULT_FLUSH: u32 = 1 << 2;
pub const RESULT_ERR: u32 = 1 << 3;
pub const RESULT_DONE: u32 = RESULT_VALID | 1 << 1;

#[derive(Default)]
struct Inner {
    values: HashMap<Register, u32>,
    results: HashMap<usize, VecDeque<u32>>,
    log: Vec<Access>,
}

/// Registers backed by a map, recording every write and barrier.
///
/// Results posted with [`post_result`](Self::post_result) behave like the
/// hardware's result FIFO: reading the result register pops one, and the
/// channel's status and interrupt bits clear once the FIFO drains.
#[derive(Default)]
pub struct MockRegisters {
    inner: Mutex<Inner>,
}

impl MockRegisters {
    /// Set a register's value, as the hardware would.
    pub fn set(&self, reg: Register, value: u32) {
        self.inner.lock().unwrap().values.insert(reg, value);
    }

    pub fn value(&self, reg: Register) -> u32 {
        self.inner
            .lock()
            .unwrap()
            .values
            .get(&reg)
            .copied()
            .unwrap_or(0)
    }

    /// Post a result for `channel`, and raise its interrupt.
    pub fn post_result(&self, channel: usize, result: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.results.entry(channel).or_default().push_back(result);
        *inner.values.entry(Register::Status(channel)).or_default() |= STATUS_VALID;
        *inner.values.entry(Register::DomainIrqStatus).or_default() |= 1 << channel;
    }

    /// Take every access recorded so far.
    pub fn take_log(&self) -> Vec<Access> {
        std::mem::take(&mut self.inner.lock().unwrap().log)
    }

    /// Command pointers written to `channel`, in order.
    pub fn cmd_ptrs(&self, channel: usize) -> Vec<u32> {
        self.inner
            .lock()
            .unwrap()
            .log
            .iter()
            .filter_map(|access| match *access {
                Access::Write(Register::CmdPtr(ch), value) if ch == channel => Some(value),
                _ => None,
            })
            .collect()
    }

    /// All writes to `reg`, in order.
    pub fn writes_to(&self, reg: Register) -> Vec<u32> {
        self.inner
            .lock()
            .unwrap()
            .log
            .iter()
            .filter_map(|access| match *access {
                Access::Write(r, value) if r == reg => Some(value),
                _ => None,
            })
            .collect()
    }
}

impl Registers for MockRegisters {
    fn read(&self, reg: Register) -> u32 {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        if let Register::Result(channel) = reg {
            let fifo = inner.results.entry(channel).or_default();
            if let Some(result) = fifo.pop_front() {
                if fifo.is_empty() {
                    *inner.values.entry(Register::Status(channel)).or_default() &= !STATUS_VALID;
                    *inner.values.entry(Register::DomainIrqStatus).or_default() &= !(1 << channel);
                }
                return result;
            }
        }
        inner.values.get(&reg).copied().unwrap_or(0)
    }

    fn write(&self, reg: Register, value: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.log.push(Access::Write(reg, value));
        if !reg.is_read_only() {
            inner.values.insert(reg, value);
        }
    }

    fn write_barrier(&self) {
        self.inner.lock().unwrap().log.push(Access::Barrier);
    }
}

/// Heap memory with made-up bus addresses, one page apart from
/// [`TestMemory::BASE`]. Counts live allocations, and fails on request.
#[derive(Clone, Default)]
pub struct TestMemory {
    live: Arc<AtomicUsize>,
    next_page: Arc<AtomicU32>,
    fail: Arc<AtomicBool>,
}

impl TestMemory {
    pub const BASE: u32 = 0x4000_0000;

    /// Bus address of the `n`th allocation.
    pub fn bus_addr(n: u32) -> u32 {
        Self::BASE + n * 0x1000
    }

    /// Number of allocations not yet freed.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Make every following allocation fail, or succeed again.
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

unsafe impl DmaMemory for TestMemory {
    fn allocate(&self, layout: Layout) -> Option<DmaBuffer> {
        if self.fail.load(Ordering::SeqCst) {
            return None;
        }
        let ptr = NonNull::new(unsafe { alloc::alloc(layout) })?;
        self.live.fetch_add(1, Ordering::SeqCst);
        let page = self.next_page.fetch_add(1, Ordering::SeqCst);
        Some(DmaBuffer {
            ptr,
            bus_addr: Self::bus_addr(page),
        })
    }

    unsafe fn deallocate(&self, buffer: DmaBuffer, layout: Layout) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        alloc::dealloc(buffer.ptr.as_ptr(), layout)
    }
}

/// The command pointer that starts the list at `bus_addr`.
pub fn cmd_ptr(bus_addr: u32) -> u32 {
    1 << 29 | bus_addr >> 3
}

pub fn irq() -> Flags {
    Flags::new().with(Flags::INTERRUPT, true)
}

/// Channel `index`, paced by CRCI `port` through the mux, in 16 byte bursts.
pub fn flow_controlled(adm: &TestAdm, index: usize, port: u8) -> TestChannel<'_> {
    let channel = adm.channel(index);
    channel.bind(Crci::new(port, true));
    channel
        .configure(SlaveConfig {
            src_addr: DEVICE,
            dst_addr: DEVICE,
            src_maxburst: 16,
            dst_maxburst: 16,
            device_fc: true,
        })
        .unwrap();
    channel
}

/// Prepare a memory-to-device transfer of `len` bytes.
pub fn prep(channel: &TestChannel<'_>, len: u32) -> Cookie {
    let fragments = [Fragment::new(0x8000_0000, len)];
    unsafe { channel.prep_slave_sg(&fragments, Direction::MemToDev, irq()) }.unwrap()
}

/// Report a successful result on `channel`, and run the interrupt handler.
pub fn complete(adm: &TestAdm, channel: usize) {
    adm.registers().post_result(channel, RESULT_DONE);
    adm.on_interrupt();
}
