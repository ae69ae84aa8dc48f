//! DMA channels
//!
//! A [`Channel`] is a handle to one of the ADM's sixteen hardware channels.
//! Use it to configure the channel, prepare transfers, and start them.
//!
//! Transfers go through three steps:
//!
//! 1. [`prep_slave_sg`](Channel::prep_slave_sg) builds a command list for a
//!    scatter/gather list and queues it. It returns the transfer's
//!    [`Cookie`].
//! 2. [`issue_pending`](Channel::issue_pending) releases every queued
//!    transfer to the hardware. If the channel is idle, the first one starts
//!    right away.
//! 3. The interrupt handler, [`Adm::on_interrupt`], completes the running
//!    transfer and starts the next. Poll progress with
//!    [`status`](Channel::status), or await a
//!    [`Transfer`](crate::Transfer).
//!
//! Channels run one transfer at a time, in the order they were issued.

use core::cell::RefCell;

use mycelium_bitfield::bitfield;

use crate::descriptor::{Chain, ChainParams, CommandList, Direction, Fragment, MAX_XFER};
use crate::memory::{DmaMemory, IdentityMapped};
use crate::ral::{
    adm::{ChannelConf, CrciCtl, ResultConf},
    Register, Registers,
};
use crate::{Adm, Error};

pub(crate) mod queue;

pub use queue::Cookie;
use queue::{Location, Queue};

bitfield! {
    /// Options for a prepared transfer.
    #[derive(PartialEq, Eq)]
    pub struct Flags<u32> {
        /// Wake the transfer's waker when it completes.
        pub const INTERRUPT: bool;
    }
}

/// Peripheral-side settings for a channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlaveConfig {
    /// Device address read by device-to-memory transfers.
    pub src_addr: u32,
    /// Device address written by memory-to-device transfers.
    pub dst_addr: u32,
    /// Burst, in bytes, for device-to-memory transfers.
    pub src_maxburst: u32,
    /// Burst, in bytes, for memory-to-device transfers.
    pub dst_maxburst: u32,
    /// The device paces the transfer through the channel's CRCI.
    pub device_fc: bool,
}

impl SlaveConfig {
    const EMPTY: Self = Self {
        src_addr: 0,
        dst_addr: 0,
        src_maxburst: 0,
        dst_maxburst: 0,
        device_fc: false,
    };
}

/// CRCI block size.
///
/// The CRCI signals readiness once per block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum BlockSize {
    B16 = 0,
    B32 = 1,
    B64 = 2,
    B128 = 3,
    B192 = 4,
    B256 = 5,
}

impl BlockSize {
    /// Returns the block size for a burst of `bytes`, if there is one.
    pub const fn from_burst(bytes: u32) -> Option<Self> {
        Some(match bytes {
            16 => Self::B16,
            32 => Self::B32,
            64 => Self::B64,
            128 => Self::B128,
            192 => Self::B192,
            256 => Self::B256,
            _ => return None,
        })
    }

    /// Block size, in bytes.
    pub const fn bytes(self) -> u32 {
        match self {
            Self::B16 => 16,
            Self::B32 => 32,
            Self::B64 => 64,
            Self::B128 => 128,
            Self::B192 => 192,
            Self::B256 => 256,
        }
    }
}

/// A client rate control interface, the ADM's flow control signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Crci {
    port: u8,
    mux: bool,
}

impl Crci {
    /// A CRCI on `port`, `1..16`, optionally through the secondary mux.
    ///
    /// Port 0 means "no CRCI," and returns `None`.
    pub const fn new(port: u8, mux: bool) -> Option<Self> {
        if port == 0 || port > 0xf {
            None
        } else {
            Some(Self { port, mux })
        }
    }

    /// Decode a packed binding cell: port in the low four bits, any higher
    /// bit selects the mux.
    pub const fn from_cell(cell: u32) -> Option<Self> {
        Self::new((cell & 0xf) as u8, cell >> 4 != 0)
    }

    pub const fn port(self) -> u8 {
        self.port
    }

    pub const fn mux(self) -> bool {
        self.mux
    }

    /// The CRCI control value for transfers in `block_size` blocks.
    pub fn control(self, block_size: BlockSize) -> CrciCtl {
        CrciCtl::new()
            .with(CrciCtl::BLOCK_SIZE, block_size as u32)
            .with(CrciCtl::MUX_SEL, self.mux)
    }
}

/// Where a transfer stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Queued, but not started.
    Pending,
    /// Running, or unknown to the channel.
    InProgress,
    Complete,
    /// The channel reported an error since its last prepared transfer.
    Error,
}

/// A transfer's status, and how many bytes it has left.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxState {
    pub status: Status,
    /// Bytes left to move. The ADM doesn't report progress, so this is the
    /// full length until the transfer starts, and zero afterwards.
    pub residue: u64,
}

/// Software state of a channel. Only reachable under the channel's lock.
pub(crate) struct ChannelState<M: DmaMemory> {
    slave: SlaveConfig,
    crci: Option<Crci>,
    block_size: BlockSize,
    /// Sticky hardware error.
    pub(crate) error: bool,
    /// The channel and result configuration are programmed.
    pub(crate) initialized: bool,
    pub(crate) queue: Queue<M>,
}

impl<M: DmaMemory> ChannelState<M> {
    pub(crate) const fn new() -> Self {
        Self {
            slave: SlaveConfig::EMPTY,
            crci: None,
            block_size: BlockSize::B16,
            error: false,
            initialized: false,
            queue: Queue::new(),
        }
    }

    fn chain_params(&self, direction: Direction) -> ChainParams {
        let slave = &self.slave;
        let (burst, device_addr) = match direction {
            Direction::MemToDev => (slave.dst_maxburst, slave.dst_addr),
            _ => (slave.src_maxburst, slave.src_addr),
        };
        ChainParams {
            direction,
            burst: if slave.device_fc { burst } else { MAX_XFER },
            flow_control: slave.device_fc,
            crci: self.crci.map_or(0, Crci::port),
            device_addr,
        }
    }

    /// Start the next issued transaction on channel `index`.
    ///
    /// Does nothing if nothing is issued. The channel must be idle.
    pub(crate) fn start_next<R: Registers>(&mut self, index: usize, registers: &R) {
        debug_assert!(self.queue.current().is_none());
        let Some(transaction) = self.queue.next_issued() else {
            return;
        };

        if !self.initialized {
            registers.write(Register::ChannelConf(index), ChannelConf::active().bits());
            registers.write(Register::ResultConf(index), ResultConf::active().bits());
            self.initialized = true;
        }

        if let Some(crci) = self.crci {
            let control = crci.control(self.block_size);
            registers.write(Register::CrciCtl(crci.port() as usize), control.bits());
        }

        // Configuration, and the command list itself, must land before the
        // channel starts.
        registers.write_barrier();

        let cmd_ptr = transaction.commands.command_pointer();
        tracing::debug!(
            channel = index,
            cookie = transaction.cookie.get(),
            cmd_ptr = ?format_args!("{:#010x}", cmd_ptr.bits()),
            "starting command list"
        );
        self.queue.set_current(transaction);
        registers.write(Register::CmdPtr(index), cmd_ptr.bits());
    }
}

/// A DMA channel
///
/// Allocate channels with [`Adm::channel`] or [`Adm::translate`]. Channel
/// handles are cheap to copy, and every copy refers to the same channel
/// state.
pub struct Channel<'a, R, M: DmaMemory = IdentityMapped> {
    index: usize,
    adm: &'a Adm<R, M>,
}

impl<R, M: DmaMemory> Clone for Channel<'_, R, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R, M: DmaMemory> Copy for Channel<'_, R, M> {}

impl<'a, R, M: DmaMemory> Channel<'a, R, M> {
    pub(crate) fn new(index: usize, adm: &'a Adm<R, M>) -> Self {
        Self { index, adm }
    }

    /// Returns the channel index, `0..16`.
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn with_state<T>(&self, f: impl FnOnce(&mut ChannelState<M>) -> T) -> T {
        critical_section::with(|cs| f(&mut *self.adm.channels[self.index].borrow_ref_mut(cs)))
    }

    /// Returns `true` if the channel reported an error since its last
    /// prepared transfer.
    pub fn has_error(&self) -> bool {
        self.with_state(|state| state.error)
    }

    /// Bind the channel to a CRCI, or unbind it with `None`.
    ///
    /// Takes effect when the next transfer starts.
    pub fn bind(&self, crci: Option<Crci>) {
        tracing::debug!(channel = self.index, ?crci, "binding CRCI");
        self.with_state(|state| state.crci = crci);
    }

    /// Returns the channel's CRCI.
    pub fn crci(&self) -> Option<Crci> {
        self.with_state(|state| state.crci)
    }

    /// Set the channel's peripheral settings.
    ///
    /// When the channel has a CRCI, the larger of the two bursts must be a
    /// [`BlockSize`]. Otherwise this returns [`Error::UnsupportedBurst`], and
    /// the previous settings stay in place.
    ///
    /// Settings apply to transfers prepared afterwards.
    pub fn configure(&self, config: SlaveConfig) -> crate::Result<()> {
        self.with_state(|state| {
            if state.crci.is_some() {
                let burst = config.src_maxburst.max(config.dst_maxburst);
                let Some(block_size) = BlockSize::from_burst(burst) else {
                    tracing::warn!(channel = self.index, burst, "unsupported CRCI burst");
                    return Err(Error::UnsupportedBurst(burst));
                };
                state.block_size = block_size;
            }
            state.slave = config;
            tracing::debug!(channel = self.index, ?config, "configured channel");
            Ok(())
        })
    }

    /// Returns the status of the transfer identified by `cookie`.
    ///
    /// A channel error overrides the status of every transfer that hasn't
    /// completed. A transfer the channel doesn't know about, like one that
    /// was terminated, is reported as in progress.
    pub fn status(&self, cookie: Cookie) -> TxState {
        self.with_state(|state| {
            if state.queue.is_complete(cookie) {
                return TxState {
                    status: Status::Complete,
                    residue: 0,
                };
            }
            let (status, residue) = match state.queue.find(cookie) {
                Some(Location::Queued(length)) => (Status::Pending, length),
                Some(Location::Running) | None => (Status::InProgress, 0),
            };
            TxState {
                status: if state.error { Status::Error } else { status },
                residue,
            }
        })
    }
}

impl<'a, R: Registers, M: DmaMemory> Channel<'a, R, M> {
    /// Release every prepared transfer to the hardware.
    ///
    /// If the channel is idle, this starts the first.
    pub fn issue_pending(&self) {
        self.with_state(|state| {
            if state.queue.issue() && state.queue.current().is_none() {
                state.start_next(self.index, &self.adm.registers);
            }
        })
    }

    /// Flush the channel, and discard all of its transfers.
    ///
    /// Discarded transfers don't complete. Their wakers aren't woken, and
    /// their [`Transfer`](crate::Transfer)s never resolve.
    pub fn terminate_all(&self) {
        self.adm.registers.write(Register::FlushState(self.index), 0);
        let discarded = self.with_state(|state| state.queue.discard_all());
        tracing::debug!(
            channel = self.index,
            discarded = discarded.len(),
            "terminated all transfers"
        );
    }
}

impl<'a, R, M: DmaMemory + Clone> Channel<'a, R, M> {
    /// Prepare a transfer between a device and the memory in `fragments`.
    ///
    /// `direction` must be [`Direction::DevToMem`] or
    /// [`Direction::MemToDev`]. The device address and, for flow controlled
    /// channels, the burst come from the channel's [`SlaveConfig`]. Without
    /// flow control, rows are as long as they can be.
    ///
    /// The transfer is queued but doesn't start until
    /// [`issue_pending`](Self::issue_pending). Preparing a transfer clears the
    /// channel's error.
    ///
    /// # Safety
    ///
    /// The memory described by `fragments` must stay valid until the
    /// transfer completes or is terminated.
    pub unsafe fn prep_slave_sg(
        &self,
        fragments: &[Fragment],
        direction: Direction,
        flags: Flags,
    ) -> crate::Result<Cookie> {
        let params = self.with_state(|state| state.chain_params(direction));
        let chain = Chain::new(fragments, params).map_err(|err| {
            tracing::warn!(channel = self.index, ?err, "rejected transfer");
            err
        })?;

        let length = chain.length();
        let descriptors = chain.len();
        let commands = CommandList::build(&self.adm.memory, chain)?;

        let submitted = self.with_state(|state| {
            let submitted = state.queue.submit(commands, length, flags);
            if submitted.is_ok() {
                state.error = false;
            }
            submitted
        });

        match submitted {
            Ok(cookie) => {
                tracing::trace!(
                    channel = self.index,
                    cookie = cookie.get(),
                    len = length,
                    descriptors,
                    "queued transfer"
                );
                Ok(cookie)
            }
            Err(_commands) => Err(Error::NoMemory),
        }
    }
}

/// Channel state storage.
pub(crate) type SharedState<M> = critical_section::Mutex<RefCell<ChannelState<M>>>;
