//! DMA driver for the Qualcomm Application Data Mover (ADM).
//!
//! `qcom-adm` provides
//!
//! - a builder that turns scatter/gather lists into ADM command lists.
//! - sixteen DMA [`Channel`](crate::channel::Channel)s that queue transfers
//!   and run them one at a time.
//! - an interrupt handler that completes transfers and starts the next, and
//!   a [`Transfer`] future to await them.
//!
//! The driver moves data between memory and peripherals. It doesn't support
//! memory-to-memory transfers.
//!
//! # Getting started
//!
//! To create an [`Adm`] driver, you'll need
//!
//! 1. the address of the ADM register window.
//! 2. your execution environment (EE). Each EE sees its own partition of the
//!    channel registers.
//! 3. controller-visible memory for command lists. [`IdentityMapped`] works
//!    if your bus addresses equal CPU addresses.
//!
//! The ADM clocks and resets are your responsibility. Once they're running,
//! assign an `Adm` to a static, initialize it, and route the ADM interrupt to
//! [`Adm::on_interrupt`].
//!
//! ```no_run
//! use qcom_adm::{ral::Mmio, Adm, Config};
//! # const ADM_PTR: *const () = core::ptr::null();
//!
//! // Safety: the ADM window is at ADM_PTR, and we're EE 1.
//! static ADM: Adm<Mmio> = Adm::new(unsafe { Mmio::new(ADM_PTR, 1) });
//!
//! ADM.init(&Config::default());
//! let channel = ADM.channel(7);
//! ```
//!
//! Then, configure channels and prepare transfers. See the
//! [`channel`] module for the life of a transfer.
//!
//! ### License
//!
//! Licensed under either of
//!
//! - [Apache License, Version 2.0](http://www.apache.org/licenses/LICENSE-2.0)
//! - [MIT License](http://opensource.org/licenses/MIT)
//!
//! at your option.
//!
//! Unless you explicitly state otherwise, any contribution intentionally submitted
//! for inclusion in the work by you, as defined in the Apache-2.0 license, shall be
//! dual licensed as above, without any additional terms or conditions.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use core::cell::RefCell;

pub mod channel;
pub mod descriptor;
mod error;
mod interrupt;
pub mod memory;
pub mod ral;

pub use error::Error;
pub use interrupt::Transfer;
pub use memory::IdentityMapped;

use channel::{Channel, ChannelState, Crci, SharedState};
use memory::DmaMemory;
use ral::{
    adm::{ChannelConf, ClientConf, CrciCtl, GpCtl, ResultConf},
    Register, Registers, CHANNELS,
};

/// A DMA result
pub type Result<T> = core::result::Result<T, Error>;

/// An ADM driver.
///
/// `Adm` owns the state of all sixteen channels, and hands out
/// [`Channel`]s that operate on them. It reaches the hardware through `R`,
/// and allocates command lists from `M`.
///
/// Share the `Adm` between the code that prepares transfers and the interrupt
/// handler; a `static` works well.
pub struct Adm<R, M: DmaMemory = IdentityMapped> {
    pub(crate) registers: R,
    pub(crate) memory: M,
    pub(crate) channels: [SharedState<M>; CHANNELS],
}

impl<R> Adm<R> {
    /// Create an ADM driver that allocates command lists from the heap.
    ///
    /// See [`IdentityMapped`] for the requirements on your system.
    pub const fn new(registers: R) -> Self {
        Self::with_memory(registers, IdentityMapped)
    }
}

impl<R, M: DmaMemory> Adm<R, M> {
    /// Create an ADM driver that allocates command lists from `memory`.
    ///
    /// This doesn't touch the hardware. Call [`init`](Self::init) before
    /// using any channel.
    pub const fn with_memory(registers: R, memory: M) -> Self {
        Self {
            registers,
            memory,
            channels: [const { critical_section::Mutex::new(RefCell::new(ChannelState::new())) };
                CHANNELS],
        }
    }

    /// Access the registers.
    pub fn registers(&self) -> &R {
        &self.registers
    }

    /// Access the command list memory.
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// Returns a handle to channel `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is greater than or equal to the number of channels.
    pub fn channel(&self, index: usize) -> Channel<'_, R, M> {
        assert!(index < CHANNELS);
        Channel::new(index, self)
    }

    /// Resolve a two-cell binding, `[request, crci]`, to a channel.
    ///
    /// `request` selects the channel. The low four bits of `crci` select the
    /// CRCI port, and any higher bit selects the CRCI mux. A port of 0 leaves
    /// the channel without flow control.
    ///
    /// Returns `None` if there aren't two cells, or if the channel doesn't
    /// exist. Otherwise, binds the channel's CRCI and returns the channel.
    pub fn translate(&self, cells: &[u32]) -> Option<Channel<'_, R, M>> {
        let &[request, crci] = cells else {
            tracing::error!(cells = cells.len(), "binding needs two cells");
            return None;
        };

        let index = usize::try_from(request).ok().filter(|&index| index < CHANNELS)?;
        let channel = Channel::new(index, self);
        channel.bind(Crci::from_cell(crci));
        Some(channel)
    }
}

impl<R: Registers, M: DmaMemory> Adm<R, M> {
    /// Initialize the ADM.
    ///
    /// This resets every CRCI, and programs the client interfaces and
    /// general purpose control from `config`. Every channel reprograms its
    /// configuration before its next transfer.
    pub fn init(&self, config: &Config) {
        for crci in 0..CHANNELS {
            let reset = CrciCtl::new().with(CrciCtl::RST, true);
            self.registers.write(Register::CrciCtl(crci), reset.bits());
        }

        for (idx, ci) in config.client_interfaces.iter().enumerate() {
            self.registers.write(Register::ClientConf(idx), ci.conf().bits());
        }

        let gp_ctl = GpCtl::new()
            .with(GpCtl::LP_EN, true)
            .with(GpCtl::LP_CNT, u32::from(config.loop_count & 0xf));
        self.registers.write(Register::GpCtl, gp_ctl.bits());

        critical_section::with(|cs| {
            for channel in &self.channels {
                channel.borrow_ref_mut(cs).initialized = false;
            }
        });
        tracing::debug!(?config, "initialized ADM");
    }

    /// Quiesce the ADM.
    ///
    /// Disables every channel's interrupts, and terminates all transfers.
    /// Call [`init`](Self::init) before using the ADM again.
    pub fn shutdown(&self) {
        for index in 0..CHANNELS {
            self.registers
                .write(Register::ChannelConf(index), ChannelConf::quiesced().bits());
            self.registers
                .write(Register::ResultConf(index), ResultConf::quiesced().bits());

            let channel = Channel::new(index, self);
            channel.terminate_all();
            channel.with_state(|state| state.initialized = false);
        }
        tracing::debug!("shut down ADM");
    }
}

/// Burst length of a client interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum CiBurst {
    /// Four 32-bit words.
    Words4 = 4,
    /// Eight 32-bit words.
    Words8 = 8,
}

/// A client interface's address window and burst.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientInterface {
    pub range_start: u8,
    pub range_end: u8,
    pub burst: CiBurst,
}

impl ClientInterface {
    /// An interface covering `range_start..=range_end`, with 8 word bursts.
    pub const fn new(range_start: u8, range_end: u8) -> Self {
        Self {
            range_start,
            range_end,
            burst: CiBurst::Words8,
        }
    }

    fn conf(&self) -> ClientConf {
        ClientConf::new()
            .with(ClientConf::RANGE_START, u32::from(self.range_start))
            .with(ClientConf::RANGE_END, u32::from(self.range_end))
            .with(ClientConf::BURST, self.burst as u32)
    }
}

/// ADM configuration, applied by [`Adm::init`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Client interfaces 0, 1 and 2.
    pub client_interfaces: [ClientInterface; 3],
    /// Loop count for the general purpose control, `0..=0xf`.
    pub loop_count: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_interfaces: [
                ClientInterface::new(0x40, 0xb0),
                ClientInterface::new(0x2a, 0x2c),
                ClientInterface::new(0x12, 0x28),
            ],
            loop_count: 0xf,
        }
    }
}
