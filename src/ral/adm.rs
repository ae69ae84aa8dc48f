//! ADM register block and fields

use mycelium_bitfield::bitfield;
use ral_registers::{RORegister, RWRegister};

use super::CHANNELS;

/// One execution environment partition of the ADM register window.
#[repr(C)]
pub struct RegisterBlock {
    /// Channel command pointer registers
    pub CMD_PTR: [RWRegister<u32>; CHANNELS],
    /// Channel result registers
    pub RSLT: [RORegister<u32>; CHANNELS],
    /// Channel flush state registers, six banks
    pub FLUSH_STATE: [[RWRegister<u32>; CHANNELS]; 6],
    /// Channel status registers
    pub STATUS_SD: [RORegister<u32>; CHANNELS],
    /// Channel configuration registers (first partition only)
    pub CH_CONF: [RWRegister<u32>; CHANNELS],
    _reserved0: [u32; 32],
    /// Channel result configuration registers
    pub RSLT_CONF: [RWRegister<u32>; CHANNELS],
    _reserved1: [u32; 16],
    /// Security domain interrupt status
    pub SEC_DOMAIN_IRQ_STATUS: RORegister<u32>,
    _reserved2: [u32; 3],
    /// Client interface configuration registers (first partition only)
    pub CI_CONF: [RWRegister<u32>; 16],
    pub CRCI_CONF0: RWRegister<u32>,
    pub CRCI_CONF1: RWRegister<u32>,
    /// General purpose control (first partition only)
    pub GP_CTL: RWRegister<u32>,
    _reserved3: [u32; 9],
    /// CRCI control registers, indexed by CRCI port
    pub CRCI_CTL: [RWRegister<u32>; 16],
}

// Did I calculate my reservations correctly?
const _: () = assert!(core::mem::offset_of!(RegisterBlock, STATUS_SD) == 0x200);
const _: () = assert!(core::mem::offset_of!(RegisterBlock, CH_CONF) == 0x240);
const _: () = assert!(core::mem::offset_of!(RegisterBlock, RSLT_CONF) == 0x300);
const _: () = assert!(core::mem::offset_of!(RegisterBlock, SEC_DOMAIN_IRQ_STATUS) == 0x380);
const _: () = assert!(core::mem::offset_of!(RegisterBlock, CI_CONF) == 0x390);
const _: () = assert!(core::mem::offset_of!(RegisterBlock, GP_CTL) == 0x3d8);
const _: () = assert!(core::mem::offset_of!(RegisterBlock, CRCI_CTL) == 0x400);

bitfield! {
    /// `HI_CH_CONF`
    #[derive(PartialEq, Eq)]
    pub struct ChannelConf<u32> {
        const _RESERVED_0 = 6;
        /// Raise an interrupt when a result is posted.
        pub const IRQ_EN: bool;
        /// Post a result even for commands that did not request one.
        pub const FORCE_RSLT_EN: bool;
        /// Post a result when the channel is flushed.
        pub const FLUSH_RSLT_EN: bool;
        pub const PERM_MPU_CONF: bool;
        const _RESERVED_1 = 1;
        /// Bypass the memory protection unit.
        pub const MPU_DISABLE: bool;
    }
}

impl ChannelConf {
    /// Configuration written before a channel's first command list.
    pub fn active() -> Self {
        Self::new()
            .with(Self::IRQ_EN, true)
            .with(Self::FLUSH_RSLT_EN, true)
            .with(Self::FORCE_RSLT_EN, true)
            .with(Self::PERM_MPU_CONF, true)
            .with(Self::MPU_DISABLE, true)
    }

    /// Configuration left behind when the driver shuts down.
    pub fn quiesced() -> Self {
        Self::new().with(Self::FLUSH_RSLT_EN, true)
    }
}

bitfield! {
    /// `HI_CH_RSLT_CONF`
    #[derive(PartialEq, Eq)]
    pub struct ResultConf<u32> {
        pub const IRQ_EN: bool;
        pub const FLUSH_EN: bool;
    }
}

impl ResultConf {
    pub fn active() -> Self {
        Self::new()
            .with(Self::IRQ_EN, true)
            .with(Self::FLUSH_EN, true)
    }

    pub fn quiesced() -> Self {
        Self::new().with(Self::FLUSH_EN, true)
    }
}

bitfield! {
    /// `HI_CH_STATUS_SD`
    #[derive(PartialEq, Eq)]
    pub struct ChannelStatus<u32> {
        const _RESERVED_0 = 1;
        /// A result is waiting in the result FIFO.
        pub const VALID: bool;
    }
}

bitfield! {
    /// `HI_CH_RSLT`
    #[derive(PartialEq, Eq)]
    pub struct ChannelResult<u32> {
        const _RESERVED_0 = 1;
        /// Top pointer done.
        pub const TPD: bool;
        /// The command list was flushed before it finished.
        pub const FLUSH: bool;
        /// The command list hit an error.
        pub const ERR: bool;
        const _RESERVED_1 = 27;
        /// This result is meaningful.
        pub const VALID: bool;
    }
}

impl ChannelResult {
    /// Returns `true` if the result reports a failed or flushed command list.
    pub fn is_error(&self) -> bool {
        self.get(Self::ERR) || self.get(Self::FLUSH)
    }
}

bitfield! {
    /// `HI_CRCI_CTL`
    #[derive(PartialEq, Eq)]
    pub struct CrciCtl<u32> {
        /// Block size code, see [`BlockSize`](crate::channel::BlockSize).
        pub const BLOCK_SIZE = 3;
        const _RESERVED_0 = 14;
        /// Hold the CRCI in reset.
        pub const RST: bool;
        /// Route the CRCI through the secondary mux.
        pub const MUX_SEL: bool;
    }
}

bitfield! {
    /// `HI_CI_CONF`
    #[derive(PartialEq, Eq)]
    pub struct ClientConf<u32> {
        /// Burst length, in 32-bit words.
        pub const BURST = 4;
        const _RESERVED_0 = 12;
        pub const RANGE_START = 8;
        pub const RANGE_END = 8;
    }
}

bitfield! {
    /// `HI_GP_CTL`
    #[derive(PartialEq, Eq)]
    pub struct GpCtl<u32> {
        const _RESERVED_0 = 8;
        pub const LP_CNT = 4;
        pub const LP_EN: bool;
    }
}
