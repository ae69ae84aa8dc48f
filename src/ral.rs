//! A RAL-like module for ADM register access
//!
//! The ADM register window is carved into execution environment (EE)
//! partitions. Every per-channel result, status and command register, and the
//! CRCI controls, are repeated once per EE at a fixed stride. A handful of
//! global registers (channel configuration, client interfaces, GP control)
//! only exist in the first partition. [`adm::RegisterBlock`] describes one
//! partition.
//!
//! The driver never touches the register block directly. It goes through the
//! [`Registers`] capability, addressing registers by [`Register`]. [`Mmio`]
//! implements that capability for the real peripheral.

#![allow(
    non_snake_case, // Compatibility with RAL
)]

pub mod adm;

/// Byte distance between two execution environment partitions.
pub const EE_STRIDE: usize = 0x2_0800;

/// The number of hardware channels per ADM instance.
pub const CHANNELS: usize = 16;

//
// Helper types for static memory
//
// Similar to the RAL's `Instance` type, but more copy.
//

pub(crate) struct Static<T>(pub(crate) *const T);
impl<T> core::ops::Deref for Static<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        // Safety: pointer points to static memory (peripheral memory)
        unsafe { &*self.0 }
    }
}
impl<T> Clone for Static<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Static<T> {}

/// An ADM register, identified by what it controls.
///
/// Per-channel registers carry the channel index, `0..16`. `CrciCtl` carries
/// the CRCI port, and `ClientConf` the client interface number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Register {
    /// `HI_CH_CMD_PTR`: writing a command pointer here starts the channel.
    CmdPtr(usize),
    /// `HI_CH_RSLT`: pops the channel's result FIFO.
    Result(usize),
    /// `HI_CH_FLUSH_STATE0`: any write flushes the channel.
    FlushState(usize),
    /// `HI_CH_STATUS_SD`
    Status(usize),
    /// `HI_CH_CONF`. Global, not EE-partitioned.
    ChannelConf(usize),
    /// `HI_CH_RSLT_CONF`
    ResultConf(usize),
    /// `HI_SEC_DOMAIN_IRQ_STATUS`: one pending bit per channel.
    DomainIrqStatus,
    /// `HI_CI_CONF`. Global.
    ClientConf(usize),
    /// `HI_GP_CTL`. Global.
    GpCtl,
    /// `HI_CRCI_CTL`
    CrciCtl(usize),
}

impl Register {
    /// Returns the register's byte offset from the start of the ADM window,
    /// as seen from execution environment `ee`.
    pub const fn offset(self, ee: u32) -> usize {
        let domain = EE_STRIDE * ee as usize;
        match self {
            Self::CmdPtr(ch) => domain + 4 * ch,
            Self::Result(ch) => domain + 0x40 + 4 * ch,
            Self::FlushState(ch) => domain + 0x80 + 4 * ch,
            Self::Status(ch) => domain + 0x200 + 4 * ch,
            Self::ChannelConf(ch) => 0x240 + 4 * ch,
            Self::ResultConf(ch) => domain + 0x300 + 4 * ch,
            Self::DomainIrqStatus => domain + 0x380,
            Self::ClientConf(ci) => 0x390 + 4 * ci,
            Self::GpCtl => 0x3d8,
            Self::CrciCtl(crci) => domain + 0x400 + 4 * crci,
        }
    }

    /// Returns `true` if software may only read this register.
    pub const fn is_read_only(self) -> bool {
        matches!(
            self,
            Self::Result(_) | Self::Status(_) | Self::DomainIrqStatus
        )
    }
}

/// Access to the ADM registers.
///
/// All accesses are 32 bits wide. Implementations decide how a [`Register`]
/// maps to memory; the driver only relies on the ordering guarantee of
/// [`write_barrier`](Registers::write_barrier).
pub trait Registers {
    /// Read a register.
    fn read(&self, reg: Register) -> u32;

    /// Write a register.
    fn write(&self, reg: Register, value: u32);

    /// Order every register write issued so far before any write issued
    /// afterwards.
    fn write_barrier(&self) {
        write_barrier();
    }
}

impl<R: Registers + ?Sized> Registers for &R {
    #[inline]
    fn read(&self, reg: Register) -> u32 {
        R::read(self, reg)
    }

    #[inline]
    fn write(&self, reg: Register, value: u32) {
        R::write(self, reg, value)
    }

    #[inline]
    fn write_barrier(&self) {
        R::write_barrier(self)
    }
}

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "arm", target_feature = "v7"))] {
        /// Store barrier across normal and device memory.
        #[inline(always)]
        pub fn write_barrier() {
            // Safety: a barrier has no effect besides ordering.
            unsafe { core::arch::asm!("dsb st", options(nostack, preserves_flags)) }
        }
    } else {
        /// Store barrier across normal and device memory.
        #[inline(always)]
        pub fn write_barrier() {
            core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        }
    }
}

/// Memory-mapped ADM registers.
///
/// `Mmio` addresses the global registers through the first partition and the
/// per-channel registers through the partition of its execution environment.
pub struct Mmio {
    global: Static<adm::RegisterBlock>,
    domain: Static<adm::RegisterBlock>,
    ee: u32,
}

// Safety: the register window is static peripheral memory. Shared access
// goes through volatile 32-bit loads and stores.
unsafe impl Send for Mmio {}
unsafe impl Sync for Mmio {}

impl Mmio {
    /// Describe the ADM window at `base`, as seen from execution
    /// environment `ee`.
    ///
    /// # Safety
    ///
    /// `base` must point to the start of the ADM register window, and the
    /// window must be mapped for at least `ee + 1` partitions. Caller must
    /// make sure that no other driver owns the same channels in the same
    /// execution environment.
    pub const unsafe fn new(base: *const (), ee: u32) -> Self {
        let global: *const adm::RegisterBlock = base.cast();
        let domain = base
            .cast::<u8>()
            .wrapping_add(EE_STRIDE * ee as usize)
            .cast();
        Self {
            global: Static(global),
            domain: Static(domain),
            ee,
        }
    }

    /// The execution environment this window is partitioned for.
    pub fn ee(&self) -> u32 {
        self.ee
    }
}

impl Registers for Mmio {
    fn read(&self, reg: Register) -> u32 {
        match reg {
            Register::CmdPtr(ch) => self.domain.CMD_PTR[ch].read(),
            Register::Result(ch) => self.domain.RSLT[ch].read(),
            Register::FlushState(ch) => self.domain.FLUSH_STATE[0][ch].read(),
            Register::Status(ch) => self.domain.STATUS_SD[ch].read(),
            Register::ChannelConf(ch) => self.global.CH_CONF[ch].read(),
            Register::ResultConf(ch) => self.domain.RSLT_CONF[ch].read(),
            Register::DomainIrqStatus => self.domain.SEC_DOMAIN_IRQ_STATUS.read(),
            Register::ClientConf(ci) => self.global.CI_CONF[ci].read(),
            Register::GpCtl => self.global.GP_CTL.read(),
            Register::CrciCtl(crci) => self.domain.CRCI_CTL[crci].read(),
        }
    }

    fn write(&self, reg: Register, value: u32) {
        match reg {
            Register::CmdPtr(ch) => self.domain.CMD_PTR[ch].write(value),
            Register::FlushState(ch) => self.domain.FLUSH_STATE[0][ch].write(value),
            Register::ChannelConf(ch) => self.global.CH_CONF[ch].write(value),
            Register::ResultConf(ch) => self.domain.RSLT_CONF[ch].write(value),
            Register::ClientConf(ci) => self.global.CI_CONF[ci].write(value),
            Register::GpCtl => self.global.GP_CTL.write(value),
            Register::CrciCtl(crci) => self.domain.CRCI_CTL[crci].write(value),
            Register::Result(_) | Register::Status(_) | Register::DomainIrqStatus => {
                tracing::warn!(?reg, value, "ignoring write to read-only ADM register");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::offset_of;

    #[test]
    fn offsets_match_register_block() {
        use adm::RegisterBlock as Rb;

        assert_eq!(Register::CmdPtr(0).offset(0), offset_of!(Rb, CMD_PTR));
        assert_eq!(Register::Result(0).offset(0), offset_of!(Rb, RSLT));
        assert_eq!(
            Register::FlushState(0).offset(0),
            offset_of!(Rb, FLUSH_STATE)
        );
        assert_eq!(Register::Status(0).offset(0), offset_of!(Rb, STATUS_SD));
        assert_eq!(Register::ChannelConf(0).offset(0), offset_of!(Rb, CH_CONF));
        assert_eq!(Register::ResultConf(0).offset(0), offset_of!(Rb, RSLT_CONF));
        assert_eq!(
            Register::DomainIrqStatus.offset(0),
            offset_of!(Rb, SEC_DOMAIN_IRQ_STATUS)
        );
        assert_eq!(Register::ClientConf(0).offset(0), offset_of!(Rb, CI_CONF));
        assert_eq!(Register::GpCtl.offset(0), offset_of!(Rb, GP_CTL));
        assert_eq!(Register::CrciCtl(0).offset(0), offset_of!(Rb, CRCI_CTL));
    }

    #[test]
    fn domain_registers_follow_ee() {
        assert_eq!(Register::CmdPtr(3).offset(1), 0x2_0800 + 12);
        assert_eq!(Register::Result(15).offset(2), 2 * 0x2_0800 + 0x40 + 60);
        assert_eq!(Register::DomainIrqStatus.offset(1), 0x2_0b80);
        assert_eq!(Register::CrciCtl(4).offset(1), 0x2_0800 + 0x410);
        // Global registers ignore the execution environment
        assert_eq!(Register::ChannelConf(2).offset(3), 0x248);
        assert_eq!(Register::ClientConf(1).offset(3), 0x394);
        assert_eq!(Register::GpCtl.offset(3), 0x3d8);
    }

    #[test]
    fn mmio_routes_global_and_domain_registers() {
        // Two EE partitions worth of backing memory.
        let mut window = std::vec![0u32; 2 * EE_STRIDE / 4];
        let base = window.as_mut_ptr() as *const ();
        let mmio = unsafe { Mmio::new(base, 1) };

        mmio.write(Register::CmdPtr(2), 0xdead);
        mmio.write(Register::ChannelConf(2), 0xbeef);
        mmio.write(Register::Result(2), 0x1234);

        assert_eq!(window[(EE_STRIDE + 8) / 4], 0xdead);
        assert_eq!(window[0x248 / 4], 0xbeef);
        assert_eq!(window[(EE_STRIDE + 0x48) / 4], 0, "read-only write ignored");
        assert_eq!(mmio.read(Register::CmdPtr(2)), 0xdead);
        assert_eq!(mmio.ee(), 1);
    }
}
