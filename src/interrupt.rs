//! Interrupt handling, and DMA futures

use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use crate::channel::{Channel, Cookie};
use crate::memory::DmaMemory;
use crate::ral::{
    adm::{ChannelResult, ChannelStatus},
    Register, Registers, CHANNELS,
};
use crate::{Adm, Error};

impl<R: Registers, M: DmaMemory> Adm<R, M> {
    /// Handle an ADM interrupt.
    ///
    /// Call this from the ADM's interrupt handler. It completes the running
    /// transfer of every channel with a result, then starts each channel's
    /// next transfer.
    ///
    /// It's safe to call this while other code uses the driver's channels.
    pub fn on_interrupt(&self) {
        let sources = self.registers.read(Register::DomainIrqStatus);
        tracing::trace!(sources = ?format_args!("{sources:#06x}"), "ADM interrupt");

        for index in (0..CHANNELS).filter(|&index| sources & (1 << index) != 0) {
            let status = ChannelStatus::from_bits(self.registers.read(Register::Status(index)));
            if !status.get(ChannelStatus::VALID) {
                tracing::trace!(channel = index, "no result yet");
                continue;
            }

            let result = ChannelResult::from_bits(self.registers.read(Register::Result(index)));
            if !result.get(ChannelResult::VALID) {
                tracing::trace!(channel = index, ?result, "invalid result");
                continue;
            }
            if result.is_error() {
                tracing::warn!(channel = index, ?result, "channel reported an error");
            }

            let completed = critical_section::with(|cs| {
                let mut state = self.channels[index].borrow_ref_mut(cs);
                if result.is_error() {
                    state.error = true;
                }
                let transaction = state.queue.take_current()?;
                let done = state.queue.complete(transaction);
                state.start_next(index, &self.registers);
                Some(done)
            });

            if let Some(transaction) = completed {
                tracing::trace!(
                    channel = index,
                    cookie = transaction.cookie.get(),
                    "completed transfer"
                );
                transaction.finish();
            }
        }
    }
}

impl<'a, R, M: DmaMemory> Channel<'a, R, M> {
    /// Wait for the transfer identified by `cookie` to complete.
    ///
    /// The transfer must have been prepared with [`Flags::INTERRUPT`](crate::channel::Flags::INTERRUPT),
    /// otherwise the future is never woken. Dropping the future doesn't
    /// cancel the transfer; use [`terminate_all`](Channel::terminate_all).
    pub fn transfer(&self, cookie: Cookie) -> Transfer<'a, R, M> {
        Transfer {
            channel: *self,
            cookie,
        }
    }
}

/// The core DMA transfer future
///
/// `Transfer` resolves when its transfer completes. It resolves to
/// [`Error::Hardware`] if the channel reported an error by then. A terminated
/// transfer never resolves.
pub struct Transfer<'a, R, M: DmaMemory> {
    channel: Channel<'a, R, M>,
    cookie: Cookie,
}

impl<R, M: DmaMemory> Transfer<'_, R, M> {
    /// The transfer's cookie.
    pub fn cookie(&self) -> Cookie {
        self.cookie
    }
}

impl<R, M: DmaMemory> Future for Transfer<'_, R, M> {
    type Output = crate::Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let cookie = self.cookie;
        self.channel.with_state(|state| {
            if state.queue.is_complete(cookie) {
                Poll::Ready(if state.error {
                    Err(Error::Hardware)
                } else {
                    Ok(())
                })
            } else {
                state.queue.register_waker(cookie, cx.waker());
                Poll::Pending
            }
        })
    }
}
