//! Per-channel transaction queue.
//!
//! Transactions move through three stages:
//!
//! 1. `submitted`: prepared, waiting for [`issue_pending`](super::Channel::issue_pending).
//! 2. `issued`: waiting for the hardware.
//! 3. `current`: running on the hardware. There's at most one.
//!
//! A completed transaction leaves the queue. The caller delivers its
//! completion after releasing the channel's lock.
//!
//! Each transaction carries a [`Cookie`]. A channel's cookies tell whether a
//! transaction has completed without finding it in a list.

use alloc::collections::VecDeque;
use core::{mem, task::Waker};

use crate::descriptor::CommandList;
use crate::memory::DmaMemory;
use crate::{Error, Result};

use super::Flags;

/// Identifies a transaction on its channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Cookie(u32);

impl Cookie {
    /// The smallest cookie. Skipped by the first assignment, and only handed
    /// out again once the counter wraps.
    const MIN: u32 = 1;

    /// The raw cookie value.
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// A channel's cookie counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Cookies {
    last_used: u32,
    last_completed: u32,
}

impl Cookies {
    pub(crate) const fn new() -> Self {
        Self {
            last_used: Cookie::MIN,
            last_completed: Cookie::MIN,
        }
    }

    /// Hand out the next cookie, wrapping back to the start.
    pub(crate) fn assign(&mut self) -> Cookie {
        let mut next = self.last_used.wrapping_add(1);
        if next < Cookie::MIN {
            next = Cookie::MIN;
        }
        self.last_used = next;
        Cookie(next)
    }

    pub(crate) fn complete(&mut self, cookie: Cookie) {
        self.last_completed = cookie.0;
    }

    /// Returns `true` if `cookie` has completed.
    ///
    /// Everything at or before `last_completed`, or after `last_used`, is
    /// complete. Both windows follow the counters around a wrap.
    pub(crate) fn is_complete(&self, cookie: Cookie) -> bool {
        let Self {
            last_used,
            last_completed,
        } = *self;
        let cookie = cookie.0;
        if last_completed <= last_used {
            cookie <= last_completed || cookie > last_used
        } else {
            cookie <= last_completed && cookie > last_used
        }
    }
}

/// A prepared transfer and its command list.
pub(crate) struct Transaction<M: DmaMemory> {
    pub(crate) cookie: Cookie,
    pub(crate) commands: CommandList<M>,
    /// Total bytes.
    pub(crate) length: u64,
    pub(crate) flags: Flags,
    pub(crate) waker: Option<Waker>,
}

impl<M: DmaMemory> Transaction<M> {
    /// Deliver the transaction's completion, then free it.
    pub(crate) fn finish(self) {
        if self.flags.get(Flags::INTERRUPT) {
            if let Some(waker) = self.waker {
                waker.wake();
            }
        }
    }
}

/// Where a transaction is in its queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Location {
    /// Not yet started. Carries the transaction length.
    Queued(u64),
    /// On the hardware.
    Running,
}

/// Transactions taken out of a queue at once.
///
/// Dropping this frees every command list without delivering completions.
pub(crate) struct Discarded<M: DmaMemory> {
    lists: [VecDeque<Transaction<M>>; 2],
    current: Option<Transaction<M>>,
}

impl<M: DmaMemory> Discarded<M> {
    pub(crate) fn len(&self) -> usize {
        self.lists.iter().map(VecDeque::len).sum::<usize>() + self.current.is_some() as usize
    }
}

pub(crate) struct Queue<M: DmaMemory> {
    cookies: Cookies,
    submitted: VecDeque<Transaction<M>>,
    issued: VecDeque<Transaction<M>>,
    current: Option<Transaction<M>>,
}

impl<M: DmaMemory> Queue<M> {
    pub(crate) const fn new() -> Self {
        Self {
            cookies: Cookies::new(),
            submitted: VecDeque::new(),
            issued: VecDeque::new(),
            current: None,
        }
    }

    /// Make room for one more transaction in every list it passes through,
    /// so that moving it later never allocates.
    fn reserve(&mut self) -> Result<()> {
        let queued = self.submitted.len() + self.issued.len() + 1;
        self.submitted
            .try_reserve(1)
            .and_then(|_| self.issued.try_reserve(queued))
            .map_err(|_| Error::NoMemory)
    }

    /// Queue a prepared command list, returning its cookie.
    pub(crate) fn submit(
        &mut self,
        commands: CommandList<M>,
        length: u64,
        flags: Flags,
    ) -> core::result::Result<Cookie, CommandList<M>> {
        if self.reserve().is_err() {
            return Err(commands);
        }
        let cookie = self.cookies.assign();
        self.submitted.push_back(Transaction {
            cookie,
            commands,
            length,
            flags,
            waker: None,
        });
        Ok(cookie)
    }

    /// Move every submitted transaction to the issued list.
    ///
    /// Returns `true` if anything is waiting for the hardware.
    pub(crate) fn issue(&mut self) -> bool {
        self.issued.append(&mut self.submitted);
        !self.issued.is_empty()
    }

    /// The next issued transaction, in submission order.
    pub(crate) fn next_issued(&mut self) -> Option<Transaction<M>> {
        self.issued.pop_front()
    }

    pub(crate) fn current(&self) -> Option<&Transaction<M>> {
        self.current.as_ref()
    }

    pub(crate) fn set_current(&mut self, transaction: Transaction<M>) {
        debug_assert!(self.current.is_none());
        self.current = Some(transaction);
    }

    pub(crate) fn take_current(&mut self) -> Option<Transaction<M>> {
        self.current.take()
    }

    /// Mark a transaction complete, handing it back for delivery.
    pub(crate) fn complete(&mut self, transaction: Transaction<M>) -> Transaction<M> {
        self.cookies.complete(transaction.cookie);
        transaction
    }

    pub(crate) fn is_complete(&self, cookie: Cookie) -> bool {
        self.cookies.is_complete(cookie)
    }

    /// Find a transaction that hasn't completed.
    pub(crate) fn find(&self, cookie: Cookie) -> Option<Location> {
        if self.current.as_ref().is_some_and(|tx| tx.cookie == cookie) {
            return Some(Location::Running);
        }
        self.submitted
            .iter()
            .chain(self.issued.iter())
            .find(|tx| tx.cookie == cookie)
            .map(|tx| Location::Queued(tx.length))
    }

    /// Register `waker` with an active transaction.
    ///
    /// Returns `false` if there's no such transaction.
    pub(crate) fn register_waker(&mut self, cookie: Cookie, waker: &Waker) -> bool {
        let transaction = self
            .submitted
            .iter_mut()
            .chain(self.issued.iter_mut())
            .chain(self.current.iter_mut())
            .find(|tx| tx.cookie == cookie);
        match transaction {
            Some(tx) => {
                match &tx.waker {
                    Some(registered) if registered.will_wake(waker) => {}
                    _ => tx.waker = Some(waker.clone()),
                }
                true
            }
            None => false,
        }
    }

    /// Take every transaction out of the queue.
    pub(crate) fn discard_all(&mut self) -> Discarded<M> {
        Discarded {
            lists: [
                mem::take(&mut self.submitted),
                mem::take(&mut self.issued),
            ],
            current: self.current.take(),
        }
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.submitted.is_empty() && self.issued.is_empty() && self.current.is_none()
    }
}
