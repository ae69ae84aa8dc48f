//! ADM command lists.
//!
//! A transfer is described to the ADM by a *command pointer list*: a single
//! list entry that points at an array of *box* descriptors. Each box moves up
//! to [`MAX_ROWS`] rows of equal length between a memory fragment and a
//! device register.
//!
//! Building a command list happens in two steps. [`Chain`] validates a
//! scatter/gather list against the channel's burst and flow control settings,
//! then yields the [`BoxDescriptor`]s that cover it, in transfer order.
//! [`CommandList`] allocates controller-visible memory and serializes the
//! chain into its wire format.

use core::{alloc::Layout, fmt, mem, slice};

use mycelium_bitfield::bitfield;

use crate::memory::{DmaBuffer, DmaMemory};
use crate::Error;

/// Maximum number of rows in one box descriptor.
pub const MAX_ROWS: u32 = 0xFFFF;

/// Maximum row length, in bytes. Also the burst of a transfer that isn't
/// flow controlled.
pub const MAX_XFER: u32 = 0xFFFF;

/// Required alignment of command pointer lists and descriptors.
pub const DESC_ALIGN: usize = 8;

/// Direction of a DMA transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    MemToMem,
    MemToDev,
    DevToMem,
    DevToDev,
}

impl Direction {
    /// Returns `true` for the directions a slave channel supports.
    pub const fn is_slave(self) -> bool {
        matches!(self, Direction::MemToDev | Direction::DevToMem)
    }
}

/// A contiguous region of memory in a scatter/gather list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fragment {
    /// Bus address of the first byte.
    pub addr: u32,
    /// Length in bytes.
    pub len: u32,
}

impl Fragment {
    pub const fn new(addr: u32, len: u32) -> Self {
        Self { addr, len }
    }
}

/// Channel settings that shape a descriptor chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainParams {
    pub direction: Direction,
    /// Bytes per row.
    pub burst: u32,
    /// Rows advance on the CRCI's readiness signal.
    pub flow_control: bool,
    /// CRCI port written into each descriptor; `0` for none.
    pub crci: u8,
    /// The device register on the fixed side of the transfer.
    pub device_addr: u32,
}

bitfield! {
    /// A descriptor's command word.
    #[derive(PartialEq, Eq)]
    pub struct Command<u32> {
        /// Command type; [`Command::TYPE_BOX`] for everything this driver
        /// builds.
        pub const TYPE = 3;
        /// CRCI that gates reads.
        pub const SRC_CRCI = 4;
        /// CRCI that gates writes.
        pub const DST_CRCI = 4;
        const _RESERVED_0 = 20;
        /// Last command in the list. The channel stops here.
        pub const LAST: bool;
    }
}

impl Command {
    pub const TYPE_SINGLE: u32 = 0b000;
    pub const TYPE_BOX: u32 = 0b011;
}

bitfield! {
    /// A command pointer: the word written into a channel's command register,
    /// and the entry at the head of a command pointer list.
    #[derive(PartialEq, Eq)]
    pub struct CommandPointer<u32> {
        /// Bus address, shifted right by three.
        pub const ADDR = 29;
        /// The address is a command pointer list, rather than a descriptor.
        pub const PTR_LIST: bool;
        const _RESERVED_0 = 1;
        /// Last pointer in the list.
        pub const LAST: bool;
    }
}

impl CommandPointer {
    /// A pointer to the command pointer list at `bus_addr`.
    pub fn list(bus_addr: u32) -> Self {
        Self::new()
            .with(Self::ADDR, bus_addr >> 3)
            .with(Self::PTR_LIST, true)
    }

    /// The last (and only) list entry, pointing at descriptors at `bus_addr`.
    pub fn last_entry(bus_addr: u32) -> Self {
        Self::new()
            .with(Self::ADDR, bus_addr >> 3)
            .with(Self::LAST, true)
    }

    /// The bus address this entry points to.
    pub fn addr(&self) -> u32 {
        self.get(Self::ADDR) << 3
    }
}

/// A pair of 16-bit values, one for each side of a box transfer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RowPair {
    pub src: u16,
    pub dst: u16,
}

impl RowPair {
    /// The same value on both sides.
    pub const fn both(value: u16) -> Self {
        Self {
            src: value,
            dst: value,
        }
    }

    /// Source in the high half, destination in the low half.
    pub const fn pack(self) -> u32 {
        (self.src as u32) << 16 | self.dst as u32
    }
}

/// One box descriptor, before serialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoxDescriptor {
    pub command: Command,
    pub src_addr: u32,
    pub dst_addr: u32,
    /// Bytes per row.
    pub row_len: RowPair,
    pub num_rows: RowPair,
    /// How far each side advances between rows.
    pub row_offset: RowPair,
}

impl BoxDescriptor {
    /// Bytes this descriptor moves.
    pub fn len(&self) -> u32 {
        self.row_len.src as u32 * self.num_rows.src as u32
    }

    pub fn is_last(&self) -> bool {
        self.command.get(Command::LAST)
    }
}

/// A box descriptor in the controller's wire format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C, align(8))]
pub struct HwDescriptor {
    cmd: u32,
    src_addr: u32,
    dst_addr: u32,
    row_len: u32,
    num_rows: u32,
    row_offset: u32,
}

const _: () = assert!(mem::size_of::<HwDescriptor>() == 24);
const _: () = assert!(mem::align_of::<HwDescriptor>() == DESC_ALIGN);

impl From<BoxDescriptor> for HwDescriptor {
    fn from(desc: BoxDescriptor) -> Self {
        Self {
            cmd: desc.command.bits(),
            src_addr: desc.src_addr,
            dst_addr: desc.dst_addr,
            row_len: desc.row_len.pack(),
            num_rows: desc.num_rows.pack(),
            row_offset: desc.row_offset.pack(),
        }
    }
}

impl HwDescriptor {
    pub fn command(&self) -> Command {
        Command::from_bits(self.cmd)
    }

    pub fn src_addr(&self) -> u32 {
        self.src_addr
    }

    pub fn dst_addr(&self) -> u32 {
        self.dst_addr
    }

    /// Raw `ROW_LEN` word.
    pub fn row_len(&self) -> u32 {
        self.row_len
    }

    /// Raw `NUM_ROWS` word.
    pub fn num_rows(&self) -> u32 {
        self.num_rows
    }

    /// Raw `ROW_OFFSET` word.
    pub fn row_offset(&self) -> u32 {
        self.row_offset
    }
}

/// Number of descriptors needed for a fragment of `len` bytes in rows of
/// `burst` bytes.
///
/// Full rows are packed [`MAX_ROWS`] to a descriptor. A short final row
/// can't share a descriptor with full rows, so it gets its own.
pub const fn descriptors_for(len: u32, burst: u32) -> usize {
    let full_rows = len / burst;
    let short_row = (len % burst != 0) as u32;
    (full_rows.div_ceil(MAX_ROWS) + short_row) as usize
}

/// The descriptors covering a scatter/gather list, in transfer order.
///
/// The last descriptor yielded carries [`Command::LAST`].
#[derive(Clone, Debug)]
pub struct Chain<'a> {
    fragments: &'a [Fragment],
    params: ChainParams,
    /// Bytes of `fragments[0]` already covered.
    offset: u32,
    /// Descriptors left to yield.
    remaining: usize,
    length: u64,
}

impl<'a> Chain<'a> {
    /// Validate `fragments` against `params`.
    ///
    /// Nothing is allocated here. This fails if
    ///
    /// - `params.direction` isn't a slave direction.
    /// - flow control is on, and the burst is zero, or a fragment length
    ///   isn't a multiple of the burst.
    /// - the burst doesn't fit in a row.
    /// - the fragments are all empty.
    pub fn new(fragments: &'a [Fragment], params: ChainParams) -> crate::Result<Self> {
        if !params.direction.is_slave() {
            return Err(Error::InvalidDirection(params.direction));
        }
        if params.burst == 0 {
            return Err(Error::MissingBurst);
        }
        if params.burst > MAX_XFER {
            return Err(Error::UnsupportedBurst(params.burst));
        }

        let mut remaining = 0;
        let mut length = 0;
        for fragment in fragments {
            if params.flow_control && fragment.len % params.burst != 0 {
                return Err(Error::UnalignedLength {
                    length: fragment.len,
                    burst: params.burst,
                });
            }
            remaining += descriptors_for(fragment.len, params.burst);
            length += u64::from(fragment.len);
        }

        if remaining == 0 {
            return Err(Error::EmptyTransfer);
        }

        Ok(Self {
            fragments,
            params,
            offset: 0,
            remaining,
            length,
        })
    }

    /// Total bytes moved by the chain.
    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }
}

impl Iterator for Chain<'_> {
    type Item = BoxDescriptor;

    fn next(&mut self) -> Option<BoxDescriptor> {
        let (fragment, remainder) = loop {
            let fragment = self.fragments.first()?;
            let remainder = fragment.len - self.offset;
            if remainder > 0 {
                break (fragment, remainder);
            }
            self.fragments = &self.fragments[1..];
            self.offset = 0;
        };

        let ChainParams {
            direction,
            burst,
            crci,
            device_addr,
            ..
        } = self.params;

        let (rows, row_len) = if remainder < burst {
            (1, remainder)
        } else {
            ((remainder / burst).min(MAX_ROWS), burst)
        };

        let addr = fragment.addr.wrapping_add(self.offset);
        let crci = u32::from(crci);
        let mut command = Command::new().with(Command::TYPE, Command::TYPE_BOX);
        let (src_addr, dst_addr, row_offset) = match direction {
            Direction::DevToMem => {
                command.set(Command::SRC_CRCI, crci);
                let offset = RowPair {
                    src: 0,
                    dst: burst as u16,
                };
                (device_addr, addr, offset)
            }
            _ => {
                command.set(Command::DST_CRCI, crci);
                let offset = RowPair {
                    src: burst as u16,
                    dst: 0,
                };
                (addr, device_addr, offset)
            }
        };

        self.offset += rows * row_len;
        self.remaining -= 1;
        if self.remaining == 0 {
            command.set(Command::LAST, true);
        }

        Some(BoxDescriptor {
            command,
            src_addr,
            dst_addr,
            row_len: RowPair::both(row_len as u16),
            num_rows: RowPair::both(rows as u16),
            row_offset,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Chain<'_> {}

/// Head of a command pointer list; the descriptors follow.
#[repr(C, align(8))]
struct ListHeader {
    entry: u32,
}

/// A command pointer list and its descriptors, in controller-visible memory.
///
/// The list is written once, when it's built, and is read-only afterwards.
/// Dropping the list returns its memory.
pub struct CommandList<M: DmaMemory> {
    buffer: DmaBuffer,
    layout: Layout,
    descriptors: usize,
    memory: M,
}

// Safety: the list exclusively owns its buffer.
unsafe impl<M: DmaMemory + Send> Send for CommandList<M> {}
unsafe impl<M: DmaMemory + Sync> Sync for CommandList<M> {}

impl<M: DmaMemory + Clone> CommandList<M> {
    /// Allocate a command list that fits `chain`, and write the chain into
    /// it.
    pub fn build(memory: &M, chain: Chain<'_>) -> crate::Result<Self> {
        let count = chain.len();
        let (layout, offset) = Self::layout(count).ok_or(Error::NoMemory)?;
        let buffer = memory.allocate(layout).ok_or(Error::NoMemory)?;

        // Safety: `buffer` is valid for `layout`, which holds a header at 0
        // and `count` descriptors at `offset`, both suitably aligned.
        unsafe {
            let descriptors: *mut HwDescriptor = buffer.ptr.as_ptr().add(offset).cast();
            for (idx, desc) in chain.enumerate().take(count) {
                descriptors.add(idx).write(desc.into());
            }

            let entry = CommandPointer::last_entry(buffer.bus_addr.wrapping_add(offset as u32));
            buffer
                .ptr
                .cast::<ListHeader>()
                .as_ptr()
                .write(ListHeader {
                    entry: entry.bits(),
                });
        }

        Ok(Self {
            buffer,
            layout,
            descriptors: count,
            memory: memory.clone(),
        })
    }

    /// Returns the layout of a list with `count` descriptors, and the offset
    /// of the first descriptor.
    fn layout(count: usize) -> Option<(Layout, usize)> {
        let (layout, offset) = Layout::new::<ListHeader>()
            .extend(Layout::array::<HwDescriptor>(count).ok()?)
            .ok()?;
        Some((layout.pad_to_align(), offset))
    }
}

impl<M: DmaMemory> CommandList<M> {
    /// The list entry at the head of the list.
    pub fn entry(&self) -> CommandPointer {
        // Safety: written in `build`.
        let header = unsafe { &*self.buffer.ptr.cast::<ListHeader>().as_ptr() };
        CommandPointer::from_bits(header.entry)
    }

    pub fn descriptors(&self) -> &[HwDescriptor] {
        let offset = mem::size_of::<ListHeader>();
        // Safety: `count` descriptors were written at `offset` in `build`.
        unsafe {
            let first = self.buffer.ptr.as_ptr().add(offset).cast::<HwDescriptor>();
            slice::from_raw_parts(first, self.descriptors)
        }
    }

    /// Bus address of the list.
    pub fn bus_addr(&self) -> u32 {
        self.buffer.bus_addr
    }

    /// The value that starts this list when written into a channel's command
    /// register.
    pub fn command_pointer(&self) -> CommandPointer {
        CommandPointer::list(self.buffer.bus_addr)
    }
}

impl<M: DmaMemory> Drop for CommandList<M> {
    fn drop(&mut self) {
        // Safety: allocated in `build` with this layout, and never handed out.
        unsafe { self.memory.deallocate(self.buffer, self.layout) }
    }
}

impl<M: DmaMemory> fmt::Debug for CommandList<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandList")
            .field("bus_addr", &format_args!("{:#010x}", self.buffer.bus_addr))
            .field("descriptors", &self.descriptors)
            .finish()
    }
}
