//! RegReg — the register dispatch layer.
//!
//! A sparse 16-bit address space mapping non-overlapping ranges to
//! handler-backed memory. This is the system's single uniform surface for
//! observing and mutating every value in the gateway, including the PCA301
//! engine's control surface.

use heapless::Vec as HVec;

/// Upper bound on the number of ranges ever registered. The source's own
/// register map tops out well under this (device info, NVS, local
/// sensors, raw RFM69, extended RFM69, PCA301 device, PCA301 common).
pub const MAX_RANGES: usize = 10;

/// The outcome of a single range's handler callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegResult {
    /// The handler fully serviced this access itself; the dispatcher does
    /// not fall back to the default copy.
    Ok,
    /// The handler deferred; the dispatcher performs the default copy
    /// to/from the range's backing storage.
    Proceed,
    /// A request is already in flight for this range; abort the access and
    /// surface this to the caller.
    Busy,
    /// The handler rejected the access (e.g. a read-only register was
    /// written, or an out-of-range command was given).
    Err,
}

/// One access to the register space, spanning `len` bytes starting at
/// `addr`.
pub struct RegAccess<'a> {
    /// The address this step of the walk is currently positioned at.
    pub addr: u16,
    /// `addr`'s offset from the start of the range that was matched.
    pub addr_offset: u16,
    /// `true` for a write, `false` for a read.
    pub write: bool,
    /// The caller's buffer: written into on a read, read from on a write.
    pub buf: &'a mut [u8],
    /// How many bytes of `buf`, from its start, this step covers. A
    /// handler may narrow this to its own preferred granularity; the
    /// dispatcher clamps it to the remaining span either way.
    pub len: u16,
}

/// A handler bound to one register range.
///
/// Implementations decide, per access, whether to fully service it
/// ([`RegResult::Ok`]), let the dispatcher do a plain memory copy
/// ([`RegResult::Proceed`]), refuse it ([`RegResult::Busy`] /
/// [`RegResult::Err`]), and may narrow `access.len` before returning.
pub trait RegHandler {
    /// Service (or defer) one access within this handler's range.
    fn access(&mut self, access: &mut RegAccess) -> RegResult;
}

/// A no-op handler: every access proceeds to the default copy.
pub struct Passthrough;

impl RegHandler for Passthrough {
    fn access(&mut self, _access: &mut RegAccess) -> RegResult {
        RegResult::Proceed
    }
}

/// A handler denying every write and letting reads proceed to the default
/// copy.
pub struct ReadOnly;

impl RegHandler for ReadOnly {
    fn access(&mut self, access: &mut RegAccess) -> RegResult {
        if access.write {
            RegResult::Err
        } else {
            RegResult::Proceed
        }
    }
}

/// One non-overlapping address range, its backing storage, and optional
/// handler.
pub struct RegEntry<'a> {
    addr_begin: u16,
    addr_end: u16,
    handler: &'a mut dyn RegHandler,
    data: &'a mut [u8],
}

impl<'a> RegEntry<'a> {
    /// Create a range covering `addr_begin..=addr_end`, backed by `data`
    /// and serviced by `handler`.
    ///
    /// `data.len()` must equal `addr_end - addr_begin + 1`.
    pub fn new(
        addr_begin: u16,
        addr_end: u16,
        handler: &'a mut dyn RegHandler,
        data: &'a mut [u8],
    ) -> Self {
        debug_assert_eq!(data.len(), (addr_end - addr_begin + 1) as usize);
        Self {
            addr_begin,
            addr_end,
            handler,
            data,
        }
    }

    fn contains(&self, addr: u16) -> bool {
        addr >= self.addr_begin && addr <= self.addr_end
    }
}

/// The outcome of a whole [`RegTable::access`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccessResult {
    /// At least one byte of the span was handled without error.
    Ok,
    /// A handler reported it was busy.
    Busy,
    /// A handler rejected the access.
    Err,
    /// No range covered any byte of the span.
    NotFound,
}

/// The ordered collection of register ranges. Insertion order establishes
/// search order; ranges must be pairwise non-overlapping.
pub struct RegTable<'a> {
    ranges: HVec<RegEntry<'a>, MAX_RANGES>,
}

impl<'a> Default for RegTable<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> RegTable<'a> {
    /// An empty table.
    pub fn new() -> Self {
        Self { ranges: HVec::new() }
    }

    /// Append a range. Insertion order establishes search order.
    ///
    /// Returns `Err(entry)` if the table is already at [`MAX_RANGES`].
    pub fn add(&mut self, entry: RegEntry<'a>) -> Result<(), RegEntry<'a>> {
        self.ranges.push(entry)
    }

    fn find_mut(&mut self, addr: u16) -> Option<&mut RegEntry<'a>> {
        self.ranges.iter_mut().find(|r| r.contains(addr))
    }

    /// Walk `addr..addr+len`, dispatching each contiguous covered span to
    /// its range's handler (or a plain copy, if the handler proceeds).
    ///
    /// On a byte with no covering range: skip it silently (no-op for a
    /// read, dropped for a write) unless it is the last byte of the span,
    /// in which case the whole access is [`AccessResult::NotFound`].
    pub fn access(&mut self, addr: u16, write: bool, buf: &mut [u8]) -> AccessResult {
        let mut remaining = buf.len();
        let mut cursor = addr;
        let mut buf_pos = 0usize;
        let mut handled_any = false;
        let mut last_err = None;

        while remaining > 0 {
            let Some(entry) = self.find_mut(cursor) else {
                if remaining == 1 {
                    return if handled_any {
                        AccessResult::Ok
                    } else {
                        AccessResult::NotFound
                    };
                }
                remaining -= 1;
                cursor = cursor.wrapping_add(1);
                buf_pos += 1;
                continue;
            };

            let addr_offset = cursor - entry.addr_begin;
            let range_span = (entry.addr_end - entry.addr_begin + 1 - addr_offset) as usize;
            let mut step_len = range_span.min(remaining) as u16;

            let result = {
                let mut access = RegAccess {
                    addr: cursor,
                    addr_offset,
                    write,
                    buf: &mut buf[buf_pos..buf_pos + step_len as usize],
                    len: step_len,
                };
                let res = entry.handler.access(&mut access);
                step_len = access.len.min(remaining as u16);
                res
            };

            match result {
                RegResult::Busy => return AccessResult::Busy,
                RegResult::Err => {
                    last_err = Some(AccessResult::Err);
                }
                RegResult::Ok => {
                    handled_any = true;
                }
                RegResult::Proceed => {
                    let ofs = addr_offset as usize;
                    let len = step_len as usize;
                    if write {
                        entry.data[ofs..ofs + len].copy_from_slice(&buf[buf_pos..buf_pos + len]);
                    } else {
                        buf[buf_pos..buf_pos + len].copy_from_slice(&entry.data[ofs..ofs + len]);
                    }
                    handled_any = true;
                }
            }

            remaining -= step_len as usize;
            cursor = cursor.wrapping_add(step_len);
            buf_pos += step_len as usize;
        }

        last_err.unwrap_or(if handled_any {
            AccessResult::Ok
        } else {
            AccessResult::NotFound
        })
    }

    /// Convenience: read `buf.len()` bytes starting at `addr`.
    pub fn read(&mut self, addr: u16, buf: &mut [u8]) -> AccessResult {
        self.access(addr, false, buf)
    }

    /// Convenience: write `buf` starting at `addr`.
    pub fn write(&mut self, addr: u16, buf: &[u8]) -> AccessResult {
        let mut scratch = [0u8; 8];
        let n = buf.len().min(scratch.len());
        scratch[..n].copy_from_slice(&buf[..n]);
        self.access(addr, true, &mut scratch[..n])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn passthrough_round_trips() {
        let mut handler = Passthrough;
        let mut data = [0u8; 4];
        let mut table = RegTable::new();
        table
            .add(RegEntry::new(10, 13, &mut handler, &mut data))
            .ok()
            .unwrap();

        assert_eq!(table.write(11, &[0xAB]), AccessResult::Ok);
        let mut out = [0u8; 1];
        assert_eq!(table.read(11, &mut out), AccessResult::Ok);
        assert_eq!(out[0], 0xAB);
    }

    #[test]
    fn unmapped_single_byte_is_not_found() {
        let mut table: RegTable = RegTable::new();
        let mut out = [0u8; 1];
        assert_eq!(table.read(500, &mut out), AccessResult::NotFound);
    }

    #[test]
    fn ranges_are_pairwise_non_overlapping_by_construction() {
        let mut h1 = Passthrough;
        let mut h2 = Passthrough;
        let mut d1 = [0u8; 2];
        let mut d2 = [0u8; 2];
        let mut table = RegTable::new();
        table.add(RegEntry::new(0, 1, &mut h1, &mut d1)).ok().unwrap();
        table.add(RegEntry::new(2, 3, &mut h2, &mut d2)).ok().unwrap();

        // a span crossing both ranges touches each range's own storage
        assert_eq!(table.write(0, &[1, 2, 3, 4]), AccessResult::Ok);
        drop(table);
        assert_eq!(d1, [1, 2]);
        assert_eq!(d2, [3, 4]);
    }

    #[test]
    fn read_only_handler_denies_writes_and_proceeds_on_reads() {
        let mut handler = ReadOnly;
        let mut data = [0xABu8; 2];
        let mut table = RegTable::new();
        table.add(RegEntry::new(0, 1, &mut handler, &mut data)).ok().unwrap();

        assert_eq!(table.write(0, &[1]), AccessResult::Err);
        let mut out = [0u8; 1];
        assert_eq!(table.read(0, &mut out), AccessResult::Ok);
        assert_eq!(out[0], 0xAB);
    }

    struct Busy;
    impl RegHandler for Busy {
        fn access(&mut self, _access: &mut RegAccess) -> RegResult {
            RegResult::Busy
        }
    }

    #[test]
    fn busy_handler_aborts_access() {
        let mut handler = Busy;
        let mut data = [0u8; 1];
        let mut table = RegTable::new();
        table.add(RegEntry::new(0, 0, &mut handler, &mut data)).ok().unwrap();
        let mut out = [0u8; 1];
        assert_eq!(table.read(0, &mut out), AccessResult::Busy);
    }

    struct NarrowToOne;
    impl RegHandler for NarrowToOne {
        fn access(&mut self, access: &mut RegAccess) -> RegResult {
            access.len = 1;
            RegResult::Proceed
        }
    }

    #[test]
    fn handler_narrowed_length_does_not_overrun_into_next_range() {
        let mut narrow = NarrowToOne;
        let mut plain = Passthrough;
        let mut d1 = [0u8; 4];
        let mut d2 = [0u8; 4];
        let mut table = RegTable::new();
        table.add(RegEntry::new(0, 3, &mut narrow, &mut d1)).ok().unwrap();
        table.add(RegEntry::new(4, 7, &mut plain, &mut d2)).ok().unwrap();

        // requesting 4 bytes from range 0..3, whose handler narrows each
        // step to 1 byte, must still land entirely inside d1.
        assert_eq!(table.write(0, &[9, 9, 9, 9]), AccessResult::Ok);
        drop(table);
        assert_eq!(d1, [9, 9, 9, 9]);
        assert_eq!(d2, [0, 0, 0, 0]);
    }
}
