//! Non-volatile storage as a CRC-prefixed blob.
//!
//! The storage medium itself (EEPROM, flash page, whatever) is an external
//! collaborator; this crate only defines the raw byte-block interface and
//! the CRC framing layered on top of it, matching `pinkie_nvs_read`/`_write`.

use crate::crc::crc16;

/// The polynomial used for the NVS checksum, distinct from the one used for
/// PCA301 frames.
pub const CRC_POLY: u16 = 0xED2F;

/// Raw non-volatile byte storage, addressed as a single fixed-size block.
pub trait NvStorage {
    /// Read `buf.len()` bytes starting at offset 0 into `buf`.
    fn read(&mut self, buf: &mut [u8]);

    /// Write all of `buf` starting at offset 0.
    fn write(&mut self, buf: &[u8]);
}

/// Read a CRC-prefixed block: the first two bytes are a big-endian CRC-16
/// (poly [`CRC_POLY`]) computed over the rest of `buf`.
///
/// Returns `true` if the stored CRC matches, i.e. the block is valid.
/// `buf` always ends up holding whatever bytes were read, valid or not;
/// callers are expected to replace `buf[2..]` with defaults on an invalid
/// read, matching the firmware's "corrupt NVS is silently replaced with
/// defaults" policy.
pub fn read_checked<S: NvStorage>(storage: &mut S, buf: &mut [u8]) -> bool {
    storage.read(buf);
    if buf.len() < 2 {
        return false;
    }
    let stored = u16::from_be_bytes([buf[0], buf[1]]);
    let computed = crc16(&buf[2..], CRC_POLY);
    stored == computed
}

/// Recompute the CRC over `buf[2..]`, stamp it into `buf[0..2]`, and write
/// the whole block.
pub fn write_checked<S: NvStorage>(storage: &mut S, buf: &mut [u8]) {
    if buf.len() >= 2 {
        let crc = crc16(&buf[2..], CRC_POLY);
        buf[0..2].copy_from_slice(&crc.to_be_bytes());
    }
    storage.write(buf);
}

#[cfg(any(test, feature = "std"))]
pub use test_support::MemoryNvs;

#[cfg(any(test, feature = "std"))]
mod test_support {
    extern crate std;

    use super::NvStorage;
    use std::vec::Vec;

    /// A host-side [`NvStorage`] backed by a `Vec<u8>`, for tests.
    #[derive(Debug, Default)]
    pub struct MemoryNvs {
        blob: Vec<u8>,
    }

    impl MemoryNvs {
        /// An empty (all-zero) block of the given size.
        pub fn new(size: usize) -> Self {
            Self {
                blob: std::vec![0u8; size],
            }
        }
    }

    impl NvStorage for MemoryNvs {
        fn read(&mut self, buf: &mut [u8]) {
            let n = buf.len().min(self.blob.len());
            buf[..n].copy_from_slice(&self.blob[..n]);
        }

        fn write(&mut self, buf: &[u8]) {
            if self.blob.len() < buf.len() {
                self.blob.resize(buf.len(), 0);
            }
            self.blob[..buf.len()].copy_from_slice(buf);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fresh_storage_is_invalid() {
        let mut nvs = MemoryNvs::new(8);
        let mut buf = [0u8; 8];
        assert!(!read_checked(&mut nvs, &mut buf));
    }

    #[test]
    fn write_then_read_round_trips_as_valid() {
        let mut nvs = MemoryNvs::new(8);
        let mut buf = [0u8; 8];
        buf[2..].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        write_checked(&mut nvs, &mut buf);

        let mut read_buf = [0u8; 8];
        assert!(read_checked(&mut nvs, &mut read_buf));
        assert_eq!(read_buf, buf);
    }

    #[test]
    fn corrupted_payload_is_detected() {
        let mut nvs = MemoryNvs::new(8);
        let mut buf = [0u8; 8];
        buf[2..].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        write_checked(&mut nvs, &mut buf);

        // flip a payload byte directly in the backing store
        let mut tampered = [0u8; 8];
        nvs.read(&mut tampered);
        tampered[3] ^= 0xFF;
        nvs.write(&tampered);

        let mut read_buf = [0u8; 8];
        assert!(!read_checked(&mut nvs, &mut read_buf));
    }
}
