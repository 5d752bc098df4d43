//! Register-range glue binding the gateway's live collaborators (radio,
//! NVS, local sensors, clock, PCA301 engine) into the sparse address space
//! [`RegTable`](crate::regreg::RegTable) exposes.
//!
//! None of the handlers here use [`RegResult::Proceed`](crate::regreg::RegResult::Proceed):
//! every range maps onto state that already lives somewhere else (a struct
//! field, a radio register, a clock), so each handler owns its byte view
//! directly and serves it from there rather than through the range's own
//! backing array.

use embedded_hal::spi::SpiDevice;

use crate::clock::Clock;
use crate::crc::crc16;
use crate::nvs::{self, NvStorage};
use crate::pca301::{Announce, EngineConfig, EngineStats};
use crate::regreg::{RegAccess, RegHandler, RegResult};
use crate::rfm69::Rfm69;
use crate::sensors::LocalSensors;

pub const DEVICE_BEGIN: u16 = 0;
pub const DEVICE_LEN: usize = 5;
pub const DEVICE_END: u16 = DEVICE_BEGIN + DEVICE_LEN as u16 - 1;

pub const NVS_BEGIN: u16 = 1000;
pub const NVS_LEN: usize = 17;
pub const NVS_END: u16 = NVS_BEGIN + NVS_LEN as u16 - 1;

pub const SENSORS_BEGIN: u16 = 2000;
pub const SENSORS_LEN: usize = 12;
pub const SENSORS_END: u16 = SENSORS_BEGIN + SENSORS_LEN as u16 - 1;

pub const RFM69_BEGIN: u16 = 3000;
const RFM69_RAW_LEN: u16 = 114;
const RFM69_REL_TEMP: u16 = 114;
const RFM69_REL_RSSI: u16 = 115;
const RFM69_REL_OSC: u16 = 116;
const RFM69_REL_BUDGET: u16 = 117;
pub const RFM69_END: u16 = RFM69_BEGIN + RFM69_REL_BUDGET;

pub const PCA301_DEVICE_BEGIN: u16 = 4100;
pub const PCA301_DEVICE_LEN: usize = 20;
pub const PCA301_DEVICE_END: u16 = PCA301_DEVICE_BEGIN + PCA301_DEVICE_LEN as u16 - 1;
const PCA301_DEVICE_CMD_OFS: u16 = 9;

pub const PCA301_COMMON_BEGIN: u16 = 4120;
pub const PCA301_COMMON_LEN: usize = 19;
pub const PCA301_COMMON_END: u16 = PCA301_COMMON_BEGIN + PCA301_COMMON_LEN as u16 - 1;

/// Width of the widest range ever added to the table (the RFM69
/// pass-through range). Callers building a scratch buffer outside the
/// table itself — e.g. a single-address write forwarded as one contiguous
/// span — need at least this much room to avoid truncating a write that's
/// otherwise entirely within one range's width.
pub const MAX_RANGE_LEN: usize = (RFM69_END - RFM69_BEGIN + 1) as usize;

/// The project-level NVS blob: RFM69 and ATmega calibration values ahead of
/// the PCA301/RFM69 radio sub-block, all behind a CRC-16 prefix.
///
/// Field order and width follow the original firmware's `PROJECT_NVS_T` /
/// `PCA301_RFM69_NVS_T` layout, including its native (AVR) little-endian
/// multi-byte fields.
#[derive(Clone, Copy, Debug)]
pub struct NvsBlob {
    bytes: [u8; NVS_LEN],
}

impl NvsBlob {
    /// Factory calibration defaults, used when the stored block fails its
    /// CRC check on boot.
    pub fn defaults() -> Self {
        let mut blob = Self { bytes: [0u8; NVS_LEN] };
        blob.set_rfm69_is_hw(false);
        blob.set_rfm69_temp_corr(-95);
        blob.set_atmega_temp_corr(-333);
        blob.set_atmega_volt_corr(1023);
        blob.set_freq_carrier_khz(868_950);
        blob.set_bitrate_bps(6631);
        blob.set_rssi_threshold(-114);
        blob.set_fdev_hz(45_000);
        blob
    }

    pub fn from_bytes(bytes: [u8; NVS_LEN]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; NVS_LEN] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; NVS_LEN] {
        &mut self.bytes
    }

    pub fn rfm69_is_hw(&self) -> bool {
        self.bytes[2] != 0
    }

    pub fn set_rfm69_is_hw(&mut self, v: bool) {
        self.bytes[2] = v as u8;
    }

    pub fn rfm69_temp_corr(&self) -> i8 {
        self.bytes[3] as i8
    }

    pub fn set_rfm69_temp_corr(&mut self, v: i8) {
        self.bytes[3] = v as u8;
    }

    pub fn atmega_temp_corr(&self) -> i16 {
        i16::from_le_bytes([self.bytes[4], self.bytes[5]])
    }

    pub fn set_atmega_temp_corr(&mut self, v: i16) {
        self.bytes[4..6].copy_from_slice(&v.to_le_bytes());
    }

    pub fn atmega_volt_corr(&self) -> i16 {
        i16::from_le_bytes([self.bytes[6], self.bytes[7]])
    }

    pub fn set_atmega_volt_corr(&mut self, v: i16) {
        self.bytes[6..8].copy_from_slice(&v.to_le_bytes());
    }

    pub fn freq_carrier_khz(&self) -> u32 {
        u32::from_le_bytes([self.bytes[8], self.bytes[9], self.bytes[10], self.bytes[11]])
    }

    pub fn set_freq_carrier_khz(&mut self, v: u32) {
        self.bytes[8..12].copy_from_slice(&v.to_le_bytes());
    }

    pub fn bitrate_bps(&self) -> u16 {
        u16::from_le_bytes([self.bytes[12], self.bytes[13]])
    }

    pub fn set_bitrate_bps(&mut self, v: u16) {
        self.bytes[12..14].copy_from_slice(&v.to_le_bytes());
    }

    pub fn rssi_threshold(&self) -> i8 {
        self.bytes[14] as i8
    }

    pub fn set_rssi_threshold(&mut self, v: i8) {
        self.bytes[14] = v as u8;
    }

    pub fn fdev_hz(&self) -> u16 {
        u16::from_le_bytes([self.bytes[15], self.bytes[16]])
    }

    pub fn set_fdev_hz(&mut self, v: u16) {
        self.bytes[15..17].copy_from_slice(&v.to_le_bytes());
    }

    /// Read the block and validate it; `defaults()` is the caller's
    /// fallback on a CRC mismatch.
    pub fn load<S: NvStorage>(storage: &mut S) -> (Self, bool) {
        let mut buf = [0u8; NVS_LEN];
        let valid = nvs::read_checked(storage, &mut buf);
        (Self::from_bytes(buf), valid)
    }

    /// Recompute the CRC and write the whole block.
    pub fn commit<S: NvStorage>(&mut self, storage: &mut S) {
        nvs::write_checked(storage, &mut self.bytes);
    }

    /// Stamp a deliberately wrong CRC over the current contents and write
    /// it, forcing the next boot's [`NvsBlob::load`] to fall back to
    /// defaults. The original firmware does the same by scribbling two
    /// garbage bytes over the CRC field directly; since [`NvStorage`] only
    /// supports whole-block writes here, the block is rewritten in full
    /// with the CRC inverted instead.
    pub fn invalidate<S: NvStorage>(&mut self, storage: &mut S) {
        let good = crc16(&self.bytes[2..], nvs::CRC_POLY);
        self.bytes[0..2].copy_from_slice(&(!good).to_be_bytes());
        storage.write(&self.bytes);
    }
}

/// The `1000..1000+N` range: a write to offset 0 commits the block, a write
/// to offset 1 invalidates it, everything else is a plain field byte.
pub struct NvsRegisters<'a, S> {
    storage: &'a mut S,
    blob: &'a mut NvsBlob,
}

impl<'a, S> NvsRegisters<'a, S> {
    pub fn new(storage: &'a mut S, blob: &'a mut NvsBlob) -> Self {
        Self { storage, blob }
    }
}

impl<'a, S: NvStorage> RegHandler for NvsRegisters<'a, S> {
    fn access(&mut self, access: &mut RegAccess) -> RegResult {
        let ofs = access.addr_offset as usize;
        let len = access.len as usize;
        if access.write {
            self.blob.as_bytes_mut()[ofs..ofs + len].copy_from_slice(&access.buf[..len]);
            if ofs == 0 {
                self.blob.commit(self.storage);
            } else if ofs == 1 {
                self.blob.invalidate(self.storage);
            }
        } else {
            access.buf[..len].copy_from_slice(&self.blob.as_bytes()[ofs..ofs + len]);
        }
        RegResult::Ok
    }
}

/// The `2000..2011` range: local temperature and voltage (read-only) plus
/// the gateway's own millisecond clock (read/write).
pub struct SensorsRegisters<'a, SENS, CLK> {
    sensors: &'a mut SENS,
    clock: &'a mut CLK,
}

impl<'a, SENS, CLK> SensorsRegisters<'a, SENS, CLK> {
    pub fn new(sensors: &'a mut SENS, clock: &'a mut CLK) -> Self {
        Self { sensors, clock }
    }
}

impl<'a, SENS: LocalSensors, CLK: Clock> RegHandler for SensorsRegisters<'a, SENS, CLK> {
    fn access(&mut self, access: &mut RegAccess) -> RegResult {
        access.len = 1;
        match access.addr_offset {
            ofs @ (0 | 1) => {
                if access.write {
                    return RegResult::Err;
                }
                access.buf[0] = self.sensors.temperature().to_le_bytes()[ofs as usize];
                RegResult::Ok
            }
            ofs @ (2 | 3) => {
                if access.write {
                    return RegResult::Err;
                }
                access.buf[0] = self.sensors.voltage().to_le_bytes()[(ofs - 2) as usize];
                RegResult::Ok
            }
            ofs @ 4..=11 => {
                let i = (ofs - 4) as usize;
                if access.write {
                    let mut ms = self.clock.now_ms().to_le_bytes();
                    ms[i] = access.buf[0];
                    self.clock.set(u64::from_le_bytes(ms));
                } else {
                    access.buf[0] = self.clock.now_ms().to_le_bytes()[i];
                }
                RegResult::Ok
            }
            _ => RegResult::Err,
        }
    }
}

/// The `3000..3117` range: 114 bytes of raw RFM69 register pass-through
/// plus four derived/extended slots.
pub struct Rfm69Registers<'a, SPI, CLK> {
    radio: &'a mut Rfm69<SPI, CLK>,
    temp_corr: i8,
}

impl<'a, SPI, CLK> Rfm69Registers<'a, SPI, CLK> {
    pub fn new(radio: &'a mut Rfm69<SPI, CLK>, temp_corr: i8) -> Self {
        Self { radio, temp_corr }
    }
}

impl<'a, SPI, CLK> RegHandler for Rfm69Registers<'a, SPI, CLK>
where
    SPI: SpiDevice,
    CLK: Clock,
{
    fn access(&mut self, access: &mut RegAccess) -> RegResult {
        access.len = 1;
        match access.addr_offset {
            RFM69_REL_BUDGET => {
                if access.write {
                    return RegResult::Err;
                }
                let secs = (self.radio.send_budget_ms() / 1000).min(u8::MAX as u16) as u8;
                access.buf[0] = secs;
                RegResult::Ok
            }
            RFM69_REL_OSC => {
                if !access.write {
                    return RegResult::Err;
                }
                match self.radio.rc_osc_calibrate() {
                    Ok(()) => RegResult::Ok,
                    Err(_) => RegResult::Err,
                }
            }
            RFM69_REL_RSSI => {
                if access.write {
                    return RegResult::Err;
                }
                match self.radio.rssi_dbm() {
                    Ok(dbm) => {
                        access.buf[0] = dbm.clamp(i8::MIN as i16, i8::MAX as i16) as i8 as u8;
                        RegResult::Ok
                    }
                    Err(_) => RegResult::Err,
                }
            }
            RFM69_REL_TEMP => {
                if access.write {
                    return RegResult::Err;
                }
                match self.radio.temperature() {
                    Ok(raw) => {
                        access.buf[0] = raw.wrapping_add(self.temp_corr) as u8;
                        RegResult::Ok
                    }
                    Err(_) => RegResult::Err,
                }
            }
            raw if raw < RFM69_RAW_LEN => {
                if access.write {
                    match self.radio.write_raw(raw as u8, access.buf[0]) {
                        Ok(()) => RegResult::Ok,
                        Err(_) => RegResult::Err,
                    }
                } else {
                    match self.radio.read_raw(raw as u8) {
                        Ok(val) => {
                            access.buf[0] = val;
                            RegResult::Ok
                        }
                        Err(_) => RegResult::Err,
                    }
                }
            }
            _ => RegResult::Err,
        }
    }
}

/// The `4100..4119` range: one outlet's address, channel, last-seen
/// consumption and RSSI, plus a write-triggered command slot.
///
/// Doubles as the engine's [`Announce`] sink: the values an incoming frame
/// or a dispatched command reports land directly in this mirror's bytes,
/// ready for the next read.
#[derive(Default)]
pub struct Pca301DeviceRegisters {
    bytes: [u8; PCA301_DEVICE_LEN],
    busy: bool,
    pending_cmd: Option<u8>,
}

impl Pca301DeviceRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synced from `Engine::is_busy()` before each register access, since
    /// the original firmware denies the whole range (reads included)
    /// while a request is outstanding.
    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    pub fn addr_bytes(&self) -> [u8; 3] {
        [self.bytes[0], self.bytes[1], self.bytes[2]]
    }

    pub fn channel(&self) -> u8 {
        self.bytes[3]
    }

    /// The command code latched by the last write to the command offset,
    /// if any, paired with the address/channel in effect at that time.
    pub fn take_pending_cmd(&mut self) -> Option<(u8, [u8; 3], u8)> {
        self.pending_cmd.take().map(|cmd| (cmd, self.addr_bytes(), self.channel()))
    }
}

impl RegHandler for Pca301DeviceRegisters {
    fn access(&mut self, access: &mut RegAccess) -> RegResult {
        if self.busy {
            return RegResult::Busy;
        }
        let ofs = access.addr_offset as usize;
        let len = access.len as usize;
        if access.write {
            self.bytes[ofs..ofs + len].copy_from_slice(&access.buf[..len]);
            let cmd_ofs = PCA301_DEVICE_CMD_OFS as usize;
            if ofs <= cmd_ofs && ofs + len > cmd_ofs {
                self.pending_cmd = Some(self.bytes[cmd_ofs]);
            }
        } else {
            access.buf[..len].copy_from_slice(&self.bytes[ofs..ofs + len]);
        }
        RegResult::Ok
    }
}

impl Announce for Pca301DeviceRegisters {
    fn addr(&mut self, addr: u32) {
        let be = addr.to_be_bytes();
        self.bytes[0..3].copy_from_slice(&be[1..4]);
    }

    fn chan(&mut self, chan: u8) {
        self.bytes[3] = chan;
    }

    fn rssi(&mut self, rssi: i8) {
        self.bytes[8] = rssi as u8;
    }

    fn cmd(&mut self, cmd: u8) {
        self.bytes[9] = cmd;
    }

    fn cons(&mut self, cons: u16) {
        self.bytes[4..6].copy_from_slice(&cons.to_le_bytes());
    }

    fn cons_tot(&mut self, cons_tot: u16) {
        self.bytes[6..8].copy_from_slice(&cons_tot.to_le_bytes());
    }
}

/// The `4120..4138` range: the engine's statistics and tunables, one byte
/// at a time, in the original struct's native (little-endian) field order.
pub struct Pca301CommonRegisters<'a> {
    stats: &'a mut EngineStats,
    config: &'a mut EngineConfig,
    busy: bool,
}

impl<'a> Pca301CommonRegisters<'a> {
    pub fn new(stats: &'a mut EngineStats, config: &'a mut EngineConfig) -> Self {
        Self { stats, config, busy: false }
    }

    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    fn get_byte(&self, offset: u16) -> u8 {
        match offset {
            0 => self.stats.rx_ok.to_le_bytes()[0],
            1 => self.stats.rx_ok.to_le_bytes()[1],
            2 => self.stats.rx_bad_crc.to_le_bytes()[0],
            3 => self.stats.rx_bad_crc.to_le_bytes()[1],
            4 => self.stats.rx_timeout.to_le_bytes()[0],
            5 => self.stats.rx_timeout.to_le_bytes()[1],
            6 => self.stats.tx_ok.to_le_bytes()[0],
            7 => self.stats.tx_ok.to_le_bytes()[1],
            8 => self.stats.tx_err.to_le_bytes()[0],
            9 => self.stats.tx_err.to_le_bytes()[1],
            10 => self.stats.tx_timeout.to_le_bytes()[0],
            11 => self.stats.tx_timeout.to_le_bytes()[1],
            12 => self.config.pair_ena as u8,
            13 => self.config.chan_dfl,
            14 => self.config.tout_res_ms.to_le_bytes()[0],
            15 => self.config.tout_res_ms.to_le_bytes()[1],
            16 => self.config.retries,
            17 => self.config.poll_auto as u8,
            18 => self.config.frame_dump as u8,
            _ => 0,
        }
    }

    fn set_byte(&mut self, offset: u16, val: u8) {
        macro_rules! set_u16_byte {
            ($field:expr, $lo:expr) => {{
                let mut bytes = $field.to_le_bytes();
                bytes[if $lo { 0 } else { 1 }] = val;
                $field = u16::from_le_bytes(bytes);
            }};
        }
        match offset {
            0 => set_u16_byte!(self.stats.rx_ok, true),
            1 => set_u16_byte!(self.stats.rx_ok, false),
            2 => set_u16_byte!(self.stats.rx_bad_crc, true),
            3 => set_u16_byte!(self.stats.rx_bad_crc, false),
            4 => set_u16_byte!(self.stats.rx_timeout, true),
            5 => set_u16_byte!(self.stats.rx_timeout, false),
            6 => set_u16_byte!(self.stats.tx_ok, true),
            7 => set_u16_byte!(self.stats.tx_ok, false),
            8 => set_u16_byte!(self.stats.tx_err, true),
            9 => set_u16_byte!(self.stats.tx_err, false),
            10 => set_u16_byte!(self.stats.tx_timeout, true),
            11 => set_u16_byte!(self.stats.tx_timeout, false),
            12 => self.config.pair_ena = val != 0,
            13 => self.config.chan_dfl = val,
            14 => set_u16_byte!(self.config.tout_res_ms, true),
            15 => set_u16_byte!(self.config.tout_res_ms, false),
            16 => self.config.retries = val,
            17 => self.config.poll_auto = val != 0,
            18 => self.config.frame_dump = val != 0,
            _ => {}
        }
    }
}

impl<'a> RegHandler for Pca301CommonRegisters<'a> {
    fn access(&mut self, access: &mut RegAccess) -> RegResult {
        if self.busy {
            return RegResult::Busy;
        }
        access.len = 1;
        if access.write {
            self.set_byte(access.addr_offset, access.buf[0]);
        } else {
            access.buf[0] = self.get_byte(access.addr_offset);
        }
        RegResult::Ok
    }
}

#[cfg(test)]
mod test {
    extern crate std;

    use super::*;
    use crate::nvs::MemoryNvs;

    #[test]
    fn nvs_blob_round_trips_through_bytes() {
        let blob = NvsBlob::defaults();
        let restored = NvsBlob::from_bytes(*blob.as_bytes());
        assert_eq!(restored.freq_carrier_khz(), 868_950);
        assert_eq!(restored.bitrate_bps(), 6631);
        assert_eq!(restored.rssi_threshold(), -114);
        assert_eq!(restored.fdev_hz(), 45_000);
        assert_eq!(restored.rfm69_temp_corr(), -95);
        assert_eq!(restored.atmega_temp_corr(), -333);
        assert_eq!(restored.atmega_volt_corr(), 1023);
    }

    #[test]
    fn nvs_register_write_to_offset_zero_commits() {
        let mut storage = MemoryNvs::new(NVS_LEN);
        let mut blob = NvsBlob::defaults();
        {
            let mut regs = NvsRegisters::new(&mut storage, &mut blob);
            let mut buf = [0u8];
            let mut access = RegAccess { addr: NVS_BEGIN, addr_offset: 0, write: true, buf: &mut buf, len: 1 };
            assert_eq!(regs.access(&mut access), RegResult::Ok);
        }
        let (loaded, valid) = NvsBlob::load(&mut storage);
        assert!(valid);
        assert_eq!(loaded.freq_carrier_khz(), blob.freq_carrier_khz());
    }

    #[test]
    fn nvs_register_write_to_offset_one_invalidates() {
        let mut storage = MemoryNvs::new(NVS_LEN);
        let mut blob = NvsBlob::defaults();
        blob.commit(&mut storage);
        {
            let mut regs = NvsRegisters::new(&mut storage, &mut blob);
            let mut buf = [0u8];
            let mut access = RegAccess { addr: NVS_BEGIN + 1, addr_offset: 1, write: true, buf: &mut buf, len: 1 };
            assert_eq!(regs.access(&mut access), RegResult::Ok);
        }
        let (_, valid) = NvsBlob::load(&mut storage);
        assert!(!valid);
    }

    #[test]
    fn pca301_device_write_to_cmd_offset_latches_pending() {
        let mut regs = Pca301DeviceRegisters::new();
        regs.addr(0x0011_2233);
        regs.chan(7);
        let mut buf = [2u8];
        let mut access = RegAccess {
            addr: PCA301_DEVICE_BEGIN + PCA301_DEVICE_CMD_OFS,
            addr_offset: PCA301_DEVICE_CMD_OFS,
            write: true,
            buf: &mut buf,
            len: 1,
        };
        assert_eq!(regs.access(&mut access), RegResult::Ok);
        let (cmd, addr, chan) = regs.take_pending_cmd().unwrap();
        assert_eq!(cmd, 2);
        assert_eq!(addr, [0x11, 0x22, 0x33]);
        assert_eq!(chan, 7);
        assert!(regs.take_pending_cmd().is_none());
    }

    #[test]
    fn pca301_device_denies_access_while_busy() {
        let mut regs = Pca301DeviceRegisters::new();
        regs.set_busy(true);
        let mut buf = [0u8];
        let mut access = RegAccess { addr: PCA301_DEVICE_BEGIN, addr_offset: 0, write: false, buf: &mut buf, len: 1 };
        assert_eq!(regs.access(&mut access), RegResult::Busy);
    }

    #[test]
    fn pca301_common_byte_access_round_trips_stats_and_config() {
        let mut stats = EngineStats::default();
        let mut config = EngineConfig {
            pair_ena: false,
            chan_dfl: 1,
            tout_res_ms: 500,
            retries: 2,
            poll_auto: true,
            frame_dump: false,
        };
        let mut regs = Pca301CommonRegisters::new(&mut stats, &mut config);

        let mut buf = [1u8];
        let mut access = RegAccess { addr: PCA301_COMMON_BEGIN + 12, addr_offset: 12, write: true, buf: &mut buf, len: 1 };
        assert_eq!(regs.access(&mut access), RegResult::Ok);
        drop(regs);
        assert!(config.pair_ena);

        let mut regs = Pca301CommonRegisters::new(&mut stats, &mut config);
        let mut out = [0u8];
        let mut access = RegAccess { addr: PCA301_COMMON_BEGIN + 12, addr_offset: 12, write: false, buf: &mut out, len: 1 };
        assert_eq!(regs.access(&mut access), RegResult::Ok);
        assert_eq!(out[0], 1);
    }
}
