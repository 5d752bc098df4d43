//! The RFM69/RFM69HW transceiver driver: register access, the
//! standby/RX/TX mode state machine, ISR-driven packet completion, and the
//! 1 % duty-cycle budget.

pub mod constants;

use constants::{commands, mnemonics, registers, timing};
use core::sync::atomic::{AtomicBool, Ordering};
use embedded_hal::spi::SpiDevice;

use crate::clock::Clock;
use crate::error::{GatewayError, RadioOutcome};

/// The three operating modes this driver cycles between. RFM69 has more
/// hardware modes (sleep, FS); this gateway never uses them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Standby,
    Rx,
    Tx,
}

/// Which DIO0 mapping to apply on entering RX or TX, memoized so mode
/// transitions can re-apply it without the caller repeating it every time.
#[derive(Clone, Copy, Debug, Default)]
pub struct DioMapping {
    pub dio: u8,
    pub value: u8,
}

type Error<SPI> = GatewayError<<SPI as embedded_hal::spi::ErrorType>::Error, core::convert::Infallible>;

/// The RFM69 driver, generic over the SPI bus and a monotonic clock.
///
/// The radio's chip-select is expected to be folded into the `SPI`
/// parameter via [`embedded_hal::spi::SpiDevice`], matching how modern
/// `embedded-hal` drivers express bus ownership.
pub struct Rfm69<SPI, CLK> {
    pub(crate) spi: SPI,
    clock: CLK,
    mode: u8,
    is_hw: bool,
    rx_dio: Option<DioMapping>,
    tx_dio: Option<DioMapping>,
    /// Set by the integrator's DIO0 ISR trampoline, consumed by
    /// [`Rfm69::rx_available`] and [`Rfm69::send`].
    isr_flag: AtomicBool,
    budget_ms: u16,
    last_send_ms: u64,
}

impl<SPI, CLK> Rfm69<SPI, CLK>
where
    SPI: SpiDevice,
    CLK: Clock,
{
    /// Build a driver for a module of the given HW-variant flag.
    pub fn new(spi: SPI, clock: CLK, is_hw: bool) -> Self {
        Self {
            spi,
            clock,
            mode: mnemonics::OPMODE_UNKNOWN,
            is_hw,
            rx_dio: None,
            tx_dio: None,
            isr_flag: AtomicBool::new(false),
            budget_ms: timing::BUDGET_INITIAL_MS,
            last_send_ms: 0,
        }
    }

    /// Called by the integrator's DIO0 interrupt handler. Single-writer
    /// discipline: only the ISR ever sets this; only this driver ever
    /// clears it.
    pub fn on_packet_interrupt(&self) {
        self.isr_flag.store(true, Ordering::Relaxed);
    }

    fn take_isr(&self) -> bool {
        self.isr_flag.swap(false, Ordering::Relaxed)
    }

    // -- raw register access -------------------------------------------------

    /// Read one raw register byte.
    pub fn read_raw(&mut self, addr: u8) -> Result<u8, Error<SPI>> {
        let mut buf = [addr & !commands::WRITE, 0];
        self.spi.transfer_in_place(&mut buf).map_err(|e| GatewayError::Spi(e))?;
        Ok(buf[1])
    }

    /// Write one raw register byte.
    pub fn write_raw(&mut self, addr: u8, val: u8) -> Result<(), Error<SPI>> {
        let buf = [addr | commands::WRITE, val];
        self.spi.write(&buf).map_err(|e| GatewayError::Spi(e))
    }

    /// Read a masked, shifted field out of one register.
    pub fn read_field(&mut self, addr: u8, mask: u8, shift: u8) -> Result<u8, Error<SPI>> {
        Ok((self.read_raw(addr)? >> shift) & mask)
    }

    /// Read-modify-write a masked, shifted field of one register.
    pub fn write_field(&mut self, addr: u8, mask: u8, shift: u8, val: u8) -> Result<(), Error<SPI>> {
        let current = self.read_raw(addr)?;
        let cleared = current & !(mask << shift);
        self.write_raw(addr, cleared | ((val & mask) << shift))
    }

    // -- configuration setters -----------------------------------------------

    /// Program the carrier frequency, in kHz.
    pub fn set_carrier_khz(&mut self, freq_khz: u32) -> Result<(), Error<SPI>> {
        let freq_hz = freq_khz as u64 * 1000;
        let frf = freq_hz * timing::FSTEP_HZ_DEN / timing::FSTEP_HZ_NUM;
        self.write_raw(registers::FRF_MSB, (frf >> 16) as u8)?;
        self.write_raw(registers::FRF_MID, (frf >> 8) as u8)?;
        self.write_raw(registers::FRF_LSB, frf as u8)
    }

    /// Program the bitrate, in bits/second.
    pub fn set_bitrate_bps(&mut self, bitrate_bps: u16) -> Result<(), Error<SPI>> {
        let divider = (timing::FXOSC_HZ / bitrate_bps as u64) as u16;
        self.write_raw(registers::BITRATE_MSB, (divider >> 8) as u8)?;
        self.write_raw(registers::BITRATE_LSB, divider as u8)
    }

    /// Program the frequency deviation, in Hz.
    pub fn set_fdev_hz(&mut self, fdev_hz: u32) -> Result<(), Error<SPI>> {
        let fdev = (fdev_hz as u64 * timing::FSTEP_HZ_DEN / timing::FSTEP_HZ_NUM) as u16;
        self.write_raw(registers::FDEV_MSB, (fdev >> 8) as u8 & mnemonics::OUTPUTPOWER_MASK)?;
        self.write_raw(registers::FDEV_LSB, fdev as u8)
    }

    pub fn set_sync_word(&mut self, values: &[u8]) -> Result<(), Error<SPI>> {
        for (i, &b) in values.iter().enumerate() {
            self.write_raw(registers::SYNCVALUE1 + i as u8, b)?;
        }
        Ok(())
    }

    pub fn set_sync_on(&mut self, on: bool) -> Result<(), Error<SPI>> {
        self.write_field(
            registers::SYNCCONFIG,
            mnemonics::SYNCON_MASK,
            mnemonics::SYNCON_SHIFT,
            on as u8,
        )
    }

    pub fn set_sync_size(&mut self, size: u8) -> Result<(), Error<SPI>> {
        self.write_field(
            registers::SYNCCONFIG,
            mnemonics::SYNCSIZE_MASK,
            mnemonics::SYNCSIZE_SHIFT,
            size.saturating_sub(1),
        )
    }

    pub fn set_crc_on(&mut self, on: bool) -> Result<(), Error<SPI>> {
        self.write_field(
            registers::PACKETCONFIG1,
            mnemonics::CRCON_MASK,
            mnemonics::CRCON_SHIFT,
            on as u8,
        )
    }

    pub fn set_crc_auto_clear_off(&mut self, off: bool) -> Result<(), Error<SPI>> {
        self.write_field(
            registers::PACKETCONFIG1,
            mnemonics::CRCAUTOCLEAROFF_MASK,
            mnemonics::CRCAUTOCLEAROFF_SHIFT,
            off as u8,
        )
    }

    pub fn set_packet_format_fixed(&mut self, fixed: bool) -> Result<(), Error<SPI>> {
        // 0 = fixed length, 1 = variable length
        self.write_field(
            registers::PACKETCONFIG1,
            mnemonics::PACKETFORMAT_MASK,
            mnemonics::PACKETFORMAT_SHIFT,
            !fixed as u8,
        )
    }

    pub fn set_payload_length(&mut self, len: u8) -> Result<(), Error<SPI>> {
        self.write_raw(registers::PAYLOADLENGTH, len)
    }

    pub fn set_rx_bw_exp(&mut self, exp: u8) -> Result<(), Error<SPI>> {
        self.write_field(
            registers::RXBW,
            mnemonics::RXBWEXP_MASK,
            mnemonics::RXBWEXP_SHIFT,
            exp,
        )
    }

    /// Program the RSSI threshold, in dBm (negative values allowed).
    pub fn set_rssi_threshold(&mut self, threshold_dbm: i32) -> Result<(), Error<SPI>> {
        self.write_raw(registers::RSSITHRESH, (-threshold_dbm * 2) as u8)
    }

    pub fn set_clkout_off(&mut self) -> Result<(), Error<SPI>> {
        self.write_field(
            registers::DIOMAPPING2,
            mnemonics::CLKOUT_MASK,
            mnemonics::CLKOUT_SHIFT,
            mnemonics::CLKOUT_OFF,
        )
    }

    pub fn set_tx_start_fifo_not_empty(&mut self) -> Result<(), Error<SPI>> {
        self.write_field(
            registers::FIFOTHRESH,
            mnemonics::TXSTARTCONDITION_MASK,
            mnemonics::TXSTARTCONDITION_SHIFT,
            mnemonics::FIFO_NOT_EMPTY,
        )
    }

    /// Memoize the DIO0 mapping applied on entering RX.
    pub fn set_rx_dio_mapping(&mut self, dio: u8, value: u8) {
        self.rx_dio = Some(DioMapping { dio, value });
    }

    /// Memoize the DIO0 mapping applied on entering TX.
    pub fn set_tx_dio_mapping(&mut self, dio: u8, value: u8) {
        self.tx_dio = Some(DioMapping { dio, value });
    }

    fn apply_dio_mapping(&mut self, mapping: DioMapping) -> Result<(), Error<SPI>> {
        let reg = if mapping.dio < 4 {
            registers::DIOMAPPING1
        } else {
            registers::DIOMAPPING2
        };
        let shift = (mapping.dio % 4) * 2;
        self.write_field(reg, mnemonics::DIOMAPPING_MASK, shift, mapping.value)
    }

    /// Output power, given as a percentage in `0..=100`, linearly mapped
    /// to `[-18, 13]` dBm (non-HW variant) or `[5, 20]` dBm (HW variant).
    pub fn set_output_power_percent(&mut self, percent: u8) -> Result<(), Error<SPI>> {
        let percent = percent.min(100) as i32;
        let dbm = if self.is_hw {
            5 + (percent * 15) / 100
        } else {
            -18 + (percent * 31) / 100
        };
        let output_power = if self.is_hw {
            // HW variant routes through PA1/PA2 with a fixed headroom
            (dbm + 14).clamp(0, mnemonics::OUTPUTPOWER_MASK as i32) as u8
        } else {
            (dbm + 18).clamp(0, mnemonics::OUTPUTPOWER_MASK as i32) as u8
        };
        let pa_sel = if self.is_hw {
            mnemonics::PA1_ON | mnemonics::PA2_ON
        } else {
            mnemonics::PA0_ON
        };
        self.write_raw(
            registers::PALEVEL,
            (pa_sel << mnemonics::PA_ON_SHIFT) | output_power,
        )
    }

    // -- mode state machine ---------------------------------------------------

    /// The last mode this driver set, without touching the hardware.
    pub fn cached_mode(&self) -> Option<Mode> {
        match self.mode {
            mnemonics::OPMODE_STANDBY => Some(Mode::Standby),
            mnemonics::OPMODE_RX => Some(Mode::Rx),
            mnemonics::OPMODE_TX => Some(Mode::Tx),
            _ => None,
        }
    }

    fn wait_mode_ready(&mut self) -> Result<(), Error<SPI>> {
        let deadline = self.clock.now_ms() + timing::MODE_READY_TIMEOUT_MS;
        loop {
            let ready = self.read_field(
                registers::IRQFLAGS1,
                mnemonics::MODEREADY_MASK,
                mnemonics::MODEREADY_SHIFT,
            )?;
            if ready != 0 {
                return Ok(());
            }
            if self.clock.now_ms() >= deadline {
                return Err(GatewayError::RadioTimeout);
            }
        }
    }

    /// Enter standby mode, waiting (up to 200 ms) for `MODEREADY`.
    pub fn to_standby(&mut self) -> Result<(), Error<SPI>> {
        self.write_field(
            registers::OPMODE,
            mnemonics::OPMODE_MASK,
            mnemonics::OPMODE_SHIFT,
            mnemonics::OPMODE_STANDBY,
        )?;
        self.wait_mode_ready()?;
        self.mode = mnemonics::OPMODE_STANDBY;
        Ok(())
    }

    /// Enter RX mode from standby.
    pub fn to_rx(&mut self) -> Result<(), Error<SPI>> {
        if let Some(mapping) = self.rx_dio {
            self.apply_dio_mapping(mapping)?;
        }
        self.isr_flag.store(false, Ordering::Relaxed);
        self.write_field(
            registers::OPMODE,
            mnemonics::OPMODE_MASK,
            mnemonics::OPMODE_SHIFT,
            mnemonics::OPMODE_RX,
        )?;
        self.wait_mode_ready()?;
        self.write_field(
            registers::PACKETCONFIG2,
            mnemonics::RXRESTART_MASK,
            mnemonics::RXRESTART_SHIFT,
            1,
        )?;
        self.mode = mnemonics::OPMODE_RX;
        Ok(())
    }

    fn enable_high_power_pa(&mut self, on: bool) -> Result<(), Error<SPI>> {
        if !self.is_hw {
            return Ok(());
        }
        let (pa1, pa2) = if on {
            (mnemonics::PA20DBM1_20DBM, mnemonics::PA20DBM2_20DBM)
        } else {
            (mnemonics::PA20DBM1_NORMAL, mnemonics::PA20DBM2_NORMAL)
        };
        self.write_raw(registers::TESTPA1, pa1)?;
        self.write_raw(registers::TESTPA2, pa2)
    }

    /// Enter TX mode from standby, enabling the HW variant's high-power PA
    /// path if applicable.
    pub fn to_tx(&mut self) -> Result<(), Error<SPI>> {
        if let Some(mapping) = self.tx_dio {
            self.apply_dio_mapping(mapping)?;
        }
        self.isr_flag.store(false, Ordering::Relaxed);
        self.write_field(
            registers::OPMODE,
            mnemonics::OPMODE_MASK,
            mnemonics::OPMODE_SHIFT,
            mnemonics::OPMODE_TX,
        )?;
        self.wait_mode_ready()?;
        self.enable_high_power_pa(true)?;
        self.mode = mnemonics::OPMODE_TX;
        Ok(())
    }

    fn fifo_clear(&mut self) -> Result<(), Error<SPI>> {
        self.write_field(
            registers::IRQFLAGS2,
            mnemonics::FIFOOVERRUN_MASK,
            mnemonics::FIFOOVERRUN_SHIFT,
            1,
        )
    }

    // -- duty-cycle budget ------------------------------------------------

    /// Recover budget since the last send and return the current value, in
    /// milliseconds, saturating at [`timing::BUDGET_INITIAL_MS`].
    pub fn send_budget_ms(&mut self) -> u16 {
        let now = self.clock.now_ms();
        let elapsed = now.saturating_sub(self.last_send_ms);
        let recovered = elapsed.saturating_mul(timing::BUDGET_RECOVER_PER_MS as u64);
        self.budget_ms = self
            .budget_ms
            .saturating_add(recovered.min(u16::MAX as u64) as u16)
            .min(timing::BUDGET_INITIAL_MS);
        self.last_send_ms = now;
        self.budget_ms
    }

    /// Is the current mode RX, and has a packet completed (ISR flag
    /// transitioned, or `PAYLOADREADY` is already set)?
    pub fn rx_available(&mut self) -> Result<bool, Error<SPI>> {
        if self.mode != mnemonics::OPMODE_RX {
            return Ok(false);
        }
        if self.take_isr() {
            return Ok(true);
        }
        let ready = self.read_field(
            registers::IRQFLAGS2,
            mnemonics::PAYLOADREADY_MASK,
            mnemonics::PAYLOADREADY_SHIFT,
        )?;
        Ok(ready != 0)
    }

    /// Pull one byte out of the FIFO.
    pub fn fifo_read_byte(&mut self) -> Result<u8, Error<SPI>> {
        self.read_raw(registers::FIFO)
    }

    /// Send `payload` (at most 255 bytes) if the duty-cycle budget allows
    /// it, then return to RX.
    pub fn send(&mut self, payload: &[u8]) -> Result<RadioOutcome, Error<SPI>> {
        if self.send_budget_ms() < timing::BUDGET_MIN_TO_SEND_MS {
            return Ok(RadioOutcome::NoBudget);
        }

        // Pulse RXRESTART before dropping to standby, to avoid RX deadlocks.
        self.write_field(
            registers::PACKETCONFIG2,
            mnemonics::RXRESTART_MASK,
            mnemonics::RXRESTART_SHIFT,
            1,
        )?;

        self.to_standby()?;
        self.fifo_clear()?;

        let mut buf = [0u8; 1 + 255];
        buf[0] = registers::FIFO | commands::WRITE;
        buf[1..1 + payload.len()].copy_from_slice(payload);
        self.spi
            .write(&buf[..1 + payload.len()])
            .map_err(|e| GatewayError::Spi(e))?;

        let t0 = self.clock.now_ms();
        self.to_tx()?;

        let deadline = t0 + timing::SEND_TIMEOUT_MS;
        let outcome = loop {
            if self.take_isr() {
                break RadioOutcome::Ok;
            }
            if self.clock.now_ms() >= deadline {
                break RadioOutcome::Timeout;
            }
        };

        self.to_standby()?;
        self.enable_high_power_pa(false)?;
        self.to_rx()?;

        let duration = self.clock.now_ms().saturating_sub(t0) as u16;
        let spent = duration.saturating_add(timing::BUDGET_SEND_OVERHEAD_MS);
        self.budget_ms = self.budget_ms.saturating_sub(spent);

        Ok(outcome)
    }

    // -- temperature & RC oscillator calibration ---------------------------

    /// Measure the raw die temperature, saving and restoring the current
    /// mode around the conversion.
    pub fn temperature(&mut self) -> Result<i8, Error<SPI>> {
        let saved = self.mode;
        self.to_standby()?;

        self.write_field(
            registers::TEMP1,
            mnemonics::TEMP_MEAS_START_MASK,
            mnemonics::TEMP_MEAS_START_SHIFT,
            1,
        )?;
        let deadline = self.clock.now_ms() + timing::MODE_READY_TIMEOUT_MS;
        loop {
            let running = self.read_field(
                registers::TEMP1,
                mnemonics::TEMP_MEAS_RUNNING_MASK,
                mnemonics::TEMP_MEAS_RUNNING_SHIFT,
            )?;
            if running == 0 {
                break;
            }
            if self.clock.now_ms() >= deadline {
                return Err(GatewayError::RadioTimeout);
            }
        }
        let raw = self.read_raw(registers::TEMP2)?;

        self.restore_mode(saved)?;
        Ok(!(raw as i8))
    }

    /// Trigger and wait for an RC oscillator calibration cycle.
    pub fn rc_osc_calibrate(&mut self) -> Result<(), Error<SPI>> {
        let saved = self.mode;
        self.to_standby()?;

        self.write_field(
            registers::OSC1,
            mnemonics::RCCALSTART_MASK,
            mnemonics::RCCALSTART_SHIFT,
            1,
        )?;
        let deadline = self.clock.now_ms() + timing::MODE_READY_TIMEOUT_MS;
        loop {
            let done = self.read_field(
                registers::OSC1,
                mnemonics::RCCALDONE_MASK,
                mnemonics::RCCALDONE_SHIFT,
            )?;
            if done != 0 {
                break;
            }
            if self.clock.now_ms() >= deadline {
                return Err(GatewayError::RadioTimeout);
            }
        }

        self.restore_mode(saved)
    }

    fn restore_mode(&mut self, mode: u8) -> Result<(), Error<SPI>> {
        match mode {
            mnemonics::OPMODE_RX => self.to_rx(),
            mnemonics::OPMODE_TX => self.to_tx(),
            _ => self.to_standby(),
        }
    }

    /// Read the latched RSSI register, converted to dBm.
    pub fn rssi_dbm(&mut self) -> Result<i16, Error<SPI>> {
        let raw = self.read_raw(registers::RSSIVALUE)?;
        Ok(-(raw as i16) / 2)
    }
}

#[cfg(test)]
mod test {
    extern crate std;
    use super::*;
    use crate::clock::TestClock;
    use crate::spi_test_expects;
    use embedded_hal_mock::eh1::spi::{Mock as SpiMock, Transaction as SpiTransaction};
    use std::vec;

    fn mk_radio(expectations: &[SpiTransaction<u8>]) -> Rfm69<SpiMock<u8>, TestClock> {
        Rfm69::new(SpiMock::new(expectations), TestClock::new(), true)
    }

    #[test]
    fn budget_saturates_at_initial_value() {
        let mut radio = mk_radio(&[]);
        radio.clock.advance(10_000_000);
        assert_eq!(radio.send_budget_ms(), timing::BUDGET_INITIAL_MS);
        radio.spi.done();
    }

    #[test]
    fn budget_recovers_ten_per_elapsed_ms() {
        let mut radio = mk_radio(&[]);
        radio.budget_ms = 0;
        radio.last_send_ms = 0;
        radio.clock.advance(1_000);
        assert_eq!(radio.send_budget_ms(), 10_000);
        radio.spi.done();
    }

    #[test]
    fn boundary_3599_is_below_minimum_to_send() {
        let mut radio = mk_radio(&[]);
        radio.budget_ms = 3599;
        radio.last_send_ms = radio.clock.now_ms();
        assert!(radio.budget_ms < timing::BUDGET_MIN_TO_SEND_MS);
        radio.spi.done();
    }

    #[test]
    fn output_power_percent_extremes_non_hw() {
        let mut radio = mk_radio(&spi_test_expects![
            (vec![registers::PALEVEL | commands::WRITE, mnemonics::PA0_ON << mnemonics::PA_ON_SHIFT], vec![0, 0]),
        ]);
        radio.is_hw = false;
        radio.set_output_power_percent(0).unwrap();
        radio.spi.done();
    }

    #[test]
    fn raw_register_round_trip() {
        let mut radio = mk_radio(&spi_test_expects![
            (vec![registers::OPMODE, 0], vec![0, 0x10]),
            (vec![registers::OPMODE | commands::WRITE, 0xAA], vec![0, 0]),
        ]);
        assert_eq!(radio.read_raw(registers::OPMODE).unwrap(), 0x10);
        radio.write_raw(registers::OPMODE, 0xAA).unwrap();
        radio.spi.done();
    }

    #[test]
    fn carrier_frequency_matches_868_950_khz() {
        let mut radio = mk_radio(&spi_test_expects![
            (vec![registers::FRF_MSB | commands::WRITE, 0xD9], vec![0, 0]),
            (vec![registers::FRF_MID | commands::WRITE, 0x3C], vec![0, 0]),
            (vec![registers::FRF_LSB | commands::WRITE, 0xCC], vec![0, 0]),
        ]);
        radio.set_carrier_khz(868_950).unwrap();
        radio.spi.done();
    }
}
