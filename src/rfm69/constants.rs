//! RFM69 register addresses, mode values, and bitfield masks/shifts.

/// Register addresses.
pub mod registers {
    pub const FIFO: u8 = 0x00;
    pub const OPMODE: u8 = 0x01;
    pub const BITRATE_MSB: u8 = 0x03;
    pub const BITRATE_LSB: u8 = 0x04;
    pub const FDEV_MSB: u8 = 0x05;
    pub const FDEV_LSB: u8 = 0x06;
    pub const FRF_MSB: u8 = 0x07;
    pub const FRF_MID: u8 = 0x08;
    pub const FRF_LSB: u8 = 0x09;
    pub const OSC1: u8 = 0x0a;
    pub const PALEVEL: u8 = 0x11;
    pub const OCP: u8 = 0x13;
    pub const RXBW: u8 = 0x19;
    pub const RSSICONFIG: u8 = 0x23;
    pub const RSSIVALUE: u8 = 0x24;
    pub const DIOMAPPING1: u8 = 0x25;
    pub const DIOMAPPING2: u8 = 0x26;
    pub const IRQFLAGS1: u8 = 0x27;
    pub const IRQFLAGS2: u8 = 0x28;
    pub const RSSITHRESH: u8 = 0x29;
    pub const SYNCCONFIG: u8 = 0x2e;
    pub const SYNCVALUE1: u8 = 0x2f;
    pub const PACKETCONFIG1: u8 = 0x37;
    pub const PAYLOADLENGTH: u8 = 0x38;
    pub const FIFOTHRESH: u8 = 0x3c;
    pub const PACKETCONFIG2: u8 = 0x3d;
    pub const TEMP1: u8 = 0x4e;
    pub const TEMP2: u8 = 0x4f;
    pub const TESTPA1: u8 = 0x5a;
    pub const TESTPA2: u8 = 0x5c;
    /// Highest raw register address this driver's raw pass-through range
    /// (the gateway's `3000..3113`) covers.
    pub const RAW_MAX: u8 = 0x71;
}

/// SPI command bits.
pub mod commands {
    pub const WRITE: u8 = 0x80;
}

/// Bitfield masks, shifts and mnemonic values that don't have their own
/// dedicated register constant above.
pub mod mnemonics {
    pub const OPMODE_MASK: u8 = 0x07;
    pub const OPMODE_SHIFT: u8 = 2;
    pub const OPMODE_STANDBY: u8 = 0x01;
    pub const OPMODE_TX: u8 = 0x03;
    pub const OPMODE_RX: u8 = 0x04;

    pub const PA_ON_MASK: u8 = 0x07;
    pub const PA_ON_SHIFT: u8 = 5;
    pub const OUTPUTPOWER_MASK: u8 = 0x1f;
    pub const OUTPUTPOWER_SHIFT: u8 = 0;
    pub const PA0_ON: u8 = 0x04;
    pub const PA1_ON: u8 = 0x02;
    pub const PA2_ON: u8 = 0x01;

    pub const OCP_ON_MASK: u8 = 0x01;
    pub const OCP_ON_SHIFT: u8 = 4;

    pub const RXBWEXP_MASK: u8 = 0x07;
    pub const RXBWEXP_SHIFT: u8 = 0;

    pub const RSSIDONE_MASK: u8 = 0x01;
    pub const RSSIDONE_SHIFT: u8 = 1;
    pub const RSSISTART_MASK: u8 = 0x01;
    pub const RSSISTART_SHIFT: u8 = 0;

    pub const DIOMAPPING_MASK: u8 = 0x03;
    pub const DIO0_RX_PAYLOADREADY_TX_PACKETSENT: u8 = 0x00;

    pub const CLKOUT_MASK: u8 = 0x07;
    pub const CLKOUT_SHIFT: u8 = 0;
    pub const CLKOUT_OFF: u8 = 0x07;

    pub const MODEREADY_MASK: u8 = 0x01;
    pub const MODEREADY_SHIFT: u8 = 7;

    pub const FIFOOVERRUN_MASK: u8 = 0x01;
    pub const FIFOOVERRUN_SHIFT: u8 = 4;
    pub const PACKETSENT_MASK: u8 = 0x01;
    pub const PACKETSENT_SHIFT: u8 = 3;
    pub const PAYLOADREADY_MASK: u8 = 0x01;
    pub const PAYLOADREADY_SHIFT: u8 = 2;

    pub const SYNCON_MASK: u8 = 0x01;
    pub const SYNCON_SHIFT: u8 = 7;
    pub const SYNCSIZE_MASK: u8 = 0x07;
    pub const SYNCSIZE_SHIFT: u8 = 3;

    pub const PACKETFORMAT_MASK: u8 = 0x01;
    pub const PACKETFORMAT_SHIFT: u8 = 7;
    pub const CRCON_MASK: u8 = 0x01;
    pub const CRCON_SHIFT: u8 = 4;
    pub const CRCAUTOCLEAROFF_MASK: u8 = 0x01;
    pub const CRCAUTOCLEAROFF_SHIFT: u8 = 3;

    pub const TXSTARTCONDITION_MASK: u8 = 0x01;
    pub const TXSTARTCONDITION_SHIFT: u8 = 7;
    pub const FIFO_NOT_EMPTY: u8 = 1;

    pub const RXRESTART_MASK: u8 = 0x01;
    pub const RXRESTART_SHIFT: u8 = 2;

    pub const TEMP_MEAS_START_MASK: u8 = 0x01;
    pub const TEMP_MEAS_START_SHIFT: u8 = 3;
    pub const TEMP_MEAS_RUNNING_MASK: u8 = 0x01;
    pub const TEMP_MEAS_RUNNING_SHIFT: u8 = 2;

    pub const RCCALSTART_MASK: u8 = 0x01;
    pub const RCCALSTART_SHIFT: u8 = 7;
    pub const RCCALDONE_MASK: u8 = 0x01;
    pub const RCCALDONE_SHIFT: u8 = 6;

    pub const PA20DBM1_NORMAL: u8 = 0x55;
    pub const PA20DBM1_20DBM: u8 = 0x5d;
    pub const PA20DBM2_NORMAL: u8 = 0x70;
    pub const PA20DBM2_20DBM: u8 = 0x7c;

    /// Sentinel for [`super::super::Rfm69::opmode`] meaning "unknown, ask
    /// the hardware".
    pub const OPMODE_UNKNOWN: u8 = 0xFF;
}

/// Crystal and frequency-step constants used to quantize carrier
/// frequency, bitrate and deviation.
pub mod timing {
    pub const FXOSC_HZ: u64 = 32_000_000;
    pub const FSTEP_HZ_NUM: u64 = FXOSC_HZ;
    pub const FSTEP_HZ_DEN: u64 = 524_288;

    pub const MODE_READY_TIMEOUT_MS: u64 = 200;
    pub const SEND_TIMEOUT_MS: u64 = 200;

    pub const BUDGET_INITIAL_MS: u16 = 36_000;
    pub const BUDGET_RECOVER_PER_MS: u16 = 10;
    pub const BUDGET_MIN_TO_SEND_MS: u16 = 3_600;
    pub const BUDGET_SEND_OVERHEAD_MS: u16 = 1;
}
