//! The error type shared by every hardware-facing operation in this crate.

/// Result codes that flow across the PCA301/RFM69 boundary.
///
/// These mirror the three outcomes the protocol engine and the radio driver
/// agree on: a send either completes, is refused because the duty-cycle
/// budget is exhausted, or times out waiting for the radio to finish.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioOutcome {
    /// The operation completed.
    #[default]
    Ok,
    /// The duty-cycle budget does not allow this send.
    NoBudget,
    /// The radio did not signal completion within its timeout window.
    Timeout,
}

/// A collection of error types to describe hardware malfunctions, generic
/// over the SPI and GPIO error types of the HAL implementation in use.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GatewayError<SPI, DO> {
    /// A SPI transaction failed.
    Spi(SPI),
    /// A GPIO operation (chip-select, reset) failed.
    Gpio(DO),
    /// The radio did not reach the requested mode or finish a transaction
    /// within its timeout window.
    RadioTimeout,
}

impl<SPI, DO> GatewayError<SPI, DO> {
    /// True if this error represents a radio-level timeout rather than a
    /// bus-level malfunction.
    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::RadioTimeout)
    }
}
