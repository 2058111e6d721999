//! Driver for the Sensirion SHT21 temperature and humidity sensor on a
//! [bit banged] I2C bus, built on the [`embedded-hal`] traits.
//!
//! [bit banged]: https://en.wikipedia.org/wiki/Bit_banging
//! [`embedded-hal`]: https://github.com/rust-embedded/embedded-hal
//!
//! The crate has two layers:
//!
//! - [`i2c`]: an I2C master on two open-drain GPIO lines with clock
//!   stretching support. It also implements the `embedded-hal` blocking I2C
//!   traits, so other drivers can use it too.
//! - [`sht21`]: the sensor protocol. [`Sht21::read`] resets the sensor,
//!   checks its user register and runs a temperature and a humidity
//!   conversion, reporting faults as [`ErrorFlags`].
//!
//! ## Usage
//!
//! ```ignore
//! let i2c = sht21_bitbang::i2c::I2cBB::new(scl, sda, timer);
//! let mut sensor = sht21_bitbang::Sht21::new(sht21_bitbang::NoAccess, i2c, delay);
//!
//! sensor.init()?;
//! let m = sensor.read()?;
//! if let Some(t) = m.temperature {
//!     // tenths of a degree
//! }
//! sensor.cleanup()?;
//! ```
//!
//! ## Optional features
//!
//! - `defmt`: implements `defmt::Format` for the public types and logs
//!   protocol faults through `defmt`.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod access;
pub mod crc;
pub mod flags;
#[deny(missing_docs)]
pub mod i2c;
#[deny(missing_docs)]
pub mod sht21;

#[cfg(test)]
mod sim;

pub use access::{HardwareAccess, NoAccess};
pub use flags::ErrorFlags;
pub use sht21::{Measurement, Sht21};
