//! SHT21 protocol on top of [`I2cBB`].
//!
//! A [`Sht21::read`] call runs the full sequence the sensor expects:
//! soft reset, a read/verify/rewrite of the user register, then a
//! temperature and a humidity conversion in hold master mode. Faults never
//! abort the sequence. They are collected into [`ErrorFlags`] and each
//! quantity is reported only if its own transaction came through intact.

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::{InputPin, OutputPin};
use embedded_hal::timer::{CountDown, Periodic};

use crate::access::HardwareAccess;
use crate::crc::crc8;
use crate::flags::ErrorFlags;
use crate::i2c::{Error, I2cBB};

/// 7-bit bus address.
pub const ADDRESS: u8 = 0x40;

const WRITE: u8 = ADDRESS << 1;
const READ: u8 = (ADDRESS << 1) | 1;

/// Sensor commands
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
enum Command {
    TemperatureHold = 0xE3,
    HumidityHold = 0xE5,
    WriteUserRegister = 0xE6,
    ReadUserRegister = 0xE7,
    SoftReset = 0xFE,
}

/// Timing policy of the sensor protocol.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Config {
    /// Time the sensor needs after a soft reset, 15 ms per datasheet.
    pub reset_settle_ms: u32,
    /// Upper bound of SCL checks while a hold master conversion runs.
    pub hold_polls: u32,
    /// Pause between two of those checks.
    pub hold_poll_interval_ms: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            reset_settle_ms: 15,
            hold_polls: 100,
            hold_poll_interval_ms: 1,
        }
    }
}

/// Result of one [`Sht21::read`].
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Measurement {
    /// Everything that went wrong along the way.
    pub errors: ErrorFlags,
    /// Temperature in tenths of a degree Celsius.
    pub temperature: Option<i16>,
    /// Relative humidity in tenths of a percent.
    pub humidity: Option<u16>,
}

impl Measurement {
    /// `true` if no fault was recorded at all.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Temperature in degrees Celsius.
    pub fn temperature_celsius(&self) -> Option<f32> {
        self.temperature.map(|t| f32::from(t) / 10.0)
    }

    /// Relative humidity in percent.
    pub fn relative_humidity(&self) -> Option<f32> {
        self.humidity.map(|h| f32::from(h) / 10.0)
    }
}

#[derive(Clone, Copy)]
enum Quantity {
    Temperature,
    Humidity,
}

impl Quantity {
    fn command(self) -> Command {
        match self {
            Quantity::Temperature => Command::TemperatureHold,
            Quantity::Humidity => Command::HumidityHold,
        }
    }

    fn timeout(self) -> ErrorFlags {
        match self {
            Quantity::Temperature => ErrorFlags::TEMPERATURE_TIMEOUT,
            Quantity::Humidity => ErrorFlags::HUMIDITY_TIMEOUT,
        }
    }

    fn crc_mismatch(self) -> ErrorFlags {
        match self {
            Quantity::Temperature => ErrorFlags::TEMPERATURE_CRC,
            Quantity::Humidity => ErrorFlags::HUMIDITY_CRC,
        }
    }
}

/// Converts a raw temperature word to tenths of a degree Celsius.
///
/// T = -46.85 + 175.72 * S / 2^16, scaled by ten and rearranged so that only
/// integer arithmetic is needed: T = ((S * 512 / 9548) - 937) / 2.
pub fn convert_temperature(raw: u16) -> i16 {
    let scaled = (u32::from(raw & 0xFFFC) * 512 / 9548) as i32;
    ((scaled - 937) / 2) as i16
}

/// Converts a raw humidity word to tenths of a percent.
///
/// RH = -6 + 125 * S / 2^16, scaled by ten. Readings just above zero raw
/// come out slightly negative.
pub fn convert_humidity(raw: u16) -> i16 {
    let scaled = f64::from(u32::from(raw & 0xFFFC) * 256) / 134_217.73;
    (10.0 * (scaled - 6.0)) as i16
}

/// SHT21 session
///
/// Owns the bus, a delay provider and the hardware access handle. Nothing is
/// shared between sessions, so independent instances do not interfere.
pub struct Sht21<A, SCL, SDA, CLK, D>
where
    SCL: OutputPin + InputPin,
    SDA: OutputPin + InputPin,
    CLK: CountDown + Periodic,
{
    access: A,
    bus: I2cBB<SCL, SDA, CLK>,
    delay: D,
    config: Config,
    initialised: bool,
}

impl<A, SCL, SDA, CLK, D, E> Sht21<A, SCL, SDA, CLK, D>
where
    A: HardwareAccess,
    SCL: OutputPin<Error = E> + InputPin<Error = E>,
    SDA: OutputPin<Error = E> + InputPin<Error = E>,
    CLK: CountDown + Periodic,
    D: DelayMs<u32>,
{
    /// Creates a session with the default timing.
    pub fn new(access: A, bus: I2cBB<SCL, SDA, CLK>, delay: D) -> Self {
        Self::with_config(access, bus, delay, Config::default())
    }

    /// Creates a session with custom timing.
    pub fn with_config(access: A, bus: I2cBB<SCL, SDA, CLK>, delay: D, config: Config) -> Self {
        Sht21 {
            access,
            bus,
            delay,
            config,
            initialised: false,
        }
    }

    /// Acquires the hardware access handle.
    ///
    /// Calling this again while initialised does nothing. On failure the
    /// session stays uninitialised.
    pub fn init(&mut self) -> Result<(), A::Error> {
        if !self.initialised {
            self.access.acquire()?;
            self.initialised = true;
            debug!("sht21: hardware acquired");
        }
        Ok(())
    }

    /// Gives the hardware access handle back.
    ///
    /// A no-op when not initialised. If the release fails the session stays
    /// initialised so the call can be retried.
    pub fn cleanup(&mut self) -> Result<(), A::Error> {
        if self.initialised {
            if let Err(e) = self.access.release() {
                warn!("sht21: hardware release failed");
                return Err(e);
            }
            self.initialised = false;
            debug!("sht21: hardware released");
        }
        Ok(())
    }

    /// `true` between a successful [`init`](Self::init) and a successful
    /// [`cleanup`](Self::cleanup).
    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    /// Moves the bus to another pair of lines, returning the old ones.
    /// Allowed at any time, initialised or not.
    pub fn set_port(&mut self, scl: SCL, sda: SDA) -> (SCL, SDA) {
        self.bus.set_port(scl, sda)
    }

    /// Destroys the session without releasing the hardware.
    pub fn destroy(self) -> (A, I2cBB<SCL, SDA, CLK>, D) {
        (self.access, self.bus, self.delay)
    }

    /// Runs a complete reset, register check and measurement cycle.
    ///
    /// Only GPIO failures end the cycle early. Everything else is reported
    /// in [`Measurement::errors`].
    pub fn read(&mut self) -> Result<Measurement, Error<E>> {
        let mut errors = ErrorFlags::empty();

        errors |= self.soft_reset()?;
        errors |= self.check_user_register()?;

        let (flags, temperature) = self.measure(Quantity::Temperature)?;
        errors |= flags;
        let (flags, humidity) = self.measure(Quantity::Humidity)?;
        errors |= flags;

        let measurement = Measurement {
            errors,
            temperature: temperature.map(convert_temperature),
            humidity: humidity.map(|raw| convert_humidity(raw).max(0) as u16),
        };
        debug!("sht21: {}", measurement);
        Ok(measurement)
    }

    fn soft_reset(&mut self) -> Result<ErrorFlags, Error<E>> {
        self.bus.start()?;
        let errors = self.send(&[WRITE, Command::SoftReset as u8])?;
        self.bus.stop()?;

        self.delay.delay_ms(self.config.reset_settle_ms);
        Ok(errors)
    }

    /// Reads the user register and writes the same value back if it
    /// checks out.
    fn check_user_register(&mut self) -> Result<ErrorFlags, Error<E>> {
        self.bus.start()?;
        let mut errors = self.send(&[WRITE, Command::ReadUserRegister as u8])?;
        self.bus.start()?;
        errors |= self.send(&[READ])?;
        let value = self.bus.read_byte(true)?;
        let crc = self.bus.read_byte(false)?;
        self.bus.stop()?;

        if value == 0 {
            warn!("sht21: user register is empty");
            errors |= ErrorFlags::REGISTER_EMPTY;
        } else if crc == crc8(&[value]) {
            self.bus.start()?;
            errors |= self.send(&[WRITE, Command::WriteUserRegister as u8, value])?;
            self.bus.stop()?;
        } else {
            warn!("sht21: user register crc mismatch");
            errors |= ErrorFlags::REGISTER_CRC;
        }

        Ok(errors)
    }

    /// Runs one hold master conversion and returns the masked raw word if
    /// every byte was acknowledged and the checksum matched.
    fn measure(&mut self, quantity: Quantity) -> Result<(ErrorFlags, Option<u16>), Error<E>> {
        self.bus.start()?;
        let mut errors = self.send(&[WRITE, quantity.command() as u8])?;
        self.bus.start()?;
        errors |= self.send(&[READ])?;
        let acked = errors.is_empty();

        if !self.wait_for_conversion()? {
            warn!("sht21: conversion timed out");
            errors |= quantity.timeout();
        }

        let data = [self.bus.read_byte(true)?, self.bus.read_byte(true)?];
        let crc = self.bus.read_byte(false)?;
        self.bus.stop()?;

        if crc != crc8(&data) {
            warn!("sht21: measurement crc mismatch");
            errors |= quantity.crc_mismatch();
            return Ok((errors, None));
        }

        let raw = u16::from_be_bytes(data) & 0xFFFC;
        trace!("sht21: raw {=u16:#x}", raw);
        Ok((errors, if acked { Some(raw) } else { None }))
    }

    /// Releases SCL and waits for the sensor to stop stretching it, which
    /// it does once the conversion is complete.
    fn wait_for_conversion(&mut self) -> Result<bool, Error<E>> {
        self.bus.set_scl_state(true)?;
        for _ in 0..self.config.hold_polls {
            if self.bus.scl_is_high()? {
                return Ok(true);
            }
            self.delay.delay_ms(self.config.hold_poll_interval_ms);
        }
        Ok(false)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<ErrorFlags, Error<E>> {
        let mut errors = ErrorFlags::empty();
        for &byte in bytes {
            if self.bus.send_byte(byte)?.is_nack() {
                errors |= ErrorFlags::NACK;
            }
        }
        Ok(errors)
    }
}
