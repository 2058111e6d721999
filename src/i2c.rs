/*!
  # Synchronous I2C master based on GPIO bitbang

  This implementation consumes the following hardware resources:
  - A periodic timer to mark line transitions
  - Two GPIO pins for SDA and SCL lines.

  Both lines are driven open-drain: `set_high()` releases a line and lets the
  pull-up raise it, `set_low()` pulls it to ground. A line is never driven high,
  so a slave may hold SCL low to stretch the clock. The master polls SCL after
  every rising edge it generates, at most [`Config::stretch_polls`] times, and
  then carries on regardless. A slave that never lets go therefore shows up as
  garbage data or a NACK rather than a hung bus.

  ## Hardware requirements

  1. Configure GPIO pins as Open-Drain outputs that can also be read back.
  2. Configure the timer frequency to twice the desired I2C clock frequency.

  ## Example

  ```ignore
    let tmr = Timer::tim3(pdev.TIM3, &clocks, &mut rcc.apb1).start_count_down(200.khz());
    let scl = gpioa.pa1.into_open_drain_output(&mut gpioa.crl);
    let sda = gpioa.pa2.into_open_drain_output(&mut gpioa.crl);

    let mut i2c = sht21_bitbang::i2c::I2cBB::new(scl, sda, tmr);

    i2c.start()?;
    let ack = i2c.send_byte(0x40 << 1)?;
    i2c.stop()?;
  ```
*/

use embedded_hal::blocking::i2c::{Read, Write, WriteRead};
use embedded_hal::digital::v2::{InputPin, OutputPin};
use embedded_hal::timer::{CountDown, Periodic};
use nb::block;

/// I2C error
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Eq, PartialEq)]
pub enum Error<E> {
    /// GPIO error
    Bus(E),
    /// No ack received
    NoAck,
    /// Invalid input
    InvalidData,
}

/// Acknowledge bit sampled after a byte was sent.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Ack {
    /// The slave pulled SDA low.
    Ack,
    /// SDA stayed high.
    Nack,
}

impl Ack {
    /// Returns `true` for [`Ack::Nack`].
    pub fn is_nack(self) -> bool {
        self == Ack::Nack
    }
}

/// Bus timing policy
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Config {
    /// How many times SCL is read back after being released before the
    /// master gives up waiting for a stretching slave.
    pub stretch_polls: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config { stretch_polls: 100 }
    }
}

/// Bit banging I2C device
pub struct I2cBB<SCL, SDA, CLK>
where
    SCL: OutputPin + InputPin,
    SDA: OutputPin + InputPin,
    CLK: CountDown + Periodic,
{
    scl: SCL,
    sda: SDA,
    clk: CLK,
    config: Config,
}

impl<SCL, SDA, CLK, E> I2cBB<SCL, SDA, CLK>
where
    SCL: OutputPin<Error = E> + InputPin<Error = E>,
    SDA: OutputPin<Error = E> + InputPin<Error = E>,
    CLK: CountDown + Periodic,
{
    /// Create instance
    pub fn new(scl: SCL, sda: SDA, clk: CLK) -> Self {
        Self::with_config(scl, sda, clk, Config::default())
    }

    /// Create instance with a custom timing policy
    pub fn with_config(scl: SCL, sda: SDA, clk: CLK, config: Config) -> Self {
        I2cBB {
            scl,
            sda,
            clk,
            config,
        }
    }

    /// Binds a new pair of lines to the bus and returns the previous ones.
    pub fn set_port(&mut self, scl: SCL, sda: SDA) -> (SCL, SDA) {
        let scl = core::mem::replace(&mut self.scl, scl);
        let sda = core::mem::replace(&mut self.sda, sda);
        (scl, sda)
    }

    /// Releases the pins and the timer.
    pub fn free(self) -> (SCL, SDA, CLK) {
        (self.scl, self.sda, self.clk)
    }

    /// Generates a START (or repeated START) condition.
    ///
    /// The lines are expected to be idle or SCL low on entry, which is the
    /// state every other operation leaves behind.
    pub fn start(&mut self) -> Result<(), Error<E>> {
        self.set_scl_high()?;
        self.set_sda_high()?;
        self.wait_for_clk();

        self.set_sda_low()?;
        self.wait_for_clk();

        self.set_scl_low()?;
        self.wait_for_clk();

        Ok(())
    }

    /// Generates a STOP condition, leaving both lines released.
    pub fn stop(&mut self) -> Result<(), Error<E>> {
        self.set_sda_low()?;
        self.wait_for_clk();

        self.set_scl_high()?;
        self.wait_for_clk();

        self.set_sda_high()?;
        self.wait_for_clk();

        Ok(())
    }

    /// Clocks out `byte` MSB first and samples the acknowledge bit.
    pub fn send_byte(&mut self, byte: u8) -> Result<Ack, Error<E>> {
        for bit_offset in 0..8 {
            let out_bit = (byte >> (7 - bit_offset)) & 0b1;

            if out_bit == 1 {
                self.set_sda_high()?;
            } else {
                self.set_sda_low()?;
            }
            self.wait_for_clk();

            self.clock_high()?;

            self.set_scl_low()?;
            self.wait_for_clk();
        }

        self.set_sda_high()?;
        self.wait_for_clk();

        self.clock_high()?;
        let nack = self.sda.is_high().map_err(Error::Bus)?;

        self.set_scl_low()?;
        self.wait_for_clk();

        if nack {
            trace!("i2c: NACK after {=u8:#x}", byte);
            Ok(Ack::Nack)
        } else {
            Ok(Ack::Ack)
        }
    }

    /// Clocks in one byte MSB first, then acknowledges it if `send_ack` is
    /// set or leaves SDA high (NACK) to end the read.
    pub fn read_byte(&mut self, send_ack: bool) -> Result<u8, Error<E>> {
        let mut byte: u8 = 0;

        self.set_sda_high()?;

        for bit_offset in 0..8 {
            self.wait_for_clk();
            self.clock_high()?;

            if self.sda.is_high().map_err(Error::Bus)? {
                byte |= 1 << (7 - bit_offset);
            }

            self.set_scl_low()?;
            self.wait_for_clk();
        }

        if send_ack {
            self.set_sda_low()?;
        } else {
            self.set_sda_high()?;
        }
        self.wait_for_clk();

        self.clock_high()?;

        self.set_scl_low()?;
        self.wait_for_clk();
        self.set_sda_high()?;

        Ok(byte)
    }

    /// Drives SCL low (`false`) or releases it (`true`).
    pub fn set_scl_state(&mut self, high: bool) -> Result<(), Error<E>> {
        if high {
            self.set_scl_high()
        } else {
            self.set_scl_low()
        }
    }

    /// Reads the current level of SCL.
    pub fn scl_is_high(&self) -> Result<bool, Error<E>> {
        self.scl.is_high().map_err(Error::Bus)
    }

    #[inline]
    fn read_from_slave(&mut self, input: &mut [u8]) -> Result<(), crate::i2c::Error<E>> {
        let last = input.len() - 1;
        for (i, byte) in input.iter_mut().enumerate() {
            *byte = self.read_byte(i != last)?;
        }
        Ok(())
    }

    #[inline]
    fn write_to_slave(&mut self, output: &[u8]) -> Result<(), crate::i2c::Error<E>> {
        for byte in output {
            self.check_ack(*byte)?;
        }
        Ok(())
    }

    /// Releases SCL and waits for it to actually go high.
    #[inline]
    fn clock_high(&mut self) -> Result<(), crate::i2c::Error<E>> {
        self.set_scl_high()?;
        self.wait_for_clk();
        self.wait_for_scl_release()?;
        self.wait_for_clk();
        Ok(())
    }

    fn wait_for_scl_release(&mut self) -> Result<bool, crate::i2c::Error<E>> {
        for _ in 0..self.config.stretch_polls {
            if self.scl.is_high().map_err(Error::Bus)? {
                return Ok(true);
            }
        }
        warn!(
            "i2c: SCL still low after {=u32} polls",
            self.config.stretch_polls
        );
        Ok(false)
    }

    #[inline]
    fn set_scl_high(&mut self) -> Result<(), crate::i2c::Error<E>> {
        self.scl.set_high().map_err(Error::Bus)
    }

    #[inline]
    fn set_scl_low(&mut self) -> Result<(), crate::i2c::Error<E>> {
        self.scl.set_low().map_err(Error::Bus)
    }

    #[inline]
    fn set_sda_high(&mut self) -> Result<(), crate::i2c::Error<E>> {
        self.sda.set_high().map_err(Error::Bus)
    }

    #[inline]
    fn set_sda_low(&mut self) -> Result<(), crate::i2c::Error<E>> {
        self.sda.set_low().map_err(Error::Bus)
    }

    #[inline]
    fn wait_for_clk(&mut self) {
        block!(self.clk.wait()).ok();
    }

    /// Sends `byte`, turning a NACK into [`Error::NoAck`] after releasing the bus.
    #[inline]
    fn check_ack(&mut self, byte: u8) -> Result<(), crate::i2c::Error<E>> {
        if self.send_byte(byte)?.is_nack() {
            self.stop()?;
            Err(Error::NoAck)
        } else {
            Ok(())
        }
    }
}

impl<SCL, SDA, CLK, E> Write for I2cBB<SCL, SDA, CLK>
where
    SCL: OutputPin<Error = E> + InputPin<Error = E>,
    SDA: OutputPin<Error = E> + InputPin<Error = E>,
    CLK: CountDown + Periodic,
{
    type Error = crate::i2c::Error<E>;

    fn write(&mut self, addr: u8, output: &[u8]) -> Result<(), Self::Error> {
        if output.is_empty() {
            return Ok(());
        }

        // ST
        self.start()?;

        // SAD + W
        self.check_ack(addr << 1)?;

        self.write_to_slave(output)?;

        // SP
        self.stop()
    }
}

impl<SCL, SDA, CLK, E> Read for I2cBB<SCL, SDA, CLK>
where
    SCL: OutputPin<Error = E> + InputPin<Error = E>,
    SDA: OutputPin<Error = E> + InputPin<Error = E>,
    CLK: CountDown + Periodic,
{
    type Error = crate::i2c::Error<E>;

    fn read(&mut self, addr: u8, input: &mut [u8]) -> Result<(), Self::Error> {
        if input.is_empty() {
            return Ok(());
        }

        // ST
        self.start()?;

        // SAD + R
        self.check_ack((addr << 1) | 0x1)?;

        self.read_from_slave(input)?;

        // SP
        self.stop()
    }
}

impl<SCL, SDA, CLK, E> WriteRead for I2cBB<SCL, SDA, CLK>
where
    SCL: OutputPin<Error = E> + InputPin<Error = E>,
    SDA: OutputPin<Error = E> + InputPin<Error = E>,
    CLK: CountDown + Periodic,
{
    type Error = crate::i2c::Error<E>;

    fn write_read(&mut self, addr: u8, output: &[u8], input: &mut [u8]) -> Result<(), Self::Error> {
        if output.is_empty() || input.is_empty() {
            return Err(Error::InvalidData);
        }

        // ST
        self.start()?;

        // SAD + W
        self.check_ack(addr << 1)?;

        self.write_to_slave(output)?;

        // SR
        self.start()?;

        // SAD + R
        self.check_ack((addr << 1) | 0x1)?;

        self.read_from_slave(input)?;

        // SP
        self.stop()
    }
}
