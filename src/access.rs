//! Process level access to the GPIO hardware.
//!
//! Some platforms need a global handle before any pin can be touched, a
//! memory mapped peripheral block or a character device for example. The
//! sensor session acquires it once in [`Sht21::init`](crate::Sht21::init) and
//! gives it back in [`Sht21::cleanup`](crate::Sht21::cleanup).

use core::convert::Infallible;

/// Acquire/release pair for the GPIO hardware behind the bus pins.
pub trait HardwareAccess {
    type Error;

    fn acquire(&mut self) -> Result<(), Self::Error>;

    fn release(&mut self) -> Result<(), Self::Error>;
}

/// For pins that are usable as soon as they exist.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAccess;

impl HardwareAccess for NoAccess {
    type Error = Infallible;

    fn acquire(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn release(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
