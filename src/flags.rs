use core::fmt;
use core::ops::{BitOr, BitOrAssign};

/// Faults collected while running a measurement.
///
/// Every step of a transaction ORs its own bit in and the transaction keeps
/// going, so a single value can describe several independent problems. The
/// numeric layout is stable.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct ErrorFlags(u8);

impl ErrorFlags {
    /// An address or data byte was not acknowledged.
    pub const NACK: Self = ErrorFlags(0x01);
    /// The user register read back as zero.
    pub const REGISTER_EMPTY: Self = ErrorFlags(0x02);
    /// The user register checksum did not match.
    pub const REGISTER_CRC: Self = ErrorFlags(0x04);
    /// The sensor kept SCL low past the temperature conversion bound.
    pub const TEMPERATURE_TIMEOUT: Self = ErrorFlags(0x08);
    /// The temperature checksum did not match.
    pub const TEMPERATURE_CRC: Self = ErrorFlags(0x10);
    /// The sensor kept SCL low past the humidity conversion bound.
    pub const HUMIDITY_TIMEOUT: Self = ErrorFlags(0x20);
    /// The humidity checksum did not match.
    pub const HUMIDITY_CRC: Self = ErrorFlags(0x40);

    const ALL: u8 = 0x7F;

    const NAMES: [(Self, &'static str); 7] = [
        (Self::NACK, "nack"),
        (Self::REGISTER_EMPTY, "register empty"),
        (Self::REGISTER_CRC, "register crc"),
        (Self::TEMPERATURE_TIMEOUT, "temperature timeout"),
        (Self::TEMPERATURE_CRC, "temperature crc"),
        (Self::HUMIDITY_TIMEOUT, "humidity timeout"),
        (Self::HUMIDITY_CRC, "humidity crc"),
    ];

    pub const fn empty() -> Self {
        ErrorFlags(0)
    }

    /// Drops any bit that has no meaning.
    pub const fn from_bits_truncate(bits: u8) -> Self {
        ErrorFlags(bits & Self::ALL)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// `true` if every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// `true` if any bit of `other` is set.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl BitOr for ErrorFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        ErrorFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ErrorFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.insert(rhs);
    }
}

impl fmt::Display for ErrorFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("ok");
        }

        let mut first = true;
        for (flag, name) in Self::NAMES.iter() {
            if self.contains(*flag) {
                if !first {
                    f.write_str(", ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}
