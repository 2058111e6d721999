//! CRC-8 used by the SHT2x family to protect register and measurement bytes.

/// Generator polynomial x^8 + x^5 + x^4 + 1.
const POLYNOMIAL: u16 = 0x131;

/// Computes the checksum of `data`, bit by bit, starting from 0.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u16 = 0;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ POLYNOMIAL;
            } else {
                crc <<= 1;
            }
        }
    }

    crc as u8
}
