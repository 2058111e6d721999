//! Simulated open-drain wire pair with an edge driven I2C slave, for tests.
//!
//! Both lines are wired-AND: a line reads high only if neither the master nor
//! the slave pulls it low. The slave reacts synchronously to every edge the
//! master produces and may hold SCL low for a number of SCL reads to model
//! clock stretching.

use core::cell::{Ref, RefCell};
use core::convert::Infallible;
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::{InputPin, OutputPin};
use embedded_hal::timer::{CountDown, Periodic};

use crate::crc::crc8;

/// A slave device seen at byte level.
pub trait Device {
    fn address(&self) -> u8;

    /// A byte written after the address. Returns whether to acknowledge it.
    fn write(&mut self, byte: u8) -> bool;

    /// The device was addressed for reading. Returns how many SCL reads to
    /// stretch the clock for before the first byte, `None` for ever.
    fn begin_read(&mut self) -> Option<u32> {
        Some(0)
    }

    fn read(&mut self) -> u8;
}

/// Hands back every byte written to it, in order.
#[derive(Debug, Default)]
pub struct Echo {
    address: u8,
    received: Vec<u8>,
    pending: VecDeque<u8>,
}

impl Echo {
    pub fn new(address: u8) -> Self {
        Echo {
            address,
            ..Echo::default()
        }
    }

    pub fn received(&self) -> &[u8] {
        &self.received
    }
}

impl Device for Echo {
    fn address(&self) -> u8 {
        self.address
    }

    fn write(&mut self, byte: u8) -> bool {
        self.received.push(byte);
        self.pending.push_back(byte);
        true
    }

    fn read(&mut self) -> u8 {
        self.pending.pop_front().unwrap_or(0xFF)
    }
}

/// SHT21 behaviour with knobs for fault injection.
#[derive(Debug)]
pub struct Sht21Model {
    pub address: u8,
    pub user_register: u8,
    pub register_crc_fault: bool,
    pub temperature: u16,
    pub humidity: u16,
    pub temperature_crc_fault: bool,
    pub humidity_crc_fault: bool,
    pub temperature_hold: Option<u32>,
    pub humidity_hold: Option<u32>,
    pub resets: usize,
    pub commands: Vec<u8>,
    pub register_writes: Vec<u8>,
    pub transfer: Transfer,
}

/// Bookkeeping between a command and the read that follows it.
#[derive(Debug, Default)]
pub struct Transfer {
    command: Option<u8>,
    register_write_pending: bool,
    out: VecDeque<u8>,
}

impl Default for Sht21Model {
    fn default() -> Self {
        Sht21Model {
            address: 0x40,
            user_register: 0x02,
            register_crc_fault: false,
            temperature: 0x6352,
            humidity: 0x7C80,
            temperature_crc_fault: false,
            humidity_crc_fault: false,
            temperature_hold: Some(0),
            humidity_hold: Some(0),
            resets: 0,
            commands: Vec::new(),
            register_writes: Vec::new(),
            transfer: Transfer::default(),
        }
    }
}

fn with_crc(data: &[u8], fault: bool) -> VecDeque<u8> {
    let mut out: VecDeque<u8> = data.iter().copied().collect();
    out.push_back(crc8(data) ^ if fault { 0x5A } else { 0 });
    out
}

impl Device for Sht21Model {
    fn address(&self) -> u8 {
        self.address
    }

    fn write(&mut self, byte: u8) -> bool {
        if self.transfer.register_write_pending {
            self.transfer.register_write_pending = false;
            self.register_writes.push(byte);
            self.user_register = byte;
            return true;
        }

        self.commands.push(byte);
        match byte {
            0xFE => self.resets += 1,
            0xE6 => self.transfer.register_write_pending = true,
            0xE3 | 0xE5 | 0xE7 => self.transfer.command = Some(byte),
            _ => return false,
        }
        true
    }

    fn begin_read(&mut self) -> Option<u32> {
        match self.transfer.command.take() {
            Some(0xE7) => {
                self.transfer.out = with_crc(&[self.user_register], self.register_crc_fault);
                Some(0)
            }
            Some(0xE3) => {
                self.transfer.out = with_crc(&self.temperature.to_be_bytes(), self.temperature_crc_fault);
                self.temperature_hold
            }
            Some(0xE5) => {
                self.transfer.out = with_crc(&self.humidity.to_be_bytes(), self.humidity_crc_fault);
                self.humidity_hold
            }
            _ => {
                self.transfer.out.clear();
                Some(0)
            }
        }
    }

    fn read(&mut self) -> u8 {
        self.transfer.out.pop_front().unwrap_or(0xFF)
    }
}

#[derive(Clone, Copy, Debug)]
enum Phase {
    Idle,
    /// Shifting in an address (`address`) or data byte.
    Receive { byte: u8, bits: u8, address: bool },
    /// Holding SDA low for the acknowledge clock.
    AckOut { read: bool },
    /// Waiting for a conversion with SCL held low.
    Converting,
    /// Bit `bit` (0 = MSB) of `byte` is on SDA.
    Transmit { byte: u8, bit: u8 },
    /// Acknowledge clock of a byte sent to the master.
    MasterAck { ack: bool },
}

#[derive(Clone, Copy, Debug)]
enum Stretch {
    Reads(u32),
    Forever,
}

struct State<D> {
    master_scl_low: bool,
    master_sda_low: bool,
    slave_scl_low: bool,
    slave_sda_low: bool,
    stretch: Stretch,
    stretch_bits: u32,
    scl_reads: usize,
    phase: Phase,
    device: D,
}

impl<D: Device> State<D> {
    fn scl(&self) -> bool {
        !(self.master_scl_low || self.slave_scl_low)
    }

    fn sda(&self) -> bool {
        !(self.master_sda_low || self.slave_sda_low)
    }

    /// Applies `change` and lets the slave react to whatever edge it caused.
    fn drive(&mut self, change: impl FnOnce(&mut Self)) {
        let (scl, sda) = (self.scl(), self.sda());
        change(self);

        if scl != self.scl() {
            if self.scl() {
                self.on_rise();
            } else {
                self.on_fall();
            }
        } else if sda != self.sda() && self.scl() {
            if self.sda() {
                // STOP
                self.phase = Phase::Idle;
                self.slave_sda_low = false;
            } else {
                // START
                self.phase = Phase::Receive {
                    byte: 0,
                    bits: 0,
                    address: true,
                };
                self.slave_sda_low = false;
            }
        }
    }

    fn read_scl(&mut self) -> bool {
        self.scl_reads += 1;
        if self.slave_scl_low {
            match self.stretch {
                Stretch::Forever => {}
                Stretch::Reads(0) => self.drive(|s| {
                    if let Phase::Converting = s.phase {
                        s.transmit_next();
                    }
                    s.slave_scl_low = false;
                }),
                Stretch::Reads(n) => self.stretch = Stretch::Reads(n - 1),
            }
        }
        self.scl()
    }

    fn hold_scl(&mut self, stretch: Option<u32>) {
        match stretch {
            Some(0) => {}
            Some(n) => {
                self.stretch = Stretch::Reads(n);
                self.slave_scl_low = true;
            }
            None => {
                self.stretch = Stretch::Forever;
                self.slave_scl_low = true;
            }
        }
    }

    fn transmit_next(&mut self) {
        let byte = self.device.read();
        self.slave_sda_low = byte & 0x80 == 0;
        self.phase = Phase::Transmit { byte, bit: 0 };
    }

    fn on_rise(&mut self) {
        match self.phase {
            Phase::Receive {
                byte,
                bits,
                address,
            } => {
                self.phase = Phase::Receive {
                    byte: (byte << 1) | self.sda() as u8,
                    bits: bits + 1,
                    address,
                };
            }
            Phase::MasterAck { .. } => {
                self.phase = Phase::MasterAck { ack: !self.sda() };
            }
            _ => {}
        }
    }

    fn on_fall(&mut self) {
        match self.phase {
            Phase::Receive {
                byte,
                bits: 8,
                address: true,
            } => {
                if byte >> 1 == self.device.address() {
                    self.slave_sda_low = true;
                    self.phase = Phase::AckOut {
                        read: byte & 1 == 1,
                    };
                    self.hold_scl(Some(self.stretch_bits));
                } else {
                    self.phase = Phase::Idle;
                }
            }
            Phase::Receive {
                byte,
                bits: 8,
                address: false,
            } => {
                if self.device.write(byte) {
                    self.slave_sda_low = true;
                    self.phase = Phase::AckOut { read: false };
                    self.hold_scl(Some(self.stretch_bits));
                } else {
                    self.phase = Phase::Idle;
                }
            }
            Phase::Receive { .. } => self.hold_scl(Some(self.stretch_bits)),
            Phase::AckOut { read: false } => {
                self.slave_sda_low = false;
                self.phase = Phase::Receive {
                    byte: 0,
                    bits: 0,
                    address: false,
                };
            }
            Phase::AckOut { read: true } => {
                self.slave_sda_low = false;
                let hold = self.device.begin_read();
                if hold == Some(0) {
                    self.transmit_next();
                } else {
                    self.phase = Phase::Converting;
                    self.hold_scl(hold);
                }
            }
            Phase::Transmit { bit: 7, .. } => {
                self.slave_sda_low = false;
                self.phase = Phase::MasterAck { ack: false };
                self.hold_scl(Some(self.stretch_bits));
            }
            Phase::Transmit { byte, bit } => {
                let bit = bit + 1;
                self.slave_sda_low = byte & (0x80 >> bit) == 0;
                self.phase = Phase::Transmit { byte, bit };
                self.hold_scl(Some(self.stretch_bits));
            }
            Phase::MasterAck { ack: true } => self.transmit_next(),
            Phase::MasterAck { ack: false } => {
                self.slave_sda_low = false;
                self.phase = Phase::Idle;
            }
            Phase::Idle | Phase::Converting => {}
        }
    }
}

/// Shared pair of lines with one slave attached.
pub struct Wire<D> {
    state: Rc<RefCell<State<D>>>,
}

impl<D: Device> Wire<D> {
    pub fn new(device: D) -> Self {
        Wire {
            state: Rc::new(RefCell::new(State {
                master_scl_low: false,
                master_sda_low: false,
                slave_scl_low: false,
                slave_sda_low: false,
                stretch: Stretch::Reads(0),
                stretch_bits: 0,
                scl_reads: 0,
                phase: Phase::Idle,
                device,
            })),
        }
    }

    pub fn scl(&self) -> Line<D> {
        Line {
            state: self.state.clone(),
            clock: true,
        }
    }

    pub fn sda(&self) -> Line<D> {
        Line {
            state: self.state.clone(),
            clock: false,
        }
    }

    pub fn scl_level(&self) -> bool {
        self.state.borrow().scl()
    }

    pub fn sda_level(&self) -> bool {
        self.state.borrow().sda()
    }

    /// Number of times the master read SCL.
    pub fn scl_reads(&self) -> usize {
        self.state.borrow().scl_reads
    }

    /// Stretch the clock for `reads` SCL reads after every data bit.
    pub fn stretch_bits(&self, reads: u32) {
        self.state.borrow_mut().stretch_bits = reads;
    }

    /// Pull SCL low and never let go.
    pub fn hold_scl_forever(&self) {
        self.state.borrow_mut().hold_scl(None);
    }

    pub fn device(&self) -> Ref<'_, D> {
        Ref::map(self.state.borrow(), |s| &s.device)
    }
}

/// One end of the wire, as seen by the master.
pub struct Line<D> {
    state: Rc<RefCell<State<D>>>,
    clock: bool,
}

impl<D: Device> OutputPin for Line<D> {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        let clock = self.clock;
        self.state.borrow_mut().drive(|s| {
            if clock {
                s.master_scl_low = true;
            } else {
                s.master_sda_low = true;
            }
        });
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        let clock = self.clock;
        self.state.borrow_mut().drive(|s| {
            if clock {
                s.master_scl_low = false;
            } else {
                s.master_sda_low = false;
            }
        });
        Ok(())
    }
}

impl<D: Device> InputPin for Line<D> {
    type Error = Infallible;

    fn is_high(&self) -> Result<bool, Self::Error> {
        let mut state = self.state.borrow_mut();
        if self.clock {
            Ok(state.read_scl())
        } else {
            Ok(state.sda())
        }
    }

    fn is_low(&self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

/// Timer that never waits.
pub struct NoopClock;

impl CountDown for NoopClock {
    type Time = ();

    fn start<T>(&mut self, _count: T)
    where
        T: Into<Self::Time>,
    {
    }

    fn wait(&mut self) -> nb::Result<(), void::Void> {
        Ok(())
    }
}

impl Periodic for NoopClock {}

/// Delay that only records what it was asked for.
#[derive(Clone, Default)]
pub struct Delays {
    log: Rc<RefCell<Vec<u32>>>,
}

impl Delays {
    pub fn log(&self) -> Vec<u32> {
        self.log.borrow().clone()
    }
}

impl DelayMs<u32> for Delays {
    fn delay_ms(&mut self, ms: u32) {
        self.log.borrow_mut().push(ms);
    }
}
