//! COM1 serial port driver.
//!
//! Hand-rolled against the 16550 UART register layout rather than pulling
//! in a driver crate: the init sequence (disable interrupts, set the divisor
//! latch, 8N1, FIFO, a loopback self-test before committing to normal
//! operation) is exactly specified, and a failed loopback test must degrade
//! rather than panic -- there would be nowhere to report the panic to.

use core::fmt;

use lazy_static::lazy_static;
use spin::Mutex;
use x86_64::instructions::interrupts;
use x86_64::instructions::port::Port;

const COM1: u16 = 0x3F8;

struct SerialPort {
    data: Port<u8>,
    int_en: Port<u8>,
    fifo_ctrl: Port<u8>,
    line_ctrl: Port<u8>,
    modem_ctrl: Port<u8>,
    line_status: Port<u8>,
}

impl SerialPort {
    const fn new(base: u16) -> Self {
        Self {
            data: Port::new(base),
            int_en: Port::new(base + 1),
            fifo_ctrl: Port::new(base + 2),
            line_ctrl: Port::new(base + 3),
            modem_ctrl: Port::new(base + 4),
            line_status: Port::new(base + 5),
        }
    }

    /// Runs the init sequence; returns whether the loopback self-test
    /// passed. On failure the port is left in loopback mode rather than
    /// being driven into an unknown state.
    ///
    /// # Safety
    /// Must be called at most once per `SerialPort`, and only on COM1's
    /// I/O ports, which are reserved for this use for the kernel's lifetime.
    unsafe fn init(&mut self) -> bool {
        // SAFETY: these are the documented 16550 initialization writes;
        // `self` owns exclusive access to this port's I/O range.
        unsafe {
            self.int_en.write(0x00); // disable all interrupts
            self.line_ctrl.write(0x80); // enable DLAB
            self.data.write(0x03); // divisor low byte: 3 (38400 baud)
            self.int_en.write(0x00); // divisor high byte
            self.line_ctrl.write(0x03); // 8 bits, no parity, one stop bit
            self.fifo_ctrl.write(0xC7); // enable FIFO, clear, 14-byte threshold
            self.modem_ctrl.write(0x1E); // RTS/DSR set, loopback mode for test

            self.data.write(0xAE);
            let echoed = self.data.read();
            if echoed != 0xAE {
                return false;
            }

            self.modem_ctrl.write(0x0F); // leave loopback, enable normal operation
            true
        }
    }

    fn line_status(&mut self) -> u8 {
        // SAFETY: reading the line status register has no side effects
        // beyond clearing latched status bits the kernel does not use.
        unsafe { self.line_status.read() }
    }

    fn write_byte(&mut self, byte: u8) {
        while self.line_status() & 0x20 == 0 {
            core::hint::spin_loop();
        }
        // SAFETY: the transmit-holding-register-empty bit was observed set
        // above, so the UART is ready to accept the next byte.
        unsafe { self.data.write(byte) };
    }

    fn read_byte(&mut self) -> u8 {
        while self.line_status() & 0x01 == 0 {
            core::hint::spin_loop();
        }
        // SAFETY: the data-ready bit was observed set above.
        unsafe { self.data.read() }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            match byte {
                b'\n' => {
                    self.write_byte(b'\r');
                    self.write_byte(b'\n');
                }
                byte => self.write_byte(byte),
            }
        }
        Ok(())
    }
}

lazy_static! {
    static ref SERIAL1: Mutex<SerialPort> = {
        let mut port = SerialPort::new(COM1);
        // SAFETY: called exactly once, here, at first access of this lazy
        // static; COM1 is this kernel's dedicated diagnostic port.
        unsafe {
            port.init();
        }
        Mutex::new(port)
    };
}

/// Busy-waits for and returns one byte from COM1. The only blocking
/// operation in this kernel.
pub fn read_byte() -> u8 {
    interrupts::without_interrupts(|| SERIAL1.lock().read_byte())
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    interrupts::without_interrupts(|| {
        let _ = SERIAL1.lock().write_fmt(args);
    });
}
