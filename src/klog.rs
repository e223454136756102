//! Kernel Log Output
//!
//! `kprint!` and `kprintln!` are the kernel's only diagnostic output path.
//! On bare metal the sink is the COM1 UART (115200 8N1); on the host the
//! sink is an in-memory buffer so tests can run anywhere and inspect what
//! the diagnostics printed.

use core::fmt;
use spin::Mutex;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod sink {
    //! COM1 UART sink.

    use core::fmt;
    use x86_64::instructions::port::Port;

    /// COM1 base port
    const COM1: u16 = 0x3F8;

    pub struct Sink {
        data: Port<u8>,
        line_status: Port<u8>,
    }

    impl Sink {
        pub const fn new() -> Self {
            Self {
                data: Port::new(COM1),
                line_status: Port::new(COM1 + 5),
            }
        }

        /// Program the UART: 115200 baud, 8N1, FIFOs enabled.
        pub unsafe fn init(&mut self) {
            Port::<u8>::new(COM1 + 1).write(0x00u8); // interrupts off
            Port::<u8>::new(COM1 + 3).write(0x80u8); // DLAB on
            Port::<u8>::new(COM1).write(0x01u8); // divisor LSB: 115200 baud
            Port::<u8>::new(COM1 + 1).write(0x00u8); // divisor MSB
            Port::<u8>::new(COM1 + 3).write(0x03u8); // 8 bits, no parity, 1 stop
            Port::<u8>::new(COM1 + 2).write(0xC7u8); // FIFO on, clear, 14-byte threshold
            Port::<u8>::new(COM1 + 4).write(0x0Bu8); // DTR, RTS, OUT2
        }

        fn write_byte(&mut self, byte: u8) {
            unsafe {
                // Wait for the transmit buffer to drain
                while self.line_status.read() & 0x20 == 0 {}
                self.data.write(byte);
            }
        }
    }

    impl fmt::Write for Sink {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for byte in s.bytes() {
                self.write_byte(byte);
            }
            Ok(())
        }
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
mod sink {
    //! Host sink: log lines accumulate in memory.

    use alloc::string::String;
    use core::fmt;

    pub struct Sink {
        captured: String,
    }

    impl Sink {
        pub const fn new() -> Self {
            Self {
                captured: String::new(),
            }
        }

        pub fn snapshot(&self) -> String {
            self.captured.clone()
        }
    }

    impl fmt::Write for Sink {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.captured.push_str(s);
            Ok(())
        }
    }
}

lazy_static::lazy_static! {
    static ref KLOG: Mutex<sink::Sink> = Mutex::new(sink::Sink::new());
}

/// Bring the log sink up.
///
/// On bare metal this programs the UART and must run before the first
/// `kprintln!`; on the host it is a no-op.
pub fn init() {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    unsafe {
        KLOG.lock().init();
    }
}

/// Internal print function for the macros
#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;
    let _ = KLOG.lock().write_fmt(args);
}

/// Everything logged so far (host builds only).
#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
pub fn captured_output() -> alloc::string::String {
    KLOG.lock().snapshot()
}

#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {
        $crate::klog::_print(format_args!($($arg)*))
    };
}

/// Macro for kernel log output with newline (like println!)
#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($($arg:tt)*) => ($crate::kprint!("{}\n", format_args!($($arg)*)));
}
