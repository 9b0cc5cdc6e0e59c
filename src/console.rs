/// Console output for validator diagnostics
/// The embedding kernel installs a sink (usually its serial port writer);
/// until then console output is discarded.
use core::fmt;
use spin::Mutex;

/// Global console instance
pub static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

/// Console structure
pub struct Console {
    sink: Option<fn(&str)>,
}

impl Console {
    /// Create a console with no sink attached
    pub const fn new() -> Self {
        Self { sink: None }
    }

    /// Attach the sink that receives console output
    pub fn attach(&mut self, sink: fn(&str)) {
        self.sink = Some(sink);
    }

    /// Detach the current sink
    pub fn detach(&mut self) {
        self.sink = None;
    }

    /// Write a string to the sink
    pub fn write_string(&mut self, s: &str) {
        if let Some(sink) = self.sink {
            sink(s);
        }
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_string(s);
        Ok(())
    }
}

/// Route console output to `sink`
pub fn set_console(sink: fn(&str)) {
    CONSOLE.lock().attach(sink);
}

/// Print to the console
#[macro_export]
macro_rules! console_print {
    ($($arg:tt)*) => {
        $crate::console::_print(format_args!($($arg)*))
    };
}

/// Print to the console with newline
#[macro_export]
macro_rules! console_println {
    () => ($crate::console_print!("\n"));
    ($($arg:tt)*) => ($crate::console_print!("{}\n", format_args!($($arg)*)));
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;
    // A sink cannot fail; formatting errors are dropped like serial output.
    let _ = CONSOLE.lock().write_fmt(args);
}
