//! The real terminal the user sits at: keystrokes in, child output out.

use std::io::{self, Read, Write};

/// Size used for the PTY when the real terminal cannot be queried.
pub const DEFAULT_COLS: u16 = 120;
pub const DEFAULT_ROWS: u16 = 25;

/// Input, output and geometry of the user's terminal.
///
/// `RealTerminal::stdio()` is the normal case. Tests build one from in-memory
/// streams.
pub struct RealTerminal {
    input: Box<dyn Read + Send>,
    output: Box<dyn Write + Send>,
    size: Option<(u16, u16)>,
    raw_mode: bool,
}

impl RealTerminal {
    /// The process's own stdin/stdout, with raw mode on the input side.
    pub fn stdio() -> Self {
        Self {
            input: Box::new(io::stdin()),
            output: Box::new(io::stdout()),
            size: query_size(),
            raw_mode: true,
        }
    }

    /// Arbitrary streams. Raw mode is never touched.
    pub fn new(input: Box<dyn Read + Send>, output: Box<dyn Write + Send>) -> Self {
        Self {
            input,
            output,
            size: None,
            raw_mode: false,
        }
    }

    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.size = Some((cols, rows));
        self
    }

    /// Columns and rows for the PTY, falling back to 120x25.
    pub fn size(&self) -> (u16, u16) {
        self.size.unwrap_or((DEFAULT_COLS, DEFAULT_ROWS))
    }

    /// Split into the input stream, the output stream and the raw mode flag.
    pub(crate) fn into_parts(self) -> (Box<dyn Read + Send>, Box<dyn Write + Send>, bool) {
        (self.input, self.output, self.raw_mode)
    }
}

/// Query the window size of stdout.
#[cfg(unix)]
pub fn query_size() -> Option<(u16, u16)> {
    use nix::libc;
    use nix::pty::Winsize;

    let mut ws = Winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    let result = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut ws) };

    if result == 0 && ws.ws_col > 0 && ws.ws_row > 0 {
        Some((ws.ws_col, ws.ws_row))
    } else {
        None
    }
}

#[cfg(not(unix))]
pub fn query_size() -> Option<(u16, u16)> {
    None
}

/// RAII guard for raw terminal mode on stdin.
///
/// Line buffering and local echo are turned off while the guard lives. The
/// original settings come back when it is dropped.
pub struct RawModeGuard {
    #[cfg(unix)]
    original: nix::sys::termios::Termios,
}

impl RawModeGuard {
    #[cfg(unix)]
    pub fn new() -> io::Result<Self> {
        use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices};

        let original = termios::tcgetattr(io::stdin()).map_err(io::Error::from)?;

        let mut raw = original.clone();
        raw.local_flags.remove(LocalFlags::ICANON);
        raw.local_flags.remove(LocalFlags::ECHO);
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

        termios::tcsetattr(io::stdin(), SetArg::TCSANOW, &raw).map_err(io::Error::from)?;

        Ok(Self { original })
    }

    #[cfg(not(unix))]
    pub fn new() -> io::Result<Self> {
        Ok(Self {})
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use nix::sys::termios::{self, SetArg};
            let _ = termios::tcsetattr(io::stdin(), SetArg::TCSANOW, &self.original);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_size_fallback() {
        let term = RealTerminal::new(Box::new(io::empty()), Box::new(io::sink()));
        assert_eq!(term.size(), (DEFAULT_COLS, DEFAULT_ROWS));
        let (_, _, raw_mode) = term.into_parts();
        assert!(!raw_mode);
    }

    #[test]
    fn test_explicit_size() {
        let term = RealTerminal::new(Box::new(io::empty()), Box::new(io::sink())).with_size(80, 24);
        assert_eq!(term.size(), (80, 24));
    }
}
