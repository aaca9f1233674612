//! Credential sources and the injector that types a password into the child.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::PathBuf;

/// Where the password is read from when the prompt appears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// First line of the process's standard input.
    Stdin,
    /// First line of a file.
    File(PathBuf),
    /// First line readable from an already open descriptor.
    FileDescriptor(i32),
    /// A value given directly, typed verbatim.
    Literal(String),
}

impl CredentialSource {
    /// Whether reading this source competes with keystroke forwarding.
    pub fn reads_stdin(&self) -> bool {
        match self {
            CredentialSource::Stdin => true,
            CredentialSource::FileDescriptor(fd) => *fd == 0,
            _ => false,
        }
    }

    /// Write the credential followed by a single `\n` into `sink`.
    ///
    /// Handle-backed sources stop at the first CR or LF. A file that cannot
    /// be opened contributes no bytes; the line terminator is still written.
    pub fn inject<W: Write + ?Sized>(&self, sink: &mut W) -> io::Result<()> {
        let stdin = io::stdin();
        let mut handle = stdin.lock();
        self.inject_from(&mut handle, sink)
    }

    /// Same as [`inject`](Self::inject), with stdin-backed sources read from
    /// `stdin` instead of the process's standard input.
    pub fn inject_from<R, W>(&self, stdin: &mut R, sink: &mut W) -> io::Result<()>
    where
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        match self {
            CredentialSource::Stdin | CredentialSource::FileDescriptor(0) => {
                forward_first_line(stdin, sink)?;
            }
            CredentialSource::FileDescriptor(fd) => {
                let mut reader = DescriptorReader(*fd);
                forward_first_line(&mut reader, sink)?;
            }
            CredentialSource::File(path) => match File::open(path) {
                Ok(file) => {
                    let mut reader = BufReader::new(file);
                    forward_first_line(&mut reader, sink)?;
                }
                Err(e) => {
                    log::warn!("cannot open password file {}: {e}", path.display());
                }
            },
            CredentialSource::Literal(value) => {
                sink.write_all(value.as_bytes())?;
            }
        }
        sink.write_all(b"\n")?;
        sink.flush()
    }
}

/// Read the first line of `src`, without its CR/LF terminator.
pub(crate) fn read_first_line<R: Read + ?Sized>(src: &mut R) -> Vec<u8> {
    let mut line = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = forward_first_line(src, &mut line);
    line
}

/// Copy bytes from `src` to `sink` until CR, LF, end of input or a read error.
///
/// Reads one byte at a time so nothing past the line is consumed from a
/// shared handle such as stdin.
fn forward_first_line<R: Read + ?Sized, W: Write + ?Sized>(
    src: &mut R,
    sink: &mut W,
) -> io::Result<usize> {
    let mut byte = [0u8; 1];
    let mut written = 0;
    loop {
        match src.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                if byte[0] == b'\r' || byte[0] == b'\n' {
                    break;
                }
                sink.write_all(&byte)?;
                written += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::debug!("credential source read failed: {e}");
                break;
            }
        }
    }
    Ok(written)
}

/// Borrowed descriptor; it is never closed here.
struct DescriptorReader(i32);

#[cfg(unix)]
impl Read for DescriptorReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        nix::unistd::read(self.0, buf).map_err(io::Error::from)
    }
}

#[cfg(not(unix))]
impl Read for DescriptorReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("reading descriptor {} is not supported on this platform", self.0),
        ))
    }
}
