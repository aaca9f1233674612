//! Relay threads moving bytes between the real terminal and the PTY.
//!
//! Every relay gets its own dedicated OS thread because PTY and terminal reads
//! are blocking. The child's input has exactly one writer thread; keystrokes
//! and the credential reach it as whole messages through a queue, so a
//! password line is never interleaved with typed bytes.

use std::io::{Read, Write};
use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};

use crate::credential::{read_first_line, CredentialSource};
use crate::detector::{DetectorState, PromptDetector};
use crate::terminal::RawModeGuard;

/// Size of the reusable buffer for PTY output reads.
pub const CHUNK_SIZE: usize = 1024;

/// Signals sent to the session supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The output relay hit end-of-file or a read/write failure.
    OutputClosed,
    /// The prompt came back right after the credential was typed.
    AuthenticationFailed,
    /// The child process terminated with the given exit code.
    ChildExited(Option<u32>),
}

enum InputMessage {
    Bytes(Vec<u8>),
    Close,
}

/// Cloneable handle to the thread that owns the child's input.
#[derive(Clone)]
pub struct ChildInput {
    tx: mpsc::UnboundedSender<InputMessage>,
}

impl ChildInput {
    /// Queue `bytes` to be written as one unit. Returns `false` once the
    /// writer has stopped.
    pub fn send(&self, bytes: Vec<u8>) -> bool {
        self.tx.send(InputMessage::Bytes(bytes)).is_ok()
    }

    /// Ask the writer thread to release the PTY writer and stop.
    pub fn close(&self) {
        let _ = self.tx.send(InputMessage::Close);
    }
}

/// Start the single writer for the child's input on a dedicated OS thread.
pub fn start_input_writer(
    writer: Box<dyn Write + Send>,
) -> std::io::Result<(ChildInput, JoinHandle<()>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = std::thread::Builder::new()
        .name("pty-input-writer".to_string())
        .spawn(move || writer_loop(writer, rx))?;
    Ok((ChildInput { tx }, handle))
}

fn writer_loop(mut writer: Box<dyn Write + Send>, mut rx: mpsc::UnboundedReceiver<InputMessage>) {
    while let Some(message) = rx.blocking_recv() {
        match message {
            InputMessage::Bytes(bytes) => {
                if let Err(e) = writer.write_all(&bytes).and_then(|_| writer.flush()) {
                    log::debug!("PTY write failed: {e}");
                    return;
                }
            }
            InputMessage::Close => return,
        }
    }
}

/// Reads child output, drives the prompt detector and forwards to the terminal.
pub struct OutputRelay {
    pub reader: Box<dyn Read + Send>,
    pub output: Box<dyn Write + Send>,
    pub detector: PromptDetector,
    pub credential: CredentialSource,
    pub child_input: ChildInput,
    pub events: mpsc::UnboundedSender<SessionEvent>,
    /// First line of terminal input, for credentials read from stdin.
    pub stdin_line: Option<oneshot::Receiver<Vec<u8>>>,
    pub verbose: bool,
}

impl OutputRelay {
    pub fn start(self) -> std::io::Result<JoinHandle<DetectorState>> {
        std::thread::Builder::new()
            .name("pty-output".to_string())
            .spawn(move || self.run())
    }

    /// Run the relay loop to completion and report how it ended.
    pub fn run(mut self) -> DetectorState {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut state = DetectorState::Init;
        let level = if self.verbose {
            log::Level::Info
        } else {
            log::Level::Debug
        };

        loop {
            let n = match self.reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n.min(buf.len()),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                // EIO once the child side of the PTY is gone.
                Err(e) => {
                    log::debug!("PTY read ended: {e}");
                    break;
                }
            };
            let chunk = &buf[..n];

            let t = self.detector.transition(state, chunk);
            if t.inject {
                log::log!(level, "password prompt detected, sending credential");
                self.inject();
            }
            if t.forward {
                if let Err(e) = self.output.write_all(chunk).and_then(|_| self.output.flush()) {
                    log::debug!("terminal write failed: {e}");
                    break;
                }
            }
            if t.next != state {
                log::log!(level, "detector {state:?} -> {:?}", t.next);
            }
            state = t.next;

            if t.rejected {
                log::error!("password rejected: prompt repeated after injection");
                let _ = self.events.send(SessionEvent::AuthenticationFailed);
                return state;
            }
        }

        let _ = self.events.send(SessionEvent::OutputClosed);
        state
    }

    fn inject(&mut self) {
        let mut line = Vec::new();
        let result = match self.stdin_line.take() {
            // Blocks until the user has finished typing the line.
            Some(rx) => {
                let typed = rx.blocking_recv().unwrap_or_default();
                self.credential.inject_from(&mut typed.as_slice(), &mut line)
            }
            None => self.credential.inject(&mut line),
        };
        if let Err(e) = result {
            log::warn!("reading credential failed: {e}");
        }
        if !self.child_input.send(line) {
            log::warn!("child input closed before the credential was sent");
        }
    }
}

/// Forwards keystrokes from the real terminal to the child, byte by byte.
///
/// This is the only reader of the terminal. When the credential comes from
/// stdin, the first line typed is handed to the output relay instead of the
/// child; everything after it is forwarded.
pub struct InputRelay {
    pub input: Box<dyn Read + Send>,
    pub child_input: ChildInput,
    pub credential_line: Option<oneshot::Sender<Vec<u8>>>,
}

/// Keeps the real terminal in raw mode while the input relay is in use.
///
/// The relay thread may stay blocked in a read for the rest of the process,
/// so the mode is tied to this handle instead of to the thread. Dropping it
/// restores the terminal.
pub struct InputRelayHandle {
    _raw_mode: Option<RawModeGuard>,
    thread: JoinHandle<()>,
}

impl InputRelayHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

impl InputRelay {
    pub fn start(self, raw_mode: bool) -> std::io::Result<InputRelayHandle> {
        let guard = if raw_mode {
            match RawModeGuard::new() {
                Ok(guard) => Some(guard),
                Err(e) => {
                    log::debug!("raw mode unavailable, input stays cooked: {e}");
                    None
                }
            }
        } else {
            None
        };

        let thread = std::thread::Builder::new()
            .name("pty-input".to_string())
            .spawn(move || self.run())?;

        Ok(InputRelayHandle {
            _raw_mode: guard,
            thread,
        })
    }

    pub fn run(mut self) {
        if let Some(tx) = self.credential_line.take() {
            let line = read_first_line(&mut self.input);
            // The output relay may be gone already; the line is dropped then.
            let _ = tx.send(line);
        }

        let mut byte = [0u8; 1];
        loop {
            match self.input.read(&mut byte) {
                Ok(0) => return,
                Ok(_) => {
                    if !self.child_input.send(byte.to_vec()) {
                        return;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::debug!("terminal read failed: {e}");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    /// Reader that hands out one predefined chunk per call.
    struct Chunks(Vec<Vec<u8>>);

    impl Read for Chunks {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.0.is_empty() {
                return Ok(0);
            }
            let chunk = self.0.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    fn chunks(parts: &[&str]) -> Box<dyn Read + Send> {
        Box::new(Chunks(parts.iter().map(|p| p.as_bytes().to_vec()).collect()))
    }

    struct Harness {
        terminal: SharedBuf,
        child_in: SharedBuf,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        writer: JoinHandle<()>,
        input: ChildInput,
    }

    fn run_output(parts: &[&str], credential: CredentialSource) -> (DetectorState, Harness) {
        let terminal = SharedBuf::default();
        let child_in = SharedBuf::default();
        let (input, writer) = start_input_writer(Box::new(child_in.clone())).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        let relay = OutputRelay {
            reader: chunks(parts),
            output: Box::new(terminal.clone()),
            detector: PromptDetector::new("Password:"),
            credential,
            child_input: input.clone(),
            events: tx,
            stdin_line: None,
            verbose: false,
        };
        let state = relay.run();
        (
            state,
            Harness {
                terminal,
                child_in,
                events: rx,
                writer,
                input,
            },
        )
    }

    impl Harness {
        fn finish(self) -> (Vec<u8>, Vec<u8>, Vec<SessionEvent>) {
            let Harness {
                terminal,
                child_in,
                mut events,
                writer,
                input,
            } = self;
            input.close();
            writer.join().unwrap();
            let mut seen = Vec::new();
            while let Ok(ev) = events.try_recv() {
                seen.push(ev);
            }
            (terminal.contents(), child_in.contents(), seen)
        }
    }

    #[test]
    fn test_correct_password_flow() {
        let (state, h) = run_output(
            &["Password:", "\r\nwelcome\n", "$ "],
            CredentialSource::Literal("hunter2".into()),
        );
        assert_eq!(state, DetectorState::Exec);
        let (terminal, child_in, events) = h.finish();
        assert_eq!(terminal, b"\r\nwelcome\n$ ");
        assert_eq!(child_in, b"hunter2\n");
        assert_eq!(events, vec![SessionEvent::OutputClosed]);
    }

    #[test]
    fn test_repeated_prompt_stops_relay() {
        let (state, h) = run_output(
            &["Password:", "Password:", "should not appear"],
            CredentialSource::Literal("wrong".into()),
        );
        assert_eq!(state, DetectorState::End);
        let (terminal, child_in, events) = h.finish();
        assert!(terminal.is_empty());
        assert_eq!(child_in, b"wrong\n");
        assert_eq!(events, vec![SessionEvent::AuthenticationFailed]);
    }

    #[test]
    fn test_no_prompt_forwards_everything() {
        let (state, h) = run_output(&["hello\n"], CredentialSource::Literal("unused".into()));
        assert_eq!(state, DetectorState::Init);
        let (terminal, child_in, _) = h.finish();
        assert_eq!(terminal, b"hello\n");
        assert!(child_in.is_empty());
    }

    #[test]
    fn test_stdin_credential_comes_from_input_relay() {
        let child_in = SharedBuf::default();
        let (input, writer) = start_input_writer(Box::new(child_in.clone())).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (line_tx, line_rx) = oneshot::channel();

        InputRelay {
            input: Box::new(Cursor::new(b"hunter2\n".to_vec())),
            child_input: input.clone(),
            credential_line: Some(line_tx),
        }
        .run();

        let relay = OutputRelay {
            reader: chunks(&["Password:", "\r\nok\n"]),
            output: Box::new(std::io::sink()),
            detector: PromptDetector::new("Password:"),
            credential: CredentialSource::Stdin,
            child_input: input.clone(),
            events: tx,
            stdin_line: Some(line_rx),
            verbose: true,
        };
        assert_eq!(relay.run(), DetectorState::Exec);

        input.close();
        writer.join().unwrap();
        assert_eq!(child_in.contents(), b"hunter2\n");
    }

    #[test]
    fn test_input_relay_forwards_bytes() {
        let child_in = SharedBuf::default();
        let (input, writer) = start_input_writer(Box::new(child_in.clone())).unwrap();

        InputRelay {
            input: Box::new(Cursor::new(b"ls -l\r".to_vec())),
            child_input: input.clone(),
            credential_line: None,
        }
        .run();

        input.close();
        writer.join().unwrap();
        assert_eq!(child_in.contents(), b"ls -l\r");
    }

    #[test]
    fn test_input_relay_forwards_after_credential_line() {
        let child_in = SharedBuf::default();
        let (input, writer) = start_input_writer(Box::new(child_in.clone())).unwrap();
        let (line_tx, line_rx) = oneshot::channel();

        InputRelay {
            input: Box::new(Cursor::new(b"pw\rls\r".to_vec())),
            child_input: input.clone(),
            credential_line: Some(line_tx),
        }
        .run();

        input.close();
        writer.join().unwrap();
        assert_eq!(line_rx.blocking_recv().unwrap(), b"pw");
        assert_eq!(child_in.contents(), b"ls\r");
    }

    #[test]
    fn test_send_after_close_fails() {
        let (input, writer) = start_input_writer(Box::new(std::io::sink())).unwrap();
        input.close();
        writer.join().unwrap();
        assert!(!input.send(b"x".to_vec()));
    }
}
