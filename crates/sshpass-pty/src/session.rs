use std::thread::JoinHandle;
use std::time::Duration;

use portable_pty::{Child, ChildKiller};
use tokio::sync::{mpsc, oneshot};

use crate::credential::CredentialSource;
use crate::detector::{DetectorState, PromptDetector};
use crate::error::SessionError;
use crate::pty::{kill_if_running, PtyHandle};
use crate::relay::{
    start_input_writer, ChildInput, InputRelay, InputRelayHandle, OutputRelay, SessionEvent,
};
use crate::terminal::RealTerminal;

/// Prompt searched for when none is configured.
pub const DEFAULT_PROMPT: &str = "password:";

/// How long to wait for the companion signal once the session is ending:
/// remaining PTY output after the child exits, or the exit status after
/// the output closes.
const SETTLE_GRACE: Duration = Duration::from_millis(500);

/// Immutable parameters of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Literal, case-sensitive text that marks a password prompt.
    pub prompt_pattern: String,
    /// Program and arguments, executed directly without a shell.
    pub command: Vec<String>,
    pub verbose: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prompt_pattern: DEFAULT_PROMPT.to_string(),
            command: Vec::new(),
            verbose: false,
        }
    }
}

/// How a session that ran to completion ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Detector state when the output relay stopped, if it stopped in time.
    pub final_state: Option<DetectorState>,
    /// Exit code of the child, if it was observed.
    pub child_exit_code: Option<u32>,
}

impl SessionOutcome {
    /// Whether the credential was typed at some point.
    pub fn credential_sent(&self) -> bool {
        matches!(
            self.final_state,
            Some(DetectorState::Verify | DetectorState::Exec | DetectorState::End)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Terminating,
    Closed,
}

/// Supervisor for one child command attached to a PTY.
///
/// Allocates the PTY, starts the output relay, spawns the child, starts the
/// input relay and then waits for whichever comes first: the output relay
/// stopping or the child exiting. Once the PTY exists, every path out of
/// [`Session::run`] goes through the same teardown.
pub struct Session {
    config: SessionConfig,
    credential: CredentialSource,
    terminal: RealTerminal,
}

impl Session {
    pub fn new(config: SessionConfig, credential: CredentialSource, terminal: RealTerminal) -> Self {
        Self {
            config,
            credential,
            terminal,
        }
    }

    /// Run the session to completion.
    ///
    /// Returns `Err(SessionError::AuthenticationFailed)` when the prompt came
    /// back after the credential was typed.
    pub fn run(self) -> Result<SessionOutcome, SessionError> {
        let Session {
            config,
            credential,
            terminal,
        } = self;
        let mut lifecycle = Lifecycle::Created;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;

        let (cols, rows) = terminal.size();
        let mut pty = PtyHandle::open(cols, rows)?;
        log::debug!("PTY allocated ({cols}x{rows})");
        let reader = pty.take_reader()?;
        let writer = pty.take_writer()?;

        let (child_input, writer_thread) = start_input_writer(writer)?;
        // Declared after `pty` so it runs before the PTY is closed.
        let mut teardown = Teardown {
            child_input: child_input.clone(),
            writer_thread: Some(writer_thread),
            killer: None,
            input_relay: None,
        };

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (line_tx, line_rx) = if credential.reads_stdin() {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let (input, output, raw_mode) = terminal.into_parts();

        let output_thread = OutputRelay {
            reader,
            output,
            detector: PromptDetector::new(config.prompt_pattern.as_bytes()),
            credential,
            child_input: child_input.clone(),
            events: events_tx.clone(),
            stdin_line: line_rx,
            verbose: config.verbose,
        }
        .start()?;

        let mut child = pty.spawn(&config.command)?;
        teardown.killer = Some(child.clone_killer());
        log::debug!("child spawned, pid {:?}", child.process_id());

        let waiter_events = events_tx.clone();
        let waiter = std::thread::Builder::new()
            .name("pty-child-wait".to_string())
            .spawn(move || {
                let code = match child.wait() {
                    Ok(status) => Some(status.exit_code()),
                    Err(e) => {
                        log::debug!("waiting for child failed: {e}");
                        None
                    }
                };
                let _ = waiter_events.send(SessionEvent::ChildExited(code));
            })?;
        drop(events_tx);

        teardown.input_relay = Some(
            InputRelay {
                input,
                child_input,
                credential_line: line_tx,
            }
            .start(raw_mode)?,
        );

        advance(&mut lifecycle, Lifecycle::Running);
        let ending = runtime.block_on(wait_for_end(&mut events_rx));
        advance(&mut lifecycle, Lifecycle::Terminating);

        if ending.child_exited {
            teardown.killer = None;
        }
        teardown.release();
        drop(pty);

        let final_state = if ending.output_stopped {
            output_thread.join().ok()
        } else {
            None
        };
        if ending.child_exited {
            let _ = waiter.join();
        }
        advance(&mut lifecycle, Lifecycle::Closed);

        if let Some(code) = ending.child_exit_code {
            log::info!("child exited with code {code}");
        }
        if ending.auth_failed {
            return Err(SessionError::AuthenticationFailed);
        }
        Ok(SessionOutcome {
            final_state,
            child_exit_code: ending.child_exit_code,
        })
    }
}

/// Resources released when the session ends, whichever way it ends.
///
/// [`release`](Self::release) is idempotent and also runs on drop, so an
/// early `?` return still kills the child and stops the relay threads.
struct Teardown {
    child_input: ChildInput,
    writer_thread: Option<JoinHandle<()>>,
    /// `None` until the child is spawned, and again once it has exited.
    killer: Option<Box<dyn ChildKiller + Send + Sync>>,
    input_relay: Option<InputRelayHandle>,
}

impl Teardown {
    fn release(&mut self) {
        if let Some(mut killer) = self.killer.take() {
            kill_if_running(&mut killer);
        }
        self.child_input.close();
        if let Some(writer) = self.writer_thread.take() {
            let _ = writer.join();
        }
        if let Some(relay) = self.input_relay.take() {
            if !relay.is_finished() {
                log::debug!("input relay still blocked on the terminal, detaching it");
            }
            // Restores the terminal mode.
            drop(relay);
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.release();
    }
}

fn advance(lifecycle: &mut Lifecycle, next: Lifecycle) {
    log::debug!("session {lifecycle:?} -> {next:?}");
    *lifecycle = next;
}

/// What the supervisor learned while waiting.
#[derive(Debug, Default, PartialEq, Eq)]
struct Ending {
    output_stopped: bool,
    auth_failed: bool,
    child_exited: bool,
    child_exit_code: Option<u32>,
}

impl Ending {
    fn record(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::OutputClosed => self.output_stopped = true,
            SessionEvent::AuthenticationFailed => {
                self.output_stopped = true;
                self.auth_failed = true;
            }
            SessionEvent::ChildExited(code) => {
                self.child_exited = true;
                self.child_exit_code = code;
            }
        }
    }
}

/// Block until the first termination signal, then give the other side a
/// short grace period to settle.
///
/// After the child exits, the output relay may still be draining buffered
/// PTY output. After the output closes, the exit status usually follows
/// right behind. A rejected password skips the grace period: the child is
/// waiting for input and gets killed.
async fn wait_for_end(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Ending {
    let mut ending = Ending::default();
    let Some(first) = events.recv().await else {
        return ending;
    };
    ending.record(first);
    if ending.auth_failed {
        return ending;
    }

    if let Ok(Some(second)) = tokio::time::timeout(SETTLE_GRACE, events.recv()).await {
        ending.record(second);
    }
    ending
}
