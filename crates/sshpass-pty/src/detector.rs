//! Prompt detection state machine.
//!
//! Matching is chunk-local: a prompt split across two reads from the PTY is
//! not seen. An empty pattern matches every chunk.

/// Where the session stands with respect to the password exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for the first prompt.
    Init,
    /// Password typed; the next chunk tells whether it was accepted.
    Verify,
    /// Authenticated (or never asked). Everything is passed through.
    Exec,
    /// Password rejected. Nothing more is processed.
    End,
}

/// What the output relay should do with one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: DetectorState,
    /// Copy the chunk to the real terminal.
    pub forward: bool,
    /// Type the credential into the child now.
    pub inject: bool,
    /// The prompt came back after injection.
    pub rejected: bool,
}

impl Transition {
    fn to(next: DetectorState) -> Self {
        Self {
            next,
            forward: false,
            inject: false,
            rejected: false,
        }
    }

    fn forwarding(mut self) -> Self {
        self.forward = true;
        self
    }
}

/// Classifies output chunks against a literal prompt pattern.
#[derive(Debug, Clone)]
pub struct PromptDetector {
    pattern: Vec<u8>,
}

impl PromptDetector {
    pub fn new(pattern: impl Into<Vec<u8>>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    /// Case-sensitive substring search of the prompt in `chunk`.
    pub fn is_prompt(&self, chunk: &[u8]) -> bool {
        if self.pattern.is_empty() {
            return true;
        }
        chunk
            .windows(self.pattern.len())
            .any(|window| window == self.pattern.as_slice())
    }

    /// Compute the next state for `chunk` without side effects.
    ///
    /// Chunks without the prompt are forwarded while waiting for it; the chunk
    /// carrying the prompt is swallowed.
    pub fn transition(&self, state: DetectorState, chunk: &[u8]) -> Transition {
        match state {
            DetectorState::Init => {
                if self.is_prompt(chunk) {
                    Transition {
                        inject: true,
                        ..Transition::to(DetectorState::Verify)
                    }
                } else {
                    Transition::to(DetectorState::Init).forwarding()
                }
            }
            DetectorState::Verify => {
                if self.is_prompt(chunk) {
                    Transition {
                        rejected: true,
                        ..Transition::to(DetectorState::End)
                    }
                } else {
                    Transition::to(DetectorState::Exec).forwarding()
                }
            }
            DetectorState::Exec => Transition::to(DetectorState::Exec).forwarding(),
            DetectorState::End => Transition::to(DetectorState::End),
        }
    }
}
