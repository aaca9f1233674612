//! sshpass-pty: pseudo-terminal session engine for non-interactive password entry.
//!
//! The child command runs attached to a PTY. Its output is scanned for a
//! password prompt; when the prompt shows up the credential is typed in once,
//! and from then on the session is a plain pass-through between the real
//! terminal and the child.
//!
//! # Architecture
//!
//! - [`PromptDetector`] — Pure state machine deciding when to inject and when
//!   the credential was rejected.
//! - [`CredentialSource`] — Where the password comes from, and how it is typed.
//! - [`PtyHandle`] — Low-level PTY allocation and child spawning.
//! - [`relay`] — The output and input relay threads plus the single writer
//!   that owns the child's input.
//! - [`Session`] — Supervisor that wires everything together and tears it down.

pub mod credential;
pub mod detector;
pub mod error;
pub mod pty;
pub mod relay;
pub mod session;
pub mod terminal;

pub use credential::CredentialSource;
pub use detector::{DetectorState, PromptDetector, Transition};
pub use error::SessionError;
pub use pty::PtyHandle;
pub use session::{Session, SessionConfig, SessionOutcome, DEFAULT_PROMPT};
pub use terminal::RealTerminal;
