/// Errors that end a session unsuccessfully.
#[derive(Debug)]
pub enum SessionError {
    /// The PTY or its channel ends could not be set up. Nothing was spawned.
    Provision(String),
    /// The child command could not be started.
    Spawn(String),
    /// The child asked for the password again right after it was typed.
    AuthenticationFailed,
    IoError(std::io::Error),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Provision(msg) => write!(f, "PTY setup failed: {msg}"),
            SessionError::Spawn(msg) => write!(f, "failed to start command: {msg}"),
            SessionError::AuthenticationFailed => write!(f, "password is incorrect"),
            SessionError::IoError(err) => write!(f, "session I/O error: {err}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::IoError(err)
    }
}
