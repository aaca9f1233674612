use std::ffi::OsString;
use std::io::{Read, Write};

use portable_pty::{
    native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize, SlavePty,
};

use crate::error::SessionError;

/// Owns a portable-pty master/slave pair until the child is attached.
///
/// The slave end is dropped right after spawning so that the master sees
/// end-of-file once the child (and anything it forked) closes the terminal.
pub struct PtyHandle {
    master: Box<dyn MasterPty + Send>,
    slave: Option<Box<dyn SlavePty + Send>>,
}

impl PtyHandle {
    /// Allocate a PTY with the given dimensions.
    pub fn open(cols: u16, rows: u16) -> Result<Self, SessionError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Provision(format!("failed to open PTY: {e}")))?;

        Ok(Self {
            master: pair.master,
            slave: Some(pair.slave),
        })
    }

    /// Reader for everything the child writes to its terminal.
    pub fn take_reader(&self) -> Result<Box<dyn Read + Send>, SessionError> {
        self.master
            .try_clone_reader()
            .map_err(|e| SessionError::Provision(format!("failed to clone reader: {e}")))
    }

    /// Writer feeding the child's terminal input. Can only be taken once.
    pub fn take_writer(&self) -> Result<Box<dyn Write + Send>, SessionError> {
        self.master
            .take_writer()
            .map_err(|e| SessionError::Provision(format!("failed to take writer: {e}")))
    }

    /// Spawn `argv` attached to the PTY. `argv[0]` is looked up on `PATH`;
    /// no shell is involved.
    pub fn spawn(&mut self, argv: &[String]) -> Result<Box<dyn Child + Send + Sync>, SessionError> {
        let Some(program) = argv.first() else {
            return Err(SessionError::Spawn("no command given".to_string()));
        };
        let slave = self
            .slave
            .take()
            .ok_or_else(|| SessionError::Spawn("PTY already has a child attached".to_string()))?;

        let mut cmd = CommandBuilder::from_argv(argv.iter().map(OsString::from).collect());
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let child = slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::Spawn(format!("{program}: {e}")))?;

        // `slave` is dropped here; only the child holds the terminal open now.
        Ok(child)
    }
}

/// Kill the child unless it already exited.
pub(crate) fn kill_if_running(killer: &mut Box<dyn ChildKiller + Send + Sync>) {
    match killer.kill() {
        Ok(()) => log::debug!("child process killed"),
        // Already reaped, nothing left to kill.
        Err(e) => log::debug!("kill skipped: {e}"),
    }
}
