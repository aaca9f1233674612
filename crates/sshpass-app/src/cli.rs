use std::path::PathBuf;

use clap::Parser;
use sshpass_pty::{CredentialSource, SessionConfig, DEFAULT_PROMPT};

/// Environment variable read by `-e`.
pub const PASSWORD_ENV: &str = "SSHPASS";

/// CLI arguments for sshpass.
///
/// With no password option the password is taken from stdin.
#[derive(Parser, Debug)]
#[command(name = "sshpass")]
#[command(about = "Non-interactive password entry for programs that read it from a terminal")]
#[command(override_usage = "sshpass [options] command arguments")]
#[command(version)]
pub struct Cli {
    /// Take password to use from file
    #[arg(short = 'f', value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Use number as file descriptor for getting password
    #[arg(short = 'd', value_name = "FD")]
    pub fd: Option<i32>,

    /// Provide password as argument (security unwise)
    #[arg(short = 'p', value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Password is passed as env-var "SSHPASS"
    #[arg(short = 'e')]
    pub env: bool,

    /// Which string should sshpass search for to detect a password prompt
    #[arg(short = 'P', value_name = "PROMPT", default_value = DEFAULT_PROMPT)]
    pub prompt: String,

    /// Be verbose about what you're doing
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Command to run, followed by its arguments
    #[arg(
        value_name = "COMMAND",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,
}

impl Cli {
    /// Pick the password source. File wins over descriptor, descriptor over
    /// literal, literal over environment; stdin is the fallback.
    pub fn credential_source(&self) -> Result<CredentialSource, String> {
        self.credential_source_with(|name| std::env::var(name).ok())
    }

    fn credential_source_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<CredentialSource, String> {
        if let Some(path) = &self.file {
            return Ok(CredentialSource::File(path.clone()));
        }
        if let Some(fd) = self.fd {
            if fd < 0 {
                return Err(format!("invalid file descriptor: {fd}"));
            }
            return Ok(CredentialSource::FileDescriptor(fd));
        }
        if let Some(password) = &self.password {
            return Ok(CredentialSource::Literal(password.clone()));
        }
        if self.env {
            return lookup(PASSWORD_ENV)
                .map(CredentialSource::Literal)
                .ok_or_else(|| format!("-e given but {PASSWORD_ENV} is not set"));
        }
        Ok(CredentialSource::Stdin)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            prompt_pattern: self.prompt.clone(),
            command: self.command.clone(),
            verbose: self.verbose,
        }
    }
}

/// Join arguments into one shell-style line for display, quoting where needed.
pub fn join_command(args: &[String]) -> String {
    args.iter()
        .map(|arg| quote_arg(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_arg(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("sshpass").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults_to_stdin_and_default_prompt() {
        let cli = parse(&["ssh", "host"]);
        assert_eq!(cli.credential_source().unwrap(), CredentialSource::Stdin);
        let config = cli.session_config();
        assert_eq!(config.prompt_pattern, "password:");
        assert_eq!(config.command, vec!["ssh", "host"]);
        assert!(!config.verbose);
    }

    #[test]
    fn test_command_options_are_not_ours() {
        let cli = parse(&["-p", "pw", "ssh", "-p", "2222", "-v", "host"]);
        assert_eq!(cli.password.as_deref(), Some("pw"));
        assert!(!cli.verbose);
        assert_eq!(cli.command, vec!["ssh", "-p", "2222", "-v", "host"]);
    }

    #[test]
    fn test_missing_command_is_an_error() {
        assert!(Cli::try_parse_from(["sshpass", "-p", "pw"]).is_err());
    }

    #[test]
    fn test_source_precedence() {
        let cli = parse(&["-f", "/tmp/pw", "-d", "3", "-p", "x", "-e", "cmd"]);
        assert_eq!(
            cli.credential_source().unwrap(),
            CredentialSource::File(PathBuf::from("/tmp/pw"))
        );

        let cli = parse(&["-d", "3", "-p", "x", "cmd"]);
        assert_eq!(
            cli.credential_source().unwrap(),
            CredentialSource::FileDescriptor(3)
        );

        let cli = parse(&["-p", "x", "-e", "cmd"]);
        assert_eq!(
            cli.credential_source().unwrap(),
            CredentialSource::Literal("x".into())
        );
    }

    #[test]
    fn test_env_password() {
        let cli = parse(&["-e", "cmd"]);
        let source = cli
            .credential_source_with(|name| (name == PASSWORD_ENV).then(|| "from-env".to_string()))
            .unwrap();
        assert_eq!(source, CredentialSource::Literal("from-env".into()));

        assert!(cli.credential_source_with(|_| None).is_err());
    }

    #[test]
    fn test_negative_fd_rejected() {
        let mut cli = parse(&["cmd"]);
        cli.fd = Some(-1);
        assert!(cli.credential_source().is_err());
    }

    #[test]
    fn test_custom_prompt_and_verbose() {
        let cli = parse(&["-P", "Passphrase", "-v", "ssh", "host"]);
        let config = cli.session_config();
        assert_eq!(config.prompt_pattern, "Passphrase");
        assert!(config.verbose);
    }

    #[test]
    fn test_join_command_quotes() {
        let args: Vec<String> = ["ssh", "host", "ls -l", "it's", ""]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(join_command(&args), r#"ssh host 'ls -l' 'it'\''s' ''"#);
    }
}
