//! Command-line interface for citizen-shell.
//!
//! Uses lexopt for minimal binary size overhead.

use std::ffi::OsString;
use std::path::PathBuf;

use crate::transport::DEFAULT_TELNET_PORT;

/// Command-line arguments.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Fail on a non-zero exit code.
    pub check_xc: bool,
    /// Fail on any stderr output.
    pub check_err: bool,
    /// Print stdout lines as they arrive.
    pub stream: bool,
    /// Working directory for the command.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables, in order given.
    pub env: Vec<(String, String)>,
    /// Run through a pseudo-terminal connection.
    pub pty: bool,
    /// Run on a telnet host, as `(host, port)`.
    pub telnet: Option<(String, u16)>,
    /// Reboot the remote end and reconnect before running the command.
    pub reboot: bool,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// The command line to run.
    pub command: Vec<String>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
}

impl Args {
    /// The command words joined into one command line.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('x') | Long("check-xc") => {
                result.check_xc = true;
            }
            Short('e') | Long("check-err") => {
                result.check_err = true;
            }
            Long("stream") => {
                result.stream = true;
            }
            Short('C') | Long("cwd") => {
                result.cwd = Some(parser.value()?.parse()?);
            }
            Short('E') | Long("env") => {
                let value: String = parser.value()?.parse()?;
                let (key, val) = value
                    .split_once('=')
                    .ok_or_else(|| ArgsError::InvalidValue("env", value.clone()))?;
                result.env.push((key.to_string(), val.to_string()));
            }
            Long("pty") => {
                result.pty = true;
            }
            Long("telnet") => {
                let value: String = parser.value()?.parse()?;
                result.telnet = Some(parse_telnet_target(&value)?);
            }
            Long("reboot") => {
                result.reboot = true;
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Value(val) => {
                result.command.push(val.string()?);
                for rest in parser.raw_args()? {
                    result
                        .command
                        .push(rest.into_string().map_err(|v| {
                            ArgsError::UnexpectedArgument(v.to_string_lossy().into())
                        })?);
                }
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    if result.pty && result.telnet.is_some() {
        return Err(ArgsError::Conflict("--pty and --telnet are exclusive"));
    }
    if result.reboot && !result.pty && result.telnet.is_none() {
        return Err(ArgsError::Conflict("--reboot needs --pty or --telnet"));
    }

    Ok(result)
}

/// `HOST` or `HOST:PORT`, defaulting to the telnet port.
fn parse_telnet_target(value: &str) -> Result<(String, u16), ArgsError> {
    let invalid = || ArgsError::InvalidValue("telnet", value.to_string());
    let (host, port) = match value.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().map_err(|_| invalid())?),
        None => (value, DEFAULT_TELNET_PORT),
    };
    if host.is_empty() {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"citizen-shell {version}
Run a shell command and report its output and exit code

USAGE:
    citizen-shell [OPTIONS] [--] <COMMAND>...

OPTIONS:
    -c, --config <FILE>     Path to configuration file (JSON)
    -x, --check-xc          Fail when the exit code is non-zero
    -e, --check-err         Fail when anything is written to stderr
        --stream            Print stdout lines as they arrive
    -C, --cwd <DIR>         Working directory for the command
    -E, --env <KEY=VALUE>   Set an environment variable (repeatable)
        --pty               Run through a pseudo-terminal session
        --telnet <HOST[:PORT]>
                            Run on a telnet host (login from config)
        --reboot            Reboot and reconnect before running (pty/telnet)
    -l, --log-level <LVL>   Log level (error, warn, info, debug, trace)
    -h, --help              Print help
    -V, --version           Print version

ENVIRONMENT VARIABLES:
    CITIZEN_SHELL_PROGRAM    Shell program (overrides config)
    CITIZEN_SHELL_CHECK_XC   Exit code checking (overrides config)
    CITIZEN_SHELL_CHECK_ERR  Stderr checking (overrides config)
    CITIZEN_SHELL_LOG_LEVEL  Log level (overrides config)
    RUST_LOG                 Alternative log level setting

EXAMPLES:
    # Run a command locally
    citizen-shell echo hello

    # Fail on errors, with an extra variable
    citizen-shell -x -E NAME=world -- 'echo hello $NAME'

    # Same command through a pseudo-terminal
    citizen-shell --pty 'uname -a'

    # Reboot a board over telnet, then check it came back
    citizen-shell -c board.json --telnet 192.168.1.20 --reboot uptime
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("citizen-shell {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug)]
pub enum ArgsError {
    /// Lexopt parsing error.
    Lexopt(lexopt::Error),
    /// Invalid argument value.
    InvalidValue(&'static str, String),
    /// Unexpected positional argument.
    UnexpectedArgument(String),
    /// Options that cannot be combined.
    Conflict(&'static str),
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexopt(e) => write!(f, "{}", e),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for --{}: '{}'", name, value)
            }
            Self::UnexpectedArgument(arg) => {
                write!(f, "unexpected argument: '{}'", arg)
            }
            Self::Conflict(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<lexopt::Error> for ArgsError {
    fn from(e: lexopt::Error) -> Self {
        Self::Lexopt(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(args: &[&str]) -> Vec<OsString> {
        std::iter::once("citizen-shell")
            .chain(args.iter().copied())
            .map(OsString::from)
            .collect()
    }

    #[test]
    fn test_default_args() {
        let result = parse_args_from(args(&[])).unwrap();
        assert!(result.command.is_empty());
        assert!(!result.check_xc);
        assert!(!result.pty);
    }

    #[test]
    fn test_command_words() {
        let result = parse_args_from(args(&["echo", "hello", "world"])).unwrap();
        assert_eq!(result.command_line(), "echo hello world");
    }

    #[test]
    fn test_options_after_command_belong_to_command() {
        let result = parse_args_from(args(&["-x", "ls", "-la"])).unwrap();
        assert!(result.check_xc);
        assert_eq!(result.command, vec!["ls", "-la"]);
    }

    #[test]
    fn test_double_dash() {
        let result = parse_args_from(args(&["--", "-x"])).unwrap();
        assert!(!result.check_xc);
        assert_eq!(result.command_line(), "-x");
    }

    #[test]
    fn test_env_pairs_in_order() {
        let result =
            parse_args_from(args(&["-E", "B=2", "--env", "A=x=y", "env"])).unwrap();
        assert_eq!(
            result.env,
            vec![
                ("B".to_string(), "2".to_string()),
                ("A".to_string(), "x=y".to_string())
            ]
        );
    }

    #[test]
    fn test_env_without_equals() {
        let result = parse_args_from(args(&["-E", "NOPE", "env"]));
        assert!(matches!(result, Err(ArgsError::InvalidValue("env", _))));
    }

    #[test]
    fn test_cwd_and_config() {
        let result =
            parse_args_from(args(&["-C", "/tmp", "-c", "/etc/config.json", "pwd"])).unwrap();
        assert_eq!(result.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(result.config, Some(PathBuf::from("/etc/config.json")));
    }

    #[test]
    fn test_flags() {
        let result =
            parse_args_from(args(&["--check-err", "--stream", "--pty", "true"])).unwrap();
        assert!(result.check_err);
        assert!(result.stream);
        assert!(result.pty);
    }

    #[test]
    fn test_telnet_target() {
        let result = parse_args_from(args(&["--telnet", "board:2323", "true"])).unwrap();
        assert_eq!(result.telnet, Some(("board".to_string(), 2323)));

        let result = parse_args_from(args(&["--telnet", "10.0.0.7", "true"])).unwrap();
        assert_eq!(result.telnet, Some(("10.0.0.7".to_string(), 23)));

        let result = parse_args_from(args(&["--telnet", "board:x", "true"]));
        assert!(matches!(result, Err(ArgsError::InvalidValue("telnet", _))));
    }

    #[test]
    fn test_reboot_needs_connection() {
        assert!(matches!(
            parse_args_from(args(&["--reboot", "true"])),
            Err(ArgsError::Conflict(_))
        ));
        assert!(parse_args_from(args(&["--pty", "--reboot", "true"])).unwrap().reboot);
        assert!(matches!(
            parse_args_from(args(&["--pty", "--telnet", "h", "true"])),
            Err(ArgsError::Conflict(_))
        ));
    }

    #[test]
    fn test_help_flag() {
        let result = parse_args_from(args(&["-h"])).unwrap();
        assert!(result.help);

        let result = parse_args_from(args(&["--help"])).unwrap();
        assert!(result.help);
    }

    #[test]
    fn test_version_flag() {
        let result = parse_args_from(args(&["-V"])).unwrap();
        assert!(result.version);

        let result = parse_args_from(args(&["--version"])).unwrap();
        assert!(result.version);
    }

    #[test]
    fn test_log_level() {
        let result = parse_args_from(args(&["-l", "debug", "true"])).unwrap();
        assert_eq!(result.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_unknown_option() {
        let result = parse_args_from(args(&["--bogus"]));
        assert!(result.is_err());
    }
}
