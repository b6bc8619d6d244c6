//! citizen-shell binary entry point.

use std::process::ExitCode;

use citizen_shell::cli::{self, Args};
use citizen_shell::config::Config;
use citizen_shell::{
    logging, Channel, Command, Connection, Executor, LocalShell, PtyTransport, RebootPolicy,
    Shell, ShellError, SingleChannelTransport, TelnetShell,
};
use tracing::{debug, warn};

fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Run with --help for usage");
            return ExitCode::from(2);
        }
    };

    if args.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }

    if args.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }

    if args.command.is_empty() {
        eprintln!("error: no command given");
        eprintln!("Run with --help for usage");
        return ExitCode::from(2);
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };

    // Initialize logging
    logging::try_init_with(Some(config.log_filter())).ok();
    debug!("citizen-shell v{}", env!("CARGO_PKG_VERSION"));

    match dispatch(&args, &config) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("error: {}", e);
            let code = e.exit_code().and_then(|c| u8::try_from(c).ok());
            ExitCode::from(code.filter(|c| *c != 0).unwrap_or(1))
        }
    }
}

fn dispatch(args: &Args, config: &Config) -> citizen_shell::Result<i32> {
    let command = build_command(args);
    let reboot = args.reboot.then(|| config.reboot_policy());
    if let Some((host, port)) = &args.telnet {
        let shell = TelnetShell::telnet(host.as_str(), *port, config.handshake())
            .with_policy(config.policy());
        run_connected(shell, reboot.as_ref(), command)
    } else if args.pty {
        let transport = PtyTransport::new(config.shell.program.as_str());
        let shell = Shell::new(Connection::new(transport, config.handshake()))
            .with_policy(config.policy());
        run_connected(shell, reboot.as_ref(), command)
    } else {
        let mut shell = LocalShell::local_with_program(config.shell.program.as_str())
            .with_policy(config.policy());
        run(&mut shell, command)
    }
}

/// Connect, optionally reboot, run `command` and always disconnect.
fn run_connected<T: SingleChannelTransport>(
    mut shell: Shell<Connection<T>>,
    reboot: Option<&RebootPolicy>,
    command: Command,
) -> Result<i32, ShellError> {
    shell.connect()?;
    let outcome = match reboot {
        Some(policy) => shell
            .reboot_and_reconnect(policy)
            .and_then(|()| run(&mut shell, command)),
        None => run(&mut shell, command),
    };
    if let Err(e) = shell.disconnect() {
        warn!("disconnect failed: {}", e);
    }
    outcome
}

fn build_command(args: &Args) -> Command {
    let mut command = Command::new(args.command_line()).envs(args.env.iter().cloned());
    if let Some(dir) = &args.cwd {
        command = command.working_dir(dir);
    }
    command
}

fn run<E: Executor>(shell: &mut Shell<E>, command: Command) -> Result<i32, ShellError> {
    let mut result = shell.run(command)?;

    if shell.policy().wait {
        for line in result.combined()? {
            match line.channel {
                Channel::Stdout => println!("{}", line.text),
                Channel::Stderr => eprintln!("{}", line.text),
            }
        }
    } else {
        for line in &mut result {
            println!("{}", line?);
        }
        for line in result.stderr()? {
            eprintln!("{}", line);
        }
    }

    result.exit_code()
}
