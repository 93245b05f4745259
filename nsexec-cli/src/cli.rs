//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use nsexec_socket::config::DEFAULT_SOCKET_PATH;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nsexec")]
#[command(about = "Run processes inside a container namespace on behalf of host clients", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve process requests on a Unix socket
    Serve(ServeArgs),

    /// Ask a running daemon to start a process
    Exec(ExecArgs),

    /// Show version information
    Version,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path (prefix with @ for an abstract socket)
    #[arg(short, long, default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,

    /// Permission bits for the socket file, in octal
    #[arg(long, default_value = "700", value_parser = parse_mode)]
    pub mode: u32,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Socket path of the daemon
    #[arg(short, long, default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,

    /// User to run the process as
    #[arg(short, long)]
    pub user: String,

    /// Working directory for the process
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Environment entry (KEY=VALUE), repeatable
    #[arg(short, long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Executable path and arguments
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

fn parse_mode(value: &str) -> Result<u32, String> {
    let digits = value.strip_prefix("0o").unwrap_or(value);
    match u32::from_str_radix(digits, 8) {
        Ok(mode) if mode <= 0o7777 => Ok(mode),
        Ok(_) => Err(format!("mode out of range: {value}")),
        Err(e) => Err(format!("invalid octal mode {value}: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("700"), Ok(0o700));
        assert_eq!(parse_mode("0o660"), Ok(0o660));
        assert!(parse_mode("888").is_err());
        assert!(parse_mode("77777").is_err());
    }

    #[test]
    fn test_exec_args() {
        let cli = Cli::try_parse_from([
            "nsexec", "exec", "--user", "nobody", "--env", "A=1", "--env", "B=2", "--", "/bin/echo",
            "hi",
        ])
        .unwrap();

        let Commands::Exec(args) = cli.command else {
            panic!("expected exec");
        };
        assert_eq!(args.user, "nobody");
        assert_eq!(args.env, ["A=1", "B=2"]);
        assert_eq!(args.command, ["/bin/echo", "hi"]);
        assert_eq!(args.socket, PathBuf::from(DEFAULT_SOCKET_PATH));
    }

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["nsexec", "serve"]).unwrap();
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.mode, nsexec_socket::config::DEFAULT_SOCKET_MODE);
    }
}
