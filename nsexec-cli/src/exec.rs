//! Client mode: submit one process and relay its streams

use anyhow::{Context, Result, anyhow};
use nsexec_core::ProcessSpec;
use nsexec_socket::{ProcessHandles, SocketConnector};
use std::io;
use std::thread;
use tracing::debug;

use crate::cli::ExecArgs;

pub async fn execute(args: ExecArgs) -> Result<i32> {
    let spec = build_spec(&args)?;
    let connector = SocketConnector::for_path(&args.socket);

    tokio::task::spawn_blocking(move || relay(&connector, &spec))
        .await
        .context("Client task panicked")?
}

fn build_spec(args: &ExecArgs) -> Result<ProcessSpec> {
    let (path, rest) = args
        .command
        .split_first()
        .ok_or_else(|| anyhow!("no command given"))?;

    let mut spec = ProcessSpec::new(path.as_str())
        .with_args(rest.iter().cloned())
        .with_user(args.user.as_str());
    if let Some(dir) = &args.dir {
        spec = spec.with_dir(dir);
    }
    for entry in &args.env {
        spec = spec.with_env(entry.as_str());
    }

    spec.validate().context("Invalid process description")?;
    Ok(spec)
}

fn relay(connector: &SocketConnector, spec: &ProcessSpec) -> Result<i32> {
    let ProcessHandles {
        mut stdin,
        mut stdout,
        mut stderr,
        exit_status,
    } = connector
        .connect(spec)
        .with_context(|| format!("Failed to start {}", spec.path))?;

    debug!(path = %spec.path, "Process started, relaying streams");

    // Not joined: the process may finish while our own stdin is still open.
    thread::spawn(move || {
        let _ = io::copy(&mut io::stdin().lock(), &mut stdin);
    });
    let out = thread::spawn(move || io::copy(&mut stdout, &mut io::stdout().lock()));
    let err = thread::spawn(move || io::copy(&mut stderr, &mut io::stderr().lock()));

    for pump in [out, err] {
        pump.join()
            .map_err(|_| anyhow!("stream relay panicked"))?
            .context("Failed to relay output")?;
    }

    let status = ProcessHandles::read_exit_status(exit_status)
        .context("Failed to read exit status")?;
    debug!(%status, "Process finished");

    Ok(i32::from(status.as_raw()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;

    fn exec_args(argv: &[&str]) -> ExecArgs {
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Exec(args) => args,
            _ => panic!("expected exec"),
        }
    }

    #[test]
    fn test_build_spec() {
        let args = exec_args(&[
            "nsexec", "exec", "-u", "app", "-d", "/srv", "-e", "MODE=test", "--", "/bin/ls", "-l",
        ]);
        let spec = build_spec(&args).unwrap();

        assert_eq!(spec.path, "/bin/ls");
        assert_eq!(spec.args, ["-l"]);
        assert_eq!(spec.user, "app");
        assert_eq!(spec.dir.as_deref(), Some(std::path::Path::new("/srv")));
        assert_eq!(spec.env, ["MODE=test"]);
    }

    #[test]
    fn test_build_spec_rejects_bad_env() {
        let args = exec_args(&["nsexec", "exec", "-u", "app", "-e", "NOEQUALS", "--", "/bin/true"]);
        assert!(build_spec(&args).is_err());
    }
}
