use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use std::process::{Child, Stdio};
use std::time::{Duration, Instant};

fn nsexec() -> Command {
    Command::new(env!("CARGO_BIN_EXE_nsexec"))
}

/// Name of the user running the tests, if the passwd database knows it
fn current_user() -> Option<String> {
    let output = std::process::Command::new("id").arg("-un").output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

struct Server {
    child: Child,
}

impl Server {
    fn start(socket: &Path) -> Self {
        let child = std::process::Command::new(env!("CARGO_BIN_EXE_nsexec"))
            .arg("serve")
            .arg("--socket")
            .arg(socket)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("Failed to spawn daemon");

        let deadline = Instant::now() + Duration::from_secs(10);
        while !socket.exists() {
            assert!(Instant::now() < deadline, "daemon never bound its socket");
            std::thread::sleep(Duration::from_millis(20));
        }

        Self { child }
    }

    fn terminate(mut self) -> std::process::ExitStatus {
        std::process::Command::new("kill")
            .arg("-TERM")
            .arg(self.child.id().to_string())
            .status()
            .expect("Failed to signal daemon");
        self.child.wait().expect("Failed to wait for daemon")
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn test_help_command() {
    nsexec()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Commands:"))
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("exec"))
        .stdout(predicate::str::contains("version"));
}

#[test]
fn test_version_command() {
    nsexec()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("nsexec"));

    nsexec()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("SCM_RIGHTS"));
}

#[test]
fn test_invalid_command() {
    nsexec()
        .arg("invalid")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_exec_without_command() {
    nsexec()
        .args(["exec", "--user", "nobody"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}

#[test]
fn test_exec_without_user() {
    nsexec()
        .args(["exec", "--", "/bin/echo", "hi"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--user"));
}

#[test]
fn test_serve_rejects_bad_mode() {
    nsexec()
        .args(["serve", "--mode", "9z"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid octal mode"));
}

#[test]
fn test_exec_without_daemon() {
    let dir = tempfile::tempdir().unwrap();

    nsexec()
        .arg("exec")
        .arg("--socket")
        .arg(dir.path().join("missing.sock"))
        .args(["--user", "nobody", "--", "/bin/true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to start /bin/true"));
}

#[test]
fn test_exec_round_trip() {
    let Some(user) = current_user() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("daemon.sock");
    let server = Server::start(&socket);

    nsexec()
        .arg("exec")
        .arg("--socket")
        .arg(&socket)
        .args(["--user", &user, "--", "/bin/echo", "hello", "world"])
        .assert()
        .success()
        .stdout("hello world\n");

    nsexec()
        .arg("exec")
        .arg("--socket")
        .arg(&socket)
        .args(["--user", &user, "--env", "GREETING=hey", "--"])
        .args(["/bin/sh", "-c", "echo \"$GREETING\" >&2; exit 5"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("hey"));

    nsexec()
        .arg("exec")
        .arg("--socket")
        .arg(&socket)
        .args(["--user", &user, "--", "/bin/cat"])
        .write_stdin("piped input")
        .assert()
        .success()
        .stdout("piped input");

    nsexec()
        .arg("exec")
        .arg("--socket")
        .arg(&socket)
        .args(["--user", "no-such-user-here", "--", "/bin/true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no-such-user-here"));

    let status = server.terminate();
    assert!(status.success(), "daemon exited with {status}");
    assert!(!socket.exists());
}
