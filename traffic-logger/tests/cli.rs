use assert_cmd::Command;
use std::env;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::process::{self, Stdio};
use std::thread;
use std::time::Duration;

fn run(args: &[&str]) -> (Option<i32>, String) {
    let mut cmd = Command::cargo_bin(env!("CARGO_PKG_NAME")).unwrap();
    let output = cmd.args(args).output().unwrap();
    (
        output.status.code(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    )
}

#[test]
fn test_help() {
    let mut cmd = Command::cargo_bin(env!("CARGO_PKG_NAME")).unwrap();
    let output = cmd.arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("PORT_NUMBER"));
    assert!(stdout.contains("--server-only"));
}

#[test]
fn test_missing_port() {
    let (code, stderr) = run(&[]);
    assert_ne!(code, Some(0));
    assert!(stderr.contains("Usage"));
}

#[test]
fn test_invalid_ports() {
    for port in ["0", "65536", "-5", "abc"] {
        let (code, stderr) = run(&["--", port]);
        assert_eq!(code, Some(1), "port {port}");
        assert!(stderr.contains("Invalid port number"), "port {port}: {stderr}");
    }
}

#[test]
fn test_missing_config_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = dir.path().join("missing.toml");
    let (code, stderr) = run(&["-c", config.to_str().unwrap(), "--server-only", "8080"]);
    assert_eq!(code, Some(1));
    assert!(stderr.contains("Could not load configuration"));
}

#[test]
fn test_invalid_config_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = dir.path().join("bad.toml");
    std::fs::write(&config, "log_file = = 3").unwrap();
    let (code, _) = run(&["-c", config.to_str().unwrap(), "8080"]);
    assert_eq!(code, Some(1));
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn send_when_listening(port: u16, data: &[u8]) {
    for _ in 0..500 {
        if let Ok(mut client) = TcpStream::connect(("127.0.0.1", port)) {
            client.write_all(data).unwrap();
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("server never listened on port {port}");
}

fn wait_for_lines(path: &Path, count: usize) -> usize {
    let mut lines = 0;
    for _ in 0..500 {
        lines = fs::read_to_string(path)
            .map(|content| content.lines().count())
            .unwrap_or(0);
        if lines >= count {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    lines
}

#[cfg(target_os = "linux")]
#[test]
fn test_server_keeps_logging_with_full_stdout() {
    let dir = tempfile::TempDir::new().unwrap();
    let log_file = dir.path().join("server.log");
    let port = free_port();
    let full = OpenOptions::new().write(true).open("/dev/full").unwrap();
    let mut child = process::Command::new(env!("CARGO_BIN_EXE_traffic-logger"))
        .args(["--server-only", "-l", log_file.to_str().unwrap()])
        .arg(port.to_string())
        .stdout(Stdio::from(full))
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    send_when_listening(port, b"first");
    let after_first = wait_for_lines(&log_file, 1);
    let still_running = child.try_wait().unwrap().is_none();
    send_when_listening(port, b"second");
    let after_second = wait_for_lines(&log_file, 2);

    child.kill().unwrap();
    child.wait().unwrap();

    assert_eq!(after_first, 1);
    assert!(still_running);
    assert_eq!(after_second, 2);
    let content = fs::read_to_string(&log_file).unwrap();
    assert!(content.contains(" - first\n"));
    assert!(content.contains(" - second\n"));
}
