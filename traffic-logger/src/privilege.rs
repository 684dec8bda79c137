//! Privilege checks done before any socket is opened

use nix::unistd::{Uid, User};

/// Ports below this value can only be bound by root
pub const PRIVILEGED_PORT_LIMIT: u16 = 1024;

/// Capture always needs root; the server alone only for privileged ports.
pub fn check(port: u16, with_capture: bool) -> Result<(), String> {
    check_uid(Uid::current(), port, with_capture)
}

fn user_name(uid: Uid) -> String {
    match User::from_uid(uid) {
        Ok(Some(user)) => user.name,
        _ => uid.to_string(),
    }
}

fn check_uid(uid: Uid, port: u16, with_capture: bool) -> Result<(), String> {
    if uid.is_root() {
        return Ok(());
    }
    if with_capture {
        return Err("This program requires root privileges. Please run with sudo.".to_owned());
    }
    if port < PRIVILEGED_PORT_LIMIT {
        return Err(format!(
            "You are running this program with user permissions of {}! Try running with sudo or as root to use ports below {} on Linux.",
            user_name(uid),
            PRIVILEGED_PORT_LIMIT
        ));
    }
    Ok(())
}
