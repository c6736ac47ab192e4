//! Effective privilege checks.

use log::{debug, info};

/// Check if the process is running with root privileges
pub fn is_elevated() -> bool {
    let elevated = unsafe { libc::geteuid() == 0 };
    debug!("Effective uid is {}root", if elevated { "" } else { "not " });
    elevated
}

/// Get instructions for elevating privileges
pub fn get_elevation_instructions() -> &'static str {
    "run as root, e.g. 'sudo gandalf <Method> <Mode> ...'"
}

/// Log the privilege level the run will operate with.
pub fn report_privileges() {
    if is_elevated() {
        info!("Running as root");
    } else {
        info!("Running without root; {}", get_elevation_instructions());
    }
}
