//! Host platform utility functions

use std::path::PathBuf;

/// Environment variable pointing at the root of the software checkout. Parameter files and
/// session directories are resolved relative to this path.
pub const SW_ROOT_ENV_VAR: &str = "BC_SW_ROOT";

/// Get the software root directory from the environment.
pub fn get_sw_root() -> Result<PathBuf, std::env::VarError> {
    std::env::var(SW_ROOT_ENV_VAR).map(PathBuf::from)
}

/// Get the name of the host machine, if one can be determined from the environment.
pub fn get_hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
