//! Facts about the host that option defaults depend on.
//!
//! Kept behind a trait so tests can pretend to be any platform or user.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Host facts consulted while resolving install options.
pub trait HostEnvironment: Send + Sync {
    /// Platform name in runtime terms (`linux`, `darwin`, `win32`, ...).
    fn platform(&self) -> String;

    /// Architecture in runtime terms (`x64`, `arm64`, ...).
    fn arch(&self) -> String;

    /// Version of the JavaScript runtime packages will run under.
    fn runtime_version(&self) -> String;

    /// Real user id, or `None` when the process cannot inspect or change its
    /// user and group identity on this platform.
    fn user_id(&self) -> Option<u32>;

    /// Working directory used when neither prefix nor lockfile directory is given.
    fn current_dir(&self) -> PathBuf;

    /// Store location used when none is configured.
    fn default_store_path(&self) -> Option<PathBuf>;
}

/// The real host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEnvironment;

impl HostEnvironment for SystemEnvironment {
    fn platform(&self) -> String {
        match std::env::consts::OS {
            "windows" => "win32".to_string(),
            "macos" => "darwin".to_string(),
            other => other.to_string(),
        }
    }

    fn arch(&self) -> String {
        match std::env::consts::ARCH {
            "x86_64" => "x64".to_string(),
            "x86" => "ia32".to_string(),
            "aarch64" => "arm64".to_string(),
            other => other.to_string(),
        }
    }

    fn runtime_version(&self) -> String {
        static NODE_VERSION: OnceLock<String> = OnceLock::new();
        NODE_VERSION
            .get_or_init(|| {
                std::process::Command::new("node")
                    .arg("--version")
                    .output()
                    .ok()
                    .filter(|out| out.status.success())
                    .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| "unknown".to_string())
            })
            .clone()
    }

    #[cfg(unix)]
    #[allow(unsafe_code)]
    fn user_id(&self) -> Option<u32> {
        // SAFETY: getuid(2) takes no arguments, cannot fail and touches no memory.
        Some(unsafe { libc::getuid() })
    }

    #[cfg(not(unix))]
    fn user_id(&self) -> Option<u32> {
        None
    }

    fn current_dir(&self) -> PathBuf {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    fn default_store_path(&self) -> Option<PathBuf> {
        crate::paths::try_default_store_path()
    }
}
