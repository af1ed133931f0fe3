//! Platform strategy, resolved once when an executor is built.
//!
//! Everything that differs between hosts lives here: how programs are found,
//! which shells to try, and which process controls the OS offers. The
//! execution path asks the strategy instead of branching on the OS itself.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use tokio::process::Command;
use tracing::debug;

use crate::detect::{BASH, JAVASCRIPT, PYTHON};

/// Capabilities of the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    /// POSIX permission bits exist, so scripts can be marked executable.
    pub executable_bit: bool,
    /// Children can be placed in their own process group and killed as a tree.
    pub process_groups: bool,
    /// An address-space rlimit can be installed before exec.
    pub address_space_limit: bool,
    /// Peak resident memory can be read from procfs.
    pub memory_sampling: bool,
    /// Replacement `PATH` for scrubbed environments.
    pub minimal_path: Option<&'static str>,
}

impl Platform {
    pub const fn current() -> Self {
        Self {
            executable_bit: cfg!(unix),
            process_groups: cfg!(unix),
            address_space_limit: cfg!(target_os = "linux"),
            memory_sampling: cfg!(target_os = "linux"),
            minimal_path: if cfg!(unix) {
                Some("/usr/local/bin:/usr/bin:/bin")
            } else {
                None
            },
        }
    }

    /// Program name tried when no interpreter is configured.
    pub fn default_interpreter(&self, language: &str) -> &'static str {
        match language {
            PYTHON if cfg!(windows) => "python",
            PYTHON => "python3",
            JAVASCRIPT => "node",
            _ => BASH,
        }
    }

    /// Shells to try, in order. The configured one always comes first.
    ///
    /// Windows has no native POSIX shell, so Git for Windows' bundled bash
    /// and the WSL launcher are the documented fallbacks.
    pub fn shell_candidates(&self, configured: Option<&str>) -> Vec<String> {
        let mut candidates: Vec<String> = configured.map(str::to_string).into_iter().collect();
        if cfg!(windows) {
            candidates.extend(
                [
                    "bash",
                    r"C:\Program Files\Git\bin\bash.exe",
                    r"C:\Program Files (x86)\Git\bin\bash.exe",
                ]
                .map(String::from),
            );
            if let Some(root) = std::env::var_os("SystemRoot") {
                candidates.push(
                    Path::new(&root)
                        .join("System32")
                        .join("bash.exe")
                        .to_string_lossy()
                        .into_owned(),
                );
            }
        } else {
            candidates.extend(["bash", "/bin/bash", "/usr/bin/bash", "sh", "/bin/sh"].map(String::from));
        }
        candidates
    }

    /// First shell candidate that resolves to an existing file.
    pub fn discover_shell(&self, configured: Option<&str>) -> Option<PathBuf> {
        let found = self
            .shell_candidates(configured)
            .iter()
            .find_map(|candidate| resolve_program(candidate));
        debug!(shell = ?found, "Shell discovery finished");
        found
    }

    /// Apply process-group and rlimit controls to a child command.
    pub fn configure_command(&self, cmd: &mut Command, address_space: Option<u64>) {
        #[cfg(unix)]
        if self.process_groups {
            cmd.process_group(0);
        }
        #[cfg(target_os = "linux")]
        if let (true, Some(limit)) = (self.address_space_limit, address_space) {
            limit_address_space(cmd, limit);
        }
        #[cfg(not(target_os = "linux"))]
        let _ = (cmd, address_space);
    }

    /// SIGKILL every process in the child's group. Errors (usually "no such
    /// process" because the group already exited) are only logged.
    pub fn kill_process_group(&self, pid: Option<u32>) {
        #[cfg(unix)]
        if self.process_groups {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let Some(pgid) = pid.and_then(|p| i32::try_from(p).ok()) else {
                return;
            };
            if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                debug!(pgid, error = %e, "killpg failed");
            }
        }
        #[cfg(not(unix))]
        let _ = pid;
    }

    /// Mark a script executable for its owner.
    pub fn grant_execute(&self, path: &Path) -> std::io::Result<()> {
        #[cfg(unix)]
        if self.executable_bit {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
        }
        #[cfg(not(unix))]
        let _ = path;
        Ok(())
    }

    /// Signal that terminated the child, if any.
    pub fn termination_signal(&self, status: &ExitStatus) -> Option<i32> {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        }
        #[cfg(not(unix))]
        {
            let _ = status;
            None
        }
    }
}

/// Install `RLIMIT_AS` in the child between fork and exec.
#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn limit_address_space(cmd: &mut Command, limit: u64) {
    use nix::sys::resource::{setrlimit, Resource};

    // SAFETY: the hook only calls setrlimit(2), which is async-signal-safe,
    // and does not allocate or touch state shared with the parent.
    unsafe {
        cmd.pre_exec(move || {
            setrlimit(Resource::RLIMIT_AS, limit, limit).map_err(std::io::Error::from)
        });
    }
}

/// Resolve a program name against `PATH`, or check an explicit path.
pub fn resolve_program(program: &str) -> Option<PathBuf> {
    resolve_program_in(program, std::env::var_os("PATH").as_deref())
}

fn resolve_program_in(program: &str, search_path: Option<&OsStr>) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let extensions: &[&str] = if cfg!(windows) { &["", ".exe", ".cmd"] } else { &[""] };
    std::env::split_paths(search_path?)
        .flat_map(|dir| {
            extensions
                .iter()
                .map(move |ext| dir.join(format!("{program}{ext}")))
        })
        .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_interpreters() {
        let platform = Platform::current();
        assert_eq!(platform.default_interpreter(JAVASCRIPT), "node");
        assert_eq!(platform.default_interpreter(BASH), "bash");
        assert!(platform.default_interpreter(PYTHON).starts_with("python"));
    }

    #[test]
    fn configured_shell_is_tried_first() {
        let platform = Platform::current();
        let candidates = platform.shell_candidates(Some("/opt/shells/bash"));
        assert_eq!(candidates[0], "/opt/shells/bash");
        assert!(candidates.len() > 1);
    }

    #[test]
    fn resolves_from_search_path() {
        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("fakeinterp");
        std::fs::write(&program, "").unwrap();

        let found = resolve_program_in("fakeinterp", Some(dir.path().as_os_str()));
        assert_eq!(found, Some(program.clone()));

        let explicit = resolve_program_in(program.to_str().unwrap(), None);
        assert_eq!(explicit, Some(program));
    }

    #[test]
    fn unresolvable_program_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_program_in("no-such-interpreter", Some(dir.path().as_os_str())).is_none());
        assert!(resolve_program_in("/no/such/interpreter", None).is_none());
        assert!(resolve_program_in("python3", None).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn grant_execute_sets_owner_bits() {
        use std::os::unix::fs::PermissionsExt;

        let file = tempfile::NamedTempFile::new().unwrap();
        Platform::current().grant_execute(file.path()).unwrap();
        let mode = std::fs::metadata(file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o700, 0o700);
    }
}
