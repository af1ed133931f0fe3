//! Scrubbed child-process environments.
//!
//! Children start from an empty environment. Only locale, terminal and
//! temp-dir variables are carried over from the host, then a few fixed
//! values are pinned so output does not depend on the host's configuration.
//! Credentials held by the host process never reach the child.

use std::ffi::OsString;
use std::path::Path;

use super::platform::Platform;

/// Host variables passed through unchanged.
const PASSED: &[&str] = &["LANG", "LANGUAGE", "TZ", "TMPDIR", "TEMP", "TMP", "TERM"];

/// Prefix of the locale category variables (`LC_CTYPE`, `LC_NUMERIC`, ...).
const LOCALE_PREFIX: &str = "LC_";

/// Windows processes fail to start or misbehave without these.
const WINDOWS_PASSED: &[&str] = &["SystemRoot", "SystemDrive", "ComSpec", "windir", "PATHEXT"];

/// Which host variables survive and which values are pinned for one language.
#[derive(Debug, Clone)]
pub struct EnvPolicy {
    pinned: Vec<(&'static str, String)>,
}

impl EnvPolicy {
    pub fn python() -> Self {
        Self {
            pinned: vec![
                ("PYTHONUNBUFFERED", "1".into()),
                ("PYTHONDONTWRITEBYTECODE", "1".into()),
                ("PYTHONIOENCODING", "utf-8".into()),
                ("PYTHONHASHSEED", "0".into()),
            ],
        }
    }

    pub fn javascript() -> Self {
        Self {
            pinned: vec![("NODE_DISABLE_COLORS", "1".into()), ("NO_COLOR", "1".into())],
        }
    }

    pub fn shell() -> Self {
        Self {
            pinned: vec![("LC_ALL", "C".into())],
        }
    }

    /// True if the host value of `key` is handed to the child.
    pub fn passes(&self, key: &str) -> bool {
        if self.pinned.iter().any(|(name, _)| *name == key) {
            return false;
        }
        PASSED.contains(&key)
            || key.starts_with(LOCALE_PREFIX)
            || (cfg!(windows) && WINDOWS_PASSED.iter().any(|name| name.eq_ignore_ascii_case(key)))
    }

    /// Resolve the policy against `host` into the exact child environment.
    ///
    /// `HOME` is pointed at the executor's own directory and `PATH` at the
    /// platform's minimal search path, when it has one.
    pub fn resolve<I>(&self, host: I, work_dir: &Path, platform: &Platform) -> Vec<(OsString, OsString)>
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let mut env: Vec<(OsString, OsString)> = host
            .into_iter()
            .filter(|(key, _)| key.to_str().is_some_and(|k| self.passes(k)))
            .collect();

        if let Some(path) = platform.minimal_path {
            env.push(("PATH".into(), path.into()));
        }
        env.push(("HOME".into(), work_dir.as_os_str().to_owned()));
        env.extend(
            self.pinned
                .iter()
                .map(|(key, value)| (OsString::from(key), OsString::from(value))),
        );
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Vec<(OsString, OsString)> {
        [
            ("PATH", "/home/me/bin:/usr/bin"),
            ("LD_LIBRARY_PATH", "/opt/lib"),
            ("LD_PRELOAD", "/tmp/hook.so"),
            ("HOME", "/home/me"),
            ("USER", "me"),
            ("SSH_AUTH_SOCK", "/tmp/agent.sock"),
            ("NODE_OPTIONS", "--require /tmp/evil.js"),
            ("PYTHONPATH", "/home/me/lib"),
            ("OPENAI_API_KEY", "sk-host-secret"),
            ("GITHUB_TOKEN", "ghp_secret"),
            ("AWS_SECRET_ACCESS_KEY", "aws-secret"),
            ("DATABASE_PASSWORD", "hunter2"),
            ("LANG", "en_US.UTF-8"),
            ("LC_CTYPE", "en_US.UTF-8"),
            ("TZ", "UTC"),
            ("PYTHONUNBUFFERED", "0"),
            ("LC_ALL", "en_US.UTF-8"),
        ]
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
    }

    fn lookup(env: &[(OsString, OsString)], key: &str) -> Vec<String> {
        env.iter()
            .filter(|(k, _)| k.to_str() == Some(key))
            .map(|(_, v)| v.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn credentials_never_pass() {
        let platform = Platform::current();
        for policy in [EnvPolicy::python(), EnvPolicy::javascript(), EnvPolicy::shell()] {
            let env = policy.resolve(host(), Path::new("/w"), &platform);
            for key in [
                "OPENAI_API_KEY",
                "GITHUB_TOKEN",
                "AWS_SECRET_ACCESS_KEY",
                "DATABASE_PASSWORD",
                "SSH_AUTH_SOCK",
                "USER",
                "LD_PRELOAD",
                "LD_LIBRARY_PATH",
            ] {
                assert!(lookup(&env, key).is_empty(), "{key} leaked");
            }
        }
    }

    #[test]
    fn python_pins_and_keeps_locale() {
        let work_dir = Path::new("/tmp/work/python");
        let platform = Platform::current();
        let env = EnvPolicy::python().resolve(host(), work_dir, &platform);

        assert!(lookup(&env, "PYTHONPATH").is_empty());
        assert_eq!(lookup(&env, "HOME"), vec!["/tmp/work/python"]);
        assert_eq!(lookup(&env, "PYTHONUNBUFFERED"), vec!["1"]);
        assert_eq!(lookup(&env, "LANG"), vec!["en_US.UTF-8"]);
        assert_eq!(lookup(&env, "LC_CTYPE"), vec!["en_US.UTF-8"]);
        assert_eq!(lookup(&env, "TZ"), vec!["UTC"]);

        let paths = lookup(&env, "PATH");
        assert!(paths.iter().all(|p| p != "/home/me/bin:/usr/bin"));
    }

    #[test]
    fn javascript_drops_node_options() {
        let env = EnvPolicy::javascript().resolve(host(), Path::new("/w"), &Platform::current());
        assert!(lookup(&env, "NODE_OPTIONS").is_empty());
        assert_eq!(lookup(&env, "NO_COLOR"), vec!["1"]);
    }

    #[test]
    fn shell_pins_locale_over_host() {
        let policy = EnvPolicy::shell();
        let platform = Platform::current();
        assert!(!policy.passes("LC_ALL"));
        assert!(policy.passes("LC_CTYPE"));
        assert!(!policy.passes("OPENAI_API_KEY"));

        let env = policy.resolve(host(), Path::new("/w"), &platform);
        assert_eq!(lookup(&env, "LC_ALL"), vec!["C"]);
    }
}
