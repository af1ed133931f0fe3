//! Pre-flight denylist validation.
//!
//! This is lexical matching over the raw snippet, not a sandbox: it rejects
//! the obvious ways to reach the host (dynamic evaluation, process spawning,
//! file writes, destructive shell commands) before a process is ever spawned.
//! Anything that slips through is still bounded by the timeout, the scrubbed
//! environment and the memory ceiling.

use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};

/// A snippet was rejected by a denylist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct Violation {
    pub reason: String,
}

impl Violation {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Case-insensitive regex patterns, each with the reason reported on match.
#[derive(Debug, Clone)]
pub struct PatternDenylist {
    rules: Vec<(Regex, &'static str)>,
}

impl PatternDenylist {
    fn build(rules: &[(&str, &'static str)]) -> Self {
        let rules = rules
            .iter()
            .map(|(pattern, reason)| {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .unwrap_or_else(|e| panic!("invalid denylist pattern {pattern:?}: {e}"));
                (regex, *reason)
            })
            .collect();
        Self { rules }
    }

    /// Denylist for the script-interpreter language (python).
    pub fn python() -> &'static Self {
        static LIST: OnceLock<PatternDenylist> = OnceLock::new();
        LIST.get_or_init(|| {
            let mut rules = COMMON_RULES.to_vec();
            rules.extend_from_slice(PYTHON_RULES);
            Self::build(&rules)
        })
    }

    /// Denylist for the dynamic-runtime language (javascript).
    pub fn javascript() -> &'static Self {
        static LIST: OnceLock<PatternDenylist> = OnceLock::new();
        LIST.get_or_init(|| {
            let mut rules = COMMON_RULES.to_vec();
            rules.extend_from_slice(JAVASCRIPT_RULES);
            Self::build(&rules)
        })
    }

    /// Reject on the first matching rule.
    pub fn check(&self, code: &str) -> Result<(), Violation> {
        match self.rules.iter().find(|(regex, _)| regex.is_match(code)) {
            Some((_, reason)) => Err(Violation::new(*reason)),
            None => Ok(()),
        }
    }
}

/// Shared between the script and runtime languages: the capability surface
/// looks the same at the syntactic level.
const COMMON_RULES: &[(&str, &str)] = &[
    (r"__import__\s*\(", "Dynamic import via __import__() is not allowed"),
    (r"\beval\s*\(", "Dynamic evaluation via eval() is not allowed"),
    (r"\bexec\s*\(", "Dynamic execution via exec() is not allowed"),
    (r"\bcompile\s*\(", "Dynamic compilation via compile() is not allowed"),
    (
        r#"\bopen\s*\([^,)]*,\s*(mode\s*=\s*)?['"][rbt]*[wax+]"#,
        "Opening files for writing or appending is not allowed",
    ),
    (
        r#"\bopen\s*\([^)]*\bmode\s*=\s*['"][rbt]*[wax+]"#,
        "Opening files for writing or appending is not allowed",
    ),
    (r"\bsubprocess\b", "Spawning subprocesses is not allowed"),
    (r"\bos\s*\.\s*system\s*\(", "Shell command execution via os.system() is not allowed"),
    (r"\bos\s*\.\s*popen\s*\(", "Shell piping via os.popen() is not allowed"),
];

const PYTHON_RULES: &[(&str, &str)] = &[
    (r"\bimportlib\b", "Dynamic import via importlib is not allowed"),
    (r"__builtins__", "Manipulating the builtins namespace is not allowed"),
    (r"\bimport\s+builtins\b|\bfrom\s+builtins\s+import\b", "Manipulating the builtins namespace is not allowed"),
    (r"\bos\s*\.\s*(exec|spawn)\w*\s*\(", "Process execution via os.exec*/os.spawn* is not allowed"),
    (r"\bos\s*\.\s*(fork|kill|killpg)\s*\(", "Process control via the os module is not allowed"),
    (
        r"\bfrom\s+os\s+import\b[^\n]*\b(system|popen|exec\w*|spawn\w*|fork|kill\w*)\b",
        "Importing process execution functions from os is not allowed",
    ),
    (r"\bpty\s*\.\s*spawn\s*\(", "Spawning a pseudo-terminal is not allowed"),
    (r"\bcommands\s*\.\s*getoutput\s*\(", "Shell command execution is not allowed"),
    (r"\bctypes\b", "Foreign function access via ctypes is not allowed"),
];

const JAVASCRIPT_RULES: &[(&str, &str)] = &[
    (r"\bimport\s*\(", "Dynamic import() is not allowed"),
    (r"\bnew\s+Function\s*\(", "Dynamic compilation via new Function() is not allowed"),
    (
        r#"\brequire\s*\(\s*['"](node:)?child_process['"]\s*\)"#,
        "Spawning subprocesses via child_process is not allowed",
    ),
    (
        r#"\bfrom\s+['"](node:)?child_process['"]"#,
        "Spawning subprocesses via child_process is not allowed",
    ),
    (r"\b(execSync|execFile|execFileSync|spawnSync)\s*\(", "Spawning subprocesses is not allowed"),
    (r"\bspawn\s*\(", "Spawning subprocesses is not allowed"),
    (
        r"\b(writeFile|writeFileSync|appendFile|appendFileSync|createWriteStream|rmSync|unlinkSync|rmdirSync)\s*\(",
        "Writing or deleting files via fs is not allowed",
    ),
    (
        r"\bfs\s*\.\s*(promises\s*\.\s*)?(rm|unlink|rmdir)\s*\(",
        "Writing or deleting files via fs is not allowed",
    ),
    (
        r#"['"](node:)?fs/promises['"]"#,
        "The promise-based fs API is not allowed",
    ),
    (r"\bprocess\s*\.\s*(binding|dlopen|kill)\s*\(", "Low-level process access is not allowed"),
    (r#"\brequire\s*\(\s*['"](node:)?vm['"]\s*\)"#, "Dynamic evaluation via the vm module is not allowed"),
];

/// Literal command denylist for shell scripts.
///
/// Shell metacharacters make regexes brittle here, so entries are plain
/// strings matched case-insensitively. An entry only matches where it starts
/// a word, so `sync ` does not trip the `nc ` entry.
#[derive(Debug, Clone, Copy)]
pub struct CommandDenylist {
    entries: &'static [(&'static str, &'static str)],
}

impl CommandDenylist {
    pub const fn shell() -> Self {
        Self {
            entries: SHELL_ENTRIES,
        }
    }

    pub fn check(&self, code: &str) -> Result<(), Violation> {
        let haystack = code.to_lowercase();
        match self
            .entries
            .iter()
            .find(|(literal, _)| contains_at_word_start(&haystack, literal))
        {
            Some((literal, reason)) => Err(Violation::new(format!("{reason} (matched '{literal}')"))),
            None => Ok(()),
        }
    }
}

const RECURSIVE_DELETE: &str = "Recursive or forced deletion is not allowed";
const RAW_DISK: &str = "Raw block-device writes are not allowed";
const DISK_FORMAT: &str = "Disk formatting and partitioning is not allowed";
const PRIVILEGE: &str = "Privilege escalation is not allowed";
const PERMISSIONS: &str = "Changing permissions or ownership is not allowed";
const NETWORK: &str = "Network utilities are not allowed";
const DEVICE_WRITE: &str = "Writing to device paths is not allowed";

const SHELL_ENTRIES: &[(&str, &str)] = &[
    ("rm -rf", RECURSIVE_DELETE),
    ("rm -fr", RECURSIVE_DELETE),
    ("rm -r", RECURSIVE_DELETE),
    ("rm -f", RECURSIVE_DELETE),
    ("rm --recursive", RECURSIVE_DELETE),
    ("rm --force", RECURSIVE_DELETE),
    ("dd if=", RAW_DISK),
    ("dd of=", RAW_DISK),
    ("mkfs", DISK_FORMAT),
    ("fdisk", DISK_FORMAT),
    ("sfdisk", DISK_FORMAT),
    ("parted", DISK_FORMAT),
    ("wipefs", DISK_FORMAT),
    ("format ", DISK_FORMAT),
    ("sudo", PRIVILEGE),
    ("su ", PRIVILEGE),
    ("doas ", PRIVILEGE),
    ("pkexec", PRIVILEGE),
    ("chmod", PERMISSIONS),
    ("chown", PERMISSIONS),
    ("chgrp", PERMISSIONS),
    ("setfacl", PERMISSIONS),
    ("wget", NETWORK),
    ("curl", NETWORK),
    ("nc ", NETWORK),
    ("ncat", NETWORK),
    ("netcat", NETWORK),
    ("socat", NETWORK),
    ("telnet", NETWORK),
    ("ssh", NETWORK),
    ("scp ", NETWORK),
    ("sftp", NETWORK),
    ("ftp ", NETWORK),
    ("rsync", NETWORK),
    ("tcpdump", NETWORK),
    ("nmap", NETWORK),
    ("/dev/tcp/", NETWORK),
    ("/dev/udp/", NETWORK),
    ("> /dev/", DEVICE_WRITE),
    (">/dev/", DEVICE_WRITE),
    ("of=/dev/", DEVICE_WRITE),
    ("tee /dev/", DEVICE_WRITE),
];

/// True if `needle` occurs in `haystack` at a position not preceded by a word
/// character. Needles that start with punctuation match anywhere.
fn contains_at_word_start(haystack: &str, needle: &str) -> bool {
    let needs_boundary = needle
        .chars()
        .next()
        .is_some_and(|c| c.is_alphanumeric() || c == '_');

    haystack.match_indices(needle).any(|(idx, _)| {
        !needs_boundary
            || haystack[..idx]
                .chars()
                .next_back()
                .map_or(true, |prev| !(prev.is_alphanumeric() || prev == '_' || prev == '-'))
    })
}
