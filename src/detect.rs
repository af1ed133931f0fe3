//! Lexical language detection and language-name normalization.

use std::sync::OnceLock;

use regex::Regex;

pub const PYTHON: &str = "python";
pub const JAVASCRIPT: &str = "javascript";
pub const BASH: &str = "bash";

/// Priority order used when several fingerprint sets match.
pub const DETECTION_ORDER: [&str; 3] = [PYTHON, JAVASCRIPT, BASH];

/// Map a user-supplied language name or alias to its canonical identifier.
///
/// Unknown names are returned lowercased so the caller can still report them.
pub fn normalize_language(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    match lower.as_str() {
        "python" | "python3" | "py" => PYTHON.to_string(),
        "javascript" | "js" | "node" | "nodejs" => JAVASCRIPT.to_string(),
        "bash" | "sh" | "shell" | "zsh" => BASH.to_string(),
        _ => lower,
    }
}

/// Guess the language of `code`, or `None` if nothing recognizable is found.
///
/// A shebang naming a known interpreter wins outright. Otherwise fingerprint
/// sets are tried in [`DETECTION_ORDER`] and the first hit is returned.
pub fn detect_language(code: &str) -> Option<&'static str> {
    if let Some(language) = shebang_language(code) {
        return Some(language);
    }

    let sets = fingerprints();
    DETECTION_ORDER
        .iter()
        .zip(sets.iter())
        .find(|(_, patterns)| patterns.iter().any(|p| p.is_match(code)))
        .map(|(language, _)| *language)
}

/// Language named by a `#!` line at the very top of the snippet.
fn shebang_language(code: &str) -> Option<&'static str> {
    let first = code.trim_start_matches('\u{feff}').lines().next()?;
    let rest = first.strip_prefix("#!")?;

    let mut parts = rest.split_whitespace();
    let mut program = basename(parts.next()?);
    if program == "env" {
        program = basename(parts.find(|arg| !arg.starts_with('-'))?);
    }

    let stem = program.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.');
    match stem {
        "python" | "pypy" => Some(PYTHON),
        "node" | "nodejs" | "deno" | "bun" => Some(JAVASCRIPT),
        "bash" | "sh" | "dash" | "zsh" | "ksh" | "ash" => Some(BASH),
        _ => None,
    }
}

fn basename(path: &str) -> &str {
    path.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(path)
}

/// Compiled fingerprint sets, indexed like [`DETECTION_ORDER`].
fn fingerprints() -> &'static [Vec<Regex>; 3] {
    static SETS: OnceLock<[Vec<Regex>; 3]> = OnceLock::new();
    SETS.get_or_init(|| {
        let compile = |patterns: &[&str]| -> Vec<Regex> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p).unwrap_or_else(|e| panic!("invalid fingerprint {p:?}: {e}"))
                })
                .collect()
        };
        [
            compile(PYTHON_FINGERPRINTS),
            compile(JAVASCRIPT_FINGERPRINTS),
            compile(BASH_FINGERPRINTS),
        ]
    })
}

const PYTHON_FINGERPRINTS: &[&str] = &[
    r"(?m)^\s*def\s+\w+\s*\([^)]*\)\s*(->\s*[^:]+)?:\s*$",
    r"(?m)^\s*class\s+\w+\s*(\([^)]*\))?\s*:\s*$",
    r"(?m)^\s*import\s+[\w.]+(\s+as\s+\w+)?(\s*,\s*[\w.]+(\s+as\s+\w+)?)*\s*$",
    r"(?m)^\s*from\s+[\w.]+\s+import\s+",
    r"\bprint\s*\(",
    r"if\s+__name__\s*==",
    r"(?m)^\s*(elif\s+.+|else|try|finally|except.*|(for|while|if|with)\s+.+)\s*:\s*$",
];

const JAVASCRIPT_FINGERPRINTS: &[&str] = &[
    r"\bconsole\s*\.\s*(log|error|warn|info|debug)\s*\(",
    r"\bfunction\s*\w*\s*\([^)]*\)\s*\{",
    r"(?m)^\s*(const|let|var)\s+[\w$\[\]{}, ]+\s*=",
    r"=>",
    r#"\brequire\s*\(\s*['"]"#,
    r#"(?m)^\s*import\s+.+\s+from\s+['"]"#,
    r"\bmodule\.exports\b|\bprocess\.argv\b",
];

const BASH_FINGERPRINTS: &[&str] = &[
    r"(?m)^\s*echo\b",
    r"(?m)^\s*(if\s+\[|then\s*$|fi\s*$|do\s*$|done\s*$|esac\s*$)",
    r"(?m);\s*(then|do)\b",
    r"(?m)^\s*(ls|cd|pwd|cat|grep|export|mkdir|printf|sleep|date|whoami|uname|read|local|source)\b",
    r"\|\s*(grep|awk|sed|sort|uniq|wc|head|tail|xargs|cut|tr)\b",
    r"\$\(\s*\w+",
];
