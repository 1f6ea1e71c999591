//! Input validation
//!
//! Syntactic screening of submissions: whitelist, size limits and regex
//! denylists. This is a coarse filter in front of the execution backend and
//! is trivially bypassable by obfuscation; it is not an isolation boundary.

use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};

/// Validator limits and switches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorConfig {
    pub max_code_bytes: usize,
    pub max_lines: usize,
    pub max_blocks: usize,
    pub allow_network: bool,
    /// Canonical language ids allowed; empty means every language
    pub language_whitelist: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_code_bytes: 65536,
            max_lines: 1200,
            max_blocks: 20,
            allow_network: false,
            language_whitelist: Vec::new(),
        }
    }
}

/// Outcome of validating one submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub accepted: bool,
    /// Why the submission was rejected (empty when accepted)
    pub reason: String,
}

impl Verdict {
    pub fn accept() -> Self {
        Self {
            accepted: true,
            reason: String::new(),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
        }
    }
}

struct DenyRule {
    regex: Regex,
    label: &'static str,
}

fn compile(pattern: &str, label: &'static str) -> DenyRule {
    DenyRule {
        regex: RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .unwrap_or_else(|e| panic!("invalid built-in pattern {}: {}", label, e)),
        label,
    }
}

fn global_rules() -> &'static [DenyRule] {
    static RULES: OnceLock<Vec<DenyRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            compile(
                r"\b(base64\s*\.\s*b64decode|marshal\.loads|pickle\.loads)\b",
                "obfuscated payload decoding",
            ),
            compile(r"\b(eval|exec)\s*\(", "dynamic code evaluation"),
        ]
    })
}

fn python_rules() -> &'static [DenyRule] {
    static RULES: OnceLock<Vec<DenyRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            compile(
                r"\b(os|sys|subprocess|socket|fcntl|resource|pty|shlex|ctypes)\b",
                "python system module",
            ),
            compile(r#"\bopen\s*\(\s*['"]/etc/"#, "python read of /etc"),
        ]
    })
}

fn node_rules() -> &'static [DenyRule] {
    static RULES: OnceLock<Vec<DenyRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![compile(
            r#"\brequire\s*\(\s*['"](child_process|fs|net|dgram|tls|vm)['"]\s*\)"#,
            "node system module",
        )]
    })
}

fn shell_rules() -> &'static [DenyRule] {
    static RULES: OnceLock<Vec<DenyRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            compile(r";\s*(curl|wget)\b", "shell download"),
            compile(
                r"\b(exec|sudo|setfacl|mount|insmod|modprobe)\b",
                "shell privileged command",
            ),
        ]
    })
}

fn network_rules() -> &'static [DenyRule] {
    static RULES: OnceLock<Vec<DenyRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![compile(
            r"\b(socket|requests|urllib|fetch|http\.|https\.)\b",
            "network access",
        )]
    })
}

fn language_rules(language: &str) -> &'static [DenyRule] {
    match language {
        "python" | "py" | "python3" => python_rules(),
        "node" | "javascript" | "js" => node_rules(),
        "bash" | "sh" | "shell" => shell_rules(),
        _ => &[],
    }
}

/// Stateless submission validator
#[derive(Debug, Clone, Default)]
pub struct InputValidator {
    config: ValidatorConfig,
}

impl InputValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Whitelist check alone
    pub fn check_language(&self, language: &str) -> Verdict {
        let language = language.trim().to_lowercase();
        let whitelist = &self.config.language_whitelist;
        if !whitelist.is_empty() && language != "auto" && !whitelist.contains(&language) {
            return Verdict::reject(format!("language not allowed: {:?}", language));
        }
        Verdict::accept()
    }

    /// Validate a submission. Checks run in a fixed order and the first
    /// failure decides the reason.
    pub fn validate(&self, language: &str, code: &str, block_count: usize) -> Verdict {
        let verdict = self.check_language(language);
        if !verdict.accepted {
            return verdict;
        }

        if block_count > self.config.max_blocks {
            return Verdict::reject(format!(
                "too many code blocks: {} > {}",
                block_count, self.config.max_blocks
            ));
        }

        if code.len() > self.config.max_code_bytes {
            return Verdict::reject(format!(
                "code too large: {} bytes > {}",
                code.len(),
                self.config.max_code_bytes
            ));
        }

        let lines = code.matches('\n').count() + 1;
        if lines > self.config.max_lines {
            return Verdict::reject(format!(
                "too many lines: {} > {}",
                lines, self.config.max_lines
            ));
        }

        if let Some(rule) = first_match(global_rules(), code) {
            return Verdict::reject(format!("forbidden pattern ({})", rule.label));
        }

        let language = language.trim().to_lowercase();
        if let Some(rule) = first_match(language_rules(&language), code) {
            return Verdict::reject(format!("forbidden pattern for {} ({})", language, rule.label));
        }

        if !self.config.allow_network {
            if let Some(rule) = first_match(network_rules(), code) {
                return Verdict::reject(format!("{} is disabled", rule.label));
            }
        }

        Verdict::accept()
    }
}

fn first_match<'a>(rules: &'a [DenyRule], code: &str) -> Option<&'a DenyRule> {
    rules.iter().find(|rule| rule.regex.is_match(code))
}
