//! Smoke run over the language table
//!
//! Runs a hello-world snippet per language through the executor and reports
//! which toolchains work, which are missing and which fail.

use std::env;

use serde::Serialize;
use tracing::info;

use crate::app::Executor;
use crate::config::{env_parse, parse_list};
use crate::core::{ExecutionRequest, Mode};

/// (language, code, expected output fragment)
const SNIPPETS: &[(&str, &str, &str)] = &[
    ("python", "print(\"hello python\")\n", "hello python"),
    ("node", "console.log(\"hello node\");\n", "hello node"),
    ("bash", "echo \"hello bash\"\n", "hello bash"),
    (
        "c",
        "#include <stdio.h>\nint main(void) { puts(\"hello c\"); return 0; }\n",
        "hello c",
    ),
    (
        "cpp",
        "#include <iostream>\nint main() { std::cout << \"hello cpp\" << std::endl; }\n",
        "hello cpp",
    ),
    (
        "java",
        "public class Main { public static void main(String[] a) { System.out.println(\"hello java\"); } }\n",
        "hello java",
    ),
    (
        "go",
        "package main\nimport \"fmt\"\nfunc main() { fmt.Println(\"hello go\") }\n",
        "hello go",
    ),
    ("rust", "fn main() { println!(\"hello rust\"); }\n", "hello rust"),
    ("sql", "SELECT 'hello sql';\n", "hello sql"),
    ("ruby", "puts \"hello ruby\"\n", "hello ruby"),
    ("php", "<?php echo \"hello php\\n\";\n", "hello php"),
    ("r", "cat(\"hello r\\n\")\n", "hello r"),
    ("lua", "print(\"hello lua\")\n", "hello lua"),
    ("perl", "print \"hello perl\\n\";\n", "hello perl"),
    ("tcl", "puts \"hello tcl\"\n", "hello tcl"),
    ("awk", "BEGIN { print \"hello awk\" }\n", "hello awk"),
    ("sed", "s/.*/hello sed/\n", "hello sed"),
    ("make", "all:\n\t@echo hello make\n", "hello make"),
    ("bc", "print \"hello bc\\n\"\n", "hello bc"),
    ("kotlin", "fun main() { println(\"hello kotlin\") }\n", "hello kotlin"),
    ("scala", "println(\"hello scala\")\n", "hello scala"),
    ("haskell", "main = putStrLn \"hello haskell\"\n", "hello haskell"),
    ("ocaml", "print_endline \"hello ocaml\";;\n", "hello ocaml"),
    ("dart", "void main() { print('hello dart'); }\n", "hello dart"),
    (
        "fortran",
        "program hello\n  print *, 'hello fortran'\nend program hello\n",
        "hello fortran",
    ),
    (
        "pascal",
        "program Hello;\nbegin\n  writeln('hello pascal');\nend.\n",
        "hello pascal",
    ),
    (
        "ada",
        "with Ada.Text_IO;\nprocedure Main is\nbegin\n   Ada.Text_IO.Put_Line (\"hello ada\");\nend Main;\n",
        "hello ada",
    ),
    (
        "cobol",
        "       IDENTIFICATION DIVISION.\n       PROGRAM-ID. HELLO.\n       PROCEDURE DIVISION.\n           DISPLAY \"hello cobol\".\n           STOP RUN.\n",
        "hello cobol",
    ),
    (
        "zig",
        "const std = @import(\"std\");\npub fn main() void {\n    std.debug.print(\"hello zig\\n\", .{});\n}\n",
        "hello zig",
    ),
    (
        "typescript",
        "const msg: string = \"hello typescript\";\nconsole.log(msg);\n",
        "hello typescript",
    ),
];

/// Hello-world snippet and expected output fragment for a language
pub fn snippet(language: &str) -> Option<(&'static str, &'static str)> {
    SNIPPETS
        .iter()
        .find(|(id, _, _)| *id == language)
        .map(|(_, code, expected)| (*code, *expected))
}

#[derive(Debug, Clone)]
pub struct SmokeOptions {
    /// Only these languages (None: every registered language)
    pub languages: Option<Vec<String>>,
    pub skip: Vec<String>,
    pub timeout: i64,
    pub memory_mb: i64,
}

impl Default for SmokeOptions {
    fn default() -> Self {
        Self {
            languages: None,
            skip: Vec::new(),
            timeout: 20,
            memory_mb: 256,
        }
    }
}

impl SmokeOptions {
    /// Read `SMOKE_LANGS`, `SMOKE_SKIP`, `SMOKE_TIMEOUT` and `SMOKE_MEM_MB`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            languages: env::var("SMOKE_LANGS")
                .ok()
                .map(|raw| parse_list(&raw))
                .filter(|langs| !langs.is_empty()),
            skip: env::var("SMOKE_SKIP")
                .map(|raw| parse_list(&raw))
                .unwrap_or_default(),
            timeout: env_parse("SMOKE_TIMEOUT", defaults.timeout),
            memory_mb: env_parse("SMOKE_MEM_MB", defaults.memory_mb),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SmokeStatus {
    Pass,
    Fail,
    Missing,
    NoSnippet,
}

#[derive(Debug, Clone, Serialize)]
pub struct SmokeEntry {
    pub language: String,
    pub status: SmokeStatus,
    pub exit_code: Option<i32>,
    pub mode: Option<Mode>,
    pub time_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SmokeSummary {
    pub passed: usize,
    pub failed: usize,
    pub missing: usize,
    pub entries: Vec<SmokeEntry>,
}

impl SmokeSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Run every selected language once, sequentially
pub async fn run_smoke(executor: &Executor, options: &SmokeOptions) -> SmokeSummary {
    let languages: Vec<String> = match &options.languages {
        Some(langs) => langs.clone(),
        None => executor.languages().into_iter().collect(),
    };

    let mut summary = SmokeSummary::default();
    for language in languages.iter().filter(|l| !options.skip.contains(*l)) {
        let entry = match snippet(language) {
            Some((code, expected)) => {
                let request = ExecutionRequest::new(language.as_str(), code)
                    .with_timeout(options.timeout)
                    .with_memory_mb(options.memory_mb);
                let result = executor.submit(&request).await;
                let output_ok =
                    result.stdout.contains(expected) || result.stderr.contains(expected);
                let status = match result.mode {
                    Mode::ToolMissing => SmokeStatus::Missing,
                    Mode::Executed if result.ok && output_ok => SmokeStatus::Pass,
                    _ => SmokeStatus::Fail,
                };
                SmokeEntry {
                    language: language.clone(),
                    status,
                    exit_code: Some(result.exit_code),
                    mode: Some(result.mode),
                    time_ms: result.time_ms,
                }
            }
            None => SmokeEntry {
                language: language.clone(),
                status: SmokeStatus::NoSnippet,
                exit_code: None,
                mode: None,
                time_ms: 0,
            },
        };

        info!(
            language = %entry.language,
            status = ?entry.status,
            time_ms = entry.time_ms,
            "Smoke result"
        );
        match entry.status {
            SmokeStatus::Pass => summary.passed += 1,
            SmokeStatus::Fail => summary.failed += 1,
            SmokeStatus::Missing => summary.missing += 1,
            SmokeStatus::NoSnippet => {}
        }
        summary.entries.push(entry);
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::LanguageRegistry;
    use crate::security::InputValidator;

    #[test]
    fn test_every_language_has_a_snippet() {
        let registry = LanguageRegistry::builtin().unwrap();
        for language in registry.available_languages() {
            assert!(snippet(&language).is_some(), "no snippet for {}", language);
        }
    }

    #[test]
    fn test_snippets_pass_validation() {
        let validator = InputValidator::default();
        for (language, code, _) in SNIPPETS {
            let verdict = validator.validate(language, code, 1);
            assert!(verdict.accepted, "{}: {}", language, verdict.reason);
        }
    }

    #[tokio::test]
    async fn test_smoke_bash_only() {
        let root = tempfile::tempdir().unwrap();
        let config = crate::config::Config {
            workspace_root: root.path().to_path_buf(),
            audit_path: root.path().join("audit.jsonl"),
            ..Default::default()
        };
        let executor = Executor::from_config(&config).unwrap();
        let options = SmokeOptions {
            languages: Some(vec!["bash".into(), "nonexistent".into()]),
            ..Default::default()
        };
        let summary = run_smoke(&executor, &options).await;
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.entries.len(), 2);
        assert_eq!(summary.entries[1].status, SmokeStatus::NoSnippet);
        assert!(summary.is_success());
    }
}
