//! Language registry
//!
//! Maps a language id (or one of its aliases) to the instructions needed to
//! run a snippet: where to write the source, which tools must be installed,
//! and the shell command that builds and runs it. The table is data, loaded
//! from `files/languages.toml` (embedded at build time) or from an override
//! file.
//!
//! The registry does NOT:
//! - Check whether tools are installed (the orchestrator does, per job)
//! - Execute anything
//! - Apply security policy

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::core::utils::shell_quote;

/// Source wrapper applied when none of the marker strings appear in the code
#[derive(Debug, Clone)]
pub struct EntryWrapper {
    /// Template with a single `{code}` placeholder
    pub template: String,
    pub skip_markers: Vec<String>,
}

/// Build and run instructions for one language
#[derive(Debug, Clone)]
pub struct LanguageSpec {
    /// Canonical language id
    pub id: String,
    /// Source suffix including the dot (e.g. ".py")
    pub suffix: String,
    /// File name the source is written to inside the workspace
    pub source_file: String,
    /// Binaries that must be on PATH, in the order they are checked
    pub tools: Vec<String>,
    /// Shell command template (`{src}`, `{work}`, `{code}`)
    pub command: String,
    /// Floor applied to the requested timeout, in seconds
    pub min_timeout_secs: u64,
    /// Mark the written source as executable
    pub executable: bool,
    pub wrapper: Option<EntryWrapper>,
    pub aliases: Vec<String>,
}

impl LanguageSpec {
    /// Path of the source file inside `work_dir`
    pub fn source_path(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(&self.source_file)
    }

    /// Source text to write, with the entry wrapper applied if needed
    pub fn prepare_source<'a>(&self, code: &'a str) -> Cow<'a, str> {
        match &self.wrapper {
            Some(wrapper) if !wrapper.skip_markers.iter().any(|m| code.contains(m.as_str())) => {
                Cow::Owned(wrapper.template.replace("{code}", code))
            }
            _ => Cow::Borrowed(code),
        }
    }

    /// Synthesize the shell command that builds and runs `source`.
    ///
    /// Every substituted value is shell-quoted. Pure: no I/O.
    pub fn command(&self, source: &Path, code: &str, work_dir: &Path) -> String {
        let src = source.to_string_lossy();
        let work = work_dir.to_string_lossy();
        // Templates are validated when the registry is loaded.
        render_template(&self.command, &|name| match name {
            "src" => Some(shell_quote(&src).into_owned()),
            "work" => Some(shell_quote(&work).into_owned()),
            "code" => Some(shell_quote(code).into_owned()),
            _ => None,
        })
        .unwrap_or_else(|_| self.command.clone())
    }

    /// Requested timeout raised to this language's floor
    pub fn effective_timeout(&self, requested_secs: u64) -> u64 {
        requested_secs.max(self.min_timeout_secs)
    }
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawLanguageConfig {
    suffix: String,
    source_file: Option<String>,
    #[serde(default)]
    tools: Vec<String>,
    command: String,
    #[serde(default)]
    min_timeout: u64,
    #[serde(default)]
    executable: bool,
    wrapper: Option<String>,
    #[serde(default)]
    wrapper_skip_markers: Vec<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Registry of supported languages, shared read-only between jobs
#[derive(Debug, Default)]
pub struct LanguageRegistry {
    specs: BTreeMap<String, Arc<LanguageSpec>>,
    aliases: HashMap<String, String>,
}

impl LanguageRegistry {
    /// Registry built from the embedded `files/languages.toml`
    pub fn builtin() -> Result<Self> {
        let content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));
        Self::from_toml_str(content).context("Invalid embedded language table")
    }

    /// Registry from an override file, or the embedded table when `path` is None
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let content = fs::read_to_string(path).with_context(|| {
                    format!("Failed to read language table {}", path.display())
                })?;
                Self::from_toml_str(&content)
                    .with_context(|| format!("Invalid language table {}", path.display()))
            }
            None => Self::builtin(),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw_configs: BTreeMap<String, RawLanguageConfig> = toml::from_str(content)?;

        let mut registry = Self::default();
        for (name, raw) in raw_configs {
            let id = name.to_lowercase();
            let spec = build_spec(&id, raw)?;
            registry.specs.insert(id, Arc::new(spec));
        }

        for spec in registry.specs.values() {
            for alias in &spec.aliases {
                let alias = alias.to_lowercase();
                if registry.specs.contains_key(&alias) {
                    bail!("Alias {} of {} shadows a language id", alias, spec.id);
                }
                if let Some(owner) = registry.aliases.insert(alias.clone(), spec.id.clone()) {
                    bail!("Alias {} claimed by both {} and {}", alias, owner, spec.id);
                }
            }
        }

        Ok(registry)
    }

    /// Canonical id for a language name or alias
    pub fn canonical_id(&self, language: &str) -> Option<&str> {
        let key = language.trim().to_lowercase();
        if let Some((id, _)) = self.specs.get_key_value(&key) {
            return Some(id.as_str());
        }
        self.aliases.get(&key).map(|id| id.as_str())
    }

    /// Look up a language by id or alias (case-insensitive)
    pub fn resolve(&self, language: &str) -> Option<Arc<LanguageSpec>> {
        let id = self.canonical_id(language)?;
        self.specs.get(id).cloned()
    }

    /// Canonical ids of every registered language
    pub fn available_languages(&self) -> BTreeSet<String> {
        self.specs.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

fn build_spec(id: &str, raw: RawLanguageConfig) -> Result<LanguageSpec> {
    if !raw.suffix.starts_with('.') || raw.suffix.len() < 2 {
        bail!("Invalid suffix for {}: {:?}", id, raw.suffix);
    }
    if !raw.command.contains("{src}") {
        bail!("Command for {} never references {{src}}", id);
    }
    render_template(&raw.command, &|name| {
        matches!(name, "src" | "work" | "code").then(String::new)
    })
    .map_err(|placeholder| {
        anyhow::anyhow!("Unknown placeholder {{{}}} in command for {}", placeholder, id)
    })?;

    let wrapper = match raw.wrapper {
        Some(template) if !template.contains("{code}") => {
            bail!("Wrapper for {} has no {{code}} placeholder", id)
        }
        Some(template) => Some(EntryWrapper {
            template,
            skip_markers: raw.wrapper_skip_markers,
        }),
        None => None,
    };

    let source_file = raw
        .source_file
        .unwrap_or_else(|| format!("main{}", raw.suffix));
    if source_file.contains('/') || source_file == ".." {
        bail!("Source file for {} must be a bare file name", id);
    }

    Ok(LanguageSpec {
        id: id.to_string(),
        suffix: raw.suffix,
        source_file,
        tools: raw.tools,
        command: raw.command,
        min_timeout_secs: raw.min_timeout,
        executable: raw.executable,
        wrapper,
        aliases: raw.aliases,
    })
}

/// Substitute `{name}` placeholders. Braces not enclosing an identifier are
/// copied through unchanged. Returns the first unknown placeholder name as the
/// error.
fn render_template(
    template: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let name_len = after
            .find(|c: char| !(c.is_ascii_lowercase() || c == '_'))
            .unwrap_or(after.len());

        if name_len > 0 && after[name_len..].starts_with('}') {
            let name = &after[..name_len];
            match lookup(name) {
                Some(value) => out.push_str(&value),
                None => return Err(name.to_string()),
            }
            rest = &after[name_len + 1..];
        } else {
            out.push('{');
            rest = after;
        }
    }
    out.push_str(rest);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_loads() {
        let registry = LanguageRegistry::builtin().unwrap();
        let languages = registry.available_languages();
        assert_eq!(registry.len(), 30);
        for id in ["python", "node", "bash", "c", "cpp", "java", "scala", "zig"] {
            assert!(languages.contains(id), "missing {}", id);
        }
        // Aliases are not listed as languages
        assert!(!languages.contains("py"));
    }

    #[test]
    fn test_resolve_alias_case_insensitive() {
        let registry = LanguageRegistry::builtin().unwrap();
        assert_eq!(registry.resolve("PY").unwrap().id, "python");
        assert_eq!(registry.resolve(" javascript ").unwrap().id, "node");
        assert_eq!(registry.resolve("c++").unwrap().id, "cpp");
        assert_eq!(registry.canonical_id("golang"), Some("go"));
        assert!(registry.resolve("brainfuck").is_none());
    }

    #[test]
    fn test_source_placement() {
        let registry = LanguageRegistry::builtin().unwrap();
        let work = Path::new("/tmp/ce-test");
        assert_eq!(
            registry.resolve("java").unwrap().source_path(work),
            PathBuf::from("/tmp/ce-test/Main.java")
        );
        assert_eq!(
            registry.resolve("python").unwrap().source_path(work),
            PathBuf::from("/tmp/ce-test/main.py")
        );
        assert_eq!(
            registry.resolve("make").unwrap().source_path(work),
            PathBuf::from("/tmp/ce-test/Makefile")
        );
    }

    #[test]
    fn test_command_quotes_paths() {
        let registry = LanguageRegistry::builtin().unwrap();
        let spec = registry.resolve("c").unwrap();
        let work = Path::new("/tmp/my work");
        let cmd = spec.command(&spec.source_path(work), "", work);
        assert_eq!(
            cmd,
            "gcc -O2 -s -o '/tmp/my work'/c.out '/tmp/my work/main.c' && '/tmp/my work'/c.out"
        );
    }

    #[test]
    fn test_scala_wrapper() {
        let registry = LanguageRegistry::builtin().unwrap();
        let spec = registry.resolve("scala").unwrap();
        let wrapped = spec.prepare_source("println(1)");
        assert!(wrapped.starts_with("object Main extends App {"));
        assert!(wrapped.contains("println(1)"));

        let explicit = "object Main { def main(a: Array[String]) = println(1) }";
        assert_eq!(spec.prepare_source(explicit), explicit);
    }

    #[test]
    fn test_effective_timeout_floor() {
        let registry = LanguageRegistry::builtin().unwrap();
        assert_eq!(registry.resolve("kotlin").unwrap().effective_timeout(5), 60);
        assert_eq!(registry.resolve("python").unwrap().effective_timeout(5), 5);
        assert_eq!(registry.resolve("c").unwrap().effective_timeout(3), 5);
    }

    #[test]
    fn test_custom_table_with_code_placeholder() {
        let registry = LanguageRegistry::from_toml_str(
            r#"
[inline]
suffix = ".txt"
command = "printf %s {code} > {src} && cat {src}"
aliases = ["in"]
"#,
        )
        .unwrap();
        let spec = registry.resolve("in").unwrap();
        let work = Path::new("/w");
        assert_eq!(
            spec.command(&spec.source_path(work), "a b", work),
            "printf %s 'a b' > /w/main.txt && cat /w/main.txt"
        );
    }

    #[test]
    fn test_rejects_unknown_placeholder() {
        let err = LanguageRegistry::from_toml_str(
            r#"
[bad]
suffix = ".x"
command = "run {src} {binary}"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("binary"));
    }

    #[test]
    fn test_rejects_alias_collision() {
        let result = LanguageRegistry::from_toml_str(
            r#"
[one]
suffix = ".a"
command = "cat {src}"
aliases = ["x"]

[two]
suffix = ".b"
command = "cat {src}"
aliases = ["x"]
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_literal_braces_pass_through() {
        let out = render_template("awk '{ print $1 }' {src}", &|name| {
            (name == "src").then(|| "f".to_string())
        })
        .unwrap();
        assert_eq!(out, "awk '{ print $1 }' f");
    }
}
