//! Configuration validation.
//!
//! Checks a config file for syntax errors, unknown or misspelled fields,
//! type errors and option combinations environments would reject.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use serde_json::Value;

use crate::{
    loader::{find_config_file, parse_config_value},
    schema::PixelgymConfig,
};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "semantic",
    /// "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "env.port_range"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

/// Expected shape of the configuration.
enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    Leaf,
}

/// Mirror of every field in `schema.rs`.
fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Struct};

    let env = Struct(HashMap::from([
        ("custom_image", Leaf),
        ("games_dir", Leaf),
        ("devtools_host", Leaf),
        ("game_host", Leaf),
        ("compression", Leaf),
        ("compression_quality", Leaf),
        ("call_timeout_secs", Leaf),
        ("connect_attempts", Leaf),
        ("connect_interval_ms", Leaf),
        ("port_range", Leaf),
    ]));
    let run = Struct(HashMap::from([
        ("episodes", Leaf),
        ("max_steps", Leaf),
        ("step_ms", Leaf),
        ("save_dir", Leaf),
    ]));

    Struct(HashMap::from([
        ("spec_catalog", Leaf),
        ("env", env),
        ("run", run),
    ]))
}

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|&c| (c, levenshtein(needle, c)))
        .filter(|&(_, d)| d > 0 && d <= max_distance)
        .min_by_key(|&(_, d)| d)
        .map(|(c, _)| c)
}

/// Validate a config file at the given path, or the discovered config file
/// if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let Some(config_path) = path.map(Path::to_path_buf).or_else(find_config_file) else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "file-ref",
                "",
                "no config file found; using defaults",
            )],
            config_path: None,
        };
    };

    let mut result = match std::fs::read_to_string(&config_path) {
        Ok(content) => {
            let content = crate::env_subst::substitute_env(&content);
            validate_str(&content, &config_path)
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read config file: {e}"),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(config_path);
    result
}

/// Validate config text without touching the file system, except for
/// checks on paths the config refers to. The format follows `path`'s
/// extension.
#[must_use]
pub fn validate_str(raw: &str, path: &Path) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let value = match parse_config_value(raw, path) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("syntax error: {e}"),
            ));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unknown_fields(&value, &build_schema_map(), "", &mut diagnostics);

    match serde_json::from_value::<PixelgymConfig>(value.clone()) {
        Ok(config) => {
            check_semantics(&config, &value, &mut diagnostics);
            check_file_references(&config, &mut diagnostics);
        },
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(
    value: &Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (Value::Object(map), KnownKeys::Struct(fields)) = (value, schema) else {
        return;
    };
    let known: Vec<&str> = fields.keys().copied().collect();
    for (key, child) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match fields.get(key.as_str()) {
            Some(child_schema) => check_unknown_fields(child, child_schema, &path, diagnostics),
            None => {
                let message = match suggest(key, &known, 3) {
                    Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                    None => "unknown field".to_string(),
                };
                diagnostics.push(Diagnostic::new(Severity::Error, "unknown-field", path, message));
            },
        }
    }
}

fn check_semantics(config: &PixelgymConfig, raw: &Value, diagnostics: &mut Vec<Diagnostic>) {
    let env = &config.env;
    let semantic_error = |path: &str, message: &str| {
        Diagnostic::new(Severity::Error, "semantic", path, message)
    };

    match (&env.devtools_host, &env.game_host) {
        (Some(_), None) => diagnostics.push(semantic_error(
            "env.game_host",
            "game_host is required when devtools_host is set",
        )),
        (None, Some(_)) => diagnostics.push(semantic_error(
            "env.game_host",
            "game_host has no effect without devtools_host",
        )),
        _ => {},
    }
    if env.devtools_host.is_some() && (env.custom_image.is_some() || env.games_dir.is_some()) {
        diagnostics.push(semantic_error(
            "env.devtools_host",
            "devtools_host cannot be combined with custom_image or games_dir",
        ));
    }

    if env.compression_quality > 100 {
        diagnostics.push(semantic_error(
            "env.compression_quality",
            "compression_quality must be between 0 and 100",
        ));
    }
    let quality_set = raw.pointer("/env/compression_quality").is_some();
    if quality_set && !env.compression {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "semantic",
            "env.compression_quality",
            "compression_quality is ignored unless compression = true",
        ));
    }

    if env.call_timeout_secs == 0 {
        diagnostics.push(semantic_error(
            "env.call_timeout_secs",
            "call_timeout_secs must be positive",
        ));
    }
    if env.connect_attempts == 0 {
        diagnostics.push(semantic_error(
            "env.connect_attempts",
            "connect_attempts must be at least 1",
        ));
    }

    match parse_port_range(&env.port_range) {
        None => diagnostics.push(semantic_error(
            "env.port_range",
            "port_range must look like \"9000-9999\"",
        )),
        // Each sandbox publishes two ports.
        Some((low, high)) if high - low < 1 => diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "semantic",
            "env.port_range",
            "port_range leaves room for fewer than one sandbox",
        )),
        Some(_) => {},
    }

    if let Some(dir) = &env.games_dir
        && dir.to_string_lossy().contains(':')
    {
        diagnostics.push(semantic_error(
            "env.games_dir",
            "games_dir cannot contain ':' (it is passed to docker -v)",
        ));
    }

    if config.run.episodes == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "semantic",
            "run.episodes",
            "episodes = 0 runs nothing",
        ));
    }
}

fn parse_port_range(range: &str) -> Option<(u16, u16)> {
    let (low, high) = range.split_once('-')?;
    let low: u16 = low.trim().parse().ok()?;
    let high: u16 = high.trim().parse().ok()?;
    (low > 0 && low <= high).then_some((low, high))
}

fn check_file_references(config: &PixelgymConfig, diagnostics: &mut Vec<Diagnostic>) {
    if let Some(catalog) = &config.spec_catalog
        && !catalog.is_file()
    {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "file-ref",
            "spec_catalog",
            format!("spec catalog not found: {}", catalog.display()),
        ));
    }
    if let Some(dir) = &config.env.games_dir
        && !dir.is_dir()
    {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "file-ref",
            "env.games_dir",
            format!("games directory not found: {}", dir.display()),
        ));
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn check_toml(raw: &str) -> ValidationResult {
        validate_str(raw, Path::new("pixelgym.toml"))
    }

    fn find<'a>(result: &'a ValidationResult, path: &str) -> &'a Diagnostic {
        result
            .diagnostics
            .iter()
            .find(|d| d.path == path)
            .unwrap_or_else(|| panic!("no diagnostic for {path}: {:?}", result.diagnostics))
    }

    #[test]
    fn levenshtein_distances() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("port_range", "port_range"), 0);
        assert_eq!(levenshtein("port_rnage", "port_range"), 2);
        assert_eq!(levenshtein("compresion", "compression"), 1);
    }

    #[test]
    fn empty_config_is_clean() {
        let result = check_toml("");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn syntax_error_stops_validation() {
        let result = check_toml("[env\ncompression = true");
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].category, "syntax");
        assert!(result.has_errors());
    }

    #[test]
    fn unknown_nested_key_with_suggestion() {
        let result = check_toml("[env]\ncompresion = true\n");
        let d = find(&result, "env.compresion");
        assert_eq!(d.category, "unknown-field");
        assert!(d.message.contains("\"compression\""), "{}", d.message);
    }

    #[test]
    fn unknown_top_level_key() {
        let result = check_toml("[envs]\n");
        let d = find(&result, "envs");
        assert_eq!(d.severity, Severity::Error);
        assert!(d.message.contains("\"env\""));
    }

    #[test]
    fn type_errors_are_reported() {
        let result = check_toml("[env]\ncompression_quality = \"high\"\n");
        assert!(result.diagnostics.iter().any(|d| d.category == "type-error"));
    }

    #[test]
    fn devtools_host_needs_game_host() {
        let result = check_toml("[env]\ndevtools_host = \"localhost:9222\"\n");
        assert_eq!(find(&result, "env.game_host").severity, Severity::Error);
    }

    #[test]
    fn devtools_host_excludes_image() {
        let result = check_toml(
            "[env]\ndevtools_host = \"localhost:9222\"\ngame_host = \"localhost:8080\"\ncustom_image = \"x\"\n",
        );
        assert!(find(&result, "env.devtools_host").message.contains("cannot be combined"));
    }

    #[test]
    fn quality_rules() {
        let result = check_toml("[env]\ncompression = true\ncompression_quality = 120\n");
        assert_eq!(find(&result, "env.compression_quality").severity, Severity::Error);

        let result = check_toml("[env]\ncompression_quality = 50\n");
        let d = find(&result, "env.compression_quality");
        assert_eq!(d.severity, Severity::Warning);
        assert!(!result.has_errors());
    }

    #[test]
    fn port_range_rules() {
        let result = check_toml("[env]\nport_range = \"9999-9000\"\n");
        assert_eq!(find(&result, "env.port_range").severity, Severity::Error);

        let result = check_toml("[env]\nport_range = \"9000-9000\"\n");
        assert_eq!(find(&result, "env.port_range").severity, Severity::Warning);
    }

    #[test]
    fn yaml_is_validated_too() {
        let result = validate_str("env:\n  conect_attempts: 3\n", Path::new("pixelgym.yaml"));
        assert!(find(&result, "env.conect_attempts").message.contains("connect_attempts"));
    }

    #[test]
    fn missing_files_are_warnings() {
        let result = check_toml(
            "spec_catalog = \"/nonexistent/specs.json\"\n[env]\ngames_dir = \"/nonexistent/games\"\n",
        );
        assert_eq!(find(&result, "spec_catalog").category, "file-ref");
        assert_eq!(find(&result, "env.games_dir").severity, Severity::Warning);
        assert!(!result.has_errors());
    }

    #[test]
    fn validate_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixelgym.toml");
        std::fs::write(&path, "[env]\nconnect_attempts = 0\n").unwrap();
        let result = validate(Some(&path));
        assert_eq!(result.config_path.as_deref(), Some(path.as_path()));
        assert_eq!(result.count(Severity::Error), 1);
    }
}
