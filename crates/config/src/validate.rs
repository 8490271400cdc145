//! Configuration validation engine.
//!
//! Detects unknown or misspelled fields against the known schema, type
//! errors, and option combinations the receive loop would reject or handle
//! badly.

use std::{collections::HashMap, path::Path};

use {
    backbone_core::{AckBehavior, PartialConsumerBehavior, SequentialWait},
    serde_json::Value,
};

use crate::schema::BackboneConfig;

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
    /// Category: "syntax", "unknown-field", "type-error", "route",
    /// "consumer", "sqlite", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "consumer.batch_size"
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
    pub config_path: Option<std::path::PathBuf>,
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

// ── Schema tree for unknown-field detection ─────────────────────────────────

/// Represents the expected shape of the configuration schema.
enum KnownKeys {
    /// A struct with fixed field names.
    Struct(HashMap<&'static str, KnownKeys>),
    /// A map with dynamic keys whose values have a known shape.
    Map(Box<KnownKeys>),
    /// Scalar value, stop recursion.
    Leaf,
}

/// Build the full schema map mirroring every field in `schema.rs`.
fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Map, Struct};

    let route = || {
        Struct(HashMap::from([
            ("environment", Leaf),
            ("uri", Leaf),
            ("partition", Leaf),
            ("shard", Leaf),
        ]))
    };

    // `sequential_wait` is a tagged enum: `{ kind = "until", timeout_ms = 500 }`.
    let sequential_wait = || Struct(HashMap::from([("kind", Leaf), ("timeout_ms", Leaf)]));

    let consumer = || {
        Struct(HashMap::from([
            ("group", Leaf),
            ("consumer_name", Leaf),
            ("batch_size", Leaf),
            ("ack_behavior", Leaf),
            ("timeout_behavior", Leaf),
            ("ack_timeout_ms", Leaf),
            ("max_degree_of_parallelism", Leaf),
            ("partial_behavior", Leaf),
            ("multi_consumer", Leaf),
            ("origin_filter", Leaf),
            (
                "claiming",
                Struct(HashMap::from([
                    ("empty_batch_count", Leaf),
                    ("min_idle_ms", Leaf),
                ])),
            ),
            (
                "delay_when_empty",
                Struct(HashMap::from([
                    ("max_delay_ms", Leaf),
                    ("delay_factor", Leaf),
                ])),
            ),
            ("sequential_wait", sequential_wait()),
            ("telemetry", Leaf),
        ]))
    };

    Struct(HashMap::from([
        ("route", route()),
        ("producer", Struct(HashMap::from([("telemetry", Leaf)]))),
        ("consumer", consumer()),
        ("sqlite", Struct(HashMap::from([("url", Leaf)]))),
        (
            "metrics",
            Struct(HashMap::from([
                ("enabled", Leaf),
                ("labels", Map(Box::new(Leaf))),
            ])),
        ),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a_len = a.chars().count();
    let b_len = b.chars().count();
    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_len]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    let mut best: Option<(&'a str, usize)> = None;
    for &candidate in candidates {
        let d = levenshtein(needle, candidate);
        if d > 0 && d <= max_distance && best.as_ref().is_none_or(|(_, bd)| d < *bd) {
            best = Some((candidate, d));
        }
    }
    best.map(|(s, _)| s)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or discover the default config
/// file location if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(ref actual_path) = config_path else {
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

    let diagnostics = match crate::loader::load_config_value(actual_path) {
        Ok(value) => validate_value(&value),
        Err(e) => vec![Diagnostic::new(
            Severity::Error,
            "syntax",
            "",
            format!("failed to parse config file: {e}"),
        )],
    };
    ValidationResult {
        diagnostics,
        config_path,
    }
}

/// Validate an already parsed config tree.
fn validate_value(value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    // 1. Unknown fields, walking the tree against KnownKeys
    check_unknown_fields(value, &build_schema_map(), "", &mut diagnostics);

    // 2. Type check, then semantic checks on what parsed
    match serde_json::from_value::<BackboneConfig>(value.clone()) {
        Ok(config) => diagnostics.extend(validate_config(&config)),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }
    diagnostics
}

/// Walk the value tree against the schema tree and flag unknown keys.
fn check_unknown_fields(
    value: &Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let child_path = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        }
    };
    match (value, schema) {
        (Value::Object(table), KnownKeys::Struct(fields)) => {
            let known_keys: Vec<&str> = fields.keys().copied().collect();
            for (key, child_value) in table {
                let path = child_path(key);
                if let Some(child_schema) = fields.get(key.as_str()) {
                    check_unknown_fields(child_value, child_schema, &path, diagnostics);
                    continue;
                }
                let level = if prefix.is_empty() {
                    "at top level "
                } else {
                    ""
                };
                let msg = match suggest(key, &known_keys, 3) {
                    Some(s) => format!("unknown field {level}(did you mean \"{s}\"?)"),
                    None => format!("unknown field {level}"),
                };
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "unknown-field",
                    path,
                    msg.trim(),
                ));
            }
        },
        (Value::Object(table), KnownKeys::Map(value_schema)) => {
            for (key, child_value) in table {
                check_unknown_fields(child_value, value_schema, &child_path(key), diagnostics);
            }
        },
        // Leaf or type mismatch, type errors are caught later
        _ => {},
    }
}

/// Semantic checks on a parsed config.
#[must_use]
pub fn validate_config(config: &BackboneConfig) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let route = &config.route;

    if route.uri.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "route",
            "route.uri",
            "stream uri must not be empty",
        ));
    }
    for (field, value) in [
        ("environment", &route.environment),
        ("uri", &route.uri),
        ("partition", &route.partition),
        ("shard", &route.shard),
    ] {
        if value.contains(':') {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "route",
                format!("route.{field}"),
                "routing coordinates must not contain ':'",
            ));
        }
    }

    let opts = &config.consumer.options;
    if opts.batch_size == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "consumer",
            "consumer.batch_size",
            "batch_size must be at least 1",
        ));
    }
    if opts.max_degree_of_parallelism == Some(0) {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "consumer",
            "consumer.max_degree_of_parallelism",
            "max_degree_of_parallelism must be at least 1 when set",
        ));
    }
    if opts.delay_when_empty.max_delay.is_zero() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "consumer",
            "consumer.delay_when_empty.max_delay_ms",
            "max_delay of 0 makes an idle consumer poll the broker in a tight loop",
        ));
    }
    let factor = opts.delay_when_empty.delay_factor;
    if factor.is_nan() || factor < 1.0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "consumer",
            "consumer.delay_when_empty.delay_factor",
            format!(
                "delay_factor {factor} below 1.0 shrinks the delay between empty polls"
            ),
        ));
    }
    if opts.claiming.empty_batch_count == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "consumer",
            "consumer.claiming.empty_batch_count",
            "empty_batch_count of 0 runs a claim check after every empty fetch",
        ));
    }
    if opts.ack_behavior == AckBehavior::Manual && opts.ack_timeout.is_none() {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "consumer",
            "consumer.ack_timeout_ms",
            "manual ack without ack_timeout_ms: entries a handler forgets to ack stay pending until claimed",
        ));
    }
    if opts.sequential_wait != SequentialWait::NoWait
        && opts.partial_behavior != PartialConsumerBehavior::Sequential
    {
        diagnostics.push(Diagnostic::new(
            Severity::Info,
            "consumer",
            "consumer.sequential_wait",
            "sequential_wait only applies with partial_behavior = \"sequential\"",
        ));
    }

    if config
        .sqlite
        .url
        .as_deref()
        .is_some_and(|url| url.trim().is_empty())
    {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "sqlite",
            "sqlite.url",
            "sqlite.url is set but empty; remove it to use the in-memory log",
        ));
    }

    diagnostics
}
