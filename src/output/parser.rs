// src/output/parser.rs

//! Stateless extraction of structured fields from output lines.
//!
//! Parsers never fail: a line they do not understand yields an empty
//! [`Fields`] map.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use regex::Regex;
use tracing::debug;

use crate::errors::{Result, RunError};

/// Extracted field mapping, ordered by key.
pub type Fields = BTreeMap<String, String>;

/// A transform applied to the fields extracted from one line.
pub type FieldTransform = Box<dyn Fn(&mut Fields) + Send + Sync>;

/// Something that turns a raw output line into fields.
pub trait OutputParser: Send + Sync {
    fn parse(&self, line: &str) -> Fields;
}

static KV_TOKEN: LazyLock<std::result::Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"(?P<key>[A-Za-z_][A-Za-z0-9_.\-]*)=(?:\[(?P<bracketed>[^\]]*)\]|(?P<plain>[^\s\[\]]+))")
});

/// Parser for `key=[value]` and `key=value` tokens.
///
/// ```text
/// event=[downloading] completed=[3] total=[5]
/// ```
/// yields `{completed: "3", event: "downloading", total: "5"}`.
pub struct KvParser {
    trim_value: Vec<char>,
    aliases: HashMap<String, String>,
    post_processors: Vec<FieldTransform>,
}

impl fmt::Debug for KvParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvParser")
            .field("trim_value", &self.trim_value)
            .field("aliases", &self.aliases)
            .field("post_processors", &self.post_processors.len())
            .finish()
    }
}

impl Default for KvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl KvParser {
    pub fn new() -> Self {
        Self {
            trim_value: Vec::new(),
            aliases: HashMap::new(),
            post_processors: Vec::new(),
        }
    }

    /// Characters stripped from both ends of every value.
    pub fn with_trim_value(mut self, chars: &str) -> Self {
        self.trim_value = chars.chars().collect();
        self
    }

    /// Rename extracted keys (`from` → `to`).
    pub fn with_aliases(mut self, aliases: HashMap<String, String>) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn with_post_processor(mut self, transform: FieldTransform) -> Self {
        self.post_processors.push(transform);
        self
    }
}

impl OutputParser for KvParser {
    fn parse(&self, line: &str) -> Fields {
        let mut fields = Fields::new();

        let Ok(token) = KV_TOKEN.as_ref() else {
            return fields;
        };

        for caps in token.captures_iter(line) {
            let Some(key) = caps.name("key") else {
                continue;
            };
            let raw = caps
                .name("bracketed")
                .or_else(|| caps.name("plain"))
                .map(|m| m.as_str())
                .unwrap_or_default();

            let value = raw.trim_matches(|c| self.trim_value.contains(&c));
            let key = self
                .aliases
                .get(key.as_str())
                .cloned()
                .unwrap_or_else(|| key.as_str().to_string());
            fields.insert(key, value.to_string());
        }

        if !fields.is_empty() {
            for transform in &self.post_processors {
                transform(&mut fields);
            }
        }

        fields
    }
}

/// Parser driven by a regex with named capture groups.
///
/// Every named group that participates in the match becomes a field.
#[derive(Debug, Clone)]
pub struct RegexFieldParser {
    regex: Regex,
}

impl RegexFieldParser {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| RunError::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { regex })
    }
}

impl OutputParser for RegexFieldParser {
    fn parse(&self, line: &str) -> Fields {
        let mut fields = Fields::new();
        let Some(caps) = self.regex.captures(line) else {
            return fields;
        };
        for name in self.regex.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                fields.insert(name.to_string(), m.as_str().to_string());
            }
        }
        fields
    }
}

/// Parse `from=to` pairs into an alias table.
///
/// Entries without `=` are ignored.
pub fn parse_aliases<S: AsRef<str>>(pairs: &[S]) -> HashMap<String, String> {
    pairs
        .iter()
        .filter_map(|p| {
            let (from, to) = p.as_ref().split_once('=')?;
            let (from, to) = (from.trim(), to.trim());
            if from.is_empty() || to.is_empty() {
                return None;
            }
            Some((from.to_string(), to.to_string()))
        })
        .collect()
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

/// Normalise a date-time string to RFC 3339.
///
/// Values without an offset are taken as UTC. Returns `None` when no known
/// format matches.
pub fn normalize_date_time(value: &str) -> Option<String> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true));
    }
    NAIVE_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(value, fmt)
            .ok()
            .map(|naive| {
                Utc.from_utc_datetime(&naive)
                    .to_rfc3339_opts(SecondsFormat::AutoSi, true)
            })
    })
}

/// Post-processor rewriting `field` into canonical RFC 3339 form.
///
/// Unparseable values are left untouched.
pub fn iso_date_time(field: &str) -> FieldTransform {
    let field = field.to_string();
    Box::new(move |fields: &mut Fields| {
        let Some(raw) = fields.get(&field) else {
            return;
        };
        match normalize_date_time(raw) {
            Some(canonical) => {
                fields.insert(field.clone(), canonical);
            }
            None => debug!(field = %field, value = %raw, "unrecognised date-time value; kept as-is"),
        }
    })
}
