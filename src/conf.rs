//! Compiler configuration and file resolution.
//!
//! The configuration is an explicit value constructed at program start and
//! handed to [`PyreParser`](crate::PyreParser); there is no process-global
//! state. The CLI layers an optional TOML file over [`Config::default`].

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ParseError;

/// Policy and packet counters attached to a chain declaration, rendered as
/// a `:<chain> <policy> <counters>` header line on commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainPolicy {
    pub policy: String,
    pub counters: String,
}

impl ChainPolicy {
    pub fn new(policy: &str, counters: &str) -> ChainPolicy {
        ChainPolicy {
            policy: policy.to_string(),
            counters: counters.to_string(),
        }
    }
}

impl Default for ChainPolicy {
    fn default() -> ChainPolicy {
        ChainPolicy::new("ACCEPT", "[0:0]")
    }
}

/// The chains iptables pre-creates for `table`, in the order they are
/// declared in a restore file, each with the default `ACCEPT [0:0]` policy.
/// Unknown tables have no default chains.
pub fn default_chains(table: &str) -> Vec<(String, ChainPolicy)> {
    let chains: &[&str] = match table {
        "filter" => &["INPUT", "FORWARD", "OUTPUT"],
        "nat" => &["PREROUTING", "INPUT", "OUTPUT", "POSTROUTING"],
        _ => &[],
    };
    chains
        .iter()
        .map(|name| (name.to_string(), ChainPolicy::default()))
        .collect()
}

/// What kind of rules an imported file contains.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum FileKind {
    /// Pyre source, parsed recursively.
    Pyre,
    /// Raw `iptables-restore` lines, appended to the IPv4 cache.
    Ip4,
    /// Raw `ip6tables-restore` lines, appended to the IPv6 cache.
    Ip6,
}

impl FileKind {
    /// Maps a filename extension (with leading dot) to a file kind.
    pub fn from_extension(ext: &str) -> Option<FileKind> {
        match ext {
            ".pyre" => Some(FileKind::Pyre),
            ".v4" => Some(FileKind::Ip4),
            ".v6" => Some(FileKind::Ip6),
            _ => None,
        }
    }

    /// Maps an explicit `@import` type argument to a file kind.
    pub fn from_name(name: &str) -> Option<FileKind> {
        match name {
            "pyre" => Some(FileKind::Pyre),
            "ip4" => Some(FileKind::Ip4),
            "ip6" => Some(FileKind::Ip6),
            _ => None,
        }
    }
}

/// Compiler configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directories searched, in order, when resolving `@import` targets and
    /// CLI file arguments. The current working directory takes priority.
    pub search_dirs: Vec<PathBuf>,

    /// Extensions tried when a name does not resolve as given. The empty
    /// extension is always tried.
    pub search_extensions: Vec<String>,

    /// Table assumed before any `@table` directive.
    pub default_table: String,

    /// When set, unknown keywords and invalid ports abort the parse instead
    /// of degrading to warnings.
    pub strict: bool,
}

impl Default for Config {
    fn default() -> Config {
        let mut search_dirs = Vec::new();
        if let Ok(cwd) = env::current_dir() {
            search_dirs.push(cwd);
        }
        search_dirs.push(PathBuf::from("/etc/pyrewall"));
        search_dirs.push(PathBuf::from("/usr/local/etc/pyrewall"));
        if let Some(home) = env::var_os("HOME") {
            search_dirs.push(Path::new(&home).join(".pyrewall"));
        }

        Config {
            search_dirs,
            search_extensions: vec![
                String::new(),
                ".pyre".to_string(),
                ".v4".to_string(),
                ".v6".to_string(),
            ],
            default_table: "filter".to_string(),
            strict: false,
        }
    }
}

/// Locates `name` within `paths`.
///
/// An absolute `name` is returned as-is if it exists. Otherwise every
/// extension in `extensions` (the empty extension is appended when missing)
/// is tried against every path in order; the first match wins. Extensions
/// attach to the final path segment, so relative names like
/// `conf.d/web` resolve to `conf.d/web.pyre`.
pub fn find_file(name: &str, paths: &[PathBuf], extensions: &[String]) -> Result<PathBuf, ParseError> {
    let candidate = Path::new(name);
    if candidate.is_absolute() {
        if candidate.is_file() {
            return Ok(candidate.to_path_buf());
        }
        return Err(ParseError::FileNotFound(name.to_string()));
    }

    let mut extensions: Vec<&str> = extensions.iter().map(String::as_str).collect();
    if !extensions.iter().any(|ext| ext.is_empty()) {
        extensions.push("");
    }

    for ext in extensions {
        let relative = format!("{}{}", name, ext);
        for dir in paths {
            let path = dir.join(&relative);
            if path.is_file() {
                return Ok(path);
            }
        }
    }

    Err(ParseError::FileNotFound(name.to_string()))
}
