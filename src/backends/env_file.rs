//! Environment store persisted to an env file
//!
//! The file uses `KEY="value"` lines with backslash, double quote, CR and LF
//! escaped, so every value occupies exactly one line. The whole file is
//! rewritten on each `set` so it always reflects the store.
//!
//! A store can also carry a base environment (normally the provisioner's own
//! process environment, i.e. the base image). `get` falls back to it so that
//! `${VAR}` expansion sees inherited values; base values are never written to
//! the file.

use crate::capabilities::{EnvSnapshot, EnvironmentStore};
use crate::error::{ProvisionError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct FileEnvStore {
    path: Option<PathBuf>,
    vars: EnvSnapshot,
    base: EnvSnapshot,
}

impl FileEnvStore {
    /// A store that only lives in memory for this run
    pub fn ephemeral() -> Self {
        Self::default()
    }

    /// Open a store backed by `path`, seeding it from the file if present
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let vars = match fs::read_to_string(&path) {
            Ok(content) => parse_env_file(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => EnvSnapshot::new(),
            Err(e) => return Err(ProvisionError::from_io(&path, e)),
        };
        debug!("Loaded {} variable(s) from {}", vars.len(), path.display());
        Ok(Self {
            path: Some(path),
            vars,
            base: EnvSnapshot::new(),
        })
    }

    /// Fall back to `base` for variables the store has not seen
    pub fn with_base(mut self, base: EnvSnapshot) -> Self {
        self.base = base;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ProvisionError::from_io(path, e))?;
        }
        fs::write(path, render_env_file(&self.vars)).map_err(|e| ProvisionError::from_io(path, e))
    }
}

impl EnvironmentStore for FileEnvStore {
    fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .or_else(|| self.base.get(key))
            .map(String::as_str)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.vars.insert(key.to_string(), value.to_string());
        self.persist()
    }

    fn vars(&self) -> EnvSnapshot {
        self.vars.clone()
    }
}

/// Render variables as `KEY="value"` lines
pub fn render_env_file(vars: &EnvSnapshot) -> String {
    let mut out = String::new();
    for (key, value) in vars {
        out.push_str(key);
        out.push_str("=\"");
        for c in value.chars() {
            match c {
                '"' | '\\' => {
                    out.push('\\');
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                _ => out.push(c),
            }
        }
        out.push_str("\"\n");
    }
    out
}

/// Parse an env file. Accepts `KEY=value`, `KEY="value"`, `KEY='value'` and an
/// optional `export ` prefix; blank lines and `#` comments are skipped.
pub fn parse_env_file(content: &str) -> EnvSnapshot {
    let mut vars = EnvSnapshot::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, raw)) = line.split_once('=') else {
            warn!("Ignoring malformed env line {}: {:?}", lineno + 1, line);
            continue;
        };
        vars.insert(key.trim().to_string(), unquote(raw.trim()));
    }
    vars
}

fn unquote(raw: &str) -> String {
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return raw[1..raw.len() - 1].to_string();
    }
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        let inner = &raw[1..raw.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some(next) => out.push(next),
                    None => {}
                }
            } else {
                out.push(c);
            }
        }
        return out;
    }
    raw.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        let vars = parse_env_file(
            "# comment\n\
             LANG=C.UTF-8\n\
             export PATH=\"/usr/local/bin:/usr/bin\"\n\
             QUOTE=\"say \\\"hi\\\"\"\n\
             SINGLE='$NOT_EXPANDED'\n\
             \n\
             garbage line\n",
        );
        assert_eq!(vars.get("LANG").map(String::as_str), Some("C.UTF-8"));
        assert_eq!(
            vars.get("PATH").map(String::as_str),
            Some("/usr/local/bin:/usr/bin")
        );
        assert_eq!(vars.get("QUOTE").map(String::as_str), Some("say \"hi\""));
        assert_eq!(vars.get("SINGLE").map(String::as_str), Some("$NOT_EXPANDED"));
        assert_eq!(vars.len(), 4);
    }

    #[test]
    fn test_render_then_parse_preserves_escapes() {
        let mut vars = EnvSnapshot::new();
        vars.insert("WIN".into(), r#"C:\path "quoted""#.into());
        let text = render_env_file(&vars);
        assert_eq!(text, "WIN=\"C:\\\\path \\\"quoted\\\"\"\n");
        assert_eq!(parse_env_file(&text), vars);
    }

    #[test]
    fn test_open_seeds_and_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("etc/environment");
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, "LD_LIBRARY_PATH=/usr/lib\n").expect("seed");

        let mut store = FileEnvStore::open(&path).expect("open");
        assert_eq!(store.get("LD_LIBRARY_PATH"), Some("/usr/lib"));

        store.set("LANG", "C.UTF-8").expect("set");
        let written = std::fs::read_to_string(&path).expect("read back");
        assert_eq!(
            written,
            "LANG=\"C.UTF-8\"\nLD_LIBRARY_PATH=\"/usr/lib\"\n"
        );
    }

    #[test]
    fn test_multiline_value_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("environment");

        let mut store = FileEnvStore::open(&path).expect("open");
        store.set("MULTI", "a\nb\r\nc").expect("set");
        store.set("AFTER", "x").expect("set");

        let written = std::fs::read_to_string(&path).expect("read back");
        assert_eq!(written.lines().count(), 2);

        let reopened = FileEnvStore::open(&path).expect("reopen");
        assert_eq!(reopened.get("MULTI"), Some("a\nb\r\nc"));
        assert_eq!(reopened.get("AFTER"), Some("x"));
    }

    #[test]
    fn test_base_is_read_but_never_written() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("environment");
        let mut base = EnvSnapshot::new();
        base.insert("LD_LIBRARY_PATH".into(), "/opt/base/lib".into());

        let mut store = FileEnvStore::open(&path).expect("open").with_base(base);
        assert_eq!(store.get("LD_LIBRARY_PATH"), Some("/opt/base/lib"));
        assert!(store.vars().is_empty());

        store.set("LANG", "C.UTF-8").expect("set");
        assert_eq!(
            std::fs::read_to_string(&path).expect("read back"),
            "LANG=\"C.UTF-8\"\n"
        );

        store.set("LD_LIBRARY_PATH", "/usr/lib").expect("set");
        assert_eq!(store.get("LD_LIBRARY_PATH"), Some("/usr/lib"));
    }

    #[test]
    fn test_open_missing_file_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileEnvStore::open(dir.path().join("absent.env")).expect("open");
        assert!(store.vars().is_empty());
        assert!(!dir.path().join("absent.env").exists());
    }

    #[test]
    fn test_ephemeral_never_writes() {
        let mut store = FileEnvStore::ephemeral();
        store.set("A", "1").expect("set");
        assert_eq!(store.get("A"), Some("1"));
        assert!(store.path().is_none());
    }
}
