use super::Manifest;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Find a procfile starting from the current directory, walking parents.
    pub fn find_procfile(&self) -> Result<PathBuf> {
        let current_dir = std::env::current_dir()?;
        Self::find_in_dir(&current_dir)
    }

    pub fn find_in_dir(dir: &Path) -> Result<PathBuf> {
        for candidate in ["procfile.yaml", "procfile.yml"] {
            let path = dir.join(candidate);
            if path.exists() {
                return Ok(path);
            }
        }

        if let Some(parent) = dir.parent() {
            return Self::find_in_dir(parent);
        }

        Err(Error::Manifest(
            "could not find procfile.yaml in current directory or any parent".to_string(),
        ))
    }

    /// Load and validate a procfile from a file path.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<Manifest> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Manifest(format!(
                "failed to read procfile '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        self.parse(&content)
    }

    /// Parse a procfile from a YAML string.
    pub fn parse(&self, content: &str) -> Result<Manifest> {
        if let Some((name, first_line, second_line)) = duplicate_top_level_key(content) {
            return Err(Error::DuplicateService {
                name,
                first_line,
                second_line,
            });
        }

        let manifest: Manifest = serde_yaml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

/// Scan for a repeated top-level key, reporting both line numbers.
///
/// serde_yaml rejects duplicate keys too, but without the location of the
/// first occurrence. The procfile is a single top-level mapping, so any
/// unindented `name:` line is a service name; that makes a line scan
/// sufficient here.
fn duplicate_top_level_key(content: &str) -> Option<(String, usize, usize)> {
    let mut seen: HashMap<String, usize> = HashMap::new();

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        if line.starts_with([' ', '\t']) {
            continue;
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("---") {
            continue;
        }
        let Some(colon) = trimmed.find(':') else {
            continue;
        };
        let key = trimmed[..colon].trim().trim_matches(['"', '\'']).to_string();
        if key.is_empty() {
            continue;
        }
        if let Some(&first_line) = seen.get(&key) {
            return Some((key, first_line, line_no));
        }
        seen.insert(key, line_no);
    }

    None
}
