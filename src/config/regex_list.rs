//! Regex lists for node allow/deny filtering

use super::ConfigError;
use regex::Regex;
use std::fs;
use std::io;
use std::path::Path;

/// A list of patterns; a string matches the list if any pattern matches it
#[derive(Debug, Clone, Default)]
pub struct RegexList {
    patterns: Vec<Regex>,
}

impl RegexList {
    /// Empty list (matches nothing)
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a list from pattern strings
    pub fn from_patterns<I, S>(patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::new();
        for pattern in patterns {
            list.push(pattern.as_ref())?;
        }
        Ok(list)
    }

    /// Load one pattern per line. Blank lines and `#` comments are skipped.
    /// A missing file gives an empty list.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("{:?} not found, empty list", path);
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };

        let lines = data
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'));
        Self::from_patterns(lines)
    }

    fn push(&mut self, pattern: &str) -> Result<(), ConfigError> {
        let re = Regex::new(pattern).map_err(|source| ConfigError::Regex {
            pattern: pattern.to_string(),
            source,
        })?;
        self.patterns.push(re);
        Ok(())
    }

    /// True if any pattern matches `target`
    pub fn check(&self, target: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(target))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
