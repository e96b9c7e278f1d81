//! Gitignore-style rules from the scan root.

use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::{debug, warn};

/// Compiled ignore rules for one scan root.
///
/// Only the root's rule file is consulted; rule files in subdirectories
/// are not merged. Later rules override earlier ones, `!` negates, a
/// trailing `/` restricts a rule to directories and `**` spans segments.
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    root: PathBuf,
    rules: Gitignore,
}

impl IgnoreMatcher {
    /// A matcher that ignores nothing.
    pub fn empty(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            rules: Gitignore::empty(),
        }
    }

    /// Compile rules from the raw text of a rule file.
    pub fn from_rules(root: impl Into<PathBuf>, text: &str) -> Self {
        Self::from_lines(root.into(), text.lines())
    }

    /// Read `file_name` under `root`, then append `extra` rules.
    ///
    /// A missing file means nothing is ignored; an unreadable one is logged
    /// and treated the same way.
    pub async fn load(root: &Path, file_name: Option<&str>, extra: &[String]) -> Self {
        let mut text = String::new();
        if let Some(name) = file_name {
            let path = root.join(name);
            match tokio::fs::read_to_string(&path).await {
                Ok(contents) => text = contents,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "no ignore file");
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "could not read ignore file");
                }
            }
        }
        let lines = text.lines().chain(extra.iter().map(String::as_str));
        Self::from_lines(root.to_path_buf(), lines)
    }

    fn from_lines<'a>(root: PathBuf, lines: impl Iterator<Item = &'a str>) -> Self {
        let mut builder = GitignoreBuilder::new(&root);
        for line in lines {
            if let Err(err) = builder.add_line(None, line) {
                warn!(pattern = line, error = %err, "invalid ignore pattern");
            }
        }
        let rules = builder.build().unwrap_or_else(|err| {
            warn!(error = %err, "ignore rules failed to compile");
            Gitignore::empty()
        });
        Self { root, rules }
    }

    /// Scan root the rules are anchored at.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether no rules are loaded.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Test a root-relative path.
    ///
    /// Separators are normalised to `/` regardless of host.
    pub fn matches(&self, relative_path: &str, is_dir: bool) -> bool {
        if self.rules.is_empty() {
            return false;
        }
        let normalized = relative_path.replace('\\', "/");
        let normalized = normalized.trim_start_matches("./").trim_matches('/');
        if normalized.is_empty() {
            return false;
        }
        self.rules.matched(Path::new(normalized), is_dir).is_ignore()
    }

    /// Test an absolute path below the root.
    pub fn matches_path(&self, path: &Path, is_dir: bool) -> bool {
        match path.strip_prefix(&self.root) {
            Ok(relative) => self.matches(&relative_slash_path(relative), is_dir),
            Err(_) => false,
        }
    }
}

/// Join path components with `/`.
fn relative_slash_path(path: &Path) -> String {
    let parts: Vec<_> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    parts.join("/")
}
