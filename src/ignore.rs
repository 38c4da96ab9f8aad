//! Ignore rules for repository entries.
//!
//! Rules are matched against an entry's *name* (the last path segment),
//! never its full path. A rule containing `*` is a whole-name glob in
//! which `*` matches any run of characters; any other rule must equal the
//! name exactly. An ignored directory is skipped together with everything
//! beneath it.

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::collections::HashSet;

/// Build artifacts, lockfiles, images and dependency directories.
pub const DEFAULT_IGNORE: &[&str] = &[
    ".gitignore",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "bun.lockb",
    "*.svg",
    "*.png",
    "*.jpg",
    "*.jpeg",
    "*.gif",
    "*.ico",
    "*.lock",
    "*.DS_Store",
    "tsconfig.*",
    "eslint.*",
    "node_modules",
    ".next",
    "public",
    "dist",
    "build",
    "coverage",
];

#[derive(Debug, Clone)]
pub struct IgnoreRules {
    literals: HashSet<String>,
    globs: GlobSet,
}

impl IgnoreRules {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut literals = HashSet::new();
        let mut builder = GlobSetBuilder::new();

        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            if pattern.contains('*') {
                // Only `*` is special; escape everything globset would
                // otherwise interpret.
                let escaped = escape_except_star(pattern);
                let glob = GlobBuilder::new(&escaped)
                    .literal_separator(false)
                    .backslash_escape(true)
                    .build()
                    .with_context(|| format!("Invalid ignore pattern: {}", pattern))?;
                builder.add(glob);
            } else {
                literals.insert(pattern.to_string());
            }
        }

        Ok(Self {
            literals,
            globs: builder.build()?,
        })
    }

    /// Built-in rules plus `extra`.
    pub fn with_defaults(extra: &[String]) -> Result<Self> {
        Self::new(
            DEFAULT_IGNORE
                .iter()
                .map(|s| s.to_string())
                .chain(extra.iter().cloned()),
        )
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.literals.contains(name) || self.globs.is_match(name)
    }
}

fn escape_except_star(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '?' | '[' | ']' | '{' | '}' | ',' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}
