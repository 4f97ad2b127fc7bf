//! Path exclusion rules for repository indexing.
//!
//! [`should_exclude`] is a pure predicate over repository-relative paths.
//! It is deliberately coarse: it matches by prefix, suffix, exact filename,
//! and substring, and prefers dropping non-source assets over precision.
//! Matching is case-sensitive.
//!
//! [`ExclusionFilter`] layers operator-configured globs on top of the fixed
//! rules.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Directory patterns. Matched at the start of the path or after a `/`.
const DIRECTORY_PATTERNS: &[&str] = &[
    "node_modules/",
    "build/",
    "dist/",
    "out/",
    ".next/",
    "coverage/",
    "storybook-static/",
    ".storybook/",
    ".cache/",
    ".git/",
    ".github/",
    "__pycache__/",
    "venv/",
    ".egg-info/",
    ".pytest_cache/",
    ".tox/",
    "docker/data/",
    "artifacts/",
    "tmp/",
    "temp/",
    "logs/",
    "public/",
];

/// Suffixes (extensions and compound extensions).
const SUFFIX_PATTERNS: &[&str] = &[
    // minified output and sourcemaps
    ".min.js",
    ".min.css",
    ".map",
    ".tsbuildinfo",
    ".snap",
    // build artifacts and logs
    ".log",
    ".tmp",
    ".bak",
    ".cache",
    ".coverage",
    ".lock",
    // archives
    ".tar.gz",
    ".zip",
    ".7z",
    ".rar",
    // binaries
    ".class",
    ".o",
    ".so",
    ".dll",
    ".exe",
    ".bin",
    ".dylib",
    ".pyc",
    ".pyo",
    ".pyd",
    // databases
    ".sqlite",
    ".db",
    // media
    ".mp3",
    ".mp4",
    ".avi",
    ".mkv",
    ".mov",
    ".flv",
    ".wmv",
    // images
    ".jpg",
    ".jpeg",
    ".png",
    ".gif",
    ".bmp",
    ".ico",
    ".svg",
    ".tif",
    ".tiff",
    ".webp",
    ".psd",
    ".ai",
    ".eps",
    // documents
    ".pdf",
    ".doc",
    ".docx",
    ".ppt",
    ".pptx",
    ".xls",
    ".xlsx",
    // environment and schema files
    ".env",
    ".xsd",
    ".txt",
];

/// Exact filenames (last path segment).
const EXACT_FILENAMES: &[&str] = &[
    ".gitignore",
    ".gitmodules",
    ".gitkeep",
    ".gitattributes",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "requirements.txt",
    "Pipfile.lock",
    ".eslintrc.js",
    ".eslintrc.json",
    ".prettierrc",
    ".prettierrc.js",
    ".browserslistrc",
    ".editorconfig",
    ".pylintrc",
    ".pydoc",
    "tsconfig.json",
    "jest.config.js",
    "babel.config.js",
    "LICENSE",
    "CHANGELOG.md",
    "CONTRIBUTING.md",
];

/// Substrings of the filename that mark tests, env files, and generated code.
const FILENAME_SUBSTRINGS: &[&str] = &[
    ".test.js",
    ".test.jsx",
    ".test.ts",
    ".test.tsx",
    ".spec.js",
    ".spec.jsx",
    ".spec.ts",
    ".spec.tsx",
    ".env.",
    ".min.",
    ".bundle.",
    ".stories.",
];

/// Decide whether a repository path should be left out of the index.
///
/// Total over all strings; never performs I/O.
pub fn should_exclude(path: &str) -> bool {
    let normalized = path.replace('\\', "/");
    let segments: Vec<&str> = normalized.split('/').collect();
    let (file_name, dirs) = match segments.split_last() {
        Some((last, dirs)) => (*last, dirs),
        None => ("", &[][..]),
    };

    // hidden directories
    if dirs.iter().any(|seg| seg.starts_with('.') && *seg != "." && *seg != "..") {
        return true;
    }

    if DIRECTORY_PATTERNS.iter().any(|pattern| {
        normalized.starts_with(pattern) || normalized.contains(&format!("/{}", pattern))
    }) {
        return true;
    }

    if SUFFIX_PATTERNS.iter().any(|ext| normalized.ends_with(ext)) {
        return true;
    }

    if EXACT_FILENAMES.contains(&file_name) {
        return true;
    }

    FILENAME_SUBSTRINGS
        .iter()
        .any(|pattern| file_name.contains(pattern))
}

/// The fixed rules plus operator-configured exclude globs.
#[derive(Debug, Clone)]
pub struct ExclusionFilter {
    extra: Option<GlobSet>,
}

impl ExclusionFilter {
    /// Build a filter from `indexer.exclude_globs`.
    pub fn new(extra_globs: &[String]) -> Result<Self> {
        if extra_globs.is_empty() {
            return Ok(Self { extra: None });
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in extra_globs {
            builder.add(
                Glob::new(pattern).with_context(|| format!("Invalid exclude glob: {}", pattern))?,
            );
        }
        Ok(Self {
            extra: Some(builder.build()?),
        })
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        if should_exclude(path) {
            return true;
        }
        self.extra
            .as_ref()
            .map(|set| set.is_match(path))
            .unwrap_or(false)
    }
}

impl Default for ExclusionFilter {
    fn default() -> Self {
        Self { extra: None }
    }
}
