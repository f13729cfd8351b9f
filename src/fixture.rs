//! Fixture synthesis
//!
//! Turns one example snippet into a source file the engine can analyze.
//! Halves of the example can be excluded; excluded marker blocks are blanked
//! line by line so line numbers never shift.

use crate::config::FixtureConfig;
use crate::markers::{extract_markers, marker_block, Marker};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

static CLASS_DECL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:@\w+(?:\([^)]*\))?\s+)*(?:(?:public|private|global|virtual|abstract|with|without|inherited|sharing)\s+)*(?:class|interface|enum|trigger)\s+\w+").unwrap()
});

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("Failed to write fixture: {0}")]
    Io(#[from] std::io::Error),
}

/// What to synthesize
#[derive(Debug, Clone)]
pub struct FixtureRequest<'a> {
    pub example_content: &'a str,
    pub example_index: usize,
    pub include_violations: bool,
    pub include_valids: bool,
}

/// A synthesized fixture file
///
/// The file is removed when the fixture is dropped.
#[derive(Debug)]
pub struct Fixture {
    file: NamedTempFile,
    pub has_violations: bool,
    pub has_valids: bool,
    pub violation_count: usize,
    pub valid_count: usize,
    /// Lines added before the example text
    pub line_offset: usize,
}

impl Fixture {
    pub fn file_path(&self) -> &Path {
        self.file.path()
    }
}

/// Builds fixture files from example snippets
pub trait FixtureGenerator: Send + Sync {
    fn generate(&self, request: &FixtureRequest) -> Result<Fixture, FixtureError>;
}

/// Apex fixture generator
///
/// Snippets that already declare a type are written as-is; bare statements
/// and members are wrapped in a generated class.
#[derive(Debug, Clone)]
pub struct ApexFixtureGenerator {
    dir: Option<PathBuf>,
    class_prefix: String,
}

impl ApexFixtureGenerator {
    pub fn new(config: &FixtureConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            class_prefix: config.class_prefix.clone(),
        }
    }

    /// Fixture source text and its line offset
    pub fn render(&self, request: &FixtureRequest) -> (String, usize) {
        let markers = extract_markers(request.example_content, None);
        let mut blanked: BTreeSet<usize> = BTreeSet::new();
        if !request.include_violations {
            blanked.extend(block_lines(request.example_content, &markers.violation_markers));
        }
        if !request.include_valids {
            blanked.extend(block_lines(request.example_content, &markers.valid_markers));
        }

        let body: Vec<&str> = request
            .example_content
            .lines()
            .enumerate()
            .map(|(i, line)| if blanked.contains(&(i + 1)) { "" } else { line })
            .collect();
        let body = body.join("\n");

        if CLASS_DECL_RE.is_match(request.example_content) {
            (format!("{}\n", body), 0)
        } else {
            (
                format!(
                    "public class {}{} {{\n{}\n}}\n",
                    self.class_prefix, request.example_index, body
                ),
                1,
            )
        }
    }
}

fn block_lines(content: &str, markers: &[Marker]) -> Vec<usize> {
    markers
        .iter()
        .flat_map(|m| marker_block(content, m.line_number))
        .collect()
}

impl FixtureGenerator for ApexFixtureGenerator {
    fn generate(&self, request: &FixtureRequest) -> Result<Fixture, FixtureError> {
        let markers = extract_markers(request.example_content, None);
        let (source, line_offset) = self.render(request);

        let prefix = format!("{}{}_", self.class_prefix, request.example_index);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix).suffix(".cls");
        let mut file = match &self.dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(source.as_bytes())?;
        file.flush()?;

        let violation_count = if request.include_violations {
            markers.violation_markers.len()
        } else {
            0
        };
        let valid_count = if request.include_valids {
            markers.valid_markers.len()
        } else {
            0
        };

        Ok(Fixture {
            file,
            has_violations: violation_count > 0,
            has_valids: valid_count > 0,
            violation_count,
            valid_count,
            line_offset,
        })
    }
}
