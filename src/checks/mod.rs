//! Static checks run over execution artifacts.
//!
//! The reflect phase can hand these results to the reflector so its critique
//! is grounded in concrete findings rather than the artifact text alone.
//! Check failures never fail a job; they only inform reflection.

use crate::agent::{Artifact, ArtifactFile};
use crate::error::OrchestratorError;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The static analyses the built-in runner performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Unfinished-work markers left in produced files.
    TodoMarkers,
    /// Leftover debugging statements.
    DebugArtifacts,
    /// Relative links pointing at files the artifact does not contain.
    BrokenLinks,
}

impl CheckKind {
    /// Returns the canonical string form used in reports and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::TodoMarkers => "todo_markers",
            CheckKind::DebugArtifacts => "debug_artifacts",
            CheckKind::BrokenLinks => "broken_links",
        }
    }
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one static check over a whole artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckReport {
    /// Which check produced this report.
    pub kind: CheckKind,
    /// Whether the check found nothing.
    pub passed: bool,
    /// One line per finding, `path:line: description`.
    pub errors: Vec<String>,
}

impl CheckReport {
    /// Builds a report, deriving the pass flag from the findings.
    pub fn new(kind: CheckKind, errors: Vec<String>) -> Self {
        Self {
            kind,
            passed: errors.is_empty(),
            errors,
        }
    }
}

/// Contract for static analysis over artifacts.
#[async_trait]
pub trait CheckRunner: Send + Sync {
    /// Runs every configured check against the artifact.
    async fn run_checks(&self, artifact: &Artifact) -> Result<Vec<CheckReport>, OrchestratorError>;
}

/// Regex pattern for unfinished-work markers.
const TODO_PATTERN: &str = r"(?i)\b(TODO|FIXME|XXX|HACK)\b";

/// Regex pattern for common leftover debugging statements.
const DEBUG_PATTERN: &str = r"\b(dbg!|console\.(log|debug)|pdb\.set_trace|binding\.pry|debugger;)";

/// Regex pattern extracting Markdown link targets.
const LINK_PATTERN: &str = r"\[[^\]]*\]\(([^)\s]+)\)";

/// Built-in runner scanning artifact files with regular expressions.
///
/// Purely textual; it never executes artifact content.
#[derive(Debug, Default)]
pub struct StaticCheckRunner;

impl StaticCheckRunner {
    pub fn new() -> Self {
        Self
    }

    fn scan_pattern(kind: CheckKind, pattern: &str, files: &[ArtifactFile]) -> CheckReport {
        let mut errors = Vec::new();
        if let Ok(re) = Regex::new(pattern) {
            for file in files {
                for (number, line) in file.content.lines().enumerate() {
                    if let Some(found) = re.find(line) {
                        errors.push(format!(
                            "{}:{}: found '{}'",
                            file.path,
                            number + 1,
                            found.as_str()
                        ));
                    }
                }
            }
        }
        CheckReport::new(kind, errors)
    }

    fn scan_links(files: &[ArtifactFile]) -> CheckReport {
        let known: HashSet<&str> = files.iter().map(|f| f.path.as_str()).collect();
        let mut errors = Vec::new();
        if let Ok(re) = Regex::new(LINK_PATTERN) {
            for file in files {
                for (number, line) in file.content.lines().enumerate() {
                    for capture in re.captures_iter(line) {
                        let target = capture[1].trim();
                        if !is_relative_target(target) {
                            continue;
                        }
                        let path = target
                            .split('#')
                            .next()
                            .unwrap_or_default()
                            .trim_start_matches("./");
                        if !path.is_empty() && !known.contains(path) {
                            errors.push(format!(
                                "{}:{}: link target '{}' is not in the artifact",
                                file.path,
                                number + 1,
                                target
                            ));
                        }
                    }
                }
            }
        }
        CheckReport::new(CheckKind::BrokenLinks, errors)
    }
}

/// Returns whether a link target refers to a file inside the artifact.
fn is_relative_target(target: &str) -> bool {
    !(target.starts_with("http://")
        || target.starts_with("https://")
        || target.starts_with("mailto:")
        || target.starts_with('#')
        || target.starts_with('/'))
}

#[async_trait]
impl CheckRunner for StaticCheckRunner {
    async fn run_checks(&self, artifact: &Artifact) -> Result<Vec<CheckReport>, OrchestratorError> {
        Ok(vec![
            Self::scan_pattern(CheckKind::TodoMarkers, TODO_PATTERN, &artifact.files),
            Self::scan_pattern(CheckKind::DebugArtifacts, DEBUG_PATTERN, &artifact.files),
            Self::scan_links(&artifact.files),
        ])
    }
}
