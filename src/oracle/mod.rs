//! Generative oracle behind localization and edit generation
//!
//! The pipeline consults the oracle through a trait so the parsing and
//! voting core stays unit-testable without network access. `OracleClient`
//! is the real implementation against an OpenAI-compatible chat
//! completions API.

mod client;
mod models;
pub mod prompts;

pub use client::OracleClient;
pub use models::{merge_usage, Model, Usage};

use std::fmt;
use std::future::Future;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::edit::CandidateSet;

/// What kind of identifier a location names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    Variable,
    Function,
    Class,
    Method,
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LocationKind::Variable => "variable",
            LocationKind::Function => "function",
            LocationKind::Class => "class",
            LocationKind::Method => "method",
        })
    }
}

/// One identifier worth inspecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeLocation {
    pub kind: LocationKind,
    pub name: String,
}

/// Identifiers to inspect, grouped by file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemLocation {
    pub file_path: String,
    pub locations: Vec<CodeLocation>,
}

/// The generative collaborator the pipeline consults.
///
/// Any call may fail or return malformed data; callers treat a failure as
/// "no result" for that call rather than aborting the run.
pub trait Oracle {
    /// Paths worth editing for the problem, most important first.
    fn relevant_files(
        &self,
        problem: &str,
        structure: &str,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Identifiers that need inspection or editing, grouped by file.
    fn problem_locations(
        &self,
        problem: &str,
        skeleton: &str,
    ) -> impl Future<Output = Result<Vec<ProblemLocation>>> + Send;

    /// One independent repair attempt, sampled with high randomness.
    fn candidate_edits(
        &self,
        problem: &str,
        skeleton: &str,
        locations: &[ProblemLocation],
    ) -> impl Future<Output = Result<CandidateSet>> + Send;

    /// One-sentence description of a file.
    fn file_summary(
        &self,
        path: &str,
        content: &str,
    ) -> impl Future<Output = Result<String>> + Send;
}
