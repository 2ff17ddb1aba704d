//! Mapping of per-step progress onto one cumulative 0..1 scale.

use std::fmt;

/// Coarse steps of a packaging run, each owning a slice of the overall bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Scaffolding script and runtime archives
    FetchAssets,
    /// Identifier compaction and project recompression
    OptimizeProject,
    /// Rendering the HTML document
    ComposeDocument,
    /// Merging with the runtime and writing the output archive
    AssembleArchive,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::FetchAssets => "fetch-assets",
            Step::OptimizeProject => "optimize-project",
            Step::ComposeDocument => "compose-document",
            Step::AssembleArchive => "assemble-archive",
        })
    }
}

/// Fixed interpolation table from steps to overall progress.
///
/// | step             | range       |
/// |------------------|-------------|
/// | fetch-assets     | 0.00 – 0.40 |
/// | optimize-project | 0.40 – 0.50 |
/// | compose-document | 0.50 – 0.60 |
/// | assemble-archive | 0.60 – 1.00 |
pub struct ProgressTable;

impl ProgressTable {
    const RANGES: [(Step, f64, f64); 4] = [
        (Step::FetchAssets, 0.0, 0.4),
        (Step::OptimizeProject, 0.4, 0.5),
        (Step::ComposeDocument, 0.5, 0.6),
        (Step::AssembleArchive, 0.6, 1.0),
    ];

    /// Sub-range owned by `step`.
    pub fn range(step: Step) -> (f64, f64) {
        Self::RANGES
            .iter()
            .find(|(s, _, _)| *s == step)
            .map(|&(_, start, end)| (start, end))
            .unwrap_or((0.0, 1.0))
    }

    /// Overall progress for `fraction` of the way through `step`.
    pub fn overall(step: Step, fraction: f64) -> f64 {
        let (start, end) = Self::range(step);
        start + (end - start) * fraction.clamp(0.0, 1.0)
    }
}
