//! Structured text reports of a built layout.
//!
//! Reports are plain text, not JSON, so a failing test can print the whole
//! picture of a run in a few readable lines.

use std::fmt;

use serde::Serialize;
use shell_kernel::attachment::BoardPlacement;
use shell_kernel::{ShellError, ShellLayout};

use crate::helpers::{HarnessError, outline_area, wall_bounds};
use crate::oracle::{self, OracleVerdict};
use crate::workflow::LayoutBuilder;

/// A complete layout report with all sections.
#[derive(Debug, Serialize)]
pub struct LayoutReport {
    pub mode: String,
    pub key_count: usize,
    pub triangulation: TriangulationSummary,
    pub web_summaries: Vec<WebSummary>,
    pub bounding_box: Option<([f64; 3], [f64; 3])>,
    pub attachments: Vec<AttachmentEntry>,
    pub oracle_results: Vec<OracleVerdict>,
    pub errors: Vec<(String, String)>,
}

#[derive(Debug, Serialize)]
pub struct TriangulationSummary {
    pub points: usize,
    pub triangles: usize,
    pub boundary: usize,
    pub removed: usize,
    pub outline_area: f64,
    pub floor_z: f64,
}

/// One web face.
#[derive(Debug, Serialize)]
pub struct WebSummary {
    pub face: String,
    pub triangle_count: usize,
    pub reinforced_edges: usize,
    pub short_edges: usize,
}

#[derive(Debug, Serialize)]
pub struct AttachmentEntry {
    pub category: String,
    pub detail: String,
    pub placed: bool,
}

impl LayoutReport {
    /// Build a report for `layout` and run every oracle on it.
    pub fn from_layout(layout: &ShellLayout, builder: &LayoutBuilder) -> Self {
        let t = &layout.triangulation;
        let triangulation = TriangulationSummary {
            points: t.points.len(),
            triangles: t.triangles.len(),
            boundary: t.boundary.len(),
            removed: t.removed_triangles.len(),
            outline_area: outline_area(layout),
            floor_z: layout.floor.bottom_z,
        };
        let web_summaries = [&layout.web_top, &layout.web_bottom]
            .into_iter()
            .map(|face| WebSummary {
                face: format!("{:?}", face.face),
                triangle_count: face.triangles.len(),
                reinforced_edges: face.edges.len(),
                short_edges: face.edges.iter().filter(|e| e.is_short()).count(),
            })
            .collect();
        let bounding_box = wall_bounds(layout).map(|(lo, hi)| (lo.to_array(), hi.to_array()));

        let mut attachments = Vec::new();
        let mut errors = Vec::new();
        let mut record = |category: &str, outcome: Result<String, &ShellError>| match outcome {
            Ok(detail) => attachments.push(AttachmentEntry {
                category: category.to_string(),
                detail,
                placed: true,
            }),
            Err(e) => {
                attachments.push(AttachmentEntry {
                    category: category.to_string(),
                    detail: e.user_message(),
                    placed: false,
                });
                errors.push((category.to_string(), e.to_string()));
            }
        };
        if let Some(connector) = &layout.attachments.connector {
            record(
                "connector",
                connector.as_ref().map(|p| format!("at wall index {:.2}", p.index)),
            );
        }
        if let Some(board) = &layout.attachments.board {
            record("board", board.as_ref().map(|mounts| describe_mounts(mounts)));
        }
        record(
            "screws",
            layout.attachments.screws.as_ref().map(|screws| {
                let at: Vec<String> = screws.iter().map(|s| format!("{:.2}", s.index)).collect();
                format!("{} at [{}]", screws.len(), at.join(", "))
            }),
        );

        Self {
            mode: format!("{:?}", builder.config.mode),
            key_count: builder.key_count(),
            triangulation,
            web_summaries,
            bounding_box,
            attachments,
            oracle_results: oracle::run_all_checks(layout, &builder.config),
            errors,
        }
    }

    /// Format the report as text.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str("=== Shell Layout Report ===\n\n");
        out.push_str(&format!("Mode: {} | Keys: {}\n", self.mode, self.key_count));

        let t = &self.triangulation;
        out.push_str(&format!(
            "\nTriangulation: {} points, {} triangles, {} carved\n",
            t.points, t.triangles, t.removed,
        ));
        out.push_str(&format!(
            "  Boundary: {} points | Outline area: {:.1} mm^2 | Floor z={:.2}\n",
            t.boundary, t.outline_area, t.floor_z,
        ));

        if !self.web_summaries.is_empty() {
            out.push_str("\nWeb:\n");
            for w in &self.web_summaries {
                out.push_str(&format!(
                    "  {}: {} triangles, {} reinforced edges, {} short\n",
                    w.face, w.triangle_count, w.reinforced_edges, w.short_edges,
                ));
            }
        }

        if let Some((min, max)) = self.bounding_box {
            out.push_str(&format!(
                "\nWall Bounds: ({:.1}, {:.1}, {:.1}) -> ({:.1}, {:.1}, {:.1})\n",
                min[0], min[1], min[2], max[0], max[1], max[2],
            ));
        }

        if !self.attachments.is_empty() {
            out.push_str("\nAttachments:\n");
            for a in &self.attachments {
                let status = if a.placed { "OK" } else { "FAILED" };
                out.push_str(&format!("  [{}] {}: {}\n", status, a.category, a.detail));
            }
        }

        if !self.oracle_results.is_empty() {
            out.push_str(&format!("\nOracle Results ({} checks):\n", self.oracle_results.len()));
            for v in &self.oracle_results {
                let status = if v.passed { "PASS" } else { "FAIL" };
                out.push_str(&format!("  [{}] {}: {}\n", status, v.oracle_name, v.detail));
            }
        }

        if self.errors.is_empty() {
            out.push_str("\nErrors: none\n");
        } else {
            out.push_str(&format!("\nErrors ({}):\n", self.errors.len()));
            for (category, msg) in &self.errors {
                out.push_str(&format!("  {}: {}\n", category, msg));
            }
        }

        out
    }

    /// The report as JSON, for attaching to CI artifacts.
    pub fn to_json(&self) -> Result<String, HarnessError> {
        serde_json::to_string_pretty(self).map_err(|e| HarnessError::AssertionFailed {
            detail: format!("report not serialisable: {e}"),
        })
    }

    pub fn all_passed(&self) -> bool {
        self.oracle_results.iter().all(|v| v.passed)
    }
}

impl fmt::Display for LayoutReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_text())
    }
}

impl LayoutBuilder {
    /// Generate a complete report for the built layout.
    pub fn report(&self) -> Result<LayoutReport, HarnessError> {
        Ok(LayoutReport::from_layout(self.layout()?, self))
    }
}

fn describe_mounts(mounts: &[BoardPlacement]) -> String {
    let parts: Vec<String> = mounts
        .iter()
        .map(|m| format!("{:?} {:.2}", m.mount, m.index))
        .collect();
    parts.join(", ")
}
