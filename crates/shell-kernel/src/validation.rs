//! Structural checks on a finished [`ShellLayout`].
//!
//! The pipeline already refuses to produce most of these states; the
//! validator exists so a layout read back from JSON, or edited by hand, can
//! be checked before it is handed to the modeling kernel.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::Tolerance;
use crate::attachment::{InsertDimensions, WallRing};
use crate::config::{ShellConfig, ShellMode};
use crate::geometry::Frame;
use crate::pipeline::ShellLayout;

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// The modeling kernel cannot build from this layout.
    Error,
    /// Buildable, but probably not what was asked for.
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// A triangle refers to a point that does not exist.
    TriangleIndexOutOfRange,
    /// A triangle uses the same point twice.
    RepeatedTriangleVertex,
    /// The wall boundary visits a point twice.
    BoundaryRepeat,
    /// The wall boundary has fewer than three points.
    BoundaryTooShort,
    /// The number of wall cross-sections differs from the boundary length.
    WallCountMismatch,
    /// A wall frame lies under the floor.
    WallBelowFloor,
    /// A frame holds NaN or infinite values.
    NonFiniteFrame,
    /// Two placed attachments are closer than the configured clearance.
    AttachmentClearance,
    /// A web edge could not reach its target thickness.
    ShortWebEdge,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub code: ErrorCode,
    pub severity: Severity,
    /// Human-readable description naming the offending element.
    pub detail: String,
    /// Measured value, e.g. the depth below the floor.
    pub value: Option<f64>,
}

impl ValidationError {
    fn error(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Error,
            detail: detail.into(),
            value: None,
        }
    }

    fn warning(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, detail)
        }
    }

    fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sev = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN",
        };
        write!(f, "[{sev}] {}: {}", self.code, self.detail)?;
        if let Some(v) = self.value {
            write!(f, " value={v:.3}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationError>,
}

impl ValidationReport {
    pub fn errors_of(&self, code: ErrorCode) -> Vec<&ValidationError> {
        self.errors.iter().filter(|e| e.code == code).collect()
    }

    pub fn no_errors_of(&self, code: ErrorCode) -> bool {
        !self.errors.iter().any(|e| e.code == code)
    }

    pub fn warnings_of(&self, code: ErrorCode) -> Vec<&ValidationError> {
        self.warnings.iter().filter(|e| e.code == code).collect()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ValidationReport: valid={}, errors={}, warnings={}",
            self.valid,
            self.errors.len(),
            self.warnings.len()
        )?;
        for e in self.errors.iter().chain(&self.warnings) {
            writeln!(f, "  {e}")?;
        }
        Ok(())
    }
}

/// Checks a layout against the configuration that produced it.
#[derive(Debug, Clone, Copy)]
pub struct LayoutValidator {
    tolerance: Tolerance,
    mode: ShellMode,
    dims: InsertDimensions,
    min_clearance: f64,
}

impl LayoutValidator {
    pub fn for_config(config: &ShellConfig) -> Self {
        let dims = InsertDimensions::for_config(&config.screws);
        Self {
            tolerance: config.tolerance,
            mode: config.mode,
            dims,
            min_clearance: config.screws.min_clearance.unwrap_or(dims.min_spacing()),
        }
    }

    #[instrument(skip_all, fields(walls = layout.walls.len()))]
    pub fn validate(&self, layout: &ShellLayout) -> ValidationReport {
        let mut found = Vec::new();
        self.check_triangles(layout, &mut found);
        self.check_boundary(layout, &mut found);
        self.check_frames(layout, &mut found);
        self.check_floor(layout, &mut found);
        self.check_attachment_clearance(layout, &mut found);
        self.check_web_edges(layout, &mut found);

        let (errors, warnings): (Vec<_>, Vec<_>) =
            found.into_iter().partition(|e| e.severity == Severity::Error);
        let valid = errors.is_empty();
        info!(valid, errors = errors.len(), warnings = warnings.len(), "layout validated");
        ValidationReport {
            valid,
            errors,
            warnings,
        }
    }

    // ── Meshes ──────────────────────────────────────────

    fn check_triangles(&self, layout: &ShellLayout, out: &mut Vec<ValidationError>) {
        let meshes = [
            ("triangulation", layout.triangulation.points.len(), &layout.triangulation.triangles),
            ("top web", layout.web_top.points.len(), &layout.web_top.triangles),
            ("bottom web", layout.web_bottom.points.len(), &layout.web_bottom.triangles),
        ];
        for (name, n, triangles) in meshes {
            for (i, t) in triangles.iter().enumerate() {
                if let Some(bad) = t.iter().find(|&&v| v >= n) {
                    out.push(ValidationError::error(
                        ErrorCode::TriangleIndexOutOfRange,
                        format!("{name} triangle {i} uses point {bad} of {n}"),
                    ));
                } else if t[0] == t[1] || t[1] == t[2] || t[0] == t[2] {
                    out.push(ValidationError::error(
                        ErrorCode::RepeatedTriangleVertex,
                        format!("{name} triangle {i} is {t:?}"),
                    ));
                }
            }
        }
    }

    fn check_boundary(&self, layout: &ShellLayout, out: &mut Vec<ValidationError>) {
        let boundary = layout.boundary();
        if boundary.len() < 3 {
            out.push(ValidationError::error(
                ErrorCode::BoundaryTooShort,
                format!("boundary has {} points", boundary.len()),
            ));
        }
        let mut seen = HashSet::new();
        for &p in boundary {
            if !seen.insert(p) {
                out.push(ValidationError::error(
                    ErrorCode::BoundaryRepeat,
                    format!("boundary visits point {p} more than once"),
                ));
            }
        }
        if layout.walls.len() != boundary.len() {
            out.push(ValidationError::error(
                ErrorCode::WallCountMismatch,
                format!("{} walls for {} boundary points", layout.walls.len(), boundary.len()),
            ));
        }
    }

    // ── Frames ──────────────────────────────────────────

    fn check_frames(&self, layout: &ShellLayout, out: &mut Vec<ValidationError>) {
        let mut non_finite = |what: String, frame: &Frame| {
            if !frame.is_finite() {
                out.push(ValidationError::error(ErrorCode::NonFiniteFrame, what));
            }
        };
        for (i, w) in layout.walls.iter().enumerate() {
            for (j, f) in w.frames().enumerate() {
                non_finite(format!("wall {i} frame {j}"), f);
            }
        }
        for (i, p) in layout.key_points.iter().enumerate() {
            non_finite(format!("key point {i}"), &p.frame);
        }
        for face in [&layout.web_top, &layout.web_bottom] {
            for (i, f) in face.points.iter().enumerate() {
                non_finite(format!("{:?} web point {i}", face.face), f);
            }
        }
        for (i, s) in layout.attachments.screw_placements().iter().enumerate() {
            non_finite(format!("screw {i}"), &s.frame);
        }
    }

    fn check_floor(&self, layout: &ShellLayout, out: &mut Vec<ValidationError>) {
        let limit = -self.tolerance.thickness - layout.floor_allowance();
        for (i, w) in layout.walls.iter().enumerate() {
            let lowest = w
                .frames()
                .filter(|f| f.is_finite())
                .map(|f| layout.floor.height_of(f.origin()))
                .fold(f64::INFINITY, f64::min);
            if lowest < limit {
                out.push(
                    ValidationError::error(ErrorCode::WallBelowFloor, format!("wall {i} dips under the floor"))
                        .with_value(-lowest),
                );
            }
        }
    }

    // ── Attachments ─────────────────────────────────────

    /// Spacing of every placed screw, holder mount and connector, measured
    /// the same way the placement search measures it.
    fn check_attachment_clearance(&self, layout: &ShellLayout, out: &mut Vec<ValidationError>) {
        if layout.walls.iter().any(|w| !w.is_finite()) {
            return;
        }
        let Ok(ring) = WallRing::new(&layout.walls, self.dims, self.mode, &layout.floor) else {
            return;
        };
        for (a, b, d) in ring.attachment_pairs(&layout.attachments) {
            if d + self.tolerance.coincidence < self.min_clearance {
                out.push(
                    ValidationError::error(
                        ErrorCode::AttachmentClearance,
                        format!(
                            "attachments at {} and {} are closer than {:.2} ({} / {})",
                            a.index, b.index, self.min_clearance, a.kind, b.kind
                        ),
                    )
                    .with_value(d),
                );
            }
        }
    }

    fn check_web_edges(&self, layout: &ShellLayout, out: &mut Vec<ValidationError>) {
        for face in [&layout.web_top, &layout.web_bottom] {
            for e in face.edges.iter().filter(|e| e.is_short()) {
                let mut w = ValidationError::warning(
                    ErrorCode::ShortWebEdge,
                    format!(
                        "{:?} web edge {:?} of key {} limited by {:?}",
                        face.face, e.corners, e.key, e.limit
                    ),
                );
                w.value = e.achieved;
                out.push(w);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::{BoardMount, BoardPlacement, Placement};
    use crate::footprint::{Key, KeyKind};
    use crate::geometry::Vec3;
    use crate::pipeline::ShellPipeline;

    fn layout() -> ShellLayout {
        let keys: Vec<Key> = (0..3)
            .map(|c| Key::new(KeyKind::MxBetter, Frame::at(Vec3::new(c as f64 * 19.0, 0.0, 30.0))))
            .collect();
        ShellPipeline::new(ShellConfig::basic()).run(&keys).unwrap()
    }

    fn validator() -> LayoutValidator {
        LayoutValidator::for_config(&ShellConfig::basic())
    }

    #[test]
    fn test_pipeline_output_is_valid() {
        let report = validator().validate(&layout());
        assert!(report.valid, "{report}");
        assert_eq!(report.error_count(), 0);
    }

    #[test]
    fn test_bad_triangle_index() {
        let mut l = layout();
        let n = l.triangulation.points.len();
        l.triangulation.triangles.push([0, 1, n + 3]);
        let report = validator().validate(&l);
        assert!(!report.valid);
        assert_eq!(report.errors_of(ErrorCode::TriangleIndexOutOfRange).len(), 1);
    }

    #[test]
    fn test_repeated_vertex() {
        let mut l = layout();
        l.web_top.triangles.push([2, 2, 3]);
        let report = validator().validate(&l);
        assert_eq!(report.errors_of(ErrorCode::RepeatedTriangleVertex).len(), 1);
    }

    #[test]
    fn test_boundary_repeat_and_count() {
        let mut l = layout();
        let first = l.triangulation.boundary[0];
        l.triangulation.boundary.push(first);
        let report = validator().validate(&l);
        assert_eq!(report.errors_of(ErrorCode::BoundaryRepeat).len(), 1);
        assert_eq!(report.errors_of(ErrorCode::WallCountMismatch).len(), 1);
    }

    #[test]
    fn test_short_boundary() {
        let mut l = layout();
        l.triangulation.boundary.truncate(2);
        l.walls.truncate(2);
        let report = validator().validate(&l);
        assert_eq!(report.errors_of(ErrorCode::BoundaryTooShort).len(), 1);
        assert!(report.no_errors_of(ErrorCode::WallCountMismatch));
    }

    #[test]
    fn test_wall_below_floor() {
        let mut l = layout();
        l.walls[0].bo = l.walls[0].bo.translated(Vec3::new(0.0, 0.0, -2.0));
        let report = validator().validate(&l);
        let below = report.errors_of(ErrorCode::WallBelowFloor);
        assert_eq!(below.len(), 1);
        assert!(below[0].value.unwrap() > 1.9);
    }

    #[test]
    fn test_nan_frame() {
        let mut l = layout();
        l.walls[1].mi = Frame::at(Vec3::new(f64::NAN, 0.0, 0.0));
        let report = validator().validate(&l);
        assert_eq!(report.errors_of(ErrorCode::NonFiniteFrame).len(), 1);
        assert!(report.no_errors_of(ErrorCode::WallBelowFloor));
    }

    #[test]
    fn test_overlapping_screws() {
        let mut l = layout();
        let frame = Frame::at(Vec3::new(0.0, 0.0, 10.0));
        l.attachments.screws = Ok(vec![
            Placement { index: 0.5, frame },
            Placement { index: 0.55, frame },
            Placement { index: 3.5, frame },
        ]);
        let report = validator().validate(&l);
        let clash = report.errors_of(ErrorCode::AttachmentClearance);
        let pair = clash.iter().find(|e| e.detail.contains("at 0.5 and 0.55")).unwrap();
        assert!(pair.value.unwrap() < 7.5);
    }

    #[test]
    fn test_screw_on_holder_mount() {
        let mut l = layout();
        let frame = Frame::at(Vec3::new(0.0, 0.0, 10.0));
        l.attachments.screws = Ok(vec![Placement { index: 0.5, frame }]);
        l.attachments.board = Some(Ok(vec![BoardPlacement {
            mount: BoardMount::TopLeft,
            index: 0.5,
            frame,
        }]));
        let report = validator().validate(&l);
        let clash = report.errors_of(ErrorCode::AttachmentClearance);
        assert_eq!(clash.len(), 1);
        assert!(clash[0].detail.contains("screw inserts / microcontroller holder"), "{}", clash[0].detail);
        assert!(clash[0].value.unwrap() < 1e-9);
    }

    #[test]
    fn test_report_display() {
        let mut l = layout();
        l.triangulation.boundary.clear();
        let text = validator().validate(&l).to_string();
        assert!(text.contains("valid=false"));
        assert!(text.contains("BoundaryTooShort"));
    }
}
