//! Verification oracles: pure functions returning pass/fail verdicts.
//!
//! Each oracle returns an `OracleVerdict` with diagnostic detail, not panics.
//! This lets a test collect all failures in one pass.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use shell_kernel::attachment::{InsertDimensions, WallRing};
use shell_kernel::geometry::planar::is_simple_polygon;
use shell_kernel::validation::LayoutValidator;
use shell_kernel::web::ThicknessLimit;
use shell_kernel::{ShellConfig, ShellLayout};

use crate::helpers::{lower_wall_thickness, outline, web_edge_thickness};

/// The result of a single oracle check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleVerdict {
    pub oracle_name: String,
    pub passed: bool,
    pub detail: String,
    pub value: Option<f64>,
}

impl OracleVerdict {
    fn pass(name: &str, detail: String) -> Self {
        Self {
            oracle_name: name.to_string(),
            passed: true,
            detail,
            value: None,
        }
    }

    fn pass_val(name: &str, detail: String, value: f64) -> Self {
        Self {
            value: Some(value),
            ..Self::pass(name, detail)
        }
    }

    fn fail(name: &str, detail: String) -> Self {
        Self {
            oracle_name: name.to_string(),
            passed: false,
            detail,
            value: None,
        }
    }

    fn fail_val(name: &str, detail: String, value: f64) -> Self {
        Self {
            value: Some(value),
            ..Self::fail(name, detail)
        }
    }
}

// ── Triangulation Oracles ───────────────────────────────────────────────────

/// Every triangle of the triangulation and both web faces has three
/// distinct, in-range corners.
pub fn check_triangles_valid(layout: &ShellLayout) -> OracleVerdict {
    let meshes = [
        ("triangulation", layout.triangulation.points.len(), &layout.triangulation.triangles),
        ("web_top", layout.web_top.points.len(), &layout.web_top.triangles),
        ("web_bottom", layout.web_bottom.points.len(), &layout.web_bottom.triangles),
    ];
    let mut bad = Vec::new();
    let mut total = 0;
    for (name, n, triangles) in meshes {
        total += triangles.len();
        for t in triangles {
            let distinct = t[0] != t[1] && t[1] != t[2] && t[0] != t[2];
            if !distinct || t.iter().any(|&v| v >= n) {
                bad.push(format!("{name} {t:?}"));
            }
        }
    }
    if bad.is_empty() {
        OracleVerdict::pass("triangles_valid", format!("all {total} triangles valid"))
    } else {
        OracleVerdict::fail(
            "triangles_valid",
            format!("{} invalid triangles: {:?}", bad.len(), &bad[..bad.len().min(5)]),
        )
    }
}

/// The boundary is a single cycle visiting each point once.
pub fn check_boundary_cycle(layout: &ShellLayout) -> OracleVerdict {
    let boundary = layout.boundary();
    let unique: HashSet<usize> = boundary.iter().copied().collect();
    if boundary.len() < 3 {
        OracleVerdict::fail_val(
            "boundary_cycle",
            format!("boundary has only {} points", boundary.len()),
            boundary.len() as f64,
        )
    } else if unique.len() != boundary.len() {
        OracleVerdict::fail(
            "boundary_cycle",
            format!("{} repeated boundary points", boundary.len() - unique.len()),
        )
    } else {
        OracleVerdict::pass_val(
            "boundary_cycle",
            format!("{} boundary points, no repeats", boundary.len()),
            boundary.len() as f64,
        )
    }
}

/// The flattened outline does not cross itself.
pub fn check_boundary_simple(layout: &ShellLayout) -> OracleVerdict {
    if is_simple_polygon(&outline(layout)) {
        OracleVerdict::pass("boundary_simple", "outline is a simple polygon".into())
    } else {
        OracleVerdict::fail("boundary_simple", "outline intersects itself".into())
    }
}

// ── Wall Oracles ────────────────────────────────────────────────────────────

/// One cross-section per boundary point, every frame finite.
pub fn check_walls_finite(layout: &ShellLayout) -> OracleVerdict {
    let n = layout.boundary().len();
    if layout.walls.len() != n {
        return OracleVerdict::fail(
            "walls_finite",
            format!("{} walls for {} boundary points", layout.walls.len(), n),
        );
    }
    let bad: Vec<usize> = (0..layout.walls.len())
        .filter(|&i| !layout.walls[i].is_finite())
        .collect();
    if bad.is_empty() {
        OracleVerdict::pass("walls_finite", format!("all {n} walls finite"))
    } else {
        OracleVerdict::fail("walls_finite", format!("non-finite walls: {bad:?}"))
    }
}

/// No wall frame lies below the floor by more than `tol`, beyond the
/// plate allowance of block shells.
pub fn check_walls_above_floor(layout: &ShellLayout, tol: f64) -> OracleVerdict {
    let lowest = layout
        .walls
        .iter()
        .flat_map(|w| w.frames())
        .map(|f| layout.floor.height_of(f.origin()) + layout.floor_allowance())
        .fold(f64::INFINITY, f64::min);
    if lowest >= -tol {
        OracleVerdict::pass_val(
            "walls_above_floor",
            format!("lowest wall frame {lowest:.4} above floor"),
            lowest,
        )
    } else {
        OracleVerdict::fail_val(
            "walls_above_floor",
            format!("wall frame {:.4} below floor (tol={tol})", -lowest),
            lowest,
        )
    }
}

/// The lower wall section is `expected` thick everywhere, within `tol`.
pub fn check_wall_thickness(layout: &ShellLayout, expected: f64, tol: f64) -> OracleVerdict {
    let worst = layout
        .walls
        .iter()
        .map(|w| lower_wall_thickness(w) - expected)
        .fold(0.0f64, |acc, d| if d.abs() > acc.abs() { d } else { acc });
    if worst.abs() <= tol {
        OracleVerdict::pass_val(
            "wall_thickness",
            format!("all walls {expected} thick (worst deviation {worst:.2e})"),
            worst,
        )
    } else {
        OracleVerdict::fail_val(
            "wall_thickness",
            format!("wall thickness off by {worst:.4} (expected {expected}, tol={tol})"),
            worst,
        )
    }
}

/// Shroud frames are present exactly when shrouding is configured.
pub fn check_shroud(layout: &ShellLayout, config: &ShellConfig) -> OracleVerdict {
    let want = config.has_shroud();
    let with = layout.walls.iter().filter(|w| w.has_shroud()).count();
    let expected = if want { layout.walls.len() } else { 0 };
    if with == expected {
        OracleVerdict::pass("shroud", format!("{with} of {} walls shrouded", layout.walls.len()))
    } else {
        OracleVerdict::fail(
            "shroud",
            format!("{with} of {} walls shrouded, expected {expected}", layout.walls.len()),
        )
    }
}

// ── Web Oracles ─────────────────────────────────────────────────────────────

/// Every reinforced edge is as thick as its target, measured from the web
/// points themselves. An edge may stay thinner only when it names the
/// constraint that stopped it and the points agree with what it recorded.
pub fn check_web_lower_bound(layout: &ShellLayout) -> OracleVerdict {
    const TOL: f64 = 1e-6;
    let edges: Vec<_> = [&layout.web_top, &layout.web_bottom]
        .into_iter()
        .flat_map(|web| web.edges.iter().map(move |e| (web, e)))
        .collect();
    let mut unexplained = Vec::new();
    for &(web, e) in &edges {
        let Some(achieved) = e.achieved else {
            continue;
        };
        let label = format!("key {} {:?} {:?}", e.key, e.corners, e.face);
        if e.moved.iter().any(|&m| m >= web.points.len()) {
            unexplained.push(format!("{label}: moved corner {:?} missing", e.moved));
            continue;
        }
        let Some(actual) = web_edge_thickness(layout, web, e) else {
            unexplained.push(format!("{label}: no corner across the gap"));
            continue;
        };
        let thin = actual < e.target - TOL;
        if thin && (e.limit == ThicknessLimit::Reached || actual < achieved - TOL) {
            unexplained.push(format!(
                "{label}: {actual:.3} thick, target {:.3}, recorded {achieved:.3} ({:?})",
                e.target, e.limit
            ));
        }
    }
    if unexplained.is_empty() {
        let short = edges.iter().filter(|(_, e)| e.is_short()).count();
        OracleVerdict::pass(
            "web_lower_bound",
            format!("{} edges reinforced, {short} short with a named limit", edges.len()),
        )
    } else {
        OracleVerdict::fail(
            "web_lower_bound",
            format!("{} thin edges: {:?}", unexplained.len(), unexplained),
        )
    }
}

// ── Attachment Oracles ──────────────────────────────────────────────────────

/// Placed screws, holder mounts and the connector keep the configured
/// spacing from each other. Screws and mounts are measured between boss
/// centres.
pub fn check_attachment_clearance(layout: &ShellLayout, config: &ShellConfig) -> OracleVerdict {
    let dims = InsertDimensions::for_config(&config.screws);
    let min = config.screws.min_clearance.unwrap_or(dims.min_spacing());
    let ring = match WallRing::new(&layout.walls, dims, config.mode, &layout.floor) {
        Ok(ring) => ring,
        Err(e) => return OracleVerdict::fail("attachment_clearance", e.to_string()),
    };
    let points = ring.attachment_points(&layout.attachments);
    if points.len() < 2 {
        return OracleVerdict::pass("attachment_clearance", format!("{} attachments placed", points.len()));
    }
    let Some((a, b, closest)) = ring
        .attachment_pairs(&layout.attachments)
        .into_iter()
        .min_by(|x, y| x.2.total_cmp(&y.2))
    else {
        return OracleVerdict::fail("attachment_clearance", "no attachment pairs".into());
    };
    if closest >= min - 1e-9 {
        OracleVerdict::pass_val(
            "attachment_clearance",
            format!("{} attachments, closest pair {closest:.2} apart (min {min:.2})", points.len()),
            closest,
        )
    } else {
        OracleVerdict::fail_val(
            "attachment_clearance",
            format!(
                "{} at {} and {} at {} are {closest:.2} apart, need {min:.2}",
                a.kind, a.index, b.kind, b.index
            ),
            closest,
        )
    }
}

/// Every attachment category either placed or was not requested.
pub fn check_attachments_placed(layout: &ShellLayout) -> OracleVerdict {
    let errors = layout.attachments.errors();
    if errors.is_empty() {
        OracleVerdict::pass(
            "attachments_placed",
            format!("{} screws placed", layout.attachments.screw_placements().len()),
        )
    } else {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        OracleVerdict::fail("attachments_placed", messages.join("; "))
    }
}

/// The kernel's own layout validator reports no errors.
pub fn check_validator(layout: &ShellLayout, config: &ShellConfig) -> OracleVerdict {
    let report = LayoutValidator::for_config(config).validate(layout);
    if report.valid {
        OracleVerdict::pass_val(
            "layout_validator",
            format!("valid, {} warnings", report.warning_count()),
            report.warning_count() as f64,
        )
    } else {
        OracleVerdict::fail_val(
            "layout_validator",
            report.to_string().trim_end().to_string(),
            report.error_count() as f64,
        )
    }
}

// ── Aggregates ──────────────────────────────────────────────────────────────

/// Structural checks that hold for every successful run.
pub fn run_layout_checks(layout: &ShellLayout) -> Vec<OracleVerdict> {
    vec![
        check_triangles_valid(layout),
        check_boundary_cycle(layout),
        check_boundary_simple(layout),
        check_walls_finite(layout),
        check_walls_above_floor(layout, 1e-3),
    ]
}

/// Structural checks plus the ones that need the configuration.
pub fn run_all_checks(layout: &ShellLayout, config: &ShellConfig) -> Vec<OracleVerdict> {
    let mut checks = run_layout_checks(layout);
    checks.push(check_shroud(layout, config));
    checks.push(check_web_lower_bound(layout));
    checks.push(check_attachment_clearance(layout, config));
    checks.push(check_validator(layout, config));
    checks
}
