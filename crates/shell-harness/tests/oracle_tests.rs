//! Tests for verification oracles.

use shell_harness::helpers::{PITCH, key_grid, mx_at, web_corner, web_edge_thickness};
use shell_harness::oracle::*;
use shell_kernel::attachment::{BoardMount, BoardPlacement, InsertDimensions, Placement, WallRing};
use shell_kernel::web::{Face, ThicknessLimit, WebFace};
use shell_kernel::{AttachmentKind, Frame, ShellConfig, ShellError, ShellLayout, ShellPipeline, Vec3};

/// A 3x2 grid run through the default pipeline.
fn grid_layout(config: &ShellConfig) -> ShellLayout {
    ShellPipeline::new(config.clone())
        .run(&key_grid(3, 2, PITCH, 30.0))
        .unwrap()
}

fn single_key_layout() -> ShellLayout {
    ShellPipeline::new(ShellConfig::basic())
        .run(&[mx_at(0.0, 0.0, 30.0)])
        .unwrap()
}

fn screw_boss_centre(layout: &ShellLayout, config: &ShellConfig, index: f64) -> Vec3 {
    let dims = InsertDimensions::for_config(&config.screws);
    WallRing::new(&layout.walls, dims, config.mode, &layout.floor)
        .unwrap()
        .screw_origin(index)
}

// ── Triangulation Oracle Tests ──────────────────────────────────────────

#[test]
fn triangles_valid_passes_for_grid() {
    let layout = grid_layout(&ShellConfig::basic());
    let result = check_triangles_valid(&layout);
    assert!(result.passed, "Grid triangles should be valid: {}", result.detail);
}

#[test]
fn triangles_valid_catches_repeated_corner() {
    let mut layout = grid_layout(&ShellConfig::basic());
    layout.triangulation.triangles.push([0, 0, 1]);
    let result = check_triangles_valid(&layout);
    assert!(!result.passed);
    assert!(result.detail.contains("triangulation [0, 0, 1]"), "{}", result.detail);
}

#[test]
fn triangles_valid_catches_out_of_range_web_corner() {
    let mut layout = grid_layout(&ShellConfig::basic());
    let n = layout.web_bottom.points.len();
    layout.web_bottom.triangles.push([0, 1, n]);
    let result = check_triangles_valid(&layout);
    assert!(!result.passed);
    assert!(result.detail.contains("web_bottom"), "{}", result.detail);
}

#[test]
fn boundary_cycle_reports_length() {
    let layout = grid_layout(&ShellConfig::basic());
    let result = check_boundary_cycle(&layout);
    assert!(result.passed, "{}", result.detail);
    assert_eq!(result.value, Some(layout.boundary().len() as f64));
}

#[test]
fn boundary_cycle_catches_repeat() {
    let mut layout = grid_layout(&ShellConfig::basic());
    let first = layout.triangulation.boundary[0];
    layout.triangulation.boundary.push(first);
    let result = check_boundary_cycle(&layout);
    assert!(!result.passed);
    assert!(result.detail.contains("1 repeated"), "{}", result.detail);
}

#[test]
fn boundary_cycle_catches_short_boundary() {
    let mut layout = grid_layout(&ShellConfig::basic());
    layout.triangulation.boundary.truncate(2);
    let result = check_boundary_cycle(&layout);
    assert!(!result.passed);
    assert_eq!(result.value, Some(2.0));
}

#[test]
fn boundary_simple_catches_bowtie() {
    let mut layout = single_key_layout();
    assert_eq!(layout.boundary().len(), 4);
    assert!(check_boundary_simple(&layout).passed);
    layout.triangulation.boundary.swap(1, 2);
    let result = check_boundary_simple(&layout);
    assert!(!result.passed, "Swapped corners should cross: {}", result.detail);
}

// ── Wall Oracle Tests ───────────────────────────────────────────────────

#[test]
fn walls_finite_catches_nan_frame() {
    let mut layout = grid_layout(&ShellConfig::basic());
    assert!(check_walls_finite(&layout).passed);
    layout.walls[1].mi = Frame::at(Vec3::new(f64::NAN, 0.0, 0.0));
    let result = check_walls_finite(&layout);
    assert!(!result.passed);
    assert!(result.detail.contains("[1]"), "{}", result.detail);
}

#[test]
fn walls_finite_catches_missing_wall() {
    let mut layout = grid_layout(&ShellConfig::basic());
    layout.walls.pop();
    let result = check_walls_finite(&layout);
    assert!(!result.passed);
    assert!(result.detail.contains("walls for"), "{}", result.detail);
}

#[test]
fn walls_above_floor_catches_sunken_frame() {
    let mut layout = grid_layout(&ShellConfig::basic());
    assert!(check_walls_above_floor(&layout, 1e-3).passed);
    layout.walls[0].bo = layout.walls[0].bo.translated(Vec3::new(0.0, 0.0, -5.0));
    let result = check_walls_above_floor(&layout, 1e-3);
    assert!(!result.passed);
    let value = result.value.unwrap();
    assert!(value < -4.9, "lowest frame should be 5 below the floor, got {value}");
}

#[test]
fn wall_thickness_measures_lower_section() {
    let mut config = ShellConfig::basic();
    config.web.thicken = false;
    let layout = grid_layout(&config);
    let result = check_wall_thickness(&layout, 4.0, 1e-3);
    assert!(result.passed, "{}", result.detail);

    let result = check_wall_thickness(&layout, 5.0, 1e-3);
    assert!(!result.passed);
    let worst = result.value.unwrap();
    assert!((worst + 1.0).abs() < 1e-3, "expected 1 mm too thin, got {worst}");
}

#[test]
fn shroud_matches_config() {
    let mut config = ShellConfig::basic();
    let layout = grid_layout(&config);
    assert!(check_shroud(&layout, &config).passed);

    config.wall.shrouding = 2.0;
    let result = check_shroud(&layout, &config);
    assert!(!result.passed);
    assert!(result.detail.contains("expected"), "{}", result.detail);
}

// ── Web Oracle Tests ────────────────────────────────────────────────────

/// Two keys with the right one raised 8 mm, so the lower key's web slopes
/// away and gets thickened.
fn stepped_layout() -> ShellLayout {
    ShellPipeline::new(ShellConfig::basic())
        .run(&[mx_at(0.0, 0.0, 30.0), mx_at(24.0, 0.0, 38.0)])
        .unwrap()
}

/// Put the moved corners of the first reinforced edge back onto the
/// corners across the gap, flattening the web there. Returns the face
/// and the edge's index.
fn flatten_first_edge(layout: &mut ShellLayout) -> (Face, usize) {
    for face in [Face::Top, Face::Bottom] {
        let web = match face {
            Face::Top => &layout.web_top,
            Face::Bottom => &layout.web_bottom,
        };
        let Some(i) = web.edges.iter().position(|e| e.across.iter().any(Option::is_some)) else {
            continue;
        };
        let edge = web.edges[i];
        let targets: Vec<(usize, Frame)> = (0..2)
            .filter_map(|s| Some((edge.moved[s], web_corner(layout, face, edge.across[s]?)?)))
            .collect();
        let web = web_mut(layout, face);
        for (m, frame) in targets {
            web.points[m] = frame;
        }
        return (face, i);
    }
    panic!("stepped layout has no reinforced edge with a neighbour");
}

fn web_mut(layout: &mut ShellLayout, face: Face) -> &mut WebFace {
    match face {
        Face::Top => &mut layout.web_top,
        Face::Bottom => &mut layout.web_bottom,
    }
}

#[test]
fn web_lower_bound_passes_for_stepped_keys() {
    let layout = stepped_layout();
    let edges = layout.web_top.edges.len() + layout.web_bottom.edges.len();
    assert!(edges > 0, "stepped keys should reinforce at least one edge");
    let result = check_web_lower_bound(&layout);
    assert!(result.passed, "{}", result.detail);
    assert!(result.detail.contains(&format!("{edges} edges reinforced")), "{}", result.detail);
}

#[test]
fn web_edge_thickness_matches_recorded_value() {
    let layout = stepped_layout();
    for web in [&layout.web_top, &layout.web_bottom] {
        for e in web.edges.iter().filter(|e| e.achieved.is_some()) {
            let actual = web_edge_thickness(&layout, web, e).unwrap();
            let recorded = e.achieved.unwrap();
            assert!((actual - recorded).abs() < 1e-6, "{:?}: {actual} vs {recorded}", e.corners);
        }
    }
}

#[test]
fn web_lower_bound_catches_flattened_edge() {
    let mut layout = stepped_layout();
    flatten_first_edge(&mut layout);
    let result = check_web_lower_bound(&layout);
    assert!(!result.passed, "Flattened edge should be too thin: {}", result.detail);
    assert!(result.detail.contains("0.000 thick"), "{}", result.detail);
}

#[test]
fn web_lower_bound_accepts_named_limit_that_matches_points() {
    let mut layout = stepped_layout();
    let (face, i) = flatten_first_edge(&mut layout);
    let edge = &mut web_mut(&mut layout, face).edges[i];
    edge.achieved = Some(0.0);
    edge.limit = ThicknessLimit::Keycap;
    let result = check_web_lower_bound(&layout);
    assert!(result.passed, "Keycap-limited edge is explained: {}", result.detail);
}

#[test]
fn web_lower_bound_rejects_limit_thinner_than_recorded() {
    let mut layout = stepped_layout();
    let (face, i) = flatten_first_edge(&mut layout);
    web_mut(&mut layout, face).edges[i].limit = ThicknessLimit::Wall;
    let result = check_web_lower_bound(&layout);
    assert!(!result.passed, "Points thinner than recorded: {}", result.detail);
    assert!(result.detail.contains("Wall"), "{}", result.detail);
}

#[test]
fn web_lower_bound_rejects_missing_moved_corner() {
    let mut layout = stepped_layout();
    let (face, i) = flatten_first_edge(&mut layout);
    let web = web_mut(&mut layout, face);
    let n = web.points.len();
    web.edges[i].moved[0] = n;
    let result = check_web_lower_bound(&layout);
    assert!(!result.passed);
    assert!(result.detail.contains("missing"), "{}", result.detail);
}

// ── Attachment Oracle Tests ─────────────────────────────────────────────

#[test]
fn attachment_clearance_passes_for_auto_placement() {
    let config = ShellConfig::basic();
    let layout = grid_layout(&config);
    let result = check_attachment_clearance(&layout, &config);
    assert!(result.passed, "{}", result.detail);
    assert!(result.value.unwrap() >= 7.5);
}

#[test]
fn attachment_clearance_catches_crowded_screws() {
    let config = ShellConfig::basic();
    let mut layout = grid_layout(&config);
    let frame = Frame::at(Vec3::ZERO);
    layout.attachments.screws = Ok(vec![
        Placement { index: 0.5, frame },
        Placement { index: 0.55, frame },
    ]);
    let result = check_attachment_clearance(&layout, &config);
    assert!(!result.passed);
    assert!(result.value.unwrap() < 7.5);
}

#[test]
fn attachment_clearance_catches_screw_on_connector() {
    let config = ShellConfig::basic();
    let mut layout = grid_layout(&config);
    let screw = layout.attachments.screw_placements()[0];
    let frame = Frame::at(screw_boss_centre(&layout, &config, screw.index));
    layout.attachments.connector = Some(Ok(Placement { index: screw.index, frame }));
    let result = check_attachment_clearance(&layout, &config);
    assert!(!result.passed, "{}", result.detail);
    assert!(result.detail.contains("connector"), "{}", result.detail);
    assert!(result.value.unwrap() < 1e-9);
}

#[test]
fn attachment_clearance_catches_screw_on_holder_mount() {
    let config = ShellConfig::basic();
    let mut layout = grid_layout(&config);
    let screw = layout.attachments.screw_placements()[0];
    layout.attachments.board = Some(Ok(vec![BoardPlacement {
        mount: BoardMount::TopLeft,
        index: screw.index,
        frame: Frame::at(Vec3::ZERO),
    }]));
    let result = check_attachment_clearance(&layout, &config);
    assert!(!result.passed, "{}", result.detail);
    assert!(result.detail.contains("microcontroller holder"), "{}", result.detail);
}

#[test]
fn attachments_placed_reports_failures() {
    let mut layout = grid_layout(&ShellConfig::basic());
    assert!(check_attachments_placed(&layout).passed);
    layout.attachments.screws = Err(ShellError::unplaceable(AttachmentKind::Screws, "placed 1 of 4 screw inserts"));
    let result = check_attachments_placed(&layout);
    assert!(!result.passed);
    assert!(result.detail.contains("placed 1 of 4"), "{}", result.detail);
}

#[test]
fn validator_oracle_wraps_report() {
    let config = ShellConfig::basic();
    let mut layout = grid_layout(&config);
    assert!(check_validator(&layout, &config).passed);
    let first = layout.triangulation.boundary[0];
    layout.triangulation.boundary.push(first);
    let result = check_validator(&layout, &config);
    assert!(!result.passed);
    assert!(result.detail.contains("BoundaryRepeat"), "{}", result.detail);
}

// ── Aggregate Tests ─────────────────────────────────────────────────────

#[test]
fn aggregates_pass_for_grid() {
    let config = ShellConfig::basic();
    let layout = grid_layout(&config);
    let structural = run_layout_checks(&layout);
    assert_eq!(structural.len(), 5);
    let all = run_all_checks(&layout, &config);
    assert_eq!(all.len(), 9);
    for v in &all {
        assert!(v.passed, "{} failed: {}", v.oracle_name, v.detail);
    }
}
