//! End-to-end layout scenarios.
//!
//! Categories:
//! 1. Grids: boundary shape, wall thickness, web coverage
//! 2. Carving: concavity sweeps on a notched layout
//! 3. Attachments: screw shortfalls, holder placement
//! 4. Walls: shroud presence, modes
//! 5. Failures: stage attribution of bad input

use shell_harness::assertions::*;
use shell_harness::helpers::{PITCH, l_shape, mx_at, outline_area, staggered_columns, thumb_arc, web_corner};
use shell_harness::oracle;
use shell_harness::workflow::check_verdicts;
use shell_harness::{HarnessError, LayoutBuilder};
use shell_kernel::config::BoardConfig;
use shell_kernel::web::Face;
use shell_kernel::{AttachmentKind, Frame, ShellError, Stage, Vec3};

// ══════════════════════════════════════════════════════════════════════════════
// Category 1: Grids
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn grid_2x2_boundary_skips_inner_corners() {
    let mut b = LayoutBuilder::basic().with_auto_check();
    b.grid("k", 2, 2, PITCH, 30.0).unwrap();
    b.build().unwrap();
    let layout = b.layout().unwrap();

    // Corners are numbered 4 * key + [TL, TR, BR, BL]; these four face the
    // middle of the grid.
    let inner = [2, 7, 9, 12];
    assert_not_on_boundary(layout, &inner, "2x2 grid").unwrap();
    b.assert_boundary_len(8, 12).unwrap();
    assert_eq!(layout.key_points.len(), 16);
}

#[test]
fn grid_2x2_web_spans_every_gap() {
    let mut b = LayoutBuilder::basic();
    b.grid("k", 2, 2, PITCH, 30.0).unwrap();
    let layout = b.build().unwrap();

    // Socket interiors are dropped, so every remaining triangle joins
    // corners of at least two different keys.
    let t = &layout.triangulation;
    assert!(!t.triangles.is_empty());
    for tri in &t.triangles {
        let owners: Vec<usize> = tri.iter().map(|&v| v / 4).collect();
        assert!(
            owners.iter().any(|&o| o != owners[0]),
            "triangle {:?} lies inside one socket",
            tri
        );
    }
}

#[test]
fn grid_wall_thickness_matches_config() {
    let mut b = LayoutBuilder::basic();
    b.configure(|c| c.web.thicken = false);
    b.grid("k", 3, 2, PITCH, 30.0).unwrap();
    let layout = b.build().unwrap();
    let verdict = oracle::check_wall_thickness(layout, 4.0, 1e-3);
    assert!(verdict.passed, "{}", verdict.detail);
}

#[test]
fn stepped_web_fails_once_an_edge_is_pulled_back() {
    let mut b = LayoutBuilder::basic();
    b.mx("low", 0.0, 0.0, 30.0).unwrap();
    b.mx("high", 24.0, 0.0, 38.0).unwrap();
    let mut layout = b.build().unwrap().clone();
    let verdict = oracle::check_web_lower_bound(&layout);
    assert!(verdict.passed, "{}", verdict.detail);

    // Undo the offsets of the first thickened bottom edge.
    let edge = *layout
        .web_bottom
        .edges
        .iter()
        .find(|e| e.offset_prev > 0.0 || e.offset_next > 0.0)
        .expect("the lower key's bottom web is thickened");
    for side in 0..2 {
        if let Some(original) = web_corner(&layout, Face::Bottom, edge.corners[side]) {
            layout.web_bottom.points[edge.moved[side]] = original;
        }
    }
    let verdict = oracle::check_web_lower_bound(&layout);
    assert!(!verdict.passed, "{}", verdict.detail);
    assert!(verdict.detail.contains(&format!("{:?}", edge.corners)), "{}", verdict.detail);
}

#[test]
fn grid_outline_stays_near_the_sockets() {
    let mut b = LayoutBuilder::basic();
    b.grid("k", 3, 2, PITCH, 30.0).unwrap();
    let layout = b.build().unwrap();
    // Socket edges run from -9 to 2 * PITCH + 9 in x and -PITCH - 9 to 9 in y.
    assert_outline_within(layout, [-9.0, -PITCH - 9.0], [2.0 * PITCH + 9.0, 9.0], 1e-6, "3x2 grid").unwrap();
    let area = outline_area(layout);
    assert!(area > 4.0 * 18.0 * 18.0, "outline area {area}");
}

#[test]
fn grid_passes_every_oracle() {
    let mut b = LayoutBuilder::basic();
    b.grid("k", 4, 3, PITCH, 30.0).unwrap();
    b.build().unwrap();
    let checks = b.check_layout().unwrap();
    let failed: Vec<_> = checks.iter().filter(|v| !v.passed).collect();
    assert!(failed.is_empty(), "failed oracles: {:?}", failed);
}

#[test]
fn staggered_columns_build_cleanly() {
    let mut b = LayoutBuilder::basic().with_auto_check();
    b.keys("c", staggered_columns(3, &[0.0, 4.0, 8.0, 4.0, -2.0], 30.0)).unwrap();
    b.build().unwrap();
    b.assert_valid().unwrap();
}

#[test]
fn thumb_arc_builds_cleanly() {
    let mut b = LayoutBuilder::basic().with_auto_check();
    b.keys("t", thumb_arc(3, 15.0, 25.0)).unwrap();
    b.build().unwrap();
    b.assert_valid().unwrap();
}

// ══════════════════════════════════════════════════════════════════════════════
// Category 2: Carving
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn concavity_sweep_keeps_l_shape_simple() {
    for concavity in [0.0, 0.5, 1.0, 1.5, 2.0, 3.0, 5.0] {
        let mut b = LayoutBuilder::basic();
        b.configure(|c| c.hull.concavity = concavity);
        b.keys("l", l_shape(30.0)).unwrap();
        let layout = b.build().unwrap();
        assert!(
            layout.boundary().len() >= 4,
            "concavity {concavity}: boundary {:?}",
            layout.boundary()
        );
        let simple = oracle::check_boundary_simple(layout);
        assert!(simple.passed, "concavity {concavity}: {}", simple.detail);
        let cycle = oracle::check_boundary_cycle(layout);
        assert!(cycle.passed, "concavity {concavity}: {}", cycle.detail);
    }
}

#[test]
fn no_cut_keeps_the_convex_outline() {
    let mut carved = LayoutBuilder::basic();
    carved.keys("l", l_shape(30.0)).unwrap();
    let carved_area = outline_area(carved.build().unwrap());

    let mut hull = LayoutBuilder::basic();
    hull.configure(|c| c.hull.no_cut = true);
    hull.keys("l", l_shape(30.0)).unwrap();
    let hull_area = outline_area(hull.build().unwrap());

    assert!(carved_area <= hull_area + 1e-9, "carved {carved_area} > hull {hull_area}");
}

// ══════════════════════════════════════════════════════════════════════════════
// Category 3: Attachments
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn seven_screws_on_four_walls_is_unplaceable() {
    let mut b = LayoutBuilder::basic();
    b.configure(|c| c.screws.indices = vec![-1.0; 7]);
    b.mx("only", 0.0, 0.0, 30.0).unwrap();
    let layout = b.build().unwrap();
    assert_eq!(layout.walls.len(), 4);
    b.assert_unplaceable(AttachmentKind::Screws).unwrap();
    match &b.layout().unwrap().attachments.screws {
        Err(ShellError::Unplaceable { detail, .. }) => {
            assert!(detail.contains("placed 4 of 7"), "detail: {detail}")
        }
        other => panic!("expected unplaceable screws, got {other:?}"),
    }
}

#[test]
fn four_screws_on_a_grid_are_placed() {
    let mut b = LayoutBuilder::basic();
    b.grid("k", 3, 2, PITCH, 30.0).unwrap();
    let layout = b.build().unwrap();
    assert_screw_count(layout, 4, "3x2 grid").unwrap();
    b.assert_attachments_complete().unwrap();
    let verdict = oracle::check_attachment_clearance(b.layout().unwrap(), &b.config);
    assert!(verdict.passed, "{}", verdict.detail);
}

#[test]
fn manual_screw_indices_are_kept() {
    let mut b = LayoutBuilder::basic();
    b.configure(|c| c.screws.indices = vec![0.5, 2.5]);
    b.grid("k", 2, 2, PITCH, 30.0).unwrap();
    let layout = b.build().unwrap();
    let at: Vec<f64> = layout.attachments.screw_placements().iter().map(|s| s.index).collect();
    assert_eq!(at, vec![0.5, 2.5]);
}

#[test]
fn holder_failure_does_not_erase_screws() {
    let mut b = LayoutBuilder::basic();
    b.configure(|c| c.board = Some(BoardConfig::default()));
    b.mx("only", 0.0, 0.0, 30.0).unwrap();
    b.build().unwrap();
    let layout = b.layout().unwrap();
    assert!(layout.attachments.board.is_some());
    assert!(layout.attachments.connector.is_some());
    b.assert_unplaceable(AttachmentKind::Board).unwrap();
    assert_eq!(layout.attachments.screw_placements().len(), 4);
    let errors = layout.attachment_errors();
    assert!(errors.iter().all(|e| e.stage == Stage::Attachments));
    assert!(
        errors.iter().any(|e| e.user_message().contains("microcontroller holder")),
        "{:?}",
        errors
    );
}

#[test]
fn holder_is_searched_on_a_wide_layout() {
    let mut b = LayoutBuilder::basic();
    b.configure(|c| c.board = Some(BoardConfig::default()));
    b.grid("k", 5, 3, PITCH, 30.0).unwrap();
    let layout = b.build().unwrap();
    assert!(layout.attachments.connector.is_some());
    assert!(layout.attachments.board.is_some());
    b.assert_valid().unwrap();
    let verdict = oracle::check_attachment_clearance(b.layout().unwrap(), &b.config);
    assert!(verdict.passed, "{}", verdict.detail);
}

// ══════════════════════════════════════════════════════════════════════════════
// Category 4: Walls and modes
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn shroud_frames_follow_the_shroud_setting() {
    for (shrouding, expect) in [(2.0, true), (1e-7, false), (0.0, false)] {
        let mut b = LayoutBuilder::basic();
        b.configure(|c| c.wall.shrouding = shrouding);
        b.mx("only", 0.0, 0.0, 30.0).unwrap();
        b.build().unwrap();
        let layout = b.layout().unwrap();
        assert!(
            layout.walls.iter().all(|w| w.has_shroud() == expect),
            "shrouding {shrouding}"
        );
        let verdict = oracle::check_shroud(layout, &b.config);
        assert!(verdict.passed, "{}", verdict.detail);
    }
}

#[test]
fn every_mode_builds_a_sound_ring() {
    let builders = [
        LayoutBuilder::basic(),
        LayoutBuilder::stilts(),
        LayoutBuilder::tilted(10.0),
        LayoutBuilder::block(),
    ];
    for mut b in builders {
        b.grid("k", 3, 2, PITCH, 30.0).unwrap();
        let mode = format!("{:?}", b.config.mode);
        let layout = b.build().unwrap_or_else(|e| panic!("{mode}: {e}"));
        check_verdicts(&oracle::run_layout_checks(layout)).unwrap_or_else(|e| panic!("{mode}: {e}"));
    }
}

#[test]
fn tilted_floor_lies_under_every_wall() {
    let mut b = LayoutBuilder::tilted(12.0);
    b.grid("k", 3, 3, PITCH, 40.0).unwrap();
    let layout = b.build().unwrap();
    assert!((layout.floor.tilt_deg() - 12.0).abs() < 1e-9);
    let verdict = oracle::check_walls_above_floor(layout, 1e-3);
    assert!(verdict.passed, "{}", verdict.detail);
}

// ══════════════════════════════════════════════════════════════════════════════
// Category 5: Failures
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn empty_layout_fails_at_footprints() {
    let mut b = LayoutBuilder::basic();
    let result = b.build().map(|_| ());
    assert_failed_at(&result, Stage::Footprints, "empty").unwrap();
    assert!(matches!(b.layout(), Err(HarnessError::NotBuilt)));
}

#[test]
fn nan_key_fails_at_footprints() {
    let mut b = LayoutBuilder::basic();
    b.mx("a", 0.0, 0.0, 30.0).unwrap();
    b.mx("b", PITCH, 0.0, 30.0).unwrap();
    b.move_key("b", Frame::at(Vec3::new(f64::NAN, 0.0, 30.0))).unwrap();
    let result = b.build().map(|_| ());
    assert_failed_at(&result, Stage::Footprints, "nan").unwrap();
}

#[test]
fn zero_aspect_key_fails_at_footprints() {
    let mut b = LayoutBuilder::basic();
    b.mx("a", 0.0, 0.0, 30.0).unwrap();
    b.key("flat", mx_at(PITCH, 0.0, 30.0).with_aspect(0.0)).unwrap();
    let result = b.build().map(|_| ());
    assert_failed_at(&result, Stage::Footprints, "aspect").unwrap();
    match result {
        Err(HarnessError::Pipeline(e)) => assert!(e.to_string().contains("aspect ratio"), "{e}"),
        other => panic!("expected a pipeline error, got {other:?}"),
    }
}

#[test]
fn bad_config_fails_before_geometry() {
    let mut b = LayoutBuilder::basic();
    b.configure(|c| c.wall.z_offset = 0.0);
    b.grid("k", 2, 2, PITCH, 30.0).unwrap();
    let result = b.build().map(|_| ());
    assert_failed_at(&result, Stage::Footprints, "z offset").unwrap();
}
