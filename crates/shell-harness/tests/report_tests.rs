//! Tests for the report module.

use shell_harness::helpers::PITCH;
use shell_harness::{HarnessError, LayoutBuilder};
use shell_kernel::config::BoardConfig;

#[test]
fn report_needs_a_built_layout() {
    let mut b = LayoutBuilder::basic();
    b.mx("a", 0.0, 0.0, 30.0).unwrap();
    assert!(matches!(b.report(), Err(HarnessError::NotBuilt)));
}

#[test]
fn report_contains_header_and_counts() {
    let mut b = LayoutBuilder::basic();
    b.grid("k", 2, 2, PITCH, 30.0).unwrap();
    b.build().unwrap();

    let text = b.report().unwrap().to_text();
    assert!(text.starts_with("=== Shell Layout Report ==="), "{}", text);
    assert!(text.contains("Mode: Basic | Keys: 4"), "Should name mode and keys: {}", text);
    assert!(text.contains("Triangulation: 16 points"), "Should count 16 corners: {}", text);
    assert!(text.contains("Boundary:"), "Should describe the boundary");
}

#[test]
fn report_contains_both_web_faces() {
    let mut b = LayoutBuilder::basic();
    b.grid("k", 3, 2, PITCH, 30.0).unwrap();
    b.build().unwrap();

    let report = b.report().unwrap();
    assert_eq!(report.web_summaries.len(), 2);
    let text = report.to_text();
    assert!(text.contains("Web:"), "Should have web section");
    assert!(text.contains("Top:"), "Should list the top face: {}", text);
    assert!(text.contains("Bottom:"), "Should list the bottom face: {}", text);
}

#[test]
fn report_contains_wall_bounds() {
    let mut b = LayoutBuilder::basic();
    b.mx("a", 0.0, 0.0, 30.0).unwrap();
    b.build().unwrap();

    let report = b.report().unwrap();
    let (min, max) = report.bounding_box.unwrap();
    assert!(min[0] < -9.0 && max[0] > 9.0, "walls sit outside the socket");
    assert!(report.to_text().contains("Wall Bounds:"));
}

#[test]
fn successful_report_has_no_errors() {
    let mut b = LayoutBuilder::basic();
    b.grid("k", 3, 2, PITCH, 30.0).unwrap();
    b.build().unwrap();

    let report = b.report().unwrap();
    assert!(report.all_passed(), "{}", report);
    let text = report.to_text();
    assert!(text.contains("[OK] screws: 4 at"), "{}", text);
    assert!(text.contains("Oracle Results (9 checks):"), "{}", text);
    assert!(text.contains("Errors: none"), "{}", text);
}

#[test]
fn report_lists_failed_attachments() {
    let mut b = LayoutBuilder::basic();
    b.configure(|c| c.screws.indices = vec![-1.0; 7]);
    b.mx("a", 0.0, 0.0, 30.0).unwrap();
    b.build().unwrap();

    let text = b.report().unwrap().to_text();
    assert!(text.contains("[FAILED] screws:"), "{}", text);
    assert!(text.contains("Errors (1):"), "{}", text);
    assert!(text.contains("placed 4 of 7"), "{}", text);
}

#[test]
fn report_lists_holder_categories() {
    let mut b = LayoutBuilder::basic();
    b.configure(|c| c.board = Some(BoardConfig::default()));
    b.mx("a", 0.0, 0.0, 30.0).unwrap();
    b.build().unwrap();

    let report = b.report().unwrap();
    let categories: Vec<&str> = report.attachments.iter().map(|a| a.category.as_str()).collect();
    assert_eq!(categories, vec!["connector", "board", "screws"]);
    let text = report.to_text();
    assert!(text.contains("[FAILED] connector:"), "{}", text);
    assert!(text.contains("[FAILED] board:"), "{}", text);
    assert!(text.contains("Errors (2):"), "{}", text);
}

#[test]
fn display_matches_to_text() {
    let mut b = LayoutBuilder::stilts();
    b.grid("k", 2, 2, PITCH, 30.0).unwrap();
    b.build().unwrap();

    let report = b.report().unwrap();
    assert_eq!(report.to_string(), report.to_text());
    assert!(report.to_text().contains("Mode: Stilts"));
}

#[test]
fn report_serialises_to_json() {
    let mut b = LayoutBuilder::basic();
    b.grid("k", 2, 1, PITCH, 30.0).unwrap();
    b.build().unwrap();

    let json = b.report().unwrap().to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["key_count"], 2);
    assert_eq!(value["oracle_results"].as_array().unwrap().len(), 9);
    assert_eq!(value["attachments"][0]["category"], "screws");
}
