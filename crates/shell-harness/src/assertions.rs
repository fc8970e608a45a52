//! Rich assertion helpers with diagnostic output.
//!
//! Every failure names the expected and actual values plus enough of the
//! layout to see what went wrong without rerunning under a debugger.

use shell_kernel::{ShellLayout, Stage};

use crate::helpers::{HarnessError, outline};

/// Assert the boundary has exactly `expected` points.
pub fn assert_boundary_len(layout: &ShellLayout, expected: usize, ctx: &str) -> Result<(), HarnessError> {
    let actual = layout.boundary().len();
    if actual == expected {
        Ok(())
    } else {
        Err(HarnessError::AssertionFailed {
            detail: format!(
                "[{}] expected {} boundary points, got {}: {:?}",
                ctx,
                expected,
                actual,
                layout.boundary(),
            ),
        })
    }
}

/// Assert no point in `excluded` made it onto the boundary.
pub fn assert_not_on_boundary(layout: &ShellLayout, excluded: &[usize], ctx: &str) -> Result<(), HarnessError> {
    let hit: Vec<usize> = layout
        .boundary()
        .iter()
        .copied()
        .filter(|p| excluded.contains(p))
        .collect();
    if hit.is_empty() {
        Ok(())
    } else {
        Err(HarnessError::AssertionFailed {
            detail: format!(
                "[{}] points {:?} are on the boundary {:?}",
                ctx,
                hit,
                layout.boundary(),
            ),
        })
    }
}

/// Assert the wall outline stays within `tol` of the given XY box.
pub fn assert_outline_within(
    layout: &ShellLayout,
    min: [f64; 2],
    max: [f64; 2],
    tol: f64,
    ctx: &str,
) -> Result<(), HarnessError> {
    for (i, p) in outline(layout).iter().enumerate() {
        if p.x < min[0] - tol || p.y < min[1] - tol || p.x > max[0] + tol || p.y > max[1] + tol {
            return Err(HarnessError::AssertionFailed {
                detail: format!(
                    "[{}] outline point {} at ({:.3}, {:.3}) outside ({:.1}, {:.1}) -> ({:.1}, {:.1})",
                    ctx, i, p.x, p.y, min[0], min[1], max[0], max[1],
                ),
            });
        }
    }
    Ok(())
}

/// Assert exactly `expected` screws were placed.
pub fn assert_screw_count(layout: &ShellLayout, expected: usize, ctx: &str) -> Result<(), HarnessError> {
    match &layout.attachments.screws {
        Ok(screws) if screws.len() == expected => Ok(()),
        Ok(screws) => {
            let at: Vec<f64> = screws.iter().map(|s| s.index).collect();
            Err(HarnessError::AssertionFailed {
                detail: format!("[{}] expected {} screws, got {} at {:?}", ctx, expected, screws.len(), at),
            })
        }
        Err(e) => Err(HarnessError::AssertionFailed {
            detail: format!("[{}] expected {} screws, placement failed: {}", ctx, expected, e),
        }),
    }
}

/// Assert a pipeline failure came from `stage`.
pub fn assert_failed_at(result: &Result<(), HarnessError>, stage: Stage, ctx: &str) -> Result<(), HarnessError> {
    match result {
        Err(HarnessError::Pipeline(e)) if e.stage == stage => Ok(()),
        Err(HarnessError::Pipeline(e)) => Err(HarnessError::AssertionFailed {
            detail: format!("[{}] expected failure at {}, got {}", ctx, stage, e),
        }),
        Err(other) => Err(HarnessError::AssertionFailed {
            detail: format!("[{}] expected a pipeline failure at {}, got {}", ctx, stage, other),
        }),
        Ok(()) => Err(HarnessError::AssertionFailed {
            detail: format!("[{}] expected failure at {}, but the run succeeded", ctx, stage),
        }),
    }
}
