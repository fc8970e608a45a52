//! One layout run: keys in, case scaffolding out.
//!
//! Stages run strictly in order. Each stage's failure is tagged with the
//! [`Stage`] it came from; attachment failures are kept per category in the
//! finished layout instead of aborting the run.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::attachment::{AttachmentLayout, place_attachments};
use crate::config::{PLATE_HEIGHT, ShellConfig, ShellMode};
use crate::error::{AtStage, PipelineError, ShellError, ShellResult, Stage};
use crate::floor::{Floor, compute_floor};
use crate::footprint::{Key, KeyPoint, flatten_frame, key_points, separate_sockets_2d};
use crate::geometry::{Frame, Vec2};
use crate::triangulation::{self, TriangulationSummary};
use crate::wall::{WallCrossSection, build_ring, synthesizer_for};
use crate::web::{WebFace, WebInputs, thicken};

/// Everything the modeling kernel needs to build the case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellLayout {
    pub mode: ShellMode,
    pub floor: Floor,
    /// 3D key corners, indexed like the triangulation points.
    pub key_points: Vec<KeyPoint>,
    pub triangulation: TriangulationSummary,
    /// Wall cross-sections after web thickening moved them.
    pub walls: Vec<WallCrossSection>,
    pub web_top: WebFace,
    pub web_bottom: WebFace,
    /// Web thickness per key, for triangles that keep their key's thickness.
    pub web_thickness: Vec<f64>,
    pub attachments: AttachmentLayout,
}

impl ShellLayout {
    pub fn to_json(&self) -> ShellResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> ShellResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn boundary(&self) -> &[usize] {
        &self.triangulation.boundary
    }

    /// How far wall frames may reach under the floor. Block shells let the
    /// outer profile run down through the bottom plate.
    pub fn floor_allowance(&self) -> f64 {
        match self.mode {
            ShellMode::Block => PLATE_HEIGHT,
            _ => 0.0,
        }
    }

    /// Attachment failures, tagged with the attachment stage.
    pub fn attachment_errors(&self) -> Vec<PipelineError> {
        self.attachments
            .errors()
            .into_iter()
            .map(|e| PipelineError {
                stage: Stage::Attachments,
                source: e.clone(),
            })
            .collect()
    }
}

/// Runs every stage for one configuration.
#[derive(Debug, Clone, Default)]
pub struct ShellPipeline {
    config: ShellConfig,
}

impl ShellPipeline {
    pub fn new(config: ShellConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// 2D placement of every key: the explicit flat position when given,
    /// otherwise the flattened 3D position, pushed apart when they overlap.
    fn flat_holes(&self, keys: &[Key]) -> ShellResult<Vec<Frame>> {
        let mut holes: Vec<Frame> = keys
            .iter()
            .map(|k| {
                k.flat_position
                    .unwrap_or_else(|| flatten_frame(&k.position, self.config.flatten.max_tilt_deg))
            })
            .collect();
        if self.config.flatten.separate_sockets {
            separate_sockets_2d(keys, &mut holes)?;
        }
        Ok(holes)
    }

    #[instrument(skip_all, fields(keys = keys.len(), mode = ?self.config.mode))]
    pub fn run(&self, keys: &[Key]) -> Result<ShellLayout, PipelineError> {
        let config = &self.config;

        // ── Footprints ──────────────────────────────────────
        config.validate().at_stage(Stage::Footprints)?;
        if keys.is_empty() {
            return Err(ShellError::degenerate("no keys in the layout")).at_stage(Stage::Footprints);
        }
        if let Some(i) = keys.iter().position(|k| !k.position.is_finite()) {
            return Err(ShellError::degenerate(format!("key {i} has a NaN frame"))).at_stage(Stage::Footprints);
        }
        if let Some(i) = keys.iter().position(|k| !(k.aspect.is_finite() && k.aspect > 0.0)) {
            return Err(ShellError::degenerate(format!(
                "key {i} has aspect ratio {}, which must be positive",
                keys[i].aspect
            )))
            .at_stage(Stage::Footprints);
        }
        let holes: Vec<Frame> = keys.iter().map(|k| k.position).collect();
        let flat_holes = self.flat_holes(keys).at_stage(Stage::Footprints)?;
        let polys: Vec<Vec<Frame>> = keys
            .iter()
            .zip(&holes)
            .map(|(k, h)| k.critical_points(h, 0.0))
            .collect();
        let points = key_points(&polys, &holes);
        let flat_polys: Vec<Vec<Vec2>> = keys
            .iter()
            .zip(&flat_holes)
            .map(|(k, h)| {
                k.critical_points(h, 0.0)
                    .iter()
                    .map(|f| Vec2::from(f.origin()))
                    .collect()
            })
            .collect();
        let flat_points: Vec<Vec2> = flat_polys.iter().flatten().copied().collect();

        // ── Floor ───────────────────────────────────────────
        let floor = compute_floor(config, keys, &holes, &polys, &flat_points).at_stage(Stage::Floor)?;
        let synth = synthesizer_for(config, keys, floor);

        // ── Triangulation and hull ──────────────────────────
        let solution = triangulation::solve(&flat_polys, &points, synth.as_ref(), &config.hull).map_err(|source| {
            let stage = match source {
                ShellError::InvalidBoundary { .. } => Stage::Hull,
                _ => Stage::Triangulation,
            };
            PipelineError { stage, source }
        })?;

        // ── Walls ───────────────────────────────────────────
        let walls = build_ring(synth.as_ref(), &points, &solution.boundary, &solution.removed_triangles)
            .at_stage(Stage::Walls)?;

        // ── Web ─────────────────────────────────────────────
        let inputs = WebInputs {
            keys,
            holes: &holes,
            solution: &solution,
            synth: synth.as_ref(),
            min_thickness_factor: config.web.min_thickness_factor,
        };
        let web = thicken(&inputs, &points, &walls, &config.web).at_stage(Stage::Web)?;

        // ── Attachments ─────────────────────────────────────
        let attachments = place_attachments(config, &web.walls, &floor);

        info!(
            points = points.len(),
            boundary = solution.boundary.len(),
            walls = web.walls.len(),
            short_edges = web.top.short_edges().count() + web.bottom.short_edges().count(),
            attachments_complete = attachments.is_complete(),
            "shell layout finished"
        );
        Ok(ShellLayout {
            mode: config.mode,
            floor,
            key_points: points,
            triangulation: TriangulationSummary::from(&solution),
            walls: web.walls,
            web_top: web.top.to_face(),
            web_bottom: web.bottom.to_face(),
            web_thickness: synth.params().web_thickness.clone(),
            attachments,
        })
    }
}
