use serde::{Deserialize, Serialize};
use std::fmt;

/// Attachment categories placed on the finished wall ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttachmentKind {
    Screws,
    Board,
    Connector,
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachmentKind::Screws => write!(f, "screw inserts"),
            AttachmentKind::Board => write!(f, "microcontroller holder"),
            AttachmentKind::Connector => write!(f, "connector"),
        }
    }
}

/// Errors produced by the shell geometry engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum ShellError {
    /// Zero-length offset vectors, too few distinct points, NaN key frames.
    #[error("degenerate input: {reason}")]
    DegenerateInput { reason: String },

    /// The wall boundary is not a single simple cycle, or carving ran away.
    #[error("invalid wall boundary: {reason}")]
    InvalidBoundary { reason: String },

    /// Every wall position was exhausted for one attachment category.
    #[error("could not place {kind}: {detail}")]
    Unplaceable { kind: AttachmentKind, detail: String },

    #[error("sockets still overlap after {iterations} separation iterations")]
    SocketsUnseparated { iterations: usize },

    #[error("triangulation failed: {reason}")]
    Triangulation { reason: String },

    /// A layout or configuration could not be written or read as JSON.
    #[error("serialization failed: {reason}")]
    Serialization { reason: String },
}

impl From<serde_json::Error> for ShellError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization { reason: e.to_string() }
    }
}

impl ShellError {
    pub fn degenerate(reason: impl Into<String>) -> Self {
        Self::DegenerateInput {
            reason: reason.into(),
        }
    }

    pub fn invalid_boundary(reason: impl Into<String>) -> Self {
        Self::InvalidBoundary {
            reason: reason.into(),
        }
    }

    pub fn unplaceable(kind: AttachmentKind, detail: impl Into<String>) -> Self {
        Self::Unplaceable {
            kind,
            detail: detail.into(),
        }
    }

    /// A message suitable for showing next to the offending configuration.
    pub fn user_message(&self) -> String {
        match self {
            ShellError::DegenerateInput { reason } => {
                format!("Some keys are placed in a way the case cannot follow ({reason}). Check for overlapping or stacked keys.")
            }
            ShellError::InvalidBoundary { .. } => {
                "The wall boundary could not be computed. Try lowering the concavity or moving keys closer together.".into()
            }
            ShellError::Unplaceable {
                kind: AttachmentKind::Screws,
                ..
            } => "There is not enough room along the walls for all requested screw inserts. Request fewer screws or place them manually.".into(),
            ShellError::Unplaceable {
                kind: AttachmentKind::Board | AttachmentKind::Connector,
                ..
            } => "Could not find a spot for the microcontroller holder. Try a different connector setting or move the holder.".into(),
            ShellError::SocketsUnseparated { .. } => {
                "Some key sockets overlap. Spread the keys further apart.".into()
            }
            ShellError::Triangulation { .. } => {
                "The key layout could not be triangulated. Check for keys that overlap in the top view.".into()
            }
            ShellError::Serialization { reason } => {
                format!("The saved layout could not be read or written ({reason}).")
            }
        }
    }
}

/// The pipeline stage at which a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Footprints,
    Floor,
    Triangulation,
    Hull,
    Walls,
    Web,
    Attachments,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Footprints => "footprints",
            Stage::Floor => "floor",
            Stage::Triangulation => "triangulation",
            Stage::Hull => "hull",
            Stage::Walls => "walls",
            Stage::Web => "web",
            Stage::Attachments => "attachments",
        };
        f.write_str(name)
    }
}

/// A [`ShellError`] tagged with the stage that raised it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: ShellError,
}

impl PipelineError {
    pub fn user_message(&self) -> String {
        self.source.user_message()
    }
}

/// Attach a stage to a kernel result.
pub trait AtStage<T> {
    fn at_stage(self, stage: Stage) -> Result<T, PipelineError>;
}

impl<T> AtStage<T> for Result<T, ShellError> {
    fn at_stage(self, stage: Stage) -> Result<T, PipelineError> {
        self.map_err(|source| PipelineError { stage, source })
    }
}

pub type ShellResult<T> = Result<T, ShellError>;
