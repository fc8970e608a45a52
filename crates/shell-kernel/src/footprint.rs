//! Key footprint catalogue: socket outlines, part-bottom boxes and the 2D
//! layout projection.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::WebConfig;
use crate::error::{ShellError, ShellResult};
use crate::geometry::planar::{Vec2, polygons_intersect};
use crate::geometry::{Frame, Vec3};

/// Iteration cap for [`separate_sockets_2d`].
pub const SEPARATION_ITERATIONS: usize = 100;

/// Supported socket and part types.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum KeyKind {
    MxBetter,
    MxPcb,
    MxHotswap,
    MxKlavgen,
    Alps,
    ChocV1,
    ChocV2,
    ChocV1Hotswap,
    ChocV2Hotswap,
    Ec11,
    Evqwgd001,
    Blank {
        width: Option<f64>,
        height: Option<f64>,
    },
    Joycon,
    Ps2Joystick,
    Trackball { radius: f64, sides: usize },
    Cirque23,
    Cirque35,
    Cirque40,
}

/// Socket outline size and depth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SocketSize {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

const fn socket(x: f64, y: f64, z: f64) -> SocketSize {
    SocketSize { x, y, z }
}

/// Outline of a round part, approximated by a regular polygon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoundSize {
    pub radius: f64,
    pub sides: usize,
}

const CIRQUE_SIDES: usize = 20;
const ROUND_SOCKET_DEPTH_TRACKBALL: f64 = 4.0;
const ROUND_SOCKET_DEPTH_CIRQUE: f64 = 3.0;

impl KeyKind {
    /// Trackball socket for a ball of the given diameter (25, 34, 43 or 55 mm).
    pub fn trackball_mm(ball: u32) -> Option<Self> {
        let radius = match ball {
            25 => 16.4,
            34 => 20.9,
            43 => 25.4,
            55 => 31.4,
            _ => return None,
        };
        Some(KeyKind::Trackball { radius, sides: 20 })
    }

    pub fn socket_size(&self) -> SocketSize {
        match *self {
            KeyKind::MxBetter => socket(18.0, 18.0, 4.7),
            KeyKind::MxPcb => socket(19.2, 19.2, 4.7),
            KeyKind::MxHotswap => socket(18.0, 18.0, 5.85),
            KeyKind::MxKlavgen => socket(18.75, 18.75, 2.2),
            KeyKind::Alps => socket(18.6, 17.0, 5.0),
            KeyKind::ChocV1 | KeyKind::ChocV1Hotswap => socket(17.5, 16.5, 2.2),
            KeyKind::ChocV2 | KeyKind::ChocV2Hotswap => socket(18.0, 18.0, 2.2),
            KeyKind::Ec11 => socket(14.5, 14.5, 4.5),
            KeyKind::Evqwgd001 => socket(19.2, 19.2, 4.7),
            KeyKind::Blank { width, height } => {
                socket(width.unwrap_or(18.5), height.unwrap_or(18.5), 5.0)
            }
            KeyKind::Joycon => socket(24.25, 24.4, 3.5),
            KeyKind::Ps2Joystick => socket(40.0, 45.0, 4.0),
            KeyKind::Trackball { radius, .. } => {
                socket(radius * 2.0, radius * 2.0, ROUND_SOCKET_DEPTH_TRACKBALL)
            }
            KeyKind::Cirque23 | KeyKind::Cirque35 | KeyKind::Cirque40 => {
                let r = self.round_size().map_or(0.0, |r| r.radius);
                socket(r * 2.0, r * 2.0, ROUND_SOCKET_DEPTH_CIRQUE)
            }
        }
    }

    pub fn round_size(&self) -> Option<RoundSize> {
        match *self {
            KeyKind::Trackball { radius, sides } => Some(RoundSize { radius, sides }),
            KeyKind::Cirque23 => Some(RoundSize {
                radius: 12.4,
                sides: CIRQUE_SIDES,
            }),
            KeyKind::Cirque35 => Some(RoundSize {
                radius: 18.4,
                sides: CIRQUE_SIDES,
            }),
            KeyKind::Cirque40 => Some(RoundSize {
                radius: 20.9,
                sides: CIRQUE_SIDES,
            }),
            _ => None,
        }
    }

    /// Boxes occupied by the part below the socket, in socket coordinates.
    pub fn part_bottoms(&self) -> Vec<[Vec3; 4]> {
        let mx = part_box(14.0, 14.0, 8.5);
        match self {
            KeyKind::MxBetter => vec![mx],
            KeyKind::MxPcb => vec![mx, part_box(19.4, 19.4, 6.6)],
            KeyKind::MxHotswap => vec![part_box(16.9, 16.8, 8.0)],
            KeyKind::MxKlavgen => vec![mx, part_box(18.55, 18.55, 8.0)],
            KeyKind::Alps => vec![part_box(15.0, 13.0, 8.6)],
            KeyKind::ChocV1 | KeyKind::ChocV2 => vec![part_box(12.0, 12.0, 5.2)],
            KeyKind::ChocV1Hotswap => vec![part_box(12.0, 12.0, 5.2), part_box(17.5, 16.5, 3.3)],
            KeyKind::ChocV2Hotswap => vec![part_box(12.0, 12.0, 5.2), part_box(18.0, 18.0, 3.3)],
            KeyKind::Ec11 => vec![part_box(12.0, 12.0, 14.5)],
            KeyKind::Evqwgd001 => vec![part_box(16.0, 16.0, 5.8)],
            KeyKind::Blank { .. } => Vec::new(),
            KeyKind::Joycon => vec![part_box(24.25, 22.4, 3.5)],
            KeyKind::Ps2Joystick => vec![part_box(40.0, 45.0, 19.5)],
            KeyKind::Trackball { .. } => {
                vec![part_box(28.5, 21.3, 28.3), part_box(16.0, 11.0, 30.8)]
            }
            KeyKind::Cirque23 | KeyKind::Cirque35 | KeyKind::Cirque40 => {
                vec![part_box(10.0, 10.0, 2.0)]
            }
        }
    }

    /// Width of the keycap sitting on this socket.
    pub fn keycap_width(&self) -> f64 {
        match self {
            KeyKind::ChocV1 | KeyKind::ChocV1Hotswap => 17.5,
            _ => 18.5,
        }
    }
}

fn part_box(width: f64, length: f64, depth: f64) -> [Vec3; 4] {
    [
        Vec3::new(-width / 2.0, -length / 2.0, -depth),
        Vec3::new(width / 2.0, -length / 2.0, -depth),
        Vec3::new(width / 2.0, length / 2.0, -depth),
        Vec3::new(-width / 2.0, length / 2.0, -depth),
    ]
}

/// One key of the layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    pub kind: KeyKind,
    /// Placement of the socket top in world space.
    pub position: Frame,
    /// Width / height ratio of the keycap (1 for 1u keys).
    #[serde(default = "default_aspect")]
    pub aspect: f64,
    /// Explicit placement in the flat layout. Derived from `position` when absent.
    #[serde(default)]
    pub flat_position: Option<Frame>,
}

fn default_aspect() -> f64 {
    1.0
}

impl Key {
    pub fn new(kind: KeyKind, position: Frame) -> Self {
        Self {
            kind,
            position,
            aspect: 1.0,
            flat_position: None,
        }
    }

    pub fn with_aspect(mut self, aspect: f64) -> Self {
        self.aspect = aspect;
        self
    }

    /// Outline width and height after applying the aspect ratio.
    pub fn size(&self) -> (f64, f64) {
        let s = self.kind.socket_size();
        (s.x * self.aspect.max(1.0), s.y * (1.0 / self.aspect).max(1.0))
    }

    /// Outline corners of this key placed at `hole`, wound clockwise seen
    /// from the socket's +Z.
    pub fn critical_points(&self, hole: &Frame, offset: f64) -> Vec<Frame> {
        if let Some(round) = self.kind.round_size() {
            let step = 2.0 * PI / round.sides as f64;
            return (0..round.sides)
                .map(|j| {
                    let a = -(j as f64) * step;
                    hole.pretranslated(round.radius * a.cos(), round.radius * a.sin(), 0.0)
                })
                .collect();
        }
        let (width, height) = self.size();
        let (hw, hh) = (width / 2.0 + offset, height / 2.0 + offset);
        vec![
            hole.pretranslated(-hw, hh, 0.0),
            hole.pretranslated(hw, hh, 0.0),
            hole.pretranslated(hw, -hh, 0.0),
            hole.pretranslated(-hw, -hh, 0.0),
        ]
    }

    /// Part-bottom corners placed at `hole`.
    pub fn part_bottom_points(&self, hole: &Frame) -> Vec<Vec3> {
        self.kind
            .part_bottoms()
            .iter()
            .flatten()
            .map(|p| hole.apply(*p))
            .collect()
    }
}

/// Web thickness below a key: the configured value, or the socket depth.
pub fn web_thickness(web: &WebConfig, key: &Key) -> f64 {
    if web.thickness > 0.0 {
        web.thickness
    } else {
        key.kind.socket_size().z
    }
}

/// A critical point bound to its owning key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyPoint {
    /// Index of the owning key.
    pub key: usize,
    /// The corner frame.
    pub frame: Frame,
    /// Placement of the owning key's socket.
    pub key_frame: Frame,
}

/// Flatten per-key corner polygons into one indexed point list.
pub fn key_points(polys: &[Vec<Frame>], holes: &[Frame]) -> Vec<KeyPoint> {
    polys
        .iter()
        .enumerate()
        .flat_map(|(key, poly)| {
            poly.iter().map(move |frame| KeyPoint {
                key,
                frame: *frame,
                key_frame: holes[key],
            })
        })
        .collect()
}

/// Project a key placement into the layout plane. Yaw is kept, roll and
/// pitch are limited to `max_tilt_deg` and the origin drops to z = 0.
pub fn flatten_frame(frame: &Frame, max_tilt_deg: f64) -> Frame {
    let (roll, pitch, yaw) = frame.euler_angles();
    let limit = max_tilt_deg.abs().to_radians();
    let o = frame.origin();
    Frame::from_euler(
        Vec3::new(o.x, o.y, 0.0),
        roll.clamp(-limit, limit),
        pitch.clamp(-limit, limit),
        yaw,
    )
}

/// Push overlapping key outlines apart in the layout plane. Each overlapping
/// pair is displaced along the line between their centres by `5·exp(−d/9)` mm.
/// Returns the number of iterations used.
pub fn separate_sockets_2d(keys: &[Key], holes: &mut [Frame]) -> ShellResult<usize> {
    let mut polys: Vec<Vec<Vec2>> = keys
        .iter()
        .zip(holes.iter())
        .map(|(k, h)| {
            k.critical_points(h, 0.0)
                .iter()
                .map(|p| Vec2::from(p.origin()))
                .collect()
        })
        .collect();

    for iteration in 0..SEPARATION_ITERATIONS {
        let mut displacements = vec![Vec3::ZERO; polys.len()];
        let mut moved = false;
        for i in 0..polys.len() {
            for j in (i + 1)..polys.len() {
                if !polygons_intersect(&polys[i], &polys[j]) {
                    continue;
                }
                let mut d = holes[i].origin() - holes[j].origin();
                d.z = 0.0;
                let len = 5.0 * (-d.length() / 9.0).exp();
                let dir = d.normalized().unwrap_or(Vec3::X);
                displacements[i] += dir * len;
                displacements[j] -= dir * len;
                moved = true;
            }
        }
        if !moved {
            debug!(iterations = iteration, "sockets separated");
            return Ok(iteration);
        }
        for (i, d) in displacements.iter().enumerate() {
            if *d == Vec3::ZERO {
                continue;
            }
            holes[i].translate(*d);
            for p in &mut polys[i] {
                p.x += d.x;
                p.y += d.y;
            }
        }
    }
    warn!(
        iterations = SEPARATION_ITERATIONS,
        "sockets still overlap"
    );
    Err(ShellError::SocketsUnseparated {
        iterations: SEPARATION_ITERATIONS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::planar::signed_area;

    fn mx_at(x: f64, y: f64) -> Key {
        Key::new(KeyKind::MxBetter, Frame::at(Vec3::new(x, y, 0.0)))
    }

    #[test]
    fn test_socket_sizes() {
        let s = KeyKind::MxPcb.socket_size();
        assert!((s.x - 19.2).abs() < 1e-12);
        assert!((KeyKind::ChocV1.socket_size().z - 2.2).abs() < 1e-12);
        let b = KeyKind::Blank { width: Some(30.0), height: None }.socket_size();
        assert!((b.x - 30.0).abs() < 1e-12 && (b.y - 18.5).abs() < 1e-12);
    }

    #[test]
    fn test_trackball_sizes() {
        let k = KeyKind::trackball_mm(34).unwrap();
        assert_eq!(k.round_size().unwrap().sides, 20);
        assert!((k.round_size().unwrap().radius - 20.9).abs() < 1e-12);
        assert!(KeyKind::trackball_mm(30).is_none());
    }

    #[test]
    fn test_critical_points_are_clockwise() {
        let k = mx_at(0.0, 0.0);
        let pts: Vec<Vec2> = k
            .critical_points(&k.position, 0.0)
            .iter()
            .map(|p| Vec2::from(p.origin()))
            .collect();
        assert_eq!(pts.len(), 4);
        assert!((signed_area(&pts) + 18.0 * 18.0).abs() < 1e-9);
        assert!((pts[0].x + 9.0).abs() < 1e-12 && (pts[0].y - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_round_critical_points() {
        let k = Key::new(KeyKind::Cirque35, Frame::identity());
        let pts = k.critical_points(&k.position, 0.0);
        assert_eq!(pts.len(), 20);
        let poly: Vec<Vec2> = pts.iter().map(|p| Vec2::from(p.origin())).collect();
        assert!(signed_area(&poly) < 0.0);
        for p in &pts {
            assert!((p.origin().length() - 18.4).abs() < 1e-9);
        }
    }

    #[test]
    fn test_aspect_widens_key() {
        let k = mx_at(0.0, 0.0).with_aspect(1.5);
        let (w, h) = k.size();
        assert!((w - 27.0).abs() < 1e-12);
        assert!((h - 18.0).abs() < 1e-12);
        let tall = mx_at(0.0, 0.0).with_aspect(0.5);
        assert!((tall.size().1 - 36.0).abs() < 1e-12);
    }

    #[test]
    fn test_part_bottom_depth() {
        let k = mx_at(0.0, 0.0);
        let pts = k.part_bottom_points(&k.position);
        assert_eq!(pts.len(), 4);
        assert!(pts.iter().all(|p| (p.z + 8.5).abs() < 1e-12));
        assert!(KeyKind::Blank { width: None, height: None }.part_bottoms().is_empty());
    }

    #[test]
    fn test_web_thickness_defaults_to_socket_depth() {
        let k = mx_at(0.0, 0.0);
        assert!((web_thickness(&WebConfig::default(), &k) - 4.7).abs() < 1e-12);
        let web = WebConfig {
            thickness: 3.0,
            ..WebConfig::default()
        };
        assert!((web_thickness(&web, &k) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_flatten_keeps_yaw_and_drops_z() {
        let f = Frame::rotation(30.0, Vec3::ZERO, Vec3::Z)
            .rotated(20.0, Vec3::ZERO, Vec3::X)
            .translated(Vec3::new(5.0, 6.0, 40.0));
        let flat = flatten_frame(&f, 0.0);
        assert!((flat.origin().z).abs() < 1e-12);
        assert!((flat.origin().x - 5.0).abs() < 1e-12);
        let z = flat.axis(0.0, 0.0, 1.0);
        assert!((z.z - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_separate_overlapping_sockets() {
        let keys = vec![mx_at(0.0, 0.0), mx_at(10.0, 0.0)];
        let mut holes: Vec<Frame> = keys.iter().map(|k| k.position).collect();
        let iterations = separate_sockets_2d(&keys, &mut holes).unwrap();
        assert!(iterations > 0);
        assert!(holes[1].origin().x - holes[0].origin().x >= 18.0);
        assert!((holes[0].origin().y).abs() < 1e-12);
    }

    #[test]
    fn test_separated_sockets_untouched() {
        let keys = vec![mx_at(0.0, 0.0), mx_at(19.0, 0.0)];
        let mut holes: Vec<Frame> = keys.iter().map(|k| k.position).collect();
        assert_eq!(separate_sockets_2d(&keys, &mut holes).unwrap(), 0);
        assert_eq!(holes[1].origin(), Vec3::new(19.0, 0.0, 0.0));
    }

    #[test]
    fn test_key_points_bind_owner() {
        let keys = [mx_at(0.0, 0.0), mx_at(19.0, 0.0)];
        let holes: Vec<Frame> = keys.iter().map(|k| k.position).collect();
        let polys: Vec<Vec<Frame>> = keys.iter().zip(&holes).map(|(k, h)| k.critical_points(h, 0.0)).collect();
        let pts = key_points(&polys, &holes);
        assert_eq!(pts.len(), 8);
        assert_eq!(pts[5].key, 1);
        assert_eq!(pts[5].key_frame.origin(), Vec3::new(19.0, 0.0, 0.0));
    }
}
