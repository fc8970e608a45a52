use super::{UpperProfile, WallCrossSection, WallParams, WallSynthesizer, apply_shroud};
use crate::config::ShellMode;
use crate::error::{ShellError, ShellResult};
use crate::floor::Floor;
use crate::footprint::KeyPoint;
use crate::geometry::{Frame, Vec3};

/// Walls that drop onto a flat floor. With `tilted` the floor normal is the
/// floor's `world_z` and the local up follows the lower wall.
#[derive(Debug, Clone)]
pub struct BasicWalls {
    params: WallParams,
    floor: Floor,
    tilted: bool,
}

impl BasicWalls {
    pub fn new(params: WallParams, floor: Floor) -> Self {
        Self {
            params,
            floor,
            tilted: false,
        }
    }

    pub fn tilted(params: WallParams, floor: Floor) -> Self {
        Self {
            params,
            floor,
            tilted: true,
        }
    }

    fn on_floor(&self, p: Vec3) -> Frame {
        let world_z = self.floor.world_z;
        let dropped = p + world_z * (-p.dot(&world_z) + self.floor.bottom_z);
        Frame::coord_system_change(dropped, self.floor.frame_x(), world_z)
    }

    /// Slide `mid` up the inner wall direction until it clears the floor.
    /// Returns the raised mid point and the matching floor point, or `None`
    /// when `mid` is already above the floor.
    fn raise(&self, mid: &Frame, axis: Vec3) -> ShellResult<Option<(Frame, Frame)>> {
        let world_z = self.floor.world_z;
        let height = mid.origin().dot(&world_z);
        if height >= self.floor.bottom_z {
            return Ok(None);
        }
        let rise = axis.dot(&world_z);
        if rise.abs() < 1e-12 {
            return Err(ShellError::degenerate("inner wall runs parallel to the floor"));
        }
        let t = axis * (-(height - self.floor.bottom_z) / rise);
        let bottom = Frame::coord_system_change(mid.origin() + t, self.floor.frame_x(), world_z);
        let raised = mid.translated(t + world_z * 0.001);
        Ok(Some((raised, bottom)))
    }
}

impl WallSynthesizer for BasicWalls {
    fn mode(&self) -> ShellMode {
        if self.tilted {
            ShellMode::Tilt {
                tilt_deg: self.floor.tilt_deg(),
            }
        } else {
            ShellMode::Basic
        }
    }

    fn params(&self) -> &WallParams {
        &self.params
    }

    fn floor(&self) -> &Floor {
        &self.floor
    }

    fn cross_section(
        &self,
        prev: &KeyPoint,
        cur: &KeyPoint,
        next: &KeyPoint,
        offset: f64,
    ) -> ShellResult<WallCrossSection> {
        let upper = UpperProfile::new(&self.params, prev, cur, next, offset, false)?;

        let mut mo = upper.outer_mid();
        let mut bo = self.on_floor(mo.origin());

        let y_axis = upper.bisect.axis(0.0, 1.0, 0.0);
        let x_axis = Vec3::new(y_axis.y, -y_axis.x, 0.0);
        let mut mi = upper.inner_mid(&mo, x_axis);
        let mut bi = self.on_floor(mi.origin());

        let inward = upper.ti.origin() - mi.origin();
        if let Some((raised, bottom)) = self.raise(&mo, inward)? {
            mo = raised;
            bo = bottom;
        }
        let inward = upper.ti.origin() - mi.origin();
        if let Some((raised, bottom)) = self.raise(&mi, inward)? {
            mi = raised;
            bi = bottom;
        }

        let mut wall = upper.assemble(cur, prev, next, mi, mo, bi, bo);
        apply_shroud(&self.params, cur, &mut wall);
        Ok(wall)
    }

    fn up_dir(&self, wall: &WallCrossSection) -> Vec3 {
        if self.tilted {
            (wall.mo.origin() - wall.bo.origin()).normalize()
        } else {
            Vec3::Z
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wall::tests::{params, square_points};

    #[test]
    fn test_tilted_floor_measured_along_world_z() {
        let pts = square_points(40.0);
        let floor = Floor::tilted(10.0, 0.0);
        let synth = BasicWalls::tilted(params(0.0), floor);
        let w = synth.cross_section(&pts[3], &pts[0], &pts[1], 0.0).unwrap();
        let wz = synth.floor().world_z;
        assert!((w.bo.origin().dot(&wz)).abs() < 1e-9);
        assert!((w.bi.origin().dot(&wz)).abs() < 1e-9);
        assert!(matches!(synth.mode(), ShellMode::Tilt { .. }));
        let up = synth.up_dir(&w);
        assert!((up.length() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_raise_along_flat_axis_is_degenerate() {
        let synth = BasicWalls::new(params(0.0), Floor::flat(0.0));
        let below = Frame::at(Vec3::new(0.0, 0.0, -5.0));
        let err = synth.raise(&below, Vec3::X).unwrap_err();
        assert!(matches!(err, ShellError::DegenerateInput { .. }));
        assert!(err.to_string().contains("parallel to the floor"));
        // Points above the floor never need the axis.
        assert_eq!(synth.raise(&Frame::at(Vec3::new(0.0, 0.0, 5.0)), Vec3::X), Ok(None));
    }

    #[test]
    fn test_raise_lands_on_floor() {
        let synth = BasicWalls::new(params(0.0), Floor::flat(0.0));
        let below = Frame::at(Vec3::new(0.0, 0.0, -4.0));
        let (raised, bottom) = synth.raise(&below, Vec3::new(1.0, 0.0, 2.0)).unwrap().unwrap();
        assert!(bottom.origin().z.abs() < 1e-12);
        assert!((bottom.origin().x - 2.0).abs() < 1e-12);
        assert!((raised.origin().z - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_basic_up_is_z() {
        let pts = square_points(40.0);
        let synth = BasicWalls::new(params(0.0), Floor::flat(0.0));
        let w = synth.cross_section(&pts[3], &pts[0], &pts[1], 0.0).unwrap();
        assert_eq!(synth.up_dir(&w), Vec3::Z);
    }

    #[test]
    fn test_extra_offset_widens_wall() {
        let pts = square_points(40.0);
        let synth = BasicWalls::new(params(0.0), Floor::flat(0.0));
        let thin = synth.cross_section(&pts[3], &pts[0], &pts[1], 0.0).unwrap();
        let thick = synth.cross_section(&pts[3], &pts[0], &pts[1], 2.0).unwrap();
        let d_thin = thin.to.origin().distance_to(&thin.ti.origin());
        let d_thick = thick.to.origin().distance_to(&thick.ti.origin());
        assert!(d_thick > d_thin + 1.0);
        assert_eq!(thin.ti, thick.ti);
    }
}
