use super::{UpperProfile, WallCrossSection, WallParams, WallSynthesizer, apply_shroud, bisector_crossed_3d, shroud_crossed};
use crate::config::{PLATE_HEIGHT, ShellMode};
use crate::error::{ShellError, ShellResult};
use crate::floor::Floor;
use crate::footprint::KeyPoint;
use crate::geometry::{Frame, Vec3};

/// Walls ending on the plane `x = bottom_x`, for shells that stand on their
/// side. The outer profile may dip one plate height below the Z floor.
#[derive(Debug, Clone)]
pub struct BlockWalls {
    params: WallParams,
    floor: Floor,
}

impl BlockWalls {
    pub fn new(params: WallParams, floor: Floor) -> Self {
        Self { params, floor }
    }

    /// Slide `mid` along `axis` until it clears `bottom_x`.
    fn raise(&self, mid: &Frame, axis: Vec3) -> ShellResult<Option<(Frame, Frame)>> {
        let bottom_x = self.floor.bottom_x;
        let x = mid.origin().x;
        if x >= bottom_x {
            return Ok(None);
        }
        if axis.x.abs() < 1e-12 {
            return Err(ShellError::degenerate("inner wall runs parallel to the side plate"));
        }
        let t = Vec3::new(0.001, 0.0, 0.0) + axis * (-(x - bottom_x) / axis.x);
        let raised = mid.translated(t);
        let o = raised.origin();
        Ok(Some((raised, Frame::at(Vec3::new(bottom_x, o.y, o.z)))))
    }
}

fn lift_to(frame: &mut Frame, min_z: f64) {
    let z = frame.origin().z;
    if z < min_z {
        frame.translate(Vec3::new(0.0, 0.0, min_z - z));
    }
}

impl WallSynthesizer for BlockWalls {
    fn mode(&self) -> ShellMode {
        ShellMode::Block
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
        let bottom_x = self.floor.bottom_x;

        let mut mo = upper.outer_mid();
        let o = mo.origin();
        let mut bo = Frame::at(Vec3::new(bottom_x, o.y, o.z));

        let y_axis = upper.bisect.axis(0.0, 1.0, 0.0);
        let x_axis = Vec3::new(0.0, y_axis.z, -y_axis.y);
        let mut mi = upper.inner_mid(&mo, x_axis);
        let o = mi.origin();
        let mut bi = Frame::at(Vec3::new(bottom_x, o.y, o.z));

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

        let bottom_z = self.floor.bottom_z;
        lift_to(&mut mi, bottom_z);
        lift_to(&mut bi, bottom_z);
        lift_to(&mut bo, bottom_z - PLATE_HEIGHT);
        lift_to(&mut mo, bottom_z - PLATE_HEIGHT);

        let mut wall = upper.assemble(cur, prev, next, mi, mo, bi, bo);
        apply_shroud(&self.params, cur, &mut wall);
        Ok(wall)
    }

    fn walls_intersect(&self, w0: &WallCrossSection, w1: &WallCrossSection, w2: &WallCrossSection) -> bool {
        bisector_crossed_3d(w0, w1, w2, Vec3::X) || shroud_crossed(w0, w1, w2)
    }

    fn up_dir(&self, _wall: &WallCrossSection) -> Vec3 {
        Vec3::X
    }
}
