use super::{UpperProfile, WallCrossSection, WallParams, WallSynthesizer, apply_shroud, bisector_crossed_3d, shroud_crossed};
use crate::config::ShellMode;
use crate::error::ShellResult;
use crate::floor::Floor;
use crate::footprint::KeyPoint;
use crate::geometry::Vec3;

/// Short walls hanging straight down from the keys along each key's own Z.
/// The floor only matters for the supports, never for the wall profile.
#[derive(Debug, Clone)]
pub struct StiltsWalls {
    params: WallParams,
    floor: Floor,
}

impl StiltsWalls {
    pub fn new(params: WallParams, floor: Floor) -> Self {
        Self { params, floor }
    }
}

impl WallSynthesizer for StiltsWalls {
    fn mode(&self) -> ShellMode {
        ShellMode::Stilts
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
        let upper = UpperProfile::new(&self.params, prev, cur, next, offset, true)?;
        let (x_out, z_out) = (upper.x_out, upper.z_out);
        let bo = upper.to.pretranslated(x_out, 0.0, -z_out);
        let mo = upper.to.pretranslated(x_out, 0.0, -z_out / 2.0);
        let bi = upper.ti.pretranslated(x_out, 0.0, -z_out);
        let mi = upper.ti.pretranslated(x_out, 0.0, -z_out / 2.0);

        let mut wall = upper.assemble(cur, prev, next, mi, mo, bi, bo);
        apply_shroud(&self.params, cur, &mut wall);
        Ok(wall)
    }

    fn walls_intersect(&self, w0: &WallCrossSection, w1: &WallCrossSection, w2: &WallCrossSection) -> bool {
        let up = w1.mo.origin() - w1.bo.origin();
        bisector_crossed_3d(w0, w1, w2, up) || shroud_crossed(w0, w1, w2)
    }

    fn up_dir(&self, wall: &WallCrossSection) -> Vec3 {
        (wall.mo.origin() - wall.bo.origin()).normalize()
    }
}
