pub mod frame;
pub mod planar;
pub mod thickness;
pub mod vector;

pub use frame::Frame;
pub use planar::Vec2;
pub use vector::Vec3;
