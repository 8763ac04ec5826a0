//! Cross-field and position-field machinery.
//!
//! A 4-RoSy orientation field and a lattice position field are optimized
//! over a multigrid [`Hierarchy`]; the parameterization core consumes the
//! level-0 samples. [`math`] holds the quarter-turn rotation and
//! extrinsic compatibility primitives shared by every stage.

pub mod hierarchy;
pub mod math;
pub mod scale;
pub mod smooth;

pub use hierarchy::{Hierarchy, Level, Link};
pub use scale::{estimate_scale, FaceScale};
pub use smooth::{optimize_orientations, optimize_positions, FieldOptions};
