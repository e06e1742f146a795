//! Block-sparse tensor arithmetic over tiles distributed among cooperating ranks.
//!
//! This crate re-exports the members of its workspace:
//!  - [`error`] for error handling
//!  - [`tensor`] for tiling, permutations, dense tiles, and the block-sparse shape algebra
//!  - [`dist`] for distributed arrays and the asynchronous evaluation of expressions over them

pub use ta_dist as dist;
pub use ta_error as error;
pub use ta_tensor as tensor;

pub use ta_dist::{DistArray, Expr, World};
pub use ta_error::{TAError, TAResult};
pub use ta_tensor::{Shape, SparseShape, Tensor, TiledRange, TiledRange1};
