//! Distributed, block-sparse arrays and the asynchronous evaluation of expressions over them.
//!
//! Each rank of a [`World`] owns the tiles which its [`Pmap`] assigns to it. Tiles are stored
//! in single-assignment [`DistStorage`], so a consumer may request a tile before it's produced.
//!
//! Example:
//! ```no_run
//! # use ta_dist::*;
//! # async fn example(a: DistArray<f64>, b: DistArray<f64>) -> ta_error::TAResult<()> {
//! let c = a.expr("i,k")?.contract(b.expr("k,j")?).into_array("i,j").await?;
//! # Ok(())
//! # }
//! ```

pub use array::DistArray;
pub use eval::{DistEval, EvalDone};
pub use expr::Expr;
pub use op::{BinaryOp, UnaryOp};
pub use pmap::{BlockedPmap, CyclicPmap, Pmap};
pub use storage::{DistStorage, TileFuture};
pub use vars::VarList;
pub use world::{Config, Fabric, ObjectId, World};

mod array;
mod eval;
mod expr;
mod op;
mod pmap;
mod storage;
mod vars;
mod world;
