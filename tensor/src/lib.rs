//! Tiling descriptors, dense tiles, and the block-sparse [`Shape`] algebra.

use std::fmt;
use std::ops::Neg;

use async_trait::async_trait;
use ndarray::{LinalgScalar, ScalarOperand};

use ta_error::TAResult;

pub use gemm::GemmHelper;
pub use permutation::Permutation;
pub use range::{strides_for, Range, TiledRange, TiledRange1};
pub use shape::{Shape, SparseShape};
pub use tile::Tensor;

mod gemm;
mod permutation;
mod range;
mod shape;
mod tile;

/// A floating-point element type which can be stored in a tile and used as a tile norm.
pub trait Float:
    LinalgScalar
    + ScalarOperand
    + Neg<Output = Self>
    + PartialOrd
    + fmt::Debug
    + fmt::Display
    + Send
    + Sync
{
    /// The machine epsilon, used as the default sparsity threshold.
    const EPSILON: Self;
    const ZERO: Self;
    const ONE: Self;

    fn abs(self) -> Self;

    fn sqrt(self) -> Self;

    fn from_f64(value: f64) -> Self;

    fn to_f64(self) -> f64;
}

macro_rules! float_impl {
    ($t:ty) => {
        impl Float for $t {
            const EPSILON: Self = <$t>::EPSILON;
            const ZERO: Self = 0.;
            const ONE: Self = 1.;

            fn abs(self) -> Self {
                <$t>::abs(self)
            }

            fn sqrt(self) -> Self {
                <$t>::sqrt(self)
            }

            fn from_f64(value: f64) -> Self {
                value as $t
            }

            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    };
}

float_impl!(f32);
float_impl!(f64);

/// A collective reduction across every worker participating in a computation.
#[async_trait]
pub trait AllReduce: Send + Sync {
    /// Replace `data` on every worker with the elementwise sum of `data` over all workers.
    async fn sum<T: Float>(&self, data: &mut [T]) -> TAResult<()>;
}
