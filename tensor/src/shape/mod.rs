//! The sparsity policy of a tiled array.

use std::fmt;

use ta_error::*;

use crate::{Float, GemmHelper, Permutation, Range, TiledRange};

pub use sparse::SparseShape;

mod sparse;

/// The shape of a tiled array: either every tile is present, or tiles are estimated sparse.
#[derive(Clone)]
pub enum Shape<T> {
    /// Every tile in the given range of tiles is nonzero.
    Dense(Range),
    Sparse(SparseShape<T>),
}

impl<T: Float> Shape<T> {
    pub fn dense(trange: &TiledRange) -> Self {
        Self::Dense(trange.tiles_range().clone())
    }

    pub fn is_dense(&self) -> bool {
        matches!(self, Self::Dense(_))
    }

    pub fn as_sparse(&self) -> Option<&SparseShape<T>> {
        match self {
            Self::Dense(_) => None,
            Self::Sparse(sparse) => Some(sparse),
        }
    }

    pub fn is_zero(&self, ordinal: usize) -> TAResult<bool> {
        match self {
            Self::Dense(range) if range.includes_ordinal(ordinal) => Ok(false),
            Self::Dense(range) => Err(bad_request!("tile {} is out of range {}", ordinal, range)),
            Self::Sparse(sparse) => sparse.is_zero(ordinal),
        }
    }

    pub fn sparsity(&self) -> TAResult<f64> {
        match self {
            Self::Dense(_) => Ok(0.),
            Self::Sparse(sparse) => sparse.sparsity(),
        }
    }

    pub fn validate(&self, range: &Range) -> TAResult<()> {
        match self {
            Self::Dense(tiles) if tiles.extent() == range.extent() => Ok(()),
            Self::Dense(tiles) => Err(bad_request!(
                "a dense shape over {} does not describe the tile range {}",
                tiles,
                range
            )),
            Self::Sparse(sparse) => sparse.validate(range),
        }
    }

    pub fn scale(&self, factor: T, perm: Option<&Permutation>) -> TAResult<Self> {
        match self {
            Self::Dense(range) => dense(range, perm),
            Self::Sparse(sparse) => sparse.scale(factor, perm).map(Self::Sparse),
        }
    }

    pub fn add(&self, other: &Self, factor: T, perm: Option<&Permutation>) -> TAResult<Self> {
        match (self, other) {
            (Self::Sparse(l), Self::Sparse(r)) => l.add(r, factor, perm).map(Self::Sparse),
            (l, r) => dense_pair(l, r, perm),
        }
    }

    pub fn subt(&self, other: &Self, factor: T, perm: Option<&Permutation>) -> TAResult<Self> {
        match (self, other) {
            (Self::Sparse(l), Self::Sparse(r)) => l.subt(r, factor, perm).map(Self::Sparse),
            (l, r) => dense_pair(l, r, perm),
        }
    }

    pub fn mult(&self, other: &Self, factor: T, perm: Option<&Permutation>) -> TAResult<Self> {
        match (self, other) {
            (Self::Sparse(l), Self::Sparse(r)) => l.mult(r, factor, perm).map(Self::Sparse),
            (l, r) => dense_pair(l, r, perm),
        }
    }

    pub fn gemm(
        &self,
        other: &Self,
        factor: T,
        helper: &GemmHelper,
        perm: Option<&Permutation>,
    ) -> TAResult<Self> {
        match (self, other) {
            (Self::Sparse(l), Self::Sparse(r)) => l.gemm(r, factor, helper, perm).map(Self::Sparse),
            (l, r) => {
                let range = helper.make_result_range(&l.tiles()?, &r.tiles()?)?;
                dense(&range, perm)
            }
        }
    }

    /// Hard-zero every tile which is zero in `other`.
    pub fn mask(&self, other: &Self) -> TAResult<Self> {
        match (self, other) {
            (Self::Sparse(l), Self::Sparse(r)) => l.mask(r).map(Self::Sparse),
            (l, r) => {
                l.validate(&r.tiles()?)?;
                Ok(l.clone())
            }
        }
    }

    /// The shape of the tiles in `[lo, hi)`, over a zero-based range of tiles.
    pub fn block(&self, lo: &[usize], hi: &[usize]) -> TAResult<Self> {
        match self {
            Self::Dense(range) => {
                block_range(range, lo, hi)?;
                let extent = lo.iter().zip(hi).map(|(l, h)| h - l).collect();
                Range::from_extent(extent).map(Self::Dense)
            }
            Self::Sparse(sparse) => sparse.block(lo, hi).map(Self::Sparse),
        }
    }

    /// This shape with the tiles in `[lo, hi)` replaced by `other`.
    pub fn update_block(&self, lo: &[usize], hi: &[usize], other: &Self) -> TAResult<Self> {
        match (self, other) {
            (Self::Sparse(l), Self::Sparse(r)) => l.update_block(lo, hi, r).map(Self::Sparse),
            (l, r) => {
                let tiles = l.tiles()?;
                let block = block_range(&tiles, lo, hi)?;

                if block.extent() == r.tiles()?.extent() {
                    Ok(Self::Dense(tiles))
                } else {
                    Err(bad_request!(
                        "cannot update block {} with a shape over {}",
                        block,
                        r.tiles()?
                    ))
                }
            }
        }
    }

    pub fn perm(&self, perm: &Permutation) -> TAResult<Self> {
        match self {
            Self::Dense(range) => range.permute(perm).map(Self::Dense),
            Self::Sparse(sparse) => sparse.perm(perm).map(Self::Sparse),
        }
    }

    /// The range of tiles this shape describes.
    pub fn tiles(&self) -> TAResult<Range> {
        match self {
            Self::Dense(range) => Ok(range.clone()),
            Self::Sparse(sparse) => sparse.data().map(|norms| norms.range().clone()),
        }
    }
}

/// The sub-range `[lo, hi)` of `range`, which must lie entirely inside it.
fn block_range(range: &Range, lo: &[usize], hi: &[usize]) -> TAResult<Range> {
    let inside = lo.len() == range.rank()
        && hi.len() == range.rank()
        && lo
            .iter()
            .zip(hi)
            .zip(range.lobound().iter().zip(range.upbound()))
            .all(|((l, h), (start, end))| start <= l && l < h && h <= end);

    if inside {
        Range::new(lo.to_vec(), hi.to_vec())
    } else {
        Err(bad_request!("invalid block [{:?}, {:?}) of {}", lo, hi, range))
    }
}

fn dense<T>(range: &Range, perm: Option<&Permutation>) -> TAResult<Shape<T>> {
    match perm {
        Some(perm) => range.permute(perm).map(Shape::Dense),
        None => Ok(Shape::Dense(range.clone())),
    }
}

fn dense_pair<T: Float>(
    left: &Shape<T>,
    right: &Shape<T>,
    perm: Option<&Permutation>,
) -> TAResult<Shape<T>> {
    let range = left.tiles()?;
    right.validate(&range)?;
    dense(&range, perm)
}

impl<T: Float> fmt::Debug for Shape<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<T: Float> fmt::Display for Shape<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dense(range) => write!(f, "dense shape over {}", range),
            Self::Sparse(sparse) => fmt::Display::fmt(sparse, f),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Tensor, TiledRange1};

    use super::*;

    #[test]
    fn test_density_absorbs_sparsity() {
        let axis = TiledRange1::uniform(4, 2).unwrap();
        let trange = TiledRange::new(vec![axis.clone(), axis]).unwrap();
        let norms = Tensor::new(trange.tiles_range().clone(), vec![4., 0., 0., 4.]).unwrap();
        let sparse = Shape::Sparse(SparseShape::new(norms, &trange, 1e-6).unwrap());
        let dense = Shape::dense(&trange);

        assert!(sparse.is_zero(1).unwrap());
        assert!(!dense.is_zero(1).unwrap());
        assert!(dense.is_zero(4).is_err());

        assert!(sparse.add(&dense, 1., None).unwrap().is_dense());
        assert!(dense.mult(&sparse, 1., None).unwrap().is_dense());
        assert!(!sparse.mult(&sparse, 1., None).unwrap().is_dense());
        assert_eq!(dense.sparsity().unwrap(), 0.);
        assert_eq!(sparse.sparsity().unwrap(), 0.5);
    }

    #[test]
    fn test_block() {
        let axis = TiledRange1::uniform(6, 2).unwrap();
        let trange = TiledRange::new(vec![axis.clone(), axis]).unwrap();
        let norms = Tensor::from_fn(trange.tiles_range().clone(), |i| (i[0] * 4) as f64);
        let sparse = Shape::Sparse(SparseShape::new(norms, &trange, 1e-6).unwrap());
        let dense = Shape::<f64>::dense(&trange);

        let block = dense.block(&[1, 0], &[3, 2]).unwrap();
        assert!(block.is_dense());
        assert_eq!(block.tiles().unwrap().extent(), &[2, 2]);
        assert!(dense.block(&[1, 0], &[4, 2]).is_err());

        let block = sparse.block(&[0, 1], &[2, 3]).unwrap();
        assert_eq!(block.tiles().unwrap().extent(), &[2, 2]);
        assert!(block.is_zero(0).unwrap());
        assert!(!block.is_zero(2).unwrap());

        let updated = sparse.update_block(&[1, 1], &[3, 3], &block).unwrap();
        assert!(!updated.is_dense());
        assert!(updated.is_zero(4).unwrap());
        assert!(!updated.is_zero(7).unwrap());

        let updated = sparse.update_block(&[0, 0], &[2, 2], &dense.block(&[0, 0], &[2, 2]).unwrap());
        assert!(updated.unwrap().is_dense());
        assert!(dense.update_block(&[0, 0], &[1, 1], &block).is_err());
    }
}
