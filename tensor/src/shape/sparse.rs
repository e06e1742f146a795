use std::fmt;
use std::sync::Arc;

use log::debug;
use rayon::prelude::*;

use ta_error::*;

use crate::{AllReduce, Float, GemmHelper, Permutation, Range, Tensor, TiledRange};

/// Per-tile norm estimates of a block-sparse array.
///
/// Every stored norm is normalized by the volume of its tile and is either exactly zero or at
/// least `threshold`. A `SparseShape` is an immutable value: every operator returns a new shape.
#[derive(Clone)]
pub struct SparseShape<T> {
    state: Option<Arc<State<T>>>,
    threshold: T,
}

struct State<T> {
    tile_norms: Tensor<T>,
    size_vectors: Vec<Vec<T>>,
    zero_tile_count: usize,
}

impl<T: Float> Default for SparseShape<T> {
    fn default() -> Self {
        Self {
            state: None,
            threshold: T::EPSILON,
        }
    }
}

impl<T: Float> SparseShape<T> {
    /// Construct a new `SparseShape` from the raw (un-normalized) norm of each tile in `trange`.
    pub fn new(tile_norms: Tensor<T>, trange: &TiledRange, threshold: T) -> TAResult<Self> {
        if tile_norms.range().extent() != trange.tiles_range().extent() {
            return Err(bad_request!(
                "a norm tensor with range {} does not match tiling {}",
                tile_norms.range(),
                trange
            ));
        }

        let size_vectors: Vec<Vec<T>> = trange
            .data()
            .iter()
            .map(|axis| {
                axis.sizes()
                    .into_iter()
                    .map(|size| T::from_f64(size as f64))
                    .collect()
            })
            .collect();

        let volumes = outer_product(&size_vectors);
        let mut norms = tile_norms.into_vec();

        let zero_tile_count = norms
            .par_iter_mut()
            .zip(volumes.par_iter())
            .map(|(norm, volume)| {
                *norm = *norm / *volume;
                hard_zero(norm, threshold)
            })
            .sum();

        debug!(
            "constructed a sparse shape of {} tiles, {} of them zero",
            norms.len(),
            zero_tile_count
        );

        let tile_norms = Tensor::new(trange.tiles_range().clone(), norms)?;
        Ok(Self::from_state(tile_norms, size_vectors, zero_tile_count, threshold))
    }

    /// Construct a new `SparseShape` from partial norms computed on each worker,
    /// by summing `tile_norms` over all workers before normalizing.
    pub async fn collective<R: AllReduce>(
        reducer: &R,
        tile_norms: Tensor<T>,
        trange: &TiledRange,
        threshold: T,
    ) -> TAResult<Self> {
        let range = tile_norms.range().clone();
        let mut norms = tile_norms.into_vec();
        reducer.sum(&mut norms).await?;

        Self::new(Tensor::new(range, norms)?, trange, threshold)
    }

    fn from_state(
        tile_norms: Tensor<T>,
        size_vectors: Vec<Vec<T>>,
        zero_tile_count: usize,
        threshold: T,
    ) -> Self {
        let state = State {
            tile_norms,
            size_vectors,
            zero_tile_count,
        };

        Self {
            state: Some(Arc::new(state)),
            threshold,
        }
    }

    /// Construct a shape with the same threshold, hard-zeroing the given normalized norms.
    fn derive(
        &self,
        tile_norms: Tensor<T>,
        size_vectors: Vec<Vec<T>>,
        perm: Option<&Permutation>,
    ) -> TAResult<Self> {
        let range = tile_norms.range().clone();
        let mut norms = tile_norms.into_vec();
        let zero_tile_count = threshold_norms(&mut norms, self.threshold);

        let shape = Self::from_state(
            Tensor::new(range, norms)?,
            size_vectors,
            zero_tile_count,
            self.threshold,
        );

        match perm {
            Some(perm) => shape.perm(perm),
            None => Ok(shape),
        }
    }

    fn state(&self) -> TAResult<&State<T>> {
        self.state
            .as_deref()
            .ok_or_else(|| uninitialized!("access to an empty sparse shape"))
    }

    fn state_with<'a>(&'a self, other: &'a Self) -> TAResult<(&'a State<T>, &'a State<T>)> {
        let (this, that) = (self.state()?, other.state()?);

        if this.tile_norms.range() != that.tile_norms.range() {
            Err(bad_request!(
                "sparse shapes with tile ranges {} and {} are not compatible",
                this.tile_norms.range(),
                that.tile_norms.range()
            ))
        } else if this.size_vectors != that.size_vectors {
            Err(bad_request!("sparse shapes with different tilings are not compatible"))
        } else {
            Ok((this, that))
        }
    }

    /// Return `true` if this shape holds no data.
    pub fn is_empty(&self) -> bool {
        self.state.is_none()
    }

    pub fn threshold(&self) -> T {
        self.threshold
    }

    /// The normalized norm estimates of every tile.
    pub fn data(&self) -> TAResult<&Tensor<T>> {
        self.state().map(|state| &state.tile_norms)
    }

    /// The element extent of each tile, per axis.
    pub fn size_vectors(&self) -> TAResult<&[Vec<T>]> {
        self.state().map(|state| state.size_vectors.as_slice())
    }

    pub fn zero_tile_count(&self) -> TAResult<usize> {
        self.state().map(|state| state.zero_tile_count)
    }

    /// The normalized norm estimate of the tile at `ordinal`.
    pub fn norm(&self, ordinal: usize) -> TAResult<T> {
        let state = self.state()?;

        state
            .tile_norms
            .data()
            .get(ordinal)
            .copied()
            .ok_or_else(|| bad_request!("tile {} is out of range {}", ordinal, state.tile_norms.range()))
    }

    pub fn is_zero(&self, ordinal: usize) -> TAResult<bool> {
        self.norm(ordinal).map(|norm| norm < self.threshold)
    }

    /// The fraction of tiles which are zero.
    pub fn sparsity(&self) -> TAResult<f64> {
        let state = self.state()?;
        Ok(state.zero_tile_count as f64 / state.tile_norms.len() as f64)
    }

    /// Check that this shape describes the given range of tiles.
    pub fn validate(&self, range: &Range) -> TAResult<()> {
        let state = self.state()?;

        if state.tile_norms.range().extent() == range.extent() {
            Ok(())
        } else {
            Err(bad_request!(
                "a sparse shape over {} does not describe the tile range {}",
                state.tile_norms.range(),
                range
            ))
        }
    }

    /// Hard-zero every tile which is zero in `other`.
    pub fn mask(&self, other: &Self) -> TAResult<Self> {
        let (this, that) = (self.state()?, other.state()?);
        if this.tile_norms.range() != that.tile_norms.range() {
            return Err(bad_request!(
                "cannot mask a sparse shape over {} with one over {}",
                this.tile_norms.range(),
                that.tile_norms.range()
            ));
        }

        let threshold = other.threshold;
        let norms = this.tile_norms.binary(&that.tile_norms, |l, r| {
            if r < threshold {
                T::ZERO
            } else {
                l
            }
        })?;

        self.derive(norms, this.size_vectors.clone(), None)
    }

    pub fn scale(&self, factor: T, perm: Option<&Permutation>) -> TAResult<Self> {
        let state = self.state()?;
        let factor = factor.abs();
        let norms = state.tile_norms.scale(factor);
        self.derive(norms, state.size_vectors.clone(), perm)
    }

    pub fn add(&self, other: &Self, factor: T, perm: Option<&Permutation>) -> TAResult<Self> {
        let (this, that) = self.state_with(other)?;
        let factor = factor.abs();
        let norms = this
            .tile_norms
            .binary(&that.tile_norms, |l, r| (l + r) * factor)?;

        self.derive(norms, this.size_vectors.clone(), perm)
    }

    /// The shape of a difference, which is estimated in the same way as a sum.
    pub fn subt(&self, other: &Self, factor: T, perm: Option<&Permutation>) -> TAResult<Self> {
        self.add(other, factor, perm)
    }

    /// The shape of this array plus the constant `value` in every element.
    pub fn add_const(&self, value: T, perm: Option<&Permutation>) -> TAResult<Self> {
        let state = self.state()?;
        let value = value.abs();
        let volumes = outer_product(&state.size_vectors);

        let norms = state
            .tile_norms
            .data()
            .iter()
            .zip(volumes)
            .map(|(norm, volume)| *norm + value / volume.sqrt())
            .collect();

        let norms = Tensor::new(state.tile_norms.range().clone(), norms)?;
        self.derive(norms, state.size_vectors.clone(), perm)
    }

    pub fn subt_const(&self, value: T, perm: Option<&Permutation>) -> TAResult<Self> {
        self.add_const(value, perm)
    }

    /// The shape of the elementwise product of this array with `other`.
    pub fn mult(&self, other: &Self, factor: T, perm: Option<&Permutation>) -> TAResult<Self> {
        let (this, that) = self.state_with(other)?;
        let factor = factor.abs();
        let volumes = outer_product(&this.size_vectors);

        let norms = this
            .tile_norms
            .data()
            .iter()
            .zip(that.tile_norms.data())
            .zip(volumes)
            .map(|((l, r), volume)| *l * *r * factor * volume)
            .collect();

        let norms = Tensor::new(this.tile_norms.range().clone(), norms)?;
        self.derive(norms, this.size_vectors.clone(), perm)
    }

    /// Estimate the shape of the contraction of this array with `other`.
    pub fn gemm(
        &self,
        other: &Self,
        factor: T,
        helper: &GemmHelper,
        perm: Option<&Permutation>,
    ) -> TAResult<Self> {
        let (this, that) = (self.state()?, other.state()?);
        let (m, n, k) = helper.compute_matrix_sizes(this.tile_norms.range(), that.tile_norms.range())?;

        if this.size_vectors[helper.left_inner()] != that.size_vectors[helper.right_inner()] {
            return Err(bad_request!("the contracted axes of two sparse shapes are tiled differently"));
        }

        let size_vectors = this.size_vectors[helper.left_outer()]
            .iter()
            .chain(&that.size_vectors[helper.right_outer()])
            .cloned()
            .collect();

        let k_sizes = outer_product(&this.size_vectors[helper.left_inner()]);
        debug_assert_eq!(k_sizes.len(), k);

        let left = this.tile_norms.data().chunks(k.max(1)).take(m).flat_map(|row| {
            row.iter().zip(&k_sizes).map(|(norm, size)| *norm * *size)
        });

        let left = Tensor::new(this.tile_norms.range().clone(), left.collect())?;

        let right = that
            .tile_norms
            .data()
            .chunks(n.max(1))
            .zip(&k_sizes)
            .flat_map(|(row, size)| row.iter().map(move |norm| *norm * *size));

        let right = Tensor::new(that.tile_norms.range().clone(), right.collect())?;

        let norms = left.gemm(&right, factor.abs(), helper)?;
        self.derive(norms, size_vectors, perm)
    }

    /// Copy the norms of the tiles in `[lo, hi)` into a new, zero-based shape.
    pub fn block(&self, lo: &[usize], hi: &[usize]) -> TAResult<Self> {
        let state = self.state()?;

        if lo.len() != hi.len() || lo.iter().zip(hi).any(|(l, h)| l >= h) {
            return Err(bad_request!("invalid block bounds [{:?}, {:?})", lo, hi));
        }

        let norms = state.tile_norms.block(lo, hi)?.rebase()?;

        let size_vectors = state
            .size_vectors
            .iter()
            .zip(lo.iter().zip(hi))
            .map(|(sizes, (l, h))| sizes[*l..*h].to_vec())
            .collect();

        self.derive(norms, size_vectors, None)
    }

    /// Copy, scale and permute the norms of the tiles in `[lo, hi)` into a new shape.
    pub fn block_scaled(
        &self,
        lo: &[usize],
        hi: &[usize],
        factor: T,
        perm: Option<&Permutation>,
    ) -> TAResult<Self> {
        self.block(lo, hi)?.scale(factor, perm)
    }

    /// Copy this shape, overwriting the tiles in `[lo, hi)` with the norms of `other`.
    pub fn update_block(&self, lo: &[usize], hi: &[usize], other: &Self) -> TAResult<Self> {
        let (this, that) = (self.state()?, other.state()?);

        let region = this.tile_norms.block(lo, hi)?;
        let size_vectors_match = this
            .size_vectors
            .iter()
            .zip(lo.iter().zip(hi))
            .zip(&that.size_vectors)
            .all(|((sizes, (l, h)), other)| &sizes[*l..*h] == other.as_slice());

        if !size_vectors_match {
            return Err(bad_request!(
                "cannot update block [{:?}, {:?}) with a differently tiled shape",
                lo,
                hi
            ));
        }

        // `other` may have captured a different threshold
        let mut incoming = that.tile_norms.data().to_vec();
        let incoming_zeros = threshold_norms(&mut incoming, self.threshold);
        let incoming = Tensor::new(that.tile_norms.range().clone(), incoming)?;

        let norms = this.tile_norms.update_block(lo, hi, &incoming)?;

        let replaced = region.data().iter().filter(|norm| **norm < self.threshold).count();
        let zero_tile_count = this.zero_tile_count - replaced + incoming_zeros;

        Ok(Self::from_state(
            norms,
            this.size_vectors.clone(),
            zero_tile_count,
            self.threshold,
        ))
    }

    /// Permute the tiles of this shape.
    pub fn perm(&self, perm: &Permutation) -> TAResult<Self> {
        let state = self.state()?;
        let norms = state.tile_norms.permute(perm)?;
        let size_vectors = perm.apply(&state.size_vectors)?;

        Ok(Self::from_state(
            norms,
            size_vectors,
            state.zero_tile_count,
            self.threshold,
        ))
    }

    /// Apply an arbitrary transform to the (normalized) norms of this shape.
    pub fn transform<F>(&self, op: F) -> TAResult<Self>
    where
        F: FnOnce(&Tensor<T>) -> TAResult<Tensor<T>>,
    {
        let state = self.state()?;
        let norms = op(&state.tile_norms)?;

        if norms.range() == state.tile_norms.range() {
            self.derive(norms, state.size_vectors.clone(), None)
        } else {
            Err(bad_request!(
                "a shape transform must preserve the tile range {}, not {}",
                state.tile_norms.range(),
                norms.range()
            ))
        }
    }
}

impl<T: Float> fmt::Debug for SparseShape<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<T: Float> fmt::Display for SparseShape<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            None => f.write_str("empty sparse shape"),
            Some(state) => write!(
                f,
                "sparse shape over {} with {} zero tiles (threshold {})",
                state.tile_norms.range(),
                state.zero_tile_count,
                self.threshold
            ),
        }
    }
}

#[inline]
fn hard_zero<T: Float>(norm: &mut T, threshold: T) -> usize {
    if *norm < threshold {
        *norm = T::ZERO;
        1
    } else {
        0
    }
}

fn threshold_norms<T: Float>(norms: &mut [T], threshold: T) -> usize {
    norms
        .par_iter_mut()
        .map(|norm| hard_zero(norm, threshold))
        .sum()
}

/// The row-major outer product of the given vectors, e.g. the volume of every tile.
fn outer_product<T: Float>(vectors: &[Vec<T>]) -> Vec<T> {
    vectors.iter().fold(vec![T::ONE], |product, vector| {
        product
            .iter()
            .flat_map(|x| vector.iter().map(move |y| *x * *y))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use crate::TiledRange1;

    use super::*;

    const THRESHOLD: f64 = 1e-6;

    fn trange(bounds: &[&[usize]]) -> TiledRange {
        let axes = bounds
            .iter()
            .map(|bounds| TiledRange1::new(bounds.to_vec()).unwrap())
            .collect();

        TiledRange::new(axes).unwrap()
    }

    /// A shape over a 2x2 grid of 2x2 tiles with the given normalized norms.
    fn shape(norms: [f64; 4]) -> SparseShape<f64> {
        let trange = trange(&[&[0, 2, 4], &[0, 2, 4]]);
        let raw = norms.iter().map(|norm| norm * 4.).collect();
        let norms = Tensor::new(trange.tiles_range().clone(), raw).unwrap();
        SparseShape::new(norms, &trange, THRESHOLD).unwrap()
    }

    fn nonzero(shape: &SparseShape<f64>) -> Vec<bool> {
        (0..4).map(|i| !shape.is_zero(i).unwrap()).collect()
    }

    fn check_invariants(shape: &SparseShape<f64>) {
        let norms = shape.data().unwrap().data();
        assert!(norms.iter().all(|norm| *norm == 0. || *norm >= shape.threshold()));

        let zeros = norms.iter().filter(|norm| **norm == 0.).count();
        assert_eq!(shape.zero_tile_count().unwrap(), zeros);
        assert_eq!(shape.sparsity().unwrap(), zeros as f64 / norms.len() as f64);
    }

    #[test]
    fn test_normalize() {
        let trange = trange(&[&[0, 1, 4], &[0, 2]]);
        let raw = Tensor::new(trange.tiles_range().clone(), vec![4., 1e-7]).unwrap();
        let shape = SparseShape::new(raw, &trange, THRESHOLD).unwrap();

        assert_eq!(shape.data().unwrap().data(), &[2., 0.]);
        assert!(!shape.is_zero(0).unwrap());
        assert!(shape.is_zero(1).unwrap());
        assert!(shape.is_zero(2).is_err());
        check_invariants(&shape);
    }

    #[test]
    fn test_uninitialized() {
        let empty = SparseShape::<f64>::default();
        assert!(empty.is_empty());
        assert_eq!(empty.is_zero(0).unwrap_err().code(), ErrorType::Uninitialized);
        assert!(empty.add(&shape([1.; 4]), 1., None).is_err());
    }

    #[test]
    fn test_add_and_mult() {
        let a = shape([5., 0., 0., 3.]);
        let b = shape([0., 4., 2., 0.]);

        let sum = a.add(&b, 1., None).unwrap();
        assert_eq!(nonzero(&sum), vec![true, true, true, true]);
        check_invariants(&sum);

        let product = a.mult(&b, 1., None).unwrap();
        assert_eq!(nonzero(&product), vec![false, false, false, false]);
        check_invariants(&product);

        let c = shape([1., 0., 1., 0.]);
        assert_eq!(nonzero(&a.add(&c, 1., None).unwrap()), vec![true, false, true, true]);
        assert_eq!(nonzero(&a.mult(&c, 1., None).unwrap()), vec![true, false, false, false]);
        assert_eq!(a.mult(&c, -2., None).unwrap().norm(0).unwrap(), 5. * 1. * 2. * 4.);
    }

    #[test]
    fn test_scale() {
        let a = shape([5., 0., 1e-6, 3.]);
        let same = a.scale(1., None).unwrap();
        assert_eq!(same.data().unwrap(), a.data().unwrap());

        let smaller = a.scale(-0.5, None).unwrap();
        assert_eq!(nonzero(&smaller), vec![true, false, false, true]);
        assert_eq!(smaller.norm(0).unwrap(), 2.5);
        check_invariants(&smaller);
    }

    #[test]
    fn test_mask() {
        let a = shape([5., 1., 0., 3.]);
        let b = shape([0., 4., 2., 0.]);
        let masked = a.mask(&b).unwrap();
        assert_eq!(nonzero(&masked), vec![false, true, false, false]);
        check_invariants(&masked);
    }

    #[test]
    fn test_gemm() {
        let a = shape([5., 0., 0., 3.]);
        let b = shape([0., 4., 2., 0.]);
        let helper = GemmHelper::new(2, 2, 2).unwrap();

        let product = a.gemm(&b, 1., &helper, None).unwrap();
        assert_eq!(product.data().unwrap().data(), &[0., 80., 24., 0.]);
        assert_eq!(product.size_vectors().unwrap(), a.size_vectors().unwrap());
        check_invariants(&product);

        let outer = GemmHelper::new(4, 2, 2).unwrap();
        let product = a.gemm(&b, 1., &outer, None).unwrap();
        assert_eq!(product.data().unwrap().range().extent(), &[2, 2, 2, 2]);
        assert_eq!(product.norm(1).unwrap(), 20.);
    }

    #[test]
    fn test_perm() {
        let trange = trange(&[&[0, 1, 3, 6], &[0, 4, 8]]);
        let raw = Tensor::from_fn(trange.tiles_range().clone(), |i| (i[0] * 2 + i[1]) as f64);
        let shape = SparseShape::new(raw, &trange, THRESHOLD).unwrap();

        let swap = Permutation::new(vec![1, 0]).unwrap();
        let swapped = shape.perm(&swap).unwrap();
        assert_eq!(swapped.data().unwrap().range().extent(), &[2, 3]);
        assert_eq!(swapped.size_vectors().unwrap()[0], vec![4., 4.]);
        assert_eq!(swapped.zero_tile_count().unwrap(), 1);

        for index in shape.data().unwrap().range().iter() {
            let norm = shape.data().unwrap().get(&index).unwrap();
            let target = swap.apply(&index).unwrap();
            assert_eq!(swapped.data().unwrap().get(&target).unwrap(), norm);
        }
    }

    #[test]
    fn test_block_round_trip() {
        let trange = trange(&[&[0, 2, 4, 6], &[0, 3, 6, 9]]);
        let raw = Tensor::from_fn(trange.tiles_range().clone(), |i| ((i[0] + i[1]) % 3) as f64);
        let shape = SparseShape::new(raw, &trange, THRESHOLD).unwrap();

        let (lo, hi) = ([1, 0], [3, 2]);
        let block = shape.block(&lo, &hi).unwrap();
        assert_eq!(block.data().unwrap().range().lobound(), &[0, 0]);
        check_invariants(&block);

        let blank = shape.scale(0., None).unwrap();
        let updated = blank.update_block(&lo, &hi, &block).unwrap();
        check_invariants(&updated);

        let region = Range::new(lo.to_vec(), hi.to_vec()).unwrap();
        for index in region.iter() {
            let ordinal = trange.tiles_range().ordinal(&index).unwrap();
            assert_eq!(updated.norm(ordinal).unwrap(), shape.norm(ordinal).unwrap());
            assert_eq!(updated.is_zero(ordinal).unwrap(), shape.is_zero(ordinal).unwrap());
        }

        assert!(shape.block(&[1, 1], &[1, 2]).is_err());
        assert!(shape.block(&[0, 0], &[4, 1]).is_err());
    }

    #[test]
    fn test_update_block_rethresholds() {
        let base = shape([1., 1., 1., 1.]);

        let row = trange(&[&[0, 2], &[0, 2, 4]]);
        let raw = Tensor::new(row.tiles_range().clone(), vec![4e-7, 12.]).unwrap();
        let loose = SparseShape::new(raw, &row, 1e-9).unwrap();
        assert!(!loose.is_zero(0).unwrap());

        let updated = base.update_block(&[0, 0], &[1, 2], &loose).unwrap();
        check_invariants(&updated);

        assert_eq!(nonzero(&updated), vec![false, true, true, true]);
        assert_eq!(updated.norm(0).unwrap(), 0.);
        assert_eq!(updated.norm(1).unwrap(), 3.);
        assert_eq!(updated.threshold(), THRESHOLD);
    }

    #[test]
    fn test_add_const() {
        let a = shape([0., 0., 0., 3.]);
        let shifted = a.add_const(-4., None).unwrap();
        assert_eq!(nonzero(&shifted), vec![true; 4]);
        assert_eq!(shifted.norm(0).unwrap(), 2.);
        assert_eq!(shifted.norm(3).unwrap(), 5.);
    }

    struct Doubling;

    #[async_trait]
    impl AllReduce for Doubling {
        async fn sum<T: Float>(&self, data: &mut [T]) -> TAResult<()> {
            for x in data.iter_mut() {
                *x = *x + *x;
            }

            Ok(())
        }
    }

    #[tokio::test]
    async fn test_collective() {
        let trange = trange(&[&[0, 2, 4], &[0, 2, 4]]);
        let raw = Tensor::new(trange.tiles_range().clone(), vec![2., 0., 0., 4.]).unwrap();
        let shape = SparseShape::collective(&Doubling, raw, &trange, THRESHOLD)
            .await
            .unwrap();

        assert_eq!(shape.data().unwrap().data(), &[1., 0., 0., 2.]);
        assert_eq!(shape.zero_tile_count().unwrap(), 2);
    }
}
