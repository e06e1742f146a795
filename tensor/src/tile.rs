use std::fmt;
use std::sync::Arc;

use ndarray::linalg::general_mat_mul;
use ndarray::{Array2, ArrayD, ArrayView2, ArrayViewD, IxDyn, Slice};

use ta_error::*;

use super::{strides_for, Float, GemmHelper, Permutation, Range};

/// A dense, row-major block of elements over a [`Range`].
///
/// Cloning a `Tensor` is cheap: the element buffer is shared.
#[derive(Clone)]
pub struct Tensor<T> {
    range: Range,
    data: Arc<Vec<T>>,
}

impl<T: Float> Tensor<T> {
    /// Construct a new `Tensor` from a row-major `data` buffer.
    pub fn new(range: Range, data: Vec<T>) -> TAResult<Self> {
        if data.len() == range.volume() {
            Ok(Self {
                range,
                data: Arc::new(data),
            })
        } else {
            Err(bad_request!(
                "a tensor with range {} requires {} elements, not {}",
                range,
                range.volume(),
                data.len()
            ))
        }
    }

    pub fn filled(range: Range, value: T) -> Self {
        let data = vec![value; range.volume()];

        Self {
            range,
            data: Arc::new(data),
        }
    }

    pub fn zeros(range: Range) -> Self {
        Self::filled(range, T::ZERO)
    }

    /// Construct a new `Tensor` by calling `f` with each index of `range`.
    pub fn from_fn<F: FnMut(&[usize]) -> T>(range: Range, mut f: F) -> Self {
        let data = range.iter().map(|index| f(&index)).collect();

        Self {
            range,
            data: Arc::new(data),
        }
    }

    pub fn range(&self) -> &Range {
        &self.range
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        Arc::try_unwrap(self.data).unwrap_or_else(|data| data.as_ref().clone())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, index: &[usize]) -> TAResult<T> {
        self.range.ordinal(index).map(|ordinal| self.data[ordinal])
    }

    /// The Frobenius norm of this tensor.
    pub fn norm(&self) -> T {
        self.data.iter().fold(T::ZERO, |sum, x| sum + *x * *x).sqrt()
    }

    /// The same elements over a zero-based range.
    pub fn rebase(self) -> TAResult<Self> {
        let range = Range::from_extent(self.range.extent().to_vec())?;

        Ok(Self {
            range,
            data: self.data,
        })
    }

    pub fn unary<F: Fn(T) -> T>(&self, op: F) -> Self {
        Self {
            range: self.range.clone(),
            data: Arc::new(self.data.iter().copied().map(op).collect()),
        }
    }

    pub fn binary<F: Fn(T, T) -> T>(&self, other: &Self, op: F) -> TAResult<Self> {
        if self.range.extent() != other.range.extent() {
            return Err(bad_request!(
                "cannot combine tensors with ranges {} and {}",
                self.range,
                other.range
            ));
        }

        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(l, r)| op(*l, *r))
            .collect();

        Ok(Self {
            range: self.range.clone(),
            data: Arc::new(data),
        })
    }

    pub fn scale(&self, factor: T) -> Self {
        self.unary(|x| x * factor)
    }

    pub fn neg(&self) -> Self {
        self.unary(|x| -x)
    }

    pub fn add(&self, other: &Self) -> TAResult<Self> {
        self.binary(other, |l, r| l + r)
    }

    pub fn subt(&self, other: &Self) -> TAResult<Self> {
        self.binary(other, |l, r| l - r)
    }

    pub fn mult(&self, other: &Self) -> TAResult<Self> {
        self.binary(other, |l, r| l * r)
    }

    /// Reorder the axes of this tensor, so that the element at index `i` of this tensor is
    /// found at index `perm.apply(i)` of the result.
    pub fn permute(&self, perm: &Permutation) -> TAResult<Self> {
        let range = self.range.permute(perm)?;
        if perm.is_identity() {
            return Ok(Self {
                range,
                data: self.data.clone(),
            });
        }

        let extent = self.range.extent();
        let target_strides = strides_for(range.extent());
        let steps: Vec<usize> = perm.data().iter().map(|x| target_strides[*x]).collect();

        let mut data = vec![T::ZERO; self.data.len()];
        let mut index = vec![0; extent.len()];
        let mut offset = 0;

        for value in self.data.iter() {
            data[offset] = *value;

            // advance the source index in row-major order, tracking the target offset
            for x in (0..extent.len()).rev() {
                index[x] += 1;
                offset += steps[x];

                if index[x] < extent[x] {
                    break;
                } else {
                    offset -= steps[x] * extent[x];
                    index[x] = 0;
                }
            }
        }

        Ok(Self {
            range,
            data: Arc::new(data),
        })
    }

    /// Contract this tensor with `other` as `factor * self · other`.
    pub fn gemm(&self, other: &Self, factor: T, helper: &GemmHelper) -> TAResult<Self> {
        let (m, n, k) = helper.compute_matrix_sizes(&self.range, &other.range)?;
        let range = helper.make_result_range(&self.range, &other.range)?;

        let left = ArrayView2::from_shape((m, k), self.data.as_slice()).map_err(shape_error)?;
        let right = ArrayView2::from_shape((k, n), other.data.as_slice()).map_err(shape_error)?;

        let mut result = Array2::zeros((m, n));
        general_mat_mul(factor, &left, &right, T::ZERO, &mut result);

        Self::new(range, result.into_raw_vec())
    }

    /// Copy the sub-block `[lo, hi)` of this tensor.
    pub fn block(&self, lo: &[usize], hi: &[usize]) -> TAResult<Self> {
        let range = self.sub_range(lo, hi)?;
        let view = self.view()?;

        let start = self.range.lobound();
        let block = view.slice_each_axis(|axis| {
            let x = axis.axis.index();
            Slice::from((lo[x] - start[x])..(hi[x] - start[x]))
        });

        Self::new(range, block.iter().copied().collect())
    }

    /// Copy this tensor, overwriting the sub-block `[lo, hi)` with the contents of `other`.
    pub fn update_block(&self, lo: &[usize], hi: &[usize], other: &Self) -> TAResult<Self> {
        let range = self.sub_range(lo, hi)?;
        if range.extent() != other.range.extent() {
            return Err(bad_request!(
                "cannot update block {} with a tensor of range {}",
                range,
                other.range
            ));
        }

        let source = ArrayViewD::from_shape(IxDyn(other.range.extent()), other.data.as_slice())
            .map_err(shape_error)?;

        let mut result = ArrayD::from_shape_vec(IxDyn(self.range.extent()), self.data.to_vec())
            .map_err(shape_error)?;

        let start = self.range.lobound();
        result
            .slice_each_axis_mut(|axis| {
                let x = axis.axis.index();
                Slice::from((lo[x] - start[x])..(hi[x] - start[x]))
            })
            .assign(&source);

        Self::new(self.range.clone(), result.into_raw_vec())
    }

    fn sub_range(&self, lo: &[usize], hi: &[usize]) -> TAResult<Range> {
        let range = Range::new(lo.to_vec(), hi.to_vec())?;

        let in_bounds = range.rank() == self.range.rank()
            && lo.iter().zip(self.range.lobound()).all(|(l, start)| l >= start)
            && hi.iter().zip(self.range.upbound()).all(|(h, end)| h <= end);

        if in_bounds {
            Ok(range)
        } else {
            Err(bad_request!("block {} is not within {}", range, self.range))
        }
    }

    fn view(&self) -> TAResult<ArrayViewD<'_, T>> {
        ArrayViewD::from_shape(IxDyn(self.range.extent()), self.data.as_slice()).map_err(shape_error)
    }
}

impl<T: Float> PartialEq for Tensor<T> {
    fn eq(&self, other: &Self) -> bool {
        self.range == other.range && self.data == other.data
    }
}

impl<T: Float> fmt::Debug for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor {} {:?}", self.range, self.data)
    }
}

fn shape_error(cause: ndarray::ShapeError) -> TAError {
    TAError::bad_request("invalid tensor shape", cause)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting(extent: Vec<usize>) -> Tensor<f64> {
        let range = Range::from_extent(extent).unwrap();
        let data = (0..range.volume()).map(|x| x as f64).collect();
        Tensor::new(range, data).unwrap()
    }

    #[test]
    fn test_permute_matrix() {
        let tensor = counting(vec![2, 3]);
        let swap = Permutation::new(vec![1, 0]).unwrap();
        let transposed = tensor.permute(&swap).unwrap();

        assert_eq!(transposed.range().extent(), &[3, 2]);
        assert_eq!(transposed.data(), &[0., 3., 1., 4., 2., 5.]);

        for index in tensor.range().iter() {
            let target = swap.apply(&index).unwrap();
            assert_eq!(transposed.get(&target).unwrap(), tensor.get(&index).unwrap());
        }
    }

    #[test]
    fn test_permute_composition() {
        let tensor = counting(vec![2, 3, 4]);
        let sigma = Permutation::new(vec![2, 0, 1]).unwrap();
        let tau = Permutation::new(vec![0, 2, 1]).unwrap();

        let twice = tensor.permute(&tau).unwrap().permute(&sigma).unwrap();
        let once = tensor.permute(&sigma.compose(&tau).unwrap()).unwrap();
        assert_eq!(twice, once);

        let identity = tensor.permute(&Permutation::identity(3)).unwrap();
        assert_eq!(identity, tensor);
    }

    #[test]
    fn test_gemm() {
        let left = counting(vec![2, 3]);
        let right = counting(vec![3, 2]);
        let helper = GemmHelper::new(2, 2, 2).unwrap();

        let product = left.gemm(&right, 2., &helper).unwrap();
        assert_eq!(product.range().extent(), &[2, 2]);
        assert_eq!(product.data(), &[20., 26., 56., 80.]);
    }

    #[test]
    fn test_block() {
        let tensor = counting(vec![3, 4]);
        let block = tensor.block(&[1, 1], &[3, 3]).unwrap();
        assert_eq!(block.data(), &[5., 6., 9., 10.]);

        let zeros = Tensor::zeros(block.range().clone());
        let updated = tensor.update_block(&[1, 1], &[3, 3], &zeros).unwrap();
        assert_eq!(updated.get(&[1, 2]).unwrap(), 0.);
        assert_eq!(updated.get(&[0, 2]).unwrap(), 2.);
        assert_eq!(updated.block(&[1, 1], &[3, 3]).unwrap(), zeros);

        assert!(tensor.block(&[2, 0], &[4, 1]).is_err());
    }

    #[test]
    fn test_norm() {
        let range = Range::from_extent(vec![2]).unwrap();
        let tensor = Tensor::new(range, vec![3f32, 4.]).unwrap();
        assert_eq!(tensor.norm(), 5.);
    }
}
