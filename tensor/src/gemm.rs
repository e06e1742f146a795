use std::ops;

use ta_error::*;

use super::Range;

/// Describes a contraction in matrix form: the left argument has axes `outer ++ inner` and the
/// right argument has axes `inner ++ outer`, so that the inner axes are summed over.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GemmHelper {
    result_rank: usize,
    left_rank: usize,
    right_rank: usize,
}

impl GemmHelper {
    pub fn new(result_rank: usize, left_rank: usize, right_rank: usize) -> TAResult<Self> {
        let total = left_rank + right_rank;

        if total < result_rank || (total - result_rank) % 2 != 0 {
            return Err(bad_request!(
                "a contraction of ranks {} and {} cannot have rank {}",
                left_rank,
                right_rank,
                result_rank
            ));
        }

        let inner = (total - result_rank) / 2;
        if inner > left_rank || inner > right_rank {
            return Err(bad_request!(
                "a contraction of ranks {} and {} cannot have {} inner axes",
                left_rank,
                right_rank,
                inner
            ));
        }

        Ok(Self {
            result_rank,
            left_rank,
            right_rank,
        })
    }

    pub fn result_rank(&self) -> usize {
        self.result_rank
    }

    pub fn left_rank(&self) -> usize {
        self.left_rank
    }

    pub fn right_rank(&self) -> usize {
        self.right_rank
    }

    /// The number of contracted axes.
    pub fn num_contract_ranks(&self) -> usize {
        (self.left_rank + self.right_rank - self.result_rank) / 2
    }

    pub fn left_outer(&self) -> ops::Range<usize> {
        0..(self.left_rank - self.num_contract_ranks())
    }

    pub fn left_inner(&self) -> ops::Range<usize> {
        (self.left_rank - self.num_contract_ranks())..self.left_rank
    }

    pub fn right_inner(&self) -> ops::Range<usize> {
        0..self.num_contract_ranks()
    }

    pub fn right_outer(&self) -> ops::Range<usize> {
        self.num_contract_ranks()..self.right_rank
    }

    /// Compute the `(M, N, K)` matrix dimensions of a contraction of `left` with `right`.
    pub fn compute_matrix_sizes(&self, left: &Range, right: &Range) -> TAResult<(usize, usize, usize)> {
        self.validate(left, right)?;

        let m = left.extent()[self.left_outer()].iter().product();
        let k = left.extent()[self.left_inner()].iter().product();
        let n = right.extent()[self.right_outer()].iter().product();

        Ok((m, n, k))
    }

    /// The range of the result of contracting `left` with `right`.
    pub fn make_result_range(&self, left: &Range, right: &Range) -> TAResult<Range> {
        self.validate(left, right)?;

        let lobound = left.lobound()[self.left_outer()]
            .iter()
            .chain(&right.lobound()[self.right_outer()])
            .copied()
            .collect();

        let upbound = left.upbound()[self.left_outer()]
            .iter()
            .chain(&right.upbound()[self.right_outer()])
            .copied()
            .collect();

        Range::new(lobound, upbound)
    }

    fn validate(&self, left: &Range, right: &Range) -> TAResult<()> {
        if left.rank() != self.left_rank || right.rank() != self.right_rank {
            Err(bad_request!(
                "cannot contract ranges {} and {} with ranks {} and {}",
                left,
                right,
                self.left_rank,
                self.right_rank
            ))
        } else if left.extent()[self.left_inner()] != right.extent()[self.right_inner()] {
            Err(bad_request!(
                "the inner dimensions of {} and {} do not match",
                left,
                right
            ))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_sizes() {
        let helper = GemmHelper::new(2, 3, 3).unwrap();
        assert_eq!(helper.num_contract_ranks(), 2);
        assert_eq!(helper.left_outer(), 0..1);
        assert_eq!(helper.right_outer(), 2..3);

        let left = Range::from_extent(vec![4, 2, 3]).unwrap();
        let right = Range::from_extent(vec![2, 3, 5]).unwrap();
        assert_eq!(helper.compute_matrix_sizes(&left, &right).unwrap(), (4, 5, 6));

        let result = helper.make_result_range(&left, &right).unwrap();
        assert_eq!(result.extent(), &[4, 5]);

        let bad = Range::from_extent(vec![3, 2, 5]).unwrap();
        assert!(helper.compute_matrix_sizes(&left, &bad).is_err());
        assert!(GemmHelper::new(3, 2, 2).is_err());
    }
}
