use std::fmt;

use ta_error::*;

use super::{Range, TiledRange};

/// A bijection on the axes `{0, ..., n - 1}`.
///
/// Applying a `Permutation` to a sequence moves the element at position `i` to position
/// `self[i]`, i.e. `result[perm[i]] = input[i]`.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Permutation {
    map: Vec<usize>,
}

impl Permutation {
    /// Construct a new `Permutation`, validating that every axis appears exactly once.
    pub fn new(map: Vec<usize>) -> TAResult<Self> {
        let mut seen = vec![false; map.len()];

        for x in map.iter().copied() {
            if x >= map.len() || seen[x] {
                return Err(bad_request!("{:?} is not a valid permutation", map));
            }

            seen[x] = true;
        }

        Ok(Self { map })
    }

    pub fn identity(dim: usize) -> Self {
        Self {
            map: (0..dim).collect(),
        }
    }

    pub fn dim(&self) -> usize {
        self.map.len()
    }

    pub fn data(&self) -> &[usize] {
        &self.map
    }

    pub fn is_identity(&self) -> bool {
        self.map.iter().enumerate().all(|(i, x)| i == *x)
    }

    pub fn inverse(&self) -> Self {
        let mut map = vec![0; self.map.len()];
        for (i, x) in self.map.iter().copied().enumerate() {
            map[x] = i;
        }

        Self { map }
    }

    /// The permutation equivalent to applying `other` and then `self`.
    pub fn compose(&self, other: &Self) -> TAResult<Self> {
        if self.dim() != other.dim() {
            return Err(bad_request!(
                "cannot compose permutations {} and {}",
                self,
                other
            ));
        }

        Ok(Self {
            map: other.map.iter().map(|x| self.map[*x]).collect(),
        })
    }

    /// Reorder the given `items` according to this permutation.
    pub fn apply<X: Clone>(&self, items: &[X]) -> TAResult<Vec<X>> {
        if items.len() != self.dim() {
            return Err(bad_request!(
                "cannot apply permutation {} to a sequence of length {}",
                self,
                items.len()
            ));
        }

        let mut result = items.to_vec();
        for (item, x) in items.iter().zip(&self.map) {
            result[*x] = item.clone();
        }

        Ok(result)
    }

    pub fn apply_range(&self, range: &Range) -> TAResult<Range> {
        range.permute(self)
    }

    pub fn apply_trange(&self, trange: &TiledRange) -> TAResult<TiledRange> {
        trange.permute(self)
    }
}

impl fmt::Debug for Permutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Permutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", itertools::join(&self.map, " "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_axes() {
        let swap = Permutation::new(vec![1, 0]).unwrap();
        assert_eq!(swap.apply(&[1, 2]).unwrap(), vec![2, 1]);
        assert_eq!(swap.inverse(), swap);
    }

    #[test]
    fn test_compose() {
        let sigma = Permutation::new(vec![2, 0, 1]).unwrap();
        let tau = Permutation::new(vec![1, 0, 2]).unwrap();
        let x = ['a', 'b', 'c'];

        let composed = sigma.compose(&tau).unwrap();
        assert_eq!(
            sigma.apply(&tau.apply(&x).unwrap()).unwrap(),
            composed.apply(&x).unwrap()
        );

        assert_eq!(Permutation::identity(3).apply(&x).unwrap(), x.to_vec());
        assert!(sigma.compose(&sigma.inverse()).unwrap().is_identity());
    }

    #[test]
    fn test_invalid() {
        assert!(Permutation::new(vec![0, 0]).is_err());
        assert!(Permutation::new(vec![0, 2]).is_err());
        assert!(Permutation::identity(2).apply(&[1, 2, 3]).is_err());
    }
}
