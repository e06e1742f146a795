//! Elementwise tile operators and their sparsity rules.

use std::fmt;

use ta_error::*;
use ta_tensor::{Float, Permutation, Shape, Tensor};

/// An elementwise operator of one tile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UnaryOp<T> {
    Scale(T),
    Neg,
}

impl<T: Float> UnaryOp<T> {
    /// The factor which scales the norm of each tile.
    pub fn factor(&self) -> T {
        match self {
            Self::Scale(factor) => *factor,
            Self::Neg => -T::ONE,
        }
    }

    pub fn eval(&self, tile: &Tensor<T>) -> Tensor<T> {
        match self {
            Self::Scale(factor) => tile.scale(*factor),
            Self::Neg => tile.neg(),
        }
    }

    pub fn shape(&self, arg: &Shape<T>) -> TAResult<Shape<T>> {
        arg.scale(self.factor(), None)
    }
}

impl<T: Float> fmt::Display for UnaryOp<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scale(factor) => write!(f, "[{}]", factor),
            Self::Neg => f.write_str("-"),
        }
    }
}

/// An elementwise operator of two tiles, scaled by a constant factor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BinaryOp<T> {
    Add(T),
    Subt(T),
    Mult(T),
}

impl<T: Float> BinaryOp<T> {
    pub fn factor(&self) -> T {
        match self {
            Self::Add(factor) | Self::Subt(factor) | Self::Mult(factor) => *factor,
        }
    }

    /// This operator with its factor multiplied by `factor`.
    pub fn scale(self, factor: T) -> Self {
        match self {
            Self::Add(f) => Self::Add(f * factor),
            Self::Subt(f) => Self::Subt(f * factor),
            Self::Mult(f) => Self::Mult(f * factor),
        }
    }

    /// Return `true` if a zero tile in only one argument leaves a nonzero result.
    pub fn is_additive(&self) -> bool {
        !matches!(self, Self::Mult(_))
    }

    /// The absorption rule: whether the result tile is zero given which argument tiles are.
    pub fn is_zero(&self, left_zero: bool, right_zero: bool) -> bool {
        if self.is_additive() {
            left_zero && right_zero
        } else {
            left_zero || right_zero
        }
    }

    pub fn eval(&self, left: &Tensor<T>, right: &Tensor<T>) -> TAResult<Tensor<T>> {
        let tile = match self {
            Self::Add(_) => left.add(right),
            Self::Subt(_) => left.subt(right),
            Self::Mult(_) => left.mult(right),
        }?;

        Ok(scale(tile, self.factor()))
    }

    /// Evaluate this operator with a zero right argument.
    pub fn eval_left(&self, left: &Tensor<T>) -> TAResult<Tensor<T>> {
        match self {
            Self::Add(factor) | Self::Subt(factor) => Ok(scale(left.clone(), *factor)),
            Self::Mult(_) => Err(internal!("a product with a zero tile is zero")),
        }
    }

    /// Evaluate this operator with a zero left argument.
    pub fn eval_right(&self, right: &Tensor<T>) -> TAResult<Tensor<T>> {
        match self {
            Self::Add(factor) => Ok(scale(right.clone(), *factor)),
            Self::Subt(factor) => Ok(scale(right.clone(), -*factor)),
            Self::Mult(_) => Err(internal!("a product with a zero tile is zero")),
        }
    }

    /// The shape of the result of this operator.
    pub fn shape(
        &self,
        left: &Shape<T>,
        right: &Shape<T>,
        perm: Option<&Permutation>,
    ) -> TAResult<Shape<T>> {
        match self {
            Self::Add(factor) => left.add(right, *factor, perm),
            Self::Subt(factor) => left.subt(right, *factor, perm),
            Self::Mult(factor) => left.mult(right, *factor, perm),
        }
    }
}

impl<T: Float> fmt::Display for BinaryOp<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Add(_) => "+",
            Self::Subt(_) => "-",
            Self::Mult(_) => ".*",
        };

        if self.factor() == T::ONE {
            f.write_str(symbol)
        } else {
            write!(f, "{} [{}]", symbol, self.factor())
        }
    }
}

fn scale<T: Float>(tile: Tensor<T>, factor: T) -> Tensor<T> {
    if factor == T::ONE {
        tile
    } else {
        tile.scale(factor)
    }
}

#[cfg(test)]
mod tests {
    use ta_tensor::Range;

    use super::*;

    fn tile(data: Vec<f64>) -> Tensor<f64> {
        let range = Range::from_extent(vec![data.len()]).unwrap();
        Tensor::new(range, data).unwrap()
    }

    #[test]
    fn test_absorption() {
        let add = BinaryOp::Add(1.);
        assert!(!add.is_zero(false, true));
        assert!(!add.is_zero(true, false));
        assert!(add.is_zero(true, true));

        let mult = BinaryOp::Mult(1.);
        assert!(mult.is_zero(false, true));
        assert!(mult.is_zero(true, false));
        assert!(!mult.is_zero(false, false));
    }

    #[test]
    fn test_eval() {
        let (left, right) = (tile(vec![1., 2.]), tile(vec![3., 5.]));

        let subt = BinaryOp::Subt(2.);
        assert_eq!(subt.eval(&left, &right).unwrap().data(), &[-4., -6.]);
        assert_eq!(subt.eval_left(&left).unwrap().data(), &[2., 4.]);
        assert_eq!(subt.eval_right(&right).unwrap().data(), &[-6., -10.]);

        let mult = BinaryOp::Mult(1.).scale(-1.);
        assert_eq!(mult.eval(&left, &right).unwrap().data(), &[-3., -10.]);
        assert!(mult.eval_left(&left).is_err());

        assert_eq!(UnaryOp::Neg.eval(&left).data(), &[-1., -2.]);
        assert_eq!(UnaryOp::Scale(3.).eval(&left).data(), &[3., 6.]);
    }
}
