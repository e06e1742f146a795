//! Expressions over labeled distributed arrays.

use std::fmt;
use std::sync::Arc;

use ta_error::*;
use ta_tensor::{Float, TiledRange};

use crate::eval::{binary, contract, leaf, unary};
use crate::{BinaryOp, BlockedPmap, DistArray, DistEval, Pmap, UnaryOp, VarList, World};

/// An unevaluated expression over labeled [`DistArray`]s.
///
/// An `Expr` is consumed when it's evaluated, so each node is evaluated at most once.
pub enum Expr<T> {
    /// An array with labeled axes, scaled by a constant factor.
    Leaf {
        array: DistArray<T>,
        vars: VarList,
        factor: T,
    },
    Unary {
        arg: Box<Self>,
        op: UnaryOp<T>,
    },
    Binary {
        left: Box<Self>,
        right: Box<Self>,
        op: BinaryOp<T>,
    },
    /// The contraction of two expressions over the labels they share.
    Contract {
        left: Box<Self>,
        right: Box<Self>,
        factor: T,
    },
}

impl<T: Float> Expr<T> {
    pub fn leaf(array: DistArray<T>, vars: VarList) -> Self {
        Self::Leaf {
            array,
            vars,
            factor: T::ONE,
        }
    }

    pub fn scale(self, factor: T) -> Self {
        match self {
            Self::Leaf { array, vars, factor: f } => Self::Leaf {
                array,
                vars,
                factor: f * factor,
            },
            Self::Unary { arg, op } => Self::Unary {
                arg,
                op: UnaryOp::Scale(op.factor() * factor),
            },
            other => Self::Unary {
                arg: Box::new(other),
                op: UnaryOp::Scale(factor),
            },
        }
    }

    pub fn neg(self) -> Self {
        match self {
            Self::Leaf { .. } | Self::Unary { .. } => self.scale(-T::ONE),
            other => Self::Unary {
                arg: Box::new(other),
                op: UnaryOp::Neg,
            },
        }
    }

    pub fn add(self, other: Self) -> Self {
        self.binary(other, BinaryOp::Add(T::ONE))
    }

    pub fn subt(self, other: Self) -> Self {
        self.binary(other, BinaryOp::Subt(T::ONE))
    }

    /// The elementwise product of this expression with `other`.
    pub fn mult(self, other: Self) -> Self {
        self.binary(other, BinaryOp::Mult(T::ONE))
    }

    /// The contraction of this expression with `other` over every label they share.
    pub fn contract(self, other: Self) -> Self {
        Self::Contract {
            left: Box::new(self),
            right: Box::new(other),
            factor: T::ONE,
        }
    }

    fn binary(self, other: Self, op: BinaryOp<T>) -> Self {
        Self::Binary {
            left: Box::new(self),
            right: Box::new(other),
            op,
        }
    }

    pub fn world(&self) -> &World {
        match self {
            Self::Leaf { array, .. } => array.world(),
            Self::Unary { arg, .. } => arg.world(),
            Self::Binary { left, .. } | Self::Contract { left, .. } => left.world(),
        }
    }

    /// The labels of the result of this expression, in their natural order.
    pub fn vars(&self) -> TAResult<VarList> {
        match self {
            Self::Leaf { vars, .. } => Ok(vars.clone()),
            Self::Unary { arg, .. } => arg.vars(),
            Self::Binary { left, right, .. } => {
                let (left, right) = (left.vars()?, right.vars()?);

                if left.is_permutation_of(&right) {
                    Ok(left)
                } else {
                    Err(bad_request!("cannot combine arrays labeled {} and {}", left, right))
                }
            }
            Self::Contract { left, right, .. } => {
                let (left, right) = (left.vars()?, right.vars()?);
                left.outer(&right).concat(&right.outer(&left))
            }
        }
    }

    /// The tiling of the result of this expression, in the order of [`Expr::vars`].
    pub fn trange(&self) -> TAResult<TiledRange> {
        match self {
            Self::Leaf { array, .. } => Ok(array.trange().clone()),
            Self::Unary { arg, .. } => arg.trange(),
            Self::Binary { left, .. } => left.trange(),
            Self::Contract { left, right, .. } => {
                let (left_vars, right_vars) = (left.vars()?, right.vars()?);
                let (left, right) = (left.trange()?, right.trange()?);

                let left_axes = left_vars
                    .iter()
                    .zip(left.data())
                    .filter(|(var, _)| !right_vars.contains(var));

                let right_axes = right_vars
                    .iter()
                    .zip(right.data())
                    .filter(|(var, _)| !left_vars.contains(var));

                let axes = left_axes.chain(right_axes).map(|(_, axis)| axis.clone()).collect();
                TiledRange::new(axes)
            }
        }
    }

    /// Start evaluating this expression, with its result labeled by `vars` and distributed
    /// according to `pmap`.
    pub fn eval(self, vars: &VarList, pmap: Arc<dyn Pmap>) -> TAResult<DistEval<T>> {
        match self {
            Self::Leaf {
                array,
                vars: array_vars,
                factor,
            } => leaf::eval(array, array_vars, factor, vars, pmap),
            Self::Unary { arg, op } => unary::eval(*arg, op, vars, pmap),
            Self::Binary { left, right, op } => binary::eval(*left, *right, op, vars, pmap),
            Self::Contract {
                left,
                right,
                factor,
            } => contract::eval(*left, *right, factor, vars, pmap),
        }
    }

    /// Evaluate this expression into a new array, labeled by `vars` and distributed
    /// according to `pmap`.
    pub async fn into_array_with(
        self,
        vars: &VarList,
        pmap: Arc<dyn Pmap>,
    ) -> TAResult<DistArray<T>> {
        let eval = self.eval(vars, pmap.clone())?;

        let array = DistArray::new(eval.world(), eval.trange().clone(), eval.shape().clone(), pmap)?;
        eval.eval_to(&array).await?;

        Ok(array)
    }

    /// Evaluate this expression into a new, block-distributed array labeled by `vars`.
    pub async fn into_array(self, vars: &str) -> TAResult<DistArray<T>> {
        let vars: VarList = vars.parse()?;
        let size = self.trange()?.tiles_range().volume();
        let pmap = Arc::new(BlockedPmap::new(self.world(), size));
        self.into_array_with(&vars, pmap).await
    }
}

impl<T: Float> fmt::Display for Expr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf { vars, factor, .. } if *factor == T::ONE => write!(f, "[{}]", vars),
            Self::Leaf { vars, factor, .. } => write!(f, "[{}] [{}]", factor, vars),
            Self::Unary { arg, op } => write!(f, "{} {}", op, arg),
            Self::Binary { left, right, op } => write!(f, "({} {} {})", left, op, right),
            Self::Contract { left, right, factor } if *factor == T::ONE => {
                write!(f, "({} * {})", left, right)
            }
            Self::Contract { left, right, factor } => {
                write!(f, "[{}] ({} * {})", factor, left, right)
            }
        }
    }
}

impl<T: Float> fmt::Debug for Expr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
