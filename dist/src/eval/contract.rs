use std::sync::Arc;

use futures::future::try_join;
use log::debug;

use ta_error::*;
use ta_tensor::{Float, GemmHelper, Range, Tensor, TiledRange};

use crate::{Expr, Pmap, VarList};

use super::{DistEval, Plan};

/// Evaluate `factor * left · right`, summing over every label which `left` and `right` share.
pub(crate) fn eval<T: Float>(
    left: Expr<T>,
    right: Expr<T>,
    factor: T,
    vars: &VarList,
    pmap: Arc<dyn Pmap>,
) -> TAResult<DistEval<T>> {
    let (left_vars, right_vars) = (left.vars()?, right.vars()?);

    let inner = left_vars.common(&right_vars);
    let left_outer = left_vars.outer(&right_vars);
    let right_outer = right_vars.outer(&left_vars);
    let result_vars = left_outer.concat(&right_outer)?;
    let perm = result_vars.permutation_to(vars)?;

    // the arguments are evaluated in matrix form: (outer, inner) x (inner, outer)
    let left_target = left_outer.concat(&inner)?;
    let right_target = inner.concat(&right_outer)?;

    let left_tiles = left.trange()?.tiles_range().volume();
    let right_tiles = right.trange()?.tiles_range().volume();

    let left = left.eval(&left_target, pmap.resize(left_tiles))?;
    let right = right.eval(&right_target, pmap.resize(right_tiles))?;

    let helper = GemmHelper::new(result_vars.len(), left_target.len(), right_target.len())?;
    let (left_trange, right_trange) = (left.trange().data(), right.trange().data());

    if left_trange[helper.left_inner()] != right_trange[helper.right_inner()] {
        return Err(bad_request!(
            "cannot contract {} with {} over differently tiled axes {}",
            left,
            right,
            inner
        ));
    }

    let natural = TiledRange::new(
        left_trange[helper.left_outer()]
            .iter()
            .chain(&right_trange[helper.right_outer()])
            .cloned()
            .collect(),
    )?;

    let trange = natural.permute(&perm)?;

    let shape = if perm.is_identity() {
        left.shape().gemm(right.shape(), factor, &helper, None)?
    } else {
        left.shape().gemm(right.shape(), factor, &helper, Some(&perm))?
    };

    let tag = if factor == T::ONE {
        format!("({} * {})", left, right)
    } else {
        format!("[{}] ({} * {})", factor, left, right)
    };

    let plan = Plan {
        world: left.world().clone(),
        trange: trange.clone(),
        vars: vars.clone(),
        shape: shape.clone(),
        pmap: pmap.clone(),
        tag: tag.clone(),
        args: vec![left.clone(), right.clone()],
    };

    DistEval::spawn(plan, move |storage| async move {
        try_join(left.wait(), right.wait()).await?;

        let inverse = perm.inverse();
        let outer_rank = helper.left_outer().len();
        let left_tiles = left.trange().tiles_range();
        let right_tiles = right.trange().tiles_range();

        let inner_indices: Vec<Vec<usize>> = if inner.is_empty() {
            vec![vec![]]
        } else {
            Range::from_extent(left_tiles.extent()[helper.left_inner()].to_vec())?
                .iter()
                .collect()
        };

        let mut scheduled = 0;

        for ordinal in pmap.local_ordinals() {
            if shape.is_zero(ordinal)? {
                continue;
            }

            let index = inverse.apply(&trange.tiles_range().index(ordinal)?)?;
            let (i, j) = index.split_at(outer_rank);

            let mut pairs = Vec::with_capacity(inner_indices.len());
            for k in &inner_indices {
                let l = left_tiles.ordinal(&[i, k.as_slice()].concat())?;
                let r = right_tiles.ordinal(&[k.as_slice(), j].concat())?;

                if !left.is_zero(l)? && !right.is_zero(r)? {
                    pairs.push(try_join(left.get(l), right.get(r)));
                }
            }

            let perm = perm.clone();
            let zeros = Tensor::zeros(trange.make_tile_range(ordinal)?);

            storage.spawn(ordinal, async move {
                let mut sum: Option<Tensor<T>> = None;

                for pair in pairs {
                    let (l, r) = pair.await?;
                    let product = l.gemm(&r, factor, &helper)?;

                    sum = Some(match sum {
                        Some(sum) => sum.add(&product)?,
                        None => product,
                    });
                }

                match sum {
                    Some(tile) if perm.is_identity() => Ok(tile),
                    Some(tile) => tile.permute(&perm),
                    None => Ok(zeros),
                }
            })?;

            scheduled += 1;
        }

        debug!("{} scheduled {} tiles", tag, scheduled);
        Ok(())
    })
}
