use std::sync::Arc;

use futures::future::{self, try_join, FutureExt};
use log::debug;

use ta_error::*;
use ta_tensor::{Float, Tensor};

use crate::{BinaryOp, DistStorage, Expr, Pmap, VarList};

use super::{DistEval, Plan};

pub(crate) fn eval<T: Float>(
    left: Expr<T>,
    right: Expr<T>,
    op: BinaryOp<T>,
    vars: &VarList,
    pmap: Arc<dyn Pmap>,
) -> TAResult<DistEval<T>> {
    let left = left.eval(vars, pmap.clone())?;
    let right = right.eval(vars, pmap.clone())?;

    if left.trange() != right.trange() {
        return Err(bad_request!(
            "cannot combine arrays tiled as {} and {}",
            left.trange(),
            right.trange()
        ));
    } else if left.vars() != right.vars() {
        return Err(bad_request!(
            "cannot combine arrays labeled {} and {}",
            left.vars(),
            right.vars()
        ));
    }

    let shape = op.shape(left.shape(), right.shape(), None)?;
    let tag = format!("({} {} {})", left, op, right);

    let plan = Plan {
        world: left.world().clone(),
        trange: left.trange().clone(),
        vars: vars.clone(),
        shape: shape.clone(),
        pmap,
        tag: tag.clone(),
        args: vec![left.clone(), right.clone()],
    };

    let trange = left.trange().clone();

    DistEval::spawn(plan, move |storage| async move {
        try_join(left.wait(), right.wait()).await?;

        let schedule = |ordinal: usize, left_zero: bool, right_zero: bool| -> TAResult<bool> {
            if shape.is_zero(ordinal)? {
                return Ok(false);
            }

            // a dense result promises every tile, even where the operator absorbs it
            if op.is_zero(left_zero, right_zero) {
                let zeros = Tensor::zeros(trange.make_tile_range(ordinal)?);
                return spawn(&storage, ordinal, future::ready(Ok(zeros)));
            }

            match (left_zero, right_zero) {
                (false, false) => {
                    let tiles = try_join(left.move_tile(ordinal), right.move_tile(ordinal));
                    spawn(&storage, ordinal, tiles.map(move |tiles| {
                        let (l, r) = tiles?;
                        op.eval(&l, &r)
                    }))
                }
                (false, true) => spawn(&storage, ordinal, left.move_tile(ordinal).map(move |tile| {
                    op.eval_left(&tile?)
                })),
                (true, false) => spawn(&storage, ordinal, right.move_tile(ordinal).map(move |tile| {
                    op.eval_right(&tile?)
                })),
                (true, true) => Ok(false),
            }
        };

        let mut scheduled = 0;

        for ordinal in left.local_nonzero()? {
            if schedule(ordinal, false, right.is_zero(ordinal)?)? {
                scheduled += 1;
            }
        }

        // a dense result needs the tiles which only the right argument holds, even for a product
        if op.is_additive() || shape.is_dense() {
            for ordinal in right.local_nonzero()? {
                if left.is_zero(ordinal)? && schedule(ordinal, true, false)? {
                    scheduled += 1;
                }
            }
        }

        debug!("{} scheduled {} tiles", tag, scheduled);
        Ok(())
    })
}

fn spawn<T, F>(storage: &DistStorage<Tensor<T>>, ordinal: usize, tile: F) -> TAResult<bool>
where
    T: Float,
    F: std::future::Future<Output = TAResult<Tensor<T>>> + Send + 'static,
{
    storage.spawn(ordinal, tile).map(|()| true)
}
