use std::sync::Arc;

use log::debug;

use ta_error::*;
use ta_tensor::Float;

use crate::{DistArray, Pmap, VarList};

use super::{DistEval, Plan};

/// Evaluate `factor * array[array_vars]`, permuted into the order of `vars` and redistributed
/// according to `pmap`.
pub(crate) fn eval<T: Float>(
    array: DistArray<T>,
    array_vars: VarList,
    factor: T,
    vars: &VarList,
    pmap: Arc<dyn Pmap>,
) -> TAResult<DistEval<T>> {
    let perm = array_vars.permutation_to(vars)?;
    let trange = array.trange().permute(&perm)?;

    let shape = if perm.is_identity() {
        array.shape().scale(factor, None)?
    } else {
        array.shape().scale(factor, Some(&perm))?
    };

    let tag = if factor == T::ONE {
        format!("[{}]", vars)
    } else {
        format!("[{}] [{}]", factor, vars)
    };

    let plan = Plan {
        world: array.world().clone(),
        trange: trange.clone(),
        vars: vars.clone(),
        shape: shape.clone(),
        pmap: pmap.clone(),
        tag: tag.clone(),
        args: vec![],
    };

    DistEval::spawn(plan, move |storage| async move {
        let inverse = perm.inverse();
        let source_tiles = array.trange().tiles_range().clone();
        let mut scheduled = 0;

        for ordinal in pmap.local_ordinals() {
            if shape.is_zero(ordinal)? {
                continue;
            }

            let index = trange.tiles_range().index(ordinal)?;
            let source = source_tiles.ordinal(&inverse.apply(&index)?)?;
            let tile = array.find(source);
            let perm = perm.clone();

            storage.spawn(ordinal, async move {
                let tile = tile.await?;
                let tile = if perm.is_identity() {
                    tile
                } else {
                    tile.permute(&perm)?
                };

                Ok(if factor == T::ONE {
                    tile
                } else {
                    tile.scale(factor)
                })
            })?;

            scheduled += 1;
        }

        debug!("{} scheduled {} tiles", tag, scheduled);
        Ok(())
    })
}
