use std::sync::Arc;

use log::debug;

use ta_error::*;
use ta_tensor::Float;

use crate::{Expr, Pmap, UnaryOp, VarList};

use super::{DistEval, Plan};

pub(crate) fn eval<T: Float>(
    arg: Expr<T>,
    op: UnaryOp<T>,
    vars: &VarList,
    pmap: Arc<dyn Pmap>,
) -> TAResult<DistEval<T>> {
    let arg = arg.eval(vars, pmap.clone())?;
    let shape = op.shape(arg.shape())?;
    let tag = format!("{} {}", op, arg);

    let plan = Plan {
        world: arg.world().clone(),
        trange: arg.trange().clone(),
        vars: vars.clone(),
        shape: shape.clone(),
        pmap: pmap.clone(),
        tag: tag.clone(),
        args: vec![arg.clone()],
    };

    DistEval::spawn(plan, move |storage| async move {
        arg.wait().await?;

        let mut scheduled = 0;
        for ordinal in arg.local_nonzero()? {
            if shape.is_zero(ordinal)? {
                continue;
            }

            let tile = arg.move_tile(ordinal);
            storage.spawn(ordinal, async move {
                let tile = tile.await?;
                Ok(op.eval(&tile))
            })?;

            scheduled += 1;
        }

        debug!("{} scheduled {} tiles", tag, scheduled);
        Ok(())
    })
}
