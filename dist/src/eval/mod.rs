//! Asynchronous, tile-by-tile evaluation of array expressions.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture, FutureExt, Shared};
use log::debug;

use ta_error::*;
use ta_tensor::{Float, Range, Shape, Tensor, TiledRange};

use crate::{DistArray, DistStorage, Pmap, TileFuture, VarList, World};

pub(crate) mod binary;
pub(crate) mod contract;
pub(crate) mod leaf;
pub(crate) mod unary;

/// Resolves once every task of an evaluation has been scheduled.
pub type EvalDone = Shared<BoxFuture<'static, TAResult<()>>>;

struct Inner<T> {
    world: World,
    trange: TiledRange,
    vars: VarList,
    shape: Shape<T>,
    storage: DistStorage<Tensor<T>>,
    done: EvalDone,
    tag: String,
    args: Vec<DistEval<T>>,
}

/// An expression which is being evaluated.
///
/// The tiles of a `DistEval` are produced asynchronously; [`DistEval::wait`] resolves once
/// every task has been scheduled, and each tile resolves once it has been computed.
pub struct DistEval<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for DistEval<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// The parts of an evaluation which its driver task needs.
pub(crate) struct Plan<T> {
    pub world: World,
    pub trange: TiledRange,
    pub vars: VarList,
    pub shape: Shape<T>,
    pub pmap: Arc<dyn Pmap>,
    pub tag: String,
    pub args: Vec<DistEval<T>>,
}

impl<T: Float> DistEval<T> {
    /// Allocate the result storage of `plan` and spawn its driver.
    ///
    /// The driver is given the result storage, and must schedule every nonzero local tile.
    pub(crate) fn spawn<F, Fut>(plan: Plan<T>, driver: F) -> TAResult<Self>
    where
        F: FnOnce(DistStorage<Tensor<T>>) -> Fut,
        Fut: Future<Output = TAResult<()>> + Send + 'static,
    {
        let Plan {
            world,
            trange,
            vars,
            shape,
            pmap,
            tag,
            args,
        } = plan;

        let tiles = trange.tiles_range();
        shape.validate(tiles)?;

        if pmap.size() != tiles.volume() {
            return Err(bad_request!(
                "a process map of {} tiles cannot distribute {} tiles",
                pmap.size(),
                tiles.volume()
            ));
        }

        let storage = DistStorage::new(&world, pmap)?;

        debug!("evaluate {} as object {}", tag, storage.id());

        let driver = tokio::spawn(driver(storage.clone()));
        let done = driver
            .map(|result| match result {
                Ok(result) => result,
                Err(cause) => Err(internal!("an evaluation driver failed: {}", cause)),
            })
            .boxed()
            .shared();

        let inner = Inner {
            world,
            trange,
            vars,
            shape,
            storage,
            done,
            tag,
            args,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn world(&self) -> &World {
        &self.inner.world
    }

    pub fn trange(&self) -> &TiledRange {
        &self.inner.trange
    }

    /// The range of elements of the result.
    pub fn range(&self) -> &Range {
        self.inner.trange.elements_range()
    }

    pub fn vars(&self) -> &VarList {
        &self.inner.vars
    }

    pub fn shape(&self) -> &Shape<T> {
        &self.inner.shape
    }

    pub fn is_dense(&self) -> bool {
        self.inner.shape.is_dense()
    }

    pub fn is_zero(&self, ordinal: usize) -> TAResult<bool> {
        self.inner.shape.is_zero(ordinal)
    }

    pub fn pmap(&self) -> &Arc<dyn Pmap> {
        self.inner.storage.pmap()
    }

    /// The number of tiles of the result.
    pub fn size(&self) -> usize {
        self.inner.storage.size()
    }

    pub fn owner(&self, ordinal: usize) -> usize {
        self.inner.storage.owner(ordinal)
    }

    pub fn is_local(&self, ordinal: usize) -> bool {
        self.inner.storage.is_local(ordinal)
    }

    pub fn storage(&self) -> &DistStorage<Tensor<T>> {
        &self.inner.storage
    }

    /// The ordinals of the local tiles which are not zero.
    pub fn local_nonzero(&self) -> TAResult<Vec<usize>> {
        let mut ordinals = Vec::new();
        for ordinal in self.pmap().local_ordinals() {
            if !self.is_zero(ordinal)? {
                ordinals.push(ordinal);
            }
        }

        Ok(ordinals)
    }

    /// Wait until every task of this evaluation has been scheduled.
    pub async fn wait(&self) -> TAResult<()> {
        self.inner.done.clone().await
    }

    pub fn done(&self) -> EvalDone {
        self.inner.done.clone()
    }

    /// Read a tile of the result without consuming it.
    pub fn get(&self, ordinal: usize) -> TileFuture<Tensor<T>> {
        self.inner.storage.get(ordinal)
    }

    /// Take a tile out of the result.
    pub fn move_tile(&self, ordinal: usize) -> TileFuture<Tensor<T>> {
        self.inner.storage.move_tile(ordinal)
    }

    /// Move every nonzero local tile of the result into `dest`, then wait for all of them to be
    /// computed and for every other rank to do the same.
    pub async fn eval_to(&self, dest: &DistArray<T>) -> TAResult<()> {
        let result = self.move_local_tiles(dest).await;
        self.inner.world.fence().await;
        result.map_err(|cause| cause.consume(format!("evaluating {}", self.inner.tag)))
    }

    async fn move_local_tiles(&self, dest: &DistArray<T>) -> TAResult<()> {
        if dest.trange() != self.trange() {
            return Err(bad_request!(
                "cannot write a result tiled as {} to an array tiled as {}",
                self.trange(),
                dest.trange()
            ));
        }

        self.wait().await?;

        let ordinals = self.local_nonzero()?;
        for ordinal in ordinals.iter().copied() {
            dest.storage().spawn(ordinal, self.move_tile(ordinal))?;
        }

        debug!("{} moved {} tiles", self.inner.tag, ordinals.len());

        try_join_all(ordinals.into_iter().map(|ordinal| dest.storage().get(ordinal))).await?;
        Ok(())
    }
}

impl<T> fmt::Display for DistEval<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.tag)
    }
}

impl<T> fmt::Debug for DistEval<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evaluation of {} ({} arguments)", self.inner.tag, self.inner.args.len())
    }
}
