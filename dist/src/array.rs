use std::fmt;
use std::sync::Arc;

use futures::future::{self, FutureExt};
use log::debug;

use ta_error::*;
use ta_tensor::{Float, Shape, SparseShape, Tensor, TiledRange};

use crate::{DistStorage, Expr, Pmap, TileFuture, VarList, World};

struct Inner<T> {
    world: World,
    trange: TiledRange,
    shape: Shape<T>,
    storage: DistStorage<Tensor<T>>,
}

/// A tiled array whose tiles are distributed over the ranks of a [`World`].
pub struct DistArray<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for DistArray<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Float> DistArray<T> {
    /// Construct a new, empty `DistArray`.
    ///
    /// Every rank must construct its distributed objects in the same order.
    pub fn new(
        world: &World,
        trange: TiledRange,
        shape: Shape<T>,
        pmap: Arc<dyn Pmap>,
    ) -> TAResult<Self> {
        shape.validate(trange.tiles_range())?;

        if pmap.size() != trange.tiles_range().volume() {
            return Err(bad_request!(
                "a process map of {} tiles cannot distribute an array tiled as {}",
                pmap.size(),
                trange
            ));
        }

        let storage = DistStorage::new(world, pmap)?;

        let inner = Inner {
            world: world.clone(),
            trange,
            shape,
            storage,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Construct a new `DistArray` in which every tile is nonzero.
    pub fn dense(world: &World, trange: TiledRange, pmap: Arc<dyn Pmap>) -> TAResult<Self> {
        let shape = Shape::dense(&trange);
        Self::new(world, trange, shape, pmap)
    }

    /// Construct a new sparse `DistArray` from the norm of every tile.
    ///
    /// `tile_norms` must be the same on every rank.
    pub fn sparse(
        world: &World,
        trange: TiledRange,
        tile_norms: Tensor<T>,
        pmap: Arc<dyn Pmap>,
    ) -> TAResult<Self> {
        let shape = SparseShape::new(tile_norms, &trange, world.threshold())?;
        Self::new(world, trange, Shape::Sparse(shape), pmap)
    }

    /// Construct a new sparse `DistArray` from the tiles which each rank computed locally.
    ///
    /// The shape is computed collectively, so every rank must call this at the same point.
    /// Tiles whose norm falls below the threshold are dropped.
    pub async fn from_local_tiles(
        world: &World,
        trange: TiledRange,
        pmap: Arc<dyn Pmap>,
        tiles: Vec<(usize, Tensor<T>)>,
    ) -> TAResult<Self> {
        let tile_count = trange.tiles_range().volume();
        let mut norms = vec![T::ZERO; tile_count];

        // every rank must join the reduction, even with invalid input
        let valid = tiles.iter().try_for_each(|(ordinal, tile)| {
            if *ordinal >= tile_count || !pmap.is_local(*ordinal) {
                return Err(bad_request!("tile {} is not local to {:?}", ordinal, world));
            }

            let range = trange.make_tile_range(*ordinal)?;
            if tile.range() != &range {
                return Err(bad_request!(
                    "tile {} must have range {}, not {}",
                    ordinal,
                    range,
                    tile.range()
                ));
            }

            norms[*ordinal] = tile.norm();
            Ok(())
        });

        let norms = Tensor::new(trange.tiles_range().clone(), norms)?;
        let shape = SparseShape::collective(world, norms, &trange, world.threshold()).await?;
        valid?;

        let array = Self::new(world, trange, Shape::Sparse(shape), pmap)?;

        let mut count = 0;
        for (ordinal, tile) in tiles {
            if !array.is_zero(ordinal)? {
                array.inner.storage.set(ordinal, tile)?;
                count += 1;
            }
        }

        debug!("{:?} set {} local tiles of {}", world, count, array);

        Ok(array)
    }

    pub fn world(&self) -> &World {
        &self.inner.world
    }

    pub fn trange(&self) -> &TiledRange {
        &self.inner.trange
    }

    pub fn shape(&self) -> &Shape<T> {
        &self.inner.shape
    }

    pub fn storage(&self) -> &DistStorage<Tensor<T>> {
        &self.inner.storage
    }

    pub fn pmap(&self) -> &Arc<dyn Pmap> {
        self.inner.storage.pmap()
    }

    /// The number of tiles in this array.
    pub fn size(&self) -> usize {
        self.inner.storage.size()
    }

    pub fn owner(&self, ordinal: usize) -> usize {
        self.inner.storage.owner(ordinal)
    }

    pub fn is_local(&self, ordinal: usize) -> bool {
        self.inner.storage.is_local(ordinal)
    }

    pub fn is_zero(&self, ordinal: usize) -> TAResult<bool> {
        self.inner.shape.is_zero(ordinal)
    }

    pub fn is_dense(&self) -> bool {
        self.inner.shape.is_dense()
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

    /// Set the local tile at `ordinal`, which must not be zero.
    pub fn set(&self, ordinal: usize, tile: Tensor<T>) -> TAResult<()> {
        if self.is_zero(ordinal)? {
            return Err(bad_request!("cannot set tile {}, which is zero in {}", ordinal, self));
        }

        let range = self.inner.trange.make_tile_range(ordinal)?;
        if tile.range() != &range {
            return Err(bad_request!(
                "tile {} must have range {}, not {}",
                ordinal,
                range,
                tile.range()
            ));
        }

        self.inner.storage.set(ordinal, tile)
    }

    /// Set every nonzero local tile to `value`.
    pub fn fill_local(&self, value: T) -> TAResult<()> {
        for ordinal in self.local_nonzero()? {
            let range = self.inner.trange.make_tile_range(ordinal)?;
            self.inner.storage.set(ordinal, Tensor::filled(range, value))?;
        }

        Ok(())
    }

    /// Read the tile at `ordinal`, which may be owned by another rank.
    pub fn find(&self, ordinal: usize) -> TileFuture<Tensor<T>> {
        match self.is_zero(ordinal) {
            Ok(false) => self.inner.storage.get(ordinal),
            Ok(true) => future::ready(Err(not_found!("tile {} of {} is zero", ordinal, self))).boxed(),
            Err(cause) => future::ready(Err(cause)).boxed(),
        }
    }

    /// Label the axes of this array to use it in an expression, e.g. `a.expr("i,j")`.
    pub fn expr(&self, vars: &str) -> TAResult<Expr<T>> {
        let vars: VarList = vars.parse()?;

        if vars.len() == self.inner.trange.rank() {
            Ok(Expr::leaf(self.clone(), vars))
        } else {
            Err(bad_request!(
                "cannot label an array of rank {} with {}",
                self.inner.trange.rank(),
                vars
            ))
        }
    }
}

impl<T: Float> fmt::Display for DistArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "array {} with {}", self.inner.trange, self.inner.shape)
    }
}

impl<T: Float> fmt::Debug for DistArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
