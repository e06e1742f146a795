use std::fmt;

use itertools::Itertools;

use ta_error::*;

use super::Permutation;

/// The row-major strides of a box with the given `extent`.
pub fn strides_for(extent: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; extent.len()];
    for x in (0..extent.len().saturating_sub(1)).rev() {
        strides[x] = strides[x + 1] * extent[x + 1];
    }

    strides
}

/// A row-major box of indices `[lobound, upbound)`.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Range {
    lobound: Vec<usize>,
    upbound: Vec<usize>,
    extent: Vec<usize>,
    strides: Vec<usize>,
    volume: usize,
}

impl Range {
    /// Construct a new `Range`, validating that `lobound` and `upbound` have the same rank
    /// and that `lobound <= upbound` on every axis.
    pub fn new(lobound: Vec<usize>, upbound: Vec<usize>) -> TAResult<Self> {
        if lobound.is_empty() {
            return Err(bad_request!("a range must have at least one axis"));
        } else if lobound.len() != upbound.len() {
            return Err(bad_request!(
                "range bounds {:?} and {:?} have different ranks",
                lobound,
                upbound
            ));
        } else if lobound.iter().zip(&upbound).any(|(lo, hi)| lo > hi) {
            return Err(bad_request!(
                "invalid range bounds [{:?}, {:?})",
                lobound,
                upbound
            ));
        }

        let extent: Vec<usize> = lobound.iter().zip(&upbound).map(|(lo, hi)| hi - lo).collect();
        let strides = strides_for(&extent);
        let volume = extent.iter().product();

        Ok(Self {
            lobound,
            upbound,
            extent,
            strides,
            volume,
        })
    }

    /// Construct a zero-based `Range` with the given `extent`.
    pub fn from_extent(extent: Vec<usize>) -> TAResult<Self> {
        Self::new(vec![0; extent.len()], extent)
    }

    pub fn rank(&self) -> usize {
        self.extent.len()
    }

    pub fn lobound(&self) -> &[usize] {
        &self.lobound
    }

    pub fn upbound(&self) -> &[usize] {
        &self.upbound
    }

    pub fn extent(&self) -> &[usize] {
        &self.extent
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// The number of indices in this range.
    pub fn volume(&self) -> usize {
        self.volume
    }

    /// Return `true` if the given `index` lies inside this range.
    pub fn includes(&self, index: &[usize]) -> bool {
        index.len() == self.rank()
            && index
                .iter()
                .zip(self.lobound.iter().zip(&self.upbound))
                .all(|(i, (lo, hi))| i >= lo && i < hi)
    }

    /// Return `true` if the given `ordinal` lies inside this range.
    pub fn includes_ordinal(&self, ordinal: usize) -> bool {
        ordinal < self.volume
    }

    /// The ordinal position of the given `index`, which must be included in this range.
    pub fn ordinal(&self, index: &[usize]) -> TAResult<usize> {
        if !self.includes(index) {
            return Err(bad_request!("index {:?} is not in range {}", index, self));
        }

        Ok(index
            .iter()
            .zip(&self.lobound)
            .zip(&self.strides)
            .map(|((i, lo), stride)| (i - lo) * stride)
            .sum())
    }

    /// The index at the given `ordinal` position.
    pub fn index(&self, ordinal: usize) -> TAResult<Vec<usize>> {
        if !self.includes_ordinal(ordinal) {
            return Err(bad_request!("ordinal {} is not in range {}", ordinal, self));
        }

        Ok(self
            .strides
            .iter()
            .zip(&self.extent)
            .zip(&self.lobound)
            .map(|((stride, dim), lo)| lo + (ordinal / stride) % dim)
            .collect())
    }

    /// Iterate over every index in this range in ordinal order.
    pub fn iter(&self) -> impl Iterator<Item = Vec<usize>> + '_ {
        self.lobound
            .iter()
            .zip(&self.upbound)
            .map(|(lo, hi)| *lo..*hi)
            .multi_cartesian_product()
    }

    /// The range with its axes reordered by `perm`.
    pub fn permute(&self, perm: &Permutation) -> TAResult<Self> {
        Self::new(perm.apply(&self.lobound)?, perm.apply(&self.upbound)?)
    }
}

impl fmt::Debug for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}, {:?})", self.lobound, self.upbound)
    }
}

/// The tiling of a single axis, given by its strictly increasing tile boundaries.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct TiledRange1 {
    bounds: Vec<usize>,
}

impl TiledRange1 {
    pub fn new(bounds: Vec<usize>) -> TAResult<Self> {
        if bounds.len() < 2 {
            Err(bad_request!("a tiled axis needs at least one tile: {:?}", bounds))
        } else if bounds.iter().tuple_windows().any(|(lo, hi)| lo >= hi) {
            Err(bad_request!(
                "tile boundaries must be strictly increasing: {:?}",
                bounds
            ))
        } else {
            Ok(Self { bounds })
        }
    }

    /// Tile the elements `[0, size)` into tiles of `tile_size` elements (the last may be smaller).
    pub fn uniform(size: usize, tile_size: usize) -> TAResult<Self> {
        if tile_size == 0 {
            return Err(bad_request!("tile size must be positive"));
        }

        let mut bounds = (0..size).step_by(tile_size).collect::<Vec<_>>();
        bounds.push(size);
        Self::new(bounds)
    }

    pub fn bounds(&self) -> &[usize] {
        &self.bounds
    }

    /// The number of tiles along this axis.
    pub fn tile_count(&self) -> usize {
        self.bounds.len() - 1
    }

    /// The element bounds `[lo, hi)` of the tile at position `i`.
    pub fn tile(&self, i: usize) -> TAResult<(usize, usize)> {
        if i < self.tile_count() {
            Ok((self.bounds[i], self.bounds[i + 1]))
        } else {
            Err(bad_request!(
                "tile {} is out of bounds for an axis of {} tiles",
                i,
                self.tile_count()
            ))
        }
    }

    /// The element extent of every tile along this axis.
    pub fn sizes(&self) -> Vec<usize> {
        self.bounds
            .iter()
            .tuple_windows()
            .map(|(lo, hi)| hi - lo)
            .collect()
    }

    /// The first and one-past-the-last element of this axis.
    pub fn elements(&self) -> (usize, usize) {
        (self.bounds[0], self.bounds[self.bounds.len() - 1])
    }
}

impl fmt::Debug for TiledRange1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.bounds)
    }
}

/// The tiling of a multidimensional array: one [`TiledRange1`] per axis.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct TiledRange {
    axes: Vec<TiledRange1>,
    tiles: Range,
    elements: Range,
}

impl TiledRange {
    pub fn new(axes: Vec<TiledRange1>) -> TAResult<Self> {
        let tiles = Range::from_extent(axes.iter().map(TiledRange1::tile_count).collect())?;

        let (lo, hi) = axes.iter().map(TiledRange1::elements).unzip();
        let elements = Range::new(lo, hi)?;

        Ok(Self {
            axes,
            tiles,
            elements,
        })
    }

    pub fn rank(&self) -> usize {
        self.axes.len()
    }

    pub fn data(&self) -> &[TiledRange1] {
        &self.axes
    }

    /// The zero-based range of tile indices.
    pub fn tiles_range(&self) -> &Range {
        &self.tiles
    }

    /// The range of element indices.
    pub fn elements_range(&self) -> &Range {
        &self.elements
    }

    /// The element range of the tile at the given `ordinal`.
    pub fn make_tile_range(&self, ordinal: usize) -> TAResult<Range> {
        let index = self.tiles.index(ordinal)?;

        let (lo, hi) = index
            .into_iter()
            .zip(&self.axes)
            .map(|(i, axis)| axis.tile(i))
            .collect::<TAResult<Vec<_>>>()?
            .into_iter()
            .unzip();

        Range::new(lo, hi)
    }

    /// The tiling with its axes reordered by `perm`.
    pub fn permute(&self, perm: &Permutation) -> TAResult<Self> {
        Self::new(perm.apply(&self.axes)?)
    }
}

impl fmt::Debug for TiledRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.axes).finish()
    }
}

impl fmt::Display for TiledRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_ordinal() {
        let range = Range::new(vec![1, 2], vec![3, 5]).unwrap();
        assert_eq!(range.volume(), 6);
        assert_eq!(range.strides(), &[3, 1]);

        for (ordinal, index) in range.iter().enumerate() {
            assert_eq!(range.ordinal(&index).unwrap(), ordinal);
            assert_eq!(range.index(ordinal).unwrap(), index);
        }

        assert!(range.ordinal(&[0, 2]).is_err());
        assert!(range.index(6).is_err());
    }

    #[test]
    fn test_tiled_range() {
        let rows = TiledRange1::new(vec![0, 2, 5]).unwrap();
        let cols = TiledRange1::uniform(4, 3).unwrap();
        assert_eq!(cols.bounds(), &[0, 3, 4]);
        assert_eq!(rows.sizes(), vec![2, 3]);

        let trange = TiledRange::new(vec![rows, cols]).unwrap();
        assert_eq!(trange.tiles_range().extent(), &[2, 2]);
        assert_eq!(trange.elements_range().extent(), &[5, 4]);

        let tile = trange.make_tile_range(3).unwrap();
        assert_eq!(tile.lobound(), &[2, 3]);
        assert_eq!(tile.upbound(), &[5, 4]);

        assert!(TiledRange1::new(vec![0, 2, 2]).is_err());
    }
}
