//! The runtime context shared by the ranks of one computation.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use async_trait::async_trait;
use log::{debug, trace};
use tokio::sync::Barrier;

use ta_error::*;
use ta_tensor::{AllReduce, Float};

/// The identifier of a distributed object, equal on every rank which constructs it.
pub type ObjectId = u64;

/// Configuration of a single computation.
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// The sparsity threshold; the machine epsilon of the element type if unset.
    pub threshold: Option<f64>,
}

type Registry = HashMap<(ObjectId, usize), Weak<dyn Any + Send + Sync>>;

#[derive(Default)]
struct Reduction {
    sum: Vec<f64>,
    readers: usize,
}

/// The in-process interconnect of every rank in a computation.
pub struct Fabric {
    procs: usize,
    config: RwLock<Config>,
    registry: Mutex<Registry>,
    reduction: Mutex<Reduction>,
    barrier: Barrier,
}

impl Fabric {
    fn new(procs: usize, config: Config) -> Self {
        Self {
            procs,
            config: RwLock::new(config),
            registry: Mutex::new(HashMap::new()),
            reduction: Mutex::new(Reduction::default()),
            barrier: Barrier::new(procs),
        }
    }

    /// The number of ranks connected by this fabric.
    pub fn procs(&self) -> usize {
        self.procs
    }

    /// Look up the part of object `id` held by `rank`, constructing it if it does not exist yet.
    pub fn get_or_create<O, F>(&self, id: ObjectId, rank: usize, create: F) -> TAResult<Arc<O>>
    where
        O: Any + Send + Sync,
        F: FnOnce() -> O,
    {
        if rank >= self.procs {
            return Err(bad_request!(
                "there is no rank {} in a fabric of {}",
                rank,
                self.procs
            ));
        }

        let mut registry = self.registry.lock().expect("fabric registry");
        registry.retain(|_, object| object.strong_count() > 0);

        if let Some(object) = registry.get(&(id, rank)).and_then(Weak::upgrade) {
            return object
                .downcast::<O>()
                .map_err(|_| internal!("object {} at rank {} has an unexpected type", id, rank));
        }

        trace!("register object {} at rank {}", id, rank);

        let object = Arc::new(create());
        let entry: Weak<O> = Arc::downgrade(&object);
        registry.insert((id, rank), entry);

        Ok(object)
    }

    async fn fence(&self) {
        self.barrier.wait().await;
    }

    async fn sum<T: Float>(&self, data: &mut [T]) {
        {
            let mut reduction = self.reduction.lock().expect("reduction state");
            if reduction.sum.len() < data.len() {
                reduction.sum.resize(data.len(), 0.);
            }

            for (sum, x) in reduction.sum.iter_mut().zip(data.iter()) {
                *sum += x.to_f64();
            }
        }

        self.barrier.wait().await;

        {
            let mut reduction = self.reduction.lock().expect("reduction state");
            for (x, sum) in data.iter_mut().zip(&reduction.sum) {
                *x = T::from_f64(*sum);
            }

            reduction.readers += 1;
            if reduction.readers == self.procs {
                *reduction = Reduction::default();
            }
        }

        self.barrier.wait().await;
    }
}

/// One rank's handle to a computation.
#[derive(Clone)]
pub struct World {
    rank: usize,
    fabric: Arc<Fabric>,
    next_id: Arc<AtomicU64>,
}

impl World {
    /// Construct a computation of `procs` ranks, returning the `World` of each rank in order.
    pub fn create(procs: usize, config: Config) -> TAResult<Vec<Self>> {
        if procs == 0 {
            return Err(bad_request!("a computation needs at least one rank"));
        }

        debug!("create a world of {} ranks with {:?}", procs, config);

        let fabric = Arc::new(Fabric::new(procs, config));
        let worlds = (0..procs)
            .map(|rank| Self {
                rank,
                fabric: fabric.clone(),
                next_id: Arc::new(AtomicU64::new(0)),
            })
            .collect();

        Ok(worlds)
    }

    /// Construct a computation with a single rank.
    pub fn local(config: Config) -> Self {
        Self {
            rank: 0,
            fabric: Arc::new(Fabric::new(1, config)),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn procs(&self) -> usize {
        self.fabric.procs
    }

    pub fn fabric(&self) -> &Arc<Fabric> {
        &self.fabric
    }

    /// Allocate the identifier of the next distributed object constructed on this rank.
    pub fn next_id(&self) -> ObjectId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn config(&self) -> Config {
        self.fabric.config.read().expect("world config").clone()
    }

    /// The sparsity threshold of this computation for the element type `T`.
    pub fn threshold<T: Float>(&self) -> T {
        self.config().threshold.map(T::from_f64).unwrap_or(T::EPSILON)
    }

    /// Set the sparsity threshold of this computation.
    ///
    /// Shapes capture the threshold when they are constructed, so this does not affect any
    /// shape (or evaluation) which already exists.
    pub fn set_threshold(&self, threshold: f64) {
        let mut config = self.fabric.config.write().expect("world config");
        config.threshold = Some(threshold);
    }

    /// Wait until every rank reaches this fence.
    pub async fn fence(&self) {
        self.fabric.fence().await
    }
}

#[async_trait]
impl AllReduce for World {
    async fn sum<T: Float>(&self, data: &mut [T]) -> TAResult<()> {
        self.fabric.sum(data).await;
        Ok(())
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rank {} of {}", self.rank, self.fabric.procs)
    }
}

#[cfg(test)]
mod tests {
    use futures::future::try_join_all;

    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sum() {
        let worlds = World::create(3, Config::default()).unwrap();

        for round in 1..3 {
            let tasks = worlds.iter().cloned().map(|world| {
                tokio::spawn(async move {
                    let mut data = [world.rank() as f64 * round as f64, 1.];
                    world.sum(&mut data[..]).await.unwrap();
                    data
                })
            });

            for data in try_join_all(tasks).await.unwrap() {
                assert_eq!(data, [3. * round as f64, 3.]);
            }
        }
    }

    #[test]
    fn test_threshold() {
        let world = World::local(Config::default());
        assert_eq!(world.threshold::<f32>(), f32::EPSILON);

        world.set_threshold(1e-3);
        assert_eq!(world.threshold::<f64>(), 1e-3);
    }

    #[test]
    fn test_registry() {
        let worlds = World::create(2, Config::default()).unwrap();
        let fabric = worlds[0].fabric();

        let first = fabric.get_or_create(7, 1, || 42usize).unwrap();
        let second = fabric.get_or_create(7, 1, || 0usize).unwrap();
        assert_eq!(*second, 42);
        assert!(fabric.get_or_create(7, 1, || "wrong type").is_err());

        std::mem::drop((first, second));
        assert_eq!(*fabric.get_or_create(7, 1, || 0usize).unwrap(), 0);
        assert!(fabric.get_or_create(7, 2, || 0usize).is_err());
    }
}
