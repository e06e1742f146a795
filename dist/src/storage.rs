//! A distributed, single-assignment map from tile ordinal to tile.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::{self, BoxFuture, FutureExt};
use log::{error, trace};
use tokio::sync::Notify;

use ta_error::*;

use crate::{ObjectId, Pmap, World};

/// A handle to a tile which resolves once the tile has been produced.
pub type TileFuture<V> = BoxFuture<'static, TAResult<V>>;

enum State<V> {
    Unset,
    Pending,
    Ready(V),
    Consumed,
    Failed(TAError),
}

struct Slot<V> {
    ordinal: usize,
    state: Mutex<State<V>>,
    notify: Notify,
}

impl<V: Clone> Slot<V> {
    fn new(ordinal: usize) -> Self {
        Self {
            ordinal,
            state: Mutex::new(State::Unset),
            notify: Notify::new(),
        }
    }

    /// Mark this slot as awaiting a value from a single producer.
    fn reserve(&self) -> TAResult<()> {
        let mut state = self.state.lock().expect("tile slot state");

        match &*state {
            State::Unset => {
                trace!("tile {} is pending", self.ordinal);
                *state = State::Pending;
                Ok(())
            }
            _ => Err(conflict!("tile {} has already been set", self.ordinal)),
        }
    }

    fn complete(&self, result: TAResult<V>) -> TAResult<()> {
        {
            let mut state = self.state.lock().expect("tile slot state");

            match &*state {
                State::Pending => {
                    trace!("tile {} is ready", self.ordinal);

                    *state = match result {
                        Ok(value) => State::Ready(value),
                        Err(cause) => State::Failed(cause),
                    };
                }
                _ => return Err(internal!("tile {} was completed twice", self.ordinal)),
            }
        }

        self.notify.notify_waiters();
        Ok(())
    }

    async fn read(&self, consume: bool) -> TAResult<V> {
        loop {
            // a `Notified` future receives `notify_waiters` as soon as it's constructed
            let notified = self.notify.notified();

            {
                let mut state = self.state.lock().expect("tile slot state");

                match &*state {
                    State::Ready(_) if consume => {
                        trace!("tile {} is consumed", self.ordinal);

                        return match std::mem::replace(&mut *state, State::Consumed) {
                            State::Ready(value) => Ok(value),
                            _ => Err(internal!("tile {} changed state while locked", self.ordinal)),
                        };
                    }
                    State::Ready(value) => return Ok(value.clone()),
                    State::Failed(cause) => return Err(cause.clone()),
                    State::Consumed => {
                        return Err(conflict!("tile {} has already been moved", self.ordinal))
                    }
                    State::Unset | State::Pending => {}
                }
            }

            notified.await;
        }
    }
}

/// The tiles of one distributed object held by a single rank.
pub(crate) struct LocalStore<V> {
    slots: Mutex<HashMap<usize, Arc<Slot<V>>>>,
}

impl<V> Default for LocalStore<V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone> LocalStore<V> {
    fn slot(&self, ordinal: usize) -> Arc<Slot<V>> {
        let mut slots = self.slots.lock().expect("tile slots");
        slots
            .entry(ordinal)
            .or_insert_with(|| Arc::new(Slot::new(ordinal)))
            .clone()
    }

    fn clear(&self) {
        self.slots.lock().expect("tile slots").clear()
    }

    fn len(&self) -> usize {
        self.slots.lock().expect("tile slots").len()
    }
}

struct Inner<V> {
    id: ObjectId,
    world: World,
    pmap: Arc<dyn Pmap>,
    local: Arc<LocalStore<V>>,
}

/// A distributed, single-assignment map from tile ordinal to value.
///
/// Every rank constructs its own `DistStorage` with the same [`ObjectId`]; a request for a
/// tile owned by another rank is forwarded to that rank's store.
pub struct DistStorage<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for DistStorage<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> DistStorage<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(world: &World, pmap: Arc<dyn Pmap>) -> TAResult<Self> {
        if pmap.rank() != world.rank() || pmap.procs() != world.procs() {
            return Err(bad_request!(
                "a process map of rank {} of {} does not belong to {:?}",
                pmap.rank(),
                pmap.procs(),
                world
            ));
        }

        let id = world.next_id();
        let local = world
            .fabric()
            .get_or_create(id, world.rank(), LocalStore::<V>::default)?;

        let inner = Inner {
            id,
            world: world.clone(),
            pmap,
            local,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    pub fn world(&self) -> &World {
        &self.inner.world
    }

    pub fn pmap(&self) -> &Arc<dyn Pmap> {
        &self.inner.pmap
    }

    /// The number of tiles (local or remote) in this map.
    pub fn size(&self) -> usize {
        self.inner.pmap.size()
    }

    pub fn owner(&self, ordinal: usize) -> usize {
        self.inner.pmap.owner(ordinal)
    }

    pub fn is_local(&self, ordinal: usize) -> bool {
        self.inner.pmap.is_local(ordinal)
    }

    /// The number of local tiles which have been set, requested or consumed.
    pub fn local_len(&self) -> usize {
        self.inner.local.len()
    }

    fn check(&self, ordinal: usize) -> TAResult<()> {
        if ordinal < self.size() {
            Ok(())
        } else {
            Err(bad_request!(
                "tile {} is out of range for a map of {} tiles",
                ordinal,
                self.size()
            ))
        }
    }

    fn local_slot(&self, ordinal: usize) -> TAResult<Arc<Slot<V>>> {
        self.check(ordinal)?;

        if self.is_local(ordinal) {
            Ok(self.inner.local.slot(ordinal))
        } else {
            Err(bad_request!(
                "tile {} of object {} is owned by rank {}, not {}",
                ordinal,
                self.inner.id,
                self.owner(ordinal),
                self.inner.world.rank()
            ))
        }
    }

    /// Set the value of the local tile at `ordinal`.
    pub fn set(&self, ordinal: usize, value: V) -> TAResult<()> {
        let slot = self.local_slot(ordinal)?;
        slot.reserve()?;
        slot.complete(Ok(value))
    }

    /// Set the value of the local tile at `ordinal` to the output of the given `producer`,
    /// which is spawned onto the current runtime.
    pub fn spawn<F>(&self, ordinal: usize, producer: F) -> TAResult<()>
    where
        F: Future<Output = TAResult<V>> + Send + 'static,
    {
        let slot = self.local_slot(ordinal)?;
        slot.reserve()?;

        let id = self.inner.id;
        tokio::spawn(async move {
            let result = producer.await;

            if let Err(cause) = &result {
                error!("failed to compute tile {} of object {}: {}", ordinal, id, cause);
            }

            if let Err(cause) = slot.complete(result) {
                error!("{}", cause);
            }
        });

        Ok(())
    }

    fn read(&self, ordinal: usize, consume: bool) -> TileFuture<V> {
        if let Err(cause) = self.check(ordinal) {
            return future::ready(Err(cause)).boxed();
        }

        let owner = self.owner(ordinal);
        let store = if owner == self.inner.world.rank() {
            self.inner.local.clone()
        } else {
            trace!("forward a request for tile {} to rank {}", ordinal, owner);

            let fabric = self.inner.world.fabric();
            match fabric.get_or_create(self.inner.id, owner, LocalStore::<V>::default) {
                Ok(store) => store,
                Err(cause) => return future::ready(Err(cause)).boxed(),
            }
        };

        let slot = store.slot(ordinal);

        async move {
            // the remote store must outlive this request
            let _store = store;
            slot.read(consume).await
        }
        .boxed()
    }

    /// Read the tile at `ordinal`, waiting for it to be produced.
    pub fn get(&self, ordinal: usize) -> TileFuture<V> {
        self.read(ordinal, false)
    }

    /// Take the tile at `ordinal` out of this map, waiting for it to be produced.
    ///
    /// A tile can be moved at most once.
    pub fn move_tile(&self, ordinal: usize) -> TileFuture<V> {
        self.read(ordinal, true)
    }

    /// Drop every local slot. Outstanding handles and producers are unaffected.
    ///
    /// A handle to a slot which had no producer when it was cleared never resolves, since no
    /// later `set` or `spawn` can reach the dropped slot.
    pub fn clear(&self) {
        self.inner.local.clear()
    }
}

impl<V> fmt::Debug for DistStorage<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "storage {} of {} tiles at {:?}",
            self.inner.id,
            self.inner.pmap.size(),
            self.inner.world
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::future::try_join_all;

    use crate::{BlockedPmap, Config};

    use super::*;

    fn storage(world: &World, size: usize) -> DistStorage<u64> {
        let pmap = Arc::new(BlockedPmap::new(world, size));
        DistStorage::new(world, pmap).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_single_assignment() {
        let world = World::local(Config::default());
        let storage = storage(&world, 4);

        storage.set(0, 10).unwrap();
        assert_eq!(storage.set(0, 11).unwrap_err().code(), ErrorType::Conflict);
        assert!(storage.set(4, 0).is_err());

        assert_eq!(storage.get(0).await.unwrap(), 10);
        assert_eq!(storage.get(0).await.unwrap(), 10);
        assert_eq!(storage.move_tile(0).await.unwrap(), 10);
        assert_eq!(storage.move_tile(0).await.unwrap_err().code(), ErrorType::Conflict);
        assert_eq!(storage.get(0).await.unwrap_err().code(), ErrorType::Conflict);
        assert!(storage.get(9).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_wait_for_producer() {
        let world = World::local(Config::default());
        let storage = storage(&world, 2);

        let pending = storage.get(1);

        storage
            .spawn(1, async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(7)
            })
            .unwrap();

        assert!(storage.spawn(1, async { Ok(8) }).is_err());

        let moved = storage.move_tile(1);
        assert_eq!(pending.await.unwrap(), 7);
        assert_eq!(moved.await.unwrap(), 7);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failure_propagates() {
        let world = World::local(Config::default());
        let storage = storage(&world, 1);

        storage
            .spawn(0, async { Err(bad_request!("bad tile")) })
            .unwrap();

        let (first, second) = futures::join!(storage.get(0), storage.move_tile(0));
        assert_eq!(first.unwrap_err().message(), "bad tile");
        assert_eq!(second.unwrap_err().message(), "bad tile");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_clear() {
        let world = World::local(Config::default());
        let storage = storage(&world, 2);

        storage.set(0, 1).unwrap();
        let ready = storage.get(0);
        let produced = storage.get(1);
        storage
            .spawn(1, async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(3)
            })
            .unwrap();

        assert_eq!(storage.local_len(), 2);

        storage.clear();
        assert_eq!(storage.local_len(), 0);

        assert_eq!(ready.await.unwrap(), 1);
        assert_eq!(produced.await.unwrap(), 3);

        storage.set(0, 2).unwrap();
        assert_eq!(storage.get(0).await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remote() {
        let worlds = World::create(2, Config::default()).unwrap();

        let tasks = worlds.into_iter().map(|world| {
            tokio::spawn(async move {
                if world.rank() == 0 {
                    // let the other rank request a tile before this store exists
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }

                let storage = storage(&world, 4);
                for ordinal in storage.pmap().local_ordinals() {
                    storage.set(ordinal, ordinal as u64 * 100).unwrap();
                }

                let other = if world.rank() == 0 { 3 } else { 0 };
                assert!(!storage.is_local(other));
                let value = storage.get(other).await?;

                world.fence().await;
                TAResult::Ok(value)
            })
        });

        let values = try_join_all(tasks).await.unwrap();
        let values: Vec<u64> = values.into_iter().collect::<TAResult<_>>().unwrap();
        assert_eq!(values, vec![300, 0]);
    }
}
