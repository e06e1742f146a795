use std::sync::Arc;

use clap::Parser;
use futures::future::try_join_all;
use log::info;
use rand::Rng;

use tiledarray::dist::{BlockedPmap, Pmap};
use tiledarray::error::*;
use tiledarray::*;

/// Multiply random block-sparse matrices distributed over in-process ranks.
#[derive(Clone, Debug, Parser)]
#[command(name = "tiledarray", author, version, about, long_about = None)]
struct Config {
    /// The number of ranks to distribute tiles over
    #[arg(long, default_value_t = 2)]
    procs: usize,

    /// The number of tiles along each axis
    #[arg(long, default_value_t = 8)]
    tiles: usize,

    /// The number of elements along each axis of a tile
    #[arg(long = "tile-size", default_value_t = 32)]
    tile_size: usize,

    /// The fraction of tiles which are nonzero
    #[arg(long, default_value_t = 0.25)]
    density: f64,

    /// The norm per element below which a tile is treated as zero
    #[arg(long)]
    threshold: Option<f64>,

    /// The number of worker threads (defaults to the number of CPUs)
    #[arg(long)]
    workers: Option<usize>,

    #[arg(long = "log-level", default_value = "warn")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    if !(0. ..=1.).contains(&config.density) {
        return Err(bad_request!("density must be between 0 and 1, not {}", config.density).into());
    }

    let workers = config.workers.unwrap_or_else(num_cpus::get);
    info!("starting {} ranks on {} worker threads", config.procs, workers);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()?;

    runtime.block_on(run(config))?;

    Ok(())
}

async fn run(config: Config) -> TAResult<()> {
    let worlds = World::create(
        config.procs,
        dist::Config {
            threshold: config.threshold,
        },
    )?;

    let ranks = worlds.into_iter().map(|world| {
        let config = config.clone();
        tokio::spawn(multiply(world, config))
    });

    for result in try_join_all(ranks)
        .await
        .map_err(|cause| internal!("a rank failed: {}", cause))?
    {
        result?;
    }

    Ok(())
}

async fn multiply(world: World, config: Config) -> TAResult<()> {
    let axis = TiledRange1::uniform(config.tiles * config.tile_size, config.tile_size)?;
    let trange = TiledRange::new(vec![axis.clone(), axis])?;

    let a = random(&world, &trange, config.density).await?;
    let b = random(&world, &trange, config.density).await?;
    report(&world, "A", &a)?;
    report(&world, "B", &b)?;

    let sum = a.expr("i,j")?.add(b.expr("i,j")?).into_array("i,j").await?;
    report(&world, "A + B", &sum)?;

    let product = a.expr("i,j")?.mult(b.expr("i,j")?).into_array("i,j").await?;
    report(&world, "A .* B", &product)?;

    let contraction = a
        .expr("i,k")?
        .contract(b.expr("k,j")?)
        .into_array("i,j")
        .await?;

    report(&world, "A * B", &contraction)?;

    world.fence().await;
    Ok(())
}

/// Construct a matrix with randomly chosen nonzero tiles of uniformly distributed elements.
async fn random(world: &World, trange: &TiledRange, density: f64) -> TAResult<DistArray<f64>> {
    let pmap = Arc::new(BlockedPmap::new(world, trange.tiles_range().volume()));

    let tiles = {
        let mut rng = rand::thread_rng();
        let mut tiles = Vec::new();

        for ordinal in pmap.local_ordinals() {
            if rng.gen_bool(density) {
                let range = trange.make_tile_range(ordinal)?;
                let tile = Tensor::from_fn(range, |_| rng.gen_range(-1.0..1.0));
                tiles.push((ordinal, tile));
            }
        }

        tiles
    };

    DistArray::from_local_tiles(world, trange.clone(), pmap, tiles).await
}

fn report(world: &World, name: &str, array: &DistArray<f64>) -> TAResult<()> {
    let sparsity = array.shape().sparsity()?;

    if world.rank() == 0 {
        info!("{} has sparsity {:.3}", name, sparsity);
    }

    Ok(())
}
