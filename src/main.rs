// src/main.rs
use clap::Parser;
use crossbeam_channel::unbounded;
use ethash_gpu_rs::ethash::{Cache, hashimoto_light, seed::seedhash};
use ethash_gpu_rs::utils::logging::init_bench_logging;
use ethash_gpu_rs::utils::parse_hex_array;
use ethash_gpu_rs::{self, *};
use serde_json::json;
use std::time::{Duration, Instant};

/// Main entry point for the engine front end
///
/// # Returns
/// - `Ok(())` on successful execution
/// - `Err(MinerError)` if any operation fails
fn main() -> Result<(), MinerError> {
    let cli = cli::Commands::parse();

    match cli.action {
        cli::Action::Bench(opts) => run_benchmark(opts),
        cli::Action::Hash(opts) => hash_nonces(opts),
        cli::Action::Trace(opts) => trace_nonce(opts),
        cli::Action::Verify(opts) => verify(opts),
        cli::Action::Search(opts) => search(opts),
        cli::Action::Epoch(opts) => epoch_info(opts),
        cli::Action::Config(opts) => generate_config(opts),
    }
}

/// Builds the engine and the requested dataset
fn open_dataset(
    engine_args: &cli::EngineArgs,
    dataset_args: &cli::DatasetArgs,
) -> Result<(Config, Engine, DatasetHandle), MinerError> {
    let config = engine_args.resolve()?;
    let engine = Engine::from_config(&config)?;
    let params = dataset_args.params(config.cache_recipe)?;
    let dataset = engine.build_dataset_with(params, dataset_args.partitions)?;
    log::info!(
        "Dataset {} ready: {} items in {} partition(s) of {} items",
        dataset.id(),
        dataset.layout().total_items(),
        dataset.layout().partitions(),
        dataset.layout().items_per_partition()
    );
    Ok((config, engine, dataset))
}

/// Runs back-to-back batches for a fixed duration
///
/// # Operations
/// 1. Initializes benchmark-specific logging
/// 2. Builds the dataset on the configured device
/// 3. Dispatches batches of consecutive nonces until the time is up
/// 4. Reports the hashrate
fn run_benchmark(opts: cli::BenchOptions) -> Result<(), MinerError> {
    init_bench_logging();

    let (config, engine, dataset) = open_dataset(&opts.engine, &opts.dataset)?;
    let batch_size = opts.batch_size.unwrap_or(config.batch_size).max(1);
    let reporter = StatsReporter::new(Duration::from_secs(config.report_interval_secs));
    let hash_sender = reporter.hash_sender();
    reporter.start_reporting();

    log::info!(
        "Starting {} benchmark on {} for {} seconds ({} nonces per batch)",
        engine.capabilities().backend,
        engine.capabilities().name,
        opts.duration,
        batch_size
    );

    let header = [0u8; 32];
    let start_time = Instant::now();
    let mut next = 0u64;
    let mut total = 0u64;
    while start_time.elapsed().as_secs() < opts.duration {
        let nonces: Vec<u64> = (next..next + batch_size).collect();
        let batch_start = Instant::now();
        engine.mine_batch(&dataset, &header, &nonces, None)?;
        log::debug!(
            "Batch at nonce {}: {:.1} H/s",
            next,
            batch_size as f64 / batch_start.elapsed().as_secs_f64()
        );
        let _ = hash_sender.send(batch_size);
        next += batch_size;
        total += batch_size;
    }
    reporter.stop();

    // Report final results
    let elapsed = start_time.elapsed().as_secs_f64();
    log::info!("Benchmark results:");
    log::info!("Total hashes: {}", total);
    log::info!("Average hashrate: {:.2} H/s", total as f64 / elapsed);
    log::logger().flush();

    engine.destroy_dataset(dataset);
    Ok(())
}

/// Hashes explicit nonces, on the device or from the cache
fn hash_nonces(opts: cli::HashOptions) -> Result<(), MinerError> {
    utils::init_logging();

    let header = parse_hex_array::<32>(&opts.header)?;
    let threshold = opts.target.threshold()?;

    let hashes: Vec<[u8; 32]> = if opts.light {
        let config = opts.engine.resolve()?;
        let cache = Cache::build(&opts.dataset.params(config.cache_recipe)?)?;
        opts.nonces
            .iter()
            .map(|&nonce| hashimoto_light(&cache, &header, nonce).result)
            .collect()
    } else {
        let (_, engine, dataset) = open_dataset(&opts.engine, &opts.dataset)?;
        let batch = engine.mine_batch(&dataset, &header, &opts.nonces, threshold.as_ref())?;
        if let Some(winners) = &batch.winners {
            log::info!("{} of {} nonces meet the threshold", winners.count, opts.nonces.len());
        }
        engine.destroy_dataset(dataset);
        batch.hashes
    };

    for (nonce, hash) in opts.nonces.iter().zip(&hashes) {
        let line = json!({
            "nonce": nonce,
            "result": hex::encode(hash),
            "meets_threshold": threshold.map(|t| t.is_met_by(hash)),
        });
        println!("{}", line);
    }
    Ok(())
}

/// Prints the full evaluation of one nonce
fn trace_nonce(opts: cli::TraceOptions) -> Result<(), MinerError> {
    utils::init_logging();

    let header = parse_hex_array::<32>(&opts.header)?;
    let trace = if opts.light {
        let config = opts.engine.resolve()?;
        let cache = Cache::build(&opts.dataset.params(config.cache_recipe)?)?;
        hashimoto_light(&cache, &header, opts.nonce)
    } else {
        let (_, engine, dataset) = open_dataset(&opts.engine, &opts.dataset)?;
        let trace = engine.trace_nonce(&dataset, &header, opts.nonce)?;
        engine.destroy_dataset(dataset);
        trace
    };

    let text = serde_json::to_string_pretty(&trace)?;
    match opts.output {
        Some(path) => std::fs::write(path, text)?,
        None => println!("{}", text),
    }
    Ok(())
}

/// Compares device hashes for a nonce range with the host reference
fn verify(opts: cli::VerifyOptions) -> Result<(), MinerError> {
    utils::init_logging();

    let header = match &opts.header {
        Some(text) => parse_hex_array::<32>(text)?,
        None => [0u8; 32],
    };
    let (_, engine, dataset) = open_dataset(&opts.engine, &opts.dataset)?;
    let nonces: Vec<u64> = (0..opts.count).map(|i| opts.start.wrapping_add(i)).collect();
    let report = engine.verify_batch(&dataset, &header, &nonces)?;
    engine.destroy_dataset(dataset);

    if report.is_clean() {
        log::info!("All {} nonces match the reference", report.checked);
        Ok(())
    } else {
        println!("{}", serde_json::to_string_pretty(&report)?);
        Err(MinerError::DeviceError(format!(
            "{} of {} nonces disagree with the reference",
            report.mismatches.len(),
            report.checked
        )))
    }
}

/// Searches a nonce range and prints every winner
///
/// # Operations
/// 1. Initializes logging and statistics reporting
/// 2. Builds the dataset
/// 3. Runs the scheduler over the range
/// 4. Prints shares as they arrive
fn search(opts: cli::SearchOptions) -> Result<(), MinerError> {
    utils::init_logging();

    let header = parse_hex_array::<32>(&opts.header)?;
    let threshold = opts.target.threshold()?.ok_or_else(|| {
        MinerError::InputError("search needs --threshold or --difficulty".to_string())
    })?;
    let (config, engine, dataset) = open_dataset(&opts.engine, &opts.dataset)?;

    // Statistics reporting
    let reporter = StatsReporter::new(Duration::from_secs(config.report_interval_secs));
    let hash_sender = reporter.hash_sender();
    let winner_sender = reporter.winner_sender();
    reporter.start_reporting();

    let (share_sender, share_receiver) = unbounded::<Share>();
    let printer = std::thread::spawn(move || {
        for share in share_receiver {
            let line = json!({
                "job_id": share.job_id,
                "nonce": share.nonce,
                "result": hex::encode(share.result),
            });
            println!("{}", line);
            let _ = winner_sender.send(1);
        }
    });

    let scheduler = Scheduler::new(share_sender, opts.batch_size.unwrap_or(config.batch_size));
    scheduler.update_job(SearchJob {
        job_id: hex::encode(&header[..4]),
        header,
        threshold,
        start_nonce: opts.start,
    });
    let result = scheduler.run(&engine, &dataset, Some(&hash_sender), opts.max_nonces);

    // Closing the share channel ends the printer
    drop(scheduler);
    let _ = printer.join();
    reporter.stop();

    let evaluated = result?;
    let stats = reporter.get_stats();
    log::info!(
        "Searched {} nonces, {} winner(s), {:.2} H/s",
        evaluated,
        stats.winners,
        stats.avg_hashrate
    );
    engine.destroy_dataset(dataset);
    Ok(())
}

/// Prints sizes and seed of an epoch as JSON
fn epoch_info(opts: cli::EpochOptions) -> Result<(), MinerError> {
    let params = opts.dataset.params(opts.recipe)?;
    let info = json!({
        "epoch": params.epoch,
        "seed": hex::encode(seedhash(params.epoch)),
        "recipe": params.recipe.to_string(),
        "cache_bytes": params.cache_bytes,
        "cache_items": params.cache_items(),
        "dataset_bytes": params.dataset_bytes,
        "dataset_items": params.dataset_items(),
    });
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

/// Generates configuration template file
///
/// # Arguments
/// * `opts` - Configuration generation options
fn generate_config(opts: cli::ConfigOptions) -> Result<(), MinerError> {
    let template = config::generate_template(opts.opencl);
    std::fs::write(&opts.output, template)?;
    println!("Wrote {}", opts.output.display());
    Ok(())
}
