// src/miner/scheduler.rs
//! Nonce search scheduler
//!
//! Hands consecutive nonce ranges of the current job to the engine, one batch
//! per dispatch, and forwards winners as [`Share`]s. Stopping only prevents
//! further dispatches; a batch already on the device runs to completion.

use crate::engine::{DatasetHandle, Engine};
use crate::ethash::Threshold;
use crate::utils::error::MinerError;
use arc_swap::ArcSwap;
use crossbeam_channel::Sender;
use log::{debug, info};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// A header to search, with its target
#[derive(Debug, Clone)]
pub struct SearchJob {
    /// Unique identifier for the job
    pub job_id: String,
    /// 32-byte header hash
    pub header: [u8; 32],
    /// Results strictly below this value win
    pub threshold: Threshold,
    /// First nonce handed out for this job
    pub start_nonce: u64,
}

/// Represents a winning nonce found by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    /// Job ID this share belongs to
    pub job_id: String,
    /// Nonce that produced the winning hash
    pub nonce: u64,
    /// Resulting hash that meets the threshold
    pub result: [u8; 32],
}

/// A job together with the next nonce to hand out for it
#[derive(Debug)]
struct ActiveJob {
    job: SearchJob,
    next_nonce: AtomicU64,
}

impl ActiveJob {
    fn new(job: SearchJob) -> Self {
        let next_nonce = AtomicU64::new(job.start_nonce);
        ActiveJob { job, next_nonce }
    }

    /// Claims the next `len` nonces; the range wraps at `u64::MAX`
    fn claim(&self, len: u64) -> Vec<u64> {
        let start = self.next_nonce.fetch_add(len, Ordering::SeqCst);
        (0..len).map(|i| start.wrapping_add(i)).collect()
    }
}

/// Feeds nonce batches of the current job to an [`Engine`]
pub struct Scheduler {
    /// Current job and its nonce counter, swapped as one
    current_job: Arc<ArcSwap<Option<ActiveJob>>>,
    /// Channel for sending winning shares
    share_sender: Sender<Share>,
    /// Cleared by [`Scheduler::stop`]
    active: Arc<AtomicBool>,
    /// Nonces per dispatch
    batch_size: u64,
}

impl Scheduler {
    /// Creates a new Scheduler instance
    ///
    /// # Arguments
    /// * `share_sender` - Channel for sending winning shares
    /// * `batch_size` - Number of nonces per `mine_batch` call
    pub fn new(share_sender: Sender<Share>, batch_size: u64) -> Self {
        Scheduler {
            current_job: Arc::new(ArcSwap::from_pointee(None)),
            share_sender,
            active: Arc::new(AtomicBool::new(true)),
            batch_size: batch_size.max(1),
        }
    }

    /// Replaces the current job; its nonces start at `start_nonce`
    ///
    /// A batch already claimed from the previous job finishes against that
    /// job's header and reports under its id.
    ///
    /// # Arguments
    /// * `new_job` - The new job to replace the current one
    pub fn update_job(&self, new_job: SearchJob) {
        debug!("New job {} from nonce {}", new_job.job_id, new_job.start_nonce);
        self.current_job.store(Arc::new(Some(ActiveJob::new(new_job))));
    }

    /// Dispatches batches until stopped or `max_nonces` have been evaluated
    ///
    /// # Arguments
    /// * `engine` - Engine owning the dataset
    /// * `dataset` - Dataset for the job's epoch
    /// * `hash_sender` - Receives the size of every completed batch
    /// * `max_nonces` - Optional budget; `None` runs until [`Scheduler::stop`]
    ///
    /// # Returns
    /// Number of nonces evaluated. Engine errors end the loop.
    pub fn run(
        &self,
        engine: &Engine,
        dataset: &DatasetHandle,
        hash_sender: Option<&Sender<u64>>,
        max_nonces: Option<u64>,
    ) -> Result<u64, MinerError> {
        let mut evaluated = 0u64;
        while self.active.load(Ordering::Relaxed) {
            let len = match max_nonces {
                Some(max) if evaluated >= max => break,
                Some(max) => self.batch_size.min(max - evaluated),
                None => self.batch_size,
            };

            let current_job = self.current_job.load();
            let Some(active) = &**current_job else {
                std::thread::sleep(Duration::from_millis(100));
                continue;
            };

            let job = &active.job;
            let nonces = active.claim(len);
            let batch = engine.mine_batch(dataset, &job.header, &nonces, Some(&job.threshold))?;
            if let Some(winners) = batch.winners {
                for nonce in winners.nonces {
                    let index = nonce.wrapping_sub(nonces[0]) as usize;
                    let share = Share {
                        job_id: job.job_id.clone(),
                        nonce,
                        result: batch.hashes[index],
                    };
                    info!("Job {}: nonce {} meets the threshold", share.job_id, nonce);
                    self.share_sender.send(share)?;
                }
            }

            evaluated += len;
            if let Some(sender) = hash_sender {
                let _ = sender.send(len);
            }
        }
        Ok(evaluated)
    }

    /// Stops dispatching further batches
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}
