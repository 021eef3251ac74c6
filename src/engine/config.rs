//! World configuration.

use crate::engine::types::{CHUNK_CAP, DEFAULT_ENTITIES_PER_CHUNK};

/// How scheduler batches are executed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutorKind {
    /// Systems of one batch run in parallel on rayon workers.
    #[default]
    MultiThreaded,
    /// One system per batch, run on the calling thread.
    SingleThreaded,
}

/// Construction-time settings of a [`World`](crate::engine::world::World).
///
/// ```ignore
/// let config = WorldConfig::default()
///     .entities_per_chunk(64)
///     .executor(ExecutorKind::SingleThreaded);
/// let world = World::with_config(config);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorldConfig {
    /// Rows per chunk, in `1..=CHUNK_CAP`.
    pub entities_per_chunk: usize,
    /// Batch executor.
    pub executor: ExecutorKind,
    /// Size of a dedicated worker pool. `None` uses rayon's global pool.
    pub worker_threads: Option<usize>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            entities_per_chunk: DEFAULT_ENTITIES_PER_CHUNK,
            executor: ExecutorKind::MultiThreaded,
            worker_threads: None,
        }
    }
}

impl WorldConfig {
    /// Sets the chunk row capacity, clamped to `1..=CHUNK_CAP`.
    pub fn entities_per_chunk(mut self, entities_per_chunk: usize) -> Self {
        self.entities_per_chunk = entities_per_chunk.clamp(1, CHUNK_CAP);
        self
    }

    /// Sets the batch executor.
    pub fn executor(mut self, executor: ExecutorKind) -> Self {
        self.executor = executor;
        self
    }

    /// Runs batches on a dedicated pool of `threads` workers.
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads.max(1));
        self
    }

    pub(crate) fn validated(mut self) -> Self {
        self.entities_per_chunk = self.entities_per_chunk.clamp(1, CHUNK_CAP);
        self
    }
}
