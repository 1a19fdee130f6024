//! Configuration blocks for the dispatch engine.
use serde::Deserialize;
use serde::Serialize;

/// Concurrency bounds for [`AsyncTask`](crate::AsyncTask) executors.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AsyncConf {
    /// Number of ready workers; `0` spawns workers on demand up to the pool size.
    #[serde(default)]
    pub worker_count: usize,

    /// Maximum number of events executed concurrently.
    ///
    /// `0` falls back to the worker count, or to twice the available
    /// parallelism when that is unset too.
    #[serde(default = "AsyncConf::default_pool_size")]
    pub pool_size: usize,
}

impl Default for AsyncConf {
    fn default() -> Self {
        AsyncConf {
            worker_count: 0,
            pool_size: AsyncConf::default_pool_size(),
        }
    }
}

impl AsyncConf {
    /// Conf bounded to the given pool size, with on-demand workers.
    pub fn with_pool_size(pool_size: usize) -> AsyncConf {
        AsyncConf {
            worker_count: 0,
            pool_size,
        }
    }

    /// The effective concurrency bound for this conf.
    pub fn concurrency(&self) -> usize {
        if self.pool_size > 0 {
            return self.pool_size;
        }
        if self.worker_count > 0 {
            return self.worker_count;
        }
        AsyncConf::default_pool_size()
    }

    fn default_pool_size() -> usize {
        let parallel = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(8);
        parallel * 2
    }
}
