use crate::config::EmbeddingConfig;
use crate::embeddings::EmbeddingModel;
use crate::error::{Result, VectorStoreError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

/// Process-wide memoization of the embedding model.
///
/// The model is constructed lazily on first use and every later call returns
/// the same `Arc` for the lifetime of the cache; there is no invalidation, so
/// picking up a changed embedding configuration requires a new cache (in
/// practice, a process restart). Concurrent first calls are single-flight:
/// one caller loads, the rest block on the result. A failed load clears the
/// slot so a later call may retry.
pub struct ModelCache {
    config: EmbeddingConfig,
    slot: Mutex<Slot>,
    loads: AtomicUsize,
}

enum Slot {
    Empty,
    Loading(LoadWaiter),
    Ready(Arc<EmbeddingModel>),
}

struct LoadWaiter {
    state: Arc<(Mutex<LoadState>, Condvar)>,
}

struct LoadState {
    done: bool,
    model: Option<Arc<EmbeddingModel>>,
    error: Option<String>,
}

impl Clone for LoadWaiter {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl LoadWaiter {
    fn new() -> Self {
        Self {
            state: Arc::new((
                Mutex::new(LoadState {
                    done: false,
                    model: None,
                    error: None,
                }),
                Condvar::new(),
            )),
        }
    }

    fn set_ok(&self, model: Arc<EmbeddingModel>) {
        let (lock, cv) = &*self.state;
        {
            let mut guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            guard.done = true;
            guard.model = Some(model);
            guard.error = None;
        }
        cv.notify_all();
    }

    fn set_err(&self, error: String) {
        let (lock, cv) = &*self.state;
        {
            let mut guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            guard.done = true;
            guard.model = None;
            guard.error = Some(error);
        }
        cv.notify_all();
    }

    fn wait(&self) -> Result<Arc<EmbeddingModel>> {
        let (lock, cv) = &*self.state;
        let mut guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !guard.done {
            guard = cv
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if let Some(model) = &guard.model {
            return Ok(model.clone());
        }
        Err(VectorStoreError::Embedding(
            guard
                .error
                .clone()
                .unwrap_or_else(|| "Unknown model load error".to_string()),
        ))
    }
}

impl ModelCache {
    #[must_use]
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            config,
            slot: Mutex::new(Slot::Empty),
            loads: AtomicUsize::new(0),
        }
    }

    /// Return the cached model, constructing it on the first call.
    pub fn get_or_load(&self) -> Result<Arc<EmbeddingModel>> {
        enum Lookup {
            Wait(LoadWaiter),
            Load(LoadWaiter),
        }

        let lookup = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            match &*slot {
                Slot::Ready(model) => return Ok(model.clone()),
                Slot::Loading(waiter) => Lookup::Wait(waiter.clone()),
                Slot::Empty => {
                    let waiter = LoadWaiter::new();
                    *slot = Slot::Loading(waiter.clone());
                    Lookup::Load(waiter)
                }
            }
        };

        match lookup {
            Lookup::Wait(waiter) => waiter.wait(),
            Lookup::Load(waiter) => {
                self.loads.fetch_add(1, Ordering::SeqCst);
                log::info!(
                    "Loading embedding model '{}' ({} mode)",
                    self.config.model_id,
                    self.config.mode.as_str()
                );
                match EmbeddingModel::load(&self.config) {
                    Ok(model) => {
                        let model = Arc::new(model);
                        {
                            let mut slot =
                                self.slot.lock().unwrap_or_else(PoisonError::into_inner);
                            *slot = Slot::Ready(model.clone());
                        }
                        waiter.set_ok(model.clone());
                        Ok(model)
                    }
                    Err(err) => {
                        {
                            let mut slot =
                                self.slot.lock().unwrap_or_else(PoisonError::into_inner);
                            *slot = Slot::Empty;
                        }
                        waiter.set_err(format!("{err}"));
                        Err(err)
                    }
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbeddingConfig, EmbeddingMode};
    use std::path::PathBuf;
    use std::sync::Barrier;

    #[test]
    fn model_loads_once_across_sequential_calls() {
        let cache = ModelCache::new(EmbeddingConfig::stub());

        let first = cache.get_or_load().expect("first load");
        let second = cache.get_or_load().expect("second load");
        let third = cache.get_or_load().expect("third load");

        assert_eq!(cache.load_count(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &third));
    }

    #[test]
    fn model_loads_once_across_racing_threads() {
        let cache = Arc::new(ModelCache::new(EmbeddingConfig::stub()));

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let mut handles = Vec::new();
        for _ in 0..threads {
            let barrier = barrier.clone();
            let cache = cache.clone();
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                cache.get_or_load().expect("load should succeed")
            }));
        }

        let results: Vec<Arc<EmbeddingModel>> = handles
            .into_iter()
            .map(|h| h.join().expect("thread should join"))
            .collect();

        assert_eq!(cache.load_count(), 1);
        for model in &results[1..] {
            assert!(
                Arc::ptr_eq(&results[0], model),
                "all threads should get the same model instance"
            );
        }
    }

    #[test]
    fn failed_load_clears_slot_for_retry() {
        let cache = ModelCache::new(EmbeddingConfig {
            mode: EmbeddingMode::Stub,
            model_id: "no-such-model".to_string(),
            model_dir: PathBuf::from("models"),
        });

        assert!(cache.get_or_load().is_err());
        assert!(cache.get_or_load().is_err());
        // Each attempt runs the factory again instead of caching the failure.
        assert_eq!(cache.load_count(), 2);
    }
}
