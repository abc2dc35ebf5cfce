use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;

type Loader<M> = Box<dyn Fn() -> Result<Arc<M>> + Send + Sync>;

/// Lazily loaded, explicitly releasable handle to a heavyweight model.
///
/// The first [`checkout`](ModelSlot::checkout) runs the loader; later
/// checkouts share the same instance. [`release`](ModelSlot::release) drops
/// the slot's reference so the next checkout reloads. Leases already handed
/// out stay valid until their holders drop them.
pub struct ModelSlot<M: ?Sized> {
    name: &'static str,
    loader: Loader<M>,
    loaded: Mutex<Option<Arc<M>>>,
}

impl<M: ?Sized> ModelSlot<M> {
    pub fn new<F>(name: &'static str, loader: F) -> Self
    where
        F: Fn() -> Result<Arc<M>> + Send + Sync + 'static,
    {
        Self {
            name,
            loader: Box::new(loader),
            loaded: Mutex::new(None),
        }
    }

    /// A slot around an instance that is already resident.
    pub fn preloaded(name: &'static str, model: Arc<M>) -> Self
    where
        M: Send + Sync + 'static,
    {
        let reload = model.clone();
        Self {
            name,
            loader: Box::new(move || Ok(reload.clone())),
            loaded: Mutex::new(Some(model)),
        }
    }

    pub fn checkout(&self) -> Result<Arc<M>> {
        let mut loaded = self.loaded.lock();
        if let Some(model) = loaded.as_ref() {
            return Ok(model.clone());
        }
        tracing::info!("Loading {} model", self.name);
        let model = (self.loader)()?;
        *loaded = Some(model.clone());
        Ok(model)
    }

    /// Drop the resident instance. Returns whether one was loaded.
    pub fn release(&self) -> bool {
        let released = self.loaded.lock().take().is_some();
        if released {
            tracing::info!("Released {} model", self.name);
        }
        released
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.lock().is_some()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Model: Send + Sync {
        fn id(&self) -> usize;
    }

    struct Loaded(usize);

    impl Model for Loaded {
        fn id(&self) -> usize {
            self.0
        }
    }

    fn counting_slot(loads: Arc<AtomicUsize>) -> ModelSlot<dyn Model> {
        ModelSlot::new("test", move || {
            let n = loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Loaded(n)) as Arc<dyn Model>)
        })
    }

    #[test]
    fn test_loads_lazily_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let slot = counting_slot(loads.clone());
        assert!(!slot.is_loaded());
        assert_eq!(loads.load(Ordering::SeqCst), 0);

        let a = slot.checkout().unwrap();
        let b = slot.checkout().unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(slot.is_loaded());
    }

    #[test]
    fn test_release_is_idempotent_and_leases_survive() {
        let loads = Arc::new(AtomicUsize::new(0));
        let slot = counting_slot(loads.clone());
        let lease = slot.checkout().unwrap();

        assert!(slot.release());
        assert!(!slot.release());
        assert!(!slot.is_loaded());
        assert_eq!(lease.id(), 0);

        let again = slot.checkout().unwrap();
        assert_eq!(again.id(), 1);
    }

    #[test]
    fn test_failed_load_leaves_slot_empty() {
        let slot: ModelSlot<dyn Model> = ModelSlot::new("broken", || anyhow::bail!("no device"));
        assert!(slot.checkout().is_err());
        assert!(!slot.is_loaded());
    }

    #[test]
    fn test_preloaded_slot() {
        let slot: ModelSlot<dyn Model> = ModelSlot::preloaded("warm", Arc::new(Loaded(9)) as Arc<dyn Model>);
        assert!(slot.is_loaded());
        assert_eq!(slot.checkout().unwrap().id(), 9);
        slot.release();
        assert_eq!(slot.checkout().unwrap().id(), 9);
    }
}
