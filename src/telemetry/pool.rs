use parking_lot::Mutex;

/// Default number of idle instances kept around for reuse.
pub const DEFAULT_POOL_CAPACITY: usize = 256;

/// Recycles values so the request path doesn't allocate a fresh record
/// (and fresh `String` buffers) on every call.
///
/// Values come back with whatever the previous owner left in them. Callers
/// must overwrite every field before use.
///
/// Neither side ever waits: if the free list is locked by another thread,
/// `acquire` hands out a new `T::default()` and `release` drops the value.
pub struct Pool<T> {
    free: Mutex<Vec<T>>,
    capacity: usize,
}

impl<T: Default> Pool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn acquire(&self) -> T {
        self.free
            .try_lock()
            .and_then(|mut free| free.pop())
            .unwrap_or_default()
    }

    pub fn release(&self, value: T) {
        if let Some(mut free) = self.free.try_lock() {
            if free.len() < self.capacity {
                free.push(value);
            }
        }
    }

    /// Idle instances currently held.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

impl<T: Default> Default for Pool<T> {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}
