//! Bounded pool of network-handle working copies.
//!
//! Forking a handle is the expensive operation, so it happens exactly once
//! per slot when the pool is built. Leaf evaluations lease a handle, mutate
//! it freely, and the lease guard resets it back to the pristine variant on
//! release. When all handles are leased, [`NetworkPool::lease`] blocks until
//! one is returned, which is what bounds the search tree's parallelism.

use crate::sensitivity::NetworkHandle;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex};

pub struct NetworkPool {
    handles: Mutex<Vec<Box<dyn NetworkHandle>>>,
    returned: Condvar,
    size: usize,
}

impl NetworkPool {
    /// Forks `size` independent working copies of `base`.
    pub fn new(base: &dyn NetworkHandle, size: usize) -> Self {
        let size = size.max(1);
        let handles = (0..size).map(|_| base.fork()).collect();
        NetworkPool {
            handles: Mutex::new(handles),
            returned: Condvar::new(),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Blocks until a handle is free, then leases it. The handle is reset to
    /// the pristine variant when the guard drops.
    pub fn lease(&self) -> PooledHandle<'_> {
        let mut handles = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            if let Some(handle) = handles.pop() {
                return PooledHandle {
                    pool: self,
                    handle: Some(handle),
                };
            }
            handles = self
                .returned
                .wait(handles)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

/// RAII lease over one pooled handle.
pub struct PooledHandle<'a> {
    pool: &'a NetworkPool,
    handle: Option<Box<dyn NetworkHandle>>,
}

impl Deref for PooledHandle<'_> {
    type Target = dyn NetworkHandle;

    fn deref(&self) -> &Self::Target {
        self.handle.as_deref().expect("handle present until drop")
    }
}

impl DerefMut for PooledHandle<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.handle.as_deref_mut().expect("handle present until drop")
    }
}

impl Drop for PooledHandle<'_> {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.reset();
            let mut handles = self
                .pool
                .handles
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            handles.push(handle);
            self.pool.returned.notify_one();
        }
    }
}
