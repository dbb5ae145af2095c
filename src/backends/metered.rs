//! A decorator that answers throughput estimates from observed traffic.
//!
//! Wraps any backend without dynamic dispatch, times every commit and
//! retrieve, and reports the running bytes-per-second figure; until traffic
//! has been observed the wrapped backend's own estimate is used.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::backend::{Backend, BackendConfig};
use crate::error::Result;
use crate::fragment::Fragment;

pub struct MeteredBackend<B> {
    inner: B,
    bytes: AtomicU64,
    nanos: AtomicU64,
}

impl<B> MeteredBackend<B> {
    pub fn new(inner: B) -> MeteredBackend<B> {
        MeteredBackend {
            inner,
            bytes: AtomicU64::new(0),
            nanos: AtomicU64::new(0),
        }
    }

    pub fn into_inner(self) -> B {
        self.inner
    }

    fn record(&self, bytes: usize, started: Instant) {
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        // Clamp to at least one nanosecond so a coarse clock cannot leave the
        // estimate undefined after real traffic.
        let elapsed = (started.elapsed().as_nanos() as u64).max(1);
        self.nanos.fetch_add(elapsed, Ordering::Relaxed);
    }
}

impl<B: Backend> Backend for MeteredBackend<B> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn config(&self) -> &BackendConfig {
        self.inner.config()
    }

    fn commit(&self, fragment: &mut Fragment) -> Result<()> {
        let started = Instant::now();
        let bytes = fragment.space().byte_size();
        self.inner.commit(fragment)?;
        self.record(bytes, started);
        Ok(())
    }

    fn retrieve(&self, fragment: &mut Fragment) -> Result<()> {
        let started = Instant::now();
        let bytes = fragment.space().byte_size();
        self.inner.retrieve(fragment)?;
        self.record(bytes, started);
        Ok(())
    }

    fn estimate_throughput(&self) -> f32 {
        let nanos = self.nanos.load(Ordering::Relaxed);
        if nanos == 0 {
            return self.inner.estimate_throughput();
        }
        let bytes = self.bytes.load(Ordering::Relaxed);
        (bytes as f64 / (nanos as f64 / 1e9)) as f32
    }

    fn mkfs(&self, enforce: bool) -> Result<()> {
        self.inner.mkfs(enforce)
    }
}
