//! Per-backend worker pools and the per-request completion latch.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::backend::Backend;
use crate::error::{NdStoreError, Result};
use crate::fragment::{Fragment, FragmentStatus};

#[derive(Debug, Clone, Copy)]
pub(crate) enum IoOp {
    Read,
    Write,
}

impl IoOp {
    fn as_str(self) -> &'static str {
        match self {
            IoOp::Read => "retrieve",
            IoOp::Write => "commit",
        }
    }
}

pub(crate) type TaskCallback = Box<dyn FnOnce(&mut Fragment) -> Result<()> + Send>;

/// One unit of backend work: a fragment, the request it belongs to, and an
/// optional completion callback (gather copy, catalogue registration).
pub(crate) struct IoTask {
    pub op: IoOp,
    pub fragment: Fragment,
    pub status: Arc<RequestStatus>,
    pub callback: Option<TaskCallback>,
}

struct StatusState {
    pending: u32,
    first_error: Option<NdStoreError>,
}

/// Request-wide completion latch shared between the caller and the workers.
///
/// Enqueuing code must add to `pending` *before* submitting the task so the
/// increment happens-before `wait()` can observe a spurious zero.
pub(crate) struct RequestStatus {
    state: Mutex<StatusState>,
    done: Condvar,
}

impl RequestStatus {
    pub fn new() -> Arc<RequestStatus> {
        Arc::new(RequestStatus {
            state: Mutex::new(StatusState {
                pending: 0,
                first_error: None,
            }),
            done: Condvar::new(),
        })
    }

    pub fn add_pending(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.pending += 1;
    }

    /// Worker-side completion: decrement, latch the first error, signal at
    /// zero.
    pub fn complete(&self, result: Result<()>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        debug_assert!(state.pending > 0);
        state.pending = state.pending.saturating_sub(1);
        if let Err(e) = result
            && state.first_error.is_none()
        {
            state.first_error = Some(e);
        }
        if state.pending == 0 {
            self.done.notify_all();
        }
    }

    /// Block until every pending task has completed, then surface the first
    /// latched error if any.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while state.pending > 0 {
            state = self
                .done
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        match state.first_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// A bounded pool of worker threads bound to one backend. A thread count of
/// zero means no pool at all: tasks run inline on the submitting thread.
pub(crate) struct WorkerPool {
    tx: Option<crossbeam_channel::Sender<IoTask>>,
    workers: Vec<JoinHandle<()>>,
    backend: Arc<dyn Backend>,
}

impl WorkerPool {
    pub fn new(backend: Arc<dyn Backend>, threads: usize) -> Result<WorkerPool> {
        if threads == 0 {
            return Ok(WorkerPool {
                tx: None,
                workers: Vec::new(),
                backend,
            });
        }
        let (tx, rx) = crossbeam_channel::unbounded::<IoTask>();
        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let rx = rx.clone();
            let backend = Arc::clone(&backend);
            let handle = std::thread::Builder::new()
                .name(format!("{}-io-{i}", backend.name()))
                .spawn(move || {
                    while let Ok(task) = rx.recv() {
                        run_task(&*backend, task);
                    }
                })?;
            workers.push(handle);
        }
        Ok(WorkerPool {
            tx: Some(tx),
            workers,
            backend,
        })
    }

    pub fn submit(&self, task: IoTask) {
        match &self.tx {
            None => run_task(&*self.backend, task),
            Some(tx) => {
                if let Err(send_error) = tx.send(task) {
                    // Channel closed mid-shutdown; run inline rather than
                    // losing the pending count.
                    run_task(&*self.backend, send_error.into_inner());
                }
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn run_task(backend: &dyn Backend, mut task: IoTask) {
    let mut result = match task.op {
        IoOp::Read => backend.retrieve(&mut task.fragment),
        IoOp::Write => backend.commit(&mut task.fragment),
    };
    if result.is_ok()
        && let Some(callback) = task.callback.take()
    {
        result = callback(&mut task.fragment);
    }
    let result = result.map_err(|e| {
        log::warn!("backend '{}' {} failed: {e}", backend.name(), task.op.as_str());
        NdStoreError::Backend {
            backend: backend.name().to_string(),
            op: task.op.as_str(),
            source: Box::new(e),
        }
    });
    task.fragment.release_buf();
    task.fragment.set_status(FragmentStatus::NotLoaded);
    task.status.complete(result);
}
