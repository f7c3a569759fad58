use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::stream::config::StreamConfig;
use crate::stream::worker::{Collaborators, WorkerHandle, WorkerSettings, WorkerState};

/// Status snapshot for one tracked camera.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StreamStatus {
    pub camera_id: String,
    /// True iff the worker's control loop is alive.
    pub running: bool,
    pub state: WorkerState,
    /// Consecutive failed open attempts since the last successful connection.
    pub reconnect_attempts: u32,
    pub frames_read: u64,
    pub notifications_sent: u64,
}

/// Tracks one worker per camera id.
///
/// Construct one per service and share it by `Arc`. The map is the only state
/// shared between workers; its lock is never held across blocking I/O.
///
/// A worker that gives up after exhausting reconnects stays registered as not
/// running, so callers can inspect it. `start_stream` replaces it and
/// `stop_stream` removes it.
pub struct StreamRegistry {
    workers: Mutex<BTreeMap<String, Arc<WorkerHandle>>>,
    collaborators: Collaborators,
    settings: WorkerSettings,
}

impl StreamRegistry {
    pub fn new(collaborators: Collaborators, settings: WorkerSettings) -> Self {
        Self {
            workers: Mutex::new(BTreeMap::new()),
            collaborators,
            settings,
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Launch a worker for `config.camera_id` unless one is already running.
    ///
    /// Returns `Ok(false)` for a duplicate start. Errors only for an invalid
    /// config or when the worker thread cannot be spawned.
    pub fn start_stream(&self, config: StreamConfig) -> Result<bool> {
        config.validate()?;

        let camera_id = config.camera_id.clone();
        let replaced = {
            let mut workers = self.lock_workers();
            if let Some(existing) = workers.get(&camera_id) {
                if existing.is_running() {
                    log::info!("camera {}: stream already running, start ignored", camera_id);
                    return Ok(false);
                }
            }
            let handle =
                WorkerHandle::spawn(config, self.collaborators.clone(), self.settings.clone())?;
            workers.insert(camera_id.clone(), Arc::new(handle))
        };

        // A replaced worker has already stopped; join it outside the lock.
        if let Some(previous) = replaced {
            previous.reap();
        }
        log::info!("camera {}: stream started", camera_id);
        Ok(true)
    }

    /// Stop and forget the worker for `camera_id`.
    ///
    /// Returns false when no worker is tracked. Otherwise waits up to the stop
    /// timeout and returns true even if the worker did not acknowledge in time.
    pub fn stop_stream(&self, camera_id: &str) -> bool {
        let Some(handle) = self.lock_workers().get(camera_id).cloned() else {
            return false;
        };

        handle.request_stop();
        self.await_stopped(&handle);
        self.forget(camera_id, &handle);
        log::info!("camera {}: stream stopped", camera_id);
        true
    }

    /// Stop every tracked worker. Stop requests go out to all workers before
    /// waiting on any of them.
    pub fn stop_all(&self) {
        let handles: Vec<(String, Arc<WorkerHandle>)> = self
            .lock_workers()
            .iter()
            .map(|(camera_id, handle)| (camera_id.clone(), handle.clone()))
            .collect();
        if handles.is_empty() {
            return;
        }

        log::info!("stopping {} stream workers", handles.len());
        for (_, handle) in &handles {
            handle.request_stop();
        }
        for (camera_id, handle) in &handles {
            self.await_stopped(handle);
            self.forget(camera_id, handle);
        }
    }

    /// Snapshot of every tracked camera, ordered by camera id.
    pub fn status(&self) -> Vec<StreamStatus> {
        self.lock_workers()
            .values()
            .map(|handle| handle.status())
            .collect()
    }

    pub fn is_running(&self, camera_id: &str) -> bool {
        self.lock_workers()
            .get(camera_id)
            .map_or(false, |handle| handle.is_running())
    }

    /// Config the tracked worker for `camera_id` was started with.
    pub fn config(&self, camera_id: &str) -> Option<StreamConfig> {
        self.lock_workers()
            .get(camera_id)
            .map(|handle| handle.config().clone())
    }

    pub fn len(&self) -> usize {
        self.lock_workers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_workers().is_empty()
    }

    fn await_stopped(&self, handle: &WorkerHandle) {
        let camera_id = &handle.config().camera_id;
        if handle.wait_stopped(self.settings.stop_timeout) {
            handle.reap();
        } else {
            log::warn!(
                "camera {}: worker did not stop within {:?}; its capture resources may leak",
                camera_id,
                self.settings.stop_timeout
            );
        }
    }

    /// Remove `handle` unless the slot was already taken over by a newer worker.
    fn forget(&self, camera_id: &str, handle: &Arc<WorkerHandle>) {
        let mut workers = self.lock_workers();
        if workers
            .get(camera_id)
            .map_or(false, |current| Arc::ptr_eq(current, handle))
        {
            workers.remove(camera_id);
        }
    }

    fn lock_workers(&self) -> MutexGuard<'_, BTreeMap<String, Arc<WorkerHandle>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
