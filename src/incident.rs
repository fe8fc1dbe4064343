//! Durable recording of rule violations off the scanning path.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;

/// One violation handed to an incident sink.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Incident {
    /// Archive the violation came from.
    pub origin: String,
    /// Module the violation is attributed to, when known.
    pub attributed_owner: Option<String>,
    pub detail: String,
    pub context: String,
}

/// Receives incidents. Delivery is attempted at least once; callers never
/// wait for confirmation.
pub trait IncidentSink: Send + Sync {
    fn record(&self, incident: Incident);
}

/// Append-only incident log shared between writers.
#[derive(Clone)]
pub struct IncidentLog {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl IncidentLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open incident log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line. The lock spans the whole write so lines never interleave.
    pub fn append(&self, incident: &Incident) -> Result<()> {
        let line = format!(
            "{} origin={} owner={} context={} detail={}\n",
            Utc::now().to_rfc3339(),
            incident.origin,
            incident.attributed_owner.as_deref().unwrap_or("-"),
            incident.context,
            incident.detail
        );
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        file.flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))
    }
}

/// Single background worker that drains incidents into an [`IncidentLog`]
/// in FIFO order.
pub struct IncidentRecorder {
    sender: Mutex<Option<Sender<Incident>>>,
    handle: Mutex<Option<JoinHandle<usize>>>,
}

impl IncidentRecorder {
    pub fn spawn(log: IncidentLog) -> Self {
        let (sender, receiver) = mpsc::channel::<Incident>();
        let handle = thread::spawn(move || Self::worker(log, receiver));
        Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Closes the queue and waits for queued incidents to be written.
    /// Returns how many were written.
    pub fn finish(&self) -> usize {
        drop(self.sender.lock().take());
        match self.handle.lock().take() {
            Some(handle) => handle.join().unwrap_or(0),
            None => 0,
        }
    }

    fn worker(log: IncidentLog, receiver: Receiver<Incident>) -> usize {
        let mut written = 0;
        for incident in receiver {
            match log.append(&incident) {
                Ok(()) => written += 1,
                Err(err) => tracing::warn!(error = %err, "failed to record incident"),
            }
        }
        written
    }
}

impl IncidentSink for IncidentRecorder {
    fn record(&self, incident: Incident) {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => {
                if sender.send(incident).is_err() {
                    tracing::warn!("incident worker is gone; incident dropped");
                }
            }
            None => tracing::warn!("incident recorder finished; incident dropped"),
        }
    }
}

impl Drop for IncidentRecorder {
    fn drop(&mut self) {
        self.finish();
    }
}
