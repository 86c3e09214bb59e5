use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;
use transq_core::JobId;

use crate::SchedulerError;
use crate::job::SharedJob;

/// FIFO of submitted jobs waiting for the dispatcher.
#[derive(Debug, Default)]
pub struct IntakeQueue {
    inner: Mutex<Inner>,
    available: Notify,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: VecDeque<SharedJob>,
    closed: bool,
}

impl IntakeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&self, job: SharedJob) -> Result<(), SchedulerError> {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(SchedulerError::SubmissionRejected);
            }
            inner.jobs.push_back(job);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Next job in submission order. `None` once the queue is closed.
    pub async fn pop(&self) -> Option<SharedJob> {
        loop {
            let notified = self.available.notified();
            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return None;
                }
                if let Some(job) = inner.jobs.pop_front() {
                    return Some(job);
                }
            }
            notified.await;
        }
    }

    pub fn remove(&self, id: JobId) -> Option<SharedJob> {
        let mut inner = self.inner.lock();
        let index = inner.jobs.iter().position(|job| job.id() == id)?;
        inner.jobs.remove(index)
    }

    pub fn drain(&self) -> Vec<SharedJob> {
        self.inner.lock().jobs.drain(..).collect()
    }

    /// Reject further submissions and hand back whatever was still queued.
    pub fn close(&self) -> Vec<SharedJob> {
        let drained = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.jobs.drain(..).collect()
        };
        self.available.notify_one();
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().jobs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().jobs.len()
    }
}
