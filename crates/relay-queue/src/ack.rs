use std::fmt;
use std::sync::Arc;

/// Where an acknowledgement reports back to. Implemented by queue partitions.
pub trait AckTarget: Send + Sync {
    /// The unit at `offset` is done and must not be delivered again.
    fn commit(&self, offset: u64);

    /// The unit at `offset` was abandoned and should be delivered again.
    fn release(&self, offset: u64);
}

/// Single-use commit capability for one consumed unit.
///
/// `commit` consumes the handle, so a unit cannot be committed twice. Dropping
/// the handle without committing releases the unit for redelivery.
#[must_use = "dropping an acknowledgement without committing redelivers the unit"]
pub struct Acknowledgement {
    target: Option<Arc<dyn AckTarget>>,
    offset: u64,
}

impl Acknowledgement {
    pub fn new(target: Arc<dyn AckTarget>, offset: u64) -> Self {
        Self {
            target: Some(target),
            offset,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn commit(mut self) {
        if let Some(target) = self.target.take() {
            target.commit(self.offset);
        }
    }
}

impl Drop for Acknowledgement {
    fn drop(&mut self) {
        if let Some(target) = self.target.take() {
            tracing::debug!(offset = self.offset, "acknowledgement dropped uncommitted, releasing");
            target.release(self.offset);
        }
    }
}

impl fmt::Debug for Acknowledgement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acknowledgement")
            .field("offset", &self.offset)
            .field("pending", &self.target.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        committed: Mutex<Vec<u64>>,
        released: Mutex<Vec<u64>>,
    }

    impl AckTarget for Recorder {
        fn commit(&self, offset: u64) {
            self.committed.lock().push(offset);
        }
        fn release(&self, offset: u64) {
            self.released.lock().push(offset);
        }
    }

    #[test]
    fn commit_reports_once_and_never_releases() {
        let recorder = Arc::new(Recorder::default());
        let ack = Acknowledgement::new(recorder.clone(), 7);
        assert_eq!(ack.offset(), 7);
        ack.commit();
        assert_eq!(*recorder.committed.lock(), vec![7]);
        assert!(recorder.released.lock().is_empty());
    }

    #[test]
    fn drop_without_commit_releases() {
        let recorder = Arc::new(Recorder::default());
        {
            let _ack = Acknowledgement::new(recorder.clone(), 3);
        }
        assert!(recorder.committed.lock().is_empty());
        assert_eq!(*recorder.released.lock(), vec![3]);
    }
}
