//! The command dispatcher.
//!
//! All mutation, commit and reset requests funnel through one FIFO
//! channel consumed by a single worker thread that owns the backend.
//! Producers never touch backend state, so tree construction is never
//! contended and needs no per-operation locking.
//!
//! Enqueueing is non-blocking; [`Dispatcher::drain`] is the only barrier.
//! It returns once every operation enqueued before the call has been
//! applied, surfacing the first backend error recorded since the last
//! drain.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::error;

use crate::backend::Backend;
use crate::error::{StoreError, StoreResult};
use crate::types::TreePath;

enum Command {
    Write { path: TreePath, content: String },
    Remove { path: TreePath },
    Rename { old: TreePath, new: TreePath },
    Commit,
    Reset,
    /// flush barrier: acknowledged once everything before it has run
    Drain(Sender<()>),
}

pub struct Dispatcher {
    sender: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
    failure: Arc<Mutex<Option<StoreError>>>,
}

impl Dispatcher {
    /// Start the worker thread that owns `backend` and consume commands
    /// strictly in enqueue order.
    pub fn spawn(backend: Box<dyn Backend>) -> StoreResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let failure = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&failure);

        let worker = thread::Builder::new()
            .name("gitrows-dispatch".to_string())
            .spawn(move || run_worker(backend, receiver, slot))?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            failure,
        })
    }

    fn send(&self, command: Command) -> StoreResult<()> {
        self.sender
            .as_ref()
            .ok_or(StoreError::WorkerGone)?
            .send(command)
            .map_err(|_| StoreError::WorkerGone)
    }

    pub fn write(&self, path: TreePath, content: String) -> StoreResult<()> {
        self.send(Command::Write { path, content })
    }

    pub fn remove(&self, path: TreePath) -> StoreResult<()> {
        self.send(Command::Remove { path })
    }

    pub fn rename(&self, old: TreePath, new: TreePath) -> StoreResult<()> {
        self.send(Command::Rename { old, new })
    }

    pub fn commit(&self) -> StoreResult<()> {
        self.send(Command::Commit)
    }

    pub fn reset(&self) -> StoreResult<()> {
        self.send(Command::Reset)
    }

    /// Block until every operation enqueued before this call has been
    /// applied. Reports the first backend error recorded since the
    /// previous drain.
    pub fn drain(&self) -> StoreResult<()> {
        let (ack_sender, ack_receiver) = mpsc::channel();
        self.send(Command::Drain(ack_sender))?;
        ack_receiver.recv().map_err(|_| StoreError::WorkerGone)?;

        match self.failure.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Drain the queue and shut the worker down.
    pub fn close(mut self) -> StoreResult<()> {
        let result = self.drain();
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        result
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(
    mut backend: Box<dyn Backend>,
    receiver: Receiver<Command>,
    failure: Arc<Mutex<Option<StoreError>>>,
) {
    while let Ok(command) = receiver.recv() {
        let result = match command {
            Command::Write { path, content } => backend.write(&path, &content),
            Command::Remove { path } => backend.remove(&path),
            Command::Rename { old, new } => backend.rename(&old, &new),
            Command::Commit => backend.commit().map(|_| ()),
            Command::Reset => backend.reset(),
            Command::Drain(ack) => {
                let _ = ack.send(());
                continue;
            }
        };

        if let Err(err) = result {
            error!(%err, "backend operation failed");
            let mut slot = failure.lock();
            // keep the first error; later ones are usually fallout
            if slot.is_none() {
                *slot = Some(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CommitId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// records the order operations arrive in
    struct ProbeBackend {
        log: Arc<Mutex<Vec<String>>>,
        fail_on_commit: bool,
        applied: Arc<AtomicUsize>,
    }

    impl Backend for ProbeBackend {
        fn write(&mut self, path: &TreePath, _content: &str) -> StoreResult<()> {
            self.log.lock().push(format!("write {}", path));
            self.applied.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn remove(&mut self, path: &TreePath) -> StoreResult<()> {
            self.log.lock().push(format!("remove {}", path));
            self.applied.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn rename(&mut self, old: &TreePath, new: &TreePath) -> StoreResult<()> {
            self.log.lock().push(format!("rename {} {}", old, new));
            self.applied.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn commit(&mut self) -> StoreResult<Option<CommitId>> {
            self.log.lock().push("commit".to_string());
            self.applied.fetch_add(1, Ordering::SeqCst);
            if self.fail_on_commit {
                return Err(StoreError::UnsupportedOperation("boom".to_string()));
            }
            Ok(None)
        }

        fn reset(&mut self) -> StoreResult<()> {
            self.log.lock().push("reset".to_string());
            self.applied.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn probe(fail_on_commit: bool) -> (Arc<Mutex<Vec<String>>>, Arc<AtomicUsize>, Dispatcher) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let applied = Arc::new(AtomicUsize::new(0));
        let backend = ProbeBackend {
            log: Arc::clone(&log),
            fail_on_commit,
            applied: Arc::clone(&applied),
        };
        let dispatcher = Dispatcher::spawn(Box::new(backend)).unwrap();
        (log, applied, dispatcher)
    }

    fn path(s: &str) -> TreePath {
        TreePath::parse(s).unwrap()
    }

    #[test]
    fn test_operations_apply_in_enqueue_order() {
        let (log, _, dispatcher) = probe(false);

        dispatcher.write(path("t/1.txt"), "a".to_string()).unwrap();
        dispatcher.write(path("t/2.txt"), "b".to_string()).unwrap();
        dispatcher.rename(path("t/2.txt"), path("t/3.txt")).unwrap();
        dispatcher.commit().unwrap();
        dispatcher.drain().unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                "write t/1.txt",
                "write t/2.txt",
                "rename t/2.txt t/3.txt",
                "commit",
            ]
        );
    }

    #[test]
    fn test_drain_waits_for_everything_enqueued_before_it() {
        let (_, applied, dispatcher) = probe(false);

        for i in 0..100 {
            dispatcher
                .write(path(&format!("t/{}.txt", i)), "x".to_string())
                .unwrap();
        }
        dispatcher.drain().unwrap();

        assert_eq!(applied.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_drain_surfaces_first_error_once() {
        let (_, _, dispatcher) = probe(true);

        dispatcher.write(path("t/1.txt"), "x".to_string()).unwrap();
        dispatcher.commit().unwrap();

        let err = dispatcher.drain().unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedOperation(_)));

        // error was taken; a clean drain follows
        dispatcher.drain().unwrap();
    }

    #[test]
    fn test_worker_keeps_consuming_after_error() {
        let (log, _, dispatcher) = probe(true);

        dispatcher.commit().unwrap(); // fails in the backend
        dispatcher.write(path("t/1.txt"), "x".to_string()).unwrap();
        let _ = dispatcher.drain();

        assert_eq!(*log.lock(), vec!["commit", "write t/1.txt"]);
    }

    #[test]
    fn test_concurrent_producers() {
        let (_, applied, dispatcher) = probe(false);
        let dispatcher = Arc::new(dispatcher);

        let mut handles = Vec::new();
        for t in 0..4 {
            let d = Arc::clone(&dispatcher);
            handles.push(thread::spawn(move || {
                for i in 0..25 {
                    d.write(path(&format!("t/{}-{}.txt", t, i)), "x".to_string())
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        dispatcher.drain().unwrap();
        assert_eq!(applied.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_close_drains() {
        let (_, applied, dispatcher) = probe(false);
        dispatcher.write(path("t/1.txt"), "x".to_string()).unwrap();
        dispatcher.close().unwrap();
        assert_eq!(applied.load(Ordering::SeqCst), 1);
    }
}
