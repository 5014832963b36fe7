//! Streaming extraction bridge
//!
//! Turns a push style extraction routine into a pull style iterator. The
//! routine runs on a dedicated worker thread and hands each completed item
//! to a [`Producer`]; the calling thread consumes the items through an
//! [`Extraction`] iterator. A bounded channel is the only shared state.
//!
//! The producer gives up when the queue stays full past the put timeout,
//! so a consumer that stops pulling cannot wedge the worker forever. The
//! routine's result is reported after all queued items are drained: `Ok`
//! ends the sequence, an error is yielded as the last item.
//!
//! Bridges nest: a routine producing dives can be consumed while each dive
//! spawns its own bridge for samples.

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::transport::DeviceError;

/// Queue and timeout parameters of a bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Maximum number of items waiting for the consumer
    pub capacity: usize,
    /// How long the producer waits for room in a full queue
    pub put_timeout: Duration,
    /// How long the consumer waits for an item before polling again
    pub poll_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            put_timeout: Duration::from_secs(30),
            poll_timeout: Duration::from_secs(1),
        }
    }
}

/// Producer side of a bridge, handed to the extraction routine
pub struct Producer<T> {
    tx: Sender<T>,
    put_timeout: Duration,
}

impl<T> Producer<T> {
    /// Enqueue a completed item, waiting at most the put timeout
    pub fn put(&self, item: T) -> Result<(), DeviceError> {
        match self.tx.send_timeout(item, self.put_timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                error!(
                    timeout_ms = self.put_timeout.as_millis() as u64,
                    "Extraction queue full, aborting"
                );
                Err(DeviceError::Stalled)
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                Err(DeviceError::Extraction("consumer went away".to_string()))
            }
        }
    }
}

/// Consumer side of a bridge
///
/// Dropping an unfinished extraction closes the queue and waits for the
/// worker to return.
pub struct Extraction<T> {
    rx: Option<Receiver<T>>,
    worker: Option<JoinHandle<Result<(), DeviceError>>>,
    poll_timeout: Duration,
    name: String,
}

impl<T: Send + 'static> Extraction<T> {
    /// Run an extraction routine on a new worker thread
    pub fn spawn<F>(name: &str, config: BridgeConfig, routine: F) -> Result<Self, DeviceError>
    where
        F: FnOnce(&Producer<T>) -> Result<(), DeviceError> + Send + 'static,
    {
        let (tx, rx) = bounded(config.capacity);
        let producer = Producer {
            tx,
            put_timeout: config.put_timeout,
        };

        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || routine(&producer))?;

        debug!(name = %name, capacity = config.capacity, "Extraction started");

        Ok(Self {
            rx: Some(rx),
            worker: Some(worker),
            poll_timeout: config.poll_timeout,
            name: name.to_string(),
        })
    }
}

impl<T> Extraction<T> {
    fn finish(&mut self) -> Option<Result<T, DeviceError>> {
        self.rx = None;
        let worker = self.worker.take()?;
        let status = worker
            .join()
            .unwrap_or_else(|_| Err(DeviceError::Extraction("worker panicked".to_string())));

        match status {
            Ok(()) => {
                debug!(name = %self.name, "Extraction finished");
                None
            }
            Err(e) => {
                error!(name = %self.name, error = %e, "Extraction failed");
                Some(Err(e))
            }
        }
    }
}

impl<T> Iterator for Extraction<T> {
    type Item = Result<T, DeviceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let rx = self.rx.as_ref()?;
            match rx.recv_timeout(self.poll_timeout) {
                Ok(item) => return Some(Ok(item)),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(name = %self.name, "No data from extraction yet, waiting");
                }
                // producer returned and the queue is drained
                Err(RecvTimeoutError::Disconnected) => return self.finish(),
            }
        }
    }
}

impl<T> Drop for Extraction<T> {
    fn drop(&mut self) {
        self.rx = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(name = %self.name, "Extraction worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn config(capacity: usize, put_ms: u64, poll_ms: u64) -> BridgeConfig {
        BridgeConfig {
            capacity,
            put_timeout: Duration::from_millis(put_ms),
            poll_timeout: Duration::from_millis(poll_ms),
        }
    }

    #[test]
    fn test_all_items_then_end() {
        let ex = Extraction::spawn("test", BridgeConfig::default(), |p| {
            for i in 0..20 {
                p.put(i)?;
            }
            Ok(())
        })
        .unwrap();

        let items: Vec<i32> = ex.map(|r| r.unwrap()).collect();
        assert_eq!(items, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_failure_after_drain() {
        let mut ex = Extraction::spawn("test", BridgeConfig::default(), |p| {
            p.put(1)?;
            p.put(2)?;
            Err(DeviceError::Extraction("rc=-7".to_string()))
        })
        .unwrap();

        assert_eq!(ex.next().unwrap().unwrap(), 1);
        assert_eq!(ex.next().unwrap().unwrap(), 2);
        assert!(matches!(ex.next(), Some(Err(DeviceError::Extraction(_)))));
        assert!(ex.next().is_none());
    }

    #[test]
    fn test_slow_producer_keeps_polling() {
        let ex = Extraction::spawn("test", config(5, 1000, 5), |p| {
            for i in 0..3 {
                sleep(Duration::from_millis(30));
                p.put(i)?;
            }
            Ok(())
        })
        .unwrap();

        let items: Vec<i32> = ex.map(|r| r.unwrap()).collect();
        assert_eq!(items, vec![0, 1, 2]);
    }

    #[test]
    fn test_stalled_consumer_reports_failure() {
        let mut ex = Extraction::spawn("test", config(1, 20, 1000), |p| {
            for i in 0..3 {
                p.put(i)?;
            }
            Ok(())
        })
        .unwrap();

        // let the producer time out on the full queue
        sleep(Duration::from_millis(300));

        assert_eq!(ex.next().unwrap().unwrap(), 0);
        assert!(matches!(ex.next(), Some(Err(DeviceError::Stalled))));
        assert!(ex.next().is_none());
    }

    #[test]
    fn test_nested_extraction() {
        let dives = Extraction::spawn("dives", BridgeConfig::default(), |p| {
            for n in 1..=3usize {
                p.put(n)?;
            }
            Ok(())
        })
        .unwrap();

        let mut totals = Vec::new();
        for n in dives {
            let n = n.unwrap();
            let samples = Extraction::spawn("samples", BridgeConfig::default(), move |p| {
                for s in 0..n * 10 {
                    p.put(s)?;
                }
                Ok(())
            })
            .unwrap();
            totals.push(samples.map(|s| s.unwrap()).count());
        }
        assert_eq!(totals, vec![10, 20, 30]);
    }

    #[test]
    fn test_drop_unblocks_producer() {
        let mut ex = Extraction::spawn("test", config(1, 60_000, 1000), |p| {
            for i in 0..100 {
                p.put(i)?;
            }
            Ok(())
        })
        .unwrap();

        assert_eq!(ex.next().unwrap().unwrap(), 0);
        // must return without waiting for the put timeout
        drop(ex);
    }
}
