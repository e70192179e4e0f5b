//! Single-writer publication of samples.
//!
//! A device keeps its sample as a plain owned value and mutates it freely
//! during `update`; when the update is done it publishes an immutable copy.
//! Renderers and metric closures only ever see whole, finished snapshots.

use std::sync::Arc;

use tokio::sync::watch;

pub type SampleReader<T> = watch::Receiver<Arc<T>>;

#[derive(Debug)]
pub struct Publisher<T> {
    tx: watch::Sender<Arc<T>>,
}

impl<T: Clone> Publisher<T> {
    pub fn new(initial: &T) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial.clone()));
        Self { tx }
    }

    pub fn publish(&self, value: &T) {
        // send_replace stores the value even when nobody is subscribed yet.
        self.tx.send_replace(Arc::new(value.clone()));
    }

    pub fn subscribe(&self) -> SampleReader<T> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> Arc<T> {
        self.tx.borrow().clone()
    }
}

/// Owned sample plus the channel its snapshots go out on.
#[derive(Debug)]
pub struct Published<T> {
    pub value: T,
    publisher: Publisher<T>,
}

impl<T: Clone> Published<T> {
    pub fn new(value: T) -> Self {
        let publisher = Publisher::new(&value);
        Self { value, publisher }
    }

    pub fn publish(&self) {
        self.publisher.publish(&self.value);
    }

    pub fn subscribe(&self) -> SampleReader<T> {
        self.publisher.subscribe()
    }
}
