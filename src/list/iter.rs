use std::thread;

use crossbeam_channel::{select, Receiver, Sender};

use crate::{cancel::CancelToken, encoding::Codec, error::ListError, fs::SpillDir};

use super::SpillList;

/// Receives the entries that iteration had to skip.
pub trait FailureSink: Send + Sync {
    fn record(&self, index: usize, error: &ListError);
}

/// Logs skipped entries through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl FailureSink for TracingSink {
    fn record(&self, index: usize, error: &ListError) {
        tracing::error!(index, %error, "failed to load list entry, skipping it");
    }
}

/// A single pass over a [`SpillList`] in logical order, fed by a producer
/// thread.
///
/// The producer hands items over one at a time and waits for each to be
/// taken before loading the next. Entries that fail to load are reported to
/// the list's [`FailureSink`] and skipped. The walk ends at the list's
/// length as observed when each index is reached, so items added during
/// iteration may be yielded too.
pub struct Iter<T> {
    rx: Receiver<T>,
    cancel: CancelToken,
}

impl<T> Iterator for Iter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.cancel.is_cancelled() {
            return None;
        }
        select! {
            recv(self.rx) -> item => item.ok(),
            recv(self.cancel.done()) -> _ => None,
        }
    }
}

impl<T, D, C> SpillList<T, D, C>
where
    T: Clone + Send + Sync + 'static,
    D: SpillDir,
    C: Codec<T> + 'static,
{
    /// Starts iterating over the list. Cancelling `cancel` ends the iteration
    /// without an error; so does dropping the returned iterator.
    pub fn iter(&self, cancel: &CancelToken) -> Iter<T> {
        let (tx, rx) = crossbeam_channel::bounded(0);
        let list = self.clone();
        let producer_cancel = cancel.clone();
        thread::spawn(move || list.produce(tx, producer_cancel));
        Iter {
            rx,
            cancel: cancel.clone(),
        }
    }

    fn produce(&self, tx: Sender<T>, cancel: CancelToken) {
        let mut index = 0;
        loop {
            if cancel.is_cancelled() || index >= self.len() {
                return;
            }

            match self.get(index) {
                Ok(item) => {
                    select! {
                        send(tx, item) -> res => {
                            if res.is_err() {
                                // The consumer went away.
                                return;
                            }
                        }
                        recv(cancel.done()) -> _ => return,
                    }
                }
                Err(e) => self.shared.sink.record(index, &e),
            }

            index += 1;
        }
    }
}
