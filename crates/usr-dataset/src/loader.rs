use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};

use crate::dataset::{DatasetError, SrSample, TestDataset};

/// Yields the samples of a dataset one at a time, in order.
///
/// With `num_workers == 0` samples are loaded on demand. Otherwise a background
/// task keeps up to `2 * num_workers` samples decoded ahead of the consumer.
pub struct SampleLoader {
    len: usize,
    mode: Mode,
}

enum Mode {
    Inline {
        dataset: Arc<TestDataset>,
        next: usize,
    },
    Prefetch {
        receiver: mpsc::Receiver<Result<SrSample, DatasetError>>,
        handle: JoinHandle<()>,
    },
}

impl SampleLoader {
    pub fn new(dataset: Arc<TestDataset>, num_workers: usize) -> Self {
        let len = dataset.len();
        if num_workers == 0 {
            return Self {
                len,
                mode: Mode::Inline { dataset, next: 0 },
            };
        }

        let (sender, receiver) = mpsc::channel(2 * num_workers);
        let handle = tokio::spawn(async move {
            for idx in 0..dataset.len() {
                let sample = dataset.get(idx).await;
                let failed = sample.is_err();
                if sender.send(sample).await.is_err() || failed {
                    break;
                }
            }
        });
        Self {
            len,
            mode: Mode::Prefetch { receiver, handle },
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The next sample, or `None` once the dataset is exhausted or a load failed.
    pub async fn next(&mut self) -> Option<Result<SrSample, DatasetError>> {
        match &mut self.mode {
            Mode::Inline { dataset, next } => {
                if *next >= dataset.len() {
                    return None;
                }
                let idx = *next;
                *next += 1;
                Some(dataset.get(idx).await)
            }
            Mode::Prefetch { receiver, .. } => receiver.recv().await,
        }
    }
}

impl Drop for SampleLoader {
    fn drop(&mut self) {
        if let Mode::Prefetch { handle, .. } = &self.mode {
            handle.abort();
        }
    }
}
