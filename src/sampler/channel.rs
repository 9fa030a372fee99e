//! Channel-backed sample source.
//!
//! The sampling driver pushes readings into a bounded channel; the detector
//! drains whatever is pending on each tick.

use crate::sampler::SampleSource;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// Sample source fed through a crossbeam channel.
pub struct ChannelSource {
    receiver: Receiver<u16>,
}

impl ChannelSource {
    /// Create a source with the given channel capacity, returning the
    /// sender for the sampling driver.
    pub fn bounded(capacity: usize) -> (SampleSender, Self) {
        let (sender, receiver) = bounded(capacity);
        (SampleSender { sender }, Self { receiver })
    }

    /// Number of samples waiting to be read.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

impl SampleSource for ChannelSource {
    fn get_samples(&mut self, buf: &mut [u16]) -> usize {
        let mut count = 0;
        for slot in buf.iter_mut() {
            match self.receiver.try_recv() {
                Ok(sample) => {
                    *slot = sample;
                    count += 1;
                }
                Err(_) => break,
            }
        }
        count
    }
}

/// Producer side of a [`ChannelSource`].
#[derive(Clone)]
pub struct SampleSender {
    sender: Sender<u16>,
}

impl SampleSender {
    /// Push one reading without blocking.
    ///
    /// Returns `false` if the reading was dropped because the channel is
    /// full or the source is gone.
    pub fn push(&self, sample: u16) -> bool {
        match self.sender.try_send(sample) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::trace!("Sample channel full, dropping reading");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Push a run of readings, returning how many were accepted.
    pub fn push_all(&self, samples: &[u16]) -> usize {
        samples.iter().take_while(|&&s| self.push(s)).count()
    }
}
