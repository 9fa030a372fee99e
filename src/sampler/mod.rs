//! Pressure sample sources for the breath monitor.
//!
//! A source hands the detector the raw ADC readings that arrived since the
//! previous tick, in arrival order.

pub mod channel;
pub mod synthetic;

pub use channel::{ChannelSource, SampleSender};
pub use synthetic::{BreathingPattern, SyntheticBreathing};

/// Source of raw breath pressure readings.
pub trait SampleSource: Send {
    /// Fill `buf` with up to `buf.len()` pending samples and return how many
    /// were written. Returning 0 is valid and means nothing arrived.
    fn get_samples(&mut self, buf: &mut [u16]) -> usize;
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn get_samples(&mut self, buf: &mut [u16]) -> usize {
        (**self).get_samples(buf)
    }
}
