//! Every-Nth-frame sampling for streams

use crate::error::PlateError;

/// Position of a frame in its stream and whether it should be analyzed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTick {
    /// 1-based stream position
    pub index: u64,
    pub analyze: bool,
}

/// Per-stream frame counter
///
/// Frame `n` is analyzed when `n % interval == 0`, so the first analyzed
/// frame is frame `interval`.
#[derive(Debug, Clone)]
pub struct FrameSampler {
    interval: u64,
    seen: u64,
}

impl FrameSampler {
    pub fn new(interval: u64) -> Result<Self, PlateError> {
        if interval == 0 {
            return Err(PlateError::Config("sample interval must be at least 1".into()));
        }
        Ok(Self { interval, seen: 0 })
    }

    /// Frames counted so far
    pub fn frames_seen(&self) -> u64 {
        self.seen
    }

    /// Count the next frame
    pub fn advance(&mut self) -> FrameTick {
        self.seen += 1;
        FrameTick {
            index: self.seen,
            analyze: self.seen % self.interval == 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_30_over_90_frames() {
        let mut sampler = FrameSampler::new(30).unwrap();
        let analyzed: Vec<u64> = (0..90)
            .map(|_| sampler.advance())
            .filter(|tick| tick.analyze)
            .map(|tick| tick.index)
            .collect();

        assert_eq!(analyzed, vec![30, 60, 90]);
        assert_eq!(sampler.frames_seen(), 90);
    }

    #[test]
    fn test_interval_one_analyzes_everything() {
        let mut sampler = FrameSampler::new(1).unwrap();
        assert!((0..5).all(|_| sampler.advance().analyze));
    }

    #[test]
    fn test_counter_starts_at_one() {
        let mut sampler = FrameSampler::new(5).unwrap();
        assert_eq!(sampler.advance(), FrameTick { index: 1, analyze: false });
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        assert!(matches!(FrameSampler::new(0), Err(PlateError::Config(_))));
    }
}
