//! Paced synthetic source producing blank frames, used for demo runs and tests.

use std::time::{Duration, Instant};

use chrono::Utc;

use crate::{
    producer::FrameSource,
    stop::StopSignal,
    types::{CaptureError, Frame},
};

pub struct SyntheticSource {
    size: (i32, i32),
    interval: Duration,
    next_due: Option<Instant>,
}

impl SyntheticSource {
    /// Create a source emitting `size` frames at roughly `fps` frames per second.
    pub fn new(size: (i32, i32), fps: f64) -> Self {
        let interval = if fps > 0.0 {
            Duration::try_from_secs_f64(1.0 / fps).unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        };
        Self {
            size,
            interval,
            next_due: None,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("synthetic ({}x{})", self.size.0, self.size.1)
    }

    fn capture(&mut self, stop: &StopSignal) -> Result<Frame, CaptureError> {
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now && stop.wait_timeout(due - now) {
                return Err(CaptureError::Interrupted);
            }
        }
        self.next_due = Some(Instant::now() + self.interval);

        let bytes = (self.size.0.max(0) as usize) * (self.size.1.max(0) as usize) * 3;
        Ok(Frame::new(
            vec![0u8; bytes],
            self.size.0,
            self.size.1,
            Utc::now().timestamp_millis(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn frames_carry_requested_geometry() {
        let stop = StopSignal::new();
        let mut source = SyntheticSource::new((4, 2), 0.0);
        let frame = source.capture(&stop).expect("frame");
        assert_eq!((frame.width, frame.height), (4, 2));
        assert_eq!(frame.data.len(), 4 * 2 * 3);
    }

    #[test]
    fn pacing_wait_is_cut_short_by_stop() {
        let stop = Arc::new(StopSignal::new());
        let mut source = SyntheticSource::new((2, 2), 0.1);
        source.capture(&stop).expect("first frame is immediate");

        let trigger = stop.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            trigger.stop();
        });

        let started = Instant::now();
        assert!(matches!(
            source.capture(&stop),
            Err(CaptureError::Interrupted)
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
        stopper.join().expect("stopper thread");
    }
}
