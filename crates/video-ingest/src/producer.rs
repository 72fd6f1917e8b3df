//! Frame acquisition producer.
//!
//! A single background thread pulls frames from a [`FrameSource`] and pushes
//! them into the shared [`FrameChannel`]. Capture failures are never fatal: the
//! producer logs the fault, backs off and retries until it is told to stop.

use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, error, info, warn};

use crate::{
    channel::{FrameChannel, PushOutcome},
    stop::StopSignal,
    types::{CaptureError, Frame},
};

/// Default pause between failed capture attempts.
pub const DEFAULT_CAPTURE_BACKOFF: Duration = Duration::from_secs(2);

/// External frame source driven by the producer thread.
pub trait FrameSource: Send {
    /// Short description used in log messages.
    fn describe(&self) -> String;

    /// Obtain the next frame. Transient failures are retried by the caller.
    ///
    /// Blocking implementations must return [`CaptureError::Interrupted`]
    /// promptly once `stop` fires.
    fn capture(&mut self, stop: &StopSignal) -> Result<Frame, CaptureError>;

    /// Release the underlying device or process handle.
    fn release(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn capture(&mut self, stop: &StopSignal) -> Result<Frame, CaptureError> {
        (**self).capture(stop)
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Counters reported by the producer when it exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProducerStats {
    pub captured: u64,
    pub evicted: u64,
    pub faults: u64,
}

/// Spawn the producer thread. The thread inherits the caller's tracing dispatcher.
pub fn spawn_producer<S>(
    mut source: S,
    channel: Arc<FrameChannel>,
    stop: Arc<StopSignal>,
    backoff: Duration,
) -> io::Result<JoinHandle<ProducerStats>>
where
    S: FrameSource + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    thread::Builder::new()
        .name("frame-producer".into())
        .spawn(move || {
            tracing::dispatcher::with_default(&dispatch, || {
                run_producer(&mut source, &channel, &stop, backoff)
            })
        })
}

/// Producer loop body; runs on the calling thread until `stop` fires.
pub fn run_producer<S>(
    source: &mut S,
    channel: &FrameChannel,
    stop: &StopSignal,
    backoff: Duration,
) -> ProducerStats
where
    S: FrameSource + ?Sized,
{
    let mut stats = ProducerStats::default();
    let mut sequence: u64 = 0;
    info!(source = %source.describe(), "frame acquisition started");

    while !stop.is_stopped() {
        match source.capture(stop) {
            Ok(mut frame) => {
                sequence = sequence.wrapping_add(1);
                frame.sequence = sequence;
                stats.captured = stats.captured.wrapping_add(1);

                match channel.push(frame) {
                    PushOutcome::Queued => {}
                    PushOutcome::Evicted(dropped) => {
                        stats.evicted = stats.evicted.wrapping_add(1);
                        debug!(dropped, "frame channel full; evicted stale frame");
                    }
                    PushOutcome::Closed => break,
                }
            }
            Err(CaptureError::Interrupted) => break,
            Err(err) => {
                stats.faults = stats.faults.wrapping_add(1);
                error!("optical stream interrupted: {err}; retrying in {backoff:?}");
                if stop.wait_timeout(backoff) {
                    break;
                }
            }
        }
    }

    source.release();
    if stats.faults > 0 {
        warn!(
            faults = stats.faults,
            "frame acquisition stopped after capture faults"
        );
    }
    info!(
        captured = stats.captured,
        evicted = stats.evicted,
        "frame acquisition stopped"
    );
    stats
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use anyhow::anyhow;

    use super::*;

    struct FlakySource {
        calls: u32,
        fail_first: u32,
        limit: u32,
        stop: Arc<StopSignal>,
        released: Arc<AtomicBool>,
    }

    impl FrameSource for FlakySource {
        fn describe(&self) -> String {
            "flaky".into()
        }

        fn capture(&mut self, _stop: &StopSignal) -> Result<Frame, CaptureError> {
            self.calls += 1;
            if self.calls >= self.limit {
                self.stop.stop();
            }
            if self.calls <= self.fail_first {
                return Err(CaptureError::Other(anyhow!("device unplugged")));
            }
            Ok(Frame::new(vec![0; 3], 1, 1, 0))
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn capture_faults_are_retried_and_source_released() {
        let stop = Arc::new(StopSignal::new());
        let released = Arc::new(AtomicBool::new(false));
        let mut source = FlakySource {
            calls: 0,
            fail_first: 2,
            limit: 5,
            stop: stop.clone(),
            released: released.clone(),
        };
        let channel = FrameChannel::new(8);

        let stats = run_producer(&mut source, &channel, &stop, Duration::from_millis(1));

        assert_eq!(stats.faults, 2);
        assert_eq!(stats.captured, 3);
        assert!(released.load(Ordering::SeqCst));
        let sequences: Vec<u64> = std::iter::from_fn(|| channel.try_pop())
            .map(|f| f.sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[test]
    fn producer_exits_when_channel_closes() {
        let stop = Arc::new(StopSignal::new());
        let released = Arc::new(AtomicBool::new(false));
        let mut source = FlakySource {
            calls: 0,
            fail_first: 0,
            limit: u32::MAX,
            stop: stop.clone(),
            released: released.clone(),
        };
        let channel = FrameChannel::new(2);
        channel.close();

        let stats = run_producer(&mut source, &channel, &stop, Duration::from_millis(1));

        assert_eq!(stats.captured, 1);
        assert!(released.load(Ordering::SeqCst));
    }

    /// Source that never yields a frame until the stop signal fires.
    struct SilentSource {
        released: Arc<AtomicBool>,
    }

    impl FrameSource for SilentSource {
        fn describe(&self) -> String {
            "silent".into()
        }

        fn capture(&mut self, stop: &StopSignal) -> Result<Frame, CaptureError> {
            let _ = stop.receiver().recv();
            Err(CaptureError::Interrupted)
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn blocked_capture_exits_on_stop_without_fault() {
        let stop = Arc::new(StopSignal::new());
        let channel = Arc::new(FrameChannel::new(2));
        let released = Arc::new(AtomicBool::new(false));
        let handle = spawn_producer(
            SilentSource {
                released: released.clone(),
            },
            channel.clone(),
            stop.clone(),
            Duration::from_secs(60),
        )
        .expect("spawn producer");

        thread::sleep(Duration::from_millis(50));
        stop.stop();
        channel.close();

        let stats = handle.join().expect("producer thread");
        assert_eq!(stats.faults, 0);
        assert_eq!(stats.captured, 0);
        assert!(released.load(Ordering::SeqCst));
    }
}
