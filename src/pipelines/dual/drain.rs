// SPDX-License-Identifier: GPL-3.0-only

//! Encoder output draining
//!
//! One call pulls at most a fixed number of outputs: a small budget with a
//! zero timeout while recording, a larger one with a short timeout after
//! end-of-stream was signalled.

use crate::constants::drain;
use crate::errors::PipelineError;
use crate::media::codec::{DequeueResult, Encoder, TrackKind};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::clock::PipelineClock;
use super::container::{ContainerState, WriteOutcome};

/// Where payload timestamps come from
#[derive(Debug, Clone, Copy)]
pub enum PtsSource<'a> {
    /// Elapsed time of the shared clock at drain time
    Clock(&'a PipelineClock),
    /// The timestamp the encoder carried through from its input
    Encoder,
}

/// Summary of one drain call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    pub written: usize,
    /// Dropped for an invalid clock read or because the muxer isn't started
    pub dropped: usize,
    pub codec_config: usize,
    pub format_registered: bool,
    pub end_of_stream: bool,
}

/// Drain `encoder` into the container
pub fn drain_encoder(
    encoder: &mut dyn Encoder,
    kind: TrackKind,
    container: &Mutex<ContainerState>,
    pts: PtsSource<'_>,
    end_of_stream: bool,
) -> Result<DrainOutcome, PipelineError> {
    let (iterations, timeout) = if end_of_stream {
        (drain::END_OF_STREAM_ITERATIONS, drain::END_OF_STREAM_TIMEOUT)
    } else {
        (drain::RUNNING_ITERATIONS, drain::RUNNING_TIMEOUT)
    };

    let mut outcome = DrainOutcome::default();

    for _ in 0..iterations {
        match encoder.dequeue_output(timeout)? {
            DequeueResult::TryAgainLater => {
                if !end_of_stream {
                    break;
                }
            }
            DequeueResult::FormatChanged(format) => {
                container.lock().register_track(&format)?;
                outcome.format_registered = true;
            }
            DequeueResult::Buffer(buffer) => {
                if buffer.flags.codec_config {
                    // Codec data already travels in the track format
                    outcome.codec_config += 1;
                } else if !buffer.is_empty() {
                    let pts_us = match pts {
                        PtsSource::Clock(clock) => clock.elapsed_us(),
                        PtsSource::Encoder => Some(buffer.pts_us),
                    };
                    match pts_us.filter(|p| *p >= 0) {
                        Some(pts_us) => match container.lock().write(kind, &buffer, pts_us)? {
                            WriteOutcome::Written(written) => {
                                trace!(kind = %kind, pts_us = written, "Wrote sample");
                                outcome.written += 1;
                            }
                            WriteOutcome::Dropped => outcome.dropped += 1,
                        },
                        None => {
                            debug!(kind = %kind, "Dropping buffer without a valid clock read");
                            outcome.dropped += 1;
                        }
                    }
                }

                if buffer.flags.end_of_stream {
                    debug!(kind = %kind, encoder = encoder.name(), "Encoder reached end of stream");
                    outcome.end_of_stream = true;
                    break;
                }
            }
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{EncoderError, MuxerError};
    use crate::media::codec::{BufferFlags, EncodedBuffer, TrackFormat};
    use crate::pipelines::dual::events::PipelineStats;
    use crate::pipelines::dual::muxer::Muxer;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    struct ScriptedEncoder {
        outputs: VecDeque<DequeueResult>,
        dequeues: usize,
    }

    impl ScriptedEncoder {
        fn new(outputs: Vec<DequeueResult>) -> Self {
            Self {
                outputs: outputs.into(),
                dequeues: 0,
            }
        }
    }

    impl Encoder for ScriptedEncoder {
        fn name(&self) -> &str {
            "scripted"
        }
        fn dequeue_output(&mut self, _timeout: Duration) -> Result<DequeueResult, EncoderError> {
            self.dequeues += 1;
            Ok(self.outputs.pop_front().unwrap_or(DequeueResult::TryAgainLater))
        }
        fn signal_end_of_stream(&mut self) -> Result<(), EncoderError> {
            Ok(())
        }
        fn release(&mut self) -> Result<(), EncoderError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingMuxer {
        pts: Arc<parking_lot::Mutex<Vec<i64>>>,
    }

    impl Muxer for CountingMuxer {
        fn add_track(&mut self, format: &TrackFormat) -> Result<usize, MuxerError> {
            Ok(match format.kind {
                TrackKind::Video => 0,
                TrackKind::Audio => 1,
            })
        }
        fn start(&mut self) -> Result<(), MuxerError> {
            Ok(())
        }
        fn write_sample(
            &mut self,
            _track: usize,
            _buffer: &EncodedBuffer,
            pts_us: i64,
        ) -> Result<(), MuxerError> {
            self.pts.lock().push(pts_us);
            Ok(())
        }
        fn finish(&mut self) -> Result<(), MuxerError> {
            Ok(())
        }
        fn discard(&mut self) -> Result<(), MuxerError> {
            Ok(())
        }
    }

    fn payload(pts_us: i64) -> DequeueResult {
        DequeueResult::Buffer(EncodedBuffer {
            data: vec![0, 0, 0, 1],
            pts_us,
            flags: BufferFlags::default(),
        })
    }

    fn container() -> (Mutex<ContainerState>, Arc<parking_lot::Mutex<Vec<i64>>>) {
        let muxer = CountingMuxer::default();
        let pts = Arc::clone(&muxer.pts);
        (
            Mutex::new(ContainerState::new(Box::new(muxer), Arc::new(PipelineStats::default()))),
            pts,
        )
    }

    #[test]
    fn test_running_budget_is_bounded() {
        let (container, _) = container();
        let outputs = (0..50).map(|i| payload(i)).collect();
        let mut encoder = ScriptedEncoder::new(outputs);
        let outcome = drain_encoder(
            &mut encoder,
            TrackKind::Audio,
            &container,
            PtsSource::Encoder,
            false,
        )
        .unwrap();
        assert_eq!(encoder.dequeues, drain::RUNNING_ITERATIONS);
        // Audio track never registered, so everything is dropped
        assert_eq!(outcome.dropped, drain::RUNNING_ITERATIONS);
    }

    #[test]
    fn test_format_then_payload_and_codec_config() {
        let (container, pts) = container();
        let mut encoder = ScriptedEncoder::new(vec![
            DequeueResult::FormatChanged(TrackFormat::video("video/x-h264")),
            DequeueResult::Buffer(EncodedBuffer {
                data: vec![1],
                pts_us: 0,
                flags: BufferFlags {
                    codec_config: true,
                    ..BufferFlags::default()
                },
            }),
            payload(40_000),
        ]);
        let outcome = drain_encoder(
            &mut encoder,
            TrackKind::Video,
            &container,
            PtsSource::Encoder,
            false,
        )
        .unwrap();
        assert!(outcome.format_registered);
        assert_eq!(outcome.codec_config, 1);
        assert_eq!(outcome.written, 1);
        assert_eq!(*pts.lock(), vec![40_000]);
        assert!(container.lock().is_started());
    }

    #[test]
    fn test_clock_not_running_drops() {
        let (container, pts) = container();
        let clock = PipelineClock::new();
        let mut encoder = ScriptedEncoder::new(vec![
            DequeueResult::FormatChanged(TrackFormat::video("video/x-h264")),
            payload(0),
        ]);
        let outcome = drain_encoder(
            &mut encoder,
            TrackKind::Video,
            &container,
            PtsSource::Clock(&clock),
            false,
        )
        .unwrap();
        assert_eq!(outcome.dropped, 1);
        assert!(pts.lock().is_empty());

        clock.start_at(Instant::now() - Duration::from_millis(100));
        let mut encoder = ScriptedEncoder::new(vec![payload(0)]);
        drain_encoder(
            &mut encoder,
            TrackKind::Video,
            &container,
            PtsSource::Clock(&clock),
            false,
        )
        .unwrap();
        assert!(pts.lock()[0] >= 100_000);
    }

    #[test]
    fn test_end_of_stream_stops_drain() {
        let (container, _) = container();
        let mut encoder = ScriptedEncoder::new(vec![
            DequeueResult::TryAgainLater,
            DequeueResult::TryAgainLater,
            DequeueResult::Buffer(EncodedBuffer {
                data: Vec::new(),
                pts_us: 0,
                flags: BufferFlags {
                    end_of_stream: true,
                    ..BufferFlags::default()
                },
            }),
        ]);
        let outcome = drain_encoder(
            &mut encoder,
            TrackKind::Video,
            &container,
            PtsSource::Encoder,
            true,
        )
        .unwrap();
        assert!(outcome.end_of_stream);
        assert_eq!(encoder.dequeues, 3);
    }
}
