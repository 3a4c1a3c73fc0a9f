// Per-session tasks
//
// pipeline task --(drop-oldest queue)--> output task --> file writer | replay buffer
//
// The output task encodes every batch and hands the packets to the sink.
// Runtime conditions (failures, low disk, splits) travel back to the
// controller as signals tagged with the session id.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::stats::FrameCounters;
use crate::capture::{RawBatch, SourcePipeline};
use crate::encoder::{EncoderAdapter, FrameQueue};
use crate::error::{ErrorCode, RecorderError, RecorderResult};
use crate::games::GameEvent;
use crate::output::{RecordingSummary, RecordingWriter, SplitInfo};
use crate::replay::{ReplayBuffer, ReplayOutcome};

/// Runtime conditions reported to the controller
#[derive(Debug)]
pub(crate) enum SessionSignal {
    /// Capture stopped (all sources of a modality lost, backend died)
    Failed(RecorderError),
    /// Encoding or writing failed
    OutputFailed(RecorderError),
    LowDisk,
    Split(SplitInfo),
    ReplayFinished(ReplayOutcome),
}

#[derive(Debug)]
pub(crate) enum ControllerSignal {
    Session(Uuid, SessionSignal),
    Game(GameEvent),
}

/// Sends signals for one session
#[derive(Clone)]
pub(crate) struct SignalSender {
    session: Uuid,
    tx: mpsc::UnboundedSender<ControllerSignal>,
}

impl SignalSender {
    pub(crate) fn new(session: Uuid, tx: mpsc::UnboundedSender<ControllerSignal>) -> Self {
        Self { session, tx }
    }

    pub(crate) fn send(&self, signal: SessionSignal) {
        if self.tx.send(ControllerSignal::Session(self.session, signal)).is_err() {
            debug!("Controller gone, dropping signal for session {}", self.session);
        }
    }
}

pub(crate) enum OutputSink {
    Recording(RecordingWriter),
    Replay(Arc<ReplayBuffer>),
}

enum OutputControl {
    Split(oneshot::Sender<RecorderResult<SplitInfo>>),
}

/// What the output task left behind
#[derive(Debug, Default)]
pub(crate) struct OutputReport {
    /// Files written by a recording session
    pub summary: Option<RecordingSummary>,
    /// Finalizing the output failed
    pub finish_error: Option<RecorderError>,
}

pub(crate) struct SessionRuntime {
    stop_tx: watch::Sender<bool>,
    control: mpsc::UnboundedSender<OutputControl>,
    counters: Arc<FrameCounters>,
    pipeline: JoinHandle<()>,
    output: JoinHandle<OutputReport>,
}

impl SessionRuntime {
    pub(crate) fn start(
        pipeline: SourcePipeline,
        adapter: EncoderAdapter,
        sink: OutputSink,
        queue_capacity: usize,
        signals: SignalSender,
    ) -> Self {
        let queue = Arc::new(FrameQueue::new(queue_capacity));
        let counters = Arc::new(FrameCounters::default());
        let (stop_tx, stop_rx) = watch::channel(false);
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let failure_signals = signals.clone();
        let pipeline = pipeline.spawn(
            Arc::clone(&queue),
            Arc::clone(&counters),
            stop_rx,
            move |err| failure_signals.send(SessionSignal::Failed(err)),
        );

        let output = tokio::spawn(run_output(
            queue,
            adapter,
            sink,
            control_rx,
            Arc::clone(&counters),
            signals,
        ));

        Self {
            stop_tx,
            control: control_tx,
            counters,
            pipeline,
            output,
        }
    }

    pub(crate) fn counters(&self) -> &Arc<FrameCounters> {
        &self.counters
    }

    /// Ask the output task to split at the next keyframe
    pub(crate) fn request_split(&self, reply: oneshot::Sender<RecorderResult<SplitInfo>>) {
        if let Err(mpsc::error::SendError(OutputControl::Split(reply))) =
            self.control.send(OutputControl::Split(reply))
        {
            let _ = reply.send(Err(RecorderError::no_active_recording()));
        }
    }

    /// Stop capturing, drain the encoder and finalize the output
    pub(crate) async fn shutdown(self) -> OutputReport {
        let _ = self.stop_tx.send(true);

        let (pipeline, output) = futures::join!(self.pipeline, self.output);
        if let Err(e) = pipeline {
            error!("Capture pipeline task panicked: {}", e);
        }
        match output {
            Ok(report) => report,
            Err(e) => {
                error!("Output task panicked: {}", e);
                OutputReport {
                    summary: None,
                    finish_error: Some(RecorderError::new(
                        ErrorCode::ProcessOutputError,
                        format!("Output task failed: {}", e),
                    )),
                }
            }
        }
    }
}

/// Answer a waiting manual split with `err`
fn fail_split(pending: &mut Option<oneshot::Sender<RecorderResult<SplitInfo>>>, err: &RecorderError) {
    if let Some(reply) = pending.take() {
        let _ = reply.send(Err(err.clone()));
    }
}

async fn run_output(
    queue: Arc<FrameQueue<RawBatch>>,
    mut adapter: EncoderAdapter,
    mut sink: OutputSink,
    mut control: mpsc::UnboundedReceiver<OutputControl>,
    counters: Arc<FrameCounters>,
    signals: SignalSender,
) -> OutputReport {
    let mut pending_split: Option<oneshot::Sender<RecorderResult<SplitInfo>>> = None;
    let mut failed = false;

    loop {
        let batch = tokio::select! {
            biased;
            Some(OutputControl::Split(reply)) = control.recv() => {
                if failed {
                    let _ = reply.send(Err(RecorderError::encoder(
                        "Session output already failed",
                    )));
                    continue;
                }
                match &mut sink {
                    OutputSink::Recording(writer) => match writer.request_split() {
                        Ok(()) => {
                            adapter.request_keyframe();
                            if let Some(previous) = pending_split.replace(reply) {
                                let _ = previous.send(Err(RecorderError::invalid(
                                    "Superseded by a newer split request",
                                )));
                            }
                        }
                        Err(err) => {
                            let _ = reply.send(Err(err));
                        }
                    },
                    OutputSink::Replay(_) => {
                        let _ = reply.send(Err(RecorderError::new(
                            ErrorCode::SplitRecordingDisabled,
                            "Replay sessions cannot be split",
                        )));
                    }
                }
                continue;
            }
            batch = queue.pop() => match batch {
                Some(batch) => batch,
                None => break,
            },
        };

        // Keep draining after a failure so the pipeline is never blocked
        if failed {
            continue;
        }

        let packets = match adapter.encode(&batch) {
            Ok(packets) => packets,
            Err(err) => {
                error!("Encoding failed at tick {}: {}", batch.tick, err);
                failed = true;
                fail_split(&mut pending_split, &err);
                signals.send(SessionSignal::OutputFailed(err));
                continue;
            }
        };

        match &mut sink {
            OutputSink::Recording(writer) => match writer.write_batch(&packets) {
                Ok(outcome) => {
                    if let Some(info) = outcome.split {
                        // Signal first: the controller drains signals as
                        // soon as the split reply arrives
                        signals.send(SessionSignal::Split(info.clone()));
                        if let Some(reply) = pending_split.take() {
                            let _ = reply.send(Ok(info));
                        }
                    }
                    if outcome.low_disk {
                        failed = true;
                        fail_split(
                            &mut pending_split,
                            &RecorderError::new(ErrorCode::NoDiskSpaceError, "Disk space is low"),
                        );
                        signals.send(SessionSignal::LowDisk);
                    }
                }
                Err(err) => {
                    error!("Writing recording failed: {}", err);
                    failed = true;
                    fail_split(&mut pending_split, &err);
                    signals.send(SessionSignal::OutputFailed(err));
                }
            },
            OutputSink::Replay(ring) => ring.push_batch(packets),
        }
        counters.frame_output();
    }

    fail_split(
        &mut pending_split,
        &RecorderError::encoder("Capture stopped before the split keyframe"),
    );

    match sink {
        OutputSink::Recording(writer) => match writer.finish() {
            Ok(summary) => OutputReport {
                summary: Some(summary),
                finish_error: None,
            },
            Err(err) => {
                warn!("Failed to finalize recording: {}", err);
                OutputReport {
                    summary: None,
                    finish_error: Some(RecorderError::new(ErrorCode::ProcessOutputError, err.message)),
                }
            }
        },
        OutputSink::Replay(ring) => {
            info!("Replay buffer closed holding {}ms", ring.span_ms());
            OutputReport::default()
        }
    }
}
