//! Drives one streamed chat turn: reads the SSE byte stream, paces the
//! display output independently of network arrival, and finalizes the turn
//! at most once.

use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use workbench_logging::{workbench_debug, workbench_warn};

use crate::client::BackendClient;
use crate::reconcile::{TurnReconciler, TurnSignal};
use crate::sse::{FrameDecoder, StreamEvent};
use crate::types::{ChatRequest, EngineEvent, TurnId};

pub(crate) struct TurnConfig {
    pub pacing_interval: Duration,
    pub pacing_chars: usize,
}

pub(crate) async fn drive_turn(
    client: Arc<dyn BackendClient>,
    turn_id: TurnId,
    request: ChatRequest,
    config: TurnConfig,
    token: CancellationToken,
    events: mpsc::Sender<EngineEvent>,
) {
    let started = Instant::now();
    let stream = tokio::select! {
        _ = token.cancelled() => return,
        opened = client.chat_stream(&request) => opened,
    };
    let mut stream = match stream {
        Ok(stream) => stream,
        Err(err) => {
            if !token.is_cancelled() {
                let _ = events.send(EngineEvent::TurnFailed {
                    turn_id,
                    message: err.message,
                    duration_ms: started.elapsed().as_millis() as u64,
                });
            }
            return;
        }
    };

    let mut decoder = FrameDecoder::new();
    let mut reconciler = TurnReconciler::new();
    let mut ticker = tokio::time::interval(config.pacing_interval);
    let mut stream_open = true;

    let fail = |message: String| {
        let _ = events.send(EngineEvent::TurnFailed {
            turn_id,
            message,
            duration_ms: started.elapsed().as_millis() as u64,
        });
    };

    loop {
        tokio::select! {
            // Cancellation abandons the loop without finalizing; the shell
            // has already discarded the turn.
            _ = token.cancelled() => return,

            read = stream.next(), if stream_open => {
                let frames = match read {
                    Some(Ok(bytes)) => decoder.push(&bytes),
                    Some(Err(err)) => {
                        fail(err.message);
                        return;
                    }
                    None => {
                        stream_open = false;
                        decoder.finish()
                    }
                };
                for frame in frames {
                    match StreamEvent::from_frame(&frame) {
                        Some(event) => {
                            for signal in reconciler.apply(event) {
                                let _ = events.send(match signal {
                                    TurnSignal::Session(session_id) => {
                                        EngineEvent::TurnSession { turn_id, session_id }
                                    }
                                    TurnSignal::Thought(step) => {
                                        EngineEvent::TurnThought { turn_id, step }
                                    }
                                });
                            }
                        }
                        None => {
                            workbench_debug!("turn {turn_id}: skipping stream event {:?}", frame.event);
                        }
                    }
                }
                if let Some(message) = reconciler.failure() {
                    fail(message.to_string());
                    return;
                }
                if !stream_open {
                    if !reconciler.done_received() {
                        // Socket closed before the terminal event; there is
                        // nothing authoritative to commit.
                        workbench_warn!("turn {turn_id}: stream ended before done event");
                        fail("stream ended before completion".to_string());
                        return;
                    }
                    // Second finalization call site: guarantees the turn
                    // completes even when done arrived after the socket
                    // closed with no further ticks due. The reconciler's
                    // guard keeps this at-most-once against the tick arm.
                    if finalize(&mut reconciler, turn_id, &events, started).is_some() {
                        return;
                    }
                }
            }

            _ = ticker.tick() => {
                if reconciler.advance(config.pacing_chars) {
                    let _ = events.send(EngineEvent::TurnDisplay {
                        turn_id,
                        text: reconciler.displayed().to_string(),
                    });
                }
                if finalize(&mut reconciler, turn_id, &events, started).is_some() {
                    return;
                }
            }
        }
    }
}

fn finalize(
    reconciler: &mut TurnReconciler,
    turn_id: TurnId,
    events: &mpsc::Sender<EngineEvent>,
    started: Instant,
) -> Option<String> {
    let answer = reconciler.try_finalize()?;
    // Show the committed text in full; the pending queue is empty so this
    // matches what paced display would eventually have shown.
    let _ = events.send(EngineEvent::TurnDisplay {
        turn_id,
        text: answer.clone(),
    });
    let _ = events.send(EngineEvent::TurnFinalized {
        turn_id,
        answer: answer.clone(),
        thoughts: reconciler.thought_steps(),
        duration_ms: started.elapsed().as_millis() as u64,
    });
    Some(answer)
}
