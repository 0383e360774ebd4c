use std::sync::Arc;

use envoy_types::pb::envoy::service::ext_proc::v3::ProcessingRequest;
use futures_util::{Stream, StreamExt};
use tonic::Status;

use crate::error::{FilterError, Result};
use crate::event::ProcessingEvent;
use crate::phase::{Decision, StreamSession};
use crate::rewrite::BodyRewriter;
use crate::utils::{get_header, send_grpc_response, to_processing_response, ResponseSender};

/// Drives one ext_proc stream: receive, decide, send, one event at a time.
pub struct StreamHandler {
    session: StreamSession,
    tx: ResponseSender,
    handled: usize,
}

impl StreamHandler {
    pub fn new(rewriter: Arc<BodyRewriter>, tx: ResponseSender) -> Self {
        StreamHandler {
            session: StreamSession::new(rewriter),
            tx,
            handled: 0,
        }
    }

    /// Runs until the peer half-closes (`Ok`), the response side goes away
    /// (`Cancelled`), or a fatal error. Fatal errors are also sent to the
    /// peer as the final status of the stream.
    pub async fn run<S>(mut self, mut inbound: S) -> Result<()>
    where
        S: Stream<Item = std::result::Result<ProcessingRequest, Status>> + Unpin,
    {
        loop {
            if self.tx.is_closed() {
                log::info!("Stream cancelled after {} events", self.handled);
                return Err(FilterError::Cancelled);
            }

            let message = tokio::select! {
                biased;
                _ = self.tx.closed() => {
                    log::info!("Stream cancelled after {} events", self.handled);
                    return Err(FilterError::Cancelled);
                }
                message = inbound.next() => message,
            };

            let request = match message {
                None => {
                    log::info!("Stream processing complete after {} events.", self.handled);
                    return Ok(());
                }
                Some(Err(status)) => return self.fail(FilterError::Transport(status)).await,
                Some(Ok(request)) => request,
            };

            let decision = match self.decide(request) {
                Ok(decision) => decision,
                Err(err) => return self.fail(err).await,
            };

            if !send_grpc_response(&self.tx, to_processing_response(decision)).await {
                return Err(FilterError::Cancelled);
            }
            self.handled += 1;
        }
    }

    fn decide(&mut self, request: ProcessingRequest) -> Result<Decision> {
        let Some(event) = ProcessingEvent::from_request(request) else {
            log::warn!("Unknown request type, passing through");
            return Ok(Decision::empty());
        };

        if let ProcessingEvent::RequestHeaders { headers, .. } = &event {
            log::info!(
                "Request headers: {} {}",
                get_header(headers, ":method").unwrap_or("-"),
                get_header(headers, ":path").unwrap_or("-")
            );
        }
        self.session.advance(event)
    }

    async fn fail(&self, err: FilterError) -> Result<()> {
        log::error!("Terminating stream: {}", err);
        if self.tx.send(Err(Status::from(&err))).await.is_err() {
            log::error!("Peer is gone, could not deliver error status");
        }
        Err(err)
    }
}
