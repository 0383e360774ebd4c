use envoy_types::pb::envoy::service::ext_proc::v3::{
    external_processor_server::ExternalProcessor, ProcessingRequest, ProcessingResponse,
};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

use crate::config::Config;
use crate::error::{FilterError, Result};
use crate::policy::MutationPolicy;
use crate::rewrite::BodyRewriter;
use crate::stream_handler::StreamHandler;

use std::sync::Arc;

/// ext_proc server. Holds only read-only state; every stream gets its own
/// task and its own session.
#[derive(Clone)]
pub struct PayloadExtProcGrpcService {
    rewriter: Arc<BodyRewriter>,
    stream_buffer: usize,
}

impl PayloadExtProcGrpcService {
    pub fn new(config: &Config, policy: Arc<MutationPolicy>) -> Result<Self> {
        let rewriter = BodyRewriter::new(
            policy,
            &config.env.request_message_type,
            &config.env.response_message_type,
        )?;

        Ok(PayloadExtProcGrpcService {
            rewriter: Arc::new(rewriter),
            stream_buffer: config.env.stream_buffer.max(1),
        })
    }
}

#[tonic::async_trait]
impl ExternalProcessor for PayloadExtProcGrpcService {
    type ProcessStream = ReceiverStream<std::result::Result<ProcessingResponse, Status>>;

    async fn process(
        &self,
        request: Request<Streaming<ProcessingRequest>>,
    ) -> std::result::Result<Response<Self::ProcessStream>, Status> {
        log::info!(
            "Got stream from {}",
            request
                .remote_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| "unknown peer".to_string())
        );
        let (tx, rx) = tokio::sync::mpsc::channel(self.stream_buffer);

        let handler = StreamHandler::new(Arc::clone(&self.rewriter), tx);
        let inbound = request.into_inner();
        tokio::spawn(async move {
            match handler.run(inbound).await {
                Ok(()) => {}
                Err(FilterError::Cancelled) => log::info!("Stream cancelled by peer."),
                Err(e) => log::warn!("Stream ended with error: {}", e),
            }
        });

        log::trace!("Returning gRPC response stream.");
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
