use envoy_types::pb::envoy::extensions::filters::http::ext_proc::v3::{
    processing_mode::{BodySendMode, HeaderSendMode},
    ProcessingMode,
};
use envoy_types::pb::envoy::service::ext_proc::v3::{
    body_mutation, processing_response, BodyMutation, BodyResponse, CommonResponse,
    HeadersResponse, ProcessingResponse,
};
use tokio::sync::mpsc::Sender;
use tonic::Status;

use crate::event::{Headers, Side};
use crate::phase::{BodyMode, Decision, HeaderMode, ModeOverride, Reply};

pub type ResponseSender = Sender<Result<ProcessingResponse, Status>>;

/// Builds the Envoy response for one decision.
pub fn to_processing_response(decision: Decision) -> ProcessingResponse {
    let response = match decision.reply {
        Reply::Empty => None,
        Reply::ContinueHeaders(side) => Some(headers_response(side, HeadersResponse::default())),
        Reply::ContinueBody(side) => Some(body_response(side, BodyResponse::default())),
        Reply::ReplaceBody(side, body) => {
            let common_response = CommonResponse {
                body_mutation: Some(BodyMutation {
                    mutation: Some(body_mutation::Mutation::Body(body.to_vec())),
                }),
                ..Default::default()
            };
            Some(body_response(
                side,
                BodyResponse {
                    response: Some(common_response),
                },
            ))
        }
    };

    ProcessingResponse {
        response,
        mode_override: decision.mode_override.map(processing_mode),
        ..Default::default()
    }
}

fn headers_response(side: Side, headers: HeadersResponse) -> processing_response::Response {
    match side {
        Side::Request => processing_response::Response::RequestHeaders(headers),
        Side::Response => processing_response::Response::ResponseHeaders(headers),
    }
}

fn body_response(side: Side, body: BodyResponse) -> processing_response::Response {
    match side {
        Side::Request => processing_response::Response::RequestBody(body),
        Side::Response => processing_response::Response::ResponseBody(body),
    }
}

pub fn processing_mode(mode: ModeOverride) -> ProcessingMode {
    ProcessingMode {
        request_body_mode: body_send_mode(mode.request_body) as i32,
        response_header_mode: header_send_mode(mode.response_header) as i32,
        response_body_mode: body_send_mode(mode.response_body) as i32,
        ..Default::default()
    }
}

fn header_send_mode(mode: HeaderMode) -> HeaderSendMode {
    match mode {
        HeaderMode::Default => HeaderSendMode::Default,
        HeaderMode::Send => HeaderSendMode::Send,
        HeaderMode::Skip => HeaderSendMode::Skip,
    }
}

fn body_send_mode(mode: BodyMode) -> BodySendMode {
    match mode {
        BodyMode::None => BodySendMode::None,
        BodyMode::Streamed => BodySendMode::Streamed,
        BodyMode::Buffered => BodySendMode::Buffered,
    }
}

/// Sends one response; `false` means the peer is gone.
pub async fn send_grpc_response(tx: &ResponseSender, response: ProcessingResponse) -> bool {
    log::trace!("Attempting to send response...");
    if let Err(e) = tx.send(Ok(response)).await {
        log::error!("Error sending response: {:?}", e);
        false
    } else {
        log::trace!("Response sent successfully.");
        true
    }
}

/// First value of a header, matched case-insensitively.
pub fn get_header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(header_name, _)| header_name.eq_ignore_ascii_case(name))
        .map(|(_, header_value)| header_value.as_str())
}
