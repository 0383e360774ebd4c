mod common;

use common::*;
use envoy_types::pb::envoy::extensions::filters::http::ext_proc::v3::processing_mode::{
    BodySendMode, HeaderSendMode,
};
use envoy_types::pb::envoy::service::ext_proc::v3::{
    processing_response, ProcessingRequest, ProcessingResponse,
};
use grpc_payload_extproc::stream_handler::StreamHandler;
use grpc_payload_extproc::FilterError;
use tokio::sync::mpsc;
use tonic::{Code, Status};

type Outcome = (Result<(), FilterError>, Vec<Result<ProcessingResponse, Status>>);

async fn run(requests: Vec<ProcessingRequest>) -> Outcome {
    let (tx, mut rx) = mpsc::channel(16);
    let inbound = tokio_stream::iter(requests.into_iter().map(Ok));
    let result = StreamHandler::new(rewriter(), tx).run(inbound).await;

    let mut responses = Vec::new();
    while let Some(item) = rx.recv().await {
        responses.push(item);
    }
    (result, responses)
}

fn ok(responses: Vec<Result<ProcessingResponse, Status>>) -> Vec<ProcessingResponse> {
    responses.into_iter().map(|r| r.unwrap()).collect()
}

#[tokio::test]
async fn post_exchange_rewrites_both_directions() {
    let (result, responses) = run(vec![
        request_headers("POST"),
        request_body(&framed("echo.EchoRequest", "name", &["alice"]), true),
        response_headers(),
        response_body(
            &framed("echo.EchoReply", "message", &["hi carol", "hi dan"]),
            true,
        ),
    ])
    .await;
    result.unwrap();
    let responses = ok(responses);
    assert_eq!(responses.len(), 4);

    let headers = &responses[0];
    assert!(matches!(
        headers.response,
        Some(processing_response::Response::RequestHeaders(_))
    ));
    let mode = headers.mode_override.as_ref().unwrap();
    assert_eq!(mode.request_body_mode, BodySendMode::Buffered as i32);
    assert_eq!(mode.response_header_mode, HeaderSendMode::Skip as i32);

    let request = body_mutation(&responses[1]).unwrap();
    let messages = unframe("echo.EchoRequest", &request);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].get_str("name").unwrap(), "bob");
    assert_eq!(
        responses[1].mode_override.as_ref().unwrap().response_header_mode,
        HeaderSendMode::Send as i32
    );

    assert_eq!(
        responses[2].mode_override.as_ref().unwrap().response_body_mode,
        BodySendMode::Buffered as i32
    );

    let reply = body_mutation(&responses[3]).unwrap();
    assert_eq!(reply, framed("echo.EchoReply", "message", &["hi sally"]).to_vec());
}

#[tokio::test]
async fn unmatched_request_is_reported_unchanged() {
    let (result, responses) = run(vec![
        request_headers("POST"),
        request_body(&framed("echo.EchoRequest", "name", &["eve"]), true),
    ])
    .await;
    result.unwrap();
    let responses = ok(responses);

    assert!(matches!(
        responses[1].response,
        Some(processing_response::Response::RequestBody(_))
    ));
    assert_eq!(body_mutation(&responses[1]), None);
}

#[tokio::test]
async fn split_request_body_is_buffered() {
    let whole = framed("echo.EchoRequest", "name", &["alice", "eve"]);
    let (first, second) = whole.split_at(whole.len() / 2);
    let (result, responses) = run(vec![
        request_headers("POST"),
        request_body(first, false),
        request_body(second, true),
    ])
    .await;
    result.unwrap();
    let responses = ok(responses);
    assert_eq!(responses.len(), 3);
    assert_eq!(responses[1], ProcessingResponse::default());

    let names: Vec<String> = unframe("echo.EchoRequest", &body_mutation(&responses[2]).unwrap())
        .iter()
        .map(|m| m.get_str("name").unwrap().into_owned())
        .collect();
    assert_eq!(names, vec!["bob", "eve"]);
}

#[tokio::test]
async fn non_post_exchange_is_never_decoded() {
    // bodies that would not even frame-decode must still pass through
    let (result, responses) = run(vec![
        request_headers("GET"),
        request_body(b"not a framed body", true),
        response_headers(),
        response_body(&framed("echo.EchoReply", "message", &["hi carol"]), true),
    ])
    .await;
    result.unwrap();
    let responses = ok(responses);
    assert_eq!(responses.len(), 4);
    assert_eq!(responses[0], ProcessingResponse::default());
    assert!(responses.iter().all(|r| body_mutation(r).is_none()));
    assert!(matches!(
        responses[3].response,
        Some(processing_response::Response::ResponseBody(_))
    ));
}

#[tokio::test]
async fn out_of_order_events_pass_through() {
    let (result, responses) = run(vec![
        response_body(&framed("echo.EchoReply", "message", &["hi carol"]), true),
        response_headers(),
        request_headers("POST"),
        request_body(&framed("echo.EchoRequest", "name", &["alice"]), true),
    ])
    .await;
    result.unwrap();
    let responses = ok(responses);
    assert_eq!(responses[0], ProcessingResponse::default());
    assert_eq!(responses[1], ProcessingResponse::default());
    assert!(body_mutation(&responses[3]).is_some());
}

#[tokio::test]
async fn malformed_body_closes_stream_with_internal_error() {
    let (result, responses) = run(vec![
        request_headers("POST"),
        request_body(b"40\0truncated", true),
        response_headers(),
    ])
    .await;
    assert!(matches!(result, Err(FilterError::Framing { .. })));

    assert_eq!(responses.len(), 2);
    assert!(responses[0].is_ok());
    let status = responses[1].as_ref().unwrap_err();
    assert_eq!(status.code(), Code::Internal);
}

#[tokio::test]
async fn undecodable_frame_closes_stream() {
    let bad = grpc_payload_extproc::frame::encode(&[grpc_payload_extproc::frame::Frame::new(
        &b"\x0a\x7fshort"[..],
    )]);
    let (result, responses) = run(vec![
        request_headers("POST"),
        request_body(&bad, true),
    ])
    .await;
    assert!(matches!(result, Err(FilterError::Decode { .. })));
    assert_eq!(responses.last().unwrap().as_ref().unwrap_err().code(), Code::Internal);
}
