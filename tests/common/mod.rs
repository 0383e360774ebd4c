#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use envoy_types::pb::envoy::config::core::v3::{HeaderMap, HeaderValue};
use envoy_types::pb::envoy::service::ext_proc::v3::{
    body_mutation, processing_request, processing_response, HttpBody, HttpHeaders,
    ProcessingRequest, ProcessingResponse,
};
use grpc_payload_extproc::frame::{self, Frame};
use grpc_payload_extproc::policy::{default_rules, MutationPolicy};
use grpc_payload_extproc::registry::{MessageRegistry, NamedMessage};
use grpc_payload_extproc::rewrite::BodyRewriter;

pub const ECHO_DESCRIPTORS: &[u8] = include_bytes!("../../proto/echo.proto.pb");

pub fn registry() -> Arc<MessageRegistry> {
    Arc::new(MessageRegistry::from_bytes(ECHO_DESCRIPTORS).unwrap())
}

pub fn policy() -> Arc<MutationPolicy> {
    Arc::new(
        MutationPolicy::new(
            registry(),
            default_rules("echo.EchoRequest", "echo.EchoReply"),
        )
        .unwrap(),
    )
}

pub fn rewriter() -> Arc<BodyRewriter> {
    Arc::new(BodyRewriter::new(policy(), "echo.EchoRequest", "echo.EchoReply").unwrap())
}

/// Encodes `{field: value}` messages of one type into a framed body.
pub fn framed(type_name: &str, field: &str, values: &[&str]) -> Bytes {
    let registry = registry();
    let schema = registry.resolve(type_name).unwrap();
    let frames: Vec<Frame> = values
        .iter()
        .map(|value| {
            let mut message = registry.new_instance(&schema);
            message.set_str(field, *value).unwrap();
            Frame::new(registry.encode(&message))
        })
        .collect();
    frame::encode(&frames)
}

/// Decodes a framed body back into messages of one type.
pub fn unframe(type_name: &str, body: &[u8]) -> Vec<NamedMessage> {
    let registry = registry();
    let schema = registry.resolve(type_name).unwrap();
    frame::decode(Bytes::copy_from_slice(body))
        .unwrap()
        .into_iter()
        .map(|f| registry.decode(&schema, f.into_payload()).unwrap())
        .collect()
}

pub fn request_headers(method: &str) -> ProcessingRequest {
    let header = |key: &str, value: &str| HeaderValue {
        key: key.to_string(),
        raw_value: value.as_bytes().to_vec().into(),
        ..Default::default()
    };
    ProcessingRequest {
        request: Some(processing_request::Request::RequestHeaders(HttpHeaders {
            headers: Some(HeaderMap {
                headers: vec![
                    header(":authority", "grpc.domain.com"),
                    header(":path", "/echo.EchoServer/SayHelloUnary"),
                    header(":method", method),
                    header("content-type", "application/grpc"),
                ],
            }),
            end_of_stream: false,
            ..Default::default()
        })),
        ..Default::default()
    }
}

pub fn response_headers() -> ProcessingRequest {
    ProcessingRequest {
        request: Some(processing_request::Request::ResponseHeaders(HttpHeaders {
            headers: Some(HeaderMap {
                headers: vec![HeaderValue {
                    key: ":status".to_string(),
                    value: "200".to_string(),
                    ..Default::default()
                }],
            }),
            end_of_stream: false,
            ..Default::default()
        })),
        ..Default::default()
    }
}

pub fn request_body(body: &[u8], end_of_stream: bool) -> ProcessingRequest {
    ProcessingRequest {
        request: Some(processing_request::Request::RequestBody(HttpBody {
            body: body.to_vec().into(),
            end_of_stream,
            ..Default::default()
        })),
        ..Default::default()
    }
}

pub fn response_body(body: &[u8], end_of_stream: bool) -> ProcessingRequest {
    ProcessingRequest {
        request: Some(processing_request::Request::ResponseBody(HttpBody {
            body: body.to_vec().into(),
            end_of_stream,
            ..Default::default()
        })),
        ..Default::default()
    }
}

/// Replacement body carried by a response, if any.
pub fn body_mutation(response: &ProcessingResponse) -> Option<Vec<u8>> {
    let body = match response.response.as_ref()? {
        processing_response::Response::RequestBody(body)
        | processing_response::Response::ResponseBody(body) => body,
        _ => return None,
    };
    match body.response.as_ref()?.body_mutation.as_ref()?.mutation.as_ref()? {
        body_mutation::Mutation::Body(bytes) => Some(bytes.to_vec()),
        _ => None,
    }
}
