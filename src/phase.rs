//! Per-stream phase state machine.
//!
//! One HTTP exchange walks the phases strictly in order:
//!
//! ```text
//! AwaitingRequestHeaders -> AwaitingRequestBody -> AwaitingResponseHeaders
//!     -> AwaitingResponseBody -> Done
//! ```
//!
//! A `:method: POST` request switches body inspection on for the whole
//! exchange. Anything else leaves every later phase untouched.

use bytes::{Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;

use crate::error::{FilterError, Result};
use crate::event::{Headers, ProcessingEvent, Side};
use crate::rewrite::{BodyRewrite, BodyRewriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingRequestHeaders,
    AwaitingRequestBody,
    AwaitingResponseHeaders,
    AwaitingResponseBody,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::AwaitingRequestHeaders => "awaiting request headers",
            Phase::AwaitingRequestBody => "awaiting request body",
            Phase::AwaitingResponseHeaders => "awaiting response headers",
            Phase::AwaitingResponseBody => "awaiting response body",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HeaderMode {
    #[default]
    Default,
    Send,
    Skip,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BodyMode {
    #[default]
    None,
    Streamed,
    Buffered,
}

/// How the proxy should deliver the phases that follow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeOverride {
    pub request_body: BodyMode,
    pub response_header: HeaderMode,
    pub response_body: BodyMode,
}

/// What to tell the proxy about the event just handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Response with no phase-specific payload.
    Empty,
    ContinueHeaders(Side),
    /// Body phase acknowledged without a mutation.
    ContinueBody(Side),
    ReplaceBody(Side, Bytes),
}

/// One response, built fresh for every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub reply: Reply,
    pub mode_override: Option<ModeOverride>,
}

impl Decision {
    pub fn empty() -> Self {
        Decision {
            reply: Reply::Empty,
            mode_override: None,
        }
    }

    fn new(reply: Reply, mode_override: Option<ModeOverride>) -> Self {
        Decision {
            reply,
            mode_override,
        }
    }
}

/// State owned by the worker of a single stream.
pub struct StreamSession {
    phase: Phase,
    inspect: bool,
    body: BytesMut,
    rewriter: Arc<BodyRewriter>,
}

impl StreamSession {
    pub fn new(rewriter: Arc<BodyRewriter>) -> Self {
        StreamSession {
            phase: Phase::AwaitingRequestHeaders,
            inspect: false,
            body: BytesMut::new(),
            rewriter,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether bodies of this exchange are being decoded.
    pub fn inspecting(&self) -> bool {
        self.inspect
    }

    /// Feeds one event through the machine. Errors are fatal to the stream;
    /// out-of-order events are not errors and come back as an empty decision.
    pub fn advance(&mut self, event: ProcessingEvent) -> Result<Decision> {
        log::debug!(
            "Phase '{}' received {} ({:?} side)",
            self.phase,
            event.kind(),
            event.side()
        );

        match (self.phase, event) {
            (
                Phase::AwaitingRequestHeaders,
                ProcessingEvent::RequestHeaders {
                    headers,
                    end_of_stream,
                },
            ) => Ok(self.on_request_headers(&headers, end_of_stream)),
            (Phase::AwaitingRequestBody, ProcessingEvent::RequestBody { body, end_of_stream }) => {
                self.on_request_body(body, end_of_stream)
            }
            (
                Phase::AwaitingResponseHeaders,
                ProcessingEvent::ResponseHeaders { end_of_stream, .. },
            ) => {
                self.phase = if end_of_stream {
                    Phase::Done
                } else {
                    Phase::AwaitingResponseBody
                };
                Ok(Decision::new(
                    Reply::ContinueHeaders(Side::Response),
                    Some(ModeOverride {
                        response_body: BodyMode::Buffered,
                        ..Default::default()
                    }),
                ))
            }
            (
                Phase::AwaitingResponseBody,
                ProcessingEvent::ResponseBody {
                    body,
                    end_of_stream,
                },
            ) => self.on_response_body(body, end_of_stream),
            (phase, event) => {
                let err = FilterError::UnexpectedEvent {
                    phase: phase.to_string(),
                    event: event.kind(),
                };
                log::warn!("{}; passing through", err);
                Ok(Decision::empty())
            }
        }
    }

    fn on_request_headers(&mut self, headers: &Headers, end_of_stream: bool) -> Decision {
        for (key, value) in headers {
            log::trace!("Request header {}: {}", key, value);
        }
        self.inspect = headers
            .iter()
            .any(|(key, value)| key == ":method" && value == "POST");
        self.phase = if end_of_stream {
            Phase::AwaitingResponseHeaders
        } else {
            Phase::AwaitingRequestBody
        };

        if !self.inspect {
            log::debug!("Not a POST request, leaving the exchange untouched");
            return Decision::empty();
        }
        Decision::new(
            Reply::ContinueHeaders(Side::Request),
            Some(ModeOverride {
                request_body: BodyMode::Buffered,
                response_header: HeaderMode::Skip,
                response_body: BodyMode::None,
            }),
        )
    }

    fn on_request_body(&mut self, chunk: Bytes, end_of_stream: bool) -> Result<Decision> {
        if !self.inspect {
            if end_of_stream {
                self.phase = Phase::AwaitingResponseHeaders;
            }
            return Ok(Decision::new(Reply::ContinueBody(Side::Request), None));
        }

        let Some(body) = self.accumulate(chunk, end_of_stream) else {
            return Ok(Decision::empty());
        };
        let reply = match self.rewriter.rewrite_request(body)? {
            BodyRewrite::Replaced(bytes) => {
                log::info!("Replacing request body ({} bytes)", bytes.len());
                Reply::ReplaceBody(Side::Request, bytes)
            }
            BodyRewrite::Unchanged => Reply::ContinueBody(Side::Request),
        };
        self.phase = Phase::AwaitingResponseHeaders;
        Ok(Decision::new(
            reply,
            Some(ModeOverride {
                response_header: HeaderMode::Send,
                response_body: BodyMode::None,
                ..Default::default()
            }),
        ))
    }

    fn on_response_body(&mut self, chunk: Bytes, end_of_stream: bool) -> Result<Decision> {
        if !self.inspect {
            if end_of_stream {
                self.phase = Phase::Done;
            }
            return Ok(Decision::new(Reply::ContinueBody(Side::Response), None));
        }

        let Some(body) = self.accumulate(chunk, end_of_stream) else {
            return Ok(Decision::empty());
        };
        let decision = match self.rewriter.rewrite_response(body)? {
            BodyRewrite::Replaced(bytes) => {
                log::info!("Replacing response body ({} bytes)", bytes.len());
                Decision::new(Reply::ReplaceBody(Side::Response, bytes), None)
            }
            BodyRewrite::Unchanged => Decision::empty(),
        };
        self.phase = Phase::Done;
        Ok(decision)
    }

    /// Buffers a body chunk. Hands back the whole body on the last chunk.
    fn accumulate(&mut self, chunk: Bytes, end_of_stream: bool) -> Option<Bytes> {
        if !end_of_stream {
            log::trace!("Buffering {} body bytes", chunk.len());
            self.body.extend_from_slice(&chunk);
            return None;
        }
        if self.body.is_empty() {
            return Some(chunk);
        }
        self.body.extend_from_slice(&chunk);
        Some(self.body.split().freeze())
    }
}
