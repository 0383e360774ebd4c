use bytes::Bytes;
use envoy_types::pb::envoy::config::core::v3::HeaderMap;
use envoy_types::pb::envoy::service::ext_proc::v3::{processing_request, ProcessingRequest};

/// Header list in arrival order. Keys may repeat.
pub type Headers = Vec<(String, String)>;

/// Which half of the HTTP exchange an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Request,
    Response,
}

/// One message received from the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingEvent {
    RequestHeaders { headers: Headers, end_of_stream: bool },
    RequestBody { body: Bytes, end_of_stream: bool },
    ResponseHeaders { headers: Headers, end_of_stream: bool },
    ResponseBody { body: Bytes, end_of_stream: bool },
}

impl ProcessingEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessingEvent::RequestHeaders { .. } => "request_headers",
            ProcessingEvent::RequestBody { .. } => "request_body",
            ProcessingEvent::ResponseHeaders { .. } => "response_headers",
            ProcessingEvent::ResponseBody { .. } => "response_body",
        }
    }

    pub fn side(&self) -> Side {
        match self {
            ProcessingEvent::RequestHeaders { .. } | ProcessingEvent::RequestBody { .. } => {
                Side::Request
            }
            ProcessingEvent::ResponseHeaders { .. } | ProcessingEvent::ResponseBody { .. } => {
                Side::Response
            }
        }
    }

    /// Maps the Envoy envelope onto the four modelled phases. Trailers and an
    /// empty oneof have no counterpart and come back as `None`.
    pub fn from_request(request: ProcessingRequest) -> Option<Self> {
        match request.request? {
            processing_request::Request::RequestHeaders(h) => Some(ProcessingEvent::RequestHeaders {
                headers: header_list(h.headers),
                end_of_stream: h.end_of_stream,
            }),
            processing_request::Request::ResponseHeaders(h) => {
                Some(ProcessingEvent::ResponseHeaders {
                    headers: header_list(h.headers),
                    end_of_stream: h.end_of_stream,
                })
            }
            processing_request::Request::RequestBody(b) => Some(ProcessingEvent::RequestBody {
                body: Bytes::from(b.body),
                end_of_stream: b.end_of_stream,
            }),
            processing_request::Request::ResponseBody(b) => Some(ProcessingEvent::ResponseBody {
                body: Bytes::from(b.body),
                end_of_stream: b.end_of_stream,
            }),
            other => {
                log::debug!("Ignoring unmodelled request kind: {:?}", other);
                None
            }
        }
    }
}

/// Flattens an Envoy header map. Newer proxies only fill `raw_value`.
pub fn header_list(header_map: Option<HeaderMap>) -> Headers {
    header_map
        .map(|map| {
            map.headers
                .into_iter()
                .map(|header| {
                    let value = if header.value.is_empty() {
                        String::from_utf8_lossy(&header.raw_value).into_owned()
                    } else {
                        header.value
                    };
                    (header.key, value)
                })
                .collect()
        })
        .unwrap_or_default()
}
