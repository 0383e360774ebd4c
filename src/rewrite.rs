//! Decode → mutate → encode for one complete body.

use bytes::{Bytes, BytesMut};
use std::sync::Arc;

use crate::error::Result;
use crate::frame::{self, Frame, FrameDecoder};
use crate::policy::MutationPolicy;
use crate::registry::{MessageRegistry, MessageSchema};

/// Outcome of rewriting one body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyRewrite {
    Unchanged,
    Replaced(Bytes),
}

#[derive(Debug, Clone)]
pub struct BodyRewriter {
    policy: Arc<MutationPolicy>,
    request_schema: MessageSchema,
    response_schema: MessageSchema,
}

impl BodyRewriter {
    pub fn new(
        policy: Arc<MutationPolicy>,
        request_type: &str,
        response_type: &str,
    ) -> Result<Self> {
        let request_schema = policy.registry().resolve(request_type)?;
        let response_schema = policy.registry().resolve(response_type)?;
        Ok(BodyRewriter {
            policy,
            request_schema,
            response_schema,
        })
    }

    fn registry(&self) -> &MessageRegistry {
        self.policy.registry()
    }

    /// Request bodies: if any frame changed, every frame is re-encoded in
    /// order, changed or not.
    pub fn rewrite_request(&self, body: Bytes) -> Result<BodyRewrite> {
        let frames = frame::decode(body)?;
        let mut out = Vec::with_capacity(frames.len());
        let mut any_changed = false;

        for (index, frame) in frames.into_iter().enumerate() {
            let message = self
                .registry()
                .decode(&self.request_schema, frame.into_payload())?;
            log::debug!("Request frame {}: {}", index, message);

            let (message, changed) = self.policy.apply(message)?;
            any_changed |= changed;
            out.push(Frame::new(self.registry().encode(&message)));
        }

        if !any_changed {
            return Ok(BodyRewrite::Unchanged);
        }
        Ok(BodyRewrite::Replaced(frame::encode(&out)))
    }

    /// Response bodies: only frames that changed make it into the
    /// replacement; unchanged frames are dropped.
    pub fn rewrite_response(&self, body: Bytes) -> Result<BodyRewrite> {
        let mut out = BytesMut::new();

        for (index, frame) in FrameDecoder::new(body).enumerate() {
            let message = self
                .registry()
                .decode(&self.response_schema, frame?.into_payload())?;
            log::debug!("Response frame {}: {}", index, message);

            let (message, changed) = self.policy.apply(message)?;
            if changed {
                frame::encode_into(&Frame::new(self.registry().encode(&message)), &mut out);
            }
        }

        if out.is_empty() {
            return Ok(BodyRewrite::Unchanged);
        }
        Ok(BodyRewrite::Replaced(out.freeze()))
    }
}
