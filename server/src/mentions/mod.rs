//! Mentions
//!
//! Inbound mention webhooks: signature check, trigger detection, agent
//! pipeline and reply enqueueing.

pub mod extract;
pub mod frames;
pub mod gateway;
pub mod handlers;
pub mod signature;
pub mod types;

pub use extract::{parse_structured_output, ExtractedIntent, StructuredReply, TriggerTag};
pub use frames::{frame_embed, FramePayload, FrameStore};
pub use gateway::{Accepted, GatewaySettings, MentionGateway};
pub use signature::{require_signature, sign_payload, verify_signature, SignatureError};
pub use types::{AckResponse, AckStatus, GatewayError, MentionEvent};
