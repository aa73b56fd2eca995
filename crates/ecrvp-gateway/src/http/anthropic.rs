//! Anthropic Messages wire format

use super::content::{render, with_acknowledgements, SegmentBody, ACKNOWLEDGEMENT};
use crate::channel::{ChannelRequest, RunResult};
use crate::error::GatewayError;
use serde_json::{json, Value};

pub(crate) const API_VERSION: &str = "2023-06-01";

fn native(mime: &str) -> bool {
    mime == "application/pdf" || mime.starts_with("image/")
}

fn user_content(turn: &crate::channel::Turn, native_files: bool) -> Vec<Value> {
    let mut blocks = Vec::new();
    if let Some(segment) = &turn.segment {
        blocks.push(match render(segment, native_files, native) {
            SegmentBody::Attachment { mime_type, data } => {
                let kind = if mime_type.starts_with("image/") {
                    "image"
                } else {
                    "document"
                };
                json!({
                    "type": kind,
                    "source": {"type": "base64", "media_type": mime_type, "data": data},
                })
            }
            SegmentBody::Text(text) => json!({"type": "text", "text": text}),
        });
    }
    if !turn.text.is_empty() {
        blocks.push(json!({"type": "text", "text": turn.text}));
    }
    blocks
}

pub(crate) fn request_body(request: &ChannelRequest<'_>, native_files: bool) -> Value {
    let mut messages = Vec::new();
    for (turn, ack) in with_acknowledgements(request.turns) {
        messages.push(json!({"role": "user", "content": user_content(turn, native_files)}));
        if ack {
            messages.push(json!({"role": "assistant", "content": ACKNOWLEDGEMENT}));
        }
    }
    json!({
        "model": request.config.model,
        "max_tokens": request.config.max_tokens,
        "temperature": request.config.temperature,
        "messages": messages,
    })
}

pub(crate) fn parse_response(provider: &str, body: &Value) -> Result<RunResult, GatewayError> {
    let blocks = body["content"]
        .as_array()
        .ok_or_else(|| GatewayError::MalformedResponse {
            provider: provider.to_string(),
            message: "missing content array".to_string(),
        })?;
    let text: String = blocks
        .iter()
        .filter(|b| b["type"] == "text")
        .filter_map(|b| b["text"].as_str())
        .collect();
    Ok(RunResult {
        text,
        model_used: body["model"].as_str().unwrap_or_default().to_string(),
        input_tokens: body["usage"]["input_tokens"].as_u64(),
        output_tokens: body["usage"]["output_tokens"].as_u64(),
    })
}
