//! OpenAI-compatible chat completions (OpenAI, DeepSeek, Mistral, xAI,
//! Perplexity)

use super::content::{render, with_acknowledgements, SegmentBody, ACKNOWLEDGEMENT};
use crate::channel::{ChannelRequest, RunResult, Turn};
use crate::error::GatewayError;
use serde_json::{json, Value};

fn native(mime: &str) -> bool {
    mime.starts_with("image/")
}

fn user_content(turn: &Turn, native_files: bool) -> Value {
    let Some(segment) = &turn.segment else {
        return Value::String(turn.text.clone());
    };

    let mut parts = vec![match render(segment, native_files, native) {
        SegmentBody::Attachment { mime_type, data } => json!({
            "type": "image_url",
            "image_url": {"url": format!("data:{mime_type};base64,{data}")},
        }),
        SegmentBody::Text(text) => json!({"type": "text", "text": text}),
    }];
    if !turn.text.is_empty() {
        parts.push(json!({"type": "text", "text": turn.text}));
    }
    Value::Array(parts)
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
    let message = &body["choices"][0]["message"];
    if message.is_null() {
        return Err(GatewayError::MalformedResponse {
            provider: provider.to_string(),
            message: "missing choices[0].message".to_string(),
        });
    }
    Ok(RunResult {
        text: message["content"].as_str().unwrap_or_default().to_string(),
        model_used: body["model"].as_str().unwrap_or_default().to_string(),
        input_tokens: body["usage"]["prompt_tokens"].as_u64(),
        output_tokens: body["usage"]["completion_tokens"].as_u64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterpreterConfig;
    use ecrvp_corpus::{seal, ArchitecturalStatus, CorpusEntry, PassportMetadata, SegmentPlan};

    #[test]
    fn text_only_turn_is_plain_string() {
        let turn = Turn { text: "hello".into(), segment: None };
        assert_eq!(user_content(&turn, true), json!("hello"));
    }

    #[test]
    fn text_provider_gets_fenced_file() {
        let corpus = seal(
            PassportMetadata::new("p", ArchitecturalStatus::Open, "v1"),
            CorpusEntry::in_order(vec![("A.md", b"alpha".to_vec())]),
        )
        .unwrap();
        let plan = SegmentPlan::build(&corpus, 64).unwrap();
        let turn = Turn {
            text: "next".into(),
            segment: Some(plan.segments()[0].clone()),
        };
        let content = user_content(&turn, false);
        assert_eq!(content[0]["text"], "--- File: A.md ---\nalpha\n--- End: A.md ---");
        assert_eq!(content[1]["text"], "next");

        let config = InterpreterConfig::new("deepseek", "deepseek-chat", "DS");
        let body = request_body(
            &ChannelRequest { config: &config, credential: None, turns: &[turn] },
            false,
        );
        assert_eq!(body["model"], "deepseek-chat");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn parses_choice_and_usage() {
        let body = json!({
            "model": "gpt-4o-2024",
            "choices": [{"message": {"role": "assistant", "content": "done"}}],
            "usage": {"prompt_tokens": 7, "completion_tokens": 1}
        });
        let result = parse_response("openai", &body).unwrap();
        assert_eq!(result.text, "done");
        assert_eq!(result.model_used, "gpt-4o-2024");
        assert_eq!(result.output_tokens, Some(1));
    }
}
