//! Ollama `/api/chat`

use super::content::{base64, fenced, with_acknowledgements, ACKNOWLEDGEMENT};
use crate::channel::{ChannelRequest, RunResult, Turn};
use crate::error::GatewayError;
use serde_json::{json, Value};

fn user_message(turn: &Turn) -> Value {
    let Some(segment) = &turn.segment else {
        return json!({"role": "user", "content": turn.text});
    };
    if segment.mime_type.starts_with("image/") {
        return json!({"role": "user", "content": turn.text, "images": [base64(segment)]});
    }
    let content = if turn.text.is_empty() {
        fenced(segment)
    } else {
        format!("{}\n\n{}", fenced(segment), turn.text)
    };
    json!({"role": "user", "content": content})
}

pub(crate) fn request_body(request: &ChannelRequest<'_>) -> Value {
    let mut messages = Vec::new();
    for (turn, ack) in with_acknowledgements(request.turns) {
        messages.push(user_message(turn));
        if ack {
            messages.push(json!({"role": "assistant", "content": ACKNOWLEDGEMENT}));
        }
    }
    json!({
        "model": request.config.model,
        "messages": messages,
        "stream": false,
        "options": {
            "temperature": request.config.temperature,
            "num_predict": request.config.max_tokens,
        },
    })
}

pub(crate) fn parse_response(provider: &str, model: &str, body: &Value) -> Result<RunResult, GatewayError> {
    let text = body["message"]["content"]
        .as_str()
        .ok_or_else(|| GatewayError::MalformedResponse {
            provider: provider.to_string(),
            message: "missing message.content".to_string(),
        })?;
    Ok(RunResult {
        text: text.to_string(),
        model_used: body["model"].as_str().unwrap_or(model).to_string(),
        input_tokens: body["prompt_eval_count"].as_u64(),
        output_tokens: body["eval_count"].as_u64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterpreterConfig;

    #[test]
    fn body_disables_streaming() {
        let config = InterpreterConfig::new("ollama", "llama3.1:8b", "Llama").with_max_tokens(512);
        let turns = [Turn { text: "hi".into(), segment: None }];
        let body = request_body(&ChannelRequest {
            config: &config,
            credential: None,
            turns: &turns,
        });
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 512);
    }

    #[test]
    fn parses_counts() {
        let body = json!({"message": {"content": "x"}, "prompt_eval_count": 3, "eval_count": 1});
        let result = parse_response("ollama", "llama3.1:8b", &body).unwrap();
        assert_eq!(result.model_used, "llama3.1:8b");
        assert_eq!(result.input_tokens, Some(3));
    }
}
