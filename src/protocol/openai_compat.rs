use serde_json::Value;

use super::DeltaAdapter;
use crate::stream::{ContentDelta, FinishDelta, NormalizedEvent};

/// Delta extraction for providers speaking the OpenAI chunk shape
/// (DeepSeek and `OpenAI` itself).
///
/// Only `choices[0]` is inspected. Content and finish reason are checked
/// independently, so one payload yields zero, one or two events, content
/// first. Fields are read leniently: a field of an unexpected type is
/// ignored rather than failing the whole payload, and `id`, `model` and
/// `created` are copied as raw JSON (an explicit `null` stays `null`).
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiCompatAdapter;

impl OpenAiCompatAdapter {
    pub fn extract_value(chunk: &Value, out: &mut Vec<NormalizedEvent>) {
        let Some(choice) = chunk.get("choices").and_then(|choices| choices.get(0)) else {
            return;
        };

        let content = choice
            .get("delta")
            .and_then(|delta| delta.get("content"))
            .and_then(Value::as_str)
            .filter(|content| !content.is_empty());
        if let Some(content) = content {
            out.push(NormalizedEvent::Content(ContentDelta {
                content: content.to_owned(),
                id: chunk.get("id").cloned(),
                model: chunk.get("model").cloned(),
                created: chunk.get("created").cloned(),
            }));
        }

        if let Some(finish_reason) = choice.get("finish_reason").and_then(finish_reason_text) {
            out.push(NormalizedEvent::Finish(FinishDelta {
                finish_reason,
                id: chunk.get("id").cloned(),
            }));
        }
    }
}

fn finish_reason_text(reason: &Value) -> Option<String> {
    match reason {
        Value::Null => None,
        Value::String(reason) => Some(reason.clone()),
        other => Some(other.to_string()),
    }
}

impl DeltaAdapter for OpenAiCompatAdapter {
    fn name(&self) -> &'static str {
        "openai-compatible"
    }

    fn extract_deltas(
        &self,
        payload: &str,
        out: &mut Vec<NormalizedEvent>,
    ) -> Result<(), serde_json::Error> {
        let chunk: Value = serde_json::from_str(payload)?;
        Self::extract_value(&chunk, out);
        Ok(())
    }
}
