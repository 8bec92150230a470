//! Normalization of raw streaming envelopes.
//!
//! Providers do not agree on the shape of a streamed unit. Some yield the
//! chunk object itself, others wrap it in an array or an outer object. Every
//! raw unit is reduced here to a [`ChunkUnit`] before the session state
//! machine looks at it; anything without a recognizable choice is `Empty`.

use serde::Deserialize;
use serde_json::Value;

use crate::api::ChatResponse;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkUnit {
    Delta(String),
    Finish(String),
    DeltaWithFinish { delta: String, finish: String },
    Empty,
}

impl ChunkUnit {
    pub fn delta(&self) -> Option<&str> {
        match self {
            ChunkUnit::Delta(delta) | ChunkUnit::DeltaWithFinish { delta, .. } => Some(delta),
            _ => None,
        }
    }

    pub fn finish_reason(&self) -> Option<&str> {
        match self {
            ChunkUnit::Finish(finish) | ChunkUnit::DeltaWithFinish { finish, .. } => Some(finish),
            _ => None,
        }
    }
}

fn carries_choices(value: &Value) -> bool {
    value.as_object().is_some_and(|map| map.contains_key("choices"))
}

/// Finds the object holding `choices`: the envelope itself, or one level down
/// inside an array or wrapper object.
fn find_choice_carrier(envelope: &Value) -> Option<&Value> {
    if carries_choices(envelope) {
        return Some(envelope);
    }
    match envelope {
        Value::Array(items) => items.iter().find(|item| carries_choices(item)),
        Value::Object(map) => map.values().find(|item| carries_choices(item)),
        _ => None,
    }
}

pub fn normalize_envelope(envelope: &Value) -> ChunkUnit {
    let Some(carrier) = find_choice_carrier(envelope) else {
        return ChunkUnit::Empty;
    };
    let Ok(response) = ChatResponse::deserialize(carrier) else {
        return ChunkUnit::Empty;
    };
    let Some(choice) = response.choices.into_iter().next() else {
        return ChunkUnit::Empty;
    };

    let delta = choice
        .delta
        .and_then(|delta| delta.content)
        .filter(|content| !content.is_empty());
    let finish = choice.finish_reason.filter(|reason| !reason.is_empty());

    match (delta, finish) {
        (Some(delta), Some(finish)) => ChunkUnit::DeltaWithFinish { delta, finish },
        (Some(delta), None) => ChunkUnit::Delta(delta),
        (None, Some(finish)) => ChunkUnit::Finish(finish),
        (None, None) => ChunkUnit::Empty,
    }
}
