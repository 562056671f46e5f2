use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const VIEW_STATE_ATTR: &str = "viewState";

/// Map viewport carried by map nodes and by the `view_state` mark.
///
/// Keys the codec does not know about are kept in `extra` so that a payload
/// written by a newer widget survives a parse/render cycle untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub longitude: f64,
    pub latitude: f64,
    #[serde(default = "default_zoom")]
    pub zoom: f64,
    #[serde(default)]
    pub pitch: f64,
    #[serde(default)]
    pub bearing: f64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_zoom() -> f64 {
    2.0
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            longitude: 0.0,
            latitude: 0.0,
            zoom: default_zoom(),
            pitch: 0.0,
            bearing: 0.0,
            extra: BTreeMap::new(),
        }
    }
}

impl ViewState {
    pub fn new(longitude: f64, latitude: f64, zoom: f64) -> Self {
        Self {
            longitude,
            latitude,
            zoom,
            ..Self::default()
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let state: ViewState = serde_json::from_value(value.clone()).ok()?;
        state.is_finite().then_some(state)
    }

    pub fn from_json_str(raw: &str) -> Option<Self> {
        let state: ViewState = serde_json::from_str(raw).ok()?;
        state.is_finite().then_some(state)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn is_finite(&self) -> bool {
        [
            self.longitude,
            self.latitude,
            self.zoom,
            self.pitch,
            self.bearing,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// How one declared attribute travels between a node/mark and a string
/// attribute of a markup element.
///
/// `decode` and `encode` never fail loudly: `decode` returns `None` and the
/// caller substitutes the declared default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrCodec {
    Text,
    Integer,
    Json,
    ViewState,
}

impl AttrCodec {
    pub fn decode(self, raw: &str) -> Option<Value> {
        match self {
            AttrCodec::Text => Some(Value::String(raw.to_string())),
            AttrCodec::Integer => raw.trim().parse::<i64>().ok().map(Value::from),
            AttrCodec::Json => serde_json::from_str(raw).ok(),
            AttrCodec::ViewState => ViewState::from_json_str(raw).map(|s| s.to_value()),
        }
    }

    pub fn encode(self, value: &Value) -> Option<String> {
        match (self, value) {
            (_, Value::Null) => None,
            (AttrCodec::Text, Value::String(s)) => Some(s.clone()),
            (AttrCodec::Text, other) => Some(other.to_string()),
            (AttrCodec::Integer, Value::Number(n)) => Some(n.to_string()),
            (AttrCodec::Integer, Value::String(s)) => Some(s.clone()),
            (AttrCodec::Integer, _) => None,
            (AttrCodec::Json, other) => serde_json::to_string(other).ok(),
            (AttrCodec::ViewState, other) => {
                // Older payloads stored the viewport as an already-encoded string.
                let state = match other {
                    Value::String(s) => ViewState::from_json_str(s)?,
                    other => ViewState::from_value(other)?,
                };
                serde_json::to_string(&state).ok()
            }
        }
    }

    /// Brings an in-memory value to the shape `decode` would have produced,
    /// so attribute maps compare equal regardless of how a value was written.
    pub fn canonicalize(self, value: &Value) -> Option<Value> {
        if value.is_null() {
            return Some(Value::Null);
        }
        match self {
            AttrCodec::Text => match value {
                Value::String(_) => Some(value.clone()),
                other => Some(Value::String(other.to_string())),
            },
            AttrCodec::Integer => match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                    .map(Value::from),
                Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
                _ => None,
            },
            AttrCodec::Json => Some(value.clone()),
            AttrCodec::ViewState => {
                let raw = self.encode(value)?;
                self.decode(&raw)
            }
        }
    }
}
