use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Maximum number of events the tracking script may submit in one request.
pub const MAX_BATCH_SIZE: usize = 10;

/// One client-observed occurrence (pageview, session start, CTA click, …),
/// as accepted at POST /v1/track and forwarded to the warehouse.
///
/// Constructed only by [`validate_batch`] — raw JSON never crosses the
/// validation boundary. Absent optional fields stay absent on the wire
/// (`skip_serializing_if`), so the warehouse receives exactly what the
/// tracking script sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsEvent {
    pub project_id: String,
    pub session_id: String,
    pub event_type: String,
    /// ISO-8601 timestamp as produced by the tracking script. Passed through
    /// verbatim; the warehouse is the source of truth for ordering.
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// Milliseconds of active engagement on the page (script v2).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engagement_time_ms: Option<u64>,
    /// Maximum scroll depth reached, as a fraction or percentage (script v2).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll_depth: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visitor_id: Option<String>,
    /// 0 = new visitor, 1 = returning (script v2).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_returning: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm_medium: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm_campaign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm_term: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm_content: Option<String>,
    /// Serialized JSON array of CTA click records. Stored as an opaque string;
    /// the warehouse parses it at query time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cta_clicks: Option<String>,
}

/// Why an incoming batch was rejected.
///
/// A single invalid event rejects the entire batch; there is no partial
/// acceptance within one request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("`events` must be a non-empty array")]
    MissingEvents,

    #[error("`events` must contain at least one event")]
    EmptyBatch,

    #[error("batch has {0} events (max {MAX_BATCH_SIZE})")]
    BatchTooLarge(usize),

    #[error("event {index} is not an object")]
    NotAnObject { index: usize },

    #[error("event {index}: missing required field `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("event {index}: field `{field}` must be {expected}")]
    InvalidType {
        index: usize,
        field: &'static str,
        expected: &'static str,
    },
}

/// Validate a parsed `{ "events": [...] }` request body.
///
/// Pure function of its input: no side effects, event order preserved.
/// Unknown fields are ignored so older servers keep accepting newer scripts.
pub fn validate_batch(body: &Value) -> Result<Vec<AnalyticsEvent>, ValidationError> {
    let events = body
        .get("events")
        .and_then(Value::as_array)
        .ok_or(ValidationError::MissingEvents)?;

    if events.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }
    if events.len() > MAX_BATCH_SIZE {
        return Err(ValidationError::BatchTooLarge(events.len()));
    }

    events
        .iter()
        .enumerate()
        .map(|(index, raw)| validate_event(index, raw))
        .collect()
}

fn validate_event(index: usize, raw: &Value) -> Result<AnalyticsEvent, ValidationError> {
    let obj = raw
        .as_object()
        .ok_or(ValidationError::NotAnObject { index })?;

    Ok(AnalyticsEvent {
        project_id: required_string(index, obj, "project_id")?,
        session_id: required_string(index, obj, "session_id")?,
        event_type: required_string(index, obj, "event_type")?,
        timestamp: required_string(index, obj, "timestamp")?,
        url: optional_string(index, obj, "url")?,
        path: optional_string(index, obj, "path")?,
        referrer: optional_string(index, obj, "referrer")?,
        country: optional_string(index, obj, "country")?,
        city: optional_string(index, obj, "city")?,
        engagement_time_ms: optional_u64(index, obj, "engagement_time_ms")?,
        scroll_depth: optional_f64(index, obj, "scroll_depth")?,
        visitor_id: optional_string(index, obj, "visitor_id")?,
        is_returning: optional_flag(index, obj, "is_returning")?,
        utm_source: optional_string(index, obj, "utm_source")?,
        utm_medium: optional_string(index, obj, "utm_medium")?,
        utm_campaign: optional_string(index, obj, "utm_campaign")?,
        utm_term: optional_string(index, obj, "utm_term")?,
        utm_content: optional_string(index, obj, "utm_content")?,
        cta_clicks: optional_string(index, obj, "cta_clicks")?,
    })
}

type EventObject = serde_json::Map<String, Value>;

fn required_string(
    index: usize,
    obj: &EventObject,
    field: &'static str,
) -> Result<String, ValidationError> {
    match obj.get(field) {
        None => Err(ValidationError::MissingField { index, field }),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ValidationError::InvalidType {
            index,
            field,
            expected: "a string",
        }),
    }
}

fn optional_string(
    index: usize,
    obj: &EventObject,
    field: &'static str,
) -> Result<Option<String>, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ValidationError::InvalidType {
            index,
            field,
            expected: "a string",
        }),
    }
}

fn optional_u64(
    index: usize,
    obj: &EventObject,
    field: &'static str,
) -> Result<Option<u64>, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_u64().map(Some).ok_or(ValidationError::InvalidType {
            index,
            field,
            expected: "a non-negative integer",
        }),
    }
}

fn optional_f64(
    index: usize,
    obj: &EventObject,
    field: &'static str,
) -> Result<Option<f64>, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or(ValidationError::InvalidType {
            index,
            field,
            expected: "a number",
        }),
    }
}

/// A 0/1 integer flag. Booleans and other integers are rejected — the
/// tracking script always sends the numeric form.
fn optional_flag(
    index: usize,
    obj: &EventObject,
    field: &'static str,
) -> Result<Option<u8>, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_u64() {
            Some(flag @ (0 | 1)) => Ok(Some(flag as u8)),
            _ => Err(ValidationError::InvalidType {
                index,
                field,
                expected: "0 or 1",
            }),
        },
    }
}
