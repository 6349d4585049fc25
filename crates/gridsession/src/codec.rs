//! Session codecs.
//!
//! Two representations are supported:
//!
//! - **full**: id, creation time, last-accessed time, idle interval,
//!   principal name and every attribute, in that order;
//! - **delta**: id, last-accessed time, idle interval and only the attributes
//!   changed since the last commit.
//!
//! Timestamps are stored in epoch milliseconds and intervals in whole
//! seconds. Attribute values are stored as JSON documents. Every string and
//! value is length prefixed.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SerializationError};
use crate::session::{PRINCIPAL_NAME_INDEX_NAME, Session};
use crate::value::AttributeValue;

/// Which representation is shipped to the cache on save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationStrategy {
    /// Always ship the whole session.
    #[default]
    Full,
    /// Ship only what changed when the cache already holds the session.
    Delta,
}

/// Encodes and decodes sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionCodec {
    strategy: SerializationStrategy,
}

impl SessionCodec {
    /// Create a codec whose decoded sessions track changes per `strategy`.
    pub fn new(strategy: SerializationStrategy) -> Self {
        Self { strategy }
    }

    /// Strategy of decoded sessions.
    pub fn strategy(&self) -> SerializationStrategy {
        self.strategy
    }

    /// Encode the whole session.
    pub fn encode(&self, session: &Session) -> Result<Bytes> {
        let state = session.state();
        let mut out = BytesMut::new();

        put_str(&mut out, &state.id);
        out.put_i64(state.creation_time.timestamp_millis());
        out.put_i64(state.last_accessed_time.timestamp_millis());
        out.put_i64(state.max_inactive_interval.num_seconds());

        match state.principal_name().filter(|name| !name.is_empty()) {
            Some(name) => {
                out.put_u32(name.len() as u32);
                out.put_slice(name.as_bytes());
            }
            None => out.put_u32(0),
        }

        let mut attributes = BytesMut::new();
        attributes.put_u32(state.attributes.len() as u32);
        for (name, value) in state.attributes.iter() {
            put_str(&mut attributes, name);
            put_value(&mut attributes, name, value)?;
        }
        out.put_u32(attributes.len() as u32);
        out.put(attributes);

        Ok(out.freeze())
    }

    /// Decode a whole session. The result is dirty until committed.
    pub fn decode(&self, mut input: &[u8]) -> Result<Session> {
        let id = get_string(&mut input, "session id")?;
        let creation_time = get_timestamp(&mut input, "creation time")?;
        let last_accessed_time = get_timestamp(&mut input, "last accessed time")?;
        let max_inactive_interval = get_interval(&mut input)?;

        let principal_len = get_u32(&mut input, "principal name length")? as usize;
        let principal = if principal_len > 0 {
            let bytes = get_bytes(&mut input, principal_len, "principal name")?;
            Some(
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| SerializationError::InvalidUtf8("principal name"))?,
            )
        } else {
            None
        };

        let blob_len = get_u32(&mut input, "attributes length")? as usize;
        let mut blob = get_bytes(&mut input, blob_len, "attributes")?;

        let session = Session::restore(
            id,
            creation_time,
            last_accessed_time,
            max_inactive_interval,
            self.strategy,
        )?;

        let count = get_u32(&mut blob, "attribute count")?;
        session.with_attributes(|attributes| -> Result<()> {
            for _ in 0..count {
                let name = get_string(&mut blob, "attribute name")?;
                let value = get_value(&mut blob, &name)?;
                attributes.set_attribute(name, Some(value));
            }
            if let Some(principal) = principal {
                attributes.set_attribute(PRINCIPAL_NAME_INDEX_NAME, Some(principal.into()));
            }
            Ok(())
        })?;

        Ok(session)
    }

    /// Encode only what changed since the last commit.
    pub fn encode_delta(&self, session: &Session) -> Result<Bytes> {
        let state = session.state();
        let mut out = BytesMut::new();

        put_str(&mut out, &state.id);
        out.put_i64(state.last_accessed_time.timestamp_millis());
        out.put_i64(state.max_inactive_interval.num_seconds());

        let changes = state.attributes.changed_attributes();
        out.put_u32(changes.len() as u32);
        for (name, value) in &changes {
            put_str(&mut out, name);
            match value {
                Some(value) => {
                    out.put_u8(1);
                    put_value(&mut out, name, value)?;
                }
                None => out.put_u8(0),
            }
        }

        Ok(out.freeze())
    }

    /// Apply a delta produced by [`SessionCodec::encode_delta`] to `session`.
    pub fn apply_delta(&self, session: &Session, mut input: &[u8]) -> Result<()> {
        let id = get_string(&mut input, "session id")?;
        let last_accessed_time = get_timestamp(&mut input, "last accessed time")?;
        let max_inactive_interval = get_interval(&mut input)?;

        let count = get_u32(&mut input, "change count")?;
        let mut changes = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            let name = get_string(&mut input, "attribute name")?;
            let value = match get_u8(&mut input, "value marker")? {
                0 => None,
                _ => Some(get_value(&mut input, &name)?),
            };
            changes.push((name, value));
        }

        session.set_id(id)?;
        session.set_last_accessed_time(Some(last_accessed_time));
        session.set_max_inactive_interval(max_inactive_interval);
        session.with_attributes(|attributes| attributes.apply_changes(changes));

        Ok(())
    }
}

fn put_str(out: &mut BytesMut, value: &str) {
    out.put_u32(value.len() as u32);
    out.put_slice(value.as_bytes());
}

fn put_value(out: &mut BytesMut, name: &str, value: &AttributeValue) -> Result<()> {
    let json = value
        .to_json()
        .ok_or_else(|| SerializationError::NotSerializable {
            name: name.to_string(),
            type_name: value.type_name().to_string(),
        })?;
    let encoded = serde_json::to_vec(&json).map_err(|source| SerializationError::InvalidValue {
        name: name.to_string(),
        source,
    })?;
    out.put_u32(encoded.len() as u32);
    out.put_slice(&encoded);
    Ok(())
}

fn get_u8(input: &mut &[u8], field: &'static str) -> Result<u8> {
    if input.remaining() < 1 {
        return Err(SerializationError::Truncated(field).into());
    }
    Ok(input.get_u8())
}

fn get_u32(input: &mut &[u8], field: &'static str) -> Result<u32> {
    if input.remaining() < 4 {
        return Err(SerializationError::Truncated(field).into());
    }
    Ok(input.get_u32())
}

fn get_i64(input: &mut &[u8], field: &'static str) -> Result<i64> {
    if input.remaining() < 8 {
        return Err(SerializationError::Truncated(field).into());
    }
    Ok(input.get_i64())
}

fn get_bytes<'a>(input: &mut &'a [u8], len: usize, field: &'static str) -> Result<&'a [u8]> {
    if input.len() < len {
        return Err(SerializationError::Truncated(field).into());
    }
    let (head, tail) = input.split_at(len);
    *input = tail;
    Ok(head)
}

fn get_string(input: &mut &[u8], field: &'static str) -> Result<String> {
    let len = get_u32(input, field)? as usize;
    let bytes = get_bytes(input, len, field)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| SerializationError::InvalidUtf8(field).into())
}

fn get_timestamp(input: &mut &[u8], field: &'static str) -> Result<DateTime<Utc>> {
    let millis = get_i64(input, field)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| SerializationError::TimestampOutOfRange(millis).into())
}

fn get_interval(input: &mut &[u8]) -> Result<Duration> {
    let seconds = get_i64(input, "max inactive interval")?;
    Duration::try_seconds(seconds)
        .ok_or_else(|| SerializationError::IntervalOutOfRange(seconds).into())
}

fn get_value(input: &mut &[u8], name: &str) -> Result<AttributeValue> {
    let len = get_u32(input, "attribute value length")? as usize;
    let bytes = get_bytes(input, len, "attribute value")?;
    let json: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|source| SerializationError::InvalidValue {
            name: name.to_string(),
            source,
        })?;
    Ok(AttributeValue::from(json))
}
