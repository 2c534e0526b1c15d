//! The Stream Loop: reads JSON envelopes from an input byte stream,
//! manages the connection lifecycle, dispatches each item, and writes
//! one JSON response per well-formed input item.
//!
//! States: `NEED_ITEM → HAVE_ITEM → NEED_CONNECTION → DISPATCH → EMIT →
//! NEED_ITEM`, terminal `EOF`. The state machine is flattened into the
//! loop body below rather than reified as an enum — each iteration
//! passes through every state in order, so the control flow already
//! documents the transitions.

use std::io::{Read, Write};

use serde::de::{Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_json::Value;
use tracing::{info, warn};

use crate::backend::StorageBackend;
use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::dispatcher;
use crate::environment::Environment;
use crate::errors::{ExecutorError, ExecutorResult};
use crate::model::Envelope;

/// A JSON value parsed with duplicate object keys rejected, rather than
/// silently keeping the last occurrence the way `serde_json::Map`
/// would.
struct StrictValue(Value);

impl<'de> Deserialize<'de> for StrictValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(StrictVisitor).map(StrictValue)
    }
}

struct StrictVisitor;

impl<'de> Visitor<'de> for StrictVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_bool<E>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }
    fn visit_i64<E>(self, v: i64) -> Result<Value, E> {
        Ok(Value::from(v))
    }
    fn visit_u64<E>(self, v: u64) -> Result<Value, E> {
        Ok(Value::from(v))
    }
    fn visit_f64<E>(self, v: f64) -> Result<Value, E> {
        Ok(Value::from(v))
    }
    fn visit_str<E>(self, v: &str) -> Result<Value, E> {
        Ok(Value::from(v))
    }
    fn visit_string<E>(self, v: String) -> Result<Value, E> {
        Ok(Value::from(v))
    }
    fn visit_unit<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }
    fn visit_none<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }
    fn visit_some<D>(self, deserializer: D) -> Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        StrictValue::deserialize(deserializer).map(|v| v.0)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut out = Vec::new();
        while let Some(item) = seq.next_element::<StrictValue>()? {
            out.push(item.0);
        }
        Ok(Value::Array(out))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut out = serde_json::Map::new();
        while let Some((key, value)) = map.next_entry::<String, StrictValue>()? {
            if out.contains_key(&key) {
                return Err(serde::de::Error::custom(format!("duplicate key {key:?}")));
            }
            out.insert(key, value.0);
        }
        Ok(Value::Object(out))
    }
}

fn attach_error(value: &mut Value, err: &ExecutorError) {
    if let Value::Object(map) = value {
        map.remove("result");
        map.insert("error".to_string(), err.to_annotation());
    }
}

/// The mandatory final summary line, logged on every exit path —
/// clean EOF and a fatal early termination alike.
fn log_stream_complete(processed: u64, errors: u64) {
    info!(processed, errors, "stream complete");
}

fn emit<W: Write>(output: &mut W, value: &Value, flush: bool) -> ExecutorResult<()> {
    serde_json::to_writer(&mut *output, value).map_err(|e| ExecutorError::Resource(format!("failed to write output: {e}")))?;
    output.write_all(b"\n")?;
    if flush {
        output.flush()?;
    }
    Ok(())
}

async fn dispatch_envelope(
    envelope: &Envelope,
    env: &Environment,
    backend: &mut dyn StorageBackend,
    config: &Config,
) -> ExecutorResult<Option<Value>> {
    let operation = envelope
        .operation
        .as_deref()
        .ok_or_else(|| ExecutorError::invalid_argument("missing operation"))?;
    let target = envelope.target.clone().unwrap_or_default();
    dispatcher::dispatch(operation, env, backend, config, &target, envelope.arguments.as_ref()).await
}

/// Runs the stream loop to completion, returning the total error count.
/// A login failure terminates the loop early, propagating the error to
/// the caller (who is expected to exit non-zero); every other per-item
/// failure is attached to its envelope and the loop continues. The
/// "stream complete" summary is logged on every exit path, early
/// termination included — it is what a log-watching caller relies on to
/// know the run actually finished, not just that it stopped.
pub async fn run<R, W>(
    input: R,
    mut output: W,
    config: &Config,
    env: &Environment,
    mut new_backend: impl FnMut() -> Box<dyn StorageBackend>,
) -> ExecutorResult<u64>
where
    R: Read,
    W: Write,
{
    let mut errors: u64 = 0;
    let mut processed: u64 = 0;
    let mut conn = ConnectionManager::new(config.max_connect_time);

    let mut stream = serde_json::Deserializer::from_reader(input).into_iter::<StrictValue>();

    loop {
        let item = match stream.next() {
            None => break,
            Some(Ok(v)) => v.0,
            Some(Err(e)) => {
                warn!("malformed JSON in input stream: {e}");
                errors += 1;
                continue;
            }
        };

        if !item.is_object() {
            warn!("skipping non-object top-level item");
            errors += 1;
            continue;
        }
        processed += 1;

        if config.dry_run {
            match serde_json::from_value::<Envelope>(item.clone()) {
                Ok(envelope) => emit(&mut output, &serde_json::to_value(&envelope).unwrap(), config.flush)?,
                Err(e) => {
                    errors += 1;
                    warn!("invalid envelope shape: {e}");
                }
            }
            continue;
        }

        let backend = match conn.ensure_open(env, &mut new_backend).await {
            Ok(backend) => backend,
            Err(e) => {
                log_stream_complete(processed, errors);
                return Err(e);
            }
        };

        let envelope: Envelope = match serde_json::from_value(item.clone()) {
            Ok(e) => e,
            Err(e) => {
                errors += 1;
                warn!("invalid envelope shape: {e}");
                let mut out = item;
                attach_error(&mut out, &ExecutorError::invalid_argument(e.to_string()));
                emit(&mut output, &out, config.flush)?;
                conn.recycle_if_stale().await?;
                continue;
            }
        };

        match dispatch_envelope(&envelope, env, backend, config).await {
            Ok(Some(value)) => {
                if envelope.operation.is_some() && envelope.target.is_some() {
                    let mut out = serde_json::to_value(&envelope).unwrap();
                    out["result"] = value;
                    emit(&mut output, &out, config.flush)?;
                } else {
                    emit(&mut output, &value, config.flush)?;
                }
            }
            Ok(None) => {
                let out = serde_json::to_value(&envelope).unwrap();
                emit(&mut output, &out, config.flush)?;
            }
            Err(e) => {
                errors += 1;
                warn!("item failed: {e}");
                let mut out = serde_json::to_value(&envelope).unwrap();
                attach_error(&mut out, &e);
                emit(&mut output, &out, config.flush)?;
            }
        }

        conn.recycle_if_stale().await?;
    }

    conn.close().await?;
    log_stream_complete(processed, errors);
    Ok(errors)
}
