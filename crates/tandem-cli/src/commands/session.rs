//! Session administration commands.

use anyhow::{anyhow, Context};
use chrono::{DateTime, Local, Utc};
use serde_json::Value;

use tandem_core::error::format_error_with_suggestion;
use tandem_session::{RecordInspection, SessionBackend, SessionError};

use crate::AppContext;

/// Format a datetime for display.
fn format_time(dt: &DateTime<Utc>) -> String {
    let local: DateTime<Local> = dt.with_timezone(&Local);
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}

async fn open_backend(ctx: &AppContext) -> anyhow::Result<SessionBackend> {
    match SessionBackend::from_config(&ctx.config).await {
        Ok(backend) => Ok(backend),
        Err(SessionError::Config(e)) => Err(anyhow!(format_error_with_suggestion(&e))),
        Err(e) => Err(e).context("Failed to open session stores"),
    }
}

/// Parse a CLI value as JSON, falling back to a plain string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn format_inspection_json(inspection: &RecordInspection) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(inspection)?)
}

fn format_inspection(inspection: &RecordInspection) -> anyhow::Result<String> {
    let record = &inspection.record;
    let status = if inspection.expired { "expired" } else { "live" };
    let mut out = format!(
        "Session {}\n  Status:  {}\n  Expires: {}\n",
        record.key,
        status,
        format_time(&record.expire_date)
    );

    match (&inspection.payload, &inspection.decode_error) {
        (Some(payload), _) => {
            out.push_str("  Payload:\n");
            for line in serde_json::to_string_pretty(payload)?.lines() {
                out.push_str(&format!("    {}\n", line));
            }
        }
        (None, Some(error)) => {
            out.push_str(&format!("  Payload: unreadable ({})\n", error));
        }
        (None, None) => {}
    }

    Ok(out)
}

pub async fn create(ctx: &AppContext) -> anyhow::Result<()> {
    let backend = open_backend(ctx).await?;
    let mut session = backend.session(None);
    session.create().await?;

    if let Some(key) = session.key() {
        println!("{}", key);
    }
    Ok(())
}

pub async fn show(ctx: &AppContext, key: &str, json: bool) -> anyhow::Result<()> {
    let backend = open_backend(ctx).await?;
    match backend.inspect(key).await? {
        Some(inspection) if json => println!("{}", format_inspection_json(&inspection)?),
        Some(inspection) => print!("{}", format_inspection(&inspection)?),
        None if json => println!("null"),
        None => println!("Session not found: {}", key),
    }
    Ok(())
}

pub async fn set(ctx: &AppContext, key: &str, field: &str, value: &str) -> anyhow::Result<()> {
    let backend = open_backend(ctx).await?;
    let mut session = backend.session(Some(key));
    session.insert(field, parse_value(value)).await?;
    session.save(false).await?;

    match session.key() {
        Some(saved) if saved.as_str() == key => println!("Updated session {}", saved),
        Some(saved) => {
            println!("Session {} was missing or expired; saved as new session {}", key, saved)
        }
        None => {}
    }
    Ok(())
}

pub async fn delete(ctx: &AppContext, key: &str) -> anyhow::Result<()> {
    let backend = open_backend(ctx).await?;
    let existed = backend.exists(key).await?;
    backend.session(None).delete(Some(key)).await?;

    if existed {
        println!("Deleted session {}", key);
    } else {
        println!("Session not found: {} (cache entry cleared)", key);
    }
    Ok(())
}

pub async fn exists(ctx: &AppContext, key: &str) -> anyhow::Result<()> {
    let backend = open_backend(ctx).await?;
    println!("{}", backend.exists(key).await?);
    Ok(())
}

pub async fn clear_expired(ctx: &AppContext) -> anyhow::Result<()> {
    let backend = open_backend(ctx).await?;
    let removed = backend.clear_expired().await?;
    println!("Removed {} expired session(s)", removed);
    Ok(())
}
