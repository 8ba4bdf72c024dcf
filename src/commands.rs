//! Command execution.

use crate::Commands;
use colored::Colorize;
use serde::de::DeserializeOwned;
use serde::Serialize;
use streammgr_client::{Client, ServerInfo};
use streammgr_protocol::{
    ExportDefinition, Message, MessageStreamDefinition, MessageStreamInfo, ReadMessagesOptions,
};

/// Executes a command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl => unreachable!(),

        Commands::Info => match client.server_info() {
            Some(info) => Ok(format_server_info(&info)),
            None => Ok("not connected".yellow().to_string()),
        },

        Commands::List => {
            let streams = client.list_streams().await?;
            Ok(format_streams(&streams))
        }

        Commands::Create {
            name,
            strategy,
            max_size,
            segment_size,
            ttl_ms,
            persistence,
            flush_on_write,
            export,
        } => {
            let mut definition = MessageStreamDefinition::new(&name, strategy.into());
            if let Some(size) = max_size {
                definition = definition.with_max_size(size);
            }
            if let Some(size) = segment_size {
                definition = definition.with_stream_segment_size(size);
            }
            if let Some(ttl) = ttl_ms {
                definition = definition.with_time_to_live_millis(ttl);
            }
            if let Some(persistence) = persistence {
                definition = definition.with_persistence(persistence.into());
            }
            if flush_on_write {
                definition = definition.with_flush_on_write(true);
            }
            if let Some(export) = export {
                let export: ExportDefinition = parse_json_arg(&export)?;
                definition = definition.with_export_definition(export);
            }

            client.create_message_stream(definition).await?;
            Ok(format!("{} stream {}", "Created".green(), name.cyan()))
        }

        Commands::Delete { name, if_exists } => match client.delete_message_stream(&name).await {
            Ok(()) => Ok(format!("{} stream {}", "Deleted".green(), name.cyan())),
            Err(e) if if_exists && e.is_not_found() => {
                Ok(format!("{} stream {}", "No such".yellow(), name.cyan()))
            }
            Err(e) => Err(e.into()),
        },

        Commands::Describe { name } => {
            let info = client.describe_message_stream(&name).await?;
            Ok(format_stream_info(&info))
        }

        Commands::Append { name, data } => {
            let payload = read_data_arg(&data)?;
            let seq = client.append_message(&name, payload).await?;
            Ok(format!(
                "{} to {} (sequence: {})",
                "Appended".green(),
                name.cyan(),
                seq
            ))
        }

        Commands::Read {
            name,
            from,
            min,
            max,
            wait_ms,
        } => {
            let mut options = ReadMessagesOptions::new()
                .with_min_message_count(min)
                .with_read_timeout_millis(wait_ms);
            if let Some(from) = from {
                options = options.starting_at(from);
            }
            if let Some(max) = max {
                options = options.with_max_message_count(max);
            }

            let messages = client.read_messages(&name, Some(options)).await?;
            Ok(format_messages(&messages))
        }
    }
}

/// Parses a JSON argument, or reads it from a file when prefixed with `@`.
pub fn parse_json_arg<T: DeserializeOwned>(arg: &str) -> Result<T, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(arg)?)
    }
}

/// Returns the message body for `arg`, reading a file when prefixed with `@`.
pub fn read_data_arg(arg: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    match arg.strip_prefix('@') {
        Some(path) => Ok(std::fs::read(path)?),
        None => Ok(arg.as_bytes().to_vec()),
    }
}

/// Formats a value as JSON for display.
pub fn format_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<unprintable: {}>", e))
}

pub fn format_server_info(info: &ServerInfo) -> String {
    let mut out = format!("{}\n", "Daemon".bold());
    out.push_str(&format!(
        "  server version:   {}\n",
        info.server_version.as_deref().unwrap_or("-")
    ));
    out.push_str(&format!(
        "  protocol version: {}\n",
        info.protocol_version.as_deref().unwrap_or("-")
    ));
    if !info.supported_protocol_versions.is_empty() {
        out.push_str(&format!(
            "  supported:        {}\n",
            info.supported_protocol_versions.join(", ")
        ));
    }
    out.push_str(&format!(
        "  client id:        {}",
        info.client_identifier.as_deref().unwrap_or("-")
    ));
    out
}

pub fn format_streams(streams: &[String]) -> String {
    if streams.is_empty() {
        return "No streams".dimmed().to_string();
    }

    let mut out = format!("{}\n", "Streams:".bold());
    for name in streams {
        out.push_str(&format!("  {}\n", name.cyan()));
    }
    out.trim_end().to_string()
}

pub fn format_stream_info(info: &MessageStreamInfo) -> String {
    let mut out = format!("{} {}\n", "Stream".bold(), info.definition.name.cyan());

    let status = &info.storage_status;
    match (status.oldest_sequence_number, status.newest_sequence_number) {
        (Some(oldest), Some(newest)) => out.push_str(&format!(
            "  sequence numbers: {}..={} ({} retained)\n",
            oldest,
            newest,
            info.retained_messages().unwrap_or(0)
        )),
        _ => out.push_str(&format!("  sequence numbers: {}\n", "empty".dimmed())),
    }
    if let Some(bytes) = status.total_bytes {
        out.push_str(&format!("  total bytes:      {}\n", bytes));
    }

    for export in &info.export_statuses {
        let id = export.export_config_identifier.as_deref().unwrap_or("-");
        let line = format!(
            "  export {}: last exported {}",
            id.cyan(),
            export.last_exported_sequence_number
        );
        match &export.error_message {
            Some(err) => out.push_str(&format!("{} ({})\n", line, err.red())),
            None => out.push_str(&format!("{}\n", line)),
        }
    }

    out.push_str(&format!("{}\n", "Definition:".bold()));
    out.push_str(&format_json(&info.definition));
    out
}

pub fn format_messages(messages: &[Message]) -> String {
    if messages.is_empty() {
        return "No messages".dimmed().to_string();
    }

    let mut out = String::new();
    for msg in messages {
        let seq = msg
            .sequence_number
            .map(|s| s.to_string())
            .unwrap_or_else(|| "?".to_string());
        let time = msg
            .ingest_timestamp()
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        out.push_str(&format!(
            "{} {} {}\n",
            format!("#{}", seq).yellow(),
            time.dimmed(),
            String::from_utf8_lossy(&msg.payload)
        ));
    }
    out.trim_end().to_string()
}
