//! Interactive REPL.

use crate::commands::{
    format_messages, format_server_info, format_stream_info, format_streams, read_data_arg,
};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use streammgr_client::{Client, Endpoint};
use streammgr_protocol::{MessageStreamDefinition, ReadMessagesOptions, StrategyOnFull};

const HISTORY_FILE: &str = ".streammgr_history";

const HELP_TEXT: &str = r#"
Available commands:
  help                                  Show this help
  info                                  Show handshake details
  reconnect                             Drop the connection and connect again

  list                                  List all streams
  create <name> [reject|overwrite] [max_size]
                                        Create a stream
  describe <name>                       Show stream definition and status
  delete <name>                         Delete a stream

  append <name> <data...>               Append a message (@file reads a file)
  read <name> [from] [min] [max] [wait_ms]
                                        Read messages

  quit, exit                            Exit the REPL
"#;

pub async fn run(client: Client, endpoint: Endpoint) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "streammgr CLI".bold().cyan());
    println!("Connecting to {}...", endpoint);

    client.connect().await?;
    println!("{}", "Connected!".green());

    // Create readline editor
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    // Load history
    let history_path = home::home_dir()
        .map(|h| h.join(HISTORY_FILE))
        .unwrap_or_else(|| HISTORY_FILE.into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "streammgr>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&client, line).await {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break, // Exit command
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);

    let _ = client.close().await;
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

async fn execute_repl_command(
    client: &Client,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let (cmd, rest) = match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (line, ""),
    };
    let cmd = cmd.to_lowercase();
    let args: Vec<&str> = rest.split_whitespace().collect();

    match cmd.as_str() {
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(None),

        "info" => Ok(Some(match client.server_info() {
            Some(info) => format_server_info(&info),
            None => "not connected".yellow().to_string(),
        })),

        "reconnect" => {
            client.reconnect().await?;
            Ok(Some("Reconnected".green().to_string()))
        }

        "list" | "ls" => {
            let streams = client.list_streams().await?;
            Ok(Some(format_streams(&streams)))
        }

        "create" => {
            let name = args.first().ok_or("usage: create <name> [reject|overwrite] [max_size]")?;
            let strategy = match args.get(1).copied() {
                None | Some("reject") => StrategyOnFull::RejectNewData,
                Some("overwrite") => StrategyOnFull::OverwriteOldestData,
                Some(other) => return Err(format!("unknown strategy '{}'", other).into()),
            };
            let mut definition = MessageStreamDefinition::new(*name, strategy);
            if let Some(size) = args.get(2) {
                definition = definition.with_max_size(size.parse()?);
            }

            client.create_message_stream(definition).await?;
            Ok(Some(format!("{} stream {}", "Created".green(), name.cyan())))
        }

        "describe" => {
            let name = args.first().ok_or("usage: describe <name>")?;
            let info = client.describe_message_stream(name).await?;
            Ok(Some(format_stream_info(&info)))
        }

        "delete" => {
            let name = args.first().ok_or("usage: delete <name>")?;
            client.delete_message_stream(name).await?;
            Ok(Some(format!("{} stream {}", "Deleted".green(), name.cyan())))
        }

        "append" => {
            let (name, data) = rest
                .split_once(char::is_whitespace)
                .ok_or("usage: append <name> <data...>")?;
            let payload = read_data_arg(data.trim())?;
            let seq = client.append_message(name, payload).await?;
            Ok(Some(format!(
                "{} to {} (sequence: {})",
                "Appended".green(),
                name.cyan(),
                seq
            )))
        }

        "read" => {
            let name = args
                .first()
                .ok_or("usage: read <name> [from] [min] [max] [wait_ms]")?;

            let mut options = ReadMessagesOptions::new();
            if let Some(from) = args.get(1) {
                options = options.starting_at(from.parse()?);
            }
            if let Some(min) = args.get(2) {
                options = options.with_min_message_count(min.parse()?);
            }
            if let Some(max) = args.get(3) {
                options = options.with_max_message_count(max.parse()?);
            }
            if let Some(wait) = args.get(4) {
                options = options.with_read_timeout_millis(wait.parse()?);
            }

            let messages = client.read_messages(name, Some(options)).await?;
            Ok(Some(format_messages(&messages)))
        }

        _ => Ok(Some(format!(
            "Unknown command: {}. Type 'help' for available commands.",
            cmd
        ))),
    }
}
