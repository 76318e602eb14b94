//! Interactive operator console.
//!
//! A plain numbered menu on stdin/stdout, one entry per simulator command.
//! Operator-facing output goes straight to stdout; diagnostics still go
//! through tracing like everywhere else.

use std::io::Write as _;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use super::{CommandError, Simulator};

type InputLines = Lines<BufReader<Stdin>>;

const MENU: &str = "\
Commands:
  1 start       start the listener
  2 stop        stop the listener and close all sessions
  3 list        list connected clients
  4 send        send a message to a bound client
  5 messages    list received messages
  6 reload      reload the users file
  7 log         toggle per-pdu logging
  8 exit        stop everything and quit
";

/// Drive the console until the operator exits or stdin closes.
pub async fn run(sim: &mut Simulator) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{MENU}");

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match line.trim() {
            "" => {}
            "1" | "start" => match sim.start().await {
                Ok(addr) => println!("listening on {addr}"),
                Err(e) => println!("{e}"),
            },
            "2" | "stop" => report(sim.stop().await.map(|()| "stopped".to_string())),
            "3" | "list" => list_clients(sim).await,
            "4" | "send" => send_message(sim, &mut lines).await?,
            "5" | "messages" => message_list(sim),
            "6" | "reload" => report(
                sim.reload_users()
                    .map(|count| format!("{count} user(s) loaded")),
            ),
            "7" | "log" => report(
                sim.toggle_logging()
                    .await
                    .map(|on| format!("pdu logging {}", if on { "on" } else { "off" })),
            ),
            "8" | "exit" | "quit" => {
                if sim.is_running() {
                    let _ = sim.stop().await;
                }
                println!("bye");
                break;
            }
            "menu" | "help" | "?" => println!("{MENU}"),
            other => println!("unknown command: {other} (try 'help')"),
        }
    }

    Ok(())
}

fn report(result: Result<String, CommandError>) {
    match result {
        Ok(message) => println!("{message}"),
        Err(e) => println!("{e}"),
    }
}

async fn list_clients(sim: &Simulator) {
    match sim.list_clients().await {
        Ok(clients) if clients.is_empty() => println!("no clients connected"),
        Ok(clients) => {
            for (i, client) in clients.iter().enumerate() {
                println!(
                    "{:3}  {:<16}  {:?}{}",
                    i + 1,
                    client.system_id.as_deref().unwrap_or("(unbound)"),
                    client.state,
                    if client.active { "" } else { "  inactive" },
                );
            }
        }
        Err(e) => println!("{e}"),
    }
}

fn message_list(sim: &Simulator) {
    match sim.message_list() {
        Ok(messages) if messages.is_empty() => println!("no messages received"),
        Ok(messages) => {
            for message in messages {
                println!("{message}");
            }
        }
        Err(e) => println!("{e}"),
    }
}

async fn send_message(sim: &Simulator, lines: &mut InputLines) -> std::io::Result<()> {
    if !sim.is_running() {
        println!("{}", CommandError::NotStarted);
        return Ok(());
    }

    let Some(system_id) = prompt(lines, "client system id").await? else {
        return Ok(());
    };
    let Some(source) = prompt(lines, "source address").await? else {
        return Ok(());
    };
    let Some(dest) = prompt(lines, "destination address").await? else {
        return Ok(());
    };
    let Some(text) = prompt(lines, "message text").await? else {
        return Ok(());
    };

    match sim.send_message(&system_id, &source, &dest, &text).await {
        Ok(sequence) => println!("queued with sequence {sequence}"),
        Err(e) => println!("{e}"),
    }
    Ok(())
}

async fn prompt(lines: &mut InputLines, label: &str) -> std::io::Result<Option<String>> {
    print!("{label}: ");
    std::io::stdout().flush()?;
    Ok(lines.next_line().await?.map(|line| line.trim().to_string()))
}
