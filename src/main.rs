//! remcomp - interactive client for the remote compression daemon

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::style::{Color, Stylize};
use std::io::{self, BufRead, Write};
use std::net::SocketAddr;

use remcomp::cli::ClientOpts;
use remcomp::client::{Client, CompressOutcome, Reply, UploadOutcome};
use remcomp::frame::FrameError;
use remcomp::protocol::{command as id, MAX_COMMAND_LEN};

const PROMPT: &str = "remote-compressor> ";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let opts = ClientOpts::parse();
    let addr = SocketAddr::from((opts.host, opts.port));

    println!("{}", "Connecting to server...".with(Color::Cyan));
    let mut client = Client::connect(addr)
        .with_context(|| format!("connection to {} failed (check address and port)", addr))?
        .with_progress(!opts.no_progress);

    println!(
        "{}",
        format!(" REMOTE COMPRESSOR client, v{} ", env!("CARGO_PKG_VERSION"))
            .with(Color::White)
            .on(Color::Red)
    );
    println!(
        "{} {} {} {} (worker {}).",
        "- Connected to".with(Color::Cyan),
        opts.host.to_string().with(Color::Green),
        "on port".with(Color::Cyan),
        opts.port.to_string().with(Color::Green),
        client.worker()
    );
    println!("Type {} to list the available commands.", "help".with(Color::Green));
    println!(
        "{}\n        * commands are limited to {} characters\n        * quote names containing spaces (\"..\")",
        "- NOTE:".with(Color::Cyan),
        MAX_COMMAND_LEN.to_string().with(Color::Green)
    );

    let quit = repl(&mut client)?;
    if !quit {
        eprintln!("{}", "Connection error: the server is not responding".with(Color::Red));
    }
    println!("{}", " remote-compressor client terminated. ".with(Color::White).on(Color::Red));
    Ok(())
}

/// Returns `true` on a clean `quit`, `false` when the connection dropped.
fn repl<S: io::Read + io::Write>(client: &mut Client<S>) -> Result<bool> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("{}", PROMPT.with(Color::Yellow));
        io::stdout().flush().context("flush stdout")?;
        let line = match lines.next() {
            Some(l) => l.context("read command")?,
            None => {
                // EOF on stdin behaves like quit.
                return Ok(run(client, "quit").is_ok());
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match run(client, line) {
            Ok(true) => {}
            Ok(false) => return Ok(true),
            Err(e) => {
                log::debug!("session ended: {}", e);
                return Ok(false);
            }
        }
    }
}

/// Execute and print one command. `Ok(false)` after quit.
fn run<S: io::Read + io::Write>(client: &mut Client<S>, line: &str) -> Result<bool, FrameError> {
    match client.execute(line)? {
        Reply::Message { id, text } => {
            let color = match id {
                id::UNRECOGNIZED => Color::Red,
                id::HELP => Color::Green,
                _ => Color::Cyan,
            };
            println!("{}", text.with(color));
        }
        Reply::Upload(outcomes) => {
            for o in outcomes {
                print_upload(&o);
            }
        }
        Reply::Compress(outcome) => print_compress(&outcome),
        Reply::Quit => return Ok(false),
    }
    Ok(true)
}

fn print_upload(o: &UploadOutcome) {
    match o {
        UploadOutcome::Delivered { message, .. } => println!("{}", message.as_str().with(Color::Cyan)),
        UploadOutcome::Unreadable { path } => eprintln!(
            "{} {}",
            format!("- {}:", path).with(Color::Red),
            "not a readable regular file (or larger than 4 GiB).".with(Color::Red)
        ),
        UploadOutcome::AlreadyStaged { path } => eprintln!(
            "{}",
            format!("- {}: a file with this name was already sent to the server.", path).with(Color::Red)
        ),
    }
}

fn print_compress(o: &CompressOutcome) {
    match o {
        CompressOutcome::NothingStaged => {
            eprintln!("{}", "- No files have been sent to the server.".with(Color::Red))
        }
        CompressOutcome::DestinationUnusable { dir } => eprintln!(
            "{}",
            format!("- {}: this path does not exist or is not writable.", dir).with(Color::Red)
        ),
        CompressOutcome::ServerFailed { .. } => eprintln!(
            "{}",
            "- The server could not create or access the compressed archive.".with(Color::Red)
        ),
        CompressOutcome::SaveFailed { archive, reason } => eprintln!(
            "{}",
            format!("- Could not save {} in the chosen directory: {}", archive, reason).with(Color::Red)
        ),
        CompressOutcome::Saved { path, bytes } => println!(
            "{} {} {}",
            "- Archive".with(Color::Cyan),
            path.display().to_string().with(Color::Green),
            format!("received successfully ({} bytes).", bytes).with(Color::Cyan)
        ),
    }
}
