use std::io::{self, Write};

use clap::{CommandFactory, Parser};
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use chat_artifacts::cli::{self, Args, Command};
use chat_artifacts::preview::{describe, PreviewWriter};
use chat_artifacts::sse::Completion;
use chat_artifacts::{CancellationToken, ChatClient, Session, TurnEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(shell) = args.completions {
        let mut cmd = Args::command();
        clap_complete::generate(shell, &mut cmd, "chat-artifacts", &mut io::stdout());
        return Ok(());
    }

    let config = cli::resolve_config(&args)?;

    // stderr keeps stdout clean for the reply text
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with_writer(io::stderr)
        .init();

    let client = ChatClient::new(&config)?;
    let writer = (!args.no_preview).then(|| PreviewWriter::new(&config.preview_dir));
    let mut session = Session::new(client, writer);

    eprintln!("{}", format!("  connected to {}", config.endpoint).bright_green());

    if let Some(prompt) = &args.prompt {
        run_turn(&mut session, prompt).await;
    }
    if args.wants_repl() {
        repl(&mut session).await?;
    }
    Ok(())
}

async fn repl(session: &mut Session) -> io::Result<()> {
    eprintln!("{}", format!("  {}", cli::HELP).bright_blue());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("{} ", ">".bright_cyan().bold());
        io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match cli::parse_command(&line) {
            Command::Quit => break,
            Command::Empty => {}
            Command::Help => eprintln!("  {}", cli::HELP),
            Command::Unknown(cmd) => eprintln!("  unknown command {cmd}; {}", cli::HELP),
            Command::Reset => {
                session.conversation_mut().restart();
                eprintln!("{}", "  [conversation reset]".bright_yellow());
            }
            Command::Close => {
                session.conversation_mut().close_preview();
                eprintln!("{}", "  [preview closed]".bright_yellow());
            }
            Command::Toggle => {
                let visible = session.conversation_mut().toggle_preview();
                let state = if visible { "shown" } else { "hidden" };
                eprintln!("{}", format!("  [preview {state}]").bright_yellow());
            }
            Command::Show => match session.conversation().preview().current() {
                Some(artifact) => {
                    eprintln!("{}", format!("  -- {} --", describe(artifact)).bright_magenta());
                    println!("{}", artifact.body);
                }
                None => eprintln!("  no artifact yet"),
            },
            Command::Send(text) => run_turn(session, &text).await,
        }
    }
    Ok(())
}

/// Stream one reply to stdout. Ctrl+C aborts the reply, not the program.
async fn run_turn(session: &mut Session, text: &str) {
    let token = CancellationToken::new();
    let trigger = token.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let preview_dir = session.preview_writer().map(|w| w.dir().display().to_string());
    print!("{} ", "assistant >".bright_green().bold());
    let _ = io::stdout().flush();

    let result = session
        .send(text, Some(token), |event| match event {
            TurnEvent::Delta(delta) => {
                print!("{delta}");
                let _ = io::stdout().flush();
            }
            TurnEvent::Preview(artifact) => {
                let target = preview_dir
                    .as_deref()
                    .map(|dir| format!(" -> {dir}"))
                    .unwrap_or_default();
                eprintln!(
                    "\n{}",
                    format!("  [preview] {}{target}", describe(artifact)).bright_magenta()
                );
            }
        })
        .await;
    watcher.abort();
    println!();

    match result {
        Ok(summary) if summary.completion == Completion::Cancelled => {
            eprintln!("{}", "  [reply aborted]".bright_yellow());
        }
        Ok(summary) => tracing::debug!(?summary, "turn complete"),
        Err(err) => eprintln!("{} {}", "  error:".bright_red(), err),
    }
}
