//! v0-stream - send one chat turn and stream the reply
//!
//! Usage: `v0-stream [--chat <id>] <message...>`

use clap::Parser;
use std::process::ExitCode;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use v0_stream::{ClientConfig, HttpClient, RequestOptions, SessionUpdate, StreamSession};

/// Send one chat turn and stream the reply
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Follow up on an existing chat instead of starting a new one
    #[arg(long)]
    chat: Option<String>,
    /// Message to send
    #[arg(required = true, num_args = 1..)]
    message: Vec<String>,
}

impl Args {
    fn message(&self) -> Result<String, String> {
        let message = self.message.join(" ");
        if message.trim().is_empty() {
            return Err("Message must not be blank".to_string());
        }
        Ok(message)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logs go to stderr; the reply goes to stdout
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "v0_stream=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            tracing::error!(error = %message, "v0-stream failed");
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), String> {
    let message = args.message()?;

    let config = ClientConfig::from_env();
    if config.api_key.is_none() {
        tracing::warn!("No API key configured. Set V0_API_KEY.");
    }
    let context = config.session_context();
    let client = HttpClient::new(config).map_err(|e| e.to_string())?;
    let mut session = StreamSession::new(context, client.clone(), client.clone());

    let session_updates = session.subscribe();
    let printer = tokio::spawn(async move {
        let mut updates = BroadcastStream::new(session_updates);
        while let Some(update) = updates.next().await {
            match update {
                Ok(SessionUpdate::View(view)) => {
                    tracing::info!(preview = %view.preview, streaming = view.streaming, "View updated");
                }
                Ok(SessionUpdate::Error { message }) => {
                    tracing::warn!(error = %message, "Session error");
                }
                Err(lagged) => tracing::debug!(error = %lagged, "Skipped view updates"),
            }
        }
    });

    let options = RequestOptions::default();
    let handle = if let Some(chat_id) = &args.chat {
        session.load(chat_id).await.map_err(|e| e.to_string())?;
        let request = client.follow_up_request(chat_id, &message, &options);
        session.follow_up(request, &message).await
    } else {
        let request = client.create_chat_request(&message, &options);
        session.start_chat(request, &message).await
    }
    .map_err(|e| e.to_string())?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });

    session.run().await;
    println!("{}", session.view().detail);

    // Dropping the session closes the update channel
    drop(session);
    let _ = printer.await;

    Ok(())
}
