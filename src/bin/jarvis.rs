// Jarvis Engine — CLI
// Terminal front end: reads credentials from the environment, restores the
// persisted transcript, and runs a prompt loop against the engine.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::info;

use jarvis_engine::chat::ChatEngine;
use jarvis_engine::credentials::CredentialPool;
use jarvis_engine::error::EngineResult;
use jarvis_engine::gemini::GeminiFactory;
use jarvis_engine::session::SessionManager;
use jarvis_engine::storage::FileStorage;
use jarvis_engine::transcript::TranscriptStore;
use jarvis_engine::types::{GenerationParams, Sender, DEFAULT_MODEL};

#[derive(Parser)]
#[command(name = "jarvis", version, about = "Jarvis chat in the terminal")]
struct Args {
    /// Directory for the persisted transcript (default: ~/.jarvis).
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Model to talk to.
    #[arg(long, env = "JARVIS_MODEL", default_value = DEFAULT_MODEL)]
    model: String,
}

#[tokio::main]
async fn main() -> EngineResult<()> {
    env_logger::init();
    let args = Args::parse();

    let pool = CredentialPool::from_env();
    if pool.is_empty() {
        eprintln!("No credentials configured. Set GEMINI_API_KEY_1 through GEMINI_API_KEY_5.");
        std::process::exit(1);
    }
    info!("[cli] {} credential(s) configured", pool.len());

    let dir = args.storage_dir.unwrap_or_else(FileStorage::default_dir);
    let storage = FileStorage::open(dir)?;
    let transcript = TranscriptStore::load(Box::new(storage));

    let factory = Arc::new(GeminiFactory::new(args.model, GenerationParams::default()));
    let sessions = SessionManager::new(pool, factory);
    let mut engine = ChatEngine::new(sessions, transcript);

    engine.start().await?;
    println!("Jarvis online. /clear resets the transcript, /quit exits.");

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                engine.clear_transcript();
                println!("Transcript cleared.");
                continue;
            }
            _ => {}
        }

        // Print fragments as they stream in; `streamed` is what is already
        // on screen, so each callback only emits the new suffix.
        let mut streamed = String::new();
        let result = engine
            .send_message(input, None, |accumulated| {
                match accumulated.strip_prefix(streamed.as_str()) {
                    Some(delta) => print!("{delta}"),
                    None => print!("\n{accumulated}"),
                }
                streamed = accumulated.to_string();
                let _ = io::stdout().flush();
            })
            .await;

        match result {
            Ok(()) => {
                // Failover replies arrive whole, through the transcript
                // rather than the streaming callback.
                let reply = engine
                    .transcript()
                    .iter()
                    .rev()
                    .find(|m| m.sender == Sender::Assistant)
                    .map(|m| m.text.clone())
                    .unwrap_or_default();
                if reply != streamed {
                    if streamed.is_empty() {
                        print!("{reply}");
                    } else {
                        print!("\n{reply}");
                    }
                }
                println!();
            }
            Err(e) => eprintln!("error: {e}"),
        }
    }

    Ok(())
}
