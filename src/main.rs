use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vox_router::{
    Catalog, GgufLoader, MemoryManager, NoopExecutor, Router, Transcriber,
};

/// Stdin stand-in for the speech-to-text front end: one line, one
/// transcript. EOF ends the session.
struct LineTranscriber {
    stdin: io::Stdin,
}

impl Transcriber for LineTranscriber {
    fn transcribe(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.stdin.lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let line = line.trim();
        if line.is_empty() {
            Ok(Some(String::new()))
        } else {
            Ok(Some(line.to_string()))
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut models_dir = PathBuf::from("./models");
    let mut eager = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--eager" => eager = true,
            path => models_dir = PathBuf::from(path),
        }
    }

    let catalog = Catalog::default_layout(&models_dir);
    let tick = catalog.tick;
    let router = Arc::new(Router::new(
        catalog,
        Box::new(GgufLoader::default()),
        Box::new(NoopExecutor),
    ));

    if eager {
        info!("eager startup requested, loading every model");
        router.load_all()?;
    }

    let manager = MemoryManager::spawn(Arc::clone(&router), tick)?;

    info!(models_dir = %models_dir.display(), "ready, waiting for transcripts");
    let mut transcriber = LineTranscriber { stdin: io::stdin() };
    let stdout = io::stdout();
    loop {
        print!("> ");
        stdout.lock().flush()?;
        let Some(transcript) = transcriber.transcribe()? else {
            break;
        };
        if transcript.is_empty() {
            continue;
        }
        match router.process(&transcript) {
            Ok(response) => println!("{}", response.text),
            Err(e) => warn!(error = %e, "request failed"),
        }
    }

    manager.shutdown();
    info!("shutting down");
    Ok(())
}
