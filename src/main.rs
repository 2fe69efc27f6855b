use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use murmur::integration::{AssistantConfig, AssistantEvent, OrchestratorBuilder};
use murmur::tools::files::{ListDirectoryTool, OpenFileTool};
use murmur::tools::mail::{ReadEmailsTool, SendEmailTool, UnconfiguredMailClient};
use murmur::tools::webpage::{FetchWebpageTool, HttpWebpageClient, OpenLinkTool};
use murmur::tools::{ToolCallDispatcher, ToolRegistry};

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Murmur assistant");

    let mut registry = ToolRegistry::new();
    let mail = Arc::new(UnconfiguredMailClient);
    registry.register(Arc::new(SendEmailTool::new(mail.clone())));
    registry.register(Arc::new(ReadEmailsTool::new(mail)));
    let web = Arc::new(HttpWebpageClient::new()?);
    registry.register(Arc::new(FetchWebpageTool::new(web.clone())));
    registry.register(Arc::new(OpenLinkTool::new(web)));
    registry.register(Arc::new(OpenFileTool));
    registry.register(Arc::new(ListDirectoryTool));

    let (orchestrator, handle) = OrchestratorBuilder::new()
        .with_config(AssistantConfig::default())
        .with_dispatcher(ToolCallDispatcher::new(registry))
        .build()?;
    let _workers = orchestrator.start()?;

    // Print assistant output as it streams; the GUI replaces this loop.
    let events = handle.event_receiver();
    std::thread::spawn(move || {
        for event in events.iter() {
            match event {
                AssistantEvent::AssistantToken(token) => {
                    print!("{}", token);
                    let _ = std::io::stdout().flush();
                }
                AssistantEvent::TurnComplete { .. } => println!(),
                AssistantEvent::Transcription(text) => println!("You said: {}", text),
                AssistantEvent::Error(error) => eprintln!("error: {}", error),
                AssistantEvent::Shutdown => break,
                _ => {}
            }
        }
    });

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let text = line.trim();
        match text {
            "" => continue,
            "exit" => break,
            "listen" => {
                if let Err(e) = handle.start_listening() {
                    eprintln!("error: {}", e.user_message());
                }
            }
            _ => {
                if let Err(e) = handle.send_text(text) {
                    eprintln!("error: {}", e.user_message());
                }
            }
        }
    }

    handle.shutdown();
    info!("Murmur assistant stopped");
    Ok(())
}
