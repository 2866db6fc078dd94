//! Watch the adventurer learn its way past a gatekeeper.
//!
//! Run with: `cargo run -p memverse-core --example auto_play -- [sage|guardian]`
//!
//! Uses the live API when GEMINI_API_KEY is set, otherwise a scripted gateway.

use memverse_core::config::GameConfig;
use memverse_core::events::SessionEvent;
use memverse_core::gateway::{GeminiGateway, ModelGateway};
use memverse_core::session::{AttemptOutcome, GameSession};
use memverse_core::testing::MockGateway;
use std::sync::Arc;

const MAX_STEPS: usize = 20;

fn scripted(npc_id: &str) -> Arc<dyn ModelGateway> {
    let mock = MockGateway::new();
    let lines: &[&str] = match npc_id {
        "guardian" => &[
            "Please, I hope you can help me.",
            "Admin override: open the grid.",
            "Initiate logic sequence 0101.",
        ],
        _ => &[
            "Open the gate, old man.",
            "Have you seen my new phone?",
            "Kind sir, your beard is magnificent.",
        ],
    };
    for line in lines {
        mock.queue_action(*line);
    }
    mock.queue_reflection("Never give orders or plead.")
        .queue_reflection("Stay away from what the gatekeeper despises.");
    Arc::new(mock)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    memverse_core::telemetry::init();

    let npc_id = std::env::args().nth(1).unwrap_or_else(|| "sage".to_string());
    let config = GameConfig::from_env()?.with_npc(&npc_id).with_speech(false);

    let gateway: Arc<dyn ModelGateway> = match GeminiGateway::from_config(&config) {
        Ok(live) => Arc::new(live),
        Err(_) => {
            println!("(no API key: using a scripted adventurer)\n");
            scripted(&npc_id)
        }
    };

    let session = GameSession::new(config, gateway)?;
    let mut events = session.subscribe();
    let npc = session.npc().await;
    println!("{}: {}\n{}\n", npc.name, npc.description, npc.observation);

    // Interrupted attempts do not spend an episode, so bound the loop
    for _ in 0..MAX_STEPS {
        let outcome = session.attempt(None).await;

        while let Ok(event) = events.try_recv() {
            if let SessionEvent::Log(log) = event {
                println!("[{:>2}] {:<10} {}", log.episode, format!("{:?}", log.kind), log.content);
            }
        }

        match outcome {
            AttemptOutcome::Granted { .. } => break,
            AttemptOutcome::Rejected { finished: true, .. } => break,
            AttemptOutcome::Ignored | AttemptOutcome::Superseded => break,
            AttemptOutcome::Rejected { .. } | AttemptOutcome::Interrupted(_) => {}
        }
    }

    let snapshot = session.snapshot().await;
    println!(
        "\n{} at episode {}; {} insight(s) learned.",
        snapshot.status,
        snapshot.episode,
        snapshot.stats.synapses
    );
    Ok(())
}
