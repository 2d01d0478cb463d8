// nearby-cli - runs a sender and a receiver over the loopback transport and
// prints both event streams as JSON lines

mod logging;

use anyhow::{bail, Result};
use nearby::{EventStream, LoopbackNetwork, LoopbackTransport, NearbyConfig, NearbyEvent, PeerSessionManager, Role};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};

const DEFAULT_PAYLOAD: &str = r#"{"x":1}"#;

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("NEARBY_LOG_FORMAT").unwrap_or_default() == "pretty" {
        logging::init_logging_pretty();
    } else {
        logging::init_logging();
    }

    let payload = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_PAYLOAD.to_string());
    let config = NearbyConfig::from_env()?;
    let deadline = config.invite_timeout;
    tracing::info!(service_type = %config.service_type, ?deadline, "Configuration loaded");

    let network = LoopbackNetwork::new();
    let transport = Arc::new(LoopbackTransport::new(Arc::clone(&network)));
    let sender = PeerSessionManager::new(
        transport.clone(),
        config.clone().with_display_name(format!("{}-sender", config.display_name)),
    );
    let receiver = PeerSessionManager::new(
        transport,
        config.clone().with_display_name(format!("{}-receiver", config.display_name)),
    );

    let mut sender_events = sender.listen().await;
    let mut receiver_events = receiver.listen().await;

    sender.start(Role::Sender).await?;
    receiver.start(Role::Receiver).await?;

    let until = Instant::now() + deadline;
    wait_for(&mut sender_events, "sender", until, |e| matches!(e, NearbyEvent::Connected { .. })).await?;
    wait_for(&mut receiver_events, "receiver", until, |e| matches!(e, NearbyEvent::Connected { .. })).await?;

    sender.send(&payload).await;
    wait_for(&mut sender_events, "sender", until, |e| matches!(e, NearbyEvent::Sent | NearbyEvent::Error { .. })).await?;
    wait_for(&mut receiver_events, "receiver", until, |e| matches!(e, NearbyEvent::Payload { .. })).await?;

    sender.stop().await;
    receiver.stop().await;
    // Give the delivery tasks a moment so the final idle/disconnected events print
    tokio::time::sleep(Duration::from_millis(50)).await;
    print_pending(&mut sender_events, "sender")?;
    print_pending(&mut receiver_events, "receiver")?;

    network.shutdown();
    tracing::info!("Done");
    Ok(())
}

fn print_event(side: &str, event: &NearbyEvent) -> Result<()> {
    let mut line = serde_json::to_value(event)?;
    line["side"] = serde_json::Value::String(side.to_string());
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

fn print_pending(events: &mut EventStream, side: &str) -> Result<()> {
    for event in events.drain() {
        print_event(side, &event)?;
    }
    Ok(())
}

/// Print events until one matches, failing once the deadline passes
async fn wait_for<F>(events: &mut EventStream, side: &str, until: Instant, mut done: F) -> Result<()>
where
    F: FnMut(&NearbyEvent) -> bool,
{
    loop {
        let remaining = until.saturating_duration_since(Instant::now());
        match timeout(remaining, events.recv()).await {
            Ok(Some(event)) => {
                print_event(side, &event)?;
                if done(&event) {
                    return Ok(());
                }
            }
            Ok(None) => bail!("{} event stream closed", side),
            Err(_) => bail!("timed out waiting on {}", side),
        }
    }
}
