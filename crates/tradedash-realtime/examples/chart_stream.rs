/*
[INPUT]:  Dashboard WebSocket URL (first argument, defaults to ws://localhost:3001)
[OUTPUT]: Chart candles and connection state changes printed to stdout
[POS]:    Examples - realtime chart stream
[UPDATE]: When the RealtimeClient API changes
*/

use tokio::time::{Duration, sleep};
use tradedash_realtime::*;

/// Example: follow BTCUSDT 1m candles for 30 seconds
#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Trading Dashboard Chart Stream ===\n");

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| RealtimeConfig::default().url);
    let client = RealtimeClient::new(RealtimeConfig::with_url(url))?;
    println!("✓ Client created for {}", client.config().url);

    let mut states = client.subscribe_connection_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            println!("  state: {:?}", *states.borrow_and_update());
        }
    });

    client.on_connection_failed(|payload| println!("✗ gave up: {payload}"));
    let _chart = client.subscribe_to_chart("BTCUSDT", "1m", |update| {
        println!(
            "  {} {} t={} close={}",
            update.symbol, update.interval, update.candle.time, update.candle.close
        );
    });

    match client.connect().await {
        Ok(()) => println!("✓ Connected\n"),
        Err(err) => println!("✗ First attempt failed ({err}); retrying in the background\n"),
    }

    sleep(Duration::from_secs(30)).await;
    client.disconnect();
    println!("\n✓ Chart stream example complete");
    Ok(())
}
