/*
[INPUT]:  Public WebSocket endpoint and one candle subscription
[OUTPUT]: Printed candle closes for a short streaming window
[POS]:    Examples - streaming client usage
[UPDATE]: When the client API changes
*/

use std::time::Duration;

use bitget_stream_adapter::{
    BitgetWsClient, InboundMessage, SubscribeKey, SubscriptionRegistry, WsConfig,
};

/// Example: stream 1-minute BTCUSDT candles for 30 seconds
#[tokio::main]
async fn main() {
    let config = WsConfig::public().expect("valid endpoint");
    let registry =
        SubscriptionRegistry::with_keys([SubscribeKey::candle("USDT-FUTURES", "1m", "BTCUSDT")]);

    let mut client = BitgetWsClient::new(config, registry);
    let mut payloads = client.take_receiver().expect("receiver already taken");
    client.start();

    client.wait_connected().await;
    println!("connected; streaming for 30s");

    let window = tokio::time::timeout(Duration::from_secs(30), async {
        while let Some(payload) = payloads.recv().await {
            match InboundMessage::from_value(&payload) {
                Some(InboundMessage::Push(push)) => {
                    for candle in push.candles() {
                        println!(
                            "{} {} close={} volume={}",
                            push.arg, candle.ts, candle.close, candle.base_volume
                        );
                    }
                }
                Some(InboundMessage::Event(event)) => println!("event: {}", event.event),
                None => println!("raw: {payload}"),
            }
        }
    });
    let _ = window.await;

    client.close().await;
    println!("done");
}
