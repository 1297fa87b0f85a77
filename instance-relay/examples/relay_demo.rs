use instance_relay::only_single_instance;
use instance_relay::split_line;
use instance_relay::BridgeRequest;
use instance_relay::ChannelBridge;
use instance_relay::Config;
use instance_relay::Launch;
use std::sync::mpsc::channel;
use std::sync::Mutex;

enum DemoMessage {
    Bridge(BridgeRequest),
    Exit,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("instance_relay=trace"),
    )
    .init();

    let config = Config::new("org.example.RelayDemo");

    let primary = match only_single_instance(config, std::env::args())? {
        Launch::Primary(primary) => primary,
        Launch::Secondary(outcome) => {
            println!("✗ Another instance is already running");
            println!("  Forwarded arguments: {:?}", outcome);
            return Ok(());
        }
    };

    println!("✓ This is the primary instance ({})", primary.identity());
    println!("  Launch the demo again, with or without arguments.");
    println!("  Press Ctrl+C to exit.\n");

    let (tx, rx) = channel::<DemoMessage>();
    let exit_tx = Mutex::new(tx.clone());
    ctrlc::set_handler(move || {
        let _ = exit_tx.lock().unwrap().send(DemoMessage::Exit);
    })?;

    // This thread plays the role of the GUI thread
    let bridge_tx = Mutex::new(tx);
    primary.install_bridge(ChannelBridge::new(move |req| {
        let _ = bridge_tx.lock().unwrap().send(DemoMessage::Bridge(req));
    }));

    for message in rx {
        match message {
            DemoMessage::Bridge(BridgeRequest::BringToFront) => {
                println!("⚡ Secondary launched without arguments, raising the window");
            }
            DemoMessage::Bridge(BridgeRequest::DeliverArguments(line)) => {
                let args = split_line(&line);
                println!("⚡ Arguments from {}: {:?}", args[0], &args[1..]);
            }
            DemoMessage::Exit => break,
        }
    }

    primary.release();
    Ok(())
}
