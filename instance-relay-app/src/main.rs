use clap::Parser;
use instance_relay::BridgeRequest;
use instance_relay::ChannelBridge;
use instance_relay::Config;
use instance_relay::Launch;
use instance_relay::RetryPolicy;
use instance_relay::only_single_instance;
use log::trace;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
mod window;
use crate::window::RelayWindow;

const DEFAULT_APP_ID: &str = "org.example.InstanceRelayApp";

#[derive(Parser, Debug, Clone)]
#[command(name = "instance-relay-app")]
#[command(about = "Single window app that picks up arguments from later launches", long_about = None)]
pub(crate) struct Cli {
    /// Application identity shared by every instance that should coordinate
    #[arg(long, default_value = DEFAULT_APP_ID)]
    app_id: String,

    /// Seconds the running instance waits for a new launch to publish its
    /// arguments
    #[arg(long, default_value_t = 5)]
    connect_timeout: u64,

    /// Bind attempts when several instances are launched at once
    #[arg(long, default_value_t = 3)]
    bind_attempts: u32,

    /// Milliseconds between bind attempts
    #[arg(long, default_value_t = 2000)]
    bind_retry_delay: u64,

    /// Start with the window hidden
    #[arg(long)]
    hidden: bool,

    /// Files to open, handed to the running instance if there is one
    pub(crate) files: Vec<String>,
}

impl Cli {
    fn config(&self) -> Config {
        Config::new(self.app_id.clone())
            .with_connect_timeout(Duration::from_secs(self.connect_timeout))
            .with_retry(RetryPolicy {
                attempts: self.bind_attempts,
                delay: Duration::from_millis(self.bind_retry_delay),
                ..RetryPolicy::default()
            })
    }
}

#[derive(Debug, PartialEq, Clone)]
enum AppMessage {
    Exit,
    Show,
    Hide,
    ListFiles,
    AnotherInstance(BridgeRequest),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(debug_assertions)]
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("instance_relay_app=trace,instance_relay=trace"),
    )
    .init();

    #[cfg(not(debug_assertions))]
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("instance_relay_app=warn,instance_relay=warn"),
    )
    .init();

    let cli = Cli::parse();

    // Ensure only a single instance is running for this application id
    let primary = match only_single_instance(cli.config(), std::env::args())? {
        Launch::Primary(primary) => primary,
        Launch::Secondary(outcome) => {
            log::info!("Handed over to the running instance: {:?}", outcome);
            return Ok(());
        }
    };

    let (appmsg_sender, mut appmsgs) = tokio::sync::mpsc::unbounded_channel::<AppMessage>();

    let mut window = RelayWindow::new(!cli.hidden);
    window.handle_cmdline_params(&cli);

    // Window is up, start taking requests from other instances
    let sender_for_instances = appmsg_sender.clone();
    primary.install_bridge(ChannelBridge::new(move |req| {
        let _ = sender_for_instances.send(AppMessage::AnotherInstance(req));
    }));

    spawn_stdin_reader(appmsg_sender.clone());
    spawn_ctrl_c_listener(appmsg_sender.clone());

    while let Some(event) = appmsgs.recv().await {
        if handle_app_event(&mut window, &event) {
            break;
        }
    }

    trace!("Exiting, releasing primary instance");
    primary.release();
    Ok(())
}

/// Returns true when the app should exit
fn handle_app_event(window: &mut RelayWindow, event: &AppMessage) -> bool {
    match event {
        AppMessage::Exit => return true,
        AppMessage::Show => window.show(),
        AppMessage::Hide => window.hide(),
        AppMessage::ListFiles => window.print_files(),
        AppMessage::AnotherInstance(BridgeRequest::BringToFront) => {
            log::info!("Another instance tried to start");
            window.show();
        }
        AppMessage::AnotherInstance(BridgeRequest::DeliverArguments(line)) => {
            log::info!("Another instance forwarded: {}", line);
            window.handle_forwarded_line(line);
        }
    }
    false
}

/// Spawns a thread to read lines from stdin
fn spawn_stdin_reader(app_message_sender: UnboundedSender<AppMessage>) {
    fn print_info() {
        println!("Commands:");
        println!("Q: Exit");
        println!("S: Show window");
        println!("H: Hide window");
        println!("L: List opened files");
        println!("Type command and press Enter: ");
    }
    thread::spawn(move || {
        print_info();
        for line in std::io::stdin().lines() {
            let Ok(line) = line else {
                break;
            };
            let message = match line.trim().to_lowercase().as_str() {
                "q" => AppMessage::Exit,
                "s" => AppMessage::Show,
                "h" => AppMessage::Hide,
                "l" => AppMessage::ListFiles,
                _ => {
                    print_info();
                    continue;
                }
            };
            let exit = message == AppMessage::Exit;
            if app_message_sender.send(message).is_err() || exit {
                break;
            }
        }
    });
}

/// Turns Ctrl+C into a regular exit so the primary role is released
fn spawn_ctrl_c_listener(app_message_sender: UnboundedSender<AppMessage>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = app_message_sender.send(AppMessage::Exit);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_requests_drive_the_window() {
        let mut window = RelayWindow::new(false);

        assert!(!handle_app_event(
            &mut window,
            &AppMessage::AnotherInstance(BridgeRequest::BringToFront)
        ));
        assert!(window.is_visible());

        window.hide();
        assert!(!handle_app_event(
            &mut window,
            &AppMessage::AnotherInstance(BridgeRequest::DeliverArguments(
                "token a.txt b.txt".to_string()
            ))
        ));
        assert!(!window.is_visible());
        assert_eq!(window.files(), ["a.txt", "b.txt"]);

        assert!(handle_app_event(&mut window, &AppMessage::Exit));
    }

    #[test]
    fn cli_maps_to_config() {
        let cli = Cli::parse_from([
            "instance-relay-app",
            "--app-id",
            "com.example.Test",
            "--bind-attempts",
            "5",
            "--bind-retry-delay",
            "10",
        ]);
        let config = cli.config();
        assert_eq!(config.app_id, "com.example.Test");
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.retry.delay, Duration::from_millis(10));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn huge_bind_settings_saturate_instead_of_panicking() {
        let attempts = u32::MAX.to_string();
        let delay = u64::MAX.to_string();
        let cli = Cli::parse_from([
            "instance-relay-app",
            "--bind-attempts",
            attempts.as_str(),
            "--bind-retry-delay",
            delay.as_str(),
        ]);
        assert_eq!(cli.config().forward_timeout, Duration::MAX);
    }
}
