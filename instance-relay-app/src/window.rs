use crate::Cli;
use clap::Parser;
use instance_relay::split_line;

const PROGRAM_NAME: &str = "instance-relay-app";

/// Stand-in for the application window
///
/// Only touched from the main loop, never from the watcher thread.
pub struct RelayWindow {
    visible: bool,
    files: Vec<String>,
}

impl RelayWindow {
    pub fn new(visible: bool) -> Self {
        RelayWindow {
            visible,
            files: Vec::new(),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn show(&mut self) {
        if !self.visible {
            log::trace!("Showing window");
        }
        self.visible = true;
        println!("Window is in front");
    }

    pub fn hide(&mut self) {
        log::trace!("Hiding window");
        self.visible = false;
    }

    pub fn print_files(&self) {
        if self.files.is_empty() {
            println!("No files opened.");
            return;
        }
        for (i, file) in self.files.iter().enumerate() {
            println!("{:>3}: {}", i + 1, file);
        }
    }

    pub fn handle_cmdline_params(&mut self, cli: &Cli) {
        for file in &cli.files {
            log::info!("Opening {}", file);
            self.files.push(file.clone());
        }
    }

    /// Parses a line forwarded by another instance with the same CLI rules.
    /// The first token is the sender's identity, not a program path.
    pub fn handle_forwarded_line(&mut self, line: &str) {
        let mut args = split_line(line);
        if args.is_empty() {
            return;
        }
        log::trace!("Forwarded by instance {}", args[0]);
        args[0] = PROGRAM_NAME.to_string();

        match Cli::try_parse_from(args) {
            Ok(cli) => self.handle_cmdline_params(&cli),
            Err(e) => log::warn!("Ignoring forwarded arguments: {}", e),
        }
    }
}
