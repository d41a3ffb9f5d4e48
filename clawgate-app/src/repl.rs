//! Interactive loop that talks to the gateway through the message bus.

use anyhow::Result;
use clawgate_bus::{InboundMessage, MessageBus};
use clawgate_core::{Role, SessionRegistry};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

pub const REPL_TRANSPORT: &str = "cli";
pub const REPL_CHAT_ID: &str = "local";

pub struct Repl {
    bus: MessageBus,
    registry: Arc<SessionRegistry>,
}

impl Repl {
    pub fn new(bus: MessageBus, registry: Arc<SessionRegistry>) -> Self {
        Self { bus, registry }
    }

    fn session_key(&self) -> String {
        InboundMessage::new(REPL_TRANSPORT, REPL_CHAT_ID, "").session_key()
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        println!("╔══════════════════════════════════════════════════════════════════╗");
        println!("║              Clawgate REPL                                       ║");
        println!("║  Commands: exit, status, history, clear, help                    ║");
        println!("╚══════════════════════════════════════════════════════════════════╝");
        println!();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            print!("claw> ");
            std::io::stdout().flush()?;

            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                break; // EOF
            };
            let input = line.trim();

            if input.is_empty() {
                continue;
            }

            match input {
                "exit" | "quit" => {
                    println!("👋 Goodbye!");
                    break;
                }
                "help" => {
                    println!("\n📖 Available Commands:");
                    println!("  exit, quit  - Exit the REPL");
                    println!("  help        - Show this help message");
                    println!("  status      - Show session status");
                    println!("  history     - Show this conversation's transcript");
                    println!("  clear       - Forget the transcript and clear the screen");
                    println!("\n💡 Anything else is sent as a prompt\n");
                    continue;
                }
                "status" => {
                    self.print_status();
                    continue;
                }
                "history" => {
                    self.print_history();
                    continue;
                }
                "clear" => {
                    if let Some(session) = self.registry.session(&self.session_key()) {
                        session.clear_transcript();
                    }
                    print!("\x1B[2J\x1B[1;1H");
                    continue;
                }
                _ => {}
            }

            let message = InboundMessage::new(REPL_TRANSPORT, REPL_CHAT_ID, input);
            if !self.bus.publish_inbound(cancel, message).await {
                break;
            }

            let reply = match self.bus.subscribe_outbound(cancel).await {
                Ok(reply) => reply,
                Err(_) => break,
            };
            match reply.error {
                Some(error) => eprintln!("❌ Error: {}\n", error),
                None => println!("\n{}\n", reply.content),
            }
        }

        Ok(())
    }

    fn print_status(&self) {
        let key = self.session_key();
        println!("\n📊 Session Status:");
        println!("  Conversation: {}", key);
        println!("  Backend: {}", self.registry.backend_name());
        match self.registry.session(&key) {
            Some(session) => {
                println!("  Handle: {}", session.handle().unwrap_or_default());
                println!("  Model: {}", session.options().model);
                println!("  Agent: {}", session.options().agent);
                if session.heartbeat_enabled() {
                    let state = if session.heartbeat_running() { "running" } else { "halted" };
                    println!("  Heartbeat: {} ({} queued)", state, session.pending_len());
                }
                println!("  Turns: {}", session.transcript().len());
            }
            None => println!("  Status: not started"),
        }
        let metrics = self.registry.metrics().snapshot();
        println!(
            "  Prompts: {} ({:.0}% ok)",
            metrics.prompts,
            metrics.prompt_success_rate() * 100.0
        );
        println!();
    }

    fn print_history(&self) {
        let entries = self
            .registry
            .session(&self.session_key())
            .map(|session| session.transcript())
            .unwrap_or_default();

        if entries.is_empty() {
            println!("\n(no history)\n");
            return;
        }
        println!();
        for entry in entries {
            let who = match entry.role {
                Role::User => "you",
                Role::Assistant => "agent",
            };
            println!("[{}] {}: {}", entry.timestamp.format("%H:%M:%S"), who, entry.text);
        }
        println!();
    }
}
