use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use council_client::api::{CouncilApi, HttpCouncilApi};
use council_client::config::ClientConfig;
use council_client::models::tally;
use council_client::service::{ChatController, InitMode, TurnOutcome, TurnStep};

const HELP: &str = "Commands: /new, /open <id>, /list, /budget <text>, /timeline <text>, \
                    /constraints <text>, /image <path>, /help, /quit. Anything else is sent to the council.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Logs go to stderr so the transcript on stdout stays readable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "council_client=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from_env().context("Invalid COUNCIL_* configuration")?;
    let mode = parse_mode(std::env::args().skip(1))?;
    info!("Using council API at {}", config.api_base_url);

    let api = HttpCouncilApi::new(&config);
    let mut controller = ChatController::new(api, config.organization.clone());
    let mut printer = Printer::default();

    controller.initialize(mode).await;
    printer.refresh(&controller);
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Command::parse(&line) {
            Command::Quit => break,
            Command::Help => println!("{HELP}"),
            Command::New => {
                controller.initialize(InitMode::NewConversation).await;
                printer = Printer::default();
                printer.refresh(&controller);
            }
            Command::Open(id) => {
                controller.initialize(InitMode::Resume(Some(id))).await;
                printer = Printer::default();
                printer.refresh(&controller);
            }
            Command::List => {
                let conversations = controller.conversations().await;
                if conversations.is_empty() {
                    println!("No conversations yet");
                }
                for conv in conversations {
                    println!("{}  {}", conv.id, conv.display_title());
                }
            }
            Command::Budget(text) => controller.context_mut().budget = text,
            Command::Timeline(text) => controller.context_mut().timeline = text,
            Command::Constraints(text) => controller.context_mut().constraints = text,
            Command::Image(path) => match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    controller.attach_image(&bytes);
                    println!("Attached {path} to the next message");
                }
                Err(e) => warn!("Could not read image {path}: {e}"),
            },
            Command::Say(text) => run_turn(&mut controller, &mut printer, &text).await,
        }
    }

    Ok(())
}

async fn run_turn<A: CouncilApi>(controller: &mut ChatController<A>, printer: &mut Printer, text: &str) {
    let mut turn = match controller.submit(text).await {
        Ok(Some(turn)) => turn,
        Ok(None) => return,
        Err(e) => {
            printer.refresh(controller);
            if e.is_auth() {
                eprintln!("The server rejected the credential; check COUNCIL_ACCESS_TOKEN.");
            }
            return;
        }
    };
    printer.refresh(controller);

    loop {
        let step = controller.next_event(&mut turn).await;
        printer.refresh(controller);
        if let TurnStep::Finished(outcome) = step {
            if let TurnOutcome::Aborted(reason) = outcome {
                warn!("Turn ended early: {reason}");
            }
            break;
        }
    }
}

fn parse_mode(mut args: impl Iterator<Item = String>) -> anyhow::Result<InitMode> {
    match args.next().as_deref() {
        None => Ok(InitMode::Resume(None)),
        Some("--new") => Ok(InitMode::NewConversation),
        Some("--id") => match args.next() {
            Some(id) => Ok(InitMode::Resume(Some(id))),
            None => bail!("--id needs a conversation id"),
        },
        Some(other) => bail!("Unknown argument '{other}' (expected --new or --id <id>)"),
    }
}

#[derive(Debug, PartialEq)]
enum Command {
    Say(String),
    New,
    Open(String),
    List,
    Budget(String),
    Timeline(String),
    Constraints(String),
    Image(String),
    Help,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Say(line.to_string());
        };
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim().to_string()),
            None => (rest, String::new()),
        };
        match name {
            "new" => Command::New,
            "open" if !arg.is_empty() => Command::Open(arg),
            "list" => Command::List,
            "budget" => Command::Budget(arg),
            "timeline" => Command::Timeline(arg),
            "constraints" => Command::Constraints(arg),
            "image" if !arg.is_empty() => Command::Image(arg),
            "quit" | "exit" => Command::Quit,
            _ => Command::Help,
        }
    }
}

/// Prints whatever changed in the session since the last refresh.
#[derive(Default)]
struct Printer {
    printed: usize,
    phase: Option<String>,
    votes_shown: bool,
    link: Option<String>,
}

impl Printer {
    fn refresh<A: CouncilApi>(&mut self, controller: &ChatController<A>) {
        let session = controller.session();

        let link = controller.identity().deep_link();
        if self.link.as_deref() != Some(link.as_str()) {
            if !link.is_empty() {
                println!("[link] {link}");
            }
            self.link = Some(link);
        }

        if self.phase.as_deref() != Some(session.phase.as_str()) {
            if self.phase.is_some() {
                println!("== {} ==", session.phase);
            }
            self.phase = Some(session.phase.clone());
        }

        let messages = session.messages();
        self.printed = self.printed.min(messages.len());
        for msg in &messages[self.printed..] {
            if msg.is_placeholder {
                break;
            }
            match msg.confidence {
                Some(confidence) => println!("[{}] ({confidence}%) {}", msg.speaker(), msg.content),
                None => println!("[{}] {}", msg.speaker(), msg.content),
            }
            self.printed += 1;
        }

        match &session.votes {
            Some(votes) if !self.votes_shown => {
                println!("== Votes ==");
                for count in tally(votes) {
                    println!("  {} x{} ({:?})", count.decision, count.count, count.bucket);
                }
                for vote in votes {
                    println!("  {} ({}): {} - {}", vote.agent, vote.persona, vote.decision, vote.reason);
                }
                self.votes_shown = true;
            }
            None => self.votes_shown = false,
            _ => {}
        }
    }
}
