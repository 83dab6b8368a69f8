//! REPL – Read-Eval-Print Loop for the vox memory shell.
//!
//! Supported commands:
//!   /help                                  – show this list
//!   /user [id]                             – show or switch the active user
//!   /session [id|new]                      – show, switch or start a session
//!   /say <text>                            – log a user message (bare lines do the same)
//!   /reply <text>                          – log an assistant message
//!   /promote <importance> <kind> <summary> – store a memory distilled from recent messages
//!   /recall <query>                        – memories relevant to a query
//!   /context <query>                       – memories plus recent history, as a model sees them
//!   /history [n]                           – recent messages of the session
//!   /memories                              – every memory of the active user
//!   /reindex                               – rebuild the user's index entries
//!   /clear [all]                           – delete the user's (or everyone's) memories
//!   /config                                – show the effective configuration
//!   /quit | /exit                          – gracefully exit

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;
use vox_memory::{ClearScope, IndexStatus, MemoryError, MemoryService};
use vox_types::{MemoryKind, MemoryNode, Message, Role};

use crate::config::{self, Config, IndexBackend};

/// A parsed REPL line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    User(Option<String>),
    Session(Option<String>),
    NewSession,
    Say(String),
    Reply(String),
    Promote { importance: f32, kind: MemoryKind, summary: String },
    Recall(String),
    Context(String),
    History(Option<usize>),
    Memories,
    Reindex,
    Clear { all: bool },
    Config,
    Quit,
}

/// Split off the first whitespace-delimited word.
fn next_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (s, ""),
    }
}

fn required(arg: &str, usage: &str) -> Result<String, String> {
    if arg.is_empty() { Err(format!("Usage: {usage}")) } else { Ok(arg.to_string()) }
}

fn optional(arg: &str) -> Option<String> {
    (!arg.is_empty()).then(|| arg.to_string())
}

/// Parse one non-empty, trimmed input line.
pub fn parse_command(line: &str) -> Result<Command, String> {
    if !line.starts_with('/') {
        return Ok(Command::Say(line.to_string()));
    }
    let (name, rest) = next_word(line);
    let rest = rest.trim_end();
    match name {
        "/help" => Ok(Command::Help),
        "/user" => Ok(Command::User(optional(rest))),
        "/session" if rest == "new" => Ok(Command::NewSession),
        "/session" => Ok(Command::Session(optional(rest))),
        "/say" => required(rest, "/say <text>").map(Command::Say),
        "/reply" => required(rest, "/reply <text>").map(Command::Reply),
        "/promote" => parse_promote(rest),
        "/recall" => required(rest, "/recall <query>").map(Command::Recall),
        "/context" => required(rest, "/context <query>").map(Command::Context),
        "/history" if rest.is_empty() => Ok(Command::History(None)),
        "/history" => rest
            .parse::<usize>()
            .map(|n| Command::History(Some(n)))
            .map_err(|_| format!("'{rest}' is not a message count")),
        "/memories" => Ok(Command::Memories),
        "/reindex" => Ok(Command::Reindex),
        "/clear" => match rest {
            "" => Ok(Command::Clear { all: false }),
            "all" => Ok(Command::Clear { all: true }),
            other => Err(format!("Unknown /clear scope '{other}'. Usage: /clear [all]")),
        },
        "/config" => Ok(Command::Config),
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!("Unknown command: '{other}'. Type /help for available commands.")),
    }
}

fn parse_promote(args: &str) -> Result<Command, String> {
    const USAGE: &str =
        "Usage: /promote <importance 0..1> <episodic|semantic|preference> <summary>";
    let (importance, rest) = next_word(args);
    let (kind, summary) = next_word(rest);
    if summary.is_empty() {
        return Err(USAGE.to_string());
    }
    let importance = importance
        .parse::<f32>()
        .ok()
        .filter(|i| (0.0..=1.0).contains(i))
        .ok_or_else(|| format!("Importance must be a number between 0 and 1. {USAGE}"))?;
    let kind = kind.parse::<MemoryKind>().map_err(|e| format!("{e}. {USAGE}"))?;
    Ok(Command::Promote { importance, kind, summary: summary.to_string() })
}

/// Who is talking, and in which conversation.
pub struct Session {
    pub user_id: String,
    pub session_id: String,
    /// Messages logged since the last promotion; they become its `raw_refs`.
    unpromoted: Vec<Uuid>,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: Uuid::new_v4().to_string(),
            unpromoted: Vec::new(),
        }
    }
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub async fn run(service: &MemoryService, cfg: &Config, shutdown: Arc<AtomicBool>) {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("{}: {}", "Terminal error".red(), e);
            return;
        }
    };
    let mut session = Session::new(cfg.user_id.clone());
    println!(
        "  User {} · session {}\n",
        session.user_id.bold(),
        session.session_id.dimmed()
    );

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let line = match rl.readline("vox> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line);

        let cmd = match parse_command(line) {
            Ok(cmd) => cmd,
            Err(msg) => {
                println!("{}", msg.red());
                continue;
            }
        };
        match cmd {
            Command::Quit => break,
            Command::Clear { all: true } if !confirm_wipe(&mut rl) => {
                println!("  Aborted.");
                continue;
            }
            _ => {}
        }
        if let Err(e) = execute(service, cfg, &mut session, cmd).await {
            println!("{}: {}", "Error".red(), e);
        }
    }
    println!("{}", "Goodbye.".green());
}

fn confirm_wipe(rl: &mut DefaultEditor) -> bool {
    let answer = rl.readline("  Delete ALL memories of EVERY user? Type 'yes' to confirm: ");
    matches!(answer.as_deref().map(str::trim), Ok("yes"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

pub async fn execute(
    service: &MemoryService,
    cfg: &Config,
    session: &mut Session,
    cmd: Command,
) -> Result<(), MemoryError> {
    match cmd {
        Command::Help => cmd_help(),
        Command::User(None) => println!("  User: {}", session.user_id.bold()),
        Command::User(Some(user_id)) => {
            session.user_id = user_id;
            session.unpromoted.clear();
            println!("  Switched to user {}", session.user_id.bold());
            if cfg.index_backend == IndexBackend::Memory {
                let n = service.reindex(&session.user_id).await?;
                println!("  {} memories indexed", n);
            }
        }
        Command::Session(None) => println!("  Session: {}", session.session_id.bold()),
        Command::Session(Some(session_id)) => {
            session.session_id = session_id;
            session.unpromoted.clear();
            println!("  Switched to session {}", session.session_id.bold());
        }
        Command::NewSession => {
            session.session_id = Uuid::new_v4().to_string();
            session.unpromoted.clear();
            println!("  Started session {}", session.session_id.bold());
        }
        Command::Say(text) => log_message(service, session, Role::User, &text)?,
        Command::Reply(text) => log_message(service, session, Role::Assistant, &text)?,
        Command::Promote { importance, kind, summary } => {
            let promotion = service
                .promote_memory(
                    &session.user_id,
                    &session.session_id,
                    &summary,
                    importance,
                    kind,
                    &session.unpromoted,
                )
                .await?;
            let refs = session.unpromoted.len();
            session.unpromoted.clear();
            match promotion.index {
                IndexStatus::Indexed(_) => println!(
                    "  {} Memory {} stored and indexed ({} source messages)",
                    "✓".green().bold(),
                    promotion.memory_id.to_string().dimmed(),
                    refs
                ),
                IndexStatus::BelowThreshold => println!(
                    "  {} Memory {} stored; below the promotion threshold, so it is not searchable",
                    "✓".green().bold(),
                    promotion.memory_id.to_string().dimmed()
                ),
                IndexStatus::Failed(reason) => println!(
                    "  {} Memory {} stored, not indexed: {}. Run /reindex once the index is back.",
                    "⚠".yellow().bold(),
                    promotion.memory_id.to_string().dimmed(),
                    reason
                ),
            }
        }
        Command::Recall(query) => {
            let memories = service
                .retrieve_context(&session.user_id, &session.session_id, &query)
                .await?;
            if memories.is_empty() {
                println!("  {}", "Nothing recalled.".dimmed());
            }
            memories.iter().for_each(print_memory);
        }
        Command::Context(query) => {
            let ctx = service
                .assemble_context(&session.user_id, &session.session_id, &query, cfg.history_limit)
                .await?;
            println!();
            print!("{}", ctx);
            println!();
        }
        Command::History(n) => {
            let messages = service
                .get_recent_messages(&session.session_id, n.unwrap_or(cfg.history_limit))?;
            if messages.is_empty() {
                println!("  {}", "No messages in this session.".dimmed());
            }
            messages.iter().for_each(print_message);
        }
        Command::Memories => {
            let memories = service.records().list_memory_nodes(&session.user_id)?;
            if memories.is_empty() {
                println!("  {}", "No memories stored.".dimmed());
            }
            memories.iter().for_each(print_memory);
        }
        Command::Reindex => {
            let n = service.reindex(&session.user_id).await?;
            println!("  {} {} memories indexed", "✓".green().bold(), n);
        }
        Command::Clear { all } => {
            let report = service.clear_memories((!all).then_some(session.user_id.as_str())).await?;
            let scope = match &report.scope {
                ClearScope::User(user) => format!("user {user}"),
                ClearScope::All => "all users".to_string(),
            };
            println!(
                "  {} Deleted {} memories of {}; messages kept",
                "✓".green().bold(),
                report.memory_nodes_deleted,
                scope
            );
        }
        Command::Config => {
            println!("  {}", config::config_path().display().to_string().dimmed());
            println!("{:#?}", cfg);
        }
        Command::Quit => {}
    }
    Ok(())
}

fn log_message(
    service: &MemoryService,
    session: &mut Session,
    role: Role,
    text: &str,
) -> Result<(), MemoryError> {
    let id = service.add_message(&session.user_id, &session.session_id, role, text)?;
    session.unpromoted.push(id);
    println!("  {} {}", "logged".dimmed(), id.to_string().dimmed());
    Ok(())
}

fn cmd_help() {
    println!();
    println!("{}", "vox Commands".bold().underline());
    println!("  {}  – show or switch the active user", "/user [id]".bold().cyan());
    println!("  {}  – show, switch or start a session", "/session [id|new]".bold().cyan());
    println!("  {}  – log a user message (bare lines too)", "/say <text>".bold().cyan());
    println!("  {}  – log an assistant message", "/reply <text>".bold().cyan());
    println!(
        "  {}  – store a memory",
        "/promote <importance> <episodic|semantic|preference> <summary>".bold().cyan()
    );
    println!("  {}  – memories relevant to a query", "/recall <query>".bold().cyan());
    println!("  {}  – what a model would be shown", "/context <query>".bold().cyan());
    println!("  {}  – recent messages of this session", "/history [n]".bold().cyan());
    println!("  {}  – every memory of this user", "/memories".bold().cyan());
    println!("  {}  – rebuild this user's index entries", "/reindex".bold().cyan());
    println!("  {}  – delete memories (messages are kept)", "/clear [all]".bold().cyan());
    println!("  {}  – show the configuration", "/config".bold().cyan());
    println!("  {}  – exit", "/quit  /exit".bold().cyan());
    println!();
}

fn print_memory(node: &MemoryNode) {
    println!(
        "  {} {} {} {}",
        format!("[{}]", node.kind.as_str().to_uppercase()).magenta(),
        format!("{:.2}", node.importance).yellow(),
        node.summary,
        format!("(session {})", node.session_id).dimmed()
    );
}

fn print_message(msg: &Message) {
    let role = match msg.role {
        Role::User => msg.role.as_str().cyan(),
        Role::Assistant => msg.role.as_str().green(),
        Role::System => msg.role.as_str().yellow(),
    };
    println!(
        "  {} {}: {}",
        msg.created_at.with_timezone(&chrono::Local).format("%H:%M:%S").to_string().dimmed(),
        role,
        msg.content
    );
}
