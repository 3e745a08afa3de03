use clap::{Parser, Subcommand, ValueEnum};

use crate::store::{ExportFormat, MemoryType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ClearTarget {
    Conversations,
    Memories,
}

#[derive(Debug, Subcommand)]
pub enum ProfileCommands {
    #[command(about = "List configured profiles and highlight the active profile")]
    List,
    #[command(about = "Show the active profile's resolved runtime settings")]
    Show,
}

#[derive(Debug, Subcommand)]
pub enum HistoryCommands {
    #[command(about = "Show logged messages, newest first")]
    Conversations {
        #[arg(long)]
        agent: Option<String>,
        #[arg(long = "with")]
        with_agent: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    #[command(about = "Show an agent's long-term memories")]
    Memories {
        #[arg(long)]
        agent: String,
        #[arg(long, value_enum)]
        memory_type: Option<MemoryType>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        since_secs: Option<i64>,
        #[arg(long)]
        limit: Option<usize>,
    },
    #[command(about = "Show ledger rows for a task and its subtasks")]
    Planning { task_id: String },
}

#[derive(Debug, Subcommand)]
pub enum TelemetryCommands {
    #[command(about = "Summarize telemetry events from a JSONL stream")]
    Report {
        #[arg(long)]
        path: Option<String>,
        #[arg(long, default_value_t = 5000)]
        limit: usize,
    },
}

const CLI_EXAMPLES: &str = "Examples:\n\
  agent-hub task \"Summarize recent AI trends\"\n\
  agent-hub task --improve --min-quality 0.8 --max-iterations 4 \"Draft a launch checklist\"\n\
  agent-hub plan \"Write a blog post about Rust async\"\n\
  agent-hub send --from user --to <agent-id> \"What can you do?\"\n\
  agent-hub broadcast --from user \"Status report please\"\n\
  agent-hub history conversations --agent <agent-id> --limit 10\n\
  agent-hub history memories --agent <agent-id> --memory-type thinking\n\
  agent-hub export --format text\n\
  agent-hub clear conversations --force\n\
  agent-hub serve --host 127.0.0.1 --port 8788\n\
  agent-hub --profile ci --db-url sqlite://.agent-hub/ci.db doctor\n\
  agent-hub telemetry report --limit 2000\n\
\n\
Notes:\n\
  - Every invocation starts a fresh team of research, planning, execution and critic agents.\n\
  - Conversations, memories and ledger rows persist in the SQLite database at --db-url.\n\
  - Without a subcommand the interactive shell starts; type 'help' there.";

#[derive(Debug, Parser)]
#[command(name = "agent-hub")]
#[command(about = "Multi-agent task orchestration hub with a persistent SQLite log")]
#[command(after_long_help = CLI_EXAMPLES)]
pub struct Cli {
    #[arg(long, env = "AGENT_HUB_PROFILE", default_value = "default")]
    pub profile: String,

    #[arg(long, env = "AGENT_HUB_CONFIG", default_value = ".agent-hub/config.toml")]
    pub config_path: String,

    #[arg(long, env = "AGENT_HUB_DB_URL")]
    pub db_url: Option<String>,

    #[arg(long, env = "AGENT_HUB_CACHE_TTL_SECS")]
    pub cache_ttl_secs: Option<u64>,

    #[arg(long, env = "AGENT_HUB_CACHE_SWEEP_INTERVAL_SECS")]
    pub cache_sweep_interval_secs: Option<u64>,

    #[arg(long, env = "AGENT_HUB_MIN_QUALITY")]
    pub min_quality: Option<f64>,

    #[arg(long, env = "AGENT_HUB_MAX_ITERATIONS")]
    pub max_iterations: Option<u32>,

    #[arg(long, env = "AGENT_HUB_DISPATCH_TIMEOUT_SECS")]
    pub dispatch_timeout_secs: Option<u64>,

    #[arg(long, env = "AGENT_HUB_HISTORY_LIMIT")]
    pub history_limit: Option<usize>,

    #[arg(long, env = "AGENT_HUB_SHOW_SENSITIVE_CONFIG", default_value_t = false)]
    pub show_sensitive_config: bool,

    #[arg(long, env = "AGENT_HUB_TELEMETRY_ENABLED", action = clap::ArgAction::Set)]
    pub telemetry_enabled: Option<bool>,

    #[arg(long, env = "AGENT_HUB_TELEMETRY_PATH")]
    pub telemetry_path: Option<String>,

    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Create a task, run the agent team on it and print the results")]
    Task {
        #[arg(required = true)]
        description: Vec<String>,
        #[arg(long, default_value_t = false)]
        improve: bool,
        #[arg(long)]
        min_quality: Option<f64>,
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    #[command(about = "Have the planning agent write a plan, then execute it step by step")]
    Plan {
        #[arg(required = true)]
        description: Vec<String>,
    },
    #[command(about = "Send one message to an agent and print its reply")]
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(required = true)]
        message: Vec<String>,
    },
    #[command(about = "Send a message to every agent except the sender")]
    Broadcast {
        #[arg(long)]
        from: String,
        #[arg(long)]
        exclude: Vec<String>,
        #[arg(required = true)]
        message: Vec<String>,
    },
    #[command(about = "List the registered agents")]
    Agents,
    #[command(about = "Inspect conversations, memories and ledger rows")]
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
    #[command(about = "Export logged conversations as JSON or text")]
    Export {
        #[arg(long)]
        agent: Option<String>,
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
    },
    #[command(about = "Print conversation and memory statistics")]
    Stats {
        #[arg(long)]
        agent: Option<String>,
    },
    #[command(about = "Delete logged conversations or memories (requires --force)")]
    Clear {
        #[arg(value_enum)]
        target: ClearTarget,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    #[command(about = "Run the interactive shell")]
    Interactive,
    #[command(about = "Run the HTTP API")]
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8788)]
        port: u16,
    },
    #[command(about = "Inspect profile configuration and active resolved profile state")]
    Profiles {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    #[command(about = "Validate configuration and database reachability")]
    Doctor,
    #[command(about = "Create or upgrade the database schema")]
    Migrate,
    #[command(about = "Telemetry utilities and reporting")]
    Telemetry {
        #[command(subcommand)]
        command: TelemetryCommands,
    },
}

pub fn clear_target_label(target: ClearTarget) -> &'static str {
    match target {
        ClearTarget::Conversations => "conversations",
        ClearTarget::Memories => "memories",
    }
}

pub fn command_label(command: &Commands) -> String {
    match command {
        Commands::Task { improve: true, .. } => "task.improve".to_string(),
        Commands::Task { .. } => "task".to_string(),
        Commands::Plan { .. } => "plan".to_string(),
        Commands::Send { .. } => "send".to_string(),
        Commands::Broadcast { .. } => "broadcast".to_string(),
        Commands::Agents => "agents".to_string(),
        Commands::History { command } => match command {
            HistoryCommands::Conversations { .. } => "history.conversations".to_string(),
            HistoryCommands::Memories { .. } => "history.memories".to_string(),
            HistoryCommands::Planning { .. } => "history.planning".to_string(),
        },
        Commands::Export { .. } => "export".to_string(),
        Commands::Stats { .. } => "stats".to_string(),
        Commands::Clear { target, .. } => format!("clear.{}", clear_target_label(*target)),
        Commands::Interactive => "interactive".to_string(),
        Commands::Serve { .. } => "serve".to_string(),
        Commands::Profiles { command } => match command {
            ProfileCommands::List => "profiles.list".to_string(),
            ProfileCommands::Show => "profiles.show".to_string(),
        },
        Commands::Doctor => "doctor".to_string(),
        Commands::Migrate => "migrate".to_string(),
        Commands::Telemetry { command } => match command {
            TelemetryCommands::Report { .. } => "telemetry.report".to_string(),
        },
    }
}
