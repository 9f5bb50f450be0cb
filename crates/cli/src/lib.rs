pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use crate::commands::tasks::SubmitArgs;

#[derive(Debug, Parser)]
#[command(
    name = "conductor",
    about = "Conductor operator CLI",
    long_about = "Operate the Conductor orchestrator: readiness checks, migrations, config inspection, agents and task lifecycle.",
    after_help = "Examples:\n  conductor doctor --json\n  conductor agents register agents/sales.toml\n  conductor submit --tenant acme --agent sales-bot \"look up Acme\" --run\n  conductor approve <task-id> --by maria"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, text provider, capability handlers and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(subcommand, about = "Register and inspect agents")]
    Agents(AgentsCommand),
    #[command(subcommand, about = "Inspect tasks, their transition log and audit trail")]
    Tasks(TasksCommand),
    #[command(about = "Create a task; optionally plan and run it immediately")]
    Submit {
        #[arg(long)]
        tenant: String,
        #[arg(long, help = "Default executing agent")]
        agent: String,
        #[arg(long, help = "Controller agent consulted for delegation")]
        router: Option<String>,
        #[arg(long, default_value = "operator")]
        requester: String,
        #[arg(long, help = "Plan right after creation")]
        plan: bool,
        #[arg(long, help = "Plan and run when no approval is required")]
        run: bool,
        request: String,
    },
    #[command(about = "Route and (re)plan a draft, planned or waiting task")]
    Plan { task_id: String },
    #[command(about = "Approve a task waiting for approval")]
    Approve {
        task_id: String,
        #[arg(long = "by")]
        approver: String,
    },
    #[command(about = "Run a planned task now")]
    Run { task_id: String },
    #[command(about = "Cancel a task that has not reached a terminal state")]
    Cancel {
        task_id: String,
        #[arg(long = "by", default_value = "operator")]
        actor: String,
        #[arg(long)]
        reason: Option<String>,
    },
    #[command(about = "Return a failed task to planned so the next run resumes it")]
    Retry {
        task_id: String,
        #[arg(long = "by", default_value = "operator")]
        actor: String,
    },
    #[command(about = "Run one sweep over planned and stale running tasks")]
    Sweep,
}

#[derive(Debug, Subcommand)]
enum AgentsCommand {
    #[command(about = "Create or replace an agent from a TOML profile")]
    Register { file: PathBuf },
    #[command(about = "List the agents of a tenant")]
    List {
        #[arg(long)]
        tenant: String,
    },
}

#[derive(Debug, Subcommand)]
enum TasksCommand {
    List {
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    Show {
        task_id: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Agents(AgentsCommand::Register { file }) => commands::agents::register(&file),
        Command::Agents(AgentsCommand::List { tenant }) => commands::agents::list(tenant),
        Command::Tasks(TasksCommand::List { state, tenant, limit }) => {
            commands::tasks::list(state, tenant, limit)
        }
        Command::Tasks(TasksCommand::Show { task_id }) => commands::tasks::show(task_id),
        Command::Submit { tenant, agent, router, requester, plan, run, request } => {
            commands::tasks::submit(SubmitArgs { tenant, agent, requester, router, request, plan, run })
        }
        Command::Plan { task_id } => commands::tasks::plan(task_id),
        Command::Approve { task_id, approver } => commands::tasks::approve(task_id, approver),
        Command::Run { task_id } => commands::tasks::run(task_id),
        Command::Cancel { task_id, actor, reason } => commands::tasks::cancel(task_id, actor, reason),
        Command::Retry { task_id, actor } => commands::tasks::retry(task_id, actor),
        Command::Sweep => commands::tasks::sweep(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
