//! `conductor` command-line entry point.
//!
//! Sets up the `.conductor/` layout, previews routing decisions and runs
//! user messages through the orchestration engine.

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use conductor::core::types::StopReason;
use conductor::exit_codes;
use conductor::io::config::load_config;
use conductor::io::init::{ConductorPaths, InitOptions, init_conductor};
use conductor::io::manifest::FsManifestSource;
use conductor::io::ports::Ports;
use conductor::io::provider::CommandAgentRunner;
use conductor::io::session::FsSessionStore;
use conductor::io::skills::FsSkillInstaller;
use conductor::io::workspace_fs::LocalFs;
use conductor::logging;
use conductor::run::{OrchestrationRunResult, RunOptions, route_message, run_agent};

#[derive(Parser)]
#[command(name = "conductor", version, about = "Multi-agent orchestration engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.conductor/` with config and the orchestrator agent.
    Init {
        /// Overwrite existing config and orchestrator manifest.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the routing decision for a message as JSON.
    Route {
        /// Entry agent id.
        agent: String,
        message: String,
    },
    /// Route and run a message, writing a trace to `.conductor/runs/`.
    Run {
        /// Entry agent id (defaults to the configured orchestrator).
        #[arg(short, long)]
        agent: Option<String>,
        /// Session key to continue.
        #[arg(long)]
        session: Option<String>,
        /// Start a fresh session.
        #[arg(long, conflicts_with = "no_session")]
        new_session: bool,
        /// Run without conversational history.
        #[arg(long)]
        no_session: bool,
        /// Suppress live agent output; print only the final message.
        #[arg(short, long)]
        quiet: bool,
        message: String,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    match dispatch(cli.command) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn dispatch(command: Command) -> Result<i32> {
    let root = Path::new(".");
    match command {
        Command::Init { force } => {
            let paths = init_conductor(root, &InitOptions { force })?;
            eprintln!("initialized {}", paths.state_dir.display());
            Ok(exit_codes::OK)
        }
        Command::Route { agent, message } => {
            let paths = ConductorPaths::new(root);
            let decision = route_message(&paths, &FsManifestSource, &agent, &message)?;
            let payload =
                serde_json::to_string_pretty(&decision).context("serialize routing decision")?;
            println!("{payload}");
            Ok(exit_codes::OK)
        }
        Command::Run {
            agent,
            session,
            new_session,
            no_session,
            quiet,
            message,
        } => {
            let paths = ConductorPaths::new(root);
            let config = load_config(&paths.config_path)?;
            let entry = agent.unwrap_or_else(|| config.orchestrator_agent_id.clone());

            let runner = CommandAgentRunner::new(config.clone());
            let sessions = FsSessionStore::new(config.session_max_messages);
            let ports = Ports {
                agents: &runner,
                sessions: &sessions,
                manifests: &FsManifestSource,
                skills: &FsSkillInstaller,
                fs: &LocalFs,
            };
            let result = run_agent(
                &paths,
                &ports,
                &entry,
                &RunOptions {
                    message: &message,
                    session_ref: session.as_deref(),
                    force_new_session: new_session,
                    disable_session: no_session,
                    silent: quiet,
                },
            )?;
            report(&result, quiet);
            Ok(exit_code(&result))
        }
    }
}

fn report(result: &OrchestrationRunResult, quiet: bool) {
    // Direct turns already streamed their output unless quiet.
    if quiet || result.orchestration.is_some() {
        let text = result.execution.stdout.trim_end();
        if !text.is_empty() {
            println!("{text}");
        }
    }
    if !result.execution.stderr.trim().is_empty() {
        eprintln!("{}", result.execution.stderr.trim_end());
    }
    eprintln!("trace: {}", result.trace_path);
}

fn exit_code(result: &OrchestrationRunResult) -> i32 {
    let stopped = result
        .orchestration
        .as_ref()
        .is_some_and(|trace| trace.stop_reason != StopReason::Finished);
    if stopped {
        exit_codes::STOPPED
    } else if result.execution.succeeded() {
        exit_codes::OK
    } else {
        exit_codes::AGENT_FAILED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::parse_from(["conductor", "init"]);
        assert!(matches!(cli.command, Command::Init { force: false }));
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["conductor", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_route() {
        let cli = Cli::parse_from(["conductor", "route", "orchestrator", "hello"]);
        match cli.command {
            Command::Route { agent, message } => {
                assert_eq!(agent, "orchestrator");
                assert_eq!(message, "hello");
            }
            _ => panic!("expected route"),
        }
    }

    #[test]
    fn parse_run_flags() {
        let cli = Cli::parse_from([
            "conductor",
            "run",
            "--agent",
            "writer",
            "--session",
            "drafts",
            "--new-session",
            "-q",
            "write it",
        ]);
        match cli.command {
            Command::Run {
                agent,
                session,
                new_session,
                no_session,
                quiet,
                message,
            } => {
                assert_eq!(agent.as_deref(), Some("writer"));
                assert_eq!(session.as_deref(), Some("drafts"));
                assert!(new_session);
                assert!(!no_session);
                assert!(quiet);
                assert_eq!(message, "write it");
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn new_session_conflicts_with_no_session() {
        let parsed =
            Cli::try_parse_from(["conductor", "run", "--new-session", "--no-session", "hi"]);
        assert!(parsed.is_err());
    }
}
