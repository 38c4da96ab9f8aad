//! # Code Sage CLI (`sage`)
//!
//! The `sage` binary links GitHub repositories, indexes them into the local
//! SQLite store, answers questions about them, and serves the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! sage --config ./config/sage.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sage init` | Create the SQLite database and tables |
//! | `sage project add <name> <url>` | Link a GitHub repository |
//! | `sage project list` | List linked projects |
//! | `sage project remove <id>` | Soft-delete a project |
//! | `sage index <id>` | Summarize and embed every file of a project |
//! | `sage progress <id>` | Show indexing progress |
//! | `sage ask <id> "<question>"` | Stream a grounded answer |
//! | `sage questions <id>` | List saved questions |
//! | `sage commits <id>` | Poll and summarize new commits |
//! | `sage tree <id>` | Print the folder structure of indexed files |
//! | `sage serve` | Start the HTTP server |
//! | `sage reset --yes` | Delete every stored row |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! sage init
//!
//! # Link and index a repository
//! sage project add my-app https://github.com/acme/my-app
//! sage index 3f2a... --progress human
//!
//! # Ask in conversational mode with history
//! sage ask 3f2a... "And where is the token refreshed?" --mode chat \
//!     --history "Where is authentication handled?"
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;

use code_sage::answer::AnswerEvent;
use code_sage::app::Services;
use code_sage::config::{self, Config};
use code_sage::core::models::Question;
use code_sage::core::prompt::PromptStyle;
use code_sage::core::tree::build_folder_structure;
use code_sage::error::SageError;
use code_sage::migrate;
use code_sage::progress::ProgressMode;
use code_sage::server;

/// Code Sage CLI: index GitHub repositories and ask questions about them.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/sage.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "sage",
    about = "Code Sage: repository indexing and grounded answers about code",
    version,
    long_about = "Code Sage walks a GitHub repository, asks a language model to summarize \
    every source file, embeds the summaries, and answers questions by retrieving the most \
    similar files and streaming a grounded answer from a CLI or HTTP server."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/sage.toml`. Database, GitHub, model, embedding,
    /// and server settings are read from this file.
    #[arg(long, global = true, default_value = "./config/sage.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all tables. Safe to run more
    /// than once.
    Init,

    /// Manage linked repositories.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Index every file of a project.
    ///
    /// Walks the repository, summarizes each file with the configured model,
    /// embeds the summary, and stores both in one write. Files already
    /// indexed are skipped unless `--full` is given, in which case only
    /// files whose content changed are redone.
    Index {
        /// Project ID.
        project: String,

        /// Re-check every file and redo the ones whose content changed.
        #[arg(long)]
        full: bool,

        /// Progress on stderr: human, json, or off. Defaults to human on a TTY.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Show the stored progress of the latest indexing run.
    Progress {
        /// Project ID.
        project: String,
    },

    /// Ask a question about a project and stream the answer to stdout.
    Ask {
        /// Project ID.
        project: String,

        /// The question.
        question: String,

        /// Answer style: `qa` (single question) or `chat` (with history).
        #[arg(long, default_value = "qa")]
        mode: String,

        /// Earlier questions of the conversation, oldest first. Repeatable.
        #[arg(long = "history")]
        history: Vec<String>,

        /// Save the question, answer, and references once the stream ends.
        #[arg(long)]
        save: bool,

        /// User ID recorded with a saved question.
        #[arg(long, default_value = "cli")]
        user: String,
    },

    /// List saved questions, newest first.
    Questions {
        /// Project ID.
        project: String,
    },

    /// Fetch the newest commits and summarize the ones not seen yet.
    Commits {
        /// Project ID.
        project: String,
    },

    /// Print the folder structure of a project's indexed files.
    Tree {
        /// Project ID.
        project: String,
    },

    /// Start the HTTP server.
    Serve,

    /// Delete every row of every table.
    Reset {
        /// Confirm the reset.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Link a GitHub repository.
    Add {
        name: String,
        /// `https://github.com/<owner>/<repo>`
        repo_url: String,
        /// Access token for private repositories. Falls back to the
        /// environment variable named by `github.token_env`.
        #[arg(long)]
        token: Option<String>,
    },
    /// List live projects.
    List,
    /// Soft-delete a project.
    Remove { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("code_sage=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Project { action } => run_project(cfg, action).await?,
        Commands::Index {
            project,
            full,
            progress,
        } => {
            let mode = match progress.as_deref() {
                None => ProgressMode::default_for_tty(),
                Some(s) => match ProgressMode::parse(s) {
                    Some(mode) => mode,
                    None => bail!("Unknown progress mode: '{}'. Must be human, json, or off.", s),
                },
            };
            let services = Services::open(cfg).await?;
            let reporter = mode.reporter();
            let report = services
                .indexer(full)
                .index_project(&project, reporter.as_ref())
                .await?;
            println!("index {}", project);
            println!("  discovered: {} files", report.discovered);
            println!("  skipped: {}", report.skipped);
            println!("  indexed: {}", report.indexed);
            println!("  failed: {}", report.failed);
            if report.fetch_failures > 0 {
                println!("  fetch failures: {}", report.fetch_failures);
            }
            println!("ok");
        }
        Commands::Progress { project } => {
            let services = Services::open(cfg).await?;
            require_project(&services, &project).await?;
            match services.store.get_progress(&project).await? {
                Some(p) => {
                    println!("progress {}", project);
                    println!("  step: {} / {}", p.current_step, p.total_steps);
                    println!("  failed: {}", p.failed_steps);
                    println!("  finished: {}", p.is_finished);
                }
                None => println!("No indexing run recorded."),
            }
        }
        Commands::Ask {
            project,
            question,
            mode,
            history,
            save,
            user,
        } => {
            let Some(style) = PromptStyle::parse(&mode) else {
                bail!("Unknown answer mode: '{}'. Must be qa or chat.", mode);
            };
            let services = Services::open(cfg).await?;
            run_ask(&services, &project, &question, style, &history, save.then_some(user)).await?;
        }
        Commands::Questions { project } => {
            let services = Services::open(cfg).await?;
            require_project(&services, &project).await?;
            let questions = services.store.list_questions(&project).await?;
            if questions.is_empty() {
                println!("No questions.");
            }
            for q in questions {
                let when = chrono::DateTime::from_timestamp(q.created_at, 0)
                    .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!("[{}] {} ({})", when, q.question, q.user_id);
                println!("    {}", q.answer.lines().next().unwrap_or(""));
                for r in &q.file_references {
                    println!("    - {} ({:.3})", r.file_name, r.similarity);
                }
                println!();
            }
        }
        Commands::Commits { project } => {
            let services = Services::open(cfg).await?;
            let report = services.commit_poller()?.poll_commits(&project).await?;
            println!("commits {}", project);
            println!("  fetched: {}", report.fetched);
            println!("  new: {}", report.new);
            println!("  summarized: {}", report.summarized);
            println!("  failed: {}", report.failed);
            for c in services.store.list_commits(&project).await? {
                let short = c.hash.get(..7).unwrap_or(&c.hash);
                println!();
                println!(
                    "{} {} ({})",
                    short,
                    c.message.lines().next().unwrap_or(""),
                    c.author_name
                );
                println!("    {}", c.summary.replace('\n', "\n    "));
            }
            println!("ok");
        }
        Commands::Tree { project } => {
            let services = Services::open(cfg).await?;
            require_project(&services, &project).await?;
            let paths = services.store.indexed_paths(&project).await?;
            if paths.is_empty() {
                println!("No indexed files.");
            } else {
                let tree = build_folder_structure(paths.keys());
                print!("{}", tree.render());
                println!("{} files", tree.file_count());
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Reset { yes } => {
            if !yes {
                bail!("Refusing to delete every row without --yes");
            }
            let services = Services::open(cfg).await?;
            services.store.clear_all().await?;
            println!("All tables cleared.");
        }
    }

    Ok(())
}

async fn run_project(cfg: Config, action: ProjectAction) -> Result<()> {
    let services = Services::open(cfg).await?;
    match action {
        ProjectAction::Add {
            name,
            repo_url,
            token,
        } => {
            let project = services.add_project(&name, &repo_url, token).await?;
            println!("project {}", project.name);
            println!("  id: {}", project.id);
            println!("  repo: {}", project.repo_url);
            println!("ok");
        }
        ProjectAction::List => {
            let projects = services.store.list_projects().await?;
            if projects.is_empty() {
                println!("No projects.");
            }
            for p in projects {
                println!("{}  {}  {}", p.id, p.name, p.repo_url);
            }
        }
        ProjectAction::Remove { id } => {
            if !services.store.soft_delete_project(&id).await? {
                return Err(SageError::ProjectNotFound(id).into());
            }
            println!("project {} removed", id);
            println!("ok");
        }
    }
    Ok(())
}

async fn require_project(services: &Services, id: &str) -> Result<()> {
    if services.store.get_project(id).await?.is_none() {
        return Err(SageError::ProjectNotFound(id.to_string()).into());
    }
    Ok(())
}

async fn run_ask(
    services: &Services,
    project: &str,
    question: &str,
    style: PromptStyle,
    history: &[String],
    save_as: Option<String>,
) -> Result<()> {
    let mut answer = services
        .assistant
        .ask(project, question, style, history)
        .await?;

    let mut text = String::new();
    let mut failure = None;
    let mut stdout = std::io::stdout();
    while let Some(event) = answer.stream.next().await {
        match event {
            AnswerEvent::Delta(d) => {
                print!("{}", d);
                stdout.flush()?;
                text.push_str(&d);
            }
            AnswerEvent::Done => {}
            AnswerEvent::Error(e) => {
                eprintln!("Error: {}", e);
                failure = Some(e);
            }
        }
    }
    println!();

    if !answer.references.is_empty() {
        println!();
        println!("References:");
        for r in &answer.references {
            println!("  {} ({:.3})", r.file_name, r.similarity);
        }
    }

    if let Some(user) = save_as {
        if failure.is_some() {
            eprintln!("Answer incomplete; not saved.");
        } else {
            let q = Question::new(project, &user, question, &text, answer.references);
            services.store.save_question(&q).await?;
            println!("saved question {}", q.id);
        }
    }
    Ok(())
}
