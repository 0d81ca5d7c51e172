//! Command-line interface for studysync
//!
//! This module defines the CLI structure using clap derive macros.
//! Each command group is implemented in its own submodule.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::channels::{DisabledPlatform, EventSinkPlatform, PlatformChannel};
use crate::config::{Config, EngineSettings};
use crate::error::{Error, Result};
use crate::events::EventDestination;
use crate::output::OutputOptions;
use crate::storage::Storage;
use crate::task::TaskStore;

mod course;
mod init;
mod suppress;
mod task;
mod user;
mod watch;

/// studysync - live task reconciliation and deadline notifications
///
/// Keeps a shared task list per course, turns changes into "assigned to
/// you" and "due soon" notifications, and lets members reorder tasks.
#[derive(Parser, Debug)]
#[command(name = "studysync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Workspace root holding `.studysync/` (defaults to current directory)
    #[arg(long, global = true, env = "STUDYSYNC_ROOT")]
    pub root: Option<PathBuf>,

    /// User id acting and receiving notifications
    #[arg(long, global = true, env = "STUDYSYNC_VIEWER")]
    pub viewer: Option<String>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit platform notifications as JSONL to a file, or `-` for stdout
    #[arg(long, global = true)]
    pub events: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize studysync in a directory
    Init,

    /// Course management
    #[command(subcommand)]
    Course(CourseCommands),

    /// User profile management
    #[command(subcommand)]
    User(UserCommands),

    /// Task management
    #[command(subcommand)]
    Task(TaskCommands),

    /// Watch tasks and deliver notifications until interrupted
    Watch {
        /// Watch one course instead of every task you are a member of
        #[arg(long)]
        course: Option<String>,

        /// Stop after this long (e.g., "30s", "2h")
        #[arg(long = "for")]
        duration: Option<String>,
    },

    /// Notification suppression state
    #[command(subcommand)]
    Suppress(SuppressCommands),
}

impl Commands {
    /// Name used in JSON envelopes, e.g. `task done`.
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Init => "init",
            Commands::Course(CourseCommands::Add { .. }) => "course add",
            Commands::Course(CourseCommands::Join { .. }) => "course join",
            Commands::Course(CourseCommands::List { .. }) => "course list",
            Commands::User(UserCommands::Set { .. }) => "user set",
            Commands::Task(cmd) => match cmd {
                TaskCommands::Add { .. } => "task add",
                TaskCommands::Assign { .. } => "task assign",
                TaskCommands::Due { .. } => "task due",
                TaskCommands::Done { .. } => "task done",
                TaskCommands::Reopen { .. } => "task reopen",
                TaskCommands::Delete { .. } => "task delete",
                TaskCommands::List { .. } => "task list",
                TaskCommands::Reorder { .. } => "task reorder",
                TaskCommands::Move { .. } => "task move",
            },
            Commands::Watch { .. } => "watch",
            Commands::Suppress(SuppressCommands::Compact { .. }) => "suppress compact",
            Commands::Suppress(SuppressCommands::List) => "suppress list",
        }
    }
}

/// Course subcommands
#[derive(Subcommand, Debug)]
pub enum CourseCommands {
    /// Create a course; the viewer becomes its first member
    Add {
        /// Course name
        name: String,

        /// Optional description
        #[arg(long)]
        description: Option<String>,
    },

    /// Join a course by id
    Join {
        /// Course id
        id: String,

        /// Add this user instead of the viewer
        #[arg(long)]
        user: Option<String>,
    },

    /// List courses the viewer belongs to
    List {
        /// List every course
        #[arg(long)]
        all: bool,
    },
}

/// User subcommands
#[derive(Subcommand, Debug)]
pub enum UserCommands {
    /// Set the viewer's display name and email
    Set {
        /// Display name shown in notifications
        #[arg(long)]
        name: Option<String>,

        /// Email, shown when no display name is set
        #[arg(long)]
        email: Option<String>,
    },
}

/// Task subcommands
#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Create a task in a course
    Add {
        /// Task title
        title: String,

        /// Course id
        #[arg(long, required = true)]
        course: String,

        /// Due time: RFC 3339 timestamp or offset from now (e.g., "90m", "2d")
        #[arg(long)]
        due: Option<String>,

        /// Priority: low, medium, high
        #[arg(long, default_value = "medium")]
        priority: String,

        /// Assign to this user
        #[arg(long)]
        assignee: Option<String>,

        /// Optional description
        #[arg(long)]
        description: Option<String>,
    },

    /// Assign a task, or clear its assignee
    Assign {
        /// Task id
        id: String,

        /// User to assign
        #[arg(long, conflicts_with = "clear", required_unless_present = "clear")]
        to: Option<String>,

        /// Remove the assignee
        #[arg(long)]
        clear: bool,
    },

    /// Set or clear a due time
    Due {
        /// Task id
        id: String,

        /// RFC 3339 timestamp or offset from now
        #[arg(conflicts_with = "clear", required_unless_present = "clear")]
        when: Option<String>,

        /// Remove the due time
        #[arg(long)]
        clear: bool,
    },

    /// Mark a task completed
    Done {
        /// Task id
        id: String,
    },

    /// Mark a completed task pending again
    Reopen {
        /// Task id
        id: String,
    },

    /// Delete a task
    Delete {
        /// Task id
        id: String,
    },

    /// List tasks
    List {
        /// Tasks of one course in display order (default: tasks visible to the viewer)
        #[arg(long)]
        course: Option<String>,
    },

    /// Persist a new manual order for tasks
    Reorder {
        /// Task ids in their new order
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Move one task to another task's position within its course
    Move {
        /// Task being moved
        id: String,

        /// Task whose position it takes
        #[arg(long, required = true)]
        over: String,
    },
}

/// Suppress subcommands
#[derive(Subcommand, Debug)]
pub enum SuppressCommands {
    /// Drop entries older than the max age
    Compact {
        /// Override `suppression.max_age` (e.g., "48h")
        #[arg(long)]
        max_age: Option<String>,
    },

    /// Show recorded suppression keys
    List,
}

/// Resolved global options shared by every command.
#[derive(Debug, Clone)]
pub(crate) struct Context {
    pub root: PathBuf,
    pub viewer: Option<String>,
    pub events: Option<String>,
    pub output: OutputOptions,
}

impl Context {
    fn new(cli: &Cli) -> Result<Self> {
        let root = match &cli.root {
            Some(path) => path.clone(),
            None => std::env::current_dir()?,
        };
        let events_to_stdout = cli
            .events
            .as_deref()
            .map(|value| value.trim() == "-")
            .unwrap_or(false);
        Ok(Self {
            root,
            viewer: cli.viewer.clone(),
            events: cli.events.clone(),
            output: OutputOptions {
                json: cli.json && !events_to_stdout,
                quiet: cli.quiet || events_to_stdout,
            },
        })
    }

    pub fn storage(&self) -> Storage {
        Storage::new(&self.root)
    }

    pub fn store(&self) -> TaskStore {
        TaskStore::new(self.storage())
    }

    pub fn config(&self) -> Config {
        Config::load_from_root(&self.root)
    }

    /// Platform channel for this run: the `--events` sink when platform
    /// notifications are enabled, else a disabled channel.
    pub fn platform(
        &self,
        config: &Config,
        settings: &EngineSettings,
    ) -> Result<Arc<dyn PlatformChannel>> {
        match EventDestination::parse(self.events.as_deref()) {
            Some(destination) if config.platform_enabled() => {
                let display = settings.display_interval.to_std().map_err(|_| {
                    Error::InvalidConfig("notify.display_interval cannot be negative".to_string())
                })?;
                Ok(Arc::new(EventSinkPlatform::new(destination.open()?, display)))
            }
            _ => Ok(Arc::new(DisabledPlatform)),
        }
    }

    /// Viewer from `--viewer`/`STUDYSYNC_VIEWER`, else `viewer.id` in config.
    pub fn viewer(&self) -> Result<String> {
        self.viewer
            .as_deref()
            .map(str::trim)
            .filter(|viewer| !viewer.is_empty())
            .map(str::to_string)
            .or_else(|| self.config().viewer.id)
            .ok_or_else(|| {
                Error::InvalidArgument(
                    "no viewer set (use --viewer, STUDYSYNC_VIEWER or viewer.id in .studysync.toml)"
                        .to_string(),
                )
            })
    }
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let ctx = Context::new(&self)?;
        match self.command {
            Commands::Init => init::run(&ctx),
            Commands::Course(cmd) => match cmd {
                CourseCommands::Add { name, description } => {
                    course::run_add(&ctx, &name, description.as_deref())
                }
                CourseCommands::Join { id, user } => course::run_join(&ctx, &id, user),
                CourseCommands::List { all } => course::run_list(&ctx, all),
            },
            Commands::User(UserCommands::Set { name, email }) => user::run_set(&ctx, name, email),
            Commands::Task(cmd) => match cmd {
                TaskCommands::Add {
                    title,
                    course,
                    due,
                    priority,
                    assignee,
                    description,
                } => task::run_add(
                    &ctx,
                    task::AddOptions {
                        title,
                        course,
                        due,
                        priority,
                        assignee,
                        description,
                    },
                ),
                TaskCommands::Assign { id, to, clear } => {
                    task::run_assign(&ctx, &id, if clear { None } else { to })
                }
                TaskCommands::Due { id, when, clear } => {
                    task::run_due(&ctx, &id, if clear { None } else { when })
                }
                TaskCommands::Done { id } => {
                    task::run_status(&ctx, &id, crate::task::TaskStatus::Completed)
                }
                TaskCommands::Reopen { id } => {
                    task::run_status(&ctx, &id, crate::task::TaskStatus::Pending)
                }
                TaskCommands::Delete { id } => task::run_delete(&ctx, &id),
                TaskCommands::List { course } => task::run_list(&ctx, course.as_deref()),
                TaskCommands::Reorder { ids } => task::run_reorder(&ctx, ids),
                TaskCommands::Move { id, over } => task::run_move(&ctx, &id, &over),
            },
            Commands::Watch { course, duration } => watch::run(&ctx, course, duration),
            Commands::Suppress(cmd) => match cmd {
                SuppressCommands::Compact { max_age } => suppress::run_compact(&ctx, max_age),
                SuppressCommands::List => suppress::run_list(&ctx),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_of(args: &[&str]) -> &'static str {
        let cli = Cli::try_parse_from(args).unwrap();
        cli.command.name()
    }

    #[test]
    fn command_names_skip_global_values() {
        assert_eq!(
            name_of(&["studysync", "--root", "/tmp/x", "--viewer", "u1", "task", "done", "t1"]),
            "task done"
        );
        assert_eq!(name_of(&["studysync", "--events", "-", "watch"]), "watch");
        assert_eq!(
            name_of(&["studysync", "suppress", "compact", "--max-age", "2d"]),
            "suppress compact"
        );
    }
}
