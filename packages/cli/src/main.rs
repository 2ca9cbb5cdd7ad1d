mod api;
mod assignment;
mod cfg;
mod commands;
mod config;
mod dotfile;
mod error;
mod gather;
mod session;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::api::Client;
use crate::config::Config;
use crate::error::Result;

/// Command-line interface to CodeGrinder.
#[derive(Parser)]
#[command(name = "grind", version, about = "Command-line interface to CodeGrinder")]
struct Cli {
    /// Report each API request as it is made
    #[arg(long, global = true)]
    api: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to a CodeGrinder server
    #[command(long_about = "Connect to a CodeGrinder server.\n\n\
        Log in through your LMS, then visit\n\
        https://<hostname>/api/v2/users/me/cookie in your browser to see your\n\
        session cookie, and pass both values here. You should normally only\n\
        need to do this once per semester.")]
    Init {
        /// CodeGrinder server hostname
        hostname: String,
        /// Session cookie value shown by the server
        cookie: String,
    },

    /// Print the version number of grind
    Version,

    /// List all of your active assignments
    List,

    /// Download an assignment to work on it locally
    #[command(long_about = "Download an assignment to work on it locally.\n\n\
        Give either the numeric ID (shown at the start of each listing) or\n\
        the course/problem-set identifier (shown in parentheses). Use\n\
        'grind list' to see the assignments available to you.")]
    Get {
        /// Assignment number or COURSE/problem-set-id
        name: String,
        /// Directory to download into (defaults to your home directory)
        root_dir: Option<PathBuf>,
    },

    /// Save your work to the server without grading
    Save {
        /// Problem directory (defaults to the current directory)
        dir: Option<PathBuf>,
    },

    /// Save your work and submit it for grading
    Grade {
        /// Problem directory (defaults to the current directory)
        dir: Option<PathBuf>,
    },

    /// Save your work and run an action on the server
    #[command(long_about = "Save your work and run an action on the server.\n\n\
        Run this with no action name to see the list of valid actions. Your\n\
        code is uploaded and the action starts on the server; interact with\n\
        it from this terminal when the action supports it.")]
    Action {
        /// Action name (omit to list the valid actions)
        name: Option<String>,
        /// Problem directory (defaults to the current directory)
        dir: Option<PathBuf>,
    },

    /// Create a new problem or problem set (authors only)
    #[command(long_about = "Create a new problem or problem set (authors only).\n\n\
        To create a problem, run without arguments in a problem directory.\n\
        To create a problem set, give the name of its .cfg file. A problem\n\
        set with the same unique ID is created automatically alongside each\n\
        new problem.")]
    Create {
        /// Problem set definition file (omit to create a problem)
        problem_set: Option<PathBuf>,
        /// Update an existing problem or problem set
        #[arg(short, long)]
        update: bool,
        /// Run an interactive action for the current problem step
        #[arg(long)]
        action: Option<String>,
    },

    /// List problem types or download the files for one (authors only)
    #[command(name = "type")]
    Type {
        /// Problem type to download files for (omit to list types)
        name: Option<String>,
    },

    /// Find a problem set (authors only)
    Problem {
        /// Case-insensitive search terms
        terms: Vec<String>,
    },

    /// Download a student assignment for inspection (instructors only)
    Student {
        /// Assignment number
        assignment_id: i64,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                error!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let report_api = cli.api;
    match cli.command {
        Command::Version => {
            println!("grind {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Init { hostname, cookie } => commands::init::run(&hostname, &cookie, report_api),
        Command::List => with_client(report_api, |api| commands::list::run(&api)),
        Command::Get { name, root_dir } => {
            with_client(report_api, |api| commands::get::run(&api, &name, root_dir))
        }
        Command::Save { dir } => with_client(report_api, |api| {
            commands::save::run(&api, &dir.unwrap_or_else(|| PathBuf::from(".")))
        }),
        Command::Grade { dir } => with_client(report_api, |api| {
            commands::grade::run(&api, &dir.unwrap_or_else(|| PathBuf::from(".")))
        }),
        Command::Action { name, dir } => with_client(report_api, |api| {
            commands::action::run(
                &api,
                name.as_deref(),
                &dir.unwrap_or_else(|| PathBuf::from(".")),
            )
        }),
        Command::Create {
            problem_set,
            update,
            action,
        } => with_client(report_api, |api| {
            commands::create::run(&api, problem_set, update, action.as_deref())
        }),
        Command::Type { name } => {
            with_client(report_api, |api| commands::ptype::run(&api, name.as_deref()))
        }
        Command::Problem { terms } => {
            with_client(report_api, |api| commands::problem::run(&api, &terms))
        }
        Command::Student { assignment_id } => with_client(report_api, |api| {
            commands::student::run(&api, assignment_id)
        }),
    }
}

/// Load the saved configuration and hand a connected client to the command.
fn with_client<F>(report_api: bool, command: F) -> Result<()>
where
    F: FnOnce(Client) -> Result<()>,
{
    let config = Config::load()?;
    let api = Client::new(&config, report_api)?;
    command(api)
}
