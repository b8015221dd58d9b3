mod commands;
mod config;

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::{
    cmd_category_add, cmd_category_list, cmd_category_remove, cmd_export, cmd_history,
    cmd_import_catalog, cmd_meal_add, cmd_meal_attach, cmd_meal_list, cmd_meal_remove,
    cmd_meal_set, cmd_meal_show, cmd_meal_unset, cmd_plan_clear, cmd_plan_set, cmd_plan_show,
    cmd_suggest, cmd_value_add, cmd_value_list, cmd_value_remove,
};
use crate::config::Config;
use rota_core::db::Database;
use rota_core::mirror::Mirror;
use rota_core::remote::RemoteChangeSignal;

#[derive(Parser)]
#[command(
    name = "rota",
    version,
    about = "A meal rotation planner CLI",
    long_about = "\n\n  ██████╗  ██████╗ ████████╗ █████╗
  ██╔══██╗██╔═══██╗╚══██╔══╝██╔══██╗
  ██████╔╝██║   ██║   ██║   ███████║
  ██╔══██╗██║   ██║   ██║   ██╔══██║
  ██║  ██║╚██████╔╝   ██║   ██║  ██║
  ╚═╝  ╚═╝ ╚═════╝    ╚═╝   ╚═╝  ╚═╝
        eat variety, not reruns.
"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage meal categories (carb type, protein type, cuisine, ...)
    Category {
        #[command(subcommand)]
        command: CategoryCommands,
    },
    /// Manage the meal catalogue
    Meal {
        #[command(subcommand)]
        command: MealCommands,
    },
    /// Plan meals into calendar days
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Suggest meals for a day, most overdue first
    Suggest {
        /// Date to suggest for (YYYY-MM-DD or today/tomorrow, default: today)
        date: Option<String>,
        /// Maximum number of suggestions
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recently planned meals
    History {
        /// Number of days to look back
        #[arg(short, long, default_value = "14")]
        days: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import data from external sources
    Import {
        #[command(subcommand)]
        command: ImportCommands,
    },
    /// Export all data as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum CategoryCommands {
    /// Add a category
    Add {
        /// Category name
        name: String,
        /// Priority: highest, high, medium, other
        #[arg(long, default_value = "medium")]
        importance: String,
    },
    /// List all categories
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a category and all its values
    Remove {
        /// Category name
        name: String,
    },
    /// Add a value to a category
    AddValue {
        /// Category name
        category: String,
        /// Value name
        name: String,
        /// Expected recurrence: never, rarely, occasionally, often, very-often
        #[arg(long, default_value = "occasionally")]
        frequency: String,
    },
    /// Remove a value from a category
    RemoveValue {
        /// Category name
        category: String,
        /// Value name
        name: String,
    },
    /// List a category's values
    Values {
        /// Category name
        category: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum MealCommands {
    /// Add a meal to the catalogue
    Add {
        /// Meal name
        name: String,
        /// Short description
        #[arg(long)]
        description: Option<String>,
        /// Recipe URL
        #[arg(long)]
        url: Option<String>,
        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
        /// Primary image file
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// List meals (generic ranking order)
    List {
        /// Filter by name substring
        #[arg(short, long)]
        search: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a meal's details
    Show {
        /// Meal name
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a meal and everything referencing it
    Remove {
        /// Meal name
        name: String,
    },
    /// Assign a category value to a meal
    Set {
        /// Meal name
        meal: String,
        /// Category name
        category: String,
        /// Value name
        value: String,
    },
    /// Clear a meal's assignment for a category
    Unset {
        /// Meal name
        meal: String,
        /// Category name
        category: String,
    },
    /// Attach an image to a meal
    Attach {
        /// Meal name
        meal: String,
        /// Image file
        image: PathBuf,
    },
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Plan a meal for a date
    Set {
        /// Date (YYYY-MM-DD or today/tomorrow)
        date: String,
        /// Meal name
        meal: String,
        /// Intra-day slot
        #[arg(long, default_value = "0")]
        slot: i64,
    },
    /// Show the plan for the coming days
    Show {
        /// Start date (default: today)
        date: Option<String>,
        /// Number of days to show
        #[arg(short, long, default_value = "7")]
        days: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Clear a planned slot
    Clear {
        /// Date (YYYY-MM-DD or today/tomorrow)
        date: String,
        /// Intra-day slot
        #[arg(long, default_value = "0")]
        slot: i64,
    },
}

#[derive(Subcommand)]
enum ImportCommands {
    /// Import a meal catalogue from a CSV file
    Catalog {
        /// Path to the CSV file
        file: PathBuf,
        /// Preview import without making changes
        #[arg(long)]
        dry_run: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::open(&config.db_path)?;
    let mut mirror = Mirror::new(db, RemoteChangeSignal::new());
    mirror.load()?;

    match cli.command {
        Commands::Category { command } => match command {
            CategoryCommands::Add { name, importance } => {
                cmd_category_add(&mut mirror, &name, &importance)
            }
            CategoryCommands::List { json } => cmd_category_list(&mirror, json),
            CategoryCommands::Remove { name } => cmd_category_remove(&mut mirror, &name),
            CategoryCommands::AddValue {
                category,
                name,
                frequency,
            } => cmd_value_add(&mut mirror, &category, &name, &frequency),
            CategoryCommands::RemoveValue { category, name } => {
                cmd_value_remove(&mut mirror, &category, &name)
            }
            CategoryCommands::Values { category, json } => {
                cmd_value_list(&mirror, &category, json)
            }
        },
        Commands::Meal { command } => match command {
            MealCommands::Add {
                name,
                description,
                url,
                notes,
                image,
            } => cmd_meal_add(
                &mut mirror,
                &name,
                description.as_deref(),
                url.as_deref(),
                notes.as_deref(),
                image.as_deref(),
            ),
            MealCommands::List { search, json } => {
                cmd_meal_list(&mirror, search.as_deref(), json)
            }
            MealCommands::Show { name, json } => cmd_meal_show(&mirror, &name, json),
            MealCommands::Remove { name } => cmd_meal_remove(&mut mirror, &name),
            MealCommands::Set {
                meal,
                category,
                value,
            } => cmd_meal_set(&mut mirror, &meal, &category, &value),
            MealCommands::Unset { meal, category } => {
                cmd_meal_unset(&mut mirror, &meal, &category)
            }
            MealCommands::Attach { meal, image } => {
                cmd_meal_attach(&mut mirror, &meal, &image)
            }
        },
        Commands::Plan { command } => match command {
            PlanCommands::Set { date, meal, slot } => {
                cmd_plan_set(&mut mirror, &date, &meal, slot)
            }
            PlanCommands::Show { date, days, json } => {
                cmd_plan_show(&mirror, date, days, json)
            }
            PlanCommands::Clear { date, slot } => cmd_plan_clear(&mut mirror, &date, slot),
        },
        Commands::Suggest { date, limit, json } => cmd_suggest(&mirror, date, limit, json),
        Commands::History { days, json } => cmd_history(&mirror, days, json),
        Commands::Import { command } => match command {
            ImportCommands::Catalog {
                file,
                dry_run,
                json,
            } => cmd_import_catalog(&mut mirror, &file, dry_run, json),
        },
        Commands::Export { out } => cmd_export(&mirror, out.as_deref()),
    }
}
