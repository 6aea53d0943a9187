use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rollcall::config::{Cli, Command, Config};
use rollcall::state::AppState;
use rollcall::store::{attendance, students, users};
use rollcall::tasks::spawn_blocking_task;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli)?;
    tracing::info!("Database: {}", config.db_path().display());

    let state = AppState::open(config)?;
    let bootstrapper = state.bootstrapper();

    match cli.command.unwrap_or(Command::Init) {
        Command::Init => {
            let report = bootstrapper.initialize_in_background().wait().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Repair => {
            let repairer = bootstrapper.clone();
            let added = spawn_blocking_task("repair", move || repairer.repair_schema())
                .wait()
                .await?;
            if added.is_empty() {
                println!("schema already up to date");
            } else {
                println!("added columns: {}", added.join(", "));
            }
        }
        Command::Reset { yes } => {
            if !yes {
                anyhow::bail!("reset destroys every table; re-run with --yes to confirm");
            }
            let report = bootstrapper.reset_in_background().wait().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Backfill => {
            bootstrapper.initialize_in_background().wait().await?;
            let report = bootstrapper.backfill_in_background().wait().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Login { username } => {
            let password = std::env::var("ROLLCALL_PASSWORD")
                .context("set ROLLCALL_PASSWORD to the password to check")?;
            bootstrapper.initialize_in_background().wait().await?;
            let pool = state.db.clone();
            let cost = state.config.auth.bcrypt_cost;
            let signed_in = spawn_blocking_task("login", move || {
                users::authenticate(&pool, &username, &password, cost)
            })
            .wait()
            .await?;
            match signed_in {
                Some(user) => println!("{} signed in as {}", user.username, user.role),
                None => anyhow::bail!("invalid username or password"),
            }
        }
        Command::Report { student_id } => {
            bootstrapper.initialize_in_background().wait().await?;
            let pool = state.db.clone();
            let lookup = student_id.clone();
            let found = spawn_blocking_task("report", move || {
                let Some(student) = students::find_by_student_id(&pool, &lookup)? else {
                    return Ok(None);
                };
                let summary = attendance::summary_for_student(&pool, student.id)?;
                Ok(Some((student, summary)))
            })
            .wait()
            .await?;
            let (student, summary) =
                found.with_context(|| format!("no student with id {student_id}"))?;
            let rate = summary
                .rate()
                .map(|r| format!("{r:.1}%"))
                .unwrap_or_else(|| "n/a".to_string());
            println!(
                "{} ({}): {} present, {} late, {} absent, rate {}",
                student.full_name(),
                student.student_id,
                summary.present,
                summary.late,
                summary.absent,
                rate
            );
        }
    }

    Ok(())
}
