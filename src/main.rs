use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use dayplanner::config::{Assistant, ENV_ANTHROPIC_KEY, PlannerConfig};
use dayplanner::core::board::DragId;
use dayplanner::core::date_key::DateKey;
use dayplanner::core::drag::CommitResolution;
use dayplanner::core::suggestion::Preview;
use dayplanner::core::task::{NewTask, TaskId};
use dayplanner::core::temporal::{self, MAX_RADIUS, VisibleRange};
use dayplanner::session::{NoticeLevel, Role};
use dayplanner::sync::anthropic::AnthropicPlanner;
use dayplanner::sync::copilot::CopilotClient;
use dayplanner::sync::keyring;
use dayplanner::sync::local::LocalStore;
use dayplanner::sync::rest::RestGateway;
use dayplanner::sync::{Backend, SuggestionService};
use dayplanner::{Planner, PlannerError, Result};

#[derive(Parser)]
#[command(name = "dayplanner", version, about = "Plan your days, one drag at a time")]
struct Cli {
    /// Log debug output to the journal
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in to the backend; the password is read from stdin
    Login {
        email: String,
    },
    /// Forget the stored session
    Logout,
    /// Check an Anthropic API key and store it in the keyring; read from stdin
    ApiKey {
        /// Also make the direct Anthropic client the planning assistant
        #[arg(long)]
        select: bool,
    },
    /// Show tasks around a date
    List {
        /// Center date (defaults to today)
        #[arg(long)]
        date: Option<DateKey>,
        /// Days shown on each side of the center date
        #[arg(long, value_parser = clap::value_parser!(u32).range(..=MAX_RADIUS as i64))]
        days: Option<u32>,
        /// Only tasks in this project
        #[arg(long)]
        project: Option<i64>,
        /// Show the whole week instead
        #[arg(long, conflicts_with = "days")]
        week: bool,
    },
    /// Create a task
    Add {
        title: String,
        /// Project name (repeatable; created when missing)
        #[arg(long = "project", short, required = true)]
        projects: Vec<String>,
        #[arg(long)]
        date: Option<DateKey>,
        /// Estimated minutes
        #[arg(long, default_value_t = 0)]
        minutes: u32,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Edit task fields
    Edit {
        id: TaskId,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        date: Option<DateKey>,
        #[arg(long)]
        minutes: Option<u32>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Mark a task completed
    Done { id: TaskId },
    /// Mark a task not completed
    Undo { id: TaskId },
    /// Delete a task
    Rm { id: TaskId },
    /// Move a task to another day or position
    Move {
        id: TaskId,
        /// Destination day
        #[arg(long)]
        to: DateKey,
        /// Position within the destination day (defaults to the end)
        #[arg(long)]
        index: Option<usize>,
    },
    /// List projects
    Projects,
    /// Chat with the planning assistant
    Plan {
        #[arg(long)]
        date: Option<DateKey>,
    },
}

// Journal logging (`journalctl --user -t dayplanner -f`): this crate at
// info/debug, everything else at warn.
struct FilteredJournal {
    inner: systemd_journal_logger::JournalLog,
}

impl log::Log for FilteredJournal {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        if metadata.target().starts_with("dayplanner") {
            let max = if dayplanner::debug_logging() {
                log::LevelFilter::Debug
            } else {
                log::LevelFilter::Info
            };
            metadata.level() <= max
        } else {
            metadata.level() <= log::LevelFilter::Warn
        }
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            self.inner.log(record);
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

fn init_logging(debug: bool) {
    dayplanner::set_debug_logging(debug);
    let journal = match systemd_journal_logger::JournalLog::new() {
        Ok(j) => j.with_syslog_identifier("dayplanner".to_string()),
        Err(_) => return,
    };
    if log::set_boxed_logger(Box::new(FilteredJournal { inner: journal })).is_ok() {
        // Global max must be Debug so debug logs can pass through when enabled
        log::set_max_level(log::LevelFilter::Debug);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match PlannerConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(cli.debug || config.debug_logging);

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_auth() => {
            eprintln!("{}", e);
            eprintln!("Run `dayplanner login <email>` to sign in.");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, config: PlannerConfig) -> Result<()> {
    config.validate()?;
    match command {
        Commands::Login { email } => login(&config, &email).await,
        Commands::ApiKey { select } => store_api_key(&config, select).await,
        Commands::Logout => {
            if !config.is_offline() {
                keyring::delete_secret(&keyring::session_slot(&config.backend_url)).await?;
            }
            println!("Signed out successfully");
            Ok(())
        }
        Commands::List { date, days, project, week } => {
            let center = date.unwrap_or_else(DateKey::today);
            let mut planner = open_planner(&config, center).await?;
            planner.refresh().await?;
            if week {
                let (start, end) = temporal::week_bounds(center, config.week_starts_on_monday);
                let tasks = planner.tasks_for_week(center);
                println!("Week {} .. {}: {} tasks", start, end, tasks.len());
                let mut day = start;
                while day <= end {
                    print_day(day, &temporal::tasks_for_date(&tasks, day));
                    day = day.succ();
                }
                return Ok(());
            }
            if let Some(days) = days {
                planner.set_visible_days(days);
            }
            planner.set_project_filter(project);
            for (day, tasks) in planner.board().iter() {
                print_day(*day, tasks);
            }
            Ok(())
        }
        Commands::Add { title, projects, date, minutes, notes } => {
            let mut planner = open_planner(&config, DateKey::today()).await?;
            let mut draft = NewTask::new(title, date.unwrap_or_else(DateKey::today));
            draft.estimated_minutes = minutes;
            draft.notes = notes;
            for name in projects {
                draft = draft.with_project(name);
            }
            let result = planner.create_task(draft).await;
            print_notices(&mut planner);
            let task = result?;
            println!("#{} {}", task.id, task.title);
            Ok(())
        }
        Commands::Edit { id, title, date, minutes, notes } => {
            let mut planner = open_planner(&config, DateKey::today()).await?;
            planner.refresh().await?;
            let mut task = planner
                .task(id)
                .cloned()
                .ok_or_else(|| PlannerError::NotFound(format!("task {}", id)))?;
            if let Some(title) = title {
                task.title = title;
            }
            if let Some(date) = date {
                task.date = date;
            }
            if let Some(minutes) = minutes {
                task.estimated_minutes = minutes;
            }
            if let Some(notes) = notes {
                task.notes = Some(notes).filter(|n| !n.is_empty());
            }
            let result = planner.update_task(task).await;
            print_notices(&mut planner);
            result.map(|_| ())
        }
        Commands::Done { id } => {
            let mut planner = open_planner(&config, DateKey::today()).await?;
            planner.refresh().await?;
            let result = planner.complete_task(id).await;
            print_notices(&mut planner);
            result.map(|_| ())
        }
        Commands::Undo { id } => {
            let mut planner = open_planner(&config, DateKey::today()).await?;
            planner.refresh().await?;
            let completed = planner
                .task(id)
                .map(|t| t.completed)
                .ok_or_else(|| PlannerError::NotFound(format!("task {}", id)))?;
            if !completed {
                println!("Task {} is not completed", id);
                return Ok(());
            }
            let result = planner.toggle_complete(id).await;
            print_notices(&mut planner);
            result.map(|_| ())
        }
        Commands::Rm { id } => {
            let mut planner = open_planner(&config, DateKey::today()).await?;
            planner.refresh().await?;
            let result = planner.delete_task(id).await;
            print_notices(&mut planner);
            result
        }
        Commands::Move { id, to, index } => move_task(&config, id, to, index).await,
        Commands::Projects => {
            let mut planner = open_planner(&config, DateKey::today()).await?;
            planner.refresh().await?;
            for p in planner.projects() {
                println!("{:>4}  {}", p.id, p.name);
            }
            Ok(())
        }
        Commands::Plan { date } => plan(&config, date.unwrap_or_else(DateKey::today)).await,
    }
}

async fn login(config: &PlannerConfig, email: &str) -> Result<()> {
    if config.is_offline() {
        return Err(PlannerError::Config(
            "no backend_url configured; the local store needs no login".into(),
        ));
    }
    let password = prompt("Password: ").await?;
    let gateway = RestGateway::new(&config.backend_url, &config.anon_key, None)?;
    let session = gateway.sign_in(email, password.trim()).await?;
    keyring::store_secret(
        &keyring::session_slot(&config.backend_url),
        &format!("Day planner session ({})", config.backend_url),
        &session.access_token,
    )
    .await?;
    println!("Signed in as {}", session.user.email.as_deref().unwrap_or(email));
    Ok(())
}

async fn store_api_key(config: &PlannerConfig, select: bool) -> Result<()> {
    let key = prompt("Anthropic API key: ").await?;
    let key = key.trim();
    if key.is_empty() {
        return Err(PlannerError::validation("API key cannot be empty"));
    }
    AnthropicPlanner::new(key, &config.model, config.max_tokens)
        .test_api_key()
        .await
        .map_err(|e| match e {
            PlannerError::Auth(_) => PlannerError::validation("The API key was rejected"),
            other => other,
        })?;
    keyring::store_secret(keyring::ANTHROPIC_SLOT, "Day planner Anthropic API key", key).await?;
    println!("API key verified and stored");

    if select {
        // Only the file's own values, so environment overrides are not persisted
        let mut stored = PlannerConfig::load_from(&PlannerConfig::path())?;
        stored.assistant = Assistant::Anthropic;
        stored.save()?;
        println!("Planning assistant set to anthropic");
    }
    Ok(())
}

async fn prompt(label: &str) -> Result<String> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(label.as_bytes()).await?;
    stderr.flush().await?;
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn anthropic_key() -> Option<String> {
    if let Some(key) = std::env::var(ENV_ANTHROPIC_KEY).ok().filter(|k| !k.is_empty()) {
        return Some(key);
    }
    match keyring::load_secret(keyring::ANTHROPIC_SLOT).await {
        Ok(key) => key,
        Err(e) => {
            log::warn!("Could not read API key from keyring: {}", e);
            None
        }
    }
}

async fn open_planner(config: &PlannerConfig, center: DateKey) -> Result<Planner> {
    let range = VisibleRange::new(center, config.visible_days);
    let direct = anthropic_key()
        .await
        .map(|key| AnthropicPlanner::new(key, &config.model, config.max_tokens));

    let backend: Box<dyn Backend>;
    let mut assistant: Option<Box<dyn SuggestionService>> = None;
    if config.is_offline() {
        backend = Box::new(LocalStore::open(&config.local_store_path())?);
        if let Some(direct) = direct {
            assistant = Some(Box::new(direct));
        }
    } else {
        let slot = keyring::session_slot(&config.backend_url);
        let token = keyring::load_secret(&slot)
            .await?
            .ok_or_else(|| PlannerError::Auth("not signed in".into()))?;
        backend = Box::new(RestGateway::new(&config.backend_url, &config.anon_key, Some(token.clone()))?);
        match config.assistant {
            Assistant::Copilot => {
                assistant = Some(Box::new(CopilotClient::new(
                    &config.backend_url,
                    &config.copilot_function,
                    &config.anon_key,
                    &token,
                )));
            }
            Assistant::Anthropic => {
                if let Some(direct) = direct {
                    assistant = Some(Box::new(direct));
                }
            }
        }
    }

    Ok(Planner::new(backend, assistant, range).with_week_start(config.week_starts_on_monday))
}

async fn move_task(config: &PlannerConfig, id: TaskId, to: DateKey, index: Option<usize>) -> Result<()> {
    let mut planner = open_planner(config, to).await?;
    planner.refresh().await?;
    let from = planner
        .task(id)
        .map(|t| t.date)
        .ok_or_else(|| PlannerError::NotFound(format!("task {}", id)))?;

    // Both days must be on the board for the drag to resolve.
    let span = (to.date() - from.date()).num_days().unsigned_abs();
    if span > u64::from(MAX_RADIUS) {
        return Err(PlannerError::validation(format!(
            "Tasks can be moved at most {} days at a time",
            MAX_RADIUS
        )));
    }
    let span = span as u32;
    planner.jump_to(from);
    planner.set_visible_days(span);
    planner.set_project_filter(None);

    if planner.drag_start(DragId::Task(id)).is_none() {
        return Err(PlannerError::NotFound(format!("task {} on the board", id)));
    }
    let target = index
        .and_then(|i| planner.board().bucket(&to).and_then(|b| b.get(i)).map(|t| DragId::Task(t.id)))
        .unwrap_or(DragId::Bucket(to));
    planner.drag_over(&target);

    match planner.finish_drag(Some(&target)).await {
        None => println!("Nothing to move"),
        Some(CommitResolution::Confirmed(updates)) => {
            println!("Moved task {} ({} tasks reordered)", id, updates.len())
        }
        Some(CommitResolution::RolledBack(e)) => {
            print_notices(&mut planner);
            return Err(PlannerError::Backend { status: 0, message: e });
        }
        Some(CommitResolution::Stale) => {}
    }
    Ok(())
}

async fn plan(config: &PlannerConfig, date: DateKey) -> Result<()> {
    let mut planner = open_planner(config, date).await?;
    planner.refresh().await?;
    println!("Planning {}. Commands: preview, apply, discard, quit", date);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "quit" | "exit" => break,
            "preview" => match planner.preview() {
                Some(preview) => print_preview(&planner, &preview),
                None => println!("No pending suggestions"),
            },
            "apply" => {
                if planner.session().pending.is_none() {
                    println!("No pending suggestions");
                    continue;
                }
                let result = planner.apply_suggestions().await;
                print_notices(&mut planner);
                if let Err(e) = result {
                    if e.is_auth() {
                        return Err(e);
                    }
                }
            }
            "discard" => {
                planner.discard_suggestions();
                println!("Suggestions discarded");
            }
            message => {
                planner.send_message(message).await?;
                if let Some(reply) = planner.session().chat.last().filter(|m| m.role == Role::Assistant) {
                    println!("{}", reply.content);
                }
                if planner.session().is_preview_open {
                    if let Some(preview) = planner.preview() {
                        print_preview(&planner, &preview);
                    }
                }
            }
        }
    }
    Ok(())
}

fn print_day(day: DateKey, tasks: &[dayplanner::core::task::Task]) {
    println!("{}  ({} min left)", day, temporal::remaining_minutes(tasks));
    for t in tasks {
        let names = t.project_names().join(", ");
        println!(
            "  [{}] #{:<4} {} ({}m) [{}]",
            if t.completed { "x" } else { " " },
            t.id,
            t.title,
            t.estimated_minutes,
            names
        );
    }
}

fn print_preview(planner: &Planner, preview: &Preview) {
    for c in &preview.creates {
        let date = c.date.map(|d| d.to_string()).unwrap_or_else(|| "today".into());
        let projects: Vec<String> = c
            .projects
            .iter()
            .map(|p| {
                if planner.is_new_project(&p.name) {
                    format!("{} (new)", p.name)
                } else {
                    p.name.clone()
                }
            })
            .collect();
        println!(
            "  + {} on {} ({}m) [{}]",
            c.title,
            date,
            c.estimated_minutes.unwrap_or(0),
            projects.join(", ")
        );
    }
    for u in &preview.updates {
        match &u.original {
            Some(original) => println!(
                "  ~ #{} {}: {}",
                u.patch.id,
                original.title,
                u.patch.changed_fields(original).join(", ")
            ),
            None => println!("  ~ #{} (unknown task)", u.patch.id),
        }
    }
    for d in &preview.deletes {
        match &d.task {
            Some(task) => println!("  - #{} {}", d.id, task.title),
            None => println!("  - #{}", d.id),
        }
    }
}

fn print_notices(planner: &mut Planner) {
    for notice in planner.session_mut().take_notices() {
        match notice.level {
            NoticeLevel::Success => println!("{}", notice.message),
            NoticeLevel::Error => eprintln!("{}", notice.message),
        }
    }
}
