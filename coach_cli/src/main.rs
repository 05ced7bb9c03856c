use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use coach_core::analysis::mmss;
use coach_core::history::load_history_index;
use coach_core::resources::NoopResource;
use coach_core::*;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Parser)]
#[command(name = "blockcoach")]
#[command(about = "Block-based strength session coach", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use a specific config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the built-in sessions
    Sessions,

    /// Print the timeline of a session
    Timeline {
        #[arg(long)]
        session: String,

        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Run a session (today's scheduled one when --session is omitted)
    Run {
        #[arg(long)]
        session: Option<String>,

        #[command(flatten)]
        overrides: OverrideArgs,

        /// Dry run - show the timeline without logging anything
        #[arg(long)]
        dry_run: bool,

        /// Auto-complete (for testing) - log every block at its targets
        #[arg(long)]
        auto_complete: bool,
    },

    /// Show the latest logged result for a block or every block of a session
    History {
        #[arg(long, conflicts_with = "session", required_unless_present = "session")]
        module: Option<String>,

        #[arg(long)]
        session: Option<String>,
    },

    /// Roll up the work log to CSV
    Rollup {
        /// Clean up processed log files after rollup
        #[arg(long)]
        cleanup: bool,
    },

    /// Inspect or extend the daily schedule
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// List schedule entries
    List,

    /// Schedule a session
    Add {
        #[arg(long)]
        session: String,

        /// Date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,

        #[command(flatten)]
        overrides: OverrideArgs,
    },
}

#[derive(clap::Args, Clone, Default)]
struct OverrideArgs {
    /// Block the override applies to (defaults to the first block)
    #[arg(long)]
    module: Option<String>,

    /// Force a time cap of this many minutes
    #[arg(long)]
    duration: Option<u32>,

    /// Planned distance in km
    #[arg(long)]
    distance: Option<f64>,

    /// Notes for the athlete
    #[arg(long)]
    notes: Option<String>,
}

impl OverrideArgs {
    fn to_override(&self) -> Option<SessionOverride> {
        if self.module.is_none()
            && self.duration.is_none()
            && self.distance.is_none()
            && self.notes.is_none()
        {
            return None;
        }
        Some(SessionOverride {
            module_stable_id: self.module.clone(),
            duration_minutes: self.duration,
            distance_km: self.distance,
            notes: self.notes.clone(),
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logging
    coach_core::logging::init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(data_dir) = cli.data_dir {
        config.data.data_dir = data_dir;
    }

    match cli.command {
        Commands::Sessions => cmd_sessions(),
        Commands::Timeline { session, overrides } => cmd_timeline(&session, &overrides),
        Commands::Run {
            session,
            overrides,
            dry_run,
            auto_complete,
        } => cmd_run(&config, session, &overrides, dry_run, auto_complete).await,
        Commands::History { module, session } => cmd_history(&config, module, session).await,
        Commands::Rollup { cleanup } => cmd_rollup(&config, cleanup),
        Commands::Schedule { action } => cmd_schedule(&config, action),
    }
}

fn load_catalog() -> Result<&'static Catalog> {
    let catalog = get_default_catalog();
    let errors = catalog.validate();
    if !errors.is_empty() {
        eprintln!("Catalog validation errors:");
        for error in errors {
            eprintln!("  - {}", error);
        }
        return Err(Error::Validation("Invalid catalog".into()));
    }
    Ok(catalog)
}

fn find_session(catalog: &Catalog, id: &str) -> Result<Session> {
    catalog
        .session(id)
        .cloned()
        .ok_or_else(|| Error::Validation(format!("Unknown session: {}", id)))
}

fn cmd_sessions() -> Result<()> {
    let catalog = load_catalog()?;

    for session in catalog.sorted_sessions() {
        println!("{}  {}", session.id, session.name);
        if !session.description.is_empty() {
            println!("    {}", session.description);
        }
        for module in &session.modules {
            println!(
                "    - [{}] {} ({} exercises)",
                module.protocol.code(),
                module.name,
                module.exercises.len()
            );
        }
    }
    Ok(())
}

fn cmd_timeline(session_id: &str, overrides: &OverrideArgs) -> Result<()> {
    let catalog = load_catalog()?;
    let session = find_session(catalog, session_id)?;
    let session_override = overrides.to_override();

    display_header(&session);
    let timeline = build_timeline(&session, session_override.as_ref());
    display_timeline(&timeline);
    if let Some(notes) = session_override.as_ref().and_then(|o| o.notes.as_deref()) {
        println!("  Notes: {}", notes);
    }
    Ok(())
}

async fn cmd_run(
    config: &Config,
    session_id: Option<String>,
    overrides: &OverrideArgs,
    dry_run: bool,
    auto_complete: bool,
) -> Result<()> {
    let catalog = load_catalog()?;

    let request = match session_id {
        Some(id) => {
            let mut request = RunRequest::for_session(find_session(catalog, &id)?);
            request.session_override = overrides.to_override();
            request
        }
        None => {
            let today = Local::now().date_naive();
            let schedule = DailySchedule::load(&config.data.schedule_path())?;
            let entry = schedule.find_pending(today).ok_or_else(|| {
                Error::Validation(format!(
                    "No session given and nothing pending on the schedule for {}",
                    today
                ))
            })?;
            println!("Scheduled for today: {}", entry.session_id);
            RunRequest::from_entry(entry, find_session(catalog, &entry.session_id)?)
        }
    };

    display_header(&request.session);

    if dry_run {
        let timeline = build_timeline(&request.session, request.session_override.as_ref());
        display_timeline(&timeline);
        println!("\n[Dry run - not logging session]");
        return Ok(());
    }

    std::fs::create_dir_all(&config.data.data_dir)?;

    let options = RunnerOptions {
        tick_period: config.timer.period(),
        rules: config.analysis.clone(),
    };
    let (mut runner, cues) = SessionRunner::new(request, collaborators(config), options);

    let outcome = if auto_complete {
        drop(cues);
        run_scripted(&mut runner, config).await?
    } else {
        match run_interactive(&mut runner, cues, config).await? {
            Some(outcome) => outcome,
            None => {
                runner.exit().await;
                println!("\nSession exited. Unfinished blocks were discarded.");
                return Ok(());
            }
        }
    };

    tracing::info!(
        "Run {} finished with {} insights",
        outcome.run_id,
        outcome.analysis.insights.len()
    );
    display_outcome(&outcome);
    Ok(())
}

fn collaborators(config: &Config) -> Collaborators {
    let data = &config.data;
    let archive = config.history.include_archive.then(|| data.archive_path());
    Collaborators {
        history: Arc::new(FileHistory::new(data.worklog_path(), archive)),
        work_log: Arc::new(JsonlWorkLog::new(data.worklog_path())),
        schedule: Arc::new(FileScheduleStore::new(data.schedule_path())),
        notifier: Arc::new(OutboxNotifier::new(data.outbox_path())),
        resources: vec![Arc::new(NoopResource::new("display"))],
    }
}

/// Log every block without prompting: T blocks inside their rep band, other
/// blocks at their targets
async fn run_scripted(runner: &mut SessionRunner, config: &Config) -> Result<SessionOutcome> {
    loop {
        match runner.current_step().kind() {
            StepKind::Planning | StepKind::Warmup => {
                runner.advance().await?;
            }
            StepKind::Work => {
                let module = runner
                    .current_step()
                    .work_module()
                    .cloned()
                    .ok_or_else(|| Error::State("WORK step without a module".into()))?;
                runner.seed_weights().await?;
                display_block(&module);

                match module.protocol {
                    Protocol::Emom => {
                        for round in 1..=module.emom_rounds() {
                            runner.toggle_round(round)?;
                        }
                    }
                    Protocol::TimeCap => {
                        // Land inside the rep band so the analysis holds the load
                        let band = config.analysis.band(module.block_type());
                        let reps = (band.floor + band.ceiling) / 2;
                        for idx in 0..module.exercises.len() {
                            runner.record_reps(idx, reps as i32).await?;
                        }
                    }
                    _ => {
                        for (idx, target) in module.rep_targets().into_iter().enumerate() {
                            if let Some(target) = target {
                                runner.record_reps(idx, target as i32).await?;
                            }
                        }
                    }
                }

                let feedback = FeedbackCapture::Confirmed(BlockFeedback {
                    rpe: 7,
                    comment: String::new(),
                });
                runner.complete_step(feedback, true).await?;
                println!("  ✓ Logged {}", module.name);
            }
            StepKind::Summary => {
                let attached = attach_cardio(runner, config)?;
                let outcome = runner.finish_session().await?;
                archive_cardio(attached, &outcome, config);
                return Ok(outcome);
            }
        }
    }
}

/// Pick up `cardio.json` for pure-cardio sessions; returns whether one was attached
fn attach_cardio(runner: &mut SessionRunner, config: &Config) -> Result<bool> {
    if !runner.state().session().pure_cardio {
        return Ok(false);
    }
    match load_cardio_record(&config.data.cardio_path())? {
        Some(record) => {
            runner.record_cardio(record)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn archive_cardio(attached: bool, outcome: &SessionOutcome, config: &Config) {
    if !attached {
        return;
    }
    if let Err(e) = archive_cardio_record(&config.data.cardio_path(), outcome.run_id) {
        tracing::warn!("Failed to archive cardio record: {}", e);
    }
}

/// Line-driven session; returns `None` when the athlete quits
async fn run_interactive(
    runner: &mut SessionRunner,
    mut cues: UnboundedReceiver<CueEvent>,
    config: &Config,
) -> Result<Option<SessionOutcome>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut cues_open = true;
    let mut seeded_step = None;

    loop {
        let idx = runner.current_index();
        if runner.current_step().kind() == StepKind::Work && seeded_step != Some(idx) {
            seeded_step = Some(idx);
            if let Err(e) = runner.seed_weights().await {
                println!("  ! Could not seed weights: {}", e);
            }
        }
        display_step(runner).await;
        prompt()?;

        let line = loop {
            tokio::select! {
                event = cues.recv(), if cues_open => match event {
                    Some(event) => display_cue(&event),
                    None => cues_open = false,
                },
                line = lines.next_line() => break line?,
            }
        };

        let Some(line) = line else {
            return Ok(None);
        };
        let input = line.trim();
        if input == "q" {
            return Ok(None);
        }

        let result = match runner.current_step().kind() {
            StepKind::Planning => handle_planning(runner, input).await,
            StepKind::Warmup => runner.advance().await.map(|_| ()),
            StepKind::Work => handle_work(runner, input).await,
            StepKind::Summary => {
                let attached = attach_cardio(runner, config)?;
                match runner.finish_session().await {
                    Ok(outcome) => {
                        archive_cardio(attached, &outcome, config);
                        return Ok(Some(outcome));
                    }
                    Err(e) => Err(e),
                }
            }
        };

        if let Err(e) = result {
            if e.is_retryable() {
                println!("  ! {} (press Enter on this step to retry)", e);
            } else {
                println!("  ! {}", e);
            }
        }
    }
}

async fn handle_planning(runner: &mut SessionRunner, input: &str) -> Result<()> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    match parts.as_slice() {
        [] => runner.advance().await.map(|_| ()),
        ["w", exercise, kg] => {
            let kg = parse_number::<f64>(kg)?;
            runner.plan_weight(exercise, Some(kg))?;
            println!("  Planned {} at {}kg", exercise, kg);
            Ok(())
        }
        _ => Err(Error::Validation(
            "Planning: 'w <exercise> <kg>' or Enter to continue".into(),
        )),
    }
}

async fn handle_work(runner: &mut SessionRunner, input: &str) -> Result<()> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    match parts.as_slice() {
        ["s"] => {
            let snapshot = runner.start_timer().await?;
            println!("  ▶ {}", format_snapshot(&snapshot));
        }
        ["p"] => {
            let snapshot = runner.pause_timer().await?;
            println!("  ⏸ {}", format_snapshot(&snapshot));
        }
        ["x"] => {
            runner.reset_timer().await?;
        }
        ["r", idx, delta] => {
            let total = runner
                .record_reps(parse_number(idx)?, parse_number(delta)?)
                .await?;
            println!("  reps: {}", total);
        }
        ["w", idx, kg] => {
            runner
                .draft_mut()?
                .set_weight(parse_number(idx)?, Some(parse_number(kg)?))?;
        }
        ["h", idx, bpm] => {
            runner
                .draft_mut()?
                .set_heart_rate(parse_number(idx)?, Some(parse_number(bpm)?))?;
        }
        ["set", idx, reps, rest @ ..] => {
            let weight_kg = match rest.first() {
                Some(kg) => Some(parse_number(kg)?),
                None => None,
            };
            runner.draft_mut()?.add_set(
                parse_number(idx)?,
                SetLog {
                    reps: parse_number(reps)?,
                    weight_kg,
                },
            )?;
        }
        ["n", idx, note @ ..] => {
            runner.draft_mut()?.set_note(parse_number(idx)?, note.join(" "))?;
        }
        ["t", round] => {
            let outcome = runner.toggle_round(parse_number(round)?)?;
            println!("  round {}: {:?}", round, outcome);
        }
        ["skip"] => {
            runner.skip_step().await?;
        }
        ["d", rest @ ..] => {
            let (confirm, rest) = match rest.split_last() {
                Some((&"!", head)) => (true, head),
                _ => (false, rest),
            };
            let feedback = match rest.split_first() {
                Some((rpe, comment)) => FeedbackCapture::Confirmed(BlockFeedback {
                    rpe: parse_number(rpe)?,
                    comment: comment.join(" "),
                }),
                None => FeedbackCapture::Skipped,
            };
            if runner.complete_step(feedback, confirm).await? == StepCompletion::NeedsConfirmation {
                println!("  Nothing logged for this block. Use 'd <rpe> !' to finish it empty.");
            }
        }
        [] => {
            if runner.state().result(runner.current_index()).is_some() {
                runner.retry_persistence().await?;
            }
        }
        _ => {
            return Err(Error::Validation(format!("Unknown command: {}", input)));
        }
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::Validation(format!("Not a number: {}", raw)))
}

fn prompt() -> Result<()> {
    print!("> ");
    io::stdout().flush()?;
    Ok(())
}

async fn cmd_history(config: &Config, module: Option<String>, session: Option<String>) -> Result<()> {
    let data = &config.data;
    let archive = config.history.include_archive.then(|| data.archive_path());
    let source = FileHistory::new(data.worklog_path(), archive);

    let modules: Vec<Module> = match (module, session) {
        (_, Some(session_id)) => find_session(load_catalog()?, &session_id)?.modules,
        (Some(stable_id), None) => {
            match source.latest_for_module(&stable_id).await? {
                Some(log) => display_history(&stable_id, &log),
                None => println!("No history for {}", stable_id),
            }
            return Ok(());
        }
        (None, None) => return Err(Error::Validation("Pass --module or --session".into())),
    };

    let index = load_history_index(&source, &modules).await;
    for module in &modules {
        match index.get(&module.stable_id) {
            Some(log) => display_history(&module.stable_id, log),
            None => println!("No history for {}", module.stable_id),
        }
    }
    Ok(())
}

fn cmd_rollup(config: &Config, cleanup: bool) -> Result<()> {
    let log_path = config.data.worklog_path();
    let csv_path = config.data.archive_path();

    if !log_path.exists() {
        println!("No work log found - nothing to roll up.");
        return Ok(());
    }

    let count = coach_core::csv_rollup::worklog_to_csv_and_archive(&log_path, &csv_path)?;

    println!("✓ Rolled up {} block results to CSV", count);
    println!("  CSV: {}", csv_path.display());

    if cleanup {
        let cleaned = coach_core::csv_rollup::cleanup_processed_logs(&config.data.data_dir)?;
        if cleaned > 0 {
            println!("✓ Cleaned up {} processed log files", cleaned);
        }
    }

    Ok(())
}

fn cmd_schedule(config: &Config, action: ScheduleAction) -> Result<()> {
    let path = config.data.schedule_path();
    match action {
        ScheduleAction::List => {
            let schedule = DailySchedule::load(&path)?;
            if schedule.entries.is_empty() {
                println!("Schedule is empty.");
            }
            for entry in &schedule.entries {
                println!(
                    "{}  {}  {:?}  {}",
                    entry.date,
                    entry.session_id,
                    entry.status,
                    entry.summary.as_deref().unwrap_or("")
                );
            }
        }
        ScheduleAction::Add {
            session,
            date,
            overrides,
        } => {
            find_session(load_catalog()?, &session)?;
            let entry = ScheduleEntry {
                id: uuid::Uuid::new_v4(),
                date: date.unwrap_or_else(|| Local::now().date_naive()),
                session_id: session,
                status: TaskStatus::Pending,
                summary: None,
                session_override: overrides.to_override(),
            };
            let (session_id, date) = (entry.session_id.clone(), entry.date);
            DailySchedule::update(&path, |schedule| {
                schedule.entries.push(entry);
                Ok(())
            })?;
            println!("✓ Scheduled {} on {}", session_id, date);
        }
    }
    Ok(())
}

// ============================================================================
// Display
// ============================================================================

fn display_header(session: &Session) {
    println!("\n╭─────────────────────────────────────────╮");
    println!("│  {}", session.name.to_uppercase());
    println!("╰─────────────────────────────────────────╯");
    if !session.description.is_empty() {
        println!("  {}", session.description);
    }
    println!();
}

fn display_timeline(timeline: &[TimelineStep]) {
    for (idx, step) in timeline.iter().enumerate() {
        match step {
            TimelineStep::Planning { modules } => {
                println!("  {}. PLANNING  ({} blocks)", idx, modules.len());
            }
            TimelineStep::Warmup(block) => {
                println!("  {}. WARMUP    {}", idx, block.title);
            }
            TimelineStep::Work { module, .. } => {
                println!("  {}. WORK      {} {}", idx, module.name, protocol_detail(module));
            }
            TimelineStep::Summary => println!("  {}. SUMMARY", idx),
        }
    }
}

fn protocol_detail(module: &Module) -> String {
    match module.protocol {
        Protocol::TimeCap => format!("[T, cap {}]", mmss(module.time_cap_seconds())),
        Protocol::ForTime => "[R, for time]".to_string(),
        Protocol::Emom => format!("[E, {} rounds]", module.emom_rounds()),
        Protocol::Libre => "[LIBRE]".to_string(),
    }
}

fn display_block(module: &Module) {
    println!("\n── {} {}", module.name, protocol_detail(module));
    if let Some(instruction) = &module.config.instruction {
        println!("   {}", instruction);
    }
    for (idx, exercise) in module.exercises.iter().enumerate() {
        let target = match &exercise.target {
            ExerciseTarget::Reps(n) => format!("{} reps", n),
            ExerciseTarget::Manifestation(cue) => cue.clone(),
        };
        let km = exercise
            .volume_km
            .map(|km| format!(", {:.1} km", km))
            .unwrap_or_default();
        println!("   {}: {} → {}{}", idx, exercise.name, target, km);
    }
}

async fn display_step(runner: &SessionRunner) {
    let idx = runner.current_index();
    match runner.current_step() {
        TimelineStep::Planning { modules } => {
            println!("\n── Planning");
            for module in modules {
                for exercise in module.exercises.iter().filter(|e| e.loadable) {
                    let planned = runner
                        .state()
                        .weight_plan(&exercise.stable_id)
                        .map(|kg| format!("{}kg", kg))
                        .unwrap_or_else(|| "-".into());
                    println!("   {} ({}): {}", exercise.stable_id, module.name, planned);
                }
            }
            println!("   'w <exercise> <kg>' to plan a weight, Enter to continue, 'q' to quit");
        }
        TimelineStep::Warmup(block) => {
            println!("\n── {}", block.title);
            for instruction in &block.instructions {
                println!("   • {}", instruction);
            }
            println!("   Enter to continue");
        }
        TimelineStep::Work { module, .. } => {
            display_block(module);
            if let Some(draft) = runner.state().draft(idx) {
                for (i, log) in draft.exercises().iter().enumerate() {
                    let weight = log
                        .weight_kg
                        .map(|kg| format!(" @ {}kg", kg))
                        .unwrap_or_default();
                    println!("   [{}] {} reps{}", i, log.reps, weight);
                }
            }
            if let Some(snapshot) = runner.timer_snapshot().await {
                println!("   {}", format_snapshot(&snapshot));
            }
            println!("   s/p/x timer, r <i> <±n>, w <i> <kg>, h <i> <bpm>, set <i> <reps> [kg],");
            println!("   t <round>, n <i> <note>, d [rpe] [!], skip, q");
        }
        TimelineStep::Summary => {
            println!("\n── Summary");
            println!("   Enter to analyse and save the session");
        }
    }
}

fn display_cue(event: &CueEvent) {
    let text = match event.cue {
        Cue::Halfway => "Halfway".to_string(),
        Cue::OneMinuteLeft => "One minute left".to_string(),
        Cue::Countdown { count } => format!("{}...", count),
        Cue::TimeUp => "Time!".to_string(),
        Cue::TargetReached => format!("Done in {}", mmss(event.snapshot.elapsed_seconds)),
        Cue::RoundHalfway { round } => format!("Round {} halfway", round),
        Cue::RoundCountdown { count, .. } => format!("{}...", count),
        Cue::RoundStarted { round } => format!("Round {} - go!", round),
        Cue::EmomComplete => "EMOM complete".to_string(),
    };
    println!("\n  ♪ {}", text);
}

fn format_snapshot(snapshot: &TimerSnapshot) -> String {
    let clock = match snapshot.remaining_seconds {
        Some(remaining) => format!("{} left", mmss(remaining)),
        None => mmss(snapshot.elapsed_seconds),
    };
    match (snapshot.round, snapshot.total_rounds) {
        (Some(round), Some(total)) => format!("{:?} round {}/{} {}", snapshot.status, round, total, clock),
        _ => format!("{:?} {}", snapshot.status, clock),
    }
}

fn display_history(stable_id: &str, log: &HistoricalLog) {
    let result = &log.result;
    println!(
        "{} - {} [{}] on {}",
        stable_id,
        result.block_name,
        result.protocol.code(),
        result.finalized_at.format("%Y-%m-%d")
    );
    for (idx, exercise) in result.exercises.iter().enumerate() {
        let weight = exercise
            .weight_kg
            .map(|kg| format!(" @ {}kg", kg))
            .unwrap_or_default();
        let adjustment = log.pending_adjustment(&exercise.exercise_stable_id);
        println!(
            "    {}: {} reps{} (next {})",
            exercise.name,
            result.credited_reps(idx),
            weight,
            coach_core::analysis::format_adjustment(adjustment)
        );
    }
}

fn display_outcome(outcome: &SessionOutcome) {
    println!("\n╭─────────────────────────────────────────╮");
    println!("│  SESSION COMPLETE");
    println!("╰─────────────────────────────────────────╯");
    for insight in &outcome.analysis.insights {
        println!("  • {}", insight.athlete_message);
    }
    let metrics = &outcome.analysis.metrics;
    println!();
    println!("  Volume: {:.0} kg", metrics.total_volume);
    println!("  Exercises completed: {}", metrics.completed_exercise_count);
    println!("  Efficiency: {:.0}%", metrics.efficiency_percent);
    if let Some(pace) = &metrics.cardio_pace {
        println!("  Pace: {}", pace);
    }
    for warning in &outcome.warnings {
        println!("  ! {}", warning);
    }
    println!("\n✓ Session logged!");
}
