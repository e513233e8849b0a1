mod cli;
mod commands;
mod config;
mod constants;
mod error;
mod labels;
mod mappings;
mod paths;
mod pending;
mod reconcile;
mod session;
mod status;
mod tf;
mod ui;

use crate::cli::{Cli, Command};
use crate::commands::{ActionTarget, Dispatcher, Operation};
use crate::config::Config;
use crate::constants::MAX_COMMENT_LINE_LENGTH;
use crate::error::TfError;
use crate::mappings::MappingTree;
use crate::pending::{FileStateStore, StateChange, StateStore};
use crate::reconcile::{MappingView, RefreshOutcome};
use crate::session::Session;
use crate::status::{ChangeRecord, status_char};
use crate::tf::{ProcessTf, TfRunner};
use anyhow::{Context, Result, bail};
use colored::Colorize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn main() {
    if let Err(e) = run() {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();
    ui::set_verbose(cli.verbose);

    let config = effective_config(&cli)?;
    let roots = open_roots(&cli.roots)?;
    debug!(
        "tf: {}, timeout {}s, policy {:?}",
        config.tf_path.display(),
        config.timeout.as_secs(),
        config.refresh_policy
    );

    let runner: Arc<dyn TfRunner> = Arc::new(ProcessTf::new(config.tf_path.clone(), config.timeout));
    let open_store = |mapped: &[PathBuf]| -> Result<Box<dyn StateStore>> {
        let store = FileStateStore::for_session(mapped, config.state_dir.as_deref())?;
        debug!("state file: {}", store.path().display());
        Ok(Box::new(store))
    };
    let session = ui::with_spinner(|| {
        Session::open(runner, &roots, open_store, config.refresh_policy)
    })?;

    let active = cli.active.as_deref().map(absolute).transpose()?;
    let dispatcher = Dispatcher::new(&session, active);
    let exit_code = dispatch(&cli, &session, &dispatcher)?;

    let remaining = session.close();
    debug!("{} change(s) left included", remaining.len());
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

/// config file overlaid with command-line flags
fn effective_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(tf) = &cli.tf {
        if tf.as_os_str().is_empty() {
            return Err(TfError::NotConfigured.into());
        }
        config.tf_path = tf.clone();
    }
    if let Some(secs) = cli.timeout {
        if secs == 0 {
            bail!("--timeout must be at least one second");
        }
        config.timeout = Duration::from_secs(secs);
    }
    if let Some(policy) = cli.refresh_policy {
        config.refresh_policy = policy;
    }
    if let Some(state_dir) = &cli.state_dir {
        config.state_dir = Some(state_dir.clone());
    }
    Ok(config)
}

/// absolute, with `.` and `..` resolved so it compares equal to reported paths
fn absolute(path: &Path) -> Result<PathBuf> {
    let absolute =
        std::path::absolute(path).with_context(|| format!("invalid path {}", path.display()))?;
    Ok(paths::normalize(&absolute))
}

/// requested roots made absolute, or the current directory
fn open_roots(requested: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if requested.is_empty() {
        let cwd = std::env::current_dir().context("failed to read current directory")?;
        return Ok(vec![paths::normalize(&cwd)]);
    }
    requested.iter().map(|root| absolute(root)).collect()
}

fn target(path: &Option<PathBuf>) -> Result<ActionTarget> {
    Ok(ActionTarget::from_arg(
        path.as_deref().map(absolute).transpose()?,
    ))
}

fn targets(paths: &[PathBuf]) -> Result<Vec<ActionTarget>> {
    paths
        .iter()
        .map(|path| Ok(ActionTarget::Explicit(absolute(path)?)))
        .collect()
}

/// note targets that no open workspace view covers; they are still selected
fn warn_unmapped(session: &Session, dispatcher: &Dispatcher, targets: &[ActionTarget]) {
    for target in targets {
        if let Ok(path) = dispatcher.resolve(target)
            && session.view_for(&path).is_none()
        {
            warning!("{} is not under an open workspace mapping", path.display());
        }
    }
}

/// refresh behind a spinner; failures leave the previous view and are reported
fn refresh(session: &Session) -> Option<Vec<RefreshOutcome>> {
    match ui::with_spinner(|| session.refresh_all()) {
        Ok(outcomes) => Some(outcomes),
        Err(e) => {
            warning!("{:#}", e);
            None
        }
    }
}

/// run the subcommand, returning the process exit code
fn dispatch(cli: &Cli, session: &Session, dispatcher: &Dispatcher) -> Result<i32> {
    match cli.subcommand() {
        Command::Status => {
            refresh(session);
            show_status(session, cli.json)?;
        }
        Command::Refresh => {
            if let Some(outcomes) = refresh(session) {
                show_refresh(session.views(), &outcomes);
            }
        }
        Command::Include { paths } => {
            let targets = targets(&paths)?;
            warn_unmapped(session, dispatcher, &targets);
            match dispatcher.include(&targets)? {
                StateChange::Modified => status!("included"),
                StateChange::Unmodified => info!("already included"),
            }
        }
        Command::Exclude { paths } => match dispatcher.exclude(&targets(&paths)?)? {
            StateChange::Modified => status!("excluded"),
            StateChange::Unmodified => info!("not included"),
        },
        Command::IncludeAll => {
            refresh(session);
            if session.include_all()? == StateChange::Unmodified {
                status!("nothing to include");
            } else {
                status!("all changes included");
            }
        }
        Command::ExcludeAll => {
            session.exclude_all()?;
            status!("all changes excluded");
        }
        Command::Add { path } => run_operation(session, dispatcher, Operation::Add, &path)?,
        Command::Checkout { path } => run_operation(session, dispatcher, Operation::Checkout, &path)?,
        Command::Delete { path } => run_operation(session, dispatcher, Operation::Delete, &path)?,
        Command::Undo { path } => run_operation(session, dispatcher, Operation::Undo, &path)?,
        Command::Get { path } => run_operation(session, dispatcher, Operation::Get, &path)?,
        Command::Checkin { message, yes } => checkin(session, dispatcher, message, yes)?,
        Command::View { path } => {
            let target = target(&path)?;
            let content = ui::with_spinner(|| dispatcher.view(&target))?;
            print!("{content}");
        }
        Command::Info { path } => {
            let target = target(&path)?;
            let info = ui::with_spinner(|| dispatcher.info(&target))?;
            if cli.json {
                info!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                show_info(&info);
            }
        }
        Command::Url { path } => {
            let target = target(&path)?;
            let url = ui::with_spinner(|| dispatcher.web_url(&target))?;
            if cli.json {
                info!("{}", serde_json::json!({ "url": url }));
            } else {
                info!("{}", url);
            }
        }
        Command::Versioned { path } => {
            let target = target(&path)?;
            let versioned = ui::with_spinner(|| dispatcher.is_versioned(&target))?;
            if versioned {
                status!("versioned");
            } else {
                info!("not versioned");
                return Ok(1);
            }
        }
        Command::Mappings => {
            let tree = session.mapping_tree();
            if cli.json {
                info!("{}", serde_json::to_string_pretty(&tree)?);
            } else {
                show_mappings(&tree);
            }
        }
    }
    Ok(0)
}

fn run_operation(
    session: &Session,
    dispatcher: &Dispatcher,
    operation: Operation,
    path: &Option<PathBuf>,
) -> Result<()> {
    let target = target(path)?;
    if let Ok(path) = dispatcher.resolve(&target)
        && !session.is_mapped(&path)
    {
        warning!("{} is outside every mapped folder", path.display());
    }
    let done = ui::with_spinner(|| dispatcher.run(operation, &target))?;
    status!("{}", operation.done_message(&done));
    Ok(())
}

fn checkin(
    session: &Session,
    dispatcher: &Dispatcher,
    message: Option<String>,
    yes: bool,
) -> Result<()> {
    refresh(session);
    let included = session.included_records();
    if included.is_empty() {
        bail!("no changes are included");
    }
    let stale = session.included_changes()?.len().saturating_sub(included.len());
    if stale > 0 {
        warning!("{} included path(s) have no pending change and are skipped", stale);
    }

    status!("checking in:");
    for record in &included {
        show_record(record);
    }
    info!();

    let comment = match message {
        Some(message) => message,
        None => match edit_comment()? {
            Some(comment) => comment,
            None => bail!("check-in cancelled"),
        },
    };
    if comment.trim().is_empty() {
        bail!("a check-in comment is required");
    }
    if comment.lines().any(|line| line.len() > MAX_COMMENT_LINE_LENGTH) {
        warning!("comment has lines longer than {} chars", MAX_COMMENT_LINE_LENGTH);
    }

    if !yes {
        match ui::prompt(&["YES", "no"])? {
            Some('y') => {}
            _ => bail!("check-in cancelled"),
        }
    }

    let checked_in = ui::with_spinner(|| dispatcher.checkin(&comment))?;
    status!("{} change(s) checked in", checked_in.len());
    Ok(())
}

/// ask for a check-in comment: in $EDITOR when set, else on one line
fn edit_comment() -> Result<Option<String>> {
    if !std::io::stdin().is_terminal() {
        bail!("a check-in comment is required (-m) when not running in a terminal");
    }
    if std::env::var_os("EDITOR").is_some() {
        return ui::edit_multi_line("");
    }
    status!("check-in comment:");
    ui::edit_one_line("")
}

fn show_record(record: &ChangeRecord) {
    info!(
        "{} {}  {}",
        status_char(&record.change_type),
        record.local_path.display(),
        record.tooltip().dimmed()
    );
}

fn show_group(title: &str, records: &[ChangeRecord]) {
    if records.is_empty() {
        return;
    }
    info!("  {} ({})", title, records.len());
    for record in records {
        info!("    {} {}", status_char(&record.change_type), record.local_path.display());
    }
}

fn show_status(session: &Session, json: bool) -> Result<()> {
    if json {
        let views: Vec<_> = session
            .views()
            .iter()
            .map(|view| {
                serde_json::json!({
                    "workspace": view.workspace(),
                    "roots": view.roots(),
                    "view": view.view(),
                })
            })
            .collect();
        info!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    for view in session.views() {
        let reconciled = view.view();
        status!("{} ({} pending)", view.workspace(), reconciled.len());
        if reconciled.is_empty() {
            info!("  no pending changes");
            continue;
        }
        show_group("included changes", &reconciled.included);
        show_group("excluded changes", &reconciled.excluded);
    }
    Ok(())
}

fn show_refresh(views: &[MappingView], outcomes: &[RefreshOutcome]) {
    for (view, outcome) in views.iter().zip(outcomes) {
        match outcome {
            RefreshOutcome::Completed(report) => {
                status!(
                    "{}: {} included, {} excluded",
                    view.workspace(),
                    report.included,
                    report.excluded
                );
                if report.passes > 1 {
                    debug!("{} pass(es) to serve queued refreshes", report.passes);
                }
                if report.duplicates > 0 {
                    debug!("{} change(s) reported by more than one mapping", report.duplicates);
                }
                debug!(
                    "{} line(s) read, {} skipped, {} record(s) dropped, {} outside the mapping",
                    report.stats.lines,
                    report.stats.skipped_lines,
                    report.stats.dropped_records,
                    report.stats.filtered_records
                );
            }
            RefreshOutcome::Skipped => {
                warning!("{}: refresh already running", view.workspace());
            }
        }
    }
}

fn show_info(info: &labels::InfoReport) {
    if let Some(local) = &info.local_information {
        status!("local information");
        let rows = [
            ("local path", &local.local_path),
            ("server path", &local.server_path),
            ("changeset", &local.changeset),
            ("change", &local.change),
            ("type", &local.item_type),
        ];
        show_rows(&rows);
    }
    if let Some(server) = &info.server_information {
        status!("server information");
        let rows = [
            ("server path", &server.server_path),
            ("changeset", &server.changeset),
            ("deletion id", &server.deletion_id),
            ("lock", &server.lock),
            ("lock owner", &server.lock_owner),
            ("last modified", &server.last_modified),
            ("type", &server.item_type),
            ("file type", &server.file_type),
            ("size", &server.size),
        ];
        show_rows(&rows);
    }
}

fn show_rows(rows: &[(&str, &Option<String>)]) {
    for (label, value) in rows {
        if let Some(value) = value {
            info!("  {:<14}{}", label, value);
        }
    }
}

fn show_mappings(tree: &MappingTree) {
    if tree.collections.is_empty() {
        info!("no workspace mappings");
        return;
    }
    for collection in &tree.collections {
        status!("{}", collection.url);
        for workspace in &collection.workspaces {
            match &workspace.owner {
                Some(owner) => info!("  {} ({})", workspace.name, owner),
                None => info!("  {}", workspace.name),
            }
            for mapping in &workspace.mappings {
                info!(
                    "    {} {} {}",
                    mapping.local_path.display(),
                    "⇔".dimmed(),
                    mapping.server_path
                );
            }
        }
    }
}
