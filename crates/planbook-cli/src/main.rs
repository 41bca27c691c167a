mod tracing_setup;

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use planbook_core::constants::DEFAULT_PLAN_TITLE;
use planbook_core::models::{EstimateField, Plan, Row, RowId};
use planbook_core::store::{PlanUpdater, PlanView, PriorityAssigner};
use planbook_core::{CoreConfig, CoreEvent, CoreHandle, CoreRuntime, EnvSignal};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "planbook")]
#[command(about = "Plan tracking over a realtime hosted database")]
struct Cli {
    /// Path to JSON config file (default: <config dir>/planbook/config.json)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Log every realtime payload
    #[arg(long, short)]
    verbose: bool,

    /// Which estimate column to show and roll up
    #[arg(long, value_enum, default_value_t = FieldArg::Hours)]
    field: FieldArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum FieldArg {
    Hours,
    Budget,
}

impl From<FieldArg> for EstimateField {
    fn from(arg: FieldArg) -> Self {
        match arg {
            FieldArg::Hours => EstimateField::ManhoursRequired,
            FieldArg::Budget => EstimateField::Budget,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List active leaf tasks in priority order
    Tasks,

    /// Print the plan tree with estimate hints
    Tree,

    /// Print the path from the root down to a plan
    Trail { id: String },

    /// Append a new plan under a parent (or at the top level)
    Add {
        title: String,
        #[arg(long, short)]
        parent: Option<String>,
    },

    /// Toggle a plan's done flag
    Done { id: String },

    /// Archive the done children of a plan (or of the top level)
    ArchiveDone { parent: Option<String> },

    /// Move a plan to a position among its (new) siblings
    Move {
        id: String,
        #[arg(long, short)]
        index: usize,
        /// New parent; keeps the current one when omitted
        #[arg(long, short)]
        parent: Option<String>,
    },

    /// Follow realtime changes. Reads `visible`, `hidden`, `online`, `offline`
    /// and `set <id> <field> <json>` lines from stdin.
    Watch,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_setup::init_tracing(cli.verbose);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&rt, run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let path = match cli.config {
        Some(path) => path,
        None => CoreConfig::default_path().context("No config directory on this platform")?,
    };
    let mut config = CoreConfig::load_or_default(&path)?;
    config.verbose |= cli.verbose;

    let mut runtime = CoreRuntime::connect(config).context("Failed to set up remote store")?;
    runtime
        .ensure_plans_fetched()
        .await
        .context("Failed to load plans")?;
    let field = EstimateField::from(cli.field);

    match cli.command {
        Commands::Tasks => {
            let view = runtime.plan_view();
            for plan in view.active_task_list() {
                println!("{}", plan_line(&view, plan, field));
            }
        }
        Commands::Tree => {
            let view = runtime.plan_view();
            for line in tree_lines(&view, field) {
                println!("{}", line);
            }
        }
        Commands::Trail { id } => {
            let view = runtime.plan_view();
            let trail = view.ancestry_trail(&RowId::from(id.as_str()));
            if trail.is_empty() {
                bail!("Unknown plan {}", id);
            }
            let titles: Vec<&str> = trail.iter().map(|p| title(p)).collect();
            println!("{}", titles.join(" / "));
        }
        Commands::Add { title, parent } => {
            let parent = parent.map(RowId::from);
            let view = runtime.plan_view();
            let parent_plan = match &parent {
                Some(id) => Some(view.plan(id).with_context(|| format!("Unknown parent plan {}", id))?),
                None => None,
            };
            let siblings = sorted_siblings(&view, parent.as_ref(), None);
            let priority = PriorityAssigner::new(&view).new_item_priority(&siblings, parent_plan);

            let mut row = Row::new().with("title", title).with("priority", priority);
            if let Some(parent) = &parent {
                row.set("parent_id", parent.to_value());
            }
            let created = runtime.plans().create(row).await?;
            match created.id() {
                Some(id) => println!("Created plan {}", id),
                None => println!("Created plan"),
            }
        }
        Commands::Done { id } => {
            let updated = runtime
                .plan_updater()
                .complete_plan(&RowId::from(id.as_str()))
                .await?;
            let done = updated.get("done").and_then(Value::as_bool).unwrap_or(false);
            println!("Plan {} is {}", id, if done { "done" } else { "open" });
        }
        Commands::ArchiveDone { parent } => {
            let parent = parent.map(RowId::from);
            let archived = runtime
                .plan_updater()
                .archive_done_children(parent.as_ref())
                .await;
            println!("Archived {} plans", archived);
        }
        Commands::Move { id, index, parent } => {
            let view = runtime.plan_view();
            let plan = view
                .plan(&RowId::from(id.as_str()))
                .with_context(|| format!("Unknown plan {}", id))?;
            let parent = parent.map(RowId::from).or_else(|| plan.parent_id.clone());

            let mut list = sorted_siblings(&view, parent.as_ref(), Some(&plan.id));
            let index = index.min(list.len());
            list.insert(index, plan);

            let mut fields = Row::new();
            if let Some(priority) = PriorityAssigner::new(&view).moved_item_priority(&list, index) {
                fields.set("priority", priority);
            }
            if parent != plan.parent_id {
                fields.set(
                    "parent_id",
                    parent.as_ref().map_or(Value::Null, RowId::to_value),
                );
            }
            if fields.is_empty() {
                println!("Nothing to change");
            } else {
                runtime.plans().update(&plan.id, fields).await?;
                println!("Moved plan {} to position {}", id, index);
            }
        }
        Commands::Watch => watch(&mut runtime).await?,
    }

    Ok(())
}

async fn watch(runtime: &mut CoreRuntime) -> Result<()> {
    runtime.start();
    let mut events = runtime
        .take_event_rx()
        .context("Event receiver already taken")?;
    let handle = runtime.handle();
    let updater = runtime.plan_updater();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            Some(event) = events.recv() => print_event(&event),
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if let Err(e) = handle_input(&line, &handle, &updater) {
                        eprintln!("{}", e);
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!("stdin closed: {}", e);
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    runtime.shutdown().await;
    Ok(())
}

#[derive(Debug, PartialEq)]
enum Input {
    Signal(EnvSignal),
    Set { id: RowId, field: String, value: Value },
}

fn parse_input(line: &str) -> Result<Option<Input>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if let Some(signal) = EnvSignal::parse(line) {
        return Ok(Some(Input::Signal(signal)));
    }
    let mut parts = line.splitn(4, char::is_whitespace);
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("set"), Some(id), Some(field), Some(raw)) => {
            // bare words are taken as strings
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            Ok(Some(Input::Set {
                id: RowId::from(id),
                field: field.to_string(),
                value,
            }))
        }
        _ => bail!("Unrecognized input: {}", line),
    }
}

fn handle_input(line: &str, handle: &CoreHandle, updater: &PlanUpdater) -> Result<()> {
    match parse_input(line)? {
        Some(Input::Signal(signal)) => handle
            .environment(signal)
            .context("Subscription task is not running")?,
        Some(Input::Set { id, field, value }) => {
            updater.update_plan(id, Row::new().with(field, value));
        }
        None => {}
    }
    Ok(())
}

fn print_event(event: &CoreEvent) {
    match event {
        CoreEvent::RowChanged { table, kind, id } => println!("{} {} {}", kind, table, id),
        CoreEvent::ConnectionChanged(state) => println!("connection: {:?}", state),
        CoreEvent::WriteFailed { table, message } => {
            eprintln!("write to {} failed: {}", table, message)
        }
    }
}

fn title(plan: &Plan) -> &str {
    plan.title.as_deref().unwrap_or(DEFAULT_PLAN_TITLE)
}

/// Non-archived children of `parent` in priority order, without `skip`.
fn sorted_siblings<'a>(view: &'a PlanView, parent: Option<&RowId>, skip: Option<&RowId>) -> Vec<&'a Plan> {
    let mut siblings: Vec<&Plan> = view
        .children(parent)
        .into_iter()
        .filter(|p| !p.archived && Some(&p.id) != skip)
        .collect();
    siblings.sort_by(|a, b| a.priority.total_cmp(&b.priority));
    siblings
}

fn plan_line(view: &PlanView, plan: &Plan, field: EstimateField) -> String {
    let mark = if plan.archived {
        "~"
    } else if plan.done {
        "x"
    } else {
        " "
    };
    let estimate = match plan.estimate(field) {
        Some(value) => value.to_string(),
        None => view.placeholder(plan, field),
    };
    let mut line = format!("[{}] {} {}", mark, plan.id, title(plan));
    if !estimate.is_empty() {
        line.push(' ');
        line.push_str(&estimate);
    }
    if view.red_flag(plan, field) {
        line.push_str(" !");
    }
    let blockers = view.blockers(&plan.id);
    if !blockers.is_empty() {
        let ids: Vec<String> = blockers.iter().map(RowId::to_string).collect();
        line.push_str(&format!(" (blocked by {})", ids.join(", ")));
    }
    line
}

fn tree_lines(view: &PlanView, field: EstimateField) -> Vec<String> {
    fn walk<'a>(
        view: &'a PlanView,
        parent: Option<&RowId>,
        depth: usize,
        field: EstimateField,
        seen: &mut HashSet<&'a RowId>,
        out: &mut Vec<String>,
    ) {
        let mut children = view.children(parent);
        children.sort_by(|a, b| a.priority.total_cmp(&b.priority));
        for child in children {
            if !seen.insert(&child.id) {
                continue;
            }
            out.push(format!("{}{}", "  ".repeat(depth), plan_line(view, child, field)));
            walk(view, Some(&child.id), depth + 1, field, seen, out);
        }
    }

    let mut out = Vec::new();
    let mut seen = HashSet::new();
    walk(view, None, 0, field, &mut seen, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn view(rows: Vec<Value>) -> PlanView {
        let rows: Vec<Row> = rows.into_iter().filter_map(Row::from_value).collect();
        PlanView::from_rows(&rows, &[])
    }

    #[test]
    fn test_parse_signal_input() {
        assert_eq!(
            parse_input("visible").unwrap(),
            Some(Input::Signal(EnvSignal::Visible))
        );
        assert_eq!(parse_input("  ").unwrap(), None);
        assert!(parse_input("dance").is_err());
    }

    #[test]
    fn test_parse_set_input() {
        assert_eq!(
            parse_input("set 4 manhours_required 2.5").unwrap(),
            Some(Input::Set {
                id: RowId::from(4),
                field: "manhours_required".to_string(),
                value: json!(2.5),
            })
        );
        match parse_input("set 4 title Write the docs").unwrap() {
            Some(Input::Set { value, .. }) => assert_eq!(value, json!("Write the docs")),
            other => panic!("unexpected input: {:?}", other),
        }
    }

    #[test]
    fn test_plan_line_shows_placeholder_and_flag() {
        let v = view(vec![
            json!({"id": 1, "title": "release", "manhours_required": 4}),
            json!({"id": 2, "parent_id": 1, "title": "build", "manhours_required": 6}),
            json!({"id": 3, "parent_id": 1, "title": "docs"}),
        ]);
        let field = EstimateField::ManhoursRequired;
        assert_eq!(
            plan_line(&v, v.plan(&RowId::from(1)).unwrap(), field),
            "[ ] 1 release 4 !"
        );
        assert_eq!(
            plan_line(&v, v.plan(&RowId::from(3)).unwrap(), field),
            "[ ] 3 docs !"
        );
    }

    #[test]
    fn test_tree_lines_indent_children_by_priority() {
        let v = view(vec![
            json!({"id": 1, "title": "root", "priority": 1.0}),
            json!({"id": 2, "parent_id": 1, "title": "second", "priority": 3.0}),
            json!({"id": 3, "parent_id": 1, "title": "first", "priority": 2.0}),
        ]);
        let lines = tree_lines(&v, EstimateField::Budget);
        assert_eq!(
            lines,
            vec!["[ ] 1 root (0)", "  [ ] 3 first (0)", "  [ ] 2 second (0)"]
        );
    }
}
