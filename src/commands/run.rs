use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::agent::{Agent, AgentConfig, Ic50Task};
use crate::config::LmConfig;
use crate::error::PrismError;
use crate::llm::{ChatBackend, LlmClient};
use crate::metrics::{fold_error, EPS};
use crate::prism::types::normalize;
use crate::prism::{PrismLookup, ScreenHistory};
use crate::state::{AppState, Dataset};
use crate::tasks::{PrismDispatchQueue, QueueState};
use crate::tools::prism_tool::PRISM_IC50;
use crate::tools::pubchem::{PUBCHEM_CACHE, PUBCHEM_PROPERTIES, SEARCH_PUBCHEM_CID};
use crate::tools::{
    PrismIc50Tool, PubChemPropertiesTool, ScreenHistoryTool, SearchPubChemCidTool, TaskDispatcher,
};
use crate::trace::{append_jsonl, read_jsonl, TraceSummary, TraceUnit};

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ToolChoice {
    /// Results revealed earlier in this run
    ScreenHistory,
    /// Full PRISM table; exposes ground truth
    PrismIc50,
    /// PubChem CID search and compound properties
    Pubchem,
}

#[derive(Args)]
pub struct RunArgs {
    /// Restrict tasks to one CCLE cell line
    #[arg(long)]
    cell_line: Option<String>,

    /// Restrict tasks to one drug
    #[arg(long)]
    drug: Option<String>,

    /// Number of tasks to run (default: all remaining)
    #[arg(short = 'n', long)]
    limit: Option<usize>,

    /// Keep the canonical (drug, cell line) order
    #[arg(long)]
    no_shuffle: bool,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Unit requested from the agent
    #[arg(long, default_value = "uM")]
    unit: String,

    /// Experimental description passed to the agent
    #[arg(long)]
    description: Option<String>,

    /// Tools exposed to the agent (repeatable; default: none)
    #[arg(long = "tool", value_enum)]
    tools: Vec<ToolChoice>,

    #[arg(long, default_value_t = 8)]
    max_iterations: u32,

    /// Directory for the JSONL trace
    #[arg(long, default_value = "analysis/log")]
    log_dir: PathBuf,

    /// Save queue progress here after every task and resume from it if present
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Processed PRISM CSV (default: from config)
    #[arg(long)]
    data: Option<PathBuf>,

    #[arg(long)]
    casefold: bool,

    /// Serve cached tools from the disk cache only
    #[arg(long)]
    offline: bool,

    /// Keep tool results in memory for this run only
    #[arg(long, conflicts_with = "offline")]
    no_cache: bool,
}

/// File stem describing the run settings, as used for trace logs. Stable
/// across resumes of the same run.
fn run_label(total: usize, args: &RunArgs, lm: &LmConfig) -> String {
    let mut label = format!(
        "tasks={total};ccle={};shuffle={};seed={};model={};temperature={};max_tokens={}",
        args.cell_line.as_deref().unwrap_or("all"),
        !args.no_shuffle,
        args.seed,
        lm.model,
        lm.temperature,
        lm.max_tokens,
    );
    if let Some(drug) = &args.drug {
        label.push_str(&format!(";drug={drug}"));
    }
    label.replace('/', "_")
}

fn load_queue(args: &RunArgs, subset: Arc<PrismLookup>) -> Result<PrismDispatchQueue> {
    if let Some(path) = args.state_file.as_deref().filter(|p| p.is_file()) {
        let text = std::fs::read_to_string(path)?;
        let state: QueueState = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse queue state {}", path.display()))?;
        let queue = PrismDispatchQueue::from_state(subset, state)?;
        info!(
            path = %path.display(),
            cursor = queue.index(),
            next = ?queue.peek().map(|item| (item.drug, item.cell)),
            "resuming queue"
        );
        return Ok(queue);
    }
    Ok(PrismDispatchQueue::new(subset, !args.no_shuffle, Some(args.seed)))
}

fn save_queue(path: &Path, queue: &PrismDispatchQueue) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&queue.to_state())?)?;
    Ok(())
}

/// History holding every task the queue already handed out, so a resumed run
/// reveals what the interrupted one did.
fn replay_history(queue: &PrismDispatchQueue, casefold: bool) -> ScreenHistory {
    let mut history = ScreenHistory::new(casefold);
    for item in queue.dispatched() {
        history.add_dispatch_item(&item);
    }
    if !history.is_empty() {
        info!(revealed = history.len(), "screen history replayed from queue state");
    }
    history
}

fn build_dispatcher(
    state: &AppState,
    dataset: &Dataset,
    history: &Arc<RwLock<ScreenHistory>>,
    args: &RunArgs,
) -> Result<TaskDispatcher> {
    let mut dispatcher = TaskDispatcher::new();
    for choice in &args.tools {
        match choice {
            ToolChoice::ScreenHistory => {
                dispatcher.register(Arc::new(ScreenHistoryTool::new(history.clone())));
            }
            ToolChoice::PrismIc50 => {
                warn!("prism_ic50 exposes ground truth to the agent");
                let cache = if args.no_cache {
                    state.memory_cache(PRISM_IC50)
                } else {
                    state.prism_cache(dataset, args.offline)?
                };
                dispatcher.register_cached(Arc::new(PrismIc50Tool::new(dataset.lookup.clone())), cache);
            }
            ToolChoice::Pubchem => {
                let (client, disk_cache, limiter) = state.pubchem(args.offline)?;
                let cache = if args.no_cache {
                    state.memory_cache(PUBCHEM_CACHE)
                } else {
                    disk_cache
                };
                dispatcher
                    .register_cached(Arc::new(SearchPubChemCidTool::new(client.clone())), cache.clone())
                    .register_cached(Arc::new(PubChemPropertiesTool::new(client)), cache);
                dispatcher
                    .with_limiter(SEARCH_PUBCHEM_CID, limiter.clone())?
                    .with_limiter(PUBCHEM_PROPERTIES, limiter)?;
            }
        }
    }
    info!(tools = ?dispatcher.tool_names(), "tools registered");
    Ok(dispatcher)
}

pub async fn run(config: Option<&Path>, cache_dir: Option<&Path>, args: RunArgs) -> Result<()> {
    let state = AppState::load(config, cache_dir)?;
    let lm = state.config.lm_config()?;
    let dataset = state.dataset(args.data.as_deref(), args.casefold)?;

    let cell = args.cell_line.as_deref().map(|c| normalize(c, args.casefold));
    let drug = args.drug.as_deref().map(|d| normalize(d, args.casefold));
    let subset = dataset.lookup.subset(|r| {
        cell.as_deref().map_or(true, |c| normalize(&r.cell_line, args.casefold) == c)
            && drug.as_deref().map_or(true, |d| normalize(&r.drug, args.casefold) == d)
    });
    if subset.is_empty() {
        bail!("no PRISM records match the requested cell line / drug filter");
    }
    info!(tasks = subset.len(), "task subset selected");

    let mut queue = load_queue(&args, Arc::new(subset))?;
    let history = Arc::new(RwLock::new(replay_history(&queue, args.casefold)));
    let dispatcher = Arc::new(build_dispatcher(&state, &dataset, &history, &args)?);

    let steps = args.limit.unwrap_or(usize::MAX).min(queue.remaining());
    let log_file = args
        .log_dir
        .join(format!("{}.jsonl", run_label(queue.total(), &args, &lm)));
    let llm: Arc<dyn ChatBackend> = Arc::new(LlmClient::new(lm)?);
    let agent = Agent::new(
        llm,
        dispatcher.clone(),
        AgentConfig {
            max_iterations: args.max_iterations,
            ..Default::default()
        },
    );
    info!(steps, model = agent.model(), log = %log_file.display(), "starting run");

    let mut answered = 0usize;
    let mut failures = 0usize;
    while answered + failures < steps && queue.has_next() {
        let task_index = queue.index();
        let Some(item) = queue.dispatch() else { break };
        let task = Ic50Task {
            drug: item.drug.clone(),
            cell_line: item.cell.clone(),
            experimental_description: args.description.clone(),
            output_unit: args.unit.clone(),
        };
        let mut unit = TraceUnit::new(
            &item.drug,
            &item.cell,
            args.description.clone(),
            &args.unit,
            item.ic50,
        );

        match agent.predict(&task).await {
            Ok(prediction) => {
                let fold = fold_error(item.ic50, prediction.ic50_pred, EPS)?;
                info!(
                    task = task_index,
                    drug = %item.drug,
                    ic50_true = item.ic50,
                    ic50_pred = prediction.ic50_pred,
                    fold,
                    "task finished"
                );
                answered += 1;
                unit.record_prediction(prediction);
            }
            Err(err) => match err.downcast_ref::<PrismError>() {
                Some(PrismError::Parse(msg)) => {
                    warn!(task = task_index, drug = %item.drug, %msg, "no usable answer");
                    unit.error = Some(msg.clone());
                    failures += 1;
                }
                _ => {
                    return Err(err.context(format!("task {} ({}, {})", task_index, item.drug, item.cell)))
                }
            },
        }

        append_jsonl(&log_file, &unit)?;
        history.write().await.add_dispatch_item(&item);
        if let Some(path) = &args.state_file {
            save_queue(path, &queue)?;
        }
    }

    for cache in dispatcher.caches() {
        let stats = cache.stats().await;
        info!(cache = %stats.name, entries = stats.count, bytes = stats.bytes, "tool cache");
    }

    let units: Vec<TraceUnit> = if log_file.is_file() {
        read_jsonl(&log_file)?
    } else {
        Vec::new()
    };
    let summary = TraceSummary::from_units(&units)?;
    let fmt = |v: Option<f64>| v.map(|x| format!("{x:.2}")).unwrap_or_else(|| "n/a".to_string());
    println!(
        "this session: {answered} predictions, {failures} failures
         trace ({} predictions, {} failures): geometric mean fold error {}, mean absolute error {}
         trace: {}",
        summary.predictions,
        summary.failures,
        fmt(summary.geometric_mean_fold_error),
        fmt(summary.mean_absolute_error),
        log_file.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prism::{Ic50Record, LookupOptions};
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: RunArgs,
    }

    #[test]
    fn label_has_no_path_separators() {
        let wrapper = Wrapper::parse_from(["run", "--cell-line", "A549_LUNG", "--tool", "screen-history"]);
        let lm = LmConfig {
            model: "openai/gpt-5-nano".to_string(),
            ..LmConfig::default()
        };
        let label = run_label(5, &wrapper.args, &lm);
        assert_eq!(
            label,
            "tasks=5;ccle=A549_LUNG;shuffle=true;seed=42;model=openai_gpt-5-nano;temperature=1;max_tokens=20000"
        );
        assert!(wrapper.args.tools.contains(&ToolChoice::ScreenHistory));
        assert!(Wrapper::try_parse_from(["run", "--offline", "--no-cache"]).is_err());
    }

    #[test]
    fn resumed_run_keeps_label_and_revealed_history() {
        let dir = tempfile::tempdir().unwrap();
        let state_file = dir.path().join("queue.json");
        let lookup = Arc::new(
            PrismLookup::from_records(
                vec![
                    Ic50Record::new("drug1", "cell1", 1.0),
                    Ic50Record::new("drug2", "cell1", 2.0),
                    Ic50Record::new("drug3", "cell1", 3.0),
                ],
                LookupOptions::default(),
            )
            .unwrap(),
        );
        let state_arg = state_file.to_str().unwrap();
        let args = Wrapper::parse_from(["run", "-n", "2", "--state-file", state_arg]).args;
        let lm = LmConfig::default();

        let mut first = load_queue(&args, lookup.clone()).unwrap();
        let first_label = run_label(first.total(), &args, &lm);
        let done: Vec<_> = (0..2).filter_map(|_| first.dispatch()).collect();
        save_queue(&state_file, &first).unwrap();

        let resumed = load_queue(&args, lookup).unwrap();
        assert_eq!(resumed.index(), 2);
        assert_eq!(run_label(resumed.total(), &args, &lm), first_label);

        let history = replay_history(&resumed, false);
        assert_eq!(history.len(), 2);
        for item in &done {
            assert_eq!(
                history.get_record(&item.drug, &item.cell).map(|r| r.ic50),
                Some(item.ic50)
            );
        }
    }
}
