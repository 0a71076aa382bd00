mod config;

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use sim_client::aggregate::{aggregate_outcomes, AggregatedResults};
use sim_client::{HttpJobService, JobEvent, SimulationController};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store the scenario or agent configuration for the next run
    Setup {
        #[command(subcommand)]
        target: SetupTarget,
    },
    /// Submit a simulation and follow it until its results are stored
    Run,
    /// Aggregate stored results into per-attribute decision tables
    Results,
    /// Show the stored configuration and the state of the last run
    Show,
}

#[derive(Subcommand, Debug)]
enum SetupTarget {
    /// The situation personas react to
    Scenario(ScenarioArgs),
    /// The demographic split personas are drawn from
    Agents(AgentArgs),
}

#[derive(Args, Debug)]
struct ScenarioArgs {
    #[arg(long)]
    scenario: String,
    #[arg(long)]
    context: String,
    #[arg(long)]
    action_space: String,
}

#[derive(Args, Debug)]
struct AgentArgs {
    #[arg(long)]
    demographic_group: String,
    /// Comma separated attribute values, e.g. "Male,Female"
    #[arg(long)]
    attributes: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let cli = Cli::parse();

    let settings = config::load_settings();
    let storage = Storage::new(&settings.database_url).await?;

    match cli.command {
        Command::Setup { target } => match target {
            SetupTarget::Scenario(args) => setup_scenario(&storage, args).await,
            SetupTarget::Agents(args) => setup_agents(&storage, args).await,
        },
        Command::Run => run_simulation(&settings, &storage).await,
        Command::Results => show_results(&storage).await,
        Command::Show => show_state(&settings, &storage).await,
    }
}

async fn setup_scenario(storage: &Storage, args: ScenarioArgs) -> Result<()> {
    let scenario = args.scenario.trim();
    let context = args.context.trim();
    let action_space = args.action_space.trim();
    if scenario.is_empty() || context.is_empty() || action_space.is_empty() {
        bail!("scenario, context and action space must all be non-empty");
    }

    storage
        .save_scenario_config(scenario, context, action_space)
        .await?;
    println!("Scenario configuration saved.");
    Ok(())
}

async fn setup_agents(storage: &Storage, args: AgentArgs) -> Result<()> {
    let demographic_group = args.demographic_group.trim();
    if demographic_group.is_empty() {
        bail!("demographic group must be non-empty");
    }
    let attributes = parse_attributes(&args.attributes);
    if attributes.is_empty() {
        bail!("at least one attribute value is required");
    }

    storage
        .save_agent_config(demographic_group, &attributes)
        .await?;
    println!(
        "Agent configuration saved: {} split into {}.",
        demographic_group,
        attributes.join(", ")
    );
    Ok(())
}

fn parse_attributes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

async fn run_simulation(settings: &config::Settings, storage: &Storage) -> Result<()> {
    let Some(request) = storage.load_simulation_request().await? else {
        bail!("configuration incomplete: run `setup scenario` and `setup agents` first");
    };

    let service = Arc::new(HttpJobService::new(settings.service_url.clone()));
    let controller = SimulationController::new(service, Arc::new(storage.clone()));
    let mut events = controller.subscribe_events();

    println!("Submitting simulation to {}...", settings.service_url);
    if !controller.start(request).await? {
        bail!("a simulation is already in flight");
    }

    loop {
        match events.recv().await? {
            JobEvent::Submitted { simulation_id } => {
                println!("Simulation {simulation_id} accepted.");
            }
            JobEvent::Progress { snapshot, .. } => {
                println!(
                    "Processing {} of {} agents...",
                    snapshot.completed, snapshot.total
                );
            }
            JobEvent::FetchingResults => {
                println!("Simulation complete, fetching results...");
            }
            JobEvent::Completed { agent_count } => {
                println!("{agent_count} persona actions retrieved and stored.");
                return Ok(());
            }
            JobEvent::Failed { error } => {
                return Err(error.into());
            }
        }
    }
}

async fn show_results(storage: &Storage) -> Result<()> {
    let Some(outcomes) = storage.load_agent_outcomes().await? else {
        println!("No simulation results stored yet.");
        return Ok(());
    };
    if outcomes.is_empty() {
        println!("The last simulation stored no agent outcomes.");
        return Ok(());
    }

    let aggregated = aggregate_outcomes(&outcomes);
    print_decision_tables(&aggregated);

    println!();
    println!("Personas ({}):", outcomes.len());
    for outcome in &outcomes {
        let decision = if outcome.result.decision.is_empty() {
            "-"
        } else {
            outcome.result.decision.as_str()
        };
        println!(
            "  {} ({}): {}",
            outcome.persona.name, outcome.attribute, decision
        );
        if let Some(description) = &outcome.persona.description {
            if !description.is_empty() {
                println!("      profile: {description}");
            }
        }
        if !outcome.result.rationale.is_empty() {
            println!("      reason: {}", outcome.result.rationale);
        }
    }
    Ok(())
}

fn print_decision_tables(aggregated: &AggregatedResults) {
    if aggregated.series.is_empty() {
        println!("No valid outcomes to aggregate.");
        return;
    }

    println!("Decision shares by attribute:");
    for series in &aggregated.series {
        println!();
        println!("  {}", series.attribute);
        // the catalog keeps rows aligned across groups; a decision a group
        // never took shows as a dash, not as zero
        for decision in &aggregated.decision_catalog {
            match series.shares.iter().find(|share| &share.decision == decision) {
                Some(share) => println!("    {:<16} {:>6.1}%", decision, share.percent),
                None => println!("    {:<16} {:>6}", decision, "-"),
            }
        }
    }
}

async fn show_state(settings: &config::Settings, storage: &Storage) -> Result<()> {
    storage.health_check().await?;
    println!("Service URL:  {}", settings.service_url);
    println!("Database URL: {}", settings.database_url);
    println!();

    match storage.load_simulation_request().await? {
        Some(request) => {
            println!("Scenario:          {}", request.scenario);
            println!("Context:           {}", request.context);
            println!("Action space:      {}", request.action_space);
            println!("Demographic group: {}", request.demographic_group);
            println!("Attributes:        {}", request.attributes.join(", "));
        }
        None => println!("Configuration incomplete: run `setup scenario` and `setup agents`."),
    }

    println!();
    match storage.blob_updated_at(storage::keys::AGENTS_ARRAY).await? {
        Some(updated_at) => println!("Results stored at {updated_at}."),
        None => println!("No simulation results stored yet."),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_are_trimmed_and_empties_dropped() {
        assert_eq!(
            parse_attributes(" Male , Female ,, "),
            vec!["Male".to_string(), "Female".to_string()]
        );
    }

    #[test]
    fn attribute_parsing_keeps_order() {
        assert_eq!(
            parse_attributes("Elderly,Adult,Child"),
            vec![
                "Elderly".to_string(),
                "Adult".to_string(),
                "Child".to_string()
            ]
        );
    }
}
