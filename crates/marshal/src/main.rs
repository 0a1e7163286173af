use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context;
use marshal::{
    cli::{self, Verbosity},
    coordinator::FleetCoordinator,
    interfaces::ControllerRequest,
    sim::{Scenario, ScenarioAgent, SimWorld},
    AgentStatus,
};
use rvo_config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = cli::parse_arguments();
    init_logging(cli.verbosity());

    if cli.dump_default {
        println!("{}", toml::to_string_pretty(&Config::default())?);
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("reading config file {}", path.display()))?,
        None => Config::default(),
    };

    let Some(scenario_path) = &cli.scenario else {
        info!("no scenario given, nothing to do");
        return Ok(());
    };
    let scenario = Scenario::from_file(scenario_path)
        .with_context(|| format!("reading scenario file {}", scenario_path.display()))?;

    run_scenario(&config, &scenario)
}

/// Run a scenario against the loopback simulator until every agent reports
/// success or the scenario's time budget runs out.
fn run_scenario(config: &Config, scenario: &Scenario) -> anyhow::Result<()> {
    if let Some(name) = &scenario.name {
        info!(scenario = %name, agents = scenario.agents.len(), "starting scenario");
    }

    let world = Arc::new(SimWorld::new(
        config.controller.controller_period_s.get(),
        config.controller.map_frame.clone(),
    ));
    for agent in &scenario.agents {
        world.add_agent(&agent.id, agent.start);
    }

    let coordinator = FleetCoordinator::new(
        config.clone(),
        world.clone(),
        world.clone(),
        world.clone(),
    );
    coordinator.handle_request(ControllerRequest::AssignPaths(
        scenario.agents.iter().map(ScenarioAgent::request).collect(),
    ));

    let handle = coordinator.start();

    let deadline = Instant::now() + Duration::from_secs_f64(scenario.max_time_s);
    let completed = loop {
        let all_succeeded = scenario
            .agents
            .iter()
            .all(|agent| world.status(&agent.id) == Some(AgentStatus::Succeeded));
        if all_succeeded {
            break true;
        }
        if Instant::now() >= deadline {
            break false;
        }
        std::thread::sleep(Duration::from_millis(100));
    };

    coordinator.shutdown();
    handle
        .join()
        .map_err(|_| anyhow::anyhow!("controller loop panicked"))?;

    for agent in &scenario.agents {
        info!(
            agent = %agent.id,
            status = ?world.status(&agent.id),
            pose = ?world.pose(&agent.id),
            "final state"
        );
    }

    if completed {
        info!("scenario completed");
        Ok(())
    } else {
        anyhow::bail!("scenario timed out after {} s", scenario.max_time_s)
    }
}

fn init_logging(verbosity: Verbosity) {
    let default_directive = match verbosity {
        Verbosity::None => "marshal=info",
        Verbosity::Normal => "marshal=debug",
        Verbosity::Very => "marshal=trace",
        Verbosity::Ultra => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
