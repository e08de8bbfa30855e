use std::process;
use std::sync::atomic::Ordering;

use log::{error, info};
use structopt::StructOpt;

use urban_twin::agent::{AgentOptions, TrafficLightAgent};
use urban_twin::analyzer::TrafficAnalyzer;
use urban_twin::bus::RabbitBus;
use urban_twin::config::Flags;
use urban_twin::engine::SimulationLoop;
use urban_twin::errors::{Result, TwinError};
use urban_twin::kernel::ScriptedKernel;
use urban_twin::predictor::{TrafficPredictor, TurnPredictor};
use urban_twin::time_pattern::TimePattern;
use urban_twin::topology::TopologyStore;
use urban_twin::turns::{TurnPatternTable, TurnRouter};

#[tokio::main]
async fn main() {
    env_logger::init();
    let flags = match Flags::from_iter_safe(std::env::args()) {
        Ok(flags) => flags,
        Err(err) if err.use_stderr() => {
            let err = TwinError::Config(err.message);
            error!("{}", err);
            process::exit(err.exit_code());
        }
        // --help and --version print on stdout and exit 0.
        Err(err) => err.exit(),
    };
    match run(flags).await {
        Ok(()) => {}
        Err(err) => {
            error!("{}", err);
            process::exit(err.exit_code());
        }
    }
}

async fn run(flags: Flags) -> Result<()> {
    flags.validate()?;
    let time_pattern = match (&flags.time_pattern, &flags.dates) {
        (Some(path), _) => TimePattern::load(path)?,
        (_, Some(range)) => TimePattern::from_date_range(range)?,
        // validate() guarantees exactly one source.
        _ => return Err(TwinError::Config("no date source".into())),
    };
    let topology = TopologyStore::load_topology_files(&flags.edges, &flags.junctions)?;
    if flags.topology_db_ip.is_some() {
        info!("external topology store configured; this build persists in memory");
    }

    // Until a real microsimulator implements the kernel trait, local runs
    // drive the scripted one seeded from the loaded topology.
    let mut kernel = ScriptedKernel::new();
    for tl in topology.traffic_lights() {
        kernel.add_traffic_light(&tl.name, &["p1", "p2", "p3"], "p2");
        for detector in topology.detectors_of(&tl.name) {
            kernel.add_loop(&detector.name, &detector.lane);
        }
    }

    let window_minutes = flags.window_minutes();
    let analyzer_on = flags.analyzer_selection();
    let predictor_on = flags.traffic_predictor_selection();
    let turns_on = flags.turn_predictor_selection();

    let mut agents = Vec::new();
    let mut turn_predictors = Vec::new();
    for tl in topology.traffic_lights() {
        let mut options = AgentOptions {
            strategy: Some(flags.strategy),
            ..Default::default()
        };
        if analyzer_on.includes(&tl.name) {
            options.analyzer = Some(TrafficAnalyzer::with_defaults(window_minutes));
        }
        if predictor_on.includes(&tl.name) {
            let dir = flags.traffic_models.as_ref().ok_or_else(|| {
                TwinError::Config("--traffic-predictor needs --traffic-models".into())
            })?;
            options.predictor = Some(TrafficPredictor::load(dir, 1, true, window_minutes)?);
        }
        if turns_on.includes(&tl.name) {
            let dir = flags.turn_models.as_ref().ok_or_else(|| {
                TwinError::Config("--turn-predictor needs --turn-models".into())
            })?;
            let predictor = TurnPredictor::load(dir, 1)?;
            turn_predictors.push((tl.name.clone(), predictor.clone()));
            options.turn_predictor = Some(predictor);
        }
        if !flags.local {
            options.bus = Some(Box::new(RabbitBus::new(flags.amqp_url())));
        }
        agents.push(TrafficLightAgent::new(&tl.name, &topology, options)?);
    }

    let pattern = match &flags.turn_pattern {
        Some(path) => TurnPatternTable::from_file(path)?,
        None => TurnPatternTable::empty(),
    };
    // Vehicles loaded with precomputed routes are observed, never rerouted.
    let observe_only = flags.load_vehicles.is_some();
    let router = TurnRouter::new(pattern, observe_only, flags.seed);

    let mut sim = SimulationLoop::new(
        Box::new(kernel),
        topology,
        time_pattern,
        flags.temporal_window,
    );
    for agent in agents {
        sim.add_agent(agent);
    }
    sim.set_router(router);
    for (tl, predictor) in turn_predictors {
        sim.add_turn_predictor(&tl, predictor);
    }

    let stop = sim.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stop requested; closing the current window");
            stop.store(true, Ordering::SeqCst);
        }
    });

    let mut kernel_args = Vec::new();
    if let Some(config) = &flags.config {
        kernel_args.push("--config".to_string());
        kernel_args.push(config.display().to_string());
    }
    if let Some(vehicles) = &flags.load_vehicles {
        kernel_args.push("--load-vehicles".to_string());
        kernel_args.push(vehicles.display().to_string());
    }

    let outcome = tokio::task::spawn_blocking(move || sim.run(&kernel_args))
        .await
        .map_err(|e| TwinError::Kernel(e.to_string()))??;
    info!("simulation finished: {:?}", outcome);
    Ok(())
}
