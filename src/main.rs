use interlockrail::persist;
use interlockrail::plan::{self, SimulationResult};
use interlockrail::scenario;
use interlockrail::simulation::Simulation;
use log::*;

use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "interlockrail", about = "Railway interlocking simulator.")]
struct Opt {
    /// Scenario file
    #[structopt(name = "FILE")]
    #[structopt(parse(from_os_str))]
    file: PathBuf,

    /// Write plan JSON of the run.
    #[structopt(short)]
    #[structopt(parse(from_os_str))]
    planoutputfile: Option<PathBuf>,

    /// Activate debug mode
    #[structopt(short, long)]
    verbose: bool,

    /// Stop the run after this many ticks.
    #[structopt(long)]
    max_ticks: Option<usize>,

    /// Number of signals refreshed per tick.
    #[structopt(long)]
    signals_per_tick: Option<usize>,

    /// Restore signal and deadlock state saved by an earlier run.
    #[structopt(long)]
    #[structopt(parse(from_os_str))]
    restore: Option<PathBuf>,

    /// Save signal and deadlock state at the end of the run.
    #[structopt(long)]
    #[structopt(parse(from_os_str))]
    save: Option<PathBuf>,
}

fn main() {
    let _h1 = hprof::enter("init");

    let opt = Opt::from_args();
    let level = if opt.verbose {
        if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    } else {
        LevelFilter::Error
    };
    if let Err(e) = simple_logger::SimpleLogger::new().with_level(level).init() {
        eprintln!("Could not set up logging: {}", e);
    }
    info!("{:#?}", opt);
    drop(_h1);

    if let Err(e) = run(opt) {
        error!("{}", e);
        eprintln!("{}", e);
        std::process::exit(1);
    }

    hprof::end_frame();
    hprof::profiler().print_timing();
}

fn run(opt: Opt) -> Result<(), Box<dyn std::error::Error>> {
    let mut net = {
        let _h = hprof::enter("load");
        scenario::load(&opt.file)?
    };
    if let Some(n) = opt.max_ticks {
        net.settings.max_ticks = n;
    }
    if let Some(n) = opt.signals_per_tick {
        net.settings.signals_per_tick = n;
    }
    if let Some(f) = &opt.restore {
        persist::restore_state(f, &mut net)?;
        info!("Restored state from {}", f.display());
    }

    let mut simulation = Simulation::new(net);
    let result = {
        let _h = hprof::enter("simulate");
        simulation.run()?
    };

    let (summary, commands) = plan::print_plan(result.plan());
    debug!("Plan:\n{}", summary);
    debug!("Commands:\n{}", commands);
    match &result {
        SimulationResult::Finished(_) => println!("All trains reached their destinations."),
        SimulationResult::Stalled(plan) => println!("Stalled after {} ticks.", plan.steps.len().saturating_sub(1)),
    }

    if let Some(f) = &opt.planoutputfile {
        plan::write_plan_json(f, result.plan())?;
        info!("Wrote plan to file {}", f.display());
    }
    if let Some(f) = &opt.save {
        persist::save_state(f, &simulation.net)?;
        info!("Saved state to file {}", f.display());
    }
    Ok(())
}
