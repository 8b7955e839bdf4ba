//! Command Line
//!
//! Runs the built-in example simulations on the in-process transport, with a
//! progress bar and an optional JSON trace.
//!

use crate::clap;
use crate::clap::{Parser, Subcommand, ValueEnum};
use crate::example_sims::*;
use crate::runtime::*;
use crate::snapshot::*;
use crate::transport::*;
use crate::util::*;
use itertools::Itertools;
use parking_lot::Mutex;
use pbr::ProgressBar;
use std::sync::Arc;

#[derive(Parser, Clone)]
#[clap(version = env!("CARGO_PKG_VERSION"))]
#[clap(about = "Distributed halo-exchange runtime for evolving-graph simulations")]
#[clap(color = clap::ColorChoice::Auto)]
#[clap(propagate_version = true)]
#[clap(subcommand_required = true)]
#[clap(arg_required_else_help = true)]
pub struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// run a built-in example simulation
    Run(RunParameters),
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ExampleSimType {
    /// two-PE chase along a number line
    Chase,
    /// infection spreading through random walkers
    Infection,
}

#[derive(Parser, Clone)]
pub struct RunParameters {
    /// example simulation to run
    #[clap(value_enum)]
    sim: ExampleSimType,
    /// number of PEs (worker threads)
    #[clap(short = 'n', long, default_value_t = 2)]
    n_pes: usize,
    /// walkers per PE (infection only)
    #[clap(short = 'a', long, default_value_t = 64)]
    actors_per_pe: usize,
    /// number line length (chase only)
    #[clap(long, default_value_t = 50_000)]
    positions: usize,
    /// grid side in cells (infection only)
    #[clap(long, default_value_t = 10)]
    grid_dim: usize,
    /// infection radius (infection only)
    #[clap(long, default_value_t = 1.5)]
    infection_radius: f64,
    /// iteration cap, 0 for unlimited
    #[clap(short = 'r', long, default_value_t = 1000)]
    max_iterations: u64,
    /// wall-clock budget in milliseconds, 0 for unlimited
    #[clap(long, default_value_t = 0)]
    max_elapsed_ms: u64,
    /// runtime configuration overrides
    #[clap(long, default_value_t = json!({}))]
    runtime_config: serde_json::Value,
    /// record a JSON trace of PE 0's iterations
    #[clap(long, action)]
    enable_snapshot: bool,
    /// trace output path
    #[clap(long, default_value_t = format!("halosim_trace.json"))]
    snapshot_path: String,
    /// rng seed (infection only)
    #[clap(long, default_value_t = 42)]
    seed: u64,
}

impl Cli {
    pub fn run(self) {
        match self.command {
            Commands::Run(params) => params.run(),
        }
    }
}

impl RunParameters {
    fn config(&self, npartitions: usize, max_local_vertices: usize) -> HaloConfig {
        let mut config: HaloConfig =
            serde_json::from_value(self.runtime_config.clone()).expect("invalid runtime config");
        config.npartitions = npartitions;
        config.max_local_vertices = max_local_vertices;
        config.max_iterations = self.max_iterations;
        config.max_elapsed_ms = self.max_elapsed_ms;
        config
    }

    pub fn run(&self) {
        match self.sim {
            ExampleSimType::Chase => {
                assert_eq!(self.n_pes, 2, "the chase runs on exactly two PEs");
                assert!(self.positions > 64, "the chase needs some room to run");
                let config = self.config(self.positions, 1);
                let positions = self.positions;
                let reports = Mutex::new(vec![]);
                let params = self.clone();
                LocalMemTransport::launch(2, config.heap_words_needed(2), |transport| {
                    let pe = transport.my_pe();
                    // start near the far end so the demo settles quickly even
                    // on a 50k-position line
                    let (start, role) = if pe == 0 {
                        (positions - 60, ROLE_CHASER)
                    } else {
                        (positions - 59, ROLE_PREY)
                    };
                    let verts = vec![ChaseSim::initial_vertex(pe, start, role)];
                    let runtime = HaloRuntime::new(
                        Arc::new(transport),
                        ChaseSim::new(positions),
                        config.clone(),
                        verts,
                    );
                    reports.lock().push(params.drive(runtime, pe, |runtime| {
                        format!("final position {}", runtime.local_vertex(0).get(F_POS))
                    }));
                });
                print_reports(reports.into_inner());
            }
            ExampleSimType::Infection => {
                let grid_dim = self.grid_dim;
                let npartitions = grid_dim * grid_dim;
                let config = self.config(npartitions, self.actors_per_pe);
                let reports = Mutex::new(vec![]);
                let params = self.clone();
                LocalMemTransport::launch(self.n_pes, config.heap_words_needed(self.n_pes), |transport| {
                    let pe = transport.my_pe();
                    let mut sim = InfectionSim::new(grid_dim, 1.0, params.infection_radius, params.seed, pe);
                    let verts = sim.spawn_actors(pe, params.actors_per_pe);
                    let n_local = verts.len();
                    let runtime = HaloRuntime::new(Arc::new(transport), sim, config.clone(), verts);
                    reports.lock().push(params.drive(runtime, pe, move |runtime| {
                        let infected = (0..n_local)
                            .filter(|offset| runtime.local_vertex(*offset).get(F_INFECTED) > 0.0)
                            .count();
                        format!("{}/{} infected", infected, n_local)
                    }));
                });
                print_reports(reports.into_inner());
            }
        }
    }

    /// PE 0 drives iterations by hand so it can feed the progress bar and the
    /// trace; the other PEs use the stock run loop
    fn drive<T: Transport, S: crate::simulation::VertexSimulation>(
        &self,
        mut runtime: HaloRuntime<T, S>,
        pe: PeId,
        describe: impl Fn(&HaloRuntime<T, S>) -> String,
    ) -> String {
        let summary = if pe != 0 {
            runtime.run()
        } else {
            let mut pb = ProgressBar::on(std::io::stderr(), self.max_iterations);
            pb.message("iterations ");
            let mut writer = self
                .enable_snapshot
                .then(|| SnapshotWriter::new(self.snapshot_path.clone()));
            let outcome = loop {
                if self.max_iterations > 0 && runtime.iter_count() >= self.max_iterations {
                    break IterOutcome::IterationLimit;
                }
                if self.max_elapsed_ms > 0 && runtime.elapsed_ms() >= self.max_elapsed_ms {
                    break IterOutcome::TimeExceeded;
                }
                let outcome = runtime.iterate();
                pb.inc();
                if let Some(writer) = writer.as_mut() {
                    writer.record(runtime.snapshot(true));
                }
                if outcome == IterOutcome::Terminated {
                    break outcome;
                }
            };
            pb.finish();
            if let Some(writer) = writer {
                writer.save().expect("writing the trace");
                eprintln!("trace written to {}", self.snapshot_path);
            }
            runtime.finish(outcome)
        };
        format!(
            "PE {}: {:?} after {} iterations ({} ms), {} pulled, {} edge updates, {} hits / {} misses, {}",
            pe,
            summary.outcome,
            summary.iterations,
            summary.elapsed_ms,
            summary.stats.pulled_vertices,
            summary.stats.edge_updates,
            summary.cache_perf.nhits,
            summary.cache_perf.nmisses,
            describe(&runtime),
        )
    }
}

fn print_reports(reports: Vec<String>) {
    for report in reports.into_iter().sorted() {
        println!("{}", report);
    }
}
