//! Example Simulations
//!
//! Built-in simulations shared by the command line runner and the tests: a
//! two-PE chase along a number line, and a grid of random walkers spreading
//! an infection.
//!

use crate::num_traits::ToPrimitive;
use crate::rand::Rng;
use crate::rand::SeedableRng;
use crate::rand_xoshiro::Xoshiro256StarStar;
use crate::simulation::*;
use crate::util::*;
use crate::vertex::*;

pub const F_POS: usize = 0;
pub const F_ROLE: usize = 1;
pub const ROLE_CHASER: f64 = 0.0;
pub const ROLE_PREY: f64 = 1.0;

/// Two vertices on a number line, one per PE: the chaser closes in while the
/// prey runs for the far end. Partition equals position; vertices interact
/// within two positions of each other. The run settles with the prey pinned
/// at the last position and the chaser right behind it.
pub struct ChaseSim {
    n_positions: usize,
    done: bool,
}

impl ChaseSim {
    pub fn new(n_positions: usize) -> Self {
        Self {
            n_positions,
            done: false,
        }
    }

    pub fn initial_vertex(pe: PeId, position: usize, role: f64) -> Vertex {
        let mut vert = Vertex::new(construct_vertex_id(pe, 0));
        vert.set(F_POS, position as f64);
        vert.set(F_ROLE, role);
        vert
    }
}

impl VertexSimulation for ChaseSim {
    fn partition_of(&self, vert: &Vertex) -> Partition {
        vert.get(F_POS) as Partition
    }

    fn might_interact(&self, partition: Partition, out: &mut Vec<Partition>) {
        let p = partition as i64;
        for q in p - 2..=p + 2 {
            if q >= 0 && (q as usize) < self.n_positions {
                out.push(q as Partition);
            }
        }
    }

    fn should_have_edge(&self, a: &Vertex, b: &Vertex) -> EdgeKind {
        if a.owner() != b.owner() && (a.get(F_POS) - b.get(F_POS)).abs() <= 2.0 {
            EdgeKind::Bidirectional
        } else {
            EdgeKind::NoEdge
        }
    }

    fn update_metadata(&mut self, vert: &mut Vertex, neighbors: &[NeighborView], _ctx: &mut UpdateCtx) {
        let end = (self.n_positions - 1) as f64;
        let pos = vert.get(F_POS);
        let Some(other) = neighbors.first() else {
            return;
        };
        let other_pos = other.vert.get(F_POS);
        if vert.get(F_ROLE) == ROLE_CHASER {
            // close in, but never share a position with the prey
            let new_pos = (pos + 1.0).min(other_pos - 1.0).max(pos);
            vert.set(F_POS, new_pos);
            if new_pos == end - 1.0 && other_pos == end {
                self.done = true;
            }
        } else {
            let new_pos = (pos + 1.0).min(end);
            vert.set(F_POS, new_pos);
            if new_pos == end {
                self.done = true;
            }
        }
    }

    fn should_terminate(&mut self, _view: &TerminationView) -> bool {
        self.done
    }
}

pub const F_PX: usize = 0;
pub const F_PY: usize = 1;
pub const F_INFECTED: usize = 2;
pub const F_VX: usize = 3;
pub const F_VY: usize = 4;

/// Random walkers on a toroidal grid of cells, one partition per cell.
/// Walkers within the infection radius of an infected walker catch the
/// infection and couple with the infecting PE; every PE votes to stop once
/// all of its walkers are infected.
pub struct InfectionSim {
    grid_dim: usize,
    cell_dim: f64,
    infection_radius: f64,
    max_delta_velocity: f64,
    rng: Xoshiro256StarStar,
    cur_iter: IterationId,
    infected_this_iter: usize,
}

impl InfectionSim {
    pub fn new(grid_dim: usize, cell_dim: f64, infection_radius: f64, seed: u64, pe: PeId) -> Self {
        Self {
            grid_dim,
            cell_dim,
            infection_radius,
            max_delta_velocity: 0.25,
            rng: Xoshiro256StarStar::seed_from_u64(seed.wrapping_add(pe as u64)),
            cur_iter: 0,
            infected_this_iter: 0,
        }
    }

    pub fn npartitions(&self) -> usize {
        self.grid_dim * self.grid_dim
    }

    fn world_dim(&self) -> f64 {
        self.grid_dim as f64 * self.cell_dim
    }

    /// spawn this PE's walkers uniformly over the world; walker 0 of PE 0
    /// starts out infected
    pub fn spawn_actors(&mut self, pe: PeId, count: usize) -> Vec<Vertex> {
        let world = self.world_dim();
        (0..count)
            .map(|offset| {
                let mut vert = Vertex::new(construct_vertex_id(pe, offset));
                vert.set(F_PX, self.rng.gen_range(0.0..world));
                vert.set(F_PY, self.rng.gen_range(0.0..world));
                vert.set(
                    F_INFECTED,
                    if pe == 0 && offset == 0 { 1.0 } else { 0.0 },
                );
                vert.set(F_VX, self.rng.gen_range(-0.5..0.5));
                vert.set(F_VY, self.rng.gen_range(-0.5..0.5));
                vert
            })
            .collect()
    }

    fn cell_of(&self, coord: f64) -> usize {
        ((coord / self.cell_dim) as usize).min(self.grid_dim - 1)
    }
}

impl VertexSimulation for InfectionSim {
    fn partition_of(&self, vert: &Vertex) -> Partition {
        let row = self.cell_of(vert.get(F_PY));
        let col = self.cell_of(vert.get(F_PX));
        (row * self.grid_dim + col) as Partition
    }

    fn might_interact(&self, partition: Partition, out: &mut Vec<Partition>) {
        // the eight surrounding cells plus the cell itself
        let row = partition as usize / self.grid_dim;
        let col = partition as usize % self.grid_dim;
        for dr in -1i64..=1 {
            for dc in -1i64..=1 {
                let r = row as i64 + dr;
                let c = col as i64 + dc;
                if r >= 0 && (r as usize) < self.grid_dim && c >= 0 && (c as usize) < self.grid_dim {
                    out.push((r as usize * self.grid_dim + c as usize) as Partition);
                }
            }
        }
    }

    fn should_have_edge(&self, a: &Vertex, b: &Vertex) -> EdgeKind {
        let dx = a.get(F_PX) - b.get(F_PX);
        let dy = a.get(F_PY) - b.get(F_PY);
        if a.id != b.id && (dx * dx + dy * dy).sqrt() <= self.infection_radius {
            EdgeKind::Bidirectional
        } else {
            EdgeKind::NoEdge
        }
    }

    fn update_metadata(&mut self, vert: &mut Vertex, neighbors: &[NeighborView], ctx: &mut UpdateCtx) {
        if ctx.iter != self.cur_iter {
            self.cur_iter = ctx.iter;
            self.infected_this_iter = 0;
        }

        if vert.get(F_INFECTED) == 0.0 {
            for neighbor in neighbors {
                if neighbor.vert.get(F_INFECTED) > 0.0 {
                    vert.set(F_INFECTED, 1.0);
                    ctx.couple_with(neighbor.vert.owner());
                    break;
                }
            }
        }
        if vert.get(F_INFECTED) > 0.0 {
            self.infected_this_iter += 1;
        }

        let world = self.world_dim();
        let vx = vert.get(F_VX) + self.rng.gen_range(-self.max_delta_velocity..self.max_delta_velocity);
        let vy = vert.get(F_VY) + self.rng.gen_range(-self.max_delta_velocity..self.max_delta_velocity);
        let mut x = vert.get(F_PX) + vx;
        let mut y = vert.get(F_PY) + vy;
        if x >= world {
            x -= world;
        }
        if y >= world {
            y -= world;
        }
        if x < 0.0 {
            x += world;
        }
        if y < 0.0 {
            y += world;
        }
        vert.set(F_PX, x);
        vert.set(F_PY, y);
        vert.set(F_VX, vx.clamp(-1.0, 1.0));
        vert.set(F_VY, vy.clamp(-1.0, 1.0));
    }

    fn update_coupled_val(&mut self, _iter: IterationId, n_local: usize) -> f64 {
        if n_local == 0 {
            return 0.0;
        }
        self.infected_this_iter.to_f64().unwrap() / n_local.to_f64().unwrap()
    }

    fn should_terminate(&mut self, view: &TerminationView) -> bool {
        view.n_local > 0 && self.infected_this_iter == view.n_local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::*;
    use crate::transport::*;
    use itertools::Itertools;
    use maplit::hashmap;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[test]
    fn example_chase_converges_1() {
        // cargo test example_chase_converges_1 -- --nocapture
        // two PEs on a 50k-position line: the prey ends pinned at the last
        // position with the chaser one behind
        let n_positions = 50_000;
        let config = HaloConfig {
            npartitions: n_positions,
            max_local_vertices: 1,
            max_iterations: 200,
            ..HaloConfig::default()
        };
        let heap = config.heap_words_needed(2);
        let finals = Mutex::new(HashMap::new());
        LocalMemTransport::launch(2, heap, |transport| {
            let pe = transport.my_pe();
            let transport = Arc::new(transport);
            let (start, role) = if pe == 0 {
                (n_positions - 12, ROLE_CHASER)
            } else {
                (n_positions - 11, ROLE_PREY)
            };
            let verts = vec![ChaseSim::initial_vertex(pe, start, role)];
            let mut runtime = HaloRuntime::new(
                transport.clone(),
                ChaseSim::new(n_positions),
                config.clone(),
                verts,
            );
            // lockstep so the halo is at most one iteration stale; both PEs
            // observe global termination at the same step, keeping the
            // barrier counts aligned
            let mut outcome = IterOutcome::Progress;
            for _ in 0..200 {
                outcome = runtime.iterate();
                if outcome == IterOutcome::Terminated {
                    break;
                }
                transport.barrier_all();
            }
            assert_eq!(outcome, IterOutcome::Terminated);
            runtime.finish(outcome);
            finals
                .lock()
                .insert(pe, runtime.local_vertex(0).get(F_POS) as usize);
        });
        assert_eq!(
            finals.into_inner(),
            hashmap! {
                0 => n_positions - 2,
                1 => n_positions - 1,
            }
        );
    }

    #[test]
    fn example_infection_spreads_1() {
        // cargo test example_infection_spreads_1 -- --nocapture
        // single PE, tiny world, generous radius: everyone ends up infected
        let grid_dim = 2;
        let mut sim = InfectionSim::new(grid_dim, 1.0, 1.5, 11, 0);
        let verts = sim.spawn_actors(0, 10);
        let config = HaloConfig {
            npartitions: sim.npartitions(),
            max_local_vertices: 16,
            max_iterations: 500,
            ..HaloConfig::default()
        };
        let transport = LocalMemTransport::single(config.heap_words_needed(1));
        let mut runtime = HaloRuntime::new(Arc::new(transport), sim, config, verts);
        let summary = runtime.run();
        assert_eq!(summary.outcome, IterOutcome::Terminated);
        let infected = (0..10)
            .filter(|offset| runtime.local_vertex(*offset).get(F_INFECTED) > 0.0)
            .count();
        assert_eq!(infected, 10);
        assert_eq!(runtime.coupled_metric(0), 1.0);
        runtime.cache().validate();
    }

    #[test]
    fn example_infection_metric_is_fraction_1() {
        // cargo test example_infection_metric_is_fraction_1 -- --nocapture
        let mut sim = InfectionSim::new(4, 1.0, 0.5, 3, 0);
        sim.infected_this_iter = 3;
        assert_eq!(sim.update_coupled_val(0, 4), 0.75);
        assert_eq!(sim.update_coupled_val(0, 0), 0.0);
    }

    #[test]
    fn example_infection_partitions_cover_grid_1() {
        // cargo test example_infection_partitions_cover_grid_1 -- --nocapture
        let sim = InfectionSim::new(3, 2.0, 0.5, 1, 0);
        let mut vert = Vertex::new(construct_vertex_id(0, 0));
        vert.set(F_PX, 5.9);
        vert.set(F_PY, 0.1);
        assert_eq!(sim.partition_of(&vert), 2);
        let mut out = vec![];
        sim.might_interact(4, &mut out);
        assert_eq!(out.iter().copied().sorted().collect::<Vec<_>>(), (0..9).collect::<Vec<Partition>>());
        out.clear();
        sim.might_interact(0, &mut out);
        assert_eq!(out.len(), 4, "corner cell has three neighbors plus itself");
    }
}
