extern crate serde;
#[macro_use]
extern crate serde_json;
extern crate chrono;
extern crate clap;
extern crate derivative;
extern crate hashbrown;
extern crate itertools;
extern crate maplit;
extern crate more_asserts;
extern crate num_traits;
extern crate parking_lot;
extern crate rand;
extern crate rand_xoshiro;
extern crate rayon;
#[cfg(feature = "cli")]
extern crate pbr;

pub mod arena;
pub mod avl;
pub mod buffered_msgs;
#[cfg(feature = "cli")]
pub mod cli;
pub mod dist_bitmap;
pub mod example_sims;
pub mod irr_matrix;
pub mod pointers;
pub mod runtime;
pub mod seg_map;
pub mod simulation;
pub mod slab;
pub mod snapshot;
pub mod sparse_arr;
pub mod transport;
pub mod util;
pub mod vertex;
pub mod vertex_cache;
