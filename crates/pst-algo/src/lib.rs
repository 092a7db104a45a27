//! # pst-algo: Polyhedral Coalescing and Scheduling
//!
//! The two algorithmic cores on top of the `pst-core` data model:
//!
//! - **[`coalesce`]**: replace pairs of basic maps in a union by a single
//!   basic map whenever their union is convex, driven by exact constraint
//!   classification against simplex tableaus.
//! - **[`schedule`]**: compute multi-dimensional affine schedules from
//!   statement domains and typed dependence relations, with band
//!   structure, coincidence marking, component splitting, and dependence
//!   carrying.
//!
//! ## Example
//!
//! ```
//! use pst_core::{Context, map::{BasicMap, Map}, space::{Space, Tuple}};
//! use pst_algo::coalesce::set_coalesce;
//!
//! // { [i] : 0 <= i <= 5 } union { [i] : 6 <= i <= 10 }
//! let space = Space::set(0, Tuple::named("S", 1));
//! let mut set = Map::empty(space.clone());
//! set.add_part(BasicMap::from_constraints(
//!     space.clone(), vec![], vec![vec![0, 1], vec![5, -1]],
//! ));
//! set.add_part(BasicMap::from_constraints(
//!     space, vec![], vec![vec![-6, 1], vec![10, -1]],
//! ));
//!
//! let ctx = Context::new();
//! let out = set_coalesce(&ctx, set).unwrap();
//! assert_eq!(out.n(), 1);
//! ```

pub mod coalesce;
pub mod schedule;

pub use coalesce::{map_coalesce, set_coalesce};
pub use schedule::graph::ScheduleConstraints;
pub use schedule::{compute_schedule, Band, Schedule, ScheduleNodeResult};
