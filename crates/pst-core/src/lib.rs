//! # pst-core: Polyhedral Modeling Core
//!
//! Data structures and exact solvers for polyhedral analysis:
//!
//! - **Basic maps**: convex integer polyhedra with parameters, input and
//!   output dimensions, and local (existential) divs; maps are finite
//!   unions of basic maps.
//! - **Tableau**: classification of constraints against a polyhedron with
//!   snapshot/rollback, redundancy and implicit-equality detection.
//! - **Exact LP/ILP**: a dense rational simplex and an integer
//!   lexicographic search with non-triviality regions, both exact.
//! - **Integer matrices**: unimodular column reduction (left Hermite) for
//!   change-of-basis computations.
//!
//! All algorithms are deterministic and single-threaded; the only shared
//! state is a [`Context`] carrying the option values, passed explicitly.
//!
//! ## Quick Start
//!
//! ```
//! use pst_core::{map::BasicMap, space::{Space, Tuple}, tab::Tab};
//!
//! // { [i] : 0 <= i <= 10 }
//! let space = Space::set(0, Tuple::named("S", 1));
//! let bset = BasicMap::from_constraints(space, vec![], vec![
//!     vec![0, 1],
//!     vec![10, -1],
//! ]);
//! let tab = Tab::from_basic_map(&bset).unwrap();
//! assert!(!tab.empty);
//! ```

use serde::{Deserialize, Serialize};

pub mod error;
pub mod ilp;
pub mod lp;
pub mod map;
pub mod mat;
pub mod seq;
pub mod space;
pub mod tab;

pub use error::{PstError, PstResult};

/// Scheduling algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScheduleAlgorithm {
    /// Bounded dependence distances with coincidence detection, after
    /// Bondhugula's Pluto scheduler.
    #[default]
    Pluto,
    /// Carry as many dependences as possible per dimension.
    Feautrier,
}

/// How aggressively components are fused into a common schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FuseStrategy {
    /// Schedule whole weakly connected components together.
    #[default]
    Max,
    /// Schedule each strongly connected component separately.
    Min,
}

/// Process-wide configuration, carried by the [`Context`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// Reject wrapping constraints whose coefficients exceed the largest
    /// coefficient among the constraints dropped by the fusion.
    pub coalesce_bounded_wrapping: bool,
    /// Allow parameter coefficients in schedule rows.
    pub schedule_parametric: bool,
    /// Cap on the absolute value of schedule coefficients.
    pub schedule_max_coefficient: Option<i64>,
    /// Cap on per-statement constant terms.
    pub schedule_max_constant_term: Option<i64>,
    /// Force the outermost schedule row to satisfy the coincidence
    /// constraints.
    pub schedule_outer_coincidence: bool,
    /// On infeasibility inside a non-empty band, split or carry rather
    /// than closing the band.
    pub schedule_maximize_band_depth: bool,
    pub schedule_algorithm: ScheduleAlgorithm,
    pub schedule_fuse: FuseStrategy,
    /// Prepend a component-index row over top-level components.
    pub schedule_separate_components: bool,
    /// After carrying, split off the constant term when all rows share a
    /// common divisor.
    pub schedule_split_scaled: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            coalesce_bounded_wrapping: true,
            schedule_parametric: true,
            schedule_max_coefficient: None,
            schedule_max_constant_term: None,
            schedule_outer_coincidence: false,
            schedule_maximize_band_depth: false,
            schedule_algorithm: ScheduleAlgorithm::Pluto,
            schedule_fuse: FuseStrategy::Max,
            schedule_separate_components: false,
            schedule_split_scaled: true,
        }
    }
}

/// The explicit context handle flowing through every algorithm.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub options: Options,
}

impl Context {
    pub fn new() -> Self {
        Context::default()
    }

    pub fn with_options(options: Options) -> Self {
        Context { options }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let ctx = Context::new();
        assert!(ctx.options.coalesce_bounded_wrapping);
        assert!(ctx.options.schedule_parametric);
        assert_eq!(ctx.options.schedule_max_coefficient, None);
        assert_eq!(ctx.options.schedule_algorithm, ScheduleAlgorithm::Pluto);
    }

    #[test]
    fn test_options_roundtrip_serde() {
        let opts = Options {
            schedule_fuse: FuseStrategy::Min,
            schedule_max_coefficient: Some(4),
            ..Options::default()
        };
        let json = serde_json::to_string(&opts).unwrap();
        let back: Options = serde_json::from_str(&json).unwrap();
        assert_eq!(opts, back);
    }
}
