//! The `epi_core` crate turns declarative compartmental rules into a deterministic
//! ODE system and integrates it.
//!
//! Key components:
//! - **Registry**: stable label <-> index mapping for compartments.
//! - **Processes**: the rule vocabulary (transitions, births, deaths, fission, fusion,
//!   transmission, raw cells) and its lowering into rate-structure terms.
//! - **Rates**: `RateModel`, owning the constant influx `b`, the linear rate matrix `L`
//!   and the sparse quadratic rate tensor `Q`.
//! - **Field**: `VectorField`, the compiled right-hand side `b + L x + Q(x, x)`.
//! - **Solvers / Integrate**: Euler, RK4 and adaptive Dormand-Prince, sampled at
//!   caller-supplied time points.
//! - **Model**: `DeterministicEpiModel`, the facade tying the pieces together, and
//!   **Presets** with the classic SIR-family models.
pub mod analysis;
pub mod error;
pub mod field;
pub mod integrate;
pub mod model;
pub mod presets;
pub mod processes;
pub mod rates;
pub mod registry;
pub mod solvers;
pub mod traits;
pub mod trajectory;

pub use error::{EpiError, EpiResult};
pub use field::VectorField;
pub use integrate::{integrate, IntegrationMethod, IntegrationSettings};
pub use model::{DeterministicEpiModel, InitialConditions};
pub use processes::{LinearRule, Process};
pub use rates::{QuadraticRates, RateModel, Reset};
pub use registry::CompartmentRegistry;
pub use trajectory::Trajectory;
