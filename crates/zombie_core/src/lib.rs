pub mod autodiff;
pub mod error;
pub mod integrate;
pub mod models;
pub mod scenario;
pub mod solvers;
pub mod trajectory;
/// The `zombie_core` crate simulates compartmental models of a zombie
/// outbreak. Models are written once, generically over `Scalar`, so the same
/// equations evaluate plain `f64` states and the Dual numbers used for exact
/// Jacobians.
///
/// Key components:
/// - **Traits**: `Scalar` (numeric type abstraction), `DynamicalSystem` (vector fields).
/// - **Models**: HZR, HIZR, HDZG and the two-region Pale model, each with named
///   parameters, a named-field state and a flow decomposition.
/// - **Solvers**: Tsit5 (explicit 5(4)) and Rosenbrock23 (L-stable 2(3)) embedded pairs.
/// - **Integrate**: adaptive driver with automatic stiffness switching, sampling onto a `TimeGrid`.
/// - **Scenario**: serializable bundles of parameters, initial state and output grid.
pub mod traits;

pub use error::{ErrorKind, SimulationError};
pub use integrate::{integrate, IntegrationStats, IntegratorSettings, Method};
pub use scenario::{ModelKind, Scenario};
pub use trajectory::{GridSpec, TimeGrid, Trajectory};
