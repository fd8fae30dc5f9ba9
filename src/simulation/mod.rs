pub mod states;
pub mod params;
pub mod engine;
pub mod forces;
pub mod barnes_hut;
pub mod encounter;
pub mod timestep;
pub mod integrator;
pub mod bulirsch_stoer;
pub mod scenario;
