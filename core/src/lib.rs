//! County governance simulation: dual-ledger counties settled month by
//! month over a governor's term, with gentry negotiations and peer
//! counties competing for population.

pub mod clock;
pub mod command;
pub mod config;
pub mod constants;
pub mod county;
pub mod disaster;
pub mod engine;
pub mod error;
pub mod event;
pub mod governor;
pub mod investment;
pub mod ledger;
pub mod metrics;
pub mod name_generator;
pub mod negotiation;
pub mod population;
pub mod promise;
pub mod rng;
pub mod seasonal;
pub mod settlement;
pub mod snapshot;
pub mod store;
pub mod subsystem;
pub mod summary;
pub mod territory;
pub mod types;
