pub mod configuration;
pub mod dispatcher;
pub mod domain;
pub mod relay;
pub mod routes;
pub mod startup;
pub mod telemetry;
