//! mtrwatch: fan-in viewer for mtr reports published over MQTT
//!
//! Subscribes to one topic on any number of brokers, decodes every payload as
//! an mtr report, keeps the ones whose probe matches the configured country
//! and prints each as a table on stdout.
//!
//! ## Modules
//!
//! * `config`: Command-line surface, resolved once into an immutable `Config`.
//!
//! * `core`: Report pipeline and process lifecycle:
//!   - Report model and JSON decoding
//!   - Country filter
//!   - Table renderer with a single serialized writer
//!   - Message handler wiring decode, filter and render
//!   - Shutdown coordination
//!
//! * `logger`: Centralized logging initialization using `tracing`.
//!   Console output to stderr in compact, pretty or JSON format.
//!
//! Broker connections live in the `mtrwatch_mqtt` crate.

pub mod config;
pub mod core;
pub mod logger;
