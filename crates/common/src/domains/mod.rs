//! Custom domains and their trust lifecycle
//!
//! - `hostname`: normalization, validation, TXT record naming
//! - `state`: pure status transitions
//! - `dns`: TXT lookups behind the `TxtResolver` trait
//! - `provisioner`: certificate issuance behind `CertificateProvisioner`
//! - `service`: orchestration and persistence

pub mod dns;
pub mod hostname;
pub mod provisioner;
pub mod service;
pub mod state;

pub use dns::{DnsLookupError, StaticTxtResolver, SystemTxtResolver, TxtResolver};
pub use provisioner::{CertificateProvisioner, ImmediateProvisioner, ProvisionOutcome};
pub use service::{DomainService, DomainSettings, PollReport, VerificationOutcome};
pub use state::{advance, DomainPatch, DomainPolicy, DomainStatus, Observation, SslStatus, Transition};
