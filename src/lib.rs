//! FIV Match lead intake and lifecycle service.
//!
//! A public form feeds leads through an abuse gate, validation and intent
//! scoring into Postgres. Operators verify, assign and dispatch leads to
//! partner clinics; low-intent leads get a timed email sequence.
//!
//! # Modules
//!
//! - `api`: HTTP layer re-exports.
//! - `core`: Pure domain logic and the services built on it.
//! - `integrations`: Email delivery and persistence.
//! - `abuse`: Honeypot, fill-time, rate-limit and content checks.
//! - `circuit_breaker`: Breaker guarding the email provider.
//! - `config`: Configuration management.
//! - `db`: Database connection and schema.
//! - `email`: Resend client and message templates.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers and router.
//! - `hashing`: Salted client-IP hashing.
//! - `intake`: Form submission pipeline.
//! - `intent`: Intent classifier.
//! - `lifecycle`: Lead state machine.
//! - `locale`: Localized messages.
//! - `models`: Core data models.
//! - `nurture`: Nurture sequence scheduler.
//! - `repository`: Lead and clinic persistence traits.
//! - `routing`: City-based recipient routing.
//! - `tiering`: Operator priority tiers.
//! - `validation`: Submission sanitizing and validation.

pub mod api;
pub mod core;
pub mod integrations;

pub mod abuse;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod email;
pub mod errors;
pub mod handlers;
pub mod hashing;
pub mod intake;
pub mod intent;
pub mod lifecycle;
pub mod locale;
pub mod models;
pub mod nurture;
pub mod repository;
pub mod routing;
pub mod tiering;
pub mod validation;
