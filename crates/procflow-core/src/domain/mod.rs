//! Domain model for process execution
//!
//! The aggregates live here: [`process::Process`] is the owner-defined
//! workflow template, [`instance::ProcessInstance`] is one participant's
//! run through it, and [`submission::StepSubmission`] is the per-step
//! completion record. Side-effect seams (forms, cache, persistence) are
//! traits with in-memory implementations next to them.

pub mod cache;
pub mod events;
pub mod forms;
pub mod instance;
pub mod process;
pub mod repository;
pub mod submission;
