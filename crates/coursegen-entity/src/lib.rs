//! # coursegen-entity
//!
//! Domain models for the coursegen job subsystem: the job and queue model
//! shared by producers and consumers, flow registration types, the content
//! produced by the generation engine, and the narrow interfaces of the
//! external collaborators (generation engine, course store, notification
//! delivery).

pub mod content;
pub mod course;
pub mod job;
pub mod notification;
