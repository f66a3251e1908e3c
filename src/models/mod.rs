//! Core data models for the upload pipeline.
//!
//! `FileDescriptor` is the in-flight representation of one upload; `FileRecord`
//! is what the datastore keeps once a provider has stored the bytes.
//! `UploadSettings` is the per-environment provider configuration.

pub mod file;
pub mod settings;
