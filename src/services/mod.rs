pub mod events;
pub mod file_builder;
pub mod hasher;
pub mod persistence;
pub mod registry;
pub mod settings_store;
pub mod upload_service;
