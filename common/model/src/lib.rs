//! Models shared by Kiln services and their clients.

pub mod build;
