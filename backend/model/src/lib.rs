//! Records and database models for Kiln backends.
//!
//! ## Primary Key Uniqueness
//! Build identifiers are UUID v7, so they never collide with historical
//! builds and sort by creation time.

pub mod build;
pub mod db;
pub mod project;
pub mod template;
