//! Core library for the rota meal planner.
//!
//! A catalogue of meals is tagged with weighted category values (carb
//! type, protein type, cuisine, ...) and planned into calendar day/slot
//! combinations. The [`mirror::Mirror`] keeps an in-memory view of the
//! whole dataset consistent with the SQLite-backed [`db::Database`],
//! reconciles duplicate rows a replica merge can produce, and feeds the
//! [`ranking`] engine that suggests what to eat next.
//!
//! Exactly one process instance may mutate a given store; construct one
//! `Mirror` at composition root and pass it by reference.

pub mod catalog_import;
pub mod day;
pub mod db;
pub mod dedup;
pub mod mirror;
pub mod models;
pub mod ranking;
pub mod remote;
