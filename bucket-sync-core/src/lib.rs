#![doc = "bucket-sync-core: core reconciliation library for bucket-sync."]

//! This crate contains the capability traits, the content hasher, the
//! reconciliation engine and the document sync flow. Concrete storage
//! backends live with the binary crate; HTTP adapters live here.
//!
//! # Usage
//! Build a [`synchronise::Reconciler`] from any [`contract::RemoteListingSource`]
//! and [`contract::ContentStore`], then call `sync()`.

pub mod config;
pub mod contract;
pub mod documents;
pub mod error;
pub mod hasher;
pub mod listing;
pub mod synchronise;
