//! Shared state management.

pub mod restriction;

pub use restriction::{
    RestrictOutcome, RestrictionEntry, RestrictionState, RestrictionStore, WarningRefOutcome,
};
