//! Matching engine library.
//!
//! This crate implements price-time priority matching for the custodex
//! exchange. It is intentionally free of networking and persistence
//! concerns: the [`book::OrderBook`] is a pure data structure, and the
//! [`engine::EnginePool`] task wires books to the event pipeline.
//!
//! Key properties
//! - Deterministic: given the same input sequence, produces the same matches
//! - Price-time priority: best price first; FIFO within each price level
//! - One task serializes all mutations; markets are independent books

pub mod book;
pub mod engine;

pub use book::{BookError, Fill, OrderBook, Placement};
pub use engine::{
    depth, new_books, open_market, quote, Action, EngineError, EnginePool, OrderCommand,
    SharedBooks,
};
