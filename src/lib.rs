//! Documentation assistant backend.
//!
//! The retrieval subsystem lives in [`rag`]: a corpus loader and chunker, a
//! persistent cosine-similarity index, a context assembler and the
//! [`rag::RetrievalService`] that owns the index lifecycle. [`embedding`]
//! provides the text-to-vector profiles, [`server`] the thin HTTP surface.

pub mod core;
pub mod embedding;
pub mod rag;
pub mod server;
pub mod state;
