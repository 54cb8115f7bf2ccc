//! # Casanova
//!
//! Core of a voice-driven relationship-advice agent: a persisted semantic
//! index over a relationship guide, a romantic Spanish phrase transformer
//! with a deterministic phrasebook fallback, and a tool gateway that a voice
//! pipeline host calls by name.
//!
//! ## Architecture
//!
//! ```text
//!  voice host / HTTP ──▶ ToolGateway ──┬──▶ translate_and_spice ──▶ TextTransformer ──▶ phrasebook
//!                                      │
//!                                      └──▶ get_relationship_wisdom ──▶ KnowledgeEngine
//!                                                                         │
//!                                 guide.pdf ─▶ extract ─▶ chunk ─▶ embed ─┤
//!                                                                         ▼
//!                                                            storage/index.sqlite
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration |
//! | [`error`] | Error types and the fixed user-facing replies |
//! | [`phrasebook`] | Pre-authored fallback translations |
//! | [`llm`] | Generative text service abstraction |
//! | [`transform`] | Styled phrase transformation |
//! | [`extract`] | Source document text extraction |
//! | [`chunk`] | Paragraph chunking |
//! | [`embedding`] | Embedding backends and vector utilities |
//! | [`db`] / [`migrate`] | Index file connections and schema |
//! | [`index`] | Build, persist, load and search the index |
//! | [`query`] | Answer composition over retrieved passages |
//! | [`engine`] | One-time setup and querying |
//! | [`traits`] | Tool trait and registry |
//! | [`tools`] | The agent's two tools |
//! | [`gateway`] | Task-isolated, never-failing tool invocation |
//! | [`server`] | HTTP tool server |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod index;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod phrasebook;
pub mod query;
pub mod server;
pub mod task;
pub mod tools;
pub mod traits;
pub mod transform;
