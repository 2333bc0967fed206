//! # LLMix
//!
//! Watch a repository and mix selected files into LLM-friendly content
//! snapshots.
//!
//! LLMix keeps a live, filtered view of a project directory, lets files be
//! organized into named groups, and materializes each group as one flattened
//! text artifact (file contents concatenated under metadata headers) with an
//! append-only generation history per group.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────┐
//! │ Watcher   │──▶│ Scanner  │──▶│  SyncHub  │──▶ live observers (WS)
//! │ (notify)  │   │ (walkdir)│   └───────────┘
//! └──────────┘   └──────────┘
//!        HTTP API ──▶ GroupStore ──▶ groups.json + {groupId}/ dirs
//!                 └─▶ Generator ──▶ {groupId}-{timestamp}.txt
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! llmix serve               # watch the current directory, serve the API
//! llmix scan                # print the filtered file list
//! llmix generate --group docs readme.md src/lib.rs
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`ignore`] | Ignore-pattern matching |
//! | [`scanner`] | Filtered directory scanning |
//! | [`watcher`] | Continuous change watching |
//! | [`groups`] | Group records and the persistent registry |
//! | [`generate`] | Aggregate-artifact generation |
//! | [`hub`] | Live-observer registry |
//! | [`server`] | HTTP + WebSocket server |

pub mod config;
pub mod generate;
pub mod groups;
pub mod hub;
pub mod ignore;
pub mod scanner;
pub mod server;
pub mod watcher;
