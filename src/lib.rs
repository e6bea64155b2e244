//! # dex-daemon
//!
//! A long-running HTTP daemon that loads APK, DEX, JAR and class files into
//! named in-memory instances and answers code and cross-reference queries.
//!
//! ## Architecture
//!
//! - **dex**: DEX parsing, the Dalvik opcode table and smali listings
//! - **classfile**: Java class-file parsing and JVM bytecode listings
//! - **manifest**: binary XML decoding and exported component queries
//! - **model**: the class model both inputs convert into
//! - **input**: file kind detection and archive reading
//! - **index**: class lookup, callers, users and override relations
//! - **render**: Java skeletons and smali class layout
//! - **instance** / **registry**: loaded instances and their bounded registry
//! - **server**: the axum HTTP API
//! - **mcp**: JSON-RPC tool calls over the same handlers

pub mod bytes;
pub mod classfile;
pub mod cli;
pub mod config;
pub mod dex;
pub mod error;
pub mod index;
pub mod input;
pub mod instance;
pub mod manifest;
pub mod mcp;
pub mod model;
pub mod registry;
pub mod render;
pub mod server;
pub mod signature;
pub mod structure;
pub mod version;
