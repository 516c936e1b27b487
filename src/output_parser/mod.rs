//! # Output Parser
//!
//! Extracts structured data from model replies and program output without
//! another model call. Handles think blocks, markdown fences and JSON buried
//! in prose.
//!
//! | Function | Use Case |
//! |----------|----------|
//! | [`parse_json`] | Typed JSON from a model reply (task plans) |
//! | [`find_json_array`] | The array a generated program printed |
//! | [`strip_think_tags`] | Remove `<think>` blocks from text |
//! | [`extract::extract_code_block_for`] | Pull a program out of a fenced reply |

pub mod error;
pub mod extract;
pub mod json;

pub use error::ParseError;
pub use extract::{preprocess, strip_think_tags};
pub use json::{find_json_array, parse_json};
