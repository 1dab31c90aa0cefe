//! Topic indexing and matching
//!
//! The topic tree indexes subscriptions and retained messages by
//! `/`-delimited path segments; validation enforces name/filter syntax.

mod tree;
pub mod validation;

pub use tree::TopicTree;
pub use validation::{topic_matches_filter, validate_topic_filter, validate_topic_name};
