pub mod client;
pub mod extract;
pub mod inference;

pub use client::{Classifier, ClassifyError, ClassifyErrorKind, OpenRouterClient};
