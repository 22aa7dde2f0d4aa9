//! HTTP clients for the model services: spam classifier, retrieval index,
//! and text generator.

mod client;
pub mod generator;
pub mod retriever;
pub mod spam;

pub use generator::HttpGenerator;
pub use retriever::HttpRetriever;
pub use spam::HttpSpamClassifier;
