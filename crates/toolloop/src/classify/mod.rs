//! Parallel yes/no classification of candidate lists.

pub mod batch;
pub mod relevance;

pub use batch::{
    BatchClassifier, BatchConfig, BatchEvent, BatchJob, BatchObserver, BatchReport, Classification,
    ClassificationStatus, Classifier, ClassifyFuture, FnClassifier, Verdict, partition,
};
pub use relevance::{ModelRelevanceClassifier, parse_verdict};
