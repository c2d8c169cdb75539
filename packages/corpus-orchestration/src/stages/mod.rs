// Pipeline implementations
pub mod extraction;
pub mod reconstruction;

// Re-exports
pub use extraction::ExtractionPipeline;
pub use reconstruction::ReconstructionPipeline;
