pub mod generation;
pub mod syllabus;

// Re-export commonly used services
pub use generation::{GeminiClient, GenerationService};
pub use syllabus::{QaCache, SyllabusService};
