pub mod files;
pub mod uploads;

// Re-export for convenience
pub use files::FilesApi;
pub use uploads::{BodyStream, UploadsApi};
