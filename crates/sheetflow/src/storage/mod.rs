pub mod uploads;

pub use uploads::{release_file, UploadStore};
