pub mod blockio;
pub mod header;

pub use blockio::BlockFile;
pub use header::FileHeader;
