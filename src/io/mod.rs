mod cursor;
mod s3_source;
mod source;

pub use cursor::{ByteCursor, InsufficientData};
pub use s3_source::{create_s3_client, S3FrameSource};
pub use source::{FrameId, FrameSource, FrameStream, MemoryFrameStream, DEFAULT_CHUNK_SIZE};
