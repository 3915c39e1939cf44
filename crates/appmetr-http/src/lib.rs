pub mod cli;
pub mod response;
pub mod sender;

pub use response::{UploadResponse, parse_upload_response};
pub use sender::HttpBatchSender;
