pub mod delete_file;
pub mod download_file;
pub mod upload_file;

pub use delete_file::{DeleteFileOperation, DeleteFileOperationOutcome, DeleteFileOperationRequest};
pub use download_file::{
    DownloadFileOperation, DownloadFileOperationOutcome, DownloadFileOperationRequest,
    DownloadFileOperationResult,
};
pub use upload_file::{UploadFileOperation, UploadFileOperationRequest, UploadFileOperationResult};
