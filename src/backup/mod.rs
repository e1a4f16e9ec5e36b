pub mod command;
pub mod compress;
pub mod crypto;
pub mod execution;
pub mod file_ext;
pub mod file_transform;
pub mod finish;
pub mod job_config;
pub mod manager;
pub mod pipeline;
pub mod redacted;
pub mod result_error;
pub mod retry;
pub mod scratch;
pub mod upload;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
