pub mod client_config;
pub mod compress;
pub mod connect;
pub mod engine;
pub mod finish;
pub mod human_time;
pub mod notifications;
pub mod redacted;
pub mod result_error;
pub mod retention;
pub mod snapshot;
pub mod task;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
