use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use itertools::Itertools;
use std::fmt::Debug;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Lettre(#[from] lettre::error::Error),
    #[error(transparent)]
    SmtpTransport(#[from] lettre::transport::smtp::Error),
    #[error("Smtp server rejected message: {0}")]
    SmtpSend(String),
    #[error("Config file at {0:?} not found")]
    ConfigNotFound(PathBuf),
    #[error("Expected create-backup task #{} {}", index + 1, expected)]
    TaskValidation { index: usize, expected: String },
    #[error("Connection to {}:{} refused:\n{}", host, port, indent::indent_all_with("  ", error.to_string()))]
    ConnectionRefused {
        host: String,
        port: u16,
        error: Box<Error>,
    },
    #[error("Transfer of {:?} failed:\n{}", remote, indent::indent_all_with("  ", error.to_string()))]
    Transfer { remote: String, error: Box<Error> },
    #[error("Compressing {:?} failed, staging directory kept:\n{}", path, indent::indent_all_with("  ", error.to_string()))]
    CompressionStream { path: PathBuf, error: Box<Error> },
    #[error("Proxy error: {0}")]
    Proxy(String),
    #[error("Remote error: {0}")]
    Remote(String),
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{:?} {} failed:\n{}", obj_debug, fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithDebugObjAndFnName {
        error: Box<Error>,
        obj_debug: Box<dyn Debug + Send>,
        fn_name: String,
    },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

impl<S: Into<String>, O: Debug + Send + 'static> WithDebugObjectAndFnName<S, O> for Error {
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        Error::WithDebugObjAndFnName {
            error: Box::new(self),
            obj_debug: Box::new(obj),
            fn_name: fn_name.into(),
        }
    }
}

impl<S: Into<String>> WithMsg<S> for Error {
    fn with_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl Error {
    pub fn task_validation<S: Into<String>>(index: usize, expected: S) -> Self {
        Self::TaskValidation {
            index,
            expected: expected.into(),
        }
    }

    pub fn transfer<S: Into<String>>(remote: S, error: Error) -> Self {
        Self::Transfer {
            remote: remote.into(),
            error: Box::new(error),
        }
    }

    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(|e| e.into_iter())),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }

    /// Walks through context wrappers to the error that caused them.
    pub fn root(&self) -> &Error {
        match self {
            Error::WithMsg { error, .. } | Error::WithDebugObjAndFnName { error, .. } => {
                error.root()
            }
            e => e,
        }
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        Self::LotsOfError(errors.into_iter().flat_map(|e| e.into_iter()).collect_vec())
    }
}
