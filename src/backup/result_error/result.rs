use crate::backup::result_error::error::Error;
use crate::backup::result_error::{AddFunctionName, AddMsg};

pub type Result<T> = std::result::Result<T, Error>;

impl<R, S: Into<String>> AddMsg<S> for Result<R> {
    fn add_msg(self, msg: S) -> Self {
        self.map_err(|e| e.add_msg(msg))
    }
}

impl<R, S: Into<String>> AddFunctionName<S> for Result<R> {
    fn add_fn_name(self, fn_name: S) -> Self {
        self.map_err(|e| e.add_fn_name(fn_name))
    }
}

/// Folds cleanup failures onto an operation result.
///
/// The operation's own error stays first so its kind is what callers see.
pub fn chain_cleanup<T>(res: Result<T>, cleanup: Vec<Error>) -> Result<T> {
    if cleanup.is_empty() {
        return res;
    }
    match res {
        Ok(v) => {
            cleanup
                .iter()
                .for_each(|e| tracing::warn!("Cleanup failed after success: {e}"));
            Ok(v)
        }
        Err(e) => Err(cleanup.into_iter().fold(e, Error::chain)),
    }
}
