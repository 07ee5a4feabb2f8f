use {
    crate::error::Error,
    log::error,
    std::io,
};

pub type Result<T> = ::std::result::Result<T, Error>;

#[macro_export]
macro_rules! io_err {
    ($kind:ident, $msg:expr) => {
        ::std::io::Error::new(::std::io::ErrorKind::$kind, $msg)
    };
}

#[macro_export]
macro_rules! res {
    ($err:expr) => {
        Err(From::from($err))
    };
}

/// Run a blocking transport call on tokio's blocking pool.
pub(crate) async fn blocking<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("blocking transport task failed: {:?}", e);
        Error::IoFailure(io::Error::other(e))
    })?
}

/// Run `f` off the async worker threads without waiting for it.
///
/// Used from `Drop` impls, which cannot await. Outside a runtime `f` runs
/// inline.
pub(crate) fn detach_blocking<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(rt) => {
            rt.spawn_blocking(f);
        }
        Err(_) => f(),
    }
}
