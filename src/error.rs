//! Binary Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("cannot install the log subscriber")]
    Logging,
    #[display("cannot set up the remote connection pool")]
    Remote,
    #[display("ledger error")]
    Ledger,
    #[display("cannot prepare local directory `{}`", _0.display())]
    LocalDirectory(#[error(not(source))] std::path::PathBuf),
    #[display("poller stopped on a fatal error")]
    Poller,
    #[display("cannot write output")]
    Output,
}
