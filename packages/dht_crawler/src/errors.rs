use failure::Fail;

pub type Error = failure::Error;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "transport setup failed: {}", cause)]
    TransportSetup { cause: tokio_krpc::Error },

    #[fail(display = "value too large to store: {} bytes", len)]
    ValueTooLarge { len: usize },
}
