use failure::Fail;
use std::net::SocketAddr;

pub type Error = failure::Error;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "failed to bind UDP socket on port {}: {}", port, cause)]
    BindFailed { port: u16, cause: std::io::Error },

    #[fail(display = "failed to send datagram to {}: {}", dest, cause)]
    SendFailed { dest: SocketAddr, cause: std::io::Error },

    #[fail(display = "failed to receive datagram: {}", cause)]
    RecvFailed { cause: std::io::Error },
}
