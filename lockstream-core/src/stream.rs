//! Uniform stream type over plain TCP and TLS connections.

use tokio::io::{AsyncRead, AsyncWrite};

/// Trait alias for types that implement both AsyncRead and AsyncWrite
pub trait AsyncReadWrite: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadWrite for T {}

/// The transport hands the framing layer one of these regardless of whether
/// TLS is in play.
pub type BoxedStream = Box<dyn AsyncReadWrite>;
