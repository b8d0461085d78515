//! Streaming a literal's body off the connection once its `{N}` header
//! has been parsed out of the argument tail (spec.md §4.1 `ReadLiteral`,
//! §9 "Per-command argument Decoder vs. connection Decoder").

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{DecodeError, DecodeResult};

/// Reads exactly `size` bytes from `reader` into memory. The caller is
/// responsible for having already written a continuation request when
/// the literal is synchronizing (`{N}` without `+`) — this function
/// only drains the body.
///
/// No CRLF is implied after the literal body: whatever follows on the
/// wire (a space before the next token, or CRLF ending the command
/// line) must be read separately by the caller, exactly as spec.md's
/// `ReadLiteral` contract describes.
pub async fn read_literal_body<R: AsyncRead + Unpin>(
    reader: &mut R,
    size: u64,
) -> DecodeResult<Vec<u8>> {
    let size = usize::try_from(size).map_err(|_| DecodeError::InvalidLiteral)?;
    let mut buf = vec![0u8; size];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|_| DecodeError::Eof)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_exact_size() {
        let mut cursor = std::io::Cursor::new(b"hello world!!!".to_vec());
        let body = read_literal_body(&mut cursor, 11).await.unwrap();
        assert_eq!(body, b"hello world");
    }

    #[tokio::test]
    async fn errors_on_short_stream() {
        let mut cursor = std::io::Cursor::new(b"short".to_vec());
        let res = read_literal_body(&mut cursor, 100).await;
        assert_eq!(res, Err(DecodeError::Eof));
    }
}
