//! Newline framing over async streams.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

use crate::ProtoError;

/// Writes one line followed by `\n` and flushes.
pub async fn write_line<W>(writer: &mut W, line: &str) -> Result<(), ProtoError>
where
    W: AsyncWriteExt + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one line, trimming the terminator. `None` on clean EOF.
pub async fn read_line<R>(reader: &mut R) -> Result<Option<String>, ProtoError>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}
